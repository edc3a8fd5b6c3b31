//! Metadata patching
//!
//! Accessor stubs request new fields on existing types; strategies give
//! those fields their initial values; extensions make arbitrary changes to
//! whole modules. [`Patcher`] runs all of it once over a [`ModuleIndex`].
//!
//! [`ModuleIndex`]: crate::index::ModuleIndex

pub mod candidate;
pub mod error;
pub mod extension;
pub mod inject;
pub mod orchestrator;
pub mod registry;
pub mod strategy;
pub mod synthesize;

pub use candidate::{CandidateOutcome, CandidateReport, FieldCandidate};
pub use error::{PatchError, ValidationError};
pub use extension::{
    module_type, Extension, ExtensionError, ExtensionFn, ExtensionParam, ExtensionRegistry,
    ExtensionShapeError, ParamKind, MODULE_TYPE,
};
pub use inject::insert_before_returns;
pub use orchestrator::{PatchOutput, PatchStats, PatchedModule, Patcher};
pub use registry::{MarkerKeys, ResolvedWiring, StrategyRegistry, WiringRegistration};
pub use strategy::{
    DefaultPostInitProvider, DirectValueStrategy, FieldStrategy, InjectorStrategy,
    PostInitProvider, PostInitStrategy, StrategyEnv,
};
