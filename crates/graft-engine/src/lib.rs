//! Graft Patching Engine
//!
//! This crate loads compiled graft modules, adds fields to existing types
//! at load time and writes the patched modules back out:
//! - **Bytecode**: module model, binary codec and body verifier (`bytecode` module)
//! - **Index**: cross-module lookups and type graph queries (`index` module)
//! - **Patch**: field synthesis, initialization strategies, extensions and
//!   the one-shot [`Patcher`] (`patch` module)
//! - **Artifact**: the length-prefixed output stream (`artifact` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use graft_engine::{ModuleIndex, PatchConfig, Patcher};
//! use std::path::PathBuf;
//!
//! let index = ModuleIndex::load(vec![PathBuf::from("Game.grft"), PathBuf::from("Mods.grft")])?;
//! let config = PatchConfig::load("graft.toml".as_ref())?;
//!
//! let mut patcher = Patcher::with_markers(index, config.markers.clone());
//! config.apply_to(&mut patcher);
//!
//! if let Some(output) = patcher.run()? {
//!     output.persist("patched.grafts".as_ref())?;
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod artifact;
pub mod bytecode;
pub mod config;
pub mod index;
pub mod patch;

pub use artifact::{persist_artifact, read_artifact, write_artifact, ArtifactError};
pub use bytecode::{Instruction, Module, ModuleError, TypeSig};
pub use config::{ConfigError, PatchConfig};
pub use index::{IndexError, MethodHandle, ModuleId, ModuleIndex, ModuleSource, TypeHandle};
pub use patch::{
    CandidateOutcome, DefaultPostInitProvider, Extension, ExtensionParam, MarkerKeys,
    PatchError, PatchOutput, Patcher, ValidationError, WiringRegistration,
};
