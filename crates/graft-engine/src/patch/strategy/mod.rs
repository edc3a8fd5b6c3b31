//! Constructor-injection strategies
//!
//! A strategy is selected by a marker on the accessor stub and decides how
//! the synthesized field receives its initial value. Every strategy
//! validates without mutating, then applies by inserting code into existing
//! method bodies.

mod direct;
mod injector;
mod post_init;

pub use direct::{literal_instruction, DirectValueStrategy};
pub use injector::InjectorStrategy;
pub use post_init::{DefaultPostInitProvider, PostInitProvider, PostInitStrategy};

use super::candidate::FieldCandidate;
use super::error::{PatchError, ValidationError};
use super::registry::ResolvedWiring;
use crate::bytecode::Marker;
use crate::index::{MethodHandle, ModuleIndex};
use std::fmt;

/// Run-wide state shared by every strategy invocation
#[derive(Debug, Clone, Copy)]
pub struct StrategyEnv<'a> {
    /// Wirings resolved against the index for this run
    pub wirings: &'a [ResolvedWiring],
}

/// A validator and mutator for one initialization policy
pub trait FieldStrategy: Send + Sync {
    /// Strategy name used in reports and logs
    fn name(&self) -> &'static str;

    /// Marker key that selects this strategy
    fn marker(&self) -> &str;

    /// Check the candidate without touching the index
    fn validate(
        &self,
        index: &ModuleIndex,
        env: &StrategyEnv<'_>,
        candidate: &FieldCandidate,
    ) -> Result<(), ValidationError>;

    /// Rewrite method bodies, returning every method that changed
    ///
    /// Only called after [`FieldStrategy::validate`] succeeded.
    fn apply(
        &self,
        index: &mut ModuleIndex,
        env: &StrategyEnv<'_>,
        candidate: &FieldCandidate,
    ) -> Result<Vec<MethodHandle>, PatchError>;
}

impl fmt::Debug for dyn FieldStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.marker())
    }
}

/// Marker `key` on the candidate's stub
fn stub_marker<'a>(
    index: &'a ModuleIndex,
    candidate: &FieldCandidate,
    key: &str,
) -> Result<&'a Marker, ValidationError> {
    index
        .method(candidate.stub)
        .marker(key)
        .ok_or_else(|| ValidationError::MissingMarkerArgument {
            marker: key.to_string(),
            index: 0,
        })
}

/// A validation failure discovered only while applying
fn structural(index: &ModuleIndex, candidate: &FieldCandidate, reason: impl fmt::Display) -> PatchError {
    PatchError::Structural {
        owner: index.type_def(candidate.owner()).name.clone(),
        member: index.method(candidate.stub).name.clone(),
        reason: reason.to_string(),
    }
}
