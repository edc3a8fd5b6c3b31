//! Field candidates and their lifecycle

use crate::bytecode::{FieldRef, TypeSig};
use crate::index::{FieldHandle, MethodHandle, TypeHandle};

/// A synthesized field, ready for constructor-injection strategies
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCandidate {
    /// Accessor stub that requested the field
    pub stub: MethodHandle,
    /// The new field
    pub field: FieldHandle,
    /// Reference to the field as seen from the owner's own members
    pub field_ref: FieldRef,
    /// Whether the stub returns the field by reference
    pub returns_by_ref: bool,
}

impl FieldCandidate {
    /// Owner type of the field
    pub fn owner(&self) -> TypeHandle {
        self.field.ty
    }

    /// Owner signature, instantiated over its own parameters
    pub fn owner_sig(&self) -> &TypeSig {
        &self.field_ref.owner
    }

    /// Field type
    pub fn field_type(&self) -> &TypeSig {
        &self.field_ref.ty
    }
}

/// Final state of a candidate after a run
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateOutcome {
    /// Stub failed validation; nothing was mutated
    Rejected {
        /// Why
        reason: String,
    },
    /// Field exists but no strategy marker matched; it keeps its zero value
    FieldOnly {
        /// Field name
        field: String,
    },
    /// Field exists and at least one strategy matched
    Strategies {
        /// Field name
        field: String,
        /// Strategies that were applied, in order
        applied: Vec<String>,
        /// Strategies that failed validation, with the reason
        rejected: Vec<(String, String)>,
    },
}

/// Per-candidate record kept in the run output
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateReport {
    /// Owning type of the stub
    pub owner: String,
    /// Stub name
    pub member: String,
    /// What happened
    pub outcome: CandidateOutcome,
}

impl CandidateReport {
    /// Check if the stub was rejected
    pub fn is_rejected(&self) -> bool {
        matches!(self.outcome, CandidateOutcome::Rejected { .. })
    }

    /// Name of the synthesized field, if any
    pub fn field(&self) -> Option<&str> {
        match &self.outcome {
            CandidateOutcome::Rejected { .. } => None,
            CandidateOutcome::FieldOnly { field } | CandidateOutcome::Strategies { field, .. } => {
                Some(field)
            }
        }
    }
}
