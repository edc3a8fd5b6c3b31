//! Patch errors
//!
//! [`ValidationError`] is local to one candidate: the candidate (or one of its
//! strategies) is dropped and the run continues. [`PatchError`] aborts the
//! whole run.

use crate::artifact::ArtifactError;
use crate::bytecode::VerifyError;
use crate::index::IndexError;
use thiserror::Error;

/// Reasons a candidate or strategy is rejected before any mutation
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    // ===== Accessor stubs =====
    /// Stub is an instance method
    #[error("method is not static")]
    NotStatic,

    /// Stub returns nothing
    #[error("method has no return value")]
    NoReturnValue,

    /// Stub does not take exactly the owner instance
    #[error("method has {0} parameters, expected exactly one owner parameter")]
    ParameterCount(usize),

    /// Owner parameter is an interface
    #[error("owner type {0} is an interface")]
    OwnerIsInterface(String),

    /// Owner parameter is an array
    #[error("owner type {0} is an array")]
    OwnerIsArray(String),

    /// Owner parameter does not name an indexed type
    #[error("owner type {0} is not found")]
    OwnerNotFound(String),

    /// Owner instantiation closes over something other than the stub's own
    /// generic parameters
    #[error("owner type {owner} must be instantiated over the method's generic parameters, found argument {argument} at position {position}")]
    ClosedGenericOwner {
        /// Owner signature
        owner: String,
        /// Offending argument
        argument: String,
        /// Argument position
        position: usize,
    },

    /// Generic parameter counts of stub, owner instantiation and owner
    /// definition disagree
    #[error("generic arity mismatch: method declares {method}, owner instantiation has {instantiation}, owner type declares {owner}")]
    GenericArity {
        /// Generic parameters on the stub
        method: usize,
        /// Type arguments on the owner parameter
        instantiation: usize,
        /// Generic parameters on the owner definition
        owner: usize,
    },

    /// A field with the derived name already exists
    #[error("field {0} already exists on the owner type")]
    FieldExists(String),

    // ===== Strategies =====
    /// Marker lacks a required argument
    #[error("marker {marker} is missing argument {index}")]
    MissingMarkerArgument {
        /// Marker key
        marker: String,
        /// Argument position
        index: usize,
    },

    /// Direct value does not have the field's exact type
    #[error("literal {literal} of type {literal_type} does not match field type {field_type}")]
    LiteralTypeMismatch {
        /// Literal as written
        literal: String,
        /// Literal type
        literal_type: String,
        /// Field type
        field_type: String,
    },

    /// Injector method cannot be found
    #[error("injector {0} is not found")]
    InjectorNotFound(String),

    /// Injector is an instance method
    #[error("injector {0} is not static")]
    InjectorNotStatic(String),

    /// Injector result is not the field type
    #[error("injector {injector} returns {found}, expected {expected}")]
    InjectorReturnType {
        /// Injector name
        injector: String,
        /// Field type
        expected: String,
        /// Declared return type
        found: String,
    },

    /// Injector takes more than the owner instance
    #[error("injector {injector} has {count} parameters, expected zero or one")]
    InjectorParameterCount {
        /// Injector name
        injector: String,
        /// Declared parameter count
        count: usize,
    },

    /// Injector parameter is not the owner type
    #[error("injector {injector} parameter type {found} is not {expected}")]
    InjectorParameterType {
        /// Injector name
        injector: String,
        /// Owner type
        expected: String,
        /// Declared parameter type
        found: String,
    },

    /// Post-init field is returned by reference
    #[error("post-init field must not be returned by reference")]
    ByRefComponent,

    /// No registered wiring accepts the owner and field types
    #[error("no wiring found for ({owner}, {field_type}), registered combinations: [{combinations}]")]
    NoWiring {
        /// Declaring type of the field
        owner: String,
        /// Field type
        field_type: String,
        /// Every registered `(main, target)` pair
        combinations: String,
    },

    /// Initializer cannot receive injected code
    #[error("initializer {0} must be an instance method with a body")]
    InitializerShape(String),

    /// Component getter cannot be found
    #[error("getter {getter} is not found on {owner} or its base types")]
    GetterNotFound {
        /// Getter name as registered
        getter: String,
        /// Type searched
        owner: String,
    },

    /// Component getter has an unusable signature
    #[error("getter {getter} {reason}")]
    GetterShape {
        /// Getter name
        getter: String,
        /// What is wrong with it
        reason: String,
    },
}

/// Fatal errors that abort a patch run
#[derive(Debug, Error)]
pub enum PatchError {
    /// A rewrite produced an ill-formed body
    #[error("Rewritten body of {method} failed verification: {error}")]
    Verify {
        /// `"Type:Method"` name
        method: String,
        /// Underlying error
        #[source]
        error: VerifyError,
    },

    /// Something validated earlier no longer holds during emission
    #[error("Structural error in {owner}::{member}: {reason}")]
    Structural {
        /// Owning type
        owner: String,
        /// Member being patched
        member: String,
        /// What went wrong
        reason: String,
    },

    /// Module index error
    #[error(transparent)]
    Index(#[from] IndexError),

    /// Output artifact error
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}
