//! Structural body verification
//!
//! This is not a type checker. It catches the mistakes a rewrite can make:
//! branches past the end of a body, argument or local indices that do not
//! exist, and bodies that fall off their last instruction.

use super::instruction::Instruction;
use super::module::{MethodDef, Module};

/// Body verification errors
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum VerifyError {
    /// Method has a body with no instructions
    #[error("Empty method body")]
    EmptyBody,

    /// Invalid jump target
    #[error("Invalid jump target {target} at instruction {offset}")]
    InvalidJumpTarget {
        /// Branch operand
        target: u32,
        /// Index of the branch
        offset: usize,
    },

    /// Invalid argument reference
    #[error("Invalid argument reference: index {index} (count {count}) at instruction {offset}")]
    InvalidArgRef {
        /// Argument index
        index: u16,
        /// Number of arguments, `this` included
        count: usize,
        /// Index of the instruction
        offset: usize,
    },

    /// Invalid local variable reference
    #[error("Invalid local variable reference: index {index} (count {count}) at instruction {offset}")]
    InvalidLocalRef {
        /// Local index
        index: u16,
        /// Number of locals
        count: usize,
        /// Index of the instruction
        offset: usize,
    },

    /// Execution falls off end
    #[error("Execution falls off end of body at instruction {0}")]
    FallOffEnd(usize),

    /// Error inside a specific method
    #[error("{owner}::{method}: {error}")]
    InMethod {
        /// Declaring type
        owner: String,
        /// Method name
        method: String,
        /// Underlying error
        error: Box<VerifyError>,
    },
}

/// Verify every method body in a module
pub fn verify_module(module: &Module) -> Result<(), VerifyError> {
    for ty in &module.types {
        for method in &ty.methods {
            verify_body(method).map_err(|error| VerifyError::InMethod {
                owner: ty.name.clone(),
                method: method.name.clone(),
                error: Box::new(error),
            })?;
        }
    }
    Ok(())
}

/// Verify a single method body
///
/// Methods without a body are accepted.
pub fn verify_body(method: &MethodDef) -> Result<(), VerifyError> {
    let Some(body) = &method.body else {
        return Ok(());
    };
    let code = &body.instructions;
    let Some(last) = code.last() else {
        return Err(VerifyError::EmptyBody);
    };

    let arg_count = method.params.len() + usize::from(!method.is_static());
    let local_count = body.locals.len();

    for (offset, instruction) in code.iter().enumerate() {
        if let Some(target) = instruction.branch_target() {
            if target as usize >= code.len() {
                return Err(VerifyError::InvalidJumpTarget { target, offset });
            }
        }
        match instruction {
            Instruction::LoadArg(index) | Instruction::StoreArg(index)
                if *index as usize >= arg_count =>
            {
                return Err(VerifyError::InvalidArgRef {
                    index: *index,
                    count: arg_count,
                    offset,
                });
            }
            Instruction::LoadLocal(index) | Instruction::StoreLocal(index)
                if *index as usize >= local_count =>
            {
                return Err(VerifyError::InvalidLocalRef {
                    index: *index,
                    count: local_count,
                    offset,
                });
            }
            _ => {}
        }
    }

    if !last.opcode().is_terminator() {
        return Err(VerifyError::FallOffEnd(code.len() - 1));
    }

    Ok(())
}
