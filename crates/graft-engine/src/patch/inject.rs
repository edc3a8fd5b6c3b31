//! Instruction insertion before exit points
//!
//! A sequence is inserted in front of every `Ret` of a body. Branches that
//! used to land on a `Ret` land on the first inserted instruction instead, so
//! every path out of the method runs the sequence exactly once.
//!
//! Branch operands inside an inserted sequence are relative to the start of
//! the sequence; a target equal to the sequence length means "the exit that
//! follows".

use crate::bytecode::{Body, Instruction, CONSTRUCTOR_NAME};
use crate::index::{MethodHandle, ModuleIndex, TypeHandle};

/// Insert `sequence` before every return of `body`
///
/// Returns the number of insertion points.
pub fn insert_before_returns(body: &mut Body, sequence: &[Instruction]) -> usize {
    let old = std::mem::take(&mut body.instructions);

    // New position of every original instruction; a return maps to the start
    // of the sequence placed in front of it.
    let mut positions = Vec::with_capacity(old.len());
    let mut next = 0usize;
    for instruction in &old {
        positions.push(next as u32);
        next += if instruction.is_return() {
            sequence.len() + 1
        } else {
            1
        };
    }
    let end = next as u32;

    let mut code = Vec::with_capacity(next);
    let mut inserted = 0;
    for mut instruction in old {
        if instruction.is_return() {
            let start = code.len() as u32;
            for item in sequence {
                let mut item = item.clone();
                if let Some(target) = item.branch_target_mut() {
                    *target += start;
                }
                code.push(item);
            }
            inserted += 1;
        } else if let Some(target) = instruction.branch_target_mut() {
            // Out-of-range targets stay out of range for the verifier to catch
            *target = positions.get(*target as usize).copied().unwrap_or(end);
        }
        code.push(instruction);
    }

    body.instructions = code;
    inserted
}

/// Check if a constructor chains to another constructor of its own type
pub fn is_delegating_constructor(index: &ModuleIndex, ctor: MethodHandle) -> bool {
    let Some(body) = &index.method(ctor).body else {
        return false;
    };
    body.instructions.iter().any(|instruction| match instruction {
        Instruction::Call(target) if target.name == CONSTRUCTOR_NAME => {
            index.resolve_sig(&target.owner) == Some(ctor.ty)
        }
        _ => false,
    })
}

/// Instance constructors of `owner` that receive field initialization
///
/// Delegating constructors are skipped: the constructor they chain to
/// already runs the injected code.
pub fn injectable_constructors(index: &ModuleIndex, owner: TypeHandle) -> Vec<MethodHandle> {
    index
        .type_def(owner)
        .instance_constructors()
        .map(|i| MethodHandle { ty: owner, index: i })
        .filter(|&ctor| index.method(ctor).body.is_some())
        .filter(|&ctor| !is_delegating_constructor(index, ctor))
        .collect()
}

/// Insert `sequence` before every return of every injectable constructor
///
/// Returns the constructors that were rewritten.
pub fn inject_constructors(
    index: &mut ModuleIndex,
    owner: TypeHandle,
    sequence: &[Instruction],
) -> Vec<MethodHandle> {
    let ctors = injectable_constructors(index, owner);
    for &ctor in &ctors {
        inject_method(index, ctor, sequence);
    }
    ctors
}

/// Insert `sequence` before every return of one method
pub fn inject_method(index: &mut ModuleIndex, method: MethodHandle, sequence: &[Instruction]) -> usize {
    match index.method_mut(method).body.as_mut() {
        Some(body) => insert_before_returns(body, sequence),
        None => 0,
    }
}
