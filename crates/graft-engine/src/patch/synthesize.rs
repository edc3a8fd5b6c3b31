//! Field synthesis
//!
//! An accessor stub is a static method taking the owner instance and
//! returning the field (by value or by reference). Validation runs first and
//! touches nothing; [`synthesize`] then appends the field to the owner and
//! replaces the stub body with a load-and-return sequence.

use super::candidate::FieldCandidate;
use super::error::ValidationError;
use crate::bytecode::{
    field_flags, method_flags, Body, FieldDef, FieldRef, Instruction, TypeSig,
};
use crate::index::{FieldHandle, MethodHandle, ModuleIndex, TypeHandle};
use tracing::info;

/// A validated stub, not yet applied
#[derive(Debug, Clone, PartialEq)]
pub struct StubPlan {
    /// The stub
    pub stub: MethodHandle,
    /// Resolved owner type
    pub owner: TypeHandle,
    /// Owner parameter as declared on the stub
    pub param: TypeSig,
    /// Derived field name
    pub field_name: String,
    /// Field type in terms of the owner's generic parameters
    pub field_type: TypeSig,
    /// Whether the stub returns by reference
    pub returns_by_ref: bool,
}

/// Derive the field name for a stub: `{module}_{method}{rid}`
pub fn field_name(index: &ModuleIndex, stub: MethodHandle) -> String {
    let module = index.module(stub.ty.module).name();
    let method = index.method(stub);
    format!("{}_{}{}", module, method.name, method.rid)
}

/// Check a stub against the accessor contract
pub fn validate(index: &ModuleIndex, stub: MethodHandle) -> Result<StubPlan, ValidationError> {
    let method = index.method(stub);

    if !method.is_static() {
        return Err(ValidationError::NotStatic);
    }
    if method.return_type.strip_by_ref().is_void() {
        return Err(ValidationError::NoReturnValue);
    }
    if method.params.len() != 1 {
        return Err(ValidationError::ParameterCount(method.params.len()));
    }

    let param = method.params[0].ty.clone();
    let owner_sig = param.strip_by_ref();
    if owner_sig.is_array() {
        return Err(ValidationError::OwnerIsArray(owner_sig.to_string()));
    }
    let owner = index
        .resolve_sig(owner_sig)
        .ok_or_else(|| ValidationError::OwnerNotFound(owner_sig.to_string()))?;
    let owner_def = index.type_def(owner);
    if owner_def.is_interface() {
        return Err(ValidationError::OwnerIsInterface(owner_sig.to_string()));
    }

    let args = owner_sig.generic_args();
    for (position, argument) in args.iter().enumerate() {
        if *argument != TypeSig::MethodParam(position as u16) {
            return Err(ValidationError::ClosedGenericOwner {
                owner: owner_sig.to_string(),
                argument: argument.to_string(),
                position,
            });
        }
    }
    let method_arity = method.generic_params.len();
    let owner_arity = owner_def.generic_params.len();
    if method_arity != args.len() || owner_arity != args.len() {
        return Err(ValidationError::GenericArity {
            method: method_arity,
            instantiation: args.len(),
            owner: owner_arity,
        });
    }

    let name = field_name(index, stub);
    if owner_def.field_index(&name).is_some() {
        return Err(ValidationError::FieldExists(name));
    }

    Ok(StubPlan {
        stub,
        owner,
        field_type: method.return_type.strip_by_ref().method_params_to_type_params(),
        returns_by_ref: method.return_type.is_by_ref(),
        param,
        field_name: name,
    })
}

/// Add the field and rewrite the stub body
///
/// Only call with a plan produced by [`validate`] against the same index.
pub fn synthesize(index: &mut ModuleIndex, plan: StubPlan) -> FieldCandidate {
    let rid = index.module(plan.owner.module).next_rid();
    let owner_is_value_type = index.type_def(plan.owner).is_value_type();
    let owner_self = index.type_sig(plan.owner);

    let owner_def = index.type_def_mut(plan.owner);
    owner_def.fields.push(FieldDef {
        rid,
        name: plan.field_name.clone(),
        flags: field_flags::PUBLIC,
        ty: plan.field_type.clone(),
    });
    let field = FieldHandle {
        ty: plan.owner,
        index: owner_def.fields.len() - 1,
    };

    let access = FieldRef {
        owner: plan.param.strip_by_ref().clone(),
        name: plan.field_name.clone(),
        ty: plan.field_type.clone(),
    };
    let mut code = vec![Instruction::LoadArg(0)];
    // A by-ref owner is dereferenced unless the field address is taken
    // straight out of a value type in place.
    if plan.param.is_by_ref() && !(owner_is_value_type && plan.returns_by_ref) {
        code.push(Instruction::LoadIndirect(access.owner.clone()));
    }
    code.push(if plan.returns_by_ref {
        Instruction::LoadFieldAddr(access)
    } else {
        Instruction::LoadField(access)
    });
    code.push(Instruction::Ret);

    let stub = index.method_mut(plan.stub);
    stub.body = Some(Body::new(code));
    stub.flags &= !method_flags::EXTERN;

    let candidate = FieldCandidate {
        stub: plan.stub,
        field,
        field_ref: FieldRef {
            owner: owner_self,
            name: plan.field_name,
            ty: plan.field_type,
        },
        returns_by_ref: plan.returns_by_ref,
    };
    info!(
        owner = %index.type_def(plan.owner).name,
        member = %index.method(plan.stub).name,
        field = %candidate.field_ref.name,
        ty = %candidate.field_ref.ty,
        "synthesized field"
    );
    candidate
}
