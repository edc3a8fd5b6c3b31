//! Component fields populated by a shared initializer
//!
//! Instead of touching constructors, the post-init strategy inserts code into
//! an initializer method of a main type (resolved through a registered
//! wiring). One initializer can serve fields declared on several subtypes of
//! the main type, so a field declared below the main type is guarded by a
//! runtime type check.

use super::{structural, FieldStrategy, StrategyEnv};
use crate::bytecode::{Instruction, TypeSig};
use crate::index::{split_qualified, MethodHandle, ModuleIndex};
use crate::patch::candidate::FieldCandidate;
use crate::patch::error::{PatchError, ValidationError};
use crate::patch::inject::inject_method;
use crate::patch::registry::ResolvedWiring;
use std::fmt;

/// Emits the code that populates one component field inside an initializer
pub trait PostInitProvider: Send + Sync + fmt::Debug {
    /// Check that code can be produced for this candidate
    fn validate(
        &self,
        index: &ModuleIndex,
        wiring: &ResolvedWiring,
        candidate: &FieldCandidate,
    ) -> Result<(), ValidationError> {
        self.provide(index, wiring, candidate).map(|_| ())
    }

    /// Produce the sequence inserted before every return of the initializer
    ///
    /// Branch targets are relative to the sequence; the sequence length
    /// addresses the return that follows it.
    fn provide(
        &self,
        index: &ModuleIndex,
        wiring: &ResolvedWiring,
        candidate: &FieldCandidate,
    ) -> Result<Vec<Instruction>, ValidationError>;
}

/// Fills fields through a component getter on the owner hierarchy
///
/// The getter is either generic over the component type with no parameters,
/// or takes the component's runtime type and returns something the wiring's
/// target type is assignable from.
#[derive(Debug, Clone)]
pub struct DefaultPostInitProvider {
    getter: String,
}

impl DefaultPostInitProvider {
    /// Provider calling `getter` (plain or `Type:Method` name)
    pub fn new(getter: impl Into<String>) -> Self {
        Self {
            getter: getter.into(),
        }
    }

    /// Getter name as configured
    pub fn getter(&self) -> &str {
        &self.getter
    }

    /// Resolve the getter and the signature it is called through
    fn resolve_getter(
        &self,
        index: &ModuleIndex,
        declaring: &TypeSig,
    ) -> Result<(MethodHandle, TypeSig), ValidationError> {
        let not_found = || ValidationError::GetterNotFound {
            getter: self.getter.clone(),
            owner: declaring.to_string(),
        };

        if split_qualified(&self.getter).is_some() {
            let handle = index.find_method(&self.getter).ok_or_else(not_found)?;
            return Ok((handle, index.type_sig(handle.ty)));
        }

        std::iter::once(declaring.clone())
            .chain(index.base_chain(declaring))
            .find_map(|sig| {
                let ty = index.resolve_sig(&sig)?;
                let method = index.type_def(ty).method_index(&self.getter)?;
                Some((MethodHandle { ty, index: method }, sig))
            })
            .ok_or_else(not_found)
    }

    fn shape_error(&self, reason: &str) -> ValidationError {
        ValidationError::GetterShape {
            getter: self.getter.clone(),
            reason: reason.to_string(),
        }
    }
}

impl PostInitProvider for DefaultPostInitProvider {
    fn provide(
        &self,
        index: &ModuleIndex,
        wiring: &ResolvedWiring,
        candidate: &FieldCandidate,
    ) -> Result<Vec<Instruction>, ValidationError> {
        let declaring = candidate.owner_sig();
        let field_type = candidate.field_type();
        let (handle, getter_owner) = self.resolve_getter(index, declaring)?;
        let getter = index.method(handle);

        if getter.is_static() {
            return Err(self.shape_error("must be an instance method"));
        }
        let reference = getter.reference(getter_owner.clone());
        let call = match (getter.generic_params.len(), getter.params.as_slice()) {
            (1, []) => vec![Instruction::CallVirt(
                reference.with_generic_args(vec![field_type.clone()]),
            )],
            (0, [param]) if param.ty == TypeSig::Type => {
                if !index.is_assignable_from(&wiring.target, &getter.return_type) {
                    return Err(self.shape_error(&format!(
                        "returns {}, which is not assignable to {}",
                        getter.return_type, wiring.target
                    )));
                }
                vec![
                    Instruction::LoadToken(field_type.clone()),
                    Instruction::CallVirt(reference),
                    Instruction::CastClass(field_type.clone()),
                ]
            }
            _ => {
                return Err(self.shape_error(
                    "must be generic over the component type with no parameters, or take one Type parameter",
                ))
            }
        };

        let guarded = index.is_subclass_of(declaring, &wiring.main);
        let mut code = Vec::with_capacity(call.len() + 8);
        if guarded {
            code.push(Instruction::LoadArg(0));
            code.push(Instruction::IsInst(declaring.clone()));
            code.push(Instruction::BrFalse(0));
        }

        code.push(Instruction::LoadArg(0));
        if guarded {
            code.push(Instruction::CastClass(declaring.clone()));
        }
        code.push(Instruction::LoadArg(0));
        if !index.is_assignable_from(&getter_owner, &wiring.main) {
            code.push(Instruction::CastClass(getter_owner));
        }
        code.extend(call);
        code.push(Instruction::StoreField(candidate.field_ref.clone()));

        if guarded {
            let end = code.len() as u32;
            if let Some(target) = code[2].branch_target_mut() {
                *target = end;
            }
        }
        Ok(code)
    }
}

/// Populates component fields through a registered wiring
#[derive(Debug, Clone)]
pub struct PostInitStrategy {
    marker: String,
}

impl PostInitStrategy {
    /// Create the strategy for a marker key
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    /// First wiring whose main type accepts the field's declaring type and
    /// whose target type accepts the field type
    fn find_wiring<'a>(
        index: &ModuleIndex,
        env: &StrategyEnv<'a>,
        candidate: &FieldCandidate,
    ) -> Result<&'a ResolvedWiring, ValidationError> {
        let declaring = candidate.owner_sig();
        let field_type = candidate.field_type();
        env.wirings
            .iter()
            .find(|w| {
                index.is_assignable_from(&w.main, declaring)
                    && index.is_assignable_from(&w.target, field_type)
            })
            .ok_or_else(|| ValidationError::NoWiring {
                owner: declaring.to_string(),
                field_type: field_type.to_string(),
                combinations: env
                    .wirings
                    .iter()
                    .map(|w| format!("({}, {})", w.main, w.target))
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    fn check<'a>(
        index: &ModuleIndex,
        env: &StrategyEnv<'a>,
        candidate: &FieldCandidate,
    ) -> Result<&'a ResolvedWiring, ValidationError> {
        if candidate.returns_by_ref {
            return Err(ValidationError::ByRefComponent);
        }
        let wiring = Self::find_wiring(index, env, candidate)?;
        let initializer = index.method(wiring.initializer);
        if initializer.is_static() || initializer.body.is_none() {
            return Err(ValidationError::InitializerShape(
                index.method_name(wiring.initializer),
            ));
        }
        wiring.provider.validate(index, wiring, candidate)?;
        Ok(wiring)
    }
}

impl FieldStrategy for PostInitStrategy {
    fn name(&self) -> &'static str {
        "post-init"
    }

    fn marker(&self) -> &str {
        &self.marker
    }

    fn validate(
        &self,
        index: &ModuleIndex,
        env: &StrategyEnv<'_>,
        candidate: &FieldCandidate,
    ) -> Result<(), ValidationError> {
        Self::check(index, env, candidate).map(|_| ())
    }

    fn apply(
        &self,
        index: &mut ModuleIndex,
        env: &StrategyEnv<'_>,
        candidate: &FieldCandidate,
    ) -> Result<Vec<MethodHandle>, PatchError> {
        let wiring = Self::check(index, env, candidate)
            .map_err(|e| structural(index, candidate, e))?;
        let sequence = wiring
            .provider
            .provide(index, wiring, candidate)
            .map_err(|e| structural(index, candidate, e))?;
        inject_method(index, wiring.initializer, &sequence);
        Ok(vec![wiring.initializer])
    }
}
