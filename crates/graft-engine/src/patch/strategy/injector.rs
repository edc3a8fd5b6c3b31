//! Initial values computed by a static injector method

use super::{structural, stub_marker, FieldStrategy, StrategyEnv};
use crate::bytecode::Instruction;
use crate::index::{split_qualified, MethodHandle, ModuleIndex};
use crate::patch::candidate::FieldCandidate;
use crate::patch::error::{PatchError, ValidationError};
use crate::patch::inject::inject_constructors;

/// Calls an injector in every constructor and stores its result
///
/// The marker names the injector: a plain name is looked up on the stub's
/// declaring type, a `Type:Method` name anywhere in the index. An injector
/// with one parameter receives the instance under construction.
#[derive(Debug, Clone)]
pub struct InjectorStrategy {
    marker: String,
}

impl InjectorStrategy {
    /// Create the strategy for a marker key
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    fn resolve(
        &self,
        index: &ModuleIndex,
        candidate: &FieldCandidate,
    ) -> Result<MethodHandle, ValidationError> {
        let name = stub_marker(index, candidate, &self.marker)?
            .string(0)
            .ok_or_else(|| ValidationError::MissingMarkerArgument {
                marker: self.marker.clone(),
                index: 0,
            })?;

        let found = if split_qualified(name).is_some() {
            index.find_method(name)
        } else {
            let declaring = candidate.stub.ty;
            index
                .type_def(declaring)
                .method_index(name)
                .map(|i| MethodHandle {
                    ty: declaring,
                    index: i,
                })
        };
        found.ok_or_else(|| ValidationError::InjectorNotFound(name.to_string()))
    }

    fn check(&self, index: &ModuleIndex, candidate: &FieldCandidate) -> Result<MethodHandle, ValidationError> {
        let handle = self.resolve(index, candidate)?;
        let injector = index.method(handle);
        let name = index.method_name(handle);

        if !injector.is_static() {
            return Err(ValidationError::InjectorNotStatic(name));
        }
        if !index.types_equal(&injector.return_type, candidate.field_type()) {
            return Err(ValidationError::InjectorReturnType {
                injector: name,
                expected: candidate.field_type().to_string(),
                found: injector.return_type.to_string(),
            });
        }
        match injector.params.as_slice() {
            [] => {}
            [param] if index.types_equal(&param.ty, candidate.owner_sig()) => {}
            [param] => {
                return Err(ValidationError::InjectorParameterType {
                    injector: name,
                    expected: candidate.owner_sig().to_string(),
                    found: param.ty.to_string(),
                })
            }
            params => {
                return Err(ValidationError::InjectorParameterCount {
                    injector: name,
                    count: params.len(),
                })
            }
        }
        Ok(handle)
    }
}

impl FieldStrategy for InjectorStrategy {
    fn name(&self) -> &'static str {
        "injector"
    }

    fn marker(&self) -> &str {
        &self.marker
    }

    fn validate(
        &self,
        index: &ModuleIndex,
        _env: &StrategyEnv<'_>,
        candidate: &FieldCandidate,
    ) -> Result<(), ValidationError> {
        self.check(index, candidate).map(|_| ())
    }

    fn apply(
        &self,
        index: &mut ModuleIndex,
        _env: &StrategyEnv<'_>,
        candidate: &FieldCandidate,
    ) -> Result<Vec<MethodHandle>, PatchError> {
        let injector = self
            .check(index, candidate)
            .map_err(|e| structural(index, candidate, e))?;

        let mut sequence = vec![Instruction::LoadArg(0)];
        if !index.method(injector).params.is_empty() {
            sequence.push(Instruction::LoadArg(0));
        }
        sequence.push(Instruction::Call(index.method_ref(injector)));
        sequence.push(Instruction::StoreField(candidate.field_ref.clone()));
        Ok(inject_constructors(index, candidate.owner(), &sequence))
    }
}
