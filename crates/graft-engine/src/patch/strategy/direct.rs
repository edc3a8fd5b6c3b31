//! Constant initial values

use super::{structural, stub_marker, FieldStrategy, StrategyEnv};
use crate::bytecode::{Instruction, Literal};
use crate::index::{MethodHandle, ModuleIndex};
use crate::patch::candidate::FieldCandidate;
use crate::patch::error::{PatchError, ValidationError};
use crate::patch::inject::inject_constructors;

/// Stores a literal carried by the marker in every constructor
#[derive(Debug, Clone)]
pub struct DirectValueStrategy {
    marker: String,
}

impl DirectValueStrategy {
    /// Create the strategy for a marker key
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    fn literal<'a>(
        &self,
        index: &'a ModuleIndex,
        candidate: &FieldCandidate,
    ) -> Result<&'a Literal, ValidationError> {
        stub_marker(index, candidate, &self.marker)?
            .literal(0)
            .ok_or_else(|| ValidationError::MissingMarkerArgument {
                marker: self.marker.clone(),
                index: 0,
            })
    }
}

/// Instruction that pushes `literal` at its exact width
///
/// Sub-word integers widen to the 32-bit evaluation stack: signed kinds sign
/// extend, unsigned kinds and `Char` zero extend, `Bool` is 0 or 1.
pub fn literal_instruction(literal: &Literal) -> Instruction {
    match literal {
        Literal::Bool(v) => Instruction::LoadI4(i32::from(*v)),
        Literal::Char(v) => Instruction::LoadI4(i32::from(*v)),
        Literal::I8(v) => Instruction::LoadI4(i32::from(*v)),
        Literal::U8(v) => Instruction::LoadI4(i32::from(*v)),
        Literal::I16(v) => Instruction::LoadI4(i32::from(*v)),
        Literal::U16(v) => Instruction::LoadI4(i32::from(*v)),
        Literal::I32(v) => Instruction::LoadI4(*v),
        Literal::U32(v) => Instruction::LoadI4(*v as i32),
        Literal::I64(v) => Instruction::LoadI8(*v),
        Literal::U64(v) => Instruction::LoadI8(*v as i64),
        Literal::F32(v) => Instruction::LoadR4(*v),
        Literal::F64(v) => Instruction::LoadR8(*v),
        Literal::Str(v) => Instruction::LoadStr(v.clone()),
    }
}

impl FieldStrategy for DirectValueStrategy {
    fn name(&self) -> &'static str {
        "direct"
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
        let literal = self.literal(index, candidate)?;
        let literal_type = literal.type_sig();
        if !index.types_equal(&literal_type, candidate.field_type()) {
            return Err(ValidationError::LiteralTypeMismatch {
                literal: literal.to_string(),
                literal_type: literal_type.to_string(),
                field_type: candidate.field_type().to_string(),
            });
        }
        Ok(())
    }

    fn apply(
        &self,
        index: &mut ModuleIndex,
        _env: &StrategyEnv<'_>,
        candidate: &FieldCandidate,
    ) -> Result<Vec<MethodHandle>, PatchError> {
        let load = self
            .literal(index, candidate)
            .map(literal_instruction)
            .map_err(|e| structural(index, candidate, e))?;
        let sequence = [
            Instruction::LoadArg(0),
            load,
            Instruction::StoreField(candidate.field_ref.clone()),
        ];
        Ok(inject_constructors(index, candidate.owner(), &sequence))
    }
}
