//! Decoded instructions
//!
//! Method bodies are kept as a list of [`Instruction`]s so patches can insert
//! code without recomputing byte offsets. Branch operands are instruction
//! indices into the same list.

use super::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use super::opcode::Opcode;
use super::types::{FieldRef, MethodRef, TypeSig};
use std::fmt;

/// A single instruction with its inline operand
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Instruction {
    Nop,
    Pop,
    Dup,
    LoadNull,
    LoadI4(i32),
    LoadI8(i64),
    LoadR4(f32),
    LoadR8(f64),
    LoadStr(String),
    LoadToken(TypeSig),
    LoadArg(u16),
    StoreArg(u16),
    LoadLocal(u16),
    StoreLocal(u16),
    LoadIndirect(TypeSig),
    StoreIndirect(TypeSig),
    Add,
    Sub,
    Ceq,
    Clt,
    Br(u32),
    BrTrue(u32),
    BrFalse(u32),
    Ret,
    Call(MethodRef),
    CallVirt(MethodRef),
    NewObj(MethodRef),
    LoadField(FieldRef),
    LoadFieldAddr(FieldRef),
    StoreField(FieldRef),
    CastClass(TypeSig),
    IsInst(TypeSig),
    Throw,
}

impl Instruction {
    /// The opcode this instruction encodes to
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Nop => Opcode::Nop,
            Self::Pop => Opcode::Pop,
            Self::Dup => Opcode::Dup,
            Self::LoadNull => Opcode::LoadNull,
            Self::LoadI4(_) => Opcode::LoadI4,
            Self::LoadI8(_) => Opcode::LoadI8,
            Self::LoadR4(_) => Opcode::LoadR4,
            Self::LoadR8(_) => Opcode::LoadR8,
            Self::LoadStr(_) => Opcode::LoadStr,
            Self::LoadToken(_) => Opcode::LoadToken,
            Self::LoadArg(_) => Opcode::LoadArg,
            Self::StoreArg(_) => Opcode::StoreArg,
            Self::LoadLocal(_) => Opcode::LoadLocal,
            Self::StoreLocal(_) => Opcode::StoreLocal,
            Self::LoadIndirect(_) => Opcode::LoadIndirect,
            Self::StoreIndirect(_) => Opcode::StoreIndirect,
            Self::Add => Opcode::Add,
            Self::Sub => Opcode::Sub,
            Self::Ceq => Opcode::Ceq,
            Self::Clt => Opcode::Clt,
            Self::Br(_) => Opcode::Br,
            Self::BrTrue(_) => Opcode::BrTrue,
            Self::BrFalse(_) => Opcode::BrFalse,
            Self::Ret => Opcode::Ret,
            Self::Call(_) => Opcode::Call,
            Self::CallVirt(_) => Opcode::CallVirt,
            Self::NewObj(_) => Opcode::NewObj,
            Self::LoadField(_) => Opcode::LoadField,
            Self::LoadFieldAddr(_) => Opcode::LoadFieldAddr,
            Self::StoreField(_) => Opcode::StoreField,
            Self::CastClass(_) => Opcode::CastClass,
            Self::IsInst(_) => Opcode::IsInst,
            Self::Throw => Opcode::Throw,
        }
    }

    /// Branch target, if this is a branch
    pub fn branch_target(&self) -> Option<u32> {
        match self {
            Self::Br(target) | Self::BrTrue(target) | Self::BrFalse(target) => Some(*target),
            _ => None,
        }
    }

    /// Mutable access to the branch target, if this is a branch
    pub fn branch_target_mut(&mut self) -> Option<&mut u32> {
        match self {
            Self::Br(target) | Self::BrTrue(target) | Self::BrFalse(target) => Some(target),
            _ => None,
        }
    }

    /// Check if this is a return
    pub fn is_return(&self) -> bool {
        matches!(self, Self::Ret)
    }

    /// Encode the instruction
    pub fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_opcode(self.opcode());
        match self {
            Self::LoadI4(v) => writer.emit_i32(*v),
            Self::LoadI8(v) => writer.emit_i64(*v),
            Self::LoadR4(v) => writer.emit_f32(*v),
            Self::LoadR8(v) => writer.emit_f64(*v),
            Self::LoadStr(s) => writer.emit_string(s),
            Self::LoadArg(i) | Self::StoreArg(i) | Self::LoadLocal(i) | Self::StoreLocal(i) => {
                writer.emit_u16(*i)
            }
            Self::LoadToken(sig)
            | Self::LoadIndirect(sig)
            | Self::StoreIndirect(sig)
            | Self::CastClass(sig)
            | Self::IsInst(sig) => sig.encode(writer),
            Self::Br(target) | Self::BrTrue(target) | Self::BrFalse(target) => {
                writer.emit_u32(*target)
            }
            Self::Call(m) | Self::CallVirt(m) | Self::NewObj(m) => m.encode(writer),
            Self::LoadField(f) | Self::LoadFieldAddr(f) | Self::StoreField(f) => f.encode(writer),
            Self::Nop
            | Self::Pop
            | Self::Dup
            | Self::LoadNull
            | Self::Add
            | Self::Sub
            | Self::Ceq
            | Self::Clt
            | Self::Ret
            | Self::Throw => {}
        }
    }

    /// Decode one instruction
    pub fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let instruction = match reader.read_opcode()? {
            Opcode::Nop => Self::Nop,
            Opcode::Pop => Self::Pop,
            Opcode::Dup => Self::Dup,
            Opcode::LoadNull => Self::LoadNull,
            Opcode::LoadI4 => Self::LoadI4(reader.read_i32()?),
            Opcode::LoadI8 => Self::LoadI8(reader.read_i64()?),
            Opcode::LoadR4 => Self::LoadR4(reader.read_f32()?),
            Opcode::LoadR8 => Self::LoadR8(reader.read_f64()?),
            Opcode::LoadStr => Self::LoadStr(reader.read_string()?),
            Opcode::LoadToken => Self::LoadToken(TypeSig::decode(reader)?),
            Opcode::LoadArg => Self::LoadArg(reader.read_u16()?),
            Opcode::StoreArg => Self::StoreArg(reader.read_u16()?),
            Opcode::LoadLocal => Self::LoadLocal(reader.read_u16()?),
            Opcode::StoreLocal => Self::StoreLocal(reader.read_u16()?),
            Opcode::LoadIndirect => Self::LoadIndirect(TypeSig::decode(reader)?),
            Opcode::StoreIndirect => Self::StoreIndirect(TypeSig::decode(reader)?),
            Opcode::Add => Self::Add,
            Opcode::Sub => Self::Sub,
            Opcode::Ceq => Self::Ceq,
            Opcode::Clt => Self::Clt,
            Opcode::Br => Self::Br(reader.read_u32()?),
            Opcode::BrTrue => Self::BrTrue(reader.read_u32()?),
            Opcode::BrFalse => Self::BrFalse(reader.read_u32()?),
            Opcode::Ret => Self::Ret,
            Opcode::Call => Self::Call(MethodRef::decode(reader)?),
            Opcode::CallVirt => Self::CallVirt(MethodRef::decode(reader)?),
            Opcode::NewObj => Self::NewObj(MethodRef::decode(reader)?),
            Opcode::LoadField => Self::LoadField(FieldRef::decode(reader)?),
            Opcode::LoadFieldAddr => Self::LoadFieldAddr(FieldRef::decode(reader)?),
            Opcode::StoreField => Self::StoreField(FieldRef::decode(reader)?),
            Opcode::CastClass => Self::CastClass(TypeSig::decode(reader)?),
            Opcode::IsInst => Self::IsInst(TypeSig::decode(reader)?),
            Opcode::Throw => Self::Throw,
        };
        Ok(instruction)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.opcode().name();
        match self {
            Self::LoadI4(v) => write!(f, "{} {}", name, v),
            Self::LoadI8(v) => write!(f, "{} {}", name, v),
            Self::LoadR4(v) => write!(f, "{} {}", name, v),
            Self::LoadR8(v) => write!(f, "{} {}", name, v),
            Self::LoadStr(s) => write!(f, "{} {:?}", name, s),
            Self::LoadArg(i) | Self::StoreArg(i) | Self::LoadLocal(i) | Self::StoreLocal(i) => {
                write!(f, "{} {}", name, i)
            }
            Self::LoadToken(sig)
            | Self::LoadIndirect(sig)
            | Self::StoreIndirect(sig)
            | Self::CastClass(sig)
            | Self::IsInst(sig) => write!(f, "{} {}", name, sig),
            Self::Br(t) | Self::BrTrue(t) | Self::BrFalse(t) => write!(f, "{} IL_{:04}", name, t),
            Self::Call(m) | Self::CallVirt(m) | Self::NewObj(m) => write!(f, "{} {}", name, m),
            Self::LoadField(fr) | Self::LoadFieldAddr(fr) | Self::StoreField(fr) => {
                write!(f, "{} {}", name, fr)
            }
            _ => f.write_str(name),
        }
    }
}
