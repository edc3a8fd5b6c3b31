//! Module model and binary format
//!
//! This module provides the instruction set, type signatures, the module
//! container and its codec, plus a structural body verifier.

pub mod builder;
pub mod encoder;
pub mod instruction;
pub mod module;
pub mod opcode;
pub mod types;
pub mod verify;

pub use builder::{MethodBuilder, ModuleBuilder, TypeBuilder, CONSTRUCTOR_NAME};
pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError};
pub use instruction::Instruction;
pub use module::{
    field_flags, flags, method_flags, Body, FieldDef, Marker, MarkerArg, Metadata, MethodDef,
    Module, ModuleError, Param, TypeDef, TypeKind,
};
pub use opcode::Opcode;
pub use types::{FieldRef, Literal, MethodRef, TypeRef, TypeSig};
pub use verify::{verify_body, verify_module, VerifyError};
