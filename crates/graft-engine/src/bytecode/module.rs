//! Graft module format
//!
//! A module is a name plus a table of type definitions. Types own their
//! fields and methods; methods own their markers and bodies. Everything is
//! written depth-first in declaration order so that encoding is a pure
//! function of the in-memory model.

use super::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use super::instruction::Instruction;
use super::types::{Literal, MethodRef, TypeRef, TypeSig};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Magic number for graft module files: "GRFT"
pub const MAGIC: [u8; 4] = *b"GRFT";

/// Current module format version
pub const VERSION: u32 = 1;

/// Header size: magic + version + flags + crc32 + sha256
pub const HEADER_SIZE: usize = 4 + 4 + 4 + 4 + 32;

/// Module encoding/decoding errors
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Decode error
    #[error("Decode error: {0}")]
    DecodeError(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected GRFT, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported version
    #[error("Unsupported version: {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Stored CRC32
        expected: u32,
        /// CRC32 of the payload as read
        actual: u32,
    },

    /// Payload digest mismatch
    #[error("Payload digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Stored SHA-256, hex
        expected: String,
        /// SHA-256 of the payload as read, hex
        actual: String,
    },

    /// Bytes left over after the payload
    #[error("Trailing data at offset {0}")]
    TrailingData(usize),
}

/// Module flags
pub mod flags {
    /// Module has been rewritten by the patcher
    pub const PATCHED: u32 = 1 << 0;
}

/// Field flags
pub mod field_flags {
    /// Static field
    pub const STATIC: u32 = 1 << 0;
    /// Visible outside the declaring module
    pub const PUBLIC: u32 = 1 << 1;
    /// Assignable only from constructors
    pub const READONLY: u32 = 1 << 2;
}

/// Method flags
pub mod method_flags {
    /// Static method
    pub const STATIC: u32 = 1 << 0;
    /// Instance constructor (or type initializer when combined with STATIC)
    pub const CONSTRUCTOR: u32 = 1 << 1;
    /// Virtual dispatch slot
    pub const VIRTUAL: u32 = 1 << 2;
    /// No body, must be overridden
    pub const ABSTRACT: u32 = 1 << 3;
    /// Body provided outside the module (accessor stubs before patching)
    pub const EXTERN: u32 = 1 << 4;
}

/// A compiled graft module
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    /// Magic number (must be "GRFT")
    pub magic: [u8; 4],
    /// Format version
    pub version: u32,
    /// Module flags
    pub flags: u32,
    /// Type definitions
    pub types: Vec<TypeDef>,
    /// Module metadata
    pub metadata: Metadata,
}

/// Kind of a type definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Reference type
    Class,
    /// Value type
    Struct,
    /// Interface
    Interface,
}

impl TypeKind {
    fn to_u8(self) -> u8 {
        match self {
            Self::Class => 0,
            Self::Struct => 1,
            Self::Interface => 2,
        }
    }

    fn from_u8(byte: u8, offset: usize) -> Result<Self, DecodeError> {
        match byte {
            0 => Ok(Self::Class),
            1 => Ok(Self::Struct),
            2 => Ok(Self::Interface),
            tag => Err(DecodeError::InvalidTag {
                kind: "type kind",
                tag,
                offset,
            }),
        }
    }
}

/// Type definition
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    /// Stable row id within the module
    pub rid: u32,
    /// Full type name
    pub name: String,
    /// Type kind
    pub kind: TypeKind,
    /// Generic parameter names
    pub generic_params: Vec<String>,
    /// Base type, if any
    pub base: Option<TypeSig>,
    /// Directly implemented interfaces
    pub interfaces: Vec<TypeSig>,
    /// Field definitions
    pub fields: Vec<FieldDef>,
    /// Method definitions
    pub methods: Vec<MethodDef>,
}

impl TypeDef {
    /// Check if this is an interface
    pub fn is_interface(&self) -> bool {
        self.kind == TypeKind::Interface
    }

    /// Check if this is a value type
    pub fn is_value_type(&self) -> bool {
        self.kind == TypeKind::Struct
    }

    /// Signature of this type as seen from its own members
    ///
    /// Generic definitions are instantiated over their own parameters.
    pub fn self_sig(&self, scope: &str) -> TypeSig {
        let base = TypeRef::new(scope, self.name.clone());
        if self.generic_params.is_empty() {
            TypeSig::Named(base)
        } else {
            let args = (0..self.generic_params.len() as u16)
                .map(TypeSig::TypeParam)
                .collect();
            TypeSig::Generic { base, args }
        }
    }

    /// Find a field by name
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Find the first method with the given name
    pub fn method_index(&self, name: &str) -> Option<usize> {
        self.methods.iter().position(|m| m.name == name)
    }

    /// Indices of every instance constructor
    pub fn instance_constructors(&self) -> impl Iterator<Item = usize> + '_ {
        self.methods
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_constructor() && !m.is_static())
            .map(|(i, _)| i)
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.rid);
        writer.emit_string(&self.name);
        writer.emit_u8(self.kind.to_u8());
        encode_names(writer, &self.generic_params);
        match &self.base {
            Some(base) => {
                writer.emit_u8(1);
                base.encode(writer);
            }
            None => writer.emit_u8(0),
        }
        writer.emit_u32(self.interfaces.len() as u32);
        for interface in &self.interfaces {
            interface.encode(writer);
        }
        writer.emit_u32(self.fields.len() as u32);
        for field in &self.fields {
            field.encode(writer);
        }
        writer.emit_u32(self.methods.len() as u32);
        for method in &self.methods {
            method.encode(writer);
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let rid = reader.read_u32()?;
        let name = reader.read_string()?;
        let kind_offset = reader.position();
        let kind = TypeKind::from_u8(reader.read_u8()?, kind_offset)?;
        let generic_params = decode_names(reader)?;
        let base = if reader.read_bool()? {
            Some(TypeSig::decode(reader)?)
        } else {
            None
        };
        let interface_count = reader.read_count()?;
        let mut interfaces = Vec::with_capacity(interface_count);
        for _ in 0..interface_count {
            interfaces.push(TypeSig::decode(reader)?);
        }
        let field_count = reader.read_count()?;
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            fields.push(FieldDef::decode(reader)?);
        }
        let method_count = reader.read_count()?;
        let mut methods = Vec::with_capacity(method_count);
        for _ in 0..method_count {
            methods.push(MethodDef::decode(reader)?);
        }
        Ok(Self {
            rid,
            name,
            kind,
            generic_params,
            base,
            interfaces,
            fields,
            methods,
        })
    }
}

/// Field definition
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Stable row id within the module
    pub rid: u32,
    /// Field name
    pub name: String,
    /// Field flags
    pub flags: u32,
    /// Field type
    pub ty: TypeSig,
}

impl FieldDef {
    /// Check if this is a static field
    pub fn is_static(&self) -> bool {
        self.flags & field_flags::STATIC != 0
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.rid);
        writer.emit_string(&self.name);
        writer.emit_u32(self.flags);
        self.ty.encode(writer);
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            rid: reader.read_u32()?,
            name: reader.read_string()?,
            flags: reader.read_u32()?,
            ty: TypeSig::decode(reader)?,
        })
    }
}

/// Method parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Parameter name
    pub name: String,
    /// Parameter type
    pub ty: TypeSig,
}

/// Method body
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Body {
    /// Local variable types
    pub locals: Vec<TypeSig>,
    /// Instructions
    pub instructions: Vec<Instruction>,
}

impl Body {
    /// Body with no locals
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            locals: Vec::new(),
            instructions,
        }
    }
}

/// Method definition
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    /// Stable row id within the module
    pub rid: u32,
    /// Method name
    pub name: String,
    /// Method flags
    pub flags: u32,
    /// Generic parameter names
    pub generic_params: Vec<String>,
    /// Parameters (excluding `this`)
    pub params: Vec<Param>,
    /// Return type
    pub return_type: TypeSig,
    /// Base methods this method explicitly overrides
    pub overrides: Vec<MethodRef>,
    /// Declarative markers
    pub markers: Vec<Marker>,
    /// Body, absent for abstract and extern methods
    pub body: Option<Body>,
}

impl MethodDef {
    /// Check if this is a static method
    pub fn is_static(&self) -> bool {
        self.flags & method_flags::STATIC != 0
    }

    /// Check if this is a constructor
    pub fn is_constructor(&self) -> bool {
        self.flags & method_flags::CONSTRUCTOR != 0
    }

    /// Check if the method carries a flag
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    /// Find a marker by key
    pub fn marker(&self, key: &str) -> Option<&Marker> {
        self.markers.iter().find(|m| m.key == key)
    }

    /// Check for a marker by key
    pub fn has_marker(&self, key: &str) -> bool {
        self.marker(key).is_some()
    }

    /// Parameter types in order
    pub fn param_types(&self) -> Vec<TypeSig> {
        self.params.iter().map(|p| p.ty.clone()).collect()
    }

    /// Reference to this method as declared on `owner`
    pub fn reference(&self, owner: TypeSig) -> MethodRef {
        MethodRef::new(owner, self.name.clone(), self.param_types(), self.return_type.clone())
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.rid);
        writer.emit_string(&self.name);
        writer.emit_u32(self.flags);
        encode_names(writer, &self.generic_params);
        writer.emit_u32(self.params.len() as u32);
        for param in &self.params {
            writer.emit_string(&param.name);
            param.ty.encode(writer);
        }
        self.return_type.encode(writer);
        writer.emit_u32(self.overrides.len() as u32);
        for overridden in &self.overrides {
            overridden.encode(writer);
        }
        writer.emit_u32(self.markers.len() as u32);
        for marker in &self.markers {
            marker.encode(writer);
        }
        match &self.body {
            Some(body) => {
                writer.emit_u8(1);
                writer.emit_u32(body.locals.len() as u32);
                for local in &body.locals {
                    local.encode(writer);
                }
                writer.emit_u32(body.instructions.len() as u32);
                for instruction in &body.instructions {
                    instruction.encode(writer);
                }
            }
            None => writer.emit_u8(0),
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let rid = reader.read_u32()?;
        let name = reader.read_string()?;
        let flags = reader.read_u32()?;
        let generic_params = decode_names(reader)?;

        let param_count = reader.read_count()?;
        let mut params = Vec::with_capacity(param_count);
        for _ in 0..param_count {
            let name = reader.read_string()?;
            let ty = TypeSig::decode(reader)?;
            params.push(Param { name, ty });
        }
        let return_type = TypeSig::decode(reader)?;

        let override_count = reader.read_count()?;
        let mut overrides = Vec::with_capacity(override_count);
        for _ in 0..override_count {
            overrides.push(MethodRef::decode(reader)?);
        }

        let marker_count = reader.read_count()?;
        let mut markers = Vec::with_capacity(marker_count);
        for _ in 0..marker_count {
            markers.push(Marker::decode(reader)?);
        }

        let body = if reader.read_bool()? {
            let local_count = reader.read_count()?;
            let mut locals = Vec::with_capacity(local_count);
            for _ in 0..local_count {
                locals.push(TypeSig::decode(reader)?);
            }
            let instruction_count = reader.read_count()?;
            let mut instructions = Vec::with_capacity(instruction_count);
            for _ in 0..instruction_count {
                instructions.push(Instruction::decode(reader)?);
            }
            Some(Body {
                locals,
                instructions,
            })
        } else {
            None
        };

        Ok(Self {
            rid,
            name,
            flags,
            generic_params,
            params,
            return_type,
            overrides,
            markers,
            body,
        })
    }
}

/// Marker argument
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerArg {
    /// Constant value
    Literal(Literal),
    /// List of names
    StringList(Vec<String>),
}

/// Declarative marker attached to a method
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    /// Marker key
    pub key: String,
    /// Constructor-style arguments
    pub args: Vec<MarkerArg>,
}

impl Marker {
    /// Marker without arguments
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument
    pub fn with_arg(mut self, arg: MarkerArg) -> Self {
        self.args.push(arg);
        self
    }

    /// Literal argument at `index`
    pub fn literal(&self, index: usize) -> Option<&Literal> {
        match self.args.get(index) {
            Some(MarkerArg::Literal(literal)) => Some(literal),
            _ => None,
        }
    }

    /// String argument at `index`
    pub fn string(&self, index: usize) -> Option<&str> {
        self.literal(index).and_then(Literal::as_str)
    }

    /// String list argument at `index`
    pub fn string_list(&self, index: usize) -> Option<&[String]> {
        match self.args.get(index) {
            Some(MarkerArg::StringList(list)) => Some(list),
            _ => None,
        }
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_string(&self.key);
        writer.emit_u32(self.args.len() as u32);
        for arg in &self.args {
            match arg {
                MarkerArg::Literal(literal) => {
                    writer.emit_u8(0);
                    literal.encode(writer);
                }
                MarkerArg::StringList(list) => {
                    writer.emit_u8(1);
                    encode_names(writer, list);
                }
            }
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let key = reader.read_string()?;
        let count = reader.read_count()?;
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            let offset = reader.position();
            let arg = match reader.read_u8()? {
                0 => MarkerArg::Literal(Literal::decode(reader)?),
                1 => MarkerArg::StringList(decode_names(reader)?),
                tag => {
                    return Err(DecodeError::InvalidTag {
                        kind: "marker argument",
                        tag,
                        offset,
                    })
                }
            };
            args.push(arg);
        }
        Ok(Self { key, args })
    }
}

/// Module metadata
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    /// Module name
    pub name: String,
    /// Source file path
    pub source_file: Option<String>,
}

impl Metadata {
    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_string(&self.name);
        match &self.source_file {
            Some(path) => {
                writer.emit_u8(1);
                writer.emit_string(path);
            }
            None => writer.emit_u8(0),
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let name = reader.read_string()?;
        let source_file = if reader.read_bool()? {
            Some(reader.read_string()?)
        } else {
            None
        };
        Ok(Self { name, source_file })
    }
}

fn encode_names(writer: &mut BytecodeWriter, names: &[String]) {
    writer.emit_u32(names.len() as u32);
    for name in names {
        writer.emit_string(name);
    }
}

fn decode_names(reader: &mut BytecodeReader<'_>) -> Result<Vec<String>, DecodeError> {
    let count = reader.read_count()?;
    let mut names = Vec::with_capacity(count);
    for _ in 0..count {
        names.push(reader.read_string()?);
    }
    Ok(names)
}

impl Module {
    /// Create a new empty module
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            flags: 0,
            types: Vec::new(),
            metadata: Metadata {
                name: name.into(),
                source_file: None,
            },
        }
    }

    /// Module name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Find a type by full name
    pub fn type_index(&self, name: &str) -> Option<usize> {
        self.types.iter().position(|t| t.name == name)
    }

    /// Next unused row id
    ///
    /// Row ids are unique across every table of the module, so a fresh id
    /// never collides with an existing type, field or method.
    pub fn next_rid(&self) -> u32 {
        self.types
            .iter()
            .flat_map(|t| {
                std::iter::once(t.rid)
                    .chain(t.fields.iter().map(|f| f.rid))
                    .chain(t.methods.iter().map(|m| m.rid))
            })
            .max()
            .map_or(1, |rid| rid + 1)
    }

    /// Encode the module to binary format
    ///
    /// Format:
    /// - Header: magic (4 bytes) + version (u32) + flags (u32) + crc32 (u32) + sha256 (32 bytes)
    /// - Type table
    /// - Metadata
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BytecodeWriter::new();

        writer.emit_bytes(&self.magic);
        writer.emit_u32(self.version);
        writer.emit_u32(self.flags);
        let checksum_offset = writer.offset();
        writer.emit_u32(0);
        let digest_offset = writer.offset();
        writer.emit_bytes(&[0u8; 32]);

        writer.emit_u32(self.types.len() as u32);
        for ty in &self.types {
            ty.encode(&mut writer);
        }
        self.metadata.encode(&mut writer);

        let payload = &writer.buffer[HEADER_SIZE..];
        let checksum = crc32fast::hash(payload);
        let digest = Sha256::digest(payload);
        writer.patch_u32(checksum_offset, checksum);
        writer.buffer[digest_offset..digest_offset + 32].copy_from_slice(&digest);

        writer.into_bytes()
    }

    /// Decode a module from binary format
    pub fn decode(data: &[u8]) -> Result<Self, ModuleError> {
        let mut reader = BytecodeReader::new(data);

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&reader.read_bytes(4)?);
        if magic != MAGIC {
            return Err(ModuleError::InvalidMagic(magic));
        }

        let version = reader.read_u32()?;
        if version != VERSION {
            return Err(ModuleError::UnsupportedVersion(version));
        }

        let flags = reader.read_u32()?;
        let stored_checksum = reader.read_u32()?;
        let stored_digest = reader.read_bytes(32)?;

        let payload = &data[HEADER_SIZE..];
        let calculated_checksum = crc32fast::hash(payload);
        if stored_checksum != calculated_checksum {
            return Err(ModuleError::ChecksumMismatch {
                expected: stored_checksum,
                actual: calculated_checksum,
            });
        }
        let calculated_digest = Sha256::digest(payload);
        if stored_digest.as_slice() != calculated_digest.as_slice() {
            return Err(ModuleError::DigestMismatch {
                expected: hex::encode(&stored_digest),
                actual: hex::encode(calculated_digest),
            });
        }

        let type_count = reader.read_count()?;
        let mut types = Vec::with_capacity(type_count);
        for _ in 0..type_count {
            types.push(TypeDef::decode(&mut reader)?);
        }
        let metadata = Metadata::decode(&mut reader)?;

        if reader.has_more() {
            return Err(ModuleError::TrailingData(reader.position()));
        }

        Ok(Self {
            magic,
            version,
            flags,
            types,
            metadata,
        })
    }
}
