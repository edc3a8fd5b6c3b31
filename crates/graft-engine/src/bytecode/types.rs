//! Type signatures, member references and literal values
//!
//! Signatures are the only way one module talks about another: a field type,
//! a call target or a base type is always a [`TypeSig`] naming its declaring
//! module through a [`TypeRef`]. Resolution to definitions happens in the
//! module index, never here.

use super::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use std::fmt;

/// Reference to a type by declaring module and full name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeRef {
    /// Name of the module that declares the type
    pub scope: String,
    /// Full type name (namespace included)
    pub name: String,
}

impl TypeRef {
    /// Create a new type reference
    pub fn new(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            name: name.into(),
        }
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_string(&self.scope);
        writer.emit_string(&self.name);
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let scope = reader.read_string()?;
        let name = reader.read_string()?;
        Ok(Self { scope, name })
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]{}", self.scope, self.name)
    }
}

/// Type signature
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSig {
    /// No value
    Void,
    /// Boolean
    Bool,
    /// UTF-16 code unit
    Char,
    /// Signed 8-bit integer
    I8,
    /// Unsigned 8-bit integer
    U8,
    /// Signed 16-bit integer
    I16,
    /// Unsigned 16-bit integer
    U16,
    /// Signed 32-bit integer
    I32,
    /// Unsigned 32-bit integer
    U32,
    /// Signed 64-bit integer
    I64,
    /// Unsigned 64-bit integer
    U64,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
    /// String
    Str,
    /// Root object type
    Object,
    /// Runtime type handle
    Type,
    /// Non-generic named type
    Named(TypeRef),
    /// Generic instantiation
    Generic {
        /// Generic type definition
        base: TypeRef,
        /// Type arguments in declaration order
        args: Vec<TypeSig>,
    },
    /// Generic parameter of the enclosing type
    TypeParam(u16),
    /// Generic parameter of the enclosing method
    MethodParam(u16),
    /// Managed reference to a value of the inner type
    ByRef(Box<TypeSig>),
    /// Single-dimensional array
    Array(Box<TypeSig>),
}

/// Deepest signature nesting accepted when decoding
pub const MAX_SIG_DEPTH: usize = 64;

mod tag {
    pub const VOID: u8 = 0;
    pub const BOOL: u8 = 1;
    pub const CHAR: u8 = 2;
    pub const I8: u8 = 3;
    pub const U8: u8 = 4;
    pub const I16: u8 = 5;
    pub const U16: u8 = 6;
    pub const I32: u8 = 7;
    pub const U32: u8 = 8;
    pub const I64: u8 = 9;
    pub const U64: u8 = 10;
    pub const F32: u8 = 11;
    pub const F64: u8 = 12;
    pub const STR: u8 = 13;
    pub const OBJECT: u8 = 14;
    pub const TYPE: u8 = 15;
    pub const NAMED: u8 = 16;
    pub const GENERIC: u8 = 17;
    pub const TYPE_PARAM: u8 = 18;
    pub const METHOD_PARAM: u8 = 19;
    pub const BY_REF: u8 = 20;
    pub const ARRAY: u8 = 21;
}

impl TypeSig {
    /// Shorthand for a non-generic named type
    pub fn named(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Named(TypeRef::new(scope, name))
    }

    /// Shorthand for a generic instantiation
    pub fn generic(base: TypeRef, args: Vec<TypeSig>) -> Self {
        Self::Generic { base, args }
    }

    /// Wrap this signature in a managed reference
    pub fn by_ref(self) -> Self {
        Self::ByRef(Box::new(self))
    }

    /// Wrap this signature in an array
    pub fn array_of(self) -> Self {
        Self::Array(Box::new(self))
    }

    /// Check for the no-value type
    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }

    /// Check for a managed reference
    pub fn is_by_ref(&self) -> bool {
        matches!(self, Self::ByRef(_))
    }

    /// Check for an array
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    /// The signature with any managed-reference wrapper removed
    pub fn strip_by_ref(&self) -> &TypeSig {
        match self {
            Self::ByRef(inner) => inner.strip_by_ref(),
            other => other,
        }
    }

    /// The definition this signature names, if it names one
    pub fn type_ref(&self) -> Option<&TypeRef> {
        match self {
            Self::Named(r) | Self::Generic { base: r, .. } => Some(r),
            _ => None,
        }
    }

    /// Type arguments of a generic instantiation (empty otherwise)
    pub fn generic_args(&self) -> &[TypeSig] {
        match self {
            Self::Generic { args, .. } => args,
            _ => &[],
        }
    }

    /// Replace method generic parameters with the owner's type parameters at
    /// the same position
    pub fn method_params_to_type_params(&self) -> TypeSig {
        match self {
            Self::MethodParam(index) => Self::TypeParam(*index),
            Self::Generic { base, args } => Self::Generic {
                base: base.clone(),
                args: args.iter().map(Self::method_params_to_type_params).collect(),
            },
            Self::ByRef(inner) => Self::ByRef(Box::new(inner.method_params_to_type_params())),
            Self::Array(inner) => Self::Array(Box::new(inner.method_params_to_type_params())),
            other => other.clone(),
        }
    }

    /// Encode the signature
    pub fn encode(&self, writer: &mut BytecodeWriter) {
        match self {
            Self::Void => writer.emit_u8(tag::VOID),
            Self::Bool => writer.emit_u8(tag::BOOL),
            Self::Char => writer.emit_u8(tag::CHAR),
            Self::I8 => writer.emit_u8(tag::I8),
            Self::U8 => writer.emit_u8(tag::U8),
            Self::I16 => writer.emit_u8(tag::I16),
            Self::U16 => writer.emit_u8(tag::U16),
            Self::I32 => writer.emit_u8(tag::I32),
            Self::U32 => writer.emit_u8(tag::U32),
            Self::I64 => writer.emit_u8(tag::I64),
            Self::U64 => writer.emit_u8(tag::U64),
            Self::F32 => writer.emit_u8(tag::F32),
            Self::F64 => writer.emit_u8(tag::F64),
            Self::Str => writer.emit_u8(tag::STR),
            Self::Object => writer.emit_u8(tag::OBJECT),
            Self::Type => writer.emit_u8(tag::TYPE),
            Self::Named(r) => {
                writer.emit_u8(tag::NAMED);
                r.encode(writer);
            }
            Self::Generic { base, args } => {
                writer.emit_u8(tag::GENERIC);
                base.encode(writer);
                writer.emit_u32(args.len() as u32);
                for arg in args {
                    arg.encode(writer);
                }
            }
            Self::TypeParam(index) => {
                writer.emit_u8(tag::TYPE_PARAM);
                writer.emit_u16(*index);
            }
            Self::MethodParam(index) => {
                writer.emit_u8(tag::METHOD_PARAM);
                writer.emit_u16(*index);
            }
            Self::ByRef(inner) => {
                writer.emit_u8(tag::BY_REF);
                inner.encode(writer);
            }
            Self::Array(inner) => {
                writer.emit_u8(tag::ARRAY);
                inner.encode(writer);
            }
        }
    }

    /// Decode a signature
    ///
    /// Nesting (by-ref, array, generic arguments) is limited to
    /// [`MAX_SIG_DEPTH`] levels.
    pub fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        Self::decode_at(reader, 0)
    }

    fn decode_at(reader: &mut BytecodeReader<'_>, depth: usize) -> Result<Self, DecodeError> {
        let offset = reader.position();
        if depth > MAX_SIG_DEPTH {
            return Err(DecodeError::NestingTooDeep(offset));
        }
        let sig = match reader.read_u8()? {
            tag::VOID => Self::Void,
            tag::BOOL => Self::Bool,
            tag::CHAR => Self::Char,
            tag::I8 => Self::I8,
            tag::U8 => Self::U8,
            tag::I16 => Self::I16,
            tag::U16 => Self::U16,
            tag::I32 => Self::I32,
            tag::U32 => Self::U32,
            tag::I64 => Self::I64,
            tag::U64 => Self::U64,
            tag::F32 => Self::F32,
            tag::F64 => Self::F64,
            tag::STR => Self::Str,
            tag::OBJECT => Self::Object,
            tag::TYPE => Self::Type,
            tag::NAMED => Self::Named(TypeRef::decode(reader)?),
            tag::GENERIC => {
                let base = TypeRef::decode(reader)?;
                let count = reader.read_count()?;
                let mut args = Vec::with_capacity(count);
                for _ in 0..count {
                    args.push(Self::decode_at(reader, depth + 1)?);
                }
                Self::Generic { base, args }
            }
            tag::TYPE_PARAM => Self::TypeParam(reader.read_u16()?),
            tag::METHOD_PARAM => Self::MethodParam(reader.read_u16()?),
            tag::BY_REF => Self::ByRef(Box::new(Self::decode_at(reader, depth + 1)?)),
            tag::ARRAY => Self::Array(Box::new(Self::decode_at(reader, depth + 1)?)),
            other => {
                return Err(DecodeError::InvalidTag {
                    kind: "type signature",
                    tag: other,
                    offset,
                })
            }
        };
        Ok(sig)
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => f.write_str("void"),
            Self::Bool => f.write_str("bool"),
            Self::Char => f.write_str("char"),
            Self::I8 => f.write_str("i8"),
            Self::U8 => f.write_str("u8"),
            Self::I16 => f.write_str("i16"),
            Self::U16 => f.write_str("u16"),
            Self::I32 => f.write_str("i32"),
            Self::U32 => f.write_str("u32"),
            Self::I64 => f.write_str("i64"),
            Self::U64 => f.write_str("u64"),
            Self::F32 => f.write_str("f32"),
            Self::F64 => f.write_str("f64"),
            Self::Str => f.write_str("string"),
            Self::Object => f.write_str("object"),
            Self::Type => f.write_str("type"),
            Self::Named(r) => write!(f, "{}", r),
            Self::Generic { base, args } => {
                write!(f, "{}<", base)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(">")
            }
            Self::TypeParam(index) => write!(f, "!{}", index),
            Self::MethodParam(index) => write!(f, "!!{}", index),
            Self::ByRef(inner) => write!(f, "{}&", inner),
            Self::Array(inner) => write!(f, "{}[]", inner),
        }
    }
}

/// Reference to a field on some (possibly instantiated) type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// Declaring type
    pub owner: TypeSig,
    /// Field name
    pub name: String,
    /// Field type
    pub ty: TypeSig,
}

impl FieldRef {
    pub(crate) fn encode(&self, writer: &mut BytecodeWriter) {
        self.owner.encode(writer);
        writer.emit_string(&self.name);
        self.ty.encode(writer);
    }

    pub(crate) fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let owner = TypeSig::decode(reader)?;
        let name = reader.read_string()?;
        let ty = TypeSig::decode(reader)?;
        Ok(Self { owner, name, ty })
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}::{}", self.ty, self.owner, self.name)
    }
}

/// Reference to a method, used as a call target or override slot
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Declaring type
    pub owner: TypeSig,
    /// Method name
    pub name: String,
    /// Parameter types (excluding `this`)
    pub params: Vec<TypeSig>,
    /// Return type
    pub return_type: TypeSig,
    /// Method generic arguments for a generic method instantiation
    pub generic_args: Vec<TypeSig>,
}

impl MethodRef {
    /// Create a non-generic method reference
    pub fn new(
        owner: TypeSig,
        name: impl Into<String>,
        params: Vec<TypeSig>,
        return_type: TypeSig,
    ) -> Self {
        Self {
            owner,
            name: name.into(),
            params,
            return_type,
            generic_args: Vec::new(),
        }
    }

    /// Instantiate a generic method reference
    pub fn with_generic_args(mut self, args: Vec<TypeSig>) -> Self {
        self.generic_args = args;
        self
    }

    pub(crate) fn encode(&self, writer: &mut BytecodeWriter) {
        self.owner.encode(writer);
        writer.emit_string(&self.name);
        writer.emit_u32(self.params.len() as u32);
        for param in &self.params {
            param.encode(writer);
        }
        self.return_type.encode(writer);
        writer.emit_u32(self.generic_args.len() as u32);
        for arg in &self.generic_args {
            arg.encode(writer);
        }
    }

    pub(crate) fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let owner = TypeSig::decode(reader)?;
        let name = reader.read_string()?;
        let param_count = reader.read_count()?;
        let mut params = Vec::with_capacity(param_count);
        for _ in 0..param_count {
            params.push(TypeSig::decode(reader)?);
        }
        let return_type = TypeSig::decode(reader)?;
        let arg_count = reader.read_count()?;
        let mut generic_args = Vec::with_capacity(arg_count);
        for _ in 0..arg_count {
            generic_args.push(TypeSig::decode(reader)?);
        }
        Ok(Self {
            owner,
            name,
            params,
            return_type,
            generic_args,
        })
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}::{}", self.return_type, self.owner, self.name)?;
        if !self.generic_args.is_empty() {
            f.write_str("<")?;
            for (i, arg) in self.generic_args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", arg)?;
            }
            f.write_str(">")?;
        }
        f.write_str("(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", param)?;
        }
        f.write_str(")")
    }
}

/// Constant value carried by a marker argument
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Literal {
    Bool(bool),
    /// UTF-16 code unit
    Char(u16),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
}

impl Literal {
    /// The exact type of this literal
    pub fn type_sig(&self) -> TypeSig {
        match self {
            Self::Bool(_) => TypeSig::Bool,
            Self::Char(_) => TypeSig::Char,
            Self::I8(_) => TypeSig::I8,
            Self::U8(_) => TypeSig::U8,
            Self::I16(_) => TypeSig::I16,
            Self::U16(_) => TypeSig::U16,
            Self::I32(_) => TypeSig::I32,
            Self::U32(_) => TypeSig::U32,
            Self::I64(_) => TypeSig::I64,
            Self::U64(_) => TypeSig::U64,
            Self::F32(_) => TypeSig::F32,
            Self::F64(_) => TypeSig::F64,
            Self::Str(_) => TypeSig::Str,
        }
    }

    /// The string payload, if this is a string literal
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn encode(&self, writer: &mut BytecodeWriter) {
        match self {
            Self::Bool(v) => {
                writer.emit_u8(tag::BOOL);
                writer.emit_bool(*v);
            }
            Self::Char(v) => {
                writer.emit_u8(tag::CHAR);
                writer.emit_u16(*v);
            }
            Self::I8(v) => {
                writer.emit_u8(tag::I8);
                writer.emit_u8(*v as u8);
            }
            Self::U8(v) => {
                writer.emit_u8(tag::U8);
                writer.emit_u8(*v);
            }
            Self::I16(v) => {
                writer.emit_u8(tag::I16);
                writer.emit_u16(*v as u16);
            }
            Self::U16(v) => {
                writer.emit_u8(tag::U16);
                writer.emit_u16(*v);
            }
            Self::I32(v) => {
                writer.emit_u8(tag::I32);
                writer.emit_i32(*v);
            }
            Self::U32(v) => {
                writer.emit_u8(tag::U32);
                writer.emit_u32(*v);
            }
            Self::I64(v) => {
                writer.emit_u8(tag::I64);
                writer.emit_i64(*v);
            }
            Self::U64(v) => {
                writer.emit_u8(tag::U64);
                writer.emit_i64(*v as i64);
            }
            Self::F32(v) => {
                writer.emit_u8(tag::F32);
                writer.emit_f32(*v);
            }
            Self::F64(v) => {
                writer.emit_u8(tag::F64);
                writer.emit_f64(*v);
            }
            Self::Str(v) => {
                writer.emit_u8(tag::STR);
                writer.emit_string(v);
            }
        }
    }

    pub(crate) fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let offset = reader.position();
        let literal = match reader.read_u8()? {
            tag::BOOL => Self::Bool(reader.read_bool()?),
            tag::CHAR => Self::Char(reader.read_u16()?),
            tag::I8 => Self::I8(reader.read_u8()? as i8),
            tag::U8 => Self::U8(reader.read_u8()?),
            tag::I16 => Self::I16(reader.read_u16()? as i16),
            tag::U16 => Self::U16(reader.read_u16()?),
            tag::I32 => Self::I32(reader.read_i32()?),
            tag::U32 => Self::U32(reader.read_u32()?),
            tag::I64 => Self::I64(reader.read_i64()?),
            tag::U64 => Self::U64(reader.read_i64()? as u64),
            tag::F32 => Self::F32(reader.read_f32()?),
            tag::F64 => Self::F64(reader.read_f64()?),
            tag::STR => Self::Str(reader.read_string()?),
            other => {
                return Err(DecodeError::InvalidTag {
                    kind: "literal",
                    tag: other,
                    offset,
                })
            }
        };
        Ok(literal)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Char(v) => match char::from_u32(u32::from(*v)) {
                Some(c) => write!(f, "'{}'", c),
                None => write!(f, "'\\u{{{:04x}}}'", v),
            },
            Self::I8(v) => write!(f, "{}i8", v),
            Self::U8(v) => write!(f, "{}u8", v),
            Self::I16(v) => write!(f, "{}i16", v),
            Self::U16(v) => write!(f, "{}u16", v),
            Self::I32(v) => write!(f, "{}", v),
            Self::U32(v) => write!(f, "{}u32", v),
            Self::I64(v) => write!(f, "{}i64", v),
            Self::U64(v) => write!(f, "{}u64", v),
            Self::F32(v) => write!(f, "{}f32", v),
            Self::F64(v) => write!(f, "{}f64", v),
            Self::Str(v) => write!(f, "{:?}", v),
        }
    }
}
