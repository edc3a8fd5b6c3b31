//! Builders for constructing modules programmatically
//!
//! Row ids are handed out by [`ModuleBuilder::add_type`] in declaration order:
//! the type first, then its fields, then its methods.

use super::instruction::Instruction;
use super::module::{
    field_flags, method_flags, Body, FieldDef, Marker, MethodDef, Module, Param, TypeDef, TypeKind,
};
use super::types::{MethodRef, TypeRef, TypeSig};

/// Name used for instance constructors
pub const CONSTRUCTOR_NAME: &str = ".ctor";

/// Helper for building modules
#[derive(Debug)]
pub struct ModuleBuilder {
    name: String,
    source_file: Option<String>,
    types: Vec<TypeDef>,
    next_rid: u32,
}

impl ModuleBuilder {
    /// Start a new module
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_file: None,
            types: Vec::new(),
            next_rid: 1,
        }
    }

    /// Module name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record the source file in the module metadata
    pub fn source_file(mut self, path: impl Into<String>) -> Self {
        self.source_file = Some(path.into());
        self
    }

    /// Reference to a type declared in this module
    pub fn type_ref(&self, name: &str) -> TypeRef {
        TypeRef::new(self.name.clone(), name)
    }

    /// Signature of a non-generic type declared in this module
    pub fn sig(&self, name: &str) -> TypeSig {
        TypeSig::Named(self.type_ref(name))
    }

    /// Add a type, assigning row ids to it and its members
    pub fn add_type(&mut self, builder: TypeBuilder) -> &mut Self {
        let rid = self.take_rid();
        let fields = builder
            .fields
            .into_iter()
            .map(|(name, flags, ty)| FieldDef {
                rid: self.take_rid(),
                name,
                flags,
                ty,
            })
            .collect();
        let methods = builder
            .methods
            .into_iter()
            .map(|m| m.finish(self.take_rid()))
            .collect();
        self.types.push(TypeDef {
            rid,
            name: builder.name,
            kind: builder.kind,
            generic_params: builder.generic_params,
            base: builder.base,
            interfaces: builder.interfaces,
            fields,
            methods,
        });
        self
    }

    fn take_rid(&mut self) -> u32 {
        let rid = self.next_rid;
        self.next_rid += 1;
        rid
    }

    /// Build the final module
    pub fn build(self) -> Module {
        let mut module = Module::new(self.name);
        module.metadata.source_file = self.source_file;
        module.types = self.types;
        module
    }
}

/// Helper for building type definitions
#[derive(Debug)]
pub struct TypeBuilder {
    name: String,
    kind: TypeKind,
    generic_params: Vec<String>,
    base: Option<TypeSig>,
    interfaces: Vec<TypeSig>,
    fields: Vec<(String, u32, TypeSig)>,
    methods: Vec<MethodBuilder>,
}

impl TypeBuilder {
    /// Start a type of the given kind
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            generic_params: Vec::new(),
            base: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Start a class deriving from the root object type
    pub fn class(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Class).extends(TypeSig::Object)
    }

    /// Start a value type
    pub fn structure(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Struct)
    }

    /// Start an interface
    pub fn interface(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Interface)
    }

    /// Declare generic parameters
    pub fn generic_params(mut self, names: &[&str]) -> Self {
        self.generic_params = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Set the base type
    pub fn extends(mut self, base: TypeSig) -> Self {
        self.base = Some(base);
        self
    }

    /// Add an implemented interface
    pub fn implements(mut self, interface: TypeSig) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Add a public instance field
    pub fn field(mut self, name: impl Into<String>, ty: TypeSig) -> Self {
        self.fields.push((name.into(), field_flags::PUBLIC, ty));
        self
    }

    /// Add a method
    pub fn method(mut self, method: MethodBuilder) -> Self {
        self.methods.push(method);
        self
    }
}

/// Helper for building method definitions
#[derive(Debug)]
pub struct MethodBuilder {
    name: String,
    flags: u32,
    generic_params: Vec<String>,
    params: Vec<Param>,
    return_type: TypeSig,
    overrides: Vec<MethodRef>,
    markers: Vec<Marker>,
    locals: Vec<TypeSig>,
    code: Option<Vec<Instruction>>,
}

impl MethodBuilder {
    /// Start an instance method returning nothing
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: 0,
            generic_params: Vec::new(),
            params: Vec::new(),
            return_type: TypeSig::Void,
            overrides: Vec::new(),
            markers: Vec::new(),
            locals: Vec::new(),
            code: None,
        }
    }

    /// Start a static method
    pub fn static_method(name: impl Into<String>) -> Self {
        Self::new(name).flags(method_flags::STATIC)
    }

    /// Start an instance constructor
    pub fn constructor() -> Self {
        Self::new(CONSTRUCTOR_NAME).flags(method_flags::CONSTRUCTOR)
    }

    /// Add flags
    pub fn flags(mut self, flags: u32) -> Self {
        self.flags |= flags;
        self
    }

    /// Declare generic parameters
    pub fn generic_params(mut self, names: &[&str]) -> Self {
        self.generic_params = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Add a parameter
    pub fn param(mut self, name: impl Into<String>, ty: TypeSig) -> Self {
        self.params.push(Param {
            name: name.into(),
            ty,
        });
        self
    }

    /// Set the return type
    pub fn returns(mut self, ty: TypeSig) -> Self {
        self.return_type = ty;
        self
    }

    /// Record an explicitly overridden method
    pub fn overrides(mut self, method: MethodRef) -> Self {
        self.overrides.push(method);
        self
    }

    /// Attach a marker
    pub fn marker(mut self, marker: Marker) -> Self {
        self.markers.push(marker);
        self
    }

    /// Declare a local variable
    pub fn local(mut self, ty: TypeSig) -> Self {
        self.locals.push(ty);
        self
    }

    /// Set the body
    pub fn code(mut self, code: Vec<Instruction>) -> Self {
        self.code = Some(code);
        self
    }

    fn finish(self, rid: u32) -> MethodDef {
        let body = self.code.map(|instructions| Body {
            locals: self.locals,
            instructions,
        });
        MethodDef {
            rid,
            name: self.name,
            flags: self.flags,
            generic_params: self.generic_params,
            params: self.params,
            return_type: self.return_type,
            overrides: self.overrides,
            markers: self.markers,
            body,
        }
    }
}
