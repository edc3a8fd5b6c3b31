//! Module index
//!
//! Holds every module taking part in a patch run and answers name lookups
//! across all of them. Handles ([`TypeHandle`], [`MethodHandle`],
//! [`FieldHandle`]) are the canonical identity of a definition: two
//! signatures naming the same type from different modules resolve to the
//! same handle.
//!
//! Qualified member names use a single `:` separator, `"Type:Member"`.

mod graph;

use crate::bytecode::{FieldDef, MethodDef, MethodRef, Module, ModuleError, TypeDef, TypeRef, TypeSig};
use rustc_hash::{FxHashMap, FxHashSet};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

/// Separator between a type name and a member name
pub const MEMBER_SEPARATOR: char = ':';

/// Index of a module in load order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub usize);

/// Canonical identity of a type definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeHandle {
    /// Declaring module
    pub module: ModuleId,
    /// Position in the module's type table
    pub index: usize,
}

/// Canonical identity of a method definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodHandle {
    /// Declaring type
    pub ty: TypeHandle,
    /// Position in the type's method table
    pub index: usize,
}

/// Canonical identity of a field definition
///
/// Fields are only ever appended, so a handle stays valid for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldHandle {
    /// Declaring type
    pub ty: TypeHandle,
    /// Position in the type's field table
    pub index: usize,
}

/// Where a module's bytes come from
#[derive(Debug, Clone)]
pub enum ModuleSource {
    /// Bytes already in memory
    Bytes(Vec<u8>),
    /// File on disk
    Path(PathBuf),
}

impl ModuleSource {
    fn label(&self) -> String {
        match self {
            Self::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
            Self::Path(path) => path.display().to_string(),
        }
    }
}

impl From<Vec<u8>> for ModuleSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<PathBuf> for ModuleSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

/// Module loading errors
#[derive(Debug, Error)]
pub enum IndexError {
    /// Module file could not be read
    #[error("Failed to read module {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Module bytes are malformed
    #[error("Failed to decode module {source_label}: {error}")]
    Decode {
        /// Path or size of the offending input
        source_label: String,
        /// Underlying error
        #[source]
        error: ModuleError,
    },

    /// Two different binaries declare the same module name
    #[error("Duplicate module name '{0}' with different content")]
    DuplicateModule(String),
}

/// Index over a set of loaded modules
#[derive(Debug, Default)]
pub struct ModuleIndex {
    modules: Vec<Module>,
    by_name: FxHashMap<String, ModuleId>,
    hashes: FxHashSet<[u8; 32]>,
    generation: u64,
}

/// SHA-256 of raw module bytes
pub fn content_hash(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Split `"Type:Member"` into its two parts
pub fn split_qualified(name: &str) -> Option<(&str, &str)> {
    name.split_once(MEMBER_SEPARATOR)
        .filter(|(ty, member)| !ty.is_empty() && !member.is_empty())
}

impl ModuleIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from a set of sources
    pub fn load<I, S>(sources: I) -> Result<Self, IndexError>
    where
        I: IntoIterator<Item = S>,
        S: Into<ModuleSource>,
    {
        let mut index = Self::new();
        for source in sources {
            index.add(source.into())?;
        }
        Ok(index)
    }

    /// Load one module
    ///
    /// Returns `None` when a byte-identical binary is already indexed.
    pub fn add(&mut self, source: ModuleSource) -> Result<Option<ModuleId>, IndexError> {
        let label = source.label();
        let bytes = match source {
            ModuleSource::Bytes(bytes) => bytes,
            ModuleSource::Path(path) => {
                std::fs::read(&path).map_err(|source| IndexError::Io { path, source })?
            }
        };

        let hash = content_hash(&bytes);
        if self.hashes.contains(&hash) {
            debug!(source = %label, hash = %hex::encode(hash), "skipping duplicate module binary");
            return Ok(None);
        }

        let module = Module::decode(&bytes).map_err(|error| IndexError::Decode {
            source_label: label,
            error,
        })?;
        self.insert(module, hash).map(Some)
    }

    fn insert(&mut self, module: Module, hash: [u8; 32]) -> Result<ModuleId, IndexError> {
        let name = module.name().to_string();
        if self.by_name.contains_key(&name) {
            warn!(module = %name, "module name already indexed with different content");
            return Err(IndexError::DuplicateModule(name));
        }
        let id = ModuleId(self.modules.len());
        debug!(module = %name, hash = %hex::encode(hash), types = module.types.len(), "indexed module");
        self.modules.push(module);
        self.by_name.insert(name, id);
        self.hashes.insert(hash);
        self.generation += 1;
        Ok(id)
    }

    /// Drop every module and invalidate anything derived from the index
    pub fn reset(&mut self) {
        self.modules.clear();
        self.by_name.clear();
        self.hashes.clear();
        self.generation += 1;
    }

    /// Counter bumped by every load and reset
    ///
    /// Caches keyed on the index compare generations to detect staleness.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of indexed modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Check if no modules are indexed
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Every module in load order
    pub fn modules(&self) -> impl Iterator<Item = (ModuleId, &Module)> + '_ {
        self.modules.iter().enumerate().map(|(i, m)| (ModuleId(i), m))
    }

    /// Look up a module by name
    pub fn module_by_name(&self, name: &str) -> Option<ModuleId> {
        self.by_name.get(name).copied()
    }

    /// Borrow a module
    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.0]
    }

    /// Mutably borrow a module
    pub fn module_mut(&mut self, id: ModuleId) -> &mut Module {
        &mut self.modules[id.0]
    }

    /// Mutably borrow one module and immutably borrow others at once
    ///
    /// `others` equal to `target` are skipped.
    pub fn split_module_mut(
        &mut self,
        target: ModuleId,
        others: &[ModuleId],
    ) -> (&mut Module, Vec<&Module>) {
        let (before, rest) = self.modules.split_at_mut(target.0);
        let (current, after) = rest.split_at_mut(1);
        let mut borrowed = Vec::with_capacity(others.len());
        for other in others {
            if other.0 < target.0 {
                borrowed.push(&before[other.0]);
            } else if other.0 > target.0 {
                borrowed.push(&after[other.0 - target.0 - 1]);
            }
        }
        (&mut current[0], borrowed)
    }

    /// Re-serialize a module
    pub fn encode_module(&self, id: ModuleId) -> Vec<u8> {
        self.modules[id.0].encode()
    }

    // ===== Definitions by handle =====

    /// Borrow a type definition
    pub fn type_def(&self, handle: TypeHandle) -> &TypeDef {
        &self.modules[handle.module.0].types[handle.index]
    }

    /// Mutably borrow a type definition
    pub fn type_def_mut(&mut self, handle: TypeHandle) -> &mut TypeDef {
        &mut self.modules[handle.module.0].types[handle.index]
    }

    /// Borrow a method definition
    pub fn method(&self, handle: MethodHandle) -> &MethodDef {
        &self.type_def(handle.ty).methods[handle.index]
    }

    /// Mutably borrow a method definition
    pub fn method_mut(&mut self, handle: MethodHandle) -> &mut MethodDef {
        &mut self.type_def_mut(handle.ty).methods[handle.index]
    }

    /// Borrow a field definition
    pub fn field(&self, handle: FieldHandle) -> &FieldDef {
        &self.type_def(handle.ty).fields[handle.index]
    }

    /// Signature of a type as seen from its own members
    pub fn type_sig(&self, handle: TypeHandle) -> TypeSig {
        self.type_def(handle)
            .self_sig(self.modules[handle.module.0].name())
    }

    /// Reference to a method as declared
    pub fn method_ref(&self, handle: MethodHandle) -> MethodRef {
        self.method(handle).reference(self.type_sig(handle.ty))
    }

    /// `"Type:Method"` display name
    pub fn method_name(&self, handle: MethodHandle) -> String {
        format!(
            "{}{}{}",
            self.type_def(handle.ty).name,
            MEMBER_SEPARATOR,
            self.method(handle).name
        )
    }

    // ===== Lookup by name =====

    /// Find a type by full name, first match in load order
    pub fn find_type(&self, name: &str) -> Option<TypeHandle> {
        self.modules.iter().enumerate().find_map(|(m, module)| {
            module.type_index(name).map(|index| TypeHandle {
                module: ModuleId(m),
                index,
            })
        })
    }

    /// Find a method by `"Type:Method"` name
    pub fn find_method(&self, qualified: &str) -> Option<MethodHandle> {
        let (ty, member) = split_qualified(qualified)?;
        self.types_named(ty).find_map(|handle| {
            self.type_def(handle)
                .method_index(member)
                .map(|index| MethodHandle { ty: handle, index })
        })
    }

    /// Find a field by `"Type:Field"` name
    pub fn find_field(&self, qualified: &str) -> Option<FieldHandle> {
        let (ty, member) = split_qualified(qualified)?;
        self.types_named(ty).find_map(|handle| {
            self.type_def(handle)
                .field_index(member)
                .map(|index| FieldHandle { ty: handle, index })
        })
    }

    fn types_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = TypeHandle> + 'a {
        self.modules.iter().enumerate().filter_map(move |(m, module)| {
            module.type_index(name).map(|index| TypeHandle {
                module: ModuleId(m),
                index,
            })
        })
    }

    /// Resolve a type reference to its definition
    ///
    /// The named scope is consulted first; a reference whose scope is not
    /// indexed (or does not declare the type) falls back to a scan of every
    /// module.
    pub fn resolve_type(&self, reference: &TypeRef) -> Option<TypeHandle> {
        if let Some(module) = self.module_by_name(&reference.scope) {
            if let Some(index) = self.modules[module.0].type_index(&reference.name) {
                return Some(TypeHandle { module, index });
            }
        }
        self.find_type(&reference.name)
    }

    /// Resolve the definition a signature names (generic arguments ignored)
    pub fn resolve_sig(&self, sig: &TypeSig) -> Option<TypeHandle> {
        sig.type_ref().and_then(|r| self.resolve_type(r))
    }
}
