//! Free-form module extensions
//!
//! An extension is a host closure that receives a target module mutably and
//! any number of import modules read-only, and reports whether it changed
//! the target. Extensions are registered directly, or declared by a marker
//! on a static method and bound to a handler registered under that method's
//! `Type:Method` name.

use crate::bytecode::{MethodDef, Module, TypeSig};
use crate::index::{ModuleId, ModuleIndex};
use rustc_hash::FxHashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Error returned by an extension body
pub type ExtensionError = Box<dyn std::error::Error + Send + Sync>;

/// Extension body: `(target, imports) -> changed`
pub type ExtensionFn =
    Arc<dyn Fn(&mut Module, &[&Module]) -> Result<bool, ExtensionError> + Send + Sync>;

/// Name of the required target parameter
pub const MODULE_PARAM: &str = "module";

/// Name of the optional imports parameter
pub const IMPORTS_PARAM: &str = "import_modules";

/// Type name of the module handle extension parameters are declared with
///
/// Matched by name in any scope: `module` must be a `Graft.Module`,
/// `import_modules` a `Graft.Module[]`.
pub const MODULE_TYPE: &str = "Graft.Module";

/// Signature of the module handle type in the host scope
pub fn module_type() -> TypeSig {
    TypeSig::named("Graft", MODULE_TYPE)
}

fn param_kind(ty: &TypeSig) -> Option<ParamKind> {
    match ty {
        TypeSig::Named(r) if r.name == MODULE_TYPE => Some(ParamKind::Module),
        TypeSig::Array(inner) => match inner.as_ref() {
            TypeSig::Named(r) if r.name == MODULE_TYPE => Some(ParamKind::ImportModules),
            _ => None,
        },
        _ => None,
    }
}

/// Shape of an extension parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// A single module
    Module,
    /// A list of modules
    ImportModules,
}

/// Declared extension parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionParam {
    /// Parameter name
    pub name: String,
    /// Parameter shape
    pub kind: ParamKind,
}

impl ExtensionParam {
    /// The required target parameter
    pub fn module() -> Self {
        Self {
            name: MODULE_PARAM.to_string(),
            kind: ParamKind::Module,
        }
    }

    /// The optional imports parameter
    pub fn import_modules() -> Self {
        Self {
            name: IMPORTS_PARAM.to_string(),
            kind: ParamKind::ImportModules,
        }
    }
}

/// Why an extension's declaration is unusable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtensionShapeError {
    /// Declaring method is an instance method
    #[error("extension method is not static")]
    NotStatic,

    /// Declaring method does not return a boolean
    #[error("extension method returns {0}, expected bool")]
    ReturnType(String),

    /// Too few or too many parameters
    #[error("extension takes {0} parameters, expected one or two")]
    ParameterCount(usize),

    /// A parameter does not have the expected name and shape
    #[error("unexpected extension parameter '{0}'")]
    Parameter(String),

    /// Marker lacks id, target or imports
    #[error("extension marker is missing argument {0}")]
    MissingArgument(usize),
}

/// A runnable extension
#[derive(Clone)]
pub struct Extension {
    /// Identifier used in diagnostics
    pub id: String,
    /// Module name receiving the changes
    pub target_module: String,
    /// Module names passed read-only
    pub import_modules: Vec<String>,
    /// Declared parameters
    pub params: Vec<ExtensionParam>,
    /// Body
    pub run: ExtensionFn,
}

impl fmt::Debug for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extension")
            .field("id", &self.id)
            .field("target_module", &self.target_module)
            .field("import_modules", &self.import_modules)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl Extension {
    /// Extension taking only the target module
    pub fn new<F>(id: impl Into<String>, target_module: impl Into<String>, run: F) -> Self
    where
        F: Fn(&mut Module, &[&Module]) -> Result<bool, ExtensionError> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            target_module: target_module.into(),
            import_modules: Vec::new(),
            params: vec![ExtensionParam::module()],
            run: Arc::new(run),
        }
    }

    /// Also pass the named modules read-only
    pub fn with_imports(mut self, imports: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.import_modules = imports.into_iter().map(Into::into).collect();
        if !self.params.iter().any(|p| p.kind == ParamKind::ImportModules) {
            self.params.push(ExtensionParam::import_modules());
        }
        self
    }
}

/// Check the parameter contract: `module` first, optionally `import_modules`
pub fn validate_params(params: &[ExtensionParam]) -> Result<(), ExtensionShapeError> {
    if params.is_empty() || params.len() > 2 {
        return Err(ExtensionShapeError::ParameterCount(params.len()));
    }
    if params[0] != ExtensionParam::module() {
        return Err(ExtensionShapeError::Parameter(params[0].name.clone()));
    }
    match params.get(1) {
        Some(p) if *p != ExtensionParam::import_modules() => {
            Err(ExtensionShapeError::Parameter(p.name.clone()))
        }
        _ => Ok(()),
    }
}

/// Registered extensions and marker handlers
#[derive(Default, Clone)]
pub struct ExtensionRegistry {
    extensions: Vec<Extension>,
    handlers: FxHashMap<String, (Vec<ExtensionParam>, ExtensionFn)>,
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut handlers: Vec<_> = self.handlers.keys().collect();
        handlers.sort();
        f.debug_struct("ExtensionRegistry")
            .field("extensions", &self.extensions)
            .field("handlers", &handlers)
            .finish()
    }
}

impl ExtensionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extension
    pub fn register(&mut self, extension: Extension) {
        debug!(id = %extension.id, target = %extension.target_module, "registered extension");
        self.extensions.push(extension);
    }

    /// Bind a body to a marker-declared extension method (`Type:Method`)
    pub fn register_handler<F>(&mut self, method: impl Into<String>, params: Vec<ExtensionParam>, run: F)
    where
        F: Fn(&mut Module, &[&Module]) -> Result<bool, ExtensionError> + Send + Sync + 'static,
    {
        self.handlers.insert(method.into(), (params, Arc::new(run)));
    }

    /// Number of directly registered extensions
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    /// Check if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty() && self.handlers.is_empty()
    }

    /// Extensions declared by `marker` in the index and bound to a handler
    ///
    /// Declarations with a bad shape or without a handler are logged and left
    /// out.
    pub fn discover(&self, index: &ModuleIndex, marker: &str) -> Vec<Extension> {
        let mut found = Vec::new();
        for (_, module) in index.modules() {
            for ty in &module.types {
                for method in ty.methods.iter().filter(|m| m.has_marker(marker)) {
                    let name = format!("{}:{}", ty.name, method.name);
                    match self.declared(&name, method, marker) {
                        Ok(Some(extension)) => found.push(extension),
                        Ok(None) => {
                            warn!(method = %name, "no handler bound to extension declaration");
                        }
                        Err(reason) => {
                            error!(owner = %ty.name, member = %method.name, reason = %reason, "invalid extension declaration");
                        }
                    }
                }
            }
        }
        found
    }

    fn declared(
        &self,
        name: &str,
        method: &MethodDef,
        marker: &str,
    ) -> Result<Option<Extension>, ExtensionShapeError> {
        if !method.is_static() {
            return Err(ExtensionShapeError::NotStatic);
        }
        if method.return_type != TypeSig::Bool {
            return Err(ExtensionShapeError::ReturnType(method.return_type.to_string()));
        }
        let params = method
            .params
            .iter()
            .map(|p| match param_kind(&p.ty) {
                Some(kind) => Ok(ExtensionParam {
                    name: p.name.clone(),
                    kind,
                }),
                None => Err(ExtensionShapeError::Parameter(p.name.clone())),
            })
            .collect::<Result<Vec<_>, _>>()?;
        validate_params(&params)?;

        let Some(decl) = method.marker(marker) else {
            return Ok(None);
        };
        let id = decl.string(0).ok_or(ExtensionShapeError::MissingArgument(0))?;
        let target = decl.string(1).ok_or(ExtensionShapeError::MissingArgument(1))?;
        let imports = decl.string_list(2).unwrap_or_default();

        let Some((expected, run)) = self.handlers.get(name) else {
            return Ok(None);
        };
        if let Some(p) = params.iter().zip(expected).find(|(a, b)| a != b) {
            return Err(ExtensionShapeError::Parameter(p.0.name.clone()));
        }
        if params.len() != expected.len() {
            return Err(ExtensionShapeError::ParameterCount(params.len()));
        }
        Ok(Some(Extension {
            id: id.to_string(),
            target_module: target.to_string(),
            import_modules: imports.to_vec(),
            params,
            run: Arc::clone(run),
        }))
    }

    /// Run every registered and discovered extension
    ///
    /// Returns the modules an extension reported as changed. Failures and
    /// panics inside an extension are logged and do not stop the others.
    pub fn run_all(&self, index: &mut ModuleIndex, marker: &str) -> Vec<ModuleId> {
        let mut extensions = self.extensions.clone();
        extensions.extend(self.discover(index, marker));

        let mut changed = Vec::new();
        for extension in &extensions {
            if let Some(target) = run_one(index, extension) {
                changed.push(target);
            }
        }
        changed
    }
}

fn run_one(index: &mut ModuleIndex, extension: &Extension) -> Option<ModuleId> {
    if let Err(reason) = validate_params(&extension.params) {
        error!(id = %extension.id, reason = %reason, "invalid extension");
        return None;
    }
    let Some(target) = index.module_by_name(&extension.target_module) else {
        warn!(id = %extension.id, module = %extension.target_module, "extension target module not indexed, skipping");
        return None;
    };
    let mut imports = Vec::with_capacity(extension.import_modules.len());
    for name in &extension.import_modules {
        match index.module_by_name(name) {
            Some(id) => imports.push(id),
            None => {
                error!(id = %extension.id, module = %name, "extension import module not indexed");
                return None;
            }
        }
    }

    let (module, others) = index.split_module_mut(target, &imports);
    match catch_unwind(AssertUnwindSafe(|| (extension.run)(module, &others))) {
        Ok(Ok(true)) => {
            debug!(id = %extension.id, module = %extension.target_module, "extension applied");
            Some(target)
        }
        Ok(Ok(false)) => {
            debug!(id = %extension.id, "extension made no changes");
            None
        }
        Ok(Err(e)) => {
            error!(id = %extension.id, error = %e, "extension failed");
            None
        }
        Err(_) => {
            error!(id = %extension.id, "extension panicked");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{
        Literal, Marker, MarkerArg, MethodBuilder, ModuleBuilder, TypeBuilder,
    };

    fn index() -> ModuleIndex {
        let mut game = ModuleBuilder::new("Game");
        game.add_type(TypeBuilder::class("Game.Pawn"));
        let mut mods = ModuleBuilder::new("Mods");
        let module_ty = module_type();
        mods.add_type(
            TypeBuilder::class("Mods.Patches").method(
                MethodBuilder::static_method("AddHealth")
                    .param(MODULE_PARAM, module_ty.clone())
                    .param(IMPORTS_PARAM, module_ty.array_of())
                    .returns(TypeSig::Bool)
                    .marker(
                        Marker::new("FreePatch")
                            .with_arg(MarkerArg::Literal(Literal::Str("health".into())))
                            .with_arg(MarkerArg::Literal(Literal::Str("Game".into())))
                            .with_arg(MarkerArg::StringList(vec!["Mods".into()])),
                    ),
            ),
        );
        ModuleIndex::load(vec![game.build().encode(), mods.build().encode()]).unwrap()
    }

    fn rename(module: &mut Module, _imports: &[&Module]) -> Result<bool, ExtensionError> {
        module.types[0].name = "Game.Hero".to_string();
        Ok(true)
    }

    #[test]
    fn test_param_contract() {
        assert!(validate_params(&[ExtensionParam::module()]).is_ok());
        assert!(validate_params(&[ExtensionParam::module(), ExtensionParam::import_modules()]).is_ok());
        assert_eq!(validate_params(&[]), Err(ExtensionShapeError::ParameterCount(0)));
        assert_eq!(
            validate_params(&[ExtensionParam::import_modules()]),
            Err(ExtensionShapeError::Parameter(IMPORTS_PARAM.to_string()))
        );
    }

    #[test]
    fn test_registered_extension_runs() {
        let mut index = index();
        let mut registry = ExtensionRegistry::new();
        registry.register(Extension::new("rename", "Game", rename));
        let changed = registry.run_all(&mut index, "FreePatch");
        assert_eq!(changed, vec![ModuleId(0)]);
        assert!(index.find_type("Game.Hero").is_some());
    }

    #[test]
    fn test_failures_are_contained() {
        let mut index = index();
        let mut registry = ExtensionRegistry::new();
        registry.register(Extension::new("fails", "Game", |_, _| Err("boom".into())));
        registry.register(Extension::new("panics", "Game", |_, _| panic!("boom")));
        registry.register(Extension::new("missing", "Nowhere", rename));
        registry.register(Extension::new("bad-import", "Game", rename).with_imports(["Nowhere"]));
        registry.register(Extension::new("ok", "Game", rename));
        assert_eq!(registry.run_all(&mut index, "FreePatch"), vec![ModuleId(0)]);
    }

    #[test]
    fn test_marker_declared_extension() {
        let mut index = index();
        let mut registry = ExtensionRegistry::new();
        registry.register_handler(
            "Mods.Patches:AddHealth",
            vec![ExtensionParam::module(), ExtensionParam::import_modules()],
            |module, imports| {
                assert_eq!(imports.len(), 1);
                assert_eq!(imports[0].name(), "Mods");
                module.types[0].name = "Game.Hero".to_string();
                Ok(true)
            },
        );

        let found = registry.discover(&index, "FreePatch");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "health");
        assert_eq!(found[0].import_modules, vec!["Mods".to_string()]);

        assert_eq!(registry.run_all(&mut index, "FreePatch"), vec![ModuleId(0)]);
        assert!(index.find_type("Game.Hero").is_some());
    }

    fn declare(module_ty: TypeSig, imports_ty: TypeSig) -> ModuleIndex {
        let mut game = ModuleBuilder::new("Game");
        game.add_type(TypeBuilder::class("Game.Pawn"));
        game.add_type(
            TypeBuilder::class("Game.Patches").method(
                MethodBuilder::static_method("Go")
                    .param(MODULE_PARAM, module_ty)
                    .param(IMPORTS_PARAM, imports_ty)
                    .returns(TypeSig::Bool)
                    .marker(
                        Marker::new("FreePatch")
                            .with_arg(MarkerArg::Literal(Literal::Str("go".into())))
                            .with_arg(MarkerArg::Literal(Literal::Str("Game".into()))),
                    ),
            ),
        );
        ModuleIndex::load(vec![game.build().encode()]).unwrap()
    }

    #[test]
    fn test_declared_parameter_types_checked() {
        let mut registry = ExtensionRegistry::new();
        registry.register_handler(
            "Game.Patches:Go",
            vec![ExtensionParam::module(), ExtensionParam::import_modules()],
            rename,
        );

        let other_scope = TypeSig::named("Host", MODULE_TYPE);
        let index = declare(other_scope.clone(), other_scope.array_of());
        assert_eq!(registry.discover(&index, "FreePatch").len(), 1);

        let cases = [
            (TypeSig::I32, TypeSig::Bool.array_of(), MODULE_PARAM),
            (module_type(), TypeSig::Bool.array_of(), IMPORTS_PARAM),
            (module_type(), module_type(), IMPORTS_PARAM),
            (module_type().array_of(), module_type().array_of(), MODULE_PARAM),
            (TypeSig::named("Game", "Game.Pawn"), module_type().array_of(), MODULE_PARAM),
        ];
        for (module_ty, imports_ty, bad) in cases {
            let index = declare(module_ty, imports_ty);
            let method = index.method(index.find_method("Game.Patches:Go").unwrap());
            assert_eq!(
                registry.declared("Game.Patches:Go", method, "FreePatch").unwrap_err(),
                ExtensionShapeError::Parameter(bad.to_string())
            );
            assert!(registry.discover(&index, "FreePatch").is_empty());
        }
    }
}
