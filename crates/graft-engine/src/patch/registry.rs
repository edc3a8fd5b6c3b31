//! Strategy and wiring registration
//!
//! Registration happens before a run. Wirings are stored by name and resolved
//! lazily against the index; the resolved list is cached per index generation
//! and dropped whenever a wiring is registered or the registry is reset.

use super::strategy::{
    DirectValueStrategy, FieldStrategy, InjectorStrategy, PostInitProvider, PostInitStrategy,
};
use crate::bytecode::{MethodDef, TypeSig};
use crate::index::{split_qualified, MethodHandle, ModuleIndex};
use parking_lot::Mutex;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Marker keys recognized by the patcher
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MarkerKeys {
    /// Accessor stub requesting a new field
    pub add_field: String,
    /// Literal initial value
    pub direct: String,
    /// Initial value from an injector method
    pub injector: String,
    /// Component populated by a wired initializer
    pub post_init: String,
    /// Free-form module extension
    pub free_patch: String,
}

impl Default for MarkerKeys {
    fn default() -> Self {
        Self {
            add_field: "AddField".to_string(),
            direct: "DefaultValueDirect".to_string(),
            injector: "DefaultValueInjector".to_string(),
            post_init: "PostInitField".to_string(),
            free_patch: "FreePatch".to_string(),
        }
    }
}

/// A wiring as registered, by name
#[derive(Debug, Clone)]
pub struct WiringRegistration {
    /// Main type name
    pub main: String,
    /// Target (component) type name
    pub target: String,
    /// Initializer, as `Type:Method` or a method name on the main type
    pub initializer: String,
    /// Code emitter
    pub provider: Arc<dyn PostInitProvider>,
}

/// A wiring resolved against the index
#[derive(Debug, Clone)]
pub struct ResolvedWiring {
    /// Main type
    pub main: TypeSig,
    /// Target (component) type
    pub target: TypeSig,
    /// Method receiving the injected code
    pub initializer: MethodHandle,
    /// Code emitter
    pub provider: Arc<dyn PostInitProvider>,
    /// Display label for diagnostics
    pub label: String,
}

type WiringCache = Option<(u64, Arc<Vec<ResolvedWiring>>)>;

/// Registered strategies and wirings
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: Vec<Arc<dyn FieldStrategy>>,
    wirings: Vec<WiringRegistration>,
    cache: Mutex<WiringCache>,
    initialized: bool,
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.strategies)
            .field("wirings", &self.wirings)
            .field("initialized", &self.initialized)
            .finish()
    }
}

impl StrategyRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the built-in strategies, once
    ///
    /// Later calls are no-ops until [`StrategyRegistry::reset`].
    pub fn initialize(&mut self, keys: &MarkerKeys) {
        if self.initialized {
            return;
        }
        self.strategies.push(Arc::new(DirectValueStrategy::new(&keys.direct)));
        self.strategies.push(Arc::new(InjectorStrategy::new(&keys.injector)));
        self.strategies.push(Arc::new(PostInitStrategy::new(&keys.post_init)));
        self.initialized = true;
    }

    /// Check if built-ins have been registered
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Drop every strategy, wiring and cached resolution
    pub fn reset(&mut self) {
        self.strategies.clear();
        self.wirings.clear();
        *self.cache.get_mut() = None;
        self.initialized = false;
    }

    /// Add a strategy after those already registered
    pub fn register_strategy(&mut self, strategy: Arc<dyn FieldStrategy>) {
        debug!(strategy = strategy.name(), marker = strategy.marker(), "registered strategy");
        self.strategies.push(strategy);
    }

    /// Add a wiring
    pub fn register_wiring(&mut self, wiring: WiringRegistration) {
        debug!(
            main = %wiring.main,
            target = %wiring.target,
            initializer = %wiring.initializer,
            "registered wiring"
        );
        self.wirings.push(wiring);
        *self.cache.get_mut() = None;
    }

    /// Registered strategies
    pub fn strategies(&self) -> &[Arc<dyn FieldStrategy>] {
        &self.strategies
    }

    /// Registered wirings
    pub fn wirings(&self) -> &[WiringRegistration] {
        &self.wirings
    }

    /// Strategies whose marker is present on `method`, in registration order
    pub fn strategies_for(&self, method: &MethodDef) -> Vec<Arc<dyn FieldStrategy>> {
        self.strategies
            .iter()
            .filter(|s| method.has_marker(s.marker()))
            .cloned()
            .collect()
    }

    /// Wirings resolved against `index`
    ///
    /// Entries naming something the index does not contain are skipped with
    /// a warning.
    pub fn resolved_wirings(&self, index: &ModuleIndex) -> Arc<Vec<ResolvedWiring>> {
        let mut cache = self.cache.lock();
        if let Some((generation, resolved)) = cache.as_ref() {
            if *generation == index.generation() {
                return Arc::clone(resolved);
            }
        }

        let resolved: Vec<ResolvedWiring> = self
            .wirings
            .iter()
            .filter_map(|w| match resolve(index, w) {
                Ok(resolved) => Some(resolved),
                Err(missing) => {
                    warn!(
                        main = %w.main,
                        target = %w.target,
                        initializer = %w.initializer,
                        missing = %missing,
                        "skipping unresolvable wiring"
                    );
                    None
                }
            })
            .collect();
        let resolved = Arc::new(resolved);
        *cache = Some((index.generation(), Arc::clone(&resolved)));
        resolved
    }
}

fn resolve(index: &ModuleIndex, wiring: &WiringRegistration) -> Result<ResolvedWiring, String> {
    let main_ty = index
        .find_type(&wiring.main)
        .ok_or_else(|| wiring.main.clone())?;
    let target_ty = index
        .find_type(&wiring.target)
        .ok_or_else(|| wiring.target.clone())?;

    let initializer = if split_qualified(&wiring.initializer).is_some() {
        index.find_method(&wiring.initializer)
    } else {
        index
            .type_def(main_ty)
            .method_index(&wiring.initializer)
            .map(|i| MethodHandle {
                ty: main_ty,
                index: i,
            })
    }
    .ok_or_else(|| wiring.initializer.clone())?;

    Ok(ResolvedWiring {
        main: index.type_sig(main_ty),
        target: index.type_sig(target_ty),
        initializer,
        provider: Arc::clone(&wiring.provider),
        label: format!(
            "({}, {}) -> {}",
            wiring.main,
            wiring.target,
            index.method_name(initializer)
        ),
    })
}
