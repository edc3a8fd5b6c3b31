//! Patch orchestration
//!
//! [`Patcher::run`] drives one complete pass over the index: field synthesis
//! for every accessor stub, then the strategies attached to each synthesized
//! field, then free-form extensions. Modules are only serialized once the
//! whole pass succeeded; a fatal error leaves nothing to persist.

use super::candidate::{CandidateOutcome, CandidateReport};
use super::error::PatchError;
use super::extension::ExtensionRegistry;
use super::registry::{MarkerKeys, StrategyRegistry, WiringRegistration};
use super::strategy::StrategyEnv;
use super::synthesize;
use crate::artifact::{persist_artifact, write_artifact};
use crate::bytecode::{flags, verify_body};
use crate::index::{MethodHandle, ModuleId, ModuleIndex, TypeHandle};
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info};

/// Counters for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchStats {
    /// Fields added
    pub synthesized: usize,
    /// Stubs rejected
    pub rejected: usize,
    /// Strategy applications
    pub strategies_applied: usize,
    /// Strategies that failed validation
    pub strategies_rejected: usize,
    /// Extensions that changed their target
    pub extensions_applied: usize,
}

/// A re-serialized module
#[derive(Debug, Clone, PartialEq)]
pub struct PatchedModule {
    /// Position in the index
    pub id: ModuleId,
    /// Module name
    pub name: String,
    /// Encoded module
    pub bytes: Vec<u8>,
}

/// Result of a successful run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchOutput {
    /// Touched modules in ascending index order
    pub modules: Vec<PatchedModule>,
    /// One entry per accessor stub
    pub reports: Vec<CandidateReport>,
    /// Counters
    pub stats: PatchStats,
}

impl PatchOutput {
    /// Find a patched module by name
    pub fn module(&self, name: &str) -> Option<&PatchedModule> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Write the touched modules as an artifact stream
    pub fn write_artifact<W: Write>(&self, writer: &mut W) -> Result<(), PatchError> {
        let chunks: Vec<&[u8]> = self.modules.iter().map(|m| m.bytes.as_slice()).collect();
        write_artifact(writer, &chunks)?;
        Ok(())
    }

    /// Atomically write the artifact to `path`
    pub fn persist(&self, path: &Path) -> Result<(), PatchError> {
        let chunks: Vec<&[u8]> = self.modules.iter().map(|m| m.bytes.as_slice()).collect();
        persist_artifact(path, &chunks)?;
        info!(path = %path.display(), modules = chunks.len(), "wrote patch artifact");
        Ok(())
    }
}

/// One-shot patch driver over a module index
#[derive(Debug)]
pub struct Patcher {
    index: Mutex<ModuleIndex>,
    strategies: StrategyRegistry,
    extensions: ExtensionRegistry,
    markers: MarkerKeys,
    started: AtomicBool,
}

impl Patcher {
    /// Patcher with the default marker keys and built-in strategies
    pub fn new(index: ModuleIndex) -> Self {
        Self::with_markers(index, MarkerKeys::default())
    }

    /// Patcher recognizing custom marker keys
    pub fn with_markers(index: ModuleIndex, markers: MarkerKeys) -> Self {
        let mut strategies = StrategyRegistry::new();
        strategies.initialize(&markers);
        Self {
            index: Mutex::new(index),
            strategies,
            extensions: ExtensionRegistry::new(),
            markers,
            started: AtomicBool::new(false),
        }
    }

    /// Marker keys in use
    pub fn markers(&self) -> &MarkerKeys {
        &self.markers
    }

    /// Strategy registry, for registration before a run
    pub fn registry_mut(&mut self) -> &mut StrategyRegistry {
        &mut self.strategies
    }

    /// Extension registry, for registration before a run
    pub fn extensions_mut(&mut self) -> &mut ExtensionRegistry {
        &mut self.extensions
    }

    /// Register a post-init wiring
    pub fn register_wiring(&mut self, wiring: WiringRegistration) {
        self.strategies.register_wiring(wiring);
    }

    /// Lock the index
    pub fn index(&self) -> MutexGuard<'_, ModuleIndex> {
        self.index.lock()
    }

    /// Check if a run has started
    pub fn has_run(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Run the patch pass
    ///
    /// Only the first call runs; every later or concurrent call returns
    /// `Ok(None)` immediately.
    pub fn run(&self) -> Result<Option<PatchOutput>, PatchError> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("patch run already started");
            return Ok(None);
        }

        let mut index = self.index.lock();
        match self.run_locked(&mut index) {
            Ok(output) => Ok(Some(output)),
            Err(e) => {
                error!(error = %e, "patch run failed");
                Err(e)
            }
        }
    }

    fn run_locked(&self, index: &mut ModuleIndex) -> Result<PatchOutput, PatchError> {
        let wirings = self.strategies.resolved_wirings(index);
        let env = StrategyEnv {
            wirings: wirings.as_slice(),
        };
        let mut touched = BTreeSet::new();
        let mut reports = Vec::new();
        let mut stats = PatchStats::default();

        for stub in collect_stubs(index, &self.markers.add_field) {
            let owner = index.type_def(stub.ty).name.clone();
            let member = index.method(stub).name.clone();

            let plan = match synthesize::validate(index, stub) {
                Ok(plan) => plan,
                Err(reason) => {
                    error!(owner = %owner, member = %member, reason = %reason, "rejected field stub");
                    stats.rejected += 1;
                    reports.push(CandidateReport {
                        owner,
                        member,
                        outcome: CandidateOutcome::Rejected {
                            reason: reason.to_string(),
                        },
                    });
                    continue;
                }
            };

            let candidate = synthesize::synthesize(index, plan);
            stats.synthesized += 1;
            verify(index, stub)?;
            touched.insert(stub.ty.module);
            touched.insert(candidate.owner().module);
            let field = candidate.field_ref.name.clone();

            let strategies = self.strategies.strategies_for(index.method(stub));
            if strategies.is_empty() {
                debug!(owner = %owner, member = %member, field = %field, "no strategy attached, field keeps its default");
                reports.push(CandidateReport {
                    owner,
                    member,
                    outcome: CandidateOutcome::FieldOnly { field },
                });
                continue;
            }

            let mut applied = Vec::new();
            let mut rejected = Vec::new();
            for strategy in strategies {
                debug!(strategy = strategy.name(), field = %field, "applying strategy");
                if let Err(reason) = strategy.validate(index, &env, &candidate) {
                    error!(
                        owner = %owner,
                        member = %member,
                        strategy = strategy.name(),
                        reason = %reason,
                        "strategy rejected"
                    );
                    stats.strategies_rejected += 1;
                    rejected.push((strategy.name().to_string(), reason.to_string()));
                    continue;
                }
                for method in strategy.apply(index, &env, &candidate)? {
                    verify(index, method)?;
                    touched.insert(method.ty.module);
                }
                stats.strategies_applied += 1;
                applied.push(strategy.name().to_string());
            }
            reports.push(CandidateReport {
                owner,
                member,
                outcome: CandidateOutcome::Strategies {
                    field,
                    applied,
                    rejected,
                },
            });
        }

        let extended = self.extensions.run_all(index, &self.markers.free_patch);
        stats.extensions_applied = extended.len();
        touched.extend(extended);

        let modules = touched
            .into_iter()
            .map(|id| {
                let module = index.module_mut(id);
                module.flags |= flags::PATCHED;
                PatchedModule {
                    id,
                    name: module.name().to_string(),
                    bytes: module.encode(),
                }
            })
            .collect::<Vec<_>>();

        info!(
            modules = modules.len(),
            synthesized = stats.synthesized,
            rejected = stats.rejected,
            strategies_applied = stats.strategies_applied,
            strategies_rejected = stats.strategies_rejected,
            extensions_applied = stats.extensions_applied,
            "patch run complete"
        );
        Ok(PatchOutput {
            modules,
            reports,
            stats,
        })
    }
}

/// Every method carrying `marker`, in index order
fn collect_stubs(index: &ModuleIndex, marker: &str) -> Vec<MethodHandle> {
    let mut stubs = Vec::new();
    for (module, m) in index.modules() {
        for (ty, t) in m.types.iter().enumerate() {
            for (i, method) in t.methods.iter().enumerate() {
                if method.has_marker(marker) {
                    stubs.push(MethodHandle {
                        ty: TypeHandle { module, index: ty },
                        index: i,
                    });
                }
            }
        }
    }
    stubs
}

fn verify(index: &ModuleIndex, method: MethodHandle) -> Result<(), PatchError> {
    verify_body(index.method(method)).map_err(|error| PatchError::Verify {
        method: index.method_name(method),
        error,
    })
}
