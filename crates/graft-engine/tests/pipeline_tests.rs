//! End-to-end patch runs: artifacts, concurrency, extensions and fatal errors

mod common;

use common::{object_ctor, Value, Vm};
use graft_engine::bytecode::module::flags;
use graft_engine::bytecode::{
    Instruction, Literal, Marker, MarkerArg, MethodBuilder, Module, ModuleBuilder, TypeBuilder,
    TypeSig,
};
use graft_engine::index::MethodHandle;
use graft_engine::patch::inject::inject_constructors;
use graft_engine::patch::{
    module_type, CandidateOutcome, ExtensionParam, FieldCandidate, FieldStrategy, StrategyEnv,
};
use graft_engine::{
    read_artifact, Extension, ModuleIndex, PatchError, Patcher, ValidationError,
};
use std::io::Cursor;
use std::sync::{Arc, Barrier};
use std::thread;

fn pawn() -> TypeSig {
    TypeSig::named("Game", "Game.Pawn")
}

fn core_module() -> Module {
    let mut core = ModuleBuilder::new("Core");
    core.add_type(TypeBuilder::class("Core.Unrelated").method(object_ctor()));
    core.build()
}

fn game_module() -> Module {
    let mut game = ModuleBuilder::new("Game");
    game.add_type(TypeBuilder::class("Game.Pawn").method(object_ctor()));
    game.build()
}

fn mods_module() -> Module {
    let mut mods = ModuleBuilder::new("Mods");
    mods.add_type(
        TypeBuilder::class("Mods.Ext")
            .method(
                MethodBuilder::static_method("Speed")
                    .param("self", pawn())
                    .returns(TypeSig::F32)
                    .marker(Marker::new("AddField"))
                    .marker(
                        Marker::new("DefaultValueDirect")
                            .with_arg(MarkerArg::Literal(Literal::F32(3.5))),
                    ),
            )
            .method(
                MethodBuilder::static_method("Tag")
                    .param("self", pawn())
                    .returns(TypeSig::Str)
                    .marker(Marker::new("AddField")),
            ),
    );
    mods.build()
}

fn sources() -> Vec<Vec<u8>> {
    vec![
        core_module().encode(),
        game_module().encode(),
        mods_module().encode(),
    ]
}

#[test]
fn test_artifact_contains_touched_modules_in_order() {
    let patcher = Patcher::new(ModuleIndex::load(sources()).unwrap());
    let output = patcher.run().unwrap().unwrap();

    let mut bytes = Vec::new();
    output.write_artifact(&mut bytes).unwrap();
    let chunks = read_artifact(&mut Cursor::new(bytes)).unwrap();
    assert_eq!(chunks.len(), 2);

    let decoded: Vec<Module> = chunks.iter().map(|c| Module::decode(c).unwrap()).collect();
    assert_eq!(decoded[0].name(), "Game");
    assert_eq!(decoded[1].name(), "Mods");
    for (module, chunk) in decoded.iter().zip(&chunks) {
        assert_ne!(module.flags & flags::PATCHED, 0);
        assert_eq!(&module.encode(), chunk);
    }
    assert!(output.module("Core").is_none());
}

#[test]
fn test_patched_modules_load_and_run() {
    let patcher = Patcher::new(ModuleIndex::load(sources()).unwrap());
    let output = patcher.run().unwrap().unwrap();

    // Untouched modules come from the original set
    let mut reloaded = vec![core_module().encode()];
    reloaded.extend(output.modules.iter().map(|m| m.bytes.clone()));
    let index = ModuleIndex::load(reloaded).unwrap();

    let mut vm = Vm::new(&index);
    let obj = vm.construct("Game.Pawn", vec![]).unwrap();
    assert_eq!(vm.call("Mods.Ext:Speed", vec![Value::Obj(obj)]).unwrap(), Value::F32(3.5));
    assert_eq!(vm.call("Mods.Ext:Tag", vec![Value::Obj(obj)]).unwrap(), Value::Null);
}

#[test]
fn test_rerun_on_patched_output_rejects_existing_fields() {
    let first = Patcher::new(ModuleIndex::load(sources()).unwrap());
    let output = first.run().unwrap().unwrap();

    let mut reloaded = vec![core_module().encode()];
    reloaded.extend(output.modules.iter().map(|m| m.bytes.clone()));
    let second = Patcher::new(ModuleIndex::load(reloaded).unwrap());
    let rerun = second.run().unwrap().unwrap();

    assert_eq!(rerun.stats.synthesized, 0);
    assert_eq!(rerun.stats.rejected, 2);
    assert!(rerun.modules.is_empty());
    for (report, original) in rerun.reports.iter().zip(&output.reports) {
        let field = original.field().unwrap().to_string();
        assert_eq!(
            report.outcome,
            CandidateOutcome::Rejected {
                reason: ValidationError::FieldExists(field).to_string()
            }
        );
    }
}

#[test]
fn test_concurrent_runs_patch_once() {
    let patcher = Arc::new(Patcher::new(ModuleIndex::load(sources()).unwrap()));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let patcher = Arc::clone(&patcher);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                patcher.run().unwrap().is_some()
            })
        })
        .collect();
    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
    assert!(patcher.has_run());

    // Exactly one field per stub, each initialized once
    let index = patcher.index();
    let owner = index.find_type("Game.Pawn").unwrap();
    assert_eq!(index.type_def(owner).fields.len(), 2);
    let mut vm = Vm::new(&index);
    let obj = vm.construct("Game.Pawn", vec![]).unwrap();
    assert_eq!(vm.call("Mods.Ext:Speed", vec![Value::Obj(obj)]).unwrap(), Value::F32(3.5));
}

#[test]
fn test_persist_writes_artifact_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("patched.grafts");

    let patcher = Patcher::new(ModuleIndex::load(sources()).unwrap());
    patcher.run().unwrap().unwrap().persist(&path).unwrap();

    let chunks = read_artifact(&mut std::fs::File::open(&path).unwrap()).unwrap();
    assert_eq!(chunks.len(), 2);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

// ============================================================================
// Extensions
// ============================================================================

fn rename_type(module: &mut Module, from: &str, to: &str) -> bool {
    match module.type_index(from) {
        Some(i) => {
            module.types[i].name = to.to_string();
            true
        }
        None => false,
    }
}

#[test]
fn test_extensions_are_isolated() {
    let mut patcher = Patcher::new(ModuleIndex::load(sources()).unwrap());
    let extensions = patcher.extensions_mut();
    extensions.register(Extension::new("fails", "Core", |_, _| Err("boom".into())));
    extensions.register(Extension::new("panics", "Core", |_, _| panic!("extension bug")));
    extensions.register(Extension::new("missing-target", "Nowhere", |_, _| Ok(true)));
    extensions.register(
        Extension::new("missing-import", "Core", |_, _| Ok(true)).with_imports(["Nowhere"]),
    );
    extensions.register(Extension::new("no-change", "Core", |_, _| Ok(false)));
    extensions.register(
        Extension::new("renames", "Core", |module, imports| {
            assert_eq!(imports.len(), 1);
            assert_eq!(imports[0].name(), "Game");
            Ok(rename_type(module, "Core.Unrelated", "Core.Renamed"))
        })
        .with_imports(["Game"]),
    );

    let output = patcher.run().unwrap().unwrap();
    assert_eq!(output.stats.extensions_applied, 1);
    assert_eq!(output.stats.synthesized, 2);

    let names: Vec<_> = output.modules.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["Core", "Game", "Mods"]);
    let core = Module::decode(&output.module("Core").unwrap().bytes).unwrap();
    assert_eq!(core.types[0].name, "Core.Renamed");
}

#[test]
fn test_marker_declared_extension() {
    let mut tools = ModuleBuilder::new("Tools");
    tools.add_type(
        TypeBuilder::class("Tools.Patches")
            .method(
                MethodBuilder::static_method("Rename")
                    .param("module", module_type())
                    .returns(TypeSig::Bool)
                    .marker(
                        Marker::new("FreePatch")
                            .with_arg(MarkerArg::Literal(Literal::Str("rename".to_string())))
                            .with_arg(MarkerArg::Literal(Literal::Str("Core".to_string()))),
                    ),
            )
            .method(
                MethodBuilder::static_method("Unbound")
                    .param("module", module_type())
                    .returns(TypeSig::Bool)
                    .marker(
                        Marker::new("FreePatch")
                            .with_arg(MarkerArg::Literal(Literal::Str("unbound".to_string())))
                            .with_arg(MarkerArg::Literal(Literal::Str("Game".to_string()))),
                    ),
            ),
    );
    let mut all = sources();
    all.push(tools.build().encode());

    let mut patcher = Patcher::new(ModuleIndex::load(all).unwrap());
    patcher.extensions_mut().register_handler(
        "Tools.Patches:Rename",
        vec![ExtensionParam::module()],
        |module, _| Ok(rename_type(module, "Core.Unrelated", "Core.Renamed")),
    );
    let output = patcher.run().unwrap().unwrap();

    assert_eq!(output.stats.extensions_applied, 1);
    let index = patcher.index();
    assert!(index.find_type("Core.Renamed").is_some());
    assert!(output.module("Tools").is_none());
}

// ============================================================================
// Fatal errors
// ============================================================================

/// Emits a branch past the end of every constructor
#[derive(Debug)]
struct BrokenStrategy;

impl FieldStrategy for BrokenStrategy {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn marker(&self) -> &str {
        "Broken"
    }

    fn validate(
        &self,
        _index: &ModuleIndex,
        _env: &StrategyEnv<'_>,
        _candidate: &FieldCandidate,
    ) -> Result<(), ValidationError> {
        Ok(())
    }

    fn apply(
        &self,
        index: &mut ModuleIndex,
        _env: &StrategyEnv<'_>,
        candidate: &FieldCandidate,
    ) -> Result<Vec<MethodHandle>, PatchError> {
        Ok(inject_constructors(
            index,
            candidate.owner(),
            &[Instruction::LoadI4(0), Instruction::BrFalse(999)],
        ))
    }
}

#[test]
fn test_invalid_rewrite_aborts_run() {
    let mut mods = ModuleBuilder::new("Mods");
    mods.add_type(
        TypeBuilder::class("Mods.Ext").method(
            MethodBuilder::static_method("Bad")
                .param("self", pawn())
                .returns(TypeSig::I32)
                .marker(Marker::new("AddField"))
                .marker(Marker::new("Broken")),
        ),
    );
    let index =
        ModuleIndex::load(vec![game_module().encode(), mods.build().encode()]).unwrap();
    let mut patcher = Patcher::new(index);
    patcher.registry_mut().register_strategy(Arc::new(BrokenStrategy));

    match patcher.run() {
        Err(PatchError::Verify { method, .. }) => assert_eq!(method, "Game.Pawn:.ctor"),
        other => panic!("unexpected result {:?}", other.map(|o| o.map(|o| o.stats))),
    }
    assert!(patcher.has_run());
    assert!(patcher.run().unwrap().is_none());
}
