//! Runtime behavior of patched constructors and initializers

mod common;

use common::{branching_ctor, delegating_ctor, field_ref, object_ctor, Value, Vm};
use graft_engine::bytecode::{
    Instruction, Literal, Marker, MarkerArg, MethodBuilder, ModuleBuilder, TypeBuilder, TypeSig,
};
use graft_engine::patch::CandidateOutcome;
use graft_engine::{ModuleIndex, PatchConfig, Patcher};

fn pawn() -> TypeSig {
    TypeSig::named("Game", "Game.Pawn")
}

fn add_field() -> Marker {
    Marker::new("AddField")
}

fn string_arg(marker: &str, value: &str) -> Marker {
    Marker::new(marker).with_arg(MarkerArg::Literal(Literal::Str(value.to_string())))
}

// ============================================================================
// Direct values
// ============================================================================

fn literals() -> Vec<(Literal, Value)> {
    vec![
        (Literal::Bool(true), Value::I32(1)),
        (Literal::Char(0x41), Value::I32(65)),
        (Literal::I8(-5), Value::I32(-5)),
        (Literal::U8(200), Value::I32(200)),
        (Literal::I16(-300), Value::I32(-300)),
        (Literal::U16(60000), Value::I32(60000)),
        (Literal::I32(-7), Value::I32(-7)),
        (Literal::U32(4_000_000_000), Value::I32(4_000_000_000u32 as i32)),
        (Literal::I64(-9_000_000_000), Value::I64(-9_000_000_000)),
        (Literal::U64(u64::MAX), Value::I64(-1)),
        (Literal::F32(1.5), Value::F32(1.5)),
        (Literal::F64(2.25), Value::F64(2.25)),
        (Literal::Str("hello".to_string()), Value::Str("hello".to_string())),
    ]
}

fn direct_index() -> ModuleIndex {
    let mut game = ModuleBuilder::new("Game");
    game.add_type(
        TypeBuilder::class("Game.Pawn")
            .method(object_ctor())
            .method(branching_ctor()),
    );

    let mut ext = TypeBuilder::class("Mods.Ext");
    for (i, (literal, _)) in literals().into_iter().enumerate() {
        ext = ext.method(
            MethodBuilder::static_method(format!("Lit{}", i))
                .param("self", pawn())
                .returns(literal.type_sig())
                .marker(add_field())
                .marker(Marker::new("DefaultValueDirect").with_arg(MarkerArg::Literal(literal))),
        );
    }
    let mut mods = ModuleBuilder::new("Mods");
    mods.add_type(ext);

    ModuleIndex::load(vec![game.build().encode(), mods.build().encode()]).unwrap()
}

#[test]
fn test_direct_values_for_every_literal_kind() {
    let patcher = Patcher::new(direct_index());
    let output = patcher.run().unwrap().unwrap();
    assert_eq!(output.stats.synthesized, literals().len());
    assert_eq!(output.stats.strategies_applied, literals().len());

    let index = patcher.index();
    let mut vm = Vm::new(&index);
    let plain = vm.construct("Game.Pawn", vec![]).unwrap();
    let early = vm.construct("Game.Pawn", vec![Value::I32(1)]).unwrap();
    let late = vm.construct("Game.Pawn", vec![Value::I32(0)]).unwrap();

    for (i, (literal, expected)) in literals().into_iter().enumerate() {
        for obj in [plain, early, late] {
            let value = vm
                .call(&format!("Mods.Ext:Lit{}", i), vec![Value::Obj(obj)])
                .unwrap();
            assert_eq!(value, expected, "literal {} on object {}", literal, obj);
        }
    }
}

#[test]
fn test_direct_value_type_mismatch_keeps_field() {
    let mut game = ModuleBuilder::new("Game");
    game.add_type(TypeBuilder::class("Game.Pawn").method(object_ctor()));
    game.add_type(
        TypeBuilder::class("Game.Ext").method(
            MethodBuilder::static_method("Wide")
                .param("self", pawn())
                .returns(TypeSig::I64)
                .marker(add_field())
                .marker(
                    Marker::new("DefaultValueDirect")
                        .with_arg(MarkerArg::Literal(Literal::I32(5))),
                ),
        ),
    );
    let index = ModuleIndex::load(vec![game.build().encode()]).unwrap();
    let patcher = Patcher::new(index);
    let output = patcher.run().unwrap().unwrap();

    match &output.reports[0].outcome {
        CandidateOutcome::Strategies { applied, rejected, .. } => {
            assert!(applied.is_empty());
            assert_eq!(rejected.len(), 1);
            assert_eq!(rejected[0].0, "direct");
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    // The field still exists and keeps its zero value
    let index = patcher.index();
    let mut vm = Vm::new(&index);
    let obj = vm.construct("Game.Pawn", vec![]).unwrap();
    assert_eq!(vm.call("Game.Ext:Wide", vec![Value::Obj(obj)]).unwrap(), Value::I64(0));
}

// ============================================================================
// Injectors
// ============================================================================

fn injector_index() -> ModuleIndex {
    let count = field_ref(&pawn(), "count", TypeSig::I32);

    let mut game = ModuleBuilder::new("Game");
    game.add_type(
        TypeBuilder::class("Game.Pawn")
            .field("count", TypeSig::I32)
            .method(object_ctor())
            .method(delegating_ctor(pawn(), TypeSig::I32)),
    );

    let mut mods = ModuleBuilder::new("Mods");
    mods.add_type(
        TypeBuilder::class("Mods.Ext")
            .method(
                MethodBuilder::static_method("Serial")
                    .param("self", pawn())
                    .returns(TypeSig::I32)
                    .marker(add_field())
                    .marker(string_arg("DefaultValueInjector", "Next")),
            )
            .method(
                MethodBuilder::static_method("Seed")
                    .param("self", pawn())
                    .returns(TypeSig::I32)
                    .marker(add_field())
                    .marker(string_arg("DefaultValueInjector", "Mods.Seeds:FortyTwo")),
            )
            .method(
                MethodBuilder::static_method("Next")
                    .param("pawn", pawn())
                    .returns(TypeSig::I32)
                    .code(vec![
                        Instruction::LoadArg(0),
                        Instruction::LoadArg(0),
                        Instruction::LoadField(count.clone()),
                        Instruction::LoadI4(1),
                        Instruction::Add,
                        Instruction::StoreField(count.clone()),
                        Instruction::LoadArg(0),
                        Instruction::LoadField(count),
                        Instruction::Ret,
                    ]),
            ),
    );
    mods.add_type(
        TypeBuilder::class("Mods.Seeds").method(
            MethodBuilder::static_method("FortyTwo")
                .returns(TypeSig::I32)
                .code(vec![Instruction::LoadI4(42), Instruction::Ret]),
        ),
    );

    ModuleIndex::load(vec![game.build().encode(), mods.build().encode()]).unwrap()
}

#[test]
fn test_injector_results_stored() {
    let patcher = Patcher::new(injector_index());
    let output = patcher.run().unwrap().unwrap();
    assert_eq!(output.stats.strategies_applied, 2);

    let index = patcher.index();
    let mut vm = Vm::new(&index);
    let obj = vm.construct("Game.Pawn", vec![]).unwrap();
    assert_eq!(vm.call("Mods.Ext:Serial", vec![Value::Obj(obj)]).unwrap(), Value::I32(1));
    assert_eq!(vm.call("Mods.Ext:Seed", vec![Value::Obj(obj)]).unwrap(), Value::I32(42));
}

#[test]
fn test_counter_injector_runs_once_per_construction() {
    let patcher = Patcher::new(injector_index());
    patcher.run().unwrap().unwrap();

    let index = patcher.index();
    let mut vm = Vm::new(&index);
    let direct = vm.construct("Game.Pawn", vec![]).unwrap();
    let delegated = vm.construct("Game.Pawn", vec![Value::I32(9)]).unwrap();

    for obj in [direct, delegated] {
        assert_eq!(vm.field(obj, "count"), Some(&Value::I32(1)));
        assert_eq!(vm.call("Mods.Ext:Serial", vec![Value::Obj(obj)]).unwrap(), Value::I32(1));
    }
}

// ============================================================================
// Post-init components
// ============================================================================

/// Core: Component, Thing { .ctor, Init, GetComp<T>, Find(Type) }
/// Game: Pawn : Thing, Animal : Thing, Health : Component, Armor : Component
/// Mods: Ext { OnPawn(Pawn) -> Health, OnAnimal(Animal) -> Armor }
fn post_init_index() -> ModuleIndex {
    let mut core = ModuleBuilder::new("Core");
    core.add_type(TypeBuilder::class("Core.Component").method(object_ctor()));
    core.add_type(
        TypeBuilder::class("Core.Thing")
            .method(object_ctor())
            .method(
                MethodBuilder::new("Init")
                    .flags(graft_engine::bytecode::method_flags::VIRTUAL)
                    .code(vec![Instruction::Ret]),
            )
            .method(
                MethodBuilder::new("GetComp")
                    .generic_params(&["T"])
                    .returns(TypeSig::MethodParam(0)),
            )
            .method(
                MethodBuilder::new("Find")
                    .param("type", TypeSig::Type)
                    .returns(TypeSig::named("Core", "Core.Component")),
            ),
    );

    let thing = TypeSig::named("Core", "Core.Thing");
    let component = TypeSig::named("Core", "Core.Component");
    let mut game = ModuleBuilder::new("Game");
    game.add_type(TypeBuilder::class("Game.Pawn").extends(thing.clone()).method(object_ctor()));
    game.add_type(TypeBuilder::class("Game.Animal").extends(thing).method(object_ctor()));
    game.add_type(TypeBuilder::class("Game.Health").extends(component.clone()));
    game.add_type(TypeBuilder::class("Game.Armor").extends(component));

    let mut mods = ModuleBuilder::new("Mods");
    mods.add_type(
        TypeBuilder::class("Mods.Ext")
            .method(
                MethodBuilder::static_method("OnPawn")
                    .param("self", pawn())
                    .returns(TypeSig::named("Game", "Game.Health"))
                    .marker(add_field())
                    .marker(Marker::new("PostInitField")),
            )
            .method(
                MethodBuilder::static_method("OnAnimal")
                    .param("self", TypeSig::named("Game", "Game.Animal"))
                    .returns(TypeSig::named("Game", "Game.Armor"))
                    .marker(add_field())
                    .marker(Marker::new("PostInitField")),
            ),
    );

    ModuleIndex::load(vec![
        core.build().encode(),
        game.build().encode(),
        mods.build().encode(),
    ])
    .unwrap()
}

fn wiring_config(getter: &str) -> PatchConfig {
    PatchConfig::from_toml_str(&format!(
        r#"
        [[wiring]]
        main = "Core.Thing"
        target = "Core.Component"
        initializer = "Core.Thing:Init"
        getter = "{}"
        "#,
        getter
    ))
    .unwrap()
}

/// Host component lookup: a fresh component of the requested type
fn make_component(
    index: &ModuleIndex,
    heap: &mut Vec<common::Object>,
    ty: &TypeSig,
) -> Result<Value, String> {
    let handle = index
        .resolve_sig(ty)
        .ok_or_else(|| format!("component type {} not found", ty))?;
    Ok(Value::Obj(common::alloc(index, heap, handle)))
}

fn component_vm(index: &ModuleIndex) -> Vm<'_> {
    Vm::new(index)
        .native("Core.Thing:GetComp", |index, heap, target, _| {
            make_component(index, heap, &target.generic_args[0])
        })
        .native("Core.Thing:Find", |index, heap, _, args| match &args[1] {
            Value::Type(ty) => make_component(index, heap, ty),
            other => Err(format!("expected a type token, got {:?}", other)),
        })
}

fn check_components(patcher: &Patcher) {
    let index = patcher.index();
    let mut vm = component_vm(&index);

    let pawn = vm.construct("Game.Pawn", vec![]).unwrap();
    let other_pawn = vm.construct("Game.Pawn", vec![]).unwrap();
    let animal = vm.construct("Game.Animal", vec![]).unwrap();

    // Nothing is populated before the initializer runs
    assert_eq!(vm.call("Mods.Ext:OnPawn", vec![Value::Obj(pawn)]).unwrap(), Value::Null);

    for obj in [pawn, other_pawn, animal] {
        vm.call("Core.Thing:Init", vec![Value::Obj(obj)]).unwrap();
    }

    let health = vm.call("Mods.Ext:OnPawn", vec![Value::Obj(pawn)]).unwrap();
    let other_health = vm.call("Mods.Ext:OnPawn", vec![Value::Obj(other_pawn)]).unwrap();
    let armor = vm.call("Mods.Ext:OnAnimal", vec![Value::Obj(animal)]).unwrap();

    let health = health.obj().expect("pawn component populated");
    let other_health = other_health.obj().expect("second pawn component populated");
    let armor = armor.obj().expect("animal component populated");
    assert_ne!(health, other_health);
    assert_eq!(vm.type_name(health), "Game.Health");
    assert_eq!(vm.type_name(armor), "Game.Armor");

    // Each subtype only carries its own component field
    let pawn_fields: Vec<_> = vm.heap[pawn].fields.keys().collect();
    let animal_fields: Vec<_> = vm.heap[animal].fields.keys().collect();
    assert_eq!(pawn_fields.len(), 1);
    assert_eq!(animal_fields.len(), 1);
    assert_ne!(pawn_fields[0], animal_fields[0]);
}

#[test]
fn test_post_init_with_generic_getter() {
    let mut patcher = Patcher::new(post_init_index());
    wiring_config("GetComp").apply_to(&mut patcher);
    let output = patcher.run().unwrap().unwrap();

    assert_eq!(output.stats.strategies_applied, 2);
    let names: Vec<_> = output.modules.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["Core", "Game", "Mods"]);
    check_components(&patcher);
}

#[test]
fn test_post_init_with_type_token_getter() {
    let mut patcher = Patcher::new(post_init_index());
    wiring_config("Find").apply_to(&mut patcher);
    patcher.run().unwrap().unwrap();
    check_components(&patcher);
}

#[test]
fn test_post_init_without_wiring_is_rejected() {
    let patcher = Patcher::new(post_init_index());
    let output = patcher.run().unwrap().unwrap();

    assert_eq!(output.stats.synthesized, 2);
    assert_eq!(output.stats.strategies_rejected, 2);
    for report in &output.reports {
        match &report.outcome {
            CandidateOutcome::Strategies { rejected, .. } => {
                assert!(rejected[0].1.contains("no wiring found"), "{}", rejected[0].1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    // The initializer is untouched
    let index = patcher.index();
    let init = index.find_method("Core.Thing:Init").unwrap();
    assert_eq!(index.method(init).body.as_ref().unwrap().instructions.len(), 1);
}
