use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use graft_engine::bytecode::{
    Instruction, Literal, Marker, MarkerArg, MethodBuilder, ModuleBuilder, TypeBuilder,
};
use graft_engine::{Module, ModuleIndex, Patcher, TypeSig};

fn game_module(types: usize) -> Module {
    let mut builder = ModuleBuilder::new("Game");
    for i in 0..types {
        builder.add_type(
            TypeBuilder::class(format!("Game.Type{}", i))
                .field("value", TypeSig::I32)
                .method(MethodBuilder::constructor().code(vec![
                    Instruction::LoadArg(0),
                    Instruction::LoadI4(i as i32),
                    Instruction::Pop,
                    Instruction::Pop,
                    Instruction::Ret,
                ]))
                .method(
                    MethodBuilder::new("Get")
                        .returns(TypeSig::I32)
                        .code(vec![Instruction::LoadI4(0), Instruction::Ret]),
                ),
        );
    }
    builder.build()
}

fn mods_module(types: usize) -> Module {
    let mut builder = ModuleBuilder::new("Mods");
    let mut ext = TypeBuilder::class("Mods.Ext");
    for i in 0..types {
        ext = ext.method(
            MethodBuilder::static_method(format!("Field{}", i))
                .param("self", TypeSig::named("Game", format!("Game.Type{}", i)))
                .returns(TypeSig::I32)
                .marker(Marker::new("AddField"))
                .marker(
                    Marker::new("DefaultValueDirect")
                        .with_arg(MarkerArg::Literal(Literal::I32(i as i32))),
                ),
        );
    }
    builder.add_type(ext);
    builder.build()
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    for types in [10usize, 100, 1000] {
        let module = game_module(types);
        let bytes = module.encode();
        group.throughput(Throughput::Bytes(bytes.len() as u64));

        group.bench_with_input(BenchmarkId::new("encode", types), &module, |b, module| {
            b.iter(|| black_box(module).encode())
        });
        group.bench_with_input(BenchmarkId::new("decode", types), &bytes, |b, bytes| {
            b.iter(|| Module::decode(black_box(bytes)).unwrap())
        });
    }
    group.finish();
}

fn bench_patch_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("patch_run");
    for types in [10usize, 100] {
        let sources = vec![game_module(types).encode(), mods_module(types).encode()];
        group.bench_with_input(BenchmarkId::new("direct", types), &sources, |b, sources| {
            b.iter(|| {
                let index = ModuleIndex::load(sources.clone()).unwrap();
                Patcher::new(index).run().unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_codec, bench_patch_run);
criterion_main!(benches);
