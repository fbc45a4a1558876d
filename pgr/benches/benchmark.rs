use criterion::{criterion_group, criterion_main, Criterion};

use pgr::{ReservationType, TargetModel};

fn bench_register_cycle(c: &mut Criterion) {
    c.bench_function("register_unregister_pair", |b| {
        b.iter(|| {
            let mut model = TargetModel::new();
            model.register("initA", "0x123abc").unwrap();
            model.register("initB", "0x696969").unwrap();
            model.unregister("0x123abc").unwrap();
            model.unregister("0x696969").unwrap();
            model
        })
    });
}

fn bench_reserve_release(c: &mut Criterion) {
    c.bench_function("reserve_release", |b| {
        let mut model = TargetModel::new();
        model.register("initA", "0x123abc").unwrap();
        b.iter(|| {
            model
                .reserve("0x123abc", ReservationType::ExclusiveAccess)
                .unwrap();
            model
                .release("0x123abc", ReservationType::ExclusiveAccess)
                .unwrap();
        })
    });
}

criterion_group!(benches, bench_register_cycle, bench_reserve_release);
criterion_main!(benches);
