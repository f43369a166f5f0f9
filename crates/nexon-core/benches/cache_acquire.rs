use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nexon_core::prelude::*;
use std::sync::Arc;

const IDENTITY: &[u8] = b"op = \"identity\"\n[input]\nname = \"x\"\n";

fn build_orchestrator(models: usize) -> InferenceOrchestrator {
    let store = Arc::new(InMemoryModelStore::new());
    for i in 0..models {
        store.upload_and_deploy(&format!("model-{}", i), IDENTITY.to_vec()).unwrap();
    }
    InferenceOrchestrator::with_runtime(
        store,
        Arc::new(ReferenceRuntime::new()),
        CacheConfig::default().with_capacity(models),
        OrchestratorConfig::default(),
    )
}

/// Hit path: lease and release a resident session
fn bench_cache_hit(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let orchestrator = build_orchestrator(16);
    runtime.block_on(async {
        for i in 0..16 {
            drop(orchestrator.cache().acquire(&format!("model-{}", i)).await.unwrap());
        }
    });

    let mut group = c.benchmark_group("cache_acquire");
    for resident in [1usize, 16] {
        group.bench_with_input(BenchmarkId::new("hit", resident), &resident, |b, &resident| {
            let mut i = 0usize;
            b.iter(|| {
                let key = format!("model-{}", i % resident);
                i += 1;
                runtime.block_on(async {
                    let lease = orchestrator.cache().acquire(black_box(&key)).await.unwrap();
                    black_box(lease.model().len())
                })
            });
        });
    }
    group.finish();
}

/// Full predict path on a cached identity model
fn bench_predict(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let orchestrator = build_orchestrator(1);

    let mut group = c.benchmark_group("predict");
    for numel in [16usize, 4096] {
        let request = Tensor::new(Shape::new(vec![numel]), TensorData::Float32(vec![0.25; numel]))
            .unwrap()
            .to_wire();
        group.bench_with_input(BenchmarkId::new("identity_f32", numel), &request, |b, request| {
            b.iter(|| {
                runtime.block_on(async {
                    let response = orchestrator.predict("model-0", request.clone()).await.unwrap();
                    black_box(response.outputs.len())
                })
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_cache_hit, bench_predict);
criterion_main!(benches);
