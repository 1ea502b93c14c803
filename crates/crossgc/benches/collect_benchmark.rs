//! Benchmark: collection pause for rings of cyclic garbage, with and
//! without the cross-domain resolver.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use crossgc::{Collector, CollectorConfig, GcObject, Heap, ManagedWorld, ObjRef, Traverse};
use std::hint::black_box;

#[derive(Traverse, Default)]
struct Node {
    next: Option<ObjRef>,
}

impl GcObject for Node {
    fn type_name(&self) -> &'static str {
        "node"
    }
}

fn build_ring(heap: &mut Heap, n: usize) -> ObjRef {
    let nodes: Vec<ObjRef> = (0..n).map(|_| heap.alloc(Node::default())).collect();
    for (i, &node) in nodes.iter().enumerate() {
        let next = nodes[(i + 1) % n];
        heap.incref(next);
        if let Some(body) = heap.get_mut::<Node>(node) {
            body.next = Some(next);
        }
    }
    for &node in &nodes[1..] {
        heap.decref(node);
    }
    nodes[0]
}

fn bench_garbage_rings(c: &mut Criterion) {
    for size in [100, 1_000, 10_000] {
        c.bench_function(&format!("collect_garbage_ring_{size}"), |b| {
            b.iter_batched(
                || {
                    let mut gc = Collector::default();
                    let head = build_ring(gc.heap_mut(), size);
                    gc.heap_mut().decref(head);
                    gc
                },
                |mut gc| black_box(gc.collect(2)),
                BatchSize::SmallInput,
            );
        });
    }
}

fn bench_live_heap(c: &mut Criterion) {
    c.bench_function("collect_live_ring_10000", |b| {
        let mut gc = Collector::default();
        let head = build_ring(gc.heap_mut(), 10_000);
        b.iter(|| black_box(gc.collect(2)));
        gc.heap_mut().decref(head);
    });
}

fn bench_cross_domain(c: &mut Criterion) {
    c.bench_function("collect_cross_domain_stubs_1000", |b| {
        b.iter_batched(
            || {
                let mut gc = Collector::new(ManagedWorld::new(), CollectorConfig::cross_domain());
                let (heap, world) = gc.parts_mut();
                for _ in 0..1_000 {
                    let stub = world.new_object(heap);
                    let owner = heap.alloc(Node::default());
                    heap.incref(stub);
                    if let Some(body) = heap.get_mut::<Node>(owner) {
                        body.next = Some(stub);
                    }
                    let _ = world.store_ref(heap, stub, owner);
                    heap.decref(owner);
                }
                gc
            },
            |mut gc| black_box(gc.collect(2)),
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_garbage_rings,
    bench_live_heap,
    bench_cross_domain
);
criterion_main!(benches);
