//! Benchmarks for filling and building module parameters.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use simgraph_core::{ActiveContext, Array, Call, Graph, NodeId, NodeKind, Param};

/// Root module with `n` child modules, each holding a scalar and a
/// three-element dynamic param.
fn wide_model(n: usize) -> (Graph, NodeId, usize) {
    let mut graph = Graph::new();
    let root = graph.add_module("root").unwrap();
    for i in 0..n {
        let body = graph.add_module_to(root, &format!("body{i}")).unwrap();
        graph
            .add_param_to(body, Param::builder("mass").valid(0.0, 10.0))
            .unwrap();
        graph
            .add_param_to(body, Param::builder("position").shape(&[3]))
            .unwrap();
    }
    (graph, root, n * 4)
}

// ============================================================================
// Fill / Build
// ============================================================================

fn bench_fill_array(c: &mut Criterion) {
    let (mut graph, root, size) = wide_model(100);
    let input = Array::linspace(0.1, 5.0, size);

    c.bench_function("fill_array_100_modules", |b| {
        b.iter(|| {
            let mut active = ActiveContext::enter(&mut graph, root).unwrap();
            active.fill_params(root, black_box(input.clone())).unwrap();
        })
    });
}

fn bench_fill_build_batched(c: &mut Criterion) {
    let (mut graph, root, size) = wide_model(100);
    let input = Array::full(&[32, size], 1.0);

    c.bench_function("fill_build_batched_32x100", |b| {
        b.iter(|| {
            let mut active = ActiveContext::enter(&mut graph, root).unwrap();
            active.fill_params(root, input.clone()).unwrap();
            black_box(active.build_params_array(root).unwrap())
        })
    });
}

fn bench_forward(c: &mut Criterion) {
    let (mut graph, root, size) = wide_model(20);
    let input = Array::linspace(0.1, 5.0, size);

    c.bench_function("forward_20_modules", |b| {
        b.iter(|| {
            graph
                .forward(root, &[], Call::new().params(input.clone()), |graph, _| {
                    let body = graph.child(root, "body0")?;
                    let mass = graph.child(body, "mass")?;
                    graph.value(mass)
                })
                .unwrap()
        })
    });
}

// ============================================================================
// Traversal
// ============================================================================

fn bench_topological_ordering(c: &mut Criterion) {
    let (graph, root, _) = wide_model(500);

    c.bench_function("topological_ordering_500_modules", |b| {
        b.iter(|| black_box(graph.topological_ordering(root, Some(NodeKind::Param)).unwrap()))
    });
}

fn bench_relink(c: &mut Criterion) {
    let (mut graph, root, _) = wide_model(200);
    let extra = graph.add_param(Param::builder("extra")).unwrap();

    c.bench_function("link_unlink_200_modules", |b| {
        b.iter(|| {
            graph.link(root, "extra", extra).unwrap();
            graph.unlink(root, "extra").unwrap();
        })
    });
}

criterion_group!(
    benches,
    bench_fill_array,
    bench_fill_build_batched,
    bench_forward,
    bench_topological_ordering,
    bench_relink,
);
criterion_main!(benches);
