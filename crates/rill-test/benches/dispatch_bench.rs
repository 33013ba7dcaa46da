//! Benchmarks for dispatch and propagation

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use rill_core::{Action, EffectCollector, IdAllocator, Value};
use rill_state::{ContainerKind, PropGraph};
use rill_test::*;

fn bench_private_dispatch(c: &mut Criterion) {
    let t = TestRuntime::new().unwrap();
    let page = t.start(CounterLogic::new()).unwrap();

    c.bench_function("dispatch_private_write", |b| {
        b.iter(|| page.dispatch(black_box(Action::new(BUMP_LOCAL))).unwrap())
    });
}

fn bench_public_dispatch(c: &mut Criterion) {
    let t = TestRuntime::new().unwrap();
    let page = t.start(CounterLogic::new().with_mirror()).unwrap();
    let mut n = 0i32;

    c.bench_function("dispatch_public_write_3_levels", |b| {
        b.iter(|| {
            n += 1;
            page.dispatch(Action::new(SET_NUM).with_payload(black_box(n))).unwrap()
        })
    });
}

fn bench_coalesced_tick(c: &mut Criterion) {
    let t = TestRuntime::new().unwrap();
    let view = RecordingView::new(|s: &Counter| vec![s.num.id(), s.local.id()]);
    let page = t.start(CounterLogic::new().with_mirror().with_view(view.clone())).unwrap();
    t.tick();

    c.bench_function("tick_after_16_dispatches", |b| {
        b.iter(|| {
            for i in 0..16 {
                page.dispatch(Action::new(SET_NUM).with_payload(i)).unwrap();
            }
            black_box(t.tick());
            view.updates().clear();
        })
    });
}

fn bench_global_fanout(c: &mut Criterion) {
    let t = TestRuntime::new().unwrap();
    let profile = t.runtime().global_store::<Profile>(EffectCollector::new()).unwrap();
    let pages: Vec<_> = (0..8)
        .map(|_| t.start(ShellLogic { profile: profile.clone() }).unwrap())
        .collect();

    c.bench_function("global_update_8_pages", |b| {
        b.iter(|| {
            profile
                .update_state(|s, w| w.set(&s.name, String::from("bench")))
                .unwrap()
        })
    });
    black_box(pages);
}

fn bench_resolve_root(c: &mut Criterion) {
    let mut graph = PropGraph::with_ids(std::sync::Arc::new(IdAllocator::new()));
    let mut props = Vec::new();
    for depth in 0..16 {
        let token = graph.create_container(ContainerKind::Component, "level");
        let id = graph.add_prop(token, "num", Value::new(depth), false).unwrap();
        if let Some(&parent) = props.last() {
            graph.link_to_parent(id, parent).unwrap();
        }
        props.push(id);
    }
    let leaf = props[props.len() - 1];

    c.bench_function("resolve_root_flattened_chain", |b| {
        b.iter(|| black_box(graph.resolve_root(black_box(leaf))))
    });
}

criterion_group!(
    benches,
    bench_private_dispatch,
    bench_public_dispatch,
    bench_coalesced_tick,
    bench_global_fanout,
    bench_resolve_root,
);

criterion_main!(benches);
