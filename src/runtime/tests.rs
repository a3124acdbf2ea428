use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use super::testing::RecordingHost;
use super::*;
use crate::config::Config;
use crate::graph::fixtures;

fn id(s: &str) -> ChunkId {
    ChunkId::from(s)
}

fn module(s: &str) -> ModuleId {
    ModuleId::from(s)
}

fn setup() -> (Arc<RecordingHost>, Runtime, DeliveryQueue) {
    let host = Arc::new(RecordingHost::new());
    let runtime = Runtime::builder(host.clone())
        .initial_chunks([id("main")])
        .build()
        .unwrap();
    let queue = DeliveryQueue::new();
    runtime.install(&queue);
    (host, runtime, queue)
}

fn counter() -> (Arc<AtomicUsize>, impl Fn(&Runtime) + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let handle = count.clone();
    (count, move |_: &Runtime| {
        handle.fetch_add(1, Ordering::SeqCst);
    })
}

struct DeliveryTap<F>(F);

impl<F: Fn(&ChunkDelivery) + Send + Sync> DeliveryExtension for DeliveryTap<F> {
    fn on_delivery(&self, delivery: &ChunkDelivery) {
        (self.0)(delivery)
    }
}

#[test]
fn concurrent_ensures_share_one_delivery() {
    let (host, runtime, queue) = setup();

    let mut first = runtime.ensure_chunk(&id("lazyA"));
    let mut second = runtime.ensure_chunk(&id("lazyA"));

    assert_eq!(host.injected(&id("lazyA")), 1);
    assert_eq!(runtime.state(&id("lazyA")), ChunkStateKind::Loading);
    assert!((&mut first).now_or_never().is_none());
    assert!((&mut second).now_or_never().is_none());

    queue.push(ChunkDelivery::new([id("lazyA")]).module("./a.js", |_| {}));

    assert_eq!(first.now_or_never(), Some(Ok(())));
    assert_eq!(second.now_or_never(), Some(Ok(())));
}

#[test]
fn concurrent_ensures_reject_together() {
    let (host, runtime, _queue) = setup();

    let first = runtime.ensure_chunk(&id("lazyA"));
    let second = runtime.ensure_chunk(&id("lazyA"));
    host.last_request(&id("lazyA"))
        .completion
        .complete(ResourceEvent::Error);

    let expected = Err(ChunkLoadError::Delivery {
        chunk: id("lazyA"),
        category: DeliveryCategory::Transport,
        address: "/lazyA.js".to_string(),
    });
    assert_eq!(first.now_or_never(), Some(expected.clone()));
    assert_eq!(second.now_or_never(), Some(expected));
}

#[test]
fn loaded_chunk_is_never_fetched_again() {
    let (host, runtime, queue) = setup();

    let pending = runtime.ensure_chunk(&id("lazyA"));
    queue.push(ChunkDelivery::new([id("lazyA")]));
    host.last_request(&id("lazyA"))
        .completion
        .complete(ResourceEvent::Load);
    assert_eq!(pending.now_or_never(), Some(Ok(())));

    for _ in 0..3 {
        assert_eq!(runtime.ensure_chunk(&id("lazyA")).now_or_never(), Some(Ok(())));
    }
    assert_eq!(runtime.ensure_chunk(&id("main")).now_or_never(), Some(Ok(())));

    assert_eq!(host.injected(&id("lazyA")), 1);
    assert_eq!(host.injected(&id("main")), 0);
    assert_eq!(runtime.state(&id("lazyA")), ChunkStateKind::Loaded);
}

#[test]
fn factories_are_merged_before_resolution() {
    let (_host, runtime, queue) = setup();
    let future = runtime.load_chunk(&id("lazyA"));

    let observed = Arc::new(Mutex::new(None));
    let (tap_runtime, tap_future, tap_observed) =
        (runtime.clone(), future.clone(), observed.clone());
    runtime.set_extension(Some(Arc::new(DeliveryTap(move |_: &ChunkDelivery| {
        *tap_observed.lock() = Some((
            tap_runtime.has_module(&module("./a.js")),
            tap_future.clone().now_or_never().is_none(),
        ));
    }))));

    queue.push(ChunkDelivery::new([id("lazyA")]).module("./a.js", |_| {}));

    // Inside the merge the factory was present while the future was still pending
    assert_eq!(*observed.lock(), Some((true, true)));
    assert_eq!(future.now_or_never(), Some(Ok(())));
}

#[test]
fn deferred_entry_waits_for_all_chunks() {
    for order in [["vendor", "entry"], ["entry", "vendor"]] {
        let host = Arc::new(RecordingHost::new());
        let runtime = Runtime::builder(host).build().unwrap();
        let queue = DeliveryQueue::new();
        runtime.install(&queue);

        let (runs, factory) = counter();
        let factory = Arc::new(factory);
        runtime.startup(vec![DeferredEntry::new("./entry.js", [id("entry"), id("vendor")])]);
        assert_eq!(runtime.deferred_len(), 1);

        let deliver = |chunk: &str| {
            let f = factory.clone();
            let delivery = match chunk {
                "entry" => ChunkDelivery::new([id("entry")]).module("./entry.js", move |rt| f(rt)),
                _ => ChunkDelivery::new([id("vendor")]).module("./vendor.js", |_| {}),
            };
            queue.push(delivery);
        };

        deliver(order[0]);
        assert_eq!(runs.load(Ordering::SeqCst), 0, "ran early for order {:?}", order);

        deliver(order[1]);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.deferred_len(), 0);

        deliver(order[1]);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn entries_carried_by_a_delivery_are_scheduled() {
    let (_host, runtime, queue) = setup();
    let (runs, factory) = counter();

    queue.push(
        ChunkDelivery::new([id("page")])
            .module("./page.js", factory)
            .entry(DeferredEntry::new("./page.js", [id("page"), id("shared")])),
    );
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    queue.push(ChunkDelivery::new([id("shared")]));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn late_delivery_after_timeout_does_not_resolve() {
    let (host, runtime, queue) = setup();

    let future = runtime.load_chunk(&id("lazyA"));
    host.last_request(&id("lazyA"))
        .completion
        .complete(ResourceEvent::Timeout);
    assert!(matches!(
        future.clone().now_or_never(),
        Some(Err(ChunkLoadError::Timeout { .. }))
    ));

    queue.push(ChunkDelivery::new([id("lazyA")]));

    assert!(matches!(
        future.now_or_never(),
        Some(Err(ChunkLoadError::Timeout { .. }))
    ));
    assert_eq!(runtime.state(&id("lazyA")), ChunkStateKind::Loaded);
}

#[test]
fn timeout_after_delivery_does_not_reject() {
    let (host, runtime, queue) = setup();

    let future = runtime.ensure_chunk(&id("lazyA"));
    let completion = host.last_request(&id("lazyA")).completion;
    queue.push(ChunkDelivery::new([id("lazyA")]));
    completion.complete(ResourceEvent::Timeout);
    completion.complete(ResourceEvent::Error);

    assert_eq!(future.now_or_never(), Some(Ok(())));
    assert_eq!(runtime.state(&id("lazyA")), ChunkStateKind::Loaded);
}

#[test]
fn hint_does_not_short_circuit_loading() {
    let (host, runtime, queue) = setup();

    assert!(runtime.hint(&id("h"), HintKind::Prefetch));
    assert!(!runtime.hint(&id("h"), HintKind::Preload));
    assert_eq!(runtime.state(&id("h")), ChunkStateKind::HintOnly);
    assert_eq!(host.injected(&id("h")), 0);

    let mut future = runtime.ensure_chunk(&id("h"));
    assert_eq!(host.injected(&id("h")), 1);
    assert!((&mut future).now_or_never().is_none());

    // A live load is never hinted
    assert!(!runtime.hint(&id("h"), HintKind::Prefetch));
    assert_eq!(host.hints().len(), 1);

    queue.push(ChunkDelivery::new([id("h")]));
    assert_eq!(future.now_or_never(), Some(Ok(())));
}

#[test]
fn lazy_chunk_lifecycle() {
    let (host, runtime, queue) = setup();
    let lazy = id("lazyA");
    assert_eq!(runtime.state(&lazy), ChunkStateKind::NotRequested);

    let future = runtime.ensure_chunk(&lazy);
    assert_eq!(runtime.state(&lazy), ChunkStateKind::Loading);
    assert_eq!(host.last_request(&lazy).address, "/lazyA.js");

    queue.push(ChunkDelivery::new([lazy.clone()]).module("modA", |_| {}));

    assert_eq!(future.now_or_never(), Some(Ok(())));
    assert_eq!(runtime.state(&lazy), ChunkStateKind::Loaded);
    assert!(runtime.has_module(&module("modA")));
}

#[test]
fn timeout_resets_state_for_a_fresh_attempt() {
    let host = Arc::new(RecordingHost::new());
    let runtime = Runtime::builder(host.clone())
        .options(RuntimeOptions {
            timeout: Duration::from_millis(500),
            ..RuntimeOptions::default()
        })
        .build()
        .unwrap();

    let future = runtime.ensure_chunk(&id("lazyA"));
    let request = host.last_request(&id("lazyA"));
    assert_eq!(request.timeout, Duration::from_millis(500));
    request.completion.complete(ResourceEvent::Timeout);

    assert_eq!(
        future.now_or_never(),
        Some(Err(ChunkLoadError::Timeout {
            chunk: id("lazyA"),
            address: "/lazyA.js".to_string(),
        }))
    );
    assert_eq!(runtime.state(&id("lazyA")), ChunkStateKind::NotRequested);

    let _retry = runtime.ensure_chunk(&id("lazyA"));
    assert_eq!(host.injected(&id("lazyA")), 2);
    assert_eq!(runtime.state(&id("lazyA")), ChunkStateKind::Loading);

    // The first attempt's completion no longer affects the retry
    request.completion.complete(ResourceEvent::Error);
    assert_eq!(runtime.state(&id("lazyA")), ChunkStateKind::Loading);
}

#[test]
fn duplicate_delivery_is_harmless() {
    let (_host, runtime, queue) = setup();
    let (runs, factory) = counter();

    let pending = runtime.ensure_chunk(&id("lazyA"));
    queue.push(ChunkDelivery::new([id("lazyA")]).module("modA", factory));
    queue.push(ChunkDelivery::new([id("lazyA")]).module("modA", |_| panic!("second factory won")));

    assert_eq!(pending.now_or_never(), Some(Ok(())));
    assert_eq!(runtime.state(&id("lazyA")), ChunkStateKind::Loaded);

    runtime.execute(&module("modA")).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn unrequested_sibling_chunks_become_loaded() {
    let (host, runtime, queue) = setup();

    queue.push(ChunkDelivery::new([id("a"), id("b")]));

    assert_eq!(runtime.state(&id("a")), ChunkStateKind::Loaded);
    assert_eq!(runtime.state(&id("b")), ChunkStateKind::Loaded);
    assert_eq!(runtime.ensure_chunk(&id("b")).now_or_never(), Some(Ok(())));
    assert_eq!(host.injected(&id("b")), 0);
}

#[test]
fn load_without_delivery_is_missing() {
    let (host, runtime, _queue) = setup();

    let future = runtime.ensure_chunk(&id("lazyA"));
    host.last_request(&id("lazyA"))
        .completion
        .complete(ResourceEvent::Load);

    assert!(matches!(
        future.now_or_never(),
        Some(Err(ChunkLoadError::Delivery {
            category: DeliveryCategory::Missing,
            ..
        }))
    ));
}

#[test]
fn install_drains_buffered_deliveries_in_order() {
    let host = Arc::new(RecordingHost::new());
    let runtime = Runtime::builder(host).build().unwrap();
    let queue = DeliveryQueue::new();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let tap_seen = seen.clone();
    runtime.set_extension(Some(Arc::new(DeliveryTap(move |d: &ChunkDelivery| {
        tap_seen.lock().extend(d.chunk_ids.iter().cloned());
    }))));

    queue.push(ChunkDelivery::new([id("one")]));
    queue.push(ChunkDelivery::new([id("two")]));
    assert_eq!(queue.pending(), 2);
    assert_eq!(runtime.state(&id("one")), ChunkStateKind::NotRequested);

    runtime.install(&queue);
    assert_eq!(queue.pending(), 0);
    assert_eq!(*seen.lock(), vec![id("one"), id("two")]);

    queue.push(ChunkDelivery::new([id("three")]));
    assert_eq!(runtime.state(&id("three")), ChunkStateKind::Loaded);
    assert_eq!(seen.lock().len(), 3);
}

#[test]
fn on_demand_without_handlers_is_refused() {
    let host = Arc::new(RecordingHost::new());
    let err = Runtime::builder(host.clone())
        .script_loading(false)
        .build()
        .unwrap_err();
    assert!(matches!(err, ChunkLoadError::BuildInvariantViolation { .. }));

    let runtime = Runtime::builder(host).on_demand(false).build().unwrap();
    assert!(matches!(
        runtime.ensure_chunk(&id("a")).now_or_never(),
        Some(Err(ChunkLoadError::BuildInvariantViolation { .. }))
    ));
}

#[test]
fn chunks_without_an_owning_handler_resolve_immediately() {
    let host = Arc::new(RecordingHost::new());
    let runtime = Runtime::builder(host.clone())
        .script_loading(false)
        .handler(Arc::new(ScriptHandler::only([id("a")])))
        .build()
        .unwrap();

    assert_eq!(runtime.ensure_chunk(&id("b")).now_or_never(), Some(Ok(())));
    assert_eq!(host.injected(&id("b")), 0);

    let _a = runtime.ensure_chunk(&id("a"));
    assert_eq!(host.injected(&id("a")), 1);
}

#[test]
fn ensuring_a_chunk_preloads_its_children() {
    let host = Arc::new(RecordingHost::new());
    let runtime = Runtime::builder(host.clone())
        .preload_map([(id("page"), vec![id("icons")])].into_iter().collect())
        .build()
        .unwrap();

    let _page = runtime.ensure_chunk(&id("page"));

    let hints = host.hints();
    assert_eq!(hints.len(), 1);
    assert_eq!(hints[0].chunk, id("icons"));
    assert_eq!(hints[0].kind, HintKind::Preload);
    assert_eq!(hints[0].address, "/icons.js");
}

#[test]
fn delivery_prefetch_hints_skip_known_chunks() {
    let (host, runtime, queue) = setup();

    queue.push(
        ChunkDelivery::new([id("lazyA")])
            .prefetch("lazyB")
            .prefetch("main"),
    );

    let hints = host.hints();
    assert_eq!(hints.len(), 1);
    assert_eq!(hints[0].chunk, id("lazyB"));
    assert_eq!(hints[0].kind, HintKind::Prefetch);
    assert_eq!(runtime.state(&id("lazyB")), ChunkStateKind::HintOnly);
}

#[tokio::test]
async fn import_runs_module_or_reports() {
    let (host, runtime, queue) = setup();
    let (runs, factory) = counter();
    let reported = Arc::new(AtomicUsize::new(0));
    let sink_count = reported.clone();
    runtime.set_error_sink(Arc::new(move |_: &ChunkLoadError| {
        sink_count.fetch_add(1, Ordering::SeqCst);
    }));

    let load_queue = queue.clone();
    let deliver = tokio::spawn(async move {
        tokio::task::yield_now().await;
        load_queue.push(ChunkDelivery::new([id("lazyA")]).module("./a.js", factory));
    });

    runtime
        .import(&[id("lazyA")], &module("./a.js"))
        .await
        .unwrap();
    deliver.await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(reported.load(Ordering::SeqCst), 0);

    let chunks = [id("broken")];
    let entry = module("./broken.js");
    let mut failing = Box::pin(runtime.import(&chunks, &entry));
    assert!(futures_util::poll!(&mut failing).is_pending());

    host.last_request(&id("broken"))
        .completion
        .complete(ResourceEvent::Error);
    assert!(failing.await.is_err());
    assert_eq!(reported.load(Ordering::SeqCst), 1);
}

#[test]
fn startup_without_deferral_runs_entries_directly() {
    let host = Arc::new(RecordingHost::new());
    let runtime = Runtime::builder(host)
        .entry_deferral(false)
        .build()
        .unwrap();
    let queue = DeliveryQueue::new();
    runtime.install(&queue);

    let (runs, factory) = counter();
    queue.push(ChunkDelivery::new([id("main")]).module("./index.js", factory));
    runtime.startup(vec![DeferredEntry::new("./index.js", [id("main")])]);

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(runtime.deferred_len(), 0);
}

#[test]
fn runtime_for_chunk_follows_config_and_graph() {
    let graph = fixtures::lazy_split();
    let mut config = Config::default_config();
    config.hot.enabled = true;
    config.loading.cross_origin = Some("anonymous".to_string());

    let host = Arc::new(RecordingHost::new());
    let runtime = RuntimeBuilder::for_chunk(host.clone(), &config, &graph, &id("main"))
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(runtime.state(&id("main")), ChunkStateKind::Loaded);

    let _lazy = runtime.ensure_chunk(&id("lazyA"));
    let request = host.last_request(&id("lazyA"));
    assert_eq!(request.address, "/lazyA.aaaa1111.js");
    assert_eq!(request.cross_origin.as_deref(), Some("anonymous"));
    assert_eq!(request.timeout, Duration::from_secs(120));

    config.loading.method = crate::config::LoadingMethod::None;
    assert!(RuntimeBuilder::for_chunk(host, &config, &graph, &id("main")).is_err());
}

#[test]
fn chunk_without_async_children_gets_a_noop_loader() {
    let graph = fixtures::independent_entries();
    assert!(graph.preload_map().is_empty());

    let host = Arc::new(RecordingHost::new());
    let runtime = RuntimeBuilder::for_chunk(host.clone(), &Config::default_config(), &graph, &id("a"))
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(runtime.ensure_chunk(&id("c")).now_or_never(), Some(Ok(())));
    assert_eq!(host.injected(&id("c")), 0);
    assert!(host.hints().is_empty());

    let lazy = RuntimeBuilder::for_chunk(host.clone(), &Config::default_config(), &graph, &id("b"))
        .unwrap()
        .build()
        .unwrap();
    let _c = lazy.ensure_chunk(&id("c"));
    assert_eq!(host.injected(&id("c")), 1);
}

#[test]
fn module_clash_from_a_new_chunk_fails_its_load() {
    let (_host, runtime, queue) = setup();
    let (runs, factory) = counter();

    let a = runtime.ensure_chunk(&id("a"));
    queue.push(ChunkDelivery::new([id("a")]).module("shared", factory));
    assert_eq!(a.now_or_never(), Some(Ok(())));

    let b = runtime.ensure_chunk(&id("b"));
    queue.push(ChunkDelivery::new([id("b")]).module("shared", |_| panic!("second factory won")));

    assert!(matches!(
        b.now_or_never(),
        Some(Err(ChunkLoadError::BuildInvariantViolation { .. }))
    ));
    runtime.execute(&module("shared")).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn second_runtime_forwards_deliveries_to_the_first() {
    let host = Arc::new(RecordingHost::new());
    let queue = DeliveryQueue::new();

    let main = Runtime::builder(host.clone())
        .initial_chunks([id("main")])
        .build()
        .unwrap();
    main.install(&queue);
    let pending = main.ensure_chunk(&id("lazyA"));

    let lazy = Runtime::builder(host)
        .initial_chunks([id("lazyA")])
        .build()
        .unwrap();
    lazy.install(&queue);
    assert_eq!(queue.consumers(), 2);

    let (runs, factory) = counter();
    queue.push(ChunkDelivery::new([id("lazyA")]).module("modA", factory));

    assert_eq!(pending.now_or_never(), Some(Ok(())));
    main.execute(&module("modA")).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(lazy.has_module(&module("modA")));
}

#[test]
fn late_runtime_replays_earlier_deliveries() {
    let host = Arc::new(RecordingHost::new());
    let queue = DeliveryQueue::new();
    let first = Runtime::builder(host.clone()).build().unwrap();
    first.install(&queue);

    queue.push(ChunkDelivery::new([id("one")]).module("./one.js", |_| {}));

    let second = Runtime::builder(host).build().unwrap();
    second.install(&queue);
    second.install(&queue);

    assert_eq!(queue.consumers(), 2);
    assert_eq!(second.state(&id("one")), ChunkStateKind::Loaded);
    assert!(second.has_module(&module("./one.js")));
}
