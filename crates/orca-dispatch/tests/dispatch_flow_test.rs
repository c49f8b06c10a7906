//! Bus -> listener -> dispatcher flow with a handler that reacts to its own
//! request by publishing the matching `success` event.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use orca_dispatch::{handler_fn, BusEvent, BusListener, DispatchRouter, EventBus, InMemoryEventBus};
use orca_ledger::{automate_orchestration, details, extract_trace};
use orca_taxonomy::{StaticRegistrationSource, TaxonomyRegistry};
use serde_json::json;

fn registry() -> Arc<TaxonomyRegistry> {
    Arc::new(TaxonomyRegistry::new(Arc::new(StaticRegistrationSource::new([
        "content:create_content:v1:requested",
        "content:create_content:v1:success",
        "content:create_content:v1:failed",
    ]))))
}

async fn wait_for(counter: &AtomicUsize, expected: usize) {
    for _ in 0..100 {
        if counter.load(Ordering::SeqCst) >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_handler_success_event_does_not_retrigger() {
    let bus: Arc<InMemoryEventBus> = Arc::new(InMemoryEventBus::default());
    let router = DispatchRouter::new(registry());
    let calls = Arc::new(AtomicUsize::new(0));
    let successes = Arc::new(AtomicUsize::new(0));

    {
        let bus = bus.clone();
        let calls = calls.clone();
        router.register_handler(
            "content",
            "create_content",
            handler_fn(move |event: BusEvent| {
                let bus = bus.clone();
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    bus.publish("content:create_content:v1:success", &event.id, event.metadata)
                        .await
                }
            }),
        );
    }

    // Observer for the emitted success events.
    let mut observer = bus
        .subscribe(&["content:create_content:v1:success".to_string()], None)
        .await
        .unwrap();
    let observed = {
        let successes = successes.clone();
        tokio::spawn(async move {
            while let Some(event) = observer.next().await {
                assert_eq!(event.id, "c-1");
                successes.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    let listener = BusListener::start(bus.clone(), &router).await.unwrap();
    assert_eq!(listener.domains(), vec!["content"]);

    let meta = automate_orchestration(
        "content",
        "create_content",
        details([("title", json!("Hello"))]),
        "pending",
    );
    bus.publish("content:create_content:v1:requested", "c-1", meta).await.unwrap();

    wait_for(&successes, 1).await;
    // Leave time for a (wrong) second invocation to show up.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(successes.load(Ordering::SeqCst), 1);

    listener.shutdown().await;
    observed.abort();
}

#[tokio::test]
async fn test_handler_receives_envelope() {
    let bus = Arc::new(InMemoryEventBus::default());
    let router = DispatchRouter::new(registry());
    let seen = Arc::new(AtomicUsize::new(0));

    {
        let seen = seen.clone();
        router.register_handler(
            "content",
            "create_content",
            handler_fn(move |event: BusEvent| {
                let seen = seen.clone();
                async move {
                    let trace = extract_trace(&event.metadata, "content");
                    assert_eq!(trace.len(), 1);
                    assert_eq!(trace[0].action, "create_content");
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );
    }

    let listener = BusListener::start(bus.clone(), &router).await.unwrap();
    let meta = automate_orchestration("content", "create_content", serde_json::Map::new(), "pending");
    bus.publish("content:create_content:v1:requested", "c-2", meta).await.unwrap();

    wait_for(&seen, 1).await;
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    listener.shutdown().await;
}

#[tokio::test]
async fn test_domain_without_taxonomy_entries_is_not_subscribed() {
    let bus = Arc::new(InMemoryEventBus::default());
    let router = DispatchRouter::new(registry());
    router.register_handler("media", "upload", handler_fn(|_e| async { Ok(()) }));

    let listener = BusListener::start(bus.clone(), &router).await.unwrap();
    assert!(listener.domains().is_empty());
    assert_eq!(bus.subscriber_count(), 0);
    listener.shutdown().await;
}
