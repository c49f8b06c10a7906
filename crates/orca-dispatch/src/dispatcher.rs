//! Action Dispatcher
//!
//! Maps an inbound bus event to the handler registered for its action:
//! 1. Parse `domain:action:version:state`; malformed names are dropped
//! 2. Every handler is wrapped in [`RequestedOnly`] when it is registered
//! 3. Look up the wrapped handler for `action`; unknown actions are dropped
//! 4. Require the event type to start with `<domain>:<action>:`
//! 5. Invoke the wrapper, which calls the handler only for `requested` events
//!
//! A domain emits `success`/`failed` for the requests it handles, so the
//! `requested`-only rule is what keeps a domain from re-triggering itself.
//! Handler errors and panics are logged and never reach the caller.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use tracing::{debug, error, warn};

use orca_common::STATE_REQUESTED;
use orca_taxonomy::{parse_action_and_state, CanonicalEventName, TaxonomyRegistry};

use crate::bus::BusEvent;
use crate::{DispatchError, Result};

#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, event: &BusEvent) -> Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F>
where
    F: Fn(BusEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, event: &BusEvent) -> Result<()> {
        (self.0)(event.clone()).await
    }
}

/// Wrap an async closure taking an owned event as a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ActionHandler>
where
    F: Fn(BusEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Guard applied to every registered handler: anything other than a
/// `requested` event is ignored.
#[derive(Clone)]
pub struct RequestedOnly {
    inner: Arc<dyn ActionHandler>,
}

impl RequestedOnly {
    pub fn new(inner: Arc<dyn ActionHandler>) -> Self {
        Self { inner }
    }

    /// `None` when the event was filtered out.
    pub async fn call(&self, state: &str, event: &BusEvent) -> Option<Result<()>> {
        if state != STATE_REQUESTED {
            return None;
        }
        Some(self.inner.handle(event).await)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Invoked,
    Failed(String),
    Panicked,
    /// Not a `requested` event.
    Filtered,
    NoHandler,
    /// The event type does not start with `<domain>:<action>:`.
    PrefixMismatch,
    Malformed,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invoked => "invoked",
            Self::Failed(_) => "failed",
            Self::Panicked => "panicked",
            Self::Filtered => "filtered",
            Self::NoHandler => "no_handler",
            Self::PrefixMismatch => "prefix_mismatch",
            Self::Malformed => "malformed",
        }
    }

    pub fn invoked_handler(&self) -> bool {
        matches!(self, Self::Invoked | Self::Failed(_) | Self::Panicked)
    }
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-domain dispatcher.
pub struct ActionDispatcher {
    domain: String,
    handlers: DashMap<String, RequestedOnly>,
    registry: Arc<TaxonomyRegistry>,
}

impl ActionDispatcher {
    pub fn new(domain: impl Into<String>, registry: Arc<TaxonomyRegistry>) -> Self {
        Self {
            domain: domain.into(),
            handlers: DashMap::new(),
            registry,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Register (or replace) the handler for `action`.
    pub fn register_handler(&self, action: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        let action = action.into();
        debug!(domain = %self.domain, action = %action, "Handler registered");
        if self.handlers.insert(action.clone(), RequestedOnly::new(handler)).is_some() {
            warn!(domain = %self.domain, action = %action, "Handler replaced");
        }
    }

    pub fn has_handler(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    pub fn actions(&self) -> Vec<String> {
        let mut actions: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        actions.sort();
        actions
    }

    /// Canonical event names this domain listens to.
    pub async fn subscriptions(&self) -> Result<Vec<CanonicalEventName>> {
        Ok(self.registry.load(&self.domain).await?)
    }

    /// Registered actions that are missing from the taxonomy.
    pub async fn unregistered_actions(&self) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for action in self.actions() {
            match self.registry.lookup(&self.domain, &action, STATE_REQUESTED).await {
                Ok(_) => {}
                Err(orca_taxonomy::TaxonomyError::NotFound { .. }) => missing.push(action),
                Err(e) => return Err(DispatchError::from(e)),
            }
        }
        Ok(missing)
    }

    /// Route one event. Never fails; the outcome is for logging and tests.
    pub async fn dispatch(&self, event: &BusEvent) -> DispatchOutcome {
        let outcome = self.route(event).await;
        metrics::counter!(
            "orca_dispatch_total",
            "domain" => self.domain.clone(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        outcome
    }

    async fn route(&self, event: &BusEvent) -> DispatchOutcome {
        let Some((action, state)) = parse_action_and_state(&event.event_type) else {
            warn!(domain = %self.domain, event_type = %event.event_type, "Dropping malformed event type");
            return DispatchOutcome::Malformed;
        };

        // Clone out of the map so no shard lock is held across the handler call.
        let Some(handler) = self.handlers.get(&action).map(|h| h.value().clone()) else {
            debug!(domain = %self.domain, action = %action, event_type = %event.event_type, "No handler for action");
            return DispatchOutcome::NoHandler;
        };

        let prefix = format!("{}:{}:", self.domain, action);
        if !event.event_type.starts_with(&prefix) {
            warn!(
                domain = %self.domain,
                action = %action,
                event_type = %event.event_type,
                "Event type does not belong to this domain, ignoring"
            );
            return DispatchOutcome::PrefixMismatch;
        }

        let invocation = AssertUnwindSafe(handler.call(&state, event)).catch_unwind().await;
        match invocation {
            Ok(None) => DispatchOutcome::Filtered,
            Ok(Some(Ok(()))) => {
                debug!(domain = %self.domain, action = %action, event_id = %event.id, "Handler completed");
                DispatchOutcome::Invoked
            }
            Ok(Some(Err(e))) => {
                error!(
                    domain = %self.domain,
                    action = %action,
                    event_type = %event.event_type,
                    error = %e,
                    "Handler failed"
                );
                DispatchOutcome::Failed(e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    domain = %self.domain,
                    action = %action,
                    event_type = %event.event_type,
                    panic = %message,
                    "Handler panicked"
                );
                DispatchOutcome::Panicked
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orca_ledger::Metadata;
    use orca_taxonomy::StaticRegistrationSource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry() -> Arc<TaxonomyRegistry> {
        Arc::new(TaxonomyRegistry::new(Arc::new(StaticRegistrationSource::new([
            "content:create_content:v1:requested",
            "content:create_content:v1:success",
        ]))))
    }

    fn counting_handler(calls: Arc<AtomicUsize>) -> Arc<dyn ActionHandler> {
        handler_fn(move |_event| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    fn event(event_type: &str) -> BusEvent {
        BusEvent::new(event_type, "c-1", Metadata::new())
    }

    #[tokio::test]
    async fn test_requested_fires_success_does_not() {
        let dispatcher = ActionDispatcher::new("content", registry());
        let calls = Arc::new(AtomicUsize::new(0));
        dispatcher.register_handler("create_content", counting_handler(calls.clone()));

        let first = dispatcher.dispatch(&event("content:create_content:v1:requested")).await;
        let second = dispatcher.dispatch(&event("content:create_content:v1:success")).await;

        assert_eq!(first, DispatchOutcome::Invoked);
        assert_eq!(second, DispatchOutcome::Filtered);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_requested_states_never_invoke() {
        let dispatcher = ActionDispatcher::new("content", registry());
        let calls = Arc::new(AtomicUsize::new(0));
        dispatcher.register_handler("create_content", counting_handler(calls.clone()));

        for state in ["request", "started", "success", "failed", "completed", "cancelled", "timeout"] {
            let outcome = dispatcher
                .dispatch(&event(&format!("content:create_content:v1:{}", state)))
                .await;
            assert!(!outcome.invoked_handler(), "state {} invoked the handler", state);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_and_unknown() {
        let dispatcher = ActionDispatcher::new("content", registry());
        assert_eq!(dispatcher.dispatch(&event("content:create_content")).await, DispatchOutcome::Malformed);
        assert_eq!(
            dispatcher.dispatch(&event("content:delete_content:v1:requested")).await,
            DispatchOutcome::NoHandler
        );
    }

    #[tokio::test]
    async fn test_prefix_guard_blocks_other_domains() {
        let dispatcher = ActionDispatcher::new("content", registry());
        let calls = Arc::new(AtomicUsize::new(0));
        dispatcher.register_handler("create_content", counting_handler(calls.clone()));

        let outcome = dispatcher.dispatch(&event("media:create_content:v1:requested")).await;
        assert_eq!(outcome, DispatchOutcome::PrefixMismatch);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_checks_run_before_the_state_guard() {
        let dispatcher = ActionDispatcher::new("content", registry());
        let calls = Arc::new(AtomicUsize::new(0));
        dispatcher.register_handler("create_content", counting_handler(calls.clone()));

        // A non-requested state is still reported by the earlier step that rejects it.
        assert_eq!(dispatcher.dispatch(&event("content:create_content")).await, DispatchOutcome::Malformed);
        assert_eq!(
            dispatcher.dispatch(&event("content:delete_content:v1:success")).await,
            DispatchOutcome::NoHandler
        );
        assert_eq!(
            dispatcher.dispatch(&event("media:create_content:v1:success")).await,
            DispatchOutcome::PrefixMismatch
        );
        assert_eq!(
            dispatcher.dispatch(&event("content:create_content:v1:success")).await,
            DispatchOutcome::Filtered
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handler_errors_and_panics_are_contained() {
        let dispatcher = ActionDispatcher::new("content", registry());
        dispatcher.register_handler(
            "create_content",
            handler_fn(|_event| async { Err(DispatchError::handler("validation failed")) }),
        );
        dispatcher.register_handler(
            "explode",
            handler_fn(|event: BusEvent| async move {
                if !event.id.is_empty() {
                    panic!("boom");
                }
                Ok(())
            }),
        );

        let failed = dispatcher.dispatch(&event("content:create_content:v1:requested")).await;
        assert!(matches!(failed, DispatchOutcome::Failed(msg) if msg.contains("validation failed")));

        let panicked = dispatcher.dispatch(&event("content:explode:v1:requested")).await;
        assert_eq!(panicked, DispatchOutcome::Panicked);
    }

    #[tokio::test]
    async fn test_subscriptions_come_from_taxonomy() {
        let dispatcher = ActionDispatcher::new("content", registry());
        dispatcher.register_handler("create_content", handler_fn(|_e| async { Ok(()) }));
        dispatcher.register_handler("archive_content", handler_fn(|_e| async { Ok(()) }));

        assert_eq!(dispatcher.subscriptions().await.unwrap().len(), 2);
        assert_eq!(dispatcher.unregistered_actions().await.unwrap(), vec!["archive_content"]);
    }

    #[tokio::test]
    async fn test_requested_only_wrapper() {
        let calls = Arc::new(AtomicUsize::new(0));
        let wrapped = RequestedOnly::new(counting_handler(calls.clone()));
        let e = event("content:create_content:v1:requested");

        assert!(wrapped.call("success", &e).await.is_none());
        assert!(wrapped.call("requested", &e).await.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
