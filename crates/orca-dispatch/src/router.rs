use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use orca_taxonomy::TaxonomyRegistry;

use crate::bus::BusEvent;
use crate::dispatcher::{ActionDispatcher, ActionHandler, DispatchOutcome};

/// Dispatchers for every domain hosted by one process.
pub struct DispatchRouter {
    registry: Arc<TaxonomyRegistry>,
    dispatchers: DashMap<String, Arc<ActionDispatcher>>,
}

impl DispatchRouter {
    pub fn new(registry: Arc<TaxonomyRegistry>) -> Self {
        Self {
            registry,
            dispatchers: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<TaxonomyRegistry> {
        &self.registry
    }

    /// Dispatcher for `domain`, created on first use.
    pub fn dispatcher(&self, domain: &str) -> Arc<ActionDispatcher> {
        self.dispatchers
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(ActionDispatcher::new(domain, self.registry.clone())))
            .value()
            .clone()
    }

    pub fn register_handler(&self, domain: &str, action: &str, handler: Arc<dyn ActionHandler>) {
        self.dispatcher(domain).register_handler(action, handler);
    }

    pub async fn dispatch(&self, domain: &str, event: &BusEvent) -> DispatchOutcome {
        let dispatcher = self.dispatchers.get(domain).map(|d| d.value().clone());
        match dispatcher {
            Some(dispatcher) => dispatcher.dispatch(event).await,
            None => {
                debug!(domain = %domain, event_type = %event.event_type, "No dispatcher for domain");
                DispatchOutcome::NoHandler
            }
        }
    }

    /// Hosted domains, sorted.
    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.dispatchers.iter().map(|e| e.key().clone()).collect();
        domains.sort();
        domains
    }

    pub fn dispatchers(&self) -> Vec<Arc<ActionDispatcher>> {
        self.dispatchers.iter().map(|e| e.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::handler_fn;
    use orca_ledger::Metadata;
    use orca_taxonomy::StaticRegistrationSource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_same_action_in_two_domains() {
        let registry = Arc::new(TaxonomyRegistry::new(Arc::new(StaticRegistrationSource::new(Vec::<String>::new()))));
        let router = DispatchRouter::new(registry);
        let content_calls = Arc::new(AtomicUsize::new(0));
        let media_calls = Arc::new(AtomicUsize::new(0));

        for (domain, calls) in [("content", content_calls.clone()), ("media", media_calls.clone())] {
            router.register_handler(
                domain,
                "archive",
                handler_fn(move |_e| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            );
        }

        let event = BusEvent::new("media:archive:v1:requested", "m-1", Metadata::new());
        assert_eq!(router.dispatch("media", &event).await, DispatchOutcome::Invoked);
        assert_eq!(router.dispatch("content", &event).await, DispatchOutcome::PrefixMismatch);
        assert_eq!(router.dispatch("search", &event).await, DispatchOutcome::NoHandler);

        assert_eq!(media_calls.load(Ordering::SeqCst), 1);
        assert_eq!(content_calls.load(Ordering::SeqCst), 0);
        assert_eq!(router.domains(), vec!["content", "media"]);
    }
}
