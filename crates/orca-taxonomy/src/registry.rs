//! Taxonomy Registry
//!
//! Built lazily from a [`RegistrationSource`] on first use, then frozen for the
//! lifetime of the registry. Picking up taxonomy changes requires a new
//! process (or a new registry instance).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::name::{validate_event_type, CanonicalEventName};
use crate::source::RegistrationSource;
use crate::{Result, TaxonomyError};

#[derive(Debug, Default)]
struct DomainTaxonomy {
    names: Vec<CanonicalEventName>,
    by_action_state: HashMap<(String, String), usize>,
}

impl DomainTaxonomy {
    fn insert(&mut self, name: CanonicalEventName) {
        let key = (name.action().to_string(), name.state().to_string());
        if self.by_action_state.contains_key(&key) {
            return;
        }
        self.by_action_state.insert(key, self.names.len());
        self.names.push(name);
    }
}

#[derive(Debug, Default)]
struct TaxonomyIndex {
    domains: BTreeMap<String, DomainTaxonomy>,
    skipped: usize,
}

pub struct TaxonomyRegistry {
    source: Arc<dyn RegistrationSource>,
    index: OnceCell<TaxonomyIndex>,
}

impl TaxonomyRegistry {
    pub fn new(source: Arc<dyn RegistrationSource>) -> Self {
        Self {
            source,
            index: OnceCell::new(),
        }
    }

    /// Build the index now. Composition roots call this at startup so a broken
    /// registration source fails the process instead of the first dispatch.
    pub async fn ensure_built(&self) -> Result<()> {
        self.index().await.map(|_| ())
    }

    pub fn is_built(&self) -> bool {
        self.index.initialized()
    }

    async fn index(&self) -> Result<&TaxonomyIndex> {
        self.index
            .get_or_try_init(|| async { build_index(self.source.as_ref()) })
            .await
    }

    /// All canonical names registered for `domain`, in registration order.
    pub async fn load(&self, domain: &str) -> Result<Vec<CanonicalEventName>> {
        let index = self.index().await?;
        Ok(index
            .domains
            .get(domain)
            .map(|d| d.names.clone())
            .unwrap_or_default())
    }

    /// Fails closed: unknown `(action, state)` pairs are `NotFound`.
    pub async fn lookup(&self, domain: &str, action: &str, state: &str) -> Result<CanonicalEventName> {
        let index = self.index().await?;
        index
            .domains
            .get(domain)
            .and_then(|d| {
                d.by_action_state
                    .get(&(action.to_string(), state.to_string()))
                    .and_then(|&i| d.names.get(i))
            })
            .cloned()
            .ok_or_else(|| TaxonomyError::NotFound {
                domain: domain.to_string(),
                action: action.to_string(),
                state: state.to_string(),
            })
    }

    pub async fn contains(&self, name: &CanonicalEventName) -> Result<bool> {
        match self.lookup(name.domain(), name.action(), name.state()).await {
            Ok(found) => Ok(found == *name),
            Err(TaxonomyError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Registered domains, sorted.
    pub async fn domains(&self) -> Result<Vec<String>> {
        Ok(self.index().await?.domains.keys().cloned().collect())
    }

    /// Distinct actions for a domain, in registration order.
    pub async fn actions(&self, domain: &str) -> Result<Vec<String>> {
        let mut actions: Vec<String> = Vec::new();
        for name in self.load(domain).await? {
            if !actions.iter().any(|a| a == name.action()) {
                actions.push(name.action().to_string());
            }
        }
        Ok(actions)
    }
}

fn build_index(source: &dyn RegistrationSource) -> Result<TaxonomyIndex> {
    let raw_names = source.load_all()?;
    let mut index = TaxonomyIndex::default();

    for raw in raw_names {
        if let Err(e) = validate_event_type(&raw) {
            warn!(event_type = %raw, error = %e, "Skipping invalid canonical event name");
            index.skipped += 1;
            continue;
        }
        let name = CanonicalEventName::parse(&raw)?;
        index
            .domains
            .entry(name.domain().to_string())
            .or_default()
            .insert(name);
    }

    info!(
        source = %source.describe(),
        domains = index.domains.len(),
        names = index.domains.values().map(|d| d.names.len()).sum::<usize>(),
        skipped = index.skipped,
        "Event taxonomy built"
    );
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StaticRegistrationSource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry(names: &[&str]) -> TaxonomyRegistry {
        TaxonomyRegistry::new(Arc::new(StaticRegistrationSource::new(names.iter().copied())))
    }

    struct CountingSource {
        calls: AtomicUsize,
    }

    impl RegistrationSource for CountingSource {
        fn load_all(&self) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["content:create_content:v1:requested".to_string()])
        }

        fn describe(&self) -> String {
            "counting".to_string()
        }
    }

    #[tokio::test]
    async fn test_lookup_registered_name() {
        let registry = registry(&[
            "content:create_content:v1:requested",
            "content:create_content:v1:success",
        ]);

        let name = registry.lookup("content", "create_content", "success").await.unwrap();
        assert_eq!(name.to_string(), "content:create_content:v1:success");
    }

    #[test]
    fn test_lookup_fails_closed() {
        let registry = registry(&["content:create_content:v1:requested"]);

        let err = tokio_test::assert_err!(tokio_test::block_on(registry.lookup("content", "create_content", "failed")));
        assert!(matches!(err, TaxonomyError::NotFound { .. }));
        let err = tokio_test::assert_err!(tokio_test::block_on(registry.lookup("media", "create_content", "requested")));
        assert!(matches!(err, TaxonomyError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_load_is_per_domain() {
        let registry = registry(&[
            "content:create_content:v1:requested",
            "security:audit:v1:requested",
            "security:audit:v1:success",
        ]);

        assert_eq!(registry.load("security").await.unwrap().len(), 2);
        assert_eq!(registry.load("content").await.unwrap().len(), 1);
        assert!(registry.load("unknown").await.unwrap().is_empty());
        assert_eq!(registry.domains().await.unwrap(), vec!["content", "security"]);
        assert_eq!(registry.actions("security").await.unwrap(), vec!["audit"]);
    }

    #[tokio::test]
    async fn test_invalid_names_are_skipped() {
        let registry = registry(&["content:create_content:v1:requested", "not-an-event", "content:x:v1:bogus"]);
        assert_eq!(registry.load("content").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_built_once() {
        let source = Arc::new(CountingSource { calls: AtomicUsize::new(0) });
        let registry = TaxonomyRegistry::new(source.clone());
        assert!(!registry.is_built());

        registry.ensure_built().await.unwrap();
        registry.load("content").await.unwrap();
        registry.lookup("content", "create_content", "requested").await.unwrap();

        assert!(registry.is_built());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_contains() {
        let registry = registry(&["content:create_content:v1:requested"]);
        let known = CanonicalEventName::parse("content:create_content:v1:requested").unwrap();
        let other_version = CanonicalEventName::parse("content:create_content:v2:requested").unwrap();
        assert!(registry.contains(&known).await.unwrap());
        assert!(!registry.contains(&other_version).await.unwrap());
    }
}
