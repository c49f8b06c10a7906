//! Registry built from a service registration file on disk.

use std::io::Write;
use std::sync::Arc;

use orca_taxonomy::{
    parse_action_and_state, CanonicalEventName, JsonRegistrationSource, TaxonomyError, TaxonomyRegistry,
};

const REGISTRATION: &str = r#"[
    {
        "name": "content",
        "version": "v1",
        "endpoints": [{ "path": "/api/content", "actions": ["create_content", "update_content"] }]
    },
    {
        "name": "scheduler",
        "version": "1",
        "endpoints": [{ "actions": ["create_job", "run_job"] }]
    }
]"#;

fn registry_from_file() -> (tempfile::NamedTempFile, TaxonomyRegistry) {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(REGISTRATION.as_bytes()).unwrap();
    let source = JsonRegistrationSource::from_path(file.path());
    (file, TaxonomyRegistry::new(Arc::new(source)))
}

#[tokio::test]
async fn test_registry_from_registration_file() {
    let (_file, registry) = registry_from_file();
    registry.ensure_built().await.unwrap();

    let scheduler = registry.load("scheduler").await.unwrap();
    assert_eq!(scheduler.len(), 10);
    assert!(scheduler.iter().all(|n| n.version() == "v1"));

    let name = registry.lookup("scheduler", "run_job", "requested").await.unwrap();
    assert_eq!(name.to_string(), "scheduler:run_job:v1:requested");

    // `cancelled` is a valid state but never generated from registrations
    let missing = registry.lookup("content", "create_content", "cancelled").await;
    assert!(matches!(missing, Err(TaxonomyError::NotFound { .. })));
}

#[tokio::test]
async fn test_every_registered_name_parses_back() {
    let (_file, registry) = registry_from_file();

    for domain in registry.domains().await.unwrap() {
        for name in registry.load(&domain).await.unwrap() {
            let formatted = CanonicalEventName::format(name.domain(), name.action(), name.version(), name.state()).unwrap();
            let (action, state) = parse_action_and_state(&formatted.to_string()).unwrap();
            assert_eq!(action, name.action());
            assert_eq!(state, name.state());
        }
    }
}

#[tokio::test]
async fn test_broken_file_fails_build() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"[{\"name\": 42}]").unwrap();
    let registry = TaxonomyRegistry::new(Arc::new(JsonRegistrationSource::from_path(file.path())));

    assert!(matches!(registry.ensure_built().await, Err(TaxonomyError::Source(_))));
    assert!(!registry.is_built());
}
