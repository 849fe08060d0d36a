//! Unit tests for the membership registry
//!
//! Covers snapshot consistency, idempotent unregistration, watch
//! renewal, and caller-error surfacing.

use std::sync::Arc;
use std::time::Duration;

use flock_core::cluster::MembershipRegistry;
use flock_core::error::FlockError;
use flock_core::store::{MemorySession, MemoryStore};

fn worker_registry(session: &Arc<MemorySession>) -> MembershipRegistry {
    MembershipRegistry::new(session.clone())
}

#[tokio::test]
async fn test_snapshot_matches_live_registrations() {
    let store = MemoryStore::new();
    let sessions: Vec<_> = (0..3).map(|_| store.session()).collect();
    let addresses = ["http://a:8080", "http://b:8080", "http://c:8080"];

    let mut workers = Vec::new();
    for (session, address) in sessions.iter().zip(addresses) {
        let registry = worker_registry(session);
        registry.ensure_namespace().await.unwrap();
        registry.register_self(address).await.unwrap();
        workers.push(registry);
    }

    let leader_session = store.session();
    let leader = worker_registry(&leader_session);
    leader.ensure_namespace().await.unwrap();
    let _watch = leader.refresh().await.unwrap();

    let snapshot = leader.current_snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 3);
    assert_eq!(
        snapshot.addresses(),
        vec!["http://a:8080", "http://b:8080", "http://c:8080"]
    );

    // Kill B; the next refresh must drop exactly that entry.
    sessions[1].expire();
    let _watch = leader.refresh().await.unwrap();
    let snapshot = leader.current_snapshot().await.unwrap();
    assert_eq!(snapshot.addresses(), vec!["http://a:8080", "http://c:8080"]);
}

#[tokio::test]
async fn test_unregister_is_idempotent() {
    let store = MemoryStore::new();
    let session = store.session();
    let registry = worker_registry(&session);
    registry.ensure_namespace().await.unwrap();

    // Never registered: no error.
    registry.unregister_self().await.unwrap();

    registry.register_self("http://a:8080").await.unwrap();
    registry.unregister_self().await.unwrap();
    registry.unregister_self().await.unwrap();
    assert!(!registry.is_registered().await.unwrap());
}

#[tokio::test]
async fn test_unregister_after_session_loss_is_noop() {
    let store = MemoryStore::new();
    let session = store.session();
    let registry = worker_registry(&session);
    registry.ensure_namespace().await.unwrap();
    registry.register_self("http://a:8080").await.unwrap();

    session.expire();
    registry.unregister_self().await.unwrap();
}

#[tokio::test]
async fn test_double_registration_is_caller_error() {
    let store = MemoryStore::new();
    let session = store.session();
    let registry = worker_registry(&session);
    registry.ensure_namespace().await.unwrap();

    registry.register_self("http://a:8080").await.unwrap();
    let err = registry.register_self("http://a:8080").await.unwrap_err();
    assert!(matches!(err, FlockError::AlreadyRegistered { .. }));
    assert!(err.is_caller_error());
}

#[tokio::test]
async fn test_refresh_before_namespace_is_caller_error() {
    let store = MemoryStore::new();
    let session = store.session();
    let registry = worker_registry(&session);

    let err = registry.refresh().await.unwrap_err();
    assert!(matches!(err, FlockError::NamespaceMissing { .. }));
    let err = registry.register_self("http://a:8080").await.unwrap_err();
    assert!(matches!(err, FlockError::NamespaceMissing { .. }));
}

#[tokio::test]
async fn test_current_snapshot_takes_initial_refresh() {
    let store = MemoryStore::new();
    let worker_session = store.session();
    let worker = worker_registry(&worker_session);
    worker.ensure_namespace().await.unwrap();
    worker.register_self("http://a:8080").await.unwrap();

    let reader_session = store.session();
    let reader = worker_registry(&reader_session);
    reader.ensure_namespace().await.unwrap();

    // No explicit refresh has run on the reader.
    let snapshot = reader.current_snapshot().await.unwrap();
    assert_eq!(snapshot.version(), 1);
    assert_eq!(snapshot.addresses(), vec!["http://a:8080"]);
}

#[tokio::test]
async fn test_children_watch_rearms_per_refresh() {
    let store = MemoryStore::new();
    let reader_session = store.session();
    let reader = worker_registry(&reader_session);
    reader.ensure_namespace().await.unwrap();

    let watch = reader.refresh().await.unwrap();
    let version_before = reader.current_snapshot().await.unwrap().version();

    let worker_session = store.session();
    let worker = worker_registry(&worker_session);
    worker.ensure_namespace().await.unwrap();
    worker.register_self("http://a:8080").await.unwrap();

    tokio::time::timeout(Duration::from_secs(1), watch)
        .await
        .expect("children watch must fire on registration")
        .unwrap();

    let rearmed = reader.refresh().await.unwrap();
    let snapshot = reader.current_snapshot().await.unwrap();
    assert_eq!(snapshot.version(), version_before + 1);
    assert_eq!(snapshot.addresses(), vec!["http://a:8080"]);

    // The renewed watch covers the next change.
    worker.unregister_self().await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), rearmed)
        .await
        .expect("renewed watch must fire on unregistration")
        .unwrap();
}
