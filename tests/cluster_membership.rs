//! Cluster id acquisition through the node store

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::virtual_clock;
use revstore::backend::{Collection, DocumentStore, MemoryDocumentStore};
use revstore::cluster::{ClusterView, LEASE_END};
use revstore::revision::{Clock, VirtualClock};
use revstore::{DocumentNodeStore, StoreError};

fn build(
    backend: &Arc<MemoryDocumentStore>,
    clock: &Arc<VirtualClock>,
    cluster_id: Option<u32>,
) -> Result<DocumentNodeStore, StoreError> {
    let mut builder = DocumentNodeStore::builder()
        .backend(backend.clone())
        .clock(clock.clone())
        .async_delay(Duration::ZERO)
        .lease_duration(Duration::from_secs(60));
    if let Some(id) = cluster_id {
        builder = builder.cluster_id(id);
    }
    builder.build()
}

/// Ids are handed out lowest first.
#[test]
fn test_ids_allocated_in_order() {
    let backend = Arc::new(MemoryDocumentStore::new());
    let clock = virtual_clock();
    let ns1 = build(&backend, &clock, None).unwrap();
    let ns2 = build(&backend, &clock, None).unwrap();
    let ns3 = build(&backend, &clock, None).unwrap();
    assert_eq!(
        (ns1.cluster_id(), ns2.cluster_id(), ns3.cluster_id()),
        (1, 2, 3)
    );

    let view = ClusterView::read(&*backend).unwrap();
    assert_eq!(view.active_ids(clock.now_millis()), vec![1, 2, 3]);
}

#[test]
fn test_requested_id_in_use_rejected() {
    let backend = Arc::new(MemoryDocumentStore::new());
    let clock = virtual_clock();
    let _owner = build(&backend, &clock, Some(5)).unwrap();
    let err = build(&backend, &clock, Some(5)).unwrap_err();
    assert_eq!(err, StoreError::ClusterIdInUse(5));
}

#[test]
fn test_disposed_id_reused() {
    let backend = Arc::new(MemoryDocumentStore::new());
    let clock = virtual_clock();
    let ns1 = build(&backend, &clock, None).unwrap();
    let ns2 = build(&backend, &clock, None).unwrap();
    ns1.dispose().unwrap();

    let doc = backend.find(Collection::ClusterNodes, "1").unwrap().unwrap();
    assert_eq!(doc.get(LEASE_END).and_then(|v| v.as_u64()), Some(0));

    let ns3 = build(&backend, &clock, None).unwrap();
    assert_eq!(ns3.cluster_id(), 1);
    assert_eq!(ns2.cluster_id(), 2);
}

/// A member that stops renewing loses its id once the lease ends.
#[test]
fn test_expired_lease_frees_id() {
    let backend = Arc::new(MemoryDocumentStore::new());
    let clock = virtual_clock();
    let crashed = build(&backend, &clock, Some(7)).unwrap();
    // dropped without dispose: the lease is left to expire
    drop(crashed);

    clock.advance(Duration::from_secs(30));
    assert!(build(&backend, &clock, Some(7)).is_err());

    clock.advance(Duration::from_secs(31));
    let taken_over = build(&backend, &clock, Some(7)).unwrap();
    assert_eq!(taken_over.cluster_id(), 7);
}

/// Background operations renew the lease once half of it has passed.
#[test]
fn test_background_operations_renew_lease() {
    let backend = Arc::new(MemoryDocumentStore::new());
    let clock = virtual_clock();
    let ns = build(&backend, &clock, Some(1)).unwrap();
    let lease_end = |backend: &MemoryDocumentStore| {
        backend
            .find(Collection::ClusterNodes, "1")
            .unwrap()
            .and_then(|doc| doc.get(LEASE_END).and_then(|v| v.as_u64()))
            .unwrap()
    };
    let initial = lease_end(&backend);

    clock.advance(Duration::from_secs(10));
    ns.run_background_operations().unwrap();
    assert_eq!(lease_end(&backend), initial);

    clock.advance(Duration::from_secs(25));
    ns.run_background_operations().unwrap();
    assert_eq!(lease_end(&backend), clock.now_millis() + 60_000);
}
