//! Structural compare of node states

use std::sync::Arc;
use std::time::Duration;

use revstore::backend::MemoryDocumentStore;
use revstore::diff::{AmnesiaDiffCache, JsopDiff, MemoryDiffCache, NodeStateComparator};
use revstore::revision::VirtualClock;
use revstore::DocumentNodeStore;

const MANY_CHILDREN: usize = 50;

/// A change below `/node` made after a change by another member is still
/// reported, with no cached diff to fall back on.
#[test]
fn test_modified_child_reported_without_diff_cache() {
    let backend = Arc::new(MemoryDocumentStore::new());
    let clock = Arc::new(VirtualClock::new(1_700_000_000_000));
    let ns1 = DocumentNodeStore::builder()
        .backend(backend.clone())
        .clock(clock.clone())
        .cluster_id(1)
        .async_delay(Duration::ZERO)
        .diff_cache(Arc::new(AmnesiaDiffCache))
        .build()
        .unwrap();

    let mut builder = ns1.get_root().unwrap().builder();
    builder.add_node("/node").unwrap();
    for i in 0..MANY_CHILDREN {
        builder.add_node(&format!("/node/node-{}", i)).unwrap();
    }
    ns1.merge(&builder).unwrap();
    ns1.run_background_operations().unwrap();

    let ns2 = DocumentNodeStore::builder()
        .backend(backend.clone())
        .clock(clock.clone())
        .cluster_id(2)
        .async_delay(Duration::ZERO)
        .build()
        .unwrap();
    let mut builder = ns2.get_root().unwrap().builder();
    builder.add_node("/node/child-a").unwrap();
    ns2.merge(&builder).unwrap();

    clock.advance(Duration::from_secs(61));

    let mut builder = ns1.get_root().unwrap().builder();
    builder.add_node("/node/child-b").unwrap();
    ns1.merge(&builder).unwrap();
    let root1 = ns1.get_root().unwrap();

    let mut builder = root1.builder();
    builder.add_node("/node/child-c").unwrap();
    ns1.merge(&builder).unwrap();
    let root2 = ns1.get_root().unwrap();

    ns1.run_background_operations().unwrap();
    ns2.run_background_operations().unwrap();

    let mut diff = JsopDiff::new("", 0);
    assert!(ns1.compare(&root2, &root1, &mut diff).unwrap());
    assert_eq!(diff.to_string(), "^\"node\":{}");

    ns1.dispose().unwrap();
    ns2.dispose().unwrap();
}

/// Descending into a changed child renders its own changes.
#[test]
fn test_compare_descends_into_children() {
    let ns = DocumentNodeStore::builder()
        .backend(Arc::new(MemoryDocumentStore::new()))
        .clock(Arc::new(VirtualClock::new(1_700_000_000_000)))
        .cluster_id(1)
        .async_delay(Duration::ZERO)
        .diff_cache(Arc::new(MemoryDiffCache::new(16)))
        .build()
        .unwrap();

    let mut builder = ns.get_root().unwrap().builder();
    builder.add_node("/a/old").unwrap();
    builder.set_property("/a", "p", 1).unwrap();
    let before = ns.merge(&builder).unwrap();

    let mut builder = before.builder();
    builder.remove_node("/a/old").unwrap();
    builder.add_node("/a/new").unwrap();
    builder.set_property("/a", "p", 2).unwrap();
    let after = ns.merge(&builder).unwrap();

    let mut diff = JsopDiff::with_comparator(&ns, "/", 1);
    assert!(ns.compare(&after, &before, &mut diff).unwrap());
    assert!(diff.take_error().is_none());
    assert_eq!(
        diff.to_string(),
        "^\"/a/p\":2\n+\"/a/new\":{}\n-\"/a/old\""
    );

    // same answer from the cached child diff
    let mut again = JsopDiff::with_comparator(&ns, "/", 1);
    ns.compare(&after, &before, &mut again).unwrap();
    assert_eq!(again.to_string(), diff.to_string());
}
