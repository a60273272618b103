//! Property-based tests for traversal and edge maintenance.
//!
//! Over random venue/contact graphs and random operation sequences:
//! - Every document is fetched at most once per load, whatever the depth
//! - Connect and disconnect keep both sides of an edge in agreement
//! - Connecting an existing edge writes nothing
//! - An audit restores symmetry after one-sided writes

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::executor::block_on;
use proptest::prelude::*;
use relation_graph_kernel::{
    DocumentId, InMemoryDocumentStore, LoadOptions, RelationKernel, RelationRegistry, ScopeFilter,
    SyncAction,
};
use serde_json::{json, Value};

const VENUES: usize = 4;
const CONTACTS: usize = 4;

// =============================================================================
// HELPER STRATEGIES
// =============================================================================

fn edge_strategy() -> impl Strategy<Value = (usize, usize)> {
    (0..VENUES, 0..CONTACTS)
}

fn edges_strategy() -> impl Strategy<Value = BTreeSet<(usize, usize)>> {
    prop::collection::btree_set(edge_strategy(), 0..12)
}

fn op_strategy() -> impl Strategy<Value = (bool, usize, usize)> {
    (any::<bool>(), 0..VENUES, 0..CONTACTS)
}

// =============================================================================
// HELPERS
// =============================================================================

fn venue(i: usize) -> String {
    format!("L{}", i)
}

fn contact(i: usize) -> String {
    format!("C{}", i)
}

fn kernel_over(store: &Arc<InMemoryDocumentStore>) -> RelationKernel<InMemoryDocumentStore> {
    RelationKernel::new(store.clone(), Arc::new(RelationRegistry::booking_defaults()))
}

/// Seed venues and contacts with the given edges written on `venue_side`
/// and/or `contact_side`.
fn seed(edges: &BTreeSet<(usize, usize)>, venue_side: bool, contact_side: bool) -> Arc<InMemoryDocumentStore> {
    let store = Arc::new(InMemoryDocumentStore::new());
    for l in 0..VENUES {
        let ids: Vec<String> = edges
            .iter()
            .filter(|(v, _)| *v == l && venue_side)
            .map(|(_, c)| contact(*c))
            .collect();
        store.add_json("lieux", &venue(l), json!({ "contactIds": ids }));
    }
    for c in 0..CONTACTS {
        let ids: Vec<String> = edges
            .iter()
            .filter(|(_, k)| *k == c && contact_side)
            .map(|(v, _)| venue(*v))
            .collect();
        store.add_json("contacts", &contact(c), json!({ "lieuxIds": ids }));
    }
    store
}

fn ids_in(store: &InMemoryDocumentStore, collection: &str, id: &str, field: &str) -> BTreeSet<String> {
    match store.document(collection, id).and_then(|d| d.field(field).cloned()) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => BTreeSet::new(),
    }
}

/// Edges as seen from each side.
fn both_sides(store: &InMemoryDocumentStore) -> (BTreeSet<(String, String)>, BTreeSet<(String, String)>) {
    let mut from_venues = BTreeSet::new();
    let mut from_contacts = BTreeSet::new();
    for l in 0..VENUES {
        for c in ids_in(store, "lieux", &venue(l), "contactIds") {
            from_venues.insert((venue(l), c));
        }
    }
    for c in 0..CONTACTS {
        for l in ids_in(store, "contacts", &contact(c), "lieuxIds") {
            from_contacts.insert((l, contact(c)));
        }
    }
    (from_venues, from_contacts)
}

// =============================================================================
// TRAVERSAL PROPERTIES
// =============================================================================

mod traversal_properties {
    use super::*;

    proptest! {
        /// A load never fetches the same document twice.
        #[test]
        fn each_document_fetched_at_most_once(
            edges in edges_strategy(),
            root in 0..VENUES,
            depth in 0u32..6,
        ) {
            let store = seed(&edges, true, true);
            let kernel = kernel_over(&store);

            let load = block_on(kernel.load_entity_graph(
                "lieu",
                &DocumentId::new(venue(root)),
                &LoadOptions::new(depth),
            ))
            .unwrap()
            .unwrap();

            let stats = store.stats();
            for l in 0..VENUES {
                prop_assert!(stats.gets_of("lieux", &venue(l)) <= 1);
            }
            for c in 0..CONTACTS {
                prop_assert!(stats.gets_of("contacts", &contact(c)) <= 1);
            }
            prop_assert_eq!(load.loaded_entities, stats.total_gets());
            prop_assert!(load.loaded_entities <= VENUES + CONTACTS);
            prop_assert!(!load.partial);
        }

        /// Depth zero loads only the root.
        #[test]
        fn depth_zero_loads_root_only(edges in edges_strategy(), root in 0..VENUES) {
            let store = seed(&edges, true, true);
            let kernel = kernel_over(&store);

            let load = block_on(kernel.load_entity_graph(
                "lieu",
                &DocumentId::new(venue(root)),
                &LoadOptions::new(0),
            ))
            .unwrap()
            .unwrap();

            prop_assert_eq!(load.loaded_entities, 1);
            prop_assert_eq!(store.stats().total_gets(), 1);
        }
    }
}

// =============================================================================
// SYNCHRONIZATION PROPERTIES
// =============================================================================

mod sync_properties {
    use super::*;

    proptest! {
        /// Any sequence of connects and disconnects leaves both sides agreeing
        /// with each other and with the last operation applied per pair.
        #[test]
        fn operations_keep_sides_symmetric(ops in prop::collection::vec(op_strategy(), 0..30)) {
            let store = seed(&BTreeSet::new(), true, true);
            let kernel = kernel_over(&store);
            let mut expected = BTreeSet::new();

            for (connect, l, c) in ops {
                let action = if connect { SyncAction::Connect } else { SyncAction::Disconnect };
                let outcome = block_on(kernel.synchronize_relation(
                    "lieu",
                    &DocumentId::new(venue(l)),
                    "contacts",
                    &DocumentId::new(contact(c)),
                    action,
                ))
                .unwrap();
                prop_assert!(outcome.ok);

                if connect {
                    expected.insert((venue(l), contact(c)));
                } else {
                    expected.remove(&(venue(l), contact(c)));
                }
            }

            let (from_venues, from_contacts) = both_sides(&store);
            prop_assert_eq!(&from_venues, &from_contacts);
            prop_assert_eq!(&from_venues, &expected);
        }

        /// Connecting an edge that already exists performs no writes.
        #[test]
        fn connect_is_idempotent(edges in edges_strategy(), l in 0..VENUES, c in 0..CONTACTS) {
            let store = seed(&edges, true, true);
            let kernel = kernel_over(&store);
            let source = DocumentId::new(venue(l));
            let target = DocumentId::new(contact(c));

            block_on(kernel.synchronize_relation("lieu", &source, "contacts", &target, SyncAction::Connect))
                .unwrap();
            let before = both_sides(&store);
            store.reset_stats();

            let outcome = block_on(kernel.synchronize_relation(
                "lieu",
                &source,
                "contacts",
                &target,
                SyncAction::Connect,
            ))
            .unwrap();

            prop_assert!(outcome.ok);
            prop_assert_eq!(store.stats().patches, 0);
            prop_assert_eq!(both_sides(&store), before);
        }
    }
}

// =============================================================================
// AUDIT PROPERTIES
// =============================================================================

mod audit_properties {
    use super::*;

    proptest! {
        /// Edges recorded only on the contact side are mirrored onto venues.
        #[test]
        fn audit_restores_symmetry(edges in edges_strategy()) {
            let store = seed(&edges, false, true);
            let kernel = kernel_over(&store);

            let report = block_on(kernel.run_consistency_audit(&ScopeFilter::all())).unwrap();

            let (from_venues, from_contacts) = both_sides(&store);
            prop_assert_eq!(&from_venues, &from_contacts);
            prop_assert_eq!(report.stats.fixed, edges.len());
            prop_assert_eq!(report.stats.errors, 0);
        }
    }
}
