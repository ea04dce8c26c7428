//! Join cardinality properties of `$lookup` + `$unwind`

use std::collections::BTreeSet;

use docstore_migrate::aggregation::{Pipeline, Stage};
use docstore_migrate::document::Document;
use docstore_migrate::store::{DocumentSink, MemoryStore};
use proptest::prelude::*;
use serde_json::{Value, json};

/// Parents keyed by position; a `None` key is stored as null
fn build(parent_keys: &[Option<i64>], child_refs: &[i64]) -> MemoryStore {
    let parents = parent_keys
        .iter()
        .enumerate()
        .map(|(i, key)| json!({"seq": i, "parent_id": key}))
        .collect();
    let children = child_refs
        .iter()
        .enumerate()
        .map(|(i, parent)| json!({"child_id": i, "parent_id": parent}))
        .collect();

    let mut store = MemoryStore::new();
    store.reset_namespace("prop").unwrap();
    store.bulk_insert("parent", parents).unwrap();
    store.bulk_insert("child", children).unwrap();
    store
}

fn joined(store: &MemoryStore, preserve: bool) -> Vec<Document> {
    let pipeline = Pipeline::new()
        .with_stage(Stage::lookup("child", "parent_id", "parent_id", "children"))
        .with_stage(Stage::unwind("children", preserve));
    store
        .aggregate("parent", &pipeline)
        .unwrap()
        .collect_documents()
        .unwrap()
}

fn matches(key: Option<i64>, child_refs: &[i64]) -> usize {
    key.map_or(0, |k| child_refs.iter().filter(|c| **c == k).count())
}

proptest! {
    #[test]
    fn inner_join_count_is_sum_of_matches(
        parent_keys in prop::collection::vec(prop::option::of(0i64..6), 0..12),
        child_refs in prop::collection::vec(0i64..8, 0..30),
    ) {
        let store = build(&parent_keys, &child_refs);
        let expected: usize = parent_keys.iter().map(|k| matches(*k, &child_refs)).sum();

        let docs = joined(&store, false);
        prop_assert_eq!(docs.len(), expected);
        for doc in &docs {
            prop_assert_eq!(doc["children"]["parent_id"].clone(), doc["parent_id"].clone());
        }
    }

    #[test]
    fn preserving_unwind_drops_no_parent(
        parent_keys in prop::collection::vec(prop::option::of(0i64..6), 0..12),
        child_refs in prop::collection::vec(0i64..8, 0..30),
    ) {
        let store = build(&parent_keys, &child_refs);
        let expected: usize = parent_keys
            .iter()
            .map(|k| matches(*k, &child_refs).max(1))
            .sum();

        let docs = joined(&store, true);
        prop_assert_eq!(docs.len(), expected);

        let seen: BTreeSet<u64> = docs.iter().filter_map(|d| d["seq"].as_u64()).collect();
        prop_assert_eq!(seen.len(), parent_keys.len());

        let orphans = docs.iter().filter(|d| d["children"] == Value::Null).count();
        let childless = parent_keys
            .iter()
            .filter(|k| matches(**k, &child_refs) == 0)
            .count();
        prop_assert_eq!(orphans, childless);
    }
}
