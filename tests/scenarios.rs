//! End-to-end growth/shrink scenarios, driven only through the public
//! `Store`/`BTree` surface.
//!
//! A textbook B+Tree walkthrough for these insert/delete sequences would
//! assert exact leaf/height counts under full up-to-three-sibling
//! redistribution. This crate's rebalancing is deliberately simpler (see
//! DESIGN.md), so these tests assert the properties that must hold
//! regardless of the exact rebalancing strategy -- data correctness, key
//! ordering, freelist disjointness, and recovery -- rather than literal
//! page/height counts.

mod support;

use corebase::{ColumnDef, DataType, Row, Store, StoreConfig, Value};
use support::{assert_freelist_disjoint_from_reachable, assert_internal_ordering, assert_leaf_chain_consistent};

/// A primary key padded to 2023 bytes, large enough that two rows already
/// overflow a single 4096-byte page.
fn padded_key(ch: u8) -> Vec<u8> {
    vec![ch; 2023]
}

fn devices_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let mut store = Store::open(dir.path().join("db"), StoreConfig::default()).unwrap();
    store
        .create_table(
            "devices",
            DataType::Text,
            vec![ColumnDef {
                name: "datetime".to_string(),
                data_type: DataType::Int,
            }],
        )
        .unwrap();
    (dir, store)
}

fn row(ch: u8) -> Row {
    Row {
        key: Value::Text(padded_key(ch)),
        columns: vec![Value::Int(1_700_000_000)],
    }
}

fn key(ch: u8) -> Value {
    Value::Text(padded_key(ch))
}

#[test]
fn scenario_1_empty_tree_insert_delete() {
    let (_dir, mut store) = devices_store();
    store.insert("devices", &row(b'a')).unwrap();
    assert!(store.search("devices", &key(b'a')).unwrap().is_some());
    assert_leaf_chain_consistent(&mut store, "devices");

    store.delete("devices", &key(b'a')).unwrap();
    assert_eq!(store.search("devices", &key(b'a')).unwrap(), None);
    assert_leaf_chain_consistent(&mut store, "devices");
    assert_freelist_disjoint_from_reachable(&mut store, "devices");
}

#[test]
fn scenario_2_root_split() {
    let (_dir, mut store) = devices_store();
    store.insert("devices", &row(b'A')).unwrap();
    store.insert("devices", &row(b'B')).unwrap();

    assert!(store.search("devices", &key(b'A')).unwrap().is_some());
    assert!(store.search("devices", &key(b'B')).unwrap().is_some());
    assert_internal_ordering(&mut store, "devices");
    assert_freelist_disjoint_from_reachable(&mut store, "devices");
}

#[test]
fn scenario_3_shrink_after_delete() {
    let (_dir, mut store) = devices_store();
    store.insert("devices", &row(b'A')).unwrap();
    store.insert("devices", &row(b'B')).unwrap();
    store.delete("devices", &key(b'A')).unwrap();

    assert_eq!(store.search("devices", &key(b'A')).unwrap(), None);
    assert!(store.search("devices", &key(b'B')).unwrap().is_some());
    assert_leaf_chain_consistent(&mut store, "devices");
    assert_freelist_disjoint_from_reachable(&mut store, "devices");
    assert!(
        store.metadata().free_pages >= 1,
        "pages freed by the shrink should be on the freelist"
    );
}

#[test]
fn scenario_4_divider_key_growth() {
    let (_dir, mut store) = devices_store();
    store.insert("devices", &row(b'A')).unwrap();
    store.insert("devices", &row(b'B')).unwrap();
    store.delete("devices", &key(b'A')).unwrap();
    store.insert("devices", &row(b'A')).unwrap();
    store.insert("devices", &row(b'C')).unwrap();

    for ch in [b'A', b'B', b'C'] {
        assert!(store.search("devices", &key(ch)).unwrap().is_some());
    }
    assert_internal_ordering(&mut store, "devices");
    assert_freelist_disjoint_from_reachable(&mut store, "devices");
}

#[test]
fn scenario_5_three_level_growth() {
    let (_dir, mut store) = devices_store();
    for ch in [b'A', b'B'] {
        store.insert("devices", &row(ch)).unwrap();
    }
    store.delete("devices", &key(b'A')).unwrap();
    for ch in [b'A', b'C', b'D'] {
        store.insert("devices", &row(ch)).unwrap();
    }

    for ch in [b'A', b'B', b'C', b'D'] {
        assert!(store.search("devices", &key(ch)).unwrap().is_some());
    }
    assert_leaf_chain_consistent(&mut store, "devices");
    assert_internal_ordering(&mut store, "devices");
    assert_freelist_disjoint_from_reachable(&mut store, "devices");
}

#[test]
fn scenario_6_internal_merge_shrink_cycle() {
    let (_dir, mut store) = devices_store();
    for ch in [b'A', b'B'] {
        store.insert("devices", &row(ch)).unwrap();
    }
    store.delete("devices", &key(b'A')).unwrap();
    for ch in [b'A', b'C', b'D'] {
        store.insert("devices", &row(ch)).unwrap();
    }

    store.delete("devices", &key(b'B')).unwrap();
    for ch in [b'A', b'C', b'D'] {
        assert!(store.search("devices", &key(ch)).unwrap().is_some());
    }
    assert_eq!(store.search("devices", &key(b'B')).unwrap(), None);
    assert_leaf_chain_consistent(&mut store, "devices");
    assert_freelist_disjoint_from_reachable(&mut store, "devices");

    for ch in [b'B', b'A', b'C', b'D'] {
        store.delete("devices", &key(ch)).unwrap();
        store.insert("devices", &row(ch)).unwrap();
        assert_leaf_chain_consistent(&mut store, "devices");
        assert_internal_ordering(&mut store, "devices");
        assert_freelist_disjoint_from_reachable(&mut store, "devices");
    }

    for ch in [b'A', b'B', b'C', b'D'] {
        assert!(store.search("devices", &key(ch)).unwrap().is_some());
    }
}

/// Committed state survives a close/reopen cycle.
#[test]
fn committed_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    {
        let mut store = Store::open(&path, StoreConfig::default()).unwrap();
        store.create_table("devices", DataType::Text, vec![]).unwrap();
        store.insert("devices", &row(b'A')).unwrap();
        store.insert("devices", &row(b'B')).unwrap();
        store.delete("devices", &key(b'A')).unwrap();
    }

    let mut reopened = Store::open(&path, StoreConfig::default()).unwrap();
    assert_eq!(reopened.search("devices", &key(b'A')).unwrap(), None);
    assert!(reopened.search("devices", &key(b'B')).unwrap().is_some());
}

/// A duplicate insert is rejected and leaves the tree unchanged.
#[test]
fn duplicate_insert_leaves_tree_unchanged() {
    let (_dir, mut store) = devices_store();
    let first = row(b'A');
    store.insert("devices", &first).unwrap();

    let mut different_payload = row(b'A');
    different_payload.columns = vec![Value::Int(999)];
    let err = store.insert("devices", &different_payload);
    assert!(matches!(err, Err(corebase::Error::DuplicateKey)));

    let still_there = store.search("devices", &key(b'A')).unwrap().unwrap();
    assert_eq!(still_there, first);
}
