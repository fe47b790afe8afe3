//! Shared checker functions for the end-to-end scenario tests. Every
//! helper drives the public `Store`/`BTree` surface only, exercising the
//! library the way an external caller would rather than reaching into its
//! internals.

use std::collections::HashSet;

use corebase::{Store, Value};

/// Orders two key values by their on-disk key encoding, the same bytes the
/// B+Tree itself compares on. Works for any primary-key-eligible `Value`
/// variant, not just integers.
fn key_order(v: &Value) -> Vec<u8> {
    v.encode_key().unwrap()
}

/// A table's rows come back from `scan` in strictly ascending key order,
/// which only holds if the leaf sibling chain is intact and every leaf's
/// cells stay sorted.
pub fn assert_leaf_chain_consistent(store: &mut Store, table: &str) {
    let mut iter = store.scan(table).unwrap();
    let mut previous: Option<Vec<u8>> = None;
    let mut count = 0;
    while let Some(row) = iter.next_row().unwrap() {
        let encoded = key_order(&row.key);
        if let Some(prev) = &previous {
            assert!(
                &encoded > prev,
                "scan returned {:?} out of order after {:?}",
                row.key,
                prev
            );
        }
        previous = Some(encoded);
        count += 1;
    }
    drop(iter);
    let _ = count;
}

/// Scan order is also how internal-node ordering is observed from outside
/// the crate -- an out-of-order divider key would show up as an
/// out-of-order (or missing/duplicated) scan result.
pub fn assert_internal_ordering(store: &mut Store, table: &str) {
    assert_leaf_chain_consistent(store, table);
}

/// No page is simultaneously on the freelist and reachable from a table's
/// root.
pub fn assert_freelist_disjoint_from_reachable(store: &mut Store, table: &str) {
    let free: HashSet<u32> = store.free_page_chain().unwrap().into_iter().collect();
    let reachable: HashSet<u32> = store.reachable_pages(table).unwrap().into_iter().collect();
    let overlap: Vec<&u32> = free.intersection(&reachable).collect();
    assert!(
        overlap.is_empty(),
        "pages {:?} are both on the freelist and reachable from '{}'",
        overlap,
        table
    );
}
