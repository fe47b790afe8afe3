//! Slotted-page B+Tree: search, insert, update, delete, and the `balance`
//! operation that splits, merges, and redistributes cells across pages
//! while keeping the leaf sibling chain and internal divider keys correct.
//!
//! **Rebalancing strategy.** A classic B+Tree redistributes cells across up
//! to three contiguous siblings on every overflow/underflow. This
//! implementation splits on overflow the same way, but underflow is handled
//! more simply: a leaf or internal node is only rebalanced when it becomes
//! completely *empty*, rather than maintaining a fill factor across
//! neighbors. An internal node that collapses to a single remaining child
//! is spliced out of the tree (its parent's edge is repointed directly at
//! that child and the node is freed) -- the same collapse rule applied at
//! every level, not just the root. This keeps ordering, reachability, and
//! freelist invariants intact while avoiding the most complex part of the
//! full redistribution algorithm; see DESIGN.md for the tradeoff.

use tracing::debug;

use crate::error::{Error, Result};
use crate::page::{compare_keys, Cell, KeyType, MetadataPage, PageNumber, SlottedPage, CONTENT_MAX_SIZE};
use crate::pager::Pager;

const CELL_HEADER_SIZE: usize = 6;
const SLOT_SIZE: usize = 2;
/// The largest a single cell (header + payload) may ever be: a fresh page
/// holding only that one cell.
const MAX_CELL_PAYLOAD: usize = CONTENT_MAX_SIZE - SLOT_SIZE - CELL_HEADER_SIZE;

enum LeafOp {
    Insert { slot: usize, cell: Cell },
    Update { slot: usize, cell: Cell },
    Delete { slot: usize },
}

/// What a lower level reports to its parent after `balance` handles it.
enum Effect {
    None,
    /// This child's rightmost key is now `Vec<u8>`; refresh the parent's
    /// divider for it if the parent holds one.
    DividerChanged(Vec<u8>),
    /// This child was freed; remove the parent's edge to it.
    Removed,
    /// This child collapsed to a single remaining page; repoint the
    /// parent's edge at it directly (no key changes).
    Collapsed(PageNumber),
    /// This child split; insert a new edge to `left` at the same slot
    /// (payload `left_max`), and retarget the existing edge to `right`.
    Split {
        left_max: Vec<u8>,
        left: PageNumber,
        right: PageNumber,
    },
}

pub struct BTree<'a> {
    pager: &'a mut Pager,
    root: PageNumber,
    key_type: KeyType,
}

/// Forward iterator over leaf cells, walking the maintained sibling chain.
pub struct Cursor<'a> {
    pager: &'a mut Pager,
    page: PageNumber,
    slot: usize,
}

impl<'a> Cursor<'a> {
    pub fn next(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if self.page == 0 {
                return Ok(None);
            }
            let page: SlottedPage = self.pager.get_page(self.page)?;
            if self.slot < page.num_slots() {
                let payload = page.cell(self.slot).unwrap().payload.clone();
                self.slot += 1;
                return Ok(Some(payload));
            }
            self.page = page.right;
            self.slot = 0;
        }
    }
}

impl<'a> BTree<'a> {
    pub fn open(pager: &'a mut Pager, root: PageNumber, key_type: KeyType) -> Self {
        BTree {
            pager,
            root,
            key_type,
        }
    }

    /// The table's current root page number. Splits and root collapses can
    /// change this; callers that own the catalog must re-read it after any
    /// mutating call and persist it if it changed.
    pub fn root(&self) -> PageNumber {
        self.root
    }

    fn load_metadata(&mut self) -> Result<MetadataPage> {
        self.pager.get_page(0)
    }

    fn save_metadata(&mut self, metadata: &MetadataPage) -> Result<()> {
        self.pager.update_page(0, metadata)
    }

    fn leaf_key_len(&self, payload: &[u8]) -> Result<usize> {
        match self.key_type {
            KeyType::Int | KeyType::Float => Ok(8),
            KeyType::Text | KeyType::Binary => {
                if payload.len() < 2 {
                    return Err(Error::Corruption("truncated leaf key prefix".into()));
                }
                Ok(2 + u16::from_be_bytes(payload[0..2].try_into().unwrap()) as usize)
            }
        }
    }

    fn leaf_key<'c>(&self, payload: &'c [u8]) -> Result<&'c [u8]> {
        let len = self.leaf_key_len(payload)?;
        payload.get(..len).ok_or_else(|| Error::Corruption("leaf key prefix exceeds payload".into()))
    }

    /// Descends from the root to the leaf that should hold `key`,
    /// recording `(parent_page, child_index)` for every internal level
    /// visited.
    fn descend(&mut self, key: &[u8]) -> Result<(PageNumber, Vec<(PageNumber, usize)>)> {
        let mut path = Vec::new();
        let mut current = self.root;
        loop {
            let page: SlottedPage = self.pager.get_page(current)?;
            if page.is_leaf() {
                return Ok((current, path));
            }
            let idx = match page
                .cells()
                .binary_search_by(|c| compare_keys(&c.payload, key, self.key_type))
            {
                Ok(i) => i,
                Err(i) => i,
            };
            path.push((current, idx));
            current = page.child_at_slot(idx);
        }
    }

    fn leaf_search(&self, page: &SlottedPage, key: &[u8]) -> Result<std::result::Result<usize, usize>> {
        let key_type = self.key_type;
        let mut err = None;
        let result = page.cells().binary_search_by(|c| {
            match self.leaf_key(&c.payload) {
                Ok(k) => compare_keys(k, key, key_type),
                Err(e) => {
                    err = Some(e);
                    std::cmp::Ordering::Equal
                }
            }
        });
        if let Some(e) = err {
            return Err(e);
        }
        Ok(result)
    }

    /// Rightmost descent from `page_num` to its largest key, used to
    /// derive a fresh divider key for a modified subtree.
    fn rightmost_key(&mut self, page_num: PageNumber) -> Result<Vec<u8>> {
        let mut current = page_num;
        loop {
            let page: SlottedPage = self.pager.get_page(current)?;
            if page.is_leaf() {
                let cell = page
                    .cells()
                    .last()
                    .ok_or_else(|| Error::Corruption("rightmost descent hit an empty leaf".into()))?;
                return Ok(self.leaf_key(&cell.payload)?.to_vec());
            }
            current = page.right_child;
        }
    }

    pub fn search(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let (leaf_page, _path) = self.descend(key)?;
        let leaf: SlottedPage = self.pager.get_page(leaf_page)?;
        match self.leaf_search(&leaf, key)? {
            Ok(slot) => Ok(Some(leaf.cell(slot).unwrap().payload.clone())),
            Err(_) => Ok(None),
        }
    }

    /// Forward iterator starting at `start` (or the leftmost leaf if
    /// `None`).
    pub fn scan(mut self, start: Option<&[u8]>) -> Result<Cursor<'a>> {
        let (leaf_page, slot) = match start {
            Some(key) => {
                let (leaf_page, _path) = self.descend(key)?;
                let leaf: SlottedPage = self.pager.get_page(leaf_page)?;
                let slot = match self.leaf_search(&leaf, key)? {
                    Ok(s) => s,
                    Err(s) => s,
                };
                (leaf_page, slot)
            }
            None => {
                let mut current = self.root;
                loop {
                    let page: SlottedPage = self.pager.get_page(current)?;
                    if page.is_leaf() {
                        break (current, 0);
                    }
                    current = page.child_at_slot(0);
                }
            }
        };
        Ok(Cursor {
            pager: self.pager,
            page: leaf_page,
            slot,
        })
    }

    fn check_key_len(&self, key: &[u8]) -> Result<()> {
        if key.len() > MAX_CELL_PAYLOAD {
            return Err(Error::KeyTooLong {
                got: key.len(),
                max: MAX_CELL_PAYLOAD,
            });
        }
        Ok(())
    }

    fn check_row_len(&self, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_CELL_PAYLOAD {
            return Err(Error::RowTooBig {
                got: payload.len(),
                max: MAX_CELL_PAYLOAD,
            });
        }
        Ok(())
    }

    pub fn insert(&mut self, key: &[u8], payload: Vec<u8>) -> Result<()> {
        self.check_key_len(key)?;
        self.check_row_len(&payload)?;
        let (leaf_page, path) = self.descend(key)?;
        let leaf: SlottedPage = self.pager.get_page(leaf_page)?;
        match self.leaf_search(&leaf, key)? {
            Ok(_) => Err(Error::DuplicateKey),
            Err(slot) => {
                let op = LeafOp::Insert {
                    slot,
                    cell: Cell {
                        left_child: 0,
                        payload,
                    },
                };
                self.apply_leaf_op(leaf_page, path, op)
            }
        }
    }

    pub fn update(&mut self, key: &[u8], payload: Vec<u8>) -> Result<()> {
        self.check_row_len(&payload)?;
        let (leaf_page, path) = self.descend(key)?;
        let leaf: SlottedPage = self.pager.get_page(leaf_page)?;
        match self.leaf_search(&leaf, key)? {
            Err(_) => Err(Error::KeyNotFound),
            Ok(slot) => {
                let op = LeafOp::Update {
                    slot,
                    cell: Cell {
                        left_child: 0,
                        payload,
                    },
                };
                self.apply_leaf_op(leaf_page, path, op)
            }
        }
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        let (leaf_page, path) = self.descend(key)?;
        let leaf: SlottedPage = self.pager.get_page(leaf_page)?;
        match self.leaf_search(&leaf, key)? {
            Err(_) => Err(Error::KeyNotFound),
            Ok(slot) => self.apply_leaf_op(leaf_page, path, LeafOp::Delete { slot }),
        }
    }

    fn apply_leaf_op(
        &mut self,
        leaf_page: PageNumber,
        path: Vec<(PageNumber, usize)>,
        op: LeafOp,
    ) -> Result<()> {
        let mut metadata = self.load_metadata()?;
        let mut leaf: SlottedPage = self.pager.get_page(leaf_page)?;
        let old_max = match leaf.cells().last() {
            Some(c) => Some(self.leaf_key(&c.payload)?.to_vec()),
            None => None,
        };
        let mut cells = leaf.cells().to_vec();

        match op {
            LeafOp::Insert { slot, cell } => cells.insert(slot, cell),
            LeafOp::Update { slot, cell } => cells[slot] = cell,
            LeafOp::Delete { slot } => {
                cells.remove(slot);
            }
        }

        if cells.is_empty() {
            leaf.set_cells(cells)?;
            if path.is_empty() {
                self.pager.update_page(leaf_page, &leaf)?;
                debug!(page = leaf_page, "leaf root emptied, tree height stays 1");
                return Ok(());
            }
            self.splice_out_leaf(leaf_page, &leaf)?;
            self.pager.free(&mut metadata, leaf_page)?;
            self.save_metadata(&metadata)?;
            debug!(page = leaf_page, "leaf emptied by delete, freed");
            return self.propagate(path, Effect::Removed, &mut metadata);
        }

        let cells_for_split = cells.clone();
        match leaf.set_cells(cells) {
            Ok(()) => {
                self.pager.update_page(leaf_page, &leaf)?;
                self.save_metadata(&metadata)?;
                if path.is_empty() {
                    return Ok(());
                }
                let new_max = self.leaf_key(&leaf.cells().last().unwrap().payload)?.to_vec();
                if old_max.as_deref() != Some(new_max.as_slice()) {
                    return self.propagate(path, Effect::DividerChanged(new_max), &mut metadata);
                }
                Ok(())
            }
            Err(Error::RowTooBig { .. }) => {
                self.split_leaf(leaf_page, cells_for_split, path, &mut metadata)
            }
            Err(e) => Err(e),
        }
    }

    fn splice_out_leaf(&mut self, page_num: PageNumber, leaf: &SlottedPage) -> Result<()> {
        if leaf.left != 0 {
            let mut left: SlottedPage = self.pager.get_page(leaf.left)?;
            left.right = leaf.right;
            self.pager.update_page(leaf.left, &left)?;
        }
        if leaf.right != 0 {
            let mut right: SlottedPage = self.pager.get_page(leaf.right)?;
            right.left = leaf.left;
            self.pager.update_page(leaf.right, &right)?;
        }
        let _ = page_num;
        Ok(())
    }

    fn split_leaf(
        &mut self,
        leaf_page: PageNumber,
        cells: Vec<Cell>,
        path: Vec<(PageNumber, usize)>,
        metadata: &mut MetadataPage,
    ) -> Result<()> {
        let old: SlottedPage = self.pager.get_page(leaf_page)?;
        let old_left_sibling = old.left;
        let old_right_sibling = old.right;

        let mid = (cells.len() / 2).max(1);
        let (left_cells, right_cells) = cells.split_at(mid);

        let right_page = self.pager.alloc_free_page(metadata)?;
        self.save_metadata(metadata)?;

        let mut left = SlottedPage::new_leaf();
        left.left = old_left_sibling;
        left.right = right_page;
        left.set_cells(left_cells.to_vec())?;

        let mut right = SlottedPage::new_leaf();
        right.left = leaf_page;
        right.right = old_right_sibling;
        right.set_cells(right_cells.to_vec())?;

        self.pager.update_page(leaf_page, &left)?;
        self.pager.update_page(right_page, &right)?;

        if old_right_sibling != 0 {
            let mut sibling: SlottedPage = self.pager.get_page(old_right_sibling)?;
            sibling.left = right_page;
            self.pager.update_page(old_right_sibling, &sibling)?;
        }

        let left_max = self.leaf_key(&left.cells().last().unwrap().payload)?.to_vec();
        debug!(left = leaf_page, right = right_page, "leaf split");

        if path.is_empty() {
            let mut new_root = SlottedPage::new_internal(right_page);
            new_root.set_cells(vec![Cell {
                left_child: leaf_page,
                payload: left_max,
            }])?;
            let new_root_page = self.pager.alloc_free_page(metadata)?;
            self.save_metadata(metadata)?;
            self.pager.update_page(new_root_page, &new_root)?;
            self.root = new_root_page;
            debug!(new_root = new_root_page, "leaf root split, height increased");
            Ok(())
        } else {
            self.propagate(
                path,
                Effect::Split {
                    left_max,
                    left: leaf_page,
                    right: right_page,
                },
                metadata,
            )
        }
    }

    fn split_internal(
        &mut self,
        page_num: PageNumber,
        cells: Vec<Cell>,
        right_child: PageNumber,
        path: Vec<(PageNumber, usize)>,
        metadata: &mut MetadataPage,
    ) -> Result<()> {
        let mid = cells.len() / 2;
        let left_cells = cells[..mid].to_vec();
        let promoted = cells[mid].clone();
        let right_cells = cells[mid + 1..].to_vec();

        let right_page = self.pager.alloc_free_page(metadata)?;
        self.save_metadata(metadata)?;

        let mut left = SlottedPage::new_internal(promoted.left_child);
        left.set_cells(left_cells)?;

        let mut right = SlottedPage::new_internal(right_child);
        right.set_cells(right_cells)?;

        self.pager.update_page(page_num, &left)?;
        self.pager.update_page(right_page, &right)?;
        debug!(left = page_num, right = right_page, "internal node split");

        if path.is_empty() {
            let mut new_root = SlottedPage::new_internal(right_page);
            new_root.set_cells(vec![Cell {
                left_child: page_num,
                payload: promoted.payload,
            }])?;
            let new_root_page = self.pager.alloc_free_page(metadata)?;
            self.save_metadata(metadata)?;
            self.pager.update_page(new_root_page, &new_root)?;
            self.root = new_root_page;
            debug!(new_root = new_root_page, "internal root split, height increased");
            Ok(())
        } else {
            self.propagate(
                path,
                Effect::Split {
                    left_max: promoted.payload,
                    left: page_num,
                    right: right_page,
                },
                metadata,
            )
        }
    }

    /// Applies `effect` up the recorded ancestor path, iterating rather
    /// than recursing so each step's effect can change the one fed to the
    /// next without fighting the borrow checker.
    fn propagate(
        &mut self,
        mut path: Vec<(PageNumber, usize)>,
        mut effect: Effect,
        metadata: &mut MetadataPage,
    ) -> Result<()> {
        while let Some((parent_page, slot)) = path.pop() {
            let mut parent: SlottedPage = self.pager.get_page(parent_page)?;
            let remaining_path = path.clone();

            match effect {
                Effect::None => return Ok(()),
                Effect::DividerChanged(new_key) => {
                    if slot < parent.num_slots() {
                        let mut cells = parent.cells().to_vec();
                        cells[slot].payload = new_key;
                        match parent.set_cells(cells) {
                            Ok(()) => {
                                self.pager.update_page(parent_page, &parent)?;
                                return Ok(());
                            }
                            Err(Error::RowTooBig { .. }) => {
                                let mut cells = parent.cells().to_vec();
                                cells[slot].payload = self.rightmost_key(parent.child_at_slot(slot))?;
                                let rc = parent.right_child;
                                return self.split_internal(parent_page, cells, rc, remaining_path, metadata);
                            }
                            Err(e) => return Err(e),
                        }
                    } else {
                        // child is the right_child: this page's own
                        // external max changed too, keep climbing.
                        effect = Effect::DividerChanged(new_key);
                        continue;
                    }
                }
                Effect::Removed => {
                    let was_right_child = slot >= parent.num_slots();
                    let mut cells = parent.cells().to_vec();
                    if was_right_child {
                        if let Some(last) = cells.pop() {
                            parent.right_child = last.left_child;
                        } else {
                            parent.right_child = 0;
                        }
                    } else {
                        cells.remove(slot);
                    }
                    parent.set_cells(cells)?;

                    if parent.num_slots() == 0 && parent.right_child == 0 {
                        if path.is_empty() {
                            let mut empty_leaf = SlottedPage::new_leaf();
                            empty_leaf.set_cells(vec![])?;
                            self.pager.update_page(parent_page, &empty_leaf)?;
                            self.root = parent_page;
                            debug!(page = parent_page, "tree fully emptied, root reset to empty leaf");
                            return Ok(());
                        }
                        self.pager.free(metadata, parent_page)?;
                        self.save_metadata(metadata)?;
                        effect = Effect::Removed;
                        continue;
                    } else if parent.num_slots() == 0 {
                        let sole_child = parent.right_child;
                        if path.is_empty() {
                            let child: SlottedPage = self.pager.get_page(sole_child)?;
                            self.pager.update_page(parent_page, &child)?;
                            self.pager.free(metadata, sole_child)?;
                            self.save_metadata(metadata)?;
                            self.root = parent_page;
                            debug!(page = parent_page, "internal root collapsed into sole child");
                            return Ok(());
                        }
                        self.pager.free(metadata, parent_page)?;
                        self.save_metadata(metadata)?;
                        effect = Effect::Collapsed(sole_child);
                        continue;
                    } else {
                        self.pager.update_page(parent_page, &parent)?;
                        if was_right_child {
                            let new_max = self.rightmost_key(parent.right_child)?;
                            effect = Effect::DividerChanged(new_max);
                            continue;
                        }
                        return Ok(());
                    }
                }
                Effect::Collapsed(new_child) => {
                    if slot < parent.num_slots() {
                        let mut cells = parent.cells().to_vec();
                        cells[slot].left_child = new_child;
                        parent.set_cells(cells)?;
                    } else {
                        parent.right_child = new_child;
                    }
                    self.pager.update_page(parent_page, &parent)?;
                    return Ok(());
                }
                Effect::Split {
                    left_max,
                    left,
                    right,
                } => {
                    let mut cells = parent.cells().to_vec();
                    let mut new_right_child = parent.right_child;
                    if slot == cells.len() {
                        new_right_child = right;
                        cells.push(Cell {
                            left_child: left,
                            payload: left_max,
                        });
                    } else {
                        cells[slot].left_child = right;
                        cells.insert(
                            slot,
                            Cell {
                                left_child: left,
                                payload: left_max,
                            },
                        );
                    }
                    let cells_for_split = cells.clone();
                    parent.right_child = new_right_child;
                    match parent.set_cells(cells) {
                        Ok(()) => {
                            self.pager.update_page(parent_page, &parent)?;
                            return Ok(());
                        }
                        Err(Error::RowTooBig { .. }) => {
                            return self.split_internal(
                                parent_page,
                                cells_for_split,
                                new_right_child,
                                remaining_path,
                                metadata,
                            );
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        // Effect reached past the root: only possible for a climbing
        // DividerChanged when the tree has no further ancestors, which
        // means there's nothing left to update.
        Ok(())
    }
}
