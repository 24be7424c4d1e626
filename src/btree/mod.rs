//! The B-tree index structure (spec §4.2, §4.3): a clustered or secondary
//! index is one `BTree`, a root page plus however many levels grow above
//! the leaves.
//!
//! Internal pages store *separator records*: a copy of the key fields of
//! the leftmost record reachable through a child, with one extra trailing
//! `Value::Int` field holding that child's [`PageNo`]. Descending a
//! search finds the separator that is the predecessor of (or equal to)
//! the search key and follows its child pointer — the conventional
//! "largest key <= search key" rule for B-tree internal nodes.

pub mod cursor;
pub mod modify;
pub mod search;

pub use cursor::{Cursor, PersistentCursor, RelPosition};
pub use search::SearchMode;

use crate::{
    buffer::{BufferPool, Mtr},
    page::{PageNo, Record},
    types::Tuple,
    Result,
};

/// Buildable parameters for the pages backing a tree, mirroring
/// `examples/prataprc-rdms/src/robt_config.rs`'s plain-public-fields-plus-
/// named-constants shape. `Engine::with_config` is the caller that turns
/// this into an actual `BufferPool`.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    pub page_capacity_bytes: usize,
}

impl Config {
    pub const DEFAULT_PAGE_CAPACITY_BYTES: usize = crate::page::DEFAULT_PAGE_CAPACITY_BYTES;

    pub fn new() -> Config {
        Config {
            page_capacity_bytes: Self::DEFAULT_PAGE_CAPACITY_BYTES,
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}

/// A single index's tree: its root page and the key shape used to order
/// it. `key_n_fields` is the index's `n_unique` (spec §3); `prefix_lens`
/// gives each key field's optional key-prefix length.
pub struct BTree {
    root: PageNo,
    key_n_fields: usize,
    prefix_lens: Vec<usize>,
}

impl BTree {
    /// Create an empty tree with a single empty leaf as its root.
    pub fn create(pool: &BufferPool, key_n_fields: usize, prefix_lens: Vec<usize>) -> BTree {
        let root = pool.alloc_leaf();
        BTree {
            root,
            key_n_fields,
            prefix_lens,
        }
    }

    /// Wrap an already-allocated root page, e.g. a `dict::Index`'s
    /// `tree_root_page`, instead of allocating a fresh tree. Callers
    /// must write `tree.root()` back to the index after any operation
    /// that may have split and grown a new root.
    pub fn attach(root: PageNo, key_n_fields: usize, prefix_lens: Vec<usize>) -> BTree {
        BTree {
            root,
            key_n_fields,
            prefix_lens,
        }
    }

    pub fn root(&self) -> PageNo {
        self.root
    }

    pub fn key_n_fields(&self) -> usize {
        self.key_n_fields
    }

    pub fn prefix_lens(&self) -> &[usize] {
        &self.prefix_lens
    }

    /// `search_to_nth_level` positioned relative to `tuple` (spec §4.3).
    pub fn search(&self, pool: &BufferPool, tuple: &Tuple, mode: SearchMode) -> Result<Cursor> {
        search::search_to_nth_level(
            pool,
            self.root,
            tuple,
            self.key_n_fields,
            &self.prefix_lens,
            mode,
        )
    }

    /// Insert `record`, trying the optimistic leaf-only path first and
    /// falling back to a pessimistic split only when the leaf has no room
    /// (spec §4.3).
    pub fn insert(&mut self, pool: &BufferPool, mtr: &mut Mtr, record: Record) -> Result<()> {
        let search = Tuple::with_n_fields_cmp(record.tuple.fields().to_vec(), self.key_n_fields);
        let path = search::descend_path(pool, self.root, &search, self.key_n_fields, &self.prefix_lens)?;
        let leaf_no = *path.last().unwrap();
        match modify::insert_optimistic(
            pool,
            mtr,
            leaf_no,
            record.clone(),
            self.key_n_fields,
            &self.prefix_lens,
        )? {
            modify::InsertDisposition::Done => Ok(()),
            modify::InsertDisposition::NeedsSplit => modify::insert_pessimistic(
                pool,
                mtr,
                &mut self.root,
                record,
                self.key_n_fields,
                &self.prefix_lens,
            ),
        }
    }

    /// Delete the record the cursor is positioned on.
    pub fn delete(&mut self, pool: &BufferPool, mtr: &mut Mtr, cursor: &Cursor) -> Result<Record> {
        let slot = cursor
            .slot
            .ok_or(())
            .map_err(|_| crate::Error::RecordNotFound(file!().to_string(), line!(), "cursor not on a record".into()))?;
        modify::delete_optimistic(pool, mtr, cursor.page_no, slot)
    }

    /// Apply an in-place update to the record the cursor is positioned
    /// on. Caller has already checked `Record::same_footprint`.
    pub fn update_in_place(
        &mut self,
        pool: &BufferPool,
        mtr: &mut Mtr,
        cursor: &Cursor,
        tuple: Tuple,
    ) -> Result<()> {
        let slot = cursor
            .slot
            .ok_or(())
            .map_err(|_| crate::Error::RecordNotFound(file!().to_string(), line!(), "cursor not on a record".into()))?;
        modify::update_in_place(pool, mtr, cursor.page_no, slot, tuple)
    }
}

#[cfg(test)]
mod btree_test {
    use super::*;
    use crate::{buffer::mtr_start, page::DEFAULT_PAGE_CAPACITY_BYTES, types::{PrType, Value}};

    fn key_record(k: i64) -> Record {
        Record::new_secondary(Tuple::new(vec![Value::int(k, PrType::new(false))]))
    }

    #[test]
    fn test_insert_and_search() {
        let pool = BufferPool::new(DEFAULT_PAGE_CAPACITY_BYTES);
        let mut tree = BTree::create(&pool, 1, vec![0]);
        let mut mtr = mtr_start();
        for k in [5, 1, 3, 2, 4] {
            tree.insert(&pool, &mut mtr, key_record(k)).unwrap();
        }
        mtr.commit();

        let search_key = Tuple::with_n_fields_cmp(vec![Value::int(3, PrType::new(false))], 1);
        let cursor = tree.search(&pool, &search_key, SearchMode::Eq).unwrap();
        assert!(cursor.is_on_user_record());
        assert_eq!(cursor.low_match, 1);
    }

    #[test]
    fn test_insert_triggers_split() {
        let pool = BufferPool::new(128);
        let mut tree = BTree::create(&pool, 1, vec![0]);
        let mut mtr = mtr_start();
        for k in 0..40 {
            tree.insert(&pool, &mut mtr, key_record(k)).unwrap();
        }
        mtr.commit();

        assert!(pool.page_get_s(tree.root()).unwrap().n_records() > 0);
        for k in [0, 13, 27, 39] {
            let search_key = Tuple::with_n_fields_cmp(vec![Value::int(k, PrType::new(false))], 1);
            let cursor = tree.search(&pool, &search_key, SearchMode::Eq).unwrap();
            assert!(cursor.is_on_user_record(), "key {} not found after split", k);
        }
    }

    #[test]
    fn test_delete_removes_record() {
        let pool = BufferPool::new(DEFAULT_PAGE_CAPACITY_BYTES);
        let mut tree = BTree::create(&pool, 1, vec![0]);
        let mut mtr = mtr_start();
        tree.insert(&pool, &mut mtr, key_record(1)).unwrap();
        let search_key = Tuple::with_n_fields_cmp(vec![Value::int(1, PrType::new(false))], 1);
        let cursor = tree.search(&pool, &search_key, SearchMode::Eq).unwrap();
        tree.delete(&pool, &mut mtr, &cursor).unwrap();
        mtr.commit();

        let cursor = tree.search(&pool, &search_key, SearchMode::Eq).unwrap();
        assert!(!cursor.is_on_user_record());
    }
}
