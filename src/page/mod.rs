//! The record & page layer (spec §4.2): a fixed-size slab holding an
//! ordered sequence of records plus infimum/supremum sentinels.

mod record;

pub use record::{Record, RollPtr, SystemFields};

use crate::{err_at, types::Tuple, Error, Result};

/// Identifies a page within an index's tree (spec §3, `tree_root_page`
/// and the B-tree's internal node pointers). `0` is never a valid
/// allocated page number; it is used as a placeholder before a tree's
/// root is created.
pub type PageNo = u64;

/// A page-local position: the two sentinels bracket the ordered user
/// records (spec §4.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    Infimum,
    Record(usize),
    Supremum,
}

/// Default page capacity; real engines fix this at boot per spec §6,
/// here it is a `Config`-settable constant for the standalone crate.
pub const DEFAULT_PAGE_CAPACITY_BYTES: usize = 16 * 1024;

/// A fixed-size slab containing an ordered sequence of [`Record`]s.
///
/// Invariants upheld by every method on this type (spec §4.2):
/// records are ordered by key, infimum < every user record < supremum,
/// and updates that don't change any field's length are applied in
/// place.
#[derive(Clone, Debug)]
pub struct Page {
    pub page_no: PageNo,
    capacity_bytes: usize,
    used_bytes: usize,
    records: Vec<Record>,
    /// Non-leaf pages only: this page's B-tree level, 0 == leaf.
    pub level: u16,
}

fn record_footprint(tuple: &Tuple) -> usize {
    // A rough physical footprint: per-field length plus a fixed per-field
    // and per-record overhead, enough to make split/fill decisions without
    // needing a real on-disk encoding.
    const FIELD_OVERHEAD: usize = 4;
    const RECORD_OVERHEAD: usize = 8;
    tuple.fields().iter().fold(RECORD_OVERHEAD, |acc, f| {
        let len = if f.length() == usize::MAX { 0 } else { f.length() };
        acc + len + FIELD_OVERHEAD
    })
}

impl Page {
    pub fn new_leaf(page_no: PageNo, capacity_bytes: usize) -> Page {
        Page {
            page_no,
            capacity_bytes,
            used_bytes: 0,
            records: Vec::new(),
            level: 0,
        }
    }

    pub fn new_internal(page_no: PageNo, capacity_bytes: usize, level: u16) -> Page {
        Page {
            page_no,
            capacity_bytes,
            used_bytes: 0,
            records: Vec::new(),
            level,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.level == 0
    }

    pub fn n_records(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    /// Fill ratio threshold below which a delete would trigger a merge
    /// (spec §4.3 latching table, "Delete leading to merge").
    pub fn is_underfull(&self) -> bool {
        self.used_bytes * 2 < self.capacity_bytes && !self.records.is_empty()
    }

    pub fn record(&self, slot: usize) -> Option<&Record> {
        self.records.get(slot)
    }

    pub fn record_mut(&mut self, slot: usize) -> Option<&mut Record> {
        self.records.get_mut(slot)
    }

    pub fn tuple_at(&self, slot: usize) -> Option<&Tuple> {
        self.records.get(slot).map(|r| &r.tuple)
    }

    /// `get_next(rec)`: the slot ordered immediately after `slot`.
    pub fn get_next(&self, slot: Slot) -> Slot {
        match slot {
            Slot::Infimum if self.records.is_empty() => Slot::Supremum,
            Slot::Infimum => Slot::Record(0),
            Slot::Record(i) if i + 1 < self.records.len() => Slot::Record(i + 1),
            Slot::Record(_) => Slot::Supremum,
            Slot::Supremum => Slot::Supremum,
        }
    }

    pub fn get_prev(&self, slot: Slot) -> Slot {
        match slot {
            Slot::Supremum if self.records.is_empty() => Slot::Infimum,
            Slot::Supremum => Slot::Record(self.records.len() - 1),
            Slot::Record(0) => Slot::Infimum,
            Slot::Record(i) => Slot::Record(i - 1),
            Slot::Infimum => Slot::Infimum,
        }
    }

    pub fn first_slot(&self) -> Slot {
        if self.records.is_empty() {
            Slot::Supremum
        } else {
            Slot::Record(0)
        }
    }

    /// Binary search for the first record whose key is >= `tuple` under
    /// `prefix_lens`. Returns the slot index to insert before, and
    /// whether an exact match (by `n_unique` fields) was found at that
    /// position's predecessor — callers combine this with
    /// `low_match`/`up_match` computed by the B-tree layer.
    pub fn lower_bound(&self, tuple: &Tuple, prefix_lens: &[usize]) -> usize {
        let mut lo = 0usize;
        let mut hi = self.records.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let ord = tuple.cmp(&self.records[mid].tuple, prefix_lens);
            if ord == std::cmp::Ordering::Greater {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Insert a new record at the position dictated by key order.
    /// Returns `Error::Overflow` if it would not fit — the caller
    /// (`btree::modify`) must retry under a tree latch and split.
    pub fn insert_at(&mut self, slot: usize, record: Record) -> Result<()> {
        let footprint = record_footprint(&record.tuple);
        if self.used_bytes + footprint > self.capacity_bytes {
            return err_at!(Overflow, msg: "page {} has no room for {} bytes", self.page_no, footprint);
        }
        self.used_bytes += footprint;
        self.records.insert(slot, record);
        Ok(())
    }

    pub fn delete_at(&mut self, slot: usize) -> Result<Record> {
        if slot >= self.records.len() {
            return err_at!(Corruption, msg: "delete_at: slot {} out of range in page {}", slot, self.page_no);
        }
        let record = self.records.remove(slot);
        self.used_bytes = self
            .used_bytes
            .saturating_sub(record_footprint(&record.tuple));
        Ok(record)
    }

    /// Replace the tuple at `slot` in place. Returns `Error::Overflow` if
    /// the replacement does not fit the page even after reclaiming the
    /// old footprint — the caller (`row::update`) must then fall back to
    /// delete-and-reinsert under a tree latch (spec §4.8 point 3, "on
    /// overflow, pessimistic with possible split").
    pub fn update_in_place(&mut self, slot: usize, tuple: Tuple) -> Result<()> {
        let record = self
            .records
            .get_mut(slot)
            .ok_or(())
            .map_err(|_| Error::Corruption(file!().to_string(), line!(), "update_in_place: bad slot".into()))?;
        let old_fp = record_footprint(&record.tuple);
        let new_fp = record_footprint(&tuple);
        if self.used_bytes - old_fp + new_fp > self.capacity_bytes {
            return err_at!(Overflow, msg: "page {} has no room to grow slot {} by {} bytes", self.page_no, slot, new_fp.saturating_sub(old_fp));
        }
        record.tuple = tuple;
        self.used_bytes = self.used_bytes - old_fp + new_fp;
        Ok(())
    }

    /// Split this page at its midpoint, moving the upper half into
    /// `right`. Used by the pessimistic insert/update path (spec §4.3).
    pub fn split_into(&mut self, right: &mut Page) {
        let mid = self.records.len() / 2;
        let moved: Vec<Record> = self.records.split_off(mid);
        for r in &moved {
            self.used_bytes -= record_footprint(&r.tuple);
        }
        for r in &moved {
            right.used_bytes += record_footprint(&r.tuple);
        }
        right.records = moved;
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }
}

#[cfg(test)]
mod page_test {
    use super::*;
    use crate::types::{PrType, Value};

    fn rec(k: i64) -> Record {
        Record::new_secondary(Tuple::new(vec![Value::int(k, PrType::new(false))]))
    }

    #[test]
    fn test_ordering_preserved() {
        let mut page = Page::new_leaf(1, DEFAULT_PAGE_CAPACITY_BYTES);
        for k in [5, 1, 3, 2, 4] {
            let slot = page.lower_bound(&rec(k).tuple, &[0]);
            page.insert_at(slot, rec(k)).unwrap();
        }
        let keys: Vec<i64> = page
            .iter()
            .map(|r| match r.tuple.field(0).unwrap() {
                Value::Int { v, .. } => *v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(keys, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_overflow_on_full_page() {
        let mut page = Page::new_leaf(1, 40);
        page.insert_at(0, rec(1)).unwrap();
        let err = page.insert_at(1, rec(2));
        assert!(matches!(err, Err(Error::Overflow(..))));
    }

    #[test]
    fn test_split_keeps_order() {
        let mut left = Page::new_leaf(1, DEFAULT_PAGE_CAPACITY_BYTES);
        for k in 0..10 {
            left.insert_at(left.n_records(), rec(k)).unwrap();
        }
        let mut right = Page::new_leaf(2, DEFAULT_PAGE_CAPACITY_BYTES);
        left.split_into(&mut right);
        assert_eq!(left.n_records(), 5);
        assert_eq!(right.n_records(), 5);
    }
}
