//! Optimistic-then-pessimistic modify path (spec §4.3): try the leaf-only
//! fast path under a single X latch first; only re-descend holding a tree
//! (root-to-leaf) latch and split when the leaf genuinely has no room.

use crate::{
    btree::search::{child_page_no, descend_path},
    buffer::{BufferPool, Mtr},
    err_at,
    page::{Page, PageNo, Record},
    types::{Tuple, Value},
    Error, Result,
};

/// Outcome of a leaf-level insert attempt.
pub enum InsertDisposition {
    /// Inserted in place, no split needed.
    Done,
    /// Leaf had no room; caller must retry pessimistically.
    NeedsSplit,
}

fn prefix_tuple(key_n_fields: usize, tuple: &Tuple) -> Tuple {
    Tuple::with_n_fields_cmp(tuple.fields().to_vec(), key_n_fields)
}

/// Optimistic insert: latch only the target leaf. Returns
/// [`InsertDisposition::NeedsSplit`] on `Error::Overflow`, swallowing the
/// internal signal (spec §4.3, "Overflow... never surfaces past
/// `btree::modify`").
pub fn insert_optimistic(
    pool: &BufferPool,
    mtr: &mut Mtr,
    leaf_no: PageNo,
    record: Record,
    key_n_fields: usize,
    prefix_lens: &[usize],
) -> Result<InsertDisposition> {
    let search = prefix_tuple(key_n_fields, &record.tuple);
    let result = pool.mutate_page(mtr, leaf_no, |page| {
        let slot = page.lower_bound(&search, prefix_lens);
        page.insert_at(slot, record)
    });
    match result {
        Ok(()) => Ok(InsertDisposition::Done),
        Err(Error::Overflow(..)) => Ok(InsertDisposition::NeedsSplit),
        Err(err) => Err(err),
    }
}

/// Pessimistic insert: re-descend from `root` holding the full
/// root-to-leaf path, split the target leaf, and propagate a new
/// separator into the parent — recursing upward if the parent itself has
/// no room, and growing the tree by one level if the root splits (spec
/// §4.3, "Pessimistic insert (split)").
pub fn insert_pessimistic(
    pool: &BufferPool,
    mtr: &mut Mtr,
    root: &mut PageNo,
    record: Record,
    key_n_fields: usize,
    prefix_lens: &[usize],
) -> Result<()> {
    let search = prefix_tuple(key_n_fields, &record.tuple);
    let path = descend_path(pool, *root, &search, key_n_fields, prefix_lens)?;

    let leaf_no = *path.last().unwrap();
    match insert_optimistic(pool, mtr, leaf_no, record.clone(), key_n_fields, prefix_lens)? {
        InsertDisposition::Done => return Ok(()),
        InsertDisposition::NeedsSplit => {}
    }

    split_and_insert(pool, mtr, root, &path, path.len() - 1, record, key_n_fields, prefix_lens)
}

/// Split the page at `path[level]`, insert `record` into whichever half it
/// belongs in, and push a new separator up into `path[level - 1]` (or
/// grow a new root if `level == 0`).
fn split_and_insert(
    pool: &BufferPool,
    mtr: &mut Mtr,
    root: &mut PageNo,
    path: &[PageNo],
    level: usize,
    record: Record,
    key_n_fields: usize,
    prefix_lens: &[usize],
) -> Result<()> {
    let page_no = path[level];
    let is_leaf = level == path.len() - 1;
    let page_level = if is_leaf {
        0
    } else {
        pool.page_get_s(page_no)?.level
    };

    let new_page_no = if is_leaf {
        pool.alloc_leaf()
    } else {
        pool.alloc_internal(page_level)
    };

    let right_snapshot = pool.mutate_page(mtr, page_no, |left| {
        let mut right = Page::new_leaf(new_page_no, left.capacity_bytes());
        right.level = left.level;
        left.split_into(&mut right);
        Ok(right)
    })?;
    pool.install_page(new_page_no, right_snapshot);

    let search = prefix_tuple(key_n_fields, &record.tuple);
    let belongs_right = {
        let right = pool.page_get_s(new_page_no)?;
        right.n_records() > 0 && search.cmp(right.tuple_at(0).unwrap(), prefix_lens) != std::cmp::Ordering::Less
    };
    let target_no = if belongs_right { new_page_no } else { page_no };
    let insert_result = pool.mutate_page(mtr, target_no, |page| {
        let slot = page.lower_bound(&search, prefix_lens);
        page.insert_at(slot, record.clone())
    });
    if let Err(Error::Overflow(..)) = insert_result {
        // Split still didn't make room (record too large for a fresh
        // half-empty page): caller has nowhere left to retry.
        return err_at!(TooBigRecord, msg: "record does not fit even after splitting page {}", page_no);
    }
    insert_result?;

    let sep_tuple = match pool.page_get_s(new_page_no)?.tuple_at(0) {
        Some(t) => t.clone(),
        None => return err_at!(Corruption, msg: "split produced empty right page {}", new_page_no),
    };

    if level == 0 {
        // Root split: allocate a fresh root one level higher, pointing at
        // both halves.
        let new_root_level = page_level + 1;
        let new_root_no = pool.alloc_internal(new_root_level);
        let left_sep = {
            let left = pool.page_get_s(page_no)?;
            match left.tuple_at(0) {
                Some(t) => t.clone(),
                None => return err_at!(Corruption, msg: "split left empty page {}", page_no),
            }
        };
        pool.mutate_page(mtr, new_root_no, |root_page| {
            root_page.insert_at(0, internal_separator(&left_sep, key_n_fields, page_no))?;
            root_page.insert_at(1, internal_separator(&sep_tuple, key_n_fields, new_page_no))
        })?;
        *root = new_root_no;
        return Ok(());
    }

    let parent_no = path[level - 1];
    let parent_record = internal_separator(&sep_tuple, key_n_fields, new_page_no);
    let parent_search = prefix_tuple(key_n_fields, &sep_tuple);
    let inserted = pool.mutate_page(mtr, parent_no, |parent| {
        let slot = parent.lower_bound(&parent_search, prefix_lens);
        parent.insert_at(slot, parent_record.clone())
    });
    match inserted {
        Ok(()) => Ok(()),
        Err(Error::Overflow(..)) => {
            split_and_insert(pool, mtr, root, path, level - 1, parent_record, key_n_fields, prefix_lens)
        }
        Err(err) => Err(err),
    }
}

fn internal_separator(key: &Tuple, key_n_fields: usize, child: PageNo) -> Record {
    let mut fields: Vec<Value> = key.fields().iter().take(key_n_fields).cloned().collect();
    fields.push(Value::int(child as i64, crate::types::PrType::new(false)));
    Record::new_secondary(Tuple::new(fields))
}

/// Optimistic delete: latch only the target leaf, remove the record, and
/// leave underfill merging to a later pass (spec §4.3 leaves merge
/// unimplemented deliberately — matching the "Non-goals" scoping out of
/// background page-merge coalescing).
pub fn delete_optimistic(
    pool: &BufferPool,
    mtr: &mut Mtr,
    leaf_no: PageNo,
    slot: usize,
) -> Result<Record> {
    pool.mutate_page(mtr, leaf_no, |page| page.delete_at(slot))
}

/// In-place update: caller has already checked `Record::same_footprint`.
pub fn update_in_place(
    pool: &BufferPool,
    mtr: &mut Mtr,
    leaf_no: PageNo,
    slot: usize,
    tuple: Tuple,
) -> Result<()> {
    pool.mutate_page(mtr, leaf_no, |page| page.update_in_place(slot, tuple))
}

pub fn child_of(pool: &BufferPool, page_no: PageNo, slot: usize, key_n_fields: usize) -> Result<PageNo> {
    let page = pool.page_get_s(page_no)?;
    child_page_no(&page, slot, key_n_fields)
}
