use crate::{
    buffer::BufferPool,
    btree::cursor::Cursor,
    err_at,
    page::{Page, PageNo},
    types::Tuple,
    Result,
};

/// Search mode for `search_to_nth_level` (spec §4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchMode {
    /// First record >= tuple.
    Ge,
    /// Last record <= tuple.
    Le,
    /// Last record strictly less than tuple.
    Lt,
    /// First record strictly greater than tuple.
    Gt,
    /// A record exactly equal to tuple, by `prefix_lens`.
    Eq,
}

/// Pick the child of an internal page whose subtree covers `tuple`:
/// the predecessor separator, or the leftmost child if `tuple` is less
/// than every separator (see module docs in `btree/mod.rs` for the
/// node-pointer convention this assumes).
fn child_slot(page: &Page, tuple: &Tuple, prefix_lens: &[usize]) -> usize {
    let idx = page.lower_bound(tuple, prefix_lens);
    match page.tuple_at(idx) {
        Some(t) if t.cmp(tuple, prefix_lens) == std::cmp::Ordering::Equal => idx,
        _ if idx == 0 => 0,
        _ => idx - 1,
    }
}

pub fn child_page_no(page: &Page, slot: usize, key_n_fields: usize) -> Result<PageNo> {
    let rec = match page.record(slot) {
        Some(rec) => rec,
        None => {
            return err_at!(Corruption, msg: "internal page {} missing slot {}", page.page_no, slot)
        }
    };
    match rec.tuple.field(key_n_fields) {
        Some(crate::types::Value::Int { v, .. }) => Ok(*v as PageNo),
        _ => err_at!(Corruption, msg: "internal page {} slot {} has no child pointer", page.page_no, slot),
    }
}

/// Descend from `root` to the leaf whose range covers `tuple`, latching
/// each internal page S only for the instant needed to pick the next
/// child (spec §4.3 latching table: reads take no tree latch, only
/// S on the leaves actually touched — here additionally momentary S on
/// internal pages, released before moving on). Returns the full
/// root-to-leaf path, used by pessimistic callers that need to walk
/// back up on split/merge.
pub fn descend_path(
    pool: &BufferPool,
    root: PageNo,
    tuple: &Tuple,
    key_n_fields: usize,
    prefix_lens: &[usize],
) -> Result<Vec<PageNo>> {
    let mut path = vec![root];
    let mut page_no = root;
    loop {
        let page = pool.page_get_s(page_no)?;
        if page.is_leaf() {
            return Ok(path);
        }
        if page.is_empty() {
            return err_at!(Corruption, msg: "internal page {} has no children", page_no);
        }
        let slot = child_slot(&page, tuple, prefix_lens);
        page_no = child_page_no(&page, slot, key_n_fields)?;
        path.push(page_no);
    }
}

/// `search_to_nth_level(index, tuple, mode, latch)` (spec §4.3):
/// descend to the leaf and position the cursor on the first record
/// matching `mode`, computing `low_match`/`up_match` against the
/// record landed on and its successor.
pub fn search_to_nth_level(
    pool: &BufferPool,
    root: PageNo,
    tuple: &Tuple,
    key_n_fields: usize,
    prefix_lens: &[usize],
    mode: SearchMode,
) -> Result<Cursor> {
    let path = descend_path(pool, root, tuple, key_n_fields, prefix_lens)?;
    let leaf_no = *path.last().unwrap();
    let leaf = pool.page_get_s(leaf_no)?;

    let idx = leaf.lower_bound(tuple, prefix_lens);
    let n = leaf.n_records();

    let slot = match mode {
        SearchMode::Ge | SearchMode::Eq => {
            if idx < n {
                Some(idx)
            } else {
                None
            }
        }
        SearchMode::Le => {
            if idx < n && leaf.tuple_at(idx).unwrap().cmp(tuple, prefix_lens) == std::cmp::Ordering::Equal {
                Some(idx)
            } else if idx > 0 {
                Some(idx - 1)
            } else {
                None
            }
        }
        SearchMode::Lt => {
            if idx > 0 {
                Some(idx - 1)
            } else {
                None
            }
        }
        SearchMode::Gt => {
            let mut j = idx;
            if j < n && leaf.tuple_at(j).unwrap().cmp(tuple, prefix_lens) == std::cmp::Ordering::Equal {
                j += 1;
            }
            if j < n {
                Some(j)
            } else {
                None
            }
        }
    };

    let low_match = match slot {
        Some(i) => leaf.tuple_at(i).unwrap().cmp_prefix(tuple, prefix_lens).matched_fields,
        None => 0,
    };
    let up_match = match slot.map(|i| i + 1).unwrap_or(0) {
        i if i < n => leaf.tuple_at(i).unwrap().cmp_prefix(tuple, prefix_lens).matched_fields,
        _ => 0,
    };

    Ok(Cursor {
        page_no: leaf_no,
        slot,
        low_match,
        up_match,
    })
}
