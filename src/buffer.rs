//! Stand-in for the out-of-scope buffer pool / write-ahead (redo) log /
//! file manager collaborator (spec §6). The rest of the crate only calls
//! the narrow interface described there — `page_get`, `mtr_start`,
//! `mtr_commit` — so a real engine can swap this module out without
//! touching the B-tree, lock manager, or row paths.
//!
//! Pages are held as copy-on-write snapshots (`Arc<Page>`) behind a
//! per-page [`Spinlock`], the same pattern the teacher's MVCC index
//! uses for its root pointer: a reader clones the `Arc` and never blocks
//! a concurrent mutator; a mutator clones the page's contents, applies
//! its change, and swaps the pointer in one step under the latch.

use std::{
    collections::HashMap,
    sync::{atomic::{AtomicU64, Ordering::SeqCst}, Arc},
};

use log::debug;

use crate::{
    err_at,
    page::{Page, PageNo},
    util::Spinlock,
    Result,
};

/// A mini-transaction: batches the redo description of every page
/// mutation made while it is open. `commit()` is the point at which
/// those mutations become durable (spec §6, "mtr_commit() appends the
/// mtr's buffer atomically to the redo log").
pub struct Mtr {
    redo: Vec<String>,
}

impl Mtr {
    fn new() -> Mtr {
        Mtr { redo: Vec::new() }
    }

    fn log(&mut self, desc: String) {
        self.redo.push(desc);
    }

    /// Append this mtr's buffer to the redo log and release its page
    /// latches. In this in-process stand-in, "the redo log" is just a
    /// debug-level log line per record; a real engine fsyncs a log file
    /// here instead.
    pub fn commit(self) {
        for entry in &self.redo {
            debug!("redo: {}", entry);
        }
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }
}

struct Entry {
    latch: Spinlock<Arc<Page>>,
}

/// The buffer pool. Pages are keyed by [`PageNo`]; `page_size` is fixed
/// for the pool's lifetime (spec §6, "Page size is fixed at boot").
pub struct BufferPool {
    table: Spinlock<HashMap<PageNo, Arc<Entry>>>,
    next_page_no: AtomicU64,
    page_size: usize,
}

impl BufferPool {
    pub fn new(page_size: usize) -> BufferPool {
        BufferPool {
            table: Spinlock::new(HashMap::new()),
            next_page_no: AtomicU64::new(1),
            page_size,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Allocate and register a fresh leaf page, returning its number.
    pub fn alloc_leaf(&self) -> PageNo {
        let page_no = self.next_page_no.fetch_add(1, SeqCst);
        let page = Page::new_leaf(page_no, self.page_size);
        self.table.write().insert(
            page_no,
            Arc::new(Entry {
                latch: Spinlock::new(Arc::new(page)),
            }),
        );
        page_no
    }

    /// Allocate and register a fresh internal (non-leaf) page.
    pub fn alloc_internal(&self, level: u16) -> PageNo {
        let page_no = self.next_page_no.fetch_add(1, SeqCst);
        let page = Page::new_internal(page_no, self.page_size, level);
        self.table.write().insert(
            page_no,
            Arc::new(Entry {
                latch: Spinlock::new(Arc::new(page)),
            }),
        );
        page_no
    }

    /// Register the contents of a page allocated via `alloc_leaf`/
    /// `alloc_internal` — used by the split path to install the freshly
    /// built right-hand half before linking it into the parent.
    pub fn install_page(&self, page_no: PageNo, page: Page) {
        let mut table = self.table.write();
        if let Some(entry) = table.get(&page_no) {
            *entry.latch.write() = Arc::new(page);
        } else {
            table.insert(
                page_no,
                Arc::new(Entry {
                    latch: Spinlock::new(Arc::new(page)),
                }),
            );
        }
    }

    fn entry(&self, page_no: PageNo) -> Result<Arc<Entry>> {
        self.table
            .read()
            .get(&page_no)
            .cloned()
            .ok_or(())
            .or_else(|_| err_at!(Corruption, msg: "no such page {}", page_no))
    }

    /// `page_get(page_no, S)`: take an immutable snapshot of a page.
    /// Releasing the returned `Arc` is equivalent to dropping the latch
    /// (spec §6).
    pub fn page_get_s(&self, page_no: PageNo) -> Result<Arc<Page>> {
        let entry = self.entry(page_no)?;
        let guard = entry.latch.read();
        Ok(Arc::clone(&guard))
    }

    /// `page_get(page_no, X)` + mutate + implicit `mtr_commit` of this
    /// one page's redo: acquire the X latch, hand the page to `f`, and
    /// swap in the result only if `f` succeeds. `f` returning `Err`
    /// leaves the page untouched (used for `Error::Overflow`/
    /// `Error::Underflow` internal signals, spec §4.3).
    pub fn mutate_page<F, R>(&self, mtr: &mut Mtr, page_no: PageNo, f: F) -> Result<R>
    where
        F: FnOnce(&mut Page) -> Result<R>,
    {
        let entry = self.entry(page_no)?;
        let mut guard = entry.latch.write();
        let mut next = (**guard).clone();
        let result = f(&mut next)?;
        mtr.log(format!(
            "page {} now has {} records",
            page_no,
            next.n_records()
        ));
        *guard = Arc::new(next);
        Ok(result)
    }
}

/// `mtr_start()`: open a mini-transaction (spec §6).
pub fn mtr_start() -> Mtr {
    Mtr::new()
}

#[cfg(test)]
mod buffer_test {
    use super::*;

    #[test]
    fn test_alloc_and_snapshot() {
        let pool = BufferPool::new(4096);
        let page_no = pool.alloc_leaf();
        let page = pool.page_get_s(page_no).unwrap();
        assert!(page.is_leaf());
        assert_eq!(page.n_records(), 0);
    }

    #[test]
    fn test_mutate_swaps_snapshot() {
        let pool = BufferPool::new(4096);
        let page_no = pool.alloc_leaf();
        let mut mtr = mtr_start();
        pool.mutate_page(&mut mtr, page_no, |page| {
            page.insert_at(
                0,
                crate::page::Record::new_secondary(crate::types::Tuple::new(vec![
                    crate::types::Value::int(1, crate::types::PrType::new(false)),
                ])),
            )
        })
        .unwrap();
        mtr.commit();
        let page = pool.page_get_s(page_no).unwrap();
        assert_eq!(page.n_records(), 1);
    }

    #[test]
    fn test_failed_mutation_leaves_page_untouched() {
        let pool = BufferPool::new(40);
        let page_no = pool.alloc_leaf();
        let mut mtr = mtr_start();
        pool.mutate_page(&mut mtr, page_no, |page| {
            page.insert_at(
                0,
                crate::page::Record::new_secondary(crate::types::Tuple::new(vec![
                    crate::types::Value::int(1, crate::types::PrType::new(false)),
                ])),
            )
        })
        .unwrap();
        let res = pool.mutate_page(&mut mtr, page_no, |page| {
            page.insert_at(
                1,
                crate::page::Record::new_secondary(crate::types::Tuple::new(vec![
                    crate::types::Value::int(2, crate::types::PrType::new(false)),
                ])),
            )
        });
        assert!(res.is_err());
        let page = pool.page_get_s(page_no).unwrap();
        assert_eq!(page.n_records(), 1);
    }
}
