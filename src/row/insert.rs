//! Insert path (spec §4.7) — the hard core: choreographing the B-tree,
//! the lock manager, and the undo log on a row insert.

use log::debug;

use crate::{
    btree::{BTree, SearchMode},
    buffer::{BufferPool, Mtr},
    dict::{Catalog, IndexId, TableId},
    err_at,
    lock::TrxId,
    mvcc::{Ownership, UndoOp},
    page::{PageNo, Record, SystemFields},
    txn::TxnManager,
    types::{PrType, Tuple, Value},
    Error, Result,
};

/// Outcome of `insert_entry_low`'s unique-check / modify-vs-insert split
/// (spec §4.7 step 6, supplemented per `row0ins.c`'s
/// `row_ins_must_modify`/`row_ins_duplicate_error`, SPEC_FULL §C).
pub enum InsertDisposition {
    /// No colliding key: perform a fresh physical insert.
    Fresh,
    /// A delete-marked record with this key exists and is not implicitly
    /// locked by another transaction: convert to an in-place update.
    ModifyExisting { page_no: PageNo, slot: usize },
    /// A live (non-delete-marked) record with this key exists, or it is
    /// delete-marked but implicitly owned by another active transaction.
    Duplicate,
}

/// Decide `Fresh` / `ModifyExisting` / `Duplicate` for one index entry
/// (spec §4.7 step 6.ii-iii). `implicit_owner` reports the transaction
/// that implicitly owns a delete-marked record's key, if any other than
/// the caller.
pub fn insert_entry_low(
    pool: &BufferPool,
    tree: &BTree,
    n_unique: usize,
    is_unique: bool,
    entry_key: &Tuple,
    implicit_owner: impl Fn(TrxId) -> Option<TrxId>,
) -> Result<InsertDisposition> {
    let search = Tuple::with_n_fields_cmp(entry_key.fields().to_vec(), n_unique.max(1));
    let cursor = tree.search(pool, &search, SearchMode::Le)?;

    if !is_unique {
        return Ok(InsertDisposition::Fresh);
    }

    let dup_slot = if cursor.low_match >= n_unique {
        cursor.slot
    } else if cursor.up_match >= n_unique {
        Some(cursor.slot.map_or(0, |s| s + 1))
    } else {
        None
    };

    let slot = match dup_slot {
        Some(s) => s,
        None => return Ok(InsertDisposition::Fresh),
    };

    let page = pool.page_get_s(cursor.page_no)?;
    let rec = match page.record(slot) {
        Some(rec) => rec,
        None => return Ok(InsertDisposition::Fresh),
    };

    if !rec.get_deleted_flag() {
        return Ok(InsertDisposition::Duplicate);
    }
    let rec_trx = rec.trx_id().unwrap_or(0);
    if implicit_owner(rec_trx).is_some() {
        return Ok(InsertDisposition::Duplicate);
    }
    Ok(InsertDisposition::ModifyExisting { page_no: cursor.page_no, slot: slot })
}

/// `insert_entry(index, entry)` (spec §4.7 step 5-6): resolve the
/// disposition and either convert to an in-place update (un-delete-mark,
/// rewrite non-key fields) or perform the physical insert, falling back
/// pessimistically on overflow the way `BTree::insert` already does.
pub fn insert_entry(
    pool: &BufferPool,
    mtr: &mut Mtr,
    tree: &mut BTree,
    n_unique: usize,
    is_unique: bool,
    record: Record,
    implicit_owner: impl Fn(TrxId) -> Option<TrxId>,
) -> Result<InsertDisposition> {
    match insert_entry_low(pool, tree, n_unique, is_unique, &record.tuple, implicit_owner)? {
        InsertDisposition::Duplicate => Ok(InsertDisposition::Duplicate),
        InsertDisposition::ModifyExisting { page_no, slot } => {
            pool.mutate_page(mtr, page_no, |page| {
                if let Some(r) = page.record_mut(slot) {
                    r.set_deleted_flag(false);
                    if record.sys.is_some() {
                        r.sys = record.sys;
                    }
                }
                page.update_in_place(slot, record.tuple.clone())
            })?;
            Ok(InsertDisposition::ModifyExisting { page_no, slot })
        }
        InsertDisposition::Fresh => {
            tree.insert(pool, mtr, record)?;
            Ok(InsertDisposition::Fresh)
        }
    }
}

/// Post-insert full-leaf rescan for secondary unique indexes (spec §4.7
/// step 6.ii third bullet, "callers ... must, after the physical insert,
/// run a full leaf scan ... to confirm exactly one non-deletable record
/// exists"). Zero matches is treated as `Error::Corruption`, not a silent
/// fallthrough (SPEC_FULL §D decision 2).
pub fn rescan_secondary_unique(pool: &BufferPool, tree: &BTree, key: &Tuple, n_unique: usize) -> Result<()> {
    let search = Tuple::with_n_fields_cmp(key.fields().to_vec(), n_unique);
    let mut cursor = tree.search(pool, &search, SearchMode::Ge)?;
    let mut live = 0u32;
    loop {
        let slot = match cursor.slot {
            Some(s) => s,
            None => break,
        };
        let page = pool.page_get_s(cursor.page_no)?;
        let rec = match page.record(slot) {
            Some(r) => r,
            None => break,
        };
        if search.cmp(&rec.tuple, tree.prefix_lens()) != std::cmp::Ordering::Equal {
            break;
        }
        if !rec.get_deleted_flag() {
            live += 1;
        }
        let rec_tuple = rec.tuple.clone();
        cursor = tree.search(pool, &rec_tuple, SearchMode::Gt)?;
    }
    if live == 0 {
        return err_at!(Corruption, msg: "secondary unique rescan found zero live matches for a just-inserted key");
    }
    Ok(())
}

/// Build a secondary index entry: the index's own key fields, followed
/// by the clustered-key columns (spec §3, "the row reference").
pub fn build_secondary_entry(row: &Tuple, field_positions: &[usize], clustered_key_positions: &[usize]) -> Tuple {
    let mut fields: Vec<Value> = field_positions
        .iter()
        .filter_map(|&p| row.field(p).cloned())
        .collect();
    fields.extend(clustered_key_positions.iter().filter_map(|&p| row.field(p).cloned()));
    Tuple::new(fields)
}

/// `insert_row` (spec §4.7 steps 1-7): acquire IX, allocate a row-id if
/// the clustered key isn't user-unique, then insert into every index in
/// declared order. Stops and returns the first error; callers that need
/// the rollback-to-savepoint behavior of §7 do so at the statement layer.
pub struct RowInsert<'a> {
    pub catalog: &'a mut Catalog,
    pub pool: &'a BufferPool,
    pub txns: &'a TxnManager,
    pub trees: &'a mut std::collections::HashMap<IndexId, BTree>,
    pub row_id_alloc: &'a std::sync::atomic::AtomicU64,
}

impl<'a> RowInsert<'a> {
    pub fn insert_row(&mut self, mtr: &mut Mtr, trx_id: TrxId, table: TableId, mut row: Tuple) -> Result<()> {
        self.txns.acquire_ix(trx_id, table)?;

        let clustered_id = self.catalog.table(table)?.clustered_index();
        let clustered = self.catalog.index(clustered_id)?.clone();

        let row_id = if !clustered.kind.is_unique() {
            Some(self.row_id_alloc.fetch_add(1, std::sync::atomic::Ordering::SeqCst))
        } else {
            None
        };
        if let Some(rid) = row_id {
            row = append_row_id(row, rid);
        }

        let indexes = self.catalog.table_indexes(table).to_vec();
        for (pos, &index_id) in indexes.iter().enumerate() {
            let index = self.catalog.index(index_id)?.clone();
            let is_clustered = pos == 0;

            let entry_tuple = if is_clustered {
                row.clone()
            } else {
                build_secondary_entry(&row, &field_positions(&index), &clustered_key_positions(&clustered))
            };

            let tree = self
                .trees
                .entry(index_id)
                .or_insert_with(|| BTree::attach(index.tree_root_page, index.n_fields, index.prefix_lens()));

            let implicit_owner_mvcc = self.txns.mvcc.clone();
            let implicit_owner = |rec_trx: TrxId| {
                if rec_trx != trx_id && implicit_owner_mvcc.is_active(rec_trx) {
                    Some(rec_trx)
                } else {
                    None
                }
            };

            let record = if is_clustered {
                // Peek the disposition before logging undo: an insert onto a
                // delete-marked record (spec §8 scenario 1) is an update of
                // the old version, not a fresh insert, and must be undone
                // that way on rollback.
                let peeked = insert_entry_low(
                    self.pool,
                    tree,
                    index.n_unique,
                    index.kind.is_unique(),
                    &entry_tuple,
                    &implicit_owner,
                )?;
                if matches!(peeked, InsertDisposition::Duplicate) {
                    return err_at!(DuplicateKey, msg: "index {} already contains this key", index.name);
                }
                let op = match &peeked {
                    InsertDisposition::ModifyExisting { page_no, slot } => {
                        let page = self.pool.page_get_s(*page_no)?;
                        let old = page.record(*slot).ok_or(()).or_else(|_| {
                            err_at!(Corruption, msg: "modify-existing slot vanished before update")
                        })?;
                        let old_sys = old.sys.ok_or(()).or_else(|_| {
                            err_at!(Corruption, msg: "clustered record missing system fields")
                        })?;
                        UndoOp::Update {
                            old_tuple: old.tuple.clone(),
                            old_sys,
                        }
                    }
                    _ => UndoOp::Insert { new_tuple: entry_tuple.clone() },
                };
                let prev = self.txns.append_undo(trx_id, table, index_id, op, Ownership::Owned)?;
                Record::new_clustered(
                    entry_tuple.clone(),
                    SystemFields {
                        row_id,
                        trx_id,
                        roll_ptr: Some(prev),
                    },
                )
            } else {
                Record::new_secondary(entry_tuple.clone())
            };

            let disposition = insert_entry(
                self.pool,
                mtr,
                tree,
                index.n_unique,
                index.kind.is_unique(),
                record,
                &implicit_owner,
            );

            let disposition = match disposition {
                Ok(d) => d,
                Err(Error::DuplicateKey(f, l, m)) => {
                    return Err(Error::DuplicateKey(f, l, format!("index {}: {}", index.name, m)));
                }
                Err(e) => return Err(e),
            };

            if matches!(disposition, InsertDisposition::Duplicate) {
                return err_at!(DuplicateKey, msg: "index {} already contains this key", index.name);
            }

            if !is_clustered && index.kind == crate::dict::IndexKind::SecondaryUnique {
                rescan_secondary_unique(self.pool, tree, &entry_tuple, index.n_unique)?;
            }

            self.catalog.index_mut(index_id)?.tree_root_page = tree.root();
            debug!("inserted into index {} ({:?})", index.name, index.kind);
        }
        Ok(())
    }
}

fn field_positions(index: &crate::dict::Index) -> Vec<usize> {
    index.fields.iter().map(|f| f.column).collect()
}

fn clustered_key_positions(clustered: &crate::dict::Index) -> Vec<usize> {
    clustered.fields.iter().take(clustered.n_unique).map(|f| f.column).collect()
}

fn append_row_id(row: Tuple, row_id: u64) -> Tuple {
    let mut fields = row.fields().to_vec();
    fields.push(Value::int(row_id as i64, PrType::new(false)));
    Tuple::new(fields)
}

#[cfg(test)]
mod insert_test {
    use super::*;
    use crate::{
        buffer::mtr_start,
        dict::{Column, IndexField, IndexKind},
        lock::LockManager,
        mvcc::MvccManager,
        types::TypeId,
    };
    use std::{sync::Arc, time::Duration};

    fn setup() -> (Catalog, BufferPool, TxnManager, TableId) {
        let mut cat = Catalog::new();
        let cols = vec![
            Column::new("a", 0, TypeId::Int, PrType::new(false)),
            Column::new("b", 1, TypeId::Int, PrType::new(false)),
        ];
        let t = cat.create_table("t", cols);
        let pool = BufferPool::new(crate::page::DEFAULT_PAGE_CAPACITY_BYTES);
        let root = pool.alloc_leaf();
        cat.add_index(
            t,
            "PRIMARY",
            IndexKind::ClusteredUnique,
            1,
            vec![IndexField { column: 0, prefix_len: 0 }],
            root,
        )
        .unwrap();
        let locks = Arc::new(LockManager::new(Duration::from_secs(1)));
        let mvcc = Arc::new(MvccManager::new());
        let txns = TxnManager::new(locks, mvcc);
        (cat, pool, txns, t)
    }

    #[test]
    fn test_insert_fresh_row() {
        let (mut cat, pool, txns, table) = setup();
        let mut trees = std::collections::HashMap::new();
        let row_id_alloc = std::sync::atomic::AtomicU64::new(1);
        let trx = txns.begin(crate::txn::Isolation::RepeatableRead);
        let mut mtr = mtr_start();
        {
            let mut ri = RowInsert {
                catalog: &mut cat,
                pool: &pool,
                txns: &txns,
                trees: &mut trees,
                row_id_alloc: &row_id_alloc,
            };
            ri.insert_row(
                &mut mtr,
                trx,
                table,
                Tuple::new(vec![Value::int(1, PrType::new(false)), Value::int(2, PrType::new(false))]),
            )
            .unwrap();
        }
        mtr.commit();
        let idx = cat.table(table).unwrap().clustered_index();
        let tree = trees.get(&idx).unwrap();
        let search = Tuple::with_n_fields_cmp(vec![Value::int(1, PrType::new(false))], 1);
        let cursor = tree.search(&pool, &search, SearchMode::Eq).unwrap();
        assert!(cursor.is_on_user_record());
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let (mut cat, pool, txns, table) = setup();
        let mut trees = std::collections::HashMap::new();
        let row_id_alloc = std::sync::atomic::AtomicU64::new(1);
        let trx = txns.begin(crate::txn::Isolation::RepeatableRead);
        let mut mtr = mtr_start();
        let mut ri = RowInsert {
            catalog: &mut cat,
            pool: &pool,
            txns: &txns,
            trees: &mut trees,
            row_id_alloc: &row_id_alloc,
        };
        ri.insert_row(
            &mut mtr,
            trx,
            table,
            Tuple::new(vec![Value::int(1, PrType::new(false)), Value::int(2, PrType::new(false))]),
        )
        .unwrap();
        let err = ri.insert_row(
            &mut mtr,
            trx,
            table,
            Tuple::new(vec![Value::int(1, PrType::new(false)), Value::int(9, PrType::new(false))]),
        );
        assert!(matches!(err, Err(Error::DuplicateKey(..))));
    }
}
