//! Update/delete path (spec §4.8): modify or logical-delete the
//! clustered record a select cursor has positioned on, propagate the
//! change through secondary indexes, and chain the undo log.

pub mod cascade;

use log::debug;

use crate::{
    btree::{BTree, SearchMode},
    buffer::{BufferPool, Mtr},
    dict::{Catalog, IndexId, TableId},
    err_at,
    lock::TrxId,
    mvcc::{Ownership, UndoOp},
    page::{Record, SystemFields},
    row::insert::{build_secondary_entry, insert_entry, InsertDisposition},
    txn::TxnManager,
    types::{Tuple, TypeId},
    Error, Result,
};

/// How a clustered update is carried out (spec §4.8 point 3).
enum UpdateClass {
    /// Ordering (key) fields are unchanged: try in place, falling back to
    /// delete-and-reinsert on overflow.
    NonKeyChange,
    /// Ordering fields changed: always delete-mark the old version and
    /// insert a new one, inheriting externally stored fields that carry
    /// over unchanged (spec §4.8 point 3 second bullet).
    OrderChange,
}

fn classify(clustered_n_unique: usize, old_row: &Tuple, new_row: &Tuple) -> UpdateClass {
    let key_changed = (0..clustered_n_unique).any(|i| old_row.field(i) != new_row.field(i));
    if key_changed {
        UpdateClass::OrderChange
    } else {
        UpdateClass::NonKeyChange
    }
}

/// Columns whose value is unchanged between `old` and `new` and whose
/// type is externally stored (`BLOB`): these are inherited, not owned,
/// by the replacement record (spec C, `row0upd.c`'s ownership-transfer
/// bit, SPEC_FULL §C).
fn inherited_blob_positions(old: &Tuple, new: &Tuple, types: &[TypeId]) -> Vec<usize> {
    types
        .iter()
        .enumerate()
        .filter(|(i, t)| **t == TypeId::Blob && old.field(*i) == new.field(*i))
        .map(|(i, _)| i)
        .collect()
}

/// Shared context for a single modify/delete, mirroring `RowInsert`'s
/// shape (spec §4.7's per-index bookkeeping reused for §4.8).
pub struct RowUpdate<'a> {
    pub catalog: &'a mut Catalog,
    pub pool: &'a BufferPool,
    pub txns: &'a TxnManager,
    pub trees: &'a mut std::collections::HashMap<IndexId, BTree>,
}

impl<'a> RowUpdate<'a> {
    /// `upd_node` without `is_delete` (spec §4.8 points 1-5): the select
    /// cursor has already positioned on and X-locked the clustered
    /// record; `old_row`/`new_row` are full row images.
    pub fn update_row(
        &mut self,
        mtr: &mut Mtr,
        trx_id: TrxId,
        table: TableId,
        old_row: Tuple,
        new_row: Tuple,
    ) -> Result<()> {
        self.txns.acquire_ix(trx_id, table)?;

        let cascades = cascade::plan(self.catalog, table, false)?;
        for action in &cascades {
            if action.kind == cascade::CascadeKind::Restrict {
                debug!("fk {} requires a referential check, deferred to the caller", action.fk);
            }
        }

        let clustered_id = self.catalog.table(table)?.clustered_index();
        let clustered = self.catalog.index(clustered_id)?.clone();
        let types: Vec<TypeId> = self.catalog.table(table)?.columns.iter().map(|c| c.type_id).collect();

        let tree = self
            .trees
            .entry(clustered_id)
            .or_insert_with(|| BTree::attach(clustered.tree_root_page, clustered.n_fields, clustered.prefix_lens()));

        let old_search = Tuple::with_n_fields_cmp(old_row.fields().to_vec(), clustered.n_unique);
        let cursor = tree.search(self.pool, &old_search, SearchMode::Eq)?;
        if !cursor.is_on_user_record() {
            return err_at!(RecordNotFound, msg: "clustered record vanished under index {}", clustered.name);
        }
        let slot = cursor.slot.unwrap();
        let page = self.pool.page_get_s(cursor.page_no)?;
        let old_record = page
            .record(slot)
            .cloned()
            .ok_or(())
            .or_else(|_| err_at!(Corruption, msg: "slot {} vanished under index {}", slot, clustered.name))?;
        drop(page);

        let prev = self.txns.append_undo(
            trx_id,
            table,
            clustered_id,
            UndoOp::Update {
                old_tuple: old_record.tuple.clone(),
                old_sys: old_record.sys.unwrap_or_else(|| SystemFields::new(trx_id)),
            },
            Ownership::Owned,
        )?;
        let new_sys = SystemFields {
            row_id: old_record.sys.and_then(|s| s.row_id),
            trx_id,
            roll_ptr: Some(prev),
        };

        match classify(clustered.n_unique, &old_row, &new_row) {
            UpdateClass::NonKeyChange => {
                let in_place = self.pool.mutate_page(mtr, cursor.page_no, |p| {
                    if let Some(r) = p.record_mut(slot) {
                        r.sys = Some(new_sys);
                    }
                    p.update_in_place(slot, new_row.clone())
                });
                match in_place {
                    Ok(()) => {}
                    Err(Error::Overflow(..)) => {
                        tree.delete(self.pool, mtr, &cursor)?;
                        tree.insert(self.pool, mtr, Record::new_clustered(new_row.clone(), new_sys))?;
                    }
                    Err(e) => return Err(e),
                }
            }
            UpdateClass::OrderChange => {
                self.pool.mutate_page(mtr, cursor.page_no, |p| {
                    if let Some(r) = p.record_mut(slot) {
                        r.set_deleted_flag(true);
                    }
                    Ok(())
                })?;
                let ownership = {
                    let inherited = inherited_blob_positions(&old_record.tuple, &new_row, &types);
                    if inherited.is_empty() {
                        Ownership::Owned
                    } else {
                        Ownership::Inherited(inherited)
                    }
                };
                self.txns.append_undo(
                    trx_id,
                    table,
                    clustered_id,
                    UndoOp::Insert { new_tuple: new_row.clone() },
                    ownership,
                )?;
                tree.insert(self.pool, mtr, Record::new_clustered(new_row.clone(), new_sys))?;
            }
        }
        self.catalog.index_mut(clustered_id)?.tree_root_page = tree.root();

        let secondary_ids = self.catalog.table(table)?.secondary_indexes().to_vec();
        for index_id in secondary_ids {
            let index = self.catalog.index(index_id)?.clone();
            let fields: Vec<usize> = index.fields.iter().map(|f| f.column).collect();
            let key_touched = fields.iter().any(|&p| old_row.field(p) != new_row.field(p));
            if !key_touched {
                continue;
            }
            let clustered_key_positions: Vec<usize> =
                clustered.fields.iter().take(clustered.n_unique).map(|f| f.column).collect();
            let old_entry = build_secondary_entry(&old_row, &fields, &clustered_key_positions);
            let new_entry = build_secondary_entry(&new_row, &fields, &clustered_key_positions);

            let tree = self
                .trees
                .entry(index_id)
                .or_insert_with(|| BTree::attach(index.tree_root_page, index.n_fields, index.prefix_lens()));

            let old_cursor = tree.search(self.pool, &old_entry, SearchMode::Eq)?;
            if let Some(slot) = old_cursor.slot {
                self.pool.mutate_page(mtr, old_cursor.page_no, |p| {
                    if let Some(r) = p.record_mut(slot) {
                        r.set_deleted_flag(true);
                    }
                    Ok(())
                })?;
            }

            let implicit_owner_mvcc = self.txns.mvcc.clone();
            let record = Record::new_secondary(new_entry.clone());
            let disposition = insert_entry(self.pool, mtr, tree, index.n_unique, index.kind.is_unique(), record, |rec_trx| {
                if rec_trx != trx_id && implicit_owner_mvcc.is_active(rec_trx) {
                    Some(rec_trx)
                } else {
                    None
                }
            })?;
            if matches!(disposition, InsertDisposition::Duplicate) {
                return err_at!(DuplicateKey, msg: "index {} already contains this key", index.name);
            }
            self.catalog.index_mut(index_id)?.tree_root_page = tree.root();
        }
        Ok(())
    }
}

/// Logical delete (spec §4.8, `is_delete = true`): delete-mark the
/// clustered record and every secondary entry, writing one undo record
/// per index touched.
pub struct RowDelete<'a> {
    pub catalog: &'a mut Catalog,
    pub pool: &'a BufferPool,
    pub txns: &'a TxnManager,
    pub trees: &'a mut std::collections::HashMap<IndexId, BTree>,
}

impl<'a> RowDelete<'a> {
    pub fn delete_row(&mut self, mtr: &mut Mtr, trx_id: TrxId, table: TableId, row: Tuple) -> Result<()> {
        self.txns.acquire_ix(trx_id, table)?;

        let cascades = cascade::plan(self.catalog, table, true)?;
        for action in &cascades {
            if action.kind == cascade::CascadeKind::Restrict {
                debug!("fk {} requires a referential check, deferred to the caller", action.fk);
            }
        }

        let clustered_id = self.catalog.table(table)?.clustered_index();
        let clustered = self.catalog.index(clustered_id)?.clone();

        let tree = self
            .trees
            .entry(clustered_id)
            .or_insert_with(|| BTree::attach(clustered.tree_root_page, clustered.n_fields, clustered.prefix_lens()));

        let search = Tuple::with_n_fields_cmp(row.fields().to_vec(), clustered.n_unique);
        let cursor = tree.search(self.pool, &search, SearchMode::Eq)?;
        let slot = match cursor.slot {
            Some(s) => s,
            None => return err_at!(RecordNotFound, msg: "delete target vanished under index {}", clustered.name),
        };
        let page = self.pool.page_get_s(cursor.page_no)?;
        let old_record = page
            .record(slot)
            .cloned()
            .ok_or(())
            .or_else(|_| err_at!(Corruption, msg: "slot {} vanished under index {}", slot, clustered.name))?;
        drop(page);

        self.txns.append_undo(
            trx_id,
            table,
            clustered_id,
            UndoOp::Delete {
                old_tuple: old_record.tuple.clone(),
                old_sys: old_record.sys.unwrap_or_else(|| SystemFields::new(trx_id)),
            },
            Ownership::Owned,
        )?;
        self.pool.mutate_page(mtr, cursor.page_no, |p| {
            if let Some(r) = p.record_mut(slot) {
                r.set_deleted_flag(true);
                if let Some(sys) = r.sys.as_mut() {
                    sys.trx_id = trx_id;
                }
            }
            Ok(())
        })?;

        let secondary_ids = self.catalog.table(table)?.secondary_indexes().to_vec();
        for index_id in secondary_ids {
            let index = self.catalog.index(index_id)?.clone();
            let fields: Vec<usize> = index.fields.iter().map(|f| f.column).collect();
            let clustered_key_positions: Vec<usize> =
                clustered.fields.iter().take(clustered.n_unique).map(|f| f.column).collect();
            let entry = build_secondary_entry(&row, &fields, &clustered_key_positions);

            let tree = self
                .trees
                .entry(index_id)
                .or_insert_with(|| BTree::attach(index.tree_root_page, index.n_fields, index.prefix_lens()));
            let sec_cursor = tree.search(self.pool, &entry, SearchMode::Eq)?;
            if let Some(slot) = sec_cursor.slot {
                self.pool.mutate_page(mtr, sec_cursor.page_no, |p| {
                    if let Some(r) = p.record_mut(slot) {
                        r.set_deleted_flag(true);
                    }
                    Ok(())
                })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod update_test {
    use super::*;
    use crate::{
        buffer::mtr_start,
        dict::{Column, IndexField, IndexKind},
        lock::LockManager,
        mvcc::MvccManager,
        page::DEFAULT_PAGE_CAPACITY_BYTES,
        row::insert::RowInsert,
        txn::Isolation,
        types::{PrType, Value},
    };
    use std::{sync::Arc, sync::atomic::AtomicU64, time::Duration};

    fn setup() -> (Catalog, BufferPool, TxnManager, TableId) {
        let mut cat = Catalog::new();
        let cols = vec![
            Column::new("a", 0, TypeId::Int, PrType::new(false)),
            Column::new("b", 1, TypeId::Int, PrType::new(false)),
        ];
        let t = cat.create_table("t", cols);
        let pool = BufferPool::new(DEFAULT_PAGE_CAPACITY_BYTES);
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
    fn test_non_key_update_in_place() {
        let (mut cat, pool, txns, table) = setup();
        let mut trees = std::collections::HashMap::new();
        let row_id_alloc = AtomicU64::new(1);
        let trx = txns.begin(Isolation::RepeatableRead);
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
        {
            let mut ru = RowUpdate {
                catalog: &mut cat,
                pool: &pool,
                txns: &txns,
                trees: &mut trees,
            };
            ru.update_row(
                &mut mtr,
                trx,
                table,
                Tuple::new(vec![Value::int(1, PrType::new(false)), Value::int(2, PrType::new(false))]),
                Tuple::new(vec![Value::int(1, PrType::new(false)), Value::int(99, PrType::new(false))]),
            )
            .unwrap();
        }
        mtr.commit();

        let idx = cat.table(table).unwrap().clustered_index();
        let tree = trees.get(&idx).unwrap();
        let search = Tuple::with_n_fields_cmp(vec![Value::int(1, PrType::new(false))], 1);
        let cursor = tree.search(&pool, &search, SearchMode::Eq).unwrap();
        let page = pool.page_get_s(cursor.page_no).unwrap();
        let rec = page.record(cursor.slot.unwrap()).unwrap();
        assert_eq!(rec.tuple.field(1), Some(&Value::int(99, PrType::new(false))));
    }

    #[test]
    fn test_delete_marks_clustered_record() {
        let (mut cat, pool, txns, table) = setup();
        let mut trees = std::collections::HashMap::new();
        let row_id_alloc = AtomicU64::new(1);
        let trx = txns.begin(Isolation::RepeatableRead);
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
        {
            let mut rd = RowDelete {
                catalog: &mut cat,
                pool: &pool,
                txns: &txns,
                trees: &mut trees,
            };
            rd.delete_row(
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
        let page = pool.page_get_s(cursor.page_no).unwrap();
        let rec = page.record(cursor.slot.unwrap()).unwrap();
        assert!(rec.get_deleted_flag());
    }
}
