//! Top-level facade (spec §6): wires the catalog, buffer pool, lock
//! manager, MVCC manager, and row write path into the one object an
//! embedder actually calls, the way `bogn::Bogn` wires `mem`/`disk`
//! indexes together for the teacher's LSM tree.
//!
//! `Engine` owns no SQL: callers resolve names to ids themselves and
//! pass full row `Tuple`s. What it does own is the bookkeeping no
//! individual row-path function should have to repeat — schema lookups,
//! the per-index `BTree` cache, and rollback's undo replay.

use std::{
    collections::HashMap,
    sync::{atomic::AtomicU64, Arc, Mutex, RwLock},
};

use crate::{
    btree::{self, search::child_page_no, BTree, SearchMode},
    buffer::{BufferPool, Mtr},
    dict::{Catalog, Column, ForeignKeyId, IndexId, IndexField, IndexKind, TableId},
    lock::{self, LockManager, TrxId},
    mvcc::{MvccManager, UndoOp, UndoRecord},
    page::{PageNo, Record, DEFAULT_PAGE_CAPACITY_BYTES},
    row::{insert::build_secondary_entry, RowDelete, RowInsert, RowUpdate},
    txn::{Isolation, TxnManager},
    types::Tuple,
    Result,
};

/// One running instance: a schema, its backing pages, and the
/// transactional machinery sitting over them (spec §3's "Lifecycles").
pub struct Engine {
    catalog: RwLock<Catalog>,
    pool: BufferPool,
    txns: TxnManager,
    trees: Mutex<HashMap<IndexId, BTree>>,
    row_id_alloc: AtomicU64,
}

impl Engine {
    pub fn new() -> Engine {
        Engine::with_page_capacity(DEFAULT_PAGE_CAPACITY_BYTES)
    }

    pub fn with_page_capacity(page_capacity_bytes: usize) -> Engine {
        Engine::with_config(
            btree::Config {
                page_capacity_bytes,
                ..btree::Config::new()
            },
            lock::Config::new(),
        )
    }

    /// Build an engine from the subsystem `Config`s directly, rather than
    /// through one of the narrower constructors above.
    pub fn with_config(btree_config: btree::Config, lock_config: lock::Config) -> Engine {
        let locks = Arc::new(LockManager::from_config(lock_config));
        let mvcc = Arc::new(MvccManager::new());
        Engine {
            catalog: RwLock::new(Catalog::new()),
            pool: BufferPool::new(btree_config.page_capacity_bytes),
            txns: TxnManager::new(locks, mvcc),
            trees: Mutex::new(HashMap::new()),
            row_id_alloc: AtomicU64::new(1),
        }
    }

    /// DDL: create a table and its clustered index in one step, mirroring
    /// the `dict_test` fixture — a real parser-driven `CREATE TABLE`
    /// would split these, but every clustered index needs its tree
    /// allocated from this engine's own pool.
    pub fn create_table(
        &self,
        name: &str,
        columns: Vec<Column>,
        primary_key: &[usize],
    ) -> Result<TableId> {
        let mut catalog = self.catalog.write().unwrap();
        let table = catalog.create_table(name, columns);
        let root = self.pool.alloc_leaf();
        let (kind, n_unique, fields) = if primary_key.is_empty() {
            (IndexKind::ClusteredNonUnique, 0, Vec::new())
        } else {
            let fields = primary_key
                .iter()
                .map(|&c| IndexField { column: c, prefix_len: 0 })
                .collect::<Vec<_>>();
            (IndexKind::ClusteredUnique, fields.len(), fields)
        };
        catalog.add_index(table, "PRIMARY", kind, n_unique, fields, root)?;
        Ok(table)
    }

    pub fn create_index(
        &self,
        table: TableId,
        name: &str,
        unique: bool,
        fields: Vec<IndexField>,
    ) -> Result<IndexId> {
        let mut catalog = self.catalog.write().unwrap();
        let root = self.pool.alloc_leaf();
        let n_unique = fields.len();
        let kind = if unique {
            IndexKind::SecondaryUnique
        } else {
            IndexKind::SecondaryNonUnique
        };
        catalog.add_index(table, name, kind, n_unique, fields, root)
    }

    pub fn add_foreign_key(
        &self,
        table: TableId,
        name: &str,
        referenced_table: TableId,
        columns: Vec<usize>,
        referenced_columns: Vec<usize>,
        cascade_delete: bool,
        cascade_update: bool,
    ) -> Result<ForeignKeyId> {
        let mut catalog = self.catalog.write().unwrap();
        Ok(catalog.add_foreign_key(
            table,
            name,
            referenced_table,
            columns,
            referenced_columns,
            cascade_delete,
            cascade_update,
        ))
    }

    pub fn begin(&self, isolation: Isolation) -> TrxId {
        self.txns.begin(isolation)
    }

    pub fn commit(&self, trx_id: TrxId) -> Result<()> {
        self.txns.commit(trx_id)
    }

    /// Roll back every change `trx_id` made (spec §4.5 "Rollback"),
    /// replaying its undo log through [`Engine::revert`].
    pub fn rollback(&self, trx_id: TrxId) -> Result<()> {
        self.txns.rollback(trx_id, |undo| self.revert(undo))
    }

    pub fn insert(&self, mtr: &mut Mtr, trx_id: TrxId, table: TableId, row: Tuple) -> Result<()> {
        let mut catalog = self.catalog.write().unwrap();
        let mut trees = self.trees.lock().unwrap();
        let mut ri = RowInsert {
            catalog: &mut catalog,
            pool: &self.pool,
            txns: &self.txns,
            trees: &mut trees,
            row_id_alloc: &self.row_id_alloc,
        };
        ri.insert_row(mtr, trx_id, table, row)
    }

    pub fn update(
        &self,
        mtr: &mut Mtr,
        trx_id: TrxId,
        table: TableId,
        old_row: Tuple,
        new_row: Tuple,
    ) -> Result<()> {
        let mut catalog = self.catalog.write().unwrap();
        let mut trees = self.trees.lock().unwrap();
        let mut ru = RowUpdate {
            catalog: &mut catalog,
            pool: &self.pool,
            txns: &self.txns,
            trees: &mut trees,
        };
        ru.update_row(mtr, trx_id, table, old_row, new_row)
    }

    pub fn delete(&self, mtr: &mut Mtr, trx_id: TrxId, table: TableId, row: Tuple) -> Result<()> {
        let mut catalog = self.catalog.write().unwrap();
        let mut trees = self.trees.lock().unwrap();
        let mut rd = RowDelete {
            catalog: &mut catalog,
            pool: &self.pool,
            txns: &self.txns,
            trees: &mut trees,
        };
        rd.delete_row(mtr, trx_id, table, row)
    }

    /// Ordered scan of `table`'s clustered index under `trx_id`'s read
    /// view (spec §8 "a full scan of the clustered index yields exactly
    /// the set of logical rows"). Walks every leaf left to right through
    /// the internal separator pointers the B-tree stores (spec §4.3);
    /// a record whose own TRX_ID is not yet visible is reconstructed
    /// through `MvccManager::build_previous_version` rather than shown
    /// or dropped outright.
    pub fn scan(&self, trx_id: TrxId, table: TableId) -> Result<Vec<Tuple>> {
        let read_view = self.txns.statement_read_view(trx_id)?;
        let clustered = {
            let catalog = self.catalog.read().unwrap();
            let t = catalog.table(table)?;
            catalog.index(t.clustered_index())?.clone()
        };

        let mut records = Vec::new();
        collect_leaf_records(&self.pool, clustered.tree_root_page, clustered.n_fields, &mut records)?;

        let mut rows = Vec::new();
        for rec in records {
            let sys = match rec.sys {
                Some(sys) => sys,
                None => continue,
            };
            let visible = if read_view.is_visible(sys.trx_id) {
                if rec.deleted {
                    None
                } else {
                    Some(rec.tuple)
                }
            } else {
                self.txns
                    .mvcc
                    .build_previous_version(&rec.tuple, sys.trx_id, sys.roll_ptr, &read_view)?
            };
            if let Some(tuple) = visible {
                rows.push(tuple);
            }
        }
        Ok(rows)
    }

    /// Undo one [`UndoRecord`] against the clustered index it names,
    /// then reconcile any secondary entries derived from the row it
    /// touched. Runs outside any mini-transaction's redo buffering:
    /// rollback itself is not something a crash should need to undo
    /// again, so each page mutation here commits its own throwaway
    /// `Mtr` immediately (spec §4.5 "Rollback").
    fn revert(&self, undo: &UndoRecord) -> Result<()> {
        let catalog = self.catalog.read().unwrap();
        let table = catalog.table(undo.table)?;
        let clustered_id = table.clustered_index();
        let clustered = catalog.index(clustered_id)?.clone();
        let secondary: Vec<_> = table.secondary_indexes().to_vec();
        drop(catalog);

        let mut mtr = crate::buffer::mtr_start();
        let (row, remove) = {
            let mut trees = self.trees.lock().unwrap();
            let tree = trees.entry(clustered_id).or_insert_with(|| {
                BTree::attach(clustered.tree_root_page, clustered.n_fields, clustered.prefix_lens())
            });

            let outcome = match &undo.op {
                UndoOp::Insert { new_tuple } => {
                    let search = Tuple::with_n_fields_cmp(new_tuple.fields().to_vec(), clustered.n_unique);
                    let cursor = tree.search(&self.pool, &search, SearchMode::Eq)?;
                    if cursor.is_on_user_record() {
                        tree.delete(&self.pool, &mut mtr, &cursor)?;
                    }
                    (new_tuple.clone(), true)
                }
                UndoOp::Update { old_tuple, old_sys } => {
                    let search = Tuple::with_n_fields_cmp(old_tuple.fields().to_vec(), clustered.n_unique);
                    let cursor = tree.search(&self.pool, &search, SearchMode::Eq)?;
                    match cursor.slot {
                        Some(slot) => {
                            self.pool.mutate_page(&mut mtr, cursor.page_no, |p| {
                                if let Some(r) = p.record_mut(slot) {
                                    r.tuple = old_tuple.clone();
                                    r.sys = Some(*old_sys);
                                    r.set_deleted_flag(false);
                                }
                                Ok(())
                            })?;
                        }
                        None => {
                            tree.insert(&self.pool, &mut mtr, Record::new_clustered(old_tuple.clone(), *old_sys))?;
                        }
                    }
                    (old_tuple.clone(), false)
                }
                UndoOp::Delete { old_tuple, old_sys } => {
                    let search = Tuple::with_n_fields_cmp(old_tuple.fields().to_vec(), clustered.n_unique);
                    let cursor = tree.search(&self.pool, &search, SearchMode::Eq)?;
                    match cursor.slot {
                        Some(slot) => {
                            self.pool.mutate_page(&mut mtr, cursor.page_no, |p| {
                                if let Some(r) = p.record_mut(slot) {
                                    r.set_deleted_flag(false);
                                    r.sys = Some(*old_sys);
                                }
                                Ok(())
                            })?;
                        }
                        None => {
                            tree.insert(&self.pool, &mut mtr, Record::new_clustered(old_tuple.clone(), *old_sys))?;
                        }
                    }
                    (old_tuple.clone(), false)
                }
            };
            self.catalog.write().unwrap().index_mut(clustered_id)?.tree_root_page = tree.root();
            outcome
        };

        self.revert_secondary_for_row(&secondary, &row, remove)?;
        mtr.commit();
        Ok(())
    }

    /// Best-effort secondary-index reconciliation for rollback: clear the
    /// delete-mark on the entry a reverted delete/update re-exposes, or
    /// remove the entry a reverted insert introduced. This does not
    /// re-run uniqueness rescans (spec §4.7 point 6) since a rollback
    /// can only be shrinking the set of live entries, never growing it.
    fn revert_secondary_for_row(&self, secondary: &[IndexId], row: &Tuple, remove: bool) -> Result<()> {
        for &index_id in secondary {
            let (index, clustered_key_positions) = {
                let catalog = self.catalog.read().unwrap();
                let index = catalog.index(index_id)?.clone();
                let table = catalog.table(index.table)?;
                let clustered = catalog.index(table.clustered_index())?;
                let positions: Vec<usize> =
                    clustered.fields.iter().take(clustered.n_unique).map(|f| f.column).collect();
                (index, positions)
            };
            let fields: Vec<usize> = index.fields.iter().map(|f| f.column).collect();
            let entry = build_secondary_entry(row, &fields, &clustered_key_positions);

            let mut trees = self.trees.lock().unwrap();
            let tree = trees
                .entry(index_id)
                .or_insert_with(|| BTree::attach(index.tree_root_page, index.n_fields, index.prefix_lens()));
            let cursor = tree.search(&self.pool, &entry, SearchMode::Eq)?;
            let slot = match cursor.slot {
                Some(s) => s,
                None => continue,
            };
            let mut mtr = crate::buffer::mtr_start();
            if remove {
                tree.delete(&self.pool, &mut mtr, &cursor)?;
            } else {
                self.pool.mutate_page(&mut mtr, cursor.page_no, |p| {
                    if let Some(r) = p.record_mut(slot) {
                        r.set_deleted_flag(false);
                    }
                    Ok(())
                })?;
            }
            self.catalog.write().unwrap().index_mut(index_id)?.tree_root_page = tree.root();
            mtr.commit();
        }
        Ok(())
    }
}

/// Depth-first left-to-right leaf collection for [`Engine::scan`]: an
/// internal page's slot `i` is the separator for its `i`-th child, so
/// visiting slots in order visits children in key order too.
fn collect_leaf_records(
    pool: &BufferPool,
    page_no: PageNo,
    key_n_fields: usize,
    out: &mut Vec<Record>,
) -> Result<()> {
    let page = pool.page_get_s(page_no)?;
    if page.is_leaf() {
        out.extend(page.iter().cloned());
    } else {
        for slot in 0..page.n_records() {
            let child = child_page_no(&page, slot, key_n_fields)?;
            collect_leaf_records(pool, child, key_n_fields, out)?;
        }
    }
    Ok(())
}

impl Default for Engine {
    fn default() -> Engine {
        Engine::new()
    }
}

#[cfg(test)]
mod engine_test {
    use super::*;
    use crate::types::{PrType, TypeId, Value};

    fn cols() -> Vec<Column> {
        vec![
            Column::new("id", 0, TypeId::Int, PrType::new(false)),
            Column::new("val", 1, TypeId::Int, PrType::new(false)),
        ]
    }

    fn row(id: i64, val: i64) -> Tuple {
        Tuple::new(vec![Value::int(id, PrType::new(false)), Value::int(val, PrType::new(false))])
    }

    #[test]
    fn test_insert_commit_visible() {
        let engine = Engine::new();
        let table = engine.create_table("t", cols(), &[0]).unwrap();
        let trx = engine.begin(Isolation::RepeatableRead);
        let mut mtr = crate::buffer::mtr_start();
        engine.insert(&mut mtr, trx, table, row(1, 10)).unwrap();
        mtr.commit();
        engine.commit(trx).unwrap();
    }

    #[test]
    fn test_insert_rollback_removes_row() {
        let engine = Engine::new();
        let table = engine.create_table("t", cols(), &[0]).unwrap();
        let trx = engine.begin(Isolation::RepeatableRead);
        let mut mtr = crate::buffer::mtr_start();
        engine.insert(&mut mtr, trx, table, row(1, 10)).unwrap();
        mtr.commit();
        engine.rollback(trx).unwrap();

        let trx2 = engine.begin(Isolation::RepeatableRead);
        let mut mtr2 = crate::buffer::mtr_start();
        // After rollback, the same key can be inserted again without a
        // duplicate-key error.
        engine.insert(&mut mtr2, trx2, table, row(1, 20)).unwrap();
        mtr2.commit();
        engine.commit(trx2).unwrap();
    }

    #[test]
    fn test_update_then_rollback_restores_old_value() {
        let engine = Engine::new();
        let table = engine.create_table("t", cols(), &[0]).unwrap();
        let trx = engine.begin(Isolation::RepeatableRead);
        let mut mtr = crate::buffer::mtr_start();
        engine.insert(&mut mtr, trx, table, row(1, 10)).unwrap();
        engine.update(&mut mtr, trx, table, row(1, 10), row(1, 99)).unwrap();
        mtr.commit();
        engine.commit(trx).unwrap();

        let trx2 = engine.begin(Isolation::RepeatableRead);
        let mut mtr2 = crate::buffer::mtr_start();
        engine.update(&mut mtr2, trx2, table, row(1, 99), row(1, 42)).unwrap();
        mtr2.commit();
        engine.rollback(trx2).unwrap();
    }

    /// `scan` must skip a row whose delete is committed and visible, but
    /// still surface one whose insert or delete isn't yet visible to the
    /// reader's own view (covered end-to-end in `tests/end_to_end.rs`).
    #[test]
    fn test_scan_skips_committed_delete() {
        let engine = Engine::new();
        let table = engine.create_table("t", cols(), &[0]).unwrap();

        let trx = engine.begin(Isolation::RepeatableRead);
        let mut mtr = crate::buffer::mtr_start();
        engine.insert(&mut mtr, trx, table, row(1, 10)).unwrap();
        engine.insert(&mut mtr, trx, table, row(2, 20)).unwrap();
        engine.delete(&mut mtr, trx, table, row(1, 10)).unwrap();
        mtr.commit();
        engine.commit(trx).unwrap();

        let reader = engine.begin(Isolation::RepeatableRead);
        assert_eq!(engine.scan(reader, table).unwrap(), vec![row(2, 20)]);
    }
}
