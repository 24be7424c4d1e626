//! Undo log, read views, and version reconstruction (spec §4.5).
//!
//! Every modifying statement appends undo records describing how to
//! revert one primary-index change; a record's `ROLL_PTR` addresses the
//! most recent one. `build_previous_version` walks that chain to find
//! the newest version visible under a given read view.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering::SeqCst},
        Mutex,
    },
};

use cbordata::Cborize;
use log::info;

use crate::{
    dict::{IndexId, TableId},
    err_at,
    lock::TrxId,
    page::{RollPtr, SystemFields},
    types::Tuple,
    Result,
};

const MVCC_VER: u32 = 0x00010001;

/// Whether an externally-stored column on this record is owned by it (and
/// so must be freed if this record is purged) or merely inherited from a
/// prior version during a key-changing update (spec C, `row0upd.c`'s
/// ownership-transfer bit: a rollback must not double-free a column the
/// new record doesn't actually own).
#[derive(Clone, Debug, PartialEq, Cborize)]
pub enum Ownership {
    Owned,
    /// Field positions inherited from the version this one replaced.
    Inherited(Vec<usize>),
}

impl Ownership {
    pub const ID: u32 = MVCC_VER;
}

/// What an undo record is enough to revert (spec §4.5 ¶1).
#[derive(Clone, Debug, PartialEq, Cborize)]
pub enum UndoOp {
    /// Reverting an insert means deleting the record by its key; carries
    /// the inserted key so rollback does not need to consult the page
    /// the record may since have moved off of.
    Insert { new_tuple: Tuple },
    Update {
        old_tuple: Tuple,
        old_sys: SystemFields,
    },
    Delete {
        old_tuple: Tuple,
        old_sys: SystemFields,
    },
}

impl UndoOp {
    pub const ID: u32 = MVCC_VER;
}

/// One undo log entry (spec §3 "Undo record", §4.5).
#[derive(Clone, Debug, PartialEq, Cborize)]
pub struct UndoRecord {
    pub trx_id: TrxId,
    pub table: TableId,
    pub index: IndexId,
    pub op: UndoOp,
    /// The roll pointer this record itself replaced, continuing the
    /// chain back through older committed versions.
    pub prev: Option<RollPtr>,
    pub ownership: Ownership,
}

impl UndoRecord {
    pub const ID: u32 = MVCC_VER;
}

/// A snapshot of which transactions count as committed for a reader
/// (spec §4.5 "Read view"). Built at transaction start for REPEATABLE
/// READ, or at statement start for READ COMMITTED — `MvccManager::open_read_view`
/// is called at whichever point the isolation level dictates.
#[derive(Clone, Debug)]
pub struct ReadView {
    pub creator_trx_id: TrxId,
    /// Exclusive upper bound: any TRX_ID >= this was not yet assigned at
    /// snapshot time.
    pub low_limit_trx_id: TrxId,
    /// Inclusive lower bound: any TRX_ID < this was committed before the
    /// oldest transaction active at snapshot time.
    pub up_limit_trx_id: TrxId,
    /// Transactions active (uncommitted) at snapshot time.
    pub active_trx_ids: HashSet<TrxId>,
}

impl ReadView {
    /// Visibility predicate (spec §4.5): below `up_limit`, or below
    /// `low_limit` and not one of the snapshot's active transactions.
    /// A transaction always sees its own writes.
    pub fn is_visible(&self, trx_id: TrxId) -> bool {
        trx_id == self.creator_trx_id
            || trx_id < self.up_limit_trx_id
            || (trx_id < self.low_limit_trx_id && !self.active_trx_ids.contains(&trx_id))
    }
}

/// Buildable parameters for the undo-log subsystem, mirroring
/// `examples/prataprc-rdms/src/robt_config.rs`'s plain-public-fields-plus-
/// named-constants shape. The one tunable today is the undo-record
/// format stamp every `Cborize` type's `ID` constant carries; purge
/// policy (how long a committed transaction's undo log is retained) is
/// out of scope per spec §1, so this crate does not invent a knob for it.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    pub format_version: u32,
}

impl Config {
    pub const DEFAULT_FORMAT_VERSION: u32 = MVCC_VER;

    pub fn new() -> Config {
        Config {
            format_version: Self::DEFAULT_FORMAT_VERSION,
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}

/// Owns the undo logs and issues read views and transaction ids. Holds no
/// lock-manager state; `txn::Transaction` wires the two together.
pub struct MvccManager {
    next_trx_id: AtomicU64,
    active: Mutex<HashSet<TrxId>>,
    undo_logs: Mutex<HashMap<TrxId, Vec<UndoRecord>>>,
}

impl MvccManager {
    pub fn new() -> MvccManager {
        MvccManager {
            next_trx_id: AtomicU64::new(1),
            active: Mutex::new(HashSet::new()),
            undo_logs: Mutex::new(HashMap::new()),
        }
    }

    /// Assign a fresh transaction id and mark it active.
    pub fn begin_trx(&self) -> TrxId {
        let trx_id = self.next_trx_id.fetch_add(1, SeqCst);
        self.active.lock().unwrap().insert(trx_id);
        trx_id
    }

    /// Take a read-view snapshot (spec §4.5): `low_limit` is the next id
    /// that would be assigned, `up_limit` is the oldest still-active
    /// transaction (or `low_limit` if none are active).
    pub fn open_read_view(&self, creator_trx_id: TrxId) -> ReadView {
        let active = self.active.lock().unwrap();
        let low_limit_trx_id = self.next_trx_id.load(SeqCst);
        let up_limit_trx_id = active.iter().copied().min().unwrap_or(low_limit_trx_id);
        ReadView {
            creator_trx_id,
            low_limit_trx_id,
            up_limit_trx_id,
            active_trx_ids: active.clone(),
        }
    }

    /// Append an undo record, returning the roll pointer the new record
    /// version should be stamped with.
    pub fn append_undo(
        &self,
        trx_id: TrxId,
        table: TableId,
        index: IndexId,
        op: UndoOp,
        ownership: Ownership,
        prev: Option<RollPtr>,
    ) -> RollPtr {
        let mut logs = self.undo_logs.lock().unwrap();
        let log = logs.entry(trx_id).or_default();
        let undo_offset = log.len() as u64;
        log.push(UndoRecord {
            trx_id,
            table,
            index,
            op,
            prev,
            ownership,
        });
        RollPtr { trx_id, undo_offset }
    }

    pub fn get_undo(&self, roll_ptr: RollPtr) -> Result<UndoRecord> {
        let logs = self.undo_logs.lock().unwrap();
        logs.get(&roll_ptr.trx_id)
            .and_then(|log| log.get(roll_ptr.undo_offset as usize))
            .cloned()
            .ok_or(())
            .or_else(|_| err_at!(Corruption, msg: "no undo record at {:?}", roll_ptr))
    }

    /// `build_previous_version` (spec §4.5): if `trx_id`/`roll_ptr` is
    /// already visible, return the current tuple; otherwise walk the
    /// chain applying each undo record's inverse until a visible version
    /// is found or the chain is exhausted.
    pub fn build_previous_version(
        &self,
        current_tuple: &Tuple,
        trx_id: TrxId,
        roll_ptr: Option<RollPtr>,
        read_view: &ReadView,
    ) -> Result<Option<Tuple>> {
        if read_view.is_visible(trx_id) {
            return Ok(Some(current_tuple.clone()));
        }
        let mut roll_ptr = roll_ptr;
        loop {
            let rp = match roll_ptr {
                Some(rp) => rp,
                None => return Ok(None),
            };
            let undo = self.get_undo(rp)?;
            let image = match &undo.op {
                UndoOp::Insert { .. } => return Ok(None),
                UndoOp::Update { old_tuple, .. } | UndoOp::Delete { old_tuple, .. } => old_tuple.clone(),
            };
            if read_view.is_visible(undo.trx_id) {
                return Ok(Some(image));
            }
            roll_ptr = undo.prev;
        }
    }

    /// Revert every undo record `trx_id` wrote, in reverse order,
    /// invoking `apply` with each one so the caller can restore the
    /// clustered/secondary records it describes (spec §4.5 "Rollback").
    /// Locks are released by the caller once this returns.
    pub fn rollback(&self, trx_id: TrxId, mut apply: impl FnMut(&UndoRecord) -> Result<()>) -> Result<()> {
        let log = {
            let mut logs = self.undo_logs.lock().unwrap();
            logs.remove(&trx_id).unwrap_or_default()
        };
        for undo in log.iter().rev() {
            apply(undo)?;
        }
        info!("trx {} rolled back {} undo records", trx_id, log.len());
        self.active.lock().unwrap().remove(&trx_id);
        Ok(())
    }

    /// Transition to `COMMITTED_IN_MEM` (spec §5): drop from the active
    /// set so future read views no longer treat this transaction as
    /// in-flight. The undo log is retained until purge decides no read
    /// view can still need it (purge itself is out of scope here).
    pub fn commit_in_mem(&self, trx_id: TrxId) {
        self.active.lock().unwrap().remove(&trx_id);
        info!("trx {} committed in memory", trx_id);
    }

    pub fn is_active(&self, trx_id: TrxId) -> bool {
        self.active.lock().unwrap().contains(&trx_id)
    }
}

impl Default for MvccManager {
    fn default() -> MvccManager {
        MvccManager::new()
    }
}

#[cfg(test)]
mod mvcc_test {
    use super::*;
    use crate::types::{PrType, Value};

    fn tuple(v: i64) -> Tuple {
        Tuple::new(vec![Value::int(v, PrType::new(false))])
    }

    #[test]
    fn test_read_view_repeatable_read_visibility() {
        let mgr = MvccManager::new();
        let r = mgr.begin_trx();
        let view = mgr.open_read_view(r);
        let w = mgr.begin_trx();
        mgr.commit_in_mem(w);
        assert!(!view.is_visible(w));

        let fresh_view = mgr.open_read_view(r);
        assert!(fresh_view.is_visible(w));
    }

    #[test]
    fn test_build_previous_version_walks_chain() {
        let mgr = MvccManager::new();
        let w1 = mgr.begin_trx();
        let reader = mgr.begin_trx();
        let view = mgr.open_read_view(reader);

        let rp1 = mgr.append_undo(w1, 0, 0, UndoOp::Insert { new_tuple: tuple(1) }, Ownership::Owned, None);
        mgr.commit_in_mem(w1);

        let w2 = mgr.begin_trx();
        let _rp2 = mgr.append_undo(
            w2,
            0,
            0,
            UndoOp::Update {
                old_tuple: tuple(1),
                old_sys: SystemFields::new(w1),
            },
            Ownership::Owned,
            Some(rp1),
        );

        let result = mgr
            .build_previous_version(&tuple(2), w2, Some(RollPtr { trx_id: w2, undo_offset: 0 }), &view)
            .unwrap();
        assert_eq!(result, Some(tuple(1)));
    }
}
