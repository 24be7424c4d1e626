//! Transaction handle tying together the lock manager and MVCC undo log
//! (spec §3 "Transaction", §4.5, §5 commit-visibility fence).

use std::sync::{
    atomic::{AtomicU64, Ordering::SeqCst},
    Arc,
};

use log::{info, warn};

use crate::{
    dict::{IndexId, TableId},
    lock::{LockManager, LockMode, LockTarget, TrxId},
    mvcc::{MvccManager, Ownership, ReadView, UndoOp},
    page::RollPtr,
    Result,
};

/// Transaction state machine (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrxState {
    NotStarted,
    Active,
    Committing,
    RollingBack,
    CommittedInMem,
}

/// Isolation level governs when `read_view` is (re)taken: once at
/// transaction start for `RepeatableRead`, or fresh at every statement
/// for `ReadCommitted` (spec §4.5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Isolation {
    ReadCommitted,
    RepeatableRead,
}

/// A unit of undo work charged against a transaction purely for deadlock
/// victim selection (spec §4.4 step 4, "least weight (least undo work
/// done)"); incremented once per undo record appended.
pub struct Transaction {
    pub id: TrxId,
    pub state: TrxState,
    pub isolation: Isolation,
    pub read_view: Option<ReadView>,
    /// Most recent roll pointer this transaction wrote, per clustered
    /// index touched, used to chain the next undo record.
    undo_heads: std::collections::HashMap<IndexId, RollPtr>,
    undo_weight: u64,
    pub error_state: Option<crate::Error>,
    pub is_handling_signal: bool,
}

impl Transaction {
    fn new(id: TrxId) -> Transaction {
        Transaction {
            id,
            state: TrxState::Active,
            isolation: Isolation::RepeatableRead,
            read_view: None,
            undo_heads: std::collections::HashMap::new(),
            undo_weight: 0,
            error_state: None,
            is_handling_signal: false,
        }
    }

    pub fn undo_head(&self, index: IndexId) -> Option<RollPtr> {
        self.undo_heads.get(&index).copied()
    }

    pub fn undo_weight(&self) -> u64 {
        self.undo_weight
    }
}

/// Owns every live `Transaction`, the lock manager, and the MVCC
/// manager — the object `engine::Engine` hands to the row-path
/// functions (spec §3's "Lifecycles": created on first statement, torn
/// down after commit cleanup or rollback completion).
pub struct TxnManager {
    pub locks: Arc<LockManager>,
    pub mvcc: Arc<MvccManager>,
    trxs: std::sync::Mutex<std::collections::HashMap<TrxId, Transaction>>,
    commit_fence: AtomicU64,
}

impl TxnManager {
    pub fn new(locks: Arc<LockManager>, mvcc: Arc<MvccManager>) -> TxnManager {
        TxnManager {
            locks,
            mvcc,
            trxs: std::sync::Mutex::new(std::collections::HashMap::new()),
            commit_fence: AtomicU64::new(0),
        }
    }

    pub fn begin(&self, isolation: Isolation) -> TrxId {
        let id = self.mvcc.begin_trx();
        let mut trx = Transaction::new(id);
        trx.isolation = isolation;
        if isolation == Isolation::RepeatableRead {
            trx.read_view = Some(self.mvcc.open_read_view(id));
        }
        self.trxs.lock().unwrap().insert(id, trx);
        info!("trx {} started ({:?})", id, isolation);
        id
    }

    /// Read-committed statements call this at the start of every
    /// statement to refresh the snapshot (spec §4.5); repeatable-read
    /// transactions keep the view taken at `begin`.
    pub fn statement_read_view(&self, trx_id: TrxId) -> Result<ReadView> {
        let mut trxs = self.trxs.lock().unwrap();
        let trx = get_mut(&mut trxs, trx_id)?;
        if trx.isolation == Isolation::ReadCommitted {
            trx.read_view = Some(self.mvcc.open_read_view(trx_id));
        }
        Ok(trx.read_view.clone().unwrap_or_else(|| self.mvcc.open_read_view(trx_id)))
    }

    /// Acquire an IX lock on `table` if not already held (spec §4.7
    /// point 1, §4.8 point 1).
    pub fn acquire_ix(&self, trx_id: TrxId, table: TableId) -> Result<()> {
        self.locks
            .request(trx_id, LockTarget::Table(table), LockMode::IX, |t| self.undo_weight_of(t))
    }

    pub fn acquire_record_lock(
        &self,
        trx_id: TrxId,
        target: LockTarget,
        mode: LockMode,
    ) -> Result<()> {
        self.locks.request(trx_id, target, mode, |t| self.undo_weight_of(t))
    }

    /// Block until a previously-registered `LockWait` resolves (spec
    /// §4.4 step 5, §5 cancellation).
    pub fn wait_for_lock(&self, trx_id: TrxId) -> Result<()> {
        self.locks.wait(trx_id)
    }

    fn undo_weight_of(&self, trx_id: TrxId) -> u64 {
        self.trxs
            .lock()
            .unwrap()
            .get(&trx_id)
            .map(|t| t.undo_weight())
            .unwrap_or(0)
    }

    /// Append an undo record for a clustered-index modification,
    /// chaining it behind whatever this transaction last wrote against
    /// `index` (spec §4.5 ¶1).
    pub fn append_undo(
        &self,
        trx_id: TrxId,
        table: TableId,
        index: IndexId,
        op: UndoOp,
        ownership: Ownership,
    ) -> Result<RollPtr> {
        let mut trxs = self.trxs.lock().unwrap();
        let trx = get_mut(&mut trxs, trx_id)?;
        let prev = trx.undo_head(index);
        let roll_ptr = self.mvcc.append_undo(trx_id, table, index, op, ownership, prev);
        trx.undo_heads.insert(index, roll_ptr);
        trx.undo_weight += 1;
        Ok(roll_ptr)
    }

    /// Transition to `COMMITTING` then `COMMITTED_IN_MEM`, release every
    /// lock, and publish the commit fence new read views observe (spec
    /// §5 "a fence publishes the new snapshot boundary").
    pub fn commit(&self, trx_id: TrxId) -> Result<()> {
        {
            let mut trxs = self.trxs.lock().unwrap();
            let trx = get_mut(&mut trxs, trx_id)?;
            trx.state = TrxState::Committing;
        }
        self.mvcc.commit_in_mem(trx_id);
        self.locks.release_all(trx_id);
        self.commit_fence.fetch_add(1, SeqCst);
        let mut trxs = self.trxs.lock().unwrap();
        if let Some(trx) = trxs.get_mut(&trx_id) {
            trx.state = TrxState::CommittedInMem;
        }
        trxs.remove(&trx_id);
        Ok(())
    }

    /// Roll back every undo record this transaction wrote, release its
    /// locks, and unregister it (spec §4.5 "Rollback").
    pub fn rollback(
        &self,
        trx_id: TrxId,
        mut apply: impl FnMut(&crate::mvcc::UndoRecord) -> Result<()>,
    ) -> Result<()> {
        {
            let mut trxs = self.trxs.lock().unwrap();
            if let Some(trx) = trxs.get_mut(&trx_id) {
                trx.state = TrxState::RollingBack;
            }
        }
        warn!("trx {} rolling back", trx_id);
        self.mvcc.rollback(trx_id, &mut apply)?;
        self.locks.release_all(trx_id);
        self.trxs.lock().unwrap().remove(&trx_id);
        Ok(())
    }

    pub fn set_error(&self, trx_id: TrxId, err: crate::Error) {
        if let Some(trx) = self.trxs.lock().unwrap().get_mut(&trx_id) {
            trx.error_state = Some(err);
        }
    }

    pub fn state(&self, trx_id: TrxId) -> Option<TrxState> {
        self.trxs.lock().unwrap().get(&trx_id).map(|t| t.state)
    }
}

fn get_mut(
    trxs: &mut std::collections::HashMap<TrxId, Transaction>,
    trx_id: TrxId,
) -> Result<&mut Transaction> {
    trxs.get_mut(&trx_id)
        .ok_or(())
        .or_else(|_| crate::err_at!(InvalidInput, msg: "no such transaction {}", trx_id))
}

#[cfg(test)]
mod txn_test {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_begin_commit_releases_locks() {
        let locks = Arc::new(LockManager::new(Duration::from_secs(1)));
        let mvcc = Arc::new(MvccManager::new());
        let mgr = TxnManager::new(locks, mvcc);

        let t1 = mgr.begin(Isolation::RepeatableRead);
        mgr.acquire_ix(t1, 0).unwrap();
        mgr.commit(t1).unwrap();

        let t2 = mgr.begin(Isolation::RepeatableRead);
        mgr.acquire_ix(t2, 0).unwrap();
    }

    #[test]
    fn test_rollback_invokes_apply_in_reverse() {
        let locks = Arc::new(LockManager::new(Duration::from_secs(1)));
        let mvcc = Arc::new(MvccManager::new());
        let mgr = TxnManager::new(locks, mvcc);

        let t1 = mgr.begin(Isolation::RepeatableRead);
        mgr.append_undo(t1, 0, 0, UndoOp::Insert { new_tuple: crate::types::Tuple::new(vec![]) }, Ownership::Owned).unwrap();
        mgr.append_undo(t1, 0, 0, UndoOp::Insert { new_tuple: crate::types::Tuple::new(vec![]) }, Ownership::Owned).unwrap();

        let mut seen = Vec::new();
        mgr.rollback(t1, |_undo| {
            seen.push(());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen.len(), 2);
    }
}
