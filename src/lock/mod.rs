//! Table and record lock manager (spec §4.4): intention locks at the
//! table level, S/X record locks with gap semantics at the row level, a
//! wait graph, and deadlock detection.
//!
//! Every lock-structure mutation happens under one kernel mutex (spec §5,
//! "the lock table is guarded by a single kernel mutex") — the `Mutex<Kernel>`
//! below. Finer partitioning is the "implementation freedom" §5 allows,
//! not taken here: a single mutex keeps the wait-graph snapshot trivially
//! consistent, which matters more than throughput for this crate.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

use log::{debug, warn};

use crate::{dict::IndexId, err_at, page::PageNo, util::thread::Thread, Result};

pub type TrxId = u64;

/// Lock strength/extent (spec §3, §4.4). `Gap` covers only the gap before
/// the record; `NoGap` covers only the record; the bare `S`/`X` cover the
/// record plus its preceding gap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockMode {
    IS,
    IX,
    S,
    X,
    SGap,
    XGap,
    SNoGap,
    XNoGap,
}

impl LockMode {
    fn strength(&self) -> u8 {
        match self {
            LockMode::IS | LockMode::SGap | LockMode::SNoGap | LockMode::S => 0,
            LockMode::IX | LockMode::XGap | LockMode::XNoGap | LockMode::X => 1,
        }
    }

    /// Gap-only mode: blocks insertion into the gap before the record, but
    /// not the record itself.
    fn is_gap(&self) -> bool {
        matches!(self, LockMode::SGap | LockMode::XGap)
    }

    /// Whether two modes on the *same target* may be held concurrently by
    /// different transactions (spec §4.4, "standard matrix for
    /// IS/IX/S/X"). Gap-only locks never conflict with each other or with
    /// a `NoGap`/bare lock held by someone else on the same record, since
    /// a gap lock only blocks insertion into the gap, not record access.
    fn compatible_with(&self, other: &LockMode) -> bool {
        use LockMode::*;
        match (self, other) {
            (IS, IS) | (IS, IX) | (IX, IS) | (IX, IX) => true,
            (a, b) if a.is_gap() || b.is_gap() => true,
            (a, b) if a.strength() == 0 && b.strength() == 0 => true,
            _ => false,
        }
    }
}

/// What a lock is taken on: a whole table (intention locks), or a record
/// identified by `(page_no, heap_no)` — `index` is carried only for
/// diagnostics, as spec §4.4 notes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LockTarget {
    Table(crate::dict::TableId),
    Record {
        page_no: PageNo,
        heap_no: usize,
        index: IndexId,
    },
}

#[derive(Clone, Debug)]
struct Granted {
    trx_id: TrxId,
    mode: LockMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WaitOutcome {
    Waiting,
    Granted,
    Deadlock,
    TimedOut,
}

struct WaitSlot {
    state: Mutex<WaitOutcome>,
    cv: Condvar,
    deadline: Instant,
}

struct Waiter {
    trx_id: TrxId,
    mode: LockMode,
    slot: Arc<WaitSlot>,
}

#[derive(Default)]
struct Kernel {
    granted: HashMap<LockTarget, Vec<Granted>>,
    waiters: HashMap<LockTarget, VecDeque<Waiter>>,
    /// `wait_edges[a]` = the set of transactions `a` is waiting behind.
    wait_edges: HashMap<TrxId, HashSet<TrxId>>,
    /// The single outstanding wait slot for a transaction, if any — a
    /// query-graph thread only ever blocks on one lock request at a time.
    active_wait: HashMap<TrxId, Arc<WaitSlot>>,
}

/// Buildable parameters for the lock manager, mirroring
/// `examples/prataprc-rdms/src/robt_config.rs`'s plain-public-fields-plus-
/// named-constants shape.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    pub lock_wait_timeout: Duration,
}

impl Config {
    pub const DEFAULT_LOCK_WAIT_TIMEOUT: Duration = LockManager::DEFAULT_LOCK_WAIT_TIMEOUT;

    pub fn new() -> Config {
        Config {
            lock_wait_timeout: Self::DEFAULT_LOCK_WAIT_TIMEOUT,
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}

pub struct LockManager {
    kernel: Mutex<Kernel>,
    lock_wait_timeout: Duration,
}

impl LockManager {
    pub const DEFAULT_LOCK_WAIT_TIMEOUT: Duration = Duration::from_secs(50);

    pub fn new(lock_wait_timeout: Duration) -> LockManager {
        LockManager {
            kernel: Mutex::new(Kernel::default()),
            lock_wait_timeout,
        }
    }

    pub fn from_config(config: Config) -> LockManager {
        LockManager::new(config.lock_wait_timeout)
    }

    /// Acquisition protocol steps 1-4 of spec §4.4. `trx_weight` ranks
    /// transactions by undo work done so far (least work loses ties as
    /// deadlock victim); the caller (the transaction manager) supplies it
    /// since the lock manager does not itself track undo logs.
    pub fn request(
        &self,
        trx_id: TrxId,
        target: LockTarget,
        mode: LockMode,
        trx_weight: impl Fn(TrxId) -> u64,
    ) -> Result<()> {
        let mut k = self.kernel.lock().unwrap();

        if let Some(entries) = k.granted.get(&target) {
            if entries
                .iter()
                .any(|g| g.trx_id == trx_id && g.mode.strength() >= mode.strength())
            {
                return Ok(());
            }
        }

        let conflicting: Vec<TrxId> = k
            .granted
            .get(&target)
            .into_iter()
            .flatten()
            .filter(|g| g.trx_id != trx_id && !g.mode.compatible_with(&mode))
            .map(|g| g.trx_id)
            .collect();

        if conflicting.is_empty() {
            k.granted.entry(target).or_default().push(Granted { trx_id, mode });
            return Ok(());
        }

        k.wait_edges
            .entry(trx_id)
            .or_default()
            .extend(conflicting.iter().copied());

        if let Some(victim) = detect_cycle(&k.wait_edges, trx_id, &trx_weight) {
            if victim == trx_id {
                k.wait_edges.get_mut(&trx_id).unwrap().clear();
                warn!("deadlock: trx {} chosen as victim at enqueue", trx_id);
                return err_at!(Deadlock, msg: "trx {} deadlocked, rolling back", trx_id);
            }
            if let Some(slot) = k.active_wait.get(&victim).cloned() {
                *slot.state.lock().unwrap() = WaitOutcome::Deadlock;
                slot.cv.notify_all();
                warn!("deadlock: trx {} chosen as victim, trx {} proceeds", victim, trx_id);
            }
        }

        let slot = Arc::new(WaitSlot {
            state: Mutex::new(WaitOutcome::Waiting),
            cv: Condvar::new(),
            deadline: Instant::now() + self.lock_wait_timeout,
        });
        k.active_wait.insert(trx_id, Arc::clone(&slot));
        k.waiters.entry(target).or_default().push_back(Waiter {
            trx_id,
            mode,
            slot,
        });

        err_at!(LockWait, msg: "trx {} must wait", trx_id)
    }

    /// Block the calling (query-graph) thread until the pending wait
    /// registered by `request` resolves, matching spec §4.4's "suspend
    /// the query thread". A real cooperative scheduler would instead park
    /// the query-graph task and return control to the driving O/S
    /// thread; blocking here is equivalent given §5's "exactly one O/S
    /// thread drives a query-graph thread at a time".
    pub fn wait(&self, trx_id: TrxId) -> Result<()> {
        let slot = {
            let k = self.kernel.lock().unwrap();
            match k.active_wait.get(&trx_id) {
                Some(slot) => Arc::clone(slot),
                None => return Ok(()),
            }
        };
        let mut guard = slot.state.lock().unwrap();
        loop {
            match *guard {
                WaitOutcome::Granted => break Ok(()),
                WaitOutcome::Deadlock => break err_at!(Deadlock, msg: "trx {} deadlocked", trx_id),
                WaitOutcome::TimedOut => break err_at!(LockWaitTimeout, msg: "trx {} lock wait timed out", trx_id),
                WaitOutcome::Waiting => {
                    let now = Instant::now();
                    if now >= slot.deadline {
                        *guard = WaitOutcome::TimedOut;
                        continue;
                    }
                    let (g, _) = slot.cv.wait_timeout(guard, slot.deadline - now).unwrap();
                    guard = g;
                }
            }
        }
    }

    /// Release every lock `trx_id` holds, table and record alike
    /// (spec §4.4 step 5 and §4.5 rollback/commit cleanup).
    pub fn release_all(&self, trx_id: TrxId) {
        let mut k = self.kernel.lock().unwrap();
        k.active_wait.remove(&trx_id);
        for edges in k.wait_edges.values_mut() {
            edges.remove(&trx_id);
        }
        k.wait_edges.remove(&trx_id);

        let targets: Vec<LockTarget> = k.granted.keys().cloned().collect();
        for target in targets {
            if let Some(entries) = k.granted.get_mut(&target) {
                entries.retain(|g| g.trx_id != trx_id);
                if entries.is_empty() {
                    k.granted.remove(&target);
                }
            }
            Self::rescan_waiters(&mut k, &target);
        }
    }

    /// FIFO rescan of the waiter queue for `target` (spec §4.4 step 5):
    /// grant every waiter, head-first, whose mode is now compatible with
    /// what remains granted.
    fn rescan_waiters(k: &mut Kernel, target: &LockTarget) {
        let mut remaining = VecDeque::new();
        let mut waiters = match k.waiters.remove(target) {
            Some(w) => w,
            None => return,
        };
        while let Some(waiter) = waiters.pop_front() {
            let blocked = k
                .granted
                .get(target)
                .into_iter()
                .flatten()
                .any(|g| g.trx_id != waiter.trx_id && !g.mode.compatible_with(&waiter.mode));
            if blocked {
                remaining.push_back(waiter);
                continue;
            }
            k.granted.entry(target.clone()).or_default().push(Granted {
                trx_id: waiter.trx_id,
                mode: waiter.mode,
            });
            k.wait_edges.remove(&waiter.trx_id);
            k.active_wait.remove(&waiter.trx_id);
            *waiter.slot.state.lock().unwrap() = WaitOutcome::Granted;
            waiter.slot.cv.notify_all();
            debug!("lock granted to trx {} on wake", waiter.trx_id);
        }
        if !remaining.is_empty() {
            k.waiters.insert(target.clone(), remaining);
        }
    }

    /// Whether `record_trx_id` (the TRX_ID stamped on a clustered record)
    /// names a transaction that should be treated as its implicit X
    /// owner (spec §4.4, "implicit-lock inference"). Secondary-index
    /// callers pass the clustered record's TRX_ID, per spec.
    pub fn implicit_owner(
        &self,
        record_trx_id: TrxId,
        requester: TrxId,
        is_active: impl Fn(TrxId) -> bool,
    ) -> Option<TrxId> {
        if record_trx_id != requester && is_active(record_trx_id) {
            Some(record_trx_id)
        } else {
            None
        }
    }

    /// Spawn the lock-wait-timeout watcher (spec §4.4, "a dedicated
    /// watcher thread wakes waiters whose deadline has passed"), built on
    /// the same gen-server `Thread` used elsewhere in this crate.
    pub fn spawn_timeout_watcher(self: &Arc<Self>, poll_interval: Duration) -> Thread<(), ()> {
        let mgr = Arc::clone(self);
        Thread::new("lock-wait-timeout-watcher", move |rx| {
            move || loop {
                if rx.recv_timeout(poll_interval).is_ok() {
                    return;
                }
                mgr.sweep_timeouts();
            }
        })
    }

    fn sweep_timeouts(&self) {
        let k = self.kernel.lock().unwrap();
        let now = Instant::now();
        for slot in k.active_wait.values() {
            let mut state = slot.state.lock().unwrap();
            if *state == WaitOutcome::Waiting && now >= slot.deadline {
                *state = WaitOutcome::TimedOut;
                slot.cv.notify_all();
            }
        }
    }
}

/// DFS from `start` over `wait_edges`; if a cycle is found, return the
/// transaction in it with least `trx_weight` (spec §4.4 step 4, "pick
/// the transaction of least weight").
fn detect_cycle(
    wait_edges: &HashMap<TrxId, HashSet<TrxId>>,
    start: TrxId,
    trx_weight: &impl Fn(TrxId) -> u64,
) -> Option<TrxId> {
    let mut visited = HashSet::new();
    let mut path = Vec::new();

    fn dfs(
        node: TrxId,
        start: TrxId,
        wait_edges: &HashMap<TrxId, HashSet<TrxId>>,
        visited: &mut HashSet<TrxId>,
        path: &mut Vec<TrxId>,
    ) -> Option<Vec<TrxId>> {
        if node == start && !path.is_empty() {
            return Some(path.clone());
        }
        if !visited.insert(node) {
            return None;
        }
        path.push(node);
        if let Some(next) = wait_edges.get(&node) {
            for &n in next {
                if let Some(cycle) = dfs(n, start, wait_edges, visited, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        None
    }

    match dfs(start, start, wait_edges, &mut visited, &mut path) {
        Some(cycle) => cycle.into_iter().min_by_key(|&t| trx_weight(t)),
        None => None,
    }
}

#[cfg(test)]
mod lock_test {
    use super::*;

    #[test]
    fn test_compatible_is_ix_granted_together() {
        let mgr = LockManager::new(Duration::from_secs(1));
        let t = LockTarget::Table(0);
        mgr.request(1, t.clone(), LockMode::IX, |_| 0).unwrap();
        mgr.request(2, t, LockMode::IX, |_| 0).unwrap();
    }

    #[test]
    fn test_conflicting_x_locks_wait_then_grant_on_release() {
        let mgr = Arc::new(LockManager::new(Duration::from_secs(5)));
        let target = LockTarget::Record {
            page_no: 1,
            heap_no: 0,
            index: 0,
        };
        mgr.request(1, target.clone(), LockMode::X, |_| 0).unwrap();
        let err = mgr.request(2, target.clone(), LockMode::X, |_| 0);
        assert!(matches!(err, Err(crate::Error::LockWait(..))));

        let mgr2 = Arc::clone(&mgr);
        let handle = std::thread::spawn(move || mgr2.wait(2));
        std::thread::sleep(Duration::from_millis(20));
        mgr.release_all(1);
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_deadlock_detected() {
        let mgr = Arc::new(LockManager::new(Duration::from_secs(5)));
        let r1 = LockTarget::Record { page_no: 1, heap_no: 0, index: 0 };
        let r2 = LockTarget::Record { page_no: 2, heap_no: 0, index: 0 };
        mgr.request(1, r1.clone(), LockMode::X, |_| 0).unwrap();
        mgr.request(2, r2.clone(), LockMode::X, |_| 0).unwrap();
        assert!(mgr.request(1, r2, LockMode::X, |_| 0).is_err());
        let weight = |trx: TrxId| if trx == 2 { 0 } else { 100 };
        let res = mgr.request(2, r1, LockMode::X, weight);
        assert!(matches!(res, Err(crate::Error::Deadlock(..))) || res.is_ok());
    }
}
