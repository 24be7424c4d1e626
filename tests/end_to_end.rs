//! The six concrete end-to-end scenarios against the public `Engine`/
//! `LockManager` surface.

use std::{sync::Arc, time::Duration};

use rand::seq::SliceRandom;

use txnrow::{
    buffer::mtr_start,
    dict::{Column, IndexField},
    engine::Engine,
    lock::{LockManager, LockMode, LockTarget, TrxId},
    txn::Isolation,
    types::{PrType, Tuple, TypeId, Value},
    Error,
};

fn cols() -> Vec<Column> {
    vec![
        Column::new("a", 0, TypeId::Int, PrType::new(false)),
        Column::new("b", 1, TypeId::Int, PrType::new(false)),
    ]
}

fn row(a: i64, b: i64) -> Tuple {
    Tuple::new(vec![Value::int(a, PrType::new(false)), Value::int(b, PrType::new(false))])
}

fn int_field(t: &Tuple, i: usize) -> i64 {
    match t.field(i) {
        Some(Value::Int { v, .. }) => *v,
        other => panic!("expected Value::Int at field {}, got {:?}", i, other),
    }
}

/// 1. Insert-on-tombstone: deleting then reinserting the same key
/// un-delete-marks the existing record instead of appending a second one.
#[test]
fn insert_on_tombstone() {
    let engine = Engine::new();
    let table = engine.create_table("t", cols(), &[0]).unwrap();

    let t1 = engine.begin(Isolation::RepeatableRead);
    let mut mtr = mtr_start();
    engine.insert(&mut mtr, t1, table, row(5, 1)).unwrap();
    engine.delete(&mut mtr, t1, table, row(5, 1)).unwrap();
    mtr.commit();
    engine.commit(t1).unwrap();

    let t2 = engine.begin(Isolation::RepeatableRead);
    let mut mtr2 = mtr_start();
    engine.insert(&mut mtr2, t2, table, row(5, 2)).unwrap();
    mtr2.commit();
    engine.commit(t2).unwrap();

    let reader = engine.begin(Isolation::RepeatableRead);
    let rows = engine.scan(reader, table).unwrap();
    assert_eq!(rows, vec![row(5, 2)]);
}

/// 2. Duplicate detection across a secondary unique index rolls the
/// whole statement back; the clustered index keeps only the original row.
#[test]
fn duplicate_detection_across_secondary() {
    let engine = Engine::new();
    let table = engine.create_table("t", cols(), &[0]).unwrap();
    engine
        .create_index(table, "b_unique", true, vec![IndexField { column: 1, prefix_len: 0 }])
        .unwrap();

    let setup = engine.begin(Isolation::RepeatableRead);
    let mut mtr = mtr_start();
    engine.insert(&mut mtr, setup, table, row(1, 10)).unwrap();
    mtr.commit();
    engine.commit(setup).unwrap();

    let trx = engine.begin(Isolation::RepeatableRead);
    let mut mtr2 = mtr_start();
    let res = engine.insert(&mut mtr2, trx, table, row(2, 10));
    assert!(matches!(res, Err(Error::DuplicateKey(..))), "expected DuplicateKey, got {:?}", res);
    mtr2.commit();
    engine.rollback(trx).unwrap();

    let reader = engine.begin(Isolation::RepeatableRead);
    assert_eq!(engine.scan(reader, table).unwrap(), vec![row(1, 10)]);
}

/// 3. Deadlock victim: A holds X(row1) and waits on X(row2); B holds
/// X(row2) and waits on X(row1). The cycle closes at the second
/// waiter's own enqueue, and the lighter transaction is the one whose
/// `request` call reports the deadlock.
#[test]
fn deadlock_victim_chosen_by_weight() {
    let mgr = Arc::new(LockManager::new(Duration::from_secs(5)));
    let row1 = LockTarget::Record { page_no: 1, heap_no: 0, index: 0 };
    let row2 = LockTarget::Record { page_no: 2, heap_no: 0, index: 0 };

    let trx_a: TrxId = 1;
    let trx_b: TrxId = 2;
    mgr.request(trx_a, row1.clone(), LockMode::X, |_| 0).unwrap();
    mgr.request(trx_b, row2.clone(), LockMode::X, |_| 0).unwrap();

    // trx_a does more undo work, so it outweighs trx_b and is spared.
    let weight = |trx: TrxId| if trx == trx_a { 100 } else { 0 };
    assert!(mgr.request(trx_a, row2.clone(), LockMode::X, weight).is_err());

    let res = mgr.request(trx_b, row1.clone(), LockMode::X, weight);
    assert!(matches!(res, Err(Error::Deadlock(..))), "trx_b should be picked as victim, got {:?}", res);

    // A is unaffected: once B gives up its lock on row2, A's wait resolves.
    mgr.release_all(trx_b);
    let mgr2 = Arc::clone(&mgr);
    let handle = std::thread::spawn(move || mgr2.wait(trx_a));
    handle.join().unwrap().unwrap();
}

/// 4. Pessimistic split: enough inserts, in randomized order, to force
/// at least one page split; the clustered index must still come back
/// fully ordered with nothing lost or duplicated.
#[test]
fn pessimistic_split_keeps_scan_ordered() {
    let engine = Engine::with_page_capacity(256);
    let table = engine.create_table("t", cols(), &[0]).unwrap();

    let mut keys: Vec<i64> = (1..=80).collect();
    keys.shuffle(&mut rand::thread_rng());

    let trx = engine.begin(Isolation::RepeatableRead);
    let mut mtr = mtr_start();
    for &k in &keys {
        engine.insert(&mut mtr, trx, table, row(k, k * 10)).unwrap();
    }
    mtr.commit();
    engine.commit(trx).unwrap();

    let reader = engine.begin(Isolation::RepeatableRead);
    let rows = engine.scan(reader, table).unwrap();
    let scanned: Vec<i64> = rows.iter().map(|t| int_field(t, 0)).collect();
    assert_eq!(scanned, (1..=80i64).collect::<Vec<_>>());
}

/// 5. Repeatable-read visibility: a reader's snapshot does not move
/// across its own statements even after a concurrent writer commits.
#[test]
fn repeatable_read_visibility() {
    let engine = Engine::new();
    let table = engine.create_table("t", cols(), &[0]).unwrap();

    let reader = engine.begin(Isolation::RepeatableRead);
    assert_eq!(engine.scan(reader, table).unwrap(), Vec::<Tuple>::new());

    let writer = engine.begin(Isolation::RepeatableRead);
    let mut mtr = mtr_start();
    engine.insert(&mut mtr, writer, table, row(42, 0)).unwrap();
    mtr.commit();
    engine.commit(writer).unwrap();

    assert_eq!(engine.scan(reader, table).unwrap(), Vec::<Tuple>::new());

    let fresh = engine.begin(Isolation::RepeatableRead);
    assert_eq!(engine.scan(fresh, table).unwrap(), vec![row(42, 0)]);
}

/// 6. Lock-wait timeout: B's wait on a row A holds times out on its own
/// after the configured deadline, without A doing anything.
#[test]
fn lock_wait_timeout() {
    let mgr = Arc::new(LockManager::new(Duration::from_millis(50)));
    let target = LockTarget::Record { page_no: 1, heap_no: 0, index: 0 };

    mgr.request(1, target.clone(), LockMode::X, |_| 0).unwrap();
    let err = mgr.request(2, target.clone(), LockMode::X, |_| 0);
    assert!(matches!(err, Err(Error::LockWait(..))));

    let mgr2 = Arc::clone(&mgr);
    let handle = std::thread::spawn(move || mgr2.wait(2));
    let res = handle.join().unwrap();
    assert!(matches!(res, Err(Error::LockWaitTimeout(..))), "expected LockWaitTimeout, got {:?}", res);

    // A's own lock was never touched.
    mgr.request(1, target, LockMode::X, |_| 0).unwrap();
}
