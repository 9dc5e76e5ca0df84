use std::sync::Arc;

use crate::constants;
use crate::db::{BTreeDb, Database as _};
use crate::events::Event;
use crate::model::{
    AddOutcome, Balance, Coin, Outpoint, RangeOpts, TxId, TxRecord,
};
use crate::repository::Error;

use super::*;


use factories::TestResolver;

fn dump(db: &BTreeDb) -> Vec<(Vec<u8>, Vec<u8>)> {
    db.range(b"", b"\x7f", false).unwrap().collect()
}

fn kinds(events: &[Event]) -> Vec<&'static str> {
    events
        .iter()
        .map(|event| match event {
            Event::Tx { .. } => "tx",
            Event::Confirmed { .. } => "confirmed",
            Event::Unconfirmed { .. } => "unconfirmed",
            Event::Conflict { .. } => "conflict",
            Event::RemoveTx { .. } => "remove tx",
            Event::Drain => "drain",
        })
        .collect()
}

fn conflicted(events: &[Event]) -> Vec<TxId> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Conflict { record, .. } => Some(record.txid()),
            _ => None,
        })
        .collect()
}

/// Credit `value` to `address` in a block at `height`, returning the tx id.
fn add_credit(
    index: &TxIndex<BTreeDb>,
    resolver: &Arc<TestResolver>,
    value: u64,
    address: crate::model::AddressHash,
    height: u32,
    ts: u64,
    ps: u64,
) -> TxId {
    let tx = factories::credit(value, address);
    let txid = tx.txid;
    let record = TxRecord::confirmed(tx, height, factories::block_id(), 0, ts, ps);
    let info = resolver.path_info(&record.tx);
    assert_eq!(AddOutcome::Added, index.add(record, &info).unwrap());

    txid
}

#[test]
fn test_basic_receive_then_spend() {
    let resolver = TestResolver::new();
    let (index, db, sink) = factories::index(&resolver);
    let address = factories::address();
    resolver.register(address, 0);

    let t1 = add_credit(&index, &resolver, 10, address, 100, 2000, 1000);
    let keys = index.keys();

    assert!(db.contains(&keys.coin(&t1, 0)).unwrap());
    assert!(db.contains(&keys.acct_coin(0, &t1, 0)).unwrap());
    assert_eq!(
        Balance { confirmed: 10, unconfirmed: 0 },
        index.balance(None).unwrap()
    );
    assert_eq!(vec!["tx", "confirmed", "drain"], kinds(&sink.take()));

    let t2 = factories::spend(
        Outpoint::new(t1, 0),
        address,
        vec![factories::output(10, factories::address())],
    );
    let t2_id = t2.txid;
    let record = TxRecord::unconfirmed(t2, 1500);
    let info = resolver.path_info(&record.tx);
    assert_eq!(AddOutcome::Added, index.add(record, &info).unwrap());

    assert!(!db.contains(&keys.coin(&t1, 0)).unwrap());
    assert!(!db.contains(&keys.acct_coin(0, &t1, 0)).unwrap());
    assert_eq!(
        Some(Outpoint::new(t2_id, 0)),
        index.get_spender(&Outpoint::new(t1, 0)).unwrap()
    );
    let undo = db.get_raw(&keys.undo(&t2_id, 0)).unwrap().unwrap();
    assert_eq!(100, Coin::height_of(&undo).unwrap());
    assert_eq!(10, Coin::value_of(&undo).unwrap());
    assert_eq!(Balance::default(), index.balance(None).unwrap());
}

#[test]
fn test_confirm_pending_preserves_received_time() {
    let resolver = TestResolver::new();
    let (index, db, sink) = factories::index(&resolver);
    let address = factories::address();
    resolver.register(address, 0);

    let tx = factories::credit(10, address);
    let txid = tx.txid;
    let record = TxRecord::unconfirmed(tx.clone(), 1000);
    let info = resolver.path_info(&tx);
    assert_eq!(AddOutcome::Added, index.add(record, &info).unwrap());

    let keys = index.keys();
    assert!(db.contains(&keys.pending(&txid)).unwrap());
    assert!(db.contains(&keys.acct_pending(0, &txid)).unwrap());
    assert_eq!(
        constants::UNCONFIRMED_HEIGHT,
        index.get_coin(&Outpoint::new(txid, 0)).unwrap().unwrap().height
    );
    sink.take();

    let confirmed = TxRecord::confirmed(tx, 100, factories::block_id(), 0, 2000, 2000);
    assert_eq!(AddOutcome::Existing, index.add(confirmed, &info).unwrap());

    assert!(!db.contains(&keys.pending(&txid)).unwrap());
    assert!(!db.contains(&keys.acct_pending(0, &txid)).unwrap());
    assert!(db.contains(&keys.height(100, &txid).unwrap()).unwrap());
    assert!(db.contains(&keys.acct_height(0, 100, &txid).unwrap()).unwrap());
    // The time index stays keyed by the original received-at timestamp.
    assert!(db.contains(&keys.time(1000, &txid)).unwrap());
    assert_eq!(100, index.get_coin(&Outpoint::new(txid, 0)).unwrap().unwrap().height);
    assert_eq!(1000, index.get_tx(&txid).unwrap().unwrap().ps);
    assert_eq!(vec!["tx", "confirmed", "drain"], kinds(&sink.take()));
}

#[test]
fn test_add_is_idempotent() {
    let resolver = TestResolver::new();
    let (index, db, _sink) = factories::index(&resolver);
    let address = factories::address();
    resolver.register(address, 0);

    let tx = factories::credit(10, address);
    let record = TxRecord::unconfirmed(tx.clone(), 1000);
    let info = resolver.path_info(&tx);
    assert_eq!(AddOutcome::Added, index.add(record.clone(), &info).unwrap());
    let snapshot = dump(&db);

    assert_eq!(AddOutcome::Existing, index.add(record, &info).unwrap());
    assert_eq!(snapshot, dump(&db));
}

#[test]
fn test_double_spend_older_is_rejected() {
    let resolver = TestResolver::new();
    let (index, db, sink) = factories::index(&resolver);
    let address = factories::address();
    resolver.register(address, 0);

    let t1 = add_credit(&index, &resolver, 10, address, 100, 2000, 1000);
    let t2a = factories::spend(
        Outpoint::new(t1, 0),
        address,
        vec![factories::output(10, factories::address())],
    );
    let t2a_id = t2a.txid;
    let info = resolver.path_info(&t2a);
    assert_eq!(
        AddOutcome::Added,
        index.add(TxRecord::unconfirmed(t2a, 500), &info).unwrap()
    );
    let snapshot = dump(&db);
    sink.take();

    let t2b = factories::spend(
        Outpoint::new(t1, 0),
        address,
        vec![factories::output(10, factories::address())],
    );
    let info = resolver.path_info(&t2b);
    assert_eq!(
        AddOutcome::Rejected,
        index.add(TxRecord::unconfirmed(t2b, 400), &info).unwrap()
    );

    // Nothing written, nothing removed, no tx/conflict events.
    assert_eq!(snapshot, dump(&db));
    assert_eq!(vec!["drain"], kinds(&sink.take()));
    assert_eq!(
        Some(Outpoint::new(t2a_id, 0)),
        index.get_spender(&Outpoint::new(t1, 0)).unwrap()
    );
}

#[test]
fn test_double_spend_newer_replaces_with_descendants() {
    let resolver = TestResolver::new();
    let (index, _db, sink) = factories::index(&resolver);
    let address = factories::address();
    let change = factories::address();
    resolver.register(address, 0);
    resolver.register(change, 0);

    let t1 = add_credit(&index, &resolver, 10, address, 100, 2000, 1000);
    let t2a = factories::spend(
        Outpoint::new(t1, 0),
        address,
        vec![factories::output(10, change)],
    );
    let t2a_id = t2a.txid;
    let info = resolver.path_info(&t2a);
    assert_eq!(
        AddOutcome::Added,
        index.add(TxRecord::unconfirmed(t2a, 400), &info).unwrap()
    );

    // A dependent spending the conflicting spender's output.
    let t3 = factories::spend(
        Outpoint::new(t2a_id, 0),
        change,
        vec![factories::output(10, factories::address())],
    );
    let t3_id = t3.txid;
    let info = resolver.path_info(&t3);
    assert_eq!(
        AddOutcome::Added,
        index.add(TxRecord::unconfirmed(t3, 450), &info).unwrap()
    );
    sink.take();

    let t2b = factories::spend(
        Outpoint::new(t1, 0),
        address,
        vec![factories::output(10, factories::address())],
    );
    let t2b_id = t2b.txid;
    let info = resolver.path_info(&t2b);
    assert_eq!(
        AddOutcome::Added,
        index.add(TxRecord::unconfirmed(t2b, 500), &info).unwrap()
    );

    assert!(!index.has_tx(&t2a_id).unwrap());
    assert!(!index.has_tx(&t3_id).unwrap());
    assert_eq!(
        Some(Outpoint::new(t2b_id, 0)),
        index.get_spender(&Outpoint::new(t1, 0)).unwrap()
    );
    let events = sink.take();
    assert_eq!(
        vec!["remove tx", "remove tx", "conflict", "tx", "drain"],
        kinds(&events)
    );
    assert_eq!(vec![t2a_id], conflicted(&events));
}

#[test]
fn test_confirmed_spender_beats_pending_double_spend() {
    let resolver = TestResolver::new();
    let (index, _db, _sink) = factories::index(&resolver);
    let address = factories::address();
    resolver.register(address, 0);

    let t1 = add_credit(&index, &resolver, 10, address, 100, 2000, 1000);
    let t2a = factories::spend(
        Outpoint::new(t1, 0),
        address,
        vec![factories::output(10, factories::address())],
    );
    let t2a_id = t2a.txid;
    let info = resolver.path_info(&t2a);
    let record = TxRecord::confirmed(t2a, 101, factories::block_id(), 0, 2100, 2050);
    assert_eq!(AddOutcome::Added, index.add(record, &info).unwrap());

    // Every input of the incoming transaction double-spends a confirmed
    // survivor.
    let t2b = factories::spend(
        Outpoint::new(t1, 0),
        address,
        vec![factories::output(10, factories::address())],
    );
    let info = resolver.path_info(&t2b);
    assert_eq!(
        AddOutcome::Rejected,
        index.add(TxRecord::unconfirmed(t2b, 9000), &info).unwrap()
    );
    assert_eq!(
        Some(Outpoint::new(t2a_id, 0)),
        index.get_spender(&Outpoint::new(t1, 0)).unwrap()
    );
}

#[test]
fn test_unconfirm_after_reorg() {
    let resolver = TestResolver::new();
    let (index, db, sink) = factories::index(&resolver);
    let address = factories::address();
    resolver.register(address, 0);

    let t1 = add_credit(&index, &resolver, 10, address, 100, 2000, 1000);
    sink.take();

    assert!(index.unconfirm(&t1).unwrap());

    let keys = index.keys();
    assert!(!db.contains(&keys.height(100, &t1).unwrap()).unwrap());
    assert!(db.contains(&keys.pending(&t1)).unwrap());
    let coin_bytes = db.get_raw(&keys.coin(&t1, 0)).unwrap().unwrap();
    assert_eq!(
        constants::UNCONFIRMED_COIN_HEIGHT,
        Coin::height_of(&coin_bytes).unwrap()
    );
    assert_eq!(
        Balance { confirmed: 0, unconfirmed: 10 },
        index.balance(None).unwrap()
    );
    assert_eq!(vec!["unconfirmed"], kinds(&sink.take()));

    // Already unconfirmed and unknown hashes are no-ops.
    assert!(!index.unconfirm(&t1).unwrap());
    assert!(!index.unconfirm(&factories::txid()).unwrap());
}

#[test]
fn test_confirm_unconfirm_roundtrip() {
    let resolver = TestResolver::new();
    let (index, db, _sink) = factories::index(&resolver);
    let address = factories::address();
    resolver.register(address, 0);

    let tx = factories::credit(10, address);
    let txid = tx.txid;
    let info = resolver.path_info(&tx);
    assert_eq!(
        AddOutcome::Added,
        index.add(TxRecord::unconfirmed(tx.clone(), 1000), &info).unwrap()
    );
    let snapshot = dump(&db);

    let confirmed = TxRecord::confirmed(tx, 100, factories::block_id(), 0, 2000, 1000);
    assert_eq!(AddOutcome::Existing, index.add(confirmed, &info).unwrap());
    assert!(index.unconfirm(&txid).unwrap());

    assert_eq!(snapshot, dump(&db));
}

#[test]
fn test_add_remove_roundtrip() {
    let resolver = TestResolver::new();
    let (index, db, sink) = factories::index(&resolver);
    let address = factories::address();
    resolver.register(address, 0);

    let t1 = add_credit(&index, &resolver, 10, address, 100, 2000, 1000);
    let snapshot = dump(&db);
    sink.take();

    let t2 = factories::spend(
        Outpoint::new(t1, 0),
        address,
        vec![factories::output(10, factories::address())],
    );
    let t2_id = t2.txid;
    let info = resolver.path_info(&t2);
    assert_eq!(
        AddOutcome::Added,
        index.add(TxRecord::unconfirmed(t2, 1500), &info).unwrap()
    );

    assert_eq!(vec![t2_id], index.remove(&t2_id).unwrap());
    assert_eq!(snapshot, dump(&db));
    assert_eq!(
        Balance { confirmed: 10, unconfirmed: 0 },
        index.balance(None).unwrap()
    );

    // Removing an unknown hash is a no-op.
    assert!(index.remove(&factories::txid()).unwrap().is_empty());
}

#[test]
fn test_remove_cascades_to_dependents() {
    let resolver = TestResolver::new();
    let (index, _db, _sink) = factories::index(&resolver);
    let address = factories::address();
    let change = factories::address();
    resolver.register(address, 0);
    resolver.register(change, 0);

    let t1 = add_credit(&index, &resolver, 10, address, 100, 2000, 1000);
    let t2 = factories::spend(
        Outpoint::new(t1, 0),
        address,
        vec![factories::output(10, change)],
    );
    let t2_id = t2.txid;
    let info = resolver.path_info(&t2);
    index.add(TxRecord::unconfirmed(t2, 1500), &info).unwrap();

    let t3 = factories::spend(
        Outpoint::new(t2_id, 0),
        change,
        vec![factories::output(10, factories::address())],
    );
    let t3_id = t3.txid;
    let info = resolver.path_info(&t3);
    index.add(TxRecord::unconfirmed(t3, 1600), &info).unwrap();

    assert_eq!(vec![t3_id, t2_id, t1], index.remove(&t1).unwrap());
    assert!(!index.has_tx(&t1).unwrap());
    assert_eq!(Balance::default(), index.balance(None).unwrap());
}

#[test]
fn test_orphan_registration_and_resolution() {
    let resolver = TestResolver::new();
    let (index, db, _sink) = factories::index(&resolver);
    let address = factories::address();
    resolver.register(address, 0);

    // The spender arrives before the transaction that funds it.
    let t1 = factories::credit(10, address);
    let t1_id = t1.txid;
    let t2 = factories::spend(
        Outpoint::new(t1_id, 0),
        address,
        vec![factories::output(10, factories::address())],
    );
    let t2_id = t2.txid;
    let info = resolver.path_info(&t2);
    assert_eq!(
        AddOutcome::Added,
        index.add(TxRecord::unconfirmed(t2, 500), &info).unwrap()
    );

    let keys = index.keys();
    let orphan = db.get_raw(&keys.orphan(&t1_id, 0)).unwrap().unwrap();
    assert_eq!(Outpoint::new(t2_id, 0).to_bytes().to_vec(), orphan);
    assert!(!db.contains(&keys.coin(&t1_id, 0)).unwrap());
    assert!(!db.contains(&keys.spend(&t1_id, 0)).unwrap());

    let info = resolver.path_info(&t1);
    let record = TxRecord::confirmed(t1, 100, factories::block_id(), 0, 2000, 1000);
    assert_eq!(AddOutcome::Added, index.add(record, &info).unwrap());

    // Resolved: the output was claimed the moment it appeared.
    assert!(!db.contains(&keys.orphan(&t1_id, 0)).unwrap());
    assert_eq!(
        Some(Outpoint::new(t2_id, 0)),
        index.get_spender(&Outpoint::new(t1_id, 0)).unwrap()
    );
    assert!(!db.contains(&keys.coin(&t1_id, 0)).unwrap());
    let undo = db.get_raw(&keys.undo(&t2_id, 0)).unwrap().unwrap();
    assert_eq!(10, Coin::value_of(&undo).unwrap());
    assert_eq!(100, Coin::height_of(&undo).unwrap());
    assert_eq!(Balance::default(), index.balance(None).unwrap());
}

#[test]
fn test_orphan_resolution_first_waiter_wins() {
    let resolver = TestResolver::new();
    let (index, db, sink) = factories::index(&resolver);
    let address = factories::address();
    resolver.register(address, 0);

    let t1 = factories::credit(10, address);
    let t1_id = t1.txid;
    let t2 = factories::spend(
        Outpoint::new(t1_id, 0),
        address,
        vec![factories::output(10, factories::address())],
    );
    let t2_id = t2.txid;
    let t3 = factories::spend(
        Outpoint::new(t1_id, 0),
        address,
        vec![factories::output(10, factories::address())],
    );
    let t3_id = t3.txid;

    let info = resolver.path_info(&t2);
    index.add(TxRecord::unconfirmed(t2, 500), &info).unwrap();
    let info = resolver.path_info(&t3);
    index.add(TxRecord::unconfirmed(t3, 600), &info).unwrap();

    let keys = index.keys();
    let orphan = db.get_raw(&keys.orphan(&t1_id, 0)).unwrap().unwrap();
    let mut expected = Vec::new();
    expected.extend_from_slice(&Outpoint::new(t2_id, 0).to_bytes());
    expected.extend_from_slice(&Outpoint::new(t3_id, 0).to_bytes());
    assert_eq!(expected, orphan);
    sink.take();

    let info = resolver.path_info(&t1);
    let record = TxRecord::confirmed(t1, 100, factories::block_id(), 0, 2000, 1000);
    assert_eq!(AddOutcome::Added, index.add(record, &info).unwrap());

    // The first waiter claims the coin; the later one is removed.
    assert_eq!(
        Some(Outpoint::new(t2_id, 0)),
        index.get_spender(&Outpoint::new(t1_id, 0)).unwrap()
    );
    assert!(index.has_tx(&t2_id).unwrap());
    assert!(!index.has_tx(&t3_id).unwrap());
    assert!(!db.contains(&keys.orphan(&t1_id, 0)).unwrap());
    assert_eq!(vec![t3_id], conflicted(&sink.take()));
}

#[test]
fn test_orphan_resolution_failed_waiter_is_removed() {
    let resolver = TestResolver::new();
    let address = factories::address();
    resolver.register(address, 0);

    let t1 = factories::credit(10, address);
    let t1_id = t1.txid;
    let t2 = factories::spend(
        Outpoint::new(t1_id, 0),
        address,
        vec![factories::output(10, factories::address())],
    );
    let t2_id = t2.txid;

    let (index, db, sink) = factories::index_with_verifier(
        &resolver,
        factories::DenyVerifier {
            hash: t2_id,
            index: 0,
        },
    );

    let info = resolver.path_info(&t2);
    assert_eq!(
        AddOutcome::Added,
        index.add(TxRecord::unconfirmed(t2, 500), &info).unwrap()
    );
    sink.take();

    let info = resolver.path_info(&t1);
    let record = TxRecord::confirmed(t1, 100, factories::block_id(), 0, 2000, 1000);
    assert_eq!(AddOutcome::Added, index.add(record, &info).unwrap());

    // No waiter survived verification, so the coin is written normally.
    let keys = index.keys();
    assert!(!index.has_tx(&t2_id).unwrap());
    assert!(db.contains(&keys.coin(&t1_id, 0)).unwrap());
    assert!(!db.contains(&keys.orphan(&t1_id, 0)).unwrap());
    assert_eq!(None, index.get_spender(&Outpoint::new(t1_id, 0)).unwrap());
    assert_eq!(vec![t2_id], conflicted(&sink.take()));
}

#[test]
fn test_abandon_requires_pending() {
    let resolver = TestResolver::new();
    let (index, db, _sink) = factories::index(&resolver);
    let address = factories::address();
    resolver.register(address, 0);

    let confirmed = add_credit(&index, &resolver, 10, address, 100, 2000, 1000);
    assert!(matches!(
        index.abandon(&confirmed),
        Err(Error::NotPending(_))
    ));

    let tx = factories::credit(5, address);
    let txid = tx.txid;
    let info = resolver.path_info(&tx);
    index.add(TxRecord::unconfirmed(tx, 3000), &info).unwrap();

    assert_eq!(vec![txid], index.abandon(&txid).unwrap());
    assert!(!db.contains(&index.keys().pending(&txid)).unwrap());
    assert!(!index.has_tx(&txid).unwrap());
}

#[test]
fn test_zap_sweeps_stale_unconfirmed() {
    let resolver = TestResolver::new();
    let (index, _db, _sink) = factories::index(&resolver);
    let address = factories::address();
    resolver.register(address, 0);

    // Ancient pending transaction.
    let stale = factories::credit(1, address);
    let stale_id = stale.txid;
    let info = resolver.path_info(&stale);
    index.add(TxRecord::unconfirmed(stale, 1000), &info).unwrap();

    // Fresh pending transaction.
    let now = chrono::Utc::now().timestamp() as u64;
    let fresh = factories::credit(2, address);
    let fresh_id = fresh.txid;
    let info = resolver.path_info(&fresh);
    index.add(TxRecord::unconfirmed(fresh, now), &info).unwrap();

    // Ancient but confirmed: zap must leave it alone.
    let old_confirmed = add_credit(&index, &resolver, 3, address, 50, 950, 900);

    assert_eq!(vec![stale_id], index.zap(None, 3600).unwrap());
    assert!(!index.has_tx(&stale_id).unwrap());
    assert!(index.has_tx(&fresh_id).unwrap());
    assert!(index.has_tx(&old_confirmed).unwrap());
}

#[test]
fn test_boundary_heights() {
    let resolver = TestResolver::new();
    let (index, db, _sink) = factories::index(&resolver);
    let address = factories::address();
    resolver.register(address, 0);

    let at_zero = add_credit(&index, &resolver, 10, address, 0, 2000, 1000);
    let keys = index.keys();
    assert!(db.contains(&keys.height(0, &at_zero).unwrap()).unwrap());
    let coin_bytes = db.get_raw(&keys.coin(&at_zero, 0)).unwrap().unwrap();
    assert_eq!(0, Coin::height_of(&coin_bytes).unwrap());

    // The sentinel height is never a real coin height.
    let pending = factories::credit(5, address);
    let pending_id = pending.txid;
    let info = resolver.path_info(&pending);
    index.add(TxRecord::unconfirmed(pending, 3000), &info).unwrap();
    let coin_bytes = db.get_raw(&keys.coin(&pending_id, 0)).unwrap().unwrap();
    assert_eq!(
        constants::UNCONFIRMED_COIN_HEIGHT,
        Coin::height_of(&coin_bytes).unwrap()
    );
}

#[test]
fn test_unspendable_outputs_are_skipped() {
    let resolver = TestResolver::new();
    let (index, db, _sink) = factories::index(&resolver);
    let address = factories::address();
    resolver.register(address, 0);

    let mut tx = factories::credit(10, address);
    tx.outputs[0].script = vec![0x6a, 0x01, 0x02];
    let txid = tx.txid;
    let info = resolver.path_info(&tx);
    let record = TxRecord::confirmed(tx, 100, factories::block_id(), 0, 2000, 1000);
    assert_eq!(AddOutcome::Added, index.add(record, &info).unwrap());

    assert!(index.has_tx(&txid).unwrap());
    assert!(!db.contains(&index.keys().coin(&txid, 0)).unwrap());
    assert_eq!(Balance::default(), index.balance(None).unwrap());
}

#[test]
fn test_balance_partition_and_accounts() {
    let resolver = TestResolver::new();
    let (index, _db, _sink) = factories::index(&resolver);
    let savings = factories::address();
    let checking = factories::address();
    resolver.register(savings, 0);
    resolver.register(checking, 1);

    add_credit(&index, &resolver, 10, savings, 100, 2000, 1000);
    let pending = factories::credit(5, checking);
    let info = resolver.path_info(&pending);
    index.add(TxRecord::unconfirmed(pending, 1500), &info).unwrap();

    assert_eq!(
        Balance { confirmed: 10, unconfirmed: 5 },
        index.balance(None).unwrap()
    );
    assert_eq!(
        Balance { confirmed: 10, unconfirmed: 0 },
        index.balance(Some(0)).unwrap()
    );
    assert_eq!(
        Balance { confirmed: 0, unconfirmed: 5 },
        index.balance(Some(1)).unwrap()
    );
    assert_eq!(Balance::default(), index.balance(Some(2)).unwrap());
}

#[test]
fn test_account_mirrors_follow_path_info() {
    let resolver = TestResolver::new();
    let (index, db, _sink) = factories::index(&resolver);
    let first = factories::address();
    let second = factories::address();
    resolver.register(first, 0);
    resolver.register(second, 3);

    let mut tx = factories::credit(10, first);
    tx.outputs.push(factories::output(7, second));
    let txid = tx.txid;
    let info = resolver.path_info(&tx);
    let record = TxRecord::confirmed(tx, 100, factories::block_id(), 0, 2000, 1000);
    index.add(record, &info).unwrap();

    let keys = index.keys();
    for account in [0, 3] {
        assert!(db.contains(&keys.acct_tx(account, &txid)).unwrap());
        assert!(db.contains(&keys.acct_height(account, 100, &txid).unwrap()).unwrap());
        assert!(db.contains(&keys.acct_time(account, 1000, &txid)).unwrap());
    }
    assert!(db.contains(&keys.acct_coin(0, &txid, 0)).unwrap());
    assert!(db.contains(&keys.acct_coin(3, &txid, 1)).unwrap());
    assert!(!db.contains(&keys.acct_coin(3, &txid, 0)).unwrap());
}

#[test]
fn test_history_and_ranges() {
    let resolver = TestResolver::new();
    let (index, _db, _sink) = factories::index(&resolver);
    let address = factories::address();
    resolver.register(address, 0);

    let a = add_credit(&index, &resolver, 1, address, 10, 1010, 100);
    let b = add_credit(&index, &resolver, 2, address, 20, 1020, 200);
    let c = add_credit(&index, &resolver, 3, address, 30, 1030, 300);

    let all = index.history(None, &RangeOpts::default()).unwrap();
    assert_eq!(vec![a, b, c], all.iter().map(|r| r.txid()).collect::<Vec<_>>());

    let ranged = index
        .range_by_height(
            None,
            &RangeOpts {
                start: 10,
                end: 20,
                limit: None,
                reverse: false,
            },
        )
        .unwrap();
    assert_eq!(vec![a, b], ranged.iter().map(|r| r.txid()).collect::<Vec<_>>());

    let reversed = index
        .range_by_height(
            None,
            &RangeOpts {
                start: 0,
                end: 100,
                limit: Some(2),
                reverse: true,
            },
        )
        .unwrap();
    assert_eq!(vec![c, b], reversed.iter().map(|r| r.txid()).collect::<Vec<_>>());

    let by_account = index
        .history(Some(0), &RangeOpts { start: 150, end: 250, ..Default::default() })
        .unwrap();
    assert_eq!(vec![b], by_account.iter().map(|r| r.txid()).collect::<Vec<_>>());
    assert!(index.history(Some(9), &RangeOpts::default()).unwrap().is_empty());
}

#[test]
fn test_unconfirmed_listing() {
    let resolver = TestResolver::new();
    let (index, _db, _sink) = factories::index(&resolver);
    let address = factories::address();
    resolver.register(address, 0);

    add_credit(&index, &resolver, 10, address, 100, 2000, 1000);
    let pending = factories::credit(5, address);
    let pending_id = pending.txid;
    let info = resolver.path_info(&pending);
    index.add(TxRecord::unconfirmed(pending, 1500), &info).unwrap();

    assert_eq!(vec![pending_id], index.pending_hashes(None).unwrap());
    let records = index.unconfirmed(Some(0)).unwrap();
    assert_eq!(1, records.len());
    assert_eq!(pending_id, records[0].txid());
    assert_eq!(0, records[0].ts);

    assert!(index.unconfirmed(Some(7)).unwrap().is_empty());
}

#[test]
fn test_coins_listing() {
    let resolver = TestResolver::new();
    let (index, _db, _sink) = factories::index(&resolver);
    let address = factories::address();
    resolver.register(address, 0);

    let t1 = add_credit(&index, &resolver, 10, address, 100, 2000, 1000);

    let coins = index.coins(None).unwrap();
    assert_eq!(1, coins.len());
    assert_eq!(Outpoint::new(t1, 0), coins[0].0);
    assert_eq!(10, coins[0].1.value);
    assert_eq!(100, coins[0].1.height);

    let account_coins = index.coins(Some(0)).unwrap();
    assert_eq!(coins, account_coins);
    assert!(index.coins(Some(5)).unwrap().is_empty());
}

#[test]
fn test_cache_follows_commits() {
    let resolver = TestResolver::new();
    let (index, _db, _sink) = factories::index(&resolver);
    let address = factories::address();
    resolver.register(address, 0);

    let t1 = add_credit(&index, &resolver, 10, address, 100, 2000, 1000);
    let outpoint = Outpoint::new(t1, 0);
    assert!(index.cache.contains(&outpoint));

    let t2 = factories::spend(
        outpoint,
        address,
        vec![factories::output(10, factories::address())],
    );
    let t2_id = t2.txid;
    let info = resolver.path_info(&t2);
    index.add(TxRecord::unconfirmed(t2, 1500), &info).unwrap();
    assert!(!index.cache.contains(&outpoint));

    // Removal resurrects the consumed coin in cache and store alike.
    index.remove(&t2_id).unwrap();
    assert!(index.cache.contains(&outpoint));
    assert_eq!(Some(10), index.get_coin(&outpoint).unwrap().map(|c| c.value));
}

#[test]
fn test_equal_received_timestamps_coexist() {
    let resolver = TestResolver::new();
    let (index, _db, _sink) = factories::index(&resolver);
    let address = factories::address();
    resolver.register(address, 0);

    let a = add_credit(&index, &resolver, 1, address, 10, 1010, 500);
    let b = add_credit(&index, &resolver, 2, address, 20, 1020, 500);

    let all = index.history(None, &RangeOpts::default()).unwrap();
    let mut ids: Vec<TxId> = all.iter().map(|r| r.txid()).collect();
    ids.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(expected, ids);
}

#[test]
fn test_destroy_fails_later_operations() {
    let resolver = TestResolver::new();
    let (index, _db, _sink) = factories::index(&resolver);
    let address = factories::address();
    resolver.register(address, 0);

    let tx = factories::credit(10, address);
    let info = resolver.path_info(&tx);
    index.destroy();

    assert!(matches!(
        index.add(TxRecord::unconfirmed(tx, 1000), &info),
        Err(Error::Lock(_))
    ));
}

#[test]
fn test_drain_bookkeeping() {
    let resolver = TestResolver::new();
    let (index, _db, _sink) = factories::index(&resolver);
    let address = factories::address();
    resolver.register(address, 0);

    assert!(!index.has_queued(&factories::txid()));
    index.wait_for_drain().unwrap();

    add_credit(&index, &resolver, 10, address, 100, 2000, 1000);
    index.wait_for_drain().unwrap();
}
