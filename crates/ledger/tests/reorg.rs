use dogeledger_ledger::{
    Account, Invoice, InvoiceStatus, LedgerStore, LineItem, NewUtxo, Txn, TxnStatus, Utxo,
    UtxoStatus,
};
use dogeledger_primitives::{Address, Hash256, Network, OutPoint, COIN};
use dogeledger_storage::memory::MemoryStore;

fn addr(seed: u8) -> Address {
    Address::from_pubkey_hash(&[seed; 20], Network::Regtest)
}

fn hash(seed: u8) -> Hash256 {
    [seed; 32]
}

fn output(seed: u8, address: &Address, account: &Address, value: i64) -> NewUtxo {
    NewUtxo {
        outpoint: OutPoint::new(hash(seed), 0),
        value,
        script_type: "p2pkh".to_string(),
        pkh_address: address.clone(),
        account: account.clone(),
        key_index: 0,
        is_internal: false,
    }
}

fn chain_seq(store: &LedgerStore<MemoryStore>, account: &Address) -> u64 {
    store.get_account_by_id(account).expect("account").chain_seq
}

/// merchant-1 with `addr1` and a 10 DOGE invoice on it.
fn merchant(root: &Address, addr1: &Address) -> LedgerStore<MemoryStore> {
    let store = LedgerStore::open(MemoryStore::new()).expect("open");
    let mut tx = store.begin().expect("begin");
    tx.create_account(&Account::new(root.clone(), "merchant-1"))
        .expect("create");
    tx.store_addresses(root, &[addr1.clone()], 0, false)
        .expect("addresses");
    tx.store_invoice(&Invoice {
        id: addr1.clone(),
        account: root.clone(),
        items: vec![LineItem {
            value: 10 * COIN,
            quantity: 1,
            ..LineItem::default()
        }],
        ..Invoice::default()
    })
    .expect("invoice");
    tx.commit().expect("commit");
    drop(tx);
    store
}

#[test]
fn payment_confirms_and_settles_invoice() {
    let root = addr(1);
    let addr1 = addr(2);
    let store = merchant(&root, &addr1);
    let out = output(1, &addr1, &root, 10 * COIN);

    let mut tx = store.begin().expect("begin");
    tx.create_utxo(&out, 100).expect("create");
    assert_eq!(tx.list_invoices_awaiting_payment().expect("awaiting").len(), 1);
    tx.commit().expect("commit");

    let mut tx = store.begin().expect("begin");
    let confirmed = tx.confirm_utxos(6, 106).expect("confirm");
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].spendable_height, Some(106));
    tx.mark_invoice_as_paid(&addr1).expect("paid");
    tx.commit().expect("commit");

    assert_eq!(
        store.get_invoice(&addr1).expect("invoice").status(),
        InvoiceStatus::Paid
    );
    assert_eq!(
        store.get_utxo(&out.outpoint).expect("utxo").status(),
        UtxoStatus::Confirmed
    );
}

#[test]
fn rollback_below_payment_detaches_and_bumps_account() {
    let root = addr(1);
    let addr1 = addr(2);
    let store = merchant(&root, &addr1);
    let out = output(1, &addr1, &root, 10 * COIN);

    let mut tx = store.begin().expect("begin");
    tx.create_utxo(&out, 100).expect("create");
    tx.confirm_utxos(6, 106).expect("confirm");
    tx.commit().expect("commit");
    let before = chain_seq(&store, &root);

    let mut tx = store.begin().expect("begin");
    tx.revert_utxos_above_height(99).expect("revert");
    let affected = tx.inc_accounts_affected_by_rollback(99).expect("affected");
    assert_eq!(affected, vec![root.clone()]);
    assert!(tx.pending_chain_seq_bumps().is_empty());
    tx.commit().expect("commit");

    assert!(chain_seq(&store, &root) > before);
    let utxo = store.get_utxo(&out.outpoint).expect("utxo");
    assert_eq!(utxo.status(), UtxoStatus::Detached);
    assert_eq!(utxo.created_height, None);
    assert_eq!(utxo.spendable_height, None);
    assert!(store.get_all_unreserved_utxos(&root).expect("list").is_empty());
}

#[test]
fn partial_rollback_clears_only_later_heights() {
    let root = addr(1);
    let addr1 = addr(2);
    let store = merchant(&root, &addr1);
    let out = output(1, &addr1, &root, 10 * COIN);

    let mut tx = store.begin().expect("begin");
    tx.create_utxo(&out, 100).expect("create");
    tx.confirm_utxos(6, 106).expect("confirm");
    tx.mark_utxo_spent(&out.outpoint, 110).expect("spend");
    tx.commit().expect("commit");

    let mut tx = store.begin().expect("begin");
    tx.revert_utxos_above_height(108).expect("revert");
    tx.commit().expect("commit");
    let utxo = store.get_utxo(&out.outpoint).expect("utxo");
    assert_eq!(utxo.status(), UtxoStatus::Confirmed);
    assert_eq!(utxo.spendable_height, Some(106));

    let mut tx = store.begin().expect("begin");
    tx.revert_utxos_above_height(103).expect("revert");
    // Back to pending, so a later block can confirm it again.
    let again = tx.confirm_utxos(6, 107).expect("reconfirm");
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].spendable_height, Some(106));
    tx.commit().expect("commit");
}

#[test]
fn revert_is_idempotent() {
    let root = addr(1);
    let addr1 = addr(2);
    let once = merchant(&root, &addr1);
    let twice = merchant(&root, &addr1);

    for store in [&once, &twice] {
        let mut tx = store.begin().expect("begin");
        for seed in 0..6u8 {
            let out = output(seed, &addr1, &root, COIN);
            tx.create_utxo(&out, 95 + i64::from(seed) * 2).expect("create");
        }
        tx.confirm_utxos(3, 104).expect("confirm");
        tx.mark_utxo_spent(&OutPoint::new(hash(0), 0), 103)
            .expect("spend");
        tx.commit().expect("commit");
    }

    let mut tx = once.begin().expect("begin");
    tx.revert_utxos_above_height(100).expect("revert");
    tx.commit().expect("commit");

    let mut tx = twice.begin().expect("begin");
    tx.revert_utxos_above_height(100).expect("revert");
    tx.revert_utxos_above_height(100).expect("revert again");
    tx.commit().expect("commit");
    let mut tx = twice.begin().expect("begin");
    tx.revert_utxos_above_height(100).expect("revert in a new transaction");
    tx.commit().expect("commit");

    let left: Vec<Utxo> = once.list_utxos(&root).expect("list");
    let right: Vec<Utxo> = twice.list_utxos(&root).expect("list");
    assert_eq!(left, right);
    for utxo in &left {
        for height in [utxo.created_height, utxo.spendable_height, utxo.spent_height]
            .into_iter()
            .flatten()
        {
            assert!(height <= 100);
        }
    }
}

#[test]
fn affected_accounts_survive_separate_transactions() {
    let root = addr(1);
    let addr1 = addr(2);
    let store = merchant(&root, &addr1);

    let mut tx = store.begin().expect("begin");
    tx.create_utxo(&output(1, &addr1, &root, COIN), 120)
        .expect("create");
    tx.commit().expect("commit");

    // Revert first, bump later: the mark still finds the account.
    let mut tx = store.begin().expect("begin");
    tx.revert_utxos_above_height(110).expect("revert");
    tx.rollback().expect("rollback");
    tx.rollback().expect("rollback twice");

    let mut tx = store.begin().expect("begin");
    tx.revert_utxos_above_height(110).expect("revert");
    tx.commit().expect("commit");
    let before = chain_seq(&store, &root);

    let mut tx = store.begin().expect("begin");
    let affected = tx.inc_accounts_affected_by_rollback(110).expect("affected");
    assert_eq!(affected, vec![root.clone()]);
    tx.commit().expect("commit");
    assert_eq!(chain_seq(&store, &root), before + 1);

    // Marks are consumed once.
    let mut tx = store.begin().expect("begin");
    assert!(tx
        .inc_accounts_affected_by_rollback(110)
        .expect("none left")
        .is_empty());
    tx.commit().expect("commit");
    assert_eq!(chain_seq(&store, &root), before + 1);
}

#[test]
fn bump_before_revert_reports_dated_accounts() {
    let root = addr(1);
    let addr1 = addr(2);
    let store = merchant(&root, &addr1);

    let mut tx = store.begin().expect("begin");
    tx.create_utxo(&output(1, &addr1, &root, COIN), 120)
        .expect("create");
    tx.commit().expect("commit");

    let mut tx = store.begin().expect("begin");
    let affected = tx.inc_accounts_affected_by_rollback(110).expect("affected");
    assert_eq!(affected, vec![root.clone()]);
    tx.revert_utxos_above_height(110).expect("revert");
    tx.commit().expect("commit");
    assert_eq!(
        store
            .get_utxo(&OutPoint::new(hash(1), 0))
            .expect("utxo")
            .status(),
        UtxoStatus::Detached
    );
}

#[test]
fn txn_heights_revert_with_the_chain() {
    let root = addr(1);
    let addr1 = addr(2);
    let store = merchant(&root, &addr1);
    let out = output(1, &addr1, &root, 5 * COIN);

    let mut tx = store.begin().expect("begin");
    tx.create_utxo(&out, 100).expect("create");
    tx.create_txn(&Txn {
        id: hash(40),
        account: root.clone(),
        amount: 4 * COIN,
        fee: COIN / 100,
        inputs: vec![out.outpoint],
        created: 0,
        on_chain_height: None,
        confirmed_height: None,
    })
    .expect("txn");
    tx.mark_txn_on_chain(&hash(40), 104).expect("on chain");
    tx.confirm_txns(2, 106).expect("confirm");
    tx.commit().expect("commit");

    let mut tx = store.begin().expect("begin");
    tx.revert_txns_above_height(105).expect("revert");
    assert_eq!(tx.get_txn(&hash(40)).expect("txn").status(), TxnStatus::OnChain);
    tx.revert_txns_above_height(103).expect("revert");
    let txn = tx.get_txn(&hash(40)).expect("txn");
    assert_eq!(txn.status(), TxnStatus::Unsent);
    assert_eq!(
        tx.inc_accounts_affected_by_rollback(103).expect("affected"),
        vec![root.clone()]
    );
    tx.commit().expect("commit");

    // The reservation outlives the revert.
    assert!(store.get_utxo(&out.outpoint).expect("utxo").is_reserved());
}

#[test]
fn chain_seq_rises_on_every_commit_that_changes_chain_state() {
    let root = addr(1);
    let addr1 = addr(2);
    let store = merchant(&root, &addr1);
    let mut last = chain_seq(&store, &root);

    for height in 100..110i64 {
        let mut tx = store.begin().expect("begin");
        let seed = u8::try_from(height - 100).expect("seed");
        tx.create_utxo(&output(seed, &addr1, &root, COIN), height)
            .expect("create");
        tx.confirm_utxos(3, height).expect("confirm");
        assert_eq!(tx.pending_chain_seq_bumps(), vec![root.clone()]);
        tx.commit().expect("commit");
        let now = chain_seq(&store, &root);
        assert_eq!(now, last + 1);
        last = now;
    }

    // Explicit bumps replace the automatic one, duplicates collapse.
    let mut tx = store.begin().expect("begin");
    tx.create_utxo(&output(50, &addr1, &root, COIN), 111)
        .expect("create");
    tx.inc_chain_seq_for_accounts(&[root.clone(), root.clone()])
        .expect("bump");
    assert!(tx
        .inc_chain_seq_for_accounts(&[addr(77)])
        .unwrap_err()
        .is_not_found());
    tx.commit().expect("commit");
    assert_eq!(chain_seq(&store, &root), last + 1);

    // Commits without chain changes leave it alone.
    let mut tx = store.begin().expect("begin");
    tx.mark_invoice_as_paid(&addr1).expect("paid");
    tx.commit().expect("commit");
    assert_eq!(chain_seq(&store, &root), last + 1);
}
