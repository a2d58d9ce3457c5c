use std::sync::Arc;
use std::thread;

use dogeledger_ledger::{
    Account, BlockTx, BlockTxOut, ChainBlock, ChainEvent, ChainFollower, FollowerReport, Invoice,
    InvoiceStatus, LedgerStore, LineItem, Txn, TxnStatus, UtxoStatus,
};
use dogeledger_primitives::{address_to_script_pubkey, Address, Hash256, Network, OutPoint, COIN};
use dogeledger_storage::fjall::FjallStore;
use dogeledger_storage::memory::MemoryStore;
use dogeledger_storage::KeyValueStore;

const NETWORK: Network = Network::Regtest;

fn addr(seed: u8) -> Address {
    Address::from_pubkey_hash(&[seed; 20], NETWORK)
}

fn block_hash(height: i64) -> Hash256 {
    let mut hash = [0u8; 32];
    hash[..8].copy_from_slice(&height.to_le_bytes());
    hash[31] = 0xb1;
    hash
}

fn pay(address: &Address, value: i64) -> BlockTxOut {
    BlockTxOut {
        value,
        script_pubkey: address_to_script_pubkey(address, NETWORK).expect("script"),
        address: None,
    }
}

fn block(height: i64, txs: Vec<BlockTx>) -> ChainEvent {
    ChainEvent::Block(ChainBlock {
        hash: block_hash(height),
        height,
        txs,
    })
}

fn provision<S: KeyValueStore>(store: &LedgerStore<S>, root: &Address, addresses: &[Address]) {
    let mut tx = store.begin().expect("begin");
    tx.create_account(&Account::new(root.clone(), "merchant-1"))
        .expect("create");
    tx.store_addresses(root, addresses, 0, false)
        .expect("addresses");
    tx.store_invoice(&Invoice {
        id: addresses[0].clone(),
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
}

fn block_report(report: FollowerReport) -> dogeledger_ledger::BlockReport {
    match report {
        FollowerReport::Block(report) => report,
        other => panic!("expected block report, got {other:?}"),
    }
}

#[test]
fn invoice_is_paid_once_payment_is_deep_enough() {
    let root = addr(1);
    let addr1 = addr(2);
    let store = Arc::new(LedgerStore::open(MemoryStore::new()).expect("open"));
    provision(&store, &root, &[addr1.clone()]);
    let follower = ChainFollower::new(Arc::clone(&store), NETWORK, 6);
    assert_eq!(follower.resume_height().expect("resume"), None);

    let payment = BlockTx {
        txid: [0x11; 32],
        inputs: Vec::new(),
        outputs: vec![pay(&addr(90), COIN), pay(&addr1, 10 * COIN)],
    };
    let report = block_report(follower.apply(&block(100, vec![payment])).expect("block"));
    assert_eq!(report.utxos_created, 1);
    assert!(report.invoices_paid.is_empty());

    for height in 101..106 {
        let report = block_report(follower.apply(&block(height, Vec::new())).expect("block"));
        assert!(report.invoices_paid.is_empty(), "paid early at {height}");
    }
    let report = block_report(follower.apply(&block(106, Vec::new())).expect("block"));
    assert_eq!(report.invoices_paid, vec![addr1.clone()]);
    assert_eq!(report.utxos_confirmed, 1);

    assert_eq!(
        store.get_invoice(&addr1).expect("invoice").status(),
        InvoiceStatus::Paid
    );
    let state = store.get_chain_state().expect("state");
    assert_eq!(state.best_block_height, 106);
    assert_eq!(state.best_block_hash, block_hash(106));
    assert_eq!(follower.resume_height().expect("resume"), Some(106));

    let tx = store.begin().expect("begin");
    assert_eq!(tx.get_address_blocks(&addr1).expect("blocks"), vec![100]);
    assert!(tx.get_address_blocks(&addr(90)).expect("untracked").is_empty());
}

#[test]
fn underpayment_waits_for_a_second_output() {
    let root = addr(1);
    let addr1 = addr(2);
    let store = Arc::new(LedgerStore::open(MemoryStore::new()).expect("open"));
    provision(&store, &root, &[addr1.clone()]);
    let follower = ChainFollower::new(Arc::clone(&store), NETWORK, 1);

    let first = BlockTx {
        txid: [0x21; 32],
        inputs: Vec::new(),
        outputs: vec![pay(&addr1, 6 * COIN)],
    };
    let second = BlockTx {
        txid: [0x22; 32],
        inputs: Vec::new(),
        outputs: vec![pay(&addr1, 4 * COIN)],
    };
    follower.apply(&block(10, vec![first])).expect("first");
    let report = block_report(follower.apply(&block(11, vec![second])).expect("second"));
    assert!(report.invoices_paid.is_empty());
    let report = block_report(follower.apply(&block(12, Vec::new())).expect("deeper"));
    assert_eq!(report.invoices_paid, vec![addr1]);
}

#[test]
fn payment_seen_before_the_invoice_still_settles_it() {
    let root = addr(1);
    let addr1 = addr(2);
    let store = Arc::new(LedgerStore::open(MemoryStore::new()).expect("open"));
    {
        let mut tx = store.begin().expect("begin");
        tx.create_account(&Account::new(root.clone(), "merchant-1"))
            .expect("create");
        tx.store_addresses(&root, &[addr1.clone()], 0, false)
            .expect("addresses");
        tx.commit().expect("commit");
    }
    let follower = ChainFollower::new(Arc::clone(&store), NETWORK, 1);
    let payment = BlockTx {
        txid: [0x2a; 32],
        inputs: Vec::new(),
        outputs: vec![pay(&addr1, 5 * COIN)],
    };
    follower.apply(&block(1, vec![payment])).expect("block");

    {
        let mut tx = store.begin().expect("begin");
        tx.store_invoice(&Invoice {
            id: addr1.clone(),
            account: root.clone(),
            items: vec![LineItem {
                value: 5 * COIN,
                quantity: 1,
                ..LineItem::default()
            }],
            ..Invoice::default()
        })
        .expect("invoice");
        let awaiting = tx.list_invoices_awaiting_payment().expect("awaiting");
        assert_eq!(awaiting.len(), 1);
        assert_eq!(awaiting[0].id, addr1);
        tx.commit().expect("commit");
    }

    let report = block_report(follower.apply(&block(2, Vec::new())).expect("block"));
    assert_eq!(report.invoices_paid, vec![addr1.clone()]);
    assert_eq!(
        store.get_invoice(&addr1).expect("invoice").status(),
        InvoiceStatus::Paid
    );
}

#[test]
fn rollback_event_detaches_and_blocks_reapply() {
    let root = addr(1);
    let addr1 = addr(2);
    let store = Arc::new(LedgerStore::open(MemoryStore::new()).expect("open"));
    provision(&store, &root, &[addr1.clone()]);
    let follower = ChainFollower::new(Arc::clone(&store), NETWORK, 6);
    let payment = BlockTx {
        txid: [0x31; 32],
        inputs: Vec::new(),
        outputs: vec![pay(&addr1, 10 * COIN)],
    };
    let outpoint = OutPoint::new(payment.txid, 0);

    follower
        .apply(&block(100, vec![payment.clone()]))
        .expect("block");
    follower.apply(&block(101, Vec::new())).expect("block");
    let before = store.get_account_by_id(&root).expect("account").chain_seq;

    let report = follower
        .apply(&ChainEvent::Rollback {
            max_valid_height: 99,
            best_block_hash: block_hash(99),
        })
        .expect("rollback");
    assert_eq!(
        report,
        FollowerReport::Rollback {
            max_valid_height: 99,
            accounts: vec![root.clone()],
        }
    );
    assert!(store.get_account_by_id(&root).expect("account").chain_seq > before);
    assert_eq!(store.get_chain_state().expect("state").best_block_height, 99);
    assert_eq!(
        store.get_utxo(&outpoint).expect("utxo").status(),
        UtxoStatus::Detached
    );

    // The payment lands again one block later on the new branch.
    follower.apply(&block(100, Vec::new())).expect("block");
    follower
        .apply(&block(101, vec![payment]))
        .expect("block");
    let utxo = store.get_utxo(&outpoint).expect("utxo");
    assert_eq!(utxo.status(), UtxoStatus::Pending);
    assert_eq!(utxo.created_height, Some(101));
}

#[test]
fn spends_and_outgoing_txns_follow_the_chain() {
    let root = addr(1);
    let addr1 = addr(2);
    let change = addr(3);
    let store = Arc::new(LedgerStore::open(MemoryStore::new()).expect("open"));
    provision(&store, &root, &[addr1.clone(), change.clone()]);
    let follower = ChainFollower::new(Arc::clone(&store), NETWORK, 2);
    let funding = BlockTx {
        txid: [0x41; 32],
        inputs: Vec::new(),
        outputs: vec![pay(&addr1, 10 * COIN)],
    };
    let funded = OutPoint::new(funding.txid, 0);
    follower.apply(&block(50, vec![funding])).expect("fund");
    follower.apply(&block(51, Vec::new())).expect("block");
    follower.apply(&block(52, Vec::new())).expect("block");

    let payout: Hash256 = [0x42; 32];
    {
        let mut tx = store.begin().expect("begin");
        tx.create_txn(&Txn {
            id: payout,
            account: root.clone(),
            amount: 9 * COIN,
            fee: COIN / 2,
            inputs: vec![funded],
            created: 1_700_000_000,
            on_chain_height: None,
            confirmed_height: None,
        })
        .expect("txn");
        tx.commit().expect("commit");
    }
    assert_eq!(store.calculate_balance(&root).expect("balance").outgoing, 10 * COIN);

    let spend = BlockTx {
        txid: payout,
        inputs: vec![funded],
        outputs: vec![pay(&addr(80), 9 * COIN), pay(&change, COIN / 2)],
    };
    let report = block_report(follower.apply(&block(53, vec![spend])).expect("spend"));
    assert_eq!(report.utxos_spent, 1);
    assert_eq!(report.utxos_created, 1);

    let balance = store.calculate_balance(&root).expect("balance");
    assert_eq!(balance.outgoing, 0);
    assert_eq!(balance.incoming, COIN / 2);

    follower.apply(&block(54, Vec::new())).expect("block");
    let report = block_report(follower.apply(&block(55, Vec::new())).expect("block"));
    assert_eq!(report.txns_confirmed, 1);
    let tx = store.begin().expect("begin");
    assert_eq!(tx.get_txn(&payout).expect("txn").status(), TxnStatus::Confirmed);
    assert_eq!(tx.get_address_blocks(&addr1).expect("blocks"), vec![50, 53]);
}

#[test]
fn run_drains_the_event_channel() {
    let root = addr(1);
    let addr1 = addr(2);
    let store = Arc::new(LedgerStore::open(MemoryStore::new()).expect("open"));
    provision(&store, &root, &[addr1.clone()]);
    let follower = ChainFollower::new(Arc::clone(&store), NETWORK, 3);

    let (sender, receiver) = crossbeam_channel::bounded(4);
    let producer = thread::spawn(move || {
        let payment = BlockTx {
            txid: [0x51; 32],
            inputs: Vec::new(),
            outputs: vec![pay(&addr(2), 10 * COIN)],
        };
        sender.send(block(1, vec![payment])).expect("send");
        for height in 2..=4 {
            sender.send(block(height, Vec::new())).expect("send");
        }
    });

    let applied = follower.run(receiver).expect("run");
    producer.join().expect("producer");
    assert_eq!(applied, 4);
    assert_eq!(
        store.get_invoice(&addr1).expect("invoice").status(),
        InvoiceStatus::Paid
    );
}

#[test]
fn follower_resumes_from_a_fjall_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = addr(1);
    let addr1 = addr(2);
    {
        let backend = FjallStore::open(dir.path()).expect("open fjall");
        let store = Arc::new(LedgerStore::open(backend).expect("open"));
        provision(&store, &root, &[addr1.clone()]);
        let follower = ChainFollower::new(Arc::clone(&store), NETWORK, 6);
        let payment = BlockTx {
            txid: [0x61; 32],
            inputs: Vec::new(),
            outputs: vec![pay(&addr1, 10 * COIN)],
        };
        follower.apply(&block(7, vec![payment])).expect("block");
        follower.apply(&block(8, Vec::new())).expect("block");
        store.backend().persist().expect("persist");
    }

    let backend = FjallStore::open(dir.path()).expect("reopen fjall");
    let store = Arc::new(LedgerStore::open(backend).expect("reopen"));
    let follower = ChainFollower::new(Arc::clone(&store), NETWORK, 6);
    assert_eq!(follower.resume_height().expect("resume"), Some(8));
    for height in 9..=13 {
        follower.apply(&block(height, Vec::new())).expect("block");
    }
    assert_eq!(
        store.get_invoice(&addr1).expect("invoice").status(),
        InvoiceStatus::Paid
    );
    assert_eq!(
        store.get_utxo(&OutPoint::new([0x61; 32], 0)).expect("utxo").status(),
        UtxoStatus::Confirmed
    );
}
