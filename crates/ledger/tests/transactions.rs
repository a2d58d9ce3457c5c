use std::sync::Arc;

use dogeledger_ledger::keys::META_SCHEMA_VERSION;
use dogeledger_ledger::{Account, ChainState, LedgerError, LedgerStore, SCHEMA_VERSION};
use dogeledger_primitives::{Address, Network};
use dogeledger_storage::memory::MemoryStore;
use dogeledger_storage::{Column, KeyValueStore};

fn addr(seed: u8) -> Address {
    Address::from_pubkey_hash(&[seed; 20], Network::Regtest)
}

#[test]
fn reads_see_own_writes_but_readers_wait_for_commit() {
    let store = LedgerStore::open(MemoryStore::new()).expect("open");
    let mut tx = store.begin().expect("begin");
    tx.create_account(&Account::new(addr(1), "merchant-1"))
        .expect("create");

    assert_eq!(tx.get_account("merchant-1").expect("own write").id, addr(1));
    assert!(store.get_account("merchant-1").unwrap_err().is_not_found());

    tx.commit().expect("commit");
    assert_eq!(store.get_account("merchant-1").expect("committed").id, addr(1));
}

#[test]
fn dropped_and_rolled_back_transactions_leave_no_trace() {
    let store = LedgerStore::open(MemoryStore::new()).expect("open");
    {
        let mut tx = store.begin().expect("begin");
        tx.create_account(&Account::new(addr(1), "merchant-1"))
            .expect("create");
    }
    assert!(store.get_account("merchant-1").unwrap_err().is_not_found());

    let mut tx = store.begin().expect("begin");
    tx.create_account(&Account::new(addr(2), "merchant-2"))
        .expect("create");
    tx.rollback().expect("rollback");
    assert!(!tx.is_open());
    assert!(matches!(
        tx.get_account("merchant-2"),
        Err(LedgerError::Closed)
    ));
    assert!(store.get_account("merchant-2").unwrap_err().is_not_found());
}

#[test]
fn finished_transaction_refuses_further_work() {
    let store = LedgerStore::open(MemoryStore::new()).expect("open");
    let mut tx = store.begin().expect("begin");
    tx.create_account(&Account::new(addr(1), "merchant-1"))
        .expect("create");
    tx.commit().expect("commit");

    assert!(matches!(tx.commit(), Err(LedgerError::Closed)));
    assert!(matches!(
        tx.create_account(&Account::new(addr(2), "merchant-2")),
        Err(LedgerError::Closed)
    ));
    tx.rollback().expect("rollback after commit is a no-op");
    assert_eq!(store.get_account("merchant-1").expect("kept").id, addr(1));
}

#[test]
fn closed_store_refuses_new_transactions() {
    let store = LedgerStore::open(MemoryStore::new()).expect("open");
    store.close();
    assert!(store.is_closed());
    assert!(matches!(store.begin(), Err(LedgerError::Closed)));
}

#[test]
fn chain_state_round_trips_through_meta() {
    let store = LedgerStore::open(MemoryStore::new()).expect("open");
    assert!(store.get_chain_state().unwrap_err().is_not_found());

    let state = ChainState {
        best_block_hash: [0xab; 32],
        best_block_height: 4_200_000,
    };
    let mut tx = store.begin().expect("begin");
    tx.update_chain_state(&state).expect("update");
    assert_eq!(tx.get_chain_state().expect("own write"), state);
    tx.commit().expect("commit");
    assert_eq!(store.get_chain_state().expect("committed"), state);
}

#[test]
fn reopen_checks_schema_version() {
    let backend = Arc::new(MemoryStore::new());
    {
        let store = LedgerStore::open(Arc::clone(&backend)).expect("open");
        let mut tx = store.begin().expect("begin");
        tx.create_account(&Account::new(addr(1), "merchant-1"))
            .expect("create");
        tx.commit().expect("commit");
    }

    let store = LedgerStore::open(Arc::clone(&backend)).expect("reopen");
    assert_eq!(store.get_account("merchant-1").expect("persisted").id, addr(1));
    drop(store);

    let future = SCHEMA_VERSION + 1;
    backend
        .put(Column::Meta, META_SCHEMA_VERSION, &future.to_le_bytes())
        .expect("put");
    assert!(matches!(
        LedgerStore::open(Arc::clone(&backend)),
        Err(LedgerError::Validation(_))
    ));
}
