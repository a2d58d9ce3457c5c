use std::collections::BTreeSet;

use dogeledger_ledger::{Account, Invoice, InvoiceStatus, LedgerError, LedgerStore, LineItem};
use dogeledger_primitives::{Address, Network, COIN};
use dogeledger_storage::memory::MemoryStore;

struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

fn addr(seed: u8) -> Address {
    Address::from_pubkey_hash(&[seed; 20], Network::Regtest)
}

fn invoice(id: &Address, account: &Address, value: i64) -> Invoice {
    Invoice {
        id: id.clone(),
        account: account.clone(),
        items: vec![
            LineItem {
                kind: "item".to_string(),
                name: "widget".to_string(),
                value,
                quantity: 2,
                ..LineItem::default()
            },
            LineItem {
                kind: "tax".to_string(),
                value: COIN / 10,
                quantity: 1,
                ..LineItem::default()
            },
        ],
        ..Invoice::default()
    }
}

fn setup(accounts: &[(&Address, &str)], addresses: &[(&Address, Vec<Address>)]) -> LedgerStore<MemoryStore> {
    let store = LedgerStore::open(MemoryStore::new()).expect("open");
    let mut tx = store.begin().expect("begin");
    for (id, foreign_id) in accounts {
        tx.create_account(&Account::new((*id).clone(), *foreign_id))
            .expect("create account");
    }
    for (account, list) in addresses {
        tx.store_addresses(account, list, 0, false)
            .expect("store addresses");
    }
    tx.commit().expect("commit");
    drop(tx);
    store
}

#[test]
fn store_and_fetch_invoice() {
    let root = addr(1);
    let pay = addr(10);
    let store = setup(&[(&root, "merchant-1")], &[(&root, vec![pay.clone()])]);

    let mut tx = store.begin().expect("begin");
    let mut request = invoice(&pay, &root, COIN);
    request.paid = true;
    tx.store_invoice(&request).expect("store");
    tx.commit().expect("commit");

    let stored = store.get_invoice(&pay).expect("get");
    assert_eq!(stored.status(), InvoiceStatus::Open);
    assert_eq!(stored.total(), 2 * COIN + COIN / 10);
    assert_eq!(stored.items.len(), 2);
    assert!(store.get_invoice(&addr(11)).unwrap_err().is_not_found());
}

#[test]
fn duplicate_invoice_is_rejected() {
    let root = addr(1);
    let pay = addr(10);
    let store = setup(&[(&root, "merchant-1")], &[(&root, vec![pay.clone()])]);

    let mut tx = store.begin().expect("begin");
    tx.store_invoice(&invoice(&pay, &root, COIN)).expect("store");
    let err = tx.store_invoice(&invoice(&pay, &root, 5 * COIN)).unwrap_err();
    assert!(err.is_already_exists());
    tx.commit().expect("commit");

    assert_eq!(store.get_invoice(&pay).expect("get").items[0].value, COIN);
}

#[test]
fn commit_rejects_invoice_at_foreign_or_unknown_address() {
    let root = addr(1);
    let other = addr(2);
    let theirs = addr(20);
    let store = setup(
        &[(&root, "merchant-1"), (&other, "merchant-2")],
        &[(&other, vec![theirs.clone()])],
    );

    let mut tx = store.begin().expect("begin");
    tx.create_account(&Account::new(addr(3), "merchant-3"))
        .expect("create");
    tx.store_invoice(&invoice(&theirs, &root, COIN)).expect("buffered");
    let err = tx.commit().unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
    assert!(!tx.is_open());

    // Nothing from the failed transaction is visible.
    assert!(store.get_invoice(&theirs).unwrap_err().is_not_found());
    assert!(store.get_account("merchant-3").unwrap_err().is_not_found());

    let mut tx = store.begin().expect("begin");
    tx.store_invoice(&invoice(&addr(99), &root, COIN)).expect("buffered");
    assert!(matches!(tx.commit(), Err(LedgerError::Validation(_))));
}

#[test]
fn pagination_returns_every_invoice_once() {
    let root = addr(1);
    let other = addr(2);
    let ours: Vec<Address> = (10..47).map(addr).collect();
    let theirs: Vec<Address> = (100..120).map(addr).collect();
    let store = setup(
        &[(&root, "merchant-1"), (&other, "merchant-2")],
        &[(&root, ours.clone()), (&other, theirs.clone())],
    );

    // Interleave so the global sequence has gaps for each account.
    let mut tx = store.begin().expect("begin");
    for (index, id) in ours.iter().enumerate() {
        tx.store_invoice(&invoice(id, &root, COIN)).expect("ours");
        if let Some(id) = theirs.get(index) {
            tx.store_invoice(&invoice(id, &other, COIN)).expect("theirs");
        }
    }
    tx.commit().expect("commit");

    let mut rng = Lcg(7);
    for _ in 0..5 {
        let mut seen = Vec::new();
        let mut cursor = 0;
        loop {
            let limit = (rng.next() % 8) as usize;
            let page = store.list_invoices(&root, cursor, limit).expect("page");
            assert!(page.items.len() <= limit.max(1));
            assert!(!page.items.is_empty());
            seen.extend(page.items.into_iter().map(|invoice| invoice.id));
            if page.next_cursor == 0 {
                break;
            }
            cursor = page.next_cursor;
        }
        assert_eq!(seen, ours);
        let unique: BTreeSet<&Address> = seen.iter().collect();
        assert_eq!(unique.len(), ours.len());
    }

    let page = store.list_invoices(&addr(3), 0, 10).expect("empty");
    assert!(page.items.is_empty());
    assert_eq!(page.next_cursor, 0);
}

#[test]
fn pages_inside_a_transaction_include_pending_invoices() {
    let root = addr(1);
    let ids: Vec<Address> = (10..15).map(addr).collect();
    let store = setup(&[(&root, "merchant-1")], &[(&root, ids.clone())]);
    {
        let mut tx = store.begin().expect("begin");
        for id in &ids[..2] {
            tx.store_invoice(&invoice(id, &root, COIN)).expect("committed");
        }
        tx.commit().expect("commit");
    }

    let mut tx = store.begin().expect("begin");
    for id in &ids[2..] {
        tx.store_invoice(&invoice(id, &root, COIN)).expect("pending");
    }
    let mut seen = Vec::new();
    let mut cursor = 0;
    loop {
        let page = tx.list_invoices(&root, cursor, 2).expect("page");
        seen.extend(page.items.into_iter().map(|invoice| invoice.id));
        if page.next_cursor == 0 {
            break;
        }
        cursor = page.next_cursor;
    }
    assert_eq!(seen, ids);
    assert_eq!(
        store.list_invoices(&root, 0, 10).expect("committed").items.len(),
        2
    );
}

#[test]
fn mark_paid_is_idempotent_and_terminal() {
    let root = addr(1);
    let pay = addr(10);
    let store = setup(&[(&root, "merchant-1")], &[(&root, vec![pay.clone()])]);

    let mut tx = store.begin().expect("begin");
    tx.store_invoice(&invoice(&pay, &root, COIN)).expect("store");
    tx.mark_invoice_as_paid(&pay).expect("paid");
    tx.mark_invoice_as_paid(&pay).expect("paid again");
    let err = tx.mark_invoice_as_paid(&addr(11)).unwrap_err();
    assert!(err.is_not_found());
    tx.commit().expect("commit");

    assert_eq!(store.get_invoice(&pay).expect("get").status(), InvoiceStatus::Paid);

    let tx = store.begin().expect("begin");
    assert!(tx.list_invoices_awaiting_payment().expect("awaiting").is_empty());
}
