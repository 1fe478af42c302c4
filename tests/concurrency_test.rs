// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Concurrency tests for the purchase protocol.
//!
//! These run purchases from many tasks on a multi-threaded runtime and check
//! the stock invariants: no negative quantity, no lost update, no partial
//! state visible to readers, and no contention between unrelated items.

use parking_lot::deadlock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use stock_ledger::{
    InventoryError, InventoryService, Item, ItemId, MemoryLedger, PurchaseRequest, StockLedger,
    UnitOfWork,
};
use tokio::sync::Barrier;

fn inventory_with(items: Vec<Item>) -> (Arc<InventoryService>, MemoryLedger) {
    let ledger = MemoryLedger::with_items(items).unwrap();
    (
        Arc::new(InventoryService::new(Arc::new(ledger.clone()))),
        ledger,
    )
}

/// Fires `requests` at once, each from its own task, and collects the outcomes.
async fn purchase_concurrently(
    inventory: &Arc<InventoryService>,
    requests: Vec<PurchaseRequest>,
) -> Vec<(PurchaseRequest, Result<Item, InventoryError>)> {
    let barrier = Arc::new(Barrier::new(requests.len()));
    let handles: Vec<_> = requests
        .into_iter()
        .map(|request| {
            let inventory = Arc::clone(inventory);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                (request, inventory.purchase(request).await)
            })
        })
        .collect();

    futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect()
}

/// Watches parking_lot locks from a background thread; returns a stop flag
/// and a flag raised if a deadlock was ever seen.
fn start_deadlock_detector() -> (Arc<AtomicBool>, Arc<AtomicBool>) {
    let running = Arc::new(AtomicBool::new(true));
    let detected = Arc::new(AtomicBool::new(false));
    let running_clone = running.clone();
    let detected_clone = detected.clone();

    thread::spawn(move || {
        while running_clone.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(50));
            let deadlocks = deadlock::check_deadlock();
            if !deadlocks.is_empty() {
                eprintln!("\n=== DEADLOCK DETECTED ===");
                for (i, threads) in deadlocks.iter().enumerate() {
                    eprintln!("\nDeadlock #{}", i + 1);
                    for t in threads {
                        eprintln!("Thread ID: {:?}", t.thread_id());
                        eprintln!("Backtrace:\n{:#?}", t.backtrace());
                    }
                }
                detected_clone.store(true, Ordering::SeqCst);
            }
        }
    });

    (running, detected)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_racing_purchases_exactly_one_wins() {
    // Repeat to give the race many chances to go wrong
    for _ in 0..100 {
        let (inventory, ledger) = inventory_with(vec![Item::new(ItemId(1), "Widget", 5)]);
        let request = PurchaseRequest::new(ItemId(1), 3);

        let outcomes = purchase_concurrently(&inventory, vec![request, request]).await;

        let successes: Vec<_> = outcomes.iter().filter(|(_, r)| r.is_ok()).collect();
        let failures: Vec<_> = outcomes.iter().filter(|(_, r)| r.is_err()).collect();
        assert_eq!(successes.len(), 1);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].1, Err(InventoryError::InsufficientStock));

        let successful_item = successes[0].1.as_ref().unwrap();
        assert_eq!(successful_item.quantity, 2);
        assert_eq!(ledger.get(ItemId(1)).await.unwrap().quantity, 2);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn no_lost_updates_under_contention() {
    const INITIAL_STOCK: i64 = 150;
    const NUM_PURCHASES: usize = 200;

    let (inventory, ledger) = inventory_with(vec![Item::new(ItemId(1), "Widget", INITIAL_STOCK)]);

    let requests: Vec<_> = (0..NUM_PURCHASES)
        .map(|i| PurchaseRequest::new(ItemId(1), (i % 3) as i64 + 1))
        .collect();
    let outcomes = purchase_concurrently(&inventory, requests).await;

    let sold: i64 = outcomes
        .iter()
        .filter(|(_, result)| result.is_ok())
        .map(|(request, _)| request.quantity)
        .sum();
    let final_quantity = ledger.get(ItemId(1)).await.unwrap().quantity;

    assert!(final_quantity >= 0);
    assert_eq!(final_quantity, INITIAL_STOCK - sold);

    // Every rejected request really was unsatisfiable when it ran: stock
    // only decreases, so it must still be too low at the end.
    for (request, result) in &outcomes {
        if let Err(err) = result {
            assert_eq!(*err, InventoryError::InsufficientStock);
            assert!(
                request.quantity > final_quantity,
                "request for {} rejected with {} still in stock",
                request.quantity,
                final_quantity
            );
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_purchases_across_items_are_independent() {
    const NUM_ITEMS: u32 = 20;
    const PURCHASES_PER_ITEM: usize = 25;

    let items = (1..=NUM_ITEMS)
        .map(|id| Item::new(ItemId(id), format!("Item {id}"), 100))
        .collect();
    let (inventory, ledger) = inventory_with(items);

    let (running, detected) = start_deadlock_detector();

    let requests: Vec<_> = (1..=NUM_ITEMS)
        .flat_map(|id| (0..PURCHASES_PER_ITEM).map(move |_| PurchaseRequest::new(ItemId(id), 2)))
        .collect();
    let outcomes = purchase_concurrently(&inventory, requests).await;

    running.store(false, Ordering::SeqCst);
    assert!(!detected.load(Ordering::SeqCst), "deadlock detected");

    assert!(outcomes.iter().all(|(_, result)| result.is_ok()));
    for item in ledger.list().await.unwrap() {
        assert_eq!(item.quantity, 100 - 2 * PURCHASES_PER_ITEM as i64);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn locked_item_does_not_block_other_items() {
    let (inventory, ledger) = inventory_with(vec![
        Item::new(ItemId(1), "Widget", 10),
        Item::new(ItemId(2), "Gadget", 10),
    ]);

    let mut holder = ledger.begin().await.unwrap();
    holder.lock_for_update(ItemId(1)).await.unwrap();

    let other = tokio::time::timeout(
        Duration::from_secs(1),
        inventory.purchase(PurchaseRequest::new(ItemId(2), 1)),
    )
    .await
    .expect("purchase of an unrelated item must not wait");
    assert_eq!(other.unwrap().quantity, 9);

    holder.rollback().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn blocked_purchase_proceeds_once_lock_is_released() {
    let (inventory, ledger) = inventory_with(vec![Item::new(ItemId(1), "Widget", 10)]);

    let mut holder = ledger.begin().await.unwrap();
    holder.lock_for_update(ItemId(1)).await.unwrap();
    holder.apply_decrement(ItemId(1), 8).await.unwrap();

    let waiting = {
        let inventory = Arc::clone(&inventory);
        tokio::spawn(async move { inventory.purchase(PurchaseRequest::new(ItemId(1), 5)).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiting.is_finished(), "purchase must wait for the row lock");

    // The waiter re-reads under the lock and sees the committed decrement
    holder.commit().await.unwrap();
    let result = waiting.await.unwrap();
    assert_eq!(result, Err(InventoryError::InsufficientStock));
    assert_eq!(ledger.get(ItemId(1)).await.unwrap().quantity, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn readers_never_observe_partial_state() {
    const INITIAL_STOCK: i64 = 200;
    const UNIT: i64 = 2;

    let (inventory, ledger) = inventory_with(vec![Item::new(ItemId(1), "Widget", INITIAL_STOCK)]);
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let inventory = Arc::clone(&inventory);
            let done = Arc::clone(&done);
            tokio::spawn(async move {
                let mut last = INITIAL_STOCK;
                while !done.load(Ordering::SeqCst) {
                    let seen = inventory.get_item(ItemId(1)).await.unwrap().quantity;
                    // Only whole purchases are ever visible, in order
                    assert!(seen >= 0);
                    assert_eq!(seen % UNIT, 0, "observed partial quantity {seen}");
                    assert!(seen <= last, "quantity went back up: {last} -> {seen}");
                    last = seen;

                    let listed = inventory.list_all().await.unwrap();
                    assert_eq!(listed[0].quantity % UNIT, 0);
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    let requests = vec![PurchaseRequest::new(ItemId(1), UNIT); 150];
    let outcomes = purchase_concurrently(&inventory, requests).await;
    done.store(true, Ordering::SeqCst);

    for reader in readers {
        reader.await.unwrap();
    }

    let succeeded = outcomes.iter().filter(|(_, r)| r.is_ok()).count() as i64;
    assert_eq!(succeeded, INITIAL_STOCK / UNIT);
    assert_eq!(ledger.get(ItemId(1)).await.unwrap().quantity, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timed_out_purchase_releases_lock_without_mutation() {
    let ledger = MemoryLedger::with_items([Item::new(ItemId(1), "Widget", 10)]).unwrap();
    let impatient = InventoryService::new(Arc::new(ledger.clone()))
        .with_purchase_timeout(Duration::from_millis(20));
    let patient = InventoryService::new(Arc::new(ledger.clone()));

    let mut holder = ledger.begin().await.unwrap();
    holder.lock_for_update(ItemId(1)).await.unwrap();

    let result = impatient.purchase(PurchaseRequest::new(ItemId(1), 1)).await;
    assert!(matches!(result, Err(InventoryError::StoreUnavailable(_))));
    holder.rollback().await.unwrap();

    let item = tokio::time::timeout(
        Duration::from_secs(1),
        patient.purchase(PurchaseRequest::new(ItemId(1), 4)),
    )
    .await
    .expect("lock must be free after the timeout")
    .unwrap();
    assert_eq!(item.quantity, 6);
}
