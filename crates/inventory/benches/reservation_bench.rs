use chrono::Utc;
use common::{Money, StockKey};
use criterion::{Criterion, criterion_group, criterion_main};
use inventory::{LineItem, ReservationManager, StockLedger};
use store::{InMemoryStore, Order, OrderLine, Store, Transaction};

async fn seed_order(store: &InMemoryStore, key: &StockKey) -> common::OrderId {
    let order = Order::new(
        format!("ORD-BENCH-{}", common::OrderId::new()),
        None,
        vec![OrderLine::new(key.clone(), 1, Money::from_cents(1000))],
        Money::zero(),
        Utc::now(),
    );
    let mut tx = store.begin().await.unwrap();
    tx.insert_order(&order).await.unwrap();
    tx.commit().await.unwrap();
    order.id
}

fn bench_reserve_and_confirm(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryStore::new();
    let ledger = StockLedger::new(store.clone());
    let manager = ReservationManager::new(store.clone());
    let key = StockKey::product("SKU-BENCH");
    rt.block_on(async { ledger.set_stock(key.clone(), u32::MAX).await.unwrap() });

    c.bench_function("inventory/reserve_confirm", |b| {
        b.iter(|| {
            rt.block_on(async {
                let order_id = seed_order(&store, &key).await;
                manager
                    .reserve(order_id, &[LineItem::new(key.clone(), 1)])
                    .await
                    .unwrap();
                manager.confirm(order_id).await.unwrap();
            });
        });
    });
}

fn bench_reserve_many_lines(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryStore::new();
    let ledger = StockLedger::new(store.clone());
    let manager = ReservationManager::new(store.clone());
    let keys: Vec<StockKey> = (0..10)
        .map(|i| StockKey::variant("SKU-MULTI", format!("V{i}")))
        .collect();
    rt.block_on(async {
        for key in &keys {
            ledger.set_stock(key.clone(), u32::MAX).await.unwrap();
        }
    });
    let items: Vec<LineItem> = keys.iter().map(|k| LineItem::new(k.clone(), 1)).collect();

    c.bench_function("inventory/reserve_release_10_lines", |b| {
        b.iter(|| {
            rt.block_on(async {
                let order_id = seed_order(&store, &keys[0]).await;
                manager.reserve(order_id, &items).await.unwrap();
                manager.release(order_id, "bench").await.unwrap();
            });
        });
    });
}

criterion_group!(benches, bench_reserve_and_confirm, bench_reserve_many_lines);
criterion_main!(benches);
