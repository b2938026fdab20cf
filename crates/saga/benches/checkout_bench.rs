use common::{Money, UserId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{CartLine, CheckoutPlan, Product};
use saga::{CheckoutCoordinator, OrderLifecycle, SagaConfig};
use std::collections::HashMap;
use store::{CartStore, InMemoryStore};

fn seeded_cart(store: &InMemoryStore, user_id: UserId, lines: usize) -> Vec<CartLine> {
    (0..lines)
        .map(|i| {
            let product = Product::new(format!("product-{i}"), Money::from_cents(999), u32::MAX);
            store.seed_product(product.clone());
            CartLine::new(user_id, product.id, 2, product.price).unwrap()
        })
        .collect()
}

fn bench_checkout_plan(c: &mut Criterion) {
    let user_id = UserId::new();
    let products: Vec<Product> = (0..10)
        .map(|i| Product::new(format!("product-{i}"), Money::from_cents(999), 100))
        .collect();
    let cart: Vec<CartLine> = products
        .iter()
        .map(|p| CartLine::new(user_id, p.id, 2, p.price).unwrap())
        .collect();
    let by_id: HashMap<_, _> = products.into_iter().map(|p| (p.id, p)).collect();

    c.bench_function("checkout/plan_10_lines", |b| {
        b.iter(|| CheckoutPlan::build(&cart, &by_id).unwrap());
    });
}

fn bench_place_order(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryStore::new();
    let coordinator = CheckoutCoordinator::new(store.clone(), SagaConfig::default());
    let user_id = UserId::new();
    let cart = seeded_cart(&store, user_id, 5);

    c.bench_function("checkout/place_order_5_lines", |b| {
        b.iter(|| {
            rt.block_on(async {
                for line in &cart {
                    store.upsert_line(line.clone()).await.unwrap();
                }
                coordinator.place_order(user_id).await.unwrap();
            });
        });
    });
}

fn bench_place_and_cancel(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryStore::new();
    let lifecycle = OrderLifecycle::new(store.clone(), SagaConfig::default());
    let coordinator = CheckoutCoordinator::new(store.clone(), SagaConfig::default())
        .with_order_guard(lifecycle.order_guard());
    let user_id = UserId::new();
    let cart = seeded_cart(&store, user_id, 5);

    c.bench_function("checkout/place_and_cancel_5_lines", |b| {
        b.iter(|| {
            rt.block_on(async {
                for line in &cart {
                    store.upsert_line(line.clone()).await.unwrap();
                }
                let placed = coordinator.place_order(user_id).await.unwrap();
                lifecycle.cancel(placed.order.id, user_id).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_checkout_plan,
    bench_place_order,
    bench_place_and_cancel
);
criterion_main!(benches);
