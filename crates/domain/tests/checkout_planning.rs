//! Integration tests for checkout planning and order records.

use std::collections::HashMap;

use chrono::Utc;
use domain::{
    CartLine, CheckoutPlan, DomainError, Money, NewOrder, Order, OrderItem, OrderStatus,
    OrderWithItems, Product, ProductId, UserId,
};

fn catalog(products: &[Product]) -> HashMap<ProductId, Product> {
    products.iter().map(|p| (p.id, p.clone())).collect()
}

#[test]
fn test_plan_to_order_keeps_totals_consistent() {
    let user_id = UserId::new();
    let a = Product::new("A", Money::from_cents(1000), 5);
    let b = Product::new("B", Money::from_cents(500), 1);
    let cart = vec![
        // Stale snapshot prices must not leak into the order.
        CartLine::new(user_id, a.id, 2, Money::from_cents(900)).unwrap(),
        CartLine::new(user_id, b.id, 1, Money::from_cents(500)).unwrap(),
    ];

    let plan = CheckoutPlan::build(&cart, &catalog(&[a.clone(), b.clone()])).unwrap();
    assert_eq!(plan.total_amount, Money::from_cents(2500));
    assert_eq!(plan.unit_count(), 3);

    let order = Order::from_new(NewOrder::new(user_id, plan.total_amount), Utc::now());
    let items: Vec<OrderItem> = plan
        .new_items()
        .iter()
        .map(|item| OrderItem::from_new(order.id, item))
        .collect();
    let placed = OrderWithItems::new(order, items);

    assert_eq!(placed.order.status, OrderStatus::Pending);
    assert_eq!(placed.order.version, 1);
    assert!(placed.check_total().is_ok());
    assert_eq!(placed.quantity_of(a.id), 2);
    assert_eq!(placed.quantity_of(b.id), 1);
    assert!(placed.items.iter().all(|item| item.validate().is_ok()));
}

#[test]
fn test_plan_rejects_shortfall_before_any_write() {
    let user_id = UserId::new();
    let a = Product::new("A", Money::from_cents(1000), 3);
    let cart = vec![CartLine::new(user_id, a.id, 10, a.price).unwrap()];

    let result = CheckoutPlan::build(&cart, &catalog(&[a.clone()]));

    assert_eq!(
        result,
        Err(DomainError::InsufficientStock {
            product_id: a.id,
            requested: 10,
            available: 3,
        })
    );
    assert_eq!(a.shortfall(10), Some(7));
}

#[test]
fn test_full_lifecycle_chain() {
    let mut status = OrderStatus::Pending;
    let mut visited = vec![status];
    while let Some(next) = status.successor() {
        status.validate_advance(next).unwrap();
        status = next;
        visited.push(status);
    }

    assert_eq!(
        visited,
        vec![
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
        ]
    );
    assert!(OrderStatus::Delivered.is_terminal());
    assert!(OrderStatus::Delivered.validate_cancel().is_err());
    assert!(OrderStatus::Pending.validate_cancel().is_ok());
    assert!(
        OrderStatus::Cancelled
            .validate_advance(OrderStatus::Confirmed)
            .is_err()
    );
}
