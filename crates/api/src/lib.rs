//! HTTP API server for the storefront checkout.
//!
//! Exposes the cart, checkout and order lifecycle over REST, with
//! structured logging (tracing) and Prometheus metrics. The caller's
//! identity arrives in the `x-user-id` header from the upstream gateway.

pub mod config;
pub mod error;
pub mod extract;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{CartService, CheckoutCoordinator, OrderLifecycle, SagaConfig};
use store::TableStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S: TableStore> {
    pub coordinator: CheckoutCoordinator<S>,
    pub lifecycle: OrderLifecycle<S>,
    pub cart: CartService<S>,
}

impl<S: TableStore> AppState<S> {
    /// Wires the services over one store, sharing the per-order guard
    /// between checkout and the lifecycle.
    pub fn new(store: S, config: SagaConfig) -> Self {
        let lifecycle = OrderLifecycle::new(store.clone(), config);
        let coordinator = CheckoutCoordinator::new(store.clone(), config)
            .with_order_guard(lifecycle.order_guard());
        Self {
            coordinator,
            lifecycle,
            cart: CartService::new(store),
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: TableStore>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/cart",
            get(routes::cart::view::<S>)
                .post(routes::cart::add::<S>)
                .delete(routes::cart::clear::<S>),
        )
        .route(
            "/cart/{product_id}",
            put(routes::cart::set_quantity::<S>).delete(routes::cart::remove::<S>),
        )
        .route(
            "/orders",
            post(routes::orders::place::<S>).get(routes::orders::list::<S>),
        )
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        .route("/orders/{id}/advance", post(routes::orders::advance::<S>))
        .route("/orders/{id}/items", post(routes::orders::add_item::<S>))
        .route(
            "/orders/{id}/items/{product_id}",
            put(routes::orders::set_item_quantity::<S>)
                .delete(routes::orders::remove_item::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
