//! Checkout, order lookup and lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{OrderId, ProductId};
use domain::{DEFAULT_PAGE_SIZE, Order, OrderQuery, OrderStatus, OrderWithItems};
use serde::{Deserialize, Serialize};
use store::TableStore;

use crate::AppState;
use crate::error::ApiError;
use crate::extract::CurrentUser;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct ListOrdersParams {
    pub status: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Deserialize)]
pub struct AdvanceRequest {
    pub status: String,
}

#[derive(Deserialize)]
pub struct AddItemRequest {
    pub product_id: ProductId,
    pub quantity: i64,
}

#[derive(Deserialize)]
pub struct SetItemQuantityRequest {
    pub quantity: i64,
}

// -- Response types --

#[derive(Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

#[derive(Serialize)]
pub struct OrderListResponse {
    pub orders: Vec<Order>,
    pub pagination: Pagination,
}

// -- Handlers --

/// POST /orders places an order from the caller's cart.
#[tracing::instrument(skip(state))]
pub async fn place<S: TableStore>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user_id): CurrentUser,
) -> Result<(StatusCode, Json<OrderWithItems>), ApiError> {
    let placed = state.coordinator.place_order(user_id).await?;
    Ok((StatusCode::CREATED, Json(placed)))
}

/// GET /orders lists the caller's orders, newest first.
#[tracing::instrument(skip(state))]
pub async fn list<S: TableStore>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user_id): CurrentUser,
    Query(params): Query<ListOrdersParams>,
) -> Result<Json<OrderListResponse>, ApiError> {
    let mut query = OrderQuery::for_user(user_id).paged(
        params.page.unwrap_or(1),
        params.limit.unwrap_or(DEFAULT_PAGE_SIZE),
    );
    if let Some(status) = params.status.as_deref().filter(|s| !s.is_empty()) {
        query = query.with_status(parse_status(status)?);
    }

    let page = state.lifecycle.list_orders(&query).await?;
    let pagination = Pagination {
        page: page.page,
        limit: page.limit,
        total: page.total,
        pages: page.pages(),
        has_next: page.has_next(),
        has_prev: page.has_prev(),
    };

    Ok(Json(OrderListResponse {
        orders: page.items,
        pagination,
    }))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: TableStore>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<OrderWithItems>, ApiError> {
    let order_id = parse_order_id(&id)?;
    Ok(Json(state.lifecycle.get_order(order_id, user_id).await?))
}

/// POST /orders/{id}/cancel restores stock and cancels a pending order.
#[tracing::instrument(skip(state))]
pub async fn cancel<S: TableStore>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<OrderWithItems>, ApiError> {
    let order_id = parse_order_id(&id)?;
    Ok(Json(state.lifecycle.cancel(order_id, user_id).await?))
}

/// POST /orders/{id}/advance moves an order one step along the fulfillment chain.
#[tracing::instrument(skip(state, req))]
pub async fn advance<S: TableStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<AdvanceRequest>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let status = parse_status(&req.status)?;
    Ok(Json(state.lifecycle.advance(order_id, status).await?))
}

/// POST /orders/{id}/items adds units of a product to a pending order.
#[tracing::instrument(skip(state, req))]
pub async fn add_item<S: TableStore>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<AddItemRequest>,
) -> Result<Json<OrderWithItems>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let edited = state
        .lifecycle
        .add_item(order_id, user_id, req.product_id, req.quantity)
        .await?;
    Ok(Json(edited))
}

/// PUT /orders/{id}/items/{product_id}
#[tracing::instrument(skip(state, req))]
pub async fn set_item_quantity<S: TableStore>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user_id): CurrentUser,
    Path((id, product_id)): Path<(String, String)>,
    Json(req): Json<SetItemQuantityRequest>,
) -> Result<Json<OrderWithItems>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let product_id = parse_product_id(&product_id)?;
    let edited = state
        .lifecycle
        .set_item_quantity(order_id, user_id, product_id, req.quantity)
        .await?;
    Ok(Json(edited))
}

/// DELETE /orders/{id}/items/{product_id}
#[tracing::instrument(skip(state))]
pub async fn remove_item<S: TableStore>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user_id): CurrentUser,
    Path((id, product_id)): Path<(String, String)>,
) -> Result<Json<OrderWithItems>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let product_id = parse_product_id(&product_id)?;
    let edited = state
        .lifecycle
        .remove_item(order_id, user_id, product_id)
        .await?;
    Ok(Json(edited))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid order id: {e}")))
}

fn parse_product_id(id: &str) -> Result<ProductId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid product id: {e}")))
}

fn parse_status(status: &str) -> Result<OrderStatus, ApiError> {
    status
        .parse()
        .map_err(|e: domain::DomainError| ApiError::BadRequest(e.to_string()))
}
