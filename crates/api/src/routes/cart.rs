//! Cart endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::ProductId;
use domain::CartLine;
use saga::CartView;
use serde::{Deserialize, Serialize};
use store::TableStore;

use crate::AppState;
use crate::error::ApiError;
use crate::extract::CurrentUser;

#[derive(Deserialize)]
pub struct AddLineRequest {
    pub product_id: ProductId,
    pub quantity: i64,
}

#[derive(Deserialize)]
pub struct SetQuantityRequest {
    pub quantity: i64,
}

#[derive(Serialize)]
pub struct ClearedResponse {
    pub removed: usize,
}

/// GET /cart
#[tracing::instrument(skip(state))]
pub async fn view<S: TableStore>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<CartView>, ApiError> {
    Ok(Json(state.cart.view(user_id).await?))
}

/// POST /cart adds units of a product, merging with an existing line.
#[tracing::instrument(skip(state, req))]
pub async fn add<S: TableStore>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<AddLineRequest>,
) -> Result<(StatusCode, Json<CartLine>), ApiError> {
    let line = state
        .cart
        .add(user_id, req.product_id, req.quantity)
        .await?;
    Ok((StatusCode::CREATED, Json(line)))
}

/// PUT /cart/{product_id}
#[tracing::instrument(skip(state, req))]
pub async fn set_quantity<S: TableStore>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user_id): CurrentUser,
    Path(product_id): Path<String>,
    Json(req): Json<SetQuantityRequest>,
) -> Result<Json<CartLine>, ApiError> {
    let product_id = parse_id(&product_id)?;
    let line = state
        .cart
        .set_quantity(user_id, product_id, req.quantity)
        .await?;
    Ok(Json(line))
}

/// DELETE /cart/{product_id}
#[tracing::instrument(skip(state))]
pub async fn remove<S: TableStore>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user_id): CurrentUser,
    Path(product_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let product_id = parse_id(&product_id)?;
    state.cart.remove(user_id, product_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /cart
#[tracing::instrument(skip(state))]
pub async fn clear<S: TableStore>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<ClearedResponse>, ApiError> {
    let removed = state.cart.clear(user_id).await?;
    Ok(Json(ClearedResponse { removed }))
}

fn parse_id(id: &str) -> Result<ProductId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid product id: {e}")))
}
