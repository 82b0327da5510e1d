use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::entities::order::PaymentStatus;
use crate::errors::ServiceError;
use crate::services::orders::{AddItemRequest, CreateOrderRequest, MarkPaidRequest};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let response = state.services.orders.create_order(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let response = state.services.orders.get_order(id).await?;
    Ok(Json(response))
}

pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let response = state
        .services
        .orders
        .list_orders(query.page, query.per_page)
        .await?;
    Ok(Json(response))
}

pub async fn add_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let response = state.services.orders.add_item(id, request).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct UpdateQuantityRequest {
    pub quantity: i32,
    pub acting_user: Option<Uuid>,
}

pub async fn update_item_quantity(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateQuantityRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let response = state
        .services
        .orders
        .update_item_quantity(id, item_id, request.quantity, request.acting_user)
        .await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct ToggleCancellationRequest {
    pub is_cancelled: bool,
    pub acting_user: Option<Uuid>,
}

pub async fn toggle_item_cancellation(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<ToggleCancellationRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let response = state
        .services
        .orders
        .toggle_item_cancellation(id, item_id, request.is_cancelled, request.acting_user)
        .await?;
    Ok(Json(response))
}

pub async fn mark_paid(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<MarkPaidRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let response = state.services.orders.mark_paid(id, request).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub payment_status: PaymentStatus,
    pub acting_user: Option<Uuid>,
}

pub async fn update_payment_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let response = state
        .services
        .orders
        .update_payment_status(id, request.payment_status, request.acting_user)
        .await?;
    Ok(Json(response))
}

pub async fn regenerate_invoice(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let invoice = state.services.orders.regenerate_invoice(id).await?;
    Ok(Json(invoice))
}
