use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::services::wallet::WalletMovement;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WalletMovementRequest {
    pub amount: Decimal,
    pub payment_method: Option<String>,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
    pub processed_by: Option<Uuid>,
}

impl WalletMovementRequest {
    fn into_movement(self, member_id: Uuid) -> WalletMovement {
        WalletMovement {
            member_id,
            amount: self.amount,
            payment_method: self.payment_method,
            reference_number: self.reference_number,
            notes: self.notes,
            processed_by: self.processed_by,
        }
    }
}

pub async fn credit(
    State(state): State<AppState>,
    Path(member_id): Path<Uuid>,
    Json(request): Json<WalletMovementRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let record = state
        .services
        .wallet
        .credit(request.into_movement(member_id))
        .await?;
    Ok(Json(record))
}

pub async fn debit(
    State(state): State<AppState>,
    Path(member_id): Path<Uuid>,
    Json(request): Json<WalletMovementRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let record = state
        .services
        .wallet
        .debit(request.into_movement(member_id))
        .await?;
    Ok(Json(record))
}

pub async fn balance(
    State(state): State<AppState>,
    Path(member_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let balance = state.services.wallet.balance(member_id).await?;
    Ok(Json(json!({ "member_id": member_id, "balance": balance })))
}
