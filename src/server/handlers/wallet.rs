//! Wallet and withdrawal-credential handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::{Value, json};

use super::super::state::AppState;
use super::super::types::{
    ApiResult, RecipientRequest, RecipientResponse, SetPinRequest, ValidatedJson, WalletResponse,
};
use crate::account::RecipientDetails;

/// GET /api/v1/wallet/{uid}
pub async fn get_wallet(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<String>,
) -> ApiResult<WalletResponse> {
    let wallet = state.ledger.balance(&uid).await?;
    Ok(Json(WalletResponse::new(uid, wallet)))
}

/// POST /api/v1/wallet/pin
pub async fn set_pin(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<SetPinRequest>,
) -> ApiResult<Value> {
    state
        .accounts
        .set_pin(&req.uid, &req.pin, &req.confirm_pin)
        .await?;
    Ok(Json(json!({ "success": true })))
}

/// POST /api/v1/payout/recipient
pub async fn register_recipient(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<RecipientRequest>,
) -> ApiResult<RecipientResponse> {
    let recipient = state
        .accounts
        .register_recipient(
            &req.uid,
            RecipientDetails {
                method: req.method,
                name: req.name,
                account_number: req.account_number,
                bank_code: req.bank_code,
            },
        )
        .await?;
    Ok(Json(RecipientResponse::from(recipient)))
}
