//! Withdrawal handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};

use super::super::state::AppState;
use super::super::types::{ApiResult, ValidatedJson, WithdrawRequest, WithdrawResponse};
use crate::core_types::Reference;
use crate::money::Amount;
use crate::withdrawal::{WithdrawError, WithdrawalRecord};

/// Withdrawals listed per provider
const HISTORY_LIMIT: usize = 50;

/// POST /api/v1/withdraw
pub async fn create_withdrawal(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<WithdrawRequest>,
) -> ApiResult<WithdrawResponse> {
    let amount = Amount::from_decimal(req.amount).map_err(WithdrawError::from)?;
    tracing::info!(uid = %req.uid, amount = %amount, method = %req.method, "Withdrawal requested");

    let record = state
        .tracker
        .initiate(&req.uid, amount, req.method, &req.pin)
        .await?;
    Ok(Json(WithdrawResponse::from(&record)))
}

/// GET /api/v1/withdrawals/{uid}
pub async fn list_withdrawals(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<String>,
) -> ApiResult<Vec<WithdrawalRecord>> {
    Ok(Json(state.tracker.history(&uid, HISTORY_LIMIT).await?))
}

/// GET /api/v1/withdrawal/{reference}
pub async fn get_withdrawal(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> ApiResult<WithdrawalRecord> {
    Ok(Json(state.tracker.get(&Reference::from(reference)).await?))
}
