//! Internal booking-transition hook

use std::sync::Arc;

use axum::{Json, body::Bytes, extract::State, http::HeaderMap};
use tracing::warn;

use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, EarningsResponse};
use crate::earnings::{BookingStatusChange, EarningsOutcome};
use crate::settlement::signature;

pub const INTERNAL_SECRET_HEADER: &str = "x-internal-secret";

/// POST /internal/earnings/booking
pub async fn booking_transition(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<EarningsResponse> {
    let provided = headers
        .get(INTERNAL_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    let authorized = match (state.secrets.internal_secret.as_deref(), provided) {
        (Some(expected), Some(provided)) => signature::tokens_match(expected, provided),
        _ => false,
    };
    if !authorized {
        warn!("Internal earnings call rejected");
        return Err(ApiError::unauthorized("Invalid internal secret"));
    }

    let change: BookingStatusChange = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON: {}", e)))?;

    let response = match state.earnings.apply(&change).await? {
        EarningsOutcome::Applied { share, wallet, .. } => EarningsResponse {
            outcome: "applied",
            share: Some(share),
            wallet: Some(wallet),
        },
        EarningsOutcome::AlreadyApplied { .. } => EarningsResponse {
            outcome: "already_applied",
            share: None,
            wallet: None,
        },
        EarningsOutcome::NoEffect => EarningsResponse {
            outcome: "no_effect",
            share: None,
            wallet: None,
        },
    };
    Ok(Json(response))
}
