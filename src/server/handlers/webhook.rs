//! Gateway webhook handlers
//!
//! Authentication happens on the raw body before any parsing. Payloads that
//! authenticate but cannot be understood are logged and acknowledged so the
//! gateway stops redelivering them; an unknown withdrawal answers 503 so it
//! does redeliver. M-Pesa callbacks carry no signature, so their routes stay
//! closed unless a callback token is configured.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, CallbackQuery};
use crate::settlement::{
    ReconcileOutcome, SettlementEvent, WebhookError, parse_mpesa_result, parse_mpesa_timeout,
    parse_paystack, signature,
};

pub const PAYSTACK_SIGNATURE_HEADER: &str = "x-paystack-signature";

/// POST /api/v1/webhooks/paystack
pub async fn paystack_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Value> {
    let provided = headers
        .get(PAYSTACK_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookError::MissingSignature)?;
    if !signature::verify(&state.secrets.paystack_secret, &body, provided) {
        warn!(body_len = body.len(), "Paystack webhook signature mismatch");
        return Err(WebhookError::InvalidSignature.into());
    }

    reconcile(&state, "paystack", parse_paystack(&body)).await?;
    Ok(Json(json!({ "received": true })))
}

/// POST /api/v1/webhooks/mpesa/result
pub async fn mpesa_result(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
    body: Bytes,
) -> ApiResult<Value> {
    check_callback_token(&state, query.token.as_deref())?;
    let parsed = parse_mpesa_result(&body, query.callback_reference());
    reconcile(&state, "mpesa", parsed).await?;
    Ok(mpesa_ack())
}

/// POST /api/v1/webhooks/mpesa/timeout
pub async fn mpesa_timeout(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
    body: Bytes,
) -> ApiResult<Value> {
    check_callback_token(&state, query.token.as_deref())?;
    let parsed = parse_mpesa_timeout(&body, query.callback_reference());
    reconcile(&state, "mpesa", parsed).await?;
    Ok(mpesa_ack())
}

fn mpesa_ack() -> Json<Value> {
    Json(json!({ "ResultCode": 0, "ResultDesc": "Accepted" }))
}

fn check_callback_token(state: &AppState, provided: Option<&str>) -> Result<(), ApiError> {
    let Some(expected) = state
        .secrets
        .mpesa_callback_token
        .as_deref()
        .filter(|t| !t.trim().is_empty())
    else {
        warn!("M-Pesa callback rejected: no callback token configured");
        return Err(WebhookError::Unauthorized.into());
    };
    match provided {
        Some(token) if signature::tokens_match(expected, token) => Ok(()),
        _ => {
            warn!("M-Pesa callback with missing or wrong token");
            Err(WebhookError::Unauthorized.into())
        }
    }
}

async fn reconcile(
    state: &AppState,
    rail: &'static str,
    parsed: Result<SettlementEvent, WebhookError>,
) -> Result<(), ApiError> {
    let event = match parsed {
        Ok(event) => event,
        Err(e) => {
            // Acknowledged without a state change
            warn!(rail, error = %e, "Unrecognized webhook payload");
            return Ok(());
        }
    };

    let kind = event.kind().to_string();
    match state.reconciler.apply(event).await? {
        ReconcileOutcome::Applied(record) => info!(
            rail,
            kind = %kind,
            reference = %record.reference,
            status = %record.status,
            "Webhook applied"
        ),
        ReconcileOutcome::AlreadyFinal(record) => info!(
            rail,
            kind = %kind,
            reference = %record.reference,
            status = %record.status,
            "Webhook for final withdrawal acknowledged"
        ),
        ReconcileOutcome::Ignored => {}
    }
    Ok(())
}
