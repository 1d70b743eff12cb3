//! HTTP request/response types and the error body
//!
//! Success bodies are the DTOs below, camelCase. Every error is
//! `{"code": "...", "error": "..."}` with the status taken from the
//! domain error's `http_status()`.

use axum::{
    Json,
    body::Body,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use validator::Validate;

use crate::account::AccountError;
use crate::core_types::{PayoutMethod, Rail, Reference};
use crate::earnings::EarningsError;
use crate::money::Amount;
use crate::settlement::{ReconcileError, WebhookError};
use crate::wallet::{LedgerError, PayoutRecipient, Wallet};
use crate::withdrawal::{WithdrawError, WithdrawalRecord};

// ============================================================================
// Error body
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub error: String,
    /// Set on a gateway timeout so the client can poll the withdrawal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

impl ApiError {
    pub fn new(status: u16, code: &'static str, error: impl Into<String>) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body: ErrorBody {
                code,
                error: error.into(),
                reference: None,
            },
        }
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(400, "INVALID_PARAMETER", error)
    }

    pub fn unauthorized(error: impl Into<String>) -> Self {
        Self::new(401, "UNAUTHORIZED", error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<WithdrawError> for ApiError {
    fn from(e: WithdrawError) -> Self {
        let mut err = ApiError::new(e.http_status(), e.code(), e.to_string());
        if let WithdrawError::GatewayTimeout { reference } = &e {
            err.body.reference = Some(reference.to_string());
        }
        err
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        ApiError::new(e.http_status(), e.code(), e.to_string())
    }
}

impl From<AccountError> for ApiError {
    fn from(e: AccountError) -> Self {
        ApiError::new(e.http_status(), e.code(), e.to_string())
    }
}

impl From<EarningsError> for ApiError {
    fn from(e: EarningsError) -> Self {
        ApiError::new(e.http_status(), e.code(), e.to_string())
    }
}

impl From<ReconcileError> for ApiError {
    fn from(e: ReconcileError) -> Self {
        ApiError::new(e.http_status(), e.code(), e.to_string())
    }
}

impl From<WebhookError> for ApiError {
    fn from(e: WebhookError) -> Self {
        ApiError::new(e.http_status(), e.code(), e.to_string())
    }
}

// ============================================================================
// ValidatedJson: JSON body + field validation at the extractor level
// ============================================================================

/// Handlers never see a body that failed to parse or validate.
#[derive(Debug)]
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ApiError;

    async fn from_request(req: Request<Body>, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value): Json<T> = Json::from_request(req, state)
            .await
            .map_err(|e| ApiError::bad_request(format!("Invalid JSON: {}", e.body_text())))?;
        value
            .validate()
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
        Ok(ValidatedJson(value))
    }
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawRequest {
    #[validate(length(min = 1, max = 128))]
    pub uid: String,
    /// Whole currency units; fractional values are rejected
    pub amount: Decimal,
    pub method: PayoutMethod,
    #[validate(length(min = 1, max = 16))]
    pub pin: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SetPinRequest {
    #[validate(length(min = 1, max = 128))]
    pub uid: String,
    pub pin: String,
    pub confirm_pin: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RecipientRequest {
    #[validate(length(min = 1, max = 128))]
    pub uid: String,
    pub method: PayoutMethod,
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[validate(length(min = 1, max = 64))]
    pub account_number: String,
    #[serde(default)]
    pub bank_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub token: Option<String>,
    /// Withdrawal reference appended to the callback URL at initiation
    pub reference: Option<String>,
}

impl CallbackQuery {
    pub fn callback_reference(&self) -> Option<Reference> {
        self.reference
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(Reference::from)
    }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawResponse {
    pub transfer_code: Option<String>,
    pub reference: Reference,
    /// Public status: pending | success | failed | timeout
    pub status: String,
    pub amount: Amount,
    pub fee: Amount,
    pub total: Amount,
}

impl From<&WithdrawalRecord> for WithdrawResponse {
    fn from(r: &WithdrawalRecord) -> Self {
        Self {
            transfer_code: r.transfer_code.clone(),
            reference: r.reference.clone(),
            status: r.status.public_name().to_string(),
            amount: r.amount,
            fee: r.fee,
            total: r.total,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletResponse {
    pub uid: String,
    pub available: Amount,
    pub pending: Amount,
    pub lifetime: Amount,
}

impl WalletResponse {
    pub fn new(uid: impl Into<String>, wallet: Wallet) -> Self {
        Self {
            uid: uid.into(),
            available: wallet.available,
            pending: wallet.pending,
            lifetime: wallet.lifetime,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientResponse {
    pub method: PayoutMethod,
    pub rail: Rail,
    pub name: String,
    pub account_number: String,
    pub recipient_code: Option<String>,
}

impl From<PayoutRecipient> for RecipientResponse {
    fn from(r: PayoutRecipient) -> Self {
        Self {
            method: r.method,
            rail: r.rail,
            name: r.name,
            account_number: r.account_number,
            recipient_code: r.recipient_code,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningsResponse {
    /// applied | already_applied | no_effect
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet: Option<Wallet>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: &'static str,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_error_carries_reference() {
        let err = ApiError::from(WithdrawError::GatewayTimeout {
            reference: Reference::from("ref-9"),
        });
        assert_eq!(err.status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.body.code, "GATEWAY_TIMEOUT");
        assert_eq!(err.body.reference.as_deref(), Some("ref-9"));
    }

    #[test]
    fn test_unknown_shape_is_acknowledged() {
        let err = ApiError::from(WebhookError::UnknownShape("x".into()));
        assert_eq!(err.status, StatusCode::OK);
    }

    #[test]
    fn test_withdraw_request_validation() {
        let req: WithdrawRequest = serde_json::from_str(
            r#"{"uid": "", "amount": 50, "method": "mobile", "pin": "1234"}"#,
        )
        .unwrap();
        assert!(req.validate().is_err());

        let req: WithdrawRequest = serde_json::from_str(
            r#"{"uid": "p1", "amount": "50", "method": "bank", "pin": "1234"}"#,
        )
        .unwrap();
        assert!(req.validate().is_ok());
        assert_eq!(req.method, PayoutMethod::Bank);
    }
}
