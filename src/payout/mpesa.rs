//! M-Pesa B2C rail
//!
//! Amounts are whole shillings. The transfer code is the ConversationID,
//! which the result callback echoes back. Our reference also rides along, as
//! the `Occasion` and as a `reference` query parameter on both callback URLs,
//! so a callback still matches when the initiating call timed out before the
//! ConversationID was stored. B2C has no synchronous status
//! query, so `lookup` always answers `Unknown` and the callback decides.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{
    PayoutError, PayoutGateway, PayoutReceipt, PayoutRequest, RecipientRegistration,
    TransferLookup,
};
use crate::config::MpesaConfig;
use crate::core_types::{PayoutMethod, Rail, Reference};
use crate::wallet::PayoutRecipient;

/// Refresh the OAuth token this long before it expires.
const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(60);

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct MpesaGateway {
    client: reqwest::Client,
    config: MpesaConfig,
    token: Mutex<Option<CachedToken>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Daraja sends this as a string
    expires_in: serde_json::Value,
}

#[derive(Serialize)]
struct B2cBody<'a> {
    #[serde(rename = "InitiatorName")]
    initiator_name: &'a str,
    #[serde(rename = "SecurityCredential")]
    security_credential: &'a str,
    #[serde(rename = "CommandID")]
    command_id: &'a str,
    #[serde(rename = "Amount")]
    amount: i64,
    #[serde(rename = "PartyA")]
    party_a: &'a str,
    #[serde(rename = "PartyB")]
    party_b: &'a str,
    #[serde(rename = "Remarks")]
    remarks: &'a str,
    #[serde(rename = "QueueTimeOutURL")]
    queue_timeout_url: &'a str,
    #[serde(rename = "ResultURL")]
    result_url: &'a str,
    #[serde(rename = "Occasion")]
    occasion: &'a str,
}

#[derive(Deserialize)]
struct B2cResponse {
    #[serde(rename = "ConversationID")]
    conversation_id: Option<String>,
    #[serde(rename = "ResponseCode")]
    response_code: Option<String>,
    #[serde(rename = "ResponseDescription")]
    response_description: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

/// Append `reference=<ref>` to a callback URL, keeping any existing query.
fn with_reference(url: &str, reference: &Reference) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{}{}reference={}", url, sep, reference)
}

/// Normalize a Kenyan phone number to `2547XXXXXXXX` / `2541XXXXXXXX`.
pub fn normalize_msisdn(raw: &str) -> Option<String> {
    let digits: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    let digits = digits.strip_prefix('+').unwrap_or(&digits);
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let normalized = match digits.len() {
        12 if digits.starts_with("254") => digits.to_string(),
        10 if digits.starts_with('0') => format!("254{}", &digits[1..]),
        9 if digits.starts_with('7') || digits.starts_with('1') => format!("254{}", digits),
        _ => return None,
    };
    let subscriber = &normalized[3..];
    (subscriber.starts_with('7') || subscriber.starts_with('1')).then_some(normalized)
}

fn parse_expires_in(value: &serde_json::Value) -> u64 {
    match value {
        serde_json::Value::Number(n) => n.as_u64().unwrap_or(0),
        serde_json::Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

impl MpesaGateway {
    pub fn new(config: &MpesaConfig, timeout: Duration) -> Result<Self, PayoutError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            config: MpesaConfig {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config.clone()
            },
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Cached OAuth token. Any failure here happens before the payment
    /// request is sent, so it is reported as definitive.
    async fn access_token(&self) -> Result<String, PayoutError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > Instant::now()
        {
            return Ok(token.value.clone());
        }

        let basic = BASE64.encode(format!(
            "{}:{}",
            self.config.consumer_key, self.config.consumer_secret
        ));
        let response = self
            .client
            .get(self.url("/oauth/v1/generate"))
            .query(&[("grant_type", "client_credentials")])
            .header(reqwest::header::AUTHORIZATION, format!("Basic {}", basic))
            .send()
            .await
            .map_err(|e| PayoutError::Unreachable(format!("oauth: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| PayoutError::Unreachable(format!("oauth: {}", e)))?;
        if !status.is_success() {
            return Err(PayoutError::Rejected {
                status: Some(status.as_u16()),
                message: format!("oauth: {}", text),
            });
        }
        let token: TokenResponse = serde_json::from_str(&text)
            .map_err(|e| PayoutError::Unreachable(format!("oauth response: {}", e)))?;

        let ttl = Duration::from_secs(parse_expires_in(&token.expires_in));
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + ttl.saturating_sub(TOKEN_EXPIRY_SKEW),
        });
        debug!(ttl_secs = ttl.as_secs(), "M-Pesa access token refreshed");
        Ok(token.access_token)
    }
}

#[async_trait]
impl PayoutGateway for MpesaGateway {
    fn rail(&self) -> Rail {
        Rail::Mpesa
    }

    fn recipient_ready(&self, recipient: &PayoutRecipient) -> bool {
        recipient.method == PayoutMethod::Mobile
            && normalize_msisdn(&recipient.account_number).is_some()
    }

    async fn initiate(&self, request: &PayoutRequest) -> Result<PayoutReceipt, PayoutError> {
        let phone = normalize_msisdn(&request.recipient.account_number).ok_or_else(|| {
            PayoutError::Rejected {
                status: None,
                message: format!("invalid phone number: {}", request.recipient.account_number),
            }
        })?;
        let token = self.access_token().await?;

        let result_url = with_reference(&self.config.result_url, &request.reference);
        let timeout_url = with_reference(&self.config.timeout_url, &request.reference);
        let body = B2cBody {
            initiator_name: &self.config.initiator_name,
            security_credential: &self.config.security_credential,
            command_id: &self.config.command_id,
            amount: request.amount.units(),
            party_a: &self.config.shortcode,
            party_b: &phone,
            remarks: &self.config.remarks,
            queue_timeout_url: &timeout_url,
            result_url: &result_url,
            occasion: request.reference.as_str(),
        };

        debug!(reference = %request.reference, amount = %request.amount, "POST /mpesa/b2c/v1/paymentrequest");
        let response = self
            .client
            .post(self.url("/mpesa/b2c/v1/paymentrequest"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if status.is_server_error() {
            return Err(PayoutError::Unexpected(format!("HTTP {}: {}", status, text)));
        }
        let parsed: B2cResponse = serde_json::from_str(&text)
            .map_err(|e| PayoutError::Unexpected(format!("{}: {}", e, text)))?;

        if !status.is_success() {
            return Err(PayoutError::Rejected {
                status: Some(status.as_u16()),
                message: parsed.error_message.unwrap_or(text),
            });
        }
        if parsed.response_code.as_deref() != Some("0") {
            return Err(PayoutError::Rejected {
                status: Some(status.as_u16()),
                message: parsed
                    .response_description
                    .or(parsed.error_message)
                    .unwrap_or_else(|| "B2C request not accepted".to_string()),
            });
        }
        let conversation_id = parsed.conversation_id.ok_or_else(|| {
            PayoutError::Unexpected("B2C response has no ConversationID".to_string())
        })?;

        info!(reference = %request.reference, conversation_id = %conversation_id, "B2C request accepted");
        Ok(PayoutReceipt {
            transfer_code: conversation_id,
            gateway_status: "accepted".to_string(),
        })
    }

    async fn lookup(&self, _reference: &Reference) -> Result<TransferLookup, PayoutError> {
        Ok(TransferLookup::Unknown)
    }

    async fn register_recipient(
        &self,
        registration: &RecipientRegistration,
    ) -> Result<PayoutRecipient, PayoutError> {
        if registration.method != PayoutMethod::Mobile {
            return Err(PayoutError::Unsupported {
                rail: Rail::Mpesa,
                what: "bank recipients",
            });
        }
        let phone = normalize_msisdn(&registration.account_number).ok_or_else(|| {
            PayoutError::Rejected {
                status: None,
                message: format!("invalid phone number: {}", registration.account_number),
            }
        })?;
        Ok(PayoutRecipient {
            method: PayoutMethod::Mobile,
            rail: Rail::Mpesa,
            name: registration.name.clone(),
            account_number: phone,
            bank_code: None,
            recipient_code: None,
        })
    }
}
