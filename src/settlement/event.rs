//! Gateway webhook payloads, normalized
//!
//! Each rail's callback JSON is parsed here and reduced to a
//! [`SettlementEvent`]. Nothing past this module sees gateway JSON.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::core_types::{Rail, Reference};

/// How a webhook identifies its withdrawal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correlation {
    /// Our reference, echoed by Paystack
    Reference(Reference),
    /// Gateway transaction id (M-Pesa ConversationID)
    TransferCode(String),
    /// Transfer code, falling back to our reference when the code was never
    /// stored (the initiating call timed out)
    TransferCodeOrReference {
        transfer_code: String,
        reference: Reference,
    },
}

impl std::fmt::Display for Correlation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Correlation::Reference(r) => write!(f, "reference:{}", r),
            Correlation::TransferCode(c) => write!(f, "transfer_code:{}", c),
            Correlation::TransferCodeOrReference {
                transfer_code,
                reference,
            } => write!(f, "transfer_code:{}|reference:{}", transfer_code, reference),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDetails {
    /// Rail the callback arrived on
    pub rail: Rail,
    pub correlation: Correlation,
    pub transfer_code: Option<String>,
    /// Provider uid carried in the transfer metadata, when the rail echoes it
    pub claimed_uid: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementEvent {
    Succeeded(EventDetails),
    /// Failed or reversed
    Failed(EventDetails),
    /// Gateway queue timeout
    TimedOut(EventDetails),
    /// Recognized, but does not touch the ledger
    Ignored { kind: String },
}

impl SettlementEvent {
    pub fn kind(&self) -> &str {
        match self {
            SettlementEvent::Succeeded(_) => "succeeded",
            SettlementEvent::Failed(_) => "failed",
            SettlementEvent::TimedOut(_) => "timed_out",
            SettlementEvent::Ignored { kind } => kind,
        }
    }

    pub fn details(&self) -> Option<&EventDetails> {
        match self {
            SettlementEvent::Succeeded(d)
            | SettlementEvent::Failed(d)
            | SettlementEvent::TimedOut(d) => Some(d),
            SettlementEvent::Ignored { .. } => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WebhookError {
    #[error("Missing webhook signature")]
    MissingSignature,

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Invalid callback token")]
    Unauthorized,

    #[error("Unrecognized webhook payload: {0}")]
    UnknownShape(String),
}

impl WebhookError {
    pub fn code(&self) -> &'static str {
        match self {
            WebhookError::MissingSignature => "MISSING_SIGNATURE",
            WebhookError::InvalidSignature => "INVALID_SIGNATURE",
            WebhookError::Unauthorized => "UNAUTHORIZED",
            WebhookError::UnknownShape(_) => "UNKNOWN_WEBHOOK_SHAPE",
        }
    }

    /// Unknown shapes are acknowledged so the gateway stops redelivering.
    pub fn http_status(&self) -> u16 {
        match self {
            WebhookError::MissingSignature | WebhookError::InvalidSignature => 400,
            WebhookError::Unauthorized => 401,
            WebhookError::UnknownShape(_) => 200,
        }
    }
}

// === Paystack ===

#[derive(Deserialize)]
struct PaystackEvent {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct PaystackTransfer {
    reference: Option<String>,
    transfer_code: Option<String>,
    gateway_response: Option<String>,
    #[serde(default)]
    metadata: Value,
}

fn metadata_uid(metadata: &Value) -> Option<String> {
    match metadata.get("uid")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn parse_paystack(body: &[u8]) -> Result<SettlementEvent, WebhookError> {
    let event: PaystackEvent =
        serde_json::from_slice(body).map_err(|e| WebhookError::UnknownShape(e.to_string()))?;

    let build: fn(EventDetails) -> SettlementEvent = match event.event.as_str() {
        "transfer.success" => SettlementEvent::Succeeded,
        "transfer.failed" | "transfer.reversed" => SettlementEvent::Failed,
        _ => {
            return Ok(SettlementEvent::Ignored {
                kind: event.event.clone(),
            });
        }
    };

    let data: PaystackTransfer = serde_json::from_value(event.data)
        .map_err(|e| WebhookError::UnknownShape(format!("{}: {}", event.event, e)))?;

    let correlation = match (&data.reference, &data.transfer_code) {
        (Some(r), _) if !r.is_empty() => Correlation::Reference(Reference::from(r.as_str())),
        (_, Some(code)) if !code.is_empty() => Correlation::TransferCode(code.clone()),
        _ => {
            return Err(WebhookError::UnknownShape(format!(
                "{} without reference or transfer_code",
                event.event
            )));
        }
    };

    let reason = match event.event.as_str() {
        "transfer.success" => None,
        other => Some(
            data.gateway_response
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| other.to_string()),
        ),
    };

    Ok(build(EventDetails {
        rail: Rail::Paystack,
        correlation,
        transfer_code: data.transfer_code,
        claimed_uid: metadata_uid(&data.metadata),
        reason,
    }))
}

// === M-Pesa ===

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MpesaEnvelope {
    result: Option<MpesaResult>,
    body: Option<Value>,
}

#[derive(Deserialize)]
struct MpesaResult {
    #[serde(rename = "ResultCode")]
    result_code: Value,
    #[serde(rename = "ResultDesc", default)]
    result_desc: Option<String>,
    #[serde(rename = "ConversationID")]
    conversation_id: String,
    #[serde(rename = "TransactionID", default)]
    transaction_id: Option<String>,
    #[serde(rename = "ReferenceData", default)]
    reference_data: Option<MpesaReferenceData>,
}

#[derive(Deserialize)]
struct MpesaReferenceData {
    /// A single item or a list, depending on the callback
    #[serde(rename = "ReferenceItem", default)]
    reference_item: Value,
}

/// Key the B2C request uses to carry our reference.
pub const MPESA_REFERENCE_KEY: &str = "Occasion";

impl MpesaResult {
    fn succeeded(&self) -> bool {
        match &self.result_code {
            Value::Number(n) => n.as_i64() == Some(0),
            Value::String(s) => s.trim() == "0",
            _ => false,
        }
    }

    /// Our reference as echoed in `ReferenceData`, if present.
    fn echoed_reference(&self) -> Option<Reference> {
        let items = match &self.reference_data.as_ref()?.reference_item {
            Value::Array(items) => items.iter().collect::<Vec<_>>(),
            item @ Value::Object(_) => vec![item],
            _ => return None,
        };
        items.into_iter().find_map(|item| {
            if item.get("Key")?.as_str()? != MPESA_REFERENCE_KEY {
                return None;
            }
            match item.get("Value")?.as_str()?.trim() {
                "" => None,
                v => Some(Reference::from(v)),
            }
        })
    }

    fn details(self, callback_reference: Option<Reference>) -> EventDetails {
        let reference = callback_reference.or_else(|| self.echoed_reference());
        let correlation = match reference {
            Some(reference) => Correlation::TransferCodeOrReference {
                transfer_code: self.conversation_id.clone(),
                reference,
            },
            None => Correlation::TransferCode(self.conversation_id.clone()),
        };
        let transaction = self.transaction_id.filter(|t| !t.is_empty());
        EventDetails {
            rail: Rail::Mpesa,
            correlation,
            transfer_code: Some(self.conversation_id),
            claimed_uid: None,
            reason: self
                .result_desc
                .map(|d| match &transaction {
                    Some(t) => format!("{} ({})", d, t),
                    None => d,
                }),
        }
    }
}

fn parse_mpesa(body: &[u8]) -> Result<Option<MpesaResult>, WebhookError> {
    let envelope: MpesaEnvelope =
        serde_json::from_slice(body).map_err(|e| WebhookError::UnknownShape(e.to_string()))?;
    match (envelope.result, envelope.body) {
        (Some(result), _) => Ok(Some(result)),
        (None, Some(body)) if body.get("stkCallback").is_some() => Ok(None),
        _ => Err(WebhookError::UnknownShape(
            "neither Result nor Body.stkCallback".to_string(),
        )),
    }
}

/// B2C result callback. `Body.stkCallback` (STK push) is acknowledged and ignored.
///
/// `callback_reference` is the reference carried on the callback URL, when
/// the request set one.
pub fn parse_mpesa_result(
    body: &[u8],
    callback_reference: Option<Reference>,
) -> Result<SettlementEvent, WebhookError> {
    let Some(result) = parse_mpesa(body)? else {
        return Ok(SettlementEvent::Ignored {
            kind: "mpesa.stk_callback".to_string(),
        });
    };
    if result.succeeded() {
        let mut details = result.details(callback_reference);
        details.reason = None;
        Ok(SettlementEvent::Succeeded(details))
    } else {
        Ok(SettlementEvent::Failed(result.details(callback_reference)))
    }
}

/// B2C queue timeout callback.
pub fn parse_mpesa_timeout(
    body: &[u8],
    callback_reference: Option<Reference>,
) -> Result<SettlementEvent, WebhookError> {
    let Some(result) = parse_mpesa(body)? else {
        return Ok(SettlementEvent::Ignored {
            kind: "mpesa.stk_callback".to_string(),
        });
    };
    let mut details = result.details(callback_reference);
    if details.reason.is_none() {
        details.reason = Some("gateway queue timeout".to_string());
    }
    Ok(SettlementEvent::TimedOut(details))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bytes(v: Value) -> Vec<u8> {
        serde_json::to_vec(&v).unwrap()
    }

    #[test]
    fn test_paystack_success() {
        let body = bytes(json!({
            "event": "transfer.success",
            "data": {
                "amount": 7000,
                "reference": "ref-1",
                "transfer_code": "TRF_abc",
                "status": "success",
                "metadata": {"uid": "prov-1"}
            }
        }));
        let event = parse_paystack(&body).unwrap();
        let SettlementEvent::Succeeded(d) = event else {
            panic!("expected success");
        };
        assert_eq!(d.correlation, Correlation::Reference(Reference::from("ref-1")));
        assert_eq!(d.transfer_code.as_deref(), Some("TRF_abc"));
        assert_eq!(d.claimed_uid.as_deref(), Some("prov-1"));
        assert_eq!(d.rail, Rail::Paystack);
        assert_eq!(d.reason, None);
    }

    #[test]
    fn test_paystack_reversed_is_failure() {
        let body = bytes(json!({
            "event": "transfer.reversed",
            "data": {"reference": "ref-2", "transfer_code": "TRF_x"}
        }));
        let event = parse_paystack(&body).unwrap();
        assert!(matches!(event, SettlementEvent::Failed(ref d) if d.reason.as_deref() == Some("transfer.reversed")));
    }

    #[test]
    fn test_paystack_other_event_ignored() {
        let body = bytes(json!({"event": "charge.success", "data": {"reference": "x"}}));
        assert_eq!(
            parse_paystack(&body).unwrap(),
            SettlementEvent::Ignored {
                kind: "charge.success".to_string()
            }
        );
    }

    #[test]
    fn test_paystack_malformed() {
        assert!(matches!(
            parse_paystack(b"not json"),
            Err(WebhookError::UnknownShape(_))
        ));
        let body = bytes(json!({"event": "transfer.failed", "data": {}}));
        assert!(matches!(
            parse_paystack(&body),
            Err(WebhookError::UnknownShape(_))
        ));
    }

    #[test]
    fn test_mpesa_result() {
        let ok = bytes(json!({
            "Result": {
                "ResultType": 0,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "OriginatorConversationID": "10571-7910404-1",
                "ConversationID": "AG_20191219_00004e48cf7e3533f581",
                "TransactionID": "NLJ41HAY6Q"
            }
        }));
        let SettlementEvent::Succeeded(d) = parse_mpesa_result(&ok, None).unwrap() else {
            panic!("expected success");
        };
        assert_eq!(
            d.correlation,
            Correlation::TransferCode("AG_20191219_00004e48cf7e3533f581".to_string())
        );
        assert_eq!(d.rail, Rail::Mpesa);

        let failed = bytes(json!({
            "Result": {
                "ResultCode": 2001,
                "ResultDesc": "The initiator information is invalid.",
                "ConversationID": "AG_2"
            }
        }));
        assert!(matches!(
            parse_mpesa_result(&failed, None).unwrap(),
            SettlementEvent::Failed(_)
        ));
    }

    #[test]
    fn test_mpesa_timeout_and_stk() {
        let timeout = bytes(json!({
            "Result": {"ResultCode": 1, "ConversationID": "AG_3"}
        }));
        let SettlementEvent::TimedOut(d) = parse_mpesa_timeout(&timeout, None).unwrap() else {
            panic!("expected timeout");
        };
        assert_eq!(d.reason.as_deref(), Some("gateway queue timeout"));

        let stk = bytes(json!({"Body": {"stkCallback": {"ResultCode": 0}}}));
        assert!(matches!(
            parse_mpesa_result(&stk, None).unwrap(),
            SettlementEvent::Ignored { .. }
        ));
        assert!(matches!(
            parse_mpesa_result(&bytes(json!({"foo": 1})), None),
            Err(WebhookError::UnknownShape(_))
        ));
    }

    #[test]
    fn test_mpesa_reference_from_reference_data() {
        let body = bytes(json!({
            "Result": {
                "ResultCode": 0,
                "ConversationID": "AG_4",
                "ReferenceData": {
                    "ReferenceItem": [
                        {"Key": "QueueTimeoutURL", "Value": "https://example.test/timeout"},
                        {"Key": "Occasion", "Value": "ref-9"}
                    ]
                }
            }
        }));
        let SettlementEvent::Succeeded(d) = parse_mpesa_result(&body, None).unwrap() else {
            panic!("expected success");
        };
        assert_eq!(
            d.correlation,
            Correlation::TransferCodeOrReference {
                transfer_code: "AG_4".to_string(),
                reference: Reference::from("ref-9"),
            }
        );
    }

    #[test]
    fn test_mpesa_callback_reference_wins() {
        let body = bytes(json!({
            "Result": {
                "ResultCode": 1,
                "ConversationID": "AG_5",
                "ReferenceData": {"ReferenceItem": {"Key": "Occasion", "Value": "ref-old"}}
            }
        }));
        let SettlementEvent::TimedOut(d) =
            parse_mpesa_timeout(&body, Some(Reference::from("ref-url"))).unwrap()
        else {
            panic!("expected timeout");
        };
        assert_eq!(
            d.correlation,
            Correlation::TransferCodeOrReference {
                transfer_code: "AG_5".to_string(),
                reference: Reference::from("ref-url"),
            }
        );
    }
}
