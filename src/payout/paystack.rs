//! Paystack transfer rail
//!
//! Amounts go over the wire in minor units. A 4xx answer is a rejection; a
//! 5xx or unreadable answer leaves the transfer's fate unknown.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    PayoutError, PayoutGateway, PayoutReceipt, PayoutRequest, RecipientRegistration,
    TransferLookup,
};
use crate::config::PaystackConfig;
use crate::core_types::{PayoutMethod, Rail, Reference};
use crate::wallet::PayoutRecipient;

pub struct PaystackGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
    currency: String,
    mobile_bank_code: String,
}

#[derive(Serialize)]
struct TransferBody<'a> {
    source: &'static str,
    amount: i64,
    recipient: &'a str,
    reference: &'a str,
    reason: &'a str,
    currency: &'a str,
    metadata: TransferMetadata<'a>,
}

#[derive(Serialize)]
struct TransferMetadata<'a> {
    uid: &'a str,
    amount: i64,
    fee: i64,
}

#[derive(Serialize)]
struct RecipientBody<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    name: &'a str,
    account_number: &'a str,
    bank_code: &'a str,
    currency: &'a str,
}

#[derive(Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Deserialize)]
struct TransferData {
    transfer_code: Option<String>,
    status: Option<String>,
}

#[derive(Deserialize)]
struct RecipientData {
    recipient_code: String,
}

impl PaystackGateway {
    pub fn new(
        config: &PaystackConfig,
        currency: &str,
        timeout: Duration,
    ) -> Result<Self, PayoutError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
            currency: currency.to_string(),
            mobile_bank_code: config.mobile_bank_code.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<Envelope<T>, PayoutError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_server_error() {
            return Err(PayoutError::Unexpected(format!("HTTP {}: {}", status, text)));
        }
        if !status.is_success() {
            let message = serde_json::from_str::<Envelope<serde_json::Value>>(&text)
                .map(|e| e.message)
                .unwrap_or(text);
            return Err(PayoutError::Rejected {
                status: Some(status.as_u16()),
                message,
            });
        }

        let envelope: Envelope<T> = serde_json::from_str(&text)
            .map_err(|e| PayoutError::Unexpected(format!("{}: {}", e, text)))?;
        if !envelope.status {
            return Err(PayoutError::Rejected {
                status: Some(status.as_u16()),
                message: envelope.message,
            });
        }
        Ok(envelope)
    }
}

fn lookup_from_status(status: &str, transfer_code: Option<String>) -> TransferLookup {
    match status {
        "success" => TransferLookup::Succeeded { transfer_code },
        "failed" | "reversed" | "abandoned" | "rejected" => TransferLookup::Failed {
            reason: format!("transfer {}", status),
        },
        "pending" | "otp" | "queued" | "processing" | "received" => {
            TransferLookup::Pending { transfer_code }
        }
        _ => TransferLookup::Unknown,
    }
}

#[async_trait]
impl PayoutGateway for PaystackGateway {
    fn rail(&self) -> Rail {
        Rail::Paystack
    }

    fn recipient_ready(&self, recipient: &PayoutRecipient) -> bool {
        recipient.rail == Rail::Paystack
            && recipient
                .recipient_code
                .as_deref()
                .is_some_and(|c| !c.is_empty())
    }

    async fn initiate(&self, request: &PayoutRequest) -> Result<PayoutReceipt, PayoutError> {
        let recipient = request
            .recipient
            .recipient_code
            .as_deref()
            .ok_or_else(|| PayoutError::Rejected {
                status: None,
                message: "recipient is not registered with Paystack".to_string(),
            })?;
        let amount = request
            .amount
            .to_minor_units()
            .map_err(|e| PayoutError::Rejected {
                status: None,
                message: e.to_string(),
            })?;

        let body = TransferBody {
            source: "balance",
            amount,
            recipient,
            reference: request.reference.as_str(),
            reason: &request.reason,
            currency: &self.currency,
            metadata: TransferMetadata {
                uid: &request.uid,
                amount: request.requested.units(),
                fee: request.fee.units(),
            },
        };

        debug!(reference = %request.reference, amount_minor = amount, "POST /transfer");
        let response = self
            .client
            .post(self.url("/transfer"))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await?;

        let envelope: Envelope<TransferData> = Self::read_envelope(response).await?;
        let data = envelope
            .data
            .ok_or_else(|| PayoutError::Unexpected("transfer response has no data".to_string()))?;
        let transfer_code = data.transfer_code.ok_or_else(|| {
            PayoutError::Unexpected("transfer response has no transfer_code".to_string())
        })?;

        Ok(PayoutReceipt {
            transfer_code,
            gateway_status: data.status.unwrap_or_else(|| "pending".to_string()),
        })
    }

    async fn lookup(&self, reference: &Reference) -> Result<TransferLookup, PayoutError> {
        let response = self
            .client
            .get(self.url(&format!("/transfer/verify/{}", reference)))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(TransferLookup::NotFound);
        }

        let envelope: Envelope<TransferData> = match Self::read_envelope(response).await {
            Ok(envelope) => envelope,
            Err(PayoutError::Rejected { message, .. })
                if message.to_ascii_lowercase().contains("not found") =>
            {
                return Ok(TransferLookup::NotFound);
            }
            Err(e) => return Err(e),
        };

        let Some(data) = envelope.data else {
            warn!(reference = %reference, "Verify response has no data");
            return Ok(TransferLookup::Unknown);
        };
        let status = data.status.unwrap_or_default().to_ascii_lowercase();
        Ok(lookup_from_status(&status, data.transfer_code))
    }

    async fn register_recipient(
        &self,
        registration: &RecipientRegistration,
    ) -> Result<PayoutRecipient, PayoutError> {
        let (kind, bank_code) = match registration.method {
            PayoutMethod::Mobile => (
                "mobile_money",
                registration
                    .bank_code
                    .clone()
                    .unwrap_or_else(|| self.mobile_bank_code.clone()),
            ),
            PayoutMethod::Bank => {
                let code = registration.bank_code.clone().ok_or_else(|| PayoutError::Rejected {
                    status: None,
                    message: "bank_code is required for bank recipients".to_string(),
                })?;
                let kind = if self.currency == "KES" { "kepss" } else { "nuban" };
                (kind, code)
            }
        };

        let body = RecipientBody {
            kind,
            name: &registration.name,
            account_number: &registration.account_number,
            bank_code: &bank_code,
            currency: &self.currency,
        };

        let response = self
            .client
            .post(self.url("/transferrecipient"))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await?;
        let envelope: Envelope<RecipientData> = Self::read_envelope(response).await?;
        let data = envelope.data.ok_or_else(|| {
            PayoutError::Unexpected("recipient response has no data".to_string())
        })?;

        Ok(PayoutRecipient {
            method: registration.method,
            rail: Rail::Paystack,
            name: registration.name.clone(),
            account_number: registration.account_number.clone(),
            bank_code: Some(bank_code),
            recipient_code: Some(data.recipient_code),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Amount;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer, timeout: Duration) -> PaystackGateway {
        let config = PaystackConfig {
            base_url: server.uri(),
            secret_key: "sk_test_abc".to_string(),
            mobile_bank_code: "MPESA".to_string(),
        };
        PaystackGateway::new(&config, "KES", timeout).unwrap()
    }

    fn request() -> PayoutRequest {
        PayoutRequest {
            reference: Reference::from("ref0001"),
            uid: "prov-1".to_string(),
            amount: Amount::new(70),
            requested: Amount::new(50),
            fee: Amount::new(20),
            recipient: PayoutRecipient {
                method: PayoutMethod::Mobile,
                rail: Rail::Paystack,
                name: "Jane".to_string(),
                account_number: "0712345678".to_string(),
                bank_code: Some("MPESA".to_string()),
                recipient_code: Some("RCP_abc".to_string()),
            },
            reason: "Provider withdrawal".to_string(),
        }
    }

    #[tokio::test]
    async fn test_initiate_sends_minor_units() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transfer"))
            .and(header("authorization", "Bearer sk_test_abc"))
            .and(body_partial_json(json!({
                "source": "balance",
                "amount": 7000,
                "recipient": "RCP_abc",
                "reference": "ref0001",
                "metadata": { "uid": "prov-1", "amount": 50, "fee": 20 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": true,
                "message": "Transfer has been queued",
                "data": { "transfer_code": "TRF_1ptvuv321ahaa7q", "status": "pending" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = gateway(&server, Duration::from_secs(2))
            .initiate(&request())
            .await
            .unwrap();
        assert_eq!(receipt.transfer_code, "TRF_1ptvuv321ahaa7q");
        assert_eq!(receipt.gateway_status, "pending");
    }

    #[tokio::test]
    async fn test_client_error_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transfer"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "status": false,
                "message": "Your balance is not enough to fulfil this request"
            })))
            .mount(&server)
            .await;

        let err = gateway(&server, Duration::from_secs(2))
            .initiate(&request())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PayoutError::Rejected {
                status: Some(400),
                message: "Your balance is not enough to fulfil this request".to_string()
            }
        );
        assert!(err.is_definitive());
    }

    #[tokio::test]
    async fn test_server_error_is_not_definitive() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transfer"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = gateway(&server, Duration::from_secs(2))
            .initiate(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, PayoutError::Unexpected(_)));
        assert!(!err.is_definitive());
    }

    #[tokio::test]
    async fn test_slow_gateway_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transfer"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(500))
                    .set_body_json(json!({ "status": true, "data": { "transfer_code": "TRF_x" } })),
            )
            .mount(&server)
            .await;

        let err = gateway(&server, Duration::from_millis(100))
            .initiate(&request())
            .await
            .unwrap_err();
        assert_eq!(err, PayoutError::Timeout);
    }

    #[tokio::test]
    async fn test_lookup_maps_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/transfer/verify/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "status": false, "message": "Transfer not found"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/transfer/verify/done"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": true,
                "message": "Transfer retrieved",
                "data": { "transfer_code": "TRF_done", "status": "success" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/transfer/verify/back"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": true,
                "data": { "transfer_code": "TRF_back", "status": "reversed" }
            })))
            .mount(&server)
            .await;

        let gw = gateway(&server, Duration::from_secs(2));
        assert_eq!(
            gw.lookup(&Reference::from("missing")).await.unwrap(),
            TransferLookup::NotFound
        );
        assert_eq!(
            gw.lookup(&Reference::from("done")).await.unwrap(),
            TransferLookup::Succeeded {
                transfer_code: Some("TRF_done".to_string())
            }
        );
        assert!(matches!(
            gw.lookup(&Reference::from("back")).await.unwrap(),
            TransferLookup::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_register_mobile_recipient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transferrecipient"))
            .and(body_partial_json(json!({
                "type": "mobile_money",
                "account_number": "0712345678",
                "bank_code": "MPESA",
                "currency": "KES"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "status": true,
                "message": "Transfer recipient created successfully",
                "data": { "recipient_code": "RCP_m7ljkv8leesep7p" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let gw = gateway(&server, Duration::from_secs(2));
        let recipient = gw
            .register_recipient(&RecipientRegistration {
                uid: "prov-1".to_string(),
                method: PayoutMethod::Mobile,
                name: "Jane".to_string(),
                account_number: "0712345678".to_string(),
                bank_code: None,
            })
            .await
            .unwrap();
        assert_eq!(recipient.recipient_code.as_deref(), Some("RCP_m7ljkv8leesep7p"));
        assert!(gw.recipient_ready(&recipient));
    }

    #[test]
    fn test_recipient_without_code_not_ready() {
        let config = PaystackConfig::default();
        let gw = PaystackGateway::new(&config, "KES", Duration::from_secs(1)).unwrap();
        let mut recipient = request().recipient;
        recipient.recipient_code = None;
        assert!(!gw.recipient_ready(&recipient));
    }
}
