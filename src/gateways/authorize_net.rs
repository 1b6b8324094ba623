//! Authorize.Net gateway: XML `createTransactionRequest` envelopes over HTTPS.

use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::Error as FailsafeError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::events::{EventAction, EventParseError, WebhookEvent};
use super::{
    http_client, new_breaker, Breaker, CardDetails, DepositParams, GatewayError, GatewayFailure,
    GatewayResult, PaymentGateway, WithdrawParams,
};
use crate::domain::amount::format_major;
use crate::domain::{from_minor_units, to_minor_units, Provider, Transaction, TransactionStatus};
use crate::utils::sanitize::FULL_MASK;

pub const SANDBOX_ENDPOINT: &str = "https://apitest.authorize.net/xml/v1/request.api";
const XMLNS: &str = "AnetApi/xml/v1/schema/AnetApiSchema.xsd";
const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;

#[derive(Debug, Clone, Serialize)]
#[serde(rename = "createTransactionRequest", rename_all = "camelCase")]
struct CreateTransactionRequest {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    merchant_authentication: MerchantAuthentication,
    #[serde(skip_serializing_if = "Option::is_none")]
    ref_id: Option<String>,
    transaction_request: TransactionRequest,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct MerchantAuthentication {
    name: String,
    transaction_key: String,
}

/// Element order follows the gateway's XSD.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionRequest {
    transaction_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payment: Option<Payment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ref_trans_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    order: Option<Order>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Order {
    invoice_number: String,
}

/// Longest `refId` / `invoiceNumber` the gateway accepts.
const REFERENCE_MAX_LEN: usize = 20;

/// Per-transaction reference the gateway's duplicate check keys on.
fn transaction_reference(transaction_id: &str) -> String {
    transaction_id.chars().take(REFERENCE_MAX_LEN).collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Payment {
    credit_card: CreditCard,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreditCard {
    card_number: String,
    expiration_date: String,
    card_code: String,
}

impl From<&CardDetails> for CreditCard {
    fn from(card: &CardDetails) -> Self {
        Self {
            card_number: card.number.chars().filter(|c| !c.is_whitespace()).collect(),
            expiration_date: card.expiration_date.trim().to_string(),
            card_code: card.cvv.trim().to_string(),
        }
    }
}

impl CreateTransactionRequest {
    /// Copy safe to persist: card fields and the transaction key are replaced.
    fn masked(&self) -> Self {
        let mut masked = self.clone();
        masked.merchant_authentication.transaction_key = FULL_MASK.to_string();
        if let Some(payment) = masked.transaction_request.payment.as_mut() {
            payment.credit_card.card_number = FULL_MASK.to_string();
            payment.credit_card.expiration_date = FULL_MASK.to_string();
            payment.credit_card.card_code = FULL_MASK.to_string();
        }
        masked
    }

    fn to_xml(&self) -> Result<String, GatewayError> {
        quick_xml::se::to_string(self)
            .map(|xml| format!("{}{}", XML_DECLARATION, xml))
            .map_err(|e| GatewayError::InvalidRequest(format!("failed to encode request: {}", e)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTransactionResponse {
    messages: Messages,
    #[serde(default)]
    transaction_response: Option<TransactionResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Messages {
    result_code: String,
    #[serde(default)]
    message: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    code: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionResponse {
    #[serde(default)]
    response_code: String,
    #[serde(default)]
    trans_id: String,
    #[serde(default)]
    errors: Option<TransactionErrors>,
}

#[derive(Debug, Deserialize)]
struct TransactionErrors {
    #[serde(default)]
    error: Vec<TransactionErrorItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionErrorItem {
    error_code: String,
    #[serde(default)]
    error_text: String,
}

impl TransactionResponse {
    fn error_summary(&self) -> String {
        self.errors
            .as_ref()
            .and_then(|e| e.error.first())
            .map(|e| format!("{} {}", e.error_code, e.error_text))
            .unwrap_or_else(|| format!("response code {}", self.response_code))
    }

    fn trans_id(&self) -> Option<&str> {
        Some(self.trans_id.as_str()).filter(|id| !id.is_empty() && *id != "0")
    }
}

fn parse_response(body: &str) -> Result<CreateTransactionResponse, GatewayError> {
    // Responses are prefixed with a UTF-8 byte order mark.
    let body = body.trim_start_matches('\u{feff}');
    quick_xml::de::from_str(body).map_err(|e| GatewayError::MalformedResponse(e.to_string()))
}

/// Maps an API-level error (no transaction result) to a gateway error.
fn api_error(messages: &Messages) -> GatewayError {
    let first = messages.message.first();
    let code = first.map(|m| m.code.as_str()).unwrap_or_default();
    let text = first
        .map(|m| format!("{} {}", m.code, m.text))
        .unwrap_or_else(|| "request rejected".to_string());
    match code {
        "E00053" => GatewayError::Unavailable(text),
        "E00007" | "E00008" => GatewayError::Authentication,
        _ => GatewayError::InvalidRequest(text),
    }
}

#[derive(Clone)]
pub struct AuthorizeNetGateway {
    client: Client,
    endpoint: String,
    login_id: String,
    transaction_key: String,
    circuit_breaker: Breaker,
}

impl AuthorizeNetGateway {
    pub fn new(endpoint: String, login_id: String, transaction_key: String, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            endpoint,
            login_id,
            transaction_key,
            circuit_breaker: new_breaker(5, Duration::from_secs(30)),
        }
    }

    fn envelope(
        &self,
        ref_id: Option<String>,
        transaction_request: TransactionRequest,
    ) -> CreateTransactionRequest {
        CreateTransactionRequest {
            xmlns: XMLNS,
            merchant_authentication: MerchantAuthentication {
                name: self.login_id.clone(),
                transaction_key: self.transaction_key.clone(),
            },
            ref_id,
            transaction_request,
        }
    }

    async fn post_xml(&self, xml: String) -> Result<String, GatewayError> {
        let request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(xml);

        let result = self
            .circuit_breaker
            .call(async move {
                let response = request.send().await.map_err(GatewayError::from_transport)?;
                let status = response.status();
                let body = response.text().await.map_err(GatewayError::from_transport)?;
                if status.is_server_error() {
                    return Err(GatewayError::Unavailable(format!(
                        "authorize.net returned {}",
                        status
                    )));
                }
                if !status.is_success() {
                    tracing::warn!(status = %status, "authorize.net rejected request");
                }
                Ok(body)
            })
            .await;

        match result {
            Ok(body) => Ok(body),
            Err(FailsafeError::Rejected) => Err(GatewayError::CircuitOpen(Provider::AuthorizeNet)),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }

    async fn submit(&self, request: CreateTransactionRequest, mut tx: Transaction) -> GatewayResult {
        let masked = match request.masked().to_xml() {
            Ok(xml) => xml,
            Err(e) => return Err(GatewayFailure::new(tx, e)),
        };
        tx.request_payload = Some(masked);

        let xml = match request.to_xml() {
            Ok(xml) => xml,
            Err(e) => return Err(GatewayFailure::new(tx, e)),
        };
        let body = match self.post_xml(xml).await {
            Ok(body) => body,
            Err(e) => return Err(GatewayFailure::new(tx, e)),
        };
        tx.response_payload = Some(body.clone());

        let response = match parse_response(&body) {
            Ok(response) => response,
            Err(e) => return Err(GatewayFailure::new(tx, e)),
        };

        match response.transaction_response {
            Some(result) if !result.response_code.is_empty() => {
                if let Some(trans_id) = result.trans_id() {
                    tx.assign_payment_id(trans_id);
                }
                match result.response_code.as_str() {
                    "1" => {
                        tx.apply_status(TransactionStatus::Succeeded);
                    }
                    // Held for review; settles through a webhook.
                    "4" => {}
                    _ => {
                        tracing::info!(
                            transaction_id = %tx.transaction_id,
                            reason = %result.error_summary(),
                            "authorize.net did not approve transaction"
                        );
                        tx.apply_status(TransactionStatus::Failed);
                    }
                }
                Ok(tx)
            }
            _ if response.messages.result_code.eq_ignore_ascii_case("error") => {
                let error = api_error(&response.messages);
                Err(GatewayFailure::new(tx, error))
            }
            _ => Err(GatewayFailure::new(
                tx,
                GatewayError::MalformedResponse("no transaction response returned".to_string()),
            )),
        }
    }

    fn card_payment(card: Option<&CardDetails>) -> Result<Payment, GatewayError> {
        card.map(|card| Payment {
            credit_card: CreditCard::from(card),
        })
        .ok_or_else(|| GatewayError::InvalidRequest("card details are required".to_string()))
    }
}

#[async_trait]
impl PaymentGateway for AuthorizeNetGateway {
    fn provider(&self) -> Provider {
        Provider::AuthorizeNet
    }

    async fn charge(&self, params: &DepositParams, tx: Transaction) -> GatewayResult {
        let payment = match Self::card_payment(params.card.as_ref()) {
            Ok(payment) => payment,
            Err(e) => return Err(GatewayFailure::new(tx, e)),
        };
        if let Err(e) = to_minor_units(&params.amount, &params.currency) {
            return Err(GatewayFailure::new(tx, GatewayError::InvalidRequest(e.to_string())));
        }

        let reference = transaction_reference(&tx.transaction_id);
        let request = self.envelope(
            Some(reference.clone()),
            TransactionRequest {
                transaction_type: "authCaptureTransaction",
                amount: Some(format_major(&params.amount, &params.currency)),
                payment: Some(payment),
                ref_trans_id: None,
                order: Some(Order {
                    invoice_number: reference,
                }),
            },
        );
        self.submit(request, tx).await
    }

    async fn payout(&self, params: &WithdrawParams, tx: Transaction) -> GatewayResult {
        let payment = match Self::card_payment(params.card.as_ref()) {
            Ok(payment) => payment,
            Err(e) => return Err(GatewayFailure::new(tx, e)),
        };
        let amount = from_minor_units(params.amount, &params.currency);

        let reference = transaction_reference(&tx.transaction_id);
        let request = self.envelope(
            Some(reference.clone()),
            TransactionRequest {
                transaction_type: "refundTransaction",
                amount: Some(format_major(&amount, &params.currency)),
                payment: Some(payment),
                ref_trans_id: None,
                order: Some(Order {
                    invoice_number: reference,
                }),
            },
        );
        self.submit(request, tx).await
    }

    /// Voids the original capture.
    async fn refund(&self, tx: &Transaction) -> Result<String, GatewayError> {
        let trans_id = tx.payment_id.clone().ok_or_else(|| {
            GatewayError::InvalidRequest(format!(
                "transaction {} has no gateway id to void",
                tx.transaction_id
            ))
        })?;

        let request = self.envelope(
            Some(transaction_reference(&tx.transaction_id)),
            TransactionRequest {
                transaction_type: "voidTransaction",
                amount: None,
                payment: None,
                ref_trans_id: Some(trans_id.clone()),
                order: None,
            },
        );
        let body = self.post_xml(request.to_xml()?).await?;
        let response = parse_response(&body)?;

        match response.transaction_response {
            Some(result) if result.response_code == "1" => {
                Ok(result.trans_id().unwrap_or(&trans_id).to_string())
            }
            Some(result) if !result.response_code.is_empty() => {
                Err(GatewayError::InvalidRequest(result.error_summary()))
            }
            _ => Err(api_error(&response.messages)),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeNetEvent {
    #[serde(alias = "eventId")]
    notification_id: String,
    event_type: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Parses an Authorize.Net webhook notification.
pub fn parse_event(body: &[u8]) -> Result<WebhookEvent, EventParseError> {
    let raw = std::str::from_utf8(body)
        .map_err(|_| EventParseError::Malformed("body is not UTF-8".to_string()))?;
    let event: AuthorizeNetEvent =
        serde_json::from_str(raw).map_err(|e| EventParseError::Malformed(e.to_string()))?;

    let trans_id = || {
        let id = match event.payload.get("id") {
            Some(serde_json::Value::String(id)) if !id.is_empty() => Some(id.clone()),
            Some(serde_json::Value::Number(id)) => Some(id.to_string()),
            _ => None,
        };
        id.ok_or(EventParseError::MissingField("payload.id"))
    };

    let action = match event.event_type.as_str() {
        "net.authorize.payment.authcapture.created" => EventAction::PaymentSucceeded {
            payment_id: trans_id()?,
            charge_id: None,
        },
        "net.authorize.payment.fraud.declined" => EventAction::PaymentFailed {
            payment_id: trans_id()?,
        },
        // Withdrawals are refund transactions on this gateway.
        "net.authorize.payment.refund.created" => EventAction::PayoutPaid {
            payment_id: trans_id()?,
        },
        _ => EventAction::Ignored,
    };

    Ok(WebhookEvent {
        provider: Provider::AuthorizeNet,
        event_id: event.notification_id,
        event_type: event.event_type,
        action,
        raw: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransactionType;
    use bigdecimal::BigDecimal;
    use mockito::Matcher;
    use std::str::FromStr;

    const APPROVED: &str = "\u{feff}<?xml version=\"1.0\" encoding=\"utf-8\"?><createTransactionResponse xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" xmlns=\"AnetApi/xml/v1/schema/AnetApiSchema.xsd\"><messages><resultCode>Ok</resultCode><message><code>I00001</code><text>Successful.</text></message></messages><transactionResponse><responseCode>1</responseCode><authCode>ABC123</authCode><transId>60012345678</transId><messages><message><code>1</code><description>This transaction has been approved.</description></message></messages></transactionResponse></createTransactionResponse>";

    const DECLINED: &str = "<createTransactionResponse><messages><resultCode>Error</resultCode><message><code>E00027</code><text>The transaction was unsuccessful.</text></message></messages><transactionResponse><responseCode>2</responseCode><transId>60012345679</transId><errors><error><errorCode>2</errorCode><errorText>This transaction has been declined.</errorText></error></errors></transactionResponse></createTransactionResponse>";

    fn card() -> CardDetails {
        CardDetails {
            number: "4111111111111111".into(),
            expiration_date: "2030-12".into(),
            cvv: "987".into(),
        }
    }

    fn pending() -> Transaction {
        Transaction::pending(
            "tx-an-1",
            TransactionType::Deposit,
            Provider::AuthorizeNet,
            BigDecimal::from_str("25.5").unwrap(),
            "USD",
        )
    }

    fn deposit() -> DepositParams {
        DepositParams {
            amount: BigDecimal::from_str("25.5").unwrap(),
            currency: "USD".into(),
            token: None,
            card: Some(card()),
        }
    }

    fn gateway(url: String) -> AuthorizeNetGateway {
        AuthorizeNetGateway::new(url, "login".into(), "secret-key".into(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_charge_approved() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("content-type", "text/xml")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex("<transactionType>authCaptureTransaction</transactionType>".into()),
                Matcher::Regex("<amount>25.50</amount>".into()),
                Matcher::Regex("<cardNumber>4111111111111111</cardNumber>".into()),
                Matcher::Regex(r#"xmlns="AnetApi/xml/v1/schema/AnetApiSchema.xsd""#.into()),
            ]))
            .with_status(200)
            .with_body(APPROVED)
            .create_async()
            .await;

        let tx = gateway(server.url()).charge(&deposit(), pending()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(tx.status, TransactionStatus::Succeeded);
        assert_eq!(tx.payment_id.as_deref(), Some("60012345678"));
    }

    #[tokio::test]
    async fn test_stored_request_is_masked() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(APPROVED)
            .create_async()
            .await;

        let tx = gateway(server.url()).charge(&deposit(), pending()).await.unwrap();
        let stored = tx.request_payload.unwrap();

        assert!(!stored.contains("4111111111111111"));
        assert!(!stored.contains("987"));
        assert!(!stored.contains("2030-12"));
        assert!(!stored.contains("secret-key"));
        assert!(stored.contains("<cardNumber>****</cardNumber>"));
    }

    #[tokio::test]
    async fn test_declined_response_marks_failed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(DECLINED)
            .create_async()
            .await;

        let tx = gateway(server.url()).charge(&deposit(), pending()).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Failed);
        assert_eq!(tx.payment_id.as_deref(), Some("60012345679"));
    }

    #[tokio::test]
    async fn test_busy_server_is_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body("<createTransactionResponse><messages><resultCode>Error</resultCode><message><code>E00053</code><text>Server too busy</text></message></messages></createTransactionResponse>")
            .create_async()
            .await;

        let failure = gateway(server.url()).charge(&deposit(), pending()).await.unwrap_err();
        assert!(failure.error.is_transient());
        assert_eq!(failure.transaction.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn test_garbage_response_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body("<html>oops")
            .create_async()
            .await;

        let failure = gateway(server.url()).charge(&deposit(), pending()).await.unwrap_err();
        assert!(matches!(failure.error, GatewayError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_payout_sends_refund_transaction() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex("<transactionType>refundTransaction</transactionType>".into()),
                Matcher::Regex("<amount>12.34</amount>".into()),
            ]))
            .with_status(200)
            .with_body(APPROVED)
            .create_async()
            .await;

        let params = WithdrawParams {
            amount: 1234,
            currency: "USD".into(),
            destination: None,
            card: Some(card()),
        };
        let tx = gateway(server.url()).payout(&params, pending()).await.unwrap();
        mock.assert_async().await;
        assert_eq!(tx.status, TransactionStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_charge_carries_invoice_number_from_transaction_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex("<refId>order-2024-0001-abcd</refId>".into()),
                Matcher::Regex(
                    "</payment><order><invoiceNumber>order-2024-0001-abcd</invoiceNumber></order>"
                        .into(),
                ),
            ]))
            .with_status(200)
            .with_body(APPROVED)
            .create_async()
            .await;

        let tx = Transaction::pending(
            "order-2024-0001-abcdefghijk",
            TransactionType::Deposit,
            Provider::AuthorizeNet,
            BigDecimal::from_str("25.5").unwrap(),
            "USD",
        );
        gateway(server.url()).charge(&deposit(), tx).await.unwrap();
        mock.assert_async().await;
    }

    #[test]
    fn test_transaction_reference_is_truncated() {
        assert_eq!(transaction_reference("tx-1"), "tx-1");
        assert_eq!(transaction_reference(&"é".repeat(30)).chars().count(), 20);
    }

    #[tokio::test]
    async fn test_missing_card_is_invalid_request() {
        let params = DepositParams {
            card: None,
            ..deposit()
        };
        let failure = gateway("http://127.0.0.1:9".into())
            .charge(&params, pending())
            .await
            .unwrap_err();
        assert!(matches!(failure.error, GatewayError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_refund_voids_by_trans_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex("<transactionType>voidTransaction</transactionType>".into()),
                Matcher::Regex("<refTransId>60012345678</refTransId>".into()),
            ]))
            .with_status(200)
            .with_body(APPROVED)
            .create_async()
            .await;

        let mut tx = pending();
        tx.assign_payment_id("60012345678");
        let reference = gateway(server.url()).refund(&tx).await.unwrap();

        mock.assert_async().await;
        assert_eq!(reference, "60012345678");
    }

    #[test]
    fn test_parse_authcapture_event() {
        let body = br#"{"notificationId":"n-1","eventType":"net.authorize.payment.authcapture.created","eventDate":"2024-01-01T00:00:00Z","webhookId":"w-1","payload":{"responseCode":1,"entityName":"transaction","id":"60012345678"}}"#;
        let event = parse_event(body).unwrap();
        assert_eq!(event.event_id, "n-1");
        assert_eq!(
            event.action,
            EventAction::PaymentSucceeded {
                payment_id: "60012345678".into(),
                charge_id: None
            }
        );
    }

    #[test]
    fn test_parse_refund_event_is_payout() {
        let body = br#"{"notificationId":"n-2","eventType":"net.authorize.payment.refund.created","payload":{"id":60012345679}}"#;
        assert_eq!(
            parse_event(body).unwrap().action,
            EventAction::PayoutPaid {
                payment_id: "60012345679".into()
            }
        );
    }

    #[test]
    fn test_parse_unknown_event_is_ignored() {
        let body = br#"{"notificationId":"n-3","eventType":"net.authorize.customer.created","payload":{"id":"1"}}"#;
        assert_eq!(parse_event(body).unwrap().action, EventAction::Ignored);
    }
}
