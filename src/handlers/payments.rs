use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::{from_minor_units, Provider, Transaction, TransactionStatus, TransactionType};
use crate::error::AppError;
use crate::gateways::{CardDetails, DepositParams, WithdrawParams};
use crate::services::{DepositCommand, WithdrawCommand};
use crate::validation::{
    validate_amount_precision, validate_card_number, validate_currency, validate_cvv,
    validate_expiration_date, validate_identifier, validate_positive_amount,
    validate_positive_minor_amount,
    ValidationError, TOKEN_MAX_LEN, TRANSACTION_ID_MAX_LEN, USER_ID_MAX_LEN,
};
use crate::AppState;

/// Accepts `12.5` or `"12.50"`. Number literals keep their exact digits because
/// `serde_json` is built with `arbitrary_precision`.
fn decimal_amount<'de, D>(deserializer: D) -> Result<BigDecimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let text = match &value {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.trim().to_string(),
        _ => return Err(D::Error::custom("amount must be a decimal number")),
    };
    BigDecimal::from_str(&text).map_err(|_| D::Error::custom("amount must be a decimal number"))
}

/// Deposit body. Deliberately not `Debug`: it carries card data.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositRequest {
    #[serde(deserialize_with = "decimal_amount")]
    pub amount: BigDecimal,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub transaction_id: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub credit_card_number: Option<String>,
    #[serde(default)]
    pub expiration_date: Option<String>,
    #[serde(default)]
    pub cvv: Option<String>,
}

/// Withdrawal body; `amount` is in minor units.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawRequest {
    pub amount: i64,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub transaction_id: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub credit_card_number: Option<String>,
    #[serde(default)]
    pub expiration_date: Option<String>,
    #[serde(default)]
    pub cvv: Option<String>,
}

fn parse_provider(value: &str) -> Result<Provider, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::new("provider", "payment provider is not set").into());
    }
    value
        .parse()
        .map_err(|_| AppError::UnsupportedProvider(value.to_string()))
}

fn card_details(
    number: Option<String>,
    expiration_date: Option<String>,
    cvv: Option<String>,
) -> Result<CardDetails, ValidationError> {
    let number = number.unwrap_or_default();
    let expiration_date = expiration_date.unwrap_or_default();
    let cvv = cvv.unwrap_or_default();
    validate_card_number(&number)?;
    validate_expiration_date(&expiration_date)?;
    validate_cvv(&cvv)?;
    Ok(CardDetails {
        number,
        expiration_date,
        cvv,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl DepositRequest {
    pub fn into_command(self) -> Result<DepositCommand, AppError> {
        let provider = parse_provider(&self.provider)?;
        validate_positive_amount(&self.amount)?;
        let currency = validate_currency(&self.currency)?;
        validate_amount_precision(&self.amount, &currency)?;
        let transaction_id =
            validate_identifier("transactionId", &self.transaction_id, TRANSACTION_ID_MAX_LEN)?;
        validate_identifier("userId", &self.user_id, USER_ID_MAX_LEN)?;

        let (token, card) = match provider {
            Provider::Stripe => {
                let token = self.token.unwrap_or_default();
                (Some(validate_identifier("token", &token, TOKEN_MAX_LEN)?), None)
            }
            Provider::AuthorizeNet => (
                None,
                Some(card_details(
                    self.credit_card_number,
                    self.expiration_date,
                    self.cvv,
                )?),
            ),
        };

        Ok(DepositCommand {
            transaction_id,
            provider,
            params: DepositParams {
                amount: self.amount,
                currency,
                token,
                card,
            },
        })
    }
}

impl WithdrawRequest {
    pub fn into_command(self) -> Result<WithdrawCommand, AppError> {
        let provider = parse_provider(&self.provider)?;
        validate_positive_minor_amount(self.amount)?;
        let currency = validate_currency(&self.currency)?;
        validate_positive_amount(&from_minor_units(self.amount, &currency))?;
        let transaction_id =
            validate_identifier("transactionId", &self.transaction_id, TRANSACTION_ID_MAX_LEN)?;
        validate_identifier("userId", &self.user_id, USER_ID_MAX_LEN)?;

        let (destination, card) = match provider {
            Provider::Stripe => {
                let destination = non_empty(self.destination)
                    .ok_or_else(|| ValidationError::new("destination", "must not be empty"))?;
                (Some(destination), None)
            }
            Provider::AuthorizeNet => (
                non_empty(self.destination),
                Some(card_details(
                    self.credit_card_number,
                    self.expiration_date,
                    self.cvv,
                )?),
            ),
        };

        Ok(WithdrawCommand {
            transaction_id,
            provider,
            params: WithdrawParams {
                amount: self.amount,
                currency,
                destination,
                card,
            },
        })
    }
}

/// Transaction as returned to API callers. Audit payloads stay internal.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionView {
    pub id: Uuid,
    pub transaction_id: String,
    pub transaction_type: TransactionType,
    pub gateway_name: Provider,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: TransactionStatus,
    pub payment_id: Option<String>,
    pub charge_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Transaction> for TransactionView {
    fn from(tx: Transaction) -> Self {
        Self {
            id: tx.id,
            transaction_id: tx.transaction_id,
            transaction_type: tx.transaction_type,
            gateway_name: tx.gateway_name,
            amount: tx.amount,
            currency: tx.currency,
            status: tx.status,
            payment_id: tx.payment_id,
            charge_id: tx.charge_id,
            created_at: tx.created_at,
            updated_at: tx.updated_at,
        }
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::Validation(rejection.body_text()))
}

pub async fn deposit(
    State(state): State<AppState>,
    payload: Result<Json<DepositRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TransactionView>), AppError> {
    let command = body(payload)?.into_command()?;
    let tx = state.orchestrator.deposit(command).await?;
    Ok((StatusCode::OK, Json(tx.into())))
}

pub async fn withdraw(
    State(state): State<AppState>,
    payload: Result<Json<WithdrawRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TransactionView>), AppError> {
    let command = body(payload)?.into_command()?;
    let tx = state.orchestrator.withdraw(command).await?;
    Ok((StatusCode::OK, Json(tx.into())))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<TransactionView>, AppError> {
    let tx = state.orchestrator.find_transaction(&transaction_id).await?;
    Ok(Json(tx.into()))
}
