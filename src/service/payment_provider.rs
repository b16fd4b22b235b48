// service/payment_provider.rs
use std::time::Duration;

use async_trait::async_trait;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::{
    config::Config,
    models::ledgermodels::{Transaction, TransactionStatus},
};

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway request timed out")]
    Timeout,

    #[error("gateway transport error: {0}")]
    Transport(String),

    #[error("gateway rejected the request: {0}")]
    Rejected(String),

    #[error("unrecognised gateway status '{0}'")]
    UnknownStatus(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

/// Payment statuses as MercadoPago reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    Pending,
    Authorized,
    InProcess,
    InMediation,
    Approved,
    Rejected,
    Cancelled,
    Refunded,
    ChargedBack,
}

impl GatewayStatus {
    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(GatewayStatus::Pending),
            "authorized" => Ok(GatewayStatus::Authorized),
            "in_process" => Ok(GatewayStatus::InProcess),
            "in_mediation" => Ok(GatewayStatus::InMediation),
            "approved" => Ok(GatewayStatus::Approved),
            "rejected" => Ok(GatewayStatus::Rejected),
            "cancelled" => Ok(GatewayStatus::Cancelled),
            "refunded" => Ok(GatewayStatus::Refunded),
            "charged_back" => Ok(GatewayStatus::ChargedBack),
            other => Err(GatewayError::UnknownStatus(other.to_string())),
        }
    }

    /// Translation table from gateway vocabulary to ledger states. Nothing else in the
    /// crate compares gateway status strings.
    pub fn target_status(self) -> TransactionStatus {
        match self {
            GatewayStatus::Pending => TransactionStatus::Pending,
            GatewayStatus::Authorized | GatewayStatus::InProcess => TransactionStatus::Processing,
            GatewayStatus::Approved => TransactionStatus::Completed,
            GatewayStatus::Rejected => TransactionStatus::Failed,
            GatewayStatus::Cancelled => TransactionStatus::Cancelled,
            GatewayStatus::Refunded => TransactionStatus::Refunded,
            GatewayStatus::InMediation | GatewayStatus::ChargedBack => TransactionStatus::Disputed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayCharge {
    pub reference: String,
    pub checkout_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GatewayPayment {
    pub id: String,
    pub status: GatewayStatus,
    pub external_reference: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync + std::fmt::Debug {
    async fn create_charge(&self, transaction: &Transaction) -> Result<GatewayCharge, GatewayError>;

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, GatewayError>;
}

#[derive(Debug, Clone)]
pub struct MercadoPagoGateway {
    client: reqwest::Client,
    access_token: String,
    base_url: String,
    notification_url: Option<String>,
}

impl MercadoPagoGateway {
    pub fn new(config: &Config) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.gateway_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            access_token: config.mercadopago_access_token.clone(),
            base_url: config.mercadopago_base_url.trim_end_matches('/').to_string(),
            notification_url: config.mercadopago_notification_url.clone(),
        })
    }
}

fn json_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl PaymentGateway for MercadoPagoGateway {
    async fn create_charge(&self, transaction: &Transaction) -> Result<GatewayCharge, GatewayError> {
        // The preferences API only accepts a JSON number here.
        let unit_price = transaction
            .amount
            .to_f64()
            .ok_or_else(|| GatewayError::Rejected("amount is not representable".to_string()))?;

        let title = transaction
            .description
            .clone()
            .unwrap_or_else(|| format!("LaburAR payment {}", transaction.id));

        let payload = serde_json::json!({
            "items": [{
                "id": transaction.id.to_string(),
                "title": title,
                "quantity": 1,
                "currency_id": transaction.currency,
                "unit_price": unit_price,
            }],
            "external_reference": transaction.id.to_string(),
            "notification_url": self.notification_url,
            "metadata": {
                "transaction_id": transaction.id.to_string(),
                "payer_id": transaction.payer_id.to_string(),
                "payee_id": transaction.payee_id.to_string(),
            }
        });

        let response = self
            .client
            .post(format!("{}/checkout/preferences", self.base_url))
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await?;

        if !status.is_success() {
            return Err(GatewayError::Rejected(
                body["message"].as_str().unwrap_or("preference creation failed").to_string(),
            ));
        }

        let reference = json_id(&body["id"])
            .ok_or_else(|| GatewayError::Rejected("missing preference id".to_string()))?;

        Ok(GatewayCharge {
            reference,
            checkout_url: body["init_point"].as_str().map(str::to_string),
        })
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, GatewayError> {
        let response = self
            .client
            .get(format!("{}/v1/payments/{}", self.base_url, payment_id))
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await?;

        if !status.is_success() {
            return Err(GatewayError::Rejected(
                body["message"].as_str().unwrap_or("payment lookup failed").to_string(),
            ));
        }

        let raw_status = body["status"]
            .as_str()
            .ok_or_else(|| GatewayError::Rejected("missing payment status".to_string()))?;

        Ok(GatewayPayment {
            id: json_id(&body["id"]).unwrap_or_else(|| payment_id.to_string()),
            status: GatewayStatus::parse(raw_status)?,
            external_reference: json_id(&body["external_reference"]),
        })
    }
}

#[cfg(test)]
pub mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Gateway double: charges succeed unless `fail_with_timeout` is set; payments are
    /// looked up from `payments`.
    #[derive(Debug, Default)]
    pub struct StubGateway {
        pub fail_with_timeout: AtomicBool,
        pub charges_created: AtomicUsize,
        pub payments: Mutex<HashMap<String, GatewayPayment>>,
    }

    impl StubGateway {
        pub fn add_payment(&self, id: &str, status: GatewayStatus, external_reference: Option<String>) {
            self.payments.lock().unwrap().insert(
                id.to_string(),
                GatewayPayment {
                    id: id.to_string(),
                    status,
                    external_reference,
                },
            );
        }

        pub fn set_timeout(&self, timeout: bool) {
            self.fail_with_timeout.store(timeout, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl PaymentGateway for StubGateway {
        async fn create_charge(&self, transaction: &Transaction) -> Result<GatewayCharge, GatewayError> {
            if self.fail_with_timeout.load(Ordering::SeqCst) {
                return Err(GatewayError::Timeout);
            }
            self.charges_created.fetch_add(1, Ordering::SeqCst);
            Ok(GatewayCharge {
                reference: format!("pref-{}", transaction.id),
                checkout_url: Some(format!("https://checkout.test/{}", transaction.id)),
            })
        }

        async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, GatewayError> {
            if self.fail_with_timeout.load(Ordering::SeqCst) {
                return Err(GatewayError::Timeout);
            }
            self.payments
                .lock()
                .unwrap()
                .get(payment_id)
                .cloned()
                .ok_or_else(|| GatewayError::Rejected(format!("payment {} not found", payment_id)))
        }
    }
}
