// service/payment_method_service.rs
use std::sync::Arc;

use uuid::Uuid;

use crate::{
    db::LedgerExt,
    models::{
        ledgermodels::{PaymentMethod, PaymentMethodType, WithdrawalMethod},
        usermodel::Actor,
    },
    service::{error::ServiceError, withdrawal_service::validate_destination},
    utils::{clock::Clock, money::last_four},
};

#[derive(Debug, Clone)]
pub struct NewPaymentMethod {
    pub method_type: PaymentMethodType,
    /// Tokenised card reference issued by the gateway. Raw card numbers never reach us.
    pub card_token: Option<String>,
    pub card_last_four: Option<String>,
    pub account_reference: Option<String>,
    pub label: Option<String>,
    pub is_default: bool,
}

#[derive(Debug, Clone)]
pub struct PaymentMethodService {
    store: Arc<dyn LedgerExt>,
    clock: Arc<dyn Clock>,
}

impl PaymentMethodService {
    pub fn new(store: Arc<dyn LedgerExt>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn add_payment_method(&self, actor: Actor, request: NewPaymentMethod) -> Result<PaymentMethod, ServiceError> {
        let user_id = actor
            .id()
            .ok_or_else(|| ServiceError::Unauthorized("a user is required".to_string()))?;

        let (card_token, account_reference, visible) = match request.method_type {
            PaymentMethodType::Card => {
                let token = request
                    .card_token
                    .filter(|t| !t.trim().is_empty())
                    .ok_or_else(|| ServiceError::Validation("Card methods need a gateway card token".to_string()))?;
                let digits = request
                    .card_last_four
                    .filter(|d| d.len() == 4 && d.chars().all(|c| c.is_ascii_digit()))
                    .ok_or_else(|| ServiceError::Validation("Card methods need the last four digits".to_string()))?;
                (Some(token), None, digits)
            }
            PaymentMethodType::BankTransfer => {
                let reference = request
                    .account_reference
                    .map(|r| r.trim().to_string())
                    .ok_or_else(|| ServiceError::Validation("Bank methods need a CBU/CVU or alias".to_string()))?;
                validate_destination(WithdrawalMethod::BankTransfer, &reference)?;
                let visible = last_four(&reference);
                (None, Some(reference), visible)
            }
        };

        let method = PaymentMethod {
            id: Uuid::new_v4(),
            user_id,
            method_type: request.method_type,
            card_token,
            account_reference,
            last_four: visible,
            label: request.label,
            is_default: request.is_default,
            created_at: self.clock.now(),
        };

        let created = self.store.add_payment_method(&method).await?;
        tracing::info!(
            payment_method_id = %created.id,
            user_id = %user_id,
            is_default = created.is_default,
            "Payment method added"
        );
        Ok(created)
    }

    pub async fn list_payment_methods(&self, actor: Actor) -> Result<Vec<PaymentMethod>, ServiceError> {
        let user_id = actor
            .id()
            .ok_or_else(|| ServiceError::Unauthorized("a user is required".to_string()))?;
        Ok(self.store.list_payment_methods(user_id).await?)
    }

    pub async fn set_default_payment_method(&self, actor: Actor, method_id: Uuid) -> Result<PaymentMethod, ServiceError> {
        let user_id = actor
            .id()
            .ok_or_else(|| ServiceError::Unauthorized("a user is required".to_string()))?;

        self.store
            .set_default_payment_method(user_id, method_id)
            .await?
            .ok_or(ServiceError::PaymentMethodNotFound(method_id))
    }
}
