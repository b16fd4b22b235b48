// service/withdrawal_service.rs
use std::sync::Arc;

use bigdecimal::BigDecimal;
use uuid::Uuid;

use crate::{
    config::LedgerPolicy,
    db::LedgerExt,
    models::{
        ledgermodels::*,
        usermodel::{Actor, UserRole},
    },
    service::{audit_service::AuditService, error::ServiceError},
    utils::{clock::Clock, money::{is_minor_unit, split_fee}},
};

#[derive(Debug, Clone)]
pub struct NewWithdrawal {
    pub amount: BigDecimal,
    pub method: WithdrawalMethod,
    pub destination: String,
    pub account_holder: Option<String>,
    pub bank_name: Option<String>,
}

/// Bank transfers accept a 22-digit CBU/CVU or a 6-20 character alias; MercadoPago
/// payouts go to the account e-mail.
pub fn validate_destination(method: WithdrawalMethod, destination: &str) -> Result<(), ServiceError> {
    let destination = destination.trim();
    let (pattern, message) = match method {
        WithdrawalMethod::BankTransfer => (
            r"^(\d{22}|[A-Za-z0-9.\-]{6,20})$",
            "Bank transfers need a 22-digit CBU/CVU or a 6-20 character alias",
        ),
        WithdrawalMethod::Mercadopago => (
            r"^[^@\s]+@[^@\s]+\.[^@\s]+$",
            "MercadoPago withdrawals need the account e-mail",
        ),
    };

    let regex = regex::Regex::new(pattern)
        .map_err(|e| ServiceError::Other(format!("invalid destination pattern: {}", e)))?;

    // An all-digit alias would be a mistyped CBU.
    let mistyped_cbu = method == WithdrawalMethod::BankTransfer
        && destination.len() != 22
        && destination.chars().all(|c| c.is_ascii_digit());

    if !regex.is_match(destination) || mistyped_cbu {
        return Err(ServiceError::Validation(message.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct WithdrawalService {
    store: Arc<dyn LedgerExt>,
    clock: Arc<dyn Clock>,
    audit: AuditService,
    policy: LedgerPolicy,
}

impl WithdrawalService {
    pub fn new(store: Arc<dyn LedgerExt>, clock: Arc<dyn Clock>, policy: LedgerPolicy) -> Self {
        Self {
            audit: AuditService::new(store.clone(), clock.clone()),
            store,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &LedgerPolicy {
        &self.policy
    }

    pub async fn create_withdrawal(&self, actor: Actor, request: NewWithdrawal) -> Result<Withdrawal, ServiceError> {
        let user_id = match actor {
            Actor::User {
                id,
                role: UserRole::Freelancer,
            } => id,
            _ => return Err(ServiceError::Forbidden("Only freelancers can withdraw funds".to_string())),
        };

        if request.amount < self.policy.withdrawal_min || request.amount > self.policy.withdrawal_max {
            return Err(ServiceError::Validation(format!(
                "Withdrawal amount must be between {} and {}",
                self.policy.withdrawal_min, self.policy.withdrawal_max
            )));
        }
        if !is_minor_unit(&request.amount) {
            return Err(ServiceError::Validation("Amount supports at most 2 decimal places".to_string()));
        }

        validate_destination(request.method, &request.destination)?;

        let (processing_fee, final_amount) = split_fee(&request.amount, &self.policy.withdrawal_fee_rate);
        let withdrawal = Withdrawal {
            id: Uuid::new_v4(),
            user_id,
            requested_amount: request.amount,
            processing_fee,
            final_amount,
            withdrawal_method: request.method,
            destination: request.destination.trim().to_string(),
            account_holder: request.account_holder,
            bank_name: request.bank_name,
            status: WithdrawalStatus::Pending,
            failure_reason: None,
            processed_by: None,
            requested_at: self.clock.now(),
            processed_at: None,
        };

        let created = match self.store.create_withdrawal(&withdrawal).await {
            Ok(created) => created,
            Err(e) => {
                if let ServiceError::InsufficientBalance { requested, available } = &e {
                    tracing::warn!(
                        user_id = %user_id,
                        requested = %requested,
                        available = %available,
                        "Withdrawal rejected for insufficient balance"
                    );
                }
                return Err(e);
            }
        };

        tracing::info!(
            withdrawal_id = %created.id,
            user_id = %user_id,
            amount = %created.requested_amount,
            "Withdrawal requested"
        );
        self.audit.log_withdrawal_event(actor, "withdrawal_requested", &created).await;

        Ok(created)
    }

    pub async fn process_withdrawal(
        &self,
        withdrawal_id: Uuid,
        target: WithdrawalStatus,
        failure_reason: Option<String>,
        actor: Actor,
    ) -> Result<Withdrawal, ServiceError> {
        if !actor.is_privileged() {
            return Err(ServiceError::Forbidden("Only admins can process withdrawals".to_string()));
        }

        let failure_reason = match target {
            WithdrawalStatus::Failed => Some(failure_reason.unwrap_or_else(|| "Payout rejected".to_string())),
            _ => None,
        };

        let outcome = self
            .store
            .transition_withdrawal(withdrawal_id, target, actor.id(), failure_reason, self.clock.now())
            .await?
            .ok_or(ServiceError::WithdrawalNotFound(withdrawal_id))?;

        match outcome {
            TransitionOutcome::Applied(withdrawal) => {
                tracing::info!(
                    withdrawal_id = %withdrawal.id,
                    actor_id = ?actor.id(),
                    status = ?withdrawal.status,
                    "Withdrawal status changed"
                );
                self.audit.log_withdrawal_event(actor, "withdrawal_processed", &withdrawal).await;
                Ok(withdrawal)
            }
            TransitionOutcome::Unchanged(withdrawal) => Ok(withdrawal),
            TransitionOutcome::Rejected(withdrawal) => Err(ServiceError::InvalidState(format!(
                "Withdrawal is {:?}, cannot move to {:?}",
                withdrawal.status, target
            ))),
        }
    }

    pub async fn list_withdrawals(&self, actor: Actor) -> Result<Vec<Withdrawal>, ServiceError> {
        let user_id = actor
            .id()
            .ok_or_else(|| ServiceError::Unauthorized("a user is required".to_string()))?;
        Ok(self.store.list_user_withdrawals(user_id).await?)
    }

    pub async fn get_balance(&self, actor: Actor) -> Result<Balance, ServiceError> {
        let user_id = actor
            .id()
            .ok_or_else(|| ServiceError::Unauthorized("a user is required".to_string()))?;
        Ok(self.store.get_balance(user_id).await?)
    }
}
