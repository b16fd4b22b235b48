// service/payment_service.rs
use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::LedgerPolicy,
    db::LedgerExt,
    models::{
        ledgermodels::*,
        usermodel::{Actor, UserRole},
    },
    service::{
        audit_service::AuditService,
        error::ServiceError,
        payment_provider::{GatewayCharge, GatewayError, GatewayStatus, PaymentGateway},
        risk_service::{RiskScorer, RiskSignals},
    },
    utils::{
        clock::Clock,
        money::{is_minor_unit, split_fee},
        signature::verify_signature,
    },
};

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub payee_id: Uuid,
    pub amount: BigDecimal,
    pub transaction_type: TransactionType,
    pub project_id: Option<Uuid>,
    pub milestone_id: Option<Uuid>,
    pub description: Option<String>,
}

/// Notification body as MercadoPago posts it. Ids arrive as strings or numbers.
#[derive(Debug, Deserialize)]
pub struct GatewayEvent {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    pub data: GatewayEventData,
}

#[derive(Debug, Deserialize)]
pub struct GatewayEventData {
    pub id: serde_json::Value,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub external_reference: Option<String>,
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl GatewayEvent {
    pub fn is_payment(&self) -> bool {
        self.event_type.as_deref() == Some("payment")
            || self.action.as_deref().is_some_and(|a| a.starts_with("payment."))
    }

    pub fn payment_id(&self) -> String {
        value_to_string(&self.data.id)
    }

    /// The gateway's event id, or a key derived from type, payment id and action.
    pub fn dedup_key(&self) -> String {
        match &self.id {
            Some(id) if !id.is_null() => value_to_string(id),
            _ => format!(
                "{}:{}:{}",
                self.event_type.as_deref().unwrap_or("unknown"),
                self.payment_id(),
                self.action.as_deref().unwrap_or("")
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Processed {
        transaction_id: Uuid,
        status: TransactionStatus,
        changed: bool,
    },
    Duplicate,
    Ignored,
    UnknownTransaction,
}

#[derive(Debug, Clone)]
pub struct PaymentService {
    store: Arc<dyn LedgerExt>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    audit: AuditService,
    risk: RiskScorer,
    policy: LedgerPolicy,
    webhook_secret: String,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn LedgerExt>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        policy: LedgerPolicy,
        webhook_secret: String,
    ) -> Self {
        Self {
            audit: AuditService::new(store.clone(), clock.clone()),
            risk: RiskScorer::new(&policy),
            store,
            gateway,
            clock,
            policy,
            webhook_secret,
        }
    }

    pub async fn create_transaction(
        &self,
        actor: Actor,
        request: NewTransaction,
        context: RequestContext,
    ) -> Result<Transaction, ServiceError> {
        let payer_id = actor
            .id()
            .ok_or_else(|| ServiceError::Unauthorized("a user is required to create payments".to_string()))?;

        if request.amount <= BigDecimal::from(0) || request.amount < self.policy.minimum_payment_amount {
            return Err(ServiceError::Validation(format!(
                "Amount must be at least {}",
                self.policy.minimum_payment_amount
            )));
        }
        if !is_minor_unit(&request.amount) {
            return Err(ServiceError::Validation("Amount supports at most 2 decimal places".to_string()));
        }

        if payer_id == request.payee_id {
            return Err(ServiceError::Validation("Payer and payee must be different users".to_string()));
        }

        match request.transaction_type {
            TransactionType::Withdrawal => {
                return Err(ServiceError::Validation(
                    "Withdrawals are requested through the withdrawals endpoint".to_string(),
                ));
            }
            TransactionType::Payment | TransactionType::Bonus => {}
            _ if actor.is_admin() => {}
            other => {
                return Err(ServiceError::Forbidden(format!(
                    "Only admins may create {:?} transactions",
                    other
                )));
            }
        }

        let payer = self
            .store
            .get_user(payer_id)
            .await?
            .ok_or(ServiceError::UserNotFound(payer_id))?;

        if self.store.get_user(request.payee_id).await?.is_none() {
            return Err(ServiceError::UserNotFound(request.payee_id));
        }

        self.can_make_payment(actor, &request).await?;

        let (platform_fee_amount, net_amount) = if request.transaction_type == TransactionType::Payment {
            split_fee(&request.amount, &self.policy.platform_fee_rate)
        } else {
            (BigDecimal::from(0), request.amount.clone())
        };

        let now = self.clock.now();
        let recent = self
            .store
            .count_recent_transactions(payer_id, now - Duration::hours(self.policy.velocity_window_hours))
            .await?;

        let risk_score = self.risk.score(
            &RiskSignals {
                account_created_at: Some(payer.created_at),
                amount: request.amount.clone(),
                recent_transaction_count: Some(recent),
            },
            now,
        );

        if self.risk.is_blocked(risk_score) {
            tracing::warn!(
                payer_id = %payer_id,
                payee_id = %request.payee_id,
                risk_score = risk_score,
                "Payment blocked by risk checks"
            );
            return Err(ServiceError::PaymentBlocked { risk_score });
        }

        let transaction = Transaction {
            id: Uuid::new_v4(),
            payer_id,
            payee_id: request.payee_id,
            project_id: request.project_id,
            milestone_id: request.milestone_id,
            escrow_id: None,
            amount: request.amount,
            currency: self.policy.currency.clone(),
            transaction_type: request.transaction_type,
            status: TransactionStatus::Pending,
            platform_fee_amount,
            net_amount,
            risk_score,
            ip_address: context.ip_address,
            user_agent: context.user_agent,
            gateway_reference: None,
            description: request.description,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        let created = self.store.insert_transaction(&transaction).await?;

        tracing::info!(
            transaction_id = %created.id,
            payer_id = %created.payer_id,
            payee_id = %created.payee_id,
            amount = %created.amount,
            risk_score = created.risk_score,
            "Transaction created"
        );
        self.audit.log_transaction_event(actor, "transaction_created", &created).await;

        Ok(created)
    }

    /// Payments need a client payer; a referenced project must belong to that client.
    async fn can_make_payment(&self, actor: Actor, request: &NewTransaction) -> Result<(), ServiceError> {
        if request.transaction_type == TransactionType::Payment && !actor.has_role(UserRole::Client) {
            return Err(ServiceError::Forbidden("Only clients can make payments".to_string()));
        }

        if let Some(project_id) = request.project_id {
            let project = self
                .store
                .get_project(project_id)
                .await?
                .ok_or(ServiceError::ProjectNotFound(project_id))?;

            if !actor.is(project.client_id) && !actor.is_admin() {
                return Err(ServiceError::Forbidden("Project belongs to another client".to_string()));
            }
        }

        Ok(())
    }

    pub async fn create_gateway_charge(
        &self,
        transaction_id: Uuid,
        actor: Actor,
    ) -> Result<(Transaction, GatewayCharge), ServiceError> {
        let transaction = self.get_transaction(transaction_id, actor).await?;

        if !actor.is(transaction.payer_id) && !actor.is_privileged() {
            return Err(ServiceError::Forbidden("Only the payer can start a charge".to_string()));
        }
        if transaction.status != TransactionStatus::Pending {
            return Err(ServiceError::InvalidState(format!(
                "Transaction is {}, charges need a pending transaction",
                transaction.status.as_str()
            )));
        }

        let charge = match self.gateway.create_charge(&transaction).await {
            Ok(charge) => charge,
            Err(e) => {
                tracing::warn!(
                    transaction_id = %transaction.id,
                    "Gateway charge failed, transaction stays pending: {}",
                    e
                );
                return Err(e.into());
            }
        };

        let updated = self
            .store
            .set_gateway_reference(transaction.id, &charge.reference, self.clock.now())
            .await?
            .ok_or(ServiceError::TransactionNotFound(transaction.id))?;

        tracing::info!(
            transaction_id = %updated.id,
            gateway_reference = %charge.reference,
            "Gateway charge created"
        );

        Ok((updated, charge))
    }

    pub async fn process_payment(
        &self,
        transaction_id: Uuid,
        result: GatewayStatus,
        actor: Actor,
    ) -> Result<TransitionOutcome<Transaction>, ServiceError> {
        if !actor.is_privileged() {
            return Err(ServiceError::Forbidden("Only admins can process payments".to_string()));
        }

        match self
            .advance(
                transaction_id,
                result.target_status(),
                StatusSource::Operator,
                actor,
                "payment_processed",
            )
            .await?
        {
            TransitionOutcome::Rejected(current) => Err(ServiceError::InvalidState(format!(
                "Transaction is {}, cannot apply {:?}",
                current.status.as_str(),
                result
            ))),
            outcome => Ok(outcome),
        }
    }

    pub async fn cancel_transaction(&self, transaction_id: Uuid, actor: Actor) -> Result<Transaction, ServiceError> {
        let transaction = self.get_transaction(transaction_id, actor).await?;
        if !actor.is(transaction.payer_id) && !actor.is_privileged() {
            return Err(ServiceError::Forbidden("Only the payer can cancel a transaction".to_string()));
        }

        match self
            .advance(
                transaction_id,
                TransactionStatus::Cancelled,
                StatusSource::Operator,
                actor,
                "transaction_cancelled",
            )
            .await?
        {
            TransitionOutcome::Rejected(current) => Err(ServiceError::InvalidState(format!(
                "Transaction is {} and can no longer be cancelled",
                current.status.as_str()
            ))),
            outcome => Ok(outcome.into_inner()),
        }
    }

    pub async fn get_transaction(&self, transaction_id: Uuid, actor: Actor) -> Result<Transaction, ServiceError> {
        let transaction = self
            .store
            .get_transaction(transaction_id)
            .await?
            .ok_or(ServiceError::TransactionNotFound(transaction_id))?;

        if !actor.is_privileged() && !actor.id().is_some_and(|id| transaction.is_participant(id)) {
            return Err(ServiceError::Forbidden("Not a participant of this transaction".to_string()));
        }

        Ok(transaction)
    }

    pub async fn list_transactions(&self, actor: Actor, limit: i64, offset: i64) -> Result<Vec<Transaction>, ServiceError> {
        let user_id = actor
            .id()
            .ok_or_else(|| ServiceError::Unauthorized("a user is required".to_string()))?;
        Ok(self
            .store
            .list_user_transactions(user_id, limit.clamp(1, 100), offset.max(0))
            .await?)
    }

    pub async fn reconcile_webhook(&self, payload: &[u8], signature: Option<&str>) -> Result<WebhookOutcome, ServiceError> {
        if !verify_signature(&self.webhook_secret, payload, signature.unwrap_or_default()) {
            tracing::warn!("Rejected gateway webhook with an invalid signature");
            return Err(ServiceError::GatewaySignatureInvalid);
        }

        let event: GatewayEvent = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::Validation(format!("Malformed webhook payload: {}", e)))?;

        if !event.is_payment() {
            tracing::debug!(event_type = ?event.event_type, "Ignoring non-payment gateway event");
            return Ok(WebhookOutcome::Ignored);
        }

        let event_id = event.dedup_key();
        if self.store.webhook_event_seen(&event_id).await? {
            tracing::info!(gateway_event_id = %event_id, "Duplicate gateway event acknowledged");
            return Ok(WebhookOutcome::Duplicate);
        }

        let payment_id = event.payment_id();
        let resolved = match &event.data.status {
            Some(raw) => GatewayStatus::parse(raw).map(|status| (status, event.data.external_reference.clone())),
            None => self.gateway.fetch_payment(&payment_id).await.map(|payment| {
                (
                    payment.status,
                    payment.external_reference.or_else(|| event.data.external_reference.clone()),
                )
            }),
        };

        let (status, external_reference) = match resolved {
            Ok(resolved) => resolved,
            Err(GatewayError::UnknownStatus(raw)) => {
                tracing::warn!(gateway_event_id = %event_id, status = %raw, "Unrecognised gateway status");
                self.store.record_webhook_event(&event_id, None, self.clock.now()).await?;
                return Ok(WebhookOutcome::Ignored);
            }
            Err(e) => return Err(e.into()),
        };

        let Some(transaction) = self.locate_transaction(external_reference.as_deref(), &payment_id).await? else {
            tracing::warn!(
                gateway_event_id = %event_id,
                payment_id = %payment_id,
                "Gateway event for an unknown transaction"
            );
            self.store.record_webhook_event(&event_id, None, self.clock.now()).await?;
            return Ok(WebhookOutcome::UnknownTransaction);
        };

        let outcome = self
            .advance(
                transaction.id,
                status.target_status(),
                StatusSource::Gateway,
                Actor::System,
                "payment_reconciled",
            )
            .await?;

        self.store
            .record_webhook_event(&event_id, Some(transaction.id), self.clock.now())
            .await?;

        Ok(match outcome {
            TransitionOutcome::Applied(t) => WebhookOutcome::Processed {
                transaction_id: t.id,
                status: t.status,
                changed: true,
            },
            TransitionOutcome::Unchanged(t) => WebhookOutcome::Processed {
                transaction_id: t.id,
                status: t.status,
                changed: false,
            },
            TransitionOutcome::Rejected(t) => {
                tracing::warn!(
                    transaction_id = %t.id,
                    current = t.status.as_str(),
                    requested = status.target_status().as_str(),
                    "Gateway event does not fit the transaction lifecycle"
                );
                WebhookOutcome::Processed {
                    transaction_id: t.id,
                    status: t.status,
                    changed: false,
                }
            }
        })
    }

    async fn locate_transaction(
        &self,
        external_reference: Option<&str>,
        payment_id: &str,
    ) -> Result<Option<Transaction>, ServiceError> {
        if let Some(id) = external_reference.and_then(|r| Uuid::parse_str(r).ok()) {
            if let Some(found) = self.store.get_transaction(id).await? {
                return Ok(Some(found));
            }
        }
        Ok(self.store.find_transaction_by_gateway_reference(payment_id).await?)
    }

    async fn advance(
        &self,
        transaction_id: Uuid,
        target: TransactionStatus,
        source: StatusSource,
        actor: Actor,
        action: &str,
    ) -> Result<TransitionOutcome<Transaction>, ServiceError> {
        let outcome = self
            .store
            .transition_transaction(transaction_id, target, source, self.clock.now())
            .await?
            .ok_or(ServiceError::TransactionNotFound(transaction_id))?;

        match &outcome {
            TransitionOutcome::Applied(t) => {
                tracing::info!(
                    transaction_id = %t.id,
                    actor_id = ?actor.id(),
                    status = t.status.as_str(),
                    "Transaction status changed"
                );
                self.audit.log_transaction_event(actor, action, t).await;
            }
            TransitionOutcome::Unchanged(t) => {
                tracing::debug!(
                    transaction_id = %t.id,
                    status = t.status.as_str(),
                    requested = target.as_str(),
                    "Transaction already at or past requested status"
                );
            }
            TransitionOutcome::Rejected(_) => {}
        }

        Ok(outcome)
    }
}
