// service/escrow_service.rs
use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::Duration;
use uuid::Uuid;

use crate::{
    config::LedgerPolicy,
    db::LedgerExt,
    models::{ledgermodels::*, usermodel::Actor},
    service::{audit_service::AuditService, error::ServiceError},
    utils::{clock::Clock, money::{fits_scale, is_minor_unit, split_fee, RATE_SCALE}},
};

pub const AUTO_RELEASE_REASON: &str = "auto-release";

#[derive(Debug, Clone)]
pub struct FundEscrow {
    pub project_id: Uuid,
    pub total_amount: BigDecimal,
    /// Fraction in `[0, 1)`; the platform rate when absent.
    pub fee_percentage: Option<BigDecimal>,
}

#[derive(Debug, Clone)]
pub struct EscrowService {
    store: Arc<dyn LedgerExt>,
    clock: Arc<dyn Clock>,
    audit: AuditService,
    policy: LedgerPolicy,
}

impl EscrowService {
    pub fn new(store: Arc<dyn LedgerExt>, clock: Arc<dyn Clock>, policy: LedgerPolicy) -> Self {
        Self {
            audit: AuditService::new(store.clone(), clock.clone()),
            store,
            clock,
            policy,
        }
    }

    pub async fn fund_escrow(&self, actor: Actor, request: FundEscrow) -> Result<EscrowAccount, ServiceError> {
        let project = self
            .store
            .get_project(request.project_id)
            .await?
            .ok_or(ServiceError::ProjectNotFound(request.project_id))?;

        if !actor.is(project.client_id) && !actor.is_admin() {
            return Err(ServiceError::Forbidden("Only the project's client can fund its escrow".to_string()));
        }

        let freelancer_id = project
            .freelancer_id
            .ok_or_else(|| ServiceError::InvalidState("Project has no assigned freelancer".to_string()))?;

        if request.total_amount < self.policy.minimum_payment_amount {
            return Err(ServiceError::Validation(format!(
                "Escrow amount must be at least {}",
                self.policy.minimum_payment_amount
            )));
        }
        if !is_minor_unit(&request.total_amount) {
            return Err(ServiceError::Validation("Amount supports at most 2 decimal places".to_string()));
        }

        let fee_percentage = request
            .fee_percentage
            .unwrap_or_else(|| self.policy.platform_fee_rate.clone());
        if fee_percentage < BigDecimal::from(0) || fee_percentage >= BigDecimal::from(1) {
            return Err(ServiceError::Validation("Fee percentage must be between 0 and 1".to_string()));
        }
        if !fits_scale(&fee_percentage, RATE_SCALE) {
            return Err(ServiceError::Validation(
                "Fee percentage supports at most 4 decimal places".to_string(),
            ));
        }

        let (fee_amount, freelancer_amount) = split_fee(&request.total_amount, &fee_percentage);
        let now = self.clock.now();

        let escrow = EscrowAccount {
            id: Uuid::new_v4(),
            project_id: project.id,
            client_id: project.client_id,
            freelancer_id,
            total_amount: request.total_amount.clone(),
            fee_percentage,
            freelancer_amount: freelancer_amount.clone(),
            status: EscrowStatus::Funded,
            auto_release_at: now + Duration::days(self.policy.auto_release_days),
            release_reason: None,
            resolved_by: None,
            created_at: now,
            updated_at: now,
            disputed_at: None,
            released_at: None,
            refunded_at: None,
        };

        // Settled hold row: counted as the freelancer's pending balance until release.
        let hold = Transaction {
            id: Uuid::new_v4(),
            payer_id: project.client_id,
            payee_id: freelancer_id,
            project_id: Some(project.id),
            milestone_id: None,
            escrow_id: Some(escrow.id),
            amount: request.total_amount,
            currency: self.policy.currency.clone(),
            transaction_type: TransactionType::Payment,
            status: TransactionStatus::Completed,
            platform_fee_amount: fee_amount,
            net_amount: freelancer_amount,
            risk_score: 0.0,
            ip_address: None,
            user_agent: None,
            gateway_reference: None,
            description: Some(format!("Escrow funding for {}", project.title)),
            created_at: now,
            updated_at: now,
            completed_at: Some(now),
        };

        let created = self.store.create_escrow(&escrow, &hold).await?;

        tracing::info!(
            escrow_id = %created.id,
            project_id = %created.project_id,
            actor_id = ?actor.id(),
            total_amount = %created.total_amount,
            auto_release_at = %created.auto_release_at,
            "Escrow funded"
        );
        self.audit.log_escrow_event(actor, "escrow_funded", &created).await;

        Ok(created)
    }

    pub async fn release_escrow(
        &self,
        escrow_id: Uuid,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<EscrowAccount, ServiceError> {
        let escrow = self.load(escrow_id).await?;
        if !actor.is(escrow.client_id) && !actor.is_privileged() {
            return Err(ServiceError::Forbidden("Only the client or an admin can release funds".to_string()));
        }

        self.apply(escrow_id, EscrowCommand::Release, actor, reason, None).await
    }

    pub async fn refund_escrow(
        &self,
        escrow_id: Uuid,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<EscrowAccount, ServiceError> {
        if !actor.is_privileged() {
            return Err(ServiceError::Forbidden("Only admins can refund an escrow".to_string()));
        }

        let escrow = self.load(escrow_id).await?;
        let now = self.clock.now();
        let refund = Transaction {
            id: Uuid::new_v4(),
            payer_id: escrow.freelancer_id,
            payee_id: escrow.client_id,
            project_id: Some(escrow.project_id),
            milestone_id: None,
            escrow_id: None,
            amount: escrow.total_amount.clone(),
            currency: self.policy.currency.clone(),
            transaction_type: TransactionType::Refund,
            status: TransactionStatus::Completed,
            platform_fee_amount: BigDecimal::from(0),
            net_amount: escrow.total_amount.clone(),
            risk_score: 0.0,
            ip_address: None,
            user_agent: None,
            gateway_reference: None,
            description: Some(format!("Refund of escrow {}", escrow.id)),
            created_at: now,
            updated_at: now,
            completed_at: Some(now),
        };

        self.apply(escrow_id, EscrowCommand::Refund, actor, reason, Some(&refund)).await
    }

    pub async fn open_dispute(&self, escrow_id: Uuid, actor: Actor) -> Result<EscrowAccount, ServiceError> {
        let escrow = self.load(escrow_id).await?;
        if !actor.is_privileged() && !actor.id().is_some_and(|id| escrow.is_participant(id)) {
            return Err(ServiceError::Forbidden("Only project participants can open a dispute".to_string()));
        }

        self.apply(escrow_id, EscrowCommand::Dispute, actor, None, None).await
    }

    pub async fn extend_auto_release(
        &self,
        escrow_id: Uuid,
        actor: Actor,
        days: i64,
    ) -> Result<EscrowAccount, ServiceError> {
        if !actor.is_admin() {
            return Err(ServiceError::Forbidden("Only admins can extend auto-release".to_string()));
        }
        if days <= 0 {
            return Err(ServiceError::Validation("Extension must be at least one day".to_string()));
        }

        match self
            .store
            .extend_escrow_auto_release(escrow_id, days, self.clock.now())
            .await?
            .ok_or(ServiceError::EscrowNotFound(escrow_id))?
        {
            TransitionOutcome::Applied(escrow) => {
                tracing::info!(
                    escrow_id = %escrow.id,
                    actor_id = ?actor.id(),
                    auto_release_at = %escrow.auto_release_at,
                    "Escrow auto-release extended"
                );
                self.audit.log_escrow_event(actor, "escrow_extended", &escrow).await;
                Ok(escrow)
            }
            TransitionOutcome::Unchanged(escrow) => Ok(escrow),
            TransitionOutcome::Rejected(escrow) => Err(ServiceError::InvalidState(format!(
                "Escrow is {:?} and no longer active",
                escrow.status
            ))),
        }
    }

    /// Releases every funded escrow whose auto-release time has passed.
    pub async fn check_auto_release(&self) -> Result<Vec<EscrowAccount>, ServiceError> {
        let now = self.clock.now();
        let due = self.store.due_auto_releases(now).await?;
        let mut released = Vec::with_capacity(due.len());

        for escrow_id in due {
            let outcome = self
                .store
                .transition_escrow(
                    escrow_id,
                    EscrowCommand::AutoRelease,
                    None,
                    Some(AUTO_RELEASE_REASON.to_string()),
                    None,
                    now,
                )
                .await;

            match outcome {
                Ok(Some(TransitionOutcome::Applied(escrow))) => {
                    tracing::info!(escrow_id = %escrow.id, "Escrow auto-released");
                    self.audit.log_escrow_event(Actor::System, "escrow_auto_released", &escrow).await;
                    released.push(escrow);
                }
                // Disputed or extended since the scan.
                Ok(Some(_)) | Ok(None) => {}
                Err(e) => tracing::error!(escrow_id = %escrow_id, "Auto-release failed: {}", e),
            }
        }

        Ok(released)
    }

    pub async fn get_escrow(&self, escrow_id: Uuid, actor: Actor) -> Result<EscrowAccount, ServiceError> {
        let escrow = self.load(escrow_id).await?;
        if !actor.is_privileged() && !actor.id().is_some_and(|id| escrow.is_participant(id)) {
            return Err(ServiceError::Forbidden("Not a participant of this escrow".to_string()));
        }
        Ok(escrow)
    }

    async fn load(&self, escrow_id: Uuid) -> Result<EscrowAccount, ServiceError> {
        self.store
            .get_escrow(escrow_id)
            .await?
            .ok_or(ServiceError::EscrowNotFound(escrow_id))
    }

    async fn apply(
        &self,
        escrow_id: Uuid,
        command: EscrowCommand,
        actor: Actor,
        reason: Option<String>,
        compensation: Option<&Transaction>,
    ) -> Result<EscrowAccount, ServiceError> {
        let outcome = self
            .store
            .transition_escrow(escrow_id, command, actor.id(), reason, compensation, self.clock.now())
            .await?
            .ok_or(ServiceError::EscrowNotFound(escrow_id))?;

        match outcome {
            TransitionOutcome::Applied(escrow) => {
                tracing::info!(
                    escrow_id = %escrow.id,
                    actor_id = ?actor.id(),
                    status = ?escrow.status,
                    "Escrow status changed"
                );
                let action = match command {
                    EscrowCommand::Release | EscrowCommand::AutoRelease => "escrow_released",
                    EscrowCommand::Refund => "escrow_refunded",
                    EscrowCommand::Dispute => "escrow_disputed",
                };
                self.audit.log_escrow_event(actor, action, &escrow).await;
                Ok(escrow)
            }
            TransitionOutcome::Unchanged(escrow) => Ok(escrow),
            TransitionOutcome::Rejected(escrow) => {
                tracing::warn!(
                    escrow_id = %escrow.id,
                    actor_id = ?actor.id(),
                    current = ?escrow.status,
                    requested = ?command,
                    "Rejected escrow transition"
                );
                Err(ServiceError::InvalidState(format!(
                    "Escrow is {:?}, cannot {:?}",
                    escrow.status, command
                )))
            }
        }
    }
}
