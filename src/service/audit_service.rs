// service/audit_service.rs
use std::sync::Arc;

use uuid::Uuid;

use crate::{
    db::LedgerExt,
    models::{
        ledgermodels::{AuditEvent, EscrowAccount, Transaction, Withdrawal},
        usermodel::Actor,
    },
    utils::clock::Clock,
};

#[derive(Debug, Clone)]
pub struct AuditService {
    store: Arc<dyn LedgerExt>,
    clock: Arc<dyn Clock>,
}

impl AuditService {
    pub fn new(store: Arc<dyn LedgerExt>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn log_transaction_event(&self, actor: Actor, action: &str, transaction: &Transaction) {
        self.log_audit_event(
            actor,
            action,
            "transaction",
            transaction.id,
            serde_json::json!({
                "status": transaction.status,
                "amount": transaction.amount,
                "transaction_type": transaction.transaction_type,
                "risk_score": transaction.risk_score,
            }),
        )
        .await
    }

    pub async fn log_escrow_event(&self, actor: Actor, action: &str, escrow: &EscrowAccount) {
        self.log_audit_event(
            actor,
            action,
            "escrow",
            escrow.id,
            serde_json::json!({
                "status": escrow.status,
                "project_id": escrow.project_id,
                "total_amount": escrow.total_amount,
                "freelancer_amount": escrow.freelancer_amount,
                "reason": escrow.release_reason,
            }),
        )
        .await
    }

    /// Destinations are never written to the audit trail.
    pub async fn log_withdrawal_event(&self, actor: Actor, action: &str, withdrawal: &Withdrawal) {
        self.log_audit_event(
            actor,
            action,
            "withdrawal",
            withdrawal.id,
            serde_json::json!({
                "status": withdrawal.status,
                "requested_amount": withdrawal.requested_amount,
                "method": withdrawal.withdrawal_method,
                "failure_reason": withdrawal.failure_reason,
            }),
        )
        .await
    }

    /// Audit writes never fail the operation that triggered them.
    async fn log_audit_event(
        &self,
        actor: Actor,
        action: &str,
        resource_type: &str,
        resource_id: Uuid,
        metadata: serde_json::Value,
    ) {
        let event = AuditEvent {
            id: Uuid::new_v4(),
            actor_id: actor.id(),
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id,
            metadata: Some(metadata),
            created_at: self.clock.now(),
        };

        if let Err(e) = self.store.record_audit_event(&event).await {
            tracing::warn!(
                action = action,
                resource_type = resource_type,
                resource_id = %resource_id,
                "Failed to record audit event: {}",
                e
            );
        }
    }
}
