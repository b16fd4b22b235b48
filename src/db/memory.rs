// db/memory.rs
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use sqlx::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::ledgerdb::LedgerExt;
use crate::models::ledgermodels::*;
use crate::models::usermodel::{User, UserRole};
use crate::service::error::ServiceError;

#[derive(Debug, Default)]
struct LedgerState {
    users: HashMap<Uuid, User>,
    projects: HashMap<Uuid, Project>,
    transactions: Vec<Transaction>,
    escrows: HashMap<Uuid, EscrowAccount>,
    withdrawals: Vec<Withdrawal>,
    payment_methods: Vec<PaymentMethod>,
    webhook_events: HashSet<String>,
    audit_events: Vec<AuditEvent>,
}

impl LedgerState {
    fn balance(&self, user_id: Uuid) -> Balance {
        let zero = || BigDecimal::from(0);
        let mut balance = Balance {
            available_balance: zero(),
            pending_balance: zero(),
            total_earned: zero(),
            total_spent: zero(),
        };

        for t in &self.transactions {
            let escrow_status = t.escrow_id.and_then(|id| self.escrows.get(&id)).map(|e| e.status);

            if t.payee_id == user_id && t.status == TransactionStatus::Completed {
                match escrow_status {
                    None | Some(EscrowStatus::Released) => {
                        balance.available_balance += &t.net_amount;
                        if t.transaction_type.is_earning() {
                            balance.total_earned += &t.net_amount;
                        }
                    }
                    Some(EscrowStatus::Funded) | Some(EscrowStatus::Disputed) => {
                        balance.pending_balance += &t.net_amount;
                    }
                    Some(EscrowStatus::Refunded) => {}
                }
            }

            if t.payer_id == user_id
                && matches!(t.status, TransactionStatus::Completed | TransactionStatus::Disputed)
                && t.transaction_type != TransactionType::Refund
            {
                balance.total_spent += &t.amount;
            }
        }

        for w in &self.withdrawals {
            if w.user_id == user_id && w.status.debits_balance() {
                balance.available_balance -= &w.requested_amount;
            }
        }

        balance
    }
}

/// Store double for service and handler tests. One mutex stands in for row locks.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, role: UserRole, created_at: DateTime<Utc>) -> User {
        let id = Uuid::new_v4();
        let user = User {
            id,
            name: format!("{} {}", role.to_str(), &id.to_string()[..8]),
            email: format!("{}@laburar.test", id),
            role,
            created_at,
        };
        self.state.lock().await.users.insert(id, user.clone());
        user
    }

    pub async fn add_project(&self, client_id: Uuid, freelancer_id: Option<Uuid>) -> Project {
        let project = Project {
            id: Uuid::new_v4(),
            client_id,
            freelancer_id,
            title: "Landing page".to_string(),
        };
        self.state.lock().await.projects.insert(project.id, project.clone());
        project
    }

    pub async fn transactions(&self) -> Vec<Transaction> {
        self.state.lock().await.transactions.clone()
    }

    pub async fn audit_events(&self) -> Vec<AuditEvent> {
        self.state.lock().await.audit_events.clone()
    }

    pub async fn webhook_event_count(&self) -> usize {
        self.state.lock().await.webhook_events.len()
    }
}

#[async_trait]
impl LedgerExt for MemoryLedger {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, Error> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn get_project(&self, project_id: Uuid) -> Result<Option<Project>, Error> {
        Ok(self.state.lock().await.projects.get(&project_id).cloned())
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<Transaction, Error> {
        self.state.lock().await.transactions.push(transaction.clone());
        Ok(transaction.clone())
    }

    async fn get_transaction(&self, transaction_id: Uuid) -> Result<Option<Transaction>, Error> {
        let state = self.state.lock().await;
        Ok(state.transactions.iter().find(|t| t.id == transaction_id).cloned())
    }

    async fn find_transaction_by_gateway_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, Error> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .find(|t| t.gateway_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn set_gateway_reference(
        &self,
        transaction_id: Uuid,
        reference: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Transaction>, Error> {
        let mut state = self.state.lock().await;
        Ok(state.transactions.iter_mut().find(|t| t.id == transaction_id).map(|t| {
            t.gateway_reference = Some(reference.to_string());
            t.updated_at = at;
            t.clone()
        }))
    }

    async fn count_recent_transactions(&self, payer_id: Uuid, since: DateTime<Utc>) -> Result<i64, Error> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.payer_id == payer_id && t.created_at >= since)
            .count() as i64)
    }

    async fn list_user_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>, Error> {
        let state = self.state.lock().await;
        let mut rows: Vec<Transaction> = state
            .transactions
            .iter()
            .filter(|t| t.is_participant(user_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn transition_transaction(
        &self,
        transaction_id: Uuid,
        target: TransactionStatus,
        source: StatusSource,
        at: DateTime<Utc>,
    ) -> Result<Option<TransitionOutcome<Transaction>>, Error> {
        let mut state = self.state.lock().await;
        let Some(current) = state.transactions.iter_mut().find(|t| t.id == transaction_id) else {
            return Ok(None);
        };

        Ok(Some(match current.status.plan_from(target, source) {
            TransitionPlan::NoOp => TransitionOutcome::Unchanged(current.clone()),
            TransitionPlan::Rejected => TransitionOutcome::Rejected(current.clone()),
            TransitionPlan::Apply(path) => {
                current.apply_path(&path, at);
                TransitionOutcome::Applied(current.clone())
            }
        }))
    }

    async fn webhook_event_seen(&self, gateway_event_id: &str) -> Result<bool, Error> {
        Ok(self.state.lock().await.webhook_events.contains(gateway_event_id))
    }

    async fn record_webhook_event(
        &self,
        gateway_event_id: &str,
        _transaction_id: Option<Uuid>,
        _at: DateTime<Utc>,
    ) -> Result<bool, Error> {
        Ok(self
            .state
            .lock()
            .await
            .webhook_events
            .insert(gateway_event_id.to_string()))
    }

    async fn create_escrow(&self, escrow: &EscrowAccount, hold: &Transaction) -> Result<EscrowAccount, ServiceError> {
        let mut state = self.state.lock().await;
        if !state.projects.contains_key(&escrow.project_id) {
            return Err(ServiceError::ProjectNotFound(escrow.project_id));
        }
        if state
            .escrows
            .values()
            .any(|e| e.project_id == escrow.project_id && e.status.is_active())
        {
            return Err(ServiceError::EscrowAlreadyActive(escrow.project_id));
        }

        state.escrows.insert(escrow.id, escrow.clone());
        state.transactions.push(hold.clone());
        Ok(escrow.clone())
    }

    async fn get_escrow(&self, escrow_id: Uuid) -> Result<Option<EscrowAccount>, Error> {
        Ok(self.state.lock().await.escrows.get(&escrow_id).cloned())
    }

    async fn transition_escrow(
        &self,
        escrow_id: Uuid,
        command: EscrowCommand,
        resolved_by: Option<Uuid>,
        reason: Option<String>,
        compensation: Option<&Transaction>,
        at: DateTime<Utc>,
    ) -> Result<Option<TransitionOutcome<EscrowAccount>>, Error> {
        let mut state = self.state.lock().await;
        let Some(current) = state.escrows.get_mut(&escrow_id) else {
            return Ok(None);
        };

        let outcome = match current.plan(command, at) {
            TransitionPlan::NoOp => TransitionOutcome::Unchanged(current.clone()),
            TransitionPlan::Rejected => TransitionOutcome::Rejected(current.clone()),
            TransitionPlan::Apply(_) => {
                current.apply(command.target(), resolved_by, reason, at);
                TransitionOutcome::Applied(current.clone())
            }
        };

        if matches!(&outcome, TransitionOutcome::Applied(e) if e.status == EscrowStatus::Refunded) {
            for t in state.transactions.iter_mut() {
                if t.escrow_id == Some(escrow_id) && t.status == TransactionStatus::Completed {
                    t.status = TransactionStatus::Refunded;
                    t.updated_at = at;
                }
            }
            if let Some(refund) = compensation {
                state.transactions.push(refund.clone());
            }
        }

        Ok(Some(outcome))
    }

    async fn extend_escrow_auto_release(
        &self,
        escrow_id: Uuid,
        days: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<TransitionOutcome<EscrowAccount>>, Error> {
        let mut state = self.state.lock().await;
        let Some(current) = state.escrows.get_mut(&escrow_id) else {
            return Ok(None);
        };

        if !current.status.is_active() || days <= 0 {
            return Ok(Some(TransitionOutcome::Rejected(current.clone())));
        }

        current.auto_release_at += Duration::days(days);
        current.updated_at = at;
        Ok(Some(TransitionOutcome::Applied(current.clone())))
    }

    async fn due_auto_releases(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, Error> {
        let state = self.state.lock().await;
        let mut due: Vec<&EscrowAccount> = state
            .escrows
            .values()
            .filter(|e| e.status == EscrowStatus::Funded && e.auto_release_at <= now)
            .collect();
        due.sort_by_key(|e| e.auto_release_at);
        Ok(due.into_iter().map(|e| e.id).collect())
    }

    async fn create_withdrawal(&self, withdrawal: &Withdrawal) -> Result<Withdrawal, ServiceError> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&withdrawal.user_id) {
            return Err(ServiceError::UserNotFound(withdrawal.user_id));
        }

        let available = state.balance(withdrawal.user_id).available_balance;
        if available < withdrawal.requested_amount {
            return Err(ServiceError::InsufficientBalance {
                requested: withdrawal.requested_amount.clone(),
                available,
            });
        }

        state.withdrawals.push(withdrawal.clone());
        Ok(withdrawal.clone())
    }

    async fn get_withdrawal(&self, withdrawal_id: Uuid) -> Result<Option<Withdrawal>, Error> {
        let state = self.state.lock().await;
        Ok(state.withdrawals.iter().find(|w| w.id == withdrawal_id).cloned())
    }

    async fn transition_withdrawal(
        &self,
        withdrawal_id: Uuid,
        target: WithdrawalStatus,
        processed_by: Option<Uuid>,
        failure_reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Option<TransitionOutcome<Withdrawal>>, Error> {
        let mut state = self.state.lock().await;
        let Some(current) = state.withdrawals.iter_mut().find(|w| w.id == withdrawal_id) else {
            return Ok(None);
        };

        Ok(Some(match current.status.plan(target) {
            TransitionPlan::NoOp => TransitionOutcome::Unchanged(current.clone()),
            TransitionPlan::Rejected => TransitionOutcome::Rejected(current.clone()),
            TransitionPlan::Apply(path) => {
                current.apply_path(&path, processed_by, failure_reason, at);
                TransitionOutcome::Applied(current.clone())
            }
        }))
    }

    async fn list_user_withdrawals(&self, user_id: Uuid) -> Result<Vec<Withdrawal>, Error> {
        let state = self.state.lock().await;
        let mut rows: Vec<Withdrawal> = state
            .withdrawals
            .iter()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(rows)
    }

    async fn get_balance(&self, user_id: Uuid) -> Result<Balance, Error> {
        Ok(self.state.lock().await.balance(user_id))
    }

    async fn add_payment_method(&self, method: &PaymentMethod) -> Result<PaymentMethod, Error> {
        let mut state = self.state.lock().await;
        let make_default = method.is_default || !state.payment_methods.iter().any(|m| m.user_id == method.user_id);
        if make_default {
            for m in state.payment_methods.iter_mut().filter(|m| m.user_id == method.user_id) {
                m.is_default = false;
            }
        }

        let mut created = method.clone();
        created.is_default = make_default;
        state.payment_methods.push(created.clone());
        Ok(created)
    }

    async fn list_payment_methods(&self, user_id: Uuid) -> Result<Vec<PaymentMethod>, Error> {
        let state = self.state.lock().await;
        let mut rows: Vec<PaymentMethod> = state
            .payment_methods
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.is_default.cmp(&a.is_default).then(b.created_at.cmp(&a.created_at)));
        Ok(rows)
    }

    async fn set_default_payment_method(
        &self,
        user_id: Uuid,
        method_id: Uuid,
    ) -> Result<Option<PaymentMethod>, Error> {
        let mut state = self.state.lock().await;
        if !state
            .payment_methods
            .iter()
            .any(|m| m.id == method_id && m.user_id == user_id)
        {
            return Ok(None);
        }

        let mut updated = None;
        for m in state.payment_methods.iter_mut().filter(|m| m.user_id == user_id) {
            m.is_default = m.id == method_id;
            if m.is_default {
                updated = Some(m.clone());
            }
        }
        Ok(updated)
    }

    async fn record_audit_event(&self, event: &AuditEvent) -> Result<(), Error> {
        self.state.lock().await.audit_events.push(event.clone());
        Ok(())
    }
}
