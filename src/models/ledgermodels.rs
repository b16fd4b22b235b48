// models/ledgermodels.rs
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of asking a state machine to move towards a target status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionPlan<S> {
    /// Edges to walk in order; the last element is the new status.
    Apply(Vec<S>),
    /// Already at the target, or the target lies behind the current status.
    NoOp,
    Rejected,
}

fn shortest_path<S>(from: S, to: S, next: fn(S) -> &'static [S]) -> Option<Vec<S>>
where
    S: Copy + Eq + Hash,
{
    if from == to {
        return Some(Vec::new());
    }

    let mut came_from: HashMap<S, S> = HashMap::new();
    let mut queue = VecDeque::from([from]);

    while let Some(state) = queue.pop_front() {
        for &candidate in next(state) {
            if candidate == from || came_from.contains_key(&candidate) {
                continue;
            }
            came_from.insert(candidate, state);

            if candidate == to {
                let mut path = vec![to];
                let mut cursor = state;
                while cursor != from {
                    path.push(cursor);
                    cursor = came_from[&cursor];
                }
                path.reverse();
                return Some(path);
            }

            queue.push_back(candidate);
        }
    }

    None
}

fn plan_between<S>(from: S, to: S, next: fn(S) -> &'static [S]) -> TransitionPlan<S>
where
    S: Copy + Eq + Hash,
{
    if from == to {
        return TransitionPlan::NoOp;
    }
    if let Some(path) = shortest_path(from, to, next) {
        return TransitionPlan::Apply(path);
    }
    // Stale or out-of-order request: never regress.
    if shortest_path(to, from, next).is_some() {
        return TransitionPlan::NoOp;
    }
    TransitionPlan::Rejected
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "transaction_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Payment,
    Refund,
    Commission,
    Withdrawal,
    Deposit,
    Fee,
    Bonus,
}

impl TransactionType {
    /// Types that count towards a payee's `total_earned`.
    pub fn is_earning(&self) -> bool {
        matches!(self, TransactionType::Payment | TransactionType::Bonus)
    }
}

/// Who is asking for a transaction status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSource {
    /// An admin or an internal job acting on the ledger directly.
    Operator,
    /// A gateway notification, which may arrive late or out of order.
    Gateway,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "transaction_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
    Disputed,
    Cancelled,
}

impl TransactionStatus {
    pub fn next_states(self) -> &'static [TransactionStatus] {
        use TransactionStatus::*;
        match self {
            Pending => &[Processing, Failed, Cancelled],
            Processing => &[Completed, Failed, Cancelled],
            Completed => &[Refunded, Disputed],
            Disputed => &[Completed, Refunded],
            Failed | Refunded | Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, to: TransactionStatus) -> bool {
        self.next_states().contains(&to)
    }

    pub fn is_terminal(self) -> bool {
        self.next_states().is_empty()
    }

    pub fn plan(self, target: TransactionStatus) -> TransitionPlan<TransactionStatus> {
        plan_between(self, target, TransactionStatus::next_states)
    }

    /// Like `plan`, but a gateway event can never settle an open dispute in the payee's favour.
    pub fn plan_from(self, target: TransactionStatus, source: StatusSource) -> TransitionPlan<TransactionStatus> {
        if source == StatusSource::Gateway
            && self == TransactionStatus::Disputed
            && target == TransactionStatus::Completed
        {
            return TransitionPlan::Rejected;
        }
        self.plan(target)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Refunded => "refunded",
            TransactionStatus::Disputed => "disputed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub payer_id: Uuid,
    pub payee_id: Uuid,
    pub project_id: Option<Uuid>,
    pub milestone_id: Option<Uuid>,
    pub escrow_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub currency: String,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub platform_fee_amount: BigDecimal,
    pub net_amount: BigDecimal,
    pub risk_score: f64,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub gateway_reference: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.payer_id == user_id || self.payee_id == user_id
    }

    /// Moves the row along an already planned path.
    pub fn apply_path(&mut self, path: &[TransactionStatus], at: DateTime<Utc>) {
        if let Some(last) = path.last() {
            self.status = *last;
            self.updated_at = at;
            if path.contains(&TransactionStatus::Completed) && self.completed_at.is_none() {
                self.completed_at = Some(at);
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "escrow_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Funded,
    Disputed,
    Released,
    Refunded,
}

impl EscrowStatus {
    pub fn next_states(self) -> &'static [EscrowStatus] {
        use EscrowStatus::*;
        match self {
            Funded => &[Released, Disputed, Refunded],
            Disputed => &[Released, Refunded],
            Released | Refunded => &[],
        }
    }

    pub fn can_transition_to(self, to: EscrowStatus) -> bool {
        self.next_states().contains(&to)
    }

    pub fn is_active(self) -> bool {
        !self.next_states().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscrowCommand {
    Release,
    AutoRelease,
    Refund,
    Dispute,
}

impl EscrowCommand {
    pub fn target(self) -> EscrowStatus {
        match self {
            EscrowCommand::Release | EscrowCommand::AutoRelease => EscrowStatus::Released,
            EscrowCommand::Refund => EscrowStatus::Refunded,
            EscrowCommand::Dispute => EscrowStatus::Disputed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EscrowAccount {
    pub id: Uuid,
    pub project_id: Uuid,
    pub client_id: Uuid,
    pub freelancer_id: Uuid,
    pub total_amount: BigDecimal,
    pub fee_percentage: BigDecimal,
    pub freelancer_amount: BigDecimal,
    pub status: EscrowStatus,
    pub auto_release_at: DateTime<Utc>,
    pub release_reason: Option<String>,
    pub resolved_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub disputed_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl EscrowAccount {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.client_id == user_id || self.freelancer_id == user_id
    }

    pub fn plan(&self, command: EscrowCommand, now: DateTime<Utc>) -> TransitionPlan<EscrowStatus> {
        let target = command.target();
        if self.status == target {
            return TransitionPlan::NoOp;
        }

        // A disputed escrow, or one not yet due, is never eligible for auto-release.
        if command == EscrowCommand::AutoRelease
            && (self.status != EscrowStatus::Funded || self.auto_release_at > now)
        {
            return TransitionPlan::Rejected;
        }

        if self.status.can_transition_to(target) {
            TransitionPlan::Apply(vec![target])
        } else {
            TransitionPlan::Rejected
        }
    }

    pub fn apply(&mut self, target: EscrowStatus, resolved_by: Option<Uuid>, reason: Option<String>, at: DateTime<Utc>) {
        self.status = target;
        self.updated_at = at;
        match target {
            EscrowStatus::Disputed => self.disputed_at = Some(at),
            EscrowStatus::Released => self.released_at = Some(at),
            EscrowStatus::Refunded => self.refunded_at = Some(at),
            EscrowStatus::Funded => {}
        }
        if target != EscrowStatus::Disputed {
            self.resolved_by = resolved_by;
            self.release_reason = reason;
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "withdrawal_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl WithdrawalStatus {
    pub fn next_states(self) -> &'static [WithdrawalStatus] {
        use WithdrawalStatus::*;
        match self {
            Pending => &[Processing],
            Processing => &[Completed, Failed],
            Completed | Failed => &[],
        }
    }

    pub fn plan(self, target: WithdrawalStatus) -> TransitionPlan<WithdrawalStatus> {
        plan_between(self, target, WithdrawalStatus::next_states)
    }

    /// Failed withdrawals no longer hold funds.
    pub fn debits_balance(self) -> bool {
        self != WithdrawalStatus::Failed
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "withdrawal_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalMethod {
    BankTransfer,
    Mercadopago,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Withdrawal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub requested_amount: BigDecimal,
    pub processing_fee: BigDecimal,
    pub final_amount: BigDecimal,
    pub withdrawal_method: WithdrawalMethod,
    pub destination: String,
    pub account_holder: Option<String>,
    pub bank_name: Option<String>,
    pub status: WithdrawalStatus,
    pub failure_reason: Option<String>,
    pub processed_by: Option<Uuid>,
    pub requested_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Withdrawal {
    pub fn apply_path(
        &mut self,
        path: &[WithdrawalStatus],
        processed_by: Option<Uuid>,
        failure_reason: Option<String>,
        at: DateTime<Utc>,
    ) {
        if let Some(last) = path.last() {
            self.status = *last;
            self.processed_by = processed_by;
            if matches!(last, WithdrawalStatus::Completed | WithdrawalStatus::Failed) {
                self.processed_at = Some(at);
            }
            if *last == WithdrawalStatus::Failed {
                self.failure_reason = failure_reason;
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "payment_method_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodType {
    Card,
    BankTransfer,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PaymentMethod {
    pub id: Uuid,
    pub user_id: Uuid,
    pub method_type: PaymentMethodType,
    pub card_token: Option<String>,
    pub account_reference: Option<String>,
    pub last_four: String,
    pub label: Option<String>,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: Uuid,
    pub client_id: Uuid,
    pub freelancer_id: Option<Uuid>,
    pub title: String,
}

/// Derived on every read, never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Balance {
    pub available_balance: BigDecimal,
    pub pending_balance: BigDecimal,
    pub total_earned: BigDecimal,
    pub total_spent: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditEvent {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Uuid,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Security metadata captured from the inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// What a store reports back after a locked state change.
#[derive(Debug, Clone)]
pub enum TransitionOutcome<T> {
    Applied(T),
    Unchanged(T),
    Rejected(T),
}

impl<T> TransitionOutcome<T> {
    pub fn into_inner(self) -> T {
        match self {
            TransitionOutcome::Applied(value)
            | TransitionOutcome::Unchanged(value)
            | TransitionOutcome::Rejected(value) => value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use TransactionStatus::*;

    #[test]
    fn pending_reaches_completed_through_processing() {
        assert_eq!(Pending.plan(Completed), TransitionPlan::Apply(vec![Processing, Completed]));
        assert_eq!(Processing.plan(Completed), TransitionPlan::Apply(vec![Completed]));
    }

    #[test]
    fn late_events_never_regress_a_transaction() {
        assert_eq!(Completed.plan(Pending), TransitionPlan::NoOp);
        assert_eq!(Completed.plan(Processing), TransitionPlan::NoOp);
        assert_eq!(Refunded.plan(Completed), TransitionPlan::NoOp);
        assert_eq!(Completed.plan(Completed), TransitionPlan::NoOp);
    }

    #[test]
    fn unreachable_targets_are_rejected() {
        assert_eq!(Failed.plan(Completed), TransitionPlan::Rejected);
        assert_eq!(Cancelled.plan(Completed), TransitionPlan::Rejected);
        assert_eq!(Completed.plan(Cancelled), TransitionPlan::Rejected);
    }

    #[test]
    fn disputes_resolve_either_way() {
        assert_eq!(Completed.plan(Disputed), TransitionPlan::Apply(vec![Disputed]));
        assert_eq!(Disputed.plan(Completed), TransitionPlan::Apply(vec![Completed]));
        assert_eq!(Disputed.plan(Refunded), TransitionPlan::Apply(vec![Refunded]));
    }

    #[test]
    fn gateway_cannot_settle_a_dispute() {
        assert_eq!(Disputed.plan_from(Completed, StatusSource::Gateway), TransitionPlan::Rejected);
        assert_eq!(
            Disputed.plan_from(Completed, StatusSource::Operator),
            TransitionPlan::Apply(vec![Completed])
        );
        assert_eq!(
            Disputed.plan_from(Refunded, StatusSource::Gateway),
            TransitionPlan::Apply(vec![Refunded])
        );
        assert_eq!(
            Completed.plan_from(Disputed, StatusSource::Gateway),
            TransitionPlan::Apply(vec![Disputed])
        );
    }

    #[test]
    fn terminal_transaction_states() {
        assert!(Failed.is_terminal());
        assert!(Refunded.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(!Completed.is_terminal());
    }

    fn escrow(status: EscrowStatus, auto_release_at: DateTime<Utc>) -> EscrowAccount {
        let now = Utc::now();
        EscrowAccount {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            freelancer_id: Uuid::new_v4(),
            total_amount: BigDecimal::from(1000),
            fee_percentage: BigDecimal::from(0),
            freelancer_amount: BigDecimal::from(1000),
            status,
            auto_release_at,
            release_reason: None,
            resolved_by: None,
            created_at: now,
            updated_at: now,
            disputed_at: None,
            released_at: None,
            refunded_at: None,
        }
    }

    #[test]
    fn auto_release_requires_funded_and_due() {
        let now = Utc::now();
        let due = escrow(EscrowStatus::Funded, now - Duration::hours(1));
        assert_eq!(
            due.plan(EscrowCommand::AutoRelease, now),
            TransitionPlan::Apply(vec![EscrowStatus::Released])
        );

        let not_due = escrow(EscrowStatus::Funded, now + Duration::hours(1));
        assert_eq!(not_due.plan(EscrowCommand::AutoRelease, now), TransitionPlan::Rejected);

        let disputed = escrow(EscrowStatus::Disputed, now - Duration::days(30));
        assert_eq!(disputed.plan(EscrowCommand::AutoRelease, now), TransitionPlan::Rejected);
    }

    #[test]
    fn released_escrow_release_is_noop_and_refund_is_rejected() {
        let now = Utc::now();
        let released = escrow(EscrowStatus::Released, now);
        assert_eq!(released.plan(EscrowCommand::Release, now), TransitionPlan::NoOp);
        assert_eq!(released.plan(EscrowCommand::Refund, now), TransitionPlan::Rejected);

        let refunded = escrow(EscrowStatus::Refunded, now);
        assert_eq!(refunded.plan(EscrowCommand::Release, now), TransitionPlan::Rejected);
    }

    #[test]
    fn withdrawal_paths() {
        use WithdrawalStatus as W;
        assert_eq!(W::Pending.plan(W::Failed), TransitionPlan::Apply(vec![W::Processing, W::Failed]));
        assert_eq!(W::Completed.plan(W::Failed), TransitionPlan::Rejected);
        assert_eq!(W::Completed.plan(W::Processing), TransitionPlan::NoOp);
        assert!(!W::Failed.debits_balance());
    }
}
