// db/ledgerdb.rs
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Error, PgConnection, Row};
use uuid::Uuid;

use super::db::DBClient;
use crate::models::ledgermodels::*;
use crate::models::usermodel::User;
use crate::service::error::ServiceError;

const TRANSACTION_COLUMNS: &str = r#"
    id, payer_id, payee_id, project_id, milestone_id, escrow_id, amount, currency,
    transaction_type, status, platform_fee_amount, net_amount, risk_score, ip_address,
    user_agent, gateway_reference, description, created_at, updated_at, completed_at
"#;

const ESCROW_COLUMNS: &str = r#"
    id, project_id, client_id, freelancer_id, total_amount, fee_percentage,
    freelancer_amount, status, auto_release_at, release_reason, resolved_by,
    created_at, updated_at, disputed_at, released_at, refunded_at
"#;

const WITHDRAWAL_COLUMNS: &str = r#"
    id, user_id, requested_amount, processing_fee, final_amount, withdrawal_method,
    destination, account_holder, bank_name, status, failure_reason, processed_by,
    requested_at, processed_at
"#;

const PAYMENT_METHOD_COLUMNS: &str = r#"
    id, user_id, method_type, card_token, account_reference, last_four, label,
    is_default, created_at
"#;

/// Persistence for the ledger. Methods that change a status lock the row, plan the
/// transition against the current status and write, all in one database transaction.
#[async_trait]
pub trait LedgerExt: Send + Sync + std::fmt::Debug {
    // Users & projects
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, Error>;
    async fn get_project(&self, project_id: Uuid) -> Result<Option<Project>, Error>;

    // Transactions
    async fn insert_transaction(&self, transaction: &Transaction) -> Result<Transaction, Error>;
    async fn get_transaction(&self, transaction_id: Uuid) -> Result<Option<Transaction>, Error>;
    async fn find_transaction_by_gateway_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, Error>;
    async fn set_gateway_reference(
        &self,
        transaction_id: Uuid,
        reference: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Transaction>, Error>;
    async fn count_recent_transactions(&self, payer_id: Uuid, since: DateTime<Utc>) -> Result<i64, Error>;
    async fn list_user_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>, Error>;
    async fn transition_transaction(
        &self,
        transaction_id: Uuid,
        target: TransactionStatus,
        source: StatusSource,
        at: DateTime<Utc>,
    ) -> Result<Option<TransitionOutcome<Transaction>>, Error>;

    // Gateway events
    async fn webhook_event_seen(&self, gateway_event_id: &str) -> Result<bool, Error>;
    /// Returns false when the event had already been recorded.
    async fn record_webhook_event(
        &self,
        gateway_event_id: &str,
        transaction_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<bool, Error>;

    // Escrow
    async fn create_escrow(&self, escrow: &EscrowAccount, hold: &Transaction) -> Result<EscrowAccount, ServiceError>;
    async fn get_escrow(&self, escrow_id: Uuid) -> Result<Option<EscrowAccount>, Error>;
    /// A refund also moves the escrow's settled hold rows to `refunded` and inserts
    /// `compensation`, if any.
    async fn transition_escrow(
        &self,
        escrow_id: Uuid,
        command: EscrowCommand,
        resolved_by: Option<Uuid>,
        reason: Option<String>,
        compensation: Option<&Transaction>,
        at: DateTime<Utc>,
    ) -> Result<Option<TransitionOutcome<EscrowAccount>>, Error>;
    async fn extend_escrow_auto_release(
        &self,
        escrow_id: Uuid,
        days: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<TransitionOutcome<EscrowAccount>>, Error>;
    async fn due_auto_releases(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, Error>;

    // Withdrawals & balance
    /// Checks the available balance and inserts under a lock on the user row.
    async fn create_withdrawal(&self, withdrawal: &Withdrawal) -> Result<Withdrawal, ServiceError>;
    async fn get_withdrawal(&self, withdrawal_id: Uuid) -> Result<Option<Withdrawal>, Error>;
    async fn transition_withdrawal(
        &self,
        withdrawal_id: Uuid,
        target: WithdrawalStatus,
        processed_by: Option<Uuid>,
        failure_reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Option<TransitionOutcome<Withdrawal>>, Error>;
    async fn list_user_withdrawals(&self, user_id: Uuid) -> Result<Vec<Withdrawal>, Error>;
    async fn get_balance(&self, user_id: Uuid) -> Result<Balance, Error>;

    // Payment methods
    async fn add_payment_method(&self, method: &PaymentMethod) -> Result<PaymentMethod, Error>;
    async fn list_payment_methods(&self, user_id: Uuid) -> Result<Vec<PaymentMethod>, Error>;
    async fn set_default_payment_method(
        &self,
        user_id: Uuid,
        method_id: Uuid,
    ) -> Result<Option<PaymentMethod>, Error>;

    // Audit
    async fn record_audit_event(&self, event: &AuditEvent) -> Result<(), Error>;
}

fn is_unique_violation(err: &Error) -> bool {
    match err {
        Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

async fn insert_transaction_row(conn: &mut PgConnection, t: &Transaction) -> Result<Transaction, Error> {
    let sql = format!(
        r#"
        INSERT INTO transactions
        (id, payer_id, payee_id, project_id, milestone_id, escrow_id, amount, currency,
         transaction_type, status, platform_fee_amount, net_amount, risk_score, ip_address,
         user_agent, gateway_reference, description, created_at, updated_at, completed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
        RETURNING {}
        "#,
        TRANSACTION_COLUMNS
    );

    sqlx::query_as::<_, Transaction>(&sql)
        .bind(t.id)
        .bind(t.payer_id)
        .bind(t.payee_id)
        .bind(t.project_id)
        .bind(t.milestone_id)
        .bind(t.escrow_id)
        .bind(&t.amount)
        .bind(&t.currency)
        .bind(t.transaction_type)
        .bind(t.status)
        .bind(&t.platform_fee_amount)
        .bind(&t.net_amount)
        .bind(t.risk_score)
        .bind(&t.ip_address)
        .bind(&t.user_agent)
        .bind(&t.gateway_reference)
        .bind(&t.description)
        .bind(t.created_at)
        .bind(t.updated_at)
        .bind(t.completed_at)
        .fetch_one(&mut *conn)
        .await
}

/// Aggregates a user's balance from transactions, escrow states and withdrawals.
async fn derive_balance(conn: &mut PgConnection, user_id: Uuid) -> Result<Balance, Error> {
    let row = sqlx::query(
        r#"
        SELECT
            COALESCE(SUM(t.net_amount) FILTER (
                WHERE t.payee_id = $1 AND t.status = 'completed'
                  AND (e.id IS NULL OR e.status = 'released')
            ), 0) AS settled,
            COALESCE(SUM(t.net_amount) FILTER (
                WHERE t.payee_id = $1 AND t.status = 'completed'
                  AND e.status IN ('funded', 'disputed')
            ), 0) AS pending,
            COALESCE(SUM(t.net_amount) FILTER (
                WHERE t.payee_id = $1 AND t.status = 'completed'
                  AND (e.id IS NULL OR e.status = 'released')
                  AND t.transaction_type IN ('payment', 'bonus')
            ), 0) AS earned,
            COALESCE(SUM(t.amount) FILTER (
                WHERE t.payer_id = $1 AND t.status IN ('completed', 'disputed')
                  AND t.transaction_type <> 'refund'
            ), 0) AS spent
        FROM transactions t
        LEFT JOIN escrow_accounts e ON e.id = t.escrow_id
        WHERE t.payee_id = $1 OR t.payer_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;

    let withdrawn: BigDecimal = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(requested_amount), 0)
        FROM withdrawals
        WHERE user_id = $1 AND status <> 'failed'
        "#,
    )
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;

    let settled: BigDecimal = row.try_get("settled")?;

    Ok(Balance {
        available_balance: settled - withdrawn,
        pending_balance: row.try_get("pending")?,
        total_earned: row.try_get("earned")?,
        total_spent: row.try_get("spent")?,
    })
}

#[async_trait]
impl LedgerExt for DBClient {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, Error> {
        sqlx::query_as::<_, User>(
            "SELECT id, name, email, role, created_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_project(&self, project_id: Uuid) -> Result<Option<Project>, Error> {
        sqlx::query_as::<_, Project>(
            "SELECT id, client_id, freelancer_id, title FROM projects WHERE id = $1",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<Transaction, Error> {
        let mut conn = self.pool.acquire().await?;
        insert_transaction_row(&mut conn, transaction).await
    }

    async fn get_transaction(&self, transaction_id: Uuid) -> Result<Option<Transaction>, Error> {
        let sql = format!("SELECT {} FROM transactions WHERE id = $1", TRANSACTION_COLUMNS);
        sqlx::query_as::<_, Transaction>(&sql)
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn find_transaction_by_gateway_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, Error> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE gateway_reference = $1",
            TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, Transaction>(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await
    }

    async fn set_gateway_reference(
        &self,
        transaction_id: Uuid,
        reference: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Transaction>, Error> {
        let sql = format!(
            r#"
            UPDATE transactions
            SET gateway_reference = $2, updated_at = $3
            WHERE id = $1
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, Transaction>(&sql)
            .bind(transaction_id)
            .bind(reference)
            .bind(at)
            .fetch_optional(&self.pool)
            .await
    }

    async fn count_recent_transactions(&self, payer_id: Uuid, since: DateTime<Utc>) -> Result<i64, Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM transactions WHERE payer_id = $1 AND created_at >= $2",
        )
        .bind(payer_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
    }

    async fn list_user_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>, Error> {
        let sql = format!(
            r#"
            SELECT {} FROM transactions
            WHERE payer_id = $1 OR payee_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
            TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, Transaction>(&sql)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
    }

    async fn transition_transaction(
        &self,
        transaction_id: Uuid,
        target: TransactionStatus,
        source: StatusSource,
        at: DateTime<Utc>,
    ) -> Result<Option<TransitionOutcome<Transaction>>, Error> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {} FROM transactions WHERE id = $1 FOR UPDATE", TRANSACTION_COLUMNS);
        let current = sqlx::query_as::<_, Transaction>(&sql)
            .bind(transaction_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(mut current) = current else {
            return Ok(None);
        };

        let outcome = match current.status.plan_from(target, source) {
            TransitionPlan::NoOp => TransitionOutcome::Unchanged(current),
            TransitionPlan::Rejected => TransitionOutcome::Rejected(current),
            TransitionPlan::Apply(path) => {
                current.apply_path(&path, at);
                let sql = format!(
                    r#"
                    UPDATE transactions
                    SET status = $2, updated_at = $3, completed_at = $4
                    WHERE id = $1
                    RETURNING {}
                    "#,
                    TRANSACTION_COLUMNS
                );
                let updated = sqlx::query_as::<_, Transaction>(&sql)
                    .bind(current.id)
                    .bind(current.status)
                    .bind(current.updated_at)
                    .bind(current.completed_at)
                    .fetch_one(&mut *tx)
                    .await?;
                TransitionOutcome::Applied(updated)
            }
        };

        tx.commit().await?;
        Ok(Some(outcome))
    }

    async fn webhook_event_seen(&self, gateway_event_id: &str) -> Result<bool, Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM webhook_events WHERE gateway_event_id = $1)",
        )
        .bind(gateway_event_id)
        .fetch_one(&self.pool)
        .await
    }

    async fn record_webhook_event(
        &self,
        gateway_event_id: &str,
        transaction_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_events (gateway_event_id, transaction_id, received_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (gateway_event_id) DO NOTHING
            "#,
        )
        .bind(gateway_event_id)
        .bind(transaction_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn create_escrow(&self, escrow: &EscrowAccount, hold: &Transaction) -> Result<EscrowAccount, ServiceError> {
        let mut tx = self.pool.begin().await?;

        let project: Option<Uuid> = sqlx::query_scalar("SELECT id FROM projects WHERE id = $1 FOR UPDATE")
            .bind(escrow.project_id)
            .fetch_optional(&mut *tx)
            .await?;
        if project.is_none() {
            return Err(ServiceError::ProjectNotFound(escrow.project_id));
        }

        let active: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM escrow_accounts
            WHERE project_id = $1 AND status IN ('funded', 'disputed')
            LIMIT 1
            "#,
        )
        .bind(escrow.project_id)
        .fetch_optional(&mut *tx)
        .await?;
        if active.is_some() {
            return Err(ServiceError::EscrowAlreadyActive(escrow.project_id));
        }

        let sql = format!(
            r#"
            INSERT INTO escrow_accounts
            (id, project_id, client_id, freelancer_id, total_amount, fee_percentage,
             freelancer_amount, status, auto_release_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            ESCROW_COLUMNS
        );
        let created = sqlx::query_as::<_, EscrowAccount>(&sql)
            .bind(escrow.id)
            .bind(escrow.project_id)
            .bind(escrow.client_id)
            .bind(escrow.freelancer_id)
            .bind(&escrow.total_amount)
            .bind(&escrow.fee_percentage)
            .bind(&escrow.freelancer_amount)
            .bind(escrow.status)
            .bind(escrow.auto_release_at)
            .bind(escrow.created_at)
            .bind(escrow.updated_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    ServiceError::EscrowAlreadyActive(escrow.project_id)
                } else {
                    ServiceError::Database(e)
                }
            })?;

        insert_transaction_row(&mut tx, hold).await?;

        tx.commit().await?;
        Ok(created)
    }

    async fn get_escrow(&self, escrow_id: Uuid) -> Result<Option<EscrowAccount>, Error> {
        let sql = format!("SELECT {} FROM escrow_accounts WHERE id = $1", ESCROW_COLUMNS);
        sqlx::query_as::<_, EscrowAccount>(&sql)
            .bind(escrow_id)
            .fetch_optional(&self.pool)
            .await
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
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {} FROM escrow_accounts WHERE id = $1 FOR UPDATE", ESCROW_COLUMNS);
        let current = sqlx::query_as::<_, EscrowAccount>(&sql)
            .bind(escrow_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(mut current) = current else {
            return Ok(None);
        };

        let outcome = match current.plan(command, at) {
            TransitionPlan::NoOp => TransitionOutcome::Unchanged(current),
            TransitionPlan::Rejected => TransitionOutcome::Rejected(current),
            TransitionPlan::Apply(path) => {
                let target = command.target();
                debug_assert_eq!(path.last(), Some(&target));
                current.apply(target, resolved_by, reason, at);

                let sql = format!(
                    r#"
                    UPDATE escrow_accounts
                    SET status = $2, release_reason = $3, resolved_by = $4, updated_at = $5,
                        disputed_at = $6, released_at = $7, refunded_at = $8
                    WHERE id = $1
                    RETURNING {}
                    "#,
                    ESCROW_COLUMNS
                );
                let updated = sqlx::query_as::<_, EscrowAccount>(&sql)
                    .bind(current.id)
                    .bind(current.status)
                    .bind(&current.release_reason)
                    .bind(current.resolved_by)
                    .bind(current.updated_at)
                    .bind(current.disputed_at)
                    .bind(current.released_at)
                    .bind(current.refunded_at)
                    .fetch_one(&mut *tx)
                    .await?;

                if target == EscrowStatus::Refunded {
                    sqlx::query(
                        r#"
                        UPDATE transactions
                        SET status = 'refunded', updated_at = $2
                        WHERE escrow_id = $1 AND status = 'completed'
                        "#,
                    )
                    .bind(escrow_id)
                    .bind(at)
                    .execute(&mut *tx)
                    .await?;

                    if let Some(refund) = compensation {
                        insert_transaction_row(&mut tx, refund).await?;
                    }
                }

                TransitionOutcome::Applied(updated)
            }
        };

        tx.commit().await?;
        Ok(Some(outcome))
    }

    async fn extend_escrow_auto_release(
        &self,
        escrow_id: Uuid,
        days: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<TransitionOutcome<EscrowAccount>>, Error> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {} FROM escrow_accounts WHERE id = $1 FOR UPDATE", ESCROW_COLUMNS);
        let current = sqlx::query_as::<_, EscrowAccount>(&sql)
            .bind(escrow_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(current) = current else {
            return Ok(None);
        };

        if !current.status.is_active() || days <= 0 {
            tx.commit().await?;
            return Ok(Some(TransitionOutcome::Rejected(current)));
        }

        let sql = format!(
            r#"
            UPDATE escrow_accounts
            SET auto_release_at = $2, updated_at = $3
            WHERE id = $1
            RETURNING {}
            "#,
            ESCROW_COLUMNS
        );
        let updated = sqlx::query_as::<_, EscrowAccount>(&sql)
            .bind(escrow_id)
            .bind(current.auto_release_at + Duration::days(days))
            .bind(at)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(TransitionOutcome::Applied(updated)))
    }

    async fn due_auto_releases(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, Error> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM escrow_accounts
            WHERE status = 'funded' AND auto_release_at <= $1
            ORDER BY auto_release_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
    }

    async fn create_withdrawal(&self, withdrawal: &Withdrawal) -> Result<Withdrawal, ServiceError> {
        let mut tx = self.pool.begin().await?;

        // Serializes every balance-debiting request of this user.
        let user: Option<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(withdrawal.user_id)
            .fetch_optional(&mut *tx)
            .await?;
        if user.is_none() {
            return Err(ServiceError::UserNotFound(withdrawal.user_id));
        }

        let balance = derive_balance(&mut tx, withdrawal.user_id).await?;
        if balance.available_balance < withdrawal.requested_amount {
            return Err(ServiceError::InsufficientBalance {
                requested: withdrawal.requested_amount.clone(),
                available: balance.available_balance,
            });
        }

        let sql = format!(
            r#"
            INSERT INTO withdrawals
            (id, user_id, requested_amount, processing_fee, final_amount, withdrawal_method,
             destination, account_holder, bank_name, status, requested_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            WITHDRAWAL_COLUMNS
        );
        let created = sqlx::query_as::<_, Withdrawal>(&sql)
            .bind(withdrawal.id)
            .bind(withdrawal.user_id)
            .bind(&withdrawal.requested_amount)
            .bind(&withdrawal.processing_fee)
            .bind(&withdrawal.final_amount)
            .bind(withdrawal.withdrawal_method)
            .bind(&withdrawal.destination)
            .bind(&withdrawal.account_holder)
            .bind(&withdrawal.bank_name)
            .bind(withdrawal.status)
            .bind(withdrawal.requested_at)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(created)
    }

    async fn get_withdrawal(&self, withdrawal_id: Uuid) -> Result<Option<Withdrawal>, Error> {
        let sql = format!("SELECT {} FROM withdrawals WHERE id = $1", WITHDRAWAL_COLUMNS);
        sqlx::query_as::<_, Withdrawal>(&sql)
            .bind(withdrawal_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn transition_withdrawal(
        &self,
        withdrawal_id: Uuid,
        target: WithdrawalStatus,
        processed_by: Option<Uuid>,
        failure_reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Option<TransitionOutcome<Withdrawal>>, Error> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {} FROM withdrawals WHERE id = $1 FOR UPDATE", WITHDRAWAL_COLUMNS);
        let current = sqlx::query_as::<_, Withdrawal>(&sql)
            .bind(withdrawal_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(mut current) = current else {
            return Ok(None);
        };

        let outcome = match current.status.plan(target) {
            TransitionPlan::NoOp => TransitionOutcome::Unchanged(current),
            TransitionPlan::Rejected => TransitionOutcome::Rejected(current),
            TransitionPlan::Apply(path) => {
                current.apply_path(&path, processed_by, failure_reason, at);
                let sql = format!(
                    r#"
                    UPDATE withdrawals
                    SET status = $2, processed_by = $3, failure_reason = $4, processed_at = $5
                    WHERE id = $1
                    RETURNING {}
                    "#,
                    WITHDRAWAL_COLUMNS
                );
                let updated = sqlx::query_as::<_, Withdrawal>(&sql)
                    .bind(current.id)
                    .bind(current.status)
                    .bind(current.processed_by)
                    .bind(&current.failure_reason)
                    .bind(current.processed_at)
                    .fetch_one(&mut *tx)
                    .await?;
                TransitionOutcome::Applied(updated)
            }
        };

        tx.commit().await?;
        Ok(Some(outcome))
    }

    async fn list_user_withdrawals(&self, user_id: Uuid) -> Result<Vec<Withdrawal>, Error> {
        let sql = format!(
            "SELECT {} FROM withdrawals WHERE user_id = $1 ORDER BY requested_at DESC",
            WITHDRAWAL_COLUMNS
        );
        sqlx::query_as::<_, Withdrawal>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
    }

    async fn get_balance(&self, user_id: Uuid) -> Result<Balance, Error> {
        let mut conn = self.pool.acquire().await?;
        derive_balance(&mut conn, user_id).await
    }

    async fn add_payment_method(&self, method: &PaymentMethod) -> Result<PaymentMethod, Error> {
        let mut tx = self.pool.begin().await?;

        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payment_methods WHERE user_id = $1")
            .bind(method.user_id)
            .fetch_one(&mut *tx)
            .await?;

        let make_default = method.is_default || existing == 0;
        if make_default {
            sqlx::query("UPDATE payment_methods SET is_default = FALSE WHERE user_id = $1")
                .bind(method.user_id)
                .execute(&mut *tx)
                .await?;
        }

        let sql = format!(
            r#"
            INSERT INTO payment_methods
            (id, user_id, method_type, card_token, account_reference, last_four, label, is_default, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            PAYMENT_METHOD_COLUMNS
        );
        let created = sqlx::query_as::<_, PaymentMethod>(&sql)
            .bind(method.id)
            .bind(method.user_id)
            .bind(method.method_type)
            .bind(&method.card_token)
            .bind(&method.account_reference)
            .bind(&method.last_four)
            .bind(&method.label)
            .bind(make_default)
            .bind(method.created_at)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(created)
    }

    async fn list_payment_methods(&self, user_id: Uuid) -> Result<Vec<PaymentMethod>, Error> {
        let sql = format!(
            r#"
            SELECT {} FROM payment_methods
            WHERE user_id = $1
            ORDER BY is_default DESC, created_at DESC
            "#,
            PAYMENT_METHOD_COLUMNS
        );
        sqlx::query_as::<_, PaymentMethod>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
    }

    async fn set_default_payment_method(
        &self,
        user_id: Uuid,
        method_id: Uuid,
    ) -> Result<Option<PaymentMethod>, Error> {
        let mut tx = self.pool.begin().await?;

        let owned: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM payment_methods WHERE id = $1 AND user_id = $2 FOR UPDATE",
        )
        .bind(method_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
        if owned.is_none() {
            return Ok(None);
        }

        sqlx::query("UPDATE payment_methods SET is_default = FALSE WHERE user_id = $1 AND id <> $2")
            .bind(user_id)
            .bind(method_id)
            .execute(&mut *tx)
            .await?;

        let sql = format!(
            "UPDATE payment_methods SET is_default = TRUE WHERE id = $1 RETURNING {}",
            PAYMENT_METHOD_COLUMNS
        );
        let updated = sqlx::query_as::<_, PaymentMethod>(&sql)
            .bind(method_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(updated))
    }

    async fn record_audit_event(&self, event: &AuditEvent) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, actor_id, action, resource_type, resource_id, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.id)
        .bind(event.actor_id)
        .bind(&event.action)
        .bind(&event.resource_type)
        .bind(event.resource_id)
        .bind(&event.metadata)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
