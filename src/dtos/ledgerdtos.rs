// dtos/ledgerdtos.rs
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::LedgerPolicy,
    models::ledgermodels::*,
    service::payment_provider::GatewayStatus,
    utils::money::mask_account,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(message: &str, data: T) -> Self {
        Self {
            success: true,
            message: message.to_string(),
            data: Some(data),
        }
    }
}

fn default_transaction_type() -> TransactionType {
    TransactionType::Payment
}

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentDto {
    pub payee_id: Uuid,
    pub amount: BigDecimal,
    #[serde(default = "default_transaction_type")]
    pub transaction_type: TransactionType,
    pub project_id: Option<Uuid>,
    pub milestone_id: Option<Uuid>,
    #[validate(length(max = 500, message = "Description must be at most 500 characters"))]
    pub description: Option<String>,
}

#[derive(Validate, Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListQueryDto {
    #[validate(range(min = 1, max = 10000, message = "Page must be between 1 and 10000"))]
    pub page: Option<i64>,
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    pub limit: Option<i64>,
}

impl ListQueryDto {
    pub fn limit_offset(&self) -> (i64, i64) {
        let limit = self.limit.unwrap_or(20).clamp(1, 100);
        let page = self.page.unwrap_or(1).max(1);
        (limit, (page - 1).saturating_mul(limit))
    }
}

/// Client-facing view of a transaction. Risk data and request metadata stay internal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionDto {
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
    pub gateway_reference: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TransactionDto {
    pub fn filter_transaction(t: &Transaction) -> Self {
        TransactionDto {
            id: t.id,
            payer_id: t.payer_id,
            payee_id: t.payee_id,
            project_id: t.project_id,
            milestone_id: t.milestone_id,
            escrow_id: t.escrow_id,
            amount: t.amount.clone(),
            currency: t.currency.clone(),
            transaction_type: t.transaction_type,
            status: t.status,
            platform_fee_amount: t.platform_fee_amount.clone(),
            net_amount: t.net_amount.clone(),
            gateway_reference: t.gateway_reference.clone(),
            description: t.description.clone(),
            created_at: t.created_at,
            updated_at: t.updated_at,
            completed_at: t.completed_at,
        }
    }

    pub fn filter_transactions(transactions: &[Transaction]) -> Vec<Self> {
        transactions.iter().map(TransactionDto::filter_transaction).collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentCreatedDto {
    pub transaction: TransactionDto,
    pub checkout_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessPaymentDto {
    pub gateway_status: GatewayStatus,
}

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct FundEscrowDto {
    pub project_id: Uuid,
    pub total_amount: BigDecimal,
    pub fee_percentage: Option<BigDecimal>,
}

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseEscrowDto {
    pub escrow_id: Uuid,
    #[validate(length(min = 1, max = 500, message = "Reason must be between 1 and 500 characters"))]
    pub reason: Option<String>,
}

#[derive(Validate, Debug, Clone, Default, Serialize, Deserialize)]
pub struct EscrowReasonDto {
    #[validate(length(min = 1, max = 500, message = "Reason must be between 1 and 500 characters"))]
    pub reason: Option<String>,
}

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct ExtendEscrowDto {
    #[validate(range(min = 1, max = 90, message = "Extension must be between 1 and 90 days"))]
    pub days: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AutoReleaseResultDto {
    pub released: usize,
    pub escrow_ids: Vec<Uuid>,
}

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct CreateWithdrawalDto {
    pub amount: BigDecimal,
    pub withdrawal_method: WithdrawalMethod,
    #[validate(length(min = 1, max = 100, message = "Destination is required"))]
    pub destination: String,
    #[validate(length(min = 2, max = 100, message = "Account holder must be between 2 and 100 characters"))]
    pub account_holder: Option<String>,
    #[validate(length(min = 2, max = 100, message = "Bank name must be between 2 and 100 characters"))]
    pub bank_name: Option<String>,
}

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct ProcessWithdrawalDto {
    pub status: WithdrawalStatus,
    #[validate(length(max = 500, message = "Failure reason must be at most 500 characters"))]
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalDto {
    pub id: Uuid,
    pub requested_amount: BigDecimal,
    pub processing_fee: BigDecimal,
    pub final_amount: BigDecimal,
    pub withdrawal_method: WithdrawalMethod,
    pub destination: String,
    pub account_holder: Option<String>,
    pub bank_name: Option<String>,
    pub status: WithdrawalStatus,
    pub failure_reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl WithdrawalDto {
    pub fn filter_withdrawal(w: &Withdrawal) -> Self {
        WithdrawalDto {
            id: w.id,
            requested_amount: w.requested_amount.clone(),
            processing_fee: w.processing_fee.clone(),
            final_amount: w.final_amount.clone(),
            withdrawal_method: w.withdrawal_method,
            destination: mask_account(&w.destination),
            account_holder: w.account_holder.clone(),
            bank_name: w.bank_name.clone(),
            status: w.status,
            failure_reason: w.failure_reason.clone(),
            requested_at: w.requested_at,
            processed_at: w.processed_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WithdrawalLimitsDto {
    pub min: BigDecimal,
    pub max: BigDecimal,
    pub fee_rate: BigDecimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceDto {
    pub available_balance: BigDecimal,
    pub pending_balance: BigDecimal,
    pub total_earned: BigDecimal,
    pub total_spent: BigDecimal,
    pub withdrawal_limits: WithdrawalLimitsDto,
}

impl BalanceDto {
    pub fn new(balance: Balance, policy: &LedgerPolicy) -> Self {
        BalanceDto {
            available_balance: balance.available_balance,
            pending_balance: balance.pending_balance,
            total_earned: balance.total_earned,
            total_spent: balance.total_spent,
            withdrawal_limits: WithdrawalLimitsDto {
                min: policy.withdrawal_min.clone(),
                max: policy.withdrawal_max.clone(),
                fee_rate: policy.withdrawal_fee_rate.clone(),
            },
        }
    }
}

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct AddPaymentMethodDto {
    pub method_type: PaymentMethodType,
    #[validate(length(min = 1, max = 255, message = "Card token is invalid"))]
    pub card_token: Option<String>,
    #[validate(length(equal = 4, message = "Last four must be exactly 4 digits"))]
    pub card_last_four: Option<String>,
    #[validate(length(min = 6, max = 22, message = "Account reference is invalid"))]
    pub account_reference: Option<String>,
    #[validate(length(max = 50, message = "Label must be at most 50 characters"))]
    pub label: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

/// Only the masked value is ever shown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMethodDto {
    pub id: Uuid,
    pub method_type: PaymentMethodType,
    pub display: String,
    pub last_four: String,
    pub label: Option<String>,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl PaymentMethodDto {
    pub fn filter_method(m: &PaymentMethod) -> Self {
        PaymentMethodDto {
            id: m.id,
            method_type: m.method_type,
            display: format!("**** {}", m.last_four),
            last_four: m.last_four.clone(),
            label: m.label.clone(),
            is_default: m.is_default,
            created_at: m.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_is_bounded() {
        let huge = ListQueryDto {
            page: Some(i64::MAX),
            limit: Some(100),
        };
        assert!(huge.validate().is_err());
        assert_eq!(huge.limit_offset(), (100, i64::MAX));

        let third = ListQueryDto {
            page: Some(3),
            limit: Some(25),
        };
        assert!(third.validate().is_ok());
        assert_eq!(third.limit_offset(), (25, 50));
        assert_eq!(ListQueryDto::default().limit_offset(), (20, 0));
    }

    #[test]
    fn transaction_view_hides_risk_data() {
        let now = Utc::now();
        let t = Transaction {
            id: Uuid::new_v4(),
            payer_id: Uuid::new_v4(),
            payee_id: Uuid::new_v4(),
            project_id: None,
            milestone_id: None,
            escrow_id: None,
            amount: BigDecimal::from(1000),
            currency: "ARS".to_string(),
            transaction_type: TransactionType::Payment,
            status: TransactionStatus::Pending,
            platform_fee_amount: BigDecimal::from(100),
            net_amount: BigDecimal::from(900),
            risk_score: 0.5,
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: Some("curl".to_string()),
            gateway_reference: None,
            description: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        let json = serde_json::to_value(TransactionDto::filter_transaction(&t)).unwrap();
        assert!(json.get("risk_score").is_none());
        assert!(json.get("ip_address").is_none());
        assert_eq!(json["status"], "pending");
    }

    #[test]
    fn list_query_defaults() {
        assert_eq!(ListQueryDto::default().limit_offset(), (20, 0));
        let q = ListQueryDto {
            page: Some(3),
            limit: Some(10),
        };
        assert_eq!(q.limit_offset(), (10, 20));
    }

    #[test]
    fn create_payment_defaults_to_payment_type() {
        let dto: CreatePaymentDto = serde_json::from_value(serde_json::json!({
            "payee_id": Uuid::new_v4(),
            "amount": "1500.50"
        }))
        .unwrap();
        assert_eq!(dto.transaction_type, TransactionType::Payment);
        assert!(dto.validate().is_ok());
    }
}
