// service/risk_service.rs
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};

use crate::config::LedgerPolicy;

const NEW_ACCOUNT_WEIGHT: f64 = 0.3;
const YOUNG_ACCOUNT_WEIGHT: f64 = 0.1;
const HIGH_VALUE_WEIGHT: f64 = 0.2;
const VELOCITY_WEIGHT: f64 = 0.2;

/// Inputs gathered by the caller before scoring. Anything unknown is `None` and
/// contributes nothing.
#[derive(Debug, Clone, Default)]
pub struct RiskSignals {
    pub account_created_at: Option<DateTime<Utc>>,
    pub amount: BigDecimal,
    pub recent_transaction_count: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct RiskScorer {
    high_value_threshold: BigDecimal,
    velocity_limit: i64,
    block_threshold: f64,
}

impl RiskScorer {
    pub fn new(policy: &LedgerPolicy) -> Self {
        Self {
            high_value_threshold: policy.high_value_threshold.clone(),
            velocity_limit: policy.velocity_limit,
            block_threshold: policy.risk_block_threshold,
        }
    }

    /// Deterministic score in `[0, 1]`, rounded to 4 decimals.
    pub fn score(&self, signals: &RiskSignals, now: DateTime<Utc>) -> f64 {
        let mut score = 0.0;

        if let Some(created_at) = signals.account_created_at {
            let age = now - created_at;
            if age < Duration::days(1) {
                score += NEW_ACCOUNT_WEIGHT;
            } else if age < Duration::days(7) {
                score += YOUNG_ACCOUNT_WEIGHT;
            }
        }

        if signals.amount > self.high_value_threshold {
            score += HIGH_VALUE_WEIGHT;
        }

        if let Some(count) = signals.recent_transaction_count {
            if self.velocity_limit > 0 && count >= self.velocity_limit {
                score += VELOCITY_WEIGHT;
            }
        }

        let clamped: f64 = score.clamp(0.0, 1.0);
        (clamped * 10_000.0).round() / 10_000.0
    }

    pub fn is_blocked(&self, score: f64) -> bool {
        score > self.block_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> RiskScorer {
        RiskScorer::new(&LedgerPolicy::default())
    }

    fn signals(age: Duration, amount: i64, recent: Option<i64>, now: DateTime<Utc>) -> RiskSignals {
        RiskSignals {
            account_created_at: Some(now - age),
            amount: BigDecimal::from(amount),
            recent_transaction_count: recent,
        }
    }

    #[test]
    fn new_account_with_high_value_scores_half() {
        let now = Utc::now();
        let score = scorer().score(&signals(Duration::hours(12), 150_000, None, now), now);
        assert_eq!(score, 0.5);
        assert!(!scorer().is_blocked(score));
    }

    #[test]
    fn established_account_with_small_amount_scores_zero() {
        let now = Utc::now();
        let score = scorer().score(&signals(Duration::days(30), 5_000, Some(0), now), now);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn young_account_adds_a_little() {
        let now = Utc::now();
        assert_eq!(scorer().score(&signals(Duration::days(3), 5_000, None, now), now), 0.1);
    }

    #[test]
    fn velocity_reaching_limit_adds_weight() {
        let now = Utc::now();
        let s = scorer();
        assert_eq!(s.score(&signals(Duration::days(30), 5_000, Some(9), now), now), 0.0);
        assert_eq!(s.score(&signals(Duration::days(30), 5_000, Some(10), now), now), 0.2);
    }

    #[test]
    fn all_signals_stay_within_bounds_and_block() {
        let now = Utc::now();
        let s = scorer();
        let score = s.score(&signals(Duration::minutes(5), 1_000_000, Some(50), now), now);
        assert!((0.0..=1.0).contains(&score));
        assert_eq!(score, 0.7);
        assert!(!s.is_blocked(score));
        assert!(s.is_blocked(0.76));
    }

    #[test]
    fn higher_amounts_never_lower_the_score() {
        let now = Utc::now();
        let s = scorer();
        let mut previous = 0.0;
        for amount in [100, 1_000, 100_000, 100_001, 5_000_000] {
            let score = s.score(&signals(Duration::days(2), amount, None, now), now);
            assert!(score >= previous, "score dropped at {}", amount);
            previous = score;
        }
    }

    #[test]
    fn missing_signals_contribute_nothing() {
        let now = Utc::now();
        let score = scorer().score(
            &RiskSignals {
                amount: BigDecimal::from(500),
                ..Default::default()
            },
            now,
        );
        assert_eq!(score, 0.0);
    }
}
