//! Cancellation refund rules.

use chrono::{DateTime, Utc};
use rentme_core::error::DomainError;
use rentme_core::money::Money;
use serde::{Deserialize, Serialize};

/// The refund rules copied onto a booking when it is created. Later changes
/// to the listing's policy never reach an existing booking.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CancellationPolicySnapshot {
    /// Empty means "no policy": cancellation is always free.
    pub policy_id: String,
    pub free_cancellation_until: Option<DateTime<Utc>>,
    pub pre_check_in_penalty_percent: i32,
    pub post_check_in_penalty_percent: i32,
}

/// Refund and penalty of one cancellation, in the booking's currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundQuote {
    pub refund: Money,
    pub penalty: Money,
}

fn clamp_percent(percent: i32) -> i64 {
    i64::from(percent.clamp(0, 100))
}

impl CancellationPolicySnapshot {
    /// Builds a snapshot, clamping both percentages to `[0, 100]`.
    #[must_use]
    pub fn new(
        policy_id: &str,
        free_cancellation_until: Option<DateTime<Utc>>,
        pre_check_in_penalty_percent: i32,
        post_check_in_penalty_percent: i32,
    ) -> Self {
        Self {
            policy_id: policy_id.to_owned(),
            free_cancellation_until,
            pre_check_in_penalty_percent: pre_check_in_penalty_percent.clamp(0, 100),
            post_check_in_penalty_percent: post_check_in_penalty_percent.clamp(0, 100),
        }
    }

    /// Penalty percentage that applies to a cancellation at `cancel_at`.
    #[must_use]
    pub fn penalty_percent(&self, cancel_at: DateTime<Utc>, check_in: DateTime<Utc>) -> i64 {
        if self.policy_id.is_empty() {
            return 0;
        }
        if cancel_at < check_in {
            let within_free_window = self
                .free_cancellation_until
                .is_some_and(|until| cancel_at < until);
            if within_free_window {
                0
            } else {
                clamp_percent(self.pre_check_in_penalty_percent)
            }
        } else {
            clamp_percent(self.post_check_in_penalty_percent)
        }
    }

    /// Splits `total` into refund and penalty. The penalty truncates toward
    /// zero, so the refund is never negative.
    ///
    /// # Errors
    ///
    /// Returns a money error if the penalty does not fit the amount range.
    pub fn calculate_refund(
        &self,
        total: &Money,
        cancel_at: DateTime<Utc>,
        check_in: DateTime<Utc>,
    ) -> Result<RefundQuote, DomainError> {
        let percent = self.penalty_percent(cancel_at, check_in);
        // Widened so the multiply cannot overflow before the divide.
        let amount = i128::from(total.amount) * i128::from(percent) / 100;
        let penalty = Money {
            amount: i64::try_from(amount)
                .map_err(|_| DomainError::Validation("money overflow".into()))?,
            currency: total.currency.clone(),
        };
        let refund = total.checked_sub(&penalty)?;
        Ok(RefundQuote { refund, penalty })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone};
    use proptest::prelude::*;

    use super::*;

    fn check_in() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 10, 0, 0, 0).unwrap()
    }

    fn moderate() -> CancellationPolicySnapshot {
        CancellationPolicySnapshot::new(
            "moderate",
            Some(check_in() - TimeDelta::hours(48)),
            20,
            100,
        )
    }

    fn xts(amount: i64) -> Money {
        Money::new(amount, "XTS").unwrap()
    }

    #[test]
    fn test_cancel_before_cutoff_is_free() {
        // Arrange
        let policy = moderate();
        let cancel_at = check_in() - TimeDelta::hours(72);

        // Act
        let quote = policy
            .calculate_refund(&xts(11_000), cancel_at, check_in())
            .unwrap();

        // Assert
        assert_eq!(quote.penalty, xts(0));
        assert_eq!(quote.refund, xts(11_000));
    }

    #[test]
    fn test_cancel_after_cutoff_pays_pre_check_in_penalty() {
        // Arrange
        let policy = moderate();
        let cancel_at = check_in() - TimeDelta::hours(10);

        // Act
        let quote = policy
            .calculate_refund(&xts(11_000), cancel_at, check_in())
            .unwrap();

        // Assert
        assert_eq!(quote.penalty, xts(2_200));
        assert_eq!(quote.refund, xts(8_800));
    }

    #[test]
    fn test_cancel_at_check_in_pays_post_check_in_penalty() {
        let quote = moderate()
            .calculate_refund(&xts(500), check_in(), check_in())
            .unwrap();
        assert_eq!(quote.penalty, xts(500));
        assert_eq!(quote.refund, xts(0));
    }

    #[test]
    fn test_empty_policy_id_never_penalises() {
        let policy = CancellationPolicySnapshot {
            policy_id: String::new(),
            pre_check_in_penalty_percent: 50,
            post_check_in_penalty_percent: 100,
            ..CancellationPolicySnapshot::default()
        };
        let quote = policy
            .calculate_refund(&xts(1_000), check_in(), check_in())
            .unwrap();
        assert_eq!(quote.refund, xts(1_000));
    }

    #[test]
    fn test_penalty_truncates_toward_zero() {
        let policy = CancellationPolicySnapshot::new("strict", None, 33, 33);
        let quote = policy
            .calculate_refund(&xts(100), check_in() - TimeDelta::hours(1), check_in())
            .unwrap();
        assert_eq!(quote.penalty, xts(33));
        assert_eq!(quote.refund, xts(67));
    }

    #[test]
    fn test_out_of_range_percentages_are_clamped() {
        let policy = CancellationPolicySnapshot {
            policy_id: "weird".into(),
            free_cancellation_until: None,
            pre_check_in_penalty_percent: 250,
            post_check_in_penalty_percent: -10,
        };
        let before = check_in() - TimeDelta::hours(1);
        assert_eq!(policy.penalty_percent(before, check_in()), 100);
        assert_eq!(policy.penalty_percent(check_in(), check_in()), 0);
    }

    #[test]
    fn test_penalty_on_huge_total_does_not_overflow() {
        // Arrange
        let policy = CancellationPolicySnapshot::new("strict", None, 50, 50);
        let total = xts(i64::MAX / 10);

        // Act
        let quote = policy
            .calculate_refund(&total, check_in(), check_in())
            .unwrap();

        // Assert
        assert_eq!(quote.penalty, xts(i64::MAX / 20));
        assert_eq!(quote.penalty.amount + quote.refund.amount, i64::MAX / 10);
    }

    proptest! {
        #[test]
        fn prop_refund_plus_penalty_is_total(
            total in 0i64..10_000_000,
            pre in -50i32..200,
            post in -50i32..200,
            offset_hours in -200i64..200,
        ) {
            let policy = CancellationPolicySnapshot {
                policy_id: "p".into(),
                free_cancellation_until: Some(check_in() - TimeDelta::hours(48)),
                pre_check_in_penalty_percent: pre,
                post_check_in_penalty_percent: post,
            };
            let quote = policy
                .calculate_refund(&xts(total), check_in() + TimeDelta::hours(offset_hours), check_in())
                .unwrap();
            prop_assert!(quote.refund.amount >= 0);
            prop_assert!(quote.penalty.amount >= 0);
            prop_assert_eq!(quote.refund.amount + quote.penalty.amount, total);
        }
    }
}
