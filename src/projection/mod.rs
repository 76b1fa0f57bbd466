//! Counter projection for conversions
//!
//! Rollup counters on UserOffer, Offer and User move only through these
//! deltas, and stores apply them as `column = column + delta` inside the same
//! transaction that writes the conversion row.

use crate::models::ConversionStatus;

/// Increments to apply to the three rollup owners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterDelta {
    pub user_offer_conversions: i64,
    pub user_offer_earnings: i64,
    pub offer_conversions: i64,
    pub user_conversions: i64,
    pub user_earnings: i64,
}

impl CounterDelta {
    /// Delta for inserting a conversion with the given status.
    ///
    /// Earnings only move for approved conversions; pending ones are credited
    /// later by [`CounterDelta::for_approval`], rejected ones never.
    pub fn for_insert(status: ConversionStatus, commission: i64) -> Self {
        let earned = if status == ConversionStatus::Approved {
            commission
        } else {
            0
        };

        Self {
            user_offer_conversions: 1,
            user_offer_earnings: earned,
            offer_conversions: 1,
            user_conversions: 1,
            user_earnings: earned,
        }
    }

    /// Delta for a `pending -> approved` transition
    pub fn for_approval(commission: i64) -> Self {
        Self {
            user_offer_earnings: commission,
            user_earnings: commission,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approved_insert_credits_earnings() {
        let delta = CounterDelta::for_insert(ConversionStatus::Approved, 500);
        assert_eq!(delta.user_conversions, 1);
        assert_eq!(delta.offer_conversions, 1);
        assert_eq!(delta.user_offer_conversions, 1);
        assert_eq!(delta.user_earnings, 500);
        assert_eq!(delta.user_offer_earnings, 500);
    }

    #[test]
    fn test_pending_and_rejected_insert_only_count() {
        for status in [ConversionStatus::Pending, ConversionStatus::Rejected] {
            let delta = CounterDelta::for_insert(status, 500);
            assert_eq!(delta.user_conversions, 1);
            assert_eq!(delta.user_earnings, 0);
            assert_eq!(delta.user_offer_earnings, 0);
        }
    }

    #[test]
    fn test_approval_only_moves_earnings() {
        let delta = CounterDelta::for_approval(250);
        assert_eq!(delta.user_conversions, 0);
        assert_eq!(delta.offer_conversions, 0);
        assert_eq!(delta.user_earnings, 250);
        assert_eq!(delta.user_offer_earnings, 250);
    }
}
