//! KYC escalation
//!
//! Users whose traffic looks like fraud are moved from `kyc_status = none` to
//! `required`. The transition only ever advances from `none`; verified and
//! rejected users are left alone. Provider verdicts arrive through the webhook.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::store::{Store, StoreResult};

const VPN_USAGE_LIMIT: i64 = 10;
const SHARED_IP_USERS_LIMIT: i64 = 3;
const CONVERSION_RATE_LIMIT: f64 = 0.5;
const CONVERSION_RATE_MIN_CLICKS: i64 = 100;
const CLICK_VELOCITY_LIMIT: i64 = 100;
const COMPOSITE_SCORE_LIMIT: f64 = 70.0;

/// Fraud indicators aggregated over a user's traffic
#[derive(Debug, Clone, Default, Serialize)]
pub struct KycIndicators {
    pub user_id: Uuid,
    /// Clicks that came from datacenter or VPN ranges
    pub vpn_usage_count: i64,
    /// Other users seen on the same IPs
    pub shared_ip_users: i64,
    pub total_clicks: i64,
    pub total_conversions: i64,
    /// Clicks in the last minute
    pub click_velocity: i64,
}

impl KycIndicators {
    pub fn conversion_rate(&self) -> f64 {
        if self.total_clicks == 0 {
            return 0.0;
        }
        self.total_conversions as f64 / self.total_clicks as f64
    }

    pub fn composite_score(&self) -> f64 {
        let mut score = self.vpn_usage_count as f64 * 2.0;
        score += self.shared_ip_users as f64 * 15.0;

        let rate = self.conversion_rate();
        if rate > 0.3 {
            score += rate * 50.0;
        }

        if self.click_velocity > 50 {
            score += (self.click_velocity - 50) as f64 * 0.5;
        }

        score
    }

    /// Reasons that require KYC. Empty when the user is in good standing.
    pub fn escalation_reasons(&self) -> Vec<String> {
        let mut reasons = Vec::new();

        if self.vpn_usage_count > VPN_USAGE_LIMIT {
            reasons.push(format!("vpn_usage:{}", self.vpn_usage_count));
        }
        if self.shared_ip_users >= SHARED_IP_USERS_LIMIT {
            reasons.push(format!("shared_ip_users:{}", self.shared_ip_users));
        }
        if self.total_clicks >= CONVERSION_RATE_MIN_CLICKS
            && self.conversion_rate() > CONVERSION_RATE_LIMIT
        {
            reasons.push(format!("conversion_rate:{:.2}", self.conversion_rate()));
        }
        if self.click_velocity > CLICK_VELOCITY_LIMIT {
            reasons.push(format!("click_velocity:{}", self.click_velocity));
        }

        let score = self.composite_score();
        if score > COMPOSITE_SCORE_LIMIT {
            reasons.push(format!("composite_score:{:.1}", score));
        }

        reasons
    }
}

/// Outcome of one evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KycOutcome {
    /// Nothing suspicious
    Clear,
    /// Suspicious, and the user was moved to `required` by this call
    Escalated(Vec<String>),
    /// Suspicious, but the user was not in `none`
    Unchanged(Vec<String>),
}

pub struct KycService {
    store: Arc<dyn Store>,
}

impl KycService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Re-evaluate a user's indicators and escalate if needed
    pub async fn evaluate(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<KycOutcome> {
        let indicators = self.store.kyc_indicators(user_id, now).await?;
        let reasons = indicators.escalation_reasons();

        if reasons.is_empty() {
            return Ok(KycOutcome::Clear);
        }

        if self.store.mark_kyc_required(user_id, now).await? {
            tracing::warn!(
                target: "audit",
                event_type = "kyc_required",
                resource = %user_id,
                action = "escalate",
                success = true,
                details = %serde_json::json!({
                    "reasons": reasons,
                    "composite_score": indicators.composite_score(),
                }),
                "User escalated to KYC"
            );
            Ok(KycOutcome::Escalated(reasons))
        } else {
            Ok(KycOutcome::Unchanged(reasons))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_user_has_no_reasons() {
        let indicators = KycIndicators {
            total_clicks: 40,
            total_conversions: 2,
            vpn_usage_count: 3,
            ..Default::default()
        };
        assert!(indicators.escalation_reasons().is_empty());
    }

    #[test]
    fn test_vpn_usage_threshold() {
        let mut indicators = KycIndicators {
            vpn_usage_count: 10,
            ..Default::default()
        };
        assert!(indicators.escalation_reasons().is_empty());

        indicators.vpn_usage_count = 11;
        assert_eq!(indicators.escalation_reasons(), vec!["vpn_usage:11"]);
    }

    #[test]
    fn test_shared_ip_users_threshold() {
        let indicators = KycIndicators {
            shared_ip_users: 3,
            ..Default::default()
        };
        let reasons = indicators.escalation_reasons();
        assert!(reasons.contains(&"shared_ip_users:3".to_string()));
    }

    #[test]
    fn test_conversion_rate_needs_enough_clicks() {
        let few = KycIndicators {
            total_clicks: 10,
            total_conversions: 9,
            ..Default::default()
        };
        assert!(!few
            .escalation_reasons()
            .iter()
            .any(|r| r.starts_with("conversion_rate")));

        let many = KycIndicators {
            total_clicks: 100,
            total_conversions: 60,
            ..Default::default()
        };
        assert!(many
            .escalation_reasons()
            .iter()
            .any(|r| r.starts_with("conversion_rate")));
    }

    #[test]
    fn test_composite_score() {
        let indicators = KycIndicators {
            vpn_usage_count: 5,
            shared_ip_users: 2,
            total_clicks: 10,
            total_conversions: 4,
            click_velocity: 60,
            ..Default::default()
        };
        // 10 + 30 + 20 + 5
        assert!((indicators.composite_score() - 65.0).abs() < 1e-9);
        assert!(indicators.escalation_reasons().is_empty());
    }

    #[test]
    fn test_velocity_threshold() {
        let indicators = KycIndicators {
            click_velocity: 101,
            ..Default::default()
        };
        assert!(indicators
            .escalation_reasons()
            .contains(&"click_velocity:101".to_string()));
    }
}
