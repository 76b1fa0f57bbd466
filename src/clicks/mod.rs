//! Click ingestion
//!
//! Every click ends in a redirect, whatever happened on the way: unknown or
//! expired codes and inactive enrollments go to the fallback page, blocked
//! and duplicate clicks still reach the offer. Callers cannot tell the
//! outcomes apart from the response.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use reqwest::Url;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditEvent, Severity};
use crate::cache::Cache;
use crate::fraud::{FraudCheckResult, FraudScorer, IngestionContext};
use crate::geoip::{GeoIpLookup, LOOKUP_TIMEOUT};
use crate::lock::{click_fingerprint_key, CLICK_FINGERPRINT_TTL};
use crate::models::{Click, NewClick, UserOfferStatus};
use crate::security::Signer;
use crate::store::Store;
use crate::tracking::TrackingCodeService;
use crate::worker::{Job, JobQueue};

/// How a click names its enrollment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickTarget {
    TrackingCode(String),
    UserOffer(Uuid),
}

/// Result of ingesting one click
#[derive(Debug, Clone)]
pub struct ClickOutcome {
    pub redirect_url: String,
    /// Persisted click, if any
    pub click: Option<Click>,
    pub duplicate: bool,
    pub fraud: Option<FraudCheckResult>,
}

impl ClickOutcome {
    fn fallback(url: &str) -> Self {
        Self {
            redirect_url: url.to_string(),
            click: None,
            duplicate: false,
            fraud: None,
        }
    }
}

/// Append `click_id` to a destination so the advertiser can echo it back
pub fn with_click_id(destination: &str, click_id: Uuid) -> String {
    match Url::parse(destination) {
        Ok(mut url) => {
            url.query_pairs_mut()
                .append_pair("click_id", &click_id.to_string());
            url.to_string()
        }
        Err(_) => destination.to_string(),
    }
}

pub struct ClickService {
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache>,
    tracking: Arc<TrackingCodeService>,
    scorer: FraudScorer,
    geoip: Arc<dyn GeoIpLookup>,
    signer: Signer,
    jobs: JobQueue,
    fallback_url: String,
    tracking_code_max_age: Duration,
    fingerprint_salt: String,
}

impl ClickService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn Cache>,
        tracking: Arc<TrackingCodeService>,
        scorer: FraudScorer,
        geoip: Arc<dyn GeoIpLookup>,
        signer: Signer,
        jobs: JobQueue,
        fallback_url: String,
        tracking_code_max_age: Duration,
    ) -> Self {
        let mut salt = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut salt);

        Self {
            store,
            cache,
            tracking,
            scorer,
            geoip,
            signer,
            jobs,
            fallback_url,
            tracking_code_max_age,
            fingerprint_salt: hex::encode(salt),
        }
    }

    /// Fingerprint collapsing repeats of the same click within a minute
    pub fn fingerprint(&self, user_offer_id: Uuid, ctx: &IngestionContext, now: DateTime<Utc>) -> String {
        let data = format!(
            "{}:{}:{}:{}:{}",
            user_offer_id,
            self.signer.hash_ip(&ctx.client_ip),
            self.signer.hash_user_agent(&ctx.user_agent),
            now.timestamp().div_euclid(60),
            self.fingerprint_salt,
        );
        let mut digest = hex::encode(Sha256::digest(data.as_bytes()));
        digest.truncate(24);
        digest
    }

    pub async fn ingest(
        &self,
        target: ClickTarget,
        ctx: IngestionContext,
        now: DateTime<Utc>,
    ) -> ClickOutcome {
        let ip_hash = self.signer.hash_ip(&ctx.client_ip);

        // 1. Resolve the enrollment
        let user_offer_id = match target {
            ClickTarget::UserOffer(id) => id,
            ClickTarget::TrackingCode(code) => {
                match self
                    .tracking
                    .validate(&code, self.tracking_code_max_age, now)
                    .await
                {
                    Ok(id) => id,
                    Err(e) => {
                        AuditEvent::new("click_rejected", "click")
                            .ip_hash(ip_hash)
                            .resource("tracking_code")
                            .details(json!({ "reason": e.to_string() }))
                            .emit(Severity::Info);
                        return ClickOutcome::fallback(&self.fallback_url);
                    }
                }
            }
        };

        let enrollment = match self.store.get_enrollment(user_offer_id).await {
            Ok(Some(enrollment)) if enrollment.user_offer.status == UserOfferStatus::Active => {
                enrollment
            }
            Ok(_) => {
                AuditEvent::new("click_rejected", "click")
                    .ip_hash(ip_hash)
                    .resource(user_offer_id.to_string())
                    .details(json!({ "reason": "inactive_or_unknown_user_offer" }))
                    .emit(Severity::Info);
                return ClickOutcome::fallback(&self.fallback_url);
            }
            Err(e) => {
                tracing::error!(error = %e, %user_offer_id, "Failed to load enrollment for click");
                return ClickOutcome::fallback(&self.fallback_url);
            }
        };
        let destination = enrollment.offer.destination_url.clone();

        // 2. Score
        let fraud = self.scorer.score(&ctx, user_offer_id).await;
        if fraud.should_block || fraud.should_flag {
            AuditEvent::new(
                if fraud.should_block { "click_blocked" } else { "click_flagged" },
                "click",
            )
            .ip_hash(ip_hash.clone())
            .resource(user_offer_id.to_string())
            .success(!fraud.should_block)
            .details(json!({ "risk_score": fraud.risk_score, "reasons": fraud.reasons }))
            .emit(Severity::Warn);
        }

        // 3. Deduplicate
        let fingerprint = self.fingerprint(user_offer_id, &ctx, now);
        match self
            .cache
            .set_nx(&click_fingerprint_key(&fingerprint), "1", CLICK_FINGERPRINT_TTL)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(%user_offer_id, "Duplicate click, not recorded");
                return ClickOutcome {
                    redirect_url: destination,
                    click: None,
                    duplicate: true,
                    fraud: Some(fraud),
                };
            }
            Err(e) => {
                tracing::warn!(
                    event_type = "cache_degraded",
                    error = %e,
                    "Click deduplication skipped"
                );
            }
        }

        // 4. Country, best effort
        let country = tokio::time::timeout(LOOKUP_TIMEOUT, self.geoip.country(&ctx.client_ip))
            .await
            .ok()
            .flatten();

        // 5. Persist with counters
        let new_click = NewClick {
            user_offer_id,
            clicked_at: now,
            ip_hash,
            user_agent_hash: self.signer.hash_user_agent(&ctx.user_agent),
            country,
            fraud_score: fraud.risk_score,
            fraud_flags: fraud.reasons.clone(),
            is_bot: fraud.should_block,
            is_vpn: fraud.is_vpn,
        };

        let click = match self
            .store
            .record_click(
                new_click,
                enrollment.offer.id,
                enrollment.user_offer.user_id,
            )
            .await
        {
            Ok(click) => click,
            Err(e) => {
                tracing::error!(error = %e, %user_offer_id, "Failed to record click");
                return ClickOutcome {
                    redirect_url: destination,
                    click: None,
                    duplicate: false,
                    fraud: Some(fraud),
                };
            }
        };

        self.jobs.enqueue(Job::EvaluateKyc {
            user_id: enrollment.user_offer.user_id,
            event_id: format!("click:{}", click.id),
        });

        ClickOutcome {
            redirect_url: with_click_id(&destination, click.id),
            click: Some(click),
            duplicate: false,
            fraud: Some(fraud),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_click_id() {
        let id = Uuid::nil();
        assert_eq!(
            with_click_id("https://shop.example.com/landing?ref=abc", id),
            format!("https://shop.example.com/landing?ref=abc&click_id={}", id)
        );
        assert_eq!(
            with_click_id("https://shop.example.com/", id),
            format!("https://shop.example.com/?click_id={}", id)
        );
        assert_eq!(with_click_id("not a url", id), "not a url");
    }
}
