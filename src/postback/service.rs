use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use super::model::{ParsedPostback, PostbackRequest};
use crate::audit::{AuditEvent, Severity};
use crate::cache::Cache;
use crate::config::SecurityConfig;
use crate::error::{ApiError, ApiResult};
use crate::lock::{
    click_offer_key, external_id_key, nonce_key, ReplayLock, CLICK_OFFER_TTL, EXTERNAL_ID_TTL,
    NONCE_TTL,
};
use crate::middleware::AuthContext;
use crate::models::{Click, Conversion, ConversionStatus, Enrollment, NewConversion};
use crate::store::{Store, StoreError};
use crate::worker::{Job, JobQueue};

/// Postbacks dated further ahead than this are refused
const MAX_CLOCK_SKEW_MINUTES: i64 = 5;

const RAW_POSTBACK_TTL: std::time::Duration = std::time::Duration::from_secs(7 * 24 * 60 * 60);

/// Result of a processed postback
#[derive(Debug, Clone)]
pub struct PostbackOutcome {
    pub conversion: Conversion,
    /// The conversion was already recorded by an earlier postback
    pub duplicate: bool,
}

pub struct PostbackService {
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache>,
    locks: ReplayLock,
    jobs: JobQueue,
    security: SecurityConfig,
}

impl PostbackService {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn Cache>,
        jobs: JobQueue,
        security: SecurityConfig,
    ) -> Self {
        Self {
            store,
            locks: ReplayLock::new(cache.clone()),
            cache,
            jobs,
            security,
        }
    }

    /// Process one postback. Rejections are terminal; every accepted
    /// postback writes exactly one conversion.
    pub async fn process(
        &self,
        request: &PostbackRequest,
        raw: Value,
        auth: &AuthContext,
        ip_hash: &str,
        now: DateTime<Utc>,
    ) -> ApiResult<PostbackOutcome> {
        // 1. Shape
        let postback = request.parse()?;

        // 2. Freshness
        if let Some(timestamp) = postback.timestamp {
            self.check_timestamp(timestamp, now, ip_hash)?;
        }

        // 3. Nonce, consumed only when unique
        if let Some(nonce) = postback.nonce.as_deref() {
            let seen = self
                .locks
                .exists_or_acquire(&nonce_key(nonce), NONCE_TTL)
                .await?;
            if seen {
                AuditEvent::new("replay_blocked", "postback")
                    .ip_hash(ip_hash)
                    .resource("nonce")
                    .success(false)
                    .emit(Severity::Warn);
                return Err(ApiError::DuplicateNonce);
            }
        }

        // 4. Enrollment
        let enrollment = self.resolve_enrollment(&postback).await?;
        self.check_advertiser(auth, &enrollment)?;
        let user_offer_id = enrollment.user_offer.id;

        // 5. Raw capture
        let external_id = postback
            .external_id
            .clone()
            .unwrap_or_else(|| generated_external_id(user_offer_id, now));
        self.capture_raw(&external_id, &raw, now).await;

        // 6. External id
        if let Some(existing) = self.store.find_conversion_by_external_id(&external_id).await? {
            if existing.user_offer_id != user_offer_id {
                AuditEvent::new("duplicate_conversion", "postback")
                    .ip_hash(ip_hash)
                    .resource(external_id.clone())
                    .success(false)
                    .details(json!({ "lock": "foreign_enrollment" }))
                    .emit(Severity::Warn);
                return Err(ApiError::DuplicateConversion(format!(
                    "Conversion {} already recorded",
                    external_id
                )));
            }
            tracing::info!(
                conversion_id = %existing.id,
                %external_id,
                "Duplicate postback, returning original conversion"
            );
            return Ok(PostbackOutcome {
                conversion: existing,
                duplicate: true,
            });
        }

        if self
            .locks
            .exists_or_acquire(&external_id_key(&external_id), EXTERNAL_ID_TTL)
            .await?
        {
            AuditEvent::new("duplicate_conversion", "postback")
                .ip_hash(ip_hash)
                .resource(external_id.clone())
                .success(false)
                .details(json!({ "lock": "external_id" }))
                .emit(Severity::Warn);
            return Err(ApiError::DuplicateConversion(format!(
                "Conversion {} is already being processed",
                external_id
            )));
        }

        // 7. Click and click+offer lock
        let click = match postback.click_id {
            Some(click_id) => self.store.get_click(click_id).await?,
            None => None,
        };

        if let Some(click) = &click {
            if self
                .locks
                .exists_or_acquire(
                    &click_offer_key(click.id, enrollment.offer.id),
                    CLICK_OFFER_TTL,
                )
                .await?
            {
                AuditEvent::new("duplicate_conversion", "postback")
                    .ip_hash(ip_hash)
                    .resource(click.id.to_string())
                    .success(false)
                    .details(json!({ "lock": "click_offer" }))
                    .emit(Severity::Warn);
                return Err(ApiError::DuplicateConversion(
                    "A conversion was already recorded for this click".to_string(),
                ));
            }

            // 8. Attribution window
            let window_days = self.attribution_window_days(&enrollment);
            if now - click.clicked_at > Duration::days(window_days as i64) {
                AuditEvent::new("attribution_expired", "postback")
                    .ip_hash(ip_hash)
                    .resource(click.id.to_string())
                    .success(false)
                    .details(json!({
                        "clicked_at": click.clicked_at,
                        "window_days": window_days,
                    }))
                    .emit(Severity::Info);
                return Err(ApiError::AttributionExpired { window_days });
            }
        }

        // 9-10. Classify and default
        let new_conversion =
            self.build_conversion(&postback, &enrollment, click.as_ref(), external_id, raw, now);

        if new_conversion.auto_rejected {
            AuditEvent::new("conversion_auto_rejected", "postback")
                .ip_hash(ip_hash)
                .resource(user_offer_id.to_string())
                .success(false)
                .details(json!({
                    "fraud_score": new_conversion.fraud_score,
                    "fraud_flags": new_conversion.fraud_flags,
                    "reason": new_conversion.rejection_reason,
                }))
                .emit(Severity::Warn);
        }

        // 11. Atomic write with projection; locks stay held on failure
        let user_id = new_conversion.user_id;
        let conversion = match self.store.record_conversion(new_conversion).await {
            Ok(conversion) => conversion,
            Err(StoreError::UniqueViolation(constraint)) => {
                return Err(ApiError::DuplicateConversion(format!(
                    "Conversion already recorded ({})",
                    constraint
                )));
            }
            Err(e) => {
                AuditEvent::new("conversion_write_failed", "postback")
                    .ip_hash(ip_hash)
                    .resource(user_offer_id.to_string())
                    .success(false)
                    .details(json!({ "error": e.to_string() }))
                    .emit(Severity::Error);
                return Err(e.into());
            }
        };

        tracing::info!(
            conversion_id = %conversion.id,
            %user_offer_id,
            status = conversion.status.as_str(),
            commission = conversion.commission,
            "Conversion recorded"
        );

        let event_id = format!("conversion:{}", conversion.id);
        self.jobs.enqueue(Job::EvaluateKyc {
            user_id,
            event_id: event_id.clone(),
        });
        self.jobs.enqueue(Job::RefreshLevel { user_id, event_id });

        Ok(PostbackOutcome {
            conversion,
            duplicate: false,
        })
    }

    fn check_timestamp(
        &self,
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
        ip_hash: &str,
    ) -> ApiResult<()> {
        let age = now - timestamp;
        let max_age_minutes = self.security.postback_max_age_minutes;

        if age > Duration::minutes(max_age_minutes) {
            AuditEvent::new("postback_expired", "postback")
                .ip_hash(ip_hash)
                .success(false)
                .details(json!({ "age_seconds": age.num_seconds() }))
                .emit(Severity::Info);
            return Err(ApiError::PostbackExpired { max_age_minutes });
        }
        if age < -Duration::minutes(MAX_CLOCK_SKEW_MINUTES) {
            AuditEvent::new("invalid_timestamp", "postback")
                .ip_hash(ip_hash)
                .success(false)
                .details(json!({ "age_seconds": age.num_seconds() }))
                .emit(Severity::Info);
            return Err(ApiError::InvalidTimestamp);
        }
        Ok(())
    }

    /// Explicit id, then tracking code, then `sub_id` as either
    async fn resolve_enrollment(&self, postback: &ParsedPostback) -> ApiResult<Enrollment> {
        let user_offer_id = if let Some(id) = postback.user_offer_id {
            Some(id)
        } else if let Some(code) = postback.tracking_code.as_deref() {
            self.enrollment_id_for_code(code).await?
        } else if let Some(sub_id) = postback.sub_id.as_deref() {
            match Uuid::parse_str(sub_id) {
                Ok(id) => Some(id),
                Err(_) => self.enrollment_id_for_code(sub_id).await?,
            }
        } else {
            None
        };

        let user_offer_id = user_offer_id
            .ok_or_else(|| ApiError::BadRequest("Unable to resolve user offer".to_string()))?;

        self.store
            .get_enrollment(user_offer_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("User offer {}", user_offer_id)))
    }

    async fn enrollment_id_for_code(&self, code: &str) -> ApiResult<Option<Uuid>> {
        Ok(self
            .store
            .find_enrollment_by_tracking_code(code)
            .await?
            .map(|e| e.user_offer.id))
    }

    fn check_advertiser(&self, auth: &AuthContext, enrollment: &Enrollment) -> ApiResult<()> {
        if let Some(advertiser_id) = auth.advertiser_id {
            if enrollment.offer.advertiser_id != Some(advertiser_id) {
                return Err(ApiError::Forbidden(
                    "API key is not authorized for this offer".to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn capture_raw(&self, external_id: &str, raw: &Value, now: DateTime<Utc>) {
        let key = format!(
            "raw_postback:{}:{}",
            external_id,
            now.timestamp_nanos_opt().unwrap_or_default()
        );
        if let Err(e) = self.cache.set(&key, &raw.to_string(), RAW_POSTBACK_TTL).await {
            tracing::warn!(
                event_type = "cache_degraded",
                error = %e,
                %external_id,
                "Raw postback capture failed"
            );
        }
    }

    fn attribution_window_days(&self, enrollment: &Enrollment) -> i32 {
        match enrollment.offer.attribution_window_days {
            days if days > 0 => days,
            _ => self.security.default_attribution_window_days,
        }
    }

    fn max_fraud_score(&self, enrollment: &Enrollment) -> i32 {
        match enrollment.offer.max_fraud_score {
            score if score > 0 => score,
            _ => self.security.default_max_fraud_score,
        }
    }

    fn build_conversion(
        &self,
        postback: &ParsedPostback,
        enrollment: &Enrollment,
        click: Option<&Click>,
        external_id: String,
        raw: Value,
        now: DateTime<Utc>,
    ) -> NewConversion {
        let (fraud_score, fraud_flags) = click
            .map(|c| (c.fraud_score, c.fraud_flags.0.clone()))
            .unwrap_or_default();

        let threshold = self.max_fraud_score(enrollment);
        let auto_rejected = click.is_some()
            && enrollment.offer.auto_reject_fraud
            && fraud_score >= threshold;

        let (status, rejection_reason) = if auto_rejected {
            (
                ConversionStatus::Rejected,
                Some(format!(
                    "fraud score {} exceeds threshold {}",
                    fraud_score, threshold
                )),
            )
        } else {
            (postback.status, None)
        };

        let commission = match postback.commission {
            0 => enrollment.offer.commission,
            c => c,
        };

        NewConversion {
            user_offer_id: enrollment.user_offer.id,
            offer_id: enrollment.offer.id,
            user_id: enrollment.user_offer.user_id,
            click_id: click.map(|c| c.id),
            external_conversion_id: external_id,
            network_id: postback.network_id,
            amount: postback.amount,
            commission,
            currency: postback.currency.clone(),
            status,
            rejection_reason,
            fraud_score,
            fraud_flags,
            auto_rejected,
            country: postback
                .country
                .clone()
                .or_else(|| click.and_then(|c| c.country.clone())),
            converted_at: now,
            postback_blob: raw,
        }
    }
}

fn generated_external_id(user_offer_id: Uuid, now: DateTime<Utc>) -> String {
    let mut prefix = user_offer_id.to_string();
    prefix.truncate(8);
    format!(
        "auto_{}_{}",
        prefix,
        now.timestamp_nanos_opt().unwrap_or_default()
    )
}
