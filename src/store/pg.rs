//! PostgreSQL store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::{Store, StoreError, StoreResult};
use crate::kyc::KycIndicators;
use crate::models::{
    ApiKey, Click, Conversion, ConversionFilter, ConversionStatus, Enrollment, KycStatus,
    NewClick, NewConversion, Offer, User, UserOffer,
};
use crate::projection::CounterDelta;

/// Distinct client IPs of a user considered when looking for shared IPs
const SHARED_IP_SAMPLE: i64 = 5;

#[derive(Clone)]
pub struct PgStore {
    db_pool: PgPool,
}

impl PgStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.db_pool
    }

    async fn enrollment_for(&self, user_offer: UserOffer) -> StoreResult<Option<Enrollment>> {
        let offer = sqlx::query_as::<_, Offer>("SELECT * FROM offers WHERE id = $1")
            .bind(user_offer.offer_id)
            .fetch_optional(&self.db_pool)
            .await?;

        Ok(offer.map(|offer| Enrollment { user_offer, offer }))
    }
}

/// Apply a counter delta with in-database increments
async fn apply_delta(
    conn: &mut PgConnection,
    delta: CounterDelta,
    user_offer_id: Uuid,
    offer_id: Uuid,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> StoreResult<()> {
    sqlx::query(
        r#"
        UPDATE user_offers
        SET total_conversions = total_conversions + $1,
            earnings = earnings + $2,
            updated_at = $3
        WHERE id = $4
        "#,
    )
    .bind(delta.user_offer_conversions)
    .bind(delta.user_offer_earnings)
    .bind(now)
    .bind(user_offer_id)
    .execute(&mut *conn)
    .await?;

    if delta.offer_conversions != 0 {
        sqlx::query(
            "UPDATE offers SET total_conversions = total_conversions + $1, updated_at = $2 WHERE id = $3",
        )
        .bind(delta.offer_conversions)
        .bind(now)
        .bind(offer_id)
        .execute(&mut *conn)
        .await?;
    }

    sqlx::query(
        r#"
        UPDATE users
        SET total_conversions = total_conversions + $1,
            total_earnings = total_earnings + $2,
            updated_at = $3
        WHERE id = $4
        "#,
    )
    .bind(delta.user_conversions)
    .bind(delta.user_earnings)
    .bind(now)
    .bind(user_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[derive(sqlx::FromRow)]
struct IndicatorRow {
    vpn_usage_count: i64,
    shared_ip_users: i64,
    total_clicks: i64,
    total_conversions: i64,
    click_velocity: i64,
}

#[async_trait]
impl Store for PgStore {
    async fn health_check(&self) -> StoreResult<()> {
        crate::db::check_health(&self.db_pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(user)
    }

    async fn get_enrollment(&self, user_offer_id: Uuid) -> StoreResult<Option<Enrollment>> {
        let user_offer = sqlx::query_as::<_, UserOffer>("SELECT * FROM user_offers WHERE id = $1")
            .bind(user_offer_id)
            .fetch_optional(&self.db_pool)
            .await?;

        match user_offer {
            Some(user_offer) => self.enrollment_for(user_offer).await,
            None => Ok(None),
        }
    }

    async fn find_enrollment_by_tracking_code(
        &self,
        code: &str,
    ) -> StoreResult<Option<Enrollment>> {
        let user_offer = sqlx::query_as::<_, UserOffer>(
            r#"
            SELECT * FROM user_offers
            WHERE tracking_code = $1
               OR (short_link IS NOT NULL AND position($1 in short_link) > 0)
            ORDER BY (tracking_code = $1) DESC NULLS LAST, joined_at ASC
            LIMIT 1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.db_pool)
        .await?;

        match user_offer {
            Some(user_offer) => self.enrollment_for(user_offer).await,
            None => Ok(None),
        }
    }

    async fn set_tracking_link(
        &self,
        user_offer_id: Uuid,
        tracking_code: &str,
        short_link: &str,
    ) -> StoreResult<UserOffer> {
        sqlx::query_as::<_, UserOffer>(
            r#"
            UPDATE user_offers
            SET tracking_code = $1, short_link = $2, updated_at = NOW()
            WHERE id = $3
            RETURNING *
            "#,
        )
        .bind(tracking_code)
        .bind(short_link)
        .bind(user_offer_id)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or_else(|| StoreError::NotFound("user offer".to_string()))
    }

    async fn list_tracking_codes(&self) -> StoreResult<Vec<(Uuid, String)>> {
        let codes = sqlx::query_as::<_, (Uuid, String)>(
            "SELECT id, tracking_code FROM user_offers WHERE tracking_code IS NOT NULL",
        )
        .fetch_all(&self.db_pool)
        .await?;
        Ok(codes)
    }

    async fn get_click(&self, id: Uuid) -> StoreResult<Option<Click>> {
        let click = sqlx::query_as::<_, Click>("SELECT * FROM clicks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(click)
    }

    async fn record_click(
        &self,
        click: NewClick,
        offer_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Click> {
        let mut tx = self.db_pool.begin().await?;

        let inserted = sqlx::query_as::<_, Click>(
            r#"
            INSERT INTO clicks (
                id, user_offer_id, clicked_at, ip_hash, user_agent_hash,
                country, fraud_score, fraud_flags, is_bot, is_vpn
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(click.user_offer_id)
        .bind(click.clicked_at)
        .bind(&click.ip_hash)
        .bind(&click.user_agent_hash)
        .bind(&click.country)
        .bind(click.fraud_score)
        .bind(Json(&click.fraud_flags))
        .bind(click.is_bot)
        .bind(click.is_vpn)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE user_offers SET total_clicks = total_clicks + 1, updated_at = $1 WHERE id = $2",
        )
        .bind(click.clicked_at)
        .bind(click.user_offer_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE offers SET total_clicks = total_clicks + 1 WHERE id = $1")
            .bind(offer_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE users SET total_clicks = total_clicks + 1 WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(inserted)
    }

    async fn find_conversion_by_external_id(
        &self,
        external_conversion_id: &str,
    ) -> StoreResult<Option<Conversion>> {
        let conversion = sqlx::query_as::<_, Conversion>(
            "SELECT * FROM conversions WHERE external_conversion_id = $1",
        )
        .bind(external_conversion_id)
        .fetch_optional(&self.db_pool)
        .await?;
        Ok(conversion)
    }

    async fn record_conversion(&self, conversion: NewConversion) -> StoreResult<Conversion> {
        let delta = CounterDelta::for_insert(conversion.status, conversion.commission);
        let approved_at = (conversion.status == ConversionStatus::Approved)
            .then_some(conversion.converted_at);

        let mut tx = self.db_pool.begin().await?;

        // 1. Conversion row
        let inserted = sqlx::query_as::<_, Conversion>(
            r#"
            INSERT INTO conversions (
                id, user_offer_id, click_id, external_conversion_id, network_id,
                amount, commission, currency, status, rejection_reason,
                fraud_score, fraud_flags, auto_rejected, country,
                converted_at, approved_at, postback_blob
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(conversion.user_offer_id)
        .bind(conversion.click_id)
        .bind(&conversion.external_conversion_id)
        .bind(conversion.network_id)
        .bind(conversion.amount)
        .bind(conversion.commission)
        .bind(&conversion.currency)
        .bind(conversion.status)
        .bind(&conversion.rejection_reason)
        .bind(conversion.fraud_score)
        .bind(Json(&conversion.fraud_flags))
        .bind(conversion.auto_rejected)
        .bind(&conversion.country)
        .bind(conversion.converted_at)
        .bind(approved_at)
        .bind(&conversion.postback_blob)
        .fetch_one(&mut *tx)
        .await?;

        // 2-4. Rollups on user offer, offer and user
        apply_delta(
            &mut tx,
            delta,
            conversion.user_offer_id,
            conversion.offer_id,
            conversion.user_id,
            conversion.converted_at,
        )
        .await?;

        tx.commit().await?;

        Ok(inserted)
    }

    async fn get_conversion(&self, id: Uuid) -> StoreResult<Option<Conversion>> {
        let conversion = sqlx::query_as::<_, Conversion>("SELECT * FROM conversions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(conversion)
    }

    async fn approve_conversion(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Conversion> {
        let mut tx = self.db_pool.begin().await?;

        // The status guard makes concurrent approvals credit at most once
        let approved = sqlx::query_as::<_, Conversion>(
            r#"
            UPDATE conversions
            SET status = 'approved', approved_at = $1
            WHERE id = $2 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let approved = match approved {
            Some(conversion) => conversion,
            None => {
                let current = sqlx::query_scalar::<_, ConversionStatus>(
                    "SELECT status FROM conversions WHERE id = $1",
                )
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

                return Err(match current {
                    Some(status) => StoreError::InvalidTransition(format!(
                        "Conversion cannot be approved (current status: {})",
                        status.as_str()
                    )),
                    None => StoreError::NotFound("conversion".to_string()),
                });
            }
        };

        let (user_id, offer_id) = sqlx::query_as::<_, (Uuid, Uuid)>(
            "SELECT user_id, offer_id FROM user_offers WHERE id = $1",
        )
        .bind(approved.user_offer_id)
        .fetch_one(&mut *tx)
        .await?;

        apply_delta(
            &mut tx,
            CounterDelta::for_approval(approved.commission),
            approved.user_offer_id,
            offer_id,
            user_id,
            now,
        )
        .await?;

        tx.commit().await?;

        Ok(approved)
    }

    async fn reject_conversion(
        &self,
        id: Uuid,
        reason: Option<String>,
    ) -> StoreResult<Conversion> {
        let rejected = sqlx::query_as::<_, Conversion>(
            r#"
            UPDATE conversions
            SET status = 'rejected', rejection_reason = $1
            WHERE id = $2 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(&reason)
        .bind(id)
        .fetch_optional(&self.db_pool)
        .await?;

        match rejected {
            Some(conversion) => Ok(conversion),
            None => match self.get_conversion(id).await? {
                Some(conversion) => Err(StoreError::InvalidTransition(format!(
                    "Conversion cannot be rejected (current status: {})",
                    conversion.status.as_str()
                ))),
                None => Err(StoreError::NotFound("conversion".to_string())),
            },
        }
    }

    async fn list_conversions(
        &self,
        filter: &ConversionFilter,
        limit: i64,
    ) -> StoreResult<Vec<Conversion>> {
        let conversions = sqlx::query_as::<_, Conversion>(
            r#"
            SELECT * FROM conversions
            WHERE ($1::conversion_status IS NULL OR status = $1)
              AND ($2::uuid IS NULL OR user_offer_id = $2)
              AND ($3::uuid IS NULL OR network_id = $3)
            ORDER BY converted_at DESC
            LIMIT $4
            "#,
        )
        .bind(filter.status)
        .bind(filter.user_offer_id)
        .bind(filter.network_id)
        .bind(limit)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(conversions)
    }

    async fn kyc_indicators(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<KycIndicators> {
        let row = sqlx::query_as::<_, IndicatorRow>(
            r#"
            WITH user_clicks AS (
                SELECT c.* FROM clicks c
                JOIN user_offers uo ON uo.id = c.user_offer_id
                WHERE uo.user_id = $1
            ),
            user_ips AS (
                SELECT DISTINCT ip_hash FROM user_clicks LIMIT $3
            )
            SELECT
                (SELECT COUNT(*) FROM user_clicks WHERE is_vpn) AS vpn_usage_count,
                (SELECT COUNT(DISTINCT uo.user_id)
                   FROM clicks c
                   JOIN user_offers uo ON uo.id = c.user_offer_id
                  WHERE uo.user_id <> $1
                    AND c.ip_hash IN (SELECT ip_hash FROM user_ips)) AS shared_ip_users,
                (SELECT COUNT(*) FROM user_clicks) AS total_clicks,
                (SELECT COUNT(*)
                   FROM conversions cv
                   JOIN user_offers uo ON uo.id = cv.user_offer_id
                  WHERE uo.user_id = $1) AS total_conversions,
                (SELECT COUNT(*) FROM user_clicks WHERE clicked_at > $2) AS click_velocity
            "#,
        )
        .bind(user_id)
        .bind(now - chrono::Duration::minutes(1))
        .bind(SHARED_IP_SAMPLE)
        .fetch_one(&self.db_pool)
        .await?;

        Ok(KycIndicators {
            user_id,
            vpn_usage_count: row.vpn_usage_count,
            shared_ip_users: row.shared_ip_users,
            total_clicks: row.total_clicks,
            total_conversions: row.total_conversions,
            click_velocity: row.click_velocity,
        })
    }

    async fn mark_kyc_required(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET kyc_status = 'required', kyc_required_at = $1, updated_at = $1
            WHERE id = $2 AND kyc_status = 'none'
            "#,
        )
        .bind(now)
        .bind(user_id)
        .execute(&self.db_pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_kyc_decision(
        &self,
        user_id: Uuid,
        verified: bool,
        provider_ref: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<User> {
        let status = if verified {
            KycStatus::Verified
        } else {
            KycStatus::Rejected
        };

        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET kyc_status = $1,
                kyc_verified_at = CASE WHEN $2 THEN $3 ELSE kyc_verified_at END,
                kyc_provider_ref = $4,
                updated_at = $3
            WHERE id = $5
            RETURNING *
            "#,
        )
        .bind(status)
        .bind(verified)
        .bind(now)
        .bind(provider_ref)
        .bind(user_id)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or_else(|| StoreError::NotFound("user".to_string()))
    }

    async fn set_user_level(&self, user_id: Uuid, level: &str) -> StoreResult<()> {
        sqlx::query("UPDATE users SET level = $1 WHERE id = $2 AND level <> $1")
            .bind(level)
            .bind(user_id)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    async fn find_api_key(&self, key_hash: &str) -> StoreResult<Option<ApiKey>> {
        let key = sqlx::query_as::<_, ApiKey>(
            "SELECT * FROM api_keys WHERE key_hash = $1 AND active",
        )
        .bind(key_hash)
        .fetch_optional(&self.db_pool)
        .await?;
        Ok(key)
    }
}
