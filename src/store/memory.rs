//! In-process store with the same guarantees as the PostgreSQL one
//!
//! A single lock guards all tables, so every operation is atomic: a conversion
//! insert and its counter projection either both land or neither does.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Store, StoreError, StoreResult};
use crate::kyc::KycIndicators;
use crate::models::{
    ApiKey, Click, Conversion, ConversionFilter, ConversionStatus, Enrollment, KycStatus,
    NewClick, NewConversion, Offer, User, UserOffer,
};
use crate::projection::CounterDelta;

const SHARED_IP_SAMPLE: usize = 5;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    offers: HashMap<Uuid, Offer>,
    user_offers: HashMap<Uuid, UserOffer>,
    clicks: HashMap<Uuid, Click>,
    conversions: HashMap<Uuid, Conversion>,
    external_ids: HashMap<String, Uuid>,
    api_keys: HashMap<String, ApiKey>,
}

impl Tables {
    fn enrollment(&self, user_offer: &UserOffer) -> Option<Enrollment> {
        self.offers.get(&user_offer.offer_id).map(|offer| Enrollment {
            user_offer: user_offer.clone(),
            offer: offer.clone(),
        })
    }

    /// Validate every target row before mutating any of them
    fn apply_delta(
        &mut self,
        delta: CounterDelta,
        user_offer_id: Uuid,
        offer_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        if !self.user_offers.contains_key(&user_offer_id) {
            return Err(StoreError::NotFound("user offer".to_string()));
        }
        if !self.offers.contains_key(&offer_id) {
            return Err(StoreError::NotFound("offer".to_string()));
        }
        if !self.users.contains_key(&user_id) {
            return Err(StoreError::NotFound("user".to_string()));
        }

        if let Some(user_offer) = self.user_offers.get_mut(&user_offer_id) {
            user_offer.total_conversions += delta.user_offer_conversions;
            user_offer.earnings += delta.user_offer_earnings;
            user_offer.updated_at = now;
        }
        if let Some(offer) = self.offers.get_mut(&offer_id) {
            offer.total_conversions += delta.offer_conversions;
            if delta.offer_conversions != 0 {
                offer.updated_at = now;
            }
        }
        if let Some(user) = self.users.get_mut(&user_id) {
            user.total_conversions += delta.user_conversions;
            user.total_earnings += delta.user_earnings;
            user.updated_at = now;
        }
        Ok(())
    }
}

/// Store backed by in-process maps
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: User) {
        self.tables.lock().await.users.insert(user.id, user);
    }

    pub async fn insert_offer(&self, offer: Offer) {
        self.tables.lock().await.offers.insert(offer.id, offer);
    }

    /// Insert an enrollment, enforcing one enrollment per user and offer
    pub async fn insert_user_offer(&self, user_offer: UserOffer) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let taken = tables
            .user_offers
            .values()
            .any(|uo| uo.user_id == user_offer.user_id && uo.offer_id == user_offer.offer_id);
        if taken {
            return Err(StoreError::UniqueViolation(
                "user_offers_user_id_offer_id_key".to_string(),
            ));
        }
        tables.user_offers.insert(user_offer.id, user_offer);
        Ok(())
    }

    pub async fn insert_api_key(&self, key: ApiKey) {
        self.tables
            .lock()
            .await
            .api_keys
            .insert(key.key_hash.clone(), key);
    }

    /// Insert a click row without touching counters (historical data)
    pub async fn insert_click(&self, click: Click) {
        self.tables.lock().await.clicks.insert(click.id, click);
    }

    pub async fn get_offer(&self, id: Uuid) -> Option<Offer> {
        self.tables.lock().await.offers.get(&id).cloned()
    }

    pub async fn get_user_offer(&self, id: Uuid) -> Option<UserOffer> {
        self.tables.lock().await.user_offers.get(&id).cloned()
    }

    pub async fn conversions(&self) -> Vec<Conversion> {
        self.tables.lock().await.conversions.values().cloned().collect()
    }

    pub async fn click_count(&self) -> usize {
        self.tables.lock().await.clicks.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn get_enrollment(&self, user_offer_id: Uuid) -> StoreResult<Option<Enrollment>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .user_offers
            .get(&user_offer_id)
            .and_then(|uo| tables.enrollment(uo)))
    }

    async fn find_enrollment_by_tracking_code(
        &self,
        code: &str,
    ) -> StoreResult<Option<Enrollment>> {
        let tables = self.tables.lock().await;

        let exact = tables
            .user_offers
            .values()
            .find(|uo| uo.tracking_code.as_deref() == Some(code));
        let embedded = || {
            tables
                .user_offers
                .values()
                .filter(|uo| uo.short_link.as_deref().is_some_and(|l| l.contains(code)))
                .min_by_key(|uo| uo.joined_at)
        };

        Ok(exact
            .or_else(embedded)
            .and_then(|uo| tables.enrollment(uo)))
    }

    async fn set_tracking_link(
        &self,
        user_offer_id: Uuid,
        tracking_code: &str,
        short_link: &str,
    ) -> StoreResult<UserOffer> {
        let mut tables = self.tables.lock().await;
        let user_offer = tables
            .user_offers
            .get_mut(&user_offer_id)
            .ok_or_else(|| StoreError::NotFound("user offer".to_string()))?;

        user_offer.tracking_code = Some(tracking_code.to_string());
        user_offer.short_link = Some(short_link.to_string());
        user_offer.updated_at = Utc::now();
        Ok(user_offer.clone())
    }

    async fn list_tracking_codes(&self) -> StoreResult<Vec<(Uuid, String)>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .user_offers
            .values()
            .filter_map(|uo| uo.tracking_code.clone().map(|code| (uo.id, code)))
            .collect())
    }

    async fn get_click(&self, id: Uuid) -> StoreResult<Option<Click>> {
        Ok(self.tables.lock().await.clicks.get(&id).cloned())
    }

    async fn record_click(
        &self,
        click: NewClick,
        offer_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Click> {
        let mut tables = self.tables.lock().await;

        if !tables.user_offers.contains_key(&click.user_offer_id) {
            return Err(StoreError::NotFound("user offer".to_string()));
        }

        let now = click.clicked_at;
        let click = click.into_click(Uuid::new_v4());

        if let Some(user_offer) = tables.user_offers.get_mut(&click.user_offer_id) {
            user_offer.total_clicks += 1;
            user_offer.updated_at = now;
        }
        if let Some(offer) = tables.offers.get_mut(&offer_id) {
            offer.total_clicks += 1;
        }
        if let Some(user) = tables.users.get_mut(&user_id) {
            user.total_clicks += 1;
        }
        tables.clicks.insert(click.id, click.clone());

        Ok(click)
    }

    async fn find_conversion_by_external_id(
        &self,
        external_conversion_id: &str,
    ) -> StoreResult<Option<Conversion>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .external_ids
            .get(external_conversion_id)
            .and_then(|id| tables.conversions.get(id))
            .cloned())
    }

    async fn record_conversion(&self, conversion: NewConversion) -> StoreResult<Conversion> {
        let mut tables = self.tables.lock().await;

        if tables
            .external_ids
            .contains_key(&conversion.external_conversion_id)
        {
            return Err(StoreError::UniqueViolation(
                "conversions_external_conversion_id_key".to_string(),
            ));
        }

        let delta = CounterDelta::for_insert(conversion.status, conversion.commission);
        tables.apply_delta(
            delta,
            conversion.user_offer_id,
            conversion.offer_id,
            conversion.user_id,
            conversion.converted_at,
        )?;

        let conversion = conversion.into_conversion(Uuid::new_v4());
        tables
            .external_ids
            .insert(conversion.external_conversion_id.clone(), conversion.id);
        tables.conversions.insert(conversion.id, conversion.clone());

        Ok(conversion)
    }

    async fn get_conversion(&self, id: Uuid) -> StoreResult<Option<Conversion>> {
        Ok(self.tables.lock().await.conversions.get(&id).cloned())
    }

    async fn approve_conversion(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Conversion> {
        let mut tables = self.tables.lock().await;

        let conversion = tables
            .conversions
            .get(&id)
            .ok_or_else(|| StoreError::NotFound("conversion".to_string()))?;
        if !conversion.can_approve() {
            return Err(StoreError::InvalidTransition(format!(
                "Conversion cannot be approved (current status: {})",
                conversion.status.as_str()
            )));
        }

        let user_offer_id = conversion.user_offer_id;
        let commission = conversion.commission;
        let (user_id, offer_id) = tables
            .user_offers
            .get(&user_offer_id)
            .map(|uo| (uo.user_id, uo.offer_id))
            .ok_or_else(|| StoreError::NotFound("user offer".to_string()))?;

        tables.apply_delta(
            CounterDelta::for_approval(commission),
            user_offer_id,
            offer_id,
            user_id,
            now,
        )?;

        let conversion = tables
            .conversions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound("conversion".to_string()))?;
        conversion.status = ConversionStatus::Approved;
        conversion.approved_at = Some(now);
        Ok(conversion.clone())
    }

    async fn reject_conversion(
        &self,
        id: Uuid,
        reason: Option<String>,
    ) -> StoreResult<Conversion> {
        let mut tables = self.tables.lock().await;

        let conversion = tables
            .conversions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound("conversion".to_string()))?;
        if !conversion.can_reject() {
            return Err(StoreError::InvalidTransition(format!(
                "Conversion cannot be rejected (current status: {})",
                conversion.status.as_str()
            )));
        }

        conversion.status = ConversionStatus::Rejected;
        conversion.rejection_reason = reason;
        Ok(conversion.clone())
    }

    async fn list_conversions(
        &self,
        filter: &ConversionFilter,
        limit: i64,
    ) -> StoreResult<Vec<Conversion>> {
        let tables = self.tables.lock().await;

        let mut conversions: Vec<Conversion> = tables
            .conversions
            .values()
            .filter(|c| filter.status.map_or(true, |s| c.status == s))
            .filter(|c| filter.user_offer_id.map_or(true, |id| c.user_offer_id == id))
            .filter(|c| filter.network_id.map_or(true, |id| c.network_id == Some(id)))
            .cloned()
            .collect();

        conversions.sort_by(|a, b| b.converted_at.cmp(&a.converted_at));
        conversions.truncate(limit.max(0) as usize);
        Ok(conversions)
    }

    async fn kyc_indicators(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<KycIndicators> {
        let tables = self.tables.lock().await;

        let owner_of = |user_offer_id: &Uuid| tables.user_offers.get(user_offer_id).map(|uo| uo.user_id);

        let user_clicks: Vec<&Click> = tables
            .clicks
            .values()
            .filter(|c| owner_of(&c.user_offer_id) == Some(user_id))
            .collect();

        let mut sampled_ips: Vec<&str> = user_clicks.iter().map(|c| c.ip_hash.as_str()).collect();
        sampled_ips.sort_unstable();
        sampled_ips.dedup();
        sampled_ips.truncate(SHARED_IP_SAMPLE);

        let shared_ip_users: HashSet<Uuid> = tables
            .clicks
            .values()
            .filter(|c| sampled_ips.contains(&c.ip_hash.as_str()))
            .filter_map(|c| owner_of(&c.user_offer_id))
            .filter(|owner| *owner != user_id)
            .collect();

        let since = now - Duration::minutes(1);

        Ok(KycIndicators {
            user_id,
            vpn_usage_count: user_clicks.iter().filter(|c| c.is_vpn).count() as i64,
            shared_ip_users: shared_ip_users.len() as i64,
            total_clicks: user_clicks.len() as i64,
            total_conversions: tables
                .conversions
                .values()
                .filter(|c| owner_of(&c.user_offer_id) == Some(user_id))
                .count() as i64,
            click_velocity: user_clicks.iter().filter(|c| c.clicked_at > since).count() as i64,
        })
    }

    async fn mark_kyc_required(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        match tables.users.get_mut(&user_id) {
            Some(user) if user.kyc_status == KycStatus::None => {
                user.kyc_status = KycStatus::Required;
                user.kyc_required_at = Some(now);
                user.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_kyc_decision(
        &self,
        user_id: Uuid,
        verified: bool,
        provider_ref: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<User> {
        let mut tables = self.tables.lock().await;
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound("user".to_string()))?;

        if verified {
            user.kyc_status = KycStatus::Verified;
            user.kyc_verified_at = Some(now);
        } else {
            user.kyc_status = KycStatus::Rejected;
        }
        user.kyc_provider_ref = Some(provider_ref.to_string());
        user.updated_at = now;
        Ok(user.clone())
    }

    async fn set_user_level(&self, user_id: Uuid, level: &str) -> StoreResult<()> {
        if let Some(user) = self.tables.lock().await.users.get_mut(&user_id) {
            user.level = level.to_string();
        }
        Ok(())
    }

    async fn find_api_key(&self, key_hash: &str) -> StoreResult<Option<ApiKey>> {
        Ok(self
            .tables
            .lock()
            .await
            .api_keys
            .get(key_hash)
            .filter(|k| k.active)
            .cloned())
    }
}
