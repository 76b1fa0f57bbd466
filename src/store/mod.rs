//! Durable, transactional store for entities and conversion records
//!
//! [`PgStore`] is the production implementation. [`MemoryStore`] keeps the
//! same semantics (unique constraints, all-or-nothing projections) in process
//! for local runs and tests.

mod memory;
mod pg;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::kyc::KycIndicators;
use crate::models::{
    ApiKey, Click, Conversion, ConversionFilter, Enrollment, NewClick, NewConversion, User,
    UserOffer,
};

pub use memory::MemoryStore;
pub use pg::PgStore;

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("{0}")]
    InvalidTransition(String),

    #[error("{0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row".to_string()),
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                StoreError::UniqueViolation(
                    db_err.constraint().unwrap_or("unique index").to_string(),
                )
            }
            _ => StoreError::Database(err.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    /// Connectivity check for `/health`
    async fn health_check(&self) -> StoreResult<()>;

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>>;

    /// UserOffer together with its Offer
    async fn get_enrollment(&self, user_offer_id: Uuid) -> StoreResult<Option<Enrollment>>;

    /// Enrollment whose short link embeds `code`
    async fn find_enrollment_by_tracking_code(&self, code: &str)
        -> StoreResult<Option<Enrollment>>;

    async fn set_tracking_link(
        &self,
        user_offer_id: Uuid,
        tracking_code: &str,
        short_link: &str,
    ) -> StoreResult<UserOffer>;

    /// `(user_offer_id, tracking_code)` for every enrollment with a minted code
    async fn list_tracking_codes(&self) -> StoreResult<Vec<(Uuid, String)>>;

    async fn get_click(&self, id: Uuid) -> StoreResult<Option<Click>>;

    /// Insert a click and bump the click counters of its enrollment, offer and user
    async fn record_click(&self, click: NewClick, offer_id: Uuid, user_id: Uuid)
        -> StoreResult<Click>;

    async fn find_conversion_by_external_id(
        &self,
        external_conversion_id: &str,
    ) -> StoreResult<Option<Conversion>>;

    /// Insert a conversion and apply its counter projection in one transaction
    async fn record_conversion(&self, conversion: NewConversion) -> StoreResult<Conversion>;

    async fn get_conversion(&self, id: Uuid) -> StoreResult<Option<Conversion>>;

    /// `pending -> approved`, crediting the commission
    async fn approve_conversion(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Conversion>;

    /// `pending -> rejected`; earnings are untouched
    async fn reject_conversion(&self, id: Uuid, reason: Option<String>)
        -> StoreResult<Conversion>;

    async fn list_conversions(
        &self,
        filter: &ConversionFilter,
        limit: i64,
    ) -> StoreResult<Vec<Conversion>>;

    async fn kyc_indicators(&self, user_id: Uuid, now: DateTime<Utc>)
        -> StoreResult<KycIndicators>;

    /// Move `kyc_status` from `none` to `required`. Returns whether a row changed.
    async fn mark_kyc_required(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<bool>;

    /// Apply a KYC provider verdict
    async fn record_kyc_decision(
        &self,
        user_id: Uuid,
        verified: bool,
        provider_ref: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<User>;

    async fn set_user_level(&self, user_id: Uuid, level: &str) -> StoreResult<()>;

    async fn find_api_key(&self, key_hash: &str) -> StoreResult<Option<ApiKey>>;
}
