//! Data models for the tracking platform
//!
//! Money is always integer minor units (`i64`). Entities reference each other
//! by id only; nothing here holds a back-pointer.

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

/// KYC state of a user
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Default)]
#[sqlx(type_name = "kyc_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum KycStatus {
    #[default]
    None,
    Required,
    Verified,
    Rejected,
}

impl KycStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KycStatus::None => "none",
            KycStatus::Required => "required",
            KycStatus::Verified => "verified",
            KycStatus::Rejected => "rejected",
        }
    }
}

/// User model (promoter or advertiser) with rollup totals
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub total_clicks: i64,
    pub total_conversions: i64,
    pub total_earnings: i64,
    pub level: String,
    pub kyc_status: KycStatus,
    pub kyc_required_at: Option<DateTime<Utc>>,
    pub kyc_verified_at: Option<DateTime<Utc>>,
    pub kyc_provider_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            total_clicks: 0,
            total_conversions: 0,
            total_earnings: 0,
            level: UserLevel::Rookie.as_str().to_string(),
            kyc_status: KycStatus::None,
            kyc_required_at: None,
            kyc_verified_at: None,
            kyc_provider_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn requires_kyc(&self) -> bool {
        self.kyc_status == KycStatus::Required
    }

    /// Users may promote while KYC is not pending or has passed
    pub fn can_promote(&self) -> bool {
        matches!(self.kyc_status, KycStatus::None | KycStatus::Verified)
    }
}

/// Gamified level derived from total conversions
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserLevel {
    Rookie,
    Pro,
    Expert,
    Master,
    Legend,
}

impl UserLevel {
    pub fn from_conversions(total_conversions: i64) -> Self {
        match total_conversions {
            500..=i64::MAX => UserLevel::Legend,
            201..=499 => UserLevel::Master,
            51..=200 => UserLevel::Expert,
            11..=50 => UserLevel::Pro,
            _ => UserLevel::Rookie,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserLevel::Rookie => "rookie",
            UserLevel::Pro => "pro",
            UserLevel::Expert => "expert",
            UserLevel::Master => "master",
            UserLevel::Legend => "legend",
        }
    }
}

/// Advertiser-owned campaign
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Offer {
    pub id: Uuid,
    pub advertiser_id: Option<Uuid>,
    pub title: String,
    pub destination_url: String,
    /// Default commission in minor units
    pub commission: i64,
    pub attribution_window_days: i32,
    pub max_fraud_score: i32,
    pub auto_reject_fraud: bool,
    pub total_clicks: i64,
    pub total_conversions: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Offer {
    pub fn new(title: impl Into<String>, destination_url: impl Into<String>, commission: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            advertiser_id: None,
            title: title.into(),
            destination_url: destination_url.into(),
            commission,
            attribution_window_days: 30,
            max_fraud_score: 70,
            auto_reject_fraud: true,
            total_clicks: 0,
            total_conversions: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Enrollment lifecycle
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "user_offer_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserOfferStatus {
    Active,
    Paused,
    Archived,
}

/// A promoter's enrollment in an offer
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct UserOffer {
    pub id: Uuid,
    pub user_id: Uuid,
    pub offer_id: Uuid,
    pub affiliate_link: String,
    pub short_link: Option<String>,
    pub tracking_code: Option<String>,
    pub status: UserOfferStatus,
    pub total_clicks: i64,
    pub total_conversions: i64,
    pub earnings: i64,
    pub joined_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserOffer {
    pub fn new(user_id: Uuid, offer_id: Uuid, affiliate_link: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            offer_id,
            affiliate_link: affiliate_link.into(),
            short_link: None,
            tracking_code: None,
            status: UserOfferStatus::Active,
            total_clicks: 0,
            total_conversions: 0,
            earnings: 0,
            joined_at: now,
            updated_at: now,
        }
    }
}

/// Enrollment joined with its offer, as needed on the click and postback paths
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub user_offer: UserOffer,
    pub offer: Offer,
}

/// An observed click. Immutable after insert.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Click {
    pub id: Uuid,
    pub user_offer_id: Uuid,
    pub clicked_at: DateTime<Utc>,
    pub ip_hash: String,
    pub user_agent_hash: String,
    pub country: Option<String>,
    pub fraud_score: i32,
    pub fraud_flags: Json<Vec<String>>,
    pub is_bot: bool,
    pub is_vpn: bool,
}

/// Click to persist
#[derive(Debug, Clone)]
pub struct NewClick {
    pub user_offer_id: Uuid,
    pub clicked_at: DateTime<Utc>,
    pub ip_hash: String,
    pub user_agent_hash: String,
    pub country: Option<String>,
    pub fraud_score: i32,
    pub fraud_flags: Vec<String>,
    pub is_bot: bool,
    pub is_vpn: bool,
}

impl NewClick {
    pub fn into_click(self, id: Uuid) -> Click {
        Click {
            id,
            user_offer_id: self.user_offer_id,
            clicked_at: self.clicked_at,
            ip_hash: self.ip_hash,
            user_agent_hash: self.user_agent_hash,
            country: self.country,
            fraud_score: self.fraud_score,
            fraud_flags: Json(self.fraud_flags),
            is_bot: self.is_bot,
            is_vpn: self.is_vpn,
        }
    }
}

/// Conversion status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "conversion_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    Pending,
    Approved,
    Rejected,
}

impl ConversionStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(ConversionStatus::Pending),
            "approved" => Some(ConversionStatus::Approved),
            "rejected" => Some(ConversionStatus::Rejected),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionStatus::Pending => "pending",
            ConversionStatus::Approved => "approved",
            ConversionStatus::Rejected => "rejected",
        }
    }
}

/// A recorded conversion outcome
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Conversion {
    pub id: Uuid,
    pub user_offer_id: Uuid,
    pub click_id: Option<Uuid>,
    pub external_conversion_id: String,
    pub network_id: Option<Uuid>,
    pub amount: i64,
    pub commission: i64,
    pub currency: String,
    pub status: ConversionStatus,
    pub rejection_reason: Option<String>,
    pub fraud_score: i32,
    pub fraud_flags: Json<Vec<String>>,
    pub auto_rejected: bool,
    pub country: Option<String>,
    pub converted_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub postback_blob: serde_json::Value,
}

impl Conversion {
    pub fn can_approve(&self) -> bool {
        self.status == ConversionStatus::Pending
    }

    pub fn can_reject(&self) -> bool {
        self.status == ConversionStatus::Pending
    }
}

/// Conversion to persist, with the ids the counter projection needs
#[derive(Debug, Clone)]
pub struct NewConversion {
    pub user_offer_id: Uuid,
    pub offer_id: Uuid,
    pub user_id: Uuid,
    pub click_id: Option<Uuid>,
    pub external_conversion_id: String,
    pub network_id: Option<Uuid>,
    pub amount: i64,
    pub commission: i64,
    pub currency: String,
    pub status: ConversionStatus,
    pub rejection_reason: Option<String>,
    pub fraud_score: i32,
    pub fraud_flags: Vec<String>,
    pub auto_rejected: bool,
    pub country: Option<String>,
    pub converted_at: DateTime<Utc>,
    pub postback_blob: serde_json::Value,
}

impl NewConversion {
    pub fn into_conversion(self, id: Uuid) -> Conversion {
        let approved_at = (self.status == ConversionStatus::Approved).then_some(self.converted_at);
        Conversion {
            id,
            user_offer_id: self.user_offer_id,
            click_id: self.click_id,
            external_conversion_id: self.external_conversion_id,
            network_id: self.network_id,
            amount: self.amount,
            commission: self.commission,
            currency: self.currency,
            status: self.status,
            rejection_reason: self.rejection_reason,
            fraud_score: self.fraud_score,
            fraud_flags: Json(self.fraud_flags),
            auto_rejected: self.auto_rejected,
            country: self.country,
            converted_at: self.converted_at,
            approved_at,
            postback_blob: self.postback_blob,
        }
    }
}

/// Filter for listing conversions
#[derive(Debug, Default, Deserialize)]
pub struct ConversionFilter {
    pub status: Option<ConversionStatus>,
    pub user_offer_id: Option<Uuid>,
    pub network_id: Option<Uuid>,
}

/// Advertiser-scoped API key (stored hashed)
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct ApiKey {
    pub id: Uuid,
    pub advertiser_id: Option<Uuid>,
    pub key_hash: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Public view of a user for the promoter dashboard
#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub level: String,
    pub total_clicks: i64,
    pub total_conversions: i64,
    pub total_earnings: i64,
    pub kyc_status: KycStatus,
    pub requires_kyc: bool,
    pub can_promote: bool,
}

impl From<User> for UserSummary {
    fn from(user: User) -> Self {
        Self {
            requires_kyc: user.requires_kyc(),
            can_promote: user.can_promote(),
            id: user.id,
            username: user.username,
            level: user.level,
            total_clicks: user.total_clicks,
            total_conversions: user.total_conversions,
            total_earnings: user.total_earnings,
            kyc_status: user.kyc_status,
        }
    }
}

/// Envelope for admin API responses
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_level_thresholds() {
        assert_eq!(UserLevel::from_conversions(0), UserLevel::Rookie);
        assert_eq!(UserLevel::from_conversions(10), UserLevel::Rookie);
        assert_eq!(UserLevel::from_conversions(11), UserLevel::Pro);
        assert_eq!(UserLevel::from_conversions(51), UserLevel::Expert);
        assert_eq!(UserLevel::from_conversions(201), UserLevel::Master);
        assert_eq!(UserLevel::from_conversions(500), UserLevel::Legend);
    }

    #[test]
    fn test_kyc_flags() {
        let mut user = User::new("promoter");
        assert!(user.can_promote());
        assert!(!user.requires_kyc());

        user.kyc_status = KycStatus::Required;
        assert!(user.requires_kyc());
        assert!(!user.can_promote());

        user.kyc_status = KycStatus::Verified;
        assert!(user.can_promote());
    }

    #[test]
    fn test_conversion_status_parse() {
        assert_eq!(
            ConversionStatus::parse("Approved"),
            Some(ConversionStatus::Approved)
        );
        assert_eq!(ConversionStatus::parse("paid"), None);
    }

    #[test]
    fn test_approved_conversion_stamps_approved_at() {
        let now = Utc::now();
        let conversion = NewConversion {
            user_offer_id: Uuid::new_v4(),
            offer_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            click_id: None,
            external_conversion_id: "abc".to_string(),
            network_id: None,
            amount: 2500,
            commission: 500,
            currency: "USD".to_string(),
            status: ConversionStatus::Approved,
            rejection_reason: None,
            fraud_score: 0,
            fraud_flags: vec![],
            auto_rejected: false,
            country: None,
            converted_at: now,
            postback_blob: serde_json::json!({}),
        }
        .into_conversion(Uuid::new_v4());

        assert_eq!(conversion.approved_at, Some(now));
    }
}

