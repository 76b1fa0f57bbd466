//! HTTP handlers for the tracking API

mod click;
mod conversions;
mod health;
mod postback;
mod users;

pub use click::{redirect_query, redirect_tracking_code, ClickQuery};
pub use conversions::{approve_conversion, list_conversions, reject_conversion, RejectRequest};
pub use health::{health_check, HealthResponse};
pub use postback::receive_postback;
pub use users::{
    create_tracking_link, get_user_summary, kyc_webhook, KycWebhookRequest, TrackingLinkResponse,
};
