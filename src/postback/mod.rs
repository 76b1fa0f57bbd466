//! Postback processing
//!
//! Advertiser networks report conversions server-to-server. A postback is
//! checked for shape, freshness and replay, attributed to an enrollment and
//! (optionally) a click, classified against the click's fraud score, then
//! written together with its counter projection.

mod model;
mod service;

pub use model::{ParsedPostback, PostbackRequest, PostbackResponse};
pub use service::{PostbackOutcome, PostbackService};
