//! Affiliate click tracking and conversion attribution
//!
//! Short-link clicks are scored for fraud, deduplicated and recorded;
//! advertiser postbacks are checked for replay, attributed to a click within
//! its window and written together with their counter projection.

pub mod audit;
pub mod cache;
pub mod clicks;
pub mod config;
pub mod db;
pub mod error;
pub mod fraud;
pub mod geoip;
pub mod handlers;
pub mod kyc;
pub mod lock;
pub mod middleware;
pub mod models;
pub mod postback;
pub mod projection;
pub mod routes;
pub mod security;
pub mod state;
pub mod store;
pub mod tracking;
pub mod worker;
