//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;
use chrono::Duration;
use tokio::task::JoinHandle;

use crate::cache::Cache;
use crate::clicks::ClickService;
use crate::config::Config;
use crate::fraud::FraudScorer;
use crate::geoip::GeoIpLookup;
use crate::middleware::RateLimiter;
use crate::postback::PostbackService;
use crate::security::Signer;
use crate::store::Store;
use crate::tracking::TrackingCodeService;
use crate::worker::{JobQueue, JobRunner};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub cache: Arc<dyn Cache>,
    pub signer: Signer,
    pub tracking: Arc<TrackingCodeService>,
    pub clicks: Arc<ClickService>,
    pub postbacks: Arc<PostbackService>,
    pub rate_limiter: RateLimiter,
    pub jobs: JobQueue,
}

impl AppState {
    /// Wire every service over the given backends and start the job workers
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        cache: Arc<dyn Cache>,
        geoip: Arc<dyn GeoIpLookup>,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let security = config.security.clone();
        let signer = Signer::new(&security.hmac_secret);

        let runner = Arc::new(JobRunner::new(store.clone(), cache.clone()));
        let (jobs, workers) =
            JobQueue::start(config.job_workers, config.job_queue_capacity, runner);

        let tracking = Arc::new(TrackingCodeService::new(cache.clone(), signer.clone()));
        let scorer = FraudScorer::new(
            cache.clone(),
            signer.clone(),
            security.rate_limit_clicks_per_min,
        );

        let clicks = Arc::new(ClickService::new(
            store.clone(),
            cache.clone(),
            tracking.clone(),
            scorer,
            geoip,
            signer.clone(),
            jobs.clone(),
            config.fallback_url.clone(),
            Duration::days(security.tracking_code_max_age_days),
        ));

        let postbacks = Arc::new(PostbackService::new(
            store.clone(),
            cache.clone(),
            jobs.clone(),
            security,
        ));

        let app_state = Self {
            config: Arc::new(config),
            rate_limiter: RateLimiter::new(cache.clone()),
            store,
            cache,
            signer,
            tracking,
            clicks,
            postbacks,
            jobs,
        };

        (app_state, workers)
    }
}

impl FromRef<AppState> for Arc<Config> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.config.clone()
    }
}

impl FromRef<AppState> for Arc<dyn Store> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.store.clone()
    }
}

impl FromRef<AppState> for Arc<ClickService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.clicks.clone()
    }
}
