//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use afftrack_server::cache::{Cache, CacheError, CacheResult, MemoryCache};
use afftrack_server::config::Config;
use afftrack_server::fraud::IngestionContext;
use afftrack_server::geoip::StaticGeoIp;
use afftrack_server::models::{Click, NewClick, Offer, User, UserOffer};
use afftrack_server::state::AppState;
use afftrack_server::store::MemoryStore;

pub const CHROME_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
pub const HEADLESS_UA: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) HeadlessChrome/120.0.0.0 Safari/537.36";
pub const CLEAN_IP: &str = "81.2.69.142";
pub const ADMIN_TOKEN: &str = "admin-test-token";
pub const WEBHOOK_SECRET: &str = "webhook-test-secret";
pub const DESTINATION: &str = "https://shop.example.com/landing";

/// Fixed instant with whole seconds
pub fn t0() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

pub fn test_config() -> Config {
    Config {
        admin_token: Some(ADMIN_TOKEN.to_string()),
        webhook_secret: Some(WEBHOOK_SECRET.to_string()),
        ..Config::local()
    }
}

/// A user enrolled in one offer, wired to in-memory backends
pub struct Harness {
    pub state: AppState,
    pub store: MemoryStore,
    pub cache: Arc<MemoryCache>,
    pub user: User,
    pub offer: Offer,
    pub user_offer: UserOffer,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with(test_config(), |_| {}).await
    }

    pub async fn with_offer(customize: impl FnOnce(&mut Offer)) -> Self {
        Self::with(test_config(), customize).await
    }

    pub async fn with(config: Config, customize: impl FnOnce(&mut Offer)) -> Self {
        let store = MemoryStore::new();
        let cache = Arc::new(MemoryCache::new());

        let user = User::new("promoter");
        let mut offer = Offer::new("Spring sale", DESTINATION, 500);
        customize(&mut offer);
        let user_offer = UserOffer::new(user.id, offer.id, DESTINATION);

        store.insert_user(user.clone()).await;
        store.insert_offer(offer.clone()).await;
        store.insert_user_offer(user_offer.clone()).await.unwrap();

        let (state, _workers) = AppState::new(
            config,
            Arc::new(store.clone()),
            cache.clone(),
            Arc::new(StaticGeoIp("GB".to_string())),
        );

        Self {
            state,
            store,
            cache,
            user,
            offer,
            user_offer,
        }
    }

    /// Second promoter enrolled in the same offer
    pub async fn enroll_other_user(&self, username: &str) -> UserOffer {
        let user = User::new(username);
        let user_offer = UserOffer::new(user.id, self.offer.id, DESTINATION);
        self.store.insert_user(user).await;
        self.store.insert_user_offer(user_offer.clone()).await.unwrap();
        user_offer
    }

    pub async fn user(&self) -> User {
        use afftrack_server::store::Store;
        self.store.get_user(self.user.id).await.unwrap().unwrap()
    }

    /// Insert a click directly with a chosen fraud score
    pub async fn seed_click(&self, clicked_at: DateTime<Utc>, fraud_score: i32) -> Click {
        let click = NewClick {
            user_offer_id: self.user_offer.id,
            clicked_at,
            ip_hash: "seeded".to_string(),
            user_agent_hash: "seeded".to_string(),
            country: Some("DE".to_string()),
            fraud_score,
            fraud_flags: vec!["seeded".to_string()],
            is_bot: fraud_score >= 80,
            is_vpn: false,
        }
        .into_click(Uuid::new_v4());
        self.store.insert_click(click.clone()).await;
        click
    }
}

/// Browser-like request context
pub fn browser_context(ip: &str) -> IngestionContext {
    IngestionContext {
        client_ip: ip.to_string(),
        user_agent: CHROME_UA.to_string(),
        accept: Some("text/html,application/xhtml+xml".to_string()),
        accept_language: Some("en-GB,en;q=0.9".to_string()),
        accept_encoding: Some("gzip, deflate, br".to_string()),
        referer: Some("https://blog.example.org/post".to_string()),
    }
}

/// Cache whose every operation fails
pub struct FailingCache;

#[async_trait]
impl Cache for FailingCache {
    async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<()> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn set_nx(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<bool> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn exists(&self, _key: &str) -> CacheResult<bool> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn incr(&self, _key: &str, _ttl: Duration) -> CacheResult<i64> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}
