//! Click-time fraud scoring
//!
//! Risk is the sum of five signal groups capped at 100: bot heuristics, click
//! rate limits, cookie stuffing, click patterns and referer. Every group that
//! contributes adds a reason tag. Cache-backed signals degrade open when the
//! cache is unavailable.

mod datacenter;

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::cache::{Cache, CacheError, CacheResult};
use crate::security::Signer;

pub use datacenter::is_datacenter_ip;

/// Scores at or above this are blocked
pub const BLOCK_THRESHOLD: i32 = 80;
/// Scores at or above this are flagged for review
pub const FLAG_THRESHOLD: i32 = 50;

const MAX_SCORE: i32 = 100;
const CLICKS_PER_IP_OFFER_PER_MIN: i64 = 5;
const COOKIE_STUFFING_OFFERS: i64 = 10;
const ONE_MINUTE: Duration = Duration::from_secs(60);
const COOKIE_STUFFING_WINDOW: Duration = Duration::from_secs(5 * 60);
const UA_FARMING_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Substrings of user agents that never belong to a human-driven browser
const BOT_PATTERNS: &[&str] = &[
    // Generic bots
    "bot", "crawler", "spider", "scraper", "curl", "wget", "python", "java/",
    "httpclient", "okhttp", "axios", "node-fetch", "go-http",
    // Headless browsers
    "headless", "phantom", "selenium", "puppeteer", "playwright", "nightmare",
    "webdriver", "chromedriver", "geckodriver",
    // Search engine and archive bots
    "googlebot", "bingbot", "yandex", "baiduspider", "duckduckbot", "sogou",
    "exabot", "ia_archiver", "archive.org", "wayback",
    // Social media bots
    "facebookexternalhit", "twitterbot", "linkedinbot", "slackbot", "telegrambot",
    "discordbot",
    // HTTP libraries
    "libwww", "lwp-", "guzzle", "aiohttp", "httpx", "requests/", "urllib",
    "undici", "superagent",
    // Automation and monitoring
    "zapier", "ifttt", "ahrefs", "semrush", "majestic", "uptimerobot", "pingdom",
    "gtmetrix", "scanner", "exploit",
];

const SUSPICIOUS_REFERERS: &[&str] = &[
    "localhost", "127.0.0.1", "0.0.0.0", ".php", ".asp", "iframe", "traffic", "clicks",
    "bot", "proxy", "anonymizer",
];

/// What the scorer sees of an incoming click
#[derive(Debug, Clone, Default)]
pub struct IngestionContext {
    pub client_ip: String,
    pub user_agent: String,
    pub accept: Option<String>,
    pub accept_language: Option<String>,
    pub accept_encoding: Option<String>,
    pub referer: Option<String>,
}

fn header_missing(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

/// Scoring verdict
#[derive(Debug, Clone, Default, Serialize)]
pub struct FraudCheckResult {
    pub risk_score: i32,
    pub reasons: Vec<String>,
    pub is_fraud: bool,
    pub should_block: bool,
    pub should_flag: bool,
    /// Source address is in a datacenter or VPN range
    pub is_vpn: bool,
}

impl FraudCheckResult {
    fn add(&mut self, partial: i32, reason: impl Into<String>) {
        if partial > 0 {
            self.risk_score += partial;
            self.reasons.push(reason.into());
        }
    }

    fn finish(mut self) -> Self {
        self.risk_score = self.risk_score.min(MAX_SCORE);
        if self.risk_score >= BLOCK_THRESHOLD {
            self.is_fraud = true;
            self.should_block = true;
        } else if self.risk_score >= FLAG_THRESHOLD {
            self.should_flag = true;
        }
        self
    }
}

/// Bot heuristics over the user agent, standard headers and source range.
///
/// Returns the partial score and its reason.
pub fn detect_bot(ctx: &IngestionContext) -> (i32, String) {
    let ua = ctx.user_agent.trim().to_lowercase();

    if ua.is_empty() {
        return (90, "empty_user_agent".to_string());
    }

    if let Some(pattern) = BOT_PATTERNS.iter().find(|p| ua.contains(*p)) {
        return (95, format!("bot_pattern:{}", pattern));
    }

    let mut score = 0;
    if header_missing(&ctx.accept_language) {
        score += 20;
    }
    if header_missing(&ctx.accept_encoding) {
        score += 15;
    }
    if header_missing(&ctx.accept) {
        score += 15;
    }
    if ua.len() < 20 {
        score += 25;
    }
    if !ua.contains("mozilla") && !ua.contains("opera") {
        score += 20;
    }
    if is_datacenter_ip(&ctx.client_ip) {
        score += 30;
    }

    (score, format!("heuristics:{}", score))
}

/// Referer partial: suspicious pattern 40, absent 10
pub fn referer_risk(referer: Option<&str>) -> i32 {
    let referer = match referer.map(str::trim) {
        None | Some("") => return 10,
        Some(r) => r.to_lowercase(),
    };

    if SUSPICIOUS_REFERERS.iter().any(|p| referer.contains(p)) {
        40
    } else {
        0
    }
}

fn degraded(signal: &str, err: &CacheError) {
    tracing::warn!(
        event_type = "cache_degraded",
        signal = signal,
        error = %err,
        "Fraud signal skipped, cache unavailable"
    );
}

pub struct FraudScorer {
    cache: Arc<dyn Cache>,
    signer: Signer,
    clicks_per_ip_per_min: i64,
}

impl FraudScorer {
    pub fn new(cache: Arc<dyn Cache>, signer: Signer, clicks_per_ip_per_min: u32) -> Self {
        Self {
            cache,
            signer,
            clicks_per_ip_per_min: clicks_per_ip_per_min as i64,
        }
    }

    pub async fn score(&self, ctx: &IngestionContext, user_offer_id: Uuid) -> FraudCheckResult {
        let mut result = FraudCheckResult {
            is_vpn: is_datacenter_ip(&ctx.client_ip),
            ..Default::default()
        };
        let ip_hash = self.signer.hash_ip(&ctx.client_ip);

        // 1. Bot heuristics
        let (bot_score, bot_reason) = detect_bot(ctx);
        result.add(bot_score, format!("bot:{}", bot_reason));

        // 2. Rate limits
        match self.rate_limit_violation(&ip_hash, user_offer_id).await {
            Ok(Some(reason)) => result.add(80, format!("rate_limit:{}", reason)),
            Ok(None) => {}
            Err(err) => degraded("rate_limit", &err),
        }

        // 3. Cookie stuffing
        match self.cookie_stuffing(&ip_hash, user_offer_id).await {
            Ok(true) => result.add(70, "cookie_stuffing_suspected"),
            Ok(false) => {}
            Err(err) => degraded("cookie_stuffing", &err),
        }

        // 4. Click patterns
        match self.click_pattern_risk(&ip_hash, &ctx.user_agent).await {
            Ok(risk) => result.add(risk, format!("suspicious_pattern:{}", risk)),
            Err(err) => degraded("click_pattern", &err),
        }

        // 5. Referer
        let referer = referer_risk(ctx.referer.as_deref());
        let tag = if referer >= 40 {
            "suspicious_referer"
        } else {
            "missing_referer"
        };
        result.add(referer, tag);

        result.finish()
    }

    async fn rate_limit_violation(
        &self,
        ip_hash: &str,
        user_offer_id: Uuid,
    ) -> CacheResult<Option<&'static str>> {
        let per_ip = self
            .cache
            .incr(&format!("ratelimit:click:ip:{}", ip_hash), ONE_MINUTE)
            .await?;
        if per_ip > self.clicks_per_ip_per_min {
            return Ok(Some("rate_limit_exceeded"));
        }

        let short_id = &user_offer_id.simple().to_string()[..8];
        let per_offer = self
            .cache
            .incr(
                &format!("ratelimit:click:ip_offer:{}:{}", ip_hash, short_id),
                ONE_MINUTE,
            )
            .await?;
        if per_offer > CLICKS_PER_IP_OFFER_PER_MIN {
            return Ok(Some("too_many_clicks_same_offer"));
        }

        Ok(None)
    }

    /// More than ten distinct user offers touched from one address in five minutes
    async fn cookie_stuffing(&self, ip_hash: &str, user_offer_id: Uuid) -> CacheResult<bool> {
        let counter_key = format!("cookie_stuff:{}", ip_hash);
        let first_touch = self
            .cache
            .set_nx(
                &format!("cookie_stuff:{}:{}", ip_hash, user_offer_id),
                "1",
                COOKIE_STUFFING_WINDOW,
            )
            .await?;

        let distinct = if first_touch {
            self.cache.incr(&counter_key, COOKIE_STUFFING_WINDOW).await?
        } else {
            match self.cache.get(&counter_key).await? {
                Some(value) => value.parse().unwrap_or(0),
                None => 0,
            }
        };

        Ok(distinct > COOKIE_STUFFING_OFFERS)
    }

    async fn click_pattern_risk(&self, ip_hash: &str, user_agent: &str) -> CacheResult<i32> {
        let mut risk = 0;

        let sequential = self
            .cache
            .incr(&format!("click_seq:{}", ip_hash), ONE_MINUTE)
            .await?;
        if sequential > 20 {
            risk += 40;
        } else if sequential > 10 {
            risk += 20;
        }

        let same_agent = self
            .cache
            .incr(
                &format!("ua_pattern:{}", self.signer.hash_user_agent(user_agent)),
                UA_FARMING_WINDOW,
            )
            .await?;
        if same_agent > 100 {
            risk += 30;
        }

        Ok(risk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    const CHROME_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

    fn browser(ip: &str) -> IngestionContext {
        IngestionContext {
            client_ip: ip.to_string(),
            user_agent: CHROME_UA.to_string(),
            accept: Some("text/html".to_string()),
            accept_language: Some("en-US".to_string()),
            accept_encoding: Some("gzip".to_string()),
            referer: Some("https://blog.example.com/review".to_string()),
        }
    }

    fn scorer() -> FraudScorer {
        FraudScorer::new(Arc::new(MemoryCache::new()), Signer::new("test"), 30)
    }

    #[tokio::test]
    async fn test_clean_browser_click() {
        let result = scorer().score(&browser("81.2.69.142"), Uuid::new_v4()).await;
        assert_eq!(result.risk_score, 0);
        assert!(result.reasons.is_empty());
        assert!(!result.should_flag && !result.should_block);
    }

    #[tokio::test]
    async fn test_direct_traffic_scores_ten() {
        let mut ctx = browser("81.2.69.142");
        ctx.referer = None;
        let result = scorer().score(&ctx, Uuid::new_v4()).await;
        assert_eq!(result.risk_score, 10);
        assert_eq!(result.reasons, vec!["missing_referer"]);
    }

    #[tokio::test]
    async fn test_headless_browser_is_blocked() {
        let mut ctx = browser("81.2.69.142");
        ctx.user_agent = "Mozilla/5.0 (X11; Linux x86_64) HeadlessChrome/120.0.0.0 Safari/537.36".to_string();
        let result = scorer().score(&ctx, Uuid::new_v4()).await;
        assert_eq!(result.risk_score, 95);
        assert!(result.should_block && result.is_fraud);
        assert_eq!(result.reasons, vec!["bot:bot_pattern:headless"]);
    }

    #[tokio::test]
    async fn test_empty_user_agent() {
        let mut ctx = browser("81.2.69.142");
        ctx.user_agent.clear();
        ctx.referer = None;
        let result = scorer().score(&ctx, Uuid::new_v4()).await;
        assert_eq!(result.risk_score, 100);
        assert!(result.should_block);
    }

    #[tokio::test]
    async fn test_datacenter_ip_marks_vpn() {
        let result = scorer().score(&browser("45.76.1.2"), Uuid::new_v4()).await;
        assert!(result.is_vpn);
        assert_eq!(result.risk_score, 30);
        assert!(!result.should_flag);
    }

    #[tokio::test]
    async fn test_missing_headers_flag() {
        let mut ctx = browser("81.2.69.142");
        ctx.accept = None;
        ctx.accept_language = None;
        ctx.accept_encoding = None;
        ctx.referer = Some("http://localhost/landing.php".to_string());
        let result = scorer().score(&ctx, Uuid::new_v4()).await;
        // 50 heuristics + 40 referer
        assert_eq!(result.risk_score, 90);
        assert!(result.should_block);
    }

    #[tokio::test]
    async fn test_per_offer_rate_limit() {
        let scorer = scorer();
        let ctx = browser("81.2.69.142");
        let user_offer = Uuid::new_v4();

        for _ in 0..5 {
            let result = scorer.score(&ctx, user_offer).await;
            assert!(!result.should_block);
        }
        let sixth = scorer.score(&ctx, user_offer).await;
        assert!(sixth.should_block);
        assert!(sixth
            .reasons
            .contains(&"rate_limit:too_many_clicks_same_offer".to_string()));
    }

    async fn bump(cache: &MemoryCache, key: &str, times: usize, ttl: Duration) {
        for _ in 0..times {
            cache.incr(key, ttl).await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_ip_hard_limit() {
        let cache = Arc::new(MemoryCache::new());
        let signer = Signer::new("test");
        let scorer = FraudScorer::new(cache.clone(), signer.clone(), 30);
        let ip_key = format!("ratelimit:click:ip:{}", signer.hash_ip("81.2.69.142"));

        bump(&cache, &ip_key, 29, ONE_MINUTE).await;
        let thirtieth = scorer.score(&browser("81.2.69.142"), Uuid::new_v4()).await;
        assert_eq!(thirtieth.risk_score, 0);

        let over = scorer.score(&browser("81.2.69.142"), Uuid::new_v4()).await;
        assert_eq!(over.risk_score, 80);
        assert_eq!(over.reasons, vec!["rate_limit:rate_limit_exceeded".to_string()]);
        assert!(over.should_block);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_clicks() {
        let cache = Arc::new(MemoryCache::new());
        let signer = Signer::new("test");
        let scorer = FraudScorer::new(cache.clone(), signer.clone(), 30);
        let seq_key = format!("click_seq:{}", signer.hash_ip("81.2.69.142"));

        bump(&cache, &seq_key, 9, ONE_MINUTE).await;
        let tenth = scorer.score(&browser("81.2.69.142"), Uuid::new_v4()).await;
        assert_eq!(tenth.risk_score, 0);

        let eleventh = scorer.score(&browser("81.2.69.142"), Uuid::new_v4()).await;
        assert_eq!(eleventh.risk_score, 20);
        assert_eq!(eleventh.reasons, vec!["suspicious_pattern:20".to_string()]);

        bump(&cache, &seq_key, 9, ONE_MINUTE).await;
        let twenty_first = scorer.score(&browser("81.2.69.142"), Uuid::new_v4()).await;
        assert_eq!(twenty_first.risk_score, 40);
        assert_eq!(twenty_first.reasons, vec!["suspicious_pattern:40".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_agent_farming() {
        let cache = Arc::new(MemoryCache::new());
        let signer = Signer::new("test");
        let scorer = FraudScorer::new(cache.clone(), signer.clone(), 30);
        let ua_key = format!("ua_pattern:{}", signer.hash_user_agent(CHROME_UA));

        bump(&cache, &ua_key, 99, UA_FARMING_WINDOW).await;
        let hundredth = scorer.score(&browser("81.2.69.142"), Uuid::new_v4()).await;
        assert_eq!(hundredth.risk_score, 0);

        let farmed = scorer.score(&browser("81.2.69.143"), Uuid::new_v4()).await;
        assert_eq!(farmed.risk_score, 30);
        assert_eq!(farmed.reasons, vec!["suspicious_pattern:30".to_string()]);

        tokio::time::advance(UA_FARMING_WINDOW + Duration::from_secs(1)).await;
        let later = scorer.score(&browser("81.2.69.144"), Uuid::new_v4()).await;
        assert_eq!(later.risk_score, 0);
    }

    #[tokio::test]
    async fn test_cookie_stuffing_counts_distinct_offers() {
        let scorer = scorer();
        let ctx = browser("81.2.69.142");

        for _ in 0..10 {
            let result = scorer.score(&ctx, Uuid::new_v4()).await;
            assert!(!result.reasons.contains(&"cookie_stuffing_suspected".to_string()));
        }
        let eleventh = scorer.score(&ctx, Uuid::new_v4()).await;
        assert!(eleventh
            .reasons
            .contains(&"cookie_stuffing_suspected".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_window_resets() {
        let scorer = scorer();
        let ctx = browser("81.2.69.142");
        let user_offer = Uuid::new_v4();

        for _ in 0..6 {
            scorer.score(&ctx, user_offer).await;
        }
        tokio::time::advance(Duration::from_secs(61)).await;

        let result = scorer.score(&ctx, user_offer).await;
        assert!(!result.should_block);
    }

    #[test]
    fn test_referer_risk() {
        assert_eq!(referer_risk(None), 10);
        assert_eq!(referer_risk(Some("")), 10);
        assert_eq!(referer_risk(Some("https://TRAFFIC-exchange.example")), 40);
        assert_eq!(referer_risk(Some("https://news.example.com/")), 0);
    }

    #[test]
    fn test_short_non_browser_agent() {
        let ctx = IngestionContext {
            client_ip: "81.2.69.142".to_string(),
            user_agent: "MyApp/1.0".to_string(),
            accept: Some("*/*".to_string()),
            accept_language: Some("en".to_string()),
            accept_encoding: Some("gzip".to_string()),
            referer: None,
        };
        let (score, _) = detect_bot(&ctx);
        assert_eq!(score, 45);
    }
}
