//! GeoIP lookup collaborator
//!
//! Lookups are best effort: any failure yields no country and the click
//! proceeds. Callers bound the wait with [`LOOKUP_TIMEOUT`].

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;
use crate::security::Signer;

/// Hard ceiling on a lookup, cache included
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);
const COUNTRY_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[async_trait]
pub trait GeoIpLookup: Send + Sync {
    /// ISO country code of `ip`, if known
    async fn country(&self, ip: &str) -> Option<String>;
}

/// Lookup that never resolves (GeoIP disabled)
pub struct DisabledGeoIp;

#[async_trait]
impl GeoIpLookup for DisabledGeoIp {
    async fn country(&self, _ip: &str) -> Option<String> {
        None
    }
}

/// Fixed answer, for local runs and tests
pub struct StaticGeoIp(pub String);

#[async_trait]
impl GeoIpLookup for StaticGeoIp {
    async fn country(&self, _ip: &str) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Private, loopback and link-local addresses have no country
pub fn is_public_ip(ip: &str) -> bool {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(addr)) => {
            !(addr.is_private()
                || addr.is_loopback()
                || addr.is_link_local()
                || addr.is_unspecified()
                || addr.is_broadcast())
        }
        Ok(IpAddr::V6(addr)) => {
            let unique_local = (addr.segments()[0] & 0xfe00) == 0xfc00;
            !(addr.is_loopback() || addr.is_unspecified() || unique_local)
        }
        Err(_) => false,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    country_code: Option<String>,
}

/// ip-api.com style client with a 24 h country cache
pub struct IpApiClient {
    base_url: String,
    client: Client,
    cache: Arc<dyn Cache>,
    signer: Signer,
}

impl IpApiClient {
    pub fn new(base_url: impl Into<String>, cache: Arc<dyn Cache>, signer: Signer) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::builder()
                .timeout(LOOKUP_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
            cache,
            signer,
        }
    }

    async fn fetch(&self, ip: &str) -> Result<Option<String>, reqwest::Error> {
        let url = format!("{}/{}?fields=status,countryCode", self.base_url, ip);
        let response: IpApiResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.status != "success" {
            return Ok(None);
        }
        Ok(response.country_code.filter(|c| !c.is_empty()))
    }
}

/// Lookup URLs embed the raw address
fn redact_url(e: reqwest::Error) -> String {
    e.without_url().to_string()
}

#[async_trait]
impl GeoIpLookup for IpApiClient {
    async fn country(&self, ip: &str) -> Option<String> {
        if !is_public_ip(ip) {
            return None;
        }

        let ip_hash = self.signer.hash_ip(ip);
        let cache_key = format!("geoip:{}", ip_hash);
        if let Ok(Some(country)) = self.cache.get(&cache_key).await {
            return Some(country);
        }

        match self.fetch(ip).await {
            Ok(Some(country)) => {
                if let Err(e) = self.cache.set(&cache_key, &country, COUNTRY_CACHE_TTL).await {
                    tracing::debug!("GeoIP cache write failed: {}", e);
                }
                Some(country)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(%ip_hash, error = %redact_url(e), "GeoIP lookup failed");
                None
            }
        }
    }
}
