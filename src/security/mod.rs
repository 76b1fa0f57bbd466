//! Keyed hashing with the process-wide secret
//!
//! Raw IPs and user agents never leave the request: everything persisted or
//! used as a cache key goes through [`Signer`] first.

use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Length of the hex prefix kept for IP and UA hashes
const HASH_PREFIX_LEN: usize = 16;

static VERSION_NUMBERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\d.]+").expect("Invalid regex pattern"));

/// Lowercase a user agent and strip version numbers so that minor browser
/// updates map onto the same value
pub fn normalize_user_agent(user_agent: &str) -> String {
    VERSION_NUMBERS
        .replace_all(&user_agent.to_lowercase(), "")
        .into_owned()
}

/// HMAC-SHA256 signer holding the process secret
#[derive(Clone)]
pub struct Signer {
    secret: Vec<u8>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

impl Signer {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> HmacSha256 {
        <HmacSha256 as Mac>::new_from_slice(&self.secret).expect("HMAC accepts keys of any length")
    }

    /// Full hex HMAC of `message`
    pub fn sign(&self, message: &str) -> String {
        let mut mac = self.mac();
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn hash_ip(&self, ip: &str) -> String {
        self.prefixed_hash("ip", ip)
    }

    /// Hash of the normalized user agent
    pub fn hash_user_agent(&self, user_agent: &str) -> String {
        self.prefixed_hash("ua", &normalize_user_agent(user_agent))
    }

    fn prefixed_hash(&self, domain: &str, value: &str) -> String {
        let mut digest = self.sign(&format!("{}:{}", domain, value));
        digest.truncate(HASH_PREFIX_LEN);
        digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_user_agent_strips_versions() {
        assert_eq!(
            normalize_user_agent("Mozilla/5.0 Chrome/120.0.1"),
            normalize_user_agent("mozilla/5.1 Chrome/121.0.7")
        );
        assert_eq!(normalize_user_agent("Mozilla/5.0"), "mozilla/");
    }

    #[test]
    fn test_hashes_are_keyed() {
        let a = Signer::new("secret-a");
        let b = Signer::new("secret-b");

        assert_eq!(a.hash_ip("81.2.69.142"), a.hash_ip("81.2.69.142"));
        assert_ne!(a.hash_ip("81.2.69.142"), b.hash_ip("81.2.69.142"));
        assert_eq!(a.hash_ip("81.2.69.142").len(), 16);
        assert!(!a.hash_ip("81.2.69.142").contains("81.2"));
    }

    #[test]
    fn test_ip_and_ua_domains_differ() {
        let signer = Signer::new("secret");
        assert_ne!(signer.hash_ip("same"), signer.hash_user_agent("same"));
    }

    #[test]
    fn test_sign_is_keyed_hex() {
        let signer = Signer::new("secret");
        let sig = signer.sign("payload");
        assert_eq!(sig.len(), 64);
        assert_eq!(sig, signer.sign("payload"));
        assert_ne!(sig, Signer::new("other").sign("payload"));
    }
}
