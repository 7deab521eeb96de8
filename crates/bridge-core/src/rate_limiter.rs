use std::num::NonZeroU32;

use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter as GovernorLimiter};
use nonzero_ext::nonzero;

/// IP-keyed token-bucket rate limiter backing the REST collaborator's
/// 429 response contract. Each key gets an independent bucket of rate
/// `r` tokens/sec and burst `b`.
pub struct RateLimiter {
    inner: GovernorLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>,
}

impl RateLimiter {
    pub fn new(rate_per_sec: u32, burst: u32) -> Self {
        let rate = NonZeroU32::new(rate_per_sec).unwrap_or(nonzero!(1u32));
        let burst = NonZeroU32::new(burst).unwrap_or(nonzero!(1u32));
        let quota = Quota::per_second(rate).allow_burst(burst);
        RateLimiter { inner: GovernorLimiter::keyed(quota) }
    }

    /// `true` if a token was available and consumed for `key`.
    pub fn allow(&self, key: &str) -> bool {
        self.inner.check_key(&key.to_string()).is_ok()
    }
}

/// Resolves the rate-limiter key for an inbound request: prefer
/// `X-Forwarded-For`, then `X-Real-IP`, else the raw peer address.
pub fn resolve_key(forwarded_for: Option<&str>, real_ip: Option<&str>, peer_addr: &str) -> String {
    if let Some(xff) = forwarded_for {
        if let Some(first) = xff.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    if let Some(ip) = real_ip {
        if !ip.trim().is_empty() {
            return ip.trim().to_string();
        }
    }
    peer_addr.to_string()
}
