use super::AuthError;
use crate::config::{RateLimitConfig, WindowLimit};
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::time::Duration;

/// Tracked keys before idle ones are swept
const SWEEP_THRESHOLD: usize = 10_000;

/// `max_requests` at once, replenished evenly over the window
pub fn quota_for(limit: WindowLimit) -> Quota {
    let burst = NonZeroU32::new(limit.max_requests).unwrap_or(NonZeroU32::MIN);
    let window = Duration::from_secs(limit.window_secs.max(1));

    Quota::with_period(window / burst.get())
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}

/// Per-key request limiter (keyed by client address)
pub struct RateLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
    clock: DefaultClock,
    message: String,
}

impl RateLimiter {
    pub fn new(quota: Quota, message: impl Into<String>) -> Self {
        Self {
            limiter: governor::RateLimiter::keyed(quota),
            clock: DefaultClock::default(),
            message: message.into(),
        }
    }

    pub fn from_limit(limit: WindowLimit, message: impl Into<String>) -> Self {
        Self::new(quota_for(limit), message)
    }

    /// Count one request for `key`
    pub fn check(&self, key: &str) -> Result<(), AuthError> {
        if self.limiter.len() >= SWEEP_THRESHOLD {
            self.limiter.retain_recent();
        }

        self.limiter
            .check_key(&key.to_string())
            .map_err(|not_until| {
                let retry_after = not_until
                    .wait_time_from(self.clock.now())
                    .as_secs()
                    .max(1);
                AuthError::too_many_attempts(&self.message, retry_after)
            })
    }
}

/// The three limiters the HTTP layer applies, plus the proxies whose
/// `X-Forwarded-For` header is believed
pub struct RateLimits {
    pub auth: RateLimiter,
    pub login: RateLimiter,
    pub api: RateLimiter,
    trusted_proxies: Vec<IpAddr>,
}

impl RateLimits {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            auth: RateLimiter::from_limit(
                config.auth,
                "Too many login attempts, please try again later",
            ),
            login: RateLimiter::from_limit(
                config.login,
                "Too many login attempts, please try again after an hour",
            ),
            api: RateLimiter::from_limit(
                config.api,
                "Too many requests, please try again later",
            ),
            trusted_proxies: config.trusted_proxies.clone(),
        }
    }

    /// Address a request is counted against.
    ///
    /// The peer address, unless the peer is a trusted proxy: then the
    /// nearest `X-Forwarded-For` hop that is not itself a trusted proxy.
    pub fn client_key(&self, remote: Option<IpAddr>, forwarded_for: Option<&str>) -> String {
        let Some(peer) = remote else {
            return "unknown".to_string();
        };
        if !self.trusted_proxies.contains(&peer) {
            return peer.to_string();
        }

        let hops: Vec<IpAddr> = forwarded_for
            .unwrap_or_default()
            .split(',')
            .filter_map(|hop| hop.trim().parse().ok())
            .collect();

        hops.iter()
            .rev()
            .find(|hop| !self.trusted_proxies.contains(hop))
            .or_else(|| hops.first())
            .copied()
            .unwrap_or(peer)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthErrorCode;

    fn limit(window_secs: u64, max_requests: u32) -> WindowLimit {
        WindowLimit {
            window_secs,
            max_requests,
        }
    }

    #[test]
    fn test_blocks_after_max() {
        let limiter = RateLimiter::from_limit(limit(60, 2), "slow down");

        assert!(limiter.check("10.0.0.1").is_ok());
        assert!(limiter.check("10.0.0.1").is_ok());

        let err = limiter.check("10.0.0.1").unwrap_err();
        assert_eq!(err.code(), AuthErrorCode::TooManyAttempts);
        assert_eq!(err.http_status(), 429);
        let retry_after = err.details().unwrap()["retryAfter"].as_u64().unwrap();
        assert!((1..=30).contains(&retry_after), "{}", retry_after);

        // Other keys have their own budget
        assert!(limiter.check("10.0.0.2").is_ok());
    }

    #[test]
    fn test_quota_spreads_window() {
        let quota = quota_for(limit(60 * 60, 5));
        assert_eq!(quota.burst_size().get(), 5);
        assert_eq!(quota.replenish_interval(), Duration::from_secs(12 * 60));

        // A zero limit still lets one request through
        assert_eq!(quota_for(limit(60, 0)).burst_size().get(), 1);
    }

    #[test]
    fn test_from_config() {
        let limits = RateLimits::from_config(&RateLimitConfig::default());
        for _ in 0..5 {
            assert!(limits.login.check("ip").is_ok());
        }
        assert!(limits.login.check("ip").is_err());
        assert!(limits.auth.check("ip").is_ok());
    }

    #[test]
    fn test_client_key_ignores_forwarded_for_from_untrusted_peer() {
        let limits = RateLimits::from_config(&RateLimitConfig::default());
        let peer: IpAddr = "198.51.100.7".parse().unwrap();

        assert_eq!(
            limits.client_key(Some(peer), Some("10.0.0.1")),
            "198.51.100.7"
        );
        assert_eq!(limits.client_key(None, Some("10.0.0.1")), "unknown");
    }

    #[test]
    fn test_client_key_behind_trusted_proxy() {
        let config = RateLimitConfig {
            trusted_proxies: vec!["10.0.0.2".parse().unwrap(), "10.0.0.3".parse().unwrap()],
            ..RateLimitConfig::default()
        };
        let limits = RateLimits::from_config(&config);
        let proxy: IpAddr = "10.0.0.2".parse().unwrap();

        // A spoofed leading hop is skipped in favour of the one the proxy saw
        assert_eq!(
            limits.client_key(Some(proxy), Some("1.2.3.4, 203.0.113.9, 10.0.0.3")),
            "203.0.113.9"
        );
        assert_eq!(limits.client_key(Some(proxy), None), "10.0.0.2");
    }
}
