//! Rate-Limit & ACL (C5, §4.4): per-IP sliding windows, a global window, and
//! allow/deny lists (CIDR/glob/exact), grounded on the teacher's
//! `ip_restriction`/`rate_limit` plugins but generalized to the spec's
//! exact contract (denylist precedence, accurate `Retry-After`, a 5-minute
//! background sweep).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::config::RateLimitConfig;
use crate::error::ProxyError;

const ONE_MINUTE_MS: u64 = 60_000;
const ONE_HOUR_MS: u64 = 3_600_000;

pub fn normalize_ip(ip: &str) -> String {
    if ip == "::1" {
        "127.0.0.1".to_string()
    } else {
        ip.to_string()
    }
}

/// Matches `ip` against a list of exact/CIDR/glob patterns.
fn matches_list(ip: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        if pattern == "*" {
            return true;
        }
        if let Ok(net) = pattern.parse::<IpNetwork>() {
            if let Ok(addr) = ip.parse() {
                return net.contains(addr);
            }
        }
        if pattern.contains('*') {
            return crate::glob::glob_match(&pattern.replace('.', "/"), &ip.replace('.', "/"));
        }
        pattern == ip
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitMetrics {
    pub total_checked: u64,
    pub total_rejected_acl: u64,
    pub total_rejected_rate: u64,
}

impl Default for RateLimitMetrics {
    fn default() -> Self {
        RateLimitMetrics {
            total_checked: 0,
            total_rejected_acl: 0,
            total_rejected_rate: 0,
        }
    }
}

struct State {
    per_ip: HashMap<String, Vec<u64>>,
    global: Vec<u64>,
    metrics: RateLimitMetrics,
}

pub struct RateLimiter {
    state: Mutex<State>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> RateLimiter {
        RateLimiter {
            state: Mutex::new(State {
                per_ip: HashMap::new(),
                global: Vec::new(),
                metrics: RateLimitMetrics::default(),
            }),
            config,
        }
    }

    /// Runs the §4.4 decision sequence for one request arriving `now_ms`.
    pub fn check(&self, ip: &str, now_ms: u64) -> Result<(), ProxyError> {
        let ip = normalize_ip(ip);
        let mut state = self.state.lock().unwrap();
        state.metrics.total_checked += 1;

        if matches_list(&ip, &self.config.blacklist) {
            state.metrics.total_rejected_acl += 1;
            return Err(ProxyError::AclRejected(format!("{ip} is denylisted")));
        }

        let allowlisted = matches_list(&ip, &self.config.whitelist);

        if self.config.enabled && !allowlisted {
            if let Some(retry_after) = self.would_exceed(&state, &ip, now_ms) {
                state.metrics.total_rejected_rate += 1;
                return Err(ProxyError::RateLimited {
                    retry_after_secs: retry_after,
                });
            }
        }

        let log = state.per_ip.entry(ip).or_default();
        log.push(now_ms);
        state.global.push(now_ms);
        Ok(())
    }

    fn would_exceed(&self, state: &State, ip: &str, now_ms: u64) -> Option<u64> {
        let empty = Vec::new();
        let log = state.per_ip.get(ip).unwrap_or(&empty);

        if let Some(limit) = self.config.requests_per_minute {
            if let Some(retry) = window_retry_after(log, now_ms, ONE_MINUTE_MS, limit) {
                return Some(retry);
            }
        }
        if let Some(limit) = self.config.requests_per_hour {
            if let Some(retry) = window_retry_after(log, now_ms, ONE_HOUR_MS, limit) {
                return Some(retry);
            }
        }
        if let Some(limit) = self.config.global_limit {
            if let Some(retry) = window_retry_after(&state.global, now_ms, ONE_MINUTE_MS, limit) {
                return Some(retry);
            }
        }
        None
    }

    /// Discards timestamps older than one hour across all logs (§4.4
    /// background sweep, intended to run every 5 minutes).
    pub fn sweep(&self, now_ms: u64) {
        let mut state = self.state.lock().unwrap();
        let cutoff = now_ms.saturating_sub(ONE_HOUR_MS);
        for log in state.per_ip.values_mut() {
            log.retain(|t| *t >= cutoff);
        }
        state.per_ip.retain(|_, log| !log.is_empty());
        state.global.retain(|t| *t >= cutoff);
    }

    pub fn metrics(&self) -> RateLimitMetrics {
        self.state.lock().unwrap().metrics.clone()
    }

    pub fn sweep_interval() -> Duration {
        Duration::from_secs(5 * 60)
    }
}

/// Returns `Some(retry_after_secs)` if recording one more request at
/// `now_ms` would exceed `limit` within the trailing `window_ms`; the
/// retry value is the number of seconds until the oldest in-window
/// timestamp ages out.
fn window_retry_after(log: &[u64], now_ms: u64, window_ms: u64, limit: u32) -> Option<u64> {
    let cutoff = now_ms.saturating_sub(window_ms);
    let in_window: Vec<u64> = log.iter().copied().filter(|t| *t >= cutoff).collect();
    if in_window.len() as u32 >= limit {
        let oldest = *in_window.iter().min().unwrap_or(&now_ms);
        let ages_out_at = oldest + window_ms;
        let retry_ms = ages_out_at.saturating_sub(now_ms);
        let retry_secs = (retry_ms + 999) / 1000; // round up, at least 1s
        Some(retry_secs.max(1))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(per_minute: Option<u32>) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            requests_per_minute: per_minute,
            requests_per_hour: None,
            global_limit: None,
            whitelist: vec![],
            blacklist: vec![],
        }
    }

    #[test]
    fn allows_under_the_limit() {
        let limiter = RateLimiter::new(config(Some(2)));
        assert!(limiter.check("1.2.3.4", 1000).is_ok());
        assert!(limiter.check("1.2.3.4", 1100).is_ok());
    }

    #[test]
    fn rejects_the_third_request_in_window_with_retry_after() {
        let limiter = RateLimiter::new(config(Some(2)));
        limiter.check("1.2.3.4", 0).unwrap();
        limiter.check("1.2.3.4", 500).unwrap();
        let err = limiter.check("1.2.3.4", 900).unwrap_err();
        match err {
            ProxyError::RateLimited { retry_after_secs } => assert!(retry_after_secs >= 1),
            _ => panic!("expected RateLimited"),
        }
    }

    #[test]
    fn denylist_takes_precedence_over_allowlist() {
        let mut cfg = config(Some(1));
        cfg.whitelist = vec!["1.2.3.4".to_string()];
        cfg.blacklist = vec!["1.2.3.4".to_string()];
        let limiter = RateLimiter::new(cfg);
        assert!(matches!(
            limiter.check("1.2.3.4", 0),
            Err(ProxyError::AclRejected(_))
        ));
    }

    #[test]
    fn allowlisted_ip_bypasses_rate_limit() {
        let mut cfg = config(Some(1));
        cfg.whitelist = vec!["1.2.3.4".to_string()];
        let limiter = RateLimiter::new(cfg);
        for i in 0..10 {
            assert!(limiter.check("1.2.3.4", i * 10).is_ok());
        }
    }

    #[test]
    fn cidr_denylist_matches() {
        let mut cfg = config(None);
        cfg.blacklist = vec!["10.0.0.0/8".to_string()];
        let limiter = RateLimiter::new(cfg);
        assert!(limiter.check("10.1.2.3", 0).is_err());
        assert!(limiter.check("11.1.2.3", 0).is_ok());
    }

    #[test]
    fn loopback_v6_normalizes_before_matching() {
        let mut cfg = config(None);
        cfg.blacklist = vec!["127.0.0.1".to_string()];
        let limiter = RateLimiter::new(cfg);
        assert!(limiter.check("::1", 0).is_err());
    }

    #[test]
    fn sweep_discards_timestamps_older_than_one_hour() {
        let limiter = RateLimiter::new(config(None));
        limiter.check("9.9.9.9", 0).unwrap();
        limiter.sweep(ONE_HOUR_MS + 1);
        let state = limiter.state.lock().unwrap();
        assert!(state.per_ip.get("9.9.9.9").is_none());
    }
}
