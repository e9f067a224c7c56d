//! Health Monitor (C7, §4.6): periodically probes each configured origin and
//! tracks a small status state machine, persisted across restarts.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::cache::now_ms;
use crate::config::HealthCheckConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Unknown,
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginHealth {
    pub origin: String,
    pub status: Status,
    pub consecutive_failures: u32,
    pub last_check_time: u64,
    pub last_error: Option<String>,
    pub total_checks: u64,
    pub total_failures: u64,
}

impl OriginHealth {
    fn new(origin: String) -> OriginHealth {
        OriginHealth {
            origin,
            status: Status::Unknown,
            consecutive_failures: 0,
            last_check_time: 0,
            last_error: None,
            total_checks: 0,
            total_failures: 0,
        }
    }

    pub fn uptime_ratio(&self) -> f64 {
        if self.total_checks == 0 {
            1.0
        } else {
            1.0 - (self.total_failures as f64 / self.total_checks as f64)
        }
    }

    fn record(&mut self, ok: bool, error: Option<String>) {
        self.last_check_time = now_ms();
        self.total_checks += 1;
        if ok {
            self.consecutive_failures = 0;
            self.last_error = None;
            // unknown -> healthy on first success; unhealthy -> healthy after 1 success.
            self.status = Status::Healthy;
        } else {
            self.consecutive_failures += 1;
            self.total_failures += 1;
            self.last_error = error;
            if self.status != Status::Unhealthy && self.consecutive_failures >= 3 {
                self.status = Status::Unhealthy;
            } else if self.status == Status::Unknown {
                // still unknown until either a success or 3 failures land it
                // on a definite state; leave as-is otherwise.
            }
        }
    }
}

struct State {
    origins: HashMap<String, OriginHealth>,
}

pub struct HealthMonitor {
    state: Mutex<State>,
    client: Client,
    config: HealthCheckConfig,
    path: PathBuf,
}

impl HealthMonitor {
    pub fn new(dir: &Path, config: HealthCheckConfig) -> HealthMonitor {
        let path = dir.join("health-metrics.json");
        let origins = Self::load(&path, &config.origins);
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout.max(1)))
            .build()
            .expect("reqwest client builds with static config");
        HealthMonitor {
            state: Mutex::new(State { origins }),
            client,
            config,
            path,
        }
    }

    fn load(path: &Path, configured: &[String]) -> HashMap<String, OriginHealth> {
        let mut map: HashMap<String, OriginHealth> = fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();
        for origin in configured {
            map.entry(origin.clone())
                .or_insert_with(|| OriginHealth::new(origin.clone()));
        }
        map
    }

    pub fn get(&self, origin: &str) -> Option<OriginHealth> {
        self.state.lock().unwrap().origins.get(origin).cloned()
    }

    pub fn all(&self) -> Vec<OriginHealth> {
        self.state.lock().unwrap().origins.values().cloned().collect()
    }

    /// Runs one probe round across all configured origins.
    pub async fn probe_all(&self) {
        if !self.config.enabled {
            return;
        }
        let origins: Vec<String> = self.config.origins.clone();
        for origin in origins {
            self.probe_one(&origin).await;
        }
        self.persist();
    }

    async fn probe_one(&self, origin: &str) {
        let url = format!("{}{}", origin.trim_end_matches('/'), self.config.path);
        let method = if self.config.method.eq_ignore_ascii_case("get") {
            reqwest::Method::GET
        } else {
            reqwest::Method::HEAD
        };

        let result = self.client.request(method.clone(), &url).send().await;
        let (ok, error) = match result {
            Ok(resp) if resp.status().is_success() || resp.status().is_redirection() => {
                (true, None)
            }
            Ok(resp) => (false, Some(format!("status {}", resp.status()))),
            Err(e) => (false, Some(e.to_string())),
        };

        let mut state = self.state.lock().unwrap();
        let entry = state
            .origins
            .entry(origin.to_string())
            .or_insert_with(|| OriginHealth::new(origin.to_string()));
        entry.record(ok, error);
    }

    fn persist(&self) {
        let state = self.state.lock().unwrap();
        if let Ok(json) = serde_json::to_string(&state.origins) {
            let _ = fs::write(&self.path, json);
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.config.interval.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_becomes_healthy_on_first_success() {
        let mut h = OriginHealth::new("http://o".to_string());
        h.record(true, None);
        assert_eq!(h.status, Status::Healthy);
    }

    #[test]
    fn healthy_becomes_unhealthy_after_three_consecutive_failures() {
        let mut h = OriginHealth::new("http://o".to_string());
        h.record(true, None);
        h.record(false, Some("e".into()));
        h.record(false, Some("e".into()));
        assert_eq!(h.status, Status::Healthy);
        h.record(false, Some("e".into()));
        assert_eq!(h.status, Status::Unhealthy);
    }

    #[test]
    fn unhealthy_recovers_after_one_success() {
        let mut h = OriginHealth::new("http://o".to_string());
        for _ in 0..3 {
            h.record(false, Some("e".into()));
        }
        assert_eq!(h.status, Status::Unhealthy);
        h.record(true, None);
        assert_eq!(h.status, Status::Healthy);
    }

    #[test]
    fn uptime_ratio_reflects_failures() {
        let mut h = OriginHealth::new("http://o".to_string());
        h.record(true, None);
        h.record(false, Some("e".into()));
        assert!((h.uptime_ratio() - 0.5).abs() < 1e-9);
    }
}
