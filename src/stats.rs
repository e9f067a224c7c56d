//! Stats/Analytics (C10, §4.9): persistent counters surviving restarts.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::config::Compression;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Hit,
    Miss,
    Revalidated,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Totals {
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub revalidations: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UrlStats {
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bandwidth {
    pub bytes_from_origin: u64,
    pub bytes_served: u64,
    pub bytes_saved_by_hits: u64,
    pub bytes_saved_by_304s: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompressionStats {
    pub total_original_bytes: u64,
    pub total_compressed_bytes: u64,
    pub per_codec_counts: HashMap<String, u64>,
}

const RESPONSE_TIME_SAMPLE_CAP: usize = 1000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub totals: Totals,
    pub per_url: HashMap<String, UrlStats>,
    pub response_times_ms: Vec<u64>,
    pub bandwidth: Bandwidth,
    pub compression: CompressionStats,
}

impl Snapshot {
    pub fn percentile(&self, p: f64) -> Option<u64> {
        if self.response_times_ms.is_empty() {
            return None;
        }
        let mut sorted = self.response_times_ms.clone();
        sorted.sort_unstable();
        let idx = ((p / 100.0) * (sorted.len() as f64 - 1.0)).round() as usize;
        sorted.get(idx.min(sorted.len() - 1)).copied()
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.totals.hits + self.totals.misses + self.totals.revalidations;
        if total == 0 {
            0.0
        } else {
            self.totals.hits as f64 / total as f64
        }
    }
}

pub struct Stats {
    inner: Mutex<Snapshot>,
    path: PathBuf,
}

impl Stats {
    pub fn load(dir: &Path) -> Stats {
        let path = dir.join("analytics.json");
        let snapshot = fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();
        Stats {
            inner: Mutex::new(snapshot),
            path,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        url: &str,
        outcome: Outcome,
        response_time_ms: u64,
        bytes_from_origin: u64,
        bytes_served: u64,
    ) {
        let mut s = self.inner.lock().unwrap();
        s.totals.requests += 1;
        match outcome {
            Outcome::Hit => {
                s.totals.hits += 1;
                s.bandwidth.bytes_saved_by_hits += bytes_served;
            }
            Outcome::Miss => s.totals.misses += 1,
            Outcome::Revalidated => {
                s.totals.revalidations += 1;
                s.bandwidth.bytes_saved_by_304s += bytes_served;
            }
            Outcome::Error => s.totals.errors += 1,
        }

        let entry = s.per_url.entry(url.to_string()).or_default();
        entry.requests += 1;
        match outcome {
            Outcome::Hit => entry.hits += 1,
            Outcome::Miss => entry.misses += 1,
            _ => {}
        }

        s.response_times_ms.push(response_time_ms);
        if s.response_times_ms.len() > RESPONSE_TIME_SAMPLE_CAP {
            let overflow = s.response_times_ms.len() - RESPONSE_TIME_SAMPLE_CAP;
            s.response_times_ms.drain(0..overflow);
        }

        s.bandwidth.bytes_from_origin += bytes_from_origin;
        s.bandwidth.bytes_served += bytes_served;

        drop(s);
        self.persist();
    }

    pub fn record_compression(&self, codec: Compression, original_bytes: u64, compressed_bytes: u64) {
        let mut s = self.inner.lock().unwrap();
        s.compression.total_original_bytes += original_bytes;
        s.compression.total_compressed_bytes += compressed_bytes;
        let name = match codec {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Brotli => "brotli",
        };
        *s.compression.per_codec_counts.entry(name.to_string()).or_insert(0) += 1;
        drop(s);
        self.persist();
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.lock().unwrap().clone()
    }

    /// Forces a persist of the current snapshot (§5 "Resource lifecycle":
    /// graceful shutdown flushes Stats before exit).
    pub fn flush(&self) {
        self.persist();
    }

    fn persist(&self) {
        let s = self.inner.lock().unwrap();
        if let Ok(json) = serde_json::to_string(&*s) {
            let _ = fs::write(&self.path, json);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> std::path::PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("cachepingora-stats-test-{:?}", std::time::Instant::now()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn records_hit_and_miss_totals() {
        let dir = temp_dir();
        let stats = Stats::load(&dir);
        stats.record("/x", Outcome::Miss, 10, 100, 100);
        stats.record("/x", Outcome::Hit, 1, 0, 100);
        let snap = stats.snapshot();
        assert_eq!(snap.totals.hits, 1);
        assert_eq!(snap.totals.misses, 1);
        assert_eq!(snap.per_url.get("/x").unwrap().requests, 2);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn response_time_samples_cap_at_1000() {
        let dir = temp_dir();
        let stats = Stats::load(&dir);
        for i in 0..1500u64 {
            stats.record("/x", Outcome::Hit, i, 0, 0);
        }
        let snap = stats.snapshot();
        assert_eq!(snap.response_times_ms.len(), 1000);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn hit_rate_computation() {
        let dir = temp_dir();
        let stats = Stats::load(&dir);
        stats.record("/x", Outcome::Hit, 1, 0, 0);
        stats.record("/x", Outcome::Miss, 1, 0, 0);
        let snap = stats.snapshot();
        assert!((snap.hit_rate() - 0.5).abs() < 1e-9);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
