//! CLI entry point (§6): configuration loading, cache-utility subcommands,
//! and the pingora server bootstrap wiring every background service
//! (log sync, health probe, rate-limit sweep) alongside the proxy itself.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use pingora::server::{ListenFds, ShutdownWatch};
use pingora_core::server::Server;
use pingora_core::services::Service;
use pingora_proxy::http_proxy_service_with_name;
use serde::{Deserialize, Serialize};

use cachepingora::cache::{now_ms, CacheStore};
use cachepingora::config::Config;
use cachepingora::glob::glob_match;
use cachepingora::health::HealthMonitor;
use cachepingora::logging;
use cachepingora::plugin::PluginHost;
use cachepingora::ratelimit::RateLimiter;
use cachepingora::service::http::HttpService;
use cachepingora::stats::Stats;

const SERVICE_NAME: &str = "cachepingora";

#[derive(Parser, Debug)]
#[command(name = SERVICE_NAME, about = "Forward/reverse caching HTTP proxy")]
struct Cli {
    /// Listen port override.
    #[arg(long)]
    port: Option<u16>,

    /// Single-origin override.
    #[arg(long)]
    origin: Option<String>,

    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Purge every cache entry and exit.
    #[arg(long)]
    clear_cache: bool,

    /// Purge entries whose request path matches this glob pattern.
    #[arg(long)]
    clear_cache_pattern: Option<String>,

    /// Purge entries for this exact origin URL.
    #[arg(long)]
    clear_cache_url: Option<String>,

    /// Purge entries cached more than this long ago, e.g. "30m", "2h", "7d".
    #[arg(long)]
    clear_cache_older_than: Option<String>,

    /// Report what a `--clear-cache*` flag would remove without removing it.
    #[arg(long)]
    dry_run: bool,

    /// Print cache statistics as JSON and exit.
    #[arg(long)]
    cache_stats: bool,

    /// Print every cache entry as JSON and exit.
    #[arg(long)]
    cache_list: bool,

    /// Cache-epoch tag; overrides `cache.version` from the configuration file.
    #[arg(long)]
    version_tag: Option<String>,
}

impl Cli {
    fn wants_cache_utility(&self) -> bool {
        self.clear_cache
            || self.clear_cache_pattern.is_some()
            || self.clear_cache_url.is_some()
            || self.clear_cache_older_than.is_some()
            || self.cache_stats
            || self.cache_list
    }
}

fn load_config(cli: &Cli) -> Result<Config, String> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_file(path).map_err(|e| e.to_string())?,
        None => Config::default(),
    };
    config = config.merge_with_opt(cli.port, cli.origin.clone());
    if let Some(tag) = &cli.version_tag {
        config.cache.version = tag.clone();
    }
    Ok(config)
}

/// Extracts the path component (no scheme/host/query) from a key's stored
/// URL, for `--clear-cache-pattern` matching against path globs.
fn url_path(url: &str) -> &str {
    let after_scheme = url.splitn(2, "://").nth(1).unwrap_or(url);
    match after_scheme.find('/') {
        Some(idx) => after_scheme[idx..].splitn(2, '?').next().unwrap_or("/"),
        None => "/",
    }
}

fn parse_duration_to_ms(input: &str) -> Result<u64, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }
    let (digits, unit) = input.split_at(input.len() - 1);
    let amount: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration: {input}"))?;
    let multiplier = match unit {
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => return Err(format!("invalid duration unit in: {input}")),
    };
    Ok(amount * multiplier)
}

#[derive(Serialize)]
struct CacheStatsOutput {
    entries: usize,
    #[serde(rename = "totalSizeBytes")]
    total_size_bytes: u64,
    #[serde(rename = "hitRate")]
    hit_rate: f64,
    #[serde(rename = "totalHits")]
    total_hits: u64,
    #[serde(rename = "totalMisses")]
    total_misses: u64,
    #[serde(rename = "totalRevalidations")]
    total_revalidations: u64,
}

#[derive(Serialize)]
struct CacheListEntry {
    key: String,
    #[serde(rename = "statusCode")]
    status_code: u16,
    #[serde(rename = "expiresAt")]
    expires_at: u64,
    #[serde(rename = "sizeBytes")]
    size_bytes: u64,
}

/// Runs whichever `--clear-cache*`/`--cache-stats`/`--cache-list` flag was
/// passed, bypassing the server entirely, and returns the process exit code.
fn run_cache_utility(cli: &Cli, config: &Config) -> i32 {
    let dir = PathBuf::from(&config.cache.dir);
    let cache = match CacheStore::load(&dir, config.cache.max_entries, config.cache.max_size_bytes()) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("failed to open cache store: {e}");
            return 2;
        }
    };

    if cli.cache_stats {
        let (entries, total_size_bytes) = cache.stats();
        let snapshot = Stats::load(&dir).snapshot();
        let out = CacheStatsOutput {
            entries,
            total_size_bytes,
            hit_rate: snapshot.hit_rate(),
            total_hits: snapshot.totals.hits,
            total_misses: snapshot.totals.misses,
            total_revalidations: snapshot.totals.revalidations,
        };
        match serde_json::to_string_pretty(&out) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("failed to render cache stats: {e}");
                return 2;
            }
        }
        return 0;
    }

    if cli.cache_list {
        let entries: Vec<CacheListEntry> = cache
            .iterate()
            .into_iter()
            .map(|(key, entry)| CacheListEntry {
                size_bytes: entry.size_with_key(&key),
                key,
                status_code: entry.status_code,
                expires_at: entry.expires_at,
            })
            .collect();
        match serde_json::to_string_pretty(&entries) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("failed to render cache list: {e}");
                return 2;
            }
        }
        return 0;
    }

    if cli.clear_cache {
        if cli.dry_run {
            let (count, _) = cache.stats();
            println!(r#"{{"wouldClear":{count}}}"#);
        } else {
            let count = cache.clear();
            println!(r#"{{"cleared":{count}}}"#);
        }
        return 0;
    }

    if let Some(pattern) = &cli.clear_cache_pattern {
        let matches = |key: &str| glob_match(pattern, url_path(key));
        if cli.dry_run {
            let count = cache.iterate().iter().filter(|(k, _)| matches(k)).count();
            println!(r#"{{"wouldClear":{count}}}"#);
        } else {
            let count = cache.delete_matching(|k, _| matches(k));
            println!(r#"{{"cleared":{count}}}"#);
        }
        return 0;
    }

    if let Some(url) = &cli.clear_cache_url {
        let matches = |key: &str| key.contains(url.as_str());
        if cli.dry_run {
            let count = cache.iterate().iter().filter(|(k, _)| matches(k)).count();
            println!(r#"{{"wouldClear":{count}}}"#);
        } else {
            let count = cache.delete_matching(|k, _| matches(k));
            println!(r#"{{"cleared":{count}}}"#);
        }
        return 0;
    }

    if let Some(duration) = &cli.clear_cache_older_than {
        let cutoff_ms = match parse_duration_to_ms(duration) {
            Ok(ms) => now_ms().saturating_sub(ms),
            Err(e) => {
                eprintln!("{e}");
                return 1;
            }
        };
        if cli.dry_run {
            let count = cache
                .iterate()
                .iter()
                .filter(|(_, e)| e.cached_at < cutoff_ms)
                .count();
            println!(r#"{{"wouldClear":{count}}}"#);
        } else {
            let count = cache.delete_matching(|_, e| e.cached_at < cutoff_ms);
            println!(r#"{{"cleared":{count}}}"#);
        }
        return 0;
    }

    0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VersionRecord {
    version: String,
    timestamp: u64,
    #[serde(rename = "cacheCleared")]
    cache_cleared: bool,
}

/// Reconciles the configured cache epoch against the persisted one (§B.4):
/// a mismatch purges the store (`versioning.mode = "purge"`, the default)
/// or is recorded without touching existing entries (`"coexist"`).
fn reconcile_cache_version(dir: &Path, cache: &CacheStore, config: &Config) {
    let path = dir.join("version.json");
    let previous: Option<VersionRecord> = std::fs::read_to_string(&path)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok());

    let current_version = config.cache.version.clone();
    let mismatched = previous
        .as_ref()
        .map(|p| p.version != current_version)
        .unwrap_or(false);

    let cache_cleared = if mismatched && config.cache.versioning.is_purge() {
        let count = cache.clear();
        log::info!("cache epoch changed ({count} entries purged)");
        true
    } else {
        if mismatched {
            log::info!("cache epoch changed, coexisting with prior-epoch entries");
        }
        false
    };

    if previous.as_ref().map(|p| p.version.as_str()) != Some(current_version.as_str()) {
        let record = VersionRecord {
            version: current_version,
            timestamp: now_ms(),
            cache_cleared,
        };
        if let Ok(json) = serde_json::to_string(&record) {
            let _ = std::fs::write(&path, json);
        }
    }
}

struct HealthProbeService {
    health: Arc<HealthMonitor>,
}

#[async_trait]
impl Service for HealthProbeService {
    async fn start_service(&mut self, _fds: Option<ListenFds>, mut shutdown: ShutdownWatch) {
        let mut ticker = tokio::time::interval(self.health.interval());
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.health.probe_all().await;
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "health probe"
    }

    fn threads(&self) -> Option<usize> {
        Some(1)
    }
}

struct RateLimitSweepService {
    rate_limiter: Arc<RateLimiter>,
    metrics_path: PathBuf,
}

#[async_trait]
impl Service for RateLimitSweepService {
    async fn start_service(&mut self, _fds: Option<ListenFds>, mut shutdown: ShutdownWatch) {
        let mut ticker = tokio::time::interval(RateLimiter::sweep_interval());
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.rate_limiter.sweep(now_ms());
                    if let Ok(json) = serde_json::to_string(&self.rate_limiter.metrics()) {
                        let _ = std::fs::write(&self.metrics_path, json);
                    }
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "rate limit sweep"
    }

    fn threads(&self) -> Option<usize> {
        Some(1)
    }
}

/// Dispatches `onServerStart`/`onServerStop` (§4.7) around the server's own
/// lifetime and flushes the Cache Store, Stats and rate-limit metrics file
/// before exit (§5 "Resource lifecycle"), waiting up to
/// `server.shutdown_timeout_secs` for in-flight work to drain first.
struct LifecycleService {
    plugins: Arc<PluginHost>,
    cache: Arc<CacheStore>,
    stats: Arc<Stats>,
    rate_limiter: Arc<RateLimiter>,
    metrics_path: PathBuf,
    drain_timeout: Duration,
}

#[async_trait]
impl Service for LifecycleService {
    async fn start_service(&mut self, _fds: Option<ListenFds>, mut shutdown: ShutdownWatch) {
        self.plugins.on_server_start().await;

        loop {
            if shutdown.changed().await.is_err() {
                break;
            }
            if *shutdown.borrow() {
                break;
            }
        }

        tokio::time::sleep(self.drain_timeout).await;

        self.plugins.on_server_stop().await;
        self.cache.flush();
        self.stats.flush();
        if let Ok(json) = serde_json::to_string(&self.rate_limiter.metrics()) {
            let _ = std::fs::write(&self.metrics_path, json);
        }
    }

    fn name(&self) -> &'static str {
        "lifecycle"
    }

    fn threads(&self) -> Option<usize> {
        Some(1)
    }
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    if cli.wants_cache_utility() {
        std::process::exit(run_cache_utility(&cli, &config));
    }

    let logger = logging::init(&config.logging);

    let cache_dir = PathBuf::from(&config.cache.dir);
    let cache = match CacheStore::load(&cache_dir, config.cache.max_entries, config.cache.max_size_bytes()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("failed to open cache store: {e}");
            std::process::exit(1);
        }
    };
    reconcile_cache_version(&cache_dir, &cache, &config);

    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
    let health = Arc::new(HealthMonitor::new(&cache_dir, config.health_check.clone()));
    let stats = Arc::new(Stats::load(&cache_dir));

    let http_service_impl = match HttpService::new(
        config.clone(),
        cache.clone(),
        rate_limiter.clone(),
        health.clone(),
        stats.clone(),
    ) {
        Ok(svc) => svc,
        Err(e) => {
            eprintln!("failed to initialize proxy service: {e}");
            std::process::exit(1);
        }
    };

    let mut server = match Server::new(None) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("failed to initialize server: {e}");
            std::process::exit(2);
        }
    };

    if let Some(logger) = logger {
        log::info!("adding log sync service...");
        server.add_service(logger);
    }

    log::info!("adding health probe service...");
    server.add_service(HealthProbeService { health: health.clone() });

    log::info!("adding rate-limit sweep service...");
    server.add_service(RateLimitSweepService {
        rate_limiter: rate_limiter.clone(),
        metrics_path: cache_dir.join("rate-limit-metrics.json"),
    });

    log::info!("adding lifecycle service...");
    server.add_service(LifecycleService {
        plugins: http_service_impl.plugins(),
        cache: cache.clone(),
        stats: stats.clone(),
        rate_limiter: rate_limiter.clone(),
        metrics_path: cache_dir.join("rate-limit-metrics.json"),
        drain_timeout: Duration::from_secs(config.server.shutdown_timeout_secs),
    });

    let mut http_service = http_proxy_service_with_name(
        &server.configuration,
        http_service_impl,
        SERVICE_NAME,
    );
    http_service.add_tcp(&format!("{}:{}", config.server.host, config.server.port));

    log::info!("bootstrapping...");
    server.bootstrap();

    log::info!("adding proxy service...");
    server.add_service(http_service);

    log::info!("starting server...");
    server.run_forever();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_path_strips_scheme_and_host() {
        assert_eq!(url_path("https://origin.example/a/b?x=1"), "/a/b");
        assert_eq!(url_path("http://origin.example"), "/");
    }

    #[test]
    fn parse_duration_to_ms_handles_all_units() {
        assert_eq!(parse_duration_to_ms("30s").unwrap(), 30_000);
        assert_eq!(parse_duration_to_ms("2m").unwrap(), 120_000);
        assert_eq!(parse_duration_to_ms("1h").unwrap(), 3_600_000);
        assert_eq!(parse_duration_to_ms("7d").unwrap(), 7 * 86_400_000);
        assert!(parse_duration_to_ms("abc").is_err());
        assert!(parse_duration_to_ms("10x").is_err());
    }

    #[test]
    fn cli_wants_cache_utility_detects_any_flag() {
        let mut cli = Cli::parse_from(["cachepingora"]);
        assert!(!cli.wants_cache_utility());
        cli.cache_stats = true;
        assert!(cli.wants_cache_utility());
    }
}
