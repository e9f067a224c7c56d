//! Ancillary entities shared by the Plugin Host and Request Pipeline (§3
//! `RequestContext`).

use std::collections::HashMap;

use crate::stats::Outcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Revalidated,
    Error,
}

impl CacheStatus {
    pub fn as_header_value(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Revalidated => "REVALIDATED",
            CacheStatus::Error => "MISS",
        }
    }

    pub fn as_outcome(&self) -> Outcome {
        match self {
            CacheStatus::Hit => Outcome::Hit,
            CacheStatus::Miss => Outcome::Miss,
            CacheStatus::Revalidated => Outcome::Revalidated,
            CacheStatus::Error => Outcome::Error,
        }
    }
}

/// `RequestContext` threaded through the whole pipeline (§3) and handed to
/// every plugin hook.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub client_ip: String,
    pub method: String,
    pub url: String,
    /// Mutable per the §4.7 contract: only `beforeRequest` may change this.
    pub request_headers: HashMap<String, String>,
    /// Mutable per the §4.7 contract: only `afterRequest` may change this.
    pub response_headers: HashMap<String, String>,
    pub start_time_ms: u64,
    pub cache_status: Option<CacheStatus>,
    pub plugin_errors: Vec<String>,
}

impl RequestContext {
    pub fn new(request_id: String, client_ip: String, method: String, url: String, start_time_ms: u64) -> Self {
        RequestContext {
            request_id,
            client_ip,
            method,
            url,
            request_headers: HashMap::new(),
            response_headers: HashMap::new(),
            start_time_ms,
            cache_status: None,
            plugin_errors: Vec::new(),
        }
    }
}

impl Default for RequestContext {
    /// Placeholder context pingora hands `new_ctx()`; `request_filter`
    /// immediately replaces it with a populated `RequestContext::new(...)`
    /// once the request line and start time are known (§4.8 stage 1).
    fn default() -> Self {
        RequestContext::new(String::new(), String::new(), String::new(), String::new(), 0)
    }
}

/// The response half handed to `afterRequest` (§4.7): only `headers` is
/// contractually mutable by a plugin, `status_code` is advisory/read-only.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
}
