use std::fmt;

/// Unified error taxonomy for the proxy core (§7 of the design).
///
/// Every component returns one of these to the pipeline; the pipeline is the
/// single place that maps a `ProxyError` to an HTTP status code and to the
/// `onError` plugin hook.
#[derive(Debug)]
pub enum ProxyError {
    ConfigInvalid(String),
    AclRejected(String),
    RateLimited { retry_after_secs: u64 },
    NoRoute(String),
    OriginUnavailable(String),
    ResponseTooLarge { limit_bytes: usize },
    PluginFault { plugin: String, message: String },
    CachePersistenceFault(String),
    Internal(String),
}

pub type ProxyResult<T> = Result<T, ProxyError>;

impl ProxyError {
    /// HTTP status code the pipeline should answer with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ProxyError::ConfigInvalid(_) => 500,
            ProxyError::AclRejected(_) => 403,
            ProxyError::RateLimited { .. } => 429,
            ProxyError::NoRoute(_) => 502,
            ProxyError::OriginUnavailable(_) => 502,
            ProxyError::ResponseTooLarge { .. } => 502,
            ProxyError::PluginFault { .. } => 200, // never surfaced as an HTTP error
            ProxyError::CachePersistenceFault(_) => 200, // logged, never surfaced
            ProxyError::Internal(_) => 500,
        }
    }

    /// Pipeline stage name used when reporting `onError`.
    pub fn stage(&self) -> &'static str {
        match self {
            ProxyError::ConfigInvalid(_) => "config",
            ProxyError::AclRejected(_) => "ratelimit",
            ProxyError::RateLimited { .. } => "ratelimit",
            ProxyError::NoRoute(_) => "route",
            ProxyError::OriginUnavailable(_) => "origin",
            ProxyError::ResponseTooLarge { .. } => "origin",
            ProxyError::PluginFault { .. } => "plugin",
            ProxyError::CachePersistenceFault(_) => "cache",
            ProxyError::Internal(_) => "internal",
        }
    }

    /// Short, client-safe explanation for a `text/plain` error body.
    pub fn public_message(&self) -> String {
        match self {
            ProxyError::ConfigInvalid(m) => format!("configuration error: {m}"),
            ProxyError::AclRejected(_) => "forbidden".to_string(),
            ProxyError::RateLimited { .. } => "rate limit exceeded".to_string(),
            ProxyError::NoRoute(path) => format!("no route for {path}"),
            ProxyError::OriginUnavailable(m) => format!("upstream unavailable: {m}"),
            ProxyError::ResponseTooLarge { limit_bytes } => {
                format!("upstream response exceeded {limit_bytes} bytes")
            }
            ProxyError::PluginFault { .. } => "internal error".to_string(),
            ProxyError::CachePersistenceFault(_) => "internal error".to_string(),
            ProxyError::Internal(m) => format!("internal error: {m}"),
        }
    }
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::ConfigInvalid(m) => write!(f, "config invalid: {m}"),
            ProxyError::AclRejected(m) => write!(f, "acl rejected: {m}"),
            ProxyError::RateLimited { retry_after_secs } => {
                write!(f, "rate limited, retry after {retry_after_secs}s")
            }
            ProxyError::NoRoute(path) => write!(f, "no route: {path}"),
            ProxyError::OriginUnavailable(m) => write!(f, "origin unavailable: {m}"),
            ProxyError::ResponseTooLarge { limit_bytes } => {
                write!(f, "response too large (limit {limit_bytes} bytes)")
            }
            ProxyError::PluginFault { plugin, message } => {
                write!(f, "plugin '{plugin}' fault: {message}")
            }
            ProxyError::CachePersistenceFault(m) => write!(f, "cache persistence fault: {m}"),
            ProxyError::Internal(m) => write!(f, "internal error: {m}"),
        }
    }
}

impl std::error::Error for ProxyError {}

/// Only crossing point into pingora's own error type, used where the
/// `ProxyHttp` trait requires one (e.g. `fail_to_connect`). The pipeline
/// itself never returns this — it always turns a `ProxyError` into an HTTP
/// response directly (§7 "Propagation policy").
impl From<ProxyError> for Box<pingora_error::Error> {
    fn from(err: ProxyError) -> Self {
        Box::new(pingora_error::Error::new_str(&err.to_string()))
    }
}

/// Adds `.with_context("doing X")` to any `Result`, wrapping the error as
/// `ProxyError::Internal` with the context prefixed — mirrors the teacher's
/// `ErrorContext` extension trait.
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> ProxyResult<T>;
}

impl<T, E: fmt::Display> ErrorContext<T> for Result<T, E> {
    fn with_context(self, context: &str) -> ProxyResult<T> {
        self.map_err(|e| ProxyError::Internal(format!("{context}: {e}")))
    }
}
