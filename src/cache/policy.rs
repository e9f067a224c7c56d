//! Key & TTL Policy and Admission Policy (§4.2, C2/C3).

use std::collections::HashMap;

use crate::glob::glob_match;

/// Parses `max-age=N` out of a `Cache-Control` header value. Returns `None`
/// if absent or not a valid non-negative integer.
pub fn max_age_seconds(cache_control: Option<&str>) -> Option<u64> {
    let cc = cache_control?;
    for directive in cc.split(',') {
        let directive = directive.trim();
        if let Some(value) = directive.strip_prefix("max-age=") {
            if let Ok(n) = value.trim().parse::<u64>() {
                return Some(n);
            }
        }
    }
    None
}

/// `ttlOf(url, originCacheControl)`: max-age > longest-match pattern config
/// > configured default. Returns milliseconds.
pub fn ttl_of_ms(
    path: &str,
    cache_control: Option<&str>,
    pattern_ttl: &HashMap<String, u64>,
    default_ttl_secs: u64,
) -> u64 {
    if let Some(secs) = max_age_seconds(cache_control) {
        return secs.saturating_mul(1000);
    }

    let candidates: Vec<(String, u64)> =
        pattern_ttl.iter().map(|(p, v)| (p.clone(), *v)).collect();
    let matched = crate::glob::best_match(candidates.iter(), path);
    if let Some((_, secs)) = matched {
        return secs.saturating_mul(1000);
    }
    let _ = glob_match; // keep import meaningful even if best_match is used above
    default_ttl_secs.saturating_mul(1000)
}

fn cache_control_forbids_caching(cache_control: Option<&str>) -> bool {
    match cache_control {
        None => false,
        Some(cc) => cc.split(',').any(|d| {
            let d = d.trim().to_ascii_lowercase();
            d == "no-store" || d == "no-cache" || d == "private"
        }),
    }
}

/// `isCacheable(method, statusCode, cacheControl, hasAuth, varyHeaders)`.
#[allow(clippy::too_many_arguments)]
pub fn is_cacheable(
    method: &str,
    status_code: u16,
    cache_control: Option<&str>,
    has_auth: bool,
    vary_headers: &[String],
) -> bool {
    method.eq_ignore_ascii_case("GET")
        && (200..300).contains(&status_code)
        && !has_auth
        && !cache_control_forbids_caching(cache_control)
        && !vary_headers.iter().any(|h| h == "*")
}

/// `hasAuth` per §4.8 stage 6: Authorization header present, or any Cookie
/// header present.
pub fn has_auth(authorization: Option<&str>, cookie: Option<&str>) -> bool {
    authorization.is_some() || cookie.map(|c| !c.is_empty()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_age_parses_from_cache_control() {
        assert_eq!(max_age_seconds(Some("max-age=60")), Some(60));
        assert_eq!(max_age_seconds(Some("public, max-age=120")), Some(120));
        assert_eq!(max_age_seconds(Some("no-store")), None);
        assert_eq!(max_age_seconds(None), None);
    }

    #[test]
    fn ttl_priority_max_age_wins() {
        let mut patterns = HashMap::new();
        patterns.insert("/images/**".to_string(), 3600);
        let ttl = ttl_of_ms("/images/a.png", Some("max-age=5"), &patterns, 300);
        assert_eq!(ttl, 5000);
    }

    #[test]
    fn ttl_priority_pattern_wins_over_default() {
        let mut patterns = HashMap::new();
        patterns.insert("/images/**".to_string(), 3600);
        let ttl = ttl_of_ms("/images/a.png", None, &patterns, 300);
        assert_eq!(ttl, 3_600_000);
    }

    #[test]
    fn ttl_falls_back_to_default() {
        let patterns = HashMap::new();
        let ttl = ttl_of_ms("/anything", None, &patterns, 300);
        assert_eq!(ttl, 300_000);
    }

    #[test]
    fn is_cacheable_requires_get_2xx_no_auth_no_forbidding_directives() {
        assert!(is_cacheable("GET", 200, None, false, &[]));
        assert!(!is_cacheable("POST", 200, None, false, &[]));
        assert!(!is_cacheable("GET", 404, None, false, &[]));
        assert!(!is_cacheable("GET", 200, None, true, &[]));
        assert!(!is_cacheable("GET", 200, Some("no-store"), false, &[]));
        assert!(!is_cacheable("GET", 200, None, false, &["*".to_string()]));
    }

    #[test]
    fn has_auth_checks_authorization_and_nonempty_cookie() {
        assert!(has_auth(Some("Bearer x"), None));
        assert!(has_auth(None, Some("a=b")));
        assert!(!has_auth(None, None));
        assert!(!has_auth(None, Some("")));
    }
}
