//! Request-header helpers shared by the HTTP service (C9, §4.8 stages 1, 6)
//! — grounded on the teacher's `utils/request.rs`, trimmed to the subset the
//! pipeline actually needs (client IP resolution, generic header lookup) now
//! that upstream-hash variable selection has no counterpart in this crate
//! (there is no upstream load balancer to hash against).

use http::HeaderName;
use once_cell::sync::Lazy;
use pingora_http::RequestHeader;
use pingora_proxy::Session;

/// Retrieves the value of a specific header from the request.
///
/// Returns `None` if the header is not present or its value is not valid UTF-8.
pub fn get_req_header_value<'a>(req_header: &'a RequestHeader, key: &str) -> Option<&'a str> {
    req_header
        .headers
        .get(key)
        .and_then(|value| value.to_str().ok())
}

static HTTP_HEADER_X_FORWARDED_FOR: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-forwarded-for"));
static HTTP_HEADER_X_REAL_IP: Lazy<HeaderName> = Lazy::new(|| HeaderName::from_static("x-real-ip"));

/// Gets the client's apparent IP address based on common proxy headers or
/// the direct connection address (§4.4's precedence for the rate-limit/ACL
/// stage).
///
/// Precedence:
/// 1. `X-Forwarded-For` (first IP in the list)
/// 2. `X-Real-IP`
/// 3. Direct client address (`session.client_addr()`)
pub fn get_client_ip(session: &Session) -> String {
    if let Some(value) = session.get_header(HTTP_HEADER_X_FORWARDED_FOR.clone()) {
        if let Ok(forwarded) = value.to_str() {
            if let Some(ip) = forwarded.split(',').next() {
                let trimmed_ip = ip.trim();
                if !trimmed_ip.is_empty() {
                    return trimmed_ip.to_string();
                }
            }
        }
    }

    if let Some(value) = session.get_header(HTTP_HEADER_X_REAL_IP.clone()) {
        if let Ok(real_ip) = value.to_str() {
            let trimmed_ip = real_ip.trim();
            if !trimmed_ip.is_empty() {
                return trimmed_ip.to_string();
            }
        }
    }

    if let Some(addr) = session.client_addr() {
        return addr
            .as_inet()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default();
    }

    log::debug!("could not determine client IP address");
    "".to_string()
}
