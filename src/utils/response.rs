//! Response-building helpers for the HTTP service — grounded on the
//! teacher's `utils/response.rs` `ResponseBuilder`, narrowed to what the
//! pipeline writes directly to a `Session` (§7: 502/503/429 carry a short
//! `text/plain` explanation; the health endpoint carries JSON, §6).

use bytes::Bytes;
use http::StatusCode;
use pingora_error::Result;
use pingora_http::ResponseHeader;
use serde::Serialize;

pub mod content_type {
    pub const TEXT_PLAIN: &str = "text/plain";
    pub const APPLICATION_JSON: &str = "application/json";
}

pub struct ResponseBuilder;

impl ResponseBuilder {
    /// Builds a `text/plain` error response header + body (§7 "User-visible
    /// failure behavior"). `extra_headers` lets callers add e.g.
    /// `Retry-After` or `X-Request-Id`.
    pub fn text_error(
        status: StatusCode,
        message: &str,
        extra_headers: &[(&str, String)],
    ) -> Result<(ResponseHeader, Bytes)> {
        let mut resp = ResponseHeader::build(status, None)?;
        resp.insert_header(http::header::CONTENT_TYPE, content_type::TEXT_PLAIN)?;
        resp.insert_header(http::header::CONTENT_LENGTH, message.len().to_string())?;
        for (name, value) in extra_headers {
            resp.insert_header(name.to_string(), value.clone())?;
        }
        Ok((resp, Bytes::copy_from_slice(message.as_bytes())))
    }

    /// Builds a JSON response header + body (health endpoint, §6).
    pub fn json<T: Serialize>(status: StatusCode, data: &T) -> Result<(ResponseHeader, Bytes)> {
        let body = serde_json::to_vec(data).unwrap_or_else(|_| b"{}".to_vec());
        let mut resp = ResponseHeader::build(status, None)?;
        resp.insert_header(http::header::CONTENT_TYPE, content_type::APPLICATION_JSON)?;
        resp.insert_header(http::header::CONTENT_LENGTH, body.len().to_string())?;
        Ok((resp, Bytes::from(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_error_sets_content_type_and_length() {
        let (resp, body) =
            ResponseBuilder::text_error(StatusCode::BAD_GATEWAY, "upstream unavailable", &[])
                .unwrap();
        assert_eq!(resp.status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.as_ref(), b"upstream unavailable");
    }

    #[test]
    fn text_error_carries_extra_headers() {
        let (resp, _) = ResponseBuilder::text_error(
            StatusCode::TOO_MANY_REQUESTS,
            "rate limit exceeded",
            &[("Retry-After", "5".to_string())],
        )
        .unwrap();
        assert_eq!(
            resp.headers.get("Retry-After").unwrap().to_str().unwrap(),
            "5"
        );
    }

    #[test]
    fn json_serializes_body() {
        let data = serde_json::json!({"status": "ok"});
        let (resp, body) = ResponseBuilder::json(StatusCode::OK, &data).unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(body.as_ref(), br#"{"status":"ok"}"#);
    }
}
