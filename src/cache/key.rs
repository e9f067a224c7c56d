//! Cache key computation (§2 C2, §3 `CacheKey`).

use md5::{Digest, Md5};

/// Opaque cache key: `UPPER(method) ":" url [":" headerHash]`.
pub type CacheKey = String;

/// `headerHash` is the first 8 hex chars of MD5 over
/// `name ":" value "|" name ":" value …` in stable lexicographic order of
/// header names (case-folded). `header_lookup` returns the *first* value for
/// a header name, or `None` if absent from the request.
pub fn key_of<'a>(
    method: &str,
    url: &str,
    effective_vary_headers: impl IntoIterator<Item = &'a str>,
    header_lookup: impl Fn(&str) -> Option<String>,
) -> CacheKey {
    let mut names: Vec<String> = effective_vary_headers
        .into_iter()
        .map(|h| h.to_ascii_lowercase())
        .collect();
    names.sort();
    names.dedup();

    if names.is_empty() {
        return format!("{}:{}", method.to_ascii_uppercase(), url);
    }

    let parts: Vec<String> = names
        .iter()
        .map(|name| {
            let value = header_lookup(name).unwrap_or_default();
            format!("{name}:{value}")
        })
        .collect();
    let joined = parts.join("|");

    let mut hasher = Md5::new();
    hasher.update(joined.as_bytes());
    let digest = hasher.finalize();
    let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
    let header_hash = &hex[..8];

    format!("{}:{}:{}", method.to_ascii_uppercase(), url, header_hash)
}

/// Effective vary headers: union of the origin's `Vary` response header
/// names and the configured cache-key header allow-list, minus `*`.
///
/// Returns `None` if the union contains `*` (such responses are never
/// stored per §3's invariant).
pub fn effective_vary_headers(
    origin_vary: &[String],
    configured_allow_list: &[String],
) -> Option<Vec<String>> {
    let mut set = std::collections::BTreeSet::new();
    for h in origin_vary.iter().chain(configured_allow_list.iter()) {
        let lower = h.trim().to_ascii_lowercase();
        if lower == "*" {
            return None;
        }
        if !lower.is_empty() {
            set.insert(lower);
        }
    }
    Some(set.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_without_vary_headers_is_method_and_url() {
        let key = key_of("get", "https://o/x", Vec::<&str>::new(), |_| None);
        assert_eq!(key, "GET:https://o/x");
    }

    #[test]
    fn key_with_vary_headers_is_stable_regardless_of_input_order() {
        let lookup = |name: &str| match name {
            "accept-language" => Some("en".to_string()),
            "accept-encoding" => Some("gzip".to_string()),
            _ => None,
        };
        let k1 = key_of("GET", "https://o/x", vec!["Accept-Language", "Accept-Encoding"], lookup);
        let k2 = key_of("GET", "https://o/x", vec!["Accept-Encoding", "Accept-Language"], lookup);
        assert_eq!(k1, k2);
    }

    #[test]
    fn different_header_values_produce_different_keys() {
        let k_en = key_of("GET", "https://o/x", vec!["Accept-Language"], |_| {
            Some("en".to_string())
        });
        let k_fr = key_of("GET", "https://o/x", vec!["Accept-Language"], |_| {
            Some("fr".to_string())
        });
        assert_ne!(k_en, k_fr);
    }

    #[test]
    fn effective_vary_with_star_is_none() {
        assert_eq!(
            effective_vary_headers(&["*".to_string()], &[]),
            None
        );
    }

    #[test]
    fn effective_vary_merges_and_dedupes() {
        let merged = effective_vary_headers(
            &["Accept-Language".to_string()],
            &["accept-language".to_string(), "X-Custom".to_string()],
        )
        .unwrap();
        assert_eq!(merged, vec!["accept-language".to_string(), "x-custom".to_string()]);
    }
}
