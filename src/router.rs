//! Router (C4, §4.3): maps a request path to an origin URL via longest-match
//! glob patterns, grounded on the teacher's `MatchEntry` idea of a
//! priority-ordered candidate list, generalized from `matchit`'s exact/param
//! routing to the spec's `*`/`**` glob syntax.

use crate::error::ProxyError;
use crate::glob::best_match;

pub struct Router {
    /// (pattern, origin) in declaration order; "default" is not a pattern
    /// here but stored separately.
    routes: Vec<(String, String)>,
    default: Option<String>,
}

impl Router {
    pub fn new(origins: &std::collections::HashMap<String, String>) -> Router {
        let mut routes = Vec::new();
        let mut default = None;
        for (pattern, origin) in origins {
            if pattern == "default" {
                default = Some(origin.clone());
            } else {
                routes.push((pattern.clone(), origin.clone()));
            }
        }
        // stable order for declaration-order tie-break; HashMap iteration
        // order is otherwise unspecified, so sort by pattern to make the
        // resulting order deterministic across process runs.
        routes.sort_by(|a, b| a.0.cmp(&b.0));
        Router { routes, default }
    }

    pub fn with_default(default_origin: Option<String>) -> Router {
        Router {
            routes: Vec::new(),
            default: default_origin,
        }
    }

    /// Resolves `(origin, matchedPattern)` for a request path, or
    /// `ProxyError::NoRoute` if nothing matches and no default exists.
    pub fn resolve(&self, path: &str) -> Result<(String, String), ProxyError> {
        if let Some((pattern, origin)) = best_match(self.routes.iter(), path) {
            return Ok((origin.clone(), pattern.clone()));
        }
        if let Some(origin) = &self.default {
            return Ok((origin.clone(), "default".to_string()));
        }
        Err(ProxyError::NoRoute(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn resolves_most_specific_pattern() {
        let mut origins = HashMap::new();
        origins.insert("/api/**".to_string(), "http://api".to_string());
        origins.insert("/api/v1/*".to_string(), "http://api-v1".to_string());
        origins.insert("default".to_string(), "http://default".to_string());
        let router = Router::new(&origins);

        let (origin, pattern) = router.resolve("/api/v1/users").unwrap();
        assert_eq!(origin, "http://api-v1");
        assert_eq!(pattern, "/api/v1/*");
    }

    #[test]
    fn falls_back_to_default() {
        let mut origins = HashMap::new();
        origins.insert("/api/**".to_string(), "http://api".to_string());
        origins.insert("default".to_string(), "http://default".to_string());
        let router = Router::new(&origins);

        let (origin, pattern) = router.resolve("/static/a.css").unwrap();
        assert_eq!(origin, "http://default");
        assert_eq!(pattern, "default");
    }

    #[test]
    fn no_route_without_default_is_an_error() {
        let mut origins = HashMap::new();
        origins.insert("/api/**".to_string(), "http://api".to_string());
        let router = Router::new(&origins);
        assert!(matches!(router.resolve("/other"), Err(ProxyError::NoRoute(_))));
    }
}
