//! Segment-based glob matcher shared by the Router (C4) and the Key & TTL
//! Policy's pattern table (C2): `*` matches exactly one path segment, `**`
//! matches zero or more segments.

fn segments(path: &str) -> Vec<&str> {
    path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect()
}

/// Does `pattern` match `path`? Both are treated as `/`-delimited segment
/// sequences; `*` matches exactly one non-empty segment, `**` matches any
/// number of segments (including zero).
pub fn glob_match(pattern: &str, path: &str) -> bool {
    let pat = segments(pattern);
    let p = segments(path);
    match_segments(&pat, &p)
}

fn match_segments(pat: &[&str], path: &[&str]) -> bool {
    match pat.first() {
        None => path.is_empty(),
        Some(&"**") => {
            // ** matches zero or more segments: try every split point.
            for skip in 0..=path.len() {
                if match_segments(&pat[1..], &path[skip..]) {
                    return true;
                }
            }
            false
        }
        Some(&"*") => {
            if path.is_empty() {
                false
            } else {
                match_segments(&pat[1..], &path[1..])
            }
        }
        Some(literal) => {
            if path.first() == Some(literal) {
                match_segments(&pat[1..], &path[1..])
            } else {
                false
            }
        }
    }
}

/// A rough specificity score used to pick the longest/most specific match
/// among several candidates: longer literal prefixes and fewer wildcards
/// rank higher. Patterns are compared by (segment count excluding trailing
/// `**`, then total segment count) descending.
pub fn specificity(pattern: &str) -> (usize, usize) {
    let segs = segments(pattern);
    let literal_count = segs.iter().filter(|s| **s != "*" && **s != "**").count();
    (literal_count, segs.len())
}

/// Picks the best-matching entry (by descending specificity, then by
/// original declaration order on ties) among `(pattern, value)` candidates.
pub fn best_match<'a, T>(
    candidates: impl Iterator<Item = &'a (String, T)>,
    path: &str,
) -> Option<&'a (String, T)>
where
    T: 'a,
{
    let mut best: Option<(&'a (String, T), (usize, usize), usize)> = None;
    for (idx, entry) in candidates.enumerate() {
        let (pattern, _) = entry;
        if !glob_match(pattern, path) {
            continue;
        }
        let score = specificity(pattern);
        match &best {
            None => best = Some((entry, score, idx)),
            Some((_, best_score, _)) if score > *best_score => {
                best = Some((entry, score, idx));
            }
            _ => {}
        }
    }
    best.map(|(entry, _, _)| entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_matches_exactly() {
        assert!(glob_match("/a/b", "/a/b"));
        assert!(!glob_match("/a/b", "/a/b/c"));
    }

    #[test]
    fn single_star_matches_one_segment() {
        assert!(glob_match("/a/*/c", "/a/b/c"));
        assert!(!glob_match("/a/*/c", "/a/b/d/c"));
        assert!(!glob_match("/a/*/c", "/a/c"));
    }

    #[test]
    fn double_star_matches_any_depth() {
        assert!(glob_match("/a/**", "/a"));
        assert!(glob_match("/a/**", "/a/b"));
        assert!(glob_match("/a/**", "/a/b/c/d"));
        assert!(!glob_match("/a/**", "/x"));
    }

    #[test]
    fn specificity_prefers_more_literal_segments() {
        assert!(specificity("/a/b/c") > specificity("/a/**"));
        assert!(specificity("/a/*") > specificity("/**"));
    }

    #[test]
    fn best_match_picks_most_specific() {
        let candidates = vec![
            ("/**".to_string(), "catch-all"),
            ("/a/*".to_string(), "specific"),
        ];
        let result = best_match(candidates.iter(), "/a/b").unwrap();
        assert_eq!(result.1, "specific");
    }

    #[test]
    fn best_match_ties_prefer_declaration_order() {
        let candidates = vec![
            ("/a/*".to_string(), "first"),
            ("/a/*".to_string(), "second"),
        ];
        let result = best_match(candidates.iter(), "/a/b").unwrap();
        assert_eq!(result.1, "first");
    }
}
