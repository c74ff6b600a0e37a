// Identifier extraction for federated objects.
//
// Payloads we emit carry an explicit `federationId`. Older peers only send
// canonical URLs like `https://node.example/authors/{id}/posts/{post_id}`,
// so we fall back to reading path segments by name, never by position.

/// Normalize a host or URL down to `host[:port]`, lowercase.
///
/// Accepts `https://Node.Example/`, `node.example/api/` and `node.example`
/// alike; all map to `node.example`.
pub fn normalize_host(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_scheme = match trimmed.find("://") {
        Some(idx) => &trimmed[idx + 3..],
        None => trimmed,
    };
    let authority = without_scheme.split('/').next().unwrap_or("");
    // Drop any userinfo
    let authority = authority.rsplit('@').next().unwrap_or(authority);
    authority.to_ascii_lowercase()
}

/// Last non-empty path segment of a URL, tolerating a trailing slash.
///
/// A bare id with no slashes is returned as-is.
pub fn trailing_segment(url: &str) -> Option<&str> {
    url.trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && !s.ends_with(':'))
}

/// The path segment that follows `marker`, e.g. the post id after `posts`.
///
/// Uses the last occurrence so `/authors/a/posts/p/comments/c` yields `c`
/// for `comments` and `p` for `posts`.
pub fn segment_after<'a>(url: &'a str, marker: &str) -> Option<&'a str> {
    let path = match url.find("://") {
        Some(idx) => {
            let rest = &url[idx + 3..];
            rest.find('/').map(|i| &rest[i..]).unwrap_or("")
        }
        None => url,
    };
    let segments: Vec<&str> = path.split('/').collect();
    segments
        .iter()
        .rposition(|s| *s == marker)
        .and_then(|idx| segments.get(idx + 1))
        .copied()
        .filter(|s| !s.is_empty())
}

/// Pick the explicit id when present, otherwise derive one from a URL.
pub fn explicit_or_trailing(explicit: Option<&str>, url: Option<&str>) -> Option<String> {
    explicit
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| url.and_then(trailing_segment).map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_host_variants() {
        assert_eq!(normalize_host("https://Node.Example/"), "node.example");
        assert_eq!(normalize_host("http://node.example:8000/api/"), "node.example:8000");
        assert_eq!(normalize_host("node.example"), "node.example");
        assert_eq!(
            normalize_host("https://node.example/authors/abc"),
            "node.example"
        );
        assert_eq!(normalize_host(""), "");
    }

    #[test]
    fn test_trailing_segment_tolerates_slash() {
        assert_eq!(
            trailing_segment("https://node.example/authors/abc-123/"),
            Some("abc-123")
        );
        assert_eq!(
            trailing_segment("https://node.example/authors/abc-123"),
            Some("abc-123")
        );
        assert_eq!(trailing_segment("abc-123"), Some("abc-123"));
        assert_eq!(trailing_segment(""), None);
        assert_eq!(trailing_segment("/"), None);
        assert_eq!(trailing_segment("https://"), None);
    }

    #[test]
    fn test_segment_after_named_markers() {
        let url = "https://node.example/authors/a1/posts/p1/comments/c1";
        assert_eq!(segment_after(url, "authors"), Some("a1"));
        assert_eq!(segment_after(url, "posts"), Some("p1"));
        assert_eq!(segment_after(url, "comments"), Some("c1"));
        assert_eq!(segment_after(url, "likes"), None);
        assert_eq!(segment_after("https://node.example/posts/", "posts"), None);
    }

    #[test]
    fn test_segment_after_ignores_host() {
        // A host literally named "posts" must not be mistaken for the marker
        assert_eq!(segment_after("https://posts/authors/a1", "posts"), None);
    }

    #[test]
    fn test_explicit_wins_over_url() {
        assert_eq!(
            explicit_or_trailing(Some("fed-1"), Some("https://n/authors/url-1")),
            Some("fed-1".to_string())
        );
        assert_eq!(
            explicit_or_trailing(Some("  "), Some("https://n/authors/url-1")),
            Some("url-1".to_string())
        );
        assert_eq!(explicit_or_trailing(None, None), None);
    }
}
