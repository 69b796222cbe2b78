//! Site-scope matching for plugins and middleware.
//!
//! A scope is an ordered list of patterns tested against the target URL.
//! The `*` token alone matches every site; a pattern containing `*` is
//! compiled into a case-insensitive glob; a bare pattern matches when the
//! hostname or the full address contains it as a substring. The substring
//! behavior is deliberately permissive (`"le.com"` matches
//! `"example.com"`) and is part of the documented contract.

use regex::RegexBuilder;
use url::Url;

/// The all-sites scope token.
pub const WILDCARD: &str = "*";

/// Returns true when `target` falls inside the scope described by
/// `patterns`. Pure and callable concurrently; an empty pattern list never
/// matches.
pub fn matches<S: AsRef<str>>(patterns: &[S], target: &Url) -> bool {
    if patterns.iter().any(|p| p.as_ref() == WILDCARD) {
        return true;
    }

    let host = target.host_str().unwrap_or("");
    let address = target.as_str();

    patterns
        .iter()
        .any(|p| pattern_matches(p.as_ref(), host, address))
}

fn pattern_matches(pattern: &str, host: &str, address: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }

    if pattern.contains('*') {
        match compile_glob(pattern) {
            Some(re) => re.is_match(host) || re.is_match(address),
            None => false,
        }
    } else {
        let needle = pattern.to_ascii_lowercase();
        host.to_ascii_lowercase().contains(&needle)
            || address.to_ascii_lowercase().contains(&needle)
    }
}

/// Compiles a `*`-bearing pattern into an unanchored case-insensitive
/// regex, escaping everything except the wildcard.
fn compile_glob(pattern: &str) -> Option<regex::Regex> {
    let expr: String = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");

    RegexBuilder::new(&expr).case_insensitive(true).build().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_wildcard_matches_everything() {
        let patterns = vec!["*"];
        assert!(matches(&patterns, &url("https://example.com/")));
        assert!(matches(&patterns, &url("http://127.0.0.1:8080/path?q=1")));
        assert!(matches(&patterns, &url("wss://socket.test/ws")));
    }

    #[test]
    fn test_empty_scope_never_matches() {
        let patterns: Vec<String> = vec![];
        assert!(!matches(&patterns, &url("https://example.com/")));
    }

    #[test]
    fn test_substring_containment() {
        let patterns = vec!["example.com"];
        assert!(matches(&patterns, &url("https://example.com/page")));
        assert!(matches(&patterns, &url("https://sub.example.com/")));
        assert!(!matches(&patterns, &url("https://other.net/")));
    }

    #[test]
    fn test_substring_is_permissive_by_contract() {
        // "le.com" matching "example.com" is documented behavior.
        let patterns = vec!["le.com"];
        assert!(matches(&patterns, &url("https://example.com/")));
    }

    #[test]
    fn test_glob_pattern() {
        let patterns = vec!["*.wiki.org"];
        assert!(matches(&patterns, &url("https://en.wiki.org/page")));
        assert!(!matches(&patterns, &url("https://wiki.net/")));
    }

    #[test]
    fn test_glob_matches_full_address() {
        let patterns = vec!["https://cdn.*/assets"];
        assert!(matches(&patterns, &url("https://cdn.site.io/assets/app.js")));
        assert!(!matches(&patterns, &url("https://site.io/assets/app.js")));
    }

    #[test]
    fn test_case_insensitive() {
        let patterns = vec!["Example.COM"];
        assert!(matches(&patterns, &url("https://example.com/")));

        let globs = vec!["*.Example.com"];
        assert!(matches(&globs, &url("https://www.example.com/")));
    }

    #[test]
    fn test_any_pattern_suffices() {
        let patterns = vec!["nothere.net", "example.com"];
        assert!(matches(&patterns, &url("https://example.com/")));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let patterns = vec!["a+b*c"];
        // '+' must not be treated as a regex quantifier.
        assert!(matches(&patterns, &url("https://host/a+bXYZc")));
        assert!(!matches(&patterns, &url("https://host/aabc")));
    }

    #[test]
    fn test_disjoint_scope_returns_false() {
        let patterns = vec!["zzz.invalid", "qqq*"];
        assert!(!matches(&patterns, &url("https://example.com/path")));
    }
}
