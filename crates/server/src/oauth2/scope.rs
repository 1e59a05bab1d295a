//! Scope matching.
//!
//! A client's registered scope is a list of patterns. With the `wildcard`
//! strategy a pattern segment `*` matches any single non-empty dot-separated
//! segment, and a trailing `*` matches the rest of the scope
//! (`foo.*` grants `foo.bar` and `foo.bar.baz`). The `exact` strategy only
//! accepts identical strings.

use serde::Deserialize;

pub const OPENID: &str = "openid";
pub const OFFLINE_ACCESS: &str = "offline_access";
pub const OFFLINE: &str = "offline";

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScopeStrategy {
    Exact,
    #[default]
    Wildcard,
}

impl ScopeStrategy {
    /// Whether any of `patterns` grants `needle`.
    pub fn matches(&self, patterns: &[String], needle: &str) -> bool {
        match self {
            ScopeStrategy::Exact => patterns.iter().any(|p| p == needle),
            ScopeStrategy::Wildcard => patterns.iter().any(|p| wildcard_match(p, needle)),
        }
    }

    /// First entry of `requested` that `patterns` does not grant.
    pub fn first_ungranted<'a>(&self, patterns: &[String], requested: &'a [String]) -> Option<&'a str> {
        requested
            .iter()
            .find(|scope| !self.matches(patterns, scope))
            .map(String::as_str)
    }
}

fn wildcard_match(pattern: &str, needle: &str) -> bool {
    if pattern == needle {
        return true;
    }
    let pattern_parts: Vec<&str> = pattern.split('.').collect();
    let needle_parts: Vec<&str> = needle.split('.').collect();
    if pattern_parts.len() > needle_parts.len() {
        return false;
    }

    let last = pattern_parts.len() - 1;
    for (idx, part) in pattern_parts.iter().enumerate() {
        if idx == last && pattern_parts.len() != needle_parts.len() && *part != "*" {
            return false;
        }
        if *part == "*" {
            if needle_parts[idx].is_empty() {
                return false;
            }
            continue;
        }
        if *part != needle_parts[idx] {
            return false;
        }
    }
    true
}

/// Split a space-delimited scope or audience string.
pub fn split(value: &str) -> Vec<String> {
    let mut items: Vec<String> = Vec::new();
    for item in value.split_whitespace() {
        if !items.iter().any(|existing| existing == item) {
            items.push(item.to_string());
        }
    }
    items
}

pub fn join(items: &[String]) -> String {
    items.join(" ")
}

pub fn contains(items: &[String], needle: &str) -> bool {
    items.iter().any(|item| item == needle)
}

/// Items of `a` also present in `b`, keeping the order of `a`.
pub fn intersect(a: &[String], b: &[String]) -> Vec<String> {
    a.iter().filter(|item| contains(b, item)).cloned().collect()
}

/// Whether every item of `needles` is present in `haystack`.
pub fn is_subset(needles: &[String], haystack: &[String]) -> bool {
    needles.iter().all(|needle| contains(haystack, needle))
}

pub fn grants_offline_access(scope: &[String]) -> bool {
    contains(scope, OFFLINE_ACCESS) || contains(scope, OFFLINE)
}
