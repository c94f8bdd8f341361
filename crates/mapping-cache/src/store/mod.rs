//! Backing key-value store abstraction.
//!
//! The cache assumes one logical remote store with atomic per-key
//! operations (Redis-like). Implementations only move strings; encoding is
//! the tiers' business.

mod memory;
mod mock;

pub use memory::InMemoryStore;
pub use mock::MockKeyValueStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::Result;

/// One page of a cursor-based key enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor for the next call. `0` means the enumeration is complete.
    pub cursor: u64,
    /// Keys matching the pattern in this page.
    pub keys: Vec<String>,
}

/// Storage interface for cache entries.
///
/// Errors should be reported as [`CacheError::CacheUnavailable`](crate::errors::CacheError::CacheUnavailable).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Deletes the given keys and returns how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64>;

    /// Examines roughly `count` keys starting at `cursor` and returns those
    /// matching the glob `pattern` (`*` wildcard).
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage>;

    /// Resets the TTL of an existing key. Returns false when the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;
}

/// Glob match supporting `*` (any run) and `?` (any single char).
pub fn glob_match(pattern: &str, candidate: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let candidate: Vec<char> = candidate.chars().collect();

    let (mut p, mut c) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut star_match = 0usize;

    while c < candidate.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == candidate[c]) {
            p += 1;
            c += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            star_match = c;
            p += 1;
        } else if let Some(star_pos) = star {
            p = star_pos + 1;
            star_match += 1;
            c = star_match;
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::glob_match;

    #[test]
    fn test_glob_prefix_patterns() {
        assert!(glob_match("l3:acme:*", "l3:acme:from_standard:abc"));
        assert!(!glob_match("l3:acme:*", "l3:acme2:from_standard:abc"));
        assert!(!glob_match("l3:acme:*", "l2:acme:from_standard:AAPL"));
    }

    #[test]
    fn test_glob_wildcards() {
        assert!(glob_match("*", ""));
        assert!(glob_match("l?:*:x", "l2:acme:x"));
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(!glob_match("a*b*c", "axxbyy"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }
}
