//! Contains the trait that defines the lock store, and a simple
//! in-memory implementation.
//!
//! The lock store is an external TTL key/value cache (think Redis or
//! memcached with key scanning). The lock manager only ever needs five
//! operations from it, including `keys(pattern)` with glob matching on the
//! encoded lock key. Expired keys are simply gone; nobody sweeps them.
//!
//! Note that a "check conflicts, then set" sequence is two separate calls,
//! not a transaction. A backend offering atomic compare-and-set does not
//! change that, the lock manager does not use it.
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dyn_clone::{DynClone, clone_trait_object};
use futures_util::future::{self, FutureExt};

/// Errors generated by a cache implementation.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheError {
    /// The backing store cannot be reached.
    Unavailable(String),
    /// The backing store refused the operation.
    Failed(String),
}

impl std::error::Error for CacheError {}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CacheError::Unavailable(e) => write!(f, "cache unavailable: {e}"),
            CacheError::Failed(e) => write!(f, "cache operation failed: {e}"),
        }
    }
}

/// The Result type.
pub type CacheResult<T> = Result<T, CacheError>;

/// Future returned by the DavCache methods.
pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = CacheResult<T>> + Send + 'a>>;

/// The trait that defines a lock store.
pub trait DavCache: Debug + Send + Sync + DynClone {
    /// Store `value` under `key`, expiring after `ttl`.
    fn set<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> CacheFuture<'a, ()>;

    /// Get one value.
    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<String>>;

    /// Get several values. The result has one entry per key, in order.
    fn mget<'a>(&'a self, keys: &'a [String]) -> CacheFuture<'a, Vec<Option<String>>>;

    /// Delete a key. Returns whether it existed.
    fn del<'a>(&'a self, key: &'a str) -> CacheFuture<'a, bool>;

    /// All live keys matching a glob pattern (`*`, `?`, `[...]`, `\` escapes).
    fn keys<'a>(&'a self, pattern: &'a str) -> CacheFuture<'a, Vec<String>>;
}

clone_trait_object! {DavCache}

/// Ephemeral in-memory cache.
///
/// This implementation has state - if you create a
/// new instance in a handler(), it will be empty every time.
///
/// Create the instance once, using `MemCache::new`, and hand it to the
/// `DavConfig`. As a MemCache struct is just a handle, cloning is cheap.
#[derive(Debug, Clone, Default)]
pub struct MemCache(Arc<Mutex<HashMap<String, MemCacheEntry>>>);

#[derive(Debug)]
struct MemCacheEntry {
    value: String,
    expires_at: Instant,
}

impl MemCacheEntry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

impl MemCache {
    /// Create a new "memcache" lock store.
    pub fn new() -> Box<MemCache> {
        Box::new(MemCache::default())
    }

    fn with<T>(&self, f: impl FnOnce(&mut HashMap<String, MemCacheEntry>, Instant) -> T) -> CacheResult<T> {
        let mut map = self
            .0
            .lock()
            .map_err(|_| CacheError::Failed("memcache mutex poisoned".to_string()))?;
        let now = Instant::now();
        // expired entries are dropped lazily.
        map.retain(|_, e| e.live(now));
        Ok(f(&mut map, now))
    }
}

impl DavCache for MemCache {
    fn set<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> CacheFuture<'a, ()> {
        let res = self.with(|map, now| {
            let expires_at = now.checked_add(ttl).unwrap_or(now);
            map.insert(key.to_string(), MemCacheEntry { value, expires_at });
        });
        future::ready(res).boxed()
    }

    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<String>> {
        let res = self.with(|map, _| map.get(key).map(|e| e.value.clone()));
        future::ready(res).boxed()
    }

    fn mget<'a>(&'a self, keys: &'a [String]) -> CacheFuture<'a, Vec<Option<String>>> {
        let res = self.with(|map, _| {
            keys.iter()
                .map(|k| map.get(k).map(|e| e.value.clone()))
                .collect()
        });
        future::ready(res).boxed()
    }

    fn del<'a>(&'a self, key: &'a str) -> CacheFuture<'a, bool> {
        let res = self.with(|map, _| map.remove(key).is_some());
        future::ready(res).boxed()
    }

    fn keys<'a>(&'a self, pattern: &'a str) -> CacheFuture<'a, Vec<String>> {
        let res = self.with(|map, _| {
            let mut keys = map
                .keys()
                .filter(|k| glob_match(pattern, k))
                .cloned()
                .collect::<Vec<_>>();
            keys.sort();
            keys
        });
        future::ready(res).boxed()
    }
}

/// Redis-style glob matching: `*` matches any run of characters
/// (including none, and including `/` and `|`), `?` matches one character,
/// `[abc]` / `[^abc]` / `[a-z]` match a class, `\` escapes the next character.
pub fn glob_match(pattern: &str, s: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let s: Vec<char> = s.chars().collect();
    glob_match_at(&p, &s)
}

fn glob_match_at(p: &[char], s: &[char]) -> bool {
    let (mut pi, mut si) = (0, 0);
    // position to backtrack to after the last '*'.
    let mut star: Option<(usize, usize)> = None;

    while si < s.len() {
        let step = match p.get(pi) {
            Some('*') => {
                star = Some((pi, si));
                pi += 1;
                continue;
            }
            Some('?') => Some(1),
            Some('[') => match_class(&p[pi..], s[si]),
            Some('\\') if pi + 1 < p.len() => (p[pi + 1] == s[si]).then_some(2),
            Some(c) => (*c == s[si]).then_some(1),
            None => None,
        };
        match step {
            Some(n) => {
                pi += n;
                si += 1;
            }
            None => match star {
                Some((sp, ss)) => {
                    pi = sp + 1;
                    si = ss + 1;
                    star = Some((sp, ss + 1));
                }
                None => return false,
            },
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

// match a [...] class at the start of `p`. Returns the length of the
// class in the pattern if `c` matches.
fn match_class(p: &[char], c: char) -> Option<usize> {
    let mut i = 1;
    let negate = p.get(i) == Some(&'^');
    if negate {
        i += 1;
    }
    let mut matched = false;
    loop {
        match p.get(i) {
            // unterminated class: treat '[' as a literal.
            None => return (c == '[').then_some(1),
            Some(']') => break,
            Some('\\') if i + 1 < p.len() => {
                matched |= p[i + 1] == c;
                i += 2;
            }
            Some(&lo) if p.get(i + 1) == Some(&'-') && p.get(i + 2).is_some_and(|&hi| hi != ']') => {
                let hi = p[i + 2];
                matched |= lo <= c && c <= hi;
                i += 3;
            }
            Some(&x) => {
                matched |= x == c;
                i += 1;
            }
        }
    }
    (matched != negate).then_some(i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob() {
        assert!(glob_match("*", ""));
        assert!(glob_match("a*c", "abbbc"));
        assert!(glob_match("a*c", "ac"));
        assert!(!glob_match("a*c", "acb"));
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "ac"));
        assert!(glob_match("*path:/a/*|x:1", "depth:0|path:/a/b/c|x:1"));
        assert!(glob_match("h[ae]llo", "hello"));
        assert!(!glob_match("h[^e]llo", "hello"));
        assert!(glob_match("h[a-c]llo", "hbllo"));
        assert!(glob_match("a\\*", "a*"));
        assert!(!glob_match("a\\*", "ab"));
    }

    #[tokio::test]
    async fn set_get_del() {
        let cache = MemCache::new();
        cache.set("k1", "v1".into(), Duration::from_secs(60)).await.unwrap();
        cache.set("k2", "v2".into(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k1").await.unwrap().as_deref(), Some("v1"));
        let keys = vec!["k2".to_string(), "nope".to_string(), "k1".to_string()];
        assert_eq!(
            cache.mget(&keys).await.unwrap(),
            vec![Some("v2".to_string()), None, Some("v1".to_string())]
        );
        assert_eq!(cache.keys("k*").await.unwrap(), vec!["k1", "k2"]);
        assert!(cache.del("k1").await.unwrap());
        assert!(!cache.del("k1").await.unwrap());
        assert_eq!(cache.get("k1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_keys_are_gone() {
        let cache = MemCache::new();
        cache.set("gone", "v".into(), Duration::ZERO).await.unwrap();
        cache.set("here", "v".into(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("gone").await.unwrap(), None);
        assert_eq!(cache.keys("*").await.unwrap(), vec!["here"]);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let cache = MemCache::new();
        let other = cache.clone();
        cache.set("k", "v".into(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(other.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
