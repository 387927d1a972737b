//! Lock key codec.
//!
//! A lock is stored in the cache under a single key built from its identity:
//!
//! ```text
//! token:urn:uuid:...|depth:infinity|path:/docs/file.txt|ownerId:1|spaceId:4
//! ```
//!
//! `token` and `depth` are optional, `path` comes first among the scope
//! fields and the remaining ownership fields follow sorted by name. `inTrash`
//! and unset fields never appear. Changing this layout invalidates every lock
//! that is currently stored.
//!
//! Searches are glob patterns over this layout, see the `*_pattern` functions.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

const SEP: char = '|';
const PATH_FIELD: &str = "path";
const IN_TRASH_FIELD: &str = "inTrash";

/// Lock depth. `One` does not exist here, that is a PROPFIND-only value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockDepth {
    #[serde(rename = "0")]
    Zero,
    Infinity,
}

impl LockDepth {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockDepth::Zero => "0",
            LockDepth::Infinity => "infinity",
        }
    }
}

/// Ownership scope of a resource: which space (or user home, or share)
/// a logical path belongs to. Two identical paths in different scopes
/// are different resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceScope {
    pub owner_id: Option<u64>,
    pub space_id: Option<u64>,
    pub space_external_root_id: Option<u64>,
    pub share_external_id: Option<u64>,
    #[serde(default)]
    pub in_trash: bool,
}

impl SpaceScope {
    /// The scope as (field name, value) pairs, in declaration order.
    pub fn fields(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("ownerId", self.owner_id.map(|v| v.to_string())),
            ("spaceId", self.space_id.map(|v| v.to_string())),
            ("spaceExternalRootId", self.space_external_root_id.map(|v| v.to_string())),
            ("shareExternalId", self.share_external_id.map(|v| v.to_string())),
            (IN_TRASH_FIELD, Some(self.in_trash.to_string())),
        ]
    }

    /// Same scope, `in_trash` not taken into account.
    pub fn same_scope(&self, other: &SpaceScope) -> bool {
        self.owner_id == other.owner_id
            && self.space_id == other.space_id
            && self.space_external_root_id == other.space_external_root_id
            && self.share_external_id == other.share_external_id
    }
}

/// Encode a key from raw scope fields.
///
/// `path` (if present) always comes first, the other fields are sorted by
/// name. Fields without a value and the `inTrash` field are left out.
/// The result does not depend on the order of `fields`.
pub fn encode_key<'a, I>(fields: I, depth: Option<LockDepth>, token: Option<&str>) -> String
where
    I: IntoIterator<Item = (&'a str, Option<String>)>,
{
    let mut path = None;
    let mut sorted = BTreeMap::new();
    for (name, value) in fields {
        let Some(value) = value else { continue };
        match name {
            IN_TRASH_FIELD => {}
            PATH_FIELD => path = Some(value),
            _ => {
                sorted.insert(name, value);
            }
        }
    }

    let mut parts = Vec::with_capacity(sorted.len() + 3);
    if let Some(token) = token {
        parts.push(format!("token:{token}"));
    }
    if let Some(depth) = depth {
        parts.push(format!("depth:{}", depth.as_str()));
    }
    if let Some(path) = path {
        parts.push(format!("{PATH_FIELD}:{path}"));
    }
    for (name, value) in sorted {
        parts.push(format!("{name}:{value}"));
    }
    parts.join(&SEP.to_string())
}

/// The key a lock is stored under.
pub fn lock_key(path: &str, scope: &SpaceScope, depth: LockDepth, token: Option<&str>) -> String {
    encode_key(with_path(Some(path), scope), Some(depth), token)
}

/// The scope-only key: no path, no depth, no token.
pub fn scope_key(scope: &SpaceScope) -> String {
    encode_key(with_path(None, scope), None, None)
}

fn with_path<'a>(path: Option<&str>, scope: &SpaceScope) -> Vec<(&'a str, Option<String>)> {
    let mut fields = scope.fields();
    fields.insert(0, (PATH_FIELD, path.map(|p| p.to_string())));
    fields
}

// glob metacharacters in literal key parts.
fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn scope_suffix(scope: &SpaceScope) -> String {
    let key = scope_key(scope);
    if key.is_empty() {
        key
    } else {
        format!("{SEP}{}", escape_glob(&key))
    }
}

/// Pattern matching all locks at exactly `path` in `scope`.
pub fn path_pattern(path: &str, scope: &SpaceScope) -> String {
    format!("*{PATH_FIELD}:{}{}", escape_glob(path), scope_suffix(scope))
}

/// Pattern matching all locks strictly below `path` in `scope`.
pub fn descendants_pattern(path: &str, scope: &SpaceScope) -> String {
    let base = path.trim_end_matches('/');
    format!("*{PATH_FIELD}:{}/*{}", escape_glob(base), scope_suffix(scope))
}

/// Pattern matching the lock that carries `token`.
pub fn token_pattern(token: &str) -> String {
    format!("token:{}{SEP}*", escape_glob(token))
}

/// Pattern matching all locks of a scope, whatever their path.
pub fn scope_pattern(scope: &SpaceScope) -> String {
    format!("*{PATH_FIELD}:*{}", scope_suffix(scope))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::glob_match;

    fn scope() -> SpaceScope {
        SpaceScope {
            owner_id: Some(1),
            space_id: Some(4),
            ..Default::default()
        }
    }

    #[test]
    fn key_layout() {
        let key = lock_key("/docs/a.txt", &scope(), LockDepth::Infinity, Some("urn:uuid:1"));
        assert_eq!(key, "token:urn:uuid:1|depth:infinity|path:/docs/a.txt|ownerId:1|spaceId:4");
        let key = lock_key("/docs/a.txt", &SpaceScope::default(), LockDepth::Zero, None);
        assert_eq!(key, "depth:0|path:/docs/a.txt");
    }

    #[test]
    fn key_is_deterministic() {
        let a = encode_key(
            vec![
                ("spaceId", Some("4".to_string())),
                ("path", Some("/x".to_string())),
                ("ownerId", Some("1".to_string())),
                ("inTrash", Some("true".to_string())),
                ("shareExternalId", None),
            ],
            Some(LockDepth::Zero),
            Some("t"),
        );
        let b = encode_key(
            vec![
                ("ownerId", Some("1".to_string())),
                ("shareExternalId", None),
                ("path", Some("/x".to_string())),
                ("spaceId", Some("4".to_string())),
            ],
            Some(LockDepth::Zero),
            Some("t"),
        );
        assert_eq!(a, b);
        assert_eq!(a, "token:t|depth:0|path:/x|ownerId:1|spaceId:4");
    }

    #[test]
    fn scope_only_key() {
        assert_eq!(scope_key(&scope()), "ownerId:1|spaceId:4");
        let mut trashed = scope();
        trashed.in_trash = true;
        assert_eq!(scope_key(&trashed), scope_key(&scope()));
    }

    #[test]
    fn patterns_select_the_right_keys() {
        let s = scope();
        let at = lock_key("/a/b", &s, LockDepth::Zero, Some("urn:uuid:x"));
        let below = lock_key("/a/b/c", &s, LockDepth::Infinity, None);
        let sibling = lock_key("/a/bc", &s, LockDepth::Zero, None);
        let other_scope = lock_key("/a/b", &SpaceScope::default(), LockDepth::Zero, None);

        let p = path_pattern("/a/b", &s);
        assert!(glob_match(&p, &at));
        assert!(!glob_match(&p, &below));
        assert!(!glob_match(&p, &sibling));
        assert!(!glob_match(&p, &other_scope));

        let d = descendants_pattern("/a/b", &s);
        assert!(glob_match(&d, &below));
        assert!(!glob_match(&d, &at));
        assert!(!glob_match(&d, &sibling));

        assert!(glob_match(&token_pattern("urn:uuid:x"), &at));
        assert!(!glob_match(&token_pattern("urn:uuid:x"), &below));

        let all = scope_pattern(&s);
        assert!(glob_match(&all, &at) && glob_match(&all, &below) && glob_match(&all, &sibling));
        assert!(!glob_match(&all, &other_scope));
    }

    #[test]
    fn metacharacters_are_literal() {
        let s = SpaceScope::default();
        let key = lock_key("/a*", &s, LockDepth::Zero, None);
        assert!(glob_match(&path_pattern("/a*", &s), &key));
        assert!(!glob_match(&path_pattern("/a*", &s), &lock_key("/abc", &s, LockDepth::Zero, None)));
    }
}
