//! The lock manager.
//!
//! Locks live in a [`DavCache`] as JSON records, stored under the key built
//! by the [lock key codec](crate::lockkey). There is no in-process state:
//! every lookup is a round-trip to the cache, and an expired lock is simply
//! a key the cache no longer returns.
//!
//! Locking is advisory. `check_conflicts` followed by a write are two
//! separate cache calls, so two requests racing on the same path can both
//! pass the check. The cache TTL and "last write wins" sort that out over
//! time, not instantly.
use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::DavCache;
use crate::errors::{DavError, DavResult};
use crate::lockkey::{self, LockDepth, SpaceScope};
use crate::resolver::Principal;

/// Lock TTL when none was asked for. Also the ceiling for `Timeout:`.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(86400);

/// Exclusive or shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockKind {
    Exclusive,
    Shared,
}

/// Protocol details of a lock that was created through LOCK.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DavLockInfo {
    /// href of the locked resource, as the client used it.
    pub lockroot: String,
    pub locktoken: String,
    pub lockscope: LockKind,
    /// Free-text `<D:owner>` from the request body.
    pub owner: Option<String>,
}

/// A lock as stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileLock {
    pub owner: Principal,
    pub db_file_path: String,
    pub key: String,
    pub depth: LockDepth,
    /// Unix timestamp (seconds).
    pub expiration: i64,
    pub dav_lock: Option<DavLockInfo>,
    pub space: SpaceScope,
}

impl FileLock {
    /// Locks without protocol details are always exclusive.
    pub fn kind(&self) -> LockKind {
        self.dav_lock.as_ref().map(|d| d.lockscope).unwrap_or(LockKind::Exclusive)
    }

    pub fn token(&self) -> Option<&str> {
        self.dav_lock.as_ref().map(|d| d.locktoken.as_str())
    }

    /// Seconds left before the lock expires.
    pub fn seconds_left(&self) -> u64 {
        let left = self.expiration - chrono::Utc::now().timestamp();
        left.max(0) as u64
    }
}

/// The resource a lock operation is about: logical path plus ownership scope.
#[derive(Debug, Clone, PartialEq)]
pub struct LockTarget {
    pub path: String,
    pub space: SpaceScope,
}

impl LockTarget {
    pub fn new(path: impl Into<String>, space: SpaceScope) -> LockTarget {
        LockTarget {
            path: path.into(),
            space,
        }
    }
}

/// What a new LOCK asks for.
#[derive(Debug, Clone)]
pub struct DavLockRequest {
    pub lockroot: String,
    pub lockscope: LockKind,
    pub owner: Option<String>,
}

/// Who is asking, and with what, when checking for conflicts.
#[derive(Debug, Clone, Default)]
pub struct ConflictOptions {
    pub user_id: Option<u64>,
    /// Scope of the lock being requested. `None` for plain operations.
    pub lock_scope: Option<LockKind>,
    /// Lock tokens the client submitted.
    pub lock_tokens: Vec<String>,
}

impl ConflictOptions {
    pub fn new(user: &Principal, lock_tokens: &[String]) -> ConflictOptions {
        ConflictOptions {
            user_id: Some(user.id),
            lock_scope: None,
            lock_tokens: lock_tokens.to_vec(),
        }
    }

    // a lock that does not get in the way of this caller.
    fn exempts(&self, lock: &FileLock) -> bool {
        if lock.kind() == LockKind::Shared && self.lock_scope == Some(LockKind::Shared) {
            return true;
        }
        if self.user_id != Some(lock.owner.id) {
            return false;
        }
        match lock.token() {
            None => true,
            Some(t) => self.lock_tokens.iter().any(|s| s == t),
        }
    }
}

// "/a/b/c" -> ["/a/b", "/a", "/"]
fn ancestors(path: &str) -> Vec<String> {
    let mut res = Vec::new();
    let mut p = path.trim_end_matches('/');
    while let Some(pos) = p.rfind('/') {
        p = &p[..pos];
        res.push(if p.is_empty() { "/".to_string() } else { p.to_string() });
    }
    res
}

fn is_descendant(path: &str, parent: &str) -> bool {
    match parent {
        "/" => path.len() > 1 && path.starts_with('/'),
        _ => path.len() > parent.len() + 1 && path.starts_with(parent) && path.as_bytes()[parent.len()] == b'/',
    }
}

fn is_same_or_descendant(path: &str, parent: &str) -> bool {
    path == parent || is_descendant(path, parent)
}

// name of a direct member of `parent`, if `path` is one.
fn child_name<'a>(path: &'a str, parent: &str) -> Option<&'a str> {
    if !is_descendant(path, parent) {
        return None;
    }
    let rest = match parent {
        "/" => &path[1..],
        _ => &path[parent.len() + 1..],
    };
    (!rest.contains('/')).then_some(rest)
}

/// Creates, finds, refreshes and removes locks.
#[derive(Debug, Clone)]
pub struct LockManager {
    cache: Box<dyn DavCache>,
    default_ttl: Duration,
}

impl LockManager {
    pub fn new(cache: Box<dyn DavCache>) -> LockManager {
        LockManager {
            cache,
            default_ttl: DEFAULT_LOCK_TTL,
        }
    }

    pub fn with_default_ttl(self, ttl: Duration) -> LockManager {
        LockManager {
            default_ttl: ttl,
            ..self
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    // keys -> mget -> decode. Entries that expired in between are skipped.
    async fn load(&self, pattern: &str) -> DavResult<Vec<FileLock>> {
        let keys = self.cache.keys(pattern).await?;
        trace!("lock search {pattern}: {} keys", keys.len());
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let values = self.cache.mget(&keys).await?;
        let mut locks = Vec::with_capacity(values.len());
        for value in values.into_iter().flatten() {
            locks.push(serde_json::from_str::<FileLock>(&value)?);
        }
        Ok(locks)
    }

    // every lock stored at exactly this path, any depth.
    async fn locks_at(&self, path: &str, space: &SpaceScope) -> DavResult<Vec<FileLock>> {
        let locks = self.load(&lockkey::path_pattern(path, space)).await?;
        Ok(locks
            .into_iter()
            .filter(|l| l.db_file_path == path && l.space.same_scope(space))
            .collect())
    }

    // every lock strictly below this path.
    async fn locks_below(&self, path: &str, space: &SpaceScope) -> DavResult<Vec<FileLock>> {
        let locks = self.load(&lockkey::descendants_pattern(path, space)).await?;
        Ok(locks
            .into_iter()
            .filter(|l| is_descendant(&l.db_file_path, path) && l.space.same_scope(space))
            .collect())
    }

    async fn store(&self, lock: &FileLock, ttl: Duration) -> DavResult<()> {
        let value = serde_json::to_string(lock)?;
        self.cache.set(&lock.key, value, ttl).await?;
        Ok(())
    }

    /// Create a lock, unless it conflicts with an existing one.
    ///
    /// On conflict this returns `(false, conflicting_lock)`. A lock created
    /// with `dav_lock` gets a fresh `urn:uuid:` token.
    pub async fn create(
        &self,
        user: &Principal,
        target: &LockTarget,
        depth: LockDepth,
        ttl: Option<Duration>,
        dav_lock: Option<DavLockRequest>,
        lock_tokens: &[String],
    ) -> DavResult<(bool, FileLock)> {
        let opts = ConflictOptions {
            user_id: Some(user.id),
            lock_scope: Some(dav_lock.as_ref().map(|d| d.lockscope).unwrap_or(LockKind::Exclusive)),
            lock_tokens: lock_tokens.to_vec(),
        };
        match self.check_conflicts(target, depth, &opts).await {
            Ok(()) => {}
            Err(DavError::LockConflict(lock)) => return Ok((false, *lock)),
            Err(e) => return Err(e),
        }

        let ttl = ttl.unwrap_or(self.default_ttl);
        let dav_lock = dav_lock.map(|d| DavLockInfo {
            lockroot: d.lockroot,
            locktoken: Uuid::new_v4().urn().to_string(),
            lockscope: d.lockscope,
            owner: d.owner,
        });
        let token = dav_lock.as_ref().map(|d| d.locktoken.as_str());
        let key = lockkey::lock_key(&target.path, &target.space, depth, token);
        let lock = FileLock {
            owner: user.clone(),
            db_file_path: target.path.clone(),
            key,
            depth,
            expiration: chrono::Utc::now().timestamp() + ttl.as_secs() as i64,
            dav_lock,
            space: target.space.clone(),
        };
        self.store(&lock, ttl).await?;
        trace!("lock created: {}", lock.key);
        Ok((true, lock))
    }

    /// Delete a lock by key. Deleting a lock that is gone is fine.
    pub async fn remove_lock(&self, key: &str) -> DavResult<bool> {
        let existed = self.cache.del(key).await?;
        trace!("lock removed: {key} (existed: {existed})");
        Ok(existed)
    }

    /// Remove every lock below `target` owned by `user`. If any of them
    /// belongs to someone else nothing is removed and that lock is
    /// returned as a conflict.
    pub async fn remove_child_locks(&self, user: &Principal, target: &LockTarget) -> DavResult<()> {
        let locks = self.locks_below(&target.path, &target.space).await?;
        if let Some(other) = locks.iter().find(|l| l.owner.id != user.id) {
            trace!("remove_child_locks: {} is owned by {}", other.key, other.owner.login);
            return Err(DavError::LockConflict(Box::new(other.clone())));
        }
        for lock in &locks {
            self.remove_lock(&lock.key).await?;
        }
        Ok(())
    }

    /// Check whether an operation on `target` with `depth` is blocked
    /// by an existing lock. Fails with `DavError::LockConflict` on the
    /// first blocking lock found.
    ///
    /// Locks on the target itself always count. Locks on ancestors only
    /// count when they have depth infinity. With depth infinity, locks on
    /// all descendants count too.
    pub async fn check_conflicts(&self, target: &LockTarget, depth: LockDepth, opts: &ConflictOptions) -> DavResult<()> {
        let conflict = |lock: FileLock| {
            trace!("lock conflict on {}: {}", target.path, lock.key);
            Err(DavError::LockConflict(Box::new(lock)))
        };

        for lock in self.locks_at(&target.path, &target.space).await? {
            if !opts.exempts(&lock) {
                return conflict(lock);
            }
        }

        for path in ancestors(&target.path) {
            for lock in self.locks_at(&path, &target.space).await? {
                if lock.depth == LockDepth::Infinity && !opts.exempts(&lock) {
                    return conflict(lock);
                }
            }
        }

        if depth == LockDepth::Infinity {
            for lock in self.locks_below(&target.path, &target.space).await? {
                if !opts.exempts(&lock) {
                    return conflict(lock);
                }
            }
        }
        Ok(())
    }

    pub async fn get_lock_by_token(&self, token: &str) -> DavResult<Option<FileLock>> {
        let locks = self.load(&lockkey::token_pattern(token)).await?;
        Ok(locks.into_iter().find(|l| l.token() == Some(token)))
    }

    /// All locks at exactly this path.
    pub async fn get_locks_by_path(&self, target: &LockTarget) -> DavResult<Vec<FileLock>> {
        self.locks_at(&target.path, &target.space).await
    }

    /// All locks of one ownership scope, whatever the path.
    pub async fn get_locks_by_scope(&self, space: &SpaceScope) -> DavResult<Vec<FileLock>> {
        let locks = self.load(&lockkey::scope_pattern(space)).await?;
        Ok(locks.into_iter().filter(|l| l.space.same_scope(space)).collect())
    }

    /// The lock with this token, if `path` is the locked path or below it.
    pub async fn is_locked_with_token(&self, token: &str, path: &str) -> DavResult<Option<FileLock>> {
        Ok(self
            .get_lock_by_token(token)
            .await?
            .filter(|l| is_same_or_descendant(path, &l.db_file_path)))
    }

    /// Whether a lock applies to the target, its own or one inherited
    /// from an ancestor with depth infinity.
    pub async fn is_resource_locked(&self, target: &LockTarget) -> DavResult<bool> {
        Ok(self.effective_lock(target).await?.is_some())
    }

    // the lock that applies to the target itself: its own, or the
    // closest ancestor lock with depth infinity.
    async fn effective_lock(&self, target: &LockTarget) -> DavResult<Option<FileLock>> {
        if let Some(lock) = self.locks_at(&target.path, &target.space).await?.into_iter().next() {
            return Ok(Some(lock));
        }
        for path in ancestors(&target.path) {
            let found = self
                .locks_at(&path, &target.space)
                .await?
                .into_iter()
                .find(|l| l.depth == LockDepth::Infinity);
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    /// Lock state of the target itself, for listings. The map has at most
    /// one entry, under the empty name.
    pub async fn browse_locks(&self, target: &LockTarget) -> DavResult<HashMap<String, FileLock>> {
        let mut map = HashMap::new();
        if let Some(lock) = self.effective_lock(target).await? {
            map.insert(String::new(), lock);
        }
        Ok(map)
    }

    /// Lock state of a collection and its direct members, for listings.
    /// Members are keyed by name, the collection itself by the empty name
    /// (only with `include_root`).
    ///
    /// When two locks exist for the same member (shared locks), the first
    /// one found wins. Which one that is depends on the cache.
    pub async fn browse_parent_child_locks(
        &self,
        target: &LockTarget,
        include_root: bool,
    ) -> DavResult<HashMap<String, FileLock>> {
        let mut map = HashMap::new();
        if include_root {
            map = self.browse_locks(target).await?;
        }
        for lock in self.locks_below(&target.path, &target.space).await? {
            if let Some(name) = child_name(&lock.db_file_path, &target.path) {
                map.entry(name.to_string()).or_insert(lock);
            }
        }
        Ok(map)
    }

    /// Set a new expiration and store the lock again.
    pub async fn refresh_lock_timeout(&self, lock: &FileLock, ttl: Duration) -> DavResult<FileLock> {
        let mut lock = lock.clone();
        lock.expiration = chrono::Utc::now().timestamp() + ttl.as_secs() as i64;
        self.store(&lock, ttl).await?;
        trace!("lock refreshed: {} for {}s", lock.key, ttl.as_secs());
        Ok(lock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemCache;

    fn space() -> SpaceScope {
        SpaceScope {
            space_id: Some(1),
            ..Default::default()
        }
    }

    fn target(path: &str) -> LockTarget {
        LockTarget::new(path, space())
    }

    fn u1() -> Principal {
        Principal::new(1, "u1", "User One")
    }

    fn u2() -> Principal {
        Principal::new(2, "u2", "User Two")
    }

    fn dav(kind: LockKind) -> Option<DavLockRequest> {
        Some(DavLockRequest {
            lockroot: "/x".to_string(),
            lockscope: kind,
            owner: None,
        })
    }

    fn manager() -> LockManager {
        LockManager::new(MemCache::new())
    }

    #[test]
    fn path_helpers() {
        assert_eq!(ancestors("/a/b/c"), vec!["/a/b", "/a", "/"]);
        assert!(ancestors("/").is_empty());
        assert!(is_descendant("/a/b", "/a"));
        assert!(!is_descendant("/ab", "/a"));
        assert!(!is_descendant("/a", "/a"));
        assert!(is_descendant("/a", "/"));
        assert_eq!(child_name("/a/b", "/a"), Some("b"));
        assert_eq!(child_name("/a/b/c", "/a"), None);
        assert_eq!(child_name("/a", "/"), Some("a"));
    }

    #[tokio::test]
    async fn ancestor_conflict() {
        let lm = manager();
        let (ok, lock) = lm
            .create(&u1(), &target("/a/b"), LockDepth::Infinity, None, dav(LockKind::Exclusive), &[])
            .await
            .unwrap();
        assert!(ok);
        let token = lock.token().unwrap().to_string();
        assert!(token.starts_with("urn:uuid:"));

        for depth in [LockDepth::Zero, LockDepth::Infinity] {
            let (ok, other) = lm
                .create(&u2(), &target("/a/b/c"), depth, None, dav(LockKind::Exclusive), &[])
                .await
                .unwrap();
            assert!(!ok);
            assert_eq!(other.db_file_path, "/a/b");
        }

        let (ok, _) = lm
            .create(&u1(), &target("/a/b/c"), LockDepth::Zero, None, dav(LockKind::Exclusive), &[token])
            .await
            .unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn depth_zero_isolation() {
        let lm = manager();
        let (ok, _) = lm
            .create(&u1(), &target("/a/b"), LockDepth::Zero, None, dav(LockKind::Exclusive), &[])
            .await
            .unwrap();
        assert!(ok);
        for user in [u1(), u2()] {
            let t = target(&format!("/a/b/c{}", user.id));
            let (ok, _) = lm
                .create(&user, &t, LockDepth::Zero, None, dav(LockKind::Exclusive), &[])
                .await
                .unwrap();
            assert!(ok);
        }
    }

    #[tokio::test]
    async fn shared_scope_compatibility() {
        let lm = manager();
        let t = target("/doc.odt");
        let (ok, _) = lm.create(&u1(), &t, LockDepth::Zero, None, dav(LockKind::Shared), &[]).await.unwrap();
        assert!(ok);
        let (ok, _) = lm.create(&u2(), &t, LockDepth::Zero, None, dav(LockKind::Shared), &[]).await.unwrap();
        assert!(ok);
        let (ok, conflict) = lm
            .create(&u2(), &t, LockDepth::Zero, None, dav(LockKind::Exclusive), &[])
            .await
            .unwrap();
        assert!(!ok);
        assert_eq!(conflict.kind(), LockKind::Shared);
        assert_eq!(lm.get_locks_by_path(&t).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn token_exemption() {
        let lm = manager();
        let (_, lock) = lm
            .create(&u1(), &target("/a"), LockDepth::Infinity, None, dav(LockKind::Exclusive), &[])
            .await
            .unwrap();
        let token = lock.token().unwrap().to_string();

        // same user, no token: blocked by their own lock.
        let opts = ConflictOptions::new(&u1(), &[]);
        let err = lm.check_conflicts(&target("/a/b"), LockDepth::Zero, &opts).await;
        assert!(matches!(err, Err(DavError::LockConflict(_))));

        let opts = ConflictOptions::new(&u1(), &[token.clone()]);
        assert!(lm.check_conflicts(&target("/a/b"), LockDepth::Zero, &opts).await.is_ok());

        // a token is no use to somebody else.
        let opts = ConflictOptions::new(&u2(), &[token]);
        assert!(lm.check_conflicts(&target("/a/b"), LockDepth::Zero, &opts).await.is_err());
    }

    #[tokio::test]
    async fn api_locks_match_only_their_creator() {
        let lm = manager();
        let (ok, lock) = lm.create(&u1(), &target("/f"), LockDepth::Zero, None, None, &[]).await.unwrap();
        assert!(ok);
        assert!(lock.token().is_none());
        assert_eq!(lock.kind(), LockKind::Exclusive);
        assert!(lm.check_conflicts(&target("/f"), LockDepth::Zero, &ConflictOptions::new(&u1(), &[])).await.is_ok());
        assert!(lm.check_conflicts(&target("/f"), LockDepth::Zero, &ConflictOptions::new(&u2(), &[])).await.is_err());
    }

    #[tokio::test]
    async fn descendants_block_infinity_only() {
        let lm = manager();
        lm.create(&u2(), &target("/a/b/c"), LockDepth::Zero, None, dav(LockKind::Exclusive), &[])
            .await
            .unwrap();
        let opts = ConflictOptions::new(&u1(), &[]);
        assert!(lm.check_conflicts(&target("/a"), LockDepth::Zero, &opts).await.is_ok());
        let err = lm.check_conflicts(&target("/a"), LockDepth::Infinity, &opts).await;
        match err {
            Err(DavError::LockConflict(l)) => assert_eq!(l.db_file_path, "/a/b/c"),
            other => panic!("expected conflict, got {other:?}"),
        }
        // root covers everything.
        assert!(lm.check_conflicts(&target("/"), LockDepth::Infinity, &opts).await.is_err());
    }

    #[tokio::test]
    async fn scopes_do_not_mix() {
        let lm = manager();
        lm.create(&u1(), &target("/a"), LockDepth::Infinity, None, dav(LockKind::Exclusive), &[])
            .await
            .unwrap();
        let other = LockTarget::new(
            "/a/b",
            SpaceScope {
                space_id: Some(2),
                ..Default::default()
            },
        );
        let opts = ConflictOptions::new(&u2(), &[]);
        assert!(lm.check_conflicts(&other, LockDepth::Infinity, &opts).await.is_ok());
        assert_eq!(lm.get_locks_by_scope(&space()).await.unwrap().len(), 1);
        assert!(lm.get_locks_by_scope(&other.space).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn round_trip() {
        let lm = manager();
        let t = target("/docs/file.txt");
        let (ok, lock) = lm.create(&u1(), &t, LockDepth::Zero, None, None, &[]).await.unwrap();
        assert!(ok);
        let found = lm.get_locks_by_path(&t).await.unwrap();
        assert_eq!(found, vec![lock.clone()]);
        assert!(lm.is_resource_locked(&t).await.unwrap());
        assert!(lm.remove_lock(&lock.key).await.unwrap());
        assert!(lm.get_locks_by_path(&t).await.unwrap().is_empty());
        assert!(!lm.remove_lock(&lock.key).await.unwrap());
    }

    #[tokio::test]
    async fn inherited_locks() {
        let lm = manager();
        lm.create(&u1(), &target("/a"), LockDepth::Infinity, None, None, &[]).await.unwrap();
        lm.create(&u1(), &target("/b"), LockDepth::Zero, None, None, &[]).await.unwrap();
        assert!(lm.is_resource_locked(&target("/a/b")).await.unwrap());
        assert!(lm.is_resource_locked(&target("/a/b/c")).await.unwrap());
        assert!(!lm.is_resource_locked(&target("/b/c")).await.unwrap());
        assert!(!lm.is_resource_locked(&target("/ab")).await.unwrap());
    }

    #[tokio::test]
    async fn token_lookups() {
        let lm = manager();
        let (_, lock) = lm
            .create(&u1(), &target("/a"), LockDepth::Infinity, None, dav(LockKind::Exclusive), &[])
            .await
            .unwrap();
        let token = lock.token().unwrap();
        assert_eq!(lm.get_lock_by_token(token).await.unwrap(), Some(lock.clone()));
        assert!(lm.is_locked_with_token(token, "/a").await.unwrap().is_some());
        assert!(lm.is_locked_with_token(token, "/a/b/c").await.unwrap().is_some());
        assert!(lm.is_locked_with_token(token, "/ab").await.unwrap().is_none());
        assert!(lm.get_lock_by_token("urn:uuid:nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_child_locks_is_all_or_nothing() {
        let lm = manager();
        lm.create(&u1(), &target("/d/x"), LockDepth::Zero, None, None, &[]).await.unwrap();
        lm.create(&u2(), &target("/d/y"), LockDepth::Zero, None, None, &[]).await.unwrap();
        let res = lm.remove_child_locks(&u1(), &target("/d")).await;
        assert!(matches!(res, Err(DavError::LockConflict(_))));
        assert!(lm.is_resource_locked(&target("/d/x")).await.unwrap());

        lm.create(&u1(), &target("/e/x"), LockDepth::Zero, None, None, &[]).await.unwrap();
        lm.create(&u1(), &target("/e/x/y"), LockDepth::Zero, None, None, &[]).await.unwrap();
        lm.remove_child_locks(&u1(), &target("/e")).await.unwrap();
        assert!(!lm.is_resource_locked(&target("/e/x")).await.unwrap());
        assert!(!lm.is_resource_locked(&target("/e/x/y")).await.unwrap());
    }

    #[tokio::test]
    async fn browse() {
        let lm = manager();
        lm.create(&u1(), &target("/dir"), LockDepth::Infinity, None, dav(LockKind::Shared), &[])
            .await
            .unwrap();
        lm.create(&u1(), &target("/dir/a"), LockDepth::Zero, None, dav(LockKind::Shared), &[])
            .await
            .unwrap();
        lm.create(&u1(), &target("/dir/a/deep"), LockDepth::Zero, None, dav(LockKind::Shared), &[])
            .await
            .unwrap();

        let map = lm.browse_parent_child_locks(&target("/dir"), true).await.unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[""].db_file_path, "/dir");
        assert_eq!(map["a"].db_file_path, "/dir/a");

        let map = lm.browse_parent_child_locks(&target("/dir"), false).await.unwrap();
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["a"]);

        // inherited from the depth-infinity lock on /dir.
        let map = lm.browse_locks(&target("/dir/b")).await.unwrap();
        assert_eq!(map[""].db_file_path, "/dir");
        assert!(lm.browse_locks(&target("/other")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn refresh() {
        let lm = manager();
        let t = target("/r");
        let (_, lock) = lm
            .create(&u1(), &t, LockDepth::Zero, Some(Duration::from_secs(60)), None, &[])
            .await
            .unwrap();
        assert!(lock.seconds_left() <= 60);
        let lock = lm.refresh_lock_timeout(&lock, Duration::from_secs(3600)).await.unwrap();
        assert!(lock.seconds_left() > 60);
        assert_eq!(lm.get_locks_by_path(&t).await.unwrap(), vec![lock]);
    }

    #[tokio::test]
    async fn expired_locks_are_gone() {
        let lm = manager();
        let t = target("/tmp");
        let (ok, _) = lm.create(&u1(), &t, LockDepth::Zero, Some(Duration::ZERO), None, &[]).await.unwrap();
        assert!(ok);
        assert!(!lm.is_resource_locked(&t).await.unwrap());
    }

    // check-then-set is not atomic. Two racing creates may both succeed;
    // all that is guaranteed is that at least one does.
    #[tokio::test]
    async fn concurrent_create_race() {
        let lm = manager();
        let t = target("/race");
        let (ua, ub) = (u1(), u2());
        let a = lm.create(&ua, &t, LockDepth::Zero, None, dav(LockKind::Exclusive), &[]);
        let b = lm.create(&ub, &t, LockDepth::Zero, None, dav(LockKind::Exclusive), &[]);
        let (a, b) = tokio::join!(a, b);
        let (a, b) = (a.unwrap().0, b.unwrap().0);
        assert!(a || b);
    }
}
