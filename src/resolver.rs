//! Path resolution: from a request URL to the resource it names.
//!
//! The engine never decides on its own which storage a URL points at. A
//! [`PathResolver`] turns the URL (relative to the protocol base path) into a
//! [`ResourceScope`]: the path handed to the filesystem, the logical path
//! used for locking, the ownership scope and the caller's permissions.
//!
//! [`SpaceResolver`] is a small resolver that maps everything onto one
//! shared space, or onto a home space per user.
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;

use dyn_clone::{DynClone, clone_trait_object};
use serde::{Deserialize, Serialize};

use crate::davpath::DavPath;
use crate::lockkey::SpaceScope;
use crate::lockmanager::LockTarget;

/// The authenticated user a request is made for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: u64,
    pub login: String,
    pub fullname: String,
}

impl Principal {
    pub fn new(id: u64, login: impl Into<String>, fullname: impl Into<String>) -> Principal {
        Principal {
            id,
            login: login.into(),
            fullname: fullname.into(),
        }
    }
}

/// Which kind of route a request came in on. Selected when routing and
/// passed on to the resolver, which may parse URL segments differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouteContext {
    /// Plain WebDAV clients. Every segment is part of the path.
    #[default]
    WebDav,
    /// Document editor callbacks. The first segment is the document session.
    OnlyOffice,
    /// Desktop sync clients. The first segment is the client id.
    Sync,
}

/// Permission letters in [`ResourceScope::permissions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// create new resources
    Add,
    /// change existing resources
    Modify,
    /// delete or move away
    Delete,
    /// read content and properties
    Read,
}

impl Permission {
    pub fn letter(self) -> char {
        match self {
            Permission::Add => 'a',
            Permission::Modify => 'm',
            Permission::Delete => 'd',
            Permission::Read => 'r',
        }
    }
}

/// A resolved resource.
#[derive(Debug, Clone)]
pub struct ResourceScope {
    /// The request URL (with the protocol prefix).
    pub url: DavPath,
    /// Path handed to the filesystem.
    pub fs_path: DavPath,
    /// Canonical logical path, independent of the storage layout.
    /// Always starts with `/`, never ends with one (except the root).
    pub db_file_path: String,
    pub space: SpaceScope,
    /// Permission letters, see [`Permission`].
    pub permissions: String,
}

impl ResourceScope {
    pub fn can(&self, perm: Permission) -> bool {
        self.permissions.contains(perm.letter())
    }

    /// What the lock manager needs to know about this resource.
    pub fn lock_target(&self) -> LockTarget {
        LockTarget::new(self.db_file_path.clone(), self.space.clone())
    }

    /// The scope of a direct member of this collection.
    pub fn child(&self, name: &str, is_dir: bool) -> ResourceScope {
        let mut url = self.url.clone();
        url.add_slash();
        url.push_segment(name.as_bytes());
        url.add_slash_if(is_dir);
        let mut fs_path = self.fs_path.clone();
        fs_path.add_slash();
        fs_path.push_segment(name.as_bytes());
        let db_file_path = match self.db_file_path.as_str() {
            "/" => format!("/{name}"),
            p => format!("{p}/{name}"),
        };
        ResourceScope {
            url,
            fs_path,
            db_file_path,
            space: self.space.clone(),
            permissions: self.permissions.clone(),
        }
    }
}

/// Future returned by [`PathResolver::resolve`].
pub type ResolveFuture<'a> = Pin<Box<dyn Future<Output = Option<ResourceScope>> + Send + 'a>>;

/// The path-resolution collaborator.
pub trait PathResolver: Debug + Send + Sync + DynClone {
    /// Resolve the URL segments of `url` for `principal`. `None` means the
    /// URL does not name anything this principal can reach.
    fn resolve<'a>(&'a self, principal: &'a Principal, ctx: RouteContext, url: &'a DavPath) -> ResolveFuture<'a>;
}

clone_trait_object! {PathResolver}

#[derive(Debug, Clone)]
enum SpaceLayout {
    Shared { space_id: u64 },
    PerUser,
}

/// Resolver for one shared space, or one home space per user.
///
/// In per-user mode the owner of the scope is the principal, and the
/// filesystem path is prefixed with the principal's login, so that
/// `/docs/a.txt` of user `alice` is stored at `/alice/docs/a.txt`.
#[derive(Debug, Clone)]
pub struct SpaceResolver {
    layout: SpaceLayout,
    permissions: String,
}

impl SpaceResolver {
    /// Everyone works in shared space 1, with all permissions.
    pub fn new() -> Box<SpaceResolver> {
        Box::new(SpaceResolver {
            layout: SpaceLayout::Shared { space_id: 1 },
            permissions: "amdr".to_string(),
        })
    }

    /// Every principal gets a home space.
    pub fn per_user() -> Box<SpaceResolver> {
        Box::new(SpaceResolver {
            layout: SpaceLayout::PerUser,
            permissions: "amdr".to_string(),
        })
    }

    /// Use a shared space with a specific id.
    pub fn shared(space_id: u64) -> Box<SpaceResolver> {
        Box::new(SpaceResolver {
            layout: SpaceLayout::Shared { space_id },
            permissions: "amdr".to_string(),
        })
    }

    /// Permission letters handed out on every resolved resource.
    pub fn with_permissions(self: Box<Self>, permissions: impl Into<String>) -> Box<SpaceResolver> {
        let mut this = self;
        this.permissions = permissions.into();
        this
    }

    fn resolve_segments(&self, principal: &Principal, ctx: RouteContext, url: &DavPath) -> Option<ResourceScope> {
        let mut segments = url.segments();
        match ctx {
            RouteContext::WebDav => {}
            RouteContext::OnlyOffice | RouteContext::Sync => {
                if segments.is_empty() {
                    return None;
                }
                segments.remove(0);
            }
        }

        let logical = format!("/{}", segments.join("/"));
        let (space, storage) = match self.layout {
            SpaceLayout::Shared { space_id } => {
                let space = SpaceScope {
                    space_id: Some(space_id),
                    ..Default::default()
                };
                (space, logical.clone())
            }
            SpaceLayout::PerUser => {
                if principal.login.is_empty() || principal.login.contains('/') {
                    return None;
                }
                let space = SpaceScope {
                    owner_id: Some(principal.id),
                    ..Default::default()
                };
                (space, format!("/{}{}", principal.login, logical))
            }
        };

        let mut fs_path = DavPath::new(&storage).ok()?;
        fs_path.add_slash_if(url.is_collection());
        Some(ResourceScope {
            url: url.clone(),
            fs_path,
            db_file_path: logical,
            space,
            permissions: self.permissions.clone(),
        })
    }
}

impl PathResolver for SpaceResolver {
    fn resolve<'a>(&'a self, principal: &'a Principal, ctx: RouteContext, url: &'a DavPath) -> ResolveFuture<'a> {
        Box::pin(async move {
            let res = self.resolve_segments(principal, ctx, url);
            if res.is_none() {
                debug!("resolver: {url} does not resolve for {}", principal.login);
            }
            res
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Principal {
        Principal::new(7, "alice", "Alice A.")
    }

    #[tokio::test]
    async fn shared_space() {
        let r = SpaceResolver::shared(4);
        let url = DavPath::new("/docs/a.txt").unwrap();
        let res = r.resolve(&alice(), RouteContext::WebDav, &url).await.unwrap();
        assert_eq!(res.db_file_path, "/docs/a.txt");
        assert_eq!(res.fs_path.as_bytes(), b"/docs/a.txt");
        assert_eq!(res.space.space_id, Some(4));
        assert_eq!(res.space.owner_id, None);
        assert!(res.can(Permission::Add) && res.can(Permission::Read));
    }

    #[tokio::test]
    async fn per_user_home() {
        let r = SpaceResolver::per_user().with_permissions("r");
        let url = DavPath::new("/docs/").unwrap();
        let res = r.resolve(&alice(), RouteContext::WebDav, &url).await.unwrap();
        assert_eq!(res.db_file_path, "/docs");
        assert_eq!(res.fs_path.as_bytes(), b"/alice/docs/");
        assert_eq!(res.space.owner_id, Some(7));
        assert!(!res.can(Permission::Modify));

        let root = r.resolve(&alice(), RouteContext::WebDav, &DavPath::new("/").unwrap()).await.unwrap();
        assert_eq!(root.db_file_path, "/");
        assert_eq!(root.fs_path.as_bytes(), b"/alice/");
    }

    #[tokio::test]
    async fn route_context_strips_routing_segment() {
        let r = SpaceResolver::new();
        let url = DavPath::new("/client-9/docs/a.txt").unwrap();
        let res = r.resolve(&alice(), RouteContext::Sync, &url).await.unwrap();
        assert_eq!(res.db_file_path, "/docs/a.txt");
        let none = r.resolve(&alice(), RouteContext::OnlyOffice, &DavPath::new("/").unwrap()).await;
        assert!(none.is_none());
    }

    #[test]
    fn child_scope() {
        let url = DavPath::new("/docs/").unwrap();
        let parent = ResourceScope {
            url: url.clone(),
            fs_path: url,
            db_file_path: "/docs".to_string(),
            space: SpaceScope::default(),
            permissions: "r".to_string(),
        };
        let child = parent.child("sub", true);
        assert_eq!(child.db_file_path, "/docs/sub");
        assert_eq!(child.url.as_url_string(), "/docs/sub/");
        assert_eq!(child.fs_path.as_bytes(), b"/docs/sub");
    }
}
