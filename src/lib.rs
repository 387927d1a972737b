//! WebDAV (RFC4918) protocol engine with cache-backed locking, for use
//! inside a file sync-and-share server.
//!
//! The handler speaks OPTIONS, PROPFIND, PROPPATCH, MKCOL, GET, HEAD, PUT,
//! DELETE, COPY, MOVE, LOCK and UNLOCK, using the types from the `http`
//! crate. Storage, path resolution and the lock store are collaborators
//! you plug in:
//!
//! - a [`DavFileSystem`](fs::DavFileSystem) that does the actual file operations
//! - a [`PathResolver`](resolver::PathResolver) that maps a request URL to a
//!   space, a filesystem path and the permissions of the current user
//! - a [`DavCache`](cache::DavCache), the key/value store with TTLs that
//!   holds the locks. Locks are found by glob patterns over their keys.
//!
//! Included are [`MemFs`](memfs::MemFs), an in-memory filesystem,
//! [`MemCache`](cache::MemCache), an in-memory TTL store, and
//! [`SpaceResolver`](resolver::SpaceResolver), which maps everything into one
//! shared space or into a home space per user.
//!
//! Authentication is not part of this crate. The caller passes the
//! [`Principal`](resolver::Principal) of every request to
//! [`DavHandler::handle`].
//!
//! ```no_run
//! use dav_share::{DavHandler, memfs::MemFs, resolver::{Principal, SpaceResolver}};
//!
//! # async fn serve(req: http::Request<dav_share::body::Body>) {
//! let dav = DavHandler::builder()
//!     .strip_prefix("/remote.php/webdav")
//!     .filesystem(MemFs::new())
//!     .resolver(SpaceResolver::per_user())
//!     .build_handler();
//!
//! let user = Principal::new(1, "alice", "Alice");
//! let resp = dav.handle(req, user).await;
//! # }
//! ```
//!
//! A small hyper based server is included as `dav-share-server`
//! (feature `server`).
#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
extern crate log;

mod conditional;
mod davhandler;
mod davheaders;
mod davxml;
mod errors;
mod guard;
mod handle_copymove;
mod handle_delete;
mod handle_gethead;
mod handle_lock;
mod handle_mkcol;
mod handle_options;
mod handle_props;
mod handle_put;
mod util;
mod voidfs;
mod xmltree_ext;

pub mod body;
pub mod cache;
pub mod davpath;
pub mod fs;
pub mod lockkey;
pub mod lockmanager;
#[cfg(feature = "memfs")]
#[cfg_attr(docsrs, doc(cfg(feature = "memfs")))]
pub mod memfs;
pub mod resolver;

pub(crate) use crate::davhandler::DavInner;

pub use crate::davhandler::{DavConfig, DavHandler};
pub use crate::errors::{DavError, DavResult};
pub use crate::guard::BaseCheck;
pub use crate::util::{DavMethod, DavMethodSet};
