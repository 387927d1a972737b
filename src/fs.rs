//! Contains the structs and traits that define a filesystem backend.
//!
//! The WebDAV engine never touches bytes on disk itself. Everything it
//! needs from storage goes through `DavFileSystem`: stat, listing, reading,
//! writing from an offset, creating collections, deleting, copying and moving.
//! Paths handed to the filesystem are the `fs_path` of a resolved
//! [`ResourceScope`](crate::resolver::ResourceScope).
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use dyn_clone::{DynClone, clone_trait_object};
use http::StatusCode;

use crate::davpath::DavPath;

macro_rules! notimplemented {
    ($method:expr) => {
        Box::pin(async { Err(FsError::NotImplemented) })
    };
}

/// Errors generated by a filesystem implementation.
#[derive(Debug, Clone, PartialEq)]
pub enum FsError {
    NotImplemented,
    GeneralFailure,
    Exists,
    NotFound,
    Forbidden,
    InsufficientStorage,
    LoopDetected,
    PathTooLong,
    TooLarge,
    IsRemote,
    /// Domain error that carries its own HTTP status and message.
    /// Passed through to the client unchanged.
    Status(StatusCode, String),
}

/// The Result type.
pub type FsResult<T> = std::result::Result<T, FsError>;

/// Future returned by almost all of the DavFileSystem methods.
pub type FsFuture<'a, T> = Pin<Box<dyn Future<Output = FsResult<T>> + Send + 'a>>;

/// One entry in a directory listing.
#[derive(Debug)]
pub struct DavDirEntry {
    pub name: String,
    pub meta: Box<dyn DavMetaData>,
}

/// The trait that defines a filesystem.
pub trait DavFileSystem: Debug + Send + Sync + DynClone {
    /// Return the metadata of a file or directory (`stat`).
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>>;

    /// List the direct members of a directory.
    fn read_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Vec<DavDirEntry>>;

    /// Does this path exist.
    fn exists<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, bool> {
        Box::pin(async move {
            match self.metadata(path).await {
                Ok(_) => Ok(true),
                Err(FsError::NotFound) => Ok(false),
                Err(e) => Err(e),
            }
        })
    }

    /// Is this path a directory.
    fn is_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, bool> {
        Box::pin(async move { Ok(self.metadata(path).await?.is_dir()) })
    }

    /// Read the complete contents of a file.
    #[allow(unused_variables)]
    fn read<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Bytes> {
        notimplemented!("read")
    }

    /// Write `data` to a file, creating it if needed. Without a start
    /// offset the file is truncated first. Returns the new metadata.
    #[allow(unused_variables)]
    fn write<'a>(&'a self, path: &'a DavPath, data: Bytes, start: Option<u64>) -> FsFuture<'a, Box<dyn DavMetaData>> {
        notimplemented!("write")
    }

    #[allow(unused_variables)]
    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        notimplemented!("create_dir")
    }

    /// Delete a file, or a directory and everything below it.
    #[allow(unused_variables)]
    fn remove<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        notimplemented!("remove")
    }

    /// Copy a file or directory. Directories are copied recursively if `deep`.
    /// The destination must not exist.
    #[allow(unused_variables)]
    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath, deep: bool) -> FsFuture<'a, ()> {
        notimplemented!("copy")
    }

    /// Move a file or directory. The destination must not exist.
    #[allow(unused_variables)]
    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        notimplemented!("rename")
    }

    /// Change the modification time.
    #[allow(unused_variables)]
    fn set_modified<'a>(&'a self, path: &'a DavPath, tm: SystemTime) -> FsFuture<'a, ()> {
        notimplemented!("set_modified")
    }
}

clone_trait_object! {DavFileSystem}

/// File or directory metadata.
pub trait DavMetaData: Debug + Send + Sync + DynClone {
    fn len(&self) -> u64;
    fn modified(&self) -> FsResult<SystemTime>;
    fn is_dir(&self) -> bool;

    /// Weak entity tag derived from size and modification time.
    fn etag(&self) -> String {
        if let Ok(t) = self.modified() {
            if let Ok(t) = t.duration_since(UNIX_EPOCH) {
                return format!("{:x}-{:x}", self.len(), t.as_millis());
            }
        }
        format!("{:x}", self.len())
    }

    fn is_file(&self) -> bool {
        !self.is_dir()
    }

    fn created(&self) -> FsResult<SystemTime> {
        Err(FsError::NotImplemented)
    }
}

clone_trait_object! {DavMetaData}

impl std::error::Error for FsError {}

impl std::fmt::Display for FsError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FsError::Status(code, msg) => write!(f, "{code}: {msg}"),
            _ => write!(f, "{self:?}"),
        }
    }
}
