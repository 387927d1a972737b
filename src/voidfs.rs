//! Placeholder filesystem. Returns FsError::NotImplemented on every method.
//!
//! Used when the handler is configured without a filesystem, in which
//! case only OPTIONS is served.
use futures_util::future::{self, FutureExt};

use crate::davpath::DavPath;
use crate::fs::*;

/// Placeholder filesystem.
#[derive(Debug, Clone)]
pub(crate) struct VoidFs;

impl VoidFs {
    pub fn new() -> Box<VoidFs> {
        Box::new(VoidFs)
    }
}

impl DavFileSystem for VoidFs {
    fn metadata<'a>(&'a self, _path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        future::ready(Err(FsError::NotImplemented)).boxed()
    }

    fn read_dir<'a>(&'a self, _path: &'a DavPath) -> FsFuture<'a, Vec<DavDirEntry>> {
        future::ready(Err(FsError::NotImplemented)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn everything_fails() {
        let fs = VoidFs::new();
        let path = DavPath::new("/a").unwrap();
        assert_eq!(fs.metadata(&path).await.err(), Some(FsError::NotImplemented));
        assert_eq!(fs.exists(&path).await.err(), Some(FsError::NotImplemented));
        assert_eq!(fs.remove(&path).await.err(), Some(FsError::NotImplemented));
    }
}
