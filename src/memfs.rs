//! Simple in-memory filesystem.
//!
//! This implementation has state, so if you create a
//! new instance in a handler(), it will be empty every time.
//!
//! This means you have to create the instance once, using `MemFs::new`, store
//! it in your handler struct, and clone() it every time you pass
//! it to the DavHandler. As a MemFs struct is just a handle, cloning is cheap.
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use bytes::Bytes;
use futures_util::future::{self, FutureExt};

use crate::davpath::DavPath;
use crate::fs::*;

type Tree = BTreeMap<String, MemFsNode>;

/// Ephemeral in-memory filesystem.
#[derive(Debug, Clone)]
pub struct MemFs {
    tree: Arc<Mutex<Tree>>,
}

#[derive(Debug, Clone)]
struct MemFsNode {
    is_dir: bool,
    data: Vec<u8>,
    mtime: SystemTime,
    crtime: SystemTime,
}

#[derive(Debug, Clone)]
struct MemFsMeta {
    is_dir: bool,
    size: u64,
    mtime: SystemTime,
    crtime: SystemTime,
}

impl MemFsNode {
    fn new_dir() -> MemFsNode {
        let now = SystemTime::now();
        MemFsNode {
            is_dir: true,
            data: Vec::new(),
            mtime: now,
            crtime: now,
        }
    }

    fn new_file() -> MemFsNode {
        MemFsNode {
            is_dir: false,
            ..MemFsNode::new_dir()
        }
    }

    fn meta(&self) -> Box<dyn DavMetaData> {
        Box::new(MemFsMeta {
            is_dir: self.is_dir,
            size: self.data.len() as u64,
            mtime: self.mtime,
            crtime: self.crtime,
        })
    }
}

impl DavMetaData for MemFsMeta {
    fn len(&self) -> u64 {
        self.size
    }

    fn modified(&self) -> FsResult<SystemTime> {
        Ok(self.mtime)
    }

    fn created(&self) -> FsResult<SystemTime> {
        Ok(self.crtime)
    }

    fn is_dir(&self) -> bool {
        self.is_dir
    }
}

// "/a/b/" -> "/a/b", "/" stays "/".
fn key(path: &DavPath) -> String {
    path.as_utf8_string()
}

fn parent_key(key: &str) -> String {
    match key.rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
    }
}

fn is_below(key: &str, parent: &str) -> bool {
    match parent {
        "/" => key.len() > 1,
        _ => key.len() > parent.len() && key.starts_with(parent) && key.as_bytes()[parent.len()] == b'/',
    }
}

// key plus everything below it, in order.
fn subtree(tree: &Tree, root: &str) -> Vec<String> {
    tree.range(root.to_string()..)
        .map(|(k, _)| k)
        .take_while(|k| k.starts_with(root))
        .filter(|k| k.as_str() == root || is_below(k, root))
        .cloned()
        .collect()
}

impl MemFs {
    /// Create a new "memfs" filesystem.
    pub fn new() -> Box<MemFs> {
        let mut tree = Tree::new();
        tree.insert("/".to_string(), MemFsNode::new_dir());
        Box::new(MemFs {
            tree: Arc::new(Mutex::new(tree)),
        })
    }

    fn lock(&self) -> FsResult<MutexGuard<'_, Tree>> {
        self.tree.lock().map_err(|_| FsError::GeneralFailure)
    }

    // the parent of `key` must be an existing directory.
    fn check_parent(tree: &Tree, key: &str) -> FsResult<()> {
        match tree.get(&parent_key(key)) {
            Some(node) if node.is_dir => Ok(()),
            Some(_) => Err(FsError::Forbidden),
            None => Err(FsError::NotFound),
        }
    }

    fn touch_parent(tree: &mut Tree, key: &str) {
        if let Some(parent) = tree.get_mut(&parent_key(key)) {
            parent.mtime = SystemTime::now();
        }
    }

    fn do_write(&self, path: &DavPath, data: Bytes, start: Option<u64>) -> FsResult<Box<dyn DavMetaData>> {
        let mut tree = self.lock()?;
        let key = key(path);
        if !tree.contains_key(&key) {
            MemFs::check_parent(&tree, &key)?;
            tree.insert(key.clone(), MemFsNode::new_file());
            MemFs::touch_parent(&mut tree, &key);
        }
        let node = tree.get_mut(&key).ok_or(FsError::NotFound)?;
        if node.is_dir {
            return Err(FsError::Forbidden);
        }
        match start {
            None => node.data = data.to_vec(),
            Some(start) => {
                let start = usize::try_from(start).map_err(|_| FsError::TooLarge)?;
                let end = start + data.len();
                if node.data.len() < end {
                    node.data.resize(end, 0);
                }
                node.data[start..end].copy_from_slice(&data);
            }
        }
        node.mtime = SystemTime::now();
        Ok(node.meta())
    }

    fn do_copy(&self, from: &DavPath, to: &DavPath, deep: bool, remove_source: bool) -> FsResult<()> {
        let mut tree = self.lock()?;
        let (from, to) = (key(from), key(to));
        if !tree.contains_key(&from) {
            return Err(FsError::NotFound);
        }
        if tree.contains_key(&to) {
            return Err(FsError::Exists);
        }
        if from == "/" || is_below(&to, &from) {
            return Err(FsError::Forbidden);
        }
        MemFs::check_parent(&tree, &to)?;

        let keys = if deep || remove_source {
            subtree(&tree, &from)
        } else {
            vec![from.clone()]
        };
        for k in keys {
            let node = match remove_source {
                true => tree.remove(&k),
                false => tree.get(&k).cloned(),
            };
            if let Some(mut node) = node {
                if !remove_source {
                    node.crtime = SystemTime::now();
                }
                tree.insert(format!("{}{}", to, &k[from.len()..]), node);
            }
        }
        MemFs::touch_parent(&mut tree, &to);
        if remove_source {
            MemFs::touch_parent(&mut tree, &from);
        }
        Ok(())
    }
}

impl DavFileSystem for MemFs {
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        let res = self
            .lock()
            .and_then(|tree| tree.get(&key(path)).map(|n| n.meta()).ok_or(FsError::NotFound));
        future::ready(res).boxed()
    }

    fn read_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Vec<DavDirEntry>> {
        let res = self.lock().and_then(|tree| {
            let dir = key(path);
            match tree.get(&dir) {
                Some(node) if node.is_dir => {}
                Some(_) => return Err(FsError::Forbidden),
                None => return Err(FsError::NotFound),
            }
            let entries = subtree(&tree, &dir)
                .into_iter()
                .filter(|k| *k != dir && parent_key(k) == dir)
                .filter_map(|k| {
                    let node = tree.get(&k)?;
                    let name = k.rsplit('/').next().unwrap_or_default().to_string();
                    Some(DavDirEntry { name, meta: node.meta() })
                })
                .collect();
            Ok(entries)
        });
        future::ready(res).boxed()
    }

    fn read<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Bytes> {
        let res = self.lock().and_then(|tree| match tree.get(&key(path)) {
            Some(node) if node.is_dir => Err(FsError::Forbidden),
            Some(node) => Ok(Bytes::from(node.data.clone())),
            None => Err(FsError::NotFound),
        });
        future::ready(res).boxed()
    }

    fn write<'a>(&'a self, path: &'a DavPath, data: Bytes, start: Option<u64>) -> FsFuture<'a, Box<dyn DavMetaData>> {
        trace!("FS: write {path} ({} bytes at {start:?})", data.len());
        future::ready(self.do_write(path, data, start)).boxed()
    }

    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        trace!("FS: create_dir {path}");
        let res = self.lock().and_then(|mut tree| {
            let key = key(path);
            if tree.contains_key(&key) {
                return Err(FsError::Exists);
            }
            MemFs::check_parent(&tree, &key)?;
            tree.insert(key.clone(), MemFsNode::new_dir());
            MemFs::touch_parent(&mut tree, &key);
            Ok(())
        });
        future::ready(res).boxed()
    }

    fn remove<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        trace!("FS: remove {path}");
        let res = self.lock().and_then(|mut tree| {
            let key = key(path);
            if key == "/" {
                return Err(FsError::Forbidden);
            }
            if !tree.contains_key(&key) {
                return Err(FsError::NotFound);
            }
            for k in subtree(&tree, &key) {
                tree.remove(&k);
            }
            MemFs::touch_parent(&mut tree, &key);
            Ok(())
        });
        future::ready(res).boxed()
    }

    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath, deep: bool) -> FsFuture<'a, ()> {
        trace!("FS: copy {from} {to} (deep: {deep})");
        future::ready(self.do_copy(from, to, deep, false)).boxed()
    }

    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        trace!("FS: rename {from} {to}");
        future::ready(self.do_copy(from, to, true, true)).boxed()
    }

    fn set_modified<'a>(&'a self, path: &'a DavPath, tm: SystemTime) -> FsFuture<'a, ()> {
        let res = self.lock().and_then(|mut tree| {
            let node = tree.get_mut(&key(path)).ok_or(FsError::NotFound)?;
            node.mtime = tm;
            Ok(())
        });
        future::ready(res).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> DavPath {
        DavPath::new(s).unwrap()
    }

    #[tokio::test]
    async fn write_and_read() {
        let fs = MemFs::new();
        assert_eq!(fs.write(&p("/nope/a"), Bytes::from("x"), None).await.err(), Some(FsError::NotFound));
        let meta = fs.write(&p("/a.txt"), Bytes::from("hello"), None).await.unwrap();
        assert_eq!(meta.len(), 5);
        fs.write(&p("/a.txt"), Bytes::from("J"), Some(0)).await.unwrap();
        fs.write(&p("/a.txt"), Bytes::from("!"), Some(5)).await.unwrap();
        assert_eq!(fs.read(&p("/a.txt")).await.unwrap(), Bytes::from("Jello!"));
        assert_eq!(fs.read(&p("/")).await.err(), Some(FsError::Forbidden));
    }

    #[tokio::test]
    async fn dirs() {
        let fs = MemFs::new();
        fs.create_dir(&p("/d")).await.unwrap();
        assert_eq!(fs.create_dir(&p("/d/")).await.err(), Some(FsError::Exists));
        fs.create_dir(&p("/d/e")).await.unwrap();
        fs.write(&p("/d/f"), Bytes::from("1"), None).await.unwrap();
        fs.write(&p("/d/e/g"), Bytes::from("2"), None).await.unwrap();
        fs.write(&p("/d-x"), Bytes::from("3"), None).await.unwrap();

        let mut names: Vec<_> = fs.read_dir(&p("/d/")).await.unwrap().into_iter().map(|e| e.name).collect();
        names.sort();
        assert_eq!(names, vec!["e", "f"]);
        assert_eq!(fs.read_dir(&p("/")).await.unwrap().len(), 2);

        fs.remove(&p("/d")).await.unwrap();
        assert!(!fs.exists(&p("/d/e/g")).await.unwrap());
        assert!(fs.exists(&p("/d-x")).await.unwrap());
    }

    #[tokio::test]
    async fn copy_and_rename() {
        let fs = MemFs::new();
        fs.create_dir(&p("/d")).await.unwrap();
        fs.write(&p("/d/f"), Bytes::from("1"), None).await.unwrap();

        fs.copy(&p("/d"), &p("/shallow"), false).await.unwrap();
        assert!(fs.is_dir(&p("/shallow")).await.unwrap());
        assert!(!fs.exists(&p("/shallow/f")).await.unwrap());

        fs.copy(&p("/d"), &p("/deep"), true).await.unwrap();
        assert_eq!(fs.read(&p("/deep/f")).await.unwrap(), Bytes::from("1"));
        assert_eq!(fs.copy(&p("/d"), &p("/deep"), true).await.err(), Some(FsError::Exists));
        assert_eq!(fs.copy(&p("/d"), &p("/d/sub"), true).await.err(), Some(FsError::Forbidden));

        fs.rename(&p("/d"), &p("/moved")).await.unwrap();
        assert!(!fs.exists(&p("/d")).await.unwrap());
        assert!(fs.exists(&p("/moved/f")).await.unwrap());
    }
}
