//! Utility module to handle the path part of an URL.
//!
//! A `DavPath` is the request path relative to the protocol base path
//! (the "prefix"). It is used for hrefs in responses, for the segments
//! handed to the path resolver, and as the key into the filesystem.
use std::error::Error;

use percent_encoding as pct;

use crate::DavError;

/// Path information relative to a prefix.
#[derive(Clone)]
pub struct DavPath {
    pub(crate) path: Vec<u8>,
    pub(crate) prefix: Vec<u8>,
}

// Encode all non-unreserved characters, except '/'.
// See RFC3986, and https://en.wikipedia.org/wiki/Percent-encoding .
const PATH_ENCODE_SET: &pct::AsciiSet = &pct::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

impl std::fmt::Display for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.as_url_string_with_prefix())
    }
}

// "/prefix[/path]"
impl std::fmt::Debug for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "\"{}[{}]\"", encode_path(&self.prefix), encode_path(&self.path))
    }
}

/// Error returned by some of the DavPath methods.
#[derive(Debug)]
pub enum ParseError {
    /// cannot parse
    InvalidPath,
    /// outside of prefix
    IllegalPath,
    /// too many dotdots
    ForbiddenPath,
}

impl Error for ParseError {}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<ParseError> for DavError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::InvalidPath => DavError::InvalidPath,
            ParseError::IllegalPath => DavError::IllegalPath,
            ParseError::ForbiddenPath => DavError::ForbiddenPath,
        }
    }
}

// a decoded segment can contain any value except '/' or '\0'
fn valid_segment(src: &[u8]) -> Result<(), ParseError> {
    let mut p = pct::percent_decode(src);
    if p.any(|x| x == 0 || x == b'/') {
        return Err(ParseError::InvalidPath);
    }
    Ok(())
}

fn encode_path(src: &[u8]) -> String {
    pct::percent_encode(src, PATH_ENCODE_SET).to_string()
}

// make path safe:
// - raw path before decoding can contain only printable ascii
// - make sure path is absolute
// - remove query part (everything after ?)
// - merge consecutive slashes
// - process . and ..
// - decode percent encoded bytes, fail on invalid encodings.
// - do not allow NUL or '/' in segments.
fn normalize_path(rp: &[u8]) -> Result<Vec<u8>, ParseError> {
    // must consist of printable ASCII
    if rp.iter().any(|&x| !(32..=126).contains(&x)) {
        return Err(ParseError::InvalidPath);
    }

    // don't allow fragments. query part gets deleted.
    let mut rawpath = rp;
    if let Some(pos) = rawpath.iter().position(|&x| x == b'?' || x == b'#') {
        if rawpath[pos] == b'#' {
            return Err(ParseError::InvalidPath);
        }
        rawpath = &rawpath[..pos];
    }

    // must start with "/"
    if rawpath.is_empty() || rawpath[0] != b'/' {
        return Err(ParseError::InvalidPath);
    }

    // split up in segments
    let isdir = matches!(rawpath.last(), Some(b'/'));
    let segments = rawpath.split(|c| *c == b'/');
    let mut v: Vec<&[u8]> = Vec::new();
    for segment in segments {
        match segment {
            b"." | b"" => {}
            b".." => {
                if v.len() < 2 {
                    return Err(ParseError::ForbiddenPath);
                }
                v.pop();
                v.pop();
            }
            s => {
                valid_segment(s)?;
                v.push(b"/");
                v.push(s);
            }
        }
    }
    if isdir || v.is_empty() {
        v.push(b"/");
    }
    Ok(v.iter().flat_map(|s| pct::percent_decode(s)).collect())
}

/// Comparison ignores any trailing slash, so /foo == /foo/
impl PartialEq for DavPath {
    fn eq(&self, rhs: &DavPath) -> bool {
        self.prefix == rhs.prefix && self.trimmed() == rhs.trimmed()
    }
}

impl DavPath {
    /// Create a new path from an (unencoded) string, without prefix.
    pub fn new(src: &str) -> Result<DavPath, ParseError> {
        let path = normalize_path(encode_path(src.as_bytes()).as_bytes())?;
        Ok(DavPath {
            path,
            prefix: Vec::new(),
        })
    }

    /// from URL encoded strings: path and prefix.
    pub(crate) fn from_str_and_prefix(src: &str, prefix: &str) -> Result<DavPath, ParseError> {
        let path = normalize_path(src.as_bytes())?;
        let prefix = prefix.trim_end_matches('/').as_bytes();
        let rest = path.strip_prefix(prefix).ok_or(ParseError::IllegalPath)?;
        // the prefix has to end at a segment boundary.
        let path = match rest {
            [] => b"/".to_vec(),
            [b'/', ..] => rest.to_vec(),
            _ => return Err(ParseError::IllegalPath),
        };
        Ok(DavPath {
            path,
            prefix: prefix.to_vec(),
        })
    }

    /// from request.uri
    pub(crate) fn from_uri_and_prefix(uri: &http::uri::Uri, prefix: &str) -> Result<Self, ParseError> {
        match uri.path() {
            "*" => Ok(DavPath {
                prefix: b"".to_vec(),
                path: b"*".to_vec(),
            }),
            path if path.starts_with('/') => DavPath::from_str_and_prefix(path, prefix),
            _ => Err(ParseError::InvalidPath),
        }
    }

    /// from url::Url and prefix string.
    pub(crate) fn from_url(url: &url::Url, prefix: &str) -> Result<Self, ParseError> {
        DavPath::from_str_and_prefix(url.path(), prefix)
    }

    // is this a "star" request (only used with OPTIONS)
    pub(crate) fn is_star(&self) -> bool {
        self.path == b"*"
    }

    // path without trailing slash (except for the root).
    fn trimmed(&self) -> &[u8] {
        let mut a = self.path.as_slice();
        if a.len() > 1 && a.ends_with(b"/") {
            a = &a[..a.len() - 1];
        }
        a
    }

    /// as URL encoded string, no prefix.
    pub fn as_url_string(&self) -> String {
        encode_path(&self.path)
    }

    /// as URL encoded string, with prefix.
    pub fn as_url_string_with_prefix(&self) -> String {
        let mut p = encode_path(&self.prefix);
        p.push_str(&encode_path(&self.path));
        p
    }

    /// as utf8 string without trailing slash, no prefix.
    pub fn as_utf8_string(&self) -> String {
        String::from_utf8_lossy(self.trimmed()).to_string()
    }

    /// as raw bytes, not encoded, no prefix.
    pub fn as_bytes(&self) -> &[u8] {
        self.path.as_slice()
    }

    /// The decoded path segments. "/" has none.
    pub fn segments(&self) -> Vec<String> {
        self.path
            .split(|&c| c == b'/')
            .filter(|e| !e.is_empty())
            .map(|s| String::from_utf8_lossy(s).to_string())
            .collect()
    }

    /// is this a collection i.e. does the original URL path end in "/".
    pub fn is_collection(&self) -> bool {
        self.path.ends_with(b"/")
    }

    /// is this the root of the prefix.
    pub fn is_root(&self) -> bool {
        self.trimmed() == b"/"
    }

    /// return the URL prefix.
    pub fn prefix(&self) -> String {
        String::from_utf8_lossy(&self.prefix).to_string()
    }

    /// add a slash to the end of the path (if not already present).
    pub(crate) fn add_slash(&mut self) {
        if !self.is_collection() {
            self.path.push(b'/');
        }
    }

    pub(crate) fn add_slash_if(&mut self, b: bool) {
        if b {
            self.add_slash();
        }
    }

    /// The parent collection, with a trailing slash. The parent of
    /// the root is the root.
    pub fn parent(&self) -> DavPath {
        let t = self.trimmed();
        let path = match t.iter().rposition(|&c| c == b'/') {
            Some(pos) if pos > 0 => t[..=pos].to_vec(),
            _ => b"/".to_vec(),
        };
        DavPath {
            prefix: self.prefix.clone(),
            path,
        }
    }

    /// The filename is the last segment of the path. Can be empty.
    pub fn file_name(&self) -> String {
        self.segments().pop().unwrap_or_default()
    }

    /// Add a segment to the end of the path.
    pub fn push_segment(&mut self, b: &[u8]) {
        if !self.is_collection() {
            self.path.push(b'/');
        }
        self.path.extend_from_slice(b);
    }

    pub(crate) fn get_mime_type_str(&self) -> &'static str {
        let name = self.file_name();
        if let Some((_, ext)) = name.rsplit_once('.') {
            if let Some(t) = mime_guess::from_ext(ext).first_raw() {
                return t;
            }
        }
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize() {
        let p = DavPath::from_str_and_prefix("/dav/a//b/./c/../d%20e", "/dav").unwrap();
        assert_eq!(p.as_bytes(), b"/a/b/d e");
        assert_eq!(p.as_url_string_with_prefix(), "/dav/a/b/d%20e");
        assert_eq!(p.segments(), vec!["a", "b", "d e"]);
        assert_eq!(p.file_name(), "d e");
    }

    #[test]
    fn prefix_mismatch() {
        assert!(matches!(
            DavPath::from_str_and_prefix("/other/a", "/dav"),
            Err(ParseError::IllegalPath)
        ));
        assert!(matches!(
            DavPath::from_str_and_prefix("/davx/a", "/dav"),
            Err(ParseError::IllegalPath)
        ));
        assert!(matches!(
            DavPath::from_str_and_prefix("/../a", ""),
            Err(ParseError::ForbiddenPath)
        ));
    }

    #[test]
    fn prefix_root() {
        let p = DavPath::from_str_and_prefix("/dav", "/dav").unwrap();
        assert!(p.is_root());
        assert_eq!(p.as_url_string_with_prefix(), "/dav/");
    }

    #[test]
    fn parent_and_eq() {
        let p = DavPath::new("/a/b/c/").unwrap();
        assert_eq!(p.parent().as_bytes(), b"/a/b/");
        assert_eq!(DavPath::new("/a").unwrap().parent().as_bytes(), b"/");
        assert!(DavPath::new("/a/b").unwrap() == DavPath::new("/a/b/").unwrap());
    }
}
