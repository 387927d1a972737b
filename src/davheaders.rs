//! Typed versions of the WebDAV request and response headers.
use std::fmt::Display;
use std::str::FromStr;

use headers::Header;
use http::header::{HeaderName, HeaderValue};

pub static DEPTH: HeaderName = HeaderName::from_static("depth");
pub static TIMEOUT: HeaderName = HeaderName::from_static("timeout");
pub static OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
pub static DESTINATION: HeaderName = HeaderName::from_static("destination");
pub static IF: HeaderName = HeaderName::from_static("if");
pub static DAV: HeaderName = HeaderName::from_static("dav");
pub static MS_AUTHOR_VIA: HeaderName = HeaderName::from_static("ms-author-via");
pub static LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");
pub static CONTENT_LOCATION: HeaderName = HeaderName::from_static("content-location");

fn bad() -> headers::Error {
    headers::Error::invalid()
}

// Implements `headers::Header` for a header that appears exactly once,
// given a function that parses its (trimmed) value and one that formats it.
macro_rules! dav_header {
    ($ty:ty, $name:expr, $parse:expr, $format:expr) => {
        impl Header for $ty {
            fn name() -> &'static HeaderName {
                &$name
            }

            fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
            where
                I: Iterator<Item = &'i HeaderValue>,
            {
                let value = values.next().ok_or_else(bad)?;
                if values.next().is_some() {
                    return Err(bad());
                }
                $parse(value.to_str().map_err(|_| bad())?.trim())
            }

            fn encode<E>(&self, values: &mut E)
            where
                E: Extend<HeaderValue>,
            {
                if let Ok(value) = HeaderValue::from_str(&$format(self)) {
                    values.extend(std::iter::once(value));
                }
            }
        }
    };
}

/// `Lock-Token: <urn:uuid:...>`, as sent by the client on UNLOCK and
/// by us in a LOCK response.
#[derive(Debug, Clone, PartialEq)]
pub struct LockToken(pub String);

impl LockToken {
    /// The token without the angle brackets of the Coded-URL.
    pub fn token(&self) -> Option<&str> {
        let t = self.0.strip_prefix('<')?.strip_suffix('>')?;
        (!t.is_empty()).then_some(t)
    }
}

dav_header!(LockToken, LOCK_TOKEN, |s: &str| Ok(LockToken(s.to_string())), |t: &LockToken| t.0.clone());

#[derive(Debug, Clone, PartialEq)]
pub struct ContentLocation(pub String);

dav_header!(
    ContentLocation,
    CONTENT_LOCATION,
    |s: &str| Ok(ContentLocation(s.to_string())),
    |c: &ContentLocation| c.0.clone()
);

/// Depth: header.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

fn parse_depth(s: &str) -> Result<Depth, headers::Error> {
    match s {
        "0" => Ok(Depth::Zero),
        "1" => Ok(Depth::One),
        s if s.eq_ignore_ascii_case("infinity") => Ok(Depth::Infinity),
        _ => Err(bad()),
    }
}

fn format_depth(d: &Depth) -> String {
    match d {
        Depth::Zero => "0",
        Depth::One => "1",
        Depth::Infinity => "infinity",
    }
    .to_string()
}

dav_header!(Depth, DEPTH, parse_depth, format_depth);

#[derive(Debug, Clone, PartialEq)]
pub enum DavTimeout {
    Seconds(u32),
    Infinite,
}

/// Timeout: header. A list of choices, the client's preference first.
#[derive(Debug, Clone)]
pub struct Timeout(pub Vec<DavTimeout>);

fn parse_timeout(s: &str) -> Result<Timeout, headers::Error> {
    s.split(',')
        .map(str::trim)
        .map(|word| match word.strip_prefix("Second-") {
            Some(num) => num.parse().map(DavTimeout::Seconds).map_err(|_| bad()),
            None if word == "Infinite" => Ok(DavTimeout::Infinite),
            None => Err(bad()),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Timeout)
}

fn format_timeout(t: &Timeout) -> String {
    let words: Vec<String> = t
        .0
        .iter()
        .map(|w| match w {
            DavTimeout::Seconds(n) => format!("Second-{n}"),
            DavTimeout::Infinite => "Infinite".to_string(),
        })
        .collect();
    words.join(", ")
}

dav_header!(Timeout, TIMEOUT, parse_timeout, format_timeout);

/// Destination: header. Holds the (still percent-encoded) path,
/// the scheme and authority of an absolute URL are dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct Destination(pub String);

fn parse_destination(s: &str) -> Result<Destination, headers::Error> {
    if s.starts_with('/') {
        return Ok(Destination(s.to_string()));
    }
    let url = url::Url::parse(s).map_err(|_| bad())?;
    match url.scheme() {
        "http" | "https" => Ok(Destination(url.path().to_string())),
        _ => Err(bad()),
    }
}

dav_header!(Destination, DESTINATION, parse_destination, |d: &Destination| d.0.clone());

/// Overwrite: header, `T` or `F`.
#[derive(Debug, Clone, PartialEq)]
pub struct Overwrite(pub bool);

dav_header!(
    Overwrite,
    OVERWRITE,
    |s: &str| match s {
        "T" => Ok(Overwrite(true)),
        "F" => Ok(Overwrite(false)),
        _ => Err(bad()),
    },
    |o: &Overwrite| String::from(if o.0 { "T" } else { "F" })
);

/// An entity tag. Everything we generate is weak, so comparisons
/// are always weak (RFC 7232, 2.3.2).
#[derive(Debug, Clone)]
pub struct ETag {
    tag: String,
    weak: bool,
}

impl ETag {
    pub fn new(weak: bool, t: impl Into<String>) -> Result<ETag, headers::Error> {
        let tag = t.into();
        match tag.contains('"') {
            true => Err(bad()),
            false => Ok(ETag { tag, weak }),
        }
    }

    pub fn weak_eq(&self, other: &ETag) -> bool {
        self.tag == other.tag
    }
}

impl FromStr for ETag {
    type Err = headers::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (weak, quoted) = match s.strip_prefix("W/") {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let tag = quoted
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .ok_or_else(bad)?;
        ETag::new(weak, tag)
    }
}

impl Display for ETag {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.weak {
            f.write_str("W/")?;
        }
        write!(f, "\"{}\"", self.tag)
    }
}

impl PartialEq for ETag {
    fn eq(&self, other: &Self) -> bool {
        self.weak_eq(other)
    }
}

dav_header!(ETag, http::header::ETAG, ETag::from_str, ETag::to_string);

/// If: header (RFC 4918, 10.4). The lists are ORed.
#[derive(Debug, Clone, PartialEq)]
pub struct If(pub Vec<IfList>);

/// One parenthesized list, optionally tagged with the resource it is
/// about. Its conditions are ANDed.
#[derive(Debug, Clone, PartialEq)]
pub struct IfList {
    pub resource_tag: Option<url::Url>,
    pub conditions: Vec<IfCondition>,
}

/// `[Not] <state-token>` or `[Not] [etag]`.
#[derive(Debug, Clone, PartialEq)]
pub struct IfCondition {
    pub not: bool,
    pub item: IfItem,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IfItem {
    StateToken(String),
    ETag(ETag),
}

#[derive(Debug, PartialEq)]
enum IfToken<'a> {
    Open,
    Close,
    Not,
    Coded(&'a str),
    Tag(&'a str),
    Word(&'a str),
}

struct IfLexer<'a> {
    rest: &'a str,
}

// offset of the `close` character that ends the token at the start of
// `s`. No whitespace inside, quotes may hide a `close`.
fn token_end(s: &str, close: char) -> Result<usize, headers::Error> {
    let mut quoted = false;
    for (i, c) in s.char_indices().skip(1) {
        match c {
            '"' => quoted = !quoted,
            c if c.is_ascii_whitespace() => return Err(bad()),
            c if c == close && !quoted => return Ok(i),
            _ => {}
        }
    }
    Err(bad())
}

impl<'a> IfLexer<'a> {
    fn next_token(&mut self) -> Result<Option<IfToken<'a>>, headers::Error> {
        let s = self.rest.trim_start_matches(|c: char| c.is_ascii_whitespace());
        let Some(first) = s.chars().next() else {
            return Ok(None);
        };
        let (token, len) = match first {
            '(' => (IfToken::Open, 1),
            ')' => (IfToken::Close, 1),
            '<' => {
                let end = token_end(s, '>')?;
                (IfToken::Coded(&s[1..end]), end + 1)
            }
            '[' => {
                let end = token_end(s, ']')?;
                (IfToken::Tag(&s[1..end]), end + 1)
            }
            _ if s.starts_with("Not") => (IfToken::Not, 3),
            _ => {
                let end = s
                    .find(|c: char| c.is_ascii_whitespace() || c.is_control() || "<>()[]".contains(c))
                    .unwrap_or(s.len());
                if end == 0 {
                    return Err(bad());
                }
                (IfToken::Word(&s[..end]), end)
            }
        };
        self.rest = &s[len..];
        Ok(Some(token))
    }

    // conditions up to and including the closing `)`.
    fn conditions(&mut self) -> Result<Vec<IfCondition>, headers::Error> {
        let mut conditions = Vec::new();
        let mut not = false;
        loop {
            let item = match self.next_token()?.ok_or_else(bad)? {
                IfToken::Close if !not && !conditions.is_empty() => return Ok(conditions),
                IfToken::Not if !not => {
                    not = true;
                    continue;
                }
                // no real URI parser, at least one ':' will do.
                IfToken::Coded(t) | IfToken::Word(t) if t.contains(':') => IfItem::StateToken(t.to_string()),
                IfToken::Tag(t) => IfItem::ETag(t.parse()?),
                _ => return Err(bad()),
            };
            conditions.push(IfCondition { not, item });
            not = false;
        }
    }
}

fn parse_if(s: &str) -> Result<If, headers::Error> {
    let mut lexer = IfLexer { rest: s };
    let mut lists = Vec::new();
    while let Some(token) = lexer.next_token()? {
        let resource_tag = match token {
            IfToken::Open => None,
            IfToken::Coded(url) => {
                let url = url::Url::parse(url).map_err(|_| bad())?;
                if lexer.next_token()? != Some(IfToken::Open) {
                    return Err(bad());
                }
                Some(url)
            }
            _ => return Err(bad()),
        };
        let conditions = lexer.conditions()?;
        lists.push(IfList {
            resource_tag,
            conditions,
        });
    }
    match lists.is_empty() {
        true => Err(bad()),
        false => Ok(If(lists)),
    }
}

// never sent by us.
dav_header!(If, IF, parse_if, |_: &If| "[If header]".to_string());

#[cfg(test)]
mod tests {
    use super::*;

    fn decode<H: Header>(s: &'static str) -> Result<H, headers::Error> {
        let hdrval = HeaderValue::from_static(s);
        let mut iter = std::iter::once(&hdrval);
        H::decode(&mut iter)
    }

    #[test]
    fn if_header() {
        let val = r#"  <http://x.yz/a> ([W/"etag"] Not <DAV:no-lock> ) (Not<urn:x>[W/"bla"] plain:word:123) "#;
        let hdr = decode::<If>(val).unwrap();
        assert_eq!(hdr.0.len(), 2);
        assert_eq!(hdr.0[0].resource_tag.as_ref().map(|u| u.path()), Some("/a"));
        assert_eq!(
            hdr.0[0].conditions[1],
            IfCondition {
                not: true,
                item: IfItem::StateToken("DAV:no-lock".to_string())
            }
        );
        assert!(hdr.0[1].resource_tag.is_none());
        assert_eq!(hdr.0[1].conditions.len(), 3);
        assert!(hdr.0[1].conditions[0].not);
        assert!(!hdr.0[1].conditions[1].not);
    }

    #[test]
    fn if_header_bad() {
        assert!(decode::<If>("").is_err());
        assert!(decode::<If>("()").is_err());
        assert!(decode::<If>("(<urn:x>").is_err());
        assert!(decode::<If>("(<urn:x").is_err());
        assert!(decode::<If>("(nocolon)").is_err());
        assert!(decode::<If>("(Not Not <urn:x>)").is_err());
        assert!(decode::<If>("(<urn:x> Not)").is_err());
        assert!(decode::<If>("<http://x.yz/a> <urn:x>").is_err());
    }

    #[test]
    fn etag_header() {
        let t1 = ETag::from_str(r#"W/"12345""#).unwrap();
        let t2 = ETag::from_str(r#""12345""#).unwrap();
        let t3 = ETag::from_str(r#""12346""#).unwrap();
        assert!(t1.weak && !t2.weak);
        assert!(t1 == t2);
        assert!(t2 != t3);
        assert_eq!(t1.to_string(), r#"W/"12345""#);
        assert!(ETag::from_str("12345").is_err());
        assert!(ETag::from_str("\"").is_err());
    }

    #[test]
    fn simple_headers() {
        assert_eq!(decode::<Depth>("infinity").unwrap(), Depth::Infinity);
        assert!(decode::<Depth>("2").is_err());
        let t = decode::<Timeout>("Second-3600, Infinite").unwrap();
        assert_eq!(t.0, vec![DavTimeout::Seconds(3600), DavTimeout::Infinite]);
        assert!(decode::<Timeout>("Minute-1").is_err());
        assert_eq!(decode::<Overwrite>("F").unwrap(), Overwrite(false));
        assert_eq!(
            decode::<Destination>("http://host:8080/dav/b%20c").unwrap(),
            Destination("/dav/b%20c".to_string())
        );
        assert_eq!(decode::<Destination>("/dav/x").unwrap(), Destination("/dav/x".to_string()));
        assert!(decode::<Destination>("ftp://host/x").is_err());
        assert_eq!(decode::<LockToken>("<urn:uuid:1>").unwrap().token(), Some("urn:uuid:1"));
        assert_eq!(decode::<LockToken>("urn:uuid:1").unwrap().token(), None);
    }
}
