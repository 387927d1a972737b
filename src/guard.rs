//! The request guard.
//!
//! Runs once per request, before any handler. The principal is checked
//! against the injected base capability check before the body is read.
//! Then the headers and the XML body for the method are validated into a
//! [`DavRequest`] that the handlers only ever read from.
use std::sync::Arc;
use std::time::Duration;

use headers::HeaderMapExt;
use http::{Request, StatusCode};
use xmltree::Element;

use crate::conditional::{self, IfCondition};
use crate::davheaders::{self, DavTimeout, Depth};
use crate::davpath::DavPath;
use crate::errors::{DavError, DavResult};
use crate::lockkey::LockDepth;
use crate::lockmanager::LockKind;
use crate::resolver::Principal;
use crate::util::DavMethod;
use crate::xmltree_ext::ElementExt;

/// Capability check run for every request except OPTIONS.
pub type BaseCheck = Arc<dyn Fn(&Principal, &Request<()>) -> bool + Send + Sync>;

/// What a PROPFIND asks for.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PropfindMode {
    AllProp,
    PropName,
    Prop(Vec<Element>),
}

/// Parameters of a LOCK request.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LockSettings {
    /// Requested timeout, already capped.
    pub timeout: Duration,
    /// `None` for a refresh (LOCK without body).
    pub info: Option<LockInfo>,
    pub depth: LockDepth,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LockInfo {
    pub scope: LockKind,
    pub owner: Option<String>,
}

/// One `set` or `remove` of a PROPPATCH, in document order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PropPatchItem {
    pub set: bool,
    pub prop: Element,
}

/// Parameters of a COPY or MOVE.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CopyMove {
    pub destination: DavPath,
    pub overwrite: bool,
    pub is_move: bool,
}

/// The request context. Built by [`DavGuard::parse`], never changed after.
#[derive(Debug, Clone)]
pub(crate) struct DavRequest {
    pub method: DavMethod,
    pub depth: Depth,
    pub body: Option<Element>,
    /// OR-branches of the `If` header.
    pub if_headers: Vec<IfCondition>,
    /// Lock tokens submitted in the `If` header.
    pub lock_tokens: Vec<String>,
    pub propfind: Option<PropfindMode>,
    pub lock: Option<LockSettings>,
    pub proppatch: Vec<PropPatchItem>,
    pub copy_move: Option<CopyMove>,
    /// From `Lock-Token:`, UNLOCK only.
    pub unlock_token: Option<String>,
}

impl DavRequest {
    fn new(method: DavMethod) -> DavRequest {
        DavRequest {
            method,
            depth: Depth::Zero,
            body: None,
            if_headers: Vec::new(),
            lock_tokens: Vec::new(),
            propfind: None,
            lock: None,
            proppatch: Vec::new(),
            copy_move: None,
            unlock_token: None,
        }
    }
}

// a zero timeout would hand out a token for a lock that is already gone.
const MIN_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-method request validation.
#[derive(Clone)]
pub(crate) struct DavGuard {
    pub base_check: Option<BaseCheck>,
    pub lock_ttl: Duration,
    pub prefix: String,
}

fn bad_request() -> DavError {
    DavError::Status(StatusCode::BAD_REQUEST)
}

fn parse_body(body: &[u8]) -> DavResult<Option<Element>> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(None);
    }
    Ok(Some(Element::parse2(body)?))
}

// `<D:owner>` is kept as text. If it holds an href, that is the text.
fn owner_text(owner: &Element) -> Option<String> {
    let text = match owner.child_elems().find(|e| e.is_dav("href")) {
        Some(href) => href.text_content(),
        None => owner.text_content(),
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn single_child<'a>(elem: &'a Element) -> DavResult<&'a Element> {
    let mut children = elem.child_elems();
    match (children.next(), children.next()) {
        (Some(child), None) => Ok(child),
        _ => Err(DavError::XmlParseError),
    }
}

fn parse_lockinfo(root: &Element) -> DavResult<LockInfo> {
    if !root.is_dav("lockinfo") {
        return Err(DavError::XmlParseError);
    }
    let mut scope = None;
    let mut locktype = false;
    let mut owner = None;
    for elem in root.child_elems() {
        match elem.name.as_str() {
            "lockscope" => {
                scope = match single_child(elem)?.name.as_str() {
                    "exclusive" => Some(LockKind::Exclusive),
                    "shared" => Some(LockKind::Shared),
                    _ => return Err(DavError::XmlParseError),
                }
            }
            "locktype" => match single_child(elem)?.name.as_str() {
                "write" => locktype = true,
                _ => return Err(DavError::XmlParseError),
            },
            "owner" => owner = owner_text(elem),
            _ => return Err(DavError::XmlParseError),
        }
    }
    match scope {
        Some(scope) if locktype => Ok(LockInfo { scope, owner }),
        _ => Err(DavError::XmlParseError),
    }
}

fn parse_propfind(body: Option<&Element>) -> DavResult<PropfindMode> {
    let root = match body {
        None => return Ok(PropfindMode::AllProp),
        Some(root) => root,
    };
    if !root.is_dav("propfind") {
        return Err(DavError::XmlParseError);
    }
    let mode = root
        .child_elems()
        .find(|e| e.is_dav("allprop") || e.is_dav("propname") || e.is_dav("prop"));
    match mode {
        None if !root.has_children() => Ok(PropfindMode::AllProp),
        None => Err(DavError::XmlParseError),
        Some(e) => match e.name.as_str() {
            "allprop" => Ok(PropfindMode::AllProp),
            "propname" => Ok(PropfindMode::PropName),
            _ => Ok(PropfindMode::Prop(e.child_elems().cloned().collect())),
        },
    }
}

fn parse_propertyupdate(body: Option<&Element>) -> DavResult<Vec<PropPatchItem>> {
    let root = match body {
        Some(root) if root.is_dav("propertyupdate") => root,
        _ => return Err(bad_request()),
    };
    let mut items = Vec::new();
    for elem in root.child_elems() {
        let set = match elem.name.as_str() {
            "set" => true,
            "remove" => false,
            _ => return Err(bad_request()),
        };
        for prop in elem.child_elems() {
            if !prop.is_dav("prop") {
                return Err(bad_request());
            }
            for p in prop.child_elems() {
                items.push(PropPatchItem { set, prop: p.clone() });
            }
        }
    }
    Ok(items)
}

impl DavGuard {
    fn timeout(&self, req: &Request<()>) -> Duration {
        let requested = match req.headers().typed_try_get::<davheaders::Timeout>() {
            Ok(Some(t)) => t.0.first().cloned(),
            _ => None,
        };
        match requested {
            Some(DavTimeout::Seconds(n)) => Duration::from_secs(n as u64).min(self.lock_ttl).max(MIN_LOCK_TIMEOUT),
            Some(DavTimeout::Infinite) | None => self.lock_ttl,
        }
    }

    /// The injected capability check. Runs before the body is read,
    /// OPTIONS is always allowed.
    pub(crate) fn check_base(&self, principal: &Principal, req: &Request<()>, method: DavMethod) -> DavResult<()> {
        match &self.base_check {
            Some(check) if method != DavMethod::Options && !check(principal, req) => {
                debug!("guard: {} may not use {:?}", principal.login, method);
                Err(DavError::Status(StatusCode::FORBIDDEN))
            }
            _ => Ok(()),
        }
    }

    /// Parse and validate one request. [`DavGuard::check_base`] must have
    /// passed already.
    pub(crate) fn parse(&self, req: &Request<()>, method: DavMethod, body: &[u8]) -> DavResult<DavRequest> {
        let mut dav = DavRequest::new(method);
        if method == DavMethod::Options {
            return Ok(dav);
        }

        let depth = req.headers().typed_try_get::<Depth>().ok().flatten();

        match method {
            DavMethod::PropFind => {
                dav.depth = match depth {
                    Some(Depth::Infinity) => {
                        warn!("PROPFIND with Depth: infinity on {}, using 1", req.uri());
                        Depth::One
                    }
                    Some(d) => d,
                    None => Depth::One,
                };
                dav.body = parse_body(body)?;
                dav.propfind = Some(parse_propfind(dav.body.as_ref())?);
            }
            DavMethod::Lock => {
                dav.body = parse_body(body)?;
                let info = match &dav.body {
                    Some(root) => Some(parse_lockinfo(root)?),
                    None => None,
                };
                let lock_depth = match (&info, depth) {
                    (Some(_), Some(Depth::Zero)) => LockDepth::Zero,
                    _ => LockDepth::Infinity,
                };
                if info.is_some() {
                    dav.depth = match lock_depth {
                        LockDepth::Zero => Depth::Zero,
                        LockDepth::Infinity => Depth::Infinity,
                    };
                }
                dav.lock = Some(LockSettings {
                    timeout: self.timeout(req),
                    info,
                    depth: lock_depth,
                });
            }
            DavMethod::Unlock => {
                let token = req
                    .headers()
                    .typed_get::<davheaders::LockToken>()
                    .and_then(|t| t.token().map(|t| t.to_string()));
                match token {
                    Some(t) => dav.unlock_token = Some(t),
                    None => return Err(bad_request()),
                }
            }
            DavMethod::Put => dav.depth = Depth::Zero,
            DavMethod::MkCol => {
                if !body.is_empty() {
                    return Err(DavError::Status(StatusCode::UNSUPPORTED_MEDIA_TYPE));
                }
                dav.depth = Depth::Zero;
            }
            DavMethod::PropPatch => {
                dav.body = parse_body(body)?;
                dav.proppatch = parse_propertyupdate(dav.body.as_ref())?;
            }
            DavMethod::Copy | DavMethod::Move => {
                let dest = match req.headers().typed_try_get::<davheaders::Destination>() {
                    Ok(Some(d)) => d,
                    _ => return Err(bad_request()),
                };
                let destination = DavPath::from_str_and_prefix(&dest.0, &self.prefix).map_err(|e| {
                    debug!("guard: destination {} outside of {}: {e}", dest.0, self.prefix);
                    bad_request()
                })?;
                dav.depth = match (method, depth) {
                    (_, None) | (_, Some(Depth::Infinity)) => Depth::Infinity,
                    (DavMethod::Copy, Some(Depth::Zero)) => Depth::Zero,
                    _ => return Err(bad_request()),
                };
                let overwrite = req
                    .headers()
                    .typed_get::<davheaders::Overwrite>()
                    .is_none_or(|o| o.0);
                dav.copy_move = Some(CopyMove {
                    destination,
                    overwrite,
                    is_move: method == DavMethod::Move,
                });
            }
            DavMethod::Delete => dav.depth = Depth::Infinity,
            DavMethod::Get | DavMethod::Head | DavMethod::Options => {}
        }

        match req.headers().typed_try_get::<davheaders::If>() {
            Ok(Some(hdr)) => {
                dav.if_headers = conditional::if_conditions(&hdr, &self.prefix);
                dav.lock_tokens = conditional::submitted_tokens(&dav.if_headers);
            }
            Ok(None) => {}
            Err(_) => return Err(bad_request()),
        }
        Ok(dav)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> DavGuard {
        DavGuard {
            base_check: None,
            lock_ttl: Duration::from_secs(86400),
            prefix: "/dav".to_string(),
        }
    }

    fn alice() -> Principal {
        Principal::new(1, "alice", "Alice")
    }

    fn req(method: &str, headers: &[(&str, &str)]) -> Request<()> {
        let mut b = Request::builder().method(method).uri("/dav/docs/a.txt");
        for (k, v) in headers {
            b = b.header(*k, *v);
        }
        b.body(()).unwrap()
    }

    fn parse(method: DavMethod, headers: &[(&str, &str)], body: &str) -> DavResult<DavRequest> {
        guard().parse(&req(method.as_str(), headers), method, body.as_bytes())
    }

    fn status(r: DavResult<DavRequest>) -> StatusCode {
        r.unwrap_err().statuscode()
    }

    #[test]
    fn propfind() {
        let dav = parse(DavMethod::PropFind, &[], "").unwrap();
        assert_eq!(dav.depth, Depth::One);
        assert_eq!(dav.propfind, Some(PropfindMode::AllProp));

        let dav = parse(DavMethod::PropFind, &[("Depth", "infinity")], "").unwrap();
        assert_eq!(dav.depth, Depth::One);

        let body = r#"<D:propfind xmlns:D="DAV:"><D:prop><D:getetag/><D:lockdiscovery/></D:prop></D:propfind>"#;
        let dav = parse(DavMethod::PropFind, &[("Depth", "0")], body).unwrap();
        assert_eq!(dav.depth, Depth::Zero);
        match dav.propfind {
            Some(PropfindMode::Prop(props)) => assert_eq!(props.len(), 2),
            other => panic!("unexpected {other:?}"),
        }

        let body = r#"<D:propfind xmlns:D="DAV:"><D:propname/></D:propfind>"#;
        assert_eq!(parse(DavMethod::PropFind, &[], body).unwrap().propfind, Some(PropfindMode::PropName));

        let body = r#"<D:propfind xmlns:D="DAV:"><D:bogus/></D:propfind>"#;
        assert_eq!(status(parse(DavMethod::PropFind, &[], body)), StatusCode::BAD_REQUEST);
        assert_eq!(status(parse(DavMethod::PropFind, &[], "<unclosed>")), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn lock() {
        let body = r#"<?xml version="1.0"?>
            <D:lockinfo xmlns:D="DAV:">
              <D:lockscope><D:exclusive/></D:lockscope>
              <D:locktype><D:write/></D:locktype>
              <D:owner><D:href>mailto:alice@example.com</D:href></D:owner>
            </D:lockinfo>"#;
        let dav = parse(DavMethod::Lock, &[("Timeout", "Second-3600"), ("Depth", "0")], body).unwrap();
        let lock = dav.lock.unwrap();
        assert_eq!(lock.timeout, Duration::from_secs(3600));
        assert_eq!(lock.depth, LockDepth::Zero);
        let info = lock.info.unwrap();
        assert_eq!(info.scope, LockKind::Exclusive);
        assert_eq!(info.owner.as_deref(), Some("mailto:alice@example.com"));

        let dav = parse(DavMethod::Lock, &[("Timeout", "Second-999999"), ("Depth", "1")], body).unwrap();
        let lock = dav.lock.unwrap();
        assert_eq!(lock.timeout, Duration::from_secs(86400));
        assert_eq!(lock.depth, LockDepth::Infinity);

        let dav = parse(DavMethod::Lock, &[("Timeout", "Second-0")], body).unwrap();
        assert_eq!(dav.lock.unwrap().timeout, Duration::from_secs(1));

        let dav = parse(DavMethod::Lock, &[("Timeout", "Infinite")], "").unwrap();
        let lock = dav.lock.unwrap();
        assert!(lock.info.is_none());
        assert_eq!(lock.timeout, Duration::from_secs(86400));

        let body = r#"<D:lockinfo xmlns:D="DAV:"><D:lockscope><D:exclusive/></D:lockscope></D:lockinfo>"#;
        assert_eq!(status(parse(DavMethod::Lock, &[], body)), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn unlock_and_mkcol() {
        assert_eq!(status(parse(DavMethod::Unlock, &[], "")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(parse(DavMethod::Unlock, &[("Lock-Token", "urn:uuid:1")], "")),
            StatusCode::BAD_REQUEST
        );
        let dav = parse(DavMethod::Unlock, &[("Lock-Token", "<urn:uuid:1>")], "").unwrap();
        assert_eq!(dav.unlock_token.as_deref(), Some("urn:uuid:1"));

        assert_eq!(status(parse(DavMethod::MkCol, &[], "<x/>")), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(parse(DavMethod::MkCol, &[], "").unwrap().depth, Depth::Zero);
    }

    #[test]
    fn proppatch() {
        assert_eq!(status(parse(DavMethod::PropPatch, &[], "")), StatusCode::BAD_REQUEST);
        assert_eq!(status(parse(DavMethod::PropPatch, &[], "<D:propfind xmlns:D=\"DAV:\"/>")), StatusCode::BAD_REQUEST);
        let body = r#"<D:propertyupdate xmlns:D="DAV:" xmlns:Z="urn:schemas-microsoft-com:">
            <D:set><D:prop><Z:Win32LastModifiedTime>Sun, 06 Nov 1994 08:49:37 GMT</Z:Win32LastModifiedTime></D:prop></D:set>
            <D:remove><D:prop><D:getlastmodified/></D:prop></D:remove>
            </D:propertyupdate>"#;
        let dav = parse(DavMethod::PropPatch, &[], body).unwrap();
        assert_eq!(dav.proppatch.len(), 2);
        assert!(dav.proppatch[0].set);
        assert_eq!(dav.proppatch[0].prop.name, "Win32LastModifiedTime");
        assert!(!dav.proppatch[1].set);
    }

    #[test]
    fn copy_move() {
        assert_eq!(status(parse(DavMethod::Copy, &[], "")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(parse(DavMethod::Copy, &[("Destination", "http://h/elsewhere/b.txt")], "")),
            StatusCode::BAD_REQUEST
        );
        let dav = parse(DavMethod::Move, &[("Destination", "http://h/dav/b.txt")], "").unwrap();
        let cm = dav.copy_move.unwrap();
        assert_eq!(cm.destination.as_url_string(), "/b.txt");
        assert!(cm.overwrite && cm.is_move);
        assert_eq!(dav.depth, Depth::Infinity);

        let dav = parse(DavMethod::Copy, &[("Destination", "/dav/b.txt"), ("Overwrite", "F"), ("Depth", "0")], "").unwrap();
        assert!(!dav.copy_move.unwrap().overwrite);
        assert_eq!(dav.depth, Depth::Zero);
        assert_eq!(
            status(parse(DavMethod::Move, &[("Destination", "/dav/b.txt"), ("Depth", "0")], "")),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn if_header_and_base_check() {
        let dav = parse(DavMethod::Put, &[("If", "(<urn:uuid:1>) (<urn:uuid:2>)")], "").unwrap();
        assert_eq!(dav.if_headers.len(), 2);
        assert_eq!(dav.lock_tokens, vec!["urn:uuid:1", "urn:uuid:2"]);
        assert_eq!(status(parse(DavMethod::Put, &[("If", "(<urn:uuid:1")], "")), StatusCode::BAD_REQUEST);

        let mut g = guard();
        g.base_check = Some(Arc::new(|p: &Principal, _: &Request<()>| p.login != "alice"));
        let r = g.check_base(&alice(), &req("GET", &[]), DavMethod::Get);
        assert_eq!(r.unwrap_err().statuscode(), StatusCode::FORBIDDEN);
        assert!(g.check_base(&alice(), &req("OPTIONS", &[]), DavMethod::Options).is_ok());
        let bob = Principal::new(2, "bob", "Bob");
        assert!(g.check_base(&bob, &req("GET", &[]), DavMethod::Get).is_ok());
    }
}
