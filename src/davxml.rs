//! Building the WebDAV response documents: multistatus, lock discovery
//! and error bodies.
use bytes::Bytes;
use http::StatusCode;
use xmltree::Element;

use crate::errors::DavResult;
use crate::lockkey::LockDepth;
use crate::lockmanager::{FileLock, LockKind};
use crate::xmltree_ext::{DAV_NS, ElementExt};

/// Content-Type of every XML body we send.
pub(crate) const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

fn status_line(status: StatusCode) -> String {
    format!("HTTP/1.1 {status}")
}

fn href(url: impl Into<String>) -> Element {
    Element::new_text("D:href", url)
}

/// `<D:response>` for one resource. `propstats` are grouped by status,
/// empty groups are left out.
pub(crate) fn response(url: &str, propstats: Vec<(StatusCode, Vec<Element>)>) -> Element {
    let mut resp = Element::new2("D:response");
    resp.push(href(url));
    for (status, props) in propstats {
        if props.is_empty() {
            continue;
        }
        let mut propstat = Element::new2("D:propstat");
        let mut prop = Element::new2("D:prop");
        for p in props {
            prop.push(p);
        }
        propstat.push(prop);
        propstat.push_text("D:status", status_line(status));
        resp.push(propstat);
    }
    resp
}

/// Wrap response fragments into one `<D:multistatus>` document.
pub(crate) fn multistatus(responses: Vec<Element>) -> DavResult<Bytes> {
    let mut ms = Element::new2("D:multistatus").ns("D", DAV_NS);
    for r in responses {
        ms.push(r);
    }
    ms.to_bytes()
}

/// `<D:activelock>` for one lock.
pub(crate) fn activelock(lock: &FileLock) -> Element {
    let mut actlock = Element::new2("D:activelock");

    let mut elem = Element::new2("D:lockscope");
    elem.push(match lock.kind() {
        LockKind::Exclusive => Element::new2("D:exclusive"),
        LockKind::Shared => Element::new2("D:shared"),
    });
    actlock.push(elem);

    let mut elem = Element::new2("D:locktype");
    elem.push(Element::new2("D:write"));
    actlock.push(elem);

    actlock.push_text(
        "D:depth",
        match lock.depth {
            LockDepth::Zero => "0",
            LockDepth::Infinity => "infinity",
        },
    );

    if let Some(owner) = lock.dav_lock.as_ref().and_then(|d| d.owner.as_ref()) {
        actlock.push_text("D:owner", owner.as_str());
    }

    actlock.push_text("D:timeout", format!("Second-{}", lock.seconds_left()));

    if let Some(dav) = &lock.dav_lock {
        let mut locktoken = Element::new2("D:locktoken");
        locktoken.push(href(dav.locktoken.as_str()));
        actlock.push(locktoken);

        let mut lockroot = Element::new2("D:lockroot");
        lockroot.push(href(dav.lockroot.as_str()));
        actlock.push(lockroot);
    }
    actlock
}

/// `<D:lockdiscovery>`, empty when there is no lock.
pub(crate) fn lockdiscovery(lock: Option<&FileLock>) -> Element {
    let mut elem = Element::new2("D:lockdiscovery");
    if let Some(lock) = lock {
        elem.push(activelock(lock));
    }
    elem
}

/// The body of a LOCK response: `<D:prop><D:lockdiscovery>...`.
pub(crate) fn lock_prop(lock: &FileLock) -> DavResult<Bytes> {
    let mut prop = Element::new2("D:prop").ns("D", DAV_NS);
    prop.push(lockdiscovery(Some(lock)));
    prop.to_bytes()
}

pub(crate) fn supportedlock() -> Element {
    let mut elem = Element::new2("D:supportedlock");
    for kind in ["D:exclusive", "D:shared"] {
        let mut entry = Element::new2("D:lockentry");
        let mut scope = Element::new2("D:lockscope");
        scope.push(Element::new2(kind));
        entry.push(scope);
        let mut locktype = Element::new2("D:locktype");
        locktype.push(Element::new2("D:write"));
        entry.push(locktype);
        elem.push(entry);
    }
    elem
}

/// `<D:error>` body with one precondition element, optionally naming
/// resources.
pub(crate) fn error_body(condition: &str, hrefs: &[&str]) -> DavResult<Bytes> {
    let mut cond = Element::new2(condition);
    for h in hrefs {
        cond.push(href(*h));
    }
    let mut err = Element::new2("D:error").ns("D", DAV_NS);
    err.push(cond);
    err.to_bytes()
}

/// 423 body: the lock that is in the way.
pub(crate) fn lock_conflict_body(lock: &FileLock) -> DavResult<Bytes> {
    let root = match &lock.dav_lock {
        Some(d) => d.lockroot.as_str(),
        None => lock.db_file_path.as_str(),
    };
    error_body("D:lock-token-submitted", &[root])
}
