use std::time::SystemTime;

use http::{HeaderValue, Response, StatusCode};
use xmltree::Element;

use crate::DavResult;
use crate::body::Body;
use crate::davheaders::{Depth, ETag};
use crate::davxml;
use crate::errors::DavError;
use crate::fs::DavMetaData;
use crate::guard::{DavRequest, PropfindMode};
use crate::lockkey::LockDepth;
use crate::lockmanager::{ConflictOptions, FileLock};
use crate::resolver::{Permission, ResourceScope};
use crate::util::{parse_datetime, systemtime_to_httpdate, systemtime_to_rfc3339};
use crate::xmltree_ext::ElementExt;

// properties returned by PROPFIND <allprop/>, <propname/> or empty body.
const ALLPROP: &[&str] = &[
    "creationdate",
    "displayname",
    "getcontentlength",
    "getcontenttype",
    "getetag",
    "getlastmodified",
    "lockdiscovery",
    "resourcetype",
    "supportedlock",
];

// PROPPATCH: these change the modification time.
const PATCH_MTIME: &[&str] = &["getlastmodified", "lastmodified", "Win32LastModifiedTime"];

// PROPPATCH: accepted, but nothing happens.
const PATCH_NOOP: &[&str] = &["Win32CreationTime", "Win32LastAccessTime", "Win32FileAttributes"];

// the property element as requested, without content.
fn empty_prop(e: &Element) -> Element {
    let mut e = e.clone();
    e.children.clear();
    e
}

// value of one live property. `None` if this resource does not have it.
fn prop_value(name: &str, res: &ResourceScope, meta: &dyn DavMetaData, lock: Option<&FileLock>) -> Option<Element> {
    let e = Element::new2(format!("D:{name}").as_str());
    let e = match name {
        "creationdate" => e.text(systemtime_to_rfc3339(meta.created().ok()?)),
        "displayname" => e.text(res.url.file_name()),
        "getcontentlength" if meta.is_file() => e.text(meta.len().to_string()),
        "getcontenttype" if meta.is_file() => e.text(res.url.get_mime_type_str()),
        "getetag" => e.text(ETag::new(true, meta.etag()).ok()?.to_string()),
        "getlastmodified" => e.text(systemtime_to_httpdate(meta.modified().ok()?)),
        "resourcetype" => {
            let mut e = e;
            if meta.is_dir() {
                e.push(Element::new2("D:collection"));
            }
            e
        }
        "supportedlock" => davxml::supportedlock(),
        "lockdiscovery" => davxml::lockdiscovery(lock),
        _ => return None,
    };
    Some(e)
}

// one <D:response> of a PROPFIND.
fn propfind_response(
    res: &ResourceScope,
    meta: &dyn DavMetaData,
    mode: &PropfindMode,
    lock: Option<&FileLock>,
) -> Element {
    let mut found = Vec::new();
    let mut missing = Vec::new();
    match mode {
        PropfindMode::AllProp => {
            found.extend(ALLPROP.iter().filter_map(|n| prop_value(n, res, meta, lock)));
        }
        PropfindMode::PropName => {
            found.extend(ALLPROP.iter().map(|n| Element::new2(format!("D:{n}").as_str())));
        }
        PropfindMode::Prop(props) => {
            for p in props {
                let value = match p.is_dav(&p.name) {
                    true => prop_value(&p.name, res, meta, lock),
                    false => None,
                };
                match value {
                    Some(v) => found.push(v),
                    None => missing.push(empty_prop(p)),
                }
            }
        }
    }
    davxml::response(
        &res.url.as_url_string_with_prefix(),
        vec![(StatusCode::OK, found), (StatusCode::NOT_FOUND, missing)],
    )
}

enum PatchAction {
    SetModified(SystemTime),
    Nothing,
    Refused,
}

impl crate::DavInner {
    pub(crate) async fn handle_propfind(&self, dav: &DavRequest, mut res: ResourceScope) -> DavResult<Response<Body>> {
        if !res.can(Permission::Read) {
            return Err(StatusCode::FORBIDDEN.into());
        }
        let meta = self.fs.metadata(&res.fs_path).await?;
        let mut resp = Response::new(Body::empty());
        self.fixpath(&mut resp, &mut res, meta.as_ref());

        let mode = dav.propfind.clone().unwrap_or(PropfindMode::AllProp);
        let list_members = meta.is_dir() && dav.depth != Depth::Zero;

        // depth 0: only the resource itself. otherwise: it and its members.
        let target = res.lock_target();
        let locks = match list_members {
            false => self.lm.browse_locks(&target).await?,
            true => self.lm.browse_parent_child_locks(&target, true).await?,
        };
        let own_lock = locks.get("");

        let mut responses = vec![propfind_response(&res, meta.as_ref(), &mode, own_lock)];
        if list_members {
            let inherited = own_lock.filter(|l| l.depth == LockDepth::Infinity);
            for entry in self.fs.read_dir(&res.fs_path).await? {
                let child = res.child(&entry.name, entry.meta.is_dir());
                let lock = locks.get(&entry.name).or(inherited);
                responses.push(propfind_response(&child, entry.meta.as_ref(), &mode, lock));
            }
        }

        *resp.body_mut() = Body::from(davxml::multistatus(responses)?);
        *resp.status_mut() = StatusCode::MULTI_STATUS;
        resp.headers_mut().insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static(davxml::XML_CONTENT_TYPE),
        );
        Ok(resp)
    }

    pub(crate) async fn handle_proppatch(&self, dav: &DavRequest, mut res: ResourceScope) -> DavResult<Response<Body>> {
        if !res.can(Permission::Modify) {
            return Err(StatusCode::FORBIDDEN.into());
        }
        let meta = self.fs.metadata(&res.fs_path).await?;
        let mut resp = Response::new(Body::empty());
        self.fixpath(&mut resp, &mut res, meta.as_ref());

        let opts = ConflictOptions::new(&self.principal, &dav.lock_tokens);
        self.lm.check_conflicts(&res.lock_target(), LockDepth::Zero, &opts).await?;

        let mut actions = Vec::with_capacity(dav.proppatch.len());
        for item in &dav.proppatch {
            let name = item.prop.name.as_str();
            let action = if PATCH_MTIME.contains(&name) {
                match item.set {
                    true => match parse_datetime(&item.prop.text_content()) {
                        Some(t) => PatchAction::SetModified(t),
                        None => {
                            debug!("PROPPATCH: cannot parse {name} value on {}", res.url);
                            return Err(DavError::Status(StatusCode::BAD_REQUEST));
                        }
                    },
                    false => PatchAction::Nothing,
                }
            } else if PATCH_NOOP.contains(&name) {
                PatchAction::Nothing
            } else {
                PatchAction::Refused
            };
            actions.push(action);
        }

        // if anything fails, nothing is done.
        let failed = actions.iter().any(|a| matches!(a, PatchAction::Refused));
        let mut ok = Vec::new();
        let mut forbidden = Vec::new();
        let mut dependency = Vec::new();
        for (item, action) in dav.proppatch.iter().zip(actions.iter()) {
            match action {
                PatchAction::Refused => forbidden.push(empty_prop(&item.prop)),
                _ if failed => dependency.push(empty_prop(&item.prop)),
                PatchAction::SetModified(t) => {
                    self.fs.set_modified(&res.fs_path, *t).await?;
                    ok.push(empty_prop(&item.prop));
                }
                PatchAction::Nothing => ok.push(empty_prop(&item.prop)),
            }
        }

        let response = davxml::response(
            &res.url.as_url_string_with_prefix(),
            vec![
                (StatusCode::OK, ok),
                (StatusCode::FORBIDDEN, forbidden),
                (StatusCode::FAILED_DEPENDENCY, dependency),
            ],
        );
        *resp.body_mut() = Body::from(davxml::multistatus(vec![response])?);
        *resp.status_mut() = StatusCode::MULTI_STATUS;
        resp.headers_mut().insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static(davxml::XML_CONTENT_TYPE),
        );
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::davpath::DavPath;
    use crate::lockkey::SpaceScope;
    use std::time::{Duration, UNIX_EPOCH};

    #[derive(Debug, Clone)]
    struct Meta(bool);

    impl DavMetaData for Meta {
        fn len(&self) -> u64 {
            4
        }
        fn modified(&self) -> crate::fs::FsResult<SystemTime> {
            Ok(UNIX_EPOCH + Duration::from_secs(784111777))
        }
        fn is_dir(&self) -> bool {
            self.0
        }
    }

    fn scope(url: &str) -> ResourceScope {
        ResourceScope {
            url: DavPath::new(url).unwrap(),
            fs_path: DavPath::new(url).unwrap(),
            db_file_path: url.trim_end_matches('/').to_string(),
            space: SpaceScope::default(),
            permissions: "amdr".to_string(),
        }
    }

    #[test]
    fn live_props() {
        let res = scope("/docs/a.txt");
        let file = Meta(false);
        let v = |n| prop_value(n, &res, &file, None);
        assert_eq!(v("getcontentlength").unwrap().text_content(), "4");
        assert_eq!(v("getcontenttype").unwrap().text_content(), "text/plain");
        assert_eq!(v("getlastmodified").unwrap().text_content(), "Sun, 06 Nov 1994 08:49:37 GMT");
        assert!(v("getetag").unwrap().text_content().starts_with("W/\"4-"));
        assert_eq!(v("displayname").unwrap().text_content(), "a.txt");
        assert!(v("creationdate").is_none());
        assert!(v("quota-used-bytes").is_none());

        let dir = Meta(true);
        assert!(prop_value("getcontentlength", &res, &dir, None).is_none());
        let rt = prop_value("resourcetype", &res, &dir, None).unwrap();
        assert!(rt.get_child("collection").is_some());
    }

    #[test]
    fn explicit_props() {
        let res = scope("/docs/a.txt");
        let props = vec![
            Element::new2("D:getcontentlength").ns("D", "DAV:"),
            Element::new2("Z:foo").ns("Z", "urn:x"),
        ];
        let r = propfind_response(&res, &Meta(false), &PropfindMode::Prop(props), None);
        let body = davxml::multistatus(vec![r]).unwrap();
        let s = String::from_utf8(body.to_vec()).unwrap();
        assert!(s.contains("<D:getcontentlength>4</D:getcontentlength>"));
        assert!(s.contains("HTTP/1.1 404 Not Found"));
    }
}
