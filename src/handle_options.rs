use headers::HeaderMapExt;
use http::{HeaderValue, Request, Response, StatusCode};

use crate::DavResult;
use crate::body::Body;
use crate::davheaders;
use crate::davpath::DavPath;
use crate::util::{DavMethod, dav_method};

impl crate::DavInner {
    pub(crate) async fn handle_options(&self, req: &Request<()>, path: &DavPath) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        let h = res.headers_mut();
        h.insert(&davheaders::DAV, HeaderValue::from_static("1, 2"));
        h.insert(&davheaders::MS_AUTHOR_VIA, HeaderValue::from_static("DAV"));
        h.typed_insert(headers::ContentLength(0));

        // Helper to add method to array if method is in fact allowed.
        // If the current method is not OPTIONS, leave out the current
        // method since we're probably called for MethodNotAllowed.
        let method = dav_method(req.method()).unwrap_or(DavMethod::Options);
        let allowed = |m: DavMethod| {
            (m == DavMethod::Options || m != method)
                && (self.has_fs || m == DavMethod::Options)
                && self.allow.is_none_or(|a| a.contains(m))
        };

        let is_star = path.is_star();
        let meta = match is_star {
            true => None,
            false => match self.resolve(path).await {
                Some(r) => self.fs.metadata(&r.fs_path).await.ok(),
                None => None,
            },
        };

        let candidates: &[DavMethod] = match &meta {
            None if !is_star => &[DavMethod::Options, DavMethod::MkCol, DavMethod::Put, DavMethod::Lock],
            Some(m) if m.is_dir() => &[
                DavMethod::Options,
                DavMethod::PropFind,
                DavMethod::PropPatch,
                DavMethod::Copy,
                DavMethod::Move,
                DavMethod::Delete,
                DavMethod::Lock,
                DavMethod::Unlock,
            ],
            _ => &DavMethod::ALL,
        };
        let v: Vec<&str> = candidates
            .iter()
            .copied()
            .filter(|m| allowed(*m))
            .filter(|m| !(path.is_root() && matches!(m, DavMethod::Move | DavMethod::Delete)))
            .map(|m| m.as_str())
            .collect();

        if let Ok(a) = HeaderValue::from_str(&v.join(", ")) {
            res.headers_mut().insert(http::header::ALLOW, a);
        }
        *res.status_mut() = StatusCode::OK;
        Ok(res)
    }
}
