use headers::HeaderMapExt;
use http::StatusCode as SC;
use http::{HeaderValue, Response};

use crate::DavResult;
use crate::body::Body;
use crate::davheaders::ETag;
use crate::guard::DavRequest;
use crate::resolver::{Permission, ResourceScope};
use crate::util::DavMethod;

impl crate::DavInner {
    pub(crate) async fn handle_get(&self, dav: &DavRequest, res: ResourceScope) -> DavResult<Response<Body>> {
        if !res.can(Permission::Read) {
            return Err(SC::FORBIDDEN.into());
        }
        let meta = self.fs.metadata(&res.fs_path).await?;
        if meta.is_dir() {
            return Err(SC::METHOD_NOT_ALLOWED.into());
        }

        let mut resp = Response::new(Body::empty());
        let h = resp.headers_mut();
        if let Ok(etag) = ETag::new(true, meta.etag()) {
            h.typed_insert(etag);
        }
        if let Ok(modified) = meta.modified() {
            h.typed_insert(headers::LastModified::from(modified));
        }
        h.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static(res.url.get_mime_type_str()),
        );

        let len = match dav.method {
            DavMethod::Head => meta.len(),
            _ => {
                let data = self.fs.read(&res.fs_path).await?;
                let len = data.len() as u64;
                *resp.body_mut() = Body::from(data);
                len
            }
        };
        resp.headers_mut().typed_insert(headers::ContentLength(len));
        *resp.status_mut() = SC::OK;
        Ok(resp)
    }
}
