use bytes::Bytes;
use headers::HeaderMapExt;
use http::StatusCode as SC;
use http::{Request, Response};

use crate::DavResult;
use crate::body::Body;
use crate::davhandler::empty_response;
use crate::davheaders::ETag;
use crate::errors::DavError;
use crate::fs::FsError;
use crate::guard::DavRequest;
use crate::lockkey::LockDepth;
use crate::lockmanager::ConflictOptions;
use crate::resolver::{Permission, ResourceScope};

// start offset from `Content-Range: bytes <start>-<end>/<len>`.
fn start_offset(req: &Request<()>, len: usize) -> DavResult<Option<u64>> {
    let range = match req.headers().typed_try_get::<headers::ContentRange>() {
        Ok(Some(range)) => range,
        Ok(None) => return Ok(None),
        Err(_) => return Err(DavError::Status(SC::BAD_REQUEST)),
    };
    match range.bytes_range() {
        Some((start, end)) if end >= start && end - start + 1 == len as u64 => Ok(Some(start)),
        Some(_) => Err(DavError::Status(SC::BAD_REQUEST)),
        None => Err(DavError::Status(SC::RANGE_NOT_SATISFIABLE)),
    }
}

impl crate::DavInner {
    pub(crate) async fn handle_put(
        &self,
        req: &Request<()>,
        dav: &DavRequest,
        res: ResourceScope,
        body: Vec<u8>,
    ) -> DavResult<Response<Body>> {
        if res.url.is_collection() {
            return Err(SC::METHOD_NOT_ALLOWED.into());
        }
        let exists = match self.fs.metadata(&res.fs_path).await {
            Ok(meta) if meta.is_dir() => return Err(SC::METHOD_NOT_ALLOWED.into()),
            Ok(_) => true,
            Err(FsError::NotFound) => false,
            Err(e) => return Err(e.into()),
        };

        // overwriting needs "modify", creating needs "add" and a parent.
        match exists {
            true if !res.can(Permission::Modify) => return Err(SC::FORBIDDEN.into()),
            false if !res.can(Permission::Add) => return Err(SC::FORBIDDEN.into()),
            false if !self.has_parent(&res).await => return Err(SC::CONFLICT.into()),
            _ => {}
        }

        let opts = ConflictOptions::new(&self.principal, &dav.lock_tokens);
        self.lm.check_conflicts(&res.lock_target(), LockDepth::Zero, &opts).await?;

        let start = start_offset(req, body.len())?;
        let meta = self.fs.write(&res.fs_path, Bytes::from(body), start).await?;

        let mut resp = empty_response(match exists {
            true => SC::NO_CONTENT,
            false => SC::CREATED,
        });
        if let Ok(etag) = ETag::new(true, meta.etag()) {
            resp.headers_mut().typed_insert(etag);
        }
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(range: Option<&str>) -> Request<()> {
        let mut b = Request::builder().method("PUT").uri("/f");
        if let Some(r) = range {
            b = b.header("Content-Range", r);
        }
        b.body(()).unwrap()
    }

    #[test]
    fn content_range() {
        assert_eq!(start_offset(&req(None), 5).unwrap(), None);
        assert_eq!(start_offset(&req(Some("bytes 10-14/*")), 5).unwrap(), Some(10));
        assert_eq!(start_offset(&req(Some("bytes 10-14/100")), 5).unwrap(), Some(10));
        assert_eq!(
            start_offset(&req(Some("bytes 10-19/*")), 5).unwrap_err().statuscode(),
            SC::BAD_REQUEST
        );
    }
}
