use headers::HeaderMapExt;
use http::Response;
use http::StatusCode as SC;

use crate::DavResult;
use crate::body::Body;
use crate::davhandler::empty_response;
use crate::davheaders;
use crate::fs::FsError;
use crate::guard::DavRequest;
use crate::lockkey::LockDepth;
use crate::lockmanager::ConflictOptions;
use crate::resolver::{Permission, ResourceScope};

impl crate::DavInner {
    pub(crate) async fn handle_mkcol(&self, dav: &DavRequest, mut res: ResourceScope) -> DavResult<Response<Body>> {
        if !res.can(Permission::Add) {
            return Err(SC::FORBIDDEN.into());
        }
        match self.fs.metadata(&res.fs_path).await {
            Ok(_) => return Err(SC::METHOD_NOT_ALLOWED.into()),
            Err(FsError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        if !self.has_parent(&res).await {
            return Err(SC::CONFLICT.into());
        }

        let opts = ConflictOptions::new(&self.principal, &dav.lock_tokens);
        self.lm.check_conflicts(&res.lock_target(), LockDepth::Zero, &opts).await?;

        self.fs.create_dir(&res.fs_path).await?;

        let mut resp = empty_response(SC::CREATED);
        if !res.url.is_collection() {
            res.url.add_slash();
            let loc = res.url.as_url_string_with_prefix();
            resp.headers_mut().typed_insert(davheaders::ContentLocation(loc));
        }
        Ok(resp)
    }
}
