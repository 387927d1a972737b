use bytes::Bytes;
use headers::HeaderMapExt;
use http::StatusCode as SC;
use http::{Response, StatusCode};

use crate::DavResult;
use crate::body::Body;
use crate::davhandler::{empty_response, xml_response};
use crate::davheaders;
use crate::davxml;
use crate::errors::DavError;
use crate::fs::FsError;
use crate::guard::{DavRequest, LockSettings};
use crate::lockkey::LockDepth;
use crate::lockmanager::{DavLockRequest, FileLock};
use crate::resolver::{Permission, ResourceScope};

// the lock named by `token` covers `res`: it is on `res` itself, or on
// an ancestor with depth infinity. Same ownership scope only.
fn covers(lock: &FileLock, res: &ResourceScope) -> bool {
    lock.space.same_scope(&res.space) && (lock.db_file_path == res.db_file_path || lock.depth == LockDepth::Infinity)
}

fn token_mismatch(status: StatusCode) -> DavResult<Response<Body>> {
    let body = davxml::error_body("D:lock-token-matches-request-uri", &[])?;
    Ok(xml_response(status, body))
}

impl crate::DavInner {
    pub(crate) async fn handle_lock(&self, dav: &DavRequest, mut res: ResourceScope) -> DavResult<Response<Body>> {
        let settings = dav.lock.as_ref().ok_or(DavError::Status(SC::BAD_REQUEST))?;

        let mut resp = Response::new(Body::empty());
        let meta = match self.fs.metadata(&res.fs_path).await {
            Ok(meta) => {
                self.fixpath(&mut resp, &mut res, meta.as_ref());
                Some(meta)
            }
            Err(FsError::NotFound) => None,
            Err(e) => return Err(e.into()),
        };

        // lock refresh?
        let info = match &settings.info {
            Some(info) => info,
            None => return self.refresh_lock(dav, settings, &res, resp).await,
        };

        // locking an unmapped url creates it, that needs the right to add.
        if meta.is_none() {
            if !res.can(Permission::Add) {
                return Err(SC::FORBIDDEN.into());
            }
            if !self.has_parent(&res).await {
                return Err(SC::CONFLICT.into());
            }
        }

        let request = DavLockRequest {
            lockroot: res.url.as_url_string_with_prefix(),
            lockscope: info.scope,
            owner: info.owner.clone(),
        };
        let (created, lock) = self
            .lm
            .create(
                &self.principal,
                &res.lock_target(),
                settings.depth,
                Some(settings.timeout),
                Some(request),
                &dav.lock_tokens,
            )
            .await?;
        if !created {
            debug!("LOCK {}: conflicts with {}", res.db_file_path, lock.key);
            return Err(DavError::LockConflict(Box::new(lock)));
        }

        // try to create file if it doesn't exist.
        if meta.is_none() {
            if let Err(e) = self.fs.write(&res.fs_path, Bytes::new(), None).await {
                if let Err(e) = self.lm.remove_lock(&lock.key).await {
                    warn!("LOCK {}: cannot remove lock after failed create: {e}", res.db_file_path);
                }
                return Err(e.into());
            }
        }

        // output result
        let token = lock.token().unwrap_or_default();
        resp.headers_mut()
            .typed_insert(davheaders::LockToken(format!("<{token}>")));
        resp.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static(davxml::XML_CONTENT_TYPE),
        );
        *resp.status_mut() = match meta {
            None => SC::CREATED,
            Some(_) => SC::OK,
        };
        *resp.body_mut() = Body::from(davxml::lock_prop(&lock)?);
        Ok(resp)
    }

    async fn refresh_lock(
        &self,
        dav: &DavRequest,
        settings: &LockSettings,
        res: &ResourceScope,
        mut resp: Response<Body>,
    ) -> DavResult<Response<Body>> {
        // exactly one token, taken from the If: header.
        if dav.lock_tokens.len() != 1 {
            return Err(SC::BAD_REQUEST.into());
        }
        let token = &dav.lock_tokens[0];

        let lock = match self.lm.is_locked_with_token(token, &res.db_file_path).await? {
            Some(lock) if covers(&lock, res) => lock,
            _ => {
                debug!("LOCK refresh {}: token {token} does not match", res.db_file_path);
                return token_mismatch(SC::PRECONDITION_FAILED);
            }
        };
        if lock.owner.id != self.principal.id {
            return Err(SC::FORBIDDEN.into());
        }

        let lock = self.lm.refresh_lock_timeout(&lock, settings.timeout).await?;
        resp.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static(davxml::XML_CONTENT_TYPE),
        );
        *resp.status_mut() = SC::OK;
        *resp.body_mut() = Body::from(davxml::lock_prop(&lock)?);
        Ok(resp)
    }

    pub(crate) async fn handle_unlock(&self, dav: &DavRequest, res: ResourceScope) -> DavResult<Response<Body>> {
        // Must have Lock-Token header
        let token = dav.unlock_token.as_deref().ok_or(DavError::Status(SC::BAD_REQUEST))?;

        let lock = match self.lm.is_locked_with_token(token, &res.db_file_path).await? {
            Some(lock) if covers(&lock, &res) => lock,
            _ => {
                debug!("UNLOCK {}: no lock with token {token}", res.db_file_path);
                return token_mismatch(SC::CONFLICT);
            }
        };
        if lock.owner.id != self.principal.id {
            debug!("UNLOCK {}: lock belongs to {}", res.db_file_path, lock.owner.login);
            return Err(SC::FORBIDDEN.into());
        }

        self.lm.remove_lock(&lock.key).await?;
        Ok(empty_response(SC::NO_CONTENT))
    }
}
