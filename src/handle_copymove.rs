use http::Response;
use http::StatusCode as SC;

use crate::DavResult;
use crate::body::Body;
use crate::conditional::IfCondition;
use crate::davhandler::empty_response;
use crate::davheaders::Depth;
use crate::errors::DavError;
use crate::fs::FsError;
use crate::guard::DavRequest;
use crate::lockkey::LockDepth;
use crate::lockmanager::ConflictOptions;
use crate::resolver::{Permission, ResourceScope};

// `dest` is `src` itself or lies below it.
fn is_same_or_below(dest: &ResourceScope, src: &ResourceScope) -> bool {
    if !dest.space.same_scope(&src.space) {
        return false;
    }
    let (d, s) = (dest.db_file_path.as_str(), src.db_file_path.as_str());
    d == s || s == "/" || (d.starts_with(s) && d.as_bytes().get(s.len()) == Some(&b'/'))
}

impl crate::DavInner {
    pub(crate) async fn handle_copymove(&self, dav: &DavRequest, mut res: ResourceScope) -> DavResult<Response<Body>> {
        let cm = dav.copy_move.as_ref().ok_or(DavError::Status(SC::BAD_REQUEST))?;

        let meta = self.fs.metadata(&res.fs_path).await?;
        if !res.can(Permission::Read) || (cm.is_move && !res.can(Permission::Delete)) {
            return Err(SC::FORBIDDEN.into());
        }
        res.fs_path.add_slash_if(meta.is_dir());

        let mut dest = match self.resolve(&cm.destination).await {
            Some(dest) => dest,
            None => return Err(SC::NOT_FOUND.into()),
        };
        dest.url.add_slash_if(meta.is_dir());
        dest.fs_path.add_slash_if(meta.is_dir());

        // The If: header once more, now for the destination. Untagged
        // lists are about the request URI and were checked already.
        let tagged: Vec<IfCondition> = dav.if_headers.iter().filter(|c| c.path.is_some()).cloned().collect();
        if !self.evaluate_if_headers(&dest, &tagged).await? {
            debug!("If: header does not match for destination {}", dest.url);
            return Err(SC::PRECONDITION_FAILED.into());
        }

        if is_same_or_below(&dest, &res) {
            return Err(SC::FORBIDDEN.into());
        }

        let dest_exists = match self.fs.metadata(&dest.fs_path).await {
            Ok(_) => true,
            Err(FsError::NotFound) => false,
            Err(e) => return Err(e.into()),
        };
        match dest_exists {
            true if !cm.overwrite => return Err(SC::PRECONDITION_FAILED.into()),
            true if !dest.can(Permission::Modify) => return Err(SC::FORBIDDEN.into()),
            false if !dest.can(Permission::Add) => return Err(SC::FORBIDDEN.into()),
            false if !self.has_parent(&dest).await => return Err(SC::CONFLICT.into()),
            _ => {}
        }

        let opts = ConflictOptions::new(&self.principal, &dav.lock_tokens);
        if cm.is_move {
            self.lm.check_conflicts(&res.lock_target(), LockDepth::Infinity, &opts).await?;
        }
        let dest_depth = match dest_exists {
            true => LockDepth::Infinity,
            false => LockDepth::Zero,
        };
        self.lm.check_conflicts(&dest.lock_target(), dest_depth, &opts).await?;

        if dest_exists {
            self.fs.remove(&dest.fs_path).await?;
            self.drop_locks(&dest.lock_target()).await;
        }

        if cm.is_move {
            self.fs.rename(&res.fs_path, &dest.fs_path).await?;
            self.drop_locks(&res.lock_target()).await;
        } else {
            let deep = dav.depth == Depth::Infinity;
            self.fs.copy(&res.fs_path, &dest.fs_path, deep).await?;
        }

        Ok(empty_response(match dest_exists {
            true => SC::NO_CONTENT,
            false => SC::CREATED,
        }))
    }
}
