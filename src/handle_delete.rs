use http::Response;
use http::StatusCode as SC;

use crate::DavResult;
use crate::body::Body;
use crate::davhandler::empty_response;
use crate::guard::DavRequest;
use crate::lockkey::LockDepth;
use crate::lockmanager::{ConflictOptions, LockTarget};
use crate::resolver::{Permission, ResourceScope};

impl crate::DavInner {
    pub(crate) async fn handle_delete(&self, dav: &DavRequest, res: ResourceScope) -> DavResult<Response<Body>> {
        if !res.can(Permission::Delete) || res.url.is_root() {
            return Err(SC::FORBIDDEN.into());
        }
        // 404 if it's not there.
        self.fs.metadata(&res.fs_path).await?;

        let target = res.lock_target();
        let opts = ConflictOptions::new(&self.principal, &dav.lock_tokens);
        self.lm.check_conflicts(&target, LockDepth::Infinity, &opts).await?;

        self.fs.remove(&res.fs_path).await?;
        self.drop_locks(&target).await;
        Ok(empty_response(SC::NO_CONTENT))
    }

    /// Remove the locks on `target` and below, after it was deleted or
    /// moved away. Failures are logged, the request still succeeds.
    pub(crate) async fn drop_locks(&self, target: &LockTarget) {
        let result: DavResult<()> = async {
            for lock in self.lm.get_locks_by_path(target).await? {
                self.lm.remove_lock(&lock.key).await?;
            }
            self.lm.remove_child_locks(&self.principal, target).await
        }
        .await;
        if let Err(e) = result {
            warn!("cannot remove locks of {}: {e}", target.path);
        }
    }
}
