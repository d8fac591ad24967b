//! Data-path sub-session pool

use std::sync::Arc;

use xrd_core::SessionError;
use xrd_protocol::PathId;

use super::Inner;

/// Exclusive use of one data path for the length of a request
pub(crate) struct PathClaim {
    owner: Arc<Inner>,
    path_id: PathId,
}

impl PathClaim {
    pub fn path_id(&self) -> PathId {
        self.path_id
    }
}

impl Drop for PathClaim {
    fn drop(&mut self) {
        // Shutting down or the data path died; nobody needs the id back
        if self.owner.cancel.is_cancelled() || !self.owner.subs.contains_key(&self.path_id) {
            return;
        }
        self.owner.free_paths.lock().push(self.path_id);
    }
}

impl Inner {
    /// Pop an idle data path whose sub-session is still alive
    fn pop_free_path(self: &Arc<Self>) -> Option<PathClaim> {
        let mut free = self.free_paths.lock();
        while let Some(path_id) = free.pop() {
            if self.subs.contains_key(&path_id) {
                return Some(PathClaim {
                    owner: Arc::clone(self),
                    path_id,
                });
            }
            tracing::debug!(path_id = %path_id, "skipping stale data path");
        }
        None
    }

    /// Claim a data path: reuse an idle one, else open a new sub-session
    /// while under the pool bound.
    pub(super) async fn claim_path(self: &Arc<Self>) -> Result<PathClaim, SessionError> {
        if let Some(claim) = self.pop_free_path() {
            return Ok(claim);
        }

        let _creating = self.sub_create.lock().await;

        // Another caller may have released one while we waited
        if let Some(claim) = self.pop_free_path() {
            return Ok(claim);
        }
        if self.subs.len() >= self.config.max_subsessions {
            return Err(SessionError::PoolExhausted);
        }

        // open_sub sends a Bind through send(), which can land back here
        let sub = Box::pin(self.open_sub()).await?;
        let path_id = sub.path_id();
        if self.subs.insert(path_id, Arc::clone(&sub)).is_some() {
            tracing::warn!(path_id = %path_id, "server reused a live data path id");
        }
        tracing::info!(
            addr = %self.addr,
            path_id = %path_id,
            live = self.subs.len(),
            "opened data path"
        );

        Ok(PathClaim {
            owner: Arc::clone(self),
            path_id,
        })
    }

    /// Drop a failed sub-session from the pool
    pub(super) fn forget_sub(&self, path_id: PathId) {
        if self.subs.remove(&path_id).is_some() {
            tracing::info!(addr = %self.addr, path_id = %path_id, "data path removed");
        }
    }
}
