use std::collections::HashSet;

use tokio_util::sync::CancellationToken;

use super::backoff::RetryPolicy;
use super::error::SyncError;
use super::executor::{Executor, RunSummary};
use super::planner::{Plan, PlanBuilder, PlanOp};
use super::remote::RemoteTree;
use super::resolver::PathResolver;
use super::slug::{is_absolute, normalize};

/// Deletes the direct children of a root, keeping the root and any protected
/// child paths.
pub struct Purge<'r, 'a, R: ?Sized> {
    resolver: &'r PathResolver<'a, R>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl<'r, 'a, R: RemoteTree + ?Sized> Purge<'r, 'a, R> {
    pub fn new(
        resolver: &'r PathResolver<'a, R>,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            resolver,
            retry,
            cancel,
        }
    }

    /// Independent `DeleteNode` entries, one per unprotected child.
    pub async fn plan(&self, root: &str, protected: &HashSet<String>) -> Result<Plan, SyncError> {
        let root = normalize(root);
        if !is_absolute(&root) {
            return Err(SyncError::Validation(format!(
                "purge root {root:?} is not absolute"
            )));
        }
        let protected: HashSet<String> = protected.iter().map(|path| normalize(path)).collect();

        let children = self
            .retry
            .run("listChildren", || self.resolver.list_children(&root))
            .await?;

        let mut builder = PlanBuilder::default();
        for child in children {
            if child.path == root {
                continue;
            }
            if protected.contains(&child.path) {
                tracing::info!(path = %child.path, "protected, not purged");
                continue;
            }
            builder.push(PlanOp::DeleteNode { remote: child }, []);
        }
        builder.finish()
    }

    pub async fn run(
        &self,
        root: &str,
        protected: &HashSet<String>,
    ) -> Result<RunSummary, SyncError> {
        let plan = self.plan(root, protected).await?;
        if plan.is_empty() {
            tracing::info!(root, "nothing to purge");
        }
        Ok(Executor::new(self.resolver, self.retry, self.cancel.clone())
            .execute(&plan)
            .await)
    }
}
