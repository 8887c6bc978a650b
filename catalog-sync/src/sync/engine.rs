use std::collections::HashSet;

use catalog_core::SourceRecord;
use tokio_util::sync::CancellationToken;

use super::backoff::RetryPolicy;
use super::desired::{DEFAULT_LEAF_KEY_PREFIX, DesiredState, DesiredStateBuilder};
use super::error::SyncError;
use super::executor::{Executor, RunSummary};
use super::planner::{OpKind, Plan, Planner};
use super::purge::Purge;
use super::remote::RemoteTree;
use super::resolver::PathResolver;

/// One tree under one root, reconciled against a list of records.
///
/// Every call gets its own `PathResolver`, so nothing read from the remote
/// outlives a run.
pub struct Reconciler<R> {
    remote: R,
    root: String,
    language: String,
    leaf_key_prefix: String,
    retry: RetryPolicy,
}

impl<R: RemoteTree> Reconciler<R> {
    pub fn new(remote: R, root: impl Into<String>) -> Self {
        Self {
            remote,
            root: root.into(),
            language: "en".to_string(),
            leaf_key_prefix: DEFAULT_LEAF_KEY_PREFIX.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_leaf_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.leaf_key_prefix = prefix.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn desired(&self, records: &[SourceRecord]) -> Result<DesiredState, SyncError> {
        DesiredStateBuilder::new(self.root.as_str())
            .with_leaf_key_prefix(self.leaf_key_prefix.as_str())
            .build(records)
    }

    /// Dry run: the plan a `reconcile` would execute right now.
    pub async fn plan(&self, records: &[SourceRecord]) -> Result<Plan, SyncError> {
        let desired = self.desired(records)?;
        let resolver = PathResolver::new(&self.remote, self.language.as_str());
        Planner::new(&resolver, self.retry).plan(&desired).await
    }

    pub async fn reconcile(
        &self,
        records: &[SourceRecord],
        cancel: CancellationToken,
    ) -> Result<RunSummary, SyncError> {
        let desired = self.desired(records)?;
        let resolver = PathResolver::new(&self.remote, self.language.as_str());
        let plan = Planner::new(&resolver, self.retry).plan(&desired).await?;
        tracing::info!(
            root = %self.root,
            folders = desired.folders.len(),
            leaves = desired.leaves.len(),
            entries = plan.len(),
            blocked = plan.count(OpKind::Blocked),
            noop = plan.is_noop(),
            "plan computed"
        );

        let summary = Executor::new(&resolver, self.retry, cancel)
            .execute(&plan)
            .await;
        tracing::info!(
            created = summary.created,
            updated = summary.updated,
            moved = summary.moved,
            unchanged = summary.unchanged,
            skipped = summary.skipped,
            failed = summary.failed,
            cancelled = summary.cancelled,
            lookups = resolver.lookup_count(),
            "reconcile finished"
        );
        Ok(summary)
    }

    pub async fn purge(
        &self,
        protected: &HashSet<String>,
        cancel: CancellationToken,
    ) -> Result<RunSummary, SyncError> {
        let resolver = PathResolver::new(&self.remote, self.language.as_str());
        let summary = Purge::new(&resolver, self.retry, cancel)
            .run(&self.root, protected)
            .await?;
        tracing::info!(
            root = %self.root,
            deleted = summary.deleted,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "purge finished"
        );
        Ok(summary)
    }
}
