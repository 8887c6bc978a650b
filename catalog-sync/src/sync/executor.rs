use std::collections::HashMap;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::backoff::RetryPolicy;
use super::desired::{DesiredNode, LeafPayload};
use super::error::SyncError;
use super::planner::{Claim, EntryId, LeafHandle, OpKind, Plan, PlanEntry, PlanOp, claim};
use super::remote::{LeafUpdate, RemoteNode, RemoteTree};
use super::resolver::PathResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Validation,
    Conflict,
    Transient,
    NotFound,
    Remote,
    SkippedDueToDependency,
}

impl From<&SyncError> for FailureKind {
    fn from(err: &SyncError) -> Self {
        match err {
            SyncError::Validation(_) => FailureKind::Validation,
            SyncError::Conflict { .. } => FailureKind::Conflict,
            SyncError::Transient { .. } => FailureKind::Transient,
            SyncError::NotFound(_) => FailureKind::NotFound,
            SyncError::Remote(_) => FailureKind::Remote,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryFailure {
    pub entry: EntryId,
    pub op: OpKind,
    pub path: String,
    pub kind: FailureKind,
    pub reason: String,
}

impl EntryFailure {
    fn new(entry: &PlanEntry, kind: FailureKind, reason: String) -> Self {
        Self {
            entry: entry.id,
            op: entry.op.kind(),
            path: entry.op.path().to_string(),
            kind,
            reason,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub moved: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Entries that finished successfully.
    pub completed: usize,
    pub cancelled: bool,
    pub failures: Vec<EntryFailure>,
    pub skipped_entries: Vec<EntryFailure>,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Created(_) => self.created += 1,
            Outcome::Updated(_) => self.updated += 1,
            Outcome::Moved(_) => self.moved += 1,
            Outcome::Unchanged(_) => self.unchanged += 1,
            Outcome::Deleted(_) => self.deleted += 1,
        }
        self.completed += 1;
    }
}

#[derive(Debug)]
enum Outcome {
    Created(String),
    Updated(String),
    Moved(String),
    Unchanged(String),
    Deleted(String),
}

impl Outcome {
    fn id(&self) -> &str {
        match self {
            Outcome::Created(id)
            | Outcome::Updated(id)
            | Outcome::Moved(id)
            | Outcome::Unchanged(id)
            | Outcome::Deleted(id) => id,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Outcome::Created(_) => "created",
            Outcome::Updated(_) => "updated",
            Outcome::Moved(_) => "moved",
            Outcome::Unchanged(_) => "unchanged",
            Outcome::Deleted(_) => "deleted",
        }
    }
}

/// Applies a plan entry by entry, in order.
///
/// A failed entry never stops the run; entries depending on it are skipped.
/// Cancellation is checked between entries only.
pub struct Executor<'r, 'a, R: ?Sized> {
    resolver: &'r PathResolver<'a, R>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl<'r, 'a, R: RemoteTree + ?Sized> Executor<'r, 'a, R> {
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

    pub async fn execute(&self, plan: &Plan) -> RunSummary {
        let mut summary = RunSummary::default();
        let mut done: HashMap<EntryId, String> = HashMap::with_capacity(plan.len());

        for (pos, entry) in plan.entries().iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::info!(
                    remaining = plan.len() - pos,
                    "run cancelled, no further entries started"
                );
                summary.cancelled = true;
                break;
            }

            if let Some(dep) = entry.depends_on.iter().find(|dep| !done.contains_key(*dep)) {
                tracing::debug!(
                    op = %entry.op.kind(),
                    path = entry.op.path(),
                    dependency = %dep,
                    "skipped due to dependency"
                );
                summary.skipped += 1;
                summary.skipped_entries.push(EntryFailure::new(
                    entry,
                    FailureKind::SkippedDueToDependency,
                    format!("dependency {dep} did not complete"),
                ));
                continue;
            }

            match self.apply(&entry.op, &done).await {
                Ok(outcome) => {
                    tracing::info!(
                        op = %entry.op.kind(),
                        path = entry.op.path(),
                        id = outcome.id(),
                        outcome = outcome.label(),
                        "applied"
                    );
                    summary.record(&outcome);
                    done.insert(entry.id, outcome.id().to_string());
                }
                Err(err) => {
                    tracing::warn!(
                        op = %entry.op.kind(),
                        path = entry.op.path(),
                        error = %err,
                        "entry failed"
                    );
                    summary.failed += 1;
                    summary
                        .failures
                        .push(EntryFailure::new(entry, FailureKind::from(&err), err.to_string()));
                }
            }
        }

        summary
    }

    async fn apply(&self, op: &PlanOp, done: &HashMap<EntryId, String>) -> Result<Outcome, SyncError> {
        match op {
            PlanOp::CreateFolder { node } => self.create_folder(node).await,
            PlanOp::ConfirmFolder { remote, .. } => Ok(Outcome::Unchanged(remote.id.clone())),
            PlanOp::CreateLeaf { node } => self.create_leaf(node).await,
            PlanOp::TagLeaf { node, remote } => {
                self.confirm_tag_target(node, remote).await?;
                let id = self.tag(node, &remote.id).await?;
                self.resolver.invalidate(&remote.path).await;
                Ok(Outcome::Updated(id))
            }
            PlanOp::MoveLeaf {
                node,
                leaf,
                source_path,
                in_place,
            } => {
                let leaf_id = match leaf {
                    LeafHandle::Existing(id) => id.clone(),
                    LeafHandle::CreatedBy(entry) => done
                        .get(entry)
                        .cloned()
                        .ok_or_else(|| SyncError::NotFound(node.path.clone()))?,
                };
                let parent_id = self.parent_id(node).await?;
                let id = self
                    .retry
                    .run("moveLeaf", || {
                        self.resolver.remote().move_node(
                            &leaf_id,
                            &parent_id,
                            &node.display_name,
                            self.resolver.language(),
                        )
                    })
                    .await?;
                self.resolver.invalidate(source_path).await;
                self.resolver.invalidate(&node.path).await;
                Ok(if *in_place {
                    Outcome::Unchanged(id)
                } else {
                    Outcome::Moved(id)
                })
            }
            PlanOp::DeleteNode { remote } => {
                let deleted = self
                    .retry
                    .run("deleteNode", || self.resolver.remote().delete_node(&remote.id))
                    .await;
                self.resolver.invalidate(&remote.path).await;
                match deleted {
                    Ok(()) => Ok(Outcome::Deleted(remote.id.clone())),
                    Err(SyncError::NotFound(_)) => Ok(Outcome::Unchanged(remote.id.clone())),
                    Err(err) => Err(err),
                }
            }
            PlanOp::Blocked { error, .. } => Err(error.clone()),
        }
    }

    async fn create_folder(&self, node: &DesiredNode) -> Result<Outcome, SyncError> {
        if let Some((existing, _)) = self.recheck(node).await? {
            return Ok(Outcome::Unchanged(existing.id));
        }
        let parent_id = self.parent_id(node).await?;
        let id = self
            .retry
            .run("createFolder", || {
                self.resolver.remote().create_folder(
                    &parent_id,
                    &node.display_name,
                    &node.idempotency_key,
                    self.resolver.language(),
                )
            })
            .await?;
        self.resolver.invalidate(&node.path).await;
        Ok(Outcome::Created(id))
    }

    async fn create_leaf(&self, node: &DesiredNode) -> Result<Outcome, SyncError> {
        if let Some((existing, claim)) = self.recheck(node).await? {
            let current = node.payload.as_ref().map(LeafPayload::fingerprint);
            if claim == Claim::Owned && existing.fingerprint == current {
                return Ok(Outcome::Unchanged(existing.id));
            }
            let id = self.tag(node, &existing.id).await?;
            self.resolver.invalidate(&node.path).await;
            return Ok(Outcome::Updated(id));
        }
        let payload = node
            .payload
            .as_ref()
            .ok_or_else(|| SyncError::Validation(format!("leaf {} has no payload", node.path)))?;
        let parent_id = self.parent_id(node).await?;
        let id = self
            .retry
            .run("createLeaf", || {
                self.resolver.remote().create_leaf(
                    &parent_id,
                    &node.display_name,
                    payload,
                    &node.idempotency_key,
                    self.resolver.language(),
                )
            })
            .await?;
        self.resolver.invalidate(&node.path).await;
        Ok(Outcome::Created(id))
    }

    /// Fresh look at the target path right before creating it. A node left by
    /// an earlier attempt that carries our key is adopted instead.
    async fn recheck(&self, node: &DesiredNode) -> Result<Option<(RemoteNode, Claim)>, SyncError> {
        self.resolver.invalidate(&node.path).await;
        let existing = self
            .retry
            .run("lookup", || self.resolver.resolve(&node.path))
            .await?;
        match existing {
            None => Ok(None),
            Some(remote) => {
                let claim = claim(node, &remote)?;
                tracing::debug!(path = %node.path, id = %remote.id, "target already exists, adopting");
                Ok(Some((remote, claim)))
            }
        }
    }

    /// The planned node must still sit at its path and be free for `node`.
    /// Another entry of this run may have tagged or moved it since planning.
    async fn confirm_tag_target(
        &self,
        node: &DesiredNode,
        planned: &RemoteNode,
    ) -> Result<(), SyncError> {
        self.resolver.invalidate(&planned.path).await;
        let current = self
            .retry
            .run("lookup", || self.resolver.resolve(&planned.path))
            .await?
            .ok_or_else(|| SyncError::NotFound(planned.path.clone()))?;
        if current.id != planned.id {
            return Err(SyncError::Conflict {
                path: planned.path.clone(),
                existing: format!("node {} replaced {}", current.id, planned.id),
                desired: node.idempotency_key.clone(),
            });
        }
        claim(node, &current).map(|_| ())
    }

    async fn tag(&self, node: &DesiredNode, id: &str) -> Result<String, SyncError> {
        let payload = node
            .payload
            .clone()
            .ok_or_else(|| SyncError::Validation(format!("leaf {} has no payload", node.path)))?;
        let update = LeafUpdate {
            idempotency_key: node.idempotency_key.clone(),
            display_name: node.display_name.clone(),
            payload,
        };
        self.retry
            .run("tagLeaf", || {
                self.resolver
                    .remote()
                    .update_leaf(id, &update, self.resolver.language())
            })
            .await
    }

    async fn parent_id(&self, node: &DesiredNode) -> Result<String, SyncError> {
        self.retry
            .run("lookup", || self.resolver.resolve(&node.parent_path))
            .await?
            .map(|parent| parent.id)
            .ok_or_else(|| SyncError::NotFound(node.parent_path.clone()))
    }
}
