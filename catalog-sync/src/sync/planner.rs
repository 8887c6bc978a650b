use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use serde::Serialize;

use super::backoff::RetryPolicy;
use super::desired::{DesiredNode, DesiredState, LeafPayload, NodeKind};
use super::error::SyncError;
use super::remote::{RemoteNode, RemoteTree};
use super::resolver::PathResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntryId(pub usize);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OpKind {
    CreateFolder,
    ConfirmFolder,
    CreateLeaf,
    TagLeaf,
    MoveLeaf,
    DeleteNode,
    Blocked,
}

impl OpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::CreateFolder => "createFolder",
            OpKind::ConfirmFolder => "confirmFolder",
            OpKind::CreateLeaf => "createLeaf",
            OpKind::TagLeaf => "tagLeaf",
            OpKind::MoveLeaf => "moveLeaf",
            OpKind::DeleteNode => "deleteNode",
            OpKind::Blocked => "blocked",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which remote node a `MoveLeaf` acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum LeafHandle {
    Existing(String),
    CreatedBy(EntryId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanOp {
    CreateFolder {
        node: DesiredNode,
    },
    /// Folder already satisfied remotely; no call is made.
    ConfirmFolder {
        node: DesiredNode,
        remote: RemoteNode,
    },
    CreateLeaf {
        node: DesiredNode,
    },
    TagLeaf {
        node: DesiredNode,
        remote: RemoteNode,
    },
    MoveLeaf {
        node: DesiredNode,
        leaf: LeafHandle,
        source_path: String,
        in_place: bool,
    },
    DeleteNode {
        remote: RemoteNode,
    },
    /// Known failure found while planning (conflict, failed lookup).
    Blocked {
        path: String,
        error: SyncError,
    },
}

impl PlanOp {
    pub fn kind(&self) -> OpKind {
        match self {
            PlanOp::CreateFolder { .. } => OpKind::CreateFolder,
            PlanOp::ConfirmFolder { .. } => OpKind::ConfirmFolder,
            PlanOp::CreateLeaf { .. } => OpKind::CreateLeaf,
            PlanOp::TagLeaf { .. } => OpKind::TagLeaf,
            PlanOp::MoveLeaf { .. } => OpKind::MoveLeaf,
            PlanOp::DeleteNode { .. } => OpKind::DeleteNode,
            PlanOp::Blocked { .. } => OpKind::Blocked,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            PlanOp::CreateFolder { node }
            | PlanOp::ConfirmFolder { node, .. }
            | PlanOp::CreateLeaf { node }
            | PlanOp::TagLeaf { node, .. }
            | PlanOp::MoveLeaf { node, .. } => &node.path,
            PlanOp::DeleteNode { remote } => &remote.path,
            PlanOp::Blocked { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanEntry {
    pub id: EntryId,
    pub op: PlanOp,
    pub depends_on: BTreeSet<EntryId>,
}

/// Entries in execution order: every entry follows all of its dependencies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    entries: Vec<PlanEntry>,
}

impl Plan {
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, kind: OpKind) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.op.kind() == kind)
            .count()
    }

    pub fn position(&self, id: EntryId) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }

    /// Only confirmations and moves onto the current parent.
    pub fn is_noop(&self) -> bool {
        self.entries.iter().all(|entry| match &entry.op {
            PlanOp::ConfirmFolder { .. } => true,
            PlanOp::MoveLeaf { in_place, .. } => *in_place,
            _ => false,
        })
    }
}

#[derive(Debug, Default)]
pub(crate) struct PlanBuilder {
    entries: Vec<PlanEntry>,
}

impl PlanBuilder {
    pub(crate) fn push(
        &mut self,
        op: PlanOp,
        depends_on: impl IntoIterator<Item = EntryId>,
    ) -> EntryId {
        let id = EntryId(self.entries.len());
        self.entries.push(PlanEntry {
            id,
            op,
            depends_on: depends_on.into_iter().collect(),
        });
        id
    }

    /// Kahn's algorithm, lowest ready id first, so generation order is kept
    /// wherever dependencies allow it.
    pub(crate) fn finish(self) -> Result<Plan, SyncError> {
        let known: HashSet<EntryId> = self.entries.iter().map(|entry| entry.id).collect();
        let mut indegree: HashMap<EntryId, usize> = HashMap::with_capacity(self.entries.len());
        let mut dependents: HashMap<EntryId, Vec<EntryId>> = HashMap::new();
        for entry in &self.entries {
            if let Some(missing) = entry.depends_on.iter().find(|dep| !known.contains(*dep)) {
                return Err(SyncError::Validation(format!(
                    "plan entry {} depends on unknown entry {missing}",
                    entry.id
                )));
            }
            indegree.insert(entry.id, entry.depends_on.len());
            for dep in &entry.depends_on {
                dependents.entry(*dep).or_default().push(entry.id);
            }
        }

        let mut ready: BTreeSet<EntryId> = indegree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut pending: HashMap<EntryId, PlanEntry> = self
            .entries
            .into_iter()
            .map(|entry| (entry.id, entry))
            .collect();
        let mut ordered = Vec::with_capacity(pending.len());

        while let Some(id) = ready.pop_first() {
            for next in dependents.get(&id).into_iter().flatten() {
                if let Some(degree) = indegree.get_mut(next) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*next);
                    }
                }
            }
            if let Some(entry) = pending.remove(&id) {
                ordered.push(entry);
            }
        }

        if !pending.is_empty() {
            return Err(SyncError::Validation(
                "plan contains a dependency cycle".to_string(),
            ));
        }
        Ok(Plan { entries: ordered })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Claim {
    /// Carries the desired idempotency key.
    Owned,
    /// Right kind, no key yet.
    Unclaimed,
}

/// Decides whether `remote` is the logical entity `desired` describes.
pub(crate) fn claim(desired: &DesiredNode, remote: &RemoteNode) -> Result<Claim, SyncError> {
    let conflict = || SyncError::Conflict {
        path: remote.path.clone(),
        existing: describe(remote),
        desired: desired.idempotency_key.clone(),
    };
    if remote.kind != desired.kind {
        return Err(conflict());
    }
    match remote.idempotency_key.as_deref() {
        Some(key) if key == desired.idempotency_key => Ok(Claim::Owned),
        Some(_) => Err(conflict()),
        None => Ok(Claim::Unclaimed),
    }
}

fn describe(remote: &RemoteNode) -> String {
    let kind = match remote.kind {
        NodeKind::Folder => "folder",
        NodeKind::Leaf => "leaf",
    };
    match &remote.idempotency_key {
        Some(key) => format!("{kind} {key}"),
        None => format!("unkeyed {kind}"),
    }
}

enum Located {
    Missing,
    Found {
        remote: RemoteNode,
        claim: Claim,
        in_place: bool,
    },
}

pub struct Planner<'r, 'a, R: ?Sized> {
    resolver: &'r PathResolver<'a, R>,
    retry: RetryPolicy,
}

impl<'r, 'a, R: RemoteTree + ?Sized> Planner<'r, 'a, R> {
    pub fn new(resolver: &'r PathResolver<'a, R>, retry: RetryPolicy) -> Self {
        Self { resolver, retry }
    }

    /// Diffs `desired` against the remote tree.
    ///
    /// Only a malformed desired state is an error; remote conflicts and failed
    /// lookups become `Blocked` entries so the rest of the plan still runs.
    pub async fn plan(&self, desired: &DesiredState) -> Result<Plan, SyncError> {
        let folders = merge_folders(&desired.folders);
        let folder_paths: HashSet<&str> = folders.iter().map(|f| f.path.as_str()).collect();
        if let Some(orphan) = desired
            .leaves
            .iter()
            .find(|leaf| !folder_paths.contains(leaf.parent_path.as_str()))
        {
            return Err(SyncError::Validation(format!(
                "leaf {} belongs to unknown folder {}",
                orphan.path, orphan.parent_path
            )));
        }

        let mut builder = PlanBuilder::default();
        let mut folder_entries: HashMap<String, EntryId> = HashMap::new();
        for folder in &folders {
            let id = self.plan_folder(&mut builder, folder).await;
            folder_entries.insert(folder.path.clone(), id);
        }
        let mut claimed: HashMap<String, String> = HashMap::new();
        for leaf in &desired.leaves {
            let folder_entry = folder_entries[&leaf.parent_path];
            self.plan_leaf(&mut builder, leaf, folder_entry, &mut claimed)
                .await;
        }

        let plan = builder.finish()?;
        tracing::debug!(
            entries = plan.len(),
            create_folder = plan.count(OpKind::CreateFolder),
            create_leaf = plan.count(OpKind::CreateLeaf),
            tag_leaf = plan.count(OpKind::TagLeaf),
            blocked = plan.count(OpKind::Blocked),
            "plan ready"
        );
        Ok(plan)
    }

    async fn plan_folder(&self, builder: &mut PlanBuilder, folder: &DesiredNode) -> EntryId {
        let op = match self.lookup(&folder.path).await {
            Err(error) => PlanOp::Blocked {
                path: folder.path.clone(),
                error,
            },
            Ok(None) => PlanOp::CreateFolder {
                node: folder.clone(),
            },
            Ok(Some(remote)) => match claim(folder, &remote) {
                Ok(claim) => {
                    if claim == Claim::Unclaimed {
                        tracing::warn!(
                            path = %folder.path,
                            id = %remote.id,
                            "adopting existing folder without idempotency key"
                        );
                    }
                    PlanOp::ConfirmFolder {
                        node: folder.clone(),
                        remote,
                    }
                }
                Err(error) => PlanOp::Blocked {
                    path: folder.path.clone(),
                    error,
                },
            },
        };
        builder.push(op, [])
    }

    /// `claimed` maps remote ids to the key of the leaf that already took
    /// them in this plan; one remote node backs at most one desired leaf.
    async fn plan_leaf(
        &self,
        builder: &mut PlanBuilder,
        leaf: &DesiredNode,
        folder: EntryId,
        claimed: &mut HashMap<String, String>,
    ) {
        let located = match self.locate_leaf(leaf).await {
            Ok(Located::Found { remote, .. }) if claimed.contains_key(&remote.id) => {
                Err(SyncError::Conflict {
                    path: remote.path.clone(),
                    existing: format!("leaf claimed by {}", claimed[&remote.id]),
                    desired: leaf.idempotency_key.clone(),
                })
            }
            other => other,
        };
        match located {
            Err(error) => {
                builder.push(
                    PlanOp::Blocked {
                        path: leaf.path.clone(),
                        error,
                    },
                    [folder],
                );
            }
            Ok(Located::Missing) => {
                let create = builder.push(PlanOp::CreateLeaf { node: leaf.clone() }, [folder]);
                builder.push(
                    PlanOp::MoveLeaf {
                        node: leaf.clone(),
                        leaf: LeafHandle::CreatedBy(create),
                        source_path: leaf.path.clone(),
                        in_place: true,
                    },
                    [folder, create],
                );
            }
            Ok(Located::Found {
                remote,
                claim,
                in_place,
            }) => {
                claimed.insert(remote.id.clone(), leaf.idempotency_key.clone());
                let mut depends_on = vec![folder];
                if claim == Claim::Unclaimed || content_drifted(leaf, &remote) {
                    depends_on.push(builder.push(
                        PlanOp::TagLeaf {
                            node: leaf.clone(),
                            remote: remote.clone(),
                        },
                        [folder],
                    ));
                }
                builder.push(
                    PlanOp::MoveLeaf {
                        node: leaf.clone(),
                        leaf: LeafHandle::Existing(remote.id),
                        source_path: remote.path,
                        in_place,
                    },
                    depends_on,
                );
            }
        }
    }

    /// The origin (pre-move) path is checked first, then the destination.
    /// A node at the destination that already carries our key wins over an
    /// unclaimed node at the origin.
    async fn locate_leaf(&self, leaf: &DesiredNode) -> Result<Located, SyncError> {
        let mut at_origin = None;
        if let Some(origin) = leaf.origin_path.as_deref().filter(|o| *o != leaf.path)
            && let Some(remote) = self.lookup(origin).await?
        {
            match claim(leaf, &remote) {
                Ok(Claim::Owned) => {
                    return Ok(Located::Found {
                        remote,
                        claim: Claim::Owned,
                        in_place: false,
                    });
                }
                Ok(Claim::Unclaimed) => at_origin = Some(remote),
                Err(err) => {
                    tracing::debug!(path = origin, reason = %err, "origin path holds another entity");
                }
            }
        }

        match self.lookup(&leaf.path).await? {
            Some(remote) => {
                let claim = claim(leaf, &remote)?;
                if let Some(stray) = &at_origin {
                    tracing::warn!(
                        path = %stray.path,
                        id = %stray.id,
                        destination = %leaf.path,
                        "leaving unclaimed duplicate at origin path"
                    );
                }
                Ok(Located::Found {
                    remote,
                    claim,
                    in_place: true,
                })
            }
            None => Ok(match at_origin {
                Some(remote) => Located::Found {
                    remote,
                    claim: Claim::Unclaimed,
                    in_place: false,
                },
                None => Located::Missing,
            }),
        }
    }

    async fn lookup(&self, path: &str) -> Result<Option<RemoteNode>, SyncError> {
        self.retry
            .run("lookup", || self.resolver.resolve(path))
            .await
    }
}

fn content_drifted(leaf: &DesiredNode, remote: &RemoteNode) -> bool {
    let desired = leaf.payload.as_ref().map(LeafPayload::fingerprint);
    desired.is_some() && remote.fingerprint != desired
}

/// One folder per path. Colliding categories keep the last display name.
fn merge_folders(folders: &[DesiredNode]) -> Vec<DesiredNode> {
    let mut merged: Vec<DesiredNode> = Vec::with_capacity(folders.len());
    let mut by_path: HashMap<&str, usize> = HashMap::new();
    for folder in folders {
        match by_path.get(folder.path.as_str()) {
            Some(&idx) => {
                tracing::warn!(
                    path = %folder.path,
                    previous = %merged[idx].display_name,
                    category = %folder.display_name,
                    "categories collide on one folder path"
                );
                merged[idx].display_name = folder.display_name.clone();
            }
            None => {
                by_path.insert(&folder.path, merged.len());
                merged.push(folder.clone());
            }
        }
    }
    merged
}
