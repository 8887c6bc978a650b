//! In-memory content service used by the engine tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::desired::{DesiredNode, LeafPayload, NodeKind};
use super::error::SyncError;
use super::remote::{LeafUpdate, RemoteNode, RemoteTree};
use super::slug::{join, slugify};

#[derive(Debug, Clone)]
struct MemNode {
    id: String,
    name: String,
    parent: Option<String>,
    path: String,
    key: Option<String>,
    kind: NodeKind,
    fingerprint: Option<String>,
}

#[derive(Debug)]
struct Injected {
    op: &'static str,
    target: String,
    error: SyncError,
    remaining: u32,
}

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<String, MemNode>,
    next_id: u64,
    calls: HashMap<&'static str, usize>,
    injected: Vec<Injected>,
    cancel_after: Option<(&'static str, usize, CancellationToken)>,
}

impl State {
    fn enter(&mut self, op: &'static str, target: &str) -> Result<(), SyncError> {
        let count = self.calls.entry(op).or_default();
        *count += 1;
        let count = *count;
        if let Some((hook_op, after, token)) = &self.cancel_after
            && *hook_op == op
            && *after == count
        {
            token.cancel();
        }
        if let Some(rule) = self
            .injected
            .iter_mut()
            .find(|rule| rule.op == op && rule.target == target && rule.remaining > 0)
        {
            rule.remaining -= 1;
            return Err(rule.error.clone());
        }
        Ok(())
    }

    fn find_path(&self, path: &str) -> Option<&MemNode> {
        self.nodes.values().find(|node| node.path == path)
    }

    fn children(&self, id: &str) -> Vec<&MemNode> {
        self.nodes
            .values()
            .filter(|node| node.parent.as_deref() == Some(id))
            .collect()
    }

    fn insert(
        &mut self,
        parent_id: Option<&str>,
        path: String,
        name: &str,
        key: Option<&str>,
        kind: NodeKind,
    ) -> String {
        self.next_id += 1;
        let id = format!("node-{:04}", self.next_id);
        self.nodes.insert(
            id.clone(),
            MemNode {
                id: id.clone(),
                name: name.to_string(),
                parent: parent_id.map(str::to_string),
                path,
                key: key.map(str::to_string),
                kind,
                fingerprint: None,
            },
        );
        id
    }

    fn create_under(
        &mut self,
        parent_id: &str,
        name: &str,
        key: &str,
        kind: NodeKind,
        fingerprint: Option<String>,
    ) -> Result<String, SyncError> {
        let parent = self
            .nodes
            .get(parent_id)
            .ok_or_else(|| SyncError::NotFound(parent_id.to_string()))?;
        let path = join(&parent.path, &slugify(name));
        if self.find_path(&path).is_some() {
            return Err(SyncError::Remote(format!("{path} already exists")));
        }
        let id = self.insert(Some(parent_id), path, name, Some(key), kind);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.fingerprint = fingerprint;
        }
        Ok(id)
    }

    fn remote_node(&self, node: &MemNode) -> RemoteNode {
        RemoteNode {
            id: node.id.clone(),
            path: node.path.clone(),
            idempotency_key: node.key.clone(),
            kind: node.kind,
            fingerprint: node.fingerprint.clone(),
            child_ids: self
                .children(&node.id)
                .into_iter()
                .map(|child| child.id.clone())
                .collect(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct MemoryTree {
    state: Mutex<State>,
}

impl MemoryTree {
    pub(crate) fn with_root(path: &str) -> Self {
        let tree = Self::default();
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        tree.state
            .lock()
            .unwrap()
            .insert(None, path.to_string(), &name, None, NodeKind::Folder);
        tree
    }

    pub(crate) fn seed_folder(&self, parent_path: &str, name: &str, key: Option<&str>) -> String {
        self.seed(parent_path, name, key, NodeKind::Folder)
    }

    pub(crate) fn seed_leaf(&self, parent_path: &str, name: &str, key: Option<&str>) -> String {
        self.seed(parent_path, name, key, NodeKind::Leaf)
    }

    /// A keyed leaf whose stored content already matches `node`.
    pub(crate) fn seed_current_leaf(&self, parent_path: &str, node: &DesiredNode) -> String {
        let id = self.seed_leaf(
            parent_path,
            &node.display_name,
            Some(node.idempotency_key.as_str()),
        );
        let fingerprint = node.payload.as_ref().map(LeafPayload::fingerprint);
        if let Some(seeded) = self.state.lock().unwrap().nodes.get_mut(&id) {
            seeded.fingerprint = fingerprint;
        }
        id
    }

    fn seed(&self, parent_path: &str, name: &str, key: Option<&str>, kind: NodeKind) -> String {
        let mut state = self.state.lock().unwrap();
        let parent_id = state.find_path(parent_path).unwrap().id.clone();
        let path = join(parent_path, &slugify(name));
        state.insert(Some(&parent_id), path, name, key, kind)
    }

    /// Fails the next `times` calls of `op` aimed at `target` (a path for
    /// lookups and listings, a name for creates, an id otherwise).
    pub(crate) fn fail_next(&self, op: &'static str, target: &str, error: SyncError, times: u32) {
        self.state.lock().unwrap().injected.push(Injected {
            op,
            target: target.to_string(),
            error,
            remaining: times,
        });
    }

    /// Cancels `token` as the `nth` call of `op` is entered. That call still
    /// completes.
    pub(crate) fn cancel_after(&self, op: &'static str, nth: usize, token: CancellationToken) {
        self.state.lock().unwrap().cancel_after = Some((op, nth, token));
    }

    pub(crate) fn calls(&self, op: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(op)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn node_at(&self, path: &str) -> Option<RemoteNode> {
        let state = self.state.lock().unwrap();
        state.find_path(path).map(|node| state.remote_node(node))
    }

    pub(crate) fn name_at(&self, path: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.find_path(path).map(|node| node.name.clone())
    }

    /// Path -> (kind, key) for every node, for comparing end states.
    pub(crate) fn snapshot(&self) -> BTreeMap<String, (NodeKind, Option<String>)> {
        self.state
            .lock()
            .unwrap()
            .nodes
            .values()
            .map(|node| (node.path.clone(), (node.kind, node.key.clone())))
            .collect()
    }
}

#[async_trait]
impl RemoteTree for MemoryTree {
    async fn lookup(&self, path: &str, _language: &str) -> Result<Option<RemoteNode>, SyncError> {
        let mut state = self.state.lock().unwrap();
        state.enter("lookup", path)?;
        Ok(state.find_path(path).map(|node| state.remote_node(node)))
    }

    async fn create_folder(
        &self,
        parent_id: &str,
        name: &str,
        idempotency_key: &str,
        _language: &str,
    ) -> Result<String, SyncError> {
        let mut state = self.state.lock().unwrap();
        state.enter("create_folder", name)?;
        state.create_under(parent_id, name, idempotency_key, NodeKind::Folder, None)
    }

    async fn create_leaf(
        &self,
        parent_id: &str,
        name: &str,
        payload: &LeafPayload,
        idempotency_key: &str,
        _language: &str,
    ) -> Result<String, SyncError> {
        let mut state = self.state.lock().unwrap();
        state.enter("create_leaf", name)?;
        state.create_under(
            parent_id,
            name,
            idempotency_key,
            NodeKind::Leaf,
            Some(payload.fingerprint()),
        )
    }

    async fn update_leaf(
        &self,
        id: &str,
        update: &LeafUpdate,
        _language: &str,
    ) -> Result<String, SyncError> {
        let mut state = self.state.lock().unwrap();
        state.enter("update_leaf", id)?;
        let node = state
            .nodes
            .get_mut(id)
            .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
        node.key = Some(update.idempotency_key.clone());
        node.fingerprint = Some(update.payload.fingerprint());
        Ok(id.to_string())
    }

    async fn move_node(
        &self,
        id: &str,
        new_parent_id: &str,
        new_name: &str,
        _language: &str,
    ) -> Result<String, SyncError> {
        let mut state = self.state.lock().unwrap();
        state.enter("move_node", id)?;
        let old_path = state
            .nodes
            .get(id)
            .ok_or_else(|| SyncError::NotFound(id.to_string()))?
            .path
            .clone();
        let parent_path = state
            .nodes
            .get(new_parent_id)
            .ok_or_else(|| SyncError::NotFound(new_parent_id.to_string()))?
            .path
            .clone();
        let new_path = join(&parent_path, &slugify(new_name));
        if let Some(occupant) = state.find_path(&new_path)
            && occupant.id != id
        {
            return Err(SyncError::Remote(format!("{new_path} already exists")));
        }

        let prefix = format!("{old_path}/");
        for node in state.nodes.values_mut() {
            if let Some(rest) = node.path.strip_prefix(&prefix) {
                node.path = format!("{new_path}/{rest}");
            }
        }
        if let Some(node) = state.nodes.get_mut(id) {
            node.parent = Some(new_parent_id.to_string());
            node.name = new_name.to_string();
            node.path = new_path;
        }
        Ok(id.to_string())
    }

    async fn delete_node(&self, id: &str) -> Result<(), SyncError> {
        let mut state = self.state.lock().unwrap();
        state.enter("delete_node", id)?;
        let path = state
            .nodes
            .remove(id)
            .ok_or_else(|| SyncError::NotFound(id.to_string()))?
            .path;
        let prefix = format!("{path}/");
        state.nodes.retain(|_, node| !node.path.starts_with(&prefix));
        Ok(())
    }

    async fn list_children(
        &self,
        path: &str,
        _language: &str,
    ) -> Result<Vec<RemoteNode>, SyncError> {
        let mut state = self.state.lock().unwrap();
        state.enter("list_children", path)?;
        let parent = state
            .find_path(path)
            .ok_or_else(|| SyncError::NotFound(path.to_string()))?;
        Ok(state
            .children(&parent.id)
            .into_iter()
            .map(|child| state.remote_node(child))
            .collect())
    }
}
