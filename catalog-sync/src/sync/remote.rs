use async_trait::async_trait;
use catalog_core::{
    FolderDraft, Item, ItemType, PimClient, ProductContent, ProductDraft, ProductUpdate,
};

use super::desired::{LeafPayload, NodeKind};
use super::error::SyncError;
use super::slug::{join, slugify};

/// The remote service's view of one node. Only valid for the run that read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNode {
    pub id: String,
    pub path: String,
    pub idempotency_key: Option<String>,
    pub kind: NodeKind,
    pub child_ids: Vec<String>,
    /// Content fingerprint stored on a leaf; `None` when never written.
    pub fingerprint: Option<String>,
}

/// Full rewrite of a leaf: key, name and content in one call.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafUpdate {
    pub idempotency_key: String,
    pub display_name: String,
    pub payload: LeafPayload,
}

/// Operations the reconciliation engine needs from the content service.
///
/// `lookup` returns `Ok(None)` for a well-formed "no such path" answer.
/// `move_node` onto the current parent must succeed without side effects.
#[async_trait]
pub trait RemoteTree: Send + Sync {
    async fn lookup(&self, path: &str, language: &str) -> Result<Option<RemoteNode>, SyncError>;

    async fn create_folder(
        &self,
        parent_id: &str,
        name: &str,
        idempotency_key: &str,
        language: &str,
    ) -> Result<String, SyncError>;

    async fn create_leaf(
        &self,
        parent_id: &str,
        name: &str,
        payload: &LeafPayload,
        idempotency_key: &str,
        language: &str,
    ) -> Result<String, SyncError>;

    async fn update_leaf(
        &self,
        id: &str,
        update: &LeafUpdate,
        language: &str,
    ) -> Result<String, SyncError>;

    async fn move_node(
        &self,
        id: &str,
        new_parent_id: &str,
        new_name: &str,
        language: &str,
    ) -> Result<String, SyncError>;

    async fn delete_node(&self, id: &str) -> Result<(), SyncError>;

    async fn list_children(
        &self,
        path: &str,
        language: &str,
    ) -> Result<Vec<RemoteNode>, SyncError>;
}

#[async_trait]
impl RemoteTree for PimClient {
    async fn lookup(&self, path: &str, language: &str) -> Result<Option<RemoteNode>, SyncError> {
        Ok(self
            .get_item(path, language)
            .await?
            .map(|item| remote_node(item, path)))
    }

    async fn create_folder(
        &self,
        parent_id: &str,
        name: &str,
        idempotency_key: &str,
        language: &str,
    ) -> Result<String, SyncError> {
        let draft = FolderDraft {
            name: name.to_string(),
            parent_id: parent_id.to_string(),
            external_reference: idempotency_key.to_string(),
        };
        Ok(PimClient::create_folder(self, &draft, language).await?)
    }

    async fn create_leaf(
        &self,
        parent_id: &str,
        name: &str,
        payload: &LeafPayload,
        idempotency_key: &str,
        language: &str,
    ) -> Result<String, SyncError> {
        let draft = ProductDraft {
            name: name.to_string(),
            parent_id: parent_id.to_string(),
            external_reference: idempotency_key.to_string(),
            content: product_content(payload),
        };
        Ok(self.create_product(&draft, language).await?)
    }

    async fn update_leaf(
        &self,
        id: &str,
        update: &LeafUpdate,
        language: &str,
    ) -> Result<String, SyncError> {
        let update = ProductUpdate {
            name: update.display_name.clone(),
            external_reference: update.idempotency_key.clone(),
            content: product_content(&update.payload),
        };
        Ok(self.update_product(id, &update, language).await?)
    }

    async fn move_node(
        &self,
        id: &str,
        new_parent_id: &str,
        new_name: &str,
        language: &str,
    ) -> Result<String, SyncError> {
        Ok(self.move_item(id, new_parent_id, new_name, language).await?)
    }

    async fn delete_node(&self, id: &str) -> Result<(), SyncError> {
        Ok(self.delete_item(id).await?)
    }

    async fn list_children(
        &self,
        path: &str,
        language: &str,
    ) -> Result<Vec<RemoteNode>, SyncError> {
        let children = PimClient::list_children(self, path, language)
            .await?
            .ok_or_else(|| SyncError::NotFound(path.to_string()))?;
        Ok(children
            .into_iter()
            .map(|item| {
                let fallback = match item.name.as_deref() {
                    Some(name) => join(path, &slugify(name)),
                    None => path.to_string(),
                };
                remote_node(item, &fallback)
            })
            .collect())
    }
}

fn product_content(payload: &LeafPayload) -> ProductContent {
    ProductContent {
        sku: payload.sku.clone(),
        description: payload.description.clone(),
        brand: payload.brand.clone(),
        category: payload.category.clone(),
        price: payload.price,
        stock: payload.stock,
        images: payload.images.clone(),
        fingerprint: payload.fingerprint(),
    }
}

fn remote_node(item: Item, requested_path: &str) -> RemoteNode {
    let fingerprint = item.fingerprint().map(str::to_string);
    RemoteNode {
        fingerprint,
        kind: match item.item_type {
            ItemType::Folder => NodeKind::Folder,
            ItemType::Product | ItemType::Document | ItemType::Unknown => NodeKind::Leaf,
        },
        path: item.path.unwrap_or_else(|| requested_path.to_string()),
        idempotency_key: item.external_reference.filter(|key| !key.is_empty()),
        child_ids: item
            .children
            .unwrap_or_default()
            .into_iter()
            .map(|child| child.id)
            .collect(),
        id: item.id,
    }
}
