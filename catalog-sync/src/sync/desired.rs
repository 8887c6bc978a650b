use std::collections::{HashMap, HashSet};

use catalog_core::SourceRecord;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use url::Url;

use super::error::SyncError;
use super::slug::{is_absolute, join, normalize, slugify};

pub const FOLDER_KEY_PREFIX: &str = "cat-";
pub const DEFAULT_LEAF_KEY_PREFIX: &str = "dummyjson-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Folder,
    Leaf,
}

/// Validated leaf content. Built once from a `SourceRecord` and handed to the
/// remote as is.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafPayload {
    pub sku: String,
    pub description: String,
    pub brand: Option<String>,
    pub category: String,
    pub price: f64,
    pub stock: u32,
    pub images: Vec<Url>,
}

impl LeafPayload {
    /// Hex SHA-256 over every field, stored next to the leaf so later runs can
    /// tell whether its content drifted.
    pub fn fingerprint(&self) -> String {
        let images: Vec<&str> = self.images.iter().map(Url::as_str).collect();
        let canonical = json!([
            self.sku,
            self.description,
            self.brand,
            self.category,
            self.price,
            self.stock,
            images,
        ]);
        hex::encode(Sha256::digest(canonical.to_string().as_bytes()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DesiredNode {
    pub kind: NodeKind,
    pub path: String,
    pub parent_path: String,
    /// Root-level location a leaf occupies before its first move.
    pub origin_path: Option<String>,
    pub idempotency_key: String,
    pub display_name: String,
    pub payload: Option<LeafPayload>,
    /// Set for leaves. Nothing consumes it yet: the content service offers
    /// no publish operation.
    pub publish: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredState {
    pub root: String,
    pub folders: Vec<DesiredNode>,
    pub leaves: Vec<DesiredNode>,
}

impl DesiredState {
    /// Folders first (first-appearance order), then leaves in input order.
    pub fn nodes(&self) -> impl Iterator<Item = &DesiredNode> {
        self.folders.iter().chain(self.leaves.iter())
    }
}

#[derive(Debug, Clone)]
pub struct DesiredStateBuilder {
    root: String,
    leaf_key_prefix: String,
}

impl DesiredStateBuilder {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            leaf_key_prefix: DEFAULT_LEAF_KEY_PREFIX.to_string(),
        }
    }

    pub fn with_leaf_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.leaf_key_prefix = prefix.into();
        self
    }

    pub fn build(&self, records: &[SourceRecord]) -> Result<DesiredState, SyncError> {
        let root = normalize(&self.root);
        if !is_absolute(&root) {
            return Err(SyncError::Validation(format!(
                "root path {:?} is not absolute",
                self.root
            )));
        }
        if records.is_empty() {
            return Err(SyncError::Validation("no source records".to_string()));
        }

        let mut folders = Vec::new();
        let mut folder_by_category: HashMap<&str, usize> = HashMap::new();
        let mut leaves = Vec::with_capacity(records.len());
        let mut seen_keys = HashSet::new();

        for record in records {
            let external_key = record.external_key.trim();
            if external_key.is_empty() {
                return Err(SyncError::Validation(format!(
                    "record {:?} has no external key",
                    record.title
                )));
            }
            if !seen_keys.insert(external_key) {
                return Err(SyncError::Validation(format!(
                    "external key {external_key} appears more than once"
                )));
            }
            let title = record.title.trim();
            let title_slug = slugify(title);
            if title_slug.is_empty() {
                return Err(SyncError::Validation(format!(
                    "record {external_key} has no usable title"
                )));
            }
            let category = record.category.trim();
            let category_slug = slugify(category);
            if category_slug.is_empty() {
                return Err(SyncError::Validation(format!(
                    "record {external_key} has no usable category"
                )));
            }

            let folder_path = join(&root, &category_slug);
            if !folder_by_category.contains_key(category) {
                folder_by_category.insert(category, folders.len());
                folders.push(DesiredNode {
                    kind: NodeKind::Folder,
                    path: folder_path.clone(),
                    parent_path: root.clone(),
                    origin_path: None,
                    idempotency_key: format!("{FOLDER_KEY_PREFIX}{category_slug}"),
                    display_name: category.to_string(),
                    payload: None,
                    publish: false,
                });
            }

            leaves.push(DesiredNode {
                kind: NodeKind::Leaf,
                path: join(&folder_path, &title_slug),
                parent_path: folder_path,
                origin_path: Some(join(&root, &title_slug)),
                idempotency_key: format!("{}{external_key}", self.leaf_key_prefix),
                display_name: title.to_string(),
                payload: Some(leaf_payload(record, external_key, category)?),
                publish: true,
            });
        }

        Ok(DesiredState {
            root,
            folders,
            leaves,
        })
    }
}

fn leaf_payload(
    record: &SourceRecord,
    external_key: &str,
    category: &str,
) -> Result<LeafPayload, SyncError> {
    let source = &record.payload;
    if !source.price.is_finite() || source.price < 0.0 {
        return Err(SyncError::Validation(format!(
            "record {external_key} has invalid price {}",
            source.price
        )));
    }
    let images = source
        .images
        .iter()
        .map(|raw| {
            Url::parse(raw).map_err(|err| {
                SyncError::Validation(format!(
                    "record {external_key} has invalid image url {raw:?}: {err}"
                ))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(LeafPayload {
        sku: format!("dummy-{external_key}"),
        description: source.description.clone(),
        brand: source
            .brand
            .as_deref()
            .map(str::trim)
            .filter(|brand| !brand.is_empty())
            .map(str::to_string),
        category: category.to_string(),
        price: source.price,
        stock: source.stock,
        images,
    })
}

#[cfg(test)]
pub(crate) fn record(key: &str, title: &str, category: &str) -> SourceRecord {
    SourceRecord {
        external_key: key.to_string(),
        title: title.to_string(),
        category: category.to_string(),
        payload: catalog_core::RecordPayload {
            description: format!("{title} description"),
            brand: Some("Acme".to_string()),
            price: 10.0,
            stock: 5,
            images: vec![format!("https://img.example/{key}.png")],
        },
    }
}
