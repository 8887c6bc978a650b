use std::fmt;
use std::time::SystemTime;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use url::Url;

pub const DEFAULT_ENDPOINT: &str = "https://pim.crystallize.com/graphql";
const FOLDER_SHAPE: &str = "category";
const PRODUCT_SHAPE: &str = "product";

const FINGERPRINT_COMPONENT: &str = "fingerprint";

const GQ_ITEM: &str = "query($path:String!,$lang:String!){
  item(path:$path,language:$lang){id name type path externalReference children{id}
    components{componentId content{...on SingleLineContent{text}}}}
}";

const GQ_CHILDREN: &str = "query($path:String!,$lang:String!){
  tree{get(path:$path,language:$lang){children{id name type path externalReference
    components{componentId content{...on SingleLineContent{text}}}}}}
}";

const GQ_FOLDER_CREATE: &str = "mutation($input:CreateFolderInput!,$lang:String!){
  folderCreate(input:$input,language:$lang){id}
}";

const GQ_PRODUCT_CREATE: &str = "mutation($input:CreateProductInput!,$lang:String!){
  productCreate(input:$input,language:$lang){id}
}";

const GQ_PRODUCT_UPDATE: &str = "mutation($id:ID!,$input:UpdateProductInput!,$lang:String!){
  productUpdate(id:$id,input:$input,language:$lang){id}
}";

const GQ_MOVE: &str = "mutation($id:ID!,$parent:ID!,$name:String!,$lang:String!){
  itemMove(id:$id,parentId:$parent,language:$lang,name:$name){id}
}";

const GQ_DELETE: &str = "mutation($id:ID!){ item { delete(id:$id) } }";

#[derive(Debug, Error)]
pub enum PimError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api {
        status: StatusCode,
        body: String,
        retry_after: Option<u64>,
    },
    #[error("graphql errors: {0}")]
    GraphQl(String),
    #[error("malformed response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

/// Access-token pair sent with every request; the tenant is implied by the token.
#[derive(Clone)]
pub struct Credentials {
    pub token_id: String,
    pub token_secret: String,
}

impl Credentials {
    pub fn new(token_id: impl Into<String>, token_secret: impl Into<String>) -> Self {
        Self {
            token_id: token_id.into(),
            token_secret: token_secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token_id", &self.token_id)
            .field("token_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct PimClient {
    http: Client,
    endpoint: Url,
    credentials: Credentials,
}

impl PimClient {
    pub fn new(credentials: Credentials) -> Result<Self, PimError> {
        Self::with_endpoint(DEFAULT_ENDPOINT, credentials)
    }

    pub fn with_endpoint(endpoint: &str, credentials: Credentials) -> Result<Self, PimError> {
        Ok(Self {
            http: Client::new(),
            endpoint: Url::parse(endpoint)?,
            credentials,
        })
    }

    /// Looks up a single item by tree path. A `null` item means the path is free.
    pub async fn get_item(&self, path: &str, language: &str) -> Result<Option<Item>, PimError> {
        let data: ItemData = self
            .execute(GQ_ITEM, json!({ "path": path, "lang": language }))
            .await?;
        Ok(data.item)
    }

    /// Direct children of `path`, or `None` when the path itself does not exist.
    pub async fn list_children(
        &self,
        path: &str,
        language: &str,
    ) -> Result<Option<Vec<Item>>, PimError> {
        let data: TreeData = self
            .execute(GQ_CHILDREN, json!({ "path": path, "lang": language }))
            .await?;
        Ok(data
            .tree
            .get
            .map(|node| node.children.unwrap_or_default()))
    }

    pub async fn create_folder(
        &self,
        draft: &FolderDraft,
        language: &str,
    ) -> Result<String, PimError> {
        let data: FolderCreateData = self
            .execute(
                GQ_FOLDER_CREATE,
                json!({ "input": draft.to_input(), "lang": language }),
            )
            .await?;
        Ok(data.folder_create.id)
    }

    pub async fn create_product(
        &self,
        draft: &ProductDraft,
        language: &str,
    ) -> Result<String, PimError> {
        let data: ProductCreateData = self
            .execute(
                GQ_PRODUCT_CREATE,
                json!({ "input": draft.to_input(), "lang": language }),
            )
            .await?;
        Ok(data.product_create.id)
    }

    /// Rewrites the reference and every engine-controlled field of a product.
    pub async fn update_product(
        &self,
        id: &str,
        update: &ProductUpdate,
        language: &str,
    ) -> Result<String, PimError> {
        let data: ProductUpdateData = self
            .execute(
                GQ_PRODUCT_UPDATE,
                json!({ "id": id, "input": update.to_input(), "lang": language }),
            )
            .await?;
        Ok(data.product_update.id)
    }

    /// Moves and renames an item. The service treats a move onto the current
    /// parent as a plain rename, so repeating it is harmless.
    pub async fn move_item(
        &self,
        id: &str,
        parent_id: &str,
        name: &str,
        language: &str,
    ) -> Result<String, PimError> {
        let data: ItemMoveData = self
            .execute(
                GQ_MOVE,
                json!({ "id": id, "parent": parent_id, "name": name, "lang": language }),
            )
            .await?;
        Ok(data.item_move.id)
    }

    pub async fn delete_item(&self, id: &str) -> Result<(), PimError> {
        let _: Value = self.execute(GQ_DELETE, json!({ "id": id })).await?;
        Ok(())
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
    ) -> Result<T, PimError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .header("X-Crystallize-Access-Token-Id", &self.credentials.token_id)
            .header(
                "X-Crystallize-Access-Token-Secret",
                &self.credentials.token_secret,
            )
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, PimError> {
        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_from_headers(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(PimError::Api {
                status,
                body,
                retry_after,
            });
        }

        let text = response.text().await?;
        let envelope: GraphQlResponse = serde_json::from_str(&text)
            .map_err(|err| PimError::Decode(format!("{err}: {text}")))?;
        if let Some(errors) = envelope.errors.filter(|errors| !errors.is_empty()) {
            let message = errors
                .into_iter()
                .map(|entry| entry.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(PimError::GraphQl(message));
        }
        let data = envelope
            .data
            .ok_or_else(|| PimError::Decode("response carries no data".to_string()))?;
        serde_json::from_value(data).map_err(|err| PimError::Decode(err.to_string()))
    }
}

impl PimError {
    pub fn classification(&self) -> ApiErrorClass {
        match self {
            PimError::Api { status, .. } => classify_api_status(*status),
            PimError::Request(err) if err.is_builder() || err.is_decode() => {
                ApiErrorClass::Permanent
            }
            PimError::Request(_) => ApiErrorClass::Transient,
            PimError::Url(_) | PimError::GraphQl(_) | PimError::Decode(_) => {
                ApiErrorClass::Permanent
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            ApiErrorClass::RateLimit | ApiErrorClass::Transient
        )
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            PimError::Api { status, .. } => *status == StatusCode::NOT_FOUND,
            PimError::GraphQl(message) => message.to_ascii_lowercase().contains("not found"),
            _ => false,
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            PimError::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(status, StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_EARLY)
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

fn retry_after_from_headers(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }
    let at = httpdate::parse_http_date(value).ok()?;
    Some(
        at.duration_since(SystemTime::now())
            .map(|delta| delta.as_secs())
            .unwrap_or(0),
    )
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub external_reference: Option<String>,
    #[serde(default)]
    pub children: Option<Vec<ItemRef>>,
    #[serde(default)]
    pub components: Option<Vec<ItemComponent>>,
}

impl Item {
    /// Content fingerprint written by the last create or update, if any.
    pub fn fingerprint(&self) -> Option<&str> {
        self.components
            .iter()
            .flatten()
            .find(|component| component.component_id == FINGERPRINT_COMPONENT)
            .and_then(|component| component.content.as_ref())
            .and_then(|content| content.text.as_deref())
            .filter(|text| !text.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ItemRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ItemComponent {
    pub component_id: String,
    #[serde(default)]
    pub content: Option<ComponentContent>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ComponentContent {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Folder,
    Product,
    Document,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FolderDraft {
    pub name: String,
    pub parent_id: String,
    pub external_reference: String,
}

impl FolderDraft {
    fn to_input(&self) -> Value {
        json!({
            "name": self.name,
            "shapeIdentifier": FOLDER_SHAPE,
            "parentId": self.parent_id,
            "externalReference": self.external_reference,
        })
    }
}

/// Everything the catalog stores on a product besides its place in the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductContent {
    pub sku: String,
    pub description: String,
    pub brand: Option<String>,
    pub category: String,
    pub price: f64,
    pub stock: u32,
    pub images: Vec<Url>,
    pub fingerprint: String,
}

impl ProductContent {
    fn components(&self) -> Vec<Value> {
        let mut components = vec![json!({
            "componentId": "description",
            "richText": {
                "json": [{ "type": "paragraph", "children": [{ "text": self.description }] }]
            }
        })];
        if let Some(brand) = &self.brand {
            components.push(json!({ "componentId": "brand", "singleLine": { "text": brand } }));
        }
        components.push(json!({
            "componentId": "category",
            "singleLine": { "text": self.category }
        }));
        components.push(json!({ "componentId": "images", "images": self.images() }));
        components.push(json!({
            "componentId": FINGERPRINT_COMPONENT,
            "singleLine": { "text": self.fingerprint }
        }));
        components
    }

    fn images(&self) -> Vec<Value> {
        self.images
            .iter()
            .map(|src| json!({ "src": src.as_str() }))
            .collect()
    }

    fn variants(&self, name: &str) -> Value {
        json!([{
            "name": name,
            "sku": self.sku,
            "isDefault": true,
            "price": { "eur": self.price },
            "stock": self.stock,
            "images": self.images(),
        }])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductDraft {
    pub name: String,
    pub parent_id: String,
    pub external_reference: String,
    pub content: ProductContent,
}

impl ProductDraft {
    fn to_input(&self) -> Value {
        json!({
            "name": self.name,
            "shapeIdentifier": PRODUCT_SHAPE,
            "parentId": self.parent_id,
            "externalReference": self.external_reference,
            "components": self.content.components(),
            "variants": self.content.variants(&self.name),
        })
    }
}

/// In-place rewrite of an existing product; its parent is left alone.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductUpdate {
    pub name: String,
    pub external_reference: String,
    pub content: ProductContent,
}

impl ProductUpdate {
    fn to_input(&self) -> Value {
        json!({
            "externalReference": self.external_reference,
            "components": self.content.components(),
            "variants": self.content.variants(&self.name),
        })
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<GraphQlErrorEntry>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorEntry {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ItemData {
    item: Option<Item>,
}

#[derive(Debug, Deserialize)]
struct TreeData {
    tree: TreeGet,
}

#[derive(Debug, Deserialize)]
struct TreeGet {
    get: Option<TreeNode>,
}

#[derive(Debug, Deserialize)]
struct TreeNode {
    #[serde(default)]
    children: Option<Vec<Item>>,
}

#[derive(Debug, Deserialize)]
struct CreatedId {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FolderCreateData {
    folder_create: CreatedId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductCreateData {
    product_create: CreatedId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductUpdateData {
    product_update: CreatedId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemMoveData {
    item_move: CreatedId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn classifies_statuses() {
        assert_eq!(
            classify_api_status(StatusCode::UNAUTHORIZED),
            ApiErrorClass::Auth
        );
        assert_eq!(
            classify_api_status(StatusCode::TOO_MANY_REQUESTS),
            ApiErrorClass::RateLimit
        );
        assert_eq!(
            classify_api_status(StatusCode::BAD_GATEWAY),
            ApiErrorClass::Transient
        );
        assert_eq!(
            classify_api_status(StatusCode::BAD_REQUEST),
            ApiErrorClass::Permanent
        );
    }

    #[test]
    fn graphql_errors_are_not_retryable() {
        let err = PimError::GraphQl("Item not found".into());
        assert!(!err.is_retryable());
        assert!(err.is_not_found());
    }

    #[test]
    fn retry_after_accepts_delta_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(retry_after_from_headers(&headers), Some(7));
    }

    #[test]
    fn retry_after_in_the_past_is_zero() {
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(retry_after_from_headers(&headers), Some(0));
    }

    #[test]
    fn product_input_omits_missing_brand() {
        let draft = ProductDraft {
            name: "Phone".into(),
            parent_id: "folder-1".into(),
            external_reference: "dummyjson-1".into(),
            content: content(),
        };
        let input = draft.to_input();
        let components = input["components"].as_array().unwrap();
        assert!(components.iter().all(|c| c["componentId"] != "brand"));
        assert!(components.iter().any(|c| c["componentId"] == "fingerprint"
            && c["singleLine"]["text"] == "fp-1"));
        assert_eq!(input["variants"][0]["sku"], "dummy-1");
        assert_eq!(input["variants"][0]["price"]["eur"], 9.5);
        assert_eq!(input["shapeIdentifier"], "product");
    }

    #[test]
    fn product_update_leaves_parent_alone() {
        let update = ProductUpdate {
            name: "Phone".into(),
            external_reference: "dummyjson-1".into(),
            content: content(),
        };
        let input = update.to_input();
        assert!(input.get("parentId").is_none());
        assert_eq!(input["externalReference"], "dummyjson-1");
        assert_eq!(input["variants"][0]["stock"], 3);
    }

    #[test]
    fn fingerprint_reads_single_line_component() {
        let item: Item = serde_json::from_value(json!({
            "id": "item-1",
            "type": "product",
            "components": [
                { "componentId": "brand", "content": { "text": "Acme" } },
                { "componentId": "fingerprint", "content": { "text": "abc" } }
            ]
        }))
        .unwrap();
        assert_eq!(item.fingerprint(), Some("abc"));

        let blank: Item = serde_json::from_value(json!({
            "id": "item-2",
            "type": "product",
            "components": [{ "componentId": "fingerprint", "content": null }]
        }))
        .unwrap();
        assert_eq!(blank.fingerprint(), None);
    }

    fn content() -> ProductContent {
        ProductContent {
            sku: "dummy-1".into(),
            description: "A phone".into(),
            brand: None,
            category: "Electronics".into(),
            price: 9.5,
            stock: 3,
            images: vec![],
            fingerprint: "fp-1".into(),
        }
    }
}
