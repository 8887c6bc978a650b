use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("source returned {status}")]
    Status { status: StatusCode },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed source document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("source returned no records")]
    Empty,
    #[error("every source failed: {0}")]
    Exhausted(String),
}

/// One input row. `payload` carries everything the catalog stores on the leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub external_key: String,
    pub title: String,
    pub category: String,
    pub payload: RecordPayload,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordPayload {
    pub description: String,
    pub brand: Option<String>,
    pub price: f64,
    pub stock: u32,
    pub images: Vec<String>,
}

#[async_trait]
pub trait RecordSource: Send + Sync {
    fn name(&self) -> &str;

    async fn load(&self) -> Result<Vec<SourceRecord>, SourceError>;
}

/// Fetches a `{"products": [...]}` document over HTTP.
pub struct HttpSource {
    http: Client,
    url: Url,
}

impl HttpSource {
    pub fn new(url: &str) -> Result<Self, SourceError> {
        Ok(Self {
            http: Client::new(),
            url: Url::parse(url)?,
        })
    }
}

#[async_trait]
impl RecordSource for HttpSource {
    fn name(&self) -> &str {
        self.url.as_str()
    }

    async fn load(&self) -> Result<Vec<SourceRecord>, SourceError> {
        let response = self.http.get(self.url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status { status });
        }
        let text = response.text().await?;
        parse_document(&text)
    }
}

/// Reads the same document shape from a local file.
pub struct FileSource {
    path: PathBuf,
    name: String,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path.display().to_string();
        Self { path, name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> Result<Vec<SourceRecord>, SourceError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SourceError::Io {
                path: self.path.clone(),
                source,
            })?;
        parse_document(&text)
    }
}

/// Strategies tried in order; the first one yielding records wins.
#[derive(Default)]
pub struct RankedSources {
    sources: Vec<Box<dyn RecordSource>>,
}

impl RankedSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: impl RecordSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub async fn load_records(&self) -> Result<Vec<SourceRecord>, SourceError> {
        let mut failures = Vec::new();
        for source in &self.sources {
            match source.load().await {
                Ok(records) if !records.is_empty() => {
                    tracing::info!(
                        source = source.name(),
                        records = records.len(),
                        "loaded source records"
                    );
                    return Ok(records);
                }
                Ok(_) => {
                    tracing::warn!(source = source.name(), "source returned no records");
                    failures.push(format!("{}: {}", source.name(), SourceError::Empty));
                }
                Err(err) => {
                    tracing::warn!(source = source.name(), error = %err, "source failed");
                    failures.push(format!("{}: {err}", source.name()));
                }
            }
        }
        if failures.is_empty() {
            return Err(SourceError::Exhausted("no sources configured".to_string()));
        }
        Err(SourceError::Exhausted(failures.join("; ")))
    }
}

#[derive(Debug, Deserialize)]
struct ProductDocument {
    products: Vec<ProductRow>,
}

#[derive(Debug, Deserialize)]
struct ProductRow {
    id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    brand: Option<String>,
    #[serde(default)]
    price: f64,
    #[serde(default)]
    stock: u32,
    #[serde(default)]
    images: Vec<String>,
}

fn parse_document(text: &str) -> Result<Vec<SourceRecord>, SourceError> {
    let document: ProductDocument = serde_json::from_str(text)?;
    Ok(document
        .products
        .into_iter()
        .map(|row| SourceRecord {
            external_key: row.id.to_string(),
            title: row.title,
            category: row.category,
            payload: RecordPayload {
                description: row.description,
                brand: row.brand,
                price: row.price,
                stock: row.stock,
                images: row.images,
            },
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dummyjson_rows() {
        let records = parse_document(
            r#"{"products":[{"id":7,"title":"Phone","category":"smartphones","price":10.5,
            "stock":2,"brand":"Acme","images":["https://img.example/1.png"]}],"total":1}"#,
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].external_key, "7");
        assert_eq!(records[0].payload.brand.as_deref(), Some("Acme"));
        assert_eq!(records[0].payload.images.len(), 1);
    }

    #[test]
    fn missing_title_parses_as_blank() {
        let records = parse_document(r#"{"products":[{"id":1,"category":"x"}]}"#).unwrap();
        assert!(records[0].title.is_empty());
    }
}
