//! Search index sink
//!
//! Events are written one document per message with ids assigned by the
//! index. There is no dedup key, so a document that fails to write is
//! simply lost.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while writing to the index
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Index responded with status {0}")]
    Status(StatusCode),
}

/// A document store that accepts raw JSON bodies
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Create one document in `collection`, letting the index pick the id
    async fn create_document(&self, collection: &str, body: Vec<u8>) -> Result<(), IndexError>;
}

/// OpenSearch/Elasticsearch-compatible index reached over HTTP
pub struct OpenSearchIndex {
    base_url: String,
    client: Client,
}

impl OpenSearchIndex {
    /// Create an index client; every request is bounded by `timeout`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, IndexError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, client))
    }

    /// Use an existing HTTP client, e.g. one shared across components
    pub fn with_client(base_url: &str, client: Client) -> Self {
        OpenSearchIndex {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn document_url(&self, collection: &str) -> String {
        format!("{}/{}/_doc", self.base_url, collection)
    }
}

#[async_trait]
impl DocumentIndex for OpenSearchIndex {
    async fn create_document(&self, collection: &str, body: Vec<u8>) -> Result<(), IndexError> {
        let response = self
            .client
            .post(self.document_url(collection))
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() >= 300 {
            return Err(IndexError::Status(status));
        }
        Ok(())
    }
}
