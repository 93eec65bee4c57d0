//! Vector-database retriever.
//!
//! Runs a hybrid (dense + sparse) text search against a collection index
//! using the database's built-in embedding model, and maps each hit to a
//! [`RetrievedDocument`] of the same shape the knowledge-base retriever
//! produces.
//!
//! Requests are signed with the same HMAC chain as the knowledge base, using
//! the vector database's own credential and region.
//!
//! # Response
//!
//! ```json
//! { "code": 0, "message": "success",
//!   "data": [[ { "id": 42, "score": 0.91, "fields": { "content": "...", "source": "faq" } } ]] }
//! ```
//!
//! Hits scoring below the configured threshold are dropped. A hit with a
//! missing, null or empty `id` is named `vikingdb_<i>` after its position
//! among the kept hits.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::VectorDbConfig;
use crate::error::{RagError, Result};
use crate::models::{Metadata, MetadataValue, RetrievedDocument};
use crate::signing::{OutboundRequest, Signer, SigningTime};
use crate::traits::Retriever;

pub const SEARCH_PATH: &str = "/api/index/search";

/// Prefix for positional ids given to hits that carry none.
pub const DOCUMENT_ID_PREFIX: &str = "vikingdb";

const SERVICE_LABEL: &str = "vector database";

/// Field names that hold the passage text, in order of preference.
const CONTENT_FIELDS: [&str; 2] = ["content", "text"];

#[derive(Debug, Clone, Serialize)]
pub struct IndexSearchRequest {
    pub collection_name: String,
    pub index_name: String,
    pub search: IndexSearch,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexSearch {
    pub order_by_raw: RawText,
    pub limit: usize,
    pub dense_weight: f64,
    pub embedding_model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RawText {
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct IndexSearchResponse {
    code: i64,
    #[serde(default)]
    data: Option<Vec<Vec<Hit>>>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    fields: serde_json::Map<String, Value>,
}

/// Signed client for the vector-database index search API.
pub struct VectorDbClient {
    host: String,
    scheme: String,
    collection: String,
    index: String,
    model: String,
    top_k: usize,
    score_threshold: f64,
    dense_weight: f64,
    signer: Signer,
    http: reqwest::Client,
}

impl VectorDbClient {
    pub fn new(config: &VectorDbConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            host: config.host.clone(),
            scheme: config.scheme.clone(),
            collection: config.collection.clone(),
            index: config.index.clone(),
            model: config.model.clone(),
            top_k: config.top_k,
            score_threshold: config.score_threshold,
            dense_weight: config.dense_weight,
            signer: Signer::new(config.credential()),
            http,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, SEARCH_PATH)
    }

    pub fn build_request(&self, query: &str, limit: usize) -> IndexSearchRequest {
        IndexSearchRequest {
            collection_name: self.collection.clone(),
            index_name: self.index.clone(),
            search: IndexSearch {
                order_by_raw: RawText {
                    text: query.to_string(),
                },
                limit,
                dense_weight: self.dense_weight,
                embedding_model: self.model.clone(),
            },
        }
    }

    /// Search the index. A `limit` of zero falls back to the configured top-K.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<RetrievedDocument>> {
        let limit = if limit == 0 { self.top_k } else { limit };
        let body = serde_json::to_vec(&self.build_request(query, limit))?;

        info!(
            collection = %self.collection,
            index = %self.index,
            host = %self.host,
            limit,
            query,
            "vector database search"
        );

        let signed = self.signer.sign(
            &OutboundRequest {
                method: "POST",
                path: SEARCH_PATH,
                query: "",
                host: &self.host,
                body: &body,
            },
            &SigningTime::now(),
        );

        let request = self
            .http
            .post(self.endpoint())
            .header("Accept", "application/json")
            .body(body);

        let resp = signed.apply(request).send().await.map_err(|e| {
            warn!(host = %self.host, query, error = %e, "vector database request failed");
            RagError::network(&self.host, e)
        })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| RagError::network(&self.host, e))?;
        debug!(status = status.as_u16(), body = %text, "vector database response");

        if !status.is_success() {
            warn!(host = %self.host, status = status.as_u16(), "vector database returned error status");
            return Err(RagError::RemoteRejection {
                service: SERVICE_LABEL,
                status: status.as_u16(),
                code: None,
                body: text,
            });
        }

        let docs = parse_search_response(status.as_u16(), &text, self.score_threshold)?;
        info!(query, found = docs.len(), "vector database search success");
        Ok(docs)
    }
}

#[async_trait]
impl Retriever for VectorDbClient {
    fn name(&self) -> &str {
        "vector_db"
    }

    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<RetrievedDocument>> {
        self.search(query, limit).await
    }
}

fn parse_search_response(
    status: u16,
    body: &str,
    score_threshold: f64,
) -> Result<Vec<RetrievedDocument>> {
    let resp: IndexSearchResponse = serde_json::from_str(body)?;
    if resp.code != 0 {
        return Err(RagError::RemoteRejection {
            service: SERVICE_LABEL,
            status,
            code: Some(resp.code),
            body: body.to_string(),
        });
    }

    Ok(resp
        .data
        .unwrap_or_default()
        .into_iter()
        .flatten()
        .filter(|hit| hit.score.unwrap_or(0.0) >= score_threshold)
        .enumerate()
        .map(|(index, hit)| to_document(index, hit))
        .collect())
}

fn to_document(index: usize, hit: Hit) -> RetrievedDocument {
    let id = match &hit.id {
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::String(_) | Value::Null => format!("{}_{}", DOCUMENT_ID_PREFIX, index),
        other => other.to_string(),
    };

    let content = CONTENT_FIELDS
        .iter()
        .find_map(|name| hit.fields.get(*name).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();

    let mut metadata: Metadata = hit
        .fields
        .iter()
        .filter(|(k, _)| !CONTENT_FIELDS.contains(&k.as_str()))
        .filter_map(|(k, v)| MetadataValue::from_json(v).map(|v| (k.clone(), v)))
        .collect();

    if let Some(score) = hit.score {
        metadata.insert("score".to_string(), score.into());
    }

    RetrievedDocument {
        id,
        content,
        metadata,
        score: hit.score,
    }
}
