//! Knowledge-base search retriever.
//!
//! Queries the remote knowledge-base `search_knowledge` API and maps each
//! hit to a [`RetrievedDocument`]. Requests are authenticated with the
//! HMAC-SHA256 scheme in [`crate::signing`]; the account identifier travels
//! in the `V-Account-Id` header.
//!
//! # Request
//!
//! `POST {scheme}://{host}/api/knowledge/collection/search_knowledge` with a
//! [`SearchQuery`] body. Pre- and post-processing flags are fixed defaults.
//!
//! # Response
//!
//! ```json
//! { "code": 0, "data": { "result_list": [ { "content": "...", "doc_info": { ... } } ] } }
//! ```
//!
//! A non-2xx status or a non-zero `code` fails the whole call with
//! [`RagError::RemoteRejection`]; no documents are returned in that case.
//!
//! # Document mapping
//!
//! | Result field | Document |
//! |--------------|----------|
//! | `content` | `content` |
//! | position `i` | `id = "ragkb_<i>"` |
//! | `doc_info.doc_name` | `metadata.doc_name` |
//! | `doc_info.title` | `metadata.title` |
//! | `chunk_title` | `metadata.chunk_title` |
//! | `original_question` | `metadata.original_question` (when non-empty) |
//! | `chunk_attachment[0].link` | `metadata.attachment_link` (when non-empty) |
//! | `score` | `metadata.score` and `score` (when > 0) |

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::KnowledgeBaseConfig;
use crate::error::{RagError, Result};
use crate::models::{Metadata, RetrievedDocument};
use crate::signing::{OutboundRequest, Signer, SigningTime};
use crate::traits::Retriever;

/// Path of the search endpoint.
pub const SEARCH_PATH: &str = "/api/knowledge/collection/search_knowledge";

/// Prefix of the synthetic document identifiers.
pub const DOCUMENT_ID_PREFIX: &str = "ragkb";

const SERVICE_LABEL: &str = "knowledge base";

// ============ Wire types ============

/// Search request body.
#[derive(Debug, Clone, Serialize)]
pub struct SearchQuery {
    pub project: String,
    pub name: String,
    pub query: String,
    pub limit: usize,
    pub pre_processing: PreProcessing,
    pub dense_weight: f64,
    pub post_processing: PostProcessing,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreProcessing {
    pub need_instruction: bool,
    pub rewrite: bool,
    pub return_token_usage: bool,
    pub messages: Vec<SearchMessage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostProcessing {
    pub get_attachment_link: bool,
    pub chunk_group: bool,
    pub rerank_only_chunk: bool,
    pub rerank_switch: bool,
    pub chunk_diffusion_count: u32,
}

impl SearchQuery {
    pub fn new(
        project: &str,
        collection: &str,
        query: &str,
        limit: usize,
        dense_weight: f64,
    ) -> Self {
        Self {
            project: project.to_string(),
            name: collection.to_string(),
            query: query.to_string(),
            limit,
            pre_processing: PreProcessing {
                need_instruction: true,
                rewrite: false,
                return_token_usage: true,
                messages: vec![
                    SearchMessage {
                        role: "system",
                        content: String::new(),
                    },
                    SearchMessage {
                        role: "user",
                        content: query.to_string(),
                    },
                ],
            },
            dense_weight,
            post_processing: PostProcessing {
                get_attachment_link: true,
                chunk_group: true,
                rerank_only_chunk: false,
                rerank_switch: false,
                chunk_diffusion_count: 0,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    code: i64,
    #[serde(default)]
    data: Option<SearchData>,
}

#[derive(Debug, Deserialize, Default)]
struct SearchData {
    #[serde(default)]
    result_list: Option<Vec<KnowledgePoint>>,
}

#[derive(Debug, Deserialize, Default)]
struct KnowledgePoint {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    original_question: Option<String>,
    #[serde(default)]
    chunk_title: Option<String>,
    #[serde(default)]
    doc_info: Option<DocInfo>,
    #[serde(default)]
    chunk_attachment: Option<Vec<ChunkAttachment>>,
    #[serde(default)]
    score: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct DocInfo {
    #[serde(default)]
    doc_name: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkAttachment {
    #[serde(default)]
    link: Option<String>,
}

// ============ Client ============

/// Signed client for the knowledge-base search API.
///
/// Holds only immutable state, so one instance is shared by every
/// concurrently handled query.
pub struct KnowledgeBaseClient {
    host: String,
    scheme: String,
    project: String,
    collection: String,
    dense_weight: f64,
    signer: Signer,
    http: reqwest::Client,
}

impl KnowledgeBaseClient {
    pub fn new(config: &KnowledgeBaseConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            host: config.host.clone(),
            scheme: config.scheme.clone(),
            project: config.project.clone(),
            collection: config.collection.clone(),
            dense_weight: config.dense_weight,
            signer: Signer::new(config.credential()),
            http,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, SEARCH_PATH)
    }

    pub fn build_query(&self, query: &str, limit: usize) -> SearchQuery {
        SearchQuery::new(
            &self.project,
            &self.collection,
            query,
            limit,
            self.dense_weight,
        )
    }

    /// Run one signed search and map the results.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<RetrievedDocument>> {
        let payload = self.build_query(query, limit);
        let body = serde_json::to_vec(&payload)?;

        info!(
            project = %self.project,
            collection = %self.collection,
            host = %self.host,
            limit,
            query,
            "knowledge base search"
        );

        let time = SigningTime::now();
        let signed = self.signer.sign(
            &OutboundRequest {
                method: "POST",
                path: SEARCH_PATH,
                query: "",
                host: &self.host,
                body: &body,
            },
            &time,
        );

        let request = self
            .http
            .post(self.endpoint())
            .header("Accept", "application/json")
            .body(body);

        let resp = signed.apply(request).send().await.map_err(|e| {
            warn!(host = %self.host, query, error = %e, "knowledge base request failed");
            RagError::network(&self.host, e)
        })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| RagError::network(&self.host, e))?;

        debug!(status = status.as_u16(), body = %text, "knowledge base response");

        if !status.is_success() {
            warn!(
                host = %self.host,
                query,
                status = status.as_u16(),
                "knowledge base returned error status"
            );
            return Err(RagError::RemoteRejection {
                service: SERVICE_LABEL,
                status: status.as_u16(),
                code: None,
                body: text,
            });
        }

        let docs = parse_search_response(status.as_u16(), &text).inspect_err(|e| {
            warn!(host = %self.host, query, error = %e, "knowledge base search failed");
        })?;

        info!(query, found = docs.len(), "knowledge base search success");
        Ok(docs)
    }
}

#[async_trait]
impl Retriever for KnowledgeBaseClient {
    fn name(&self) -> &str {
        "knowledge_base"
    }

    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<RetrievedDocument>> {
        self.search(query, limit).await
    }
}

// ============ Response mapping ============

/// Parse a search response body received with HTTP `status`.
fn parse_search_response(status: u16, body: &str) -> Result<Vec<RetrievedDocument>> {
    let resp: SearchResponse = serde_json::from_str(body)?;

    if resp.code != 0 {
        return Err(RagError::RemoteRejection {
            service: SERVICE_LABEL,
            status,
            code: Some(resp.code),
            body: body.to_string(),
        });
    }

    let points = resp
        .data
        .and_then(|d| d.result_list)
        .unwrap_or_default();

    Ok(points
        .into_iter()
        .enumerate()
        .map(|(i, point)| to_document(i, point))
        .collect())
}

fn to_document(index: usize, point: KnowledgePoint) -> RetrievedDocument {
    let doc_info = point.doc_info.unwrap_or_default();

    let mut metadata = Metadata::new();
    metadata.insert(
        "doc_name".to_string(),
        doc_info.doc_name.unwrap_or_default().into(),
    );
    metadata.insert("title".to_string(), doc_info.title.unwrap_or_default().into());
    metadata.insert(
        "chunk_title".to_string(),
        point.chunk_title.unwrap_or_default().into(),
    );

    if let Some(question) = point.original_question.filter(|q| !q.is_empty()) {
        metadata.insert("original_question".to_string(), question.into());
    }

    let link = point
        .chunk_attachment
        .unwrap_or_default()
        .into_iter()
        .filter_map(|a| a.link)
        .find(|l| !l.is_empty());
    if let Some(link) = link {
        metadata.insert("attachment_link".to_string(), link.into());
    }

    let score = point.score.filter(|s| *s > 0.0);
    if let Some(s) = score {
        metadata.insert("score".to_string(), s.into());
    }

    RetrievedDocument {
        id: format!("{}_{}", DOCUMENT_ID_PREFIX, index),
        content: point.content.unwrap_or_default(),
        metadata,
        score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetadataValue;
    use serde_json::json;

    const REFUND_BODY: &str = r#"{"project":"default","name":"test","query":"what is the refund policy","limit":10,"pre_processing":{"need_instruction":true,"rewrite":false,"return_token_usage":true,"messages":[{"role":"system","content":""},{"role":"user","content":"what is the refund policy"}]},"dense_weight":0.5,"post_processing":{"get_attachment_link":true,"chunk_group":true,"rerank_only_chunk":false,"rerank_switch":false,"chunk_diffusion_count":0}}"#;

    fn two_results() -> serde_json::Value {
        json!({
            "code": 0,
            "message": "success",
            "data": {
                "result_list": [
                    {
                        "content": "Refunds are accepted within 30 days of purchase.",
                        "original_question": "How do refunds work?",
                        "chunk_title": "Refunds",
                        "doc_info": { "doc_name": "policy.pdf", "title": "Store Policy" },
                        "chunk_attachment": [{ "link": "https://cdn.example.com/policy.pdf" }],
                        "score": 0.87
                    },
                    {
                        "content": "Opened software cannot be returned.",
                        "chunk_title": "Exceptions",
                        "doc_info": { "doc_name": "policy.pdf", "title": "Store Policy" },
                        "score": 0
                    }
                ]
            }
        })
    }

    #[test]
    fn test_search_query_wire_format() {
        let q = SearchQuery::new("default", "test", "what is the refund policy", 10, 0.5);
        assert_eq!(serde_json::to_string(&q).unwrap(), REFUND_BODY);
    }

    #[test]
    fn test_parse_maps_two_results() {
        let docs = parse_search_response(200, &two_results().to_string()).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "ragkb_0");
        assert_eq!(docs[1].id, "ragkb_1");
        assert_eq!(
            docs[0].content,
            "Refunds are accepted within 30 days of purchase."
        );
    }

    #[test]
    fn test_every_field_appears_exactly_once() {
        let docs = parse_search_response(200, &two_results().to_string()).unwrap();
        let first = &docs[0];

        let expected: Vec<(&str, MetadataValue)> = vec![
            ("attachment_link", "https://cdn.example.com/policy.pdf".into()),
            ("chunk_title", "Refunds".into()),
            ("doc_name", "policy.pdf".into()),
            ("original_question", "How do refunds work?".into()),
            ("score", 0.87.into()),
            ("title", "Store Policy".into()),
        ];
        let actual: Vec<(&str, MetadataValue)> = first
            .metadata
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();
        assert_eq!(actual, expected);
        assert_eq!(first.score, Some(0.87));

        // Content lives in `content`, not duplicated into metadata.
        assert!(first
            .metadata
            .values()
            .all(|v| v.as_str() != Some(first.content.as_str())));
    }

    #[test]
    fn test_zero_score_and_missing_question_omitted() {
        let docs = parse_search_response(200, &two_results().to_string()).unwrap();
        let second = &docs[1];
        assert!(!second.metadata.contains_key("score"));
        assert!(!second.metadata.contains_key("original_question"));
        assert!(!second.metadata.contains_key("attachment_link"));
        assert_eq!(second.score, None);
        assert_eq!(second.metadata.len(), 3);
    }

    #[test]
    fn test_nonzero_code_is_rejection() {
        let body = json!({ "code": 1000002, "message": "collection not found" }).to_string();
        let err = parse_search_response(200, &body).unwrap_err();
        match err {
            RagError::RemoteRejection {
                status, code, body, ..
            } => {
                assert_eq!(status, 200);
                assert_eq!(code, Some(1000002));
                assert!(body.contains("collection not found"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_json_is_serialization_error() {
        let err = parse_search_response(200, "<html>gateway</html>").unwrap_err();
        assert!(matches!(err, RagError::Serialization(_)));
    }

    #[test]
    fn test_empty_or_null_results() {
        let docs = parse_search_response(200, r#"{"code":0,"data":{"result_list":null}}"#).unwrap();
        assert!(docs.is_empty());
        let docs = parse_search_response(200, r#"{"code":0}"#).unwrap();
        assert!(docs.is_empty());
    }

    #[test]
    fn test_null_fields_tolerated() {
        let body = r#"{"code":0,"data":{"result_list":[{"content":"x","doc_info":null,"chunk_title":null,"original_question":null}]}}"#;
        let docs = parse_search_response(200, body).unwrap();
        assert_eq!(docs[0].metadata["doc_name"], MetadataValue::String(String::new()));
        assert_eq!(docs[0].metadata.len(), 3);
    }

    #[test]
    fn test_endpoint_uses_scheme_and_host() {
        let cfg = KnowledgeBaseConfig {
            scheme: "http".to_string(),
            host: "127.0.0.1:9000".to_string(),
            ..Default::default()
        };
        let client = KnowledgeBaseClient::new(&cfg).unwrap();
        assert_eq!(
            client.endpoint(),
            "http://127.0.0.1:9000/api/knowledge/collection/search_knowledge"
        );
        let q = client.build_query("hello", 3);
        assert_eq!(q.name, "test");
        assert_eq!(q.limit, 3);
    }
}
