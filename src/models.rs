//! Core data models that flow through the retrieval pipeline.
//!
//! These are the uniform shapes that every retriever backend produces and
//! that the HTTP layer serializes back to API consumers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A scalar metadata value attached to a retrieved document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::String(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::String(s)
    }
}

impl From<f64> for MetadataValue {
    fn from(n: f64) -> Self {
        MetadataValue::Number(n)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

impl MetadataValue {
    /// Convert a JSON scalar into a metadata value. Arrays, objects and
    /// `null` have no scalar representation and yield `None`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(MetadataValue::Bool(*b)),
            serde_json::Value::Number(n) => n.as_f64().map(MetadataValue::Number),
            serde_json::Value::String(s) => Some(MetadataValue::String(s.clone())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Ordered metadata mapping for a retrieved document.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A passage returned by a retriever for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl RetrievedDocument {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: Metadata::new(),
            score: None,
        }
    }
}

/// Role of a chat message sent to the completion model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// One role-tagged message in a chat exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Body of `POST /query`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub rag: Option<bool>,
}

/// Response of `POST /query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub documents: Vec<RetrievedDocument>,
    pub count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

impl QueryResponse {
    pub fn new(documents: Vec<RetrievedDocument>, answer: Option<String>) -> Self {
        Self {
            count: documents.len(),
            documents,
            answer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_value_from_json_scalars() {
        assert_eq!(
            MetadataValue::from_json(&json!("a")),
            Some(MetadataValue::String("a".into()))
        );
        assert_eq!(
            MetadataValue::from_json(&json!(0.75)),
            Some(MetadataValue::Number(0.75))
        );
        assert_eq!(
            MetadataValue::from_json(&json!(true)),
            Some(MetadataValue::Bool(true))
        );
        assert_eq!(MetadataValue::from_json(&json!(null)), None);
        assert_eq!(MetadataValue::from_json(&json!([1, 2])), None);
    }

    #[test]
    fn test_document_serialization_shape() {
        let mut doc = RetrievedDocument::new("ragkb_0", "Refunds within 30 days.");
        doc.metadata.insert("title".into(), "Policy".into());
        doc.metadata.insert("score".into(), 0.9.into());
        doc.score = Some(0.9);

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "ragkb_0",
                "content": "Refunds within 30 days.",
                "metadata": { "score": 0.9, "title": "Policy" },
                "score": 0.9
            })
        );
    }

    #[test]
    fn test_document_without_score_omits_field() {
        let doc = RetrievedDocument::new("x", "y");
        let value = serde_json::to_value(&doc).unwrap();
        assert!(value.get("score").is_none());
        assert!(value.get("metadata").is_none());
    }

    #[test]
    fn test_chat_message_roles_lowercase() {
        let value = serde_json::to_value(ChatMessage::system("hi")).unwrap();
        assert_eq!(value, json!({ "role": "system", "content": "hi" }));
    }

    #[test]
    fn test_query_response_counts_documents() {
        let resp = QueryResponse::new(
            vec![RetrievedDocument::new("a", "1"), RetrievedDocument::new("b", "2")],
            None,
        );
        assert_eq!(resp.count, 2);
        let value = serde_json::to_value(&resp).unwrap();
        assert!(value.get("answer").is_none());
    }
}
