//! Seams between the pipeline and its remote collaborators.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │               RagPipeline                │
//! │   ┌──────────────┐    ┌──────────────┐   │
//! │   │  Retriever   │──▶│  ChatModel   │   │
//! │   │ KB / VectorDB│    │ chat/compl.  │   │
//! │   └──────────────┘    └──────────────┘   │
//! └──────────────────────────────────────────┘
//! ```
//!
//! Both traits are object-safe so the server can hold them as
//! `Arc<dyn ...>` and tests can swap in doubles.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ChatMessage, RetrievedDocument};

/// A source of passages for a free-text query.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use rag_gateway::error::Result;
/// use rag_gateway::models::RetrievedDocument;
/// use rag_gateway::traits::Retriever;
///
/// pub struct FixedRetriever;
///
/// #[async_trait]
/// impl Retriever for FixedRetriever {
///     fn name(&self) -> &str { "fixed" }
///
///     async fn retrieve(&self, _query: &str, _limit: usize) -> Result<Vec<RetrievedDocument>> {
///         Ok(vec![RetrievedDocument::new("fixed_0", "Refunds are accepted within 30 days.")])
///     }
/// }
/// ```
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Short label used in logs (e.g. `"knowledge_base"`).
    fn name(&self) -> &str;

    /// Return at most `limit` documents relevant to `query`.
    ///
    /// Performs exactly one outbound call; failures are never retried.
    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<RetrievedDocument>>;
}

/// A hosted chat-completion model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier, for logs.
    fn model(&self) -> &str;

    /// Generate a reply to an ordered list of role-tagged messages.
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String>;
}
