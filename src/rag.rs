//! Retrieve-then-generate pipeline.
//!
//! [`RagPipeline::answer`] runs at most two sequential remote calls: the
//! retriever, then the chat model with the retrieved passages inlined as
//! context. Nothing is shared between requests except the immutable
//! collaborators, so one pipeline serves every concurrent query.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::chat::ArkChatClient;
use crate::config::{Backend, Config};
use crate::error::{Result, SynthesisError};
use crate::knowledge_base::KnowledgeBaseClient;
use crate::models::{ChatMessage, RetrievedDocument};
use crate::traits::{ChatModel, Retriever};
use crate::vector_db::VectorDbClient;

pub const SYSTEM_PROMPT: &str =
    "You are a helpful assistant that answers questions based on the provided context.";

const CONTEXT_SEPARATOR: &str = "\n\n";

/// A generated answer together with the passages it was grounded on.
#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    pub answer: String,
    pub documents: Vec<RetrievedDocument>,
}

pub struct RagPipeline {
    retriever: Arc<dyn Retriever>,
    chat: Arc<dyn ChatModel>,
    default_top_k: usize,
}

impl RagPipeline {
    pub fn new(retriever: Arc<dyn Retriever>, chat: Arc<dyn ChatModel>, default_top_k: usize) -> Self {
        Self {
            retriever,
            chat,
            default_top_k,
        }
    }

    pub fn retriever_name(&self) -> &str {
        self.retriever.name()
    }

    pub fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    /// Retrieval only. `top_k` of `None` uses the pipeline default.
    pub async fn retrieve(&self, query: &str, top_k: Option<usize>) -> Result<Vec<RetrievedDocument>> {
        let limit = top_k.unwrap_or(self.default_top_k);
        self.retriever.retrieve(query, limit).await
    }

    /// Retrieve passages, then ask the chat model to answer from them.
    ///
    /// A retrieval failure returns before the chat model is contacted. A
    /// generation failure keeps the retrieved documents in the error.
    pub async fn answer(
        &self,
        query: &str,
        top_k: Option<usize>,
    ) -> std::result::Result<RagAnswer, SynthesisError> {
        let documents = self
            .retrieve(query, top_k)
            .await
            .map_err(SynthesisError::Retrieval)?;

        let messages = build_messages(query, &documents);

        match self.chat.generate(&messages).await {
            Ok(answer) => {
                info!(
                    query,
                    model = self.chat.model(),
                    documents = documents.len(),
                    "answer generated"
                );
                Ok(RagAnswer { answer, documents })
            }
            Err(source) => {
                warn!(query, model = self.chat.model(), error = %source, "answer generation failed");
                Err(SynthesisError::Generation { source, documents })
            }
        }
    }
}

/// Join document contents with blank lines, in retrieval order.
pub fn build_context(documents: &[RetrievedDocument]) -> String {
    documents
        .iter()
        .map(|d| d.content.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

pub fn build_user_prompt(query: &str, context: &str) -> String {
    format!(
        "Based on the following context, please answer the question.\n\nContext:\n{}\n\nQuestion: {}\n\nAnswer:",
        context, query
    )
}

pub fn build_messages(query: &str, documents: &[RetrievedDocument]) -> Vec<ChatMessage> {
    let context = build_context(documents);
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(build_user_prompt(query, &context)),
    ]
}

/// Wire up the configured retriever backend and chat client.
pub fn build_pipeline(config: &Config) -> Result<RagPipeline> {
    let retriever: Arc<dyn Retriever> = match config.retrieval.backend {
        Backend::KnowledgeBase => Arc::new(KnowledgeBaseClient::new(&config.knowledge_base)?),
        Backend::VectorDb => Arc::new(VectorDbClient::new(&config.vector_db)?),
    };
    let default_top_k = match config.retrieval.backend {
        Backend::KnowledgeBase => config.retrieval.default_top_k,
        Backend::VectorDb => config.vector_db.top_k,
    };
    let chat: Arc<dyn ChatModel> = Arc::new(ArkChatClient::new(&config.chat)?);
    Ok(RagPipeline::new(retriever, chat, default_top_k))
}
