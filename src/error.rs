//! Error taxonomy for the retrieval and synthesis pipeline.
//!
//! Every failure that can leave the core is one of the [`RagError`]
//! variants. The HTTP layer maps each variant to a status code and a
//! machine-readable error code (see [`crate::server`]).
//!
//! Messages never carry credential material. Remote bodies are kept for
//! diagnosis but truncated when displayed.

use std::fmt;

use thiserror::Error;

use crate::models::RetrievedDocument;

/// Maximum number of characters of a remote body rendered in error messages.
const BODY_PREVIEW_CHARS: usize = 500;

/// Document-management operations that have no backing implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentOperation {
    Upload,
    List,
    Delete,
}

impl DocumentOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentOperation::Upload => "upload",
            DocumentOperation::List => "listing",
            DocumentOperation::Delete => "deletion",
        }
    }
}

impl fmt::Display for DocumentOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the signing, retrieval, and chat clients.
#[derive(Debug, Error)]
pub enum RagError {
    /// A required credential or endpoint is missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A payload could not be encoded or decoded as JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The collaborator could not be reached, or the call timed out.
    #[error("network error reaching {target}: {source}")]
    Network {
        target: String,
        #[source]
        source: reqwest::Error,
    },

    /// The collaborator answered with a non-2xx status or a non-zero
    /// embedded application code.
    #[error("{service} rejected request (HTTP {status}{}): {}", code_suffix(.code), preview(.body))]
    RemoteRejection {
        service: &'static str,
        status: u16,
        code: Option<i64>,
        body: String,
    },

    /// The operation is permanently unsupported by this gateway.
    #[error("document {0} not implemented: requires knowledge-base data management APIs")]
    Unimplemented(DocumentOperation),
}

pub type Result<T> = std::result::Result<T, RagError>;

impl RagError {
    pub fn network(target: impl Into<String>, source: reqwest::Error) -> Self {
        RagError::Network {
            target: target.into(),
            source,
        }
    }

    pub fn unimplemented(op: DocumentOperation) -> Self {
        RagError::Unimplemented(op)
    }

    pub fn is_unimplemented(&self) -> bool {
        matches!(self, RagError::Unimplemented(_))
    }

    /// True when the underlying network call hit its deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RagError::Network { source, .. } if source.is_timeout())
    }
}

fn code_suffix(code: &Option<i64>) -> String {
    match code {
        Some(c) => format!(", code {}", c),
        None => String::new(),
    }
}

fn preview(body: &str) -> String {
    body.chars().take(BODY_PREVIEW_CHARS).collect()
}

/// Failure of the retrieve-then-generate flow.
///
/// Generation failures keep the documents that were already retrieved so
/// callers can report a partial result.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("document retrieval failed: {0}")]
    Retrieval(#[source] RagError),

    #[error("chat model generation failed: {source}")]
    Generation {
        #[source]
        source: RagError,
        documents: Vec<RetrievedDocument>,
    },
}

impl SynthesisError {
    /// The underlying pipeline error, whichever stage produced it.
    pub fn cause(&self) -> &RagError {
        match self {
            SynthesisError::Retrieval(e) => e,
            SynthesisError::Generation { source, .. } => source,
        }
    }

    /// Documents retrieved before the failure (empty for retrieval failures).
    pub fn documents(&self) -> &[RetrievedDocument] {
        match self {
            SynthesisError::Retrieval(_) => &[],
            SynthesisError::Generation { documents, .. } => documents,
        }
    }
}
