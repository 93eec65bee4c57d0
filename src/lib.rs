//! # RAG Gateway
//!
//! A retrieval-augmented generation gateway in front of a hosted knowledge
//! base. Queries are answered with the most relevant passages and, on
//! request, a chat-model answer grounded on those passages.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌────────────────────┐
//! │   HTTP   │──▶│ RagPipeline │──▶│ Retriever (signed) │──▶ knowledge base
//! │  (axum)  │   │             │   │ KB / vector DB     │    or vector DB
//! └──────────┘   │             │   └────────────────────┘
//!                │             │   ┌────────────────────┐
//!                │             │──▶│ ChatModel          │──▶ chat completions
//!                └─────────────┘   └────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Defaults, TOML file, environment overlay, validation |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Documents, chat messages, API bodies |
//! | [`signing`] | Canonical request and HMAC-SHA256 request signing |
//! | [`traits`] | `Retriever` and `ChatModel` seams |
//! | [`knowledge_base`] | Knowledge-base search client |
//! | [`vector_db`] | Vector-database search client |
//! | [`chat`] | Chat-completion client |
//! | [`rag`] | Retrieve-then-generate pipeline |
//! | [`server`] | HTTP API |
//! | [`logging`] | Tracing subscriber setup |

pub mod chat;
pub mod config;
pub mod error;
pub mod knowledge_base;
pub mod logging;
pub mod models;
pub mod rag;
pub mod server;
pub mod signing;
pub mod traits;
pub mod vector_db;
