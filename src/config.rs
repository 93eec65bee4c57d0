//! Configuration loading and validation.
//!
//! Values come from three layers, later layers winning:
//!
//! 1. Built-in defaults.
//! 2. An optional TOML file (`--config`, default `./config/rag.toml`).
//! 3. Environment variables (after `.env` has been loaded by the binary).
//!
//! The result is validated once at startup. A missing credential is a
//! [`RagError::Configuration`] and the process refuses to start.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8080"
//!
//! [retrieval]
//! backend = "knowledge_base"   # or "vector_db"
//! default_top_k = 10
//!
//! [knowledge_base]
//! host = "api-knowledgebase.mlp.cn-hongkong.bytepluses.com"
//! account_id = "2100000000"
//! region = "cn-hongkong"
//! project = "default"
//! collection = "support_docs"
//!
//! [chat]
//! base_url = "https://ark.ap-southeast.bytepluses.com/api/v3"
//! model = "seed-1-6-250615"
//! ```
//!
//! Secrets (`RAGKB_SECRET_KEY`, `VIKINGDB_SK`, `ARK_API_KEY`) are normally
//! supplied through the environment rather than the file.

use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::error::{RagError, Result};
use crate::signing::Credential;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub knowledge_base: KnowledgeBaseConfig,
    #[serde(default)]
    pub vector_db: VectorDbConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

/// Which retriever serves `POST /query`.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    KnowledgeBase,
    VectorDb,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::KnowledgeBase => "knowledge_base",
            Backend::VectorDb => "vector_db",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s.trim() {
            "knowledge_base" | "ragkb" => Ok(Backend::KnowledgeBase),
            "vector_db" | "vikingdb" => Ok(Backend::VectorDb),
            other => Err(RagError::Configuration(format!(
                "unknown retrieval backend '{}': must be knowledge_base or vector_db",
                other
            ))),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            default_top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    10
}

fn default_scheme() -> String {
    "https".to_string()
}
fn default_service() -> String {
    "air".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Deserialize, Clone)]
pub struct KnowledgeBaseConfig {
    #[serde(default = "default_kb_host")]
    pub host: String,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_kb_region")]
    pub region: String,
    #[serde(default = "default_service")]
    pub service: String,
    #[serde(default = "default_project")]
    pub project: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_kb_dense_weight")]
    pub dense_weight: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            host: default_kb_host(),
            scheme: default_scheme(),
            account_id: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            region: default_kb_region(),
            service: default_service(),
            project: default_project(),
            collection: default_collection(),
            dense_weight: default_kb_dense_weight(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_kb_host() -> String {
    "api-knowledgebase.mlp.cn-hongkong.bytepluses.com".to_string()
}
fn default_kb_region() -> String {
    "cn-hongkong".to_string()
}
fn default_project() -> String {
    "default".to_string()
}
fn default_collection() -> String {
    "test".to_string()
}
fn default_kb_dense_weight() -> f64 {
    0.5
}

impl KnowledgeBaseConfig {
    pub fn credential(&self) -> Credential {
        Credential::new(
            &self.account_id,
            &self.access_key,
            &self.secret_key,
            &self.region,
            &self.service,
        )
    }
}

impl fmt::Debug for KnowledgeBaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KnowledgeBaseConfig")
            .field("host", &self.host)
            .field("scheme", &self.scheme)
            .field("account_id", &self.account_id)
            .field("access_key", &self.access_key)
            .field("secret_key", &redact(&self.secret_key))
            .field("region", &self.region)
            .field("service", &self.service)
            .field("project", &self.project)
            .field("collection", &self.collection)
            .field("dense_weight", &self.dense_weight)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Deserialize, Clone)]
pub struct VectorDbConfig {
    #[serde(default = "default_vdb_host")]
    pub host: String,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_vdb_region")]
    pub region: String,
    #[serde(default = "default_service")]
    pub service: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_vdb_collection")]
    pub collection: String,
    #[serde(default = "default_vdb_index")]
    pub index: String,
    #[serde(default = "default_vdb_model")]
    pub model: String,
    #[serde(default = "default_vdb_top_k")]
    pub top_k: usize,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,
    #[serde(default = "default_vdb_dense_weight")]
    pub dense_weight: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorDbConfig {
    fn default() -> Self {
        Self {
            host: default_vdb_host(),
            scheme: default_scheme(),
            region: default_vdb_region(),
            service: default_service(),
            access_key: String::new(),
            secret_key: String::new(),
            collection: default_vdb_collection(),
            index: default_vdb_index(),
            model: default_vdb_model(),
            top_k: default_vdb_top_k(),
            score_threshold: default_score_threshold(),
            dense_weight: default_vdb_dense_weight(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_vdb_host() -> String {
    "vikingdb.volces.com".to_string()
}
fn default_vdb_region() -> String {
    "cn-beijing".to_string()
}
fn default_vdb_collection() -> String {
    "rag_collection".to_string()
}
fn default_vdb_index() -> String {
    "rag_index".to_string()
}
fn default_vdb_model() -> String {
    "bge-m3".to_string()
}
fn default_vdb_top_k() -> usize {
    5
}
fn default_score_threshold() -> f64 {
    0.7
}
fn default_vdb_dense_weight() -> f64 {
    0.4
}

impl VectorDbConfig {
    /// The vector database has no account header; the account id is empty.
    pub fn credential(&self) -> Credential {
        Credential::new(
            "",
            &self.access_key,
            &self.secret_key,
            &self.region,
            &self.service,
        )
    }
}

impl fmt::Debug for VectorDbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorDbConfig")
            .field("host", &self.host)
            .field("scheme", &self.scheme)
            .field("region", &self.region)
            .field("service", &self.service)
            .field("access_key", &self.access_key)
            .field("secret_key", &redact(&self.secret_key))
            .field("collection", &self.collection)
            .field("index", &self.index)
            .field("model", &self.model)
            .field("top_k", &self.top_k)
            .field("score_threshold", &self.score_threshold)
            .field("dense_weight", &self.dense_weight)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_chat_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_chat_base_url(),
            model: default_chat_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_chat_base_url() -> String {
    "https://ark.ap-southeast.bytepluses.com/api/v3".to_string()
}
fn default_chat_model() -> String {
    "seed-1-6-250615".to_string()
}

impl fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

impl Config {
    /// Parse a TOML document without applying the environment or validating.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| RagError::Configuration(format!("failed to parse config file: {}", e)))
    }

    /// Overlay values from an environment lookup.
    ///
    /// Empty values are treated as unset. Numeric variables that fail to
    /// parse are rejected rather than silently ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("RAG_BIND") {
            self.server.bind = v;
        } else if let Some(port) = get("PORT") {
            let port: u16 = parse_env("PORT", &port)?;
            self.server.bind = format!("0.0.0.0:{}", port);
        }
        if let Some(v) = get("RAG_BACKEND") {
            self.retrieval.backend = Backend::parse(&v)?;
        }

        let kb = &mut self.knowledge_base;
        set_string(&mut kb.host, get("RAGKB_DOMAIN"));
        set_string(&mut kb.scheme, get("RAGKB_SCHEME"));
        set_string(&mut kb.account_id, get("RAGKB_ACCOUNT_ID"));
        set_string(&mut kb.access_key, get("RAGKB_ACCESS_KEY"));
        set_string(&mut kb.secret_key, get("RAGKB_SECRET_KEY"));
        set_string(&mut kb.region, get("RAGKB_REGION"));
        set_string(&mut kb.project, get("RAGKB_PROJECT"));
        set_string(&mut kb.collection, get("RAGKB_COLLECTION"));

        let vdb = &mut self.vector_db;
        set_string(&mut vdb.host, get("VIKINGDB_HOST"));
        set_string(&mut vdb.scheme, get("VIKINGDB_SCHEME"));
        set_string(&mut vdb.region, get("VIKINGDB_REGION"));
        set_string(&mut vdb.access_key, get("VIKINGDB_AK"));
        set_string(&mut vdb.secret_key, get("VIKINGDB_SK"));
        set_string(&mut vdb.collection, get("VIKINGDB_COLLECTION"));
        set_string(&mut vdb.index, get("VIKINGDB_INDEX"));
        set_string(&mut vdb.model, get("VIKINGDB_MODEL"));
        if let Some(v) = get("VIKINGDB_TOP_K") {
            vdb.top_k = parse_env("VIKINGDB_TOP_K", &v)?;
        }
        if let Some(v) = get("VIKINGDB_SCORE_THRESHOLD") {
            vdb.score_threshold = parse_env("VIKINGDB_SCORE_THRESHOLD", &v)?;
        }

        let chat = &mut self.chat;
        set_string(&mut chat.api_key, get("ARK_API_KEY"));
        set_string(&mut chat.base_url, get("ARK_BASE_URL"));
        set_string(&mut chat.model, get("ARK_CHAT_MODEL"));

        Ok(())
    }

    /// Reject configurations the gateway cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.retrieval.default_top_k == 0 {
            return Err(RagError::Configuration(
                "retrieval.default_top_k must be >= 1".to_string(),
            ));
        }

        match self.retrieval.backend {
            Backend::KnowledgeBase => {
                let kb = &self.knowledge_base;
                require("RAGKB_ACCOUNT_ID", &kb.account_id)?;
                require("RAGKB_ACCESS_KEY", &kb.access_key)?;
                require("RAGKB_SECRET_KEY", &kb.secret_key)?;
                require("RAGKB_REGION", &kb.region)?;
                require("RAGKB_PROJECT", &kb.project)?;
                require("RAGKB_COLLECTION", &kb.collection)?;
                require("RAGKB_DOMAIN", &kb.host)?;
                require("knowledge_base.service", &kb.service)?;
                check_scheme("knowledge_base.scheme", &kb.scheme)?;
                check_weight("knowledge_base.dense_weight", kb.dense_weight)?;
                check_timeout("knowledge_base.timeout_secs", kb.timeout_secs)?;
            }
            Backend::VectorDb => {
                let vdb = &self.vector_db;
                require("VIKINGDB_AK", &vdb.access_key)?;
                require("VIKINGDB_SK", &vdb.secret_key)?;
                require("VIKINGDB_REGION", &vdb.region)?;
                require("VIKINGDB_COLLECTION", &vdb.collection)?;
                require("VIKINGDB_INDEX", &vdb.index)?;
                require("VIKINGDB_MODEL", &vdb.model)?;
                require("VIKINGDB_HOST", &vdb.host)?;
                require("vector_db.service", &vdb.service)?;
                check_scheme("vector_db.scheme", &vdb.scheme)?;
                check_weight("vector_db.dense_weight", vdb.dense_weight)?;
                check_timeout("vector_db.timeout_secs", vdb.timeout_secs)?;
                if vdb.top_k == 0 {
                    return Err(RagError::Configuration(
                        "vector_db.top_k must be >= 1".to_string(),
                    ));
                }
            }
        }

        require("ARK_API_KEY", &self.chat.api_key)?;
        require("ARK_BASE_URL", &self.chat.base_url)?;
        require("ARK_CHAT_MODEL", &self.chat.model)?;
        check_timeout("chat.timeout_secs", self.chat.timeout_secs)?;

        Ok(())
    }
}

fn set_string(target: &mut String, value: Option<String>) {
    if let Some(v) = value {
        *target = v.trim().to_string();
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        RagError::Configuration(format!("{} has an invalid value: '{}'", key, value))
    })
}

fn require(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(RagError::Configuration(format!("{} is required", name)));
    }
    Ok(())
}

fn check_scheme(name: &str, scheme: &str) -> Result<()> {
    match scheme {
        "https" | "http" => Ok(()),
        other => Err(RagError::Configuration(format!(
            "{} must be http or https, got '{}'",
            name, other
        ))),
    }
}

fn check_weight(name: &str, weight: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&weight) {
        return Err(RagError::Configuration(format!(
            "{} must be in [0.0, 1.0]",
            name
        )));
    }
    Ok(())
}

fn check_timeout(name: &str, secs: u64) -> Result<()> {
    if secs == 0 {
        return Err(RagError::Configuration(format!("{} must be > 0", name)));
    }
    Ok(())
}

/// Load the configuration: file (if present), then process environment,
/// then validation.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RagError::Configuration(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Config::from_toml(&content)?
    } else {
        Config::default()
    };

    config.apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}
