use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::AppError;

/// Orchestration strategy for the pipeline orchestrator (spec §6).
#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrchestrationKind {
    InProcess,
    Distributed,
}

fn default_orchestration() -> OrchestrationKind {
    OrchestrationKind::InProcess
}

/// Message queue driver selection (spec §6).
#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    Broker,
    ManagedQueue,
    LocalFile,
}

fn default_queue_kind() -> QueueKind {
    QueueKind::LocalFile
}

/// Blob storage driver selection.
#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

/// Vector index driver selection (spec §6).
#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VectorKind {
    Surreal,
    LocalFile,
}

fn default_vector_kind() -> VectorKind {
    VectorKind::LocalFile
}

/// Retry tunables for the message queue and handler back-off (spec §4.1, §5).
#[derive(Clone, Deserialize, Debug)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries_before_poison: u32,
    #[serde(default = "default_message_ttl")]
    pub message_ttl_secs: u64,
    #[serde(default = "default_poison_suffix")]
    pub poison_suffix: String,
    #[serde(default = "default_fetch_lock")]
    pub fetch_lock_secs: u64,
    #[serde(default = "default_poll_delay")]
    pub poll_delay_msecs: u64,
    #[serde(default = "default_fetch_batch_size")]
    pub fetch_batch_size: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries_before_poison: default_max_retries(),
            message_ttl_secs: default_message_ttl(),
            poison_suffix: default_poison_suffix(),
            fetch_lock_secs: default_fetch_lock(),
            poll_delay_msecs: default_poll_delay(),
            fetch_batch_size: default_fetch_batch_size(),
        }
    }
}

fn default_max_retries() -> u32 {
    20
}
fn default_message_ttl() -> u64 {
    3600
}
fn default_poison_suffix() -> String {
    "-poison".to_string()
}
fn default_fetch_lock() -> u64 {
    300
}
fn default_poll_delay() -> u64 {
    100
}
fn default_fetch_batch_size() -> u32 {
    3
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    #[serde(default = "default_orchestration")]
    pub orchestration: OrchestrationKind,
    #[serde(default = "default_queue_kind")]
    pub queue: QueueKind,
    #[serde(default = "default_vector_kind")]
    pub vector: VectorKind,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_generator_model")]
    pub generator_model: String,
    #[serde(default = "default_generator_max_tokens")]
    pub generator_max_tokens: u32,
    #[serde(default = "default_chunk_min_tokens")]
    pub chunk_min_tokens: usize,
    #[serde(default = "default_chunk_max_tokens")]
    pub chunk_max_tokens: usize,
    #[serde(default = "default_chunk_overlap_tokens")]
    pub chunk_overlap_tokens: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_chunk_min_tokens() -> usize {
    128
}
fn default_chunk_max_tokens() -> usize {
    512
}
fn default_chunk_overlap_tokens() -> usize {
    32
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_generator_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_generator_max_tokens() -> u32 {
    4096
}

impl AppConfig {
    /// Fail-fast validation of required wiring (spec §9 Design Note: "Dynamic container
    /// registration" → explicit builder with a `Configuration` error kind, never a runtime
    /// surprise).
    pub fn validate(&self) -> Result<(), AppError> {
        if self.openai_api_key.trim().is_empty() {
            return Err(AppError::Configuration("openai_api_key is required".into()));
        }
        if self.surrealdb_address.trim().is_empty() {
            return Err(AppError::Configuration(
                "surrealdb_address is required".into(),
            ));
        }
        if self.embedding_dimensions == 0 {
            return Err(AppError::Configuration(
                "embedding_dimensions must be non-zero".into(),
            ));
        }
        if self.chunk_min_tokens == 0 || self.chunk_min_tokens > self.chunk_max_tokens {
            return Err(AppError::Configuration(
                "chunk_min_tokens must be non-zero and <= chunk_max_tokens".into(),
            ));
        }
        if self.chunk_overlap_tokens >= self.chunk_min_tokens {
            return Err(AppError::Configuration(
                "chunk_overlap_tokens must be smaller than chunk_min_tokens".into(),
            ));
        }
        if self.retry.poison_suffix.as_bytes().len() > 60 {
            return Err(AppError::Configuration(
                "poison_suffix must be <= 60 UTF-8 bytes".into(),
            ));
        }
        if matches!(self.queue, QueueKind::LocalFile)
            && matches!(self.orchestration, OrchestrationKind::Distributed)
            && self.data_dir.trim().is_empty()
        {
            return Err(AppError::Configuration(
                "data_dir is required for the local-file queue driver".into(),
            ));
        }
        Ok(())
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    let cfg: AppConfig = config.try_deserialize()?;
    cfg.validate()
        .map_err(|err| ConfigError::Message(err.to_string()))?;
    Ok(cfg)
}

#[cfg(any(test, feature = "test-utils"))]
pub fn test_config_memory() -> AppConfig {
    AppConfig {
        openai_api_key: "test-key".into(),
        surrealdb_address: "mem://".into(),
        surrealdb_username: "test".into(),
        surrealdb_password: "test".into(),
        surrealdb_namespace: "test_ns".into(),
        surrealdb_database: "test_db".into(),
        data_dir: "/tmp/km-test-unused".into(),
        openai_base_url: default_base_url(),
        storage: StorageKind::Memory,
        orchestration: OrchestrationKind::InProcess,
        queue: QueueKind::LocalFile,
        vector: VectorKind::LocalFile,
        embedding_model: default_embedding_model(),
        embedding_dimensions: 8,
        generator_model: default_generator_model(),
        generator_max_tokens: default_generator_max_tokens(),
        chunk_min_tokens: default_chunk_min_tokens(),
        chunk_max_tokens: default_chunk_max_tokens(),
        chunk_overlap_tokens: default_chunk_overlap_tokens(),
        retry: RetryConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_blank_api_key() {
        let mut cfg = test_config_memory();
        cfg.openai_api_key = String::new();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_accepts_defaults() {
        let cfg = test_config_memory();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_oversized_poison_suffix() {
        let mut cfg = test_config_memory();
        cfg.retry.poison_suffix = "x".repeat(61);
        assert!(cfg.validate().is_err());
    }
}
