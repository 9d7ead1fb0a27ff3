use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::knowledge::codec;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TesseraConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub transport: String,
    pub log_level: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    /// Read-only connections the server keeps beside its single writer.
    pub read_connections: usize,
}

/// What to do with vectors whose width differs from the current service width.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LegacyVectorPolicy {
    /// Leave older-width vectors in place; they are compared only with same-width queries.
    Coexist,
    /// Re-embed unchanged text whenever the service is ready and the stored width is stale.
    Reembed,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `"ollama"` (HTTP daemon), `"local"` (in-process ONNX), or `"none"` (fallback only).
    pub provider: String,
    pub model: String,
    pub url: String,
    /// Width the configured service produces.
    pub dimensions: usize,
    /// Width of the hashing fallback.
    pub fallback_dimensions: usize,
    pub request_timeout_ms: u64,
    pub probe_timeout_ms: u64,
    pub reprobe_interval_secs: u64,
    /// Cache keys are the first `cache_key_chars` characters of the text.
    pub cache_key_chars: usize,
    pub cache_dir: String,
    pub legacy_vectors: LegacyVectorPolicy,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_limit: usize,
    /// Keyword pre-filter size for hybrid search.
    pub keyword_candidates: usize,
    pub min_similarity: f64,
    pub min_keyword_score: f64,
    /// Raw BM25 scores are divided by this and clamped to 1.
    pub keyword_score_ceiling: f64,
    pub hybrid_weight: f64,
    pub strong_similarity: f64,
    pub strong_keyword: f64,
    pub context_threshold: f64,
    pub context_boost: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub semantic_floor: f64,
    pub semantic_candidates: usize,
    pub shared_project_strength: f64,
    pub transitive_strength: f64,
    pub spatial_strength: f64,
    pub spatial_limit: usize,
    /// Manhattan distance on the canvas beyond which placements are not "near".
    pub spatial_radius: f64,
    pub max_connections: usize,
    pub shared_concepts: bool,
    pub unexpected_sample: usize,
    pub unexpected_floor: f64,
    pub refresh_debounce_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".into(),
            log_level: "info".into(),
            host: "127.0.0.1".into(),
            port: 8741,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_tessera_dir()
            .join("knowledge.db")
            .to_string_lossy()
            .into_owned();
        Self {
            db_path,
            read_connections: crate::db::store::DEFAULT_READERS,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_tessera_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "ollama".into(),
            model: "nomic-embed-text".into(),
            url: "http://localhost:11434".into(),
            dimensions: codec::CURRENT_DIMENSIONS,
            fallback_dimensions: codec::FALLBACK_DIMENSIONS,
            request_timeout_ms: 5000,
            probe_timeout_ms: 1000,
            reprobe_interval_secs: 30,
            cache_key_chars: 500,
            cache_dir,
            legacy_vectors: LegacyVectorPolicy::Coexist,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            keyword_candidates: 100,
            min_similarity: 0.3,
            min_keyword_score: 0.1,
            keyword_score_ceiling: 10.0,
            hybrid_weight: 0.6,
            strong_similarity: 0.5,
            strong_keyword: 0.3,
            context_threshold: 0.5,
            context_boost: 0.2,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            semantic_floor: 0.6,
            semantic_candidates: 10,
            shared_project_strength: 0.7,
            transitive_strength: 0.5,
            spatial_strength: 0.4,
            spatial_limit: 5,
            spatial_radius: 800.0,
            max_connections: 20,
            shared_concepts: false,
            unexpected_sample: 200,
            unexpected_floor: 0.7,
            refresh_debounce_ms: 3000,
        }
    }
}

/// Returns `~/.tessera/`
pub fn default_tessera_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tessera")
}

/// Returns the default config file path: `~/.tessera/config.toml`
pub fn default_config_path() -> PathBuf {
    default_tessera_dir().join("config.toml")
}

impl TesseraConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            TesseraConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides (TESSERA_DB, TESSERA_LOG_LEVEL, TESSERA_EMBEDDING_URL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("TESSERA_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("TESSERA_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("TESSERA_EMBEDDING_URL") {
            self.embedding.url = val;
        }
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            codec::is_supported_dimension(self.embedding.dimensions),
            "embedding.dimensions = {} is not one of {:?}",
            self.embedding.dimensions,
            codec::SUPPORTED_DIMENSIONS
        );
        anyhow::ensure!(
            codec::is_supported_dimension(self.embedding.fallback_dimensions),
            "embedding.fallback_dimensions = {} is not one of {:?}",
            self.embedding.fallback_dimensions,
            codec::SUPPORTED_DIMENSIONS
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.retrieval.hybrid_weight),
            "retrieval.hybrid_weight must be within [0, 1]"
        );
        anyhow::ensure!(
            self.retrieval.keyword_score_ceiling > 0.0,
            "retrieval.keyword_score_ceiling must be positive"
        );
        Ok(())
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = TesseraConfig::default();
        assert_eq!(config.server.transport, "stdio");
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.embedding.dimensions, 768);
        assert_eq!(config.embedding.fallback_dimensions, 512);
        assert_eq!(config.embedding.legacy_vectors, LegacyVectorPolicy::Coexist);
        assert_eq!(config.retrieval.keyword_candidates, 100);
        assert_eq!(config.discovery.max_connections, 20);
        assert!(config.storage.db_path.ends_with("knowledge.db"));
        assert_eq!(config.storage.read_connections, 4);
        config.validate().unwrap();
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[server]
log_level = "debug"

[storage]
db_path = "/tmp/test.db"

[embedding]
provider = "none"
legacy_vectors = "reembed"

[retrieval]
hybrid_weight = 0.25

[discovery]
shared_concepts = true
"#;
        let config: TesseraConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.storage.db_path, "/tmp/test.db");
        assert_eq!(config.embedding.provider, "none");
        assert_eq!(config.embedding.legacy_vectors, LegacyVectorPolicy::Reembed);
        assert_eq!(config.retrieval.hybrid_weight, 0.25);
        assert!(config.discovery.shared_concepts);
        // defaults still apply for unset fields
        assert_eq!(config.retrieval.keyword_candidates, 100);
        assert_eq!(config.discovery.unexpected_floor, 0.7);
    }

    #[test]
    fn unsupported_dimension_is_rejected() {
        let mut config = TesseraConfig::default();
        config.embedding.dimensions = 1000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = TesseraConfig::default();
        std::env::set_var("TESSERA_DB", "/tmp/override.db");
        std::env::set_var("TESSERA_LOG_LEVEL", "trace");
        std::env::set_var("TESSERA_EMBEDDING_URL", "http://10.0.0.2:11434");

        config.apply_env_overrides();

        assert_eq!(config.storage.db_path, "/tmp/override.db");
        assert_eq!(config.server.log_level, "trace");
        assert_eq!(config.embedding.url, "http://10.0.0.2:11434");

        // Clean up
        std::env::remove_var("TESSERA_DB");
        std::env::remove_var("TESSERA_LOG_LEVEL");
        std::env::remove_var("TESSERA_EMBEDDING_URL");
    }
}
