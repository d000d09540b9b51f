//! Configuration for the ingestion pipeline, graph sinks and retrieval
//!
//! Loads configuration from config.yml file

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const CONFIG_FILE: &str = "config.yml";
pub const DEFAULT_MIN_CHUNK_SIZE: usize = 300;
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 1500;
pub const DEFAULT_FALLBACK_WINDOW: usize = 1000;
pub const DEFAULT_OUTCOME_TOP_N: usize = 2;
pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_CONTEXT_MAX_CHUNKS: usize = 15;

/// Main configuration struct
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub neo4j: Neo4jConfig,
    pub mysql: MySqlConfig,
    pub segmentation: SegmentationConfig,
    pub extraction: ExtractionConfig,
    pub loader: LoaderConfig,
    pub retrieval: RetrievalConfig,
    pub ingestion: IngestionConfig,
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MySqlConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "localhost".to_string(),
            port: 3306,
            database: "transcript_graph".to_string(),
            user: "transcript_graph".to_string(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub fallback_window: usize,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            min_chunk_size: DEFAULT_MIN_CHUNK_SIZE,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            fallback_window: DEFAULT_FALLBACK_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// `heuristic` or `openai`
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_input_chars: usize,
    pub outcome_top_n: usize,
    pub retry: RetryConfig,
    pub circuit: CircuitConfig,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            provider: "heuristic".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: 2000,
            max_input_chars: 12_000,
            outcome_top_n: DEFAULT_OUTCOME_TOP_N,
            retry: RetryConfig::default(),
            circuit: CircuitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: 3,
            retry_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_limit: usize,
    pub context_max_chunks: usize,
    pub timeline_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            context_max_chunks: DEFAULT_CONTEXT_MAX_CHUNKS,
            timeline_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    pub input_dir: PathBuf,
    pub state_file: PathBuf,
    pub lock_file: PathBuf,
    pub poll_interval_secs: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("data/sources"),
            state_file: PathBuf::from("data/ingestion_state.json"),
            lock_file: PathBuf::from("data/ingest.lock"),
            poll_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub enabled: bool,
    /// `local` or `openai`
    pub provider: String,
    pub model: String,
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "local".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimension: 256,
        }
    }
}

impl Config {
    /// Load configuration from config.yml or use defaults
    /// Environment variables take precedence over config.yml values
    pub fn new() -> Self {
        Self::load_from_file(CONFIG_FILE)
            .or_else(|_| Self::load_from_file(Path::new("..").join(CONFIG_FILE)))
            .unwrap_or_else(|_| {
                Self::load_dotenv();
                let mut config = Self::default();
                config.apply_env();
                config
            })
    }

    /// Load .env file into environment variables using dotenvy
    fn load_dotenv() {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_filename("../.env");
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_dotenv();

        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse, resolve and validate a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut config: Config = serde_yaml::from_str(content)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Resolve `${VAR}` placeholders and fall back to well-known variables.
    fn apply_env(&mut self) {
        self.neo4j.uri = resolve_env_string(&self.neo4j.uri, "NEO4J_URI");
        self.neo4j.user = resolve_env_string(&self.neo4j.user, "NEO4J_USER");
        self.neo4j.password = resolve_env_string(&self.neo4j.password, "NEO4J_PASSWORD");
        self.mysql.host = resolve_env_string(&self.mysql.host, "MYSQL_HOST");
        self.mysql.database = resolve_env_string(&self.mysql.database, "MYSQL_DATABASE");
        self.mysql.user = resolve_env_string(&self.mysql.user, "MYSQL_USER");
        self.mysql.password = resolve_env_string(&self.mysql.password, "MYSQL_PASSWORD");
        if let Some(port) = std::env::var("MYSQL_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
        {
            self.mysql.port = port;
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let seg = &self.segmentation;
        if seg.max_chunk_size <= seg.min_chunk_size {
            return Err(Error::ConfigError(format!(
                "segmentation.max_chunk_size ({}) must be greater than min_chunk_size ({})",
                seg.max_chunk_size, seg.min_chunk_size
            )));
        }
        if seg.fallback_window == 0 {
            return Err(Error::ConfigError(
                "segmentation.fallback_window must be > 0".to_string(),
            ));
        }
        if self.loader.batch_size == 0 {
            return Err(Error::ConfigError("loader.batch_size must be >= 1".to_string()));
        }
        if self.retrieval.context_max_chunks == 0 {
            return Err(Error::ConfigError(
                "retrieval.context_max_chunks must be >= 1".to_string(),
            ));
        }
        if self.extraction.retry.max_attempts == 0 {
            return Err(Error::ConfigError(
                "extraction.retry.max_attempts must be >= 1".to_string(),
            ));
        }
        if self.extraction.circuit.failure_threshold == 0 {
            return Err(Error::ConfigError(
                "extraction.circuit.failure_threshold must be >= 1".to_string(),
            ));
        }
        match self.extraction.provider.as_str() {
            "heuristic" | "openai" => {}
            other => {
                return Err(Error::ConfigError(format!(
                    "Unknown extraction provider: '{}'. Must be heuristic or openai.",
                    other
                )))
            }
        }
        match self.embedding.provider.as_str() {
            "local" | "openai" => {}
            other => {
                return Err(Error::ConfigError(format!(
                    "Unknown embedding provider: '{}'. Must be local or openai.",
                    other
                )))
            }
        }
        Ok(())
    }
}

/// Resolve a value: prefer env var if config value looks like ${VAR}
fn resolve_env_string(value: &str, env_key: &str) -> String {
    if value.starts_with("${") && value.ends_with('}') {
        let var_name = &value[2..value.len() - 1];
        if let Ok(env_val) = std::env::var(var_name) {
            return env_val;
        }
        return std::env::var(env_key).unwrap_or_default();
    }
    if value.is_empty() {
        if let Ok(env_val) = std::env::var(env_key) {
            return env_val;
        }
    }
    value.to_string()
}
