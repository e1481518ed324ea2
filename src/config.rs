use serde::Deserialize;
use std::env;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the kbrag server.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Base URL of the embedding provider.
    pub embedding_url: String,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Optional API key for the embedding provider.
    pub embedding_api_key: Option<String>,
    /// Base URL of the generation provider.
    pub generation_url: String,
    /// Generation model identifier passed to the provider.
    pub generation_model: String,
    /// Optional API key for the generation provider.
    pub generation_api_key: Option<String>,
    /// Maximum chunk size in characters.
    pub chunk_max_size: usize,
    /// Character overlap between adjacent chunks.
    pub chunk_overlap: usize,
    /// Default similarity threshold applied to queries.
    pub default_similarity_threshold: f32,
    /// Maximum number of sources included in a generation prompt.
    pub max_context_sources: usize,
    /// Token budget for query responses.
    pub max_response_tokens: u32,
    /// Token budget for compliance analysis responses.
    pub max_analysis_tokens: u32,
    /// Queries admitted per user within a rolling hour.
    pub hourly_query_limit: usize,
    /// Queries admitted per user within a rolling day.
    pub daily_query_limit: usize,
    /// Upper bound on uploaded document size in bytes.
    pub max_document_bytes: u64,
    /// Directory backing the filesystem blob store.
    pub data_dir: String,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            embedding_url: load_env("EMBEDDING_URL")?,
            embedding_model: load_env("EMBEDDING_MODEL")?,
            embedding_dimension: parse_env("EMBEDDING_DIMENSION", Some(1536))?,
            embedding_api_key: load_env_optional("EMBEDDING_API_KEY"),
            generation_url: load_env("GENERATION_URL")?,
            generation_model: load_env("GENERATION_MODEL")?,
            generation_api_key: load_env_optional("GENERATION_API_KEY"),
            chunk_max_size: parse_env("CHUNK_MAX_SIZE", Some(1000))?,
            chunk_overlap: parse_env("CHUNK_OVERLAP", Some(200))?,
            default_similarity_threshold: parse_env("SIMILARITY_THRESHOLD", Some(0.7))?,
            max_context_sources: parse_env("MAX_CONTEXT_SOURCES", Some(5))?,
            max_response_tokens: parse_env("MAX_RESPONSE_TOKENS", Some(1500))?,
            max_analysis_tokens: parse_env("MAX_ANALYSIS_TOKENS", Some(2000))?,
            hourly_query_limit: parse_env("HOURLY_QUERY_LIMIT", Some(100))?,
            daily_query_limit: parse_env("DAILY_QUERY_LIMIT", Some(500))?,
            max_document_bytes: parse_env("MAX_DOCUMENT_BYTES", Some(50 * 1024 * 1024))?,
            data_dir: load_env_optional("KBRAG_DATA_DIR").unwrap_or_else(|| "data".to_string()),
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
        })
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: Option<T>) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => default.ok_or_else(|| ConfigError::MissingVariable(key.to_string())),
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        embedding_url = %config.embedding_url,
        embedding_dimension = config.embedding_dimension,
        generation_url = %config.generation_url,
        chunk_max_size = config.chunk_max_size,
        chunk_overlap = config.chunk_overlap,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
