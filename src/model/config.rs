use serde::Deserialize;
use std::fs;
use std::path::Path;

const ENV_CONFIG_PATH: &str = "PATENT_INTEL_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
const ENV_PINECONE_API_KEY: &str = "PINECONE_API_KEY";
const ENV_REDIS_URL: &str = "PATENT_INTEL_REDIS_URL";

/// Dense embedding provider configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding model identifier.
    pub model: String,
    /// Expected embedding dimension; index queries are rejected on mismatch.
    pub dim: usize,
    /// Secret, populated from the environment at bootstrap.
    #[serde(skip)]
    pub api_key: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dim: 1536,
            api_key: String::new(),
        }
    }
}

/// Primary reasoning model configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    pub model: String,
    /// Total per-call budget in seconds.
    pub timeout_s: u64,
    pub connect_timeout_s: u64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            timeout_s: 60,
            connect_timeout_s: 10,
        }
    }
}

/// Structured-parse model configuration.
///
/// The default is a lightweight model on purpose: the parse step runs after
/// the full streamed analysis and only extracts fields already present in the
/// text. Pointing this at the reasoning model roughly doubles per-run cost.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParsingConfig {
    pub model: String,
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
        }
    }
}

/// Vector index (Pinecone serverless) configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub name: String,
    /// Data-plane endpoint of the index, e.g. `https://patents-xxxx.svc.pinecone.io`.
    pub host: String,
    pub namespace: String,
    /// Weight of the dense score in hybrid fusion; sparse gets `1 - alpha`.
    pub hybrid_alpha: f32,
    /// Path to the fitted BM25 query-encoder parameters (JSON).
    pub sparse_params_path: String,
    #[serde(skip)]
    pub api_key: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: "patents".to_string(),
            host: String::new(),
            namespace: "default".to_string(),
            hybrid_alpha: 0.7,
            sparse_params_path: "data/bm25_params.json".to_string(),
            api_key: String::new(),
        }
    }
}

/// Retrieval stage tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub max_parallel_queries: usize,
    pub multi_query_n: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 20,
            max_parallel_queries: 4,
            multi_query_n: 3,
        }
    }
}

/// Grading thresholds and risk bucketing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GradingConfig {
    /// Candidates below this grading score never reach the analyst.
    pub cutoff_threshold: f32,
    /// Mean grading score below which one rewrite round is performed.
    pub rewrite_threshold: f32,
    /// risk_score >= this is Medium.
    pub risk_medium_from: u8,
    /// risk_score >= this is High.
    pub risk_high_from: u8,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            cutoff_threshold: 0.3,
            rewrite_threshold: 0.5,
            risk_medium_from: 40,
            risk_high_from: 75,
        }
    }
}

/// Request rate limits, enforced before a pipeline run starts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub daily: u32,
    pub hourly: u32,
    pub per_minute_ip: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            daily: 50,
            hourly: 10,
            per_minute_ip: 20,
        }
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `json_line` for one JSON object per line, anything else for plain text.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json_line".to_string(),
        }
    }
}

/// Cross-encoder reranker configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RerankerConfig {
    pub enabled: bool,
    /// HuggingFace model identifier for the ONNX cross-encoder.
    pub model_id: String,
    /// Character budget for the document side of each scored pair.
    pub text_max_chars: usize,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_id: "Xenova/ms-marco-MiniLM-L-6-v2".to_string(),
            text_max_chars: 1000,
        }
    }
}

/// YAML configuration file structure (non-secret tuning only).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub parsing: ParsingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub grading: GradingConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
}

/// Application configuration.
///
/// Built exactly once in `main` after secret bootstrap and passed into
/// constructors; nothing reads the environment after this point.
#[derive(Debug, Clone)]
pub struct Config {
    pub embedding: EmbeddingConfig,
    pub reasoning: ReasoningConfig,
    pub parsing: ParsingConfig,
    pub index: IndexConfig,
    pub retrieval: RetrievalConfig,
    pub grading: GradingConfig,
    pub limits: LimitsConfig,
    pub logging: LoggingConfig,
    pub reranker: RerankerConfig,
    pub redis_url: Option<String>,
    pub port: u16,
    pub host: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            reasoning: ReasoningConfig::default(),
            parsing: ParsingConfig::default(),
            index: IndexConfig::default(),
            retrieval: RetrievalConfig::default(),
            grading: GradingConfig::default(),
            limits: LimitsConfig::default(),
            logging: LoggingConfig::default(),
            reranker: RerankerConfig::default(),
            redis_url: None,
            port: 8080,
            host: "127.0.0.1".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment and config file.
    ///
    /// Secrets (`OPENAI_API_KEY`, `PINECONE_API_KEY`) come from the
    /// environment; everything else from the optional YAML file with
    /// defaults as fallback.
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let config_path =
            std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let file = Self::load_config_file(&config_path).unwrap_or_default();

        let openai_api_key = std::env::var(ENV_OPENAI_API_KEY).unwrap_or_default();
        let pinecone_api_key = std::env::var(ENV_PINECONE_API_KEY).unwrap_or_default();
        let redis_url = std::env::var(ENV_REDIS_URL).ok();

        let mut config = Self {
            embedding: file.embedding,
            reasoning: file.reasoning,
            parsing: file.parsing,
            index: file.index,
            retrieval: file.retrieval,
            grading: file.grading,
            limits: file.limits,
            logging: file.logging,
            reranker: file.reranker,
            redis_url,
            port,
            host,
        };
        config.embedding.api_key = openai_api_key;
        config.index.api_key = pinecone_api_key;
        config
    }

    /// Load configuration from YAML file.
    fn load_config_file(path: &str) -> Option<ConfigFile> {
        let path = Path::new(path);

        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return None;
        }

        match fs::read_to_string(path) {
            Ok(contents) => {
                let contents = contents.trim();
                if contents.is_empty() {
                    tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
                    return Some(ConfigFile::default());
                }

                match serde_yaml::from_str(contents) {
                    Ok(config) => {
                        tracing::info!(path = %path.display(), "Loaded configuration from file");
                        Some(config)
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Failed to parse config file, using defaults");
                        None
                    }
                }
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read config file, using defaults");
                None
            }
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
