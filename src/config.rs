use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub analysis: AnalysisConfig,
    pub llm: LLMConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Without a URL jobs live in process memory only.
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub enabled: bool,
    pub queue_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    pub timeout_secs: u64,
    pub worker_poll_secs: u64,
    /// How long a worker's claim on its deliveries survives without a heartbeat.
    pub worker_lease_secs: u64,
}

impl AnalysisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn worker_poll_interval(&self) -> Duration {
        Duration::from_secs(self.worker_poll_secs.max(1))
    }

    pub fn worker_lease(&self) -> Duration {
        Duration::from_secs(self.worker_lease_secs)
    }
}

#[derive(Clone, Deserialize)]
pub struct LLMConfig {
    pub provider: String,
    pub model: String,
    pub openai_api_key: String,
    pub anthropic_api_key: String,
    pub api_base: Option<String>,
    pub max_tokens: u32,
}

impl LLMConfig {
    /// API key for the configured provider, if one is set.
    pub fn api_key(&self) -> Option<&str> {
        let key = match self.provider.as_str() {
            "anthropic" => &self.anthropic_api_key,
            _ => &self.openai_api_key,
        };
        if key.trim().is_empty() {
            None
        } else {
            Some(key.as_str())
        }
    }
}

// Keys stay out of startup logs.
impl std::fmt::Debug for LLMConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LLMConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("max_tokens", &self.max_tokens)
            .field("api_key_set", &self.api_key().is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            server: ServerConfig {
                port: parse(&lookup, "PORT", "8000")?,
                host: var("HOST", "0.0.0.0"),
                cors_allowed_origins: var("ALLOWED_ORIGINS", "*")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
                max_connections: parse(&lookup, "DB_MAX_CONNECTIONS", "10")?,
                min_connections: parse(&lookup, "DB_MIN_CONNECTIONS", "1")?,
            },
            redis: RedisConfig {
                url: var("REDIS_URL", "redis://localhost:6379"),
                enabled: parse(&lookup, "USE_JOB_QUEUE", "false")?,
                queue_name: var("QUEUE_NAME", "financial"),
            },
            analysis: AnalysisConfig {
                timeout_secs: positive(
                    parse(&lookup, "ANALYSIS_TIMEOUT_SECS", "300")?,
                    "ANALYSIS_TIMEOUT_SECS",
                )?,
                worker_poll_secs: parse(&lookup, "WORKER_POLL_SECS", "5")?,
                worker_lease_secs: positive(
                    parse(&lookup, "WORKER_LEASE_SECS", "30")?,
                    "WORKER_LEASE_SECS",
                )?,
            },
            llm: LLMConfig {
                provider: var("LLM_PROVIDER", "openai"),
                model: var("LLM_MODEL", "gpt-4o-mini"),
                openai_api_key: lookup("OPENAI_API_KEY").unwrap_or_default(),
                anthropic_api_key: lookup("ANTHROPIC_API_KEY").unwrap_or_default(),
                api_base: lookup("LLM_API_BASE").filter(|base| !base.trim().is_empty()),
                max_tokens: parse(&lookup, "LLM_MAX_TOKENS", "1024")?,
            },
            storage: StorageConfig {
                upload_dir: PathBuf::from(var("UPLOAD_DIR", "data")),
                max_upload_bytes: parse(&lookup, "MAX_UPLOAD_BYTES", "20971520")?,
            },
        })
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: &str) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse()
        .with_context(|| format!("invalid value for {key}: {raw:?}"))
}

fn positive(value: u64, key: &str) -> Result<u64> {
    if value == 0 {
        anyhow::bail!("{key} must be greater than zero");
    }
    Ok(value)
}
