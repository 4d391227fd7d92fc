use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub ai: AiConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4830,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".progressmark/progressmark.db"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiMode {
    Gemini,
    Stub,
    Disabled,
}

impl FromStr for AiMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "stub" => Ok(Self::Stub),
            "disabled" => Ok(Self::Disabled),
            other => Err(ConfigError::Invalid(format!("unknown ai mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Unset means `gemini` when an API key is configured, `stub` otherwise.
    pub mode: Option<AiMode>,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            mode: None,
            api_key: None,
            model: pm_ai::gemini::DEFAULT_MODEL.to_string(),
            base_url: pm_ai::gemini::DEFAULT_BASE_URL.to_string(),
            max_attempts: pm_ai::MAX_ATTEMPTS,
            backoff_base_ms: 1000,
            timeout_secs: 60,
        }
    }
}

impl AiConfig {
    pub fn effective_mode(&self) -> AiMode {
        self.mode.unwrap_or(if self.has_api_key() {
            AiMode::Gemini
        } else {
            AiMode::Stub
        })
    }

    fn has_api_key(&self) -> bool {
        self.api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty())
    }

    pub fn retry_policy(&self) -> pm_ai::RetryPolicy {
        pm_ai::RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            call_timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub max_concurrent: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { max_concurrent: 4 }
    }
}

impl Config {
    /// Reads the optional TOML file, then layers `PM_*` environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("PM_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_env(&lookup, "PM_PORT") {
            self.server.port = port;
        }
        if let Some(path) = lookup("PM_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(mode) = lookup("PM_AI_MODE") {
            match mode.parse() {
                Ok(mode) => self.ai.mode = Some(mode),
                Err(err) => warn!("ignoring PM_AI_MODE: {err}"),
            }
        }
        if let Some(key) = lookup("GEMINI_API_KEY") {
            self.ai.api_key = Some(key);
        }
        if let Some(model) = lookup("PM_AI_MODEL") {
            self.ai.model = model;
        }
        if let Some(base_url) = lookup("PM_AI_BASE_URL") {
            self.ai.base_url = base_url;
        }
        if let Some(attempts) = parse_env(&lookup, "PM_AI_MAX_ATTEMPTS") {
            self.ai.max_attempts = attempts;
        }
        if let Some(backoff) = parse_env(&lookup, "PM_AI_BACKOFF_MS") {
            self.ai.backoff_base_ms = backoff;
        }
        if let Some(timeout) = parse_env(&lookup, "PM_AI_TIMEOUT_SECS") {
            self.ai.timeout_secs = timeout;
        }
        if let Some(concurrency) = parse_env(&lookup, "PM_WORKER_CONCURRENCY") {
            self.worker.max_concurrent = concurrency;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=pm_ai::MAX_ATTEMPTS).contains(&self.ai.max_attempts) {
            return Err(ConfigError::Invalid(format!(
                "ai.max_attempts must be between 1 and {}",
                pm_ai::MAX_ATTEMPTS
            )));
        }
        if self.ai.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "ai.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.worker.max_concurrent < 1 {
            return Err(ConfigError::Invalid(
                "worker.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.ai.effective_mode() == AiMode::Gemini && !self.ai.has_api_key() {
            return Err(ConfigError::Invalid(
                "ai.mode = gemini requires ai.api_key or GEMINI_API_KEY".to_string(),
            ));
        }
        self.socket_addr().map(|_| ())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|err| {
                ConfigError::Invalid(format!(
                    "server address {}:{}: {err}",
                    self.server.host, self.server.port
                ))
            })
    }
}

fn parse_env<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "ignoring invalid numeric value");
            None
        }
    }
}
