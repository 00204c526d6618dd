use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_json::{Map, Value};

pub const DEFAULT_HOST: &str = "https://cloud.langfuse.com";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TracelinkConfig {
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub hook: HookConfig,
    #[serde(default)]
    pub media: MediaConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SinkConfig {
    pub host: String,
    pub public_key: Option<String>,
    pub secret_key: Option<String>,
    pub batch_size: usize,
    pub timeout_seconds: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            public_key: None,
            secret_key: None,
            batch_size: 50,
            timeout_seconds: 30,
        }
    }
}

impl SinkConfig {
    /// Fill unset credentials and host from the `LANGFUSE_*` environment variables.
    pub fn with_env_fallback(mut self) -> Self {
        if self.public_key.as_deref().map_or(true, str::is_empty) {
            self.public_key = std::env::var("LANGFUSE_PUBLIC_KEY").ok();
        }
        if self.secret_key.as_deref().map_or(true, str::is_empty) {
            self.secret_key = std::env::var("LANGFUSE_SECRET_KEY").ok();
        }
        if self.host == DEFAULT_HOST {
            if let Ok(host) = std::env::var("LANGFUSE_HOST") {
                if !host.is_empty() {
                    self.host = host;
                }
            }
        }
        self
    }

    /// Both keys present and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.public_key.as_deref(), self.secret_key.as_deref()) {
            (Some(public), Some(secret)) if !public.is_empty() && !secret.is_empty() => {
                Some((public, secret))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HookConfig {
    pub auto_flush: bool,
    pub trace_name: String,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub tags: Vec<String>,
    pub default_metadata: Map<String, Value>,
    pub estimate_missing_usage: bool,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            auto_flush: true,
            trace_name: "langgraph_workflow".to_string(),
            session_id: None,
            user_id: None,
            tags: vec!["rust".to_string(), "langgraph".to_string()],
            default_metadata: Map::new(),
            estimate_missing_usage: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MediaConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub poll_interval_ms: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 100,
            poll_interval_ms: 100,
        }
    }
}

impl TracelinkConfig {
    /// Load from a TOML file (optional) layered with `TRACELINK_*` environment
    /// variables, e.g. `TRACELINK_SINK__PUBLIC_KEY`.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("TRACELINK")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;
        let mut config: Self = s.try_deserialize()?;
        config.sink = config.sink.with_env_fallback();
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from_str(contents, config::FileFormat::Toml))
            .build()?;
        s.try_deserialize()
    }
}
