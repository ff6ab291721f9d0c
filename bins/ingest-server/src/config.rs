use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use ingest::{ConsumerConfig, WorkerConfig};

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "ingest-server", about = "Stream ingestion into a document store")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Consume a topic, parse records and persist them
    Consume(ConsumeArgs),
    /// Publish sample JSON records to a file-backed topic
    Produce(ProduceArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ConsumeArgs {
    /// Path to TOML config file
    #[arg(long, default_value = "config.toml", env = "INGEST_CONFIG")]
    pub config: String,

    /// Topic to consume (overrides consumer.topic)
    #[arg(long, env = "INGEST_TOPIC")]
    pub topic: Option<String>,

    /// Records buffered before dispatch + commit (overrides consumer.batch_threshold)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Poll timeout in ms (overrides consumer.poll_timeout_ms)
    #[arg(long)]
    pub poll_timeout_ms: Option<u64>,
}

#[derive(Args, Clone, Debug)]
pub struct ProduceArgs {
    /// Path to TOML config file
    #[arg(long, default_value = "config.toml", env = "INGEST_CONFIG")]
    pub config: String,

    /// Topic to publish to (overrides consumer.topic)
    #[arg(long, env = "INGEST_TOPIC")]
    pub topic: Option<String>,

    /// Number of records to publish
    #[arg(long, default_value_t = 1000)]
    pub count: u64,

    /// Records per second (0 = as fast as possible)
    #[arg(long, default_value_t = 0.0)]
    pub rate: f64,

    /// Emit a malformed payload every N records (0 = never)
    #[arg(long, default_value_t = 0)]
    pub malformed_every: u64,

    /// PRNG seed (0 = current time)
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

// ---- TOML Config ----

#[derive(Debug, Default, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub stream: BackendSection<StreamBackend>,
    #[serde(default)]
    pub store: BackendSection<StoreBackend>,
}

/// Backend name plus its own config table.
#[derive(Debug, Default, Deserialize)]
#[serde(bound(deserialize = "B: Deserialize<'de> + Default"))]
pub struct BackendSection<B> {
    #[serde(default)]
    pub backend: B,
    #[serde(default)]
    pub config: Option<toml::Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamBackend {
    #[default]
    File,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    File,
}

impl<B> BackendSection<B> {
    /// Deserialize the backend table into its typed config.
    pub fn typed<T: serde::de::DeserializeOwned>(&self, context: &'static str) -> Result<T, ServerError> {
        let value = self
            .config
            .clone()
            .unwrap_or_else(|| toml::Value::Table(toml::map::Map::new()));
        value
            .try_into()
            .map_err(|e: toml::de::Error| ServerError::Config { context, detail: e.to_string() })
    }
}

impl IngestConfig {
    pub fn parse(content: &str) -> Result<Self, ServerError> {
        toml::from_str(content).map_err(|e| ServerError::Config { context: "parse", detail: e.to_string() })
    }

    /// Load `path`; a path that does not exist yields defaults.
    pub fn load(path: &str) -> Result<Self, ServerError> {
        if !std::path::Path::new(path).exists() {
            tracing::warn!(config = %path, "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content).map_err(|e| match e {
            ServerError::Config { context, detail } => ServerError::Config { context, detail: format!("'{path}': {detail}") },
            other => other,
        })
    }

    pub fn apply_consume_args(&mut self, args: &ConsumeArgs) {
        if let Some(topic) = &args.topic {
            self.consumer.topic = topic.clone();
        }
        if let Some(n) = args.batch_size {
            self.consumer.batch_threshold = n;
        }
        if let Some(ms) = args.poll_timeout_ms {
            self.consumer.poll_timeout_ms = ms;
        }
    }
}
