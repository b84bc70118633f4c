//! Configuration structures for shardwriter.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI flags.

use serde::{Deserialize, Serialize};

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Output (target cluster) configuration
    pub output: OutputConfig,

    /// Static token ring description
    #[serde(default)]
    pub ring: RingConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Target cluster and write behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Seed endpoints ("host" or "host:port")
    pub endpoints: Vec<String>,

    /// Port used when an endpoint carries none
    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,

    /// Target keyspace
    pub keyspace: String,

    /// Target table
    pub table: String,

    /// Statement executed once per record, with bound values
    pub statement: String,

    /// Consistency level for every execute
    #[serde(default)]
    pub consistency_level: ConsistencyLevel,

    /// Maximum executes per connection acquisition
    #[serde(default = "default_batch_threshold")]
    pub batch_threshold: usize,

    /// Per-shard queue bound; unbounded when unset
    #[serde(default)]
    pub queue_capacity: Option<usize>,

    /// Key layout; discovered from the cluster when unset
    #[serde(default)]
    pub key_layout: Option<KeyLayoutConfig>,
}

/// Explicit partition key layout.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeyLayoutConfig {
    /// Key validator type descriptor
    pub validator: String,

    /// Partition key column names in declared order
    pub columns: Vec<String>,
}

/// Replica acknowledgement requirement.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyLevel {
    Any,
    /// One replica (default)
    #[default]
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    LocalOne,
}

impl ConsistencyLevel {
    /// Wire name of the level.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsistencyLevel::Any => "ANY",
            ConsistencyLevel::One => "ONE",
            ConsistencyLevel::Two => "TWO",
            ConsistencyLevel::Three => "THREE",
            ConsistencyLevel::Quorum => "QUORUM",
            ConsistencyLevel::All => "ALL",
            ConsistencyLevel::LocalQuorum => "LOCAL_QUORUM",
            ConsistencyLevel::EachQuorum => "EACH_QUORUM",
            ConsistencyLevel::LocalOne => "LOCAL_ONE",
        }
    }
}

impl std::fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static token ring: contiguous ranges and their replicas.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RingConfig {
    /// Ranges in any order
    #[serde(default)]
    pub ranges: Vec<RangeConfig>,
}

/// One `(start, end]` token range.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RangeConfig {
    /// Exclusive start token
    pub start: i64,

    /// Inclusive end token
    pub end: i64,

    /// Replica endpoints in preference order
    pub endpoints: Vec<String>,
}

/// Monitoring configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Filter directive for the level.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions

fn default_rpc_port() -> u16 {
    9160
}

fn default_batch_threshold() -> usize {
    32
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        self.output.validate()?;

        for range in &self.ring.ranges {
            if range.endpoints.is_empty() {
                return Err(crate::Error::Config(format!(
                    "Ring range ({}, {}] has no endpoints",
                    range.start, range.end
                )));
            }
        }

        Ok(())
    }
}

impl OutputConfig {
    /// Validate the output section on its own.
    pub fn validate(&self) -> crate::Result<()> {
        if self.endpoints.is_empty() {
            return Err(crate::Error::Config(
                "At least one output endpoint required".into(),
            ));
        }

        if self.keyspace.is_empty() {
            return Err(crate::Error::Config("Output keyspace is required".into()));
        }

        if self.table.is_empty() {
            return Err(crate::Error::Config("Output table is required".into()));
        }

        if self.statement.trim().is_empty() {
            return Err(crate::Error::Config("Output statement is required".into()));
        }

        if self.batch_threshold == 0 {
            return Err(crate::Error::Config(
                "Batch threshold must be at least 1".into(),
            ));
        }

        if self.queue_capacity == Some(0) {
            return Err(crate::Error::Config(
                "Queue capacity must be at least 1 when set".into(),
            ));
        }

        if let Some(layout) = &self.key_layout {
            if layout.columns.is_empty() {
                return Err(crate::Error::Config(
                    "Key layout needs at least one column".into(),
                ));
            }
        }

        if self.batch_threshold > 1024 {
            tracing::warn!(
                batch_threshold = self.batch_threshold,
                "Large batch threshold keeps a connection busy for long runs"
            );
        }

        Ok(())
    }
}
