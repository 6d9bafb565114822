//! # Lease-Keeper CLI
//!
//! Command-line interface for the lease lifecycle of a pull subscription.
//!
//! This module provides CLI commands for:
//! - Pulling messages, printing their payloads and acknowledging them
//! - Extending, acknowledging or releasing leases by token
//! - Listing the subscriptions of a project
//! - Showing the resolved configuration
//!
//! Configuration is layered: built-in defaults, an optional file, `LK__`
//! environment variables and finally command-line flags.

use clap::{Parser, Subcommand, ValueEnum};
use lease_keeper_core::{
    ClientConfig, Connection, EnvironmentCredentialProvider, LeaseToken, PayloadDecodeError,
    PayloadPolicy, ProjectId, SubscriptionClient, SubscriptionError, SubscriptionPath,
    ValidationError,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Prefix of configuration environment variables, e.g. `LK__SUBSCRIPTION`
pub const ENV_PREFIX: &str = "LK";

/// Configuration file read when no explicit path is given
pub const DEFAULT_CONFIG_FILE: &str = "config/lease-keeper";

// ============================================================================
// CLI Structure
// ============================================================================

/// Lease-Keeper CLI - lease lifecycle for pull subscriptions
#[derive(Debug, Parser)]
#[command(name = "lease-keeper")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Fetch, extend and acknowledge messages on a pull subscription")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "LEASE_KEEPER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Project owning the subscription
    #[arg(short, long, global = true)]
    pub project: Option<String>,

    /// Subscription ID, or a full projects/<project>/subscriptions/<id> path
    #[arg(short, long, global = true)]
    pub subscription: Option<String>,

    /// Base URL of the messaging endpoint
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Logging level
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Fetch messages, print their payloads and acknowledge them
    Pull {
        /// Maximum number of messages to fetch
        #[arg(short = 'n', long)]
        max: Option<u32>,

        /// Leave the fetched messages unacknowledged
        #[arg(long)]
        no_ack: bool,

        /// Extend the leases by this many seconds before processing
        #[arg(long, value_name = "SECS")]
        extend: Option<u32>,

        /// How to treat messages whose payload cannot be decoded
        #[arg(long, value_name = "skip|fail-batch")]
        payload_policy: Option<PayloadPolicy>,
    },

    /// Extend leases by token
    Extend {
        /// Seconds from now until the messages become redeliverable
        #[arg(long)]
        seconds: u32,

        /// Lease tokens to extend
        #[arg(required = true, value_name = "TOKEN")]
        tokens: Vec<LeaseToken>,
    },

    /// Acknowledge leases by token
    Ack {
        /// Lease tokens to acknowledge
        #[arg(required = true, value_name = "TOKEN")]
        tokens: Vec<LeaseToken>,
    },

    /// Release leases by token for immediate redelivery
    Release {
        /// Lease tokens to release
        #[arg(required = true, value_name = "TOKEN")]
        tokens: Vec<LeaseToken>,
    },

    /// List the subscriptions of the project
    Subscriptions,

    /// Show the resolved configuration
    Config {
        /// Output format for configuration
        #[arg(short, long, default_value = "yaml")]
        format: ConfigFormat,
    },
}

/// Configuration format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    /// YAML format
    Yaml,
    /// JSON format
    Json,
    /// TOML format
    Toml,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    #[error("Batch rejected: {0}")]
    PayloadRejected(#[from] PayloadDecodeError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logging setup failed: {message}")]
    Logging { message: String },
}

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", .path.display())]
    FileNotFound { path: PathBuf },

    #[error("Unable to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Missing required configuration: {key}")]
    MissingRequired { key: String },

    #[error("Unable to render configuration as {format:?}: {message}")]
    Render {
        format: ConfigFormat,
        message: String,
    },
}

// ============================================================================
// Configuration Types
// ============================================================================

/// CLI configuration structure
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CliConfig {
    /// Project owning the subscription
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Subscription ID or full subscription path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,

    /// Base URL of the messaging endpoint
    pub endpoint: String,

    /// Request timeout
    pub timeout_seconds: u64,

    /// Default batch size for `pull`
    pub max_messages: u32,

    /// Default payload policy for `pull`
    pub payload_policy: PayloadPolicy,

    /// Fall back to the default compute metadata server for credentials
    pub metadata_server: bool,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        let client = ClientConfig::default();
        Self {
            project: None,
            subscription: None,
            endpoint: client.endpoint,
            timeout_seconds: client.timeout.as_secs(),
            max_messages: 10,
            payload_policy: PayloadPolicy::default(),
            metadata_server: false,
            logging: LoggingConfig::default(),
        }
    }
}

impl CliConfig {
    /// Check values that would otherwise only fail once a request is made.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "endpoint".to_string(),
            });
        }

        if self.timeout_seconds == 0 {
            return Err(ValidationError::OutOfRange {
                field: "timeout_seconds".to_string(),
                message: "must be at least 1".to_string(),
            }
            .into());
        }

        if self.max_messages == 0 {
            return Err(ValidationError::OutOfRange {
                field: "max_messages".to_string(),
                message: "must be at least 1".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Project to operate on.
    ///
    /// Taken from `project`, or from `subscription` when that is a full path.
    pub fn project_id(&self) -> Result<ProjectId, ConfigError> {
        if let Some(project) = &self.project {
            return Ok(ProjectId::new(project.as_str())?);
        }

        match &self.subscription {
            Some(subscription) if subscription.contains('/') => {
                let path: SubscriptionPath = subscription.parse()?;
                Ok(path.project().clone())
            }
            _ => Err(ConfigError::MissingRequired {
                key: "project".to_string(),
            }),
        }
    }

    /// Subscription to operate on.
    pub fn subscription_path(&self) -> Result<SubscriptionPath, ConfigError> {
        let subscription = self
            .subscription
            .as_deref()
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "subscription".to_string(),
            })?;

        if subscription.contains('/') {
            return Ok(subscription.parse()?);
        }

        let project = self.project_id()?;
        Ok(SubscriptionPath::new(project, subscription.parse()?))
    }

    /// Settings for the core client
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::default()
            .with_endpoint(self.endpoint.as_str())
            .with_timeout(Duration::from_secs(self.timeout_seconds))
    }

    /// Apply command-line flags on top of the loaded configuration
    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(project) = &cli.project {
            self.project = Some(project.clone());
        }
        if let Some(subscription) = &cli.subscription {
            self.subscription = Some(subscription.clone());
        }
        if let Some(endpoint) = &cli.endpoint {
            self.endpoint = endpoint.clone();
        }
        if let Some(level) = &cli.log_level {
            self.logging.level = level.clone();
        }
        if cli.json_logs {
            self.logging.format = LogFormat::Json;
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum LogFormat {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "json")]
    Json,
}

/// Load configuration from defaults, file and process environment.
pub fn load_configuration(config_path: Option<&Path>) -> Result<CliConfig, ConfigError> {
    load_configuration_with_env(config_path, None)
}

/// Load configuration, reading `LK__*` variables from `env` instead of the
/// process environment when given.
///
/// Sources, lowest precedence first:
///  1. Built-in defaults
///  2. `config/lease-keeper.{toml,yaml,json}` relative to the working directory
///  3. `config_path`, which must exist when given
///  4. Variables prefixed `LK__` with `__` separating nested keys,
///     e.g. `LK__LOGGING__LEVEL=debug` sets `logging.level`
pub fn load_configuration_with_env(
    config_path: Option<&Path>,
    env: Option<HashMap<String, String>>,
) -> Result<CliConfig, ConfigError> {
    let mut builder = config::Config::builder()
        .add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false));

    if let Some(path) = config_path {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        debug!(path = %path.display(), "Loading configuration from explicit path");
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let settings = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .source(env),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

/// Render the configuration in the requested format
pub fn render_config(config: &CliConfig, format: ConfigFormat) -> Result<String, ConfigError> {
    let render_error = |message: String| ConfigError::Render { format, message };

    match format {
        ConfigFormat::Yaml => serde_yaml::to_string(config).map_err(|e| render_error(e.to_string())),
        ConfigFormat::Json => {
            serde_json::to_string_pretty(config).map_err(|e| render_error(e.to_string()))
        }
        ConfigFormat::Toml => toml::to_string(config).map_err(|e| render_error(e.to_string())),
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();
    let mut stdout = std::io::stdout();
    run(cli, &mut stdout).await
}

/// Execute a parsed command line, writing command output to `out`.
pub async fn run(cli: Cli, out: &mut dyn Write) -> Result<(), CliError> {
    let mut config = load_configuration(cli.config.as_deref())?;
    config.apply_overrides(&cli);
    config.validate()?;

    initialize_logging(&config.logging)?;

    match cli.command {
        Commands::Pull {
            max,
            no_ack,
            extend,
            payload_policy,
        } => {
            let options = PullOptions {
                max_messages: max.unwrap_or(config.max_messages),
                acknowledge: !no_ack,
                extend_seconds: extend,
                payload_policy: payload_policy.unwrap_or(config.payload_policy),
            };
            let client = connect_subscription(&config).await?;
            execute_pull_command(&client, &options, out)
                .await
                .map(|_| ())
        }
        Commands::Extend { seconds, tokens } => {
            let client = connect_subscription(&config).await?;
            execute_extend_command(&client, tokens, seconds).await
        }
        Commands::Ack { tokens } => {
            let client = connect_subscription(&config).await?;
            execute_ack_command(&client, tokens).await
        }
        Commands::Release { tokens } => {
            let client = connect_subscription(&config).await?;
            execute_release_command(&client, tokens).await
        }
        Commands::Subscriptions => {
            let project = config.project_id()?;
            let connection = connect(&config).await?;
            execute_subscriptions_command(&connection, &project, out).await
        }
        Commands::Config { format } => execute_config_command(&config, format, out),
    }
}

/// Initialize logging based on configuration.
///
/// `RUST_LOG` takes precedence over the configured level. Logs go to stderr so
/// that command output on stdout stays machine readable.
pub fn initialize_logging(config: &LoggingConfig) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| CliError::Logging {
            message: e.to_string(),
        })?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };

    result.map_err(|e| CliError::Logging {
        message: e.to_string(),
    })
}

async fn connect(config: &CliConfig) -> Result<Connection, CliError> {
    let provider =
        EnvironmentCredentialProvider::new().with_metadata_server(config.metadata_server);

    let connection = Connection::builder()
        .config(config.client_config())
        .connect(&provider)
        .await?;

    Ok(connection)
}

async fn connect_subscription(config: &CliConfig) -> Result<SubscriptionClient, CliError> {
    let subscription = config.subscription_path()?;
    let connection = connect(config).await?;
    Ok(connection.subscription(subscription))
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Options of the `pull` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullOptions {
    pub max_messages: u32,
    pub acknowledge: bool,
    pub extend_seconds: Option<u32>,
    pub payload_policy: PayloadPolicy,
}

/// What a `pull` run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullSummary {
    pub fetched: usize,
    pub printed: usize,
    pub rejected: usize,
    pub acknowledged: usize,
}

/// Fetch one batch, print each decodable payload and acknowledge what was printed.
///
/// Leases whose payload cannot be decoded are never acknowledged; they become
/// redeliverable once their lease runs out.
pub async fn execute_pull_command(
    client: &SubscriptionClient,
    options: &PullOptions,
    out: &mut dyn Write,
) -> Result<PullSummary, CliError> {
    info!(
        subscription = %client.subscription(),
        max_messages = options.max_messages,
        payload_policy = %options.payload_policy,
        "Pulling messages"
    );

    let batch = client.fetch(options.max_messages).await?;
    let mut summary = PullSummary {
        fetched: batch.len(),
        ..PullSummary::default()
    };

    if batch.is_empty() {
        info!("No messages available");
        return Ok(summary);
    }

    if let Some(seconds) = options.extend_seconds {
        client.extend_lease(&batch.lease_tokens(), seconds).await?;
    }

    let decoded = batch.decode_payloads(options.payload_policy)?;

    for rejected in &decoded.rejected {
        warn!(
            lease_token = %rejected.lease_token(),
            error = %rejected,
            "Leaving message with undecodable payload for redelivery"
        );
    }
    summary.rejected = decoded.rejected.len();

    for ready in &decoded.ready {
        writeln!(out, "{}", String::from_utf8_lossy(&ready.payload))?;
    }
    summary.printed = decoded.ready.len();

    if options.acknowledge && !decoded.ready.is_empty() {
        client.acknowledge(&decoded.ready_tokens()).await?;
        summary.acknowledged = decoded.ready.len();
    }

    info!(
        fetched = summary.fetched,
        printed = summary.printed,
        rejected = summary.rejected,
        acknowledged = summary.acknowledged,
        "Pull complete"
    );
    Ok(summary)
}

/// Execute extend command
pub async fn execute_extend_command(
    client: &SubscriptionClient,
    tokens: Vec<LeaseToken>,
    seconds: u32,
) -> Result<(), CliError> {
    let tokens = unique_tokens(tokens)?;
    client.extend_lease(&tokens, seconds).await?;
    Ok(())
}

/// Execute ack command
pub async fn execute_ack_command(
    client: &SubscriptionClient,
    tokens: Vec<LeaseToken>,
) -> Result<(), CliError> {
    let tokens = unique_tokens(tokens)?;
    client.acknowledge(&tokens).await?;
    Ok(())
}

/// Execute release command
pub async fn execute_release_command(
    client: &SubscriptionClient,
    tokens: Vec<LeaseToken>,
) -> Result<(), CliError> {
    let tokens = unique_tokens(tokens)?;
    client.release(&tokens).await?;
    Ok(())
}

/// Print one line per subscription: id, topic and lease duration
pub async fn execute_subscriptions_command(
    connection: &Connection,
    project: &ProjectId,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let subscriptions = connection.list_subscriptions(project).await?;

    for subscription in &subscriptions {
        writeln!(
            out,
            "{}\t{}\t{}s",
            subscription.subscription_id(),
            subscription.topic,
            subscription.ack_deadline_seconds
        )?;
    }

    Ok(())
}

/// Execute config command
pub fn execute_config_command(
    config: &CliConfig,
    format: ConfigFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let rendered = render_config(config, format)?;
    write!(out, "{}", rendered)?;
    if !rendered.ends_with('\n') {
        writeln!(out)?;
    }
    Ok(())
}

/// Drop repeated tokens, keeping the first occurrence of each.
fn unique_tokens(tokens: Vec<LeaseToken>) -> Result<Vec<LeaseToken>, CliError> {
    if tokens.is_empty() {
        return Err(CliError::InvalidArgument {
            arg: "TOKEN".to_string(),
            message: "at least one lease token is required".to_string(),
        });
    }

    let total = tokens.len();
    let mut seen = HashSet::with_capacity(total);
    let unique: Vec<LeaseToken> = tokens
        .into_iter()
        .filter(|token| seen.insert(token.clone()))
        .collect();

    if unique.len() < total {
        debug!(
            duplicates = total - unique.len(),
            "Ignoring repeated lease tokens"
        );
    }

    Ok(unique)
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
