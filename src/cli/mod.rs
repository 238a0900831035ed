//! Command-line interface for the metrics shipper.
//!
//! `mship` pushes a single observation through the full pipeline: series,
//! flush, delivery. Handy for checking an endpoint or wiring up a dashboard.

use crate::core::config::ConfigBuilder;
use crate::core::{Config, MetricsError, Region, Result};
use crate::hub::MetricsHub;
use crate::metrics::tags::{parse_tag_kvs, Tags};
use crate::reporter::ReporterBuilder;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Ship counters, stores and timers to a metrics endpoint
#[derive(Parser, Debug)]
#[command(name = "mship")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (default: ~/.config/mship/config.yaml)
    #[arg(short, long, env = "MSHIP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Deployment region (cn, us, sg, air, other)
    #[arg(long, env = "MSHIP_REGION")]
    pub region: Option<Region>,

    /// Metrics host, overrides the region default
    #[arg(long, env = "MSHIP_DOMAIN")]
    pub domain: Option<String>,

    /// URL scheme
    #[arg(long, env = "MSHIP_SCHEME")]
    pub scheme: Option<String>,

    /// Metric name prefix
    #[arg(long, env = "MSHIP_PREFIX")]
    pub prefix: Option<String>,

    /// Base tag added to the observation, as key:value
    #[arg(long = "base-tag", value_name = "KEY:VALUE")]
    pub base_tags: Vec<String>,

    /// Milliseconds to wait for delivery before giving up
    #[arg(long, env = "MSHIP_WAIT_MS", default_value_t = 5000)]
    pub wait_ms: u64,

    /// Enable debug logging
    #[arg(short, long, env = "MSHIP_DEBUG")]
    pub debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub check_config: bool,

    /// Observation to send
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// One observation
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Add to a counter
    Counter {
        /// Metric name, without prefix
        name: String,
        /// Amount to add
        #[arg(default_value_t = 1, allow_hyphen_values = true)]
        value: i64,
        /// Tag as key:value, repeatable
        #[arg(short, long = "tag", value_name = "KEY:VALUE")]
        tags: Vec<String>,
    },
    /// Set a gauge
    Store {
        /// Metric name, without prefix
        name: String,
        /// Current value
        #[arg(allow_hyphen_values = true)]
        value: f64,
        /// Tag as key:value, repeatable
        #[arg(short, long = "tag", value_name = "KEY:VALUE")]
        tags: Vec<String>,
    },
    /// Record a latency sample
    Timer {
        /// Metric name, without prefix
        name: String,
        /// Elapsed milliseconds
        millis: u64,
        /// Tag as key:value, repeatable
        #[arg(short, long = "tag", value_name = "KEY:VALUE")]
        tags: Vec<String>,
    },
}

impl Command {
    fn tag_kvs(&self) -> &[String] {
        match self {
            Command::Counter { tags, .. }
            | Command::Store { tags, .. }
            | Command::Timer { tags, .. } => tags,
        }
    }
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    fn config_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config {
            return Some(path.clone());
        }
        dirs::config_dir()
            .map(|d| d.join("mship").join("config.yaml"))
            .filter(|path| path.exists())
    }

    /// Load configuration with proper precedence:
    /// 1. CLI arguments (highest priority)
    /// 2. Environment variables
    /// 3. Config file
    /// 4. Defaults (lowest priority)
    pub async fn load_config(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::new();

        if let Some(path) = self.config_path() {
            let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
                MetricsError::config(format!("Failed to read config file {:?}: {}", path, e))
            })?;
            builder = builder.from_yaml(&content)?;
        }

        self.build_config_from_args(builder)
    }

    fn build_config_from_args(&self, mut builder: ConfigBuilder) -> Result<Config> {
        if let Some(region) = self.region {
            builder = builder.region(region);
        }
        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.as_str());
        }
        if let Some(scheme) = &self.scheme {
            builder = builder.scheme(scheme.as_str());
        }
        if let Some(prefix) = &self.prefix {
            builder = builder.prefix(prefix.as_str());
        }
        for (key, value) in parse_tag_kvs(&self.base_tags)? {
            builder = builder.base_tag(key, value);
        }

        builder.build()
    }

    /// Initialize logging.
    ///
    /// `RUST_LOG` wins, then `MSHIP_LOG_LEVEL`, then the configured level;
    /// `--debug` forces debug.
    pub fn init_logging(&self, config: &Config) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let env_log_level = std::env::var("MSHIP_LOG_LEVEL")
            .unwrap_or_else(|_| config.logging.level.as_str().to_string());
        let log_level = if self.debug {
            "debug"
        } else {
            env_log_level.as_str()
        };

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact();

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| MetricsError::config(format!("Failed to initialize logging: {}", e)))?;

        Ok(())
    }
}

/// Execute the command.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.load_config().await?;
    cli.init_logging(&config)?;

    if let Some(path) = cli.config_path() {
        tracing::debug!("Loaded configuration from: {:?}", path);
    }

    if cli.check_config {
        println!("Configuration is valid!");
        println!("  Counter URL: {}", config.endpoint.counter_url()?);
        println!("  Store URL: {}", config.endpoint.store_url()?);
        println!("  Prefix: {}", config.reporter.prefix);
        println!("  TTL: {:?}", config.collection.ttl);
        println!("  Flush interval: {:?}", config.collection.flush_interval);
        println!("  HTTP timeout: {:?}", config.delivery.http_timeout);
        return Ok(());
    }

    let Some(command) = cli.command.clone() else {
        Cli::command().print_help()?;
        return Ok(());
    };

    send(&cli, config, command).await
}

async fn send(cli: &Cli, config: Config, command: Command) -> Result<()> {
    if !config.reporter.enabled {
        println!("Reporting is disabled in the configuration, nothing sent");
        return Ok(());
    }

    let tags: Tags = parse_tag_kvs(command.tag_kvs())?;
    let hub = MetricsHub::new(config)?;
    let reporter = ReporterBuilder::from_config(&hub.config().reporter).build(&hub);

    match &command {
        Command::Counter { name, value, .. } => reporter.counter(name, *value, &tags),
        Command::Store { name, value, .. } => reporter.store(name, *value, &tags),
        Command::Timer { name, millis, .. } => reporter.timer(name, *millis, &tags),
    }

    let emitted = hub.flush_all();
    let wait = Duration::from_millis(cli.wait_ms);
    let idle = tokio::select! {
        idle = hub.wait_idle(wait) => idle,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted before delivery finished");
            false
        }
    };

    let mut delivered = 0;
    let mut failed = 0;
    for transport in hub.transports().transports() {
        let stats = transport.stats();
        tracing::debug!(url = %transport.url(), ?stats, "Delivery summary");
        delivered += stats.delivered;
        failed += stats.failed + stats.dropped;
    }
    hub.shutdown().await;

    if !idle {
        return Err(MetricsError::Timeout {
            timeout_ms: cli.wait_ms,
        });
    }
    if failed > 0 {
        return Err(MetricsError::network(format!(
            "{} of {} batches failed",
            failed,
            failed + delivered
        )));
    }

    println!("Sent {} metric requests in {} batches", emitted, delivered);
    Ok(())
}
