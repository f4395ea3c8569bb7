use super::{ConfigError, LogLevel, Network};
use crate::buffer::{DEFAULT_BUFFER_SIZE, DEFAULT_FLUSH_INTERVAL};
use crate::protocol::AuthInfo;
use crate::sender::{
    BufferedClientOptions, ClientOptions, ConnectionFactory, DEFAULT_ACK_TIMEOUT,
    DEFAULT_ADDRESS, DEFAULT_CONNECTION_TIMEOUT, DEFAULT_REPORT_INTERVAL, TcpConnectionFactory,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_TAG: &str = "app.stdin";

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Socket family of the forwarder
    #[arg(long, env = "FLUENT_NETWORK", default_value = "tcp", ignore_case = true)]
    pub network: Network,

    /// Forwarder address: host:port for tcp, socket path for unix
    #[arg(long, env = "FLUENT_ADDRESS", default_value = DEFAULT_ADDRESS)]
    pub address: String,

    /// Tag attached to every forwarded record
    #[arg(long, env = "FLUENT_TAG", default_value = DEFAULT_TAG)]
    pub tag: String,

    /// Write buffer capacity in bytes
    #[arg(long, env = "BUFFER_SIZE", default_value = "1048576")]
    pub buffer_size: usize,

    /// Flush interval in milliseconds
    #[arg(long, env = "FLUSH_INTERVAL_MS", default_value = "30000")]
    pub flush_interval_ms: u64,

    /// Connection timeout in seconds
    #[arg(long, env = "CONNECTION_TIMEOUT_SECS", default_value = "60")]
    pub connection_timeout_secs: u64,

    /// Acknowledgment timeout in seconds
    #[arg(long, env = "ACK_TIMEOUT_SECS", default_value = "30")]
    pub ack_timeout_secs: u64,

    /// Wait for the forwarder to acknowledge each record
    #[arg(long, env = "REQUIRE_ACK")]
    pub require_ack: bool,

    /// Shared key for the forwarder handshake
    #[arg(long, env = "FLUENT_SHARED_KEY")]
    pub shared_key: Option<String>,

    /// Username for user authentication during the handshake
    #[arg(long, env = "FLUENT_USERNAME")]
    pub username: Option<String>,

    /// Password for user authentication during the handshake
    #[arg(long, env = "FLUENT_PASSWORD")]
    pub password: Option<String>,

    /// Interval between write metrics reports, in seconds
    #[arg(long, env = "METRICS_INTERVAL_SECS", default_value = "10")]
    pub metrics_interval_secs: u64,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info", ignore_case = true)]
    pub log_level: LogLevel,

    /// Configuration file path (optional)
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Derived fields (not CLI arguments)
    #[serde(skip)]
    #[arg(skip)]
    pub flush_interval: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub connection_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub ack_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub metrics_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: Network::Tcp,
            address: DEFAULT_ADDRESS.to_string(),
            tag: DEFAULT_TAG.to_string(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL.as_millis() as u64,
            connection_timeout_secs: DEFAULT_CONNECTION_TIMEOUT.as_secs(),
            ack_timeout_secs: DEFAULT_ACK_TIMEOUT.as_secs(),
            require_ack: false,
            shared_key: None,
            username: None,
            password: None,
            metrics_interval_secs: DEFAULT_REPORT_INTERVAL.as_secs(),
            log_level: LogLevel::Info,
            config_file: None,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            metrics_interval: DEFAULT_REPORT_INTERVAL,
        }
    }
}

impl Config {
    /// Parses CLI arguments (clap also reads the matching environment
    /// variables). When a config file is named, it replaces the parsed
    /// values entirely.
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::try_parse_from(args)?;

        if let Some(path) = config.config_file.clone() {
            return Self::from_file(path);
        }

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(network) = std::env::var("FLUENT_NETWORK") {
            config.network = match network.to_lowercase().as_str() {
                "tcp" => Network::Tcp,
                "unix" => Network::Unix,
                _ => {
                    return Err(ConfigError::EnvError(format!(
                        "Invalid FLUENT_NETWORK: {network}. Valid values: tcp, unix"
                    )));
                }
            };
        }
        override_from_env("FLUENT_ADDRESS", &mut config.address)?;
        override_from_env("FLUENT_TAG", &mut config.tag)?;
        override_from_env("BUFFER_SIZE", &mut config.buffer_size)?;
        override_from_env("FLUSH_INTERVAL_MS", &mut config.flush_interval_ms)?;
        override_from_env("CONNECTION_TIMEOUT_SECS", &mut config.connection_timeout_secs)?;
        override_from_env("ACK_TIMEOUT_SECS", &mut config.ack_timeout_secs)?;
        override_from_env("REQUIRE_ACK", &mut config.require_ack)?;
        override_from_env("METRICS_INTERVAL_SECS", &mut config.metrics_interval_secs)?;
        for (name, credential) in [
            ("FLUENT_SHARED_KEY", &mut config.shared_key),
            ("FLUENT_USERNAME", &mut config.username),
            ("FLUENT_PASSWORD", &mut config.password),
        ] {
            if let Ok(value) = std::env::var(name) {
                *credential = Some(value);
            }
        }

        if let Ok(log_level) = std::env::var("LOG_LEVEL") {
            config.log_level = match log_level.to_lowercase().as_str() {
                "error" => LogLevel::Error,
                "warn" => LogLevel::Warn,
                "info" => LogLevel::Info,
                "debug" => LogLevel::Debug,
                "trace" => LogLevel::Trace,
                _ => {
                    return Err(ConfigError::EnvError(format!(
                        "Invalid LOG_LEVEL: {log_level}"
                    )));
                }
            };
        }

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a TOML file. Keys that are absent keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn post_process(&mut self) -> Result<(), ConfigError> {
        self.flush_interval = Duration::from_millis(self.flush_interval_ms);
        self.connection_timeout = Duration::from_secs(self.connection_timeout_secs);
        self.ack_timeout = Duration::from_secs(self.ack_timeout_secs);
        self.metrics_interval = Duration::from_secs(self.metrics_interval_secs);
        Ok(())
    }

    pub fn auth_info(&self) -> Option<AuthInfo> {
        let shared_key = self.shared_key.as_ref()?;
        let auth = AuthInfo::new(shared_key.clone());
        Some(match &self.username {
            Some(username) => {
                auth.with_user(username.clone(), self.password.clone().unwrap_or_default())
            }
            None => auth,
        })
    }

    pub fn connection_factory(&self) -> Arc<dyn ConnectionFactory> {
        match self.network {
            Network::Tcp => Arc::new(TcpConnectionFactory::new(self.address.clone())),
            #[cfg(unix)]
            Network::Unix => Arc::new(crate::sender::UnixConnectionFactory::new(
                self.address.clone(),
            )),
            // Rejected in validation on other platforms.
            #[cfg(not(unix))]
            Network::Unix => Arc::new(TcpConnectionFactory::new(self.address.clone())),
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            factory: self.connection_factory(),
            connection_timeout: self.connection_timeout,
            ack_timeout: self.ack_timeout,
            require_ack: self.require_ack,
            auth_info: self.auth_info(),
        }
    }

    pub fn buffered_client_options(&self) -> BufferedClientOptions {
        BufferedClientOptions {
            client: self.client_options(),
            buffer_size: self.buffer_size,
            flush_interval: self.flush_interval,
        }
    }
}

/// Replaces `target` with the parsed value of `name` when it is set.
fn override_from_env<T>(name: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(name) {
        Ok(value) => {
            *target = value
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid {name}: {e}")))?;
            Ok(())
        }
        Err(_) => Ok(()),
    }
}

