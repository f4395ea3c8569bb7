use super::config::LogLevel;
use parking_lot::RwLock;
use std::sync::OnceLock;
use thiserror::Error;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoggingError {
    #[error("invalid log directive '{directive}': {reason}")]
    InvalidDirective { directive: String, reason: String },
    #[error("failed to install tracing subscriber: {0}")]
    InitFailed(String),
}

/// Noisy dependencies kept at `warn` unless `RUST_LOG` says otherwise.
const DEFAULT_DIRECTIVES: &[&str] = &["tokio=warn", "mio=warn"];

pub struct LoggingSystem {
    directives: RwLock<Vec<Directive>>,
}

impl LoggingSystem {
    pub fn new() -> Self {
        Self {
            directives: RwLock::new(Vec::new()),
        }
    }

    pub fn add_directive(&self, directive: &str) -> Result<(), LoggingError> {
        let parsed = directive
            .parse::<Directive>()
            .map_err(|e| LoggingError::InvalidDirective {
                directive: directive.to_string(),
                reason: e.to_string(),
            })?;
        self.directives.write().push(parsed);
        Ok(())
    }

    pub fn add_default_directives(&self) -> Result<(), LoggingError> {
        for directive in DEFAULT_DIRECTIVES {
            self.add_directive(directive)?;
        }
        Ok(())
    }

    pub fn directive_count(&self) -> usize {
        self.directives.read().len()
    }

    pub fn build_filter_string(&self, level: LogLevel) -> String {
        let directives = self.directives.read();
        let mut parts = Vec::with_capacity(directives.len() + 1);
        parts.push(level.as_str().to_string());
        parts.extend(directives.iter().map(ToString::to_string));
        parts.join(",")
    }

    /// `RUST_LOG` wins over the configured level when it is set and valid.
    pub fn build_filter(&self, level: LogLevel) -> Result<EnvFilter, LoggingError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        let filter_string = self.build_filter_string(level);
        EnvFilter::try_new(&filter_string).map_err(|e| LoggingError::InvalidDirective {
            directive: filter_string,
            reason: e.to_string(),
        })
    }

    pub fn initialize_tracing(&self, level: LogLevel) -> Result<(), LoggingError> {
        let filter = self.build_filter(level)?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))
    }
}

impl Default for LoggingSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the global subscriber. Only the first call does any work; later
/// calls report the outcome of the first.
pub fn setup_logging(level: LogLevel) -> Result<(), LoggingError> {
    static INIT: OnceLock<Result<(), LoggingError>> = OnceLock::new();

    INIT.get_or_init(|| {
        let logging_system = LoggingSystem::new();
        logging_system.add_default_directives()?;
        logging_system.initialize_tracing(level)
    })
    .clone()
}
