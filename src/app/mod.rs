pub mod config;
pub mod logging_system;
pub mod shutdown;

pub use config::{Config, ConfigError, LogLevel, Network};
pub use logging_system::{LoggingError, LoggingSystem, setup_logging};
pub use shutdown::spawn_signal_watcher;

use crate::domain::ClientError;
use crate::protocol::Message;
use crate::sender::{BufferedClient, WriteMetrics, spawn_metrics_reporter};
use anyhow::Context;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct App {
    config: Config,
}

impl App {
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Config::from_args(args)?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Forwards stdin to the configured forwarder until EOF or a shutdown
    /// signal, then drains the buffer and disconnects.
    pub async fn run(self) -> anyhow::Result<()> {
        setup_logging(self.config.log_level)?;

        info!("Starting fluent-buffered-client v{}", crate::VERSION);
        info!(
            network = ?self.config.network,
            address = %self.config.address,
            tag = %self.config.tag,
            buffer_size = self.config.buffer_size,
            flush_interval = ?self.config.flush_interval,
            require_ack = self.config.require_ack,
            "configuration loaded"
        );

        let metrics = Arc::new(WriteMetrics::new());
        let client = BufferedClient::new(self.config.buffered_client_options())
            .with_metrics(metrics.clone());
        client
            .connect()
            .await
            .with_context(|| format!("failed to connect to {}", self.config.address))?;

        let cancel = CancellationToken::new();
        let reporter = spawn_metrics_reporter(
            metrics.clone(),
            self.config.metrics_interval,
            cancel.child_token(),
        );
        let signals = spawn_signal_watcher(cancel.clone());

        let stdin = BufReader::new(tokio::io::stdin());
        let forwarded = forward_lines(&client, &self.config.tag, stdin, &cancel).await;

        info!("Shutting down, draining write buffer");
        let shutdown = client.shutdown().await;
        cancel.cancel();
        if let Err(e) = reporter.await {
            warn!("Metrics reporter task failed: {}", e);
        }
        if let Err(e) = signals.await {
            warn!("Signal watcher task failed: {}", e);
        }

        let snapshot = metrics.snapshot();
        info!(
            bytes_written = snapshot.bytes_written,
            write_count = snapshot.write_count,
            "fluent-buffered-client stopped"
        );

        let lines = forwarded.context("failed to read stdin")?;
        info!(lines, "forwarded records");
        shutdown.context("graceful shutdown failed")?;
        Ok(())
    }
}

/// Sends every non-empty line of `reader` as a record tagged `tag`.
///
/// Returns the number of lines handed to the client. A failed send is
/// logged; a broken connection is re-established once per failure.
pub async fn forward_lines<R>(
    client: &BufferedClient,
    tag: &str,
    reader: R,
    cancel: &CancellationToken,
) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0;

    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match send_line(client, tag, &line).await {
            Ok(()) => forwarded += 1,
            Err(e @ ClientError::WriteFailure(_)) => {
                error!(error = %e, "write to forwarder failed, reconnecting");
                if let Err(e) = client.reconnect().await {
                    error!(error = %e, "reconnect failed");
                }
            }
            Err(e) => warn!(error = %e, "dropping record"),
        }
    }

    Ok(forwarded)
}

async fn send_line(client: &BufferedClient, tag: &str, line: &str) -> Result<(), ClientError> {
    client.send(Message::new(tag, parse_record(line))?).await
}

/// A line holding a JSON object is forwarded as is; anything else is wrapped
/// as `{"message": line}`.
pub fn parse_record(line: &str) -> Value {
    match serde_json::from_str::<Value>(line) {
        Ok(record @ Value::Object(_)) => record,
        _ => json!({ "message": line }),
    }
}

pub async fn main() -> anyhow::Result<()> {
    let app = match App::from_args(std::env::args_os()) {
        Ok(app) => app,
        // --help, --version and usage errors print and exit.
        Err(ConfigError::Cli(e)) => e.exit(),
        Err(e) => return Err(e).context("configuration error"),
    };
    app.run().await
}
