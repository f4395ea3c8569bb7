pub mod buffered;
pub mod client;
pub mod connection;
pub mod metrics;
pub mod reporter;

pub use buffered::{BufferedClient, BufferedClientOptions};
pub use client::{
    ClientOptions, DEFAULT_ACK_TIMEOUT, DEFAULT_CONNECTION_TIMEOUT, ForwardClient, Session,
};
pub use connection::{
    BoxedStream, Connection, ConnectionFactory, DEFAULT_ADDRESS, TcpConnectionFactory,
};
#[cfg(unix)]
pub use connection::UnixConnectionFactory;
pub use metrics::{WriteMetrics, WriteMetricsSnapshot};
pub use reporter::{DEFAULT_REPORT_INTERVAL, spawn_metrics_reporter};
