use thiserror::Error;

/// Errors returned by the forwarding clients.
///
/// Everything here is reported synchronously to the caller that triggered
/// the operation. The only failures that never reach a caller are flushes
/// run by the scheduler tick, which are logged and dropped.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("a session is already active")]
    AlreadyConnected,

    #[error("no active session")]
    NoActiveSession,

    #[error("session handshake not completed")]
    HandshakeIncomplete,

    #[error("failed to encode record: {0}")]
    EncodingFailure(String),

    #[error("write to forwarder failed: {0}")]
    WriteFailure(#[source] std::io::Error),

    #[error("acknowledgment failed: {0}")]
    AcknowledgmentFailure(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("flush scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::EncodingFailure(err.to_string())
    }
}

/// Misuse of the flush scheduler lifecycle.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("flush scheduler already started")]
    AlreadyStarted,

    #[error("flush scheduler already stopped")]
    AlreadyStopped,
}
