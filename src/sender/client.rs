use super::connection::{Connection, ConnectionFactory, TcpConnectionFactory};
use crate::domain::ClientError;
use crate::protocol::handshake::{generate_salt, shared_key_digest};
use crate::protocol::{
    AckMessage, AuthInfo, ChunkEncoder, CompressedPackedForwardMessage, EntryList, ForwardMessage,
    Helo, Message, MessageExt, PackedForwardMessage, Ping, Pong,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ABANDONED_CHUNKS: usize = 64;

#[derive(Clone)]
pub struct ClientOptions {
    pub factory: Arc<dyn ConnectionFactory>,
    /// Bounds connection establishment and each handshake read.
    pub connection_timeout: Duration,
    /// Bounds the wait for an acknowledgment.
    pub ack_timeout: Duration,
    pub require_ack: bool,
    pub auth_info: Option<AuthInfo>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            factory: Arc::new(TcpConnectionFactory::default()),
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            require_ack: false,
            auth_info: None,
        }
    }
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("connection_timeout", &self.connection_timeout)
            .field("ack_timeout", &self.ack_timeout)
            .field("require_ack", &self.require_ack)
            .field("auth_info", &self.auth_info)
            .finish_non_exhaustive()
    }
}

/// State of an established connection.
#[derive(Debug)]
pub struct Session {
    pub connection: Arc<Connection>,
    /// Set once the handshake (if any) has completed and records may flow.
    pub transport_phase: bool,
}

/// Chunks whose acknowledgment wait timed out.
///
/// Their acks can still arrive later; they are skipped rather than being
/// matched against the chunk currently awaited.
#[derive(Debug, Default)]
pub(crate) struct AbandonedChunks(VecDeque<String>);

impl AbandonedChunks {
    fn remember(&mut self, chunk: &str) {
        if self.0.len() == MAX_ABANDONED_CHUNKS {
            self.0.pop_front();
        }
        self.0.push_back(chunk.to_string());
    }

    fn forget(&mut self, chunk: &str) -> bool {
        match self.0.iter().position(|abandoned| abandoned == chunk) {
            Some(index) => {
                self.0.remove(index);
                true
            }
            None => false,
        }
    }

    fn clear(&mut self) {
        self.0.clear();
    }
}

/// Unbuffered forward-protocol client.
///
/// Owns the session lifecycle, the shared-key handshake and the
/// acknowledgment exchange. Every send goes straight to the socket.
pub struct ForwardClient {
    options: ClientOptions,
    pub(crate) session: RwLock<Option<Session>>,
    /// Serialises ack exchanges; the guarded state outlives a single wait.
    pub(crate) ack_lock: Mutex<AbandonedChunks>,
}

impl std::fmt::Debug for ForwardClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardClient")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ForwardClient {
    pub fn new(mut options: ClientOptions) -> Self {
        if options.connection_timeout.is_zero() {
            options.connection_timeout = DEFAULT_CONNECTION_TIMEOUT;
        }
        if options.ack_timeout.is_zero() {
            options.ack_timeout = DEFAULT_ACK_TIMEOUT;
        }

        Self {
            options,
            session: RwLock::new(None),
            ack_lock: Mutex::new(AbandonedChunks::default()),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn require_ack(&self) -> bool {
        self.options.require_ack
    }

    pub async fn is_connected(&self) -> bool {
        self.session.read().await.is_some()
    }

    pub async fn transport_phase(&self) -> bool {
        self.session
            .read()
            .await
            .as_ref()
            .is_some_and(|session| session.transport_phase)
    }

    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut session = self.session.write().await;
        if session.is_some() {
            return Err(ClientError::AlreadyConnected);
        }
        self.establish(&mut session).await
    }

    /// Closes the connection. Disconnecting without a session is a no-op.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let session = self.session.write().await.take();
        let Some(session) = session else {
            return Ok(());
        };

        info!("disconnecting from forwarder");
        session
            .connection
            .shutdown()
            .await
            .map_err(ClientError::WriteFailure)
    }

    pub async fn reconnect(&self) -> Result<(), ClientError> {
        if let Err(e) = self.disconnect().await {
            warn!(error = %e, "error while closing previous connection");
        }
        self.connect().await
    }

    /// Opens a connection and installs it in `slot`.
    ///
    /// The session is installed before the handshake runs, so a failed
    /// handshake leaves a session whose transport phase never started.
    pub(crate) async fn establish(&self, slot: &mut Option<Session>) -> Result<(), ClientError> {
        let timeout = self.options.connection_timeout;
        let stream = tokio::time::timeout(timeout, self.options.factory.connect())
            .await
            .map_err(|_| ClientError::ConnectionFailed(format!("timed out after {timeout:?}")))?
            .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;

        // Acks owed on the previous connection will never arrive.
        self.ack_lock.lock().await.clear();

        let connection = Arc::new(Connection::new(stream));
        let session = slot.insert(Session {
            connection: connection.clone(),
            transport_phase: false,
        });

        if let Some(auth) = &self.options.auth_info {
            self.handshake(&connection, auth).await?;
        }

        session.transport_phase = true;
        info!("connected to forwarder");
        Ok(())
    }

    async fn handshake(&self, connection: &Connection, auth: &AuthInfo) -> Result<(), ClientError> {
        let helo: Helo = self.read_handshake_frame(connection).await?;
        if !helo.is_valid() {
            return Err(ClientError::HandshakeFailed(format!(
                "expected HELO, got {}",
                helo.0
            )));
        }

        let salt = generate_salt();
        let ping = Ping::respond(&helo, auth, &salt);
        let bytes = serde_json::to_vec(&ping)?;
        connection
            .write_bytes(&bytes)
            .await
            .map_err(ClientError::WriteFailure)?;

        let pong: Pong = self.read_handshake_frame(connection).await?;
        if !pong.is_valid() {
            return Err(ClientError::HandshakeFailed(format!(
                "expected PONG, got {}",
                pong.0
            )));
        }
        if !pong.auth_result() {
            return Err(ClientError::HandshakeFailed(format!(
                "rejected by forwarder: {}",
                pong.reason()
            )));
        }

        let expected = shared_key_digest(
            &salt,
            pong.server_hostname(),
            &helo.options().nonce,
            &auth.shared_key,
        );
        if pong.shared_key_digest() != expected {
            return Err(ClientError::HandshakeFailed(
                "forwarder shared key digest mismatch".to_string(),
            ));
        }

        debug!(server = pong.server_hostname(), "handshake completed");
        Ok(())
    }

    async fn read_handshake_frame<T: DeserializeOwned>(
        &self,
        connection: &Connection,
    ) -> Result<T, ClientError> {
        tokio::time::timeout(self.options.connection_timeout, connection.read_frame())
            .await
            .map_err(|_| ClientError::HandshakeFailed("timed out waiting for forwarder".to_string()))?
            .map_err(|e| ClientError::HandshakeFailed(e.to_string()))
    }

    /// Read access to a session that is ready for records.
    ///
    /// The guard keeps connect and disconnect out until it is dropped.
    pub(crate) async fn active_session(&self) -> Result<RwLockReadGuard<'_, Session>, ClientError> {
        let guard = self.session.read().await;
        let session = RwLockReadGuard::try_map(guard, Option::as_ref)
            .map_err(|_| ClientError::NoActiveSession)?;
        if !session.transport_phase {
            return Err(ClientError::HandshakeIncomplete);
        }
        Ok(session)
    }

    /// Waits for the acknowledgment of `chunk`.
    ///
    /// `abandoned` comes from `ack_lock`, so only one reader consumes
    /// responses. On timeout the chunk is remembered and its late ack is
    /// skipped by the next wait.
    pub(crate) async fn check_ack(
        &self,
        abandoned: &mut AbandonedChunks,
        connection: &Connection,
        chunk: &str,
    ) -> Result<(), ClientError> {
        let timeout = self.options.ack_timeout;
        let outcome = tokio::time::timeout(timeout, read_ack(abandoned, connection, chunk)).await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                abandoned.remember(chunk);
                Err(ClientError::AcknowledgmentFailure(format!(
                    "no ack for chunk {chunk} within {timeout:?}"
                )))
            }
        }
    }

    pub async fn send<E: ChunkEncoder>(&self, record: E) -> Result<(), ClientError> {
        let session = self.active_session().await?;
        self.send_on(&session, record).await
    }

    pub(crate) async fn send_on<E: ChunkEncoder>(
        &self,
        session: &Session,
        mut record: E,
    ) -> Result<(), ClientError> {
        if !self.options.require_ack {
            let bytes = record.encode()?;
            return session
                .connection
                .write_bytes(&bytes)
                .await
                .map_err(ClientError::WriteFailure);
        }

        let chunk = record.chunk()?;
        let bytes = record.encode()?;

        let mut abandoned = self.ack_lock.lock().await;
        session
            .connection
            .write_bytes(&bytes)
            .await
            .map_err(ClientError::WriteFailure)?;
        self.check_ack(&mut abandoned, &session.connection, &chunk)
            .await
    }

    pub async fn send_raw(&self, bytes: &[u8]) -> Result<(), ClientError> {
        let session = self.active_session().await?;
        session
            .connection
            .write_bytes(bytes)
            .await
            .map_err(ClientError::WriteFailure)
    }

    pub async fn send_message<T: Serialize>(&self, tag: &str, record: T) -> Result<(), ClientError> {
        let session = self.active_session().await?;
        self.send_message_on(&session, tag, record).await
    }

    pub async fn send_message_ext<T: Serialize>(
        &self,
        tag: &str,
        record: T,
    ) -> Result<(), ClientError> {
        let session = self.active_session().await?;
        self.send_message_ext_on(&session, tag, record).await
    }

    pub async fn send_forward(&self, tag: &str, entries: EntryList) -> Result<(), ClientError> {
        let session = self.active_session().await?;
        self.send_forward_on(&session, tag, entries).await
    }

    pub async fn send_packed(&self, tag: &str, entries: &EntryList) -> Result<(), ClientError> {
        let session = self.active_session().await?;
        self.send_packed_on(&session, tag, entries).await
    }

    pub async fn send_packed_from_bytes(
        &self,
        tag: &str,
        entry_stream: Vec<u8>,
    ) -> Result<(), ClientError> {
        let session = self.active_session().await?;
        self.send_packed_from_bytes_on(&session, tag, entry_stream)
            .await
    }

    pub async fn send_compressed(&self, tag: &str, entries: &EntryList) -> Result<(), ClientError> {
        let session = self.active_session().await?;
        self.send_compressed_on(&session, tag, entries).await
    }

    pub async fn send_compressed_from_bytes(
        &self,
        tag: &str,
        entry_stream: &[u8],
    ) -> Result<(), ClientError> {
        let session = self.active_session().await?;
        self.send_compressed_from_bytes_on(&session, tag, entry_stream)
            .await
    }

    // The `*_on` forms run on a session the caller already holds.

    pub(crate) async fn send_message_on<T: Serialize>(
        &self,
        session: &Session,
        tag: &str,
        record: T,
    ) -> Result<(), ClientError> {
        self.send_on(session, Message::new(tag, record)?).await
    }

    pub(crate) async fn send_message_ext_on<T: Serialize>(
        &self,
        session: &Session,
        tag: &str,
        record: T,
    ) -> Result<(), ClientError> {
        self.send_on(session, MessageExt::new(tag, record)?).await
    }

    pub(crate) async fn send_forward_on(
        &self,
        session: &Session,
        tag: &str,
        entries: EntryList,
    ) -> Result<(), ClientError> {
        self.send_on(session, ForwardMessage::new(tag, entries))
            .await
    }

    pub(crate) async fn send_packed_on(
        &self,
        session: &Session,
        tag: &str,
        entries: &EntryList,
    ) -> Result<(), ClientError> {
        self.send_on(session, PackedForwardMessage::new(tag, entries)?)
            .await
    }

    pub(crate) async fn send_packed_from_bytes_on(
        &self,
        session: &Session,
        tag: &str,
        entry_stream: Vec<u8>,
    ) -> Result<(), ClientError> {
        self.send_on(session, PackedForwardMessage::from_bytes(tag, entry_stream))
            .await
    }

    pub(crate) async fn send_compressed_on(
        &self,
        session: &Session,
        tag: &str,
        entries: &EntryList,
    ) -> Result<(), ClientError> {
        self.send_on(session, CompressedPackedForwardMessage::new(tag, entries)?)
            .await
    }

    pub(crate) async fn send_compressed_from_bytes_on(
        &self,
        session: &Session,
        tag: &str,
        entry_stream: &[u8],
    ) -> Result<(), ClientError> {
        let message = CompressedPackedForwardMessage::from_bytes(tag, entry_stream)?;
        self.send_on(session, message).await
    }
}

/// Reads frames until the ack for `chunk` arrives.
///
/// Acks of abandoned chunks are skipped; any other ack is a mismatch.
async fn read_ack(
    abandoned: &mut AbandonedChunks,
    connection: &Connection,
    chunk: &str,
) -> Result<(), ClientError> {
    loop {
        let ack: AckMessage = connection
            .read_frame()
            .await
            .map_err(|e| ClientError::AcknowledgmentFailure(e.to_string()))?;

        if ack.ack == chunk {
            return Ok(());
        }
        if abandoned.forget(&ack.ack) {
            debug!(chunk = %ack.ack, "skipping late ack of an abandoned chunk");
            continue;
        }
        return Err(ClientError::AcknowledgmentFailure(format!(
            "expected ack {chunk}, got {}",
            ack.ack
        )));
    }
}
