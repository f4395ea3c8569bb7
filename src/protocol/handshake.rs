//! Shared-key handshake frames.
//!
//! The forwarder opens with `HELO`, the client answers with `PING` and the
//! forwarder closes the exchange with `PONG`. Both sides prove knowledge of
//! the shared key by hashing it together with the server nonce.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

pub const HELO: &str = "HELO";
pub const PING: &str = "PING";
pub const PONG: &str = "PONG";

/// Credentials used during the handshake.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthInfo {
    pub shared_key: String,
    pub username: String,
    pub password: String,
    /// Hostname announced in `PING`; defaults to the local hostname.
    pub hostname: Option<String>,
}

impl std::fmt::Debug for AuthInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthInfo")
            .field("shared_key", &"<redacted>")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("hostname", &self.hostname)
            .finish()
    }
}

impl AuthInfo {
    pub fn new(shared_key: impl Into<String>) -> Self {
        Self {
            shared_key: shared_key.into(),
            ..Self::default()
        }
    }

    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn resolved_hostname(&self) -> String {
        self.hostname.clone().unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|name| name.into_string().ok())
                .unwrap_or_else(|| "localhost".to_string())
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeloOptions {
    pub nonce: String,
    /// Salt for user authentication; empty when the forwarder does not
    /// require a username.
    #[serde(default)]
    pub auth: String,
    #[serde(default)]
    pub keepalive: bool,
}

/// `["HELO", options]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Helo(pub String, pub HeloOptions);

impl Helo {
    pub fn new(options: HeloOptions) -> Self {
        Self(HELO.to_string(), options)
    }

    pub fn is_valid(&self) -> bool {
        self.0 == HELO
    }

    pub fn options(&self) -> &HeloOptions {
        &self.1
    }
}

/// `["PING", hostname, shared_key_salt, shared_key_digest, username, password_digest]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping(
    pub String,
    pub String,
    pub String,
    pub String,
    pub String,
    pub String,
);

impl Ping {
    /// Builds the client answer to `helo` using a fresh salt.
    pub fn respond(helo: &Helo, auth: &AuthInfo, salt: &str) -> Self {
        let hostname = auth.resolved_hostname();
        let options = helo.options();
        let shared_key_digest = shared_key_digest(salt, &hostname, &options.nonce, &auth.shared_key);
        let password_digest = if options.auth.is_empty() {
            String::new()
        } else {
            password_digest(&options.auth, &auth.username, &auth.password)
        };

        Self(
            PING.to_string(),
            hostname,
            salt.to_string(),
            shared_key_digest,
            auth.username.clone(),
            password_digest,
        )
    }

    pub fn is_valid(&self) -> bool {
        self.0 == PING
    }

    pub fn hostname(&self) -> &str {
        &self.1
    }

    pub fn salt(&self) -> &str {
        &self.2
    }

    pub fn shared_key_digest(&self) -> &str {
        &self.3
    }

    pub fn username(&self) -> &str {
        &self.4
    }

    pub fn password_digest(&self) -> &str {
        &self.5
    }
}

/// `["PONG", auth_result, reason, server_hostname, shared_key_digest]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong(pub String, pub bool, pub String, pub String, pub String);

impl Pong {
    pub fn accepted(server_hostname: impl Into<String>, digest: impl Into<String>) -> Self {
        Self(
            PONG.to_string(),
            true,
            String::new(),
            server_hostname.into(),
            digest.into(),
        )
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self(
            PONG.to_string(),
            false,
            reason.into(),
            String::new(),
            String::new(),
        )
    }

    pub fn is_valid(&self) -> bool {
        self.0 == PONG
    }

    pub fn auth_result(&self) -> bool {
        self.1
    }

    pub fn reason(&self) -> &str {
        &self.2
    }

    pub fn server_hostname(&self) -> &str {
        &self.3
    }

    pub fn shared_key_digest(&self) -> &str {
        &self.4
    }
}

/// `hex(sha512(salt ‖ hostname ‖ nonce ‖ shared_key))`
pub fn shared_key_digest(salt: &str, hostname: &str, nonce: &str, shared_key: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(salt.as_bytes());
    hasher.update(hostname.as_bytes());
    hasher.update(nonce.as_bytes());
    hasher.update(shared_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// `hex(sha512(auth_salt ‖ username ‖ password))`
pub fn password_digest(auth_salt: &str, username: &str, password: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(auth_salt.as_bytes());
    hasher.update(username.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Random salt for the `PING` frame.
pub fn generate_salt() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_digest_matches_server_side_computation() {
        let helo = Helo::new(HeloOptions {
            nonce: "nonce-1".to_string(),
            auth: String::new(),
            keepalive: true,
        });
        let auth = AuthInfo {
            hostname: Some("client-host".to_string()),
            ..AuthInfo::new("secret")
        };

        let ping = Ping::respond(&helo, &auth, "salt-1");
        assert!(ping.is_valid());
        assert_eq!(ping.hostname(), "client-host");
        assert_eq!(
            ping.shared_key_digest(),
            shared_key_digest("salt-1", "client-host", "nonce-1", "secret")
        );
        assert!(ping.password_digest().is_empty());
    }

    #[test]
    fn test_password_digest_only_when_server_requests_auth() {
        let helo = Helo::new(HeloOptions {
            nonce: "n".to_string(),
            auth: "user-salt".to_string(),
            keepalive: false,
        });
        let auth = AuthInfo {
            hostname: Some("h".to_string()),
            ..AuthInfo::new("k").with_user("alice", "pw")
        };

        let ping = Ping::respond(&helo, &auth, "s");
        assert_eq!(ping.username(), "alice");
        assert_eq!(ping.password_digest(), password_digest("user-salt", "alice", "pw"));
    }

    #[test]
    fn test_frames_use_array_encoding() {
        let pong = Pong::rejected("bad key");
        let encoded = serde_json::to_string(&pong).unwrap();
        assert_eq!(encoded, r#"["PONG",false,"bad key","",""]"#);

        let decoded: Pong = serde_json::from_str(&encoded).unwrap();
        assert!(decoded.is_valid());
        assert!(!decoded.auth_result());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let auth = AuthInfo::new("top-secret").with_user("bob", "hunter2");
        let rendered = format!("{auth:?}");
        assert!(!rendered.contains("top-secret"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("bob"));
    }
}
