use super::{Config, ConfigError, Network};

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_address()?;

        if self.tag.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "Tag must not be empty".to_string(),
            ));
        }

        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        if self.flush_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "Flush interval must be greater than 0".to_string(),
            ));
        }

        // Validate timeouts
        if self.connection_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "Connection timeout must be greater than 0".to_string(),
            ));
        }
        if self.ack_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "Ack timeout must be greater than 0".to_string(),
            ));
        }

        if self.metrics_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "Metrics interval must be greater than 0".to_string(),
            ));
        }

        // User authentication rides on the shared-key handshake.
        if (self.username.is_some() || self.password.is_some()) && self.shared_key.is_none() {
            return Err(ConfigError::InvalidConfig(
                "Username and password require a shared key".to_string(),
            ));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(ConfigError::InvalidConfig(
                "Password given without a username".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_address(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::InvalidAddress(
                "Address must not be empty".to_string(),
            ));
        }

        match self.network {
            Network::Tcp => {
                let Some((host, port)) = self.address.rsplit_once(':') else {
                    return Err(ConfigError::InvalidAddress(format!(
                        "Expected host:port, got '{}'",
                        self.address
                    )));
                };
                if host.is_empty() {
                    return Err(ConfigError::InvalidAddress(format!(
                        "Missing host in '{}'",
                        self.address
                    )));
                }
                port.parse::<u16>().map_err(|e| {
                    ConfigError::InvalidAddress(format!(
                        "Invalid port in '{}': {e}",
                        self.address
                    ))
                })?;
            }
            Network::Unix => {
                if cfg!(not(unix)) {
                    return Err(ConfigError::InvalidConfig(
                        "Unix sockets are not supported on this platform".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }
}
