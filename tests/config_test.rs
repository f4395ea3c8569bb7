use fluent_buffered_client::app::{Config, ConfigError, LogLevel, Network};
use serial_test::serial;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const ENV_VARS: &[&str] = &[
    "FLUENT_NETWORK",
    "FLUENT_ADDRESS",
    "FLUENT_TAG",
    "BUFFER_SIZE",
    "FLUSH_INTERVAL_MS",
    "CONNECTION_TIMEOUT_SECS",
    "ACK_TIMEOUT_SECS",
    "REQUIRE_ACK",
    "FLUENT_SHARED_KEY",
    "FLUENT_USERNAME",
    "FLUENT_PASSWORD",
    "METRICS_INTERVAL_SECS",
    "LOG_LEVEL",
    "CONFIG_FILE",
];

fn clean_all_env_vars() {
    unsafe {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    }
}

#[test]
#[serial]
fn test_defaults() {
    clean_all_env_vars();
    let config = Config::from_args(["fluent-buffered-client"]).unwrap();

    assert_eq!(config.network, Network::Tcp);
    assert_eq!(config.address, "localhost:24224");
    assert_eq!(config.tag, "app.stdin");
    assert_eq!(config.buffer_size, 1024 * 1024);
    assert_eq!(config.flush_interval, Duration::from_secs(30));
    assert_eq!(config.connection_timeout, Duration::from_secs(60));
    assert_eq!(config.ack_timeout, Duration::from_secs(30));
    assert_eq!(config.metrics_interval, Duration::from_secs(10));
    assert!(!config.require_ack);
    assert_eq!(config.log_level, LogLevel::Info);
    assert!(config.auth_info().is_none());
}

#[test]
#[serial]
fn test_from_args() {
    clean_all_env_vars();
    let config = Config::from_args([
        "fluent-buffered-client",
        "--address",
        "fluentd:24224",
        "--tag",
        "web.access",
        "--buffer-size",
        "4096",
        "--flush-interval-ms",
        "250",
        "--require-ack",
        "--shared-key",
        "s3cret",
        "--username",
        "alice",
        "--password",
        "pw",
        "--log-level",
        "debug",
    ])
    .unwrap();

    assert_eq!(config.address, "fluentd:24224");
    assert_eq!(config.tag, "web.access");
    assert_eq!(config.buffer_size, 4096);
    assert_eq!(config.flush_interval, Duration::from_millis(250));
    assert!(config.require_ack);
    assert_eq!(config.log_level, LogLevel::Debug);

    let auth = config.auth_info().unwrap();
    assert_eq!(auth.shared_key, "s3cret");
    assert_eq!(auth.username, "alice");
    assert_eq!(auth.password, "pw");

    let options = config.buffered_client_options();
    assert_eq!(options.buffer_size, 4096);
    assert!(options.client.require_ack);
}

#[test]
#[serial]
fn test_from_environment() {
    clean_all_env_vars();
    unsafe {
        std::env::set_var("FLUENT_NETWORK", "unix");
        std::env::set_var("FLUENT_ADDRESS", "/var/run/fluentd.sock");
        std::env::set_var("BUFFER_SIZE", "2048");
        std::env::set_var("LOG_LEVEL", "WARN");
        std::env::set_var("FLUENT_SHARED_KEY", "s3cret");
        std::env::set_var("FLUENT_USERNAME", "alice");
    }

    let config = Config::from_env().unwrap();
    assert_eq!(config.network, Network::Unix);
    assert_eq!(config.address, "/var/run/fluentd.sock");
    assert_eq!(config.buffer_size, 2048);
    assert_eq!(config.log_level, LogLevel::Warn);
    assert_eq!(config.shared_key.as_deref(), Some("s3cret"));
    assert_eq!(config.username.as_deref(), Some("alice"));
    assert!(config.password.is_none());

    // clap reads the same variables.
    let from_args = Config::from_args(["fluent-buffered-client"]).unwrap();
    assert_eq!(from_args.network, Network::Unix);
    assert_eq!(from_args.buffer_size, 2048);

    clean_all_env_vars();
}

#[test]
#[serial]
fn test_invalid_environment_value() {
    clean_all_env_vars();
    unsafe {
        std::env::set_var("BUFFER_SIZE", "lots");
    }

    assert!(matches!(Config::from_env(), Err(ConfigError::EnvError(_))));
    clean_all_env_vars();
}

#[test]
#[serial]
fn test_from_file_keeps_defaults_for_missing_keys() {
    clean_all_env_vars();
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
address = "collector:24225"
tag = "batch.jobs"
flush_interval_ms = 1000
require_ack = true
"#
    )
    .unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.address, "collector:24225");
    assert_eq!(config.tag, "batch.jobs");
    assert_eq!(config.flush_interval, Duration::from_secs(1));
    assert!(config.require_ack);
    assert_eq!(config.buffer_size, 1024 * 1024);
    assert_eq!(config.ack_timeout, Duration::from_secs(30));
}

#[test]
#[serial]
fn test_config_file_argument_loads_file() {
    clean_all_env_vars();
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "tag = \"from.file\"").unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let config =
        Config::from_args(["fluent-buffered-client", "--config-file", path.as_str()]).unwrap();
    assert_eq!(config.tag, "from.file");
}

#[test]
#[serial]
fn test_malformed_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "buffer_size = \"big\"").unwrap();

    assert!(matches!(
        Config::from_file(file.path()),
        Err(ConfigError::ParseError(_))
    ));
    assert!(matches!(
        Config::from_file("/nonexistent/fluent.toml"),
        Err(ConfigError::FileError(_))
    ));
}

#[test]
fn test_validation_rejects_zero_values() {
    for (field, config) in [
        (
            "buffer_size",
            Config {
                buffer_size: 0,
                ..Config::default()
            },
        ),
        (
            "flush_interval_ms",
            Config {
                flush_interval_ms: 0,
                ..Config::default()
            },
        ),
        (
            "ack_timeout_secs",
            Config {
                ack_timeout_secs: 0,
                ..Config::default()
            },
        ),
        (
            "metrics_interval_secs",
            Config {
                metrics_interval_secs: 0,
                ..Config::default()
            },
        ),
    ] {
        assert!(
            matches!(config.validate(), Err(ConfigError::InvalidConfig(_))),
            "{field} = 0 should be rejected"
        );
    }
}

#[test]
fn test_validation_of_addresses() {
    let missing_port = Config {
        address: "localhost".to_string(),
        ..Config::default()
    };
    assert!(matches!(
        missing_port.validate(),
        Err(ConfigError::InvalidAddress(_))
    ));

    let bad_port = Config {
        address: "localhost:http".to_string(),
        ..Config::default()
    };
    assert!(matches!(
        bad_port.validate(),
        Err(ConfigError::InvalidAddress(_))
    ));

    let unix = Config {
        network: Network::Unix,
        address: "/tmp/fluent.sock".to_string(),
        ..Config::default()
    };
    assert!(unix.validate().is_ok());
}

#[test]
fn test_validation_of_credentials() {
    let user_without_key = Config {
        username: Some("alice".to_string()),
        password: Some("pw".to_string()),
        ..Config::default()
    };
    assert!(user_without_key.validate().is_err());

    let password_without_user = Config {
        shared_key: Some("s3cret".to_string()),
        password: Some("pw".to_string()),
        ..Config::default()
    };
    assert!(password_without_user.validate().is_err());
}

#[test]
#[serial]
fn test_unknown_flag_is_a_cli_error() {
    clean_all_env_vars();
    assert!(matches!(
        Config::from_args(["fluent-buffered-client", "--no-such-flag"]),
        Err(ConfigError::Cli(_))
    ));
}
