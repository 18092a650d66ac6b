//! Configuration Tests

use std::io::Write;
use std::time::Duration;

use relaykv::config::{MAX_APP_NAME_LEN, MAX_RESPONSE_TIMEOUT_MS};
use relaykv::{Config, RelayError};
use tempfile::NamedTempFile;

#[test]
fn test_defaults_are_valid() {
    let config = Config::default();
    config.validate().unwrap();

    assert_eq!(config.response_timeout(), Duration::from_millis(200));
    assert_eq!(config.drain_grace(), Duration::from_millis(400));
    assert_eq!(config.endpoint(), "127.0.0.1:8080");
    assert!(config.is_loopback_host());
}

#[test]
fn test_builder() {
    let config = Config::builder()
        .host("proxy.internal")
        .port(5080)
        .namespace("sessions")
        .app_name("checkout")
        .response_timeout_ms(500)
        .retry_enabled(true)
        .use_compression(true)
        .compression_threshold(64)
        .worker_threads(2)
        .build();

    config.validate().unwrap();
    assert_eq!(config.endpoint(), "proxy.internal:5080");
    assert_eq!(config.namespace, "sessions");
    assert!(config.retry_enabled);
    assert!(!config.is_loopback_host());
}

#[test]
fn test_toml_keeps_defaults_for_missing_keys() {
    let config = Config::from_toml_str(
        r#"
        host = "10.1.2.3"
        port = 9000
        namespace = "orders"
        retry_enabled = true

        [tls]
        enabled = true
        accept_invalid_certs = true
        "#,
    )
    .unwrap();

    assert_eq!(config.host, "10.1.2.3");
    assert_eq!(config.port, 9000);
    assert_eq!(config.namespace, "orders");
    assert!(config.retry_enabled);
    assert!(config.tls.enabled);
    assert_eq!(config.response_timeout_ms, Config::default().response_timeout_ms);
    config.validate().unwrap();
}

#[test]
fn test_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "namespace = \"from-file\"").unwrap();
    writeln!(file, "connection_lifetime_ms = 10000").unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.namespace, "from-file");
    assert_eq!(config.connection_lifetime(), Duration::from_secs(10));
}

#[test]
fn test_bad_toml() {
    let err = Config::from_toml_str("port = \"eighty\"").unwrap_err();
    assert!(matches!(err, RelayError::Config(_)));
}

#[test]
fn test_missing_file() {
    let err = Config::from_file("/nonexistent/relaykv.toml").unwrap_err();
    assert!(matches!(err, RelayError::Io(_)));
}

#[test]
fn test_validation_limits() {
    let too_slow = Config::builder()
        .response_timeout_ms(MAX_RESPONSE_TIMEOUT_MS + 1)
        .build();
    assert!(matches!(too_slow.validate(), Err(RelayError::Config(_))));

    let no_namespace = Config::builder().namespace("").build();
    assert!(matches!(no_namespace.validate(), Err(RelayError::Config(_))));

    let long_app = Config::builder().app_name("a".repeat(MAX_APP_NAME_LEN + 1)).build();
    assert!(matches!(long_app.validate(), Err(RelayError::Config(_))));

    let ttl = Config::builder().default_ttl_secs(100).max_ttl_secs(10).build();
    assert!(matches!(ttl.validate(), Err(RelayError::Config(_))));

    let no_workers = Config::builder().worker_threads(0).build();
    assert!(matches!(no_workers.validate(), Err(RelayError::Config(_))));
}

#[test]
fn test_tls_needs_roots_unless_verification_is_off() {
    let mut config = Config::default();
    config.tls.enabled = true;
    assert!(matches!(config.validate(), Err(RelayError::Config(_))));

    config.tls.accept_invalid_certs = true;
    config.validate().unwrap();
    relaykv::network::build_connector(&config.tls).unwrap();
}
