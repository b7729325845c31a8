//! Tests for server configuration

use super::*;

fn args() -> ServeArgs {
    ServeArgs {
        config: "config.toml".into(),
        secret: None,
        port: None,
    }
}

#[test]
fn test_defaults() {
    let cfg = ServerConfig::parse(r#"secret = "s""#).unwrap();

    assert_eq!(cfg.api_port, 8080);
    assert_eq!(cfg.subscriber_buffer, 64);
    assert!(cfg.upload_ack);
    assert_eq!(cfg.upload_idle(), Duration::from_secs(30));
    assert!(matches!(cfg.store, StoreConfig::Memory(ref m) if m.max_records == 100_000));
    assert!(cfg.mqtt.is_none());

    let engine = cfg.engine_config();
    assert_eq!(engine.persist.timeout, Duration::from_secs(5));
    assert_eq!(engine.persist.max_retries, 3);
}

#[test]
fn test_full_config() {
    let cfg = ServerConfig::parse(
        r#"
        api_port = 9000
        secret = "wipe-me"
        subscriber_buffer = 16
        upload_ack = false
        upload_idle_secs = 10
        shutdown_grace_secs = 2

        [store]
        kind = "file"
        dir = "/var/lib/gyro"

        [persist]
        queue = 32
        timeout_ms = 750
        max_retries = 1
        backoff_ms = 50

        [mqtt]
        host = "broker"
        topics = ["sample"]
        "#,
    )
    .unwrap();

    assert_eq!(cfg.api_port, 9000);
    assert!(!cfg.upload_ack);
    assert_eq!(cfg.upload_idle(), Duration::from_secs(10));
    assert_eq!(cfg.shutdown_grace(), Duration::from_secs(2));
    match &cfg.store {
        StoreConfig::File(f) => assert_eq!(f.dir, std::path::PathBuf::from("/var/lib/gyro")),
        other => panic!("expected file store, got {other:?}"),
    }
    let mqtt = cfg.mqtt.as_ref().unwrap();
    assert_eq!(mqtt.host, "broker");
    assert_eq!(mqtt.port, 1883);

    let engine = cfg.engine_config();
    assert_eq!(engine.subscriber_buffer, 16);
    assert_eq!(engine.persist.queue, 32);
    assert_eq!(engine.persist.timeout, Duration::from_millis(750));
    assert_eq!(engine.persist.backoff, Duration::from_millis(50));
}

#[test]
fn test_unknown_store_kind_rejected() {
    let err = ServerConfig::parse(
        r#"
        [store]
        kind = "mongo"
        "#,
    );
    assert!(err.is_err());
}

#[test]
fn test_empty_secret_is_fatal() {
    let cfg = ServerConfig::parse("").unwrap();

    let err = cfg.resolve(&args()).unwrap_err();

    assert!(matches!(err, ServerError::Config { context: "secret", .. }));
}

#[test]
fn test_cli_overrides_file() {
    let cfg = ServerConfig::parse(r#"secret = "from-file""#).unwrap();
    let args = ServeArgs {
        secret: Some("from-cli".into()),
        port: Some(7001),
        ..args()
    };

    let cfg = cfg.resolve(&args).unwrap();

    assert_eq!(cfg.secret, "from-cli");
    assert_eq!(cfg.api_port, 7001);
    assert_eq!(cfg.engine_config().secret, "from-cli");
}

#[test]
fn test_mqtt_without_topics_rejected() {
    let cfg = ServerConfig::parse(
        r#"
        secret = "s"
        [mqtt]
        topics = []
        "#,
    )
    .unwrap();

    assert!(matches!(
        cfg.resolve(&args()),
        Err(ServerError::Config { context: "mqtt", .. })
    ));
}

#[test]
fn test_zero_upload_idle_rejected() {
    let cfg = ServerConfig::parse(
        r#"
        secret = "s"
        upload_idle_secs = 0
        "#,
    )
    .unwrap();

    assert!(matches!(
        cfg.resolve(&args()),
        Err(ServerError::Config { context: "upload_idle_secs", .. })
    ));
}
