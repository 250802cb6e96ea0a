use super::*;
use std::io::Write;
use tempfile::NamedTempFile;

const MINIMAL: &str = r#"{
    "sa": {
        "debugAddr": ":8003",
        "grpc": { "address": ":9095" },
        "db": { "dbConnect": "postgres://sa@db/sa", "maxDbConns": 10 }
    }
}"#;

fn write_temp(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn args(config: Option<&Path>, grpc: Option<&str>, debug: Option<&str>) -> CliArgs {
    CliArgs {
        config: config.map(Path::to_path_buf),
        grpc_addr: grpc.map(str::to_string),
        debug_addr: debug.map(str::to_string),
    }
}

#[test]
fn missing_config_flag_is_rejected_before_reading_anything() {
    let parsed = CliArgs::try_parse_from(["sa-server"]).unwrap();
    if std::env::var_os("SA_CONFIG").is_none() {
        assert!(parsed.config.is_none());
    }

    let err = ServerConfig::try_from(args(None, None, None)).unwrap_err();
    assert!(err.to_string().contains("--config"), "{err}");
}

#[test]
fn flags_are_parsed() {
    let parsed = CliArgs::try_parse_from([
        "sa-server",
        "--config",
        "/etc/sa.json",
        "--grpc-addr",
        "127.0.0.1:1",
        "--debug-addr",
        ":2",
    ])
    .unwrap();
    assert_eq!(parsed.config.as_deref(), Some(Path::new("/etc/sa.json")));
    assert_eq!(parsed.grpc_addr.as_deref(), Some("127.0.0.1:1"));
    assert_eq!(parsed.debug_addr.as_deref(), Some(":2"));
}

#[test]
fn minimal_file_gets_defaults() {
    let file = write_temp(MINIMAL);
    let config = ServerConfig::try_from(args(Some(file.path()), None, None)).unwrap();

    assert_eq!(config.grpc.address, "0.0.0.0:9095");
    assert_eq!(config.grpc.max_connection_age_secs, None);
    assert_eq!(config.debug_addr.as_deref(), Some("0.0.0.0:8003"));
    assert_eq!(config.db.max_db_conns, 10);
    assert_eq!(config.db.max_idle_db_conns, 0);
    assert_eq!(config.parallelism_per_rpc, 0);
    assert!(config.features.is_empty());
    assert!(config.tls.is_none());
    assert_eq!(config.syslog, SyslogConfig::default());
}

#[test]
fn command_line_overrides_file_addresses() {
    let file = write_temp(MINIMAL);
    let config = ServerConfig::try_from(args(
        Some(file.path()),
        Some("127.0.0.1:7000"),
        Some(":7001"),
    ))
    .unwrap();

    assert_eq!(config.grpc.address, "127.0.0.1:7000");
    assert_eq!(config.debug_addr.as_deref(), Some("0.0.0.0:7001"));
}

#[test]
fn empty_overrides_are_ignored() {
    let file = write_temp(MINIMAL);
    let config = ServerConfig::try_from(args(Some(file.path()), Some(""), Some(""))).unwrap();
    assert_eq!(config.grpc.address, "0.0.0.0:9095");
    assert_eq!(config.debug_addr.as_deref(), Some("0.0.0.0:8003"));
}

#[test]
fn full_file_is_parsed() {
    let file = write_temp(
        r#"{
            "sa": {
                "grpc": { "address": "10.0.0.1:9095", "maxConnectionAgeSecs": 30, "timeoutSecs": 5 },
                "tls": { "certFile": "/c.pem", "keyFile": "/k.pem", "caCertFile": "/ca.pem" },
                "db": { "dbConnectFile": "/secrets/db", "maxDbConns": 20, "maxIdleDbConns": 4 },
                "features": { "StoreRevokerInfo": true },
                "parallelismPerRpc": 8
            },
            "syslog": { "stdoutLevel": 7, "json": true }
        }"#,
    );
    let config = ServerConfig::try_from(args(Some(file.path()), None, None)).unwrap();

    assert_eq!(
        config.grpc,
        GrpcConfig {
            address: "10.0.0.1:9095".to_string(),
            max_connection_age_secs: Some(30),
            timeout_secs: Some(5),
        }
    );
    assert_eq!(config.debug_addr, None);
    assert_eq!(
        config.tls.unwrap().ca_cert_file.as_deref(),
        Some(Path::new("/ca.pem"))
    );
    assert_eq!(config.db.max_idle_db_conns, 4);
    assert_eq!(config.features.get("StoreRevokerInfo"), Some(&true));
    assert_eq!(config.parallelism_per_rpc, 8);
    assert_eq!(
        config.syslog,
        SyslogConfig {
            stdout_level: 7,
            json: true
        }
    );
}

#[test]
fn malformed_file_is_an_error() {
    let file = write_temp("{ \"sa\": ");
    assert!(ServerConfig::try_from(args(Some(file.path()), None, None)).is_err());

    let unknown = write_temp(&MINIMAL.replace("\"debugAddr\"", "\"debugAddress\""));
    assert!(ServerConfig::try_from(args(Some(unknown.path()), None, None)).is_err());

    assert!(
        ServerConfig::try_from(args(Some(Path::new("/nonexistent/sa.json")), None, None)).is_err()
    );
}

#[test]
fn db_url_from_inline_string() {
    let db = DbConfig {
        db_connect: Some("postgres://sa@db/sa".to_string()),
        db_connect_file: None,
        max_db_conns: 0,
        max_idle_db_conns: 0,
    };
    assert_eq!(db.url().unwrap(), "postgres://sa@db/sa");
}

#[test]
fn db_url_from_file_is_trimmed() {
    let secret = write_temp("  postgres://sa:hunter2@db/sa\n");
    let db = DbConfig {
        db_connect: None,
        db_connect_file: Some(secret.path().to_path_buf()),
        max_db_conns: 0,
        max_idle_db_conns: 0,
    };
    assert_eq!(db.url().unwrap(), "postgres://sa:hunter2@db/sa");
}

#[test]
fn db_url_sources_are_exclusive_and_required() {
    let secret = write_temp("postgres://sa@db/sa");
    let both = DbConfig {
        db_connect: Some("postgres://sa@db/sa".to_string()),
        db_connect_file: Some(secret.path().to_path_buf()),
        max_db_conns: 0,
        max_idle_db_conns: 0,
    };
    assert!(both.url().is_err());

    let neither = DbConfig {
        db_connect: None,
        db_connect_file: None,
        max_db_conns: 0,
        max_idle_db_conns: 0,
    };
    assert!(neither.url().is_err());

    let empty = write_temp("\n");
    let blank = DbConfig {
        db_connect: None,
        db_connect_file: Some(empty.path().to_path_buf()),
        max_db_conns: 0,
        max_idle_db_conns: 0,
    };
    assert!(blank.url().is_err());
}

#[test]
fn addresses_are_normalized() {
    assert_eq!(normalize_addr(":9095"), "0.0.0.0:9095");
    assert_eq!(normalize_addr("127.0.0.1:9095"), "127.0.0.1:9095");
    assert_eq!(normalize_addr("[::1]:9095"), "[::1]:9095");
    assert_eq!(normalize_addr("sa.service:9095"), "sa.service:9095");
}
