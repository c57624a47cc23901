use std::io::Write;
use std::time::Duration;

use hearth::config::{Config, Listen};
use hearth::handlers::HandlerSpec;

#[test]
fn test_config_defaults() {
    let cfg = Config::default();

    assert_eq!(cfg.listen.endpoints(), vec!["127.0.0.1:9000".to_string()]);
    assert_eq!(cfg.processes, 4);
    assert_eq!(cfg.connections, 1000);
    assert_eq!(cfg.backlog, 2048);
    assert_eq!(cfg.umask, 0o022);
    assert!(!cfg.daemon);
    assert!(cfg.user.is_none());
    assert_eq!(cfg.keepalive_timeout(), Duration::from_secs(5));
    assert_eq!(cfg.graceful_timeout(), Duration::from_secs(30));
    assert_eq!(cfg.error_log.path, "-");
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_config_empty_yaml_is_default() {
    let cfg = Config::from_yaml("   \n").unwrap();
    assert_eq!(cfg.processes, Config::default().processes);
    assert_eq!(cfg.handler, HandlerSpec::default());
}

#[test]
fn test_config_from_yaml() {
    let cfg = Config::from_yaml(
        r#"
listen: 0.0.0.0:8080
processes: 2
connections: 64
keepalive_timeout: 10
error_log:
  level: debug
handler:
  kind: chain
  handlers:
    - kind: access_log
    - kind: static
      location: /assets
      root: /srv/assets
    - kind: app
      name: hello
"#,
    )
    .unwrap();

    assert_eq!(cfg.listen, Listen::One("0.0.0.0:8080".to_string()));
    assert_eq!(cfg.processes, 2);
    assert_eq!(cfg.connections, 64);
    assert_eq!(cfg.keepalive_timeout(), Duration::from_secs(10));
    assert_eq!(cfg.error_log.level().unwrap(), tracing::Level::DEBUG);
    assert_eq!(cfg.error_log.path, "-");

    let HandlerSpec::Chain { handlers } = &cfg.handler else {
        panic!("expected a chain, got {:?}", cfg.handler);
    };
    assert_eq!(handlers.len(), 3);
    assert!(matches!(&handlers[0], HandlerSpec::AccessLog { path, .. } if path == "-"));
    assert!(matches!(&handlers[2], HandlerSpec::App { name } if name == "hello"));
}

#[test]
fn test_config_listen_list() {
    let cfg = Config::from_yaml("listen: [\"127.0.0.1:0\", \"[::1]:0\"]").unwrap();
    assert_eq!(cfg.listen.endpoints().len(), 2);
    assert_eq!(cfg.endpoints().unwrap().len(), 2);
}

#[test]
fn test_config_rejects_unknown_field() {
    assert!(Config::from_yaml("workers: 3").is_err());
    assert!(Config::from_yaml("handler:\n  kind: teleport").is_err());
}

#[test]
fn test_config_validation_errors() {
    let invalid: [fn(&mut Config); 6] = [
        |c| c.processes = 0,
        |c| c.connections = 0,
        |c| c.backlog = 0,
        |c| c.umask = 0o1000,
        |c| c.listen = Listen::Many(vec![]),
        |c| c.error_log.level = "loud".to_string(),
    ];

    for mutate in invalid {
        let mut cfg = Config::default();
        mutate(&mut cfg);
        assert!(cfg.validate().is_err(), "{cfg:?}");
    }
}

#[test]
fn test_config_unresolvable_listen() {
    let mut cfg = Config::default();
    cfg.listen = Listen::One("no-port-here".to_string());
    assert!(cfg.validate().is_err());
}

#[test]
fn test_config_listen_override() {
    let mut cfg = Config::default();
    cfg.apply_listen_override("127.0.0.1:7000, 127.0.0.1:7001");
    assert_eq!(
        cfg.listen.endpoints(),
        vec!["127.0.0.1:7000".to_string(), "127.0.0.1:7001".to_string()]
    );

    cfg.apply_listen_override(" , ");
    assert_eq!(cfg.listen.endpoints().len(), 2);
}

#[test]
fn test_config_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "listen: 127.0.0.1:0\nprocesses: 1\nsendfile: false").unwrap();

    let cfg = Config::load(Some(file.path())).unwrap();
    assert_eq!(cfg.processes, 1);
    assert!(!cfg.sendfile);
}

#[test]
fn test_config_load_missing_file() {
    let err = Config::load(Some(std::path::Path::new("/nonexistent/hearth.yaml"))).unwrap_err();
    assert!(err.to_string().contains("failed to read config"));
}

#[test]
fn test_config_protocol_settings() {
    let mut cfg = Config::default();
    cfg.limit_request_line = 100;
    cfg.limit_request_header = 200;
    cfg.buffer_size = 300;
    cfg.keepalive_timeout = 0;

    let protocol = cfg.protocol();
    assert_eq!(protocol.limit_request_line, 100);
    assert_eq!(protocol.limit_request_header, 200);
    assert_eq!(protocol.buffer_size, 300);
    assert!(protocol.keepalive_timeout.is_zero());
    assert!(protocol.sendfile);
}
