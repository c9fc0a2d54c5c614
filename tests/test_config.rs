use srs::config::Config;

#[test]
fn test_config_defaults() {
    let cfg = Config::default();

    assert_eq!(cfg.server.name, "srs/1.0");
    assert_eq!(cfg.server.listen_addr, "127.0.0.1:8080");
    assert_eq!(cfg.server.default_charset, "UTF-8");
    assert!(cfg.engine.io_threads >= 2);
    assert!(cfg.engine.max_worker_threads > cfg.engine.io_threads);
    assert_eq!(cfg.engine.worker_keep_alive_secs, 60);
    assert_eq!(cfg.engine.poll_batch, 8);
    assert_eq!(cfg.engine.max_pending_tasks, None);
}

#[test]
fn test_config_partial_yaml_keeps_defaults() {
    let cfg = Config::from_yaml_str(
        r#"
server:
  name: "static/2.5"
engine:
  io_threads: 3
  max_pending_tasks: 16
"#,
    )
    .unwrap();

    assert_eq!(cfg.server.name, "static/2.5");
    assert_eq!(cfg.server.listen_addr, "127.0.0.1:8080");
    assert_eq!(cfg.engine.io_threads, 3);
    assert_eq!(cfg.engine.max_pending_tasks, Some(16));
    assert_eq!(cfg.engine.poll_batch, 8);
}

#[test]
fn test_config_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("public");
    std::fs::create_dir(&root).unwrap();
    let path = dir.path().join("server-config.yaml");
    std::fs::write(
        &path,
        format!(
            "server:\n  listen_addr: \"0.0.0.0:3000\"\n  root_directory: \"{}\"\n",
            root.display()
        ),
    )
    .unwrap();

    let cfg = Config::from_file(&path).unwrap();
    assert_eq!(cfg.server.listen_addr, "0.0.0.0:3000");
    assert_eq!(cfg.server.root_directory, root);
    cfg.validate().unwrap();
}

#[test]
fn test_config_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Config::from_file(dir.path().join("nope.yaml")).is_err());
}

#[test]
fn test_config_rejects_bad_yaml() {
    assert!(Config::from_yaml_str("engine: [1, 2").is_err());
    assert!(Config::from_yaml_str("engine:\n  io_threads: many\n").is_err());
}

#[test]
fn test_config_server_name_format() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = Config::default();
    cfg.server.root_directory = dir.path().to_path_buf();

    for good in ["srs/1.0", "my-server/2.3", "a/b/9.9"] {
        cfg.server.name = good.to_string();
        assert!(cfg.validate().is_ok(), "{good}");
    }
    for bad in ["srs", "srs/1", "srs/1.10", "/1.0", "srs/x.y"] {
        cfg.server.name = bad.to_string();
        assert!(cfg.validate().is_err(), "{bad}");
    }
}

#[test]
fn test_config_name_without_version() {
    let mut cfg = Config::default();
    cfg.server.name = "static/1.2".to_string();

    assert_eq!(cfg.server.name_without_version(), "static");
}

#[test]
fn test_config_root_must_be_directory() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("file.txt");
    std::fs::write(&file, "x").unwrap();

    let mut cfg = Config::default();
    cfg.server.root_directory = file;
    assert!(cfg.validate().is_err());

    cfg.server.root_directory = dir.path().join("missing");
    assert!(cfg.validate().is_err());
}

#[test]
fn test_config_rejects_zero_engine_sizes() {
    let dir = tempfile::tempdir().unwrap();
    let base = {
        let mut cfg = Config::default();
        cfg.server.root_directory = dir.path().to_path_buf();
        cfg
    };

    let mut cfg = base.clone();
    cfg.engine.io_threads = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = base.clone();
    cfg.engine.max_worker_threads = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = base.clone();
    cfg.engine.poll_batch = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = base;
    cfg.engine.max_pending_tasks = Some(0);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_config_listen_from_env() {
    // Env is process-wide; this is the only test that touches it.
    unsafe {
        std::env::set_var("SRS_CONFIG", "does-not-exist.yaml");
        std::env::set_var("LISTEN", "0.0.0.0:5000");
    }
    let cfg = Config::load().unwrap();
    unsafe {
        std::env::remove_var("LISTEN");
        std::env::remove_var("SRS_CONFIG");
    }

    assert_eq!(cfg.server.listen_addr, "0.0.0.0:5000");
    assert_eq!(cfg.server.name, "srs/1.0");
}
