//! Server configuration.
//!
//! Configuration is read from a YAML file and then patched from the
//! environment. Every field has a default so a partial (or missing) file
//! still yields a usable configuration.
//!
//! ```yaml
//! server:
//!   name: "srs/1.0"
//!   listen_addr: "0.0.0.0:8080"
//!   root_directory: "./public"
//!   default_charset: "UTF-8"
//! engine:
//!   io_threads: 4
//!   max_pending_tasks: 1024
//! ```

use anyhow::{Context, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File read by [`Config::load`] when `SRS_CONFIG` is not set.
pub const DEFAULT_CONFIG_FILE: &str = "server-config.yaml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Product token sent in the `Server` header, `<product>/<major>.<minor>`.
    pub name: String,
    pub listen_addr: String,
    /// Directory static resources are served from.
    pub root_directory: PathBuf,
    /// Charset appended to the content type of text resources.
    pub default_charset: String,
}

/// Sizing of the connection-processing engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub io_threads: usize,
    pub max_worker_threads: usize,
    pub worker_keep_alive_secs: u64,
    /// Connections taken from an inbound or outbound queue per loop turn.
    pub poll_batch: usize,
    /// Sleep between idle I/O loop turns.
    pub loop_interval_ms: u64,
    /// When set, I/O threads hold back new tasks while this many are
    /// unfinished. `None` keeps the worker queue unbounded.
    pub max_pending_tasks: Option<usize>,
    /// Largest request head a connection may buffer before it is dropped.
    pub max_request_head_bytes: usize,
}

fn parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "srs/1.0".to_string(),
            listen_addr: "127.0.0.1:8080".to_string(),
            root_directory: PathBuf::from("public"),
            default_charset: "UTF-8".to_string(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            io_threads: parallelism().max(2),
            max_worker_threads: parallelism() * 64 + 1,
            worker_keep_alive_secs: 60,
            poll_batch: 8,
            loop_interval_ms: 1,
            max_pending_tasks: None,
            max_request_head_bytes: 64 * 1024,
        }
    }
}

impl Config {
    /// Loads the file named by `SRS_CONFIG` (or [`DEFAULT_CONFIG_FILE`]),
    /// then applies the `LISTEN` override.
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("SRS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let path = Path::new(&path);

        let mut cfg = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };

        if let Ok(listen_addr) = std::env::var("LISTEN") {
            cfg.server.listen_addr = listen_addr;
        }

        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        Self::from_yaml_str(&text)
            .with_context(|| format!("cannot parse config file {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Checks values serde cannot: name format, root directory, engine sizes.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !is_valid_server_name(&self.server.name) {
            bail!(
                "server.name '{}' must look like '<product>/<major>.<minor>'",
                self.server.name
            );
        }
        if !self.server.root_directory.is_dir() {
            bail!(
                "server.root_directory '{}' is not a directory",
                self.server.root_directory.display()
            );
        }

        let engine = &self.engine;
        if engine.io_threads == 0 {
            bail!("engine.io_threads must be at least 1");
        }
        if engine.max_worker_threads == 0 {
            bail!("engine.max_worker_threads must be at least 1");
        }
        if engine.poll_batch == 0 {
            bail!("engine.poll_batch must be at least 1");
        }
        if engine.max_pending_tasks == Some(0) {
            bail!("engine.max_pending_tasks must be at least 1 when set");
        }

        Ok(())
    }
}

impl ServerConfig {
    /// `"srs/1.0"` -> `"srs"`. Used to name engine threads.
    pub fn name_without_version(&self) -> &str {
        self.name
            .rsplit_once('/')
            .map(|(product, _)| product)
            .unwrap_or(&self.name)
    }
}

impl EngineConfig {
    pub fn worker_keep_alive(&self) -> Duration {
        Duration::from_secs(self.worker_keep_alive_secs)
    }

    pub fn loop_interval(&self) -> Duration {
        Duration::from_millis(self.loop_interval_ms)
    }
}

fn is_valid_server_name(name: &str) -> bool {
    let Some((product, version)) = name.rsplit_once('/') else {
        return false;
    };
    let version = version.as_bytes();

    !product.is_empty()
        && version.len() == 3
        && version[0].is_ascii_digit()
        && version[1] == b'.'
        && version[2].is_ascii_digit()
}
