use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail, ensure};
use serde::Deserialize;
use tracing::Level;

use crate::handlers::HandlerSpec;
use crate::http::ProtocolSettings;
use crate::server::listener;

/// Environment variable overriding `listen` (comma-separated endpoints).
pub const LISTEN_ENV: &str = "HEARTH_LISTEN";

/// One endpoint or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Listen {
    One(String),
    Many(Vec<String>),
}

impl Listen {
    pub fn endpoints(&self) -> Vec<String> {
        match self {
            Listen::One(endpoint) => vec![endpoint.clone()],
            Listen::Many(endpoints) => endpoints.clone(),
        }
    }
}

impl Default for Listen {
    fn default() -> Self {
        Listen::One("127.0.0.1:9000".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ErrorLog {
    /// `-` for stderr, otherwise a file appended to.
    pub path: String,
    pub level: String,
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self {
            path: "-".to_string(),
            level: "info".to_string(),
        }
    }
}

impl ErrorLog {
    pub fn level(&self) -> anyhow::Result<Level> {
        Level::from_str(&self.level).map_err(|_| anyhow::anyhow!("invalid log level: {}", self.level))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub listen: Listen,
    pub backlog: i32,
    pub processes: usize,
    /// Concurrent connections per worker.
    pub connections: usize,
    pub workdir: PathBuf,
    pub daemon: bool,
    pub umask: u32,
    /// `user` or `user:group` to switch to after binding.
    pub user: Option<String>,
    /// Seconds.
    pub keepalive_timeout: u64,
    /// Seconds.
    pub graceful_timeout: u64,
    pub buffer_size: usize,
    pub limit_request_line: usize,
    pub limit_request_header: usize,
    pub sendfile: bool,
    pub error_log: ErrorLog,
    pub handler: HandlerSpec,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: Listen::default(),
            backlog: 2048,
            processes: 4,
            connections: 1000,
            workdir: PathBuf::from("."),
            daemon: false,
            umask: 0o022,
            user: None,
            keepalive_timeout: 5,
            graceful_timeout: 30,
            buffer_size: 8192,
            limit_request_line: 8192,
            limit_request_header: 8192,
            sendfile: true,
            error_log: ErrorLog::default(),
            handler: HandlerSpec::default(),
        }
    }
}

impl Config {
    /// Reads `path` (or starts from the defaults), applies the environment
    /// override and validates the result.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                Self::from_yaml(&text)
                    .with_context(|| format!("failed to parse config {}", path.display()))?
            }
            None => Self::default(),
        };
        if let Ok(listen) = std::env::var(LISTEN_ENV) {
            config.apply_listen_override(&listen);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Replaces `listen` with a comma-separated endpoint list.
    pub fn apply_listen_override(&mut self, value: &str) {
        let endpoints: Vec<String> = value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if !endpoints.is_empty() {
            self.listen = Listen::Many(endpoints);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.processes > 0, "processes must be at least 1");
        ensure!(
            (1..=u32::MAX as usize).contains(&self.connections),
            "connections must be between 1 and {}",
            u32::MAX
        );
        ensure!(self.backlog > 0, "backlog must be positive");
        ensure!(self.buffer_size > 0, "buffer_size must be positive");
        ensure!(self.limit_request_line > 0, "limit_request_line must be positive");
        ensure!(self.limit_request_header > 0, "limit_request_header must be positive");
        ensure!(self.umask <= 0o777, "umask must be at most 0o777");
        if self.listen.endpoints().is_empty() {
            bail!("listen must name at least one endpoint");
        }
        self.endpoints()?;
        self.error_log.level()?;
        Ok(())
    }

    /// Resolved listen addresses.
    pub fn endpoints(&self) -> anyhow::Result<Vec<SocketAddr>> {
        self.listen
            .endpoints()
            .iter()
            .map(|endpoint| listener::resolve(endpoint))
            .collect()
    }

    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_secs(self.keepalive_timeout)
    }

    pub fn graceful_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_timeout)
    }

    pub fn protocol(&self) -> ProtocolSettings {
        ProtocolSettings {
            limit_request_line: self.limit_request_line,
            limit_request_header: self.limit_request_header,
            buffer_size: self.buffer_size,
            keepalive_timeout: self.keepalive_timeout(),
            sendfile: self.sendfile,
        }
    }
}
