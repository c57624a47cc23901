use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{Context, anyhow};

use crate::config::ErrorLog;

/// Installs the global subscriber described by `error_log`.
pub fn init(error_log: &ErrorLog) -> anyhow::Result<()> {
    let level = error_log.level()?;
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .with_level(true);

    let installed = if error_log.path == "-" {
        builder.with_writer(std::io::stderr).try_init()
    } else {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&error_log.path)
            .with_context(|| format!("failed to open error log {}", error_log.path))?;
        builder.with_ansi(false).with_writer(Mutex::new(file)).try_init()
    };
    installed.map_err(|e| anyhow!("failed to install log subscriber: {e}"))
}
