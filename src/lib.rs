//! hearth - pre-fork HTTP/1.x application server
//!
//! A supervisor process forks workers that share the listening sockets.
//! Each worker runs a single-threaded event loop that parses requests off
//! the wire and drives them through a configurable handler chain.

pub mod config;
pub mod handlers;
pub mod http;
pub mod logging;
pub mod server;

use std::path::PathBuf;

pub use config::Config;
pub use handlers::AppRegistry;

/// Runs the server until a shutdown signal. Never returns in workers.
///
/// `config_path` is re-read on `SIGHUP`.
pub fn serve(config: Config, config_path: Option<PathBuf>, apps: AppRegistry) -> anyhow::Result<()> {
    server::run(config, config_path, apps)
}
