//! Process model: one supervisor, `processes` forked workers, shared
//! listen sockets.

pub mod arbiter;
pub mod listener;
pub mod process;
pub mod signals;
pub mod worker;

use std::path::PathBuf;

use anyhow::Context;
use tracing::{info, info_span};

use crate::config::Config;
use crate::handlers::AppRegistry;
use arbiter::{Arbiter, ForkSpawner, TICK};
use listener::bind_all;
use signals::{SUPERVISOR_SIGNALS, SignalPipe};

/// Sets the process up, binds the sockets, forks the workers and supervises
/// them until shutdown.
pub fn run(config: Config, config_path: Option<PathBuf>, apps: AppRegistry) -> anyhow::Result<()> {
    process::change_dir(&config.workdir)?;
    if config.daemon {
        process::daemonize()?;
    }
    process::set_umask(config.umask);

    let span = info_span!("arbiter", pid = std::process::id());
    let _guard = span.enter();

    let endpoints = bind_all(&config.listen.endpoints(), config.backlog)?;
    for endpoint in &endpoints {
        info!(addr = %endpoint.local_addr(), "Listening");
    }
    if let Some(user) = &config.user {
        process::set_owner(user)?;
    }

    let spawner = ForkSpawner::new(endpoints, &config, apps)?;
    let pipe = SignalPipe::install(&SUPERVISOR_SIGNALS).context("failed to install signal handlers")?;
    let mut arbiter = Arbiter::new(spawner, config.processes).with_config_path(config_path);
    arbiter.initialize()?;
    arbiter.run(pipe, TICK)
}
