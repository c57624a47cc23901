use std::io;
use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use std::time::Duration;

use nix::unistd::{Pid, getppid};
use tokio::net::TcpListener;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::Config;
use crate::handlers::Handler;
use crate::http::ProtocolSettings;
use crate::http::connection::Connection;

/// Exit status of a worker that could not start serving.
pub const BOOT_ERROR: i32 = 128;

/// Pause after an accept error so a full descriptor table does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

const PARENT_CHECK: Duration = Duration::from_secs(1);

/// Everything a worker needs besides its sockets.
#[derive(Clone)]
pub struct WorkerSettings {
    pub protocol: Arc<ProtocolSettings>,
    pub handler: Arc<dyn Handler>,
    pub connections: usize,
    pub graceful_timeout: Duration,
}

impl WorkerSettings {
    pub fn new(config: &Config, handler: Arc<dyn Handler>) -> Self {
        Self {
            protocol: Arc::new(config.protocol()),
            handler,
            connections: config.connections,
            graceful_timeout: config.graceful_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Quick,
    Graceful,
}

struct StopSignals {
    quit: Signal,
    term: Signal,
    int: Signal,
    hup: Signal,
}

impl StopSignals {
    fn register() -> io::Result<Self> {
        Ok(Self {
            quit: signal(SignalKind::quit())?,
            term: signal(SignalKind::terminate())?,
            int: signal(SignalKind::interrupt())?,
            hup: signal(SignalKind::hangup())?,
        })
    }

    /// Waits for a reason to stop. Losing the parent counts as graceful.
    async fn wait(&mut self, parent: Pid) -> Stop {
        let mut ticker = tokio::time::interval(PARENT_CHECK);
        loop {
            tokio::select! {
                _ = self.quit.recv() => return Stop::Graceful,
                _ = self.term.recv() => return Stop::Quick,
                _ = self.int.recv() => return Stop::Quick,
                _ = self.hup.recv() => debug!("Ignoring SIGHUP in worker"),
                _ = ticker.tick() => {
                    if getppid() != parent {
                        warn!("Supervisor went away");
                        return Stop::Graceful;
                    }
                }
            }
        }
    }
}

/// One worker process: a single-threaded event loop serving every listen
/// socket it inherited.
pub struct Worker {
    listeners: Vec<StdTcpListener>,
    settings: WorkerSettings,
    parent: Pid,
}

impl Worker {
    pub fn new(listeners: Vec<StdTcpListener>, settings: WorkerSettings) -> Self {
        Self {
            listeners,
            settings,
            parent: getppid(),
        }
    }

    /// Runs until told to stop and returns the process exit status.
    pub fn run(self) -> i32 {
        let span = info_span!("worker", pid = std::process::id());
        let _guard = span.enter();
        info!("Worker booting");

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(error = %e, "Failed to build runtime");
                return BOOT_ERROR;
            }
        };
        let code = runtime.block_on(self.serve().in_current_span());
        // Blocked application calls are not waited for.
        runtime.shutdown_background();
        info!(code, "Worker exiting");
        code
    }

    async fn serve(self) -> i32 {
        let Worker {
            listeners,
            settings,
            parent,
        } = self;

        let mut stop_signals = match StopSignals::register() {
            Ok(signals) => signals,
            Err(e) => {
                error!(error = %e, "Failed to register signal handlers");
                return BOOT_ERROR;
            }
        };
        let listeners = match listeners
            .into_iter()
            .map(TcpListener::from_std)
            .collect::<io::Result<Vec<_>>>()
        {
            Ok(listeners) => listeners,
            Err(e) => {
                error!(error = %e, "Failed to register listeners");
                return BOOT_ERROR;
            }
        };

        let permits = Arc::new(Semaphore::new(settings.connections));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut accept_loops = JoinSet::new();
        for listener in listeners {
            accept_loops.spawn(
                accept_loop(
                    listener,
                    Arc::clone(&permits),
                    Arc::clone(&settings.protocol),
                    Arc::clone(&settings.handler),
                    shutdown_rx.clone(),
                )
                .in_current_span(),
            );
        }

        let stop = stop_signals.wait(parent).await;
        info!(?stop, "Worker stopping");
        let _ = shutdown_tx.send(true);
        while accept_loops.join_next().await.is_some() {}

        if stop == Stop::Graceful {
            let total = u32::try_from(settings.connections).unwrap_or(u32::MAX);
            match tokio::time::timeout(settings.graceful_timeout, permits.acquire_many(total)).await
            {
                Ok(_) => debug!("All connections drained"),
                Err(_) => warn!(
                    active = settings.connections - permits.available_permits(),
                    "Graceful timeout expired, abandoning connections"
                ),
            }
        }
        0
    }
}

/// Accepts connections until `shutdown` flips, one task per connection.
///
/// A permit from `permits` is taken before each accept and held by the
/// connection task, so at most `permits` connections are served at once and
/// the rest wait in the kernel backlog.
pub async fn accept_loop(
    listener: TcpListener,
    permits: Arc<Semaphore>,
    protocol: Arc<ProtocolSettings>,
    handler: Arc<dyn Handler>,
    mut shutdown: watch::Receiver<bool>,
) {
    let addr = listener.local_addr().ok();
    debug!(?addr, "Accept loop started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let permit = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let (stream, peer) = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    drop(permit);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
        };

        let protocol = Arc::clone(&protocol);
        let handler = Arc::clone(&handler);
        tokio::spawn(
            async move {
                let _permit = permit;
                match Connection::new(stream, protocol, handler) {
                    Ok(mut conn) => {
                        if let Err(e) = conn.run().await {
                            debug!(peer = %peer, error = ?e, "Connection error");
                        }
                    }
                    Err(e) => debug!(peer = %peer, error = %e, "Failed to set up connection"),
                }
            }
            .in_current_span(),
        );
    }
    debug!(?addr, "Accept loop stopped");
}
