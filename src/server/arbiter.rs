//! Worker supervision.
//!
//! The arbiter keeps `processes` workers alive, turns OS signals into
//! shutdown and reload actions, and reaps exited children. It runs without
//! an async runtime; workers are forked from it and never return into it.

use std::collections::{BTreeMap, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use nix::errno::Errno;
use nix::sys::signal::{self, SigSet, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::handlers::AppRegistry;
use crate::server::listener::ListenEndpoint;
use crate::server::signals::{self, SignalPipe, SignalQueue, SUPERVISOR_SIGNALS};
use crate::server::worker::{BOOT_ERROR, Worker, WorkerSettings};

/// Pause between signals sent to consecutive workers.
pub const KILL_INTERVAL: Duration = Duration::from_millis(100);

/// How long the control loop waits for a signal before re-checking the
/// worker count.
pub const TICK: Duration = Duration::from_secs(1);

/// How a reaped worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Exited(i32),
    Signaled(Signal),
}

impl WorkerExit {
    pub fn is_boot_error(&self) -> bool {
        *self == WorkerExit::Exited(BOOT_ERROR)
    }
}

#[derive(Debug, Error)]
pub enum ArbiterError {
    #[error("worker {0} failed to boot")]
    WorkerBoot(Pid),
}

/// Creates, signals and reaps worker processes.
pub trait Spawner {
    /// Starts a worker and returns its pid. Only the parent returns.
    fn spawn(&mut self) -> anyhow::Result<Pid>;

    fn kill(&mut self, pid: Pid, sig: Signal) -> nix::Result<()>;

    /// Collects one exited child without blocking.
    fn reap(&mut self) -> nix::Result<Option<(Pid, WorkerExit)>>;

    /// Applies a reloaded configuration to workers spawned from now on.
    fn reconfigure(&mut self, config: &Config) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterState {
    Booting,
    Running,
    Draining,
    Terminating,
    Stopped,
}

/// Whether the control loop goes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

type SignalAction<S> = fn(&mut Arbiter<S>) -> anyhow::Result<Flow>;

pub struct Arbiter<S: Spawner> {
    spawner: S,
    processes: usize,
    /// Live workers and their spawn sequence number.
    workers: BTreeMap<Pid, u64>,
    next_seq: u64,
    state: ArbiterState,
    actions: HashMap<Signal, SignalAction<S>>,
    kill_interval: Duration,
    config_path: Option<PathBuf>,
}

impl<S: Spawner> Arbiter<S> {
    pub fn new(spawner: S, processes: usize) -> Self {
        let mut actions: HashMap<Signal, SignalAction<S>> = HashMap::new();
        actions.insert(Signal::SIGTERM, |a| a.shutdown(Signal::SIGTERM));
        actions.insert(Signal::SIGINT, |a| a.shutdown(Signal::SIGINT));
        actions.insert(Signal::SIGQUIT, |a| a.shutdown(Signal::SIGQUIT));
        actions.insert(Signal::SIGHUP, Self::reload);
        actions.insert(Signal::SIGCHLD, |a| {
            a.reap()?;
            Ok(Flow::Continue)
        });

        Self {
            spawner,
            processes,
            workers: BTreeMap::new(),
            next_seq: 0,
            state: ArbiterState::Booting,
            actions,
            kill_interval: KILL_INTERVAL,
            config_path: None,
        }
    }

    pub fn with_kill_interval(mut self, interval: Duration) -> Self {
        self.kill_interval = interval;
        self
    }

    /// File re-read on `SIGHUP`. Without one, reload uses the defaults.
    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn state(&self) -> ArbiterState {
        self.state
    }

    pub fn processes(&self) -> usize {
        self.processes
    }

    pub fn worker_pids(&self) -> Vec<Pid> {
        self.workers.keys().copied().collect()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn spawner(&self) -> &S {
        &self.spawner
    }

    pub fn spawner_mut(&mut self) -> &mut S {
        &mut self.spawner
    }

    /// Spawns the initial set of workers.
    pub fn initialize(&mut self) -> anyhow::Result<()> {
        info!(processes = self.processes, "Arbiter booting");
        while self.workers.len() < self.processes {
            self.spawn_worker()?;
        }
        self.state = ArbiterState::Running;
        Ok(())
    }

    /// Runs the control loop until a shutdown signal.
    pub fn run(&mut self, mut pipe: SignalPipe, tick: Duration) -> anyhow::Result<()> {
        let mut queue = SignalQueue::new();
        loop {
            if queue.is_empty() {
                pipe.collect(&mut queue, tick)
                    .context("failed to read signal pipe")?;
            }
            if self.step(queue.pop())? == Flow::Exit {
                info!("Arbiter exiting");
                return Ok(());
            }
        }
    }

    /// One control-loop iteration: handle `signal`, or on a quiet tick reap
    /// and restore the worker count.
    pub fn step(&mut self, signal: Option<Signal>) -> anyhow::Result<Flow> {
        let Some(sig) = signal else {
            self.reap()?;
            self.maintain()?;
            return Ok(Flow::Continue);
        };
        match self.actions.get(&sig).copied() {
            Some(action) => {
                debug!(signal = %sig, "Handling signal");
                action(self)
            }
            None => {
                warn!(signal = %sig, "Ignoring unexpected signal");
                Ok(Flow::Continue)
            }
        }
    }

    fn spawn_worker(&mut self) -> anyhow::Result<Pid> {
        let pid = self.spawner.spawn()?;
        self.workers.insert(pid, self.next_seq);
        self.next_seq += 1;
        info!(worker = pid.as_raw(), "Spawned worker");
        Ok(pid)
    }

    fn kill_worker(&mut self, pid: Pid, sig: Signal) -> anyhow::Result<()> {
        match self.spawner.kill(pid, sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to send {sig} to {pid}")),
        }
    }

    /// Collects every exited worker. A boot failure aborts the arbiter.
    fn reap(&mut self) -> anyhow::Result<()> {
        loop {
            match self.spawner.reap() {
                Ok(Some((pid, exit))) => {
                    let tracked = self.workers.remove(&pid).is_some();
                    info!(worker = pid.as_raw(), ?exit, tracked, "Reaped worker");
                    if exit.is_boot_error() {
                        error!(worker = pid.as_raw(), "Worker failed to boot");
                        self.signal_all(Signal::SIGTERM)?;
                        self.state = ArbiterState::Stopped;
                        return Err(ArbiterError::WorkerBoot(pid).into());
                    }
                }
                Ok(None) | Err(Errno::ECHILD) => return Ok(()),
                Err(e) => return Err(e).context("failed to reap workers"),
            }
        }
    }

    /// Spawns missing workers and retires excess ones, oldest first.
    fn maintain(&mut self) -> anyhow::Result<()> {
        while self.workers.len() < self.processes {
            self.spawn_worker()?;
        }
        while self.workers.len() > self.processes {
            let Some(pid) = self
                .workers
                .iter()
                .min_by_key(|(_, seq)| **seq)
                .map(|(pid, _)| *pid)
            else {
                break;
            };
            self.workers.remove(&pid);
            info!(worker = pid.as_raw(), "Retiring excess worker");
            self.kill_worker(pid, Signal::SIGQUIT)?;
        }
        Ok(())
    }

    /// Forwards `sig` to every worker, pausing between sends.
    fn signal_all(&mut self, sig: Signal) -> anyhow::Result<()> {
        let pids = std::mem::take(&mut self.workers);
        for pid in pids.into_keys() {
            self.kill_worker(pid, sig)?;
            if !self.kill_interval.is_zero() {
                thread::sleep(self.kill_interval);
            }
        }
        Ok(())
    }

    fn shutdown(&mut self, sig: Signal) -> anyhow::Result<Flow> {
        self.state = if sig == Signal::SIGQUIT {
            ArbiterState::Draining
        } else {
            ArbiterState::Terminating
        };
        info!(signal = %sig, workers = self.workers.len(), "Shutting down");
        self.signal_all(sig)?;
        self.state = ArbiterState::Stopped;
        Ok(Flow::Exit)
    }

    /// Starts a new generation of workers from the re-read configuration and
    /// gracefully retires the old one. A bad configuration is ignored.
    fn reload(&mut self) -> anyhow::Result<Flow> {
        info!(path = ?self.config_path, "Reloading configuration");
        let config = match Config::load(self.config_path.as_deref()) {
            Ok(config) => config,
            Err(e) => {
                error!(error = ?e, "Reload failed, keeping current configuration");
                return Ok(Flow::Continue);
            }
        };
        if let Err(e) = self.spawner.reconfigure(&config) {
            error!(error = ?e, "Reload failed, keeping current configuration");
            return Ok(Flow::Continue);
        }

        self.processes = config.processes;
        let old = self.worker_pids();
        for _ in 0..self.processes {
            self.spawn_worker()?;
        }
        for pid in old {
            self.workers.remove(&pid);
            self.kill_worker(pid, Signal::SIGQUIT)?;
        }
        Ok(Flow::Continue)
    }
}

/// Forks real worker processes that serve the shared listen sockets.
pub struct ForkSpawner {
    endpoints: Vec<ListenEndpoint>,
    settings: WorkerSettings,
    apps: AppRegistry,
}

impl ForkSpawner {
    pub fn new(endpoints: Vec<ListenEndpoint>, config: &Config, apps: AppRegistry) -> anyhow::Result<Self> {
        let handler = config
            .handler
            .build(&apps)
            .context("failed to build handlers")?;
        Ok(Self {
            endpoints,
            settings: WorkerSettings::new(config, handler),
            apps,
        })
    }

    pub fn endpoints(&self) -> &[ListenEndpoint] {
        &self.endpoints
    }

    fn become_worker(&self, mask: &SigSet) -> i32 {
        signals::detach_after_fork(&SUPERVISOR_SIGNALS);
        if let Err(e) = signals::restore_mask(mask) {
            error!(error = %e, "Failed to unblock signals");
            return BOOT_ERROR;
        }
        let listeners = match self
            .endpoints
            .iter()
            .map(ListenEndpoint::try_clone_listener)
            .collect::<std::io::Result<Vec<_>>>()
        {
            Ok(listeners) => listeners,
            Err(e) => {
                error!(error = %e, "Failed to take over listen sockets");
                return BOOT_ERROR;
            }
        };
        let worker = Worker::new(listeners, self.settings.clone());
        catch_unwind(AssertUnwindSafe(|| worker.run())).unwrap_or(1)
    }
}

impl Spawner for ForkSpawner {
    #[allow(unsafe_code)]
    fn spawn(&mut self) -> anyhow::Result<Pid> {
        // Held until the child has dropped the supervisor's handlers.
        let mask = signals::block(&SUPERVISOR_SIGNALS).context("failed to block signals")?;
        // SAFETY: the arbiter is single-threaded; the child builds its own
        // runtime and exits without returning here.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => std::process::exit(self.become_worker(&mask)),
            Ok(ForkResult::Parent { child }) => {
                signals::restore_mask(&mask).context("failed to unblock signals")?;
                Ok(child)
            }
            Err(e) => {
                let _ = signals::restore_mask(&mask);
                Err(e).context("fork failed")
            }
        }
    }

    fn kill(&mut self, pid: Pid, sig: Signal) -> nix::Result<()> {
        signal::kill(pid, sig)
    }

    fn reap(&mut self) -> nix::Result<Option<(Pid, WorkerExit)>> {
        loop {
            match waitpid(None::<Pid>, Some(WaitPidFlag::WNOHANG))? {
                WaitStatus::Exited(pid, code) => return Ok(Some((pid, WorkerExit::Exited(code)))),
                WaitStatus::Signaled(pid, sig, _) => {
                    return Ok(Some((pid, WorkerExit::Signaled(sig))));
                }
                WaitStatus::StillAlive => return Ok(None),
                _ => continue,
            }
        }
    }

    fn reconfigure(&mut self, config: &Config) -> anyhow::Result<()> {
        let bound: Vec<_> = self.endpoints.iter().map(ListenEndpoint::local_addr).collect();
        if !matches!(config.endpoints(), Ok(listen) if listen == bound) {
            warn!(?bound, "Listen addresses cannot change on reload, keeping current sockets");
        }
        let handler = config
            .handler
            .build(&self.apps)
            .context("failed to build handlers")?;
        self.settings = WorkerSettings::new(config, handler);
        Ok(())
    }
}
