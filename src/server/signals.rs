//! Signal delivery for the supervisor.
//!
//! Handlers only write the signal number into a socket pair. The control
//! loop reads it back with a timeout and feeds a small bounded queue.

use std::collections::VecDeque;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use anyhow::Context;
use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use tracing::warn;

/// Pending signals kept at most; later ones are dropped.
pub const QUEUE_CAPACITY: usize = 5;

/// Signals the supervisor reacts to.
pub const SUPERVISOR_SIGNALS: [Signal; 5] = [
    Signal::SIGHUP,
    Signal::SIGQUIT,
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGCHLD,
];

static PIPE_WRITE_FD: AtomicI32 = AtomicI32::new(-1);
static PIPE_READ_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn on_signal(signo: nix::libc::c_int) {
    let fd = PIPE_WRITE_FD.load(Ordering::Relaxed);
    if fd < 0 {
        return;
    }
    let saved = Errno::last_raw();
    // SAFETY: the descriptor stays open for as long as it is published.
    let fd = unsafe { BorrowedFd::borrow_raw(fd) };
    let _ = nix::unistd::write(fd, &[signo as u8]);
    Errno::set_raw(saved);
}

/// Bounded FIFO of signals waiting for the control loop.
#[derive(Debug, Default)]
pub struct SignalQueue {
    pending: VecDeque<Signal>,
}

impl SignalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `sig`. A signal that is already pending is not queued twice.
    /// Returns `false` when the queue is full and the signal was dropped.
    pub fn push(&mut self, sig: Signal) -> bool {
        if self.pending.contains(&sig) {
            return true;
        }
        if self.pending.len() >= QUEUE_CAPACITY {
            return false;
        }
        self.pending.push_back(sig);
        true
    }

    pub fn pop(&mut self) -> Option<Signal> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Self-pipe the installed handlers write into.
pub struct SignalPipe {
    reader: UnixStream,
    _writer: UnixStream,
    signals: Vec<Signal>,
}

impl SignalPipe {
    pub fn install(signals: &[Signal]) -> anyhow::Result<Self> {
        let (reader, writer) = UnixStream::pair().context("failed to create signal pipe")?;
        writer.set_nonblocking(true)?;
        PIPE_READ_FD.store(reader.as_raw_fd(), Ordering::SeqCst);
        PIPE_WRITE_FD.store(writer.as_raw_fd(), Ordering::SeqCst);

        let action = SigAction::new(
            SigHandler::Handler(on_signal),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        for &sig in signals {
            // SAFETY: the handler only touches an atomic and calls write(2).
            unsafe { signal::sigaction(sig, &action) }
                .with_context(|| format!("failed to install handler for {sig}"))?;
        }

        Ok(Self {
            reader,
            _writer: writer,
            signals: signals.to_vec(),
        })
    }

    /// Waits up to `timeout` for signals and queues everything that arrived.
    pub fn collect(&mut self, queue: &mut SignalQueue, timeout: Duration) -> io::Result<()> {
        self.reader
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        let mut buf = [0u8; 64];
        let n = match self.reader.read(&mut buf) {
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        for &byte in &buf[..n] {
            let Ok(sig) = Signal::try_from(i32::from(byte)) else {
                continue;
            };
            if !queue.push(sig) {
                warn!(signal = %sig, "Signal queue full, dropping signal");
            }
        }
        Ok(())
    }
}

impl Drop for SignalPipe {
    fn drop(&mut self) {
        PIPE_READ_FD.store(-1, Ordering::SeqCst);
        PIPE_WRITE_FD.store(-1, Ordering::SeqCst);
        restore_defaults(&self.signals);
    }
}

/// Puts default dispositions back.
pub fn restore_defaults(signals: &[Signal]) {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for &sig in signals {
        // SAFETY: restoring SIG_DFL has no handler-safety requirements.
        let _ = unsafe { signal::sigaction(sig, &action) };
    }
}

/// Blocks `signals` for the calling thread and returns the previous mask.
pub fn block(signals: &[Signal]) -> nix::Result<SigSet> {
    let set: SigSet = signals.iter().copied().collect();
    let mut previous = SigSet::empty();
    signal::sigprocmask(SigmaskHow::SIG_BLOCK, Some(&set), Some(&mut previous))?;
    Ok(previous)
}

/// Reinstates a mask returned by [`block`].
pub fn restore_mask(mask: &SigSet) -> nix::Result<()> {
    signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(mask), None)
}

/// Drops the supervisor's signal plumbing in a freshly forked child: default
/// dispositions come back and the inherited self-pipe is closed, so nothing
/// the child receives reaches the supervisor's queue.
///
/// Only for the child side of a fork; the parent still owns the pipe.
pub fn detach_after_fork(signals: &[Signal]) {
    for slot in [&PIPE_READ_FD, &PIPE_WRITE_FD] {
        let fd = slot.swap(-1, Ordering::SeqCst);
        if fd >= 0 {
            let _ = nix::unistd::close(fd);
        }
    }
    restore_defaults(signals);
}
