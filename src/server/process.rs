//! Process-level setup done once by the supervisor before any worker runs.

use std::fs::OpenOptions;
use std::os::fd::AsRawFd;
use std::path::Path;

use anyhow::{Context, bail};
use nix::sys::stat::{Mode, umask};
use nix::unistd::{ForkResult, Group, User, dup2, fork, setgid, setsid, setuid};
use tracing::info;

/// Detaches from the controlling terminal with the double-fork pattern and
/// points the standard streams at `/dev/null`.
///
/// Must run before anything spawns threads.
#[allow(unsafe_code)]
pub fn daemonize() -> anyhow::Result<()> {
    // SAFETY: called from the single-threaded supervisor before any runtime
    // or worker exists.
    if let ForkResult::Parent { .. } = unsafe { fork() }.context("first fork failed")? {
        std::process::exit(0);
    }
    setsid().context("setsid failed")?;
    // SAFETY: still single-threaded, see above.
    if let ForkResult::Parent { .. } = unsafe { fork() }.context("second fork failed")? {
        std::process::exit(0);
    }

    let devnull = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .context("failed to open /dev/null")?;
    for fd in 0..=2 {
        dup2(devnull.as_raw_fd(), fd).context("failed to redirect standard streams")?;
    }
    Ok(())
}

/// Sets the file mode creation mask, returning the previous one.
pub fn set_umask(mask: u32) -> u32 {
    let previous = umask(Mode::from_bits_truncate(mask as nix::libc::mode_t));
    previous.bits() as u32
}

/// Splits `user[:group]`.
pub fn parse_owner(spec: &str) -> anyhow::Result<(&str, Option<&str>)> {
    let (user, group) = match spec.split_once(':') {
        Some((user, group)) => (user, Some(group)),
        None => (spec, None),
    };
    if user.is_empty() || group.is_some_and(str::is_empty) {
        bail!("invalid user spec {spec:?}, expected user or user:group");
    }
    Ok((user, group))
}

/// Drops privileges to `user[:group]`. The group defaults to the user's
/// primary group and is switched first, while we may still do so.
pub fn set_owner(spec: &str) -> anyhow::Result<()> {
    let (user_name, group_name) = parse_owner(spec)?;
    let user = User::from_name(user_name)
        .with_context(|| format!("failed to look up user {user_name}"))?
        .with_context(|| format!("no such user: {user_name}"))?;
    let gid = match group_name {
        Some(name) => {
            Group::from_name(name)
                .with_context(|| format!("failed to look up group {name}"))?
                .with_context(|| format!("no such group: {name}"))?
                .gid
        }
        None => user.gid,
    };

    setgid(gid).context("setgid failed")?;
    setuid(user.uid).context("setuid failed")?;
    info!(user = user_name, gid = gid.as_raw(), "Dropped privileges");
    Ok(())
}

pub fn change_dir(dir: &Path) -> anyhow::Result<()> {
    std::env::set_current_dir(dir)
        .with_context(|| format!("failed to change directory to {}", dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_spec() {
        assert_eq!(parse_owner("www").unwrap(), ("www", None));
        assert_eq!(parse_owner("www:web").unwrap(), ("www", Some("web")));
        assert!(parse_owner(":web").is_err());
        assert!(parse_owner("www:").is_err());
    }
}
