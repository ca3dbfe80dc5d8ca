//! `--daemon`: detach the supervisor from the controlling terminal.
//!
//! There is no daemonize crate anywhere in this stack, so this follows the
//! teacher's habit of reaching for raw `nix` wrappers directly (see
//! `user.rs`'s uid/gid map writers). The sequence is the standard
//! double-detach: fork once so the parent can exit immediately (the shell
//! sees a prompt back right away), `setsid` in the child to drop the
//! controlling terminal, then `chdir("/")` so the daemon doesn't pin
//! whatever directory it was launched from.
//!
//! Must run before `Supervisor::run` installs signal handlers and before the
//! listen socket (if any) is bound, so the detached process is the one that
//! actually owns them.

use anyhow::{Context, Result};
use nix::unistd::{self, ForkResult};

/// Forks and exits the parent. Only the child returns from this function.
pub fn daemonize() -> Result<()> {
    // SAFETY: called early in `main`, before any threads are spawned and
    // before any of this process's file descriptors are shared with a
    // child that might be confused by being forked mid-flight.
    match unsafe { unistd::fork() }.context("fork for daemonization")? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    unistd::setsid().context("setsid")?;
    unistd::chdir("/").context("chdir to /")?;
    Ok(())
}
