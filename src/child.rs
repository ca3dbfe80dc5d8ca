//! Child builder (§4.4): the pure function that runs inside the freshly
//! cloned process and turns it into a jailed process, or exits 1 trying.
//!
//! `build_and_exec` never returns on success — it ends in `execve`. Every
//! containment step is fatal on failure: there is no unwinding a cloned,
//! not-yet-`exec`'d process back to a caller that no longer conceptually
//! exists, so failures are logged to the log pipe and the process exits
//! directly.

use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::Path;

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::unistd::{self, Gid, Uid};

use crate::config::JailConfig;
use crate::rlimit::HardLimits;
use crate::{caps, mount, personality, rlimit, seccomp, user};

/// The three stdio descriptors the child inherits (from the listener's
/// accepted connection, from the controlling terminal, or from
/// `/dev/null` when `--silent` is set).
pub struct ChildFds {
    pub stdin: OwnedFd,
    pub stdout: OwnedFd,
    pub stderr: OwnedFd,
}

/// Never returns: either it reaches `execve` or it calls `process::exit(1)`.
pub fn build_and_exec(
    cfg: &JailConfig,
    fds: ChildFds,
    outer_uid: Uid,
    outer_gid: Gid,
    rlimit_hard: HardLimits,
    log_fd: RawFd,
) -> ! {
    if let Err(e) = run(cfg, fds, outer_uid, outer_gid, rlimit_hard, log_fd) {
        log_to_pipe(log_fd, &format!("containment failed: {e}"));
        std::process::exit(1);
    }
    unreachable!("run() only returns on error");
}

fn run(
    cfg: &JailConfig,
    fds: ChildFds,
    outer_uid: Uid,
    outer_gid: Gid,
    rlimit_hard: HardLimits,
    log_fd: RawFd,
) -> anyhow::Result<()> {
    use anyhow::Context;

    // 1. Prepare environment.
    unistd::sethostname(&cfg.hostname).context("sethostname")?;
    personality::apply(cfg.persona).context("personality")?;
    log_to_pipe(log_fd, "hostname and personality set");

    // 2. Setup file descriptors.
    unistd::dup2(fds.stdin.as_raw_fd(), 0).context("dup2 stdin")?;
    unistd::dup2(fds.stdout.as_raw_fd(), 1).context("dup2 stdout")?;
    unistd::dup2(fds.stderr.as_raw_fd(), 2).context("dup2 stderr")?;
    log_to_pipe(log_fd, "stdio bound");

    // 3. Mount filesystem.
    if cfg.ns_flags.contains(nix::sched::CloneFlags::CLONE_NEWNS) {
        mount::init_namespace().context("init mount namespace")?;

        let root = Path::new(&cfg.chroot);
        for src in &cfg.bindmounts {
            let dst = mount::join_under_root(root, Path::new(src));
            mount::bind(Path::new(src), &dst).with_context(|| format!("bind mount {src}"))?;
        }
        for target in &cfg.tmpfsmounts {
            let dst = mount::join_under_root(root, Path::new(target));
            mount::tmpfs(&dst).with_context(|| format!("tmpfs mount {target}"))?;
        }
        mount::pivot(root, ".old_root").context("pivot_root")?;
        // Needed for uid_map/gid_map below regardless of CLONE_NEWPID: the
        // mount-namespace pivot detaches the old root's /proc along with
        // everything else under it.
        mount::procfs(Path::new("/proc")).context("mount /proc")?;
        if !cfg.rw {
            mount::remount_root_readonly().context("remount root read-only")?;
        }
        log_to_pipe(log_fd, "filesystem contained");
    }

    // 4. Drop privileges.
    if cfg.ns_flags.contains(nix::sched::CloneFlags::CLONE_NEWUSER) {
        user::uid_map(cfg.uid, outer_uid).context("uid_map")?;
        user::setgroups(false).context("setgroups")?;
        user::gid_map(cfg.gid, outer_gid).context("gid_map")?;
    }
    user::drop_to(cfg.uid, cfg.gid).context("drop privileges")?;
    if !cfg.keep_caps {
        caps::clear_all().context("clear capabilities")?;
    }
    log_to_pipe(log_fd, "privileges dropped");

    // 5. Set resource limits.
    rlimit::apply_all(&cfg.rlimits, &rlimit_hard).context("apply rlimits")?;
    log_to_pipe(log_fd, "rlimits applied");

    // 6. Make inherited descriptors close-on-exec (except the log pipe,
    // which must stay open through step 7 so a seccomp failure is still
    // reported, and is only closed implicitly at exec in step 8).
    close_on_exec_above(2, log_fd);
    log_to_pipe(log_fd, "descriptors marked close-on-exec");

    // 7. Apply seccomp.
    if !cfg.disable_sandbox && !seccomp::apply() {
        log_to_pipe(log_fd, "seccomp filter unavailable, continuing without it");
    }

    // 8. Exec.
    let argv = &cfg.argv;
    let envp: Vec<CString> = if cfg.keep_env {
        std::env::vars()
            .filter_map(|(k, v)| CString::new(format!("{k}={v}")).ok())
            .collect()
    } else {
        Vec::new()
    };
    unistd::execve(&argv[0], argv, &envp).context("execve")?;
    unreachable!("execve only returns on error")
}

/// Marks every open descriptor above `max_kept` (except `except`, the log
/// pipe) close-on-exec, by walking `/proc/self/fd` rather than guessing an
/// upper bound.
fn close_on_exec_above(max_kept: RawFd, except: RawFd) {
    let Ok(entries) = std::fs::read_dir("/proc/self/fd") else {
        return;
    };
    for entry in entries.flatten() {
        let Ok(fd) = entry.file_name().to_string_lossy().parse::<RawFd>() else {
            continue;
        };
        if fd <= max_kept || fd == except {
            continue;
        }
        let _ = fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC));
    }
}

fn log_to_pipe(fd: RawFd, msg: &str) {
    let mut line = msg.as_bytes().to_vec();
    line.push(b'\n');
    let _ = unistd::write(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }, &line);
}
