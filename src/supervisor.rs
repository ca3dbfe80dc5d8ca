//! Supervisor (§4.3): the single long-lived thread that owns the Roster,
//! spawns jailed children, reaps them, and enforces per-child time limits.

use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use nix::sched::clone;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::{Gid, Uid};
use thiserror::Error;

use crate::child::{self, ChildFds};
use crate::config::{JailConfig, Mode};
use crate::listener::{Accepted, Listener};
use crate::logpipe;
use crate::netlink::{self, VirtualKind};
use crate::ratelimit;
use crate::rlimit::HardLimits;
use crate::roster::{ChildRecord, Roster, STANDALONE_REMOTE_TEXT};

const STACK_SIZE: usize = 8 * 1024 * 1024;

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn request_shutdown(_: nix::libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Installs a handler for SIGINT/SIGTERM that only flips an atomic flag —
/// everything else async-signal-unsafe (reaping, logging) happens back in
/// the main loop once `accept`/`read` is interrupted with `EINTR`.
fn install_shutdown_handler() {
    let action = SigAction::new(
        SigHandler::Handler(request_shutdown),
        SaFlags::empty(),
        SigSet::empty(),
    );
    // SAFETY: `request_shutdown` only performs an atomic store.
    unsafe {
        let _ = signal::sigaction(Signal::SIGINT, &action);
        let _ = signal::sigaction(Signal::SIGTERM, &action);
    }
}

fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

#[derive(Debug, Error)]
enum SpawnError {
    #[error("failed to create log pipe: {0}")]
    LogPipe(#[from] crate::logpipe::LogPipeError),
    #[error("clone failed: {0}")]
    Clone(nix::Error),
}

pub struct Supervisor {
    cfg: JailConfig,
    roster: Roster,
    outer_uid: Uid,
    outer_gid: Gid,
    rlimit_hard: HardLimits,
}

impl Supervisor {
    /// Snapshots the kernel's real hard rlimits here, before any child has
    /// dropped privileges, so `--rlimit_*=max` has a real ceiling to resolve
    /// to instead of `RLIM_INFINITY`.
    pub fn new(cfg: JailConfig) -> anyhow::Result<Self> {
        let outer_uid = Uid::current();
        let outer_gid = Gid::current();
        let rlimit_hard = HardLimits::snapshot()?;
        Ok(Self {
            cfg,
            roster: Roster::new(),
            outer_uid,
            outer_gid,
            rlimit_hard,
        })
    }

    pub fn run(mut self) -> anyhow::Result<()> {
        install_shutdown_handler();
        let result = match self.cfg.mode {
            Mode::ListenTcp => self.run_listen_tcp(),
            Mode::StandaloneOnce => self.run_standalone(false),
            Mode::StandaloneRerun => self.run_standalone(true),
        };
        self.kill_all();
        result
    }

    fn run_listen_tcp(&mut self) -> anyhow::Result<()> {
        let listener = Listener::bind(self.cfg.port)?;
        log::info!("listening on port {}", self.cfg.port);

        while !shutdown_requested() {
            self.reap_nonblocking();
            self.enforce_time_limits();

            match listener.accept_one() {
                Ok(Accepted::Interrupted) => continue,
                Ok(Accepted::Connection { fd, remote, remote_text }) => {
                    if !ratelimit::allow(&remote, &self.roster, self.cfg.max_conns_per_ip) {
                        log::warn!(
                            "rate limit: rejecting connection from {remote_text} (cap={})",
                            self.cfg.max_conns_per_ip
                        );
                        drop(fd);
                        continue;
                    }
                    let _ = crate::listener::cork(fd.as_raw_fd(), true);
                    let stdin = dup_owned(&fd);
                    let stdout = dup_owned(&fd);
                    let stderr = dup_owned(&fd);
                    drop(fd);
                    if let (Some(stdin), Some(stdout), Some(stderr)) = (stdin, stdout, stderr) {
                        self.spawn(ChildFds { stdin, stdout, stderr }, remote, remote_text);
                    }
                }
                Err(e) => {
                    log::warn!("accept failed: {e}");
                }
            }
        }
        Ok(())
    }

    fn run_standalone(&mut self, rerun: bool) -> anyhow::Result<()> {
        loop {
            let fds = self.standalone_fds()?;
            self.spawn(fds, [0u8; 16], STANDALONE_REMOTE_TEXT.to_string());

            loop {
                self.reap_nonblocking();
                self.enforce_time_limits();
                if self.roster.is_empty() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(50));
            }

            if !rerun {
                return Ok(());
            }
        }
    }

    fn standalone_fds(&self) -> anyhow::Result<ChildFds> {
        if self.cfg.silent {
            let devnull = |flags| nix::fcntl::open("/dev/null", flags, nix::sys::stat::Mode::empty());
            Ok(ChildFds {
                stdin: devnull(nix::fcntl::OFlag::O_RDONLY)?,
                stdout: devnull(nix::fcntl::OFlag::O_WRONLY)?,
                stderr: devnull(nix::fcntl::OFlag::O_WRONLY)?,
            })
        } else {
            use std::os::fd::FromRawFd;
            // SAFETY: 0/1/2 are the process's own stdio; dup'd immediately.
            unsafe {
                Ok(ChildFds {
                    stdin: OwnedFd::from_raw_fd(nix::unistd::dup(0)?),
                    stdout: OwnedFd::from_raw_fd(nix::unistd::dup(1)?),
                    stderr: OwnedFd::from_raw_fd(nix::unistd::dup(2)?),
                })
            }
        }
    }

    fn spawn(&mut self, fds: ChildFds, remote: [u8; 16], remote_text: String) {
        if let Err(e) = self.try_spawn(fds, remote, remote_text) {
            log::warn!("spawn failed: {e}");
        }
    }

    fn try_spawn(&mut self, fds: ChildFds, remote: [u8; 16], remote_text: String) -> Result<(), SpawnError> {
        let (log_w, log_r) = logpipe::new()?;

        let cfg = self.cfg.clone();
        let outer_uid = self.outer_uid;
        let outer_gid = self.outer_gid;
        let rlimit_hard = self.rlimit_hard;
        let log_fd = log_w.as_raw_fd();
        let mut stack = vec![0u8; STACK_SIZE];
        let clone_flags = self.cfg.ns_flags;

        let mut fds = Some(fds);
        let pid = unsafe {
            clone(
                Box::new(move || {
                    let fds = fds.take().expect("clone callback runs exactly once");
                    child::build_and_exec(&cfg, fds, outer_uid, outer_gid, rlimit_hard, log_fd);
                }),
                &mut stack,
                clone_flags,
                Some(nix::libc::SIGCHLD),
            )
        };

        let pid = pid.map_err(SpawnError::Clone)?;

        let virtual_iface = self
            .cfg
            .net_macvtap
            .as_ref()
            .map(|iface| (iface, "vt0", VirtualKind::MacVtap))
            .or_else(|| {
                self.cfg
                    .net_macvlan
                    .as_ref()
                    .map(|iface| (iface, "vl0", VirtualKind::MacVlan))
            });
        if let Some((iface, name, kind)) = virtual_iface {
            if let Err(e) = netlink::create_virtual_iface(iface, name, kind, pid.as_raw() as u32) {
                log::warn!("net attach failed: {e:#}");
            }
        }

        drop(log_w);
        logpipe::drain_to_eof(log_r, self.cfg.verbose);

        log::info!("child {} admitted from {remote_text}", pid.as_raw());
        self.roster.insert(ChildRecord {
            pid,
            started_at: Instant::now(),
            remote,
            remote_text,
        });
        Ok(())
    }

    fn reap_nonblocking(&mut self) {
        loop {
            match wait::waitpid(None, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) | Err(nix::Error::ECHILD) => break,
                Ok(WaitStatus::Exited(pid, code)) => {
                    self.roster.remove(pid);
                    log::info!("child {} exited with status {code}", pid.as_raw());
                }
                Ok(WaitStatus::Signaled(pid, sig, _)) => {
                    self.roster.remove(pid);
                    log::info!("child {} terminated by signal {sig}", pid.as_raw());
                }
                Ok(_) => continue,
                Err(e) => {
                    log::warn!("waitpid failed: {e}");
                    break;
                }
            }
        }
    }

    fn enforce_time_limits(&mut self) {
        if self.cfg.time_limit_secs == 0 {
            return;
        }
        let limit = Duration::from_secs(self.cfg.time_limit_secs);
        let now = Instant::now();
        for child in self.roster.iter() {
            if now.duration_since(child.started_at) >= limit {
                log::warn!("child {} exceeded time limit, killing", child.pid.as_raw());
                let _ = signal::kill(child.pid, Signal::SIGCONT);
                let _ = signal::kill(child.pid, Signal::SIGKILL);
            }
        }
    }

    pub fn kill_all(&mut self) {
        for child in self.roster.iter() {
            let _ = signal::kill(child.pid, Signal::SIGKILL);
        }
    }
}

fn dup_owned(fd: &OwnedFd) -> Option<OwnedFd> {
    use std::os::fd::FromRawFd;
    nix::unistd::dup(fd.as_raw_fd())
        .ok()
        .map(|raw| unsafe { OwnedFd::from_raw_fd(raw) })
}
