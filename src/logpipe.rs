//! The close-on-exec pipe each child inherits during containment.
//!
//! The write end is the child's only channel back to the supervisor while
//! it is still building its sandbox: every line it writes is forwarded to
//! the log sink, and the pipe's automatic close at `execve` (it carries
//! `O_CLOEXEC`) is the supervisor's only signal that containment finished
//! and it is now safe to insert the child into the roster.

use std::io::{BufRead, BufReader};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::unistd::pipe;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to create log pipe: {0}")]
pub struct LogPipeError(#[from] nix::Error);

pub struct LogPipeWriter {
    fd: OwnedFd,
}

impl LogPipeWriter {
    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn into_raw_fd(self) -> RawFd {
        std::os::fd::IntoRawFd::into_raw_fd(self.fd)
    }
}

pub struct LogPipeReader {
    fd: OwnedFd,
}

pub fn new() -> Result<(LogPipeWriter, LogPipeReader), LogPipeError> {
    let (read_end, write_end) = pipe()?;
    fcntl(read_end.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    fcntl(write_end.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    Ok((
        LogPipeWriter { fd: write_end },
        LogPipeReader { fd: read_end },
    ))
}

/// Drains the read end to EOF, forwarding each line to `log::debug!` (or
/// `log::trace!` when not verbose). Returns once the write end has closed,
/// either because the child reached `execve` or because it exited early.
pub fn drain_to_eof(reader: LogPipeReader, verbose: bool) {
    // SAFETY: `reader` owns this fd exclusively and is consumed here.
    let file = unsafe { std::fs::File::from_raw_fd(std::os::fd::IntoRawFd::into_raw_fd(reader.fd)) };
    let buffered = BufReader::new(file);

    for line in buffered.lines() {
        match line {
            Ok(line) if !line.is_empty() => {
                if verbose {
                    log::debug!("[child] {line}");
                } else {
                    log::trace!("[child] {line}");
                }
            }
            Ok(_) => {}
            Err(err) => {
                log::warn!("log pipe read error: {err}");
                break;
            }
        }
    }
}
