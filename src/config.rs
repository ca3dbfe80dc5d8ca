//! Resolves parsed [`crate::cli::Args`] into a fully validated [`JailConfig`].
//!
//! No external config-file format is involved: this mirrors the CLI-only
//! configuration style of the teacher crate, just with a richer set of
//! fields to resolve (user/group names, namespace flag set, rlimit table).

use std::ffi::CString;

use nix::sched::CloneFlags;
use nix::unistd::{Gid, Uid};
use thiserror::Error;

use crate::cli::{Args, ModeArg, RlimitArg};
use crate::rlimit::RlimitValue;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown user {0:?}")]
    UnknownUser(String),
    #[error("unknown group {0:?}")]
    UnknownGroup(String),
    #[error("no command given to run inside the jail")]
    EmptyCommand,
    #[error("command {0:?} contains an interior NUL byte")]
    NulInCommand(String),
    #[error("{0}")]
    Nix(#[from] nix::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    ListenTcp,
    StandaloneOnce,
    StandaloneRerun,
}

/// The five `personality(2)` bits this jail lets a caller toggle, bundled
/// as a single bitmask matching the ABI's own layout assumptions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersonaFlags {
    pub addr_compat_layout: bool,
    pub mmap_page_zero: bool,
    pub read_implies_exec: bool,
    pub addr_limit_3gb: bool,
    pub addr_no_randomize: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RlimitTable {
    pub as_: RlimitValue,
    pub core: RlimitValue,
    pub cpu: RlimitValue,
    pub fsize: RlimitValue,
    pub nofile: RlimitValue,
    pub nproc: RlimitValue,
    pub stack: RlimitValue,
}

#[derive(Debug, Clone)]
pub struct JailConfig {
    pub mode: Mode,
    pub chroot: String,
    pub uid: Uid,
    pub gid: Gid,
    pub hostname: String,
    pub port: u16,
    pub max_conns_per_ip: u32,
    pub log_path: Option<String>,
    pub time_limit_secs: u64,
    pub daemon: bool,
    pub verbose: bool,
    pub keep_env: bool,
    pub keep_caps: bool,
    pub rlimits: RlimitTable,
    pub persona: PersonaFlags,
    pub ns_flags: CloneFlags,
    pub disable_sandbox: bool,
    pub rw: bool,
    pub silent: bool,
    pub bindmounts: Vec<String>,
    pub tmpfsmounts: Vec<String>,
    pub net_macvtap: Option<String>,
    pub net_macvlan: Option<String>,
    pub argv: Vec<CString>,
}

impl JailConfig {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let uid = Uid::from_raw(
            args.user
                .parse::<u32>()
                .ok()
                .or_else(|| {
                    nix::unistd::User::from_name(&args.user)
                        .ok()
                        .flatten()
                        .map(|u| u.uid.as_raw())
                })
                .ok_or_else(|| ConfigError::UnknownUser(args.user.clone()))?,
        );
        let gid = Gid::from_raw(
            args.group
                .parse::<u32>()
                .ok()
                .or_else(|| {
                    nix::unistd::Group::from_name(&args.group)
                        .ok()
                        .flatten()
                        .map(|g| g.gid.as_raw())
                })
                .ok_or_else(|| ConfigError::UnknownGroup(args.group.clone()))?,
        );

        if args.cmd.is_empty() {
            return Err(ConfigError::EmptyCommand);
        }
        let argv = args
            .cmd
            .iter()
            .map(|s| CString::new(s.as_str()).map_err(|_| ConfigError::NulInCommand(s.clone())))
            .collect::<Result<Vec<_>, _>>()?;

        let mut ns_flags = CloneFlags::empty();
        if !args.disable_clone_newuser {
            ns_flags |= CloneFlags::CLONE_NEWUSER;
        }
        if !args.disable_clone_newns {
            ns_flags |= CloneFlags::CLONE_NEWNS;
        }
        if !args.disable_clone_newpid {
            ns_flags |= CloneFlags::CLONE_NEWPID;
        }
        if !args.disable_clone_newnet {
            ns_flags |= CloneFlags::CLONE_NEWNET;
        }
        if !args.disable_clone_newipc {
            ns_flags |= CloneFlags::CLONE_NEWIPC;
        }
        if !args.disable_clone_newuts {
            ns_flags |= CloneFlags::CLONE_NEWUTS;
        }

        Ok(Self {
            mode: match args.mode {
                ModeArg::ListenTcp => Mode::ListenTcp,
                ModeArg::StandaloneOnce => Mode::StandaloneOnce,
                ModeArg::StandaloneRerun => Mode::StandaloneRerun,
            },
            chroot: args.chroot,
            uid,
            gid,
            hostname: args.hostname,
            port: args.port,
            max_conns_per_ip: args.max_conns_per_ip,
            log_path: args.log,
            time_limit_secs: args.time_limit,
            daemon: args.daemon,
            verbose: args.verbose,
            keep_env: args.keep_env,
            keep_caps: args.keep_caps,
            rlimits: RlimitTable {
                as_: rlimit_value(args.rlimit_as),
                core: rlimit_value(args.rlimit_core),
                cpu: rlimit_value(args.rlimit_cpu),
                fsize: rlimit_value(args.rlimit_fsize),
                nofile: rlimit_value(args.rlimit_nofile),
                nproc: rlimit_value(args.rlimit_nproc),
                stack: rlimit_value(args.rlimit_stack),
            },
            persona: PersonaFlags {
                addr_compat_layout: args.persona_addr_compat_layout,
                mmap_page_zero: args.persona_mmap_page_zero,
                read_implies_exec: args.persona_read_implies_exec,
                addr_limit_3gb: args.persona_addr_limit_3gb,
                addr_no_randomize: args.persona_addr_no_randomize,
            },
            ns_flags,
            disable_sandbox: args.disable_sandbox,
            rw: args.rw,
            silent: args.silent,
            bindmounts: args.bindmount,
            tmpfsmounts: args.tmpfsmount,
            net_macvtap: args.net_macvtap,
            net_macvlan: args.net_macvlan,
            argv,
        })
    }
}

fn rlimit_value(arg: RlimitArg) -> RlimitValue {
    match arg {
        RlimitArg::Number(n) => RlimitValue::Number(n),
        RlimitArg::Max => RlimitValue::Max,
        RlimitArg::Def => RlimitValue::Def,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rlimit_def_leaves_the_default_value_untouched() {
        assert_eq!(rlimit_value(RlimitArg::Def), RlimitValue::Def);
    }

    #[test]
    fn rlimit_number_is_carried_through_unscaled() {
        assert_eq!(rlimit_value(RlimitArg::Number(42)), RlimitValue::Number(42));
    }
}
