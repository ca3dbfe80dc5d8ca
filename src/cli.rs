//! Command-line surface. Parsing only — interpretation into a [`crate::config::JailConfig`]
//! happens in `config.rs`.

use std::str::FromStr;

use clap::{ArgAction, Parser};

/// Launch a command inside a fresh set of namespaces, a pivoted root, dropped
/// privileges, rlimits and an optional seccomp filter.
#[derive(Parser, Debug)]
#[command(name = "procjail", version, about)]
pub struct Args {
    /// Same as --help; kept for compatibility with the jail tools this one
    /// is modeled after, which accept `-?` alongside `-h`.
    #[arg(short = '?', action = ArgAction::Help, hide = true)]
    help_alt: Option<bool>,

    /// l = listen_tcp, o = standalone_once, r = standalone_rerun
    #[arg(short = 'M', long = "mode", default_value = "l")]
    pub mode: ModeArg,

    #[arg(short = 'c', long, default_value = "/chroot")]
    pub chroot: String,

    #[arg(short = 'u', long, default_value = "nobody")]
    pub user: String,

    #[arg(short = 'g', long, default_value = "nobody")]
    pub group: String,

    #[arg(short = 'H', long, default_value = "NSJAIL")]
    pub hostname: String,

    #[arg(short = 'p', long, default_value_t = 31337)]
    pub port: u16,

    #[arg(short = 'i', long, default_value_t = 0)]
    pub max_conns_per_ip: u32,

    /// Log sink path. Unset means stderr.
    #[arg(short = 'l', long)]
    pub log: Option<String>,

    #[arg(short = 't', long, default_value_t = 600)]
    pub time_limit: u64,

    #[arg(short = 'd', long)]
    pub daemon: bool,

    #[arg(short = 'v', long)]
    pub verbose: bool,

    #[arg(short = 'e', long)]
    pub keep_env: bool,

    #[arg(long)]
    pub keep_caps: bool,

    #[arg(long, default_value = "0")]
    pub rlimit_as: RlimitArg,
    #[arg(long, default_value = "0")]
    pub rlimit_core: RlimitArg,
    #[arg(long, default_value = "0")]
    pub rlimit_cpu: RlimitArg,
    #[arg(long, default_value = "0")]
    pub rlimit_fsize: RlimitArg,
    #[arg(long, default_value = "32")]
    pub rlimit_nofile: RlimitArg,
    #[arg(long, default_value = "def")]
    pub rlimit_nproc: RlimitArg,
    #[arg(long, default_value = "8")]
    pub rlimit_stack: RlimitArg,

    #[arg(long)]
    pub persona_addr_compat_layout: bool,
    #[arg(long)]
    pub persona_mmap_page_zero: bool,
    #[arg(long)]
    pub persona_read_implies_exec: bool,
    #[arg(long)]
    pub persona_addr_limit_3gb: bool,
    #[arg(long)]
    pub persona_addr_no_randomize: bool,

    #[arg(short = 'N', long = "disable_clone_newnet")]
    pub disable_clone_newnet: bool,
    #[arg(long = "disable_clone_newuser")]
    pub disable_clone_newuser: bool,
    #[arg(long = "disable_clone_newns")]
    pub disable_clone_newns: bool,
    #[arg(long = "disable_clone_newpid")]
    pub disable_clone_newpid: bool,
    #[arg(long = "disable_clone_newipc")]
    pub disable_clone_newipc: bool,
    #[arg(long = "disable_clone_newuts")]
    pub disable_clone_newuts: bool,

    #[arg(long)]
    pub disable_sandbox: bool,

    #[arg(long)]
    pub rw: bool,

    #[arg(long)]
    pub silent: bool,

    #[arg(short = 'B', long = "bindmount")]
    pub bindmount: Vec<String>,

    #[arg(short = 'T', long = "tmpfsmount")]
    pub tmpfsmount: Vec<String>,

    #[arg(long)]
    pub net_macvtap: Option<String>,

    #[arg(long)]
    pub net_macvlan: Option<String>,

    /// The command to run inside the jail, after `--`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub cmd: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    ListenTcp,
    StandaloneOnce,
    StandaloneRerun,
}

impl FromStr for ModeArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "l" => Ok(Self::ListenTcp),
            "o" => Ok(Self::StandaloneOnce),
            "r" => Ok(Self::StandaloneRerun),
            other => Err(format!("invalid mode {other:?}, expected one of l, o, r")),
        }
    }
}

/// One of the seven `--rlimit_*` values: a scaled number, or a symbolic
/// `max`/`def`.
///
/// Whether a non-leading `x` is accepted is an explicit no here: only a
/// plain decimal digit string is a number, unlike the historical C parser
/// this is based on, which scanned for any `x` as a hex marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RlimitArg {
    Number(u64),
    Max,
    Def,
}

impl FromStr for RlimitArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "max" => Ok(Self::Max),
            "def" => Ok(Self::Def),
            digits => digits
                .parse::<u64>()
                .map(Self::Number)
                .map_err(|_| format!("invalid rlimit value {digits:?}")),
        }
    }
}
