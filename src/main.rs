//! Binary entry point: CLI args → [`JailConfig`] → [`Supervisor`].

use std::fs::OpenOptions;
use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use log::error;

mod caps;
mod child;
mod cli;
mod config;
mod daemon;
mod listener;
mod logpipe;
mod mount;
mod netlink;
mod personality;
mod ratelimit;
mod rlimit;
mod roster;
mod seccomp;
mod supervisor;
mod user;

use cli::Args;
use config::JailConfig;
use supervisor::Supervisor;

fn main() -> ExitCode {
    let args = Args::parse();

    let cfg = match JailConfig::from_args(args) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("error: {e}");
            let _ = Args::command().print_help();
            eprintln!();
            return ExitCode::FAILURE;
        }
    };

    init_logger(&cfg);

    if cfg.daemon {
        if let Err(e) = daemon::daemonize() {
            error!("failed to daemonize: {e:#}");
            return ExitCode::FAILURE;
        }
    }

    let supervisor = match Supervisor::new(cfg) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to start: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    match supervisor.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// `--log` names a path to append to instead of stderr; `--verbose` raises
/// the default level from info to debug. Matches the ambient-stack rule
/// that logging is `env_logger`-backed regardless of execution mode.
fn init_logger(cfg: &JailConfig) {
    let level = if cfg.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);

    if let Some(path) = &cfg.log_path {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                eprintln!("warning: could not open log file {path:?}: {e}, logging to stderr");
            }
        }
    }

    builder.init();
}
