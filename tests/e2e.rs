//! Process-level smoke tests for the compiled jail binary, covering the
//! end-to-end scenarios enumerated in the spec's testable-properties
//! section. These spawn real Linux namespaces and therefore no-op (skip,
//! rather than fail) in environments without the necessary privilege — a
//! CI runner with user namespaces disabled at the kernel level being the
//! common case.

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

fn procjail() -> Command {
    Command::new(env!("CARGO_BIN_EXE_procjail"))
}

/// Distinguishes "this environment won't let us create namespaces" from an
/// actual regression in the jail itself.
fn looks_like_privilege_denial(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    ["operation not permitted", "permission denied", "eperm", "uid_map", "gid_map"]
        .iter()
        .any(|needle| stderr.contains(needle))
}

#[test]
fn trivial_standalone_runs_and_exits_zero() {
    // Filesystem containment is disabled here because the test binary has
    // no chroot image to pivot into; namespace isolation otherwise applies
    // normally. This exercises scenario 1 of §8 modulo that substitution.
    let out = procjail()
        .args([
            "-M",
            "o",
            "--disable_clone_newns",
            "--disable_clone_newnet",
            "--",
            "/bin/true",
        ])
        .stdin(Stdio::null())
        .output()
        .expect("failed to launch procjail binary");

    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        if looks_like_privilege_denial(&stderr) {
            eprintln!("skipping: namespaces unavailable in this environment: {stderr}");
            return;
        }
        panic!("unexpected failure: status={:?} stderr={stderr}", out.status);
    }
}

#[test]
fn rerun_mode_survives_a_few_reap_cycles_then_stops_on_sigterm() {
    let mut child = procjail()
        .args([
            "-M",
            "r",
            "--disable_clone_newns",
            "--disable_clone_newnet",
            "-t",
            "0",
            "--",
            "/bin/true",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to launch procjail binary");

    std::thread::sleep(Duration::from_millis(300));
    let _ = Command::new("kill").arg(child.id().to_string()).status();

    let status = child
        .wait_timeout_or_kill(Duration::from_secs(5))
        .expect("rerun-mode supervisor did not exit after SIGTERM");
    let _ = status;
}

#[test]
fn time_limit_kills_a_long_running_child_promptly() {
    let start = Instant::now();
    let out = procjail()
        .args([
            "-M",
            "o",
            "--disable_clone_newns",
            "--disable_clone_newnet",
            "-t",
            "1",
            "--",
            "/bin/sleep",
            "60",
        ])
        .stdin(Stdio::null())
        .output()
        .expect("failed to launch procjail binary");
    let _ = out;

    let elapsed = start.elapsed();
    assert!(
        elapsed < Duration::from_secs(5),
        "time-limit enforcement (SIGCONT+SIGKILL after tlimit=1s) did not \
         terminate the supervisor promptly: {elapsed:?}"
    );
}

#[test]
fn bad_user_name_exits_nonzero_before_any_clone() {
    let out = procjail()
        .args(["-M", "o", "-u", "nosuchuser9999", "--", "/bin/true"])
        .stdin(Stdio::null())
        .output()
        .expect("failed to launch procjail binary");

    assert!(!out.status.success(), "expected a nonzero exit for an unknown user");
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(
        stderr.contains("nosuchuser9999"),
        "expected the error to name the bad user, got: {stderr}"
    );
}

#[test]
fn help_flag_exits_zero_and_prints_usage() {
    let out = procjail().arg("--help").output().expect("failed to launch procjail binary");
    assert!(out.status.success());
    assert!(!out.stdout.is_empty());
}

#[test]
fn help_alt_flag_behaves_like_help() {
    let out = procjail().arg("-?").output().expect("failed to launch procjail binary");
    assert!(out.status.success());
    assert!(!out.stdout.is_empty());
}

#[test]
fn missing_command_exits_nonzero() {
    let out = procjail()
        .args(["-M", "o"])
        .output()
        .expect("failed to launch procjail binary");
    assert!(!out.status.success());
}

#[test]
fn unrecognized_option_exits_nonzero() {
    let out = procjail()
        .args(["--not-a-real-flag", "--", "/bin/true"])
        .output()
        .expect("failed to launch procjail binary");
    assert!(!out.status.success());
}

/// `std::process::Child` has no built-in bounded wait; this trait keeps the
/// SIGTERM test from hanging forever if the supervisor somehow ignores the
/// signal.
trait WaitTimeoutOrKill {
    fn wait_timeout_or_kill(&mut self, timeout: Duration) -> std::io::Result<std::process::ExitStatus>;
}

impl WaitTimeoutOrKill for std::process::Child {
    fn wait_timeout_or_kill(&mut self, timeout: Duration) -> std::io::Result<std::process::ExitStatus> {
        let start = Instant::now();
        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(status);
            }
            if start.elapsed() >= timeout {
                let _ = self.kill();
                return self.wait();
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}
