//! Helper functions for `user_namespaces(7)` and the privilege drop that
//! follows it.
//!
//! The `*_map`/`setgroups` functions require a working procfs mount at
//! `/proc` and may only be called once per `user_namespaces(7)`.

use std::{fs::File, io::Write};

use anyhow::Result;
use log::debug;
use nix::unistd::{self, Gid, Uid};

/// Performs a 1-by-1 mapping of two [`Uid`]'s.
///
/// This function may only be called once per `user_namespaces(7)`.
pub fn uid_map(inner: Uid, outer: Uid) -> Result<()> {
    let mut f = File::create("/proc/self/uid_map")?;
    f.write(format!("\t{inner}\t{outer}\t1\n").as_bytes())?;
    debug!("mapped UID {inner} to {outer}");

    Ok(())
}

/// Performs a 1-by-1 mapping of two [`Gid`]'s.
///
/// This function may only be called once per `user_namespaces(7)`.
pub fn gid_map(inner: Gid, outer: Gid) -> Result<()> {
    let mut f = File::create("/proc/self/gid_map")?;
    f.write(format!("\t{inner}\t{outer}\t1\n").as_bytes())?;
    debug!("mapped GID {inner} to {outer}");

    Ok(())
}

/// Allow `setgroups(2)` system call in the `user_namespaces(7)`?
///
/// This function may only be called once per `user_namespaces(7)`.
pub fn setgroups(allow: bool) -> Result<()> {
    let value = if allow {
        "allow\n".as_bytes()
    } else {
        "deny\n".as_bytes()
    };

    let mut f = File::create("/proc/self/setgroups")?;
    f.write(value)?;
    debug!("setgroups {allow}");

    Ok(())
}

/// Drops the containment process's real/effective/saved uid and gid to
/// `uid`/`gid`. Group is dropped first, since dropping the uid first would
/// strip the privilege `setresgid` needs.
pub fn drop_to(uid: Uid, gid: Gid) -> Result<()> {
    unistd::setresgid(gid, gid, gid)?;
    unistd::setresuid(uid, uid, uid)?;
    debug!("dropped privileges to uid={uid} gid={gid}");

    Ok(())
}
