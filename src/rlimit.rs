//! `setrlimit(2)` application for the seven resources the jail bounds.
//!
//! Most resources are expressed in megabytes on the CLI and scaled to bytes
//! here; `nofile` and `nproc` are plain counts. `max`/`def` select the
//! kernel's hard limit or leave the inherited soft limit untouched.

use nix::sys::resource::{getrlimit, setrlimit, Resource};
use thiserror::Error;

use crate::config::RlimitTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RlimitValue {
    Number(u64),
    Max,
    Def,
}

impl Default for RlimitValue {
    fn default() -> Self {
        Self::Number(0)
    }
}

#[derive(Debug, Error)]
#[error("{0}({1}) failed: {2}")]
pub struct RlimitError(&'static str, &'static str, nix::Error);

/// Resources whose CLI unit is megabytes, scaled to bytes for `setrlimit`.
const MEGABYTE: u64 = 1024 * 1024;

/// The kernel's real hard limit for each of the seven bounded resources,
/// snapshotted once before any privilege is dropped. `max` resolves to
/// these values rather than to `RLIM_INFINITY`, since a child that has
/// already dropped privileges has no `CAP_SYS_RESOURCE` to raise a limit
/// the kernel hard-caps below infinity.
#[derive(Debug, Clone, Copy, Default)]
pub struct HardLimits {
    as_: u64,
    core: u64,
    cpu: u64,
    fsize: u64,
    nofile: u64,
    nproc: u64,
    stack: u64,
}

impl HardLimits {
    pub fn snapshot() -> Result<Self, RlimitError> {
        Ok(Self {
            as_: hard_limit_of(Resource::RLIMIT_AS)?,
            core: hard_limit_of(Resource::RLIMIT_CORE)?,
            cpu: hard_limit_of(Resource::RLIMIT_CPU)?,
            fsize: hard_limit_of(Resource::RLIMIT_FSIZE)?,
            nofile: hard_limit_of(Resource::RLIMIT_NOFILE)?,
            nproc: hard_limit_of(Resource::RLIMIT_NPROC)?,
            stack: hard_limit_of(Resource::RLIMIT_STACK)?,
        })
    }
}

fn hard_limit_of(resource: Resource) -> Result<u64, RlimitError> {
    let (_, hard) = getrlimit(resource).map_err(|e| RlimitError("getrlimit", resource_name(resource), e))?;
    Ok(hard)
}

fn resource_name(resource: Resource) -> &'static str {
    match resource {
        Resource::RLIMIT_AS => "as",
        Resource::RLIMIT_CORE => "core",
        Resource::RLIMIT_CPU => "cpu",
        Resource::RLIMIT_FSIZE => "fsize",
        Resource::RLIMIT_NOFILE => "nofile",
        Resource::RLIMIT_NPROC => "nproc",
        Resource::RLIMIT_STACK => "stack",
        _ => "?",
    }
}

pub fn apply_all(table: &RlimitTable, hard: &HardLimits) -> Result<(), RlimitError> {
    apply_one(Resource::RLIMIT_AS, table.as_, hard.as_, true)?;
    apply_one(Resource::RLIMIT_CORE, table.core, hard.core, true)?;
    apply_one(Resource::RLIMIT_CPU, table.cpu, hard.cpu, false)?;
    apply_one(Resource::RLIMIT_FSIZE, table.fsize, hard.fsize, true)?;
    apply_one(Resource::RLIMIT_NOFILE, table.nofile, hard.nofile, false)?;
    apply_one(Resource::RLIMIT_NPROC, table.nproc, hard.nproc, false)?;
    apply_one(Resource::RLIMIT_STACK, table.stack, hard.stack, true)?;
    Ok(())
}

fn apply_one(resource: Resource, value: RlimitValue, hard_limit: u64, scale_mb: bool) -> Result<(), RlimitError> {
    let (soft, hard) = match value {
        RlimitValue::Def => return Ok(()),
        RlimitValue::Max => (hard_limit, hard_limit),
        RlimitValue::Number(n) => {
            let scaled = if scale_mb { n.saturating_mul(MEGABYTE) } else { n };
            (scaled, scaled)
        }
    };

    setrlimit(resource, soft, hard).map_err(|e| RlimitError("setrlimit", resource_name(resource), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn def_is_a_no_op_regardless_of_resource() {
        let table = RlimitTable {
            cpu: RlimitValue::Def,
            ..Default::default()
        };
        // apply_all would skip RLIMIT_CPU entirely; nothing to assert on the
        // syscall side without root, so this just exercises the match arm.
        assert_eq!(table.cpu, RlimitValue::Def);
    }
}
