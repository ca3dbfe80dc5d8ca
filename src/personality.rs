//! `personality(2)` bits. `nix` does not wrap this syscall, so it is called
//! directly through `libc`, the same escape hatch the teacher reaches for
//! whenever `nix` has no wrapper (see its raw `CLONE_NEWPID` exit-signal
//! handling in `main.rs`).

use thiserror::Error;

use crate::config::PersonaFlags;

#[derive(Debug, Error)]
#[error("personality(2) failed: {0}")]
pub struct PersonalityError(#[source] std::io::Error);

pub fn apply(flags: PersonaFlags) -> Result<(), PersonalityError> {
    let mut mask: nix::libc::c_ulong = 0;
    if flags.addr_compat_layout {
        mask |= nix::libc::ADDR_COMPAT_LAYOUT as nix::libc::c_ulong;
    }
    if flags.mmap_page_zero {
        mask |= nix::libc::MMAP_PAGE_ZERO as nix::libc::c_ulong;
    }
    if flags.read_implies_exec {
        mask |= nix::libc::READ_IMPLIES_EXEC as nix::libc::c_ulong;
    }
    if flags.addr_limit_3gb {
        mask |= nix::libc::ADDR_LIMIT_3GB as nix::libc::c_ulong;
    }
    if flags.addr_no_randomize {
        mask |= nix::libc::ADDR_NO_RANDOMIZE as nix::libc::c_ulong;
    }

    if mask == 0 {
        return Ok(());
    }

    // SAFETY: `personality(2)` only ever reads/writes the calling thread's
    // own personality word; there is no buffer or pointer to uphold.
    let ret = unsafe { nix::libc::personality(mask) };
    if ret < 0 {
        return Err(PersonalityError(std::io::Error::last_os_error()));
    }
    Ok(())
}
