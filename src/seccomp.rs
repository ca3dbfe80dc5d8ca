//! Minimal seccomp-bpf syscall filter, applied as the last containment step
//! before `execve`. `nix` has no seccomp wrapper and none of this crate's
//! dependency stack does either, so the filter is hand-built the way
//! `danielmriley-aigent`'s sandbox module builds its own: a flat BPF
//! allow-list program installed via the raw `seccomp(2)` syscall.
//!
//! Out of scope here: per-syscall argument filtering, a configurable
//! allow-list, or any non-x86_64 architecture. `apply` only ever returns
//! `false` (meaning "not applied") when the architecture isn't supported or
//! the running kernel rejects the filter; failures are logged by the
//! caller, which treats a `false` the same as `--disable_sandbox`.

#[repr(C)]
struct SockFilter {
    code: u16,
    jt: u8,
    jf: u8,
    k: u32,
}

#[repr(C)]
struct SockFprog {
    len: u16,
    filter: *const SockFilter,
}

const BPF_LD: u16 = 0x00;
const BPF_W: u16 = 0x00;
const BPF_ABS: u16 = 0x20;
const BPF_JMP: u16 = 0x05;
const BPF_JEQ: u16 = 0x10;
const BPF_K: u16 = 0x00;
const BPF_RET: u16 = 0x06;

const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;
const SECCOMP_RET_ERRNO: u32 = 0x0005_0000;
const ENOSYS: u32 = 38;
const SECCOMP_DATA_NR_OFFSET: u32 = 0;

#[cfg(target_arch = "x86_64")]
const ALLOWED: &[u32] = &[
    0, 1, 2, 3, 4, 5, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 24, 25, 28, 32, 33,
    39, 41, 42, 43, 44, 45, 46, 47, 49, 50, 51, 52, 53, 54, 55, 56, 57, 58, 59, 60, 61, 62, 63, 72,
    78, 79, 80, 89, 95, 96, 97, 99, 102, 104, 107, 108, 110, 111, 131, 158, 186, 202, 204, 218,
    228, 229, 231, 257, 262, 267, 269, 270, 271, 302, 318, 332,
];

/// Applies the filter to the current (about-to-exec) process. Returns
/// `false` when seccomp is unavailable for this build or kernel; the caller
/// decides whether that is fatal.
pub fn apply() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: runs just before execve in the not-yet-multithreaded
        // child, operating only on process-local kernel state.
        unsafe { install() }
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

#[cfg(target_arch = "x86_64")]
unsafe fn install() -> bool {
    let n = ALLOWED.len();
    let mut prog: Vec<SockFilter> = Vec::with_capacity(n + 2);

    prog.push(SockFilter {
        code: BPF_LD | BPF_W | BPF_ABS,
        jt: 0,
        jf: 0,
        k: SECCOMP_DATA_NR_OFFSET,
    });

    for (i, &nr) in ALLOWED.iter().enumerate() {
        let steps_to_allow = (n - i) as u8;
        prog.push(SockFilter {
            code: BPF_JMP | BPF_JEQ | BPF_K,
            jt: steps_to_allow,
            jf: 0,
            k: nr,
        });
    }

    prog.push(SockFilter {
        code: BPF_RET | BPF_K,
        jt: 0,
        jf: 0,
        k: SECCOMP_RET_ERRNO | (ENOSYS & 0xFFFF),
    });
    prog.push(SockFilter {
        code: BPF_RET | BPF_K,
        jt: 0,
        jf: 0,
        k: SECCOMP_RET_ALLOW,
    });

    let fprog = SockFprog {
        len: prog.len() as u16,
        filter: prog.as_ptr(),
    };

    const PR_SET_NO_NEW_PRIVS: nix::libc::c_int = 38;
    if nix::libc::prctl(PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) != 0 {
        return false;
    }

    const SYS_SECCOMP: nix::libc::c_long = 317;
    const SECCOMP_SET_MODE_FILTER: nix::libc::c_ulong = 1;

    let ret = nix::libc::syscall(
        SYS_SECCOMP,
        SECCOMP_SET_MODE_FILTER,
        0u64,
        &fprog as *const SockFprog as *const nix::libc::c_void,
    );

    std::mem::forget(prog);
    ret == 0
}
