//! Implements functionality around `mount(2)` system calls, used by the
//! child builder's containment step that pivots into the chroot (§4.4).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;
use nix::mount::{self, MsFlags};
use nix::unistd;

/// Initialize a freshly created mount namespace.
///
/// This function first mounts `/` with [`MsFlags::MS_REC`] and
/// [`MsFlags::MS_PRIVATE`] so that all `mount(2)` and `umount(2)` operations
/// performed within the mount namespace do not propagate into other namespace
/// in case that there is a shared subtree somewhere within the file system.
/// If `/` is already marked with [`MsFlags::MS_REC`], then this is a rather
/// redundant operation but honestly it probably never hurts to do it again.
pub fn init_namespace() -> Result<()> {
    mount::mount(
        Some(""),
        "/",
        Some(""),
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        Some(""),
    )?;
    debug!("mounted `/` with `MsFlags::MS_PRIVATE`");

    Ok(())
}

/// Mounts `procfs` at `path`.
pub fn procfs(path: &Path) -> Result<()> {
    mount::mount(
        Some("proc"),
        path,
        Some("proc"),
        MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV,
        None::<&str>,
    )?;
    debug!("mounted `procfs` at `{:?}`", path);

    Ok(())
}

/// Computes the in-jail destination for a host-absolute bind/tmpfs mount
/// path: `root` joined with `path` stripped of its leading `/`.
pub fn join_under_root(root: &Path, path: &Path) -> PathBuf {
    match path.strip_prefix("/") {
        Ok(rel) => root.join(rel),
        Err(_) => root.join(path),
    }
}

/// Creates `dst` as a mount point matching `src`'s kind (directory or
/// regular file), so the bind mount below has somewhere to land.
fn ensure_mountpoint(src: &Path, dst: &Path) -> Result<()> {
    if src.is_dir() {
        std::fs::create_dir_all(dst).with_context(|| format!("creating mount point {dst:?}"))?;
    } else {
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("creating mount point parent {parent:?}"))?;
        }
        if !dst.exists() {
            std::fs::File::create(dst).with_context(|| format!("creating mount point {dst:?}"))?;
        }
    }
    Ok(())
}

/// Bind-mounts `src` onto `dst`, always remounted read-only in a second pass
/// (a plain bind mount cannot set `MS_RDONLY` in the same call, the kernel
/// requires a remount for that).
pub fn bind(src: &Path, dst: &Path) -> Result<()> {
    ensure_mountpoint(src, dst)?;
    mount::mount(Some(src), dst, Some(""), MsFlags::MS_BIND, Some(""))?;
    debug!("created bind mount {:?} -> {:?}", src, dst);

    mount::mount(
        Some(src),
        dst,
        Some(""),
        MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
        Some(""),
    )?;
    debug!("remounted {:?} read-only", dst);

    Ok(())
}

/// Mounts an anonymous tmpfs at `path`, creating the directory first.
pub fn tmpfs(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).with_context(|| format!("creating tmpfs mount point {path:?}"))?;
    mount::mount(
        Some(""),
        path,
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        Some(""),
    )?;
    debug!("mounted tmpfs at {:?}", path);

    Ok(())
}

/// Remounts the (already pivoted-to) root read-only. Used unless
/// `is_root_rw` was requested.
pub fn remount_root_readonly() -> Result<()> {
    mount::mount(
        Some("/"),
        "/",
        Some(""),
        MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
        Some(""),
    )?;
    debug!("remounted root read-only");

    Ok(())
}

/// Pivots the mount namespace's root into `new_root`, then detaches the old
/// root. `new_root` must already be a mount point (bind-mounted onto
/// itself) for `pivot_root(2)` to accept it, and must contain a directory
/// at `old_root_rel` to receive the outgoing root.
pub fn pivot(new_root: &Path, old_root_rel: &str) -> Result<()> {
    mount::mount(
        Some(new_root),
        new_root,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .context("bind-mounting new root onto itself")?;

    let old_root = new_root.join(old_root_rel);
    std::fs::create_dir_all(&old_root).context("creating pivot_root put_old directory")?;

    unistd::pivot_root(new_root, &old_root).context("pivot_root")?;
    debug!("pivoted root to {:?}", new_root);

    unistd::chdir("/").context("chdir to new root")?;

    let put_old: PathBuf = Path::new("/").join(old_root_rel);
    mount::umount2(&put_old, mount::MntFlags::MNT_DETACH).context("detaching old root")?;
    std::fs::remove_dir(&put_old).ok();
    debug!("detached old root at {:?}", put_old);

    Ok(())
}
