// Copyright (c) 2023 Yan Ka, Chiu.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions
// are met:
// 1. Redistributions of source code must retain the above copyright
//    notice, this list of conditions, and the following disclaimer,
//    without modification, immediately at the beginning of the file.
// 2. The name of the author may not be used to endorse or promote products
//    derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE AUTHOR AND CONTRIBUTORS ``AS IS'' AND
// ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
// IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE
// ARE DISCLAIMED. IN NO EVENT SHALL THE AUTHOR OR CONTRIBUTORS BE LIABLE FOR
// ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL
// DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS
// OR SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION)
// HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT
// LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY
// OUT OF THE USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF
// SUCH DAMAGE.

//! Mount table manipulation: bind mounts, the pseudo-filesystems a container
//! root needs (`proc`, `tmpfs`, `devpts`, `sysfs`), overlayfs assembly and
//! `pivot_root`.

use std::path::{Path, PathBuf};

use nix::mount::{self, MsFlags};
use nix::unistd;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MountError {
    #[error("mount {source_display} -> {target}: {source}")]
    Mount {
        source_display: String,
        target: String,
        #[source]
        source: nix::Error,
    },
    #[error("umount {target}: {source}")]
    Umount {
        target: String,
        #[source]
        source: nix::Error,
    },
    #[error("pivot_root {new_root} -> {put_old}: {source}")]
    PivotRoot {
        new_root: String,
        put_old: String,
        #[source]
        source: nix::Error,
    },
    #[error("chdir {0}: {1}")]
    Chdir(String, nix::Error),
    #[error("create mountpoint {0}: {1}")]
    CreateDir(String, std::io::Error),
}

fn do_mount(
    src: Option<&Path>,
    target: &Path,
    fstype: Option<&str>,
    flags: MsFlags,
    data: Option<&str>,
) -> Result<(), MountError> {
    mount::mount(src, target, fstype, flags, data).map_err(|source| MountError::Mount {
        source_display: src
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none".to_string()),
        target: target.display().to_string(),
        source,
    })
}

/// Bind mount `src` onto `target`, creating `target` if it doesn't exist.
/// Two-step, as the kernel requires: bind first, then remount to apply any
/// extra flags such as read-only.
pub fn bind_mount(src: &Path, target: &Path, readonly: bool) -> Result<(), MountError> {
    ensure_dir(target)?;
    do_mount(Some(src), target, None, MsFlags::MS_BIND, None)?;
    if readonly {
        do_mount(
            Some(src),
            target,
            None,
            MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
            None,
        )?;
    }
    Ok(())
}

/// Mount the overlay union for a container's root: lowerdir from the image
/// layer chain (outermost-first), upperdir/workdir from the container's
/// own writable layer.
pub fn mount_overlay(
    target: &Path,
    lowerdirs: &[PathBuf],
    upperdir: &Path,
    workdir: &Path,
) -> Result<(), MountError> {
    ensure_dir(target)?;
    let lower = lowerdirs
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(":");
    let data = format!(
        "lowerdir={lower},upperdir={},workdir={}",
        upperdir.display(),
        workdir.display()
    );
    do_mount(
        Some(Path::new("overlay")),
        target,
        Some("overlay"),
        MsFlags::empty(),
        Some(&data),
    )
}

/// Mount a fresh `procfs` inside the container root, `noexec,nosuid,nodev`.
pub fn mount_proc(target: &Path) -> Result<(), MountError> {
    ensure_dir(target)?;
    do_mount(
        Some(Path::new("proc")),
        target,
        Some("proc"),
        MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        None,
    )
}

/// Mount `tmpfs` at `target`, used for `/dev/shm` and `/run`.
pub fn mount_tmpfs(target: &Path, size_bytes: Option<u64>) -> Result<(), MountError> {
    ensure_dir(target)?;
    let data = size_bytes.map(|n| format!("size={n}"));
    do_mount(
        Some(Path::new("tmpfs")),
        target,
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        data.as_deref(),
    )
}

/// Mount `devpts` at `target`, needed for `exec -it` to allocate a pty
/// inside the container's own mount namespace.
pub fn mount_devpts(target: &Path) -> Result<(), MountError> {
    ensure_dir(target)?;
    do_mount(
        Some(Path::new("devpts")),
        target,
        Some("devpts"),
        MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID,
        Some("newinstance,ptmxmode=0666,mode=0620"),
    )
}

pub fn mount_sysfs(target: &Path) -> Result<(), MountError> {
    ensure_dir(target)?;
    do_mount(
        Some(Path::new("sysfs")),
        target,
        Some("sysfs"),
        MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_RDONLY,
        None,
    )
}

pub fn umount(target: &Path) -> Result<(), MountError> {
    mount::umount(target).map_err(|source| MountError::Umount {
        target: target.display().to_string(),
        source,
    })
}

pub fn umount_lazy(target: &Path) -> Result<(), MountError> {
    mount::umount2(target, mount::MntFlags::MNT_DETACH).map_err(|source| MountError::Umount {
        target: target.display().to_string(),
        source,
    })
}

fn ensure_dir(path: &Path) -> Result<(), MountError> {
    std::fs::create_dir_all(path)
        .map_err(|source| MountError::CreateDir(path.display().to_string(), source))
}

/// Switch the calling process's root filesystem to `new_root`, stashing the
/// old root at `new_root/put_old` so it can be unmounted afterwards. The
/// caller is expected to `chdir("/")`, lazily unmount `put_old` and
/// `rmdir` it once done — mirrors runc's `pivotRoot`.
pub fn pivot_root(new_root: &Path, put_old_relative: &str) -> Result<(), MountError> {
    let put_old = new_root.join(put_old_relative);
    std::fs::create_dir_all(&put_old)
        .map_err(|source| MountError::CreateDir(put_old.display().to_string(), source))?;

    // Make new_root a mount point in its own right, required by pivot_root.
    do_mount(
        Some(new_root),
        new_root,
        None,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None,
    )?;

    unistd::pivot_root(new_root, &put_old).map_err(|source| MountError::PivotRoot {
        new_root: new_root.display().to_string(),
        put_old: put_old.display().to_string(),
        source,
    })?;

    unistd::chdir("/").map_err(|e| MountError::Chdir("/".to_string(), e))
}

/// Make every existing mount in the caller's namespace private, so that
/// nothing done inside the container's mount namespace leaks back to the
/// host (and vice versa). Run once, right after `unshare(CLONE_NEWNS)`.
pub fn make_root_private() -> Result<(), MountError> {
    do_mount(
        None,
        Path::new("/"),
        None,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_data_string_joins_lowerdirs() {
        let lowerdirs = vec![PathBuf::from("/a"), PathBuf::from("/b")];
        let lower = lowerdirs
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        assert_eq!(lower, "/a:/b");
    }
}
