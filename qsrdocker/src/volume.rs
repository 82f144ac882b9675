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

//! Volume Binder: canonicalizes `host:guest` pairs at create time,
//! persists them into the `link` file, and (run inside the container's
//! mount namespace, after pivot-root) bind-mounts each at init time.
//!
//! A bind target that can't be created (directory/file creation, the
//! bind-mount call itself) is logged and skipped rather than aborting
//! the whole container start; the directional copy that seeds a fresh
//! anonymous volume from image-shipped content is a hard error instead,
//! since it determines what the container sees at first boot. This
//! split is this crate's own policy, not a citation of any upstream
//! source — see DESIGN.md's C7 entry.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::models::MountRecord;

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Mount(#[from] linux::mount::MountError),
}

/// Parse and canonicalize one `<host>:<guest>` spec supplied via `-v`.
pub fn parse_spec(raw: &str) -> Result<MountRecord, VolumeError> {
    let (host, guest) = raw
        .split_once(':')
        .unwrap_or((raw, raw));
    let host_path = std::fs::canonicalize(host)
        .unwrap_or_else(|_| PathBuf::from(host))
        .display()
        .to_string();
    Ok(MountRecord {
        host_path,
        guest_path: guest.to_string(),
        read_only: false,
    })
}

/// Persist one pair per line into `<mountdir>/<container>/link`.
pub fn write_link_file(path: &Path, mounts: &[MountRecord]) -> Result<(), VolumeError> {
    let body = mounts
        .iter()
        .map(|m| m.to_link_line())
        .collect::<Vec<_>>()
        .join("\n");
    std::fs::write(path, body)?;
    Ok(())
}

pub fn read_link_file(path: &Path) -> Result<Vec<MountRecord>, VolumeError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .filter(|l| !l.is_empty())
        .filter_map(|line| {
            let (host, guest) = line.split_once(':')?;
            Some(MountRecord {
                host_path: host.to_string(),
                guest_path: guest.to_string(),
                read_only: false,
            })
        })
        .collect())
}

/// Called from the init stage, inside the new mount namespace, after
/// pivot-root but before exec. `container_root` is always `/` by that
/// point; `guest_path` is resolved relative to it. Expects `host_path`
/// entries already re-homed under the stashed old root (see
/// `init::apply_volumes`), since the pre-pivot root itself is gone.
pub fn apply_mounts(mounts: &[MountRecord]) -> Result<(), VolumeError> {
    for mount in mounts {
        // Hard error: seeding a fresh anonymous volume from image content
        // determines what the container sees at first boot.
        seed_host_from_guest(mount)?;
        if let Err(e) = apply_one(mount) {
            tracing::warn!(host = %mount.host_path, guest = %mount.guest_path, error = %e, "volume bind failed, continuing");
        }
    }
    Ok(())
}

/// Fresh anonymous volume: copy image-shipped guest content into the
/// host side first, so the bind doesn't hide it.
fn seed_host_from_guest(mount: &MountRecord) -> Result<(), VolumeError> {
    let host = Path::new(&mount.host_path);
    let guest = Path::new(&mount.guest_path);
    if host.is_file() {
        return Ok(());
    }
    let host_is_empty = host.is_dir()
        && std::fs::read_dir(host)
            .map(|mut it| it.next().is_none())
            .unwrap_or(true);
    if host_is_empty && guest.is_dir() {
        copy_dir_contents(guest, host)?;
    }
    Ok(())
}

fn apply_one(mount: &MountRecord) -> Result<(), VolumeError> {
    let host = Path::new(&mount.host_path);
    let guest = Path::new(&mount.guest_path);

    if host.is_file() {
        if let Some(parent) = guest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if !guest.exists() {
            std::fs::File::create(guest)?;
        }
    } else {
        std::fs::create_dir_all(guest)?;
    }

    linux::mount::bind_mount(host, guest, mount.read_only)?;
    Ok(())
}

fn copy_dir_contents(src: &Path, dst: &Path) -> Result<(), VolumeError> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_contents(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_spec_splits_on_first_colon() {
        let spec = parse_spec("/tmp/nonexistent-host-path:/data").unwrap();
        assert_eq!(spec.guest_path, "/data");
    }

    #[test]
    fn link_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("link");
        let mounts = vec![MountRecord {
            host_path: "/host/a".to_string(),
            guest_path: "/guest/a".to_string(),
            read_only: false,
        }];
        write_link_file(&path, &mounts).unwrap();
        let read_back = read_link_file(&path).unwrap();
        assert_eq!(read_back, mounts);
    }
}
