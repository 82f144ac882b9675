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

//! Overlay Storage Manager: assembles an image's lower chain plus a
//! container's own upper/work/merged directories into a mounted overlay
//! rootfs.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::models::Repositories;

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("image {0} is missing both its extracted directory and tar blob")]
    ImageMissing(String),
    #[error("overlay mount for {0} is unhealthy")]
    WorkspaceCorrupt(String),
    #[error(transparent)]
    Mount(#[from] linux::mount::MountError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub struct OverlayLayout {
    pub diff: PathBuf,
    pub work: PathBuf,
    pub merged: PathBuf,
    pub lower_file: PathBuf,
}

impl OverlayLayout {
    pub fn for_container(mount_dir: &Path, container_id: &str) -> OverlayLayout {
        let root = mount_dir.join(container_id);
        OverlayLayout {
            diff: root.join("diff"),
            work: root.join("work"),
            merged: root.join("merged"),
            lower_file: root.join("lower"),
        }
    }

    pub fn root(&self) -> &Path {
        self.merged
            .parent()
            .expect("merged is always <root>/merged")
    }
}

/// Resolve `name:tag` through the catalog into the lower-chain, extracting
/// any still-tarred layer along the way. Each image ID in the chain has
/// exactly one of `<id>/` or `<id>.tar` at steady state.
pub fn resolve_lower_chain(
    image_dir: &Path,
    repositories: &Repositories,
    name: &str,
    tag: &str,
) -> Result<Vec<PathBuf>, OverlayError> {
    let chain = repositories
        .resolve(name, tag)
        .ok_or_else(|| OverlayError::ImageMissing(format!("{name}:{tag}")))?;

    let mut dirs = Vec::with_capacity(chain.len());
    for id in chain {
        let dir = image_dir.join(&id);
        let tar = image_dir.join(format!("{id}.tar"));
        if dir.is_dir() {
            dirs.push(dir);
            continue;
        }
        if tar.is_file() {
            extract_tar(&tar, &dir)?;
            std::fs::remove_file(&tar)?;
            dirs.push(dir);
            continue;
        }
        return Err(OverlayError::ImageMissing(id));
    }
    Ok(dirs)
}

/// No tar crate dependency: shell out to the system `tar`, the way image
/// archive handling is treated as an external collaborator throughout.
fn extract_tar(tar_path: &Path, dest: &Path) -> Result<(), OverlayError> {
    std::fs::create_dir_all(dest)?;
    let status = std::process::Command::new("tar")
        .arg("-xf")
        .arg(tar_path)
        .arg("-C")
        .arg(dest)
        .status()?;
    if !status.success() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("tar extraction of {} failed", tar_path.display()),
        )
        .into());
    }
    Ok(())
}

/// Create the upper/work/merged directories, persist the lower chain for
/// `commit`, and mount the overlay union.
pub fn assemble(layout: &OverlayLayout, lower_chain: &[PathBuf]) -> Result<(), OverlayError> {
    std::fs::create_dir_all(&layout.diff)?;
    set_permissive(&layout.diff)?;
    std::fs::create_dir_all(&layout.work)?;
    set_permissive(&layout.work)?;
    std::fs::create_dir_all(&layout.merged)?;

    let lower_str = lower_chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(":");
    std::fs::write(&layout.lower_file, &lower_str)?;

    linux::mount::mount_overlay(&layout.merged, lower_chain, &layout.diff, &layout.work)?;
    Ok(())
}

fn set_permissive(dir: &Path) -> Result<(), OverlayError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o777))?;
    Ok(())
}

/// `MNT_DETACH` unmount (tolerant of in-use state) followed by removal of
/// the whole container workspace directory.
pub fn teardown(layout: &OverlayLayout) -> Result<(), OverlayError> {
    let _ = linux::mount::umount_lazy(&layout.merged);
    let root = layout.root();
    if root.exists() {
        std::fs::remove_dir_all(root)?;
    }
    Ok(())
}

/// Health probe used by `start` to refuse resuming a container whose
/// overlay mount has vanished.
pub fn is_healthy(layout: &OverlayLayout) -> bool {
    crate::state_store::is_overlay_mounted(&layout.merged)
}

pub fn require_healthy(layout: &OverlayLayout, container_id: &str) -> Result<(), OverlayError> {
    if is_healthy(layout) {
        Ok(())
    } else {
        Err(OverlayError::WorkspaceCorrupt(container_id.to_string()))
    }
}
