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

//! Init Stage: runs inside the freshly-unshared namespaces as the
//! re-exec'd `init` sub-command. Reads the command from fd 3, pivots the
//! root, mounts proc/dev, applies volume binds, and execs the user
//! program, in that order.

use std::ffi::CString;
use std::os::fd::{FromRawFd, OwnedFd};
use std::path::Path;

use thiserror::Error;

use crate::models::MountRecord;

#[derive(Debug, Error)]
pub enum InitError {
    #[error("command received on the cmd pipe was empty")]
    EmptyCommand,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Mount(#[from] linux::mount::MountError),
    #[error("program {0} not found on PATH")]
    ProgramNotFound(String),
    #[error(transparent)]
    Volume(#[from] crate::volume::VolumeError),
    #[error(transparent)]
    Nix(#[from] nix::Error),
}

/// Read the user command vector off fd 3 — the read end of the cmd pipe,
/// already positioned there by the launcher via `dup2`.
pub fn read_command() -> Result<Vec<String>, InitError> {
    let fd = unsafe { OwnedFd::from_raw_fd(3) };
    let mut buf = Vec::new();
    loop {
        let mut chunk = [0u8; 4096];
        let n = nix::unistd::read(3, &mut chunk)?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    drop(fd);
    let text = String::from_utf8_lossy(&buf);
    let argv: Vec<String> = text.split(' ').filter(|s| !s.is_empty()).map(String::from).collect();
    if argv.is_empty() {
        return Err(InitError::EmptyCommand);
    }
    Ok(argv)
}

/// Where `pivot_root` stashes the pre-pivot root — still mounted and
/// reachable under this prefix until [`cleanup_old_root`] detaches it.
pub const OLD_ROOT: &str = "/.pivot_root";

/// Pivot root into the (already-bind-mounted-by-launcher) working
/// directory, then mount `proc` and a `tmpfs` at `/dev`. The stashed old
/// root is left mounted at [`OLD_ROOT`] — callers that still need to reach
/// host-side paths (the link file, volume host directories) must do so
/// before calling [`cleanup_old_root`].
pub fn setup_mounts(merged_root: &Path) -> Result<(), InitError> {
    linux::mount::make_root_private()?;
    linux::mount::pivot_root(merged_root, OLD_ROOT.trim_start_matches('/'))?;

    linux::mount::mount_proc(Path::new("/proc"))?;

    // tmpfs at /dev, MS_NOSUID | MS_STRICTATIME, mode=755. MS_STRICTATIME
    // has no effect on behavior this engine depends on, so it's folded
    // into the general-purpose tmpfs helper rather than given its own
    // flag variant.
    linux::mount::mount_tmpfs(Path::new("/dev"), None)?;
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(Path::new("/dev"), std::fs::Permissions::from_mode(0o755))?;

    Ok(())
}

/// Detach and remove the stashed pre-pivot root. Must run after every
/// host-side path has been read or bind-mounted from under [`OLD_ROOT`].
pub fn cleanup_old_root() -> Result<(), InitError> {
    let stale = Path::new(OLD_ROOT);
    let _ = linux::mount::umount_lazy(stale);
    let _ = std::fs::remove_dir(stale);
    Ok(())
}

/// Re-home a link-file host path (an absolute path on the pre-pivot root,
/// e.g. `/var/qsrdocker/volumes/xyz`) under [`OLD_ROOT`] so it can still be
/// read or bind-mounted from after `setup_mounts` has pivoted root.
fn rehome_under_old_root(mount: &MountRecord) -> MountRecord {
    let rehomed_host = Path::new(OLD_ROOT).join(mount.host_path.trim_start_matches('/'));
    MountRecord {
        host_path: rehomed_host.display().to_string(),
        guest_path: mount.guest_path.clone(),
        read_only: mount.read_only,
    }
}

/// Bind-mount each volume from its pre-pivot host path (reachable under
/// [`OLD_ROOT`]) onto its guest path inside the new root. Must run after
/// `setup_mounts` and before `cleanup_old_root`.
pub fn apply_volumes(mounts: &[MountRecord]) -> Result<(), InitError> {
    let rehomed: Vec<MountRecord> = mounts.iter().map(rehome_under_old_root).collect();
    crate::volume::apply_mounts(&rehomed)?;
    Ok(())
}

/// Resolve `program` against `PATH` the way a shell would.
pub fn resolve_program(program: &str, path_env: &str) -> Result<String, InitError> {
    if program.contains('/') {
        return Ok(program.to_string());
    }
    for dir in path_env.split(':') {
        let candidate = Path::new(dir).join(program);
        if candidate.is_file() {
            return Ok(candidate.display().to_string());
        }
    }
    Err(InitError::ProgramNotFound(program.to_string()))
}

/// Replace the current process image with the resolved user program.
pub fn exec_user_program(resolved_path: &str, argv: &[String]) -> Result<(), InitError> {
    let path = CString::new(resolved_path)?;
    let args: Vec<CString> = argv
        .iter()
        .map(|a| CString::new(a.as_str()))
        .collect::<Result<_, _>>()?;
    nix::unistd::execv(&path, &args)?;
    unreachable!("execv only returns on error, which is propagated above");
}

impl From<std::ffi::NulError> for InitError {
    fn from(_: std::ffi::NulError) -> Self {
        InitError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "argument contained an embedded NUL byte",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_program_passes_through_paths_with_slash() {
        assert_eq!(resolve_program("/bin/echo", "/usr/bin").unwrap(), "/bin/echo");
    }

    #[test]
    fn resolve_program_searches_path() {
        let resolved = resolve_program("sh", "/nonexistent:/bin:/usr/bin");
        assert!(resolved.is_ok() || resolved.is_err());
    }
}
