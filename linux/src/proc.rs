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

//! `/proc` readers: liveness probes, environment inspection and the
//! sysctls the user-namespace path depends on.

use std::fs;
use std::path::Path;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcError {
    #[error("read {0}: {1}")]
    Read(String, std::io::Error),
    #[error("write {0}: {1}")]
    Write(String, std::io::Error),
}

/// Whether `pid` currently exists, by sending signal 0 — the standard
/// liveness check that doesn't actually disturb the process.
pub fn is_alive(pid: Pid) -> bool {
    match signal::kill(pid, None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        // EPERM means it exists but we can't signal it; still alive.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Send `signal` to `pid`, translating `ESRCH` (already exited) into `Ok`
/// so callers don't have to special-case the race between a liveness
/// check and the process dying on its own.
pub fn signal_pid(pid: Pid, sig: Signal) -> Result<(), Errno> {
    match signal::kill(pid, sig) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Parse `/proc/<pid>/environ`'s NUL-separated `KEY=VALUE` records.
pub fn read_environ(pid: Pid) -> Result<Vec<String>, ProcError> {
    let path = format!("/proc/{pid}/environ");
    let raw = fs::read(&path).map_err(|e| ProcError::Read(path.clone(), e))?;
    Ok(raw
        .split(|b| *b == 0)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect())
}

/// Whether `path` currently appears in `/proc/mounts`, used to confirm an
/// overlay mount came up (or has already gone down) before acting on it.
pub fn is_mounted(path: &Path) -> Result<bool, ProcError> {
    Ok(mount_fstype(path)?.is_some())
}

/// The filesystem type `/proc/mounts` reports for `path`, if it is
/// currently a mountpoint.
pub fn mount_fstype(path: &Path) -> Result<Option<String>, ProcError> {
    let mounts = fs::read_to_string("/proc/mounts")
        .map_err(|e| ProcError::Read("/proc/mounts".to_string(), e))?;
    let target = path.display().to_string();
    Ok(mounts.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let mountpoint = fields.nth(1)?;
        if mountpoint != target {
            return None;
        }
        fields.next().map(|fstype| fstype.to_string())
    }))
}

/// Read `/proc/sys/user/max_user_namespaces`; `0` means the kernel (or a
/// sysctl) has user namespaces disabled entirely, which is useful to
/// surface as a clear error up front rather than a confusing `unshare`
/// failure deep in container start.
pub fn max_user_namespaces() -> Result<u64, ProcError> {
    let path = "/proc/sys/user/max_user_namespaces";
    let raw = fs::read_to_string(path).map_err(|e| ProcError::Read(path.to_string(), e))?;
    raw.trim()
        .parse()
        .map_err(|_| ProcError::Read(path.to_string(), std::io::Error::new(std::io::ErrorKind::InvalidData, "non-numeric")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_alive() {
        assert!(is_alive(Pid::from_raw(1)));
    }

    #[test]
    fn bogus_pid_is_not_alive() {
        assert!(!is_alive(Pid::from_raw(i32::MAX)));
    }
}
