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

//! Namespace setup: the `clone` flags a container's init process is spawned
//! with, the `setns` re-entry path `exec` uses, and uid/gid map writers for
//! the user namespace.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::fd::RawFd;
use std::path::Path;

use nix::sched::CloneFlags;
use nix::unistd::Pid;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NsError {
    #[error("unshare failed: {0}")]
    Unshare(#[source] nix::Error),
    #[error("setns failed for {path}: {source}")]
    Setns {
        path: String,
        #[source]
        source: nix::Error,
    },
    #[error("open {path} failed: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("write {path} failed: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Which namespaces a container gets. UTS/IPC/mount/PID are unconditional;
/// network and user are opt-in because the `none` network driver and
/// privileged containers skip them.
#[derive(Debug, Clone, Copy)]
pub struct NamespaceSpec {
    pub network: bool,
    pub user: bool,
}

impl NamespaceSpec {
    pub fn clone_flags(&self) -> CloneFlags {
        let mut flags = CloneFlags::CLONE_NEWUTS
            | CloneFlags::CLONE_NEWIPC
            | CloneFlags::CLONE_NEWNS
            | CloneFlags::CLONE_NEWPID;
        if self.network {
            flags |= CloneFlags::CLONE_NEWNET;
        }
        if self.user {
            flags |= CloneFlags::CLONE_NEWUSER;
        }
        flags
    }
}

/// Equivalent to `unshare(2)` with this spec's flags. Used by the init
/// process before it pivots into the container root; PID and mount
/// namespaces only take effect for children forked afterwards, which is
/// why init always re-execs itself once the namespaces are live.
pub fn unshare(spec: NamespaceSpec) -> Result<(), NsError> {
    nix::sched::unshare(spec.clone_flags()).map_err(NsError::Unshare)
}

/// Join an already-running container's namespaces by path under
/// `/proc/<pid>/ns/*`. Used by `qsrdocker exec`.
pub fn setns(ns_path: &Path, flags: CloneFlags) -> Result<(), NsError> {
    let file = OpenOptions::new()
        .read(true)
        .open(ns_path)
        .map_err(|source| NsError::Open {
            path: ns_path.display().to_string(),
            source,
        })?;
    use std::os::fd::AsRawFd;
    let fd: RawFd = file.as_raw_fd();
    nix::sched::setns(fd, flags).map_err(|source| NsError::Setns {
        path: ns_path.display().to_string(),
        source,
    })
}

/// Join every namespace of a running container's init process, in the
/// order the kernel requires (user namespace, if any, before the others).
pub fn setns_all(target: Pid, with_user: bool, with_network: bool) -> Result<(), NsError> {
    let base = format!("/proc/{target}/ns");
    if with_user {
        setns(
            Path::new(&format!("{base}/user")),
            CloneFlags::CLONE_NEWUSER,
        )?;
    }
    setns(Path::new(&format!("{base}/uts")), CloneFlags::CLONE_NEWUTS)?;
    setns(Path::new(&format!("{base}/ipc")), CloneFlags::CLONE_NEWIPC)?;
    setns(Path::new(&format!("{base}/mnt")), CloneFlags::CLONE_NEWNS)?;
    setns(Path::new(&format!("{base}/pid")), CloneFlags::CLONE_NEWPID)?;
    if with_network {
        setns(Path::new(&format!("{base}/net")), CloneFlags::CLONE_NEWNET)?;
    }
    Ok(())
}

/// A single `ID_inside ID_outside length` line for `/proc/<pid>/{uid,gid}_map`.
#[derive(Debug, Clone, Copy)]
pub struct IdMapEntry {
    pub inside: u32,
    pub outside: u32,
    pub length: u32,
}

impl IdMapEntry {
    pub fn identity_root() -> Self {
        IdMapEntry {
            inside: 0,
            outside: 0,
            length: 1,
        }
    }

    fn render(&self) -> String {
        format!("{} {} {}\n", self.inside, self.outside, self.length)
    }
}

fn write_map_file(path: &Path, entries: &[IdMapEntry]) -> Result<(), NsError> {
    let mut buf = String::new();
    for entry in entries {
        buf.push_str(&entry.render());
    }
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|source| NsError::Open {
            path: path.display().to_string(),
            source,
        })?;
    file.write_all(buf.as_bytes())
        .map_err(|source| NsError::Write {
            path: path.display().to_string(),
            source,
        })
}

/// Disable `setgroups` before writing the gid map, as the kernel requires
/// for an unprivileged user namespace.
pub fn deny_setgroups(pid: Pid) -> Result<(), NsError> {
    let path = format!("/proc/{pid}/setgroups");
    let path = Path::new(&path);
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|source| NsError::Open {
            path: path.display().to_string(),
            source,
        })?;
    file.write_all(b"deny").map_err(|source| NsError::Write {
        path: path.display().to_string(),
        source,
    })
}

pub fn write_uid_map(pid: Pid, entries: &[IdMapEntry]) -> Result<(), NsError> {
    write_map_file(Path::new(&format!("/proc/{pid}/uid_map")), entries)
}

pub fn write_gid_map(pid: Pid, entries: &[IdMapEntry]) -> Result<(), NsError> {
    write_map_file(Path::new(&format!("/proc/{pid}/gid_map")), entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_flags_default_excludes_user_and_net() {
        let spec = NamespaceSpec {
            network: false,
            user: false,
        };
        let flags = spec.clone_flags();
        assert!(!flags.contains(CloneFlags::CLONE_NEWNET));
        assert!(!flags.contains(CloneFlags::CLONE_NEWUSER));
        assert!(flags.contains(CloneFlags::CLONE_NEWPID));
    }

    #[test]
    fn clone_flags_with_network_and_user() {
        let spec = NamespaceSpec {
            network: true,
            user: true,
        };
        let flags = spec.clone_flags();
        assert!(flags.contains(CloneFlags::CLONE_NEWNET));
        assert!(flags.contains(CloneFlags::CLONE_NEWUSER));
    }

    #[test]
    fn id_map_entry_renders() {
        let entry = IdMapEntry {
            inside: 0,
            outside: 100000,
            length: 65536,
        };
        assert_eq!(entry.render(), "0 100000 65536\n");
    }
}
