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

//! Process Launcher: the self-re-exec `clone` that begets a child which
//! begins life running the init stage.
//!
//! The child is created with `nix::sched::clone` directly (not
//! `fork`+`unshare`) because `CLONE_NEWPID` only takes effect for a
//! genuinely new child — a process that calls `unshare(CLONE_NEWPID)`
//! stays in its old PID namespace and only its *own* children land in the
//! new one. Cloning with the flag set is the only way for the child
//! itself to become pid 1 of the new namespace.

use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::Path;

use nix::unistd::Pid;
use thiserror::Error;

use linux::ns::NamespaceSpec;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Nix(#[from] nix::Error),
    #[error(transparent)]
    Ns(#[from] linux::ns::NsError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("command must not be empty")]
    EmptyCommand,
}

pub struct SpawnedProcess {
    pub pid: Pid,
    /// Write end of the cmd pipe (fd 3 in the child). The caller writes
    /// the user command here once cgroups and networking are attached,
    /// then closes it — the write-then-close ordering is what tells the
    /// child it may proceed.
    pub cmd_pipe_write: OwnedFd,
}

pub struct LaunchRequest<'a> {
    pub ns_spec: NamespaceSpec,
    pub cwd: &'a Path,
    pub env: &'a [String],
    pub stdio_log: Option<&'a Path>,
    pub tty: bool,
    pub self_exe: &'a Path,
}

/// Ensures `/proc/sys/user/max_user_namespaces` isn't zero (which would
/// make every `CLONE_NEWUSER` attempt fail), bumping it to 15000.
pub fn ensure_user_namespaces_enabled() -> std::io::Result<()> {
    let current = std::fs::read_to_string("/proc/sys/user/max_user_namespaces")?;
    if current.trim() == "0" {
        std::fs::write("/proc/sys/user/max_user_namespaces", b"15000")?;
    }
    Ok(())
}

/// Spawn the container's init process. Returns once `clone` has returned
/// in the parent; the child is paused (blocked reading the sync pipe)
/// until [`finish_user_ns_setup`] is called with the returned PID.
pub fn spawn(req: &LaunchRequest) -> Result<(SpawnedProcess, OwnedFd), LaunchError> {
    ensure_user_namespaces_enabled()?;

    let (cmd_read, cmd_write) = nix::unistd::pipe()?;
    let (sync_read, sync_write) = nix::unistd::pipe()?;

    let self_exe = req.self_exe.to_path_buf();
    let cwd = req.cwd.to_path_buf();
    let env: Vec<CString> = req
        .env
        .iter()
        .map(|e| CString::new(e.as_str()).expect("env entries must not contain NUL"))
        .collect();
    let stdio_log = req.stdio_log.map(|p| p.to_path_buf());
    let tty = req.tty;
    let cmd_read_fd = cmd_read.as_raw_fd();
    let sync_read_fd = sync_read.as_raw_fd();

    let mut stack = vec![0u8; 4 * 1024 * 1024];
    let flags = req.ns_spec.clone_flags();

    let child_fn = Box::new(move || -> isize {
        // Block until the parent has written uid/gid maps for us.
        let mut buf = [0u8; 1];
        let _ = nix::unistd::read(sync_read_fd, &mut buf);

        let _ = nix::unistd::chdir(&cwd);
        if let Some(log_path) = &stdio_log {
            if !tty {
                if let Ok(file) = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(log_path)
                {
                    let fd = file.as_raw_fd();
                    let _ = nix::unistd::dup2(fd, 1);
                    let _ = nix::unistd::dup2(fd, 2);
                }
            }
        }
        // Move the cmd pipe's read end onto fd 3 for the init stage.
        let _ = nix::unistd::dup2(cmd_read_fd, 3);

        let exe = match CString::new(self_exe.as_os_str().to_string_lossy().into_owned()) {
            Ok(s) => s,
            Err(_) => return 127,
        };
        let argv = [exe.clone(), CString::new("init").unwrap()];
        let _ = nix::unistd::execve(&exe, &argv, &env);
        127
    });

    let pid = unsafe {
        nix::sched::clone(
            child_fn,
            &mut stack,
            flags,
            Some(nix::sys::signal::Signal::SIGCHLD as i32),
        )
    }?;

    // Close the ends this process no longer needs.
    drop(cmd_read);
    drop(sync_read);

    Ok((
        SpawnedProcess {
            pid,
            cmd_pipe_write: cmd_write,
        },
        sync_write,
    ))
}

/// Write the single-entry uid/gid maps (container root -> invoking user)
/// and release the child from the sync barrier. Must be called before
/// the cmd pipe is written to.
pub fn finish_user_ns_setup(
    pid: Pid,
    uid_outside: u32,
    gid_outside: u32,
    sync_write: OwnedFd,
) -> Result<(), LaunchError> {
    linux::ns::deny_setgroups(pid)?;
    linux::ns::write_uid_map(
        pid,
        &[linux::ns::IdMapEntry {
            inside: 0,
            outside: uid_outside,
            length: 1,
        }],
    )?;
    linux::ns::write_gid_map(
        pid,
        &[linux::ns::IdMapEntry {
            inside: 0,
            outside: gid_outside,
            length: 1,
        }],
    )?;
    nix::unistd::write(&sync_write, b"\0")?;
    Ok(())
}

/// Write the user command to the cmd pipe and close it — the
/// write-then-close ordering that signals the init stage it may proceed.
/// Must happen after cgroup attach and network wiring.
pub fn send_command(cmd_pipe_write: OwnedFd, argv: &[String]) -> Result<(), LaunchError> {
    if argv.is_empty() {
        return Err(LaunchError::EmptyCommand);
    }
    let joined = argv.join(" ");
    nix::unistd::write(&cmd_pipe_write, joined.as_bytes())?;
    drop(cmd_pipe_write);
    Ok(())
}
