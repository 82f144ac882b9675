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

//! cgroupfs v1 resource-limit controllers: `memory`, `cpu` and `cpuset`.
//!
//! One [`CgroupGroup`] per container, keyed by container id, under each
//! subsystem's hierarchy mountpoint. Mirrors the subsystem abstraction of
//! the Go original's `cgroups/subsystems` package, where every subsystem
//! implements the same `set limit / add pid / remove` trio.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CgroupError {
    #[error("cgroup subsystem {subsystem} not mounted at {path}")]
    NotMounted { subsystem: String, path: String },
    #[error("create {0}: {1}")]
    Create(String, std::io::Error),
    #[error("write {0}: {1}")]
    Write(String, std::io::Error),
    #[error("read {0}: {1}")]
    Read(String, std::io::Error),
    #[error("remove {0}: {1}")]
    Remove(String, std::io::Error),
}

/// A resource limit request. `None` fields are left at the subsystem's
/// default (unlimited).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ResourceLimits {
    pub memory_bytes: Option<u64>,
    pub cpu_shares: Option<u64>,
    /// CFS quota in microseconds per `cpu_period_us` period; paired with
    /// [`ResourceLimits::cpu_period_us`] to express a fractional-core cap.
    pub cpu_quota_us: Option<i64>,
    pub cpu_period_us: Option<u64>,
    pub cpuset_cpus: Option<String>,
    /// Explicit `cpuset.mems` override; falls back to the host's NUMA
    /// node list when unset but `cpuset_cpus` is.
    pub cpuset_mems: Option<String>,
    /// `1` disables the OOM killer for this group's `memory.oom_control`;
    /// `0` (or unset) leaves the kernel default in place.
    pub oom_kill_disable: Option<bool>,
}

const ROOT: &str = "/sys/fs/cgroup";

/// One subsystem's slice of a container's cgroup: a directory under
/// `/sys/fs/cgroup/<subsystem>/qsrdocker/<container_id>`.
pub struct Subsystem {
    name: &'static str,
    mount_root: PathBuf,
}

impl Subsystem {
    fn new(name: &'static str) -> Self {
        Subsystem {
            name,
            mount_root: Path::new(ROOT).join(name),
        }
    }

    fn group_path(&self, container_id: &str) -> PathBuf {
        self.mount_root.join("qsrdocker").join(container_id)
    }

    fn ensure_mounted(&self) -> Result<(), CgroupError> {
        if !self.mount_root.is_dir() {
            return Err(CgroupError::NotMounted {
                subsystem: self.name.to_string(),
                path: self.mount_root.display().to_string(),
            });
        }
        Ok(())
    }

    fn create(&self, container_id: &str) -> Result<PathBuf, CgroupError> {
        self.ensure_mounted()?;
        let path = self.group_path(container_id);
        fs::create_dir_all(&path)
            .map_err(|e| CgroupError::Create(path.display().to_string(), e))?;
        Ok(path)
    }

    fn write_file(path: &Path, value: &str) -> Result<(), CgroupError> {
        fs::write(path, value).map_err(|e| CgroupError::Write(path.display().to_string(), e))
    }

    fn add_task(&self, container_id: &str, pid: i32) -> Result<(), CgroupError> {
        let path = self.group_path(container_id).join("tasks");
        Self::write_file(&path, &pid.to_string())
    }

    fn remove(&self, container_id: &str) -> Result<(), CgroupError> {
        let path = self.group_path(container_id);
        if path.is_dir() {
            fs::remove_dir(&path).map_err(|e| CgroupError::Remove(path.display().to_string(), e))?;
        }
        Ok(())
    }
}

/// The full set of subsystems a container is placed into. Limits applied
/// that the caller leaves `None` are simply skipped, matching the Go
/// original's per-subsystem `Set` no-op-on-empty behavior.
pub struct CgroupGroup {
    container_id: String,
    memory: Subsystem,
    cpu: Subsystem,
    cpuset: Subsystem,
}

impl CgroupGroup {
    pub fn new(container_id: impl Into<String>) -> Self {
        CgroupGroup {
            container_id: container_id.into(),
            memory: Subsystem::new("memory"),
            cpu: Subsystem::new("cpu"),
            cpuset: Subsystem::new("cpuset"),
        }
    }

    /// Create the group directories and apply `limits`. Does not add any
    /// process yet; call [`CgroupGroup::add_task`] once the container's
    /// init pid is known.
    pub fn apply(&self, limits: &ResourceLimits) -> Result<(), CgroupError> {
        if let Some(bytes) = limits.memory_bytes {
            let dir = self.memory.create(&self.container_id)?;
            Subsystem::write_file(&dir.join("memory.limit_in_bytes"), &bytes.to_string())?;
        }
        if limits.cpu_shares.is_some() || limits.cpu_quota_us.is_some() {
            let dir = self.cpu.create(&self.container_id)?;
            if let Some(shares) = limits.cpu_shares {
                Subsystem::write_file(&dir.join("cpu.shares"), &shares.to_string())?;
            }
            if let Some(period) = limits.cpu_period_us {
                Subsystem::write_file(&dir.join("cpu.cfs_period_us"), &period.to_string())?;
            }
            if let Some(quota) = limits.cpu_quota_us {
                Subsystem::write_file(&dir.join("cpu.cfs_quota_us"), &quota.to_string())?;
            }
        }
        if limits.cpuset_cpus.is_some() || limits.cpuset_mems.is_some() {
            let dir = self.cpuset.create(&self.container_id)?;
            // cpuset requires both cpus and mems populated before tasks can
            // join; an explicit flag wins, otherwise inherit from the
            // parent cpuset the way the kernel itself expects a fresh
            // cpuset group to be seeded.
            let mems = limits
                .cpuset_mems
                .clone()
                .unwrap_or_else(|| available_numa_mems().unwrap_or_else(|_| "0".to_string()));
            Subsystem::write_file(&dir.join("cpuset.mems"), &mems)?;
            let cpus = limits
                .cpuset_cpus
                .clone()
                .unwrap_or_else(|| parent_cpuset_value("cpuset.cpus").unwrap_or_else(|_| "0".to_string()));
            Subsystem::write_file(&dir.join("cpuset.cpus"), &cpus)?;
        }
        if let Some(disable) = limits.oom_kill_disable {
            let dir = self.memory.create(&self.container_id)?;
            Subsystem::write_file(&dir.join("memory.oom_control"), if disable { "1" } else { "0" })?;
        }
        Ok(())
    }

    pub fn add_task(&self, pid: i32) -> Result<(), CgroupError> {
        for sub in [&self.memory, &self.cpu, &self.cpuset] {
            if sub.group_path(&self.container_id).is_dir() {
                sub.add_task(&self.container_id, pid)?;
            }
        }
        Ok(())
    }

    pub fn destroy(&self) -> Result<(), CgroupError> {
        self.memory.remove(&self.container_id)?;
        self.cpu.remove(&self.container_id)?;
        self.cpuset.remove(&self.container_id)?;
        Ok(())
    }

    /// Current resident memory usage in bytes, for `qsrdocker inspect`.
    pub fn memory_usage_bytes(&self) -> Result<u64, CgroupError> {
        let path = self.memory.group_path(&self.container_id).join("memory.usage_in_bytes");
        let raw = fs::read_to_string(&path).map_err(|e| CgroupError::Read(path.display().to_string(), e))?;
        raw.trim().parse().map_err(|_| CgroupError::Read(path.display().to_string(), std::io::Error::new(std::io::ErrorKind::InvalidData, "non-numeric usage")))
    }
}

/// Read a tunable off the parent (root) cpuset group, e.g.
/// `/sys/fs/cgroup/cpuset/cpuset.cpus`, to seed a fresh per-container
/// cpuset group when the caller left that tunable unset.
fn parent_cpuset_value(file: &str) -> Result<String, CgroupError> {
    let path = Path::new(ROOT).join("cpuset").join(file);
    fs::read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| CgroupError::Read(path.display().to_string(), e))
}

/// List the NUMA nodes the host actually has memory on, by scanning
/// `/proc/zoneinfo` for `Node N` headers. Falls back to `"0"` if parsing
/// fails; a single-node host is the overwhelmingly common case.
pub fn available_numa_mems() -> Result<String, CgroupError> {
    let path = Path::new("/proc/zoneinfo");
    let content = fs::read_to_string(path).map_err(|e| CgroupError::Read(path.display().to_string(), e))?;
    let mut nodes = std::collections::BTreeSet::new();
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("Node ") {
            if let Some((num, _)) = rest.split_once(',') {
                if let Ok(n) = num.trim().parse::<u32>() {
                    nodes.insert(n);
                }
            }
        }
    }
    if nodes.is_empty() {
        return Ok("0".to_string());
    }
    Ok(nodes
        .into_iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_path_is_namespaced_per_container() {
        let sub = Subsystem::new("memory");
        let path = sub.group_path("abc123");
        assert!(path.ends_with("qsrdocker/abc123"));
    }

    #[test]
    fn limits_default_to_unset() {
        let limits = ResourceLimits::default();
        assert!(limits.memory_bytes.is_none());
        assert!(limits.cpuset_cpus.is_none());
    }
}
