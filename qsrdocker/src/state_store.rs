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

//! Container state store: `<containerdir>/<id>/config.json`. Every
//! `get` reconciles `status` against `/proc/<pid>` before returning the
//! descriptor, so a crashed container heals itself on the next query
//! rather than on some separate sweep.

use std::path::{Path, PathBuf};

use nix::unistd::Pid;
use thiserror::Error;

use crate::models::{ContainerDescriptor, ContainerStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("container {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub struct ContainerStore {
    container_dir: PathBuf,
}

impl ContainerStore {
    pub fn new(container_dir: impl Into<PathBuf>) -> ContainerStore {
        ContainerStore {
            container_dir: container_dir.into(),
        }
    }

    fn config_path(&self, id: &str) -> PathBuf {
        self.container_dir.join(id).join("config.json")
    }

    pub fn container_root(&self, id: &str) -> PathBuf {
        self.container_dir.join(id)
    }

    /// Reconcile `status`/`pid` against `/proc` and persist the result.
    /// `Paused` containers are never downgraded: a paused container has
    /// no live PID by design.
    fn reconcile(&self, descriptor: &mut ContainerDescriptor) {
        if descriptor.status == ContainerStatus::Paused {
            return;
        }
        let alive = descriptor.pid > 0 && linux::proc::is_alive(Pid::from_raw(descriptor.pid));
        descriptor.status = if alive {
            ContainerStatus::Running
        } else {
            ContainerStatus::Dead
        };
        if !alive {
            descriptor.pid = -1;
        }
    }

    pub fn get(&self, id: &str) -> Result<ContainerDescriptor, StoreError> {
        let path = self.config_path(id);
        if !path.exists() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let raw = std::fs::read_to_string(&path)?;
        let mut descriptor: ContainerDescriptor = serde_json::from_str(&raw)?;
        self.reconcile(&mut descriptor);
        self.put(&descriptor)?;
        Ok(descriptor)
    }

    pub fn put(&self, descriptor: &ContainerDescriptor) -> Result<(), StoreError> {
        let path = self.config_path(&descriptor.id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(descriptor)?;
        std::fs::write(&path, raw)?;
        Ok(())
    }

    /// Enumerate every container id under the container directory,
    /// excluding the name registry file.
    pub fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        if !self.container_dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.container_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                ids.push(name.to_string());
            }
        }
        Ok(ids)
    }

    pub fn list(&self) -> Result<Vec<ContainerDescriptor>, StoreError> {
        let mut descriptors = Vec::new();
        for id in self.list_ids()? {
            descriptors.push(self.get(&id)?);
        }
        Ok(descriptors)
    }

    pub fn remove_workspace(&self, id: &str) -> Result<(), StoreError> {
        let path = self.container_root(id);
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        Ok(())
    }
}

pub fn is_overlay_mounted(merged: &Path) -> bool {
    matches!(linux::proc::mount_fstype(merged), Ok(Some(fstype)) if fstype == "overlay")
}
