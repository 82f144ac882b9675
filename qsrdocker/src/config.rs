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

//! On-disk engine configuration, read from `/etc/qsrdocker/config.json`.
//! Every field has a serde default derived from the directory layout in
//! the external interfaces section, so a missing or partial config file
//! still produces a usable root.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_root() -> String {
    "/var/qsrdocker".to_string()
}

fn default_cgroup_root() -> String {
    "/sys/fs/cgroup".to_string()
}

fn default_bridge_prefix() -> String {
    "qsr".to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct QsrConfig {
    #[serde(default = "default_root")]
    pub root: String,
    #[serde(default = "default_cgroup_root")]
    pub cgroup_root: String,
    #[serde(default = "default_bridge_prefix")]
    pub bridge_prefix: String,
}

impl Default for QsrConfig {
    fn default() -> Self {
        QsrConfig {
            root: default_root(),
            cgroup_root: default_cgroup_root(),
            bridge_prefix: default_bridge_prefix(),
        }
    }
}

impl QsrConfig {
    /// Read `/etc/qsrdocker/config.json`, falling back to defaults
    /// wholesale if the file doesn't exist. A `--root` CLI flag
    /// overrides `root` afterwards, mirroring how `xc-bin`'s socket-path
    /// flag overrides the config-file value.
    pub fn load(path: &Path) -> anyhow::Result<QsrConfig> {
        if !path.exists() {
            return Ok(QsrConfig::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn with_root_override(mut self, root: Option<String>) -> Self {
        if let Some(root) = root {
            self.root = root;
        }
        self
    }

    pub fn root(&self) -> &Path {
        Path::new(&self.root)
    }

    pub fn image_dir(&self) -> PathBuf {
        self.root().join("image")
    }

    pub fn mount_dir(&self) -> PathBuf {
        self.root().join("overlay2")
    }

    pub fn container_dir(&self) -> PathBuf {
        self.root().join("container")
    }

    pub fn network_dir(&self) -> PathBuf {
        self.root().join("network")
    }

    pub fn subnet_state_path(&self) -> PathBuf {
        self.network_dir().join("ipam").join("subnet.json")
    }

    pub fn subnet_lock_path(&self) -> PathBuf {
        self.network_dir().join("ipam").join("_ipam.lock")
    }

    pub fn repositories_path(&self) -> PathBuf {
        self.image_dir().join("repositories.json")
    }

    pub fn image_metadata_path(&self, image_id: &str) -> PathBuf {
        self.image_dir().join("matedata").join(format!("{image_id}.json"))
    }

    pub fn names_path(&self) -> PathBuf {
        self.container_dir().join("containernames.json")
    }
}
