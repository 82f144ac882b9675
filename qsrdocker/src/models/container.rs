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

//! The container descriptor and its status type.
//!
//! Status is a single enum rather than a status string plus several
//! boolean flags kept in lockstep, which makes "status is single-valued"
//! true by construction instead of something that has to be checked.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::network::Endpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ContainerStatus {
    Running,
    Paused,
    OomKilled,
    Dead,
    Created,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContainerStatus::Running => "Running",
            ContainerStatus::Paused => "Paused",
            ContainerStatus::OomKilled => "OOMKilled",
            ContainerStatus::Dead => "Dead",
            ContainerStatus::Created => "Created",
        };
        write!(f, "{s}")
    }
}

/// `<host-path>:<guest-path>`, resolved: the host side is canonicalized to
/// an absolute path at create time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountRecord {
    pub host_path: String,
    pub guest_path: String,
    pub read_only: bool,
}

impl MountRecord {
    /// Render back to the `host:guest` shape persisted in the `link` file.
    pub fn to_link_line(&self) -> String {
        format!("{}:{}", self.host_path, self.guest_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphDriverData {
    pub driver: String,
    pub lower_chain: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerDescriptor {
    pub id: String,
    pub name: Option<String>,
    pub image: String,
    pub created_at: DateTime<Utc>,
    pub status: ContainerStatus,
    /// PID of the init process as observed from the host; `-1` when not
    /// running.
    pub pid: i32,
    pub entrypoint: String,
    pub args: Vec<String>,
    /// `KEY=VALUE` list, duplicates removed, later entries win — see
    /// `varutil::env`.
    pub env: Vec<String>,
    pub graph_driver: GraphDriverData,
    pub mounts: Vec<MountRecord>,
    /// Raw `host:guest` strings as supplied by the user, independent of
    /// `mounts`' resolved form — kept alongside it because `start` needs
    /// to rebuild the link file without re-parsing the resolved records.
    pub volumes: Vec<String>,
    pub cgroup_manager: String,
    pub tty: bool,
    pub endpoint: Option<Endpoint>,
    /// Resource limits requested at `run` time, reapplied verbatim by
    /// `start` rather than resetting to the subsystem defaults.
    #[serde(default)]
    pub limits: linux::cgroup::ResourceLimits,
}

impl ContainerDescriptor {
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.entrypoint.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}
