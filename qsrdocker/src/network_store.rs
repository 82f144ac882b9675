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

//! Network descriptor persistence: one `<networkdir>/<name>.json` per
//! `network create`, looked up by name the same way containers are looked
//! up by id — there is no separate network id/name registry because
//! network names are required and unique by construction (`network
//! create` refuses a duplicate name).

use std::path::PathBuf;

use thiserror::Error;

use crate::models::Network;

#[derive(Debug, Error)]
pub enum NetworkStoreError {
    #[error("network {0} not found")]
    NotFound(String),
    #[error("network {0} already exists")]
    Exists(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub struct NetworkStore {
    network_dir: PathBuf,
}

impl NetworkStore {
    pub fn new(network_dir: impl Into<PathBuf>) -> NetworkStore {
        NetworkStore {
            network_dir: network_dir.into(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.network_dir.join(format!("{name}.json"))
    }

    pub fn create(&self, name: &str, network: &Network) -> Result<(), NetworkStoreError> {
        let path = self.path(name);
        if path.exists() {
            return Err(NetworkStoreError::Exists(name.to_string()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(network)?;
        std::fs::write(&path, raw)?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Network, NetworkStoreError> {
        let path = self.path(name);
        if !path.exists() {
            return Err(NetworkStoreError::NotFound(name.to_string()));
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn remove(&self, name: &str) -> Result<(), NetworkStoreError> {
        let path = self.path(name);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<(String, Network)>, NetworkStoreError> {
        if !self.network_dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.network_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let raw = std::fs::read_to_string(&path)?;
            let network: Network = serde_json::from_str(&raw)?;
            out.push((stem.to_string(), network));
        }
        Ok(out)
    }
}

impl From<NetworkStoreError> for crate::error::EngineError {
    fn from(e: NetworkStoreError) -> Self {
        match &e {
            NetworkStoreError::NotFound(_) => crate::error::EngineError::NotFound(e.to_string()),
            NetworkStoreError::Exists(_) => crate::error::EngineError::Conflict(e.to_string()),
            _ => crate::error::EngineError::Other(e.into()),
        }
    }
}
