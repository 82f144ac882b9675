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

//! Name/ID registry: `<containerdir>/containernames.json` stores both
//! `name -> id` and `id -> id` entries so every other subsystem can accept
//! either form by looking up through the same table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub struct NameRegistry {
    path: PathBuf,
}

impl NameRegistry {
    pub fn new(path: impl Into<PathBuf>) -> NameRegistry {
        NameRegistry { path: path.into() }
    }

    fn load(&self) -> Result<HashMap<String, String>, RegistryError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn store(&self, table: &HashMap<String, String>) -> Result<(), RegistryError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(table)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }

    /// Register both `name -> id` (when a name was given) and `id -> id`.
    pub fn register(&self, id: &str, name: Option<&str>) -> Result<(), RegistryError> {
        let mut table = self.load()?;
        table.insert(id.to_string(), id.to_string());
        if let Some(name) = name {
            table.insert(name.to_string(), id.to_string());
        }
        self.store(&table)
    }

    /// Resolve either a name or an id to the canonical id. Absence of the
    /// file or the key is "not found", not an error.
    pub fn resolve(&self, name_or_id: &str) -> Result<Option<String>, RegistryError> {
        let table = self.load()?;
        Ok(table.get(name_or_id).cloned())
    }

    /// Delete both the `id -> id` entry and whichever name entry (if any)
    /// currently maps onto `id`.
    pub fn unregister(&self, id: &str) -> Result<(), RegistryError> {
        let mut table = self.load()?;
        table.remove(id);
        let names: Vec<String> = table
            .iter()
            .filter(|(_, v)| v.as_str() == id)
            .map(|(k, _)| k.clone())
            .collect();
        for name in names {
            table.remove(&name);
        }
        self.store(&table)
    }

    pub fn is_name_taken(&self, name: &str) -> Result<bool, RegistryError> {
        Ok(self.load()?.contains_key(name))
    }
}

pub fn names_path(container_dir: &Path) -> PathBuf {
    container_dir.join("containernames.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn register_and_resolve_by_name_or_id() {
        let dir = tempdir().unwrap();
        let reg = NameRegistry::new(dir.path().join("names.json"));
        reg.register("abc0123456", Some("web")).unwrap();
        assert_eq!(reg.resolve("web").unwrap().as_deref(), Some("abc0123456"));
        assert_eq!(
            reg.resolve("abc0123456").unwrap().as_deref(),
            Some("abc0123456")
        );
        assert_eq!(reg.resolve("missing").unwrap(), None);
    }

    #[test]
    fn unregister_removes_both_entries() {
        let dir = tempdir().unwrap();
        let reg = NameRegistry::new(dir.path().join("names.json"));
        reg.register("abc0123456", Some("web")).unwrap();
        reg.unregister("abc0123456").unwrap();
        assert_eq!(reg.resolve("web").unwrap(), None);
        assert_eq!(reg.resolve("abc0123456").unwrap(), None);
    }
}
