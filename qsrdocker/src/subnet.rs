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

//! Bitmap-based subnet allocator: one bit string per managed CIDR, `'1'`
//! meaning allocated (including the gateway at offset 0), persisted as
//! JSON.
//!
//! A plain struct loaded fresh at each call boundary rather than a
//! process-global singleton, with the filesystem sentinel lock acquired
//! around the load-modify-store.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use netcidr::Ipv4Cidr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubnetError {
    #[error("subnet {0} already registered")]
    Exists(String),
    #[error("subnet {0} overlaps an existing registered subnet")]
    Conflicts(String),
    #[error("prefix length of {0} is smaller than the minimum of /24")]
    PrefixTooSmall(String),
    #[error("subnet {0} is not registered")]
    Missing(String),
    #[error("subnet {0} is exhausted")]
    Exhausted(String),
    #[error("could not acquire subnet lock after retries")]
    LockBusy,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Bit string persisted per CIDR: one byte (`b'0'`/`b'1'`) per host offset.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SubnetState {
    bitmaps: HashMap<String, String>,
}

/// A sentinel-file lock acquired around a load-modify-store cycle. Retries
/// up to three times at one-second intervals before giving up, matching
/// the concurrency model's stated backoff.
struct SentinelLock {
    path: PathBuf,
}

impl SentinelLock {
    fn acquire(path: &Path) -> Result<SentinelLock, SubnetError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        for attempt in 0..3 {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
            {
                Ok(_) => {
                    return Ok(SentinelLock {
                        path: path.to_path_buf(),
                    })
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if attempt < 2 {
                        std::thread::sleep(Duration::from_secs(1));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(SubnetError::LockBusy)
    }
}

impl Drop for SentinelLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

pub struct SubnetAllocator {
    state_path: PathBuf,
    lock_path: PathBuf,
}

impl SubnetAllocator {
    pub fn new(state_path: impl Into<PathBuf>, lock_path: impl Into<PathBuf>) -> SubnetAllocator {
        SubnetAllocator {
            state_path: state_path.into(),
            lock_path: lock_path.into(),
        }
    }

    fn load(&self) -> Result<SubnetState, SubnetError> {
        if !self.state_path.exists() {
            return Ok(SubnetState::default());
        }
        let raw = std::fs::read_to_string(&self.state_path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn store(&self, state: &SubnetState) -> Result<(), SubnetError> {
        if let Some(parent) = self.state_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(state)?;
        std::fs::write(&self.state_path, raw)?;
        Ok(())
    }

    /// Run `f` with the loaded state inside the critical section, storing
    /// whatever `f` leaves behind once it returns `Ok`.
    fn with_locked_state<T>(
        &self,
        f: impl FnOnce(&mut SubnetState) -> Result<T, SubnetError>,
    ) -> Result<T, SubnetError> {
        let _lock = SentinelLock::acquire(&self.lock_path)?;
        let mut state = self.load()?;
        let result = f(&mut state)?;
        self.store(&state)?;
        Ok(result)
    }

    pub fn create(&self, cidr: &Ipv4Cidr) -> Result<(), SubnetError> {
        let key = cidr.to_string();
        if cidr.mask < 24 {
            return Err(SubnetError::PrefixTooSmall(key));
        }
        self.with_locked_state(|state| {
            if state.bitmaps.contains_key(&key) {
                return Err(SubnetError::Exists(key.clone()));
            }
            for existing in state.bitmaps.keys() {
                let existing_cidr: Ipv4Cidr = existing.parse().map_err(|_| SubnetError::Missing(existing.clone()))?;
                if existing_cidr.contains_inclusive(&cidr.addr())
                    || cidr.contains_inclusive(&existing_cidr.addr())
                {
                    return Err(SubnetError::Conflicts(key.clone()));
                }
            }
            let bits = "0".repeat(cidr.host_count() as usize);
            state.bitmaps.insert(key, bits);
            Ok(())
        })
    }

    pub fn allocate(&self, cidr: &Ipv4Cidr) -> Result<Ipv4Addr, SubnetError> {
        let key = cidr.to_string();
        self.with_locked_state(|state| {
            let bits = state
                .bitmaps
                .get_mut(&key)
                .ok_or_else(|| SubnetError::Missing(key.clone()))?;
            let mut bytes: Vec<u8> = bits.as_bytes().to_vec();
            let offset = bytes
                .iter()
                .position(|b| *b == b'0')
                .ok_or_else(|| SubnetError::Exhausted(key.clone()))?;
            bytes[offset] = b'1';
            *bits = String::from_utf8(bytes).expect("ascii bitmap");
            Ok(cidr
                .addr_at_offset(offset as u64)
                .expect("offset came from a bit within host_count"))
        })
    }

    pub fn release(&self, cidr: &Ipv4Cidr, addr: Ipv4Addr) -> Result<(), SubnetError> {
        let key = cidr.to_string();
        self.with_locked_state(|state| {
            let offset = cidr
                .offset_of(&addr)
                .ok_or_else(|| SubnetError::Missing(key.clone()))?;
            if offset == 0 {
                state.bitmaps.remove(&key);
                return Ok(());
            }
            let bits = state
                .bitmaps
                .get_mut(&key)
                .ok_or_else(|| SubnetError::Missing(key.clone()))?;
            let mut bytes: Vec<u8> = bits.as_bytes().to_vec();
            if let Some(slot) = bytes.get_mut(offset as usize) {
                *slot = b'0';
            }
            *bits = String::from_utf8(bytes).expect("ascii bitmap");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn allocator() -> (tempfile::TempDir, SubnetAllocator) {
        let dir = tempdir().unwrap();
        let alloc = SubnetAllocator::new(dir.path().join("subnet.json"), dir.path().join("lock"));
        (dir, alloc)
    }

    #[test]
    fn first_allocate_is_gateway() {
        let (_dir, alloc) = allocator();
        let cidr: Ipv4Cidr = "172.30.0.0/24".parse().unwrap();
        alloc.create(&cidr).unwrap();
        let first = alloc.allocate(&cidr).unwrap();
        assert_eq!(first, Ipv4Addr::new(172, 30, 0, 1));
        let second = alloc.allocate(&cidr).unwrap();
        assert_eq!(second, Ipv4Addr::new(172, 30, 0, 2));
    }

    #[test]
    fn release_returns_address_to_pool() {
        let (_dir, alloc) = allocator();
        let cidr: Ipv4Cidr = "172.30.0.0/24".parse().unwrap();
        alloc.create(&cidr).unwrap();
        let gw = alloc.allocate(&cidr).unwrap();
        let first = alloc.allocate(&cidr).unwrap();
        alloc.release(&cidr, first).unwrap();
        let reallocated = alloc.allocate(&cidr).unwrap();
        assert_eq!(reallocated, first);
        assert_eq!(gw, Ipv4Addr::new(172, 30, 0, 1));
    }

    #[test]
    fn releasing_gateway_deletes_subnet() {
        let (_dir, alloc) = allocator();
        let cidr: Ipv4Cidr = "172.30.0.0/24".parse().unwrap();
        alloc.create(&cidr).unwrap();
        let gw = alloc.allocate(&cidr).unwrap();
        alloc.release(&cidr, gw).unwrap();
        assert!(alloc.allocate(&cidr).is_err());
    }

    #[test]
    fn prefix_below_24_rejected() {
        let (_dir, alloc) = allocator();
        let cidr: Ipv4Cidr = "10.0.0.0/16".parse().unwrap();
        assert!(matches!(alloc.create(&cidr), Err(SubnetError::PrefixTooSmall(_))));
    }

    #[test]
    fn overlapping_subnet_rejected() {
        let (_dir, alloc) = allocator();
        let a: Ipv4Cidr = "10.0.0.0/24".parse().unwrap();
        let b: Ipv4Cidr = "10.0.0.128/25".parse().unwrap();
        alloc.create(&a).unwrap();
        assert!(matches!(alloc.create(&b), Err(SubnetError::Conflicts(_))));
    }

    #[test]
    fn exhausted_subnet_errors_instead_of_looping() {
        let (_dir, alloc) = allocator();
        let cidr: Ipv4Cidr = "10.0.0.0/30".parse().unwrap();
        alloc.create(&cidr).unwrap();
        for _ in 0..4 {
            alloc.allocate(&cidr).unwrap();
        }
        assert!(matches!(alloc.allocate(&cidr), Err(SubnetError::Exhausted(_))));
    }
}
