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

//! Image Store: `repositories.json` catalog,
//! per-image metadata, and `commit`'s tar-the-upper-layer step that turns a
//! container's diff directory into a new addressable image layer: tar the
//! layer, hash it, truncate the hash to the same width as a container id,
//! and either reuse an existing layer with that hash or write a new one.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::models::{ImageMetadata, Repositories};

#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("image {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub struct ImageStore {
    image_dir: PathBuf,
    repositories_path: PathBuf,
}

impl ImageStore {
    pub fn new(image_dir: impl Into<PathBuf>, repositories_path: impl Into<PathBuf>) -> ImageStore {
        ImageStore {
            image_dir: image_dir.into(),
            repositories_path: repositories_path.into(),
        }
    }

    pub fn load_repositories(&self) -> Result<Repositories, ImageStoreError> {
        if !self.repositories_path.exists() {
            return Ok(Repositories::default());
        }
        let raw = std::fs::read_to_string(&self.repositories_path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn store_repositories(&self, repos: &Repositories) -> Result<(), ImageStoreError> {
        if let Some(parent) = self.repositories_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(repos)?;
        std::fs::write(&self.repositories_path, raw)?;
        Ok(())
    }

    fn metadata_path(&self, image_id: &str) -> PathBuf {
        self.image_dir.join("matedata").join(format!("{image_id}.json"))
    }

    pub fn load_metadata(&self, image_id: &str) -> Result<ImageMetadata, ImageStoreError> {
        let path = self.metadata_path(image_id);
        if !path.exists() {
            return Err(ImageStoreError::NotFound(image_id.to_string()));
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn store_metadata(&self, image_id: &str, metadata: &ImageMetadata) -> Result<(), ImageStoreError> {
        let path = self.metadata_path(image_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(metadata)?;
        std::fs::write(&path, raw)?;
        Ok(())
    }

    pub fn layer_dir(&self, image_id: &str) -> PathBuf {
        self.image_dir.join(image_id)
    }

    /// List every image id that has an extracted directory or metadata
    /// file, for `image ls`.
    pub fn list_ids(&self) -> Result<Vec<String>, ImageStoreError> {
        let matedata_dir = self.image_dir.join("matedata");
        if !matedata_dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&matedata_dir)? {
            let entry = entry?;
            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Tar a container's diff directory into a new image layer, named after
/// the sha256 of the archive bytes (truncated, per [`crate::util`]).
/// Returns the new image id and whether it was already present (a
/// byte-identical commit is a no-op beyond the tag).
pub fn commit_layer(store: &ImageStore, diff_dir: &Path) -> Result<(String, bool), ImageStoreError> {
    let tmp_tar = std::env::temp_dir().join(format!("qsrdocker-commit-{}.tar", std::process::id()));
    let status = std::process::Command::new("tar")
        .arg("-cf")
        .arg(&tmp_tar)
        .arg("-C")
        .arg(diff_dir)
        .arg(".")
        .status()?;
    if !status.success() {
        let _ = std::fs::remove_file(&tmp_tar);
        return Err(std::io::Error::new(std::io::ErrorKind::Other, "tar of diff layer failed").into());
    }
    let bytes = std::fs::read(&tmp_tar)?;
    let image_id = crate::util::image_id_from_tar(&bytes);
    let dest_dir = store.layer_dir(&image_id);
    let already_present = dest_dir.exists();
    if already_present {
        let _ = std::fs::remove_file(&tmp_tar);
        return Ok((image_id, true));
    }
    std::fs::create_dir_all(&dest_dir)?;
    let extract_status = std::process::Command::new("tar")
        .arg("-xf")
        .arg(&tmp_tar)
        .arg("-C")
        .arg(&dest_dir)
        .status()?;
    let _ = std::fs::remove_file(&tmp_tar);
    if !extract_status.success() {
        return Err(std::io::Error::new(std::io::ErrorKind::Other, "re-extraction of committed layer failed").into());
    }
    Ok((image_id, false))
}

impl From<ImageStoreError> for crate::error::EngineError {
    fn from(e: ImageStoreError) -> Self {
        match &e {
            ImageStoreError::NotFound(_) => crate::error::EngineError::NotFound(e.to_string()),
            _ => crate::error::EngineError::Other(e.into()),
        }
    }
}
