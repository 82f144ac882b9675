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

//! Image catalog and per-image metadata.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `repositories.json`: name -> (tag -> colon-joined lower-chain, oldest
/// last).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Repositories {
    #[serde(flatten)]
    pub images: HashMap<String, HashMap<String, String>>,
}

impl Repositories {
    pub fn resolve(&self, name: &str, tag: &str) -> Option<Vec<String>> {
        let chain = self.images.get(name)?.get(tag)?;
        Some(chain.split(':').map(|s| s.to_string()).collect())
    }

    pub fn tag(&mut self, name: &str, tag: &str, lower_chain: &[String]) {
        let chain = lower_chain.join(":");
        self.images
            .entry(name.to_string())
            .or_default()
            .insert(tag.to_string(), chain);
    }
}

/// `matedata/<imageID>.json` — an image's default program path, argument
/// vector and environment, applied unless overridden at `run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub entrypoint: String,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
