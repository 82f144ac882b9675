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

//! ID generation: containers and images both get a random lowercase-hex
//! identifier; images additionally get a content-derived one at `commit`
//! time.

use rand::Rng;
use sha2::{Digest, Sha256};

const CONTAINER_ID_LEN: usize = 10;
const IMAGE_ID_LEN: usize = 10;

fn random_hex_id(len: usize) -> String {
    const CHARSET: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

pub fn new_container_id() -> String {
    random_hex_id(CONTAINER_ID_LEN)
}

/// `commit` derives the image id from a sha256 of the tarred upper layer,
/// truncated to the same width as a random container id so both sort and
/// display consistently.
pub fn image_id_from_tar(tar_bytes: &[u8]) -> String {
    let digest = Sha256::digest(tar_bytes);
    let hex = format!("{digest:x}");
    hex[..IMAGE_ID_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_ids_are_fixed_width_hex() {
        let id = new_container_id();
        assert_eq!(id.len(), CONTAINER_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn image_id_is_deterministic_and_truncated() {
        let a = image_id_from_tar(b"hello");
        let b = image_id_from_tar(b"hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), IMAGE_ID_LEN);
    }
}
