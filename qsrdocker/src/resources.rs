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

//! Cgroup Controller glue: container-facing wrapper over
//! `linux::cgroup`, translating the CLI's `-m`/`--cpushare`/`--cpuset`
//! flags into a [`linux::cgroup::ResourceLimits`] and giving each
//! container a `CgroupGroup` rooted at `<cgroup_root>/*/qsrdocker/<id>`.

pub use linux::cgroup::{CgroupError, CgroupGroup, ResourceLimits};

/// Parse a `-m` memory spec (`512m`, `1g`, or a bare byte count) into
/// bytes.
pub fn parse_memory_spec(spec: &str) -> Option<u64> {
    let spec = spec.trim();
    let (digits, suffix) = spec
        .find(|c: char| !c.is_ascii_digit())
        .map(|idx| spec.split_at(idx))
        .unwrap_or((spec, ""));
    let base: u64 = digits.parse().ok()?;
    let multiplier = match suffix.to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" => 1024,
        "m" => 1024 * 1024,
        "g" => 1024 * 1024 * 1024,
        _ => return None,
    };
    Some(base * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_suffixed_memory_specs() {
        assert_eq!(parse_memory_spec("512m"), Some(512 * 1024 * 1024));
        assert_eq!(parse_memory_spec("1g"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_memory_spec("2048"), Some(2048));
        assert_eq!(parse_memory_spec("bogus"), None);
    }
}
