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

//! `KEY=VALUE` environment list handling shared by image metadata and the
//! container descriptor: both need "later entries win, order of first
//! appearance is preserved" semantics over a flat `Vec<String>`.

/// Split a `KEY=VALUE` pair. Returns `None` if there's no `=`.
pub fn split_pair(entry: &str) -> Option<(&str, &str)> {
    entry.split_once('=')
}

/// Merge `base` followed by `overrides`, removing duplicate keys. The last
/// occurrence of a key determines its value; the position of its *first*
/// occurrence determines its place in the output, matching the order a
/// user expects when they re-`-e FOO=...` an existing image-default
/// variable.
pub fn merge(base: &[String], overrides: &[String]) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let mut values: std::collections::HashMap<String, String> = std::collections::HashMap::new();

    for entry in base.iter().chain(overrides.iter()) {
        let Some((key, value)) = split_pair(entry) else {
            continue;
        };
        if !values.contains_key(key) {
            order.push(key.to_string());
        }
        values.insert(key.to_string(), value.to_string());
    }

    order
        .into_iter()
        .map(|key| {
            let value = values.remove(&key).unwrap_or_default();
            format!("{key}={value}")
        })
        .collect()
}

/// Look up a single key's current value within a merged environment list.
pub fn get<'a>(env: &'a [String], key: &str) -> Option<&'a str> {
    env.iter()
        .rev()
        .find_map(|entry| split_pair(entry).filter(|(k, _)| *k == key).map(|(_, v)| v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_entry_wins() {
        let base = vec!["FOO=1".to_string(), "BAR=2".to_string()];
        let overrides = vec!["FOO=3".to_string()];
        let merged = merge(&base, &overrides);
        assert_eq!(merged, vec!["FOO=3".to_string(), "BAR=2".to_string()]);
    }

    #[test]
    fn new_key_appended_in_order() {
        let base = vec!["A=1".to_string()];
        let overrides = vec!["B=2".to_string()];
        assert_eq!(
            merge(&base, &overrides),
            vec!["A=1".to_string(), "B=2".to_string()]
        );
    }

    #[test]
    fn get_reflects_merge() {
        let env = merge(&["FOO=1".to_string()], &["FOO=2".to_string()]);
        assert_eq!(get(&env, "FOO"), Some("2"));
        assert_eq!(get(&env, "MISSING"), None);
    }
}
