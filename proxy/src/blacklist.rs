// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Host blacklist, loaded once at startup from a line-delimited file (`spec.md` §4.3).

use std::fs;
use std::io;
use std::path::Path;

/// A set of disallowed origin hosts, supporting exact matches and leading-wildcard patterns
/// (`*.example.com` matches `example.com` and any of its subdomains).
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    exact: Vec<String>,
    suffix: Vec<String>,
}

impl Blacklist {
    /// Loads a blacklist from a line-delimited file. Blank lines and lines starting with `#` are
    /// ignored. A missing file is treated as an empty blacklist, matching a fresh checkout with no
    /// `blocked-domains.txt` yet in place.
    pub fn load(path: &Path) -> io::Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err),
        };

        let mut blacklist = Self::default();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            blacklist.add_pattern(line);
        }
        Ok(blacklist)
    }

    /// Builds a blacklist directly from an iterator of patterns, for tests and embedding.
    pub fn from_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut blacklist = Self::default();
        for pattern in patterns {
            blacklist.add_pattern(pattern.as_ref());
        }
        blacklist
    }

    fn add_pattern(&mut self, pattern: &str) {
        match pattern.strip_prefix("*.") {
            Some(suffix) => self.suffix.push(suffix.to_ascii_lowercase()),
            None => self.exact.push(pattern.to_ascii_lowercase()),
        }
    }

    /// Returns whether `host` is allowed to be proxied to. Matching is case-insensitive.
    pub fn server_is_allowed(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        if self.exact.iter().any(|blocked| blocked == &host) {
            return false;
        }
        self.suffix
            .iter()
            .all(|suffix| !(host == *suffix || host.ends_with(&format!(".{suffix}"))))
    }

    /// True if this blacklist has no entries at all.
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.suffix.is_empty()
    }
}
