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

//! Process configuration, parsed from the command line.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Configuration for a single proxy process.
#[derive(Debug, Clone, Parser)]
#[command(name = "raskproxy", about = "A forward HTTP proxy with an on-disk response cache")]
pub struct ProxyConfig {
    /// Address and port to accept client connections on.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// Maximum number of concurrently running worker threads.
    #[arg(long, default_value_t = 8)]
    pub workers: usize,

    /// Directory used to persist cached responses.
    #[arg(long, default_value = "cache")]
    pub cache_dir: PathBuf,

    /// Path to a line-delimited file of blacklisted host patterns.
    #[arg(long, default_value = "blocked-domains.txt")]
    pub blacklist: PathBuf,

    /// Empty the cache directory on startup instead of reusing entries left from a prior run.
    #[arg(long, default_value_t = false)]
    pub clean_cache: bool,

    /// Maximum size, in bytes, of a single request or response this proxy will buffer in memory.
    #[arg(long, default_value_t = 16 * 1024 * 1024)]
    pub max_message_size: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".parse().expect("valid default address"),
            workers: 8,
            cache_dir: PathBuf::from("cache"),
            blacklist: PathBuf::from("blocked-domains.txt"),
            clean_cache: false,
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_original_hardcoded_constants() {
        let config = ProxyConfig::default();
        assert_eq!(config.blacklist, PathBuf::from("blocked-domains.txt"));
        assert_eq!(config.workers, 8);
    }
}
