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

//! Error taxonomy for the request handler and cache, per `spec.md` §7.

use thiserror::Error;

/// Errors arising while servicing a single client connection.
///
/// Each variant carries exactly the information needed to render the response body the spec
/// requires (`spec.md` §4.3, §7); `Closed` carries none, since that path intentionally writes no
/// response at all (preserved legacy behavior, `spec.md` §9).
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The client's request was malformed. Answered with `400 Bad Request`.
    #[error("{0}")]
    BadRequest(String),
    /// The request's target host is blacklisted, or a proxy loop was detected. Answered with
    /// `403 Forbidden`.
    #[error("forbidden")]
    Forbidden,
    /// The origin could not be reached (DNS failure or connection refused). The connection is
    /// closed without a response, matching the original's observable behavior.
    #[error("could not connect to origin: {0}")]
    UpstreamConnect(#[source] std::io::Error),
    /// The origin's response could not be parsed, or writing/reading failed mid-exchange.
    /// Answered with `510 Not Extended`.
    #[error("{0}")]
    UpstreamProtocol(String),
}

/// Errors arising from cache I/O. Never propagated to the client: a read error is treated as a
/// miss, and a write error aborts the store while the upstream response is still relayed
/// (`spec.md` §4.2, §7).
#[derive(Debug, Error)]
pub enum CacheError {
    /// Failed to read or write the cache entry file.
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
    /// The on-disk entry could not be parsed as a complete response, or its expiration header was
    /// malformed.
    #[error("cache entry is corrupt: {0}")]
    Parse(String),
}
