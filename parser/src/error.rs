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

//! Parse failures for HTTP/1.1 messages.

use thiserror::Error;

/// Represents possible failures while parsing an HTTP/1.1 message.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Invalid byte in method.
    #[error("invalid token in method")]
    Method,
    /// Invalid request target.
    #[error("invalid request target")]
    Target,
    /// Invalid or unsupported HTTP version.
    #[error("invalid version")]
    Version,
    /// Invalid byte in header name.
    #[error("invalid token in header name")]
    HeaderName,
    /// Invalid byte in header value.
    #[error("invalid token in header value")]
    HeaderValue,
    /// Invalid or missing new line.
    #[error("invalid or missing new line")]
    NewLine,
    /// Invalid or missing status line.
    #[error("invalid status line")]
    StatusLine,
    /// A `Transfer-Encoding: chunked` body was present; unsupported by this implementation.
    #[error("chunked transfer-encoding is not supported")]
    ChunkedBodyUnsupported,
    /// The request or response exceeded the configured size limit before a complete message was
    /// seen.
    #[error("message exceeded maximum size")]
    TooLarge,
    /// Underlying I/O failure while reading the message.
    #[error("io error reading message: {0}")]
    Io(#[from] std::io::Error),
}
