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

#![deny(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unused_imports
)]

//! HTTP/1.1 request and response codec used by the rask forward proxy.
//!
//! This crate owns every byte it parses (no zero-copy borrowing from caller buffers), because the
//! proxy must rewrite request headers before forwarding and persist whole responses to disk.

pub mod error;
pub mod headers;
pub mod method;
pub mod request;
pub mod response;
pub mod status;
pub mod version;

pub use error::ParseError;
pub use headers::HeaderList;
pub use method::HttpMethod;
pub use request::Request;
pub use response::Response;
pub use status::Status;
pub use version::HttpVersion;
