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
#![doc(test(attr(deny(warnings))))]

//! A forward HTTP proxy: a bounded worker pool, a disk-backed response cache with per-key
//! exclusion, and a per-connection request-servicing pipeline, tied together by a CLI entry
//! point.

pub mod blacklist;
pub mod cache;
pub mod config;
pub mod error;
pub mod handler;
pub mod pool;
pub mod scheduler;
pub mod sync;

pub use blacklist::Blacklist;
pub use cache::ResponseCache;
pub use config::ProxyConfig;
pub use error::{CacheError, HandlerError};
pub use handler::RequestHandler;
pub use pool::Pool;
pub use scheduler::Scheduler;
