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

//! Adapter from an accepted connection to a pool task. See `spec.md` §4.4.

use std::net::TcpStream;
use std::sync::Arc;

use crate::handler::RequestHandler;
use crate::pool::Pool;

/// Owns the handler (and through it, the cache and blacklist) shared across every task submitted
/// to the pool.
#[derive(Debug)]
pub struct Scheduler {
    handler: Arc<RequestHandler>,
    pool: Pool,
}

impl Scheduler {
    /// Builds a scheduler over `handler`, dispatching onto a pool of at most `max_workers`
    /// threads.
    pub fn new(handler: RequestHandler, max_workers: usize) -> Self {
        Self {
            handler: Arc::new(handler),
            pool: Pool::new(max_workers),
        }
    }

    /// Submits a single accepted connection for servicing. Never blocks on worker availability.
    pub fn schedule_request(&self, stream: TcpStream, client_ip: String) {
        let handler = self.handler.clone();
        self.pool
            .schedule(move || handler.service_request(stream, &client_ip));
    }

    /// Blocks until every request submitted so far has been fully serviced. Mainly useful for
    /// tests and graceful shutdown.
    pub fn wait(&self) {
        self.pool.wait();
    }
}
