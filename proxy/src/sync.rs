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

//! A counting semaphore. `std` does not provide one; the worker pool's dispatcher/worker
//! handshake (`spec.md` §4.1) needs exactly this primitive, so it's built directly on
//! `Mutex`/`Condvar`, the same building blocks POSIX semaphores are implemented with underneath.

use std::sync::{Condvar, Mutex};

/// A counting semaphore supporting `acquire` (wait) and `release` (signal).
#[derive(Debug)]
pub struct Semaphore {
    count: Mutex<usize>,
    changed: Condvar,
}

impl Semaphore {
    /// Creates a semaphore with the given initial count.
    pub fn new(initial: usize) -> Self {
        Self {
            count: Mutex::new(initial),
            changed: Condvar::new(),
        }
    }

    /// Blocks until the count is positive, then decrements it by one.
    pub fn acquire(&self) {
        let mut count = self.count.lock().expect("semaphore mutex poisoned");
        while *count == 0 {
            count = self
                .changed
                .wait(count)
                .expect("semaphore mutex poisoned");
        }
        *count -= 1;
    }

    /// Increments the count by one, waking a single waiter if one is blocked in `acquire`.
    pub fn release(&self) {
        let mut count = self.count.lock().expect("semaphore mutex poisoned");
        *count += 1;
        self.changed.notify_one();
    }

    /// The current count, for diagnostics and tests. Not meant to be acted on racily.
    pub fn current(&self) -> usize {
        *self.count.lock().expect("semaphore mutex poisoned")
    }
}
