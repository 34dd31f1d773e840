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

//! A disk-backed response cache, keyed by request fingerprint, with per-key exclusion and a
//! freshness policy driven by `Cache-Control`. See `spec.md` §4.2.
//!
//! `contains`/`store` from the original are replaced with [`ResponseCache::lookup`], which
//! returns a [`CacheLease`] holding the per-key lock for its lifetime. The caller reports the
//! outcome through `hit`, `fill`, or `abandon`; `Drop` releases the lock on any path the caller
//! doesn't take explicitly (an early return, `?`, or panic unwind), so the lock can never be held
//! past the lease's lifetime by mistake.

use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

use parser::{Request, Response};

use crate::error::CacheError;
use crate::sync::Semaphore;

const EXPIRES_HEADER: &str = "X-Cache-Expires";

/// A response loaded from the cache, paired with the millisecond Unix timestamp it expires at.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    response: Response,
    expires_at_ms: u128,
}

impl CachedResponse {
    /// The response, ready to relay to the client.
    pub fn response(&self) -> &Response {
        &self.response
    }

    /// Milliseconds since the Unix epoch at which this entry stops being fresh.
    pub fn expires_at_ms(&self) -> u128 {
        self.expires_at_ms
    }
}

/// Disk-backed, per-key-locked cache of proxied responses.
#[derive(Debug)]
pub struct ResponseCache {
    directory: PathBuf,
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl ResponseCache {
    /// Opens (creating if necessary) a cache rooted at `directory`. If `clean` is set, any
    /// existing contents are removed first, matching the CLI's `--clean-cache` flag.
    pub fn open(directory: impl Into<PathBuf>, clean: bool) -> std::io::Result<Self> {
        let directory = directory.into();
        if clean && directory.exists() {
            fs::remove_dir_all(&directory)?;
        }
        fs::create_dir_all(&directory)?;
        Ok(Self {
            directory,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Computes the fingerprint for `req`: a hex-encoded SHA-256 digest of its canonical form
    /// (method, full URL, body).
    pub fn fingerprint(req: &Request) -> String {
        let mut hasher = Sha256::new();
        hasher.update(req.canonical_form());
        let digest = hasher.finalize();
        digest.iter().map(|byte| format!("{byte:02x}")).collect()
    }

    fn entry_path(&self, fingerprint: &str) -> PathBuf {
        self.directory.join(fingerprint)
    }

    fn key_lock(&self, fingerprint: &str) -> Arc<Semaphore> {
        let mut locks = self.locks.lock().expect("cache lock table poisoned");
        locks
            .entry(fingerprint.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }

    /// Acquires the per-fingerprint lock for `req` and checks for a valid entry, returning a
    /// [`CacheLease`] that holds the lock until the caller calls `hit`, `fill`, or `abandon` (or
    /// drops it).
    pub fn lookup(&self, req: &Request) -> CacheLease<'_> {
        let fingerprint = Self::fingerprint(req);
        let lock = self.key_lock(&fingerprint);
        lock.acquire();

        let path = self.entry_path(&fingerprint);
        let cached = match load_entry(&path) {
            Ok(cached) => cached,
            Err(err) => {
                log::warn!("cache entry for {fingerprint} unreadable, treating as a miss: {err}");
                None
            }
        };

        CacheLease {
            _cache: self,
            fingerprint,
            path,
            cached,
            lock,
            resolved: false,
        }
    }

    /// Pure eligibility check: does `resp`, produced for `req`, qualify for caching? True iff the
    /// method is idempotent, the status is 200 OK, and `Cache-Control` specifies a positive
    /// `max-age` without `no-store` or `private`.
    pub fn should_cache(req: &Request, resp: &Response) -> bool {
        if !req.method().is_idempotent() {
            return false;
        }
        if resp.status_code() != 200 {
            return false;
        }
        let Some(cache_control) = resp.headers().get("cache-control") else {
            return false;
        };
        let directives: Vec<&str> = cache_control.split(',').map(str::trim).collect();
        if directives.iter().any(|d| d.eq_ignore_ascii_case("no-store")) {
            return false;
        }
        if directives.iter().any(|d| d.eq_ignore_ascii_case("private")) {
            return false;
        }
        directives
            .iter()
            .filter_map(|d| d.strip_prefix("max-age="))
            .filter_map(|secs| secs.parse::<u64>().ok())
            .any(|secs| secs > 0)
    }

    fn max_age_secs(resp: &Response) -> Option<u64> {
        resp.headers()
            .get("cache-control")?
            .split(',')
            .map(str::trim)
            .filter_map(|d| d.strip_prefix("max-age="))
            .filter_map(|secs| secs.parse::<u64>().ok())
            .find(|secs| *secs > 0)
    }
}

/// A held per-fingerprint lock plus the lookup outcome. Exactly one of `hit`, `fill`, or
/// `abandon` should be called before the lease is dropped; `hit` is read-only and may be called
/// any number of times.
#[derive(Debug)]
pub struct CacheLease<'c> {
    _cache: &'c ResponseCache,
    fingerprint: String,
    path: PathBuf,
    cached: Option<CachedResponse>,
    lock: Arc<Semaphore>,
    resolved: bool,
}

impl<'c> CacheLease<'c> {
    /// The cached response, if the lookup found a valid, unexpired entry.
    pub fn hit(&self) -> Option<&CachedResponse> {
        self.cached.as_ref()
    }

    /// Stores `response` for this fingerprint, then releases the lock. No-op write failures are
    /// logged, matching the original's "log and abort the write, still relay upstream" contract;
    /// the per-key lock is released either way.
    pub fn fill(mut self, req: &Request, response: &Response) -> Result<(), CacheError> {
        self.resolved = true;
        if !ResponseCache::should_cache(req, response) {
            return Ok(());
        }
        let Some(max_age) = ResponseCache::max_age_secs(response) else {
            return Ok(());
        };
        let expires_at_ms = now_millis() + u128::from(max_age) * 1000;
        write_entry(&self.path, expires_at_ms, response)
    }

    /// Releases the lock without writing anything, for a miss the caller has decided not to
    /// cache (e.g. the upstream fetch itself failed).
    pub fn abandon(mut self) {
        self.resolved = true;
    }

    /// The fingerprint this lease was taken for, for diagnostics.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl Drop for CacheLease<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            log::debug!(
                "cache lease for {} dropped without hit/fill/abandon",
                self.fingerprint
            );
        }
        self.lock.release();
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis()
}

fn load_entry(path: &Path) -> Result<Option<CachedResponse>, CacheError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let Some(newline) = bytes.iter().position(|&b| b == b'\n') else {
        return Err(CacheError::Parse("entry has no header line".to_string()));
    };
    let (header_line, rest) = bytes.split_at(newline);
    let body = &rest[1..];

    let header_line = String::from_utf8_lossy(header_line);
    let Some(expires_str) = header_line.strip_prefix(&format!("{EXPIRES_HEADER}: ")) else {
        return Err(CacheError::Parse(format!(
            "header line missing {EXPIRES_HEADER} prefix: {header_line:?}"
        )));
    };
    let Ok(expires_at_ms) = expires_str.trim().parse::<u128>() else {
        return Err(CacheError::Parse(format!(
            "expiration timestamp is not a valid integer: {:?}",
            expires_str.trim()
        )));
    };

    if expires_at_ms <= now_millis() {
        let _ = fs::remove_file(path);
        return Ok(None);
    }

    let Ok(response) = Response::from_bytes(body) else {
        let _ = fs::remove_file(path);
        return Err(CacheError::Parse("entry body is not a valid response".to_string()));
    };

    Ok(Some(CachedResponse {
        response,
        expires_at_ms,
    }))
}

fn write_entry(path: &Path, expires_at_ms: u128, response: &Response) -> Result<(), CacheError> {
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path)?;
    writeln!(file, "{EXPIRES_HEADER}: {expires_at_ms}")?;
    file.write_all(&response.to_bytes())?;
    file.sync_all()?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parser::Status;
    use std::io::Cursor;
    use std::thread;
    use std::time::{Duration, Instant};

    fn request(method: &str, url: &str) -> Request {
        let raw = format!("{method} {url} HTTP/1.1\r\nHost: example.test\r\n\r\n");
        let mut cursor = Cursor::new(raw.into_bytes());
        Request::ingest(&mut cursor, 8192).unwrap()
    }

    fn cacheable_response() -> Response {
        let mut resp = Response::for_status(Status::Ok, "hello");
        resp.headers_mut().set("Cache-Control", "max-age=60");
        resp
    }

    #[test]
    fn should_cache_accepts_get_200_with_positive_max_age() {
        let req = request("GET", "http://example.test/page");
        let resp = cacheable_response();
        assert!(ResponseCache::should_cache(&req, &resp));
    }

    #[test]
    fn should_cache_rejects_non_idempotent_method() {
        let req = request("POST", "http://example.test/page");
        let resp = cacheable_response();
        assert!(!ResponseCache::should_cache(&req, &resp));
    }

    #[test]
    fn should_cache_rejects_no_store_and_private() {
        let req = request("GET", "http://example.test/page");

        let mut no_store = cacheable_response();
        no_store
            .headers_mut()
            .set("Cache-Control", "max-age=60, no-store");
        assert!(!ResponseCache::should_cache(&req, &no_store));

        let mut private = cacheable_response();
        private
            .headers_mut()
            .set("Cache-Control", "max-age=60, private");
        assert!(!ResponseCache::should_cache(&req, &private));
    }

    #[test]
    fn should_cache_rejects_missing_or_zero_max_age() {
        let req = request("GET", "http://example.test/page");
        let resp = Response::for_status(Status::Ok, "hello");
        assert!(!ResponseCache::should_cache(&req, &resp));

        let mut zero = cacheable_response();
        zero.headers_mut().set("Cache-Control", "max-age=0");
        assert!(!ResponseCache::should_cache(&req, &zero));
    }

    #[test]
    fn fill_then_lookup_is_a_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path(), false).unwrap();
        let req = request("GET", "http://example.test/page");
        let resp = cacheable_response();

        let lease = cache.lookup(&req);
        assert!(lease.hit().is_none());
        lease.fill(&req, &resp).unwrap();

        let lease2 = cache.lookup(&req);
        let cached = lease2.hit().expect("expected a cache hit");
        assert_eq!(cached.response().body(), b"hello");
        lease2.abandon();
    }

    #[test]
    fn expired_entry_is_treated_as_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path(), false).unwrap();
        let req = request("GET", "http://example.test/page");
        let resp = cacheable_response();

        let fingerprint = ResponseCache::fingerprint(&req);
        let path = dir.path().join(&fingerprint);
        let expired_ms = now_millis() - 1;
        write_entry(&path, expired_ms, &resp).unwrap();

        let lease = cache.lookup(&req);
        assert!(lease.hit().is_none());
        lease.abandon();
    }

    #[test]
    fn clean_on_open_removes_prior_entries() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stale"), b"junk").unwrap();

        let cache = ResponseCache::open(dir.path(), true).unwrap();
        let req = request("GET", "http://example.test/page");
        assert!(cache.lookup(&req).hit().is_none());
        assert!(!dir.path().join("stale").exists());
    }

    #[test]
    fn dropping_a_lease_without_resolving_still_releases_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path(), false).unwrap();
        let req = request("GET", "http://example.test/page");

        {
            let _lease = cache.lookup(&req);
        }

        let lease = cache.lookup(&req);
        lease.abandon();
    }

    #[test]
    fn concurrent_lookups_for_the_same_fingerprint_are_serialized() {
        // Two threads race to look up the same fingerprint on a cold cache. The first to acquire
        // the lease sleeps before calling `fill`; the second must block in `lookup()` for at least
        // that long, then observe the filled entry rather than a second miss — proving the
        // per-fingerprint lock, not just test ordering, is what coalesces the two lookups.
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ResponseCache::open(dir.path(), false).unwrap());
        let req = request("GET", "http://example.test/page");
        let resp = cacheable_response();

        let cache2 = cache.clone();
        let req2 = req.clone();
        let resp2 = resp.clone();
        let first = thread::spawn(move || {
            let lease = cache2.lookup(&req2);
            assert!(lease.hit().is_none());
            thread::sleep(Duration::from_millis(150));
            lease.fill(&req2, &resp2).unwrap();
        });

        // Give the first thread a head start so it reliably wins the race to acquire the lock.
        thread::sleep(Duration::from_millis(30));

        let started = Instant::now();
        let lease = cache.lookup(&req);
        let blocked_for = started.elapsed();

        assert!(
            blocked_for >= Duration::from_millis(100),
            "second lookup returned after {blocked_for:?}, too soon to have waited on the first"
        );
        let cached = lease.hit().expect("expected the entry filled by the first thread");
        assert_eq!(cached.response().body(), b"hello");
        lease.abandon();

        first.join().unwrap();
    }
}
