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

//! HTTP/1.1 request ingestion and serialization.
//!
//! IETF RFC 9112

use std::io::{BufRead, Read, Write};

use crate::headers::HeaderList;
use crate::method::HttpMethod;
use crate::version::HttpVersion;
use crate::ParseError;

const DEFAULT_PORT: u16 = 80;

/// A parsed HTTP/1.1 request, addressed to an origin by absolute-URI, as required of a request
/// arriving at a forward proxy (`METHOD http://host[:port]/path HTTP/1.x`).
#[derive(Debug, Clone)]
pub struct Request {
    method: HttpMethod,
    host: String,
    port: u16,
    path: String,
    version: HttpVersion,
    headers: HeaderList,
    body: Vec<u8>,
}

impl Request {
    /// Reads a full request (request line, headers, body) from `reader`. `max_size` bounds the
    /// total bytes consumed, guarding against unbounded memory growth from a misbehaving or
    /// hostile client.
    pub fn ingest<R: BufRead>(reader: &mut R, max_size: usize) -> Result<Self, ParseError> {
        let mut budget = max_size;

        let line = read_line(reader, &mut budget)?;
        let (method, host, port, path, version) = parse_request_line(&line)?;

        let headers = ingest_headers(reader, &mut budget)?;
        let body = ingest_body(reader, &headers, &mut budget)?;

        Ok(Self {
            method,
            host,
            port,
            path,
            version,
            headers,
            body,
        })
    }

    /// The request method.
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// The origin host this request targets, as named in the request line (not the `Host`
    /// header, which is rewritten to match before forwarding).
    pub fn server(&self) -> &str {
        &self.host
    }

    /// The origin port this request targets.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The request path, including any query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The HTTP version named in the request line.
    pub fn version(&self) -> HttpVersion {
        self.version
    }

    /// The request headers.
    pub fn headers(&self) -> &HeaderList {
        &self.headers
    }

    /// Mutable access to the request headers, used by the handler to rewrite `Host` and append
    /// to the `x-forwarded-for` trail before forwarding.
    pub fn headers_mut(&mut self) -> &mut HeaderList {
        &mut self.headers
    }

    /// The request payload.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The full absolute URL this request names, as used in the request line and for cache
    /// fingerprinting.
    pub fn url(&self) -> String {
        if self.port == DEFAULT_PORT {
            format!("http://{}{}", self.host, self.path)
        } else {
            format!("http://{}:{}{}", self.host, self.port, self.path)
        }
    }

    /// A deterministic string identifying this request for cache purposes: method, full URL, and
    /// payload. Two requests that should be considered "the same" for caching purposes produce
    /// identical output.
    pub fn canonical_form(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.path.len() + self.body.len() + 16);
        buf.extend_from_slice(self.method.to_string().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.url().as_bytes());
        buf.push(b'\n');
        buf.extend_from_slice(&self.body);
        buf
    }

    /// Serializes the request line, headers, and body exactly as they should be written to the
    /// origin connection.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        write!(writer, "{} {} {}\r\n", self.method, self.path, self.version)?;
        for (name, value) in self.headers.iter() {
            write!(writer, "{name}: {value}\r\n")?;
        }
        write!(writer, "\r\n")?;
        writer.write_all(&self.body)?;
        writer.flush()
    }
}

fn parse_request_line(
    line: &str,
) -> Result<(HttpMethod, String, u16, String, HttpVersion), ParseError> {
    let mut parts = line.splitn(3, ' ');
    let method = parts.next().ok_or(ParseError::Method)?.parse()?;
    let target = parts.next().ok_or(ParseError::Target)?;
    let version = HttpVersion::parse(parts.next().ok_or(ParseError::Version)?.as_bytes())?;

    let (host, port, path) = parse_absolute_target(target)?;
    Ok((method, host, port, path, version))
}

fn parse_absolute_target(target: &str) -> Result<(String, u16, String), ParseError> {
    let rest = target.strip_prefix("http://").ok_or(ParseError::Target)?;
    if rest.is_empty() {
        return Err(ParseError::Target);
    }

    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], rest[idx..].to_string()),
        None => (rest, "/".to_string()),
    };

    if authority.is_empty() {
        return Err(ParseError::Target);
    }

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port_str)) => {
            let port = port_str.parse::<u16>().map_err(|_| ParseError::Target)?;
            (host.to_string(), port)
        }
        None => (authority.to_string(), DEFAULT_PORT),
    };

    if host.is_empty() {
        return Err(ParseError::Target);
    }

    Ok((host, port, path))
}

fn ingest_headers<R: BufRead>(
    reader: &mut R,
    budget: &mut usize,
) -> Result<HeaderList, ParseError> {
    let mut headers = HeaderList::new();
    loop {
        let line = read_line(reader, budget)?;
        if line.is_empty() {
            break;
        }

        let (name, value) = line.split_once(':').ok_or(ParseError::HeaderName)?;
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() {
            return Err(ParseError::HeaderName);
        }
        headers.push(name, value);
    }
    Ok(headers)
}

fn ingest_body<R: Read>(
    reader: &mut R,
    headers: &HeaderList,
    budget: &mut usize,
) -> Result<Vec<u8>, ParseError> {
    if headers
        .get("transfer-encoding")
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
    {
        return Err(ParseError::ChunkedBodyUnsupported);
    }

    let Some(len) = headers.get("content-length") else {
        return Ok(Vec::new());
    };

    let len: usize = len.trim().parse().map_err(|_| ParseError::HeaderValue)?;
    charge(budget, len)?;

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(body)
}

/// Reads a single CRLF- or LF-terminated line, enforcing `budget`, and returns it without the
/// line terminator.
pub(crate) fn read_line<R: BufRead>(reader: &mut R, budget: &mut usize) -> Result<String, ParseError> {
    let mut raw = Vec::new();
    let read = reader.read_until(b'\n', &mut raw)?;
    if read == 0 {
        return Err(ParseError::NewLine);
    }
    charge(budget, read)?;

    while raw.last() == Some(&b'\n') || raw.last() == Some(&b'\r') {
        raw.pop();
    }

    String::from_utf8(raw).map_err(|_| ParseError::HeaderValue)
}

pub(crate) fn charge(budget: &mut usize, amount: usize) -> Result<(), ParseError> {
    *budget = budget.checked_sub(amount).ok_or(ParseError::TooLarge)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_simple_get() {
        let raw = b"GET http://example.test/page HTTP/1.1\r\nHost: example.test\r\n\r\n";
        let mut cursor = Cursor::new(&raw[..]);
        let req = Request::ingest(&mut cursor, 8192).unwrap();
        assert_eq!(req.method(), HttpMethod::Get);
        assert_eq!(req.server(), "example.test");
        assert_eq!(req.port(), 80);
        assert_eq!(req.path(), "/page");
        assert_eq!(req.headers().get("host"), Some("example.test"));
        assert!(req.body().is_empty());
    }

    #[test]
    fn parses_explicit_port_and_query() {
        let raw = b"GET http://example.test:8080/page?x=1 HTTP/1.1\r\n\r\n";
        let mut cursor = Cursor::new(&raw[..]);
        let req = Request::ingest(&mut cursor, 8192).unwrap();
        assert_eq!(req.port(), 8080);
        assert_eq!(req.path(), "/page?x=1");
        assert_eq!(req.url(), "http://example.test:8080/page?x=1");
    }

    #[test]
    fn parses_post_body_via_content_length() {
        let raw = b"POST http://example.test/submit HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let mut cursor = Cursor::new(&raw[..]);
        let req = Request::ingest(&mut cursor, 8192).unwrap();
        assert_eq!(req.body(), b"hello");
    }

    #[test]
    fn rejects_relative_target() {
        let raw = b"GET /page HTTP/1.1\r\n\r\n";
        let mut cursor = Cursor::new(&raw[..]);
        assert!(Request::ingest(&mut cursor, 8192).is_err());
    }

    #[test]
    fn rejects_oversized_request() {
        let raw = b"GET http://example.test/page HTTP/1.1\r\nX-Pad: aaaaaaaaaaaaaaaaaaaa\r\n\r\n";
        let mut cursor = Cursor::new(&raw[..]);
        assert!(matches!(
            Request::ingest(&mut cursor, 10),
            Err(ParseError::TooLarge)
        ));
    }

    #[test]
    fn rejects_chunked_body() {
        let raw =
            b"POST http://example.test/submit HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n";
        let mut cursor = Cursor::new(&raw[..]);
        assert!(matches!(
            Request::ingest(&mut cursor, 8192),
            Err(ParseError::ChunkedBodyUnsupported)
        ));
    }

    #[test]
    fn write_to_emits_origin_form_request_line() {
        // Forwarded requests use origin-form (method + path only); the absolute-URI form is only
        // valid on the proxy's ingress side (RFC 9112 §3.2).
        let raw = b"GET http://example.test/page HTTP/1.1\r\nHost: example.test\r\n\r\n";
        let mut cursor = Cursor::new(&raw[..]);
        let req = Request::ingest(&mut cursor, 8192).unwrap();

        let mut out = Vec::new();
        req.write_to(&mut out).unwrap();
        let rendered = String::from_utf8(out).unwrap();

        assert!(rendered.starts_with("GET /page HTTP/1.1\r\n"));
        assert!(rendered.contains("Host: example.test\r\n"));
        assert!(rendered.ends_with("\r\n\r\n"));
    }
}
