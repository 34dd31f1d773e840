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

//! HTTP/1.1 response ingestion and serialization.

use std::io::{BufRead, Read, Write};

use crate::headers::HeaderList;
use crate::request::{charge, read_line};
use crate::status::Status;
use crate::version::HttpVersion;
use crate::ParseError;

/// A parsed, or locally-constructed, HTTP/1.1 response.
#[derive(Debug, Clone)]
pub struct Response {
    version: HttpVersion,
    status_code: u16,
    reason_phrase: String,
    headers: HeaderList,
    body: Vec<u8>,
}

impl Response {
    /// Builds a response from one of the status codes this proxy itself generates (400, 403,
    /// 510), with a plain-text body.
    pub fn for_status(status: Status, body: impl Into<String>) -> Self {
        let mut headers = HeaderList::new();
        let body = body.into().into_bytes();
        headers.set("Content-Length", body.len().to_string());
        headers.set("Content-Type", "text/plain");

        Self {
            version: HttpVersion::H1_1,
            status_code: status.code(),
            reason_phrase: status.reason_phrase().to_string(),
            headers,
            body,
        }
    }

    /// Reads a full response (status line, headers, body) from `reader`, originating upstream.
    /// `max_size` bounds the total bytes consumed.
    pub fn ingest<R: BufRead>(reader: &mut R, max_size: usize) -> Result<Self, ParseError> {
        let mut budget = max_size;

        let line = read_line(reader, &mut budget)?;
        let (version, status_code, reason_phrase) = parse_status_line(&line)?;

        let headers = ingest_headers(reader, &mut budget)?;
        let body = ingest_body(reader, &headers, &mut budget)?;

        Ok(Self {
            version,
            status_code,
            reason_phrase,
            headers,
            body,
        })
    }

    /// The response's status code.
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// The response's reason phrase.
    pub fn reason_phrase(&self) -> &str {
        &self.reason_phrase
    }

    /// The response headers.
    pub fn headers(&self) -> &HeaderList {
        &self.headers
    }

    /// The response body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Serializes the status line, headers, and body to bytes, exactly as written to the client
    /// or persisted to the cache.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 256);
        out.extend_from_slice(
            format!(
                "{} {} {}\r\n",
                self.version, self.status_code, self.reason_phrase
            )
            .as_bytes(),
        );
        for (name, value) in self.headers.iter() {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }

    /// Writes the response to `writer`.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.to_bytes())?;
        writer.flush()
    }

    /// Parses a response previously produced by [`Response::to_bytes`] — used to reload a
    /// response from the on-disk cache.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        let mut cursor = std::io::Cursor::new(bytes);
        Self::ingest(&mut cursor, bytes.len() + 1)
    }
}

fn parse_status_line(line: &str) -> Result<(HttpVersion, u16, String), ParseError> {
    let mut parts = line.splitn(3, ' ');
    let version = HttpVersion::parse(parts.next().ok_or(ParseError::StatusLine)?.as_bytes())?;
    let code: u16 = parts
        .next()
        .ok_or(ParseError::StatusLine)?
        .parse()
        .map_err(|_| ParseError::StatusLine)?;
    let reason = parts.next().unwrap_or("").to_string();
    Ok((version, code, reason))
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

    if let Some(len) = headers.get("content-length") {
        let len: usize = len.trim().parse().map_err(|_| ParseError::HeaderValue)?;
        charge(budget, len)?;
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body)?;
        return Ok(body);
    }

    // No Content-Length and no chunked encoding: since this proxy never reuses upstream
    // connections (spec.md §1 Non-goals), the absence of framing means "read until the origin
    // closes the connection".
    let mut body = Vec::new();
    reader.read_to_end(&mut body)?;
    charge(budget, body.len())?;
    Ok(body)
}
