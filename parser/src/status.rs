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

//! Http Status Codes
//! [RFC 9110 Section 15](https://www.rfc-editor.org/rfc/rfc9110#section-15)

use std::fmt::Display;

/// Http Status Codes
/// [RFC 9110 Section 15](https://www.rfc-editor.org/rfc/rfc9110#section-15)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// 15.3.1
    Ok = 200,
    /// 15.5.1 — malformed client request
    BadRequest = 400,
    /// 15.5.4 — blacklisted host or loop detected
    Forbidden = 403,
    /// 15.5.5
    NotFound = 404,
    /// non-standard, used by the original implementation for upstream protocol failure
    ProxyFailure = 510,
}

impl Status {
    /// The code's standard reason phrase.
    pub fn reason_phrase(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BadRequest => "Bad Request",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::ProxyFailure => "Not Extended",
        }
    }

    /// Parses a three-digit status code out of a response status line.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            200 => Some(Self::Ok),
            400 => Some(Self::BadRequest),
            403 => Some(Self::Forbidden),
            404 => Some(Self::NotFound),
            510 => Some(Self::ProxyFailure),
            _ => None,
        }
    }

    /// The raw numeric code, for status codes this crate doesn't name but still needs to relay
    /// verbatim (any origin response is forwarded regardless of whether its status is one we
    /// special-case).
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code(), self.reason_phrase())
    }
}
