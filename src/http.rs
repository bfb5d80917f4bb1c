// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! A minimal HTTP/1.1 request/response codec, just enough to carry the
//! WebSocket opening handshake.

use http::StatusCode;
use std::fmt;

const MAX_HEADERS: usize = 32;

/// An ordered, case-insensitively-searchable header list. Original casing
/// is preserved for emission; lookup lowercases the key.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        HeaderMap::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name` (case-insensitive), except `Cookie` and
    /// `Set-Cookie` which are concatenated across all occurrences.
    pub fn get(&self, name: &str) -> Option<String> {
        if name.eq_ignore_ascii_case("cookie") {
            let joined = self
                .entries
                .iter()
                .filter(|(k, _)| k.eq_ignore_ascii_case("cookie"))
                .map(|(_, v)| v.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return if joined.is_empty() { None } else { Some(joined) }
        }
        if name.eq_ignore_ascii_case("set-cookie") {
            let joined = self
                .entries
                .iter()
                .filter(|(k, _)| k.eq_ignore_ascii_case("set-cookie"))
                .map(|(_, v)| v.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return if joined.is_empty() { None } else { Some(joined) }
        }
        self.entries.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.clone())
    }

    /// Does the (comma/token) value of `name` contain `token`, ASCII
    /// case-insensitively? Used for `Upgrade`/`Connection` token checks.
    pub fn contains_token(&self, name: &str, token: &str) -> bool {
        self.get(name)
            .map(|v| v.split(|c: char| c == ',' || c.is_whitespace()).any(|t| t.eq_ignore_ascii_case(token)))
            .unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A parsed HTTP/1.1 request line + headers.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub http_11: bool,
    pub headers: HeaderMap,
}

/// An HTTP/1.1 response ready for serialization.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Response { status, headers: HeaderMap::new() }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(name, value);
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let reason = self.status.canonical_reason().unwrap_or("");
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status.as_u16(), reason).into_bytes();
        for (name, value) in self.headers.iter() {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

/// Attempt to parse one complete request out of `buf`, which the caller has
/// already located the `\r\n\r\n` terminator within (see
/// [`crate::buffer::RecvBuffer::find`]). Returns the parsed request and the
/// number of bytes consumed (including the terminator).
pub fn parse_request(buf: &[u8]) -> Result<(Request, usize), Error> {
    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut raw_headers);
    let status = req.parse(buf).map_err(|_| Error::Malformed("invalid request line or headers"))?;
    let consumed = match status {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Err(Error::Malformed("incomplete request passed to parser")),
    };

    let method = req.method.ok_or(Error::Malformed("missing method"))?.to_string();
    let target = req.path.ok_or(Error::Malformed("missing request target"))?.to_string();
    let http_11 = match req.version {
        Some(1) => true,
        Some(0) => false,
        _ => return Err(Error::Malformed("unsupported http version")),
    };

    let mut headers = HeaderMap::new();
    for h in req.headers.iter() {
        let value = std::str::from_utf8(h.value).map_err(|_| Error::Malformed("non-utf8 header value"))?;
        headers.push(h.name, value);
    }

    Ok((Request { method, target, http_11, headers }, consumed))
}

#[derive(Debug)]
pub enum Error {
    Malformed(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Malformed(msg) => write!(f, "malformed http request: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
