// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Server-side verification of the WebSocket opening handshake
//! ([RFC 6455 §4.2](https://tools.ietf.org/html/rfc6455#section-4.2)).

use crate::access_control::Policy;
use crate::http::{Request, Response};
use http::StatusCode;
use sha1::{Digest, Sha1};
use std::fmt;

/// The magic GUID appended to `Sec-WebSocket-Key` before hashing, fixed by
/// the protocol and never configurable.
const GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// A successfully verified request, ready to have its 101 response built.
pub struct Verified {
    pub accept_key: String,
}

/// Verify an opening handshake request in the order required by
/// RFC 6455 §4.2.1, using `server_name` and `origin_policy` to check the
/// `Host` and `Origin` headers respectively.
pub fn verify(
    req: &Request,
    server_name: &dyn Policy,
    origin_policy: Option<&dyn Policy>,
) -> Result<Verified, Error> {
    if req.method != "GET" || !req.http_11 {
        return Err(Error::BadRequest("expected GET over HTTP/1.1"))
    }

    let host = req.headers.get("host").ok_or(Error::BadRequest("missing Host header"))?;
    if !server_name.is_allowed(host.as_bytes()) {
        return Err(Error::BadRequest("Host header did not match configured server name"))
    }

    if !req.headers.contains_token("Upgrade", "websocket") {
        return Err(Error::BadRequest("Upgrade header missing websocket token"))
    }
    if !req.headers.contains_token("Connection", "Upgrade") {
        return Err(Error::BadRequest("Connection header missing Upgrade token"))
    }

    let key = req.headers.get("sec-websocket-key").ok_or(Error::BadRequest("missing Sec-WebSocket-Key"))?;
    let decoded = base64::decode(&key).map_err(|_| Error::BadRequest("Sec-WebSocket-Key is not valid base64"))?;
    if decoded.len() != 16 {
        return Err(Error::BadRequest("Sec-WebSocket-Key did not decode to 16 bytes"))
    }

    match req.headers.get("sec-websocket-version") {
        Some(v) if v == "13" => {}
        _ => return Err(Error::UpgradeRequired),
    }

    if let Some(policy) = origin_policy {
        let origin = req.headers.get("origin").ok_or(Error::Forbidden)?;
        if !policy.is_allowed(origin.as_bytes()) {
            return Err(Error::Forbidden)
        }
    }

    Ok(Verified { accept_key: accept_token(&key) })
}

/// `base64(SHA1(key ++ GUID))`, the `Sec-WebSocket-Accept` value.
pub fn accept_token(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(GUID);
    base64::encode(hasher.finalize())
}

/// Build the 101 Switching Protocols response for a verified handshake.
pub fn accept_response(verified: &Verified) -> Response {
    Response::new(StatusCode::SWITCHING_PROTOCOLS)
        .header("Upgrade", "websocket")
        .header("Connection", "Upgrade")
        .header("Sec-WebSocket-Accept", verified.accept_key.clone())
}

/// Build the rejection response for a failed handshake.
pub fn reject_response(err: &Error) -> Response {
    match err {
        Error::BadRequest(_) => Response::new(StatusCode::BAD_REQUEST),
        Error::Forbidden => Response::new(StatusCode::FORBIDDEN),
        Error::UpgradeRequired => Response::new(StatusCode::UPGRADE_REQUIRED).header("Sec-WebSocket-Version", "13"),
    }
}

#[derive(Debug)]
pub enum Error {
    /// Maps to HTTP 400.
    BadRequest(&'static str),
    /// Maps to HTTP 403: origin policy configured and not satisfied.
    Forbidden,
    /// Maps to HTTP 426: `Sec-WebSocket-Version` was missing or not `13`.
    UpgradeRequired,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::BadRequest(reason) => write!(f, "handshake rejected: {}", reason),
            Error::Forbidden => f.write_str("handshake rejected: origin not allowed"),
            Error::UpgradeRequired => f.write_str("handshake rejected: unsupported Sec-WebSocket-Version"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod test {
    use super::*;
    use crate::access_control::AllowAny;
    use crate::http::parse_request;

    const VALID_REQUEST: &[u8] = b"GET /chat HTTP/1.1\r\n\
        Host: server.example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\
        \r\n";

    #[test]
    fn accept_token_matches_rfc_test_vector() {
        assert_eq!(accept_token("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn valid_handshake_is_accepted() {
        let (req, _) = parse_request(VALID_REQUEST).unwrap();
        let verified = verify(&req, &AllowAny, None).unwrap();
        assert_eq!(verified.accept_key, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn missing_upgrade_token_is_bad_request() {
        let raw = b"GET /chat HTTP/1.1\r\nHost: x\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";
        let (req, _) = parse_request(raw).unwrap();
        assert!(matches!(verify(&req, &AllowAny, None), Err(Error::BadRequest(_))));
    }

    #[test]
    fn wrong_version_is_upgrade_required() {
        let raw = b"GET /chat HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 8\r\n\r\n";
        let (req, _) = parse_request(raw).unwrap();
        assert!(matches!(verify(&req, &AllowAny, None), Err(Error::UpgradeRequired)));
    }

    #[test]
    fn short_key_is_bad_request() {
        let raw = b"GET /chat HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dG8=\r\nSec-WebSocket-Version: 13\r\n\r\n";
        let (req, _) = parse_request(raw).unwrap();
        assert!(matches!(verify(&req, &AllowAny, None), Err(Error::BadRequest(_))));
    }

    #[test]
    fn response_contains_accept_header() {
        let (req, _) = parse_request(VALID_REQUEST).unwrap();
        let verified = verify(&req, &AllowAny, None).unwrap();
        let resp = accept_response(&verified);
        let text = String::from_utf8(resp.to_bytes()).unwrap();
        assert!(text.starts_with("HTTP/1.1 101"));
        assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    }
}
