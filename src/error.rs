// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Top-level error taxonomy and WebSocket close codes.

use crate::{frame, handshake, http, message};
use std::io;

/// A WebSocket close status code (RFC 6455 §7.4).
pub type CloseCode = u16;

pub const CLOSE_NORMAL: CloseCode = 1000;
pub const CLOSE_GOING_AWAY: CloseCode = 1001;
pub const CLOSE_PROTOCOL_ERROR: CloseCode = 1002;
pub const CLOSE_INVALID_PAYLOAD: CloseCode = 1007;
pub const CLOSE_MESSAGE_TOO_BIG: CloseCode = 1009;
pub const CLOSE_INTERNAL_ERROR: CloseCode = 1011;

/// Is `code` an acceptable value to receive in an inbound Close frame?
///
/// Ranges per RFC 6455 §7.4.1/7.4.2, plus the private-use range. Anything
/// outside these is not a valid code to see on the wire and callers should
/// echo back [`CLOSE_PROTOCOL_ERROR`] instead of relaying it verbatim.
pub fn is_acceptable_close_code(code: CloseCode) -> bool {
    matches!(code, 1000..=1003 | 1007..=1011 | 1015 | 3000..=4999)
}

/// Errors that can occur while driving one connection through handshake,
/// framing, and close.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed http request: {0}")]
    MalformedHttp(#[from] http::Error),

    #[error("handshake rejected: {0}")]
    HandshakeRejected(#[from] handshake::Error),

    #[error("frame codec error: {0}")]
    Codec(#[from] frame::Error),

    #[error("message assembly error: {0}")]
    Assembly(#[from] message::Error),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("invalid utf-8 in text message")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("message of {actual} bytes exceeds configured maximum of {maximum} bytes")]
    MessageTooBig { actual: u64, maximum: u64 },

    #[error("application handler failed: {0}")]
    HandlerFailure(String),

    #[error("connection timed out")]
    Timeout,

    #[error("internal error: {0}")]
    InternalError(String),

    #[error("connection already closed")]
    Closed,
}

impl WsError {
    /// The close code this error should be reported to the peer with, if
    /// any. `None` means the connection is dropped without a Close frame
    /// (e.g. a bare socket error).
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            WsError::Io(_) => None,
            WsError::MalformedHttp(_) | WsError::HandshakeRejected(_) => None,
            WsError::Codec(_) | WsError::ProtocolError(_) => Some(CLOSE_PROTOCOL_ERROR),
            WsError::InvalidUtf8(_) => Some(CLOSE_INVALID_PAYLOAD),
            WsError::Assembly(message::Error::InvalidUtf8) => Some(CLOSE_INVALID_PAYLOAD),
            WsError::Assembly(message::Error::MessageTooBig { .. }) => Some(CLOSE_MESSAGE_TOO_BIG),
            WsError::Assembly(_) => Some(CLOSE_PROTOCOL_ERROR),
            WsError::MessageTooBig { .. } => Some(CLOSE_MESSAGE_TOO_BIG),
            WsError::HandlerFailure(_) => Some(CLOSE_INTERNAL_ERROR),
            WsError::Timeout => Some(CLOSE_GOING_AWAY),
            WsError::InternalError(_) => Some(CLOSE_INTERNAL_ERROR),
            WsError::Closed => None,
        }
    }
}
