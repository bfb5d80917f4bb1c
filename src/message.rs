// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Reassembly of fragmented data frames into complete application messages.

use crate::frame::{Frame, OpCode};
use bytes::BytesMut;
use std::str;

/// The kind of a completed application message.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Kind {
    Text,
    Binary,
}

/// A complete, reassembled application message.
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: Kind,
    pub payload: BytesMut,
}

impl Message {
    pub fn text(payload: BytesMut) -> Self {
        Message { kind: Kind::Text, payload }
    }

    pub fn binary(payload: BytesMut) -> Self {
        Message { kind: Kind::Binary, payload }
    }
}

/// Errors that can arise while feeding frames to the [`Assembler`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("continuation frame received with no message in progress")]
    UnexpectedContinuation,
    #[error("data frame received while a message is already in progress")]
    MessageAlreadyInProgress,
    #[error("assembled message of {actual} bytes exceeds configured maximum of {maximum} bytes")]
    MessageTooBig { actual: u64, maximum: u64 },
    #[error("text message payload is not valid utf-8")]
    InvalidUtf8,
}

/// Reassembles data frames (opcode Text/Binary/Continue) into complete
/// messages, one at a time. A connection owns exactly one `Assembler`; at
/// most one message is ever in progress (4.E / 4.F "at-most-one" invariant).
#[derive(Debug, Default)]
pub struct Assembler {
    in_progress: Option<(Kind, BytesMut)>,
    max_message_size: u64,
}

impl Assembler {
    pub fn new(max_message_size: u64) -> Self {
        Assembler { in_progress: None, max_message_size }
    }

    pub fn has_partial_message(&self) -> bool {
        self.in_progress.is_some()
    }

    /// Feed one data frame (opcode Continue/Text/Binary). Returns `Ok(Some(_))`
    /// when the frame completes a message, `Ok(None)` if more fragments are
    /// expected. Control frames must not be passed here; dispatch them before
    /// calling this, per 4.E ("Control frames MAY arrive between fragments").
    pub fn feed(&mut self, frame: Frame) -> Result<Option<Message>, Error> {
        let fin = frame.is_fin();
        let opcode = frame.opcode();
        debug_assert!(opcode.is_data(), "assembler fed a non-data frame");

        match (fin, opcode, &mut self.in_progress) {
            (_, OpCode::Continue, None) => Err(Error::UnexpectedContinuation),
            (_, OpCode::Text, Some(_)) | (_, OpCode::Binary, Some(_)) => Err(Error::MessageAlreadyInProgress),

            (false, OpCode::Text, None) => {
                self.in_progress = Some((Kind::Text, BytesMut::from(frame.payload())));
                Ok(None)
            }
            (false, OpCode::Binary, None) => {
                self.in_progress = Some((Kind::Binary, BytesMut::from(frame.payload())));
                Ok(None)
            }
            (false, OpCode::Continue, Some((_, buf))) => {
                self.append(buf, frame.payload())?;
                Ok(None)
            }

            (true, OpCode::Text, None) => self.complete(Kind::Text, BytesMut::from(frame.payload())),
            (true, OpCode::Binary, None) => self.complete(Kind::Binary, BytesMut::from(frame.payload())),
            (true, OpCode::Continue, Some(_)) => {
                let (kind, mut buf) = self.in_progress.take().expect("checked Some above");
                self.append(&mut buf, frame.payload())?;
                self.complete(kind, buf)
            }

            (true, OpCode::Continue, None) => Err(Error::UnexpectedContinuation),
            (false, _, Some(_)) => unreachable!("non-data opcode reached the assembler"),
        }
    }

    fn append(&self, buf: &mut BytesMut, more: &[u8]) -> Result<(), Error> {
        let total = buf.len() as u64 + more.len() as u64;
        if total > self.max_message_size {
            return Err(Error::MessageTooBig { actual: total, maximum: self.max_message_size })
        }
        buf.extend_from_slice(more);
        Ok(())
    }

    fn complete(&mut self, kind: Kind, payload: BytesMut) -> Result<Option<Message>, Error> {
        if payload.len() as u64 > self.max_message_size {
            return Err(Error::MessageTooBig { actual: payload.len() as u64, maximum: self.max_message_size })
        }
        if kind == Kind::Text {
            str::from_utf8(&payload).map_err(|_| Error::InvalidUtf8)?;
        }
        Ok(Some(Message { kind, payload }))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn data_frame(opcode: OpCode, fin: bool, payload: &[u8]) -> Frame {
        let mut f = Frame::new(opcode);
        f.set_fin(fin);
        f.set_payload(BytesMut::from(payload));
        f
    }

    #[test]
    fn unfragmented_text_message() {
        let mut a = Assembler::new(1024);
        let msg = a.feed(data_frame(OpCode::Text, true, b"Hello")).unwrap().unwrap();
        assert_eq!(msg.kind, Kind::Text);
        assert_eq!(&msg.payload[..], b"Hello");
        assert!(!a.has_partial_message());
    }

    #[test]
    fn fragmented_hel_lo_reassembles() {
        let mut a = Assembler::new(1024);
        assert!(a.feed(data_frame(OpCode::Text, false, b"Hel")).unwrap().is_none());
        assert!(a.has_partial_message());
        let msg = a.feed(data_frame(OpCode::Continue, true, b"lo")).unwrap().unwrap();
        assert_eq!(&msg.payload[..], b"Hello");
        assert!(!a.has_partial_message());
    }

    #[test]
    fn continuation_with_nothing_in_progress_is_an_error() {
        let mut a = Assembler::new(1024);
        assert!(matches!(a.feed(data_frame(OpCode::Continue, true, b"x")), Err(Error::UnexpectedContinuation)));
    }

    #[test]
    fn data_opcode_while_in_progress_is_an_error() {
        let mut a = Assembler::new(1024);
        a.feed(data_frame(OpCode::Text, false, b"Hel")).unwrap();
        assert!(matches!(a.feed(data_frame(OpCode::Binary, true, b"oops")), Err(Error::MessageAlreadyInProgress)));
    }

    #[test]
    fn invalid_utf8_on_completion_fails() {
        let mut a = Assembler::new(1024);
        let bad = [0xff, 0xfe];
        assert!(matches!(a.feed(data_frame(OpCode::Text, true, &bad)), Err(Error::InvalidUtf8)));
    }

    #[test]
    fn exceeding_max_message_size_fails() {
        let mut a = Assembler::new(4);
        assert!(matches!(a.feed(data_frame(OpCode::Text, true, b"too long")), Err(Error::MessageTooBig { .. })));
    }

    #[test]
    fn exceeding_max_message_size_across_fragments_fails() {
        let mut a = Assembler::new(4);
        a.feed(data_frame(OpCode::Binary, false, b"ab")).unwrap();
        assert!(matches!(a.feed(data_frame(OpCode::Continue, true, b"cde")), Err(Error::MessageTooBig { .. })));
    }
}
