// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! The per-connection protocol state machine: opening handshake, frame
//! codec, message reassembly and close handshake. Pure byte-in/byte-out —
//! owns no socket, so it is driven (and fully testable) without I/O.

use crate::access_control::{AllowAny, AllowList, Policy};
use crate::buffer::RecvBuffer;
use crate::config::ServerConfig;
use crate::error::{self, CloseCode, WsError};
use crate::frame::{Codec as FrameCodec, Frame, OpCode};
use crate::handshake;
use crate::http::parse_request;
use crate::message::{Assembler, Kind, Message};
use bytes::BytesMut;
use std::rc::Rc;

/// Where a connection currently sits in the RFC 6455 lifecycle.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum State {
    /// Waiting for a complete HTTP upgrade request.
    AwaitingHandshake,
    /// Handshake complete; frames flow in both directions.
    Open,
    /// We sent a Close frame and are waiting for the peer's echo.
    ClosingSent,
    /// The peer sent a Close frame and we have echoed ours.
    ClosingReceived,
    /// Close handshake complete; the socket may be torn down.
    Closed,
}

impl State {
    pub fn is_closed(self) -> bool {
        self == State::Closed
    }
}

/// One event produced by [`Connection::poll`].
#[derive(Debug)]
pub enum Event {
    /// The opening handshake completed; the 101 response is queued for
    /// writing.
    HandshakeAccepted,
    /// The opening handshake was rejected; the error response is queued for
    /// writing and the connection should be closed once it drains.
    HandshakeRejected,
    /// A complete application message was reassembled.
    Message(Message),
    /// A Ping was received (and a Pong auto-queued).
    Ping(Vec<u8>),
    /// A Pong was received.
    Pong(Vec<u8>),
    /// The close handshake completed, with the close code observed, if any.
    Closed(Option<CloseCode>),
}

/// A single WebSocket connection's protocol state, independent of any
/// particular transport.
pub struct Connection {
    state: State,
    config: Rc<ServerConfig>,
    recv_buffer: RecvBuffer,
    outbound: BytesMut,
    codec: FrameCodec,
    assembler: Assembler,
    server_name_policy: Box<dyn Policy>,
    origin_policy: Option<Box<dyn Policy>>,
    path: Option<String>,
}

impl Connection {
    pub fn new(config: Rc<ServerConfig>) -> Self {
        let server_name_policy: Box<dyn Policy> = match &config.server_name {
            Some(name) => Box::new(AllowList::new(vec![name.clone()])),
            None => Box::new(AllowAny),
        };
        let origin_policy: Option<Box<dyn Policy>> = config
            .origin_policy
            .as_ref()
            .map(|origin| Box::new(AllowList::new(vec![origin.clone()])) as Box<dyn Policy>);

        Connection {
            state: State::AwaitingHandshake,
            assembler: Assembler::new(config.max_message_size),
            config,
            recv_buffer: RecvBuffer::new(),
            outbound: BytesMut::new(),
            // The codec's own cap is a fixed, independent guard against an
            // absurd single-frame length claim; `max_message_size` is
            // enforced by the assembler instead, so it owns CLOSE 1009.
            codec: FrameCodec::new(),
            server_name_policy,
            origin_policy,
            path: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The request target from the opening handshake, once it has
    /// completed.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Take over `prior`'s already-completed handshake: the accepted path,
    /// the queued 101 response bytes, and any bytes read after the
    /// handshake in the same chunk. Used when a route's `controller_factory`
    /// builds a fresh `Connection` once the path is known — the connection
    /// that parses the handshake must exist before any route can be
    /// resolved, so it is re-homed into the route's own `Connection` here
    /// rather than built with it from the start.
    pub(crate) fn adopt_handshake_from(&mut self, prior: &mut Connection) {
        self.state = prior.state;
        self.path = prior.path.take();
        self.outbound = std::mem::take(&mut prior.outbound);
        self.recv_buffer = std::mem::take(&mut prior.recv_buffer);
    }

    /// Force the connection straight to `Closed` without waiting for a
    /// peer close-frame echo. Used by the event loop to reclaim a
    /// connection whose close handshake timed out.
    pub fn abort(&mut self) {
        self.state = State::Closed;
    }

    /// Append bytes freshly read from the socket.
    pub fn receive_bytes(&mut self, bytes: &[u8]) {
        self.recv_buffer.append(bytes);
    }

    /// Bytes queued for writing to the socket.
    pub fn outbound(&self) -> &[u8] {
        &self.outbound
    }

    /// Drop `n` bytes from the front of the outbound queue after they have
    /// been written.
    pub fn consume_outbound(&mut self, n: usize) {
        let _ = self.outbound.split_to(n.min(self.outbound.len()));
    }

    pub fn has_pending_output(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Make as much progress as the currently buffered bytes allow, returning
    /// one event at a time. Call repeatedly until it returns `Ok(None)`.
    pub fn poll(&mut self) -> Result<Option<Event>, WsError> {
        match self.state {
            State::AwaitingHandshake => self.poll_handshake(),
            State::Open | State::ClosingSent => self.poll_frame(),
            State::ClosingReceived | State::Closed => Ok(None),
        }
    }

    /// Finish the close handshake once the echoed Close frame has actually
    /// left the send queue. A no-op outside `ClosingReceived` or while
    /// output is still pending.
    pub fn mark_drained(&mut self) {
        if self.state == State::ClosingReceived && !self.has_pending_output() {
            self.state = State::Closed;
        }
    }

    fn poll_handshake(&mut self) -> Result<Option<Event>, WsError> {
        let end = match self.recv_buffer.find(b"\r\n\r\n") {
            Some(pos) => pos + 4,
            None => return Ok(None),
        };

        let head = self.recv_buffer.peek(end).to_vec();
        let (req, _) = parse_request(&head)?;
        self.recv_buffer.consume(end);
        self.path = Some(req.target.clone());

        match handshake::verify(&req, self.server_name_policy.as_ref(), self.origin_policy.as_deref()) {
            Ok(verified) => {
                self.outbound.extend_from_slice(&handshake::accept_response(&verified).to_bytes());
                self.state = State::Open;
                Ok(Some(Event::HandshakeAccepted))
            }
            Err(e) => {
                self.outbound.extend_from_slice(&handshake::reject_response(&e).to_bytes());
                self.state = State::Closed;
                Ok(Some(Event::HandshakeRejected))
            }
        }
    }

    fn poll_frame(&mut self) -> Result<Option<Event>, WsError> {
        loop {
            let frame = match self.codec.decode(self.recv_buffer.as_bytes_mut())? {
                Some(frame) => frame,
                None => return Ok(None),
            };

            if frame.opcode().is_control() {
                return self.handle_control(frame).map(Some)
            }

            if let Some(message) = self.assembler.feed(frame)? {
                return Ok(Some(Event::Message(message)))
            }
        }
    }

    fn handle_control(&mut self, frame: Frame) -> Result<Event, WsError> {
        match frame.opcode() {
            OpCode::Ping => {
                let payload = frame.into_payload();
                let mut pong = Frame::new(OpCode::Pong);
                pong.set_payload(payload.clone());
                self.send_frame(pong)?;
                Ok(Event::Ping(payload.to_vec()))
            }
            OpCode::Pong => Ok(Event::Pong(frame.into_payload().to_vec())),
            OpCode::Close => {
                let payload = frame.payload();
                let code = if payload.len() >= 2 {
                    let raw = u16::from_be_bytes([payload[0], payload[1]]);
                    Some(if error::is_acceptable_close_code(raw) { raw } else { error::CLOSE_PROTOCOL_ERROR })
                } else {
                    None
                };

                if self.state == State::ClosingSent {
                    // Peer echoed our own close; nothing left to send.
                    self.state = State::Closed;
                } else {
                    self.state = State::ClosingReceived;
                    self.send_close(code.unwrap_or(error::CLOSE_NORMAL))?;
                }
                Ok(Event::Closed(code))
            }
            _ => unreachable!("non-control opcode reached handle_control"),
        }
    }

    /// Queue a text message for writing.
    pub fn send_text(&mut self, text: impl Into<String>) -> Result<(), WsError> {
        self.send_frame(Frame::text(BytesMut::from(text.into().as_bytes())))
    }

    /// Queue a binary message for writing.
    pub fn send_binary(&mut self, payload: impl Into<BytesMut>) -> Result<(), WsError> {
        self.send_frame(Frame::binary(payload.into()))
    }

    /// Queue an already-assembled [`Message`] for writing, as a single
    /// unfragmented frame of the matching opcode.
    pub fn send_message(&mut self, message: Message) -> Result<(), WsError> {
        match message.kind {
            Kind::Text => self.send_frame(Frame::text(message.payload)),
            Kind::Binary => self.send_frame(Frame::binary(message.payload)),
        }
    }

    /// Queue an unsolicited Ping.
    pub fn send_ping(&mut self, payload: impl Into<BytesMut>) -> Result<(), WsError> {
        let mut frame = Frame::new(OpCode::Ping);
        frame.set_payload(payload.into());
        self.send_frame(frame)
    }

    /// Begin the close handshake with the given close code.
    pub fn close(&mut self, code: CloseCode) -> Result<(), WsError> {
        if self.state == State::Open {
            self.state = State::ClosingSent;
        }
        self.send_close(code)
    }

    fn send_close(&mut self, code: CloseCode) -> Result<(), WsError> {
        let mut payload = BytesMut::with_capacity(2);
        payload.extend_from_slice(&code.to_be_bytes());
        let mut frame = Frame::new(OpCode::Close);
        frame.set_payload(payload);
        self.send_frame(frame)
    }

    fn send_frame(&mut self, frame: Frame) -> Result<(), WsError> {
        self.codec.encode(frame, &mut self.outbound)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame::Codec as ClientCodec;

    fn config() -> Rc<ServerConfig> {
        Rc::new(ServerConfig::builder("127.0.0.1", 9000).build())
    }

    const HANDSHAKE: &[u8] = b"GET /chat HTTP/1.1\r\n\
        Host: server.example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\
        \r\n";

    fn encode_masked(frame: Frame) -> BytesMut {
        let mut unmasked = BytesMut::new();
        ClientCodec::new().encode(frame, &mut unmasked).unwrap();
        // Re-mask as a client would: flip the mask bit and append a (zero) mask key.
        let mut out = BytesMut::new();
        out.extend_from_slice(&[unmasked[0]]);
        let second = unmasked[1] | 0x80;
        out.extend_from_slice(&[second]);
        out.extend_from_slice(&[0, 0, 0, 0]);
        out.extend_from_slice(&unmasked[2..]);
        out
    }

    #[test]
    fn handshake_then_message_round_trip() {
        let mut conn = Connection::new(config());
        conn.receive_bytes(HANDSHAKE);
        assert!(matches!(conn.poll().unwrap(), Some(Event::HandshakeAccepted)));
        assert_eq!(conn.state(), State::Open);
        assert!(conn.outbound().starts_with(b"HTTP/1.1 101"));
        conn.consume_outbound(conn.outbound().len());

        let frame_bytes = encode_masked(Frame::text(&b"Hello"[..]));
        conn.receive_bytes(&frame_bytes);
        match conn.poll().unwrap() {
            Some(Event::Message(msg)) => assert_eq!(&msg.payload[..], b"Hello"),
            other => panic!("expected Message event, got {:?}", other),
        }
    }

    #[test]
    fn rejected_handshake_queues_error_response_and_closes() {
        let mut conn = Connection::new(config());
        conn.receive_bytes(b"GET /chat HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(matches!(conn.poll().unwrap(), Some(Event::HandshakeRejected)));
        assert_eq!(conn.state(), State::Closed);
        assert!(conn.outbound().starts_with(b"HTTP/1.1 400"));
    }

    #[test]
    fn ping_is_auto_ponged() {
        let mut conn = Connection::new(config());
        conn.receive_bytes(HANDSHAKE);
        conn.poll().unwrap();
        conn.consume_outbound(conn.outbound().len());

        let mut ping_frame = Frame::new(OpCode::Ping);
        ping_frame.set_payload(BytesMut::from(&b"hi"[..]));
        let ping = encode_masked(ping_frame);
        conn.receive_bytes(&ping);
        assert!(matches!(conn.poll().unwrap(), Some(Event::Ping(payload)) if payload == b"hi"));
        assert!(conn.has_pending_output());
    }

    #[test]
    fn close_handshake_completes_and_echoes_code() {
        let mut conn = Connection::new(config());
        conn.receive_bytes(HANDSHAKE);
        conn.poll().unwrap();
        conn.consume_outbound(conn.outbound().len());

        let mut payload = BytesMut::new();
        payload.extend_from_slice(&1000_u16.to_be_bytes());
        let mut close_frame = Frame::new(OpCode::Close);
        close_frame.set_payload(payload);
        let close = encode_masked(close_frame);
        conn.receive_bytes(&close);
        assert!(matches!(conn.poll().unwrap(), Some(Event::Closed(Some(1000)))));
        assert_eq!(conn.state(), State::ClosingReceived);
        assert!(conn.has_pending_output());

        conn.consume_outbound(conn.outbound().len());
        conn.mark_drained();
        assert_eq!(conn.state(), State::Closed);
    }

    #[test]
    fn invalid_close_code_is_echoed_as_protocol_error() {
        let mut conn = Connection::new(config());
        conn.receive_bytes(HANDSHAKE);
        conn.poll().unwrap();
        conn.consume_outbound(conn.outbound().len());

        let mut payload = BytesMut::new();
        payload.extend_from_slice(&1005_u16.to_be_bytes());
        let mut close_frame = Frame::new(OpCode::Close);
        close_frame.set_payload(payload);
        let close = encode_masked(close_frame);
        conn.receive_bytes(&close);
        assert!(matches!(conn.poll().unwrap(), Some(Event::Closed(Some(1002)))));
    }
}
