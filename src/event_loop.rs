// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! The single-threaded, non-blocking server core: accepts connections,
//! drives each one's [`Connection`] state machine, and dispatches completed
//! events to the [`Router`]-resolved [`Handler`].

use crate::broadcast::{BroadcastHandle, BroadcastRegistry, PendingSend};
use crate::config::ServerConfig;
use crate::connection::{Connection, Event as ConnEvent, State};
use crate::error::{self, WsError};
use crate::handler::{ConnectionId, Handler, HandlerAction};
use crate::router::Router;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::{self, ErrorKind, Read, Write};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const LISTENER: Token = Token(0);
/// Per-tick read cap, preserving fairness across many ready connections.
const READ_CHUNK: usize = 64 * 1024;
/// How long the shutdown sequence waits for outstanding writes to drain.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(2);
/// How often the loop sweeps slots for expired handshake/idle timeouts.
const TIMEOUT_SWEEP_INTERVAL: Duration = Duration::from_millis(250);

struct Slot {
    stream: TcpStream,
    connection: Connection,
    handler: Option<Box<dyn Handler>>,
    broadcast_handle: Option<BroadcastHandle>,
    id: ConnectionId,
    registered_writable: bool,
    last_activity: Instant,
}

/// Owns the listening socket, the readiness notifier, and every live
/// connection. See [`EventLoop::run`] for the per-iteration schedule.
pub struct EventLoop {
    config: Rc<ServerConfig>,
    router: Router,
    poll: Poll,
    listener: TcpListener,
    slots: HashMap<Token, Slot>,
    id_to_token: HashMap<ConnectionId, Token>,
    broadcast: Rc<RefCell<BroadcastRegistry>>,
    outbox: Rc<RefCell<VecDeque<PendingSend>>>,
    next_token: usize,
    next_connection_id: u64,
    stop: Arc<AtomicBool>,
}

impl EventLoop {
    pub fn new(config: ServerConfig, router: Router) -> io::Result<Self> {
        let addr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| io::Error::new(ErrorKind::InvalidInput, format!("invalid listen address: {}", e)))?;

        let mut listener = TcpListener::bind(addr)?;
        let poll = Poll::new()?;
        poll.registry().register(&mut listener, LISTENER, Interest::READABLE)?;

        let stop = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&stop))?;
        signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&stop))?;

        log::info!("listening on {}", addr);

        Ok(EventLoop {
            config: Rc::new(config),
            router,
            poll,
            listener,
            slots: HashMap::new(),
            id_to_token: HashMap::new(),
            broadcast: Rc::new(RefCell::new(BroadcastRegistry::new())),
            outbox: Rc::new(RefCell::new(VecDeque::new())),
            next_token: 1,
            next_connection_id: 0,
            stop,
        })
    }

    /// Drive the loop until a `SIGINT`/`SIGTERM` is observed.
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(1024);
        loop {
            if self.stop.load(Ordering::SeqCst) {
                log::info!("stop flag set, shutting down");
                self.shutdown();
                return Ok(())
            }

            match self.poll.poll(&mut events, Some(TIMEOUT_SWEEP_INTERVAL)) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            let tokens: Vec<(Token, bool, bool)> =
                events.iter().map(|e| (e.token(), e.is_readable(), e.is_writable())).collect();

            for (token, readable, writable) in tokens {
                if token == LISTENER {
                    if let Err(e) = self.accept_all() {
                        log::warn!("accept failed: {}", e);
                    }
                    continue
                }
                if writable {
                    self.handle_writable(token);
                }
                if readable {
                    self.handle_readable(token);
                }
            }

            self.flush_outbox();
            self.sweep_timeouts();
            self.reap_closed();
        }
    }

    /// Deliver every message a handler enqueued via [`BroadcastHandle`]
    /// during this iteration to its target's outbound buffer (4.H step 3).
    fn flush_outbox(&mut self) {
        let pending: Vec<PendingSend> = self.outbox.borrow_mut().drain(..).collect();
        for send in pending {
            let token = match self.id_to_token.get(&send.target) {
                Some(token) => *token,
                None => continue,
            };
            if let Some(slot) = self.slots.get_mut(&token) {
                if let Err(e) = slot.connection.send_message(send.message) {
                    log::warn!("failed to enqueue broadcast send to {:?}: {}", send.target, e);
                }
            }
            self.sync_write_interest(token);
        }
    }

    fn accept_all(&mut self) -> io::Result<()> {
        loop {
            let (mut stream, addr) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            };

            let token = Token(self.next_token);
            self.next_token += 1;
            self.poll.registry().register(&mut stream, token, Interest::READABLE)?;

            let id = ConnectionId(self.next_connection_id);
            self.next_connection_id += 1;

            log::debug!("accepted connection {:?} from {}", id, addr);

            self.id_to_token.insert(id, token);
            self.slots.insert(
                token,
                Slot {
                    stream,
                    connection: Connection::new(Rc::clone(&self.config)),
                    handler: None,
                    broadcast_handle: None,
                    id,
                    registered_writable: false,
                    last_activity: Instant::now(),
                },
            );
        }
    }

    /// Close any connection that has overstayed `handshake_timeout` in
    /// `AwaitingHandshake`, `idle_timeout` without traffic in `Open`, or
    /// `idle_timeout` waiting for the peer's close-frame echo.
    fn sweep_timeouts(&mut self) {
        let now = Instant::now();
        let expired: Vec<(Token, State)> = self
            .slots
            .iter()
            .filter_map(|(token, slot)| {
                let limit = match slot.connection.state() {
                    State::AwaitingHandshake => self.config.handshake_timeout,
                    State::Open | State::ClosingSent | State::ClosingReceived => self.config.idle_timeout,
                    State::Closed => return None,
                };
                if now.duration_since(slot.last_activity) >= limit {
                    Some((*token, slot.connection.state()))
                } else {
                    None
                }
            })
            .collect();

        for (token, state) in expired {
            if let Some(slot) = self.slots.get_mut(&token) {
                log::debug!("{:?} timed out in state {:?}", slot.id, state);
                match state {
                    State::AwaitingHandshake | State::Open => {
                        let _ = slot.connection.close(error::CLOSE_GOING_AWAY);
                    }
                    _ => slot.connection.abort(),
                }
            }
            self.sync_write_interest(token);
        }
    }

    fn handle_readable(&mut self, token: Token) {
        let mut buf = [0u8; READ_CHUNK];
        let mut closed_by_peer = false;

        if let Some(slot) = self.slots.get_mut(&token) {
            loop {
                match slot.stream.read(&mut buf) {
                    Ok(0) => {
                        closed_by_peer = true;
                        break
                    }
                    Ok(n) => {
                        slot.connection.receive_bytes(&buf[..n]);
                        slot.last_activity = Instant::now();
                        if n < buf.len() {
                            break
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) => {
                        log::debug!("read error on {:?}: {}", slot.id, e);
                        closed_by_peer = true;
                        break
                    }
                }
            }
        }

        if closed_by_peer {
            if let Some(slot) = self.slots.get_mut(&token) {
                if let Some(handler) = slot.handler.as_mut() {
                    handler.on_close(slot.id, None);
                }
                self.broadcast.borrow_mut().leave_all(slot.id);
                self.id_to_token.remove(&slot.id);
            }
            self.slots.remove(&token);
            return
        }

        self.drain_connection_events(token);
        self.sync_write_interest(token);
    }

    fn drain_connection_events(&mut self, token: Token) {
        loop {
            let outcome = match self.slots.get_mut(&token) {
                Some(slot) => slot.connection.poll(),
                None => return,
            };

            match outcome {
                Ok(Some(event)) => self.dispatch(token, event),
                Ok(None) => return,
                Err(e) => {
                    self.handle_connection_error(token, e);
                    return
                }
            }
        }
    }

    fn dispatch(&mut self, token: Token, event: ConnEvent) {
        match event {
            ConnEvent::HandshakeAccepted => self.on_handshake_accepted(token),
            ConnEvent::HandshakeRejected => {
                log::debug!("handshake rejected for token {:?}", token);
            }
            ConnEvent::Message(message) => {
                let result = match self.slots.get_mut(&token) {
                    Some(slot) => {
                        let id = slot.id;
                        match (slot.handler.as_mut(), slot.broadcast_handle.as_ref()) {
                            (Some(handler), Some(handle)) => Some(handler.on_message(id, message, handle)),
                            _ => None,
                        }
                    }
                    None => return,
                };
                match result {
                    Some(Ok(action)) => self.apply_handler_action(token, action),
                    Some(Err(e)) => self.handle_connection_error(token, e),
                    None => {}
                }
            }
            ConnEvent::Ping(_) | ConnEvent::Pong(_) => {}
            ConnEvent::Closed(code) => {
                if let Some(slot) = self.slots.get_mut(&token) {
                    if let Some(handler) = slot.handler.as_mut() {
                        handler.on_close(slot.id, code);
                    }
                    self.broadcast.borrow_mut().leave_all(slot.id);
                    self.id_to_token.remove(&slot.id);
                }
            }
        }
    }

    /// Carry out what a [`Handler::on_message`] callback asked for (4.I).
    fn apply_handler_action(&mut self, token: Token, action: HandlerAction) {
        let result = if let Some(slot) = self.slots.get_mut(&token) {
            match action {
                HandlerAction::Reply(message) => Some(slot.connection.send_message(message)),
                HandlerAction::Silent => None,
                HandlerAction::Close(code) => Some(slot.connection.close(code)),
            }
        } else {
            None
        };

        if let Some(Err(e)) = result {
            self.handle_connection_error(token, e);
        } else {
            self.sync_write_interest(token);
        }
    }

    fn on_handshake_accepted(&mut self, token: Token) {
        let (id, path) = match self.slots.get(&token) {
            Some(slot) => (slot.id, slot.connection.path().unwrap_or("/").to_string()),
            None => return,
        };

        match self.router.resolve(&path) {
            Ok(route) => {
                let handler_factory = Rc::clone(&route.handler_factory);
                let controller_factory = Rc::clone(&route.controller_factory);

                self.broadcast.borrow_mut().join(&path, id);
                let handle = BroadcastHandle::new(path, id, Rc::clone(&self.broadcast), Rc::clone(&self.outbox));
                let mut handler = handler_factory(handle.clone());
                let reply = handler.on_connect(id, &handle);

                if let Some(slot) = self.slots.get_mut(&token) {
                    let mut connection = controller_factory(Rc::clone(&self.config));
                    connection.adopt_handshake_from(&mut slot.connection);
                    slot.connection = connection;
                    slot.handler = Some(handler);
                    slot.broadcast_handle = Some(handle);
                    if let Some(message) = reply {
                        if let Err(e) = slot.connection.send_message(message) {
                            log::warn!("on_connect reply for {:?} failed to encode: {}", id, e);
                        }
                    }
                }
            }
            Err(_) => {
                log::debug!("no route for path {:?}, closing {:?}", path, id);
                if let Some(slot) = self.slots.get_mut(&token) {
                    let _ = slot.connection.close(error::CLOSE_PROTOCOL_ERROR);
                }
            }
        }
    }

    fn handle_connection_error(&mut self, token: Token, error: WsError) {
        if let Some(slot) = self.slots.get_mut(&token) {
            log::warn!("connection {:?} error: {}", slot.id, error);
            if let Some(handler) = slot.handler.as_mut() {
                handler.on_error(slot.id, &error);
            }
            if let Some(code) = error.close_code() {
                let _ = slot.connection.close(code);
            }
        }
        self.sync_write_interest(token);
    }

    fn handle_writable(&mut self, token: Token) {
        let done = if let Some(slot) = self.slots.get_mut(&token) {
            loop {
                let chunk = slot.connection.outbound();
                if chunk.is_empty() {
                    slot.connection.mark_drained();
                    break slot.connection.state() == State::Closed
                }
                match slot.stream.write(chunk) {
                    Ok(0) => break true,
                    Ok(n) => slot.connection.consume_outbound(n),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break false,
                    Err(_) => break true,
                }
            }
        } else {
            return
        };

        if done {
            if let Some(slot) = self.slots.remove(&token) {
                self.id_to_token.remove(&slot.id);
            }
        } else {
            self.sync_write_interest(token);
        }
    }

    /// Register or deregister write-readiness for `token` based on whether
    /// its connection has pending output.
    fn sync_write_interest(&mut self, token: Token) {
        if let Some(slot) = self.slots.get_mut(&token) {
            let wants_write = slot.connection.has_pending_output();
            if wants_write != slot.registered_writable {
                let interest = if wants_write { Interest::READABLE | Interest::WRITABLE } else { Interest::READABLE };
                if self.poll.registry().reregister(&mut slot.stream, token, interest).is_ok() {
                    slot.registered_writable = wants_write;
                }
            }
        }
    }

    fn reap_closed(&mut self) {
        let id_to_token = &mut self.id_to_token;
        self.slots.retain(|_, slot| {
            let dead = slot.connection.state() == State::Closed && !slot.connection.has_pending_output();
            if dead {
                id_to_token.remove(&slot.id);
            }
            !dead
        });
    }

    fn shutdown(&mut self) {
        let tokens: Vec<Token> = self.slots.keys().copied().collect();
        for token in &tokens {
            if let Some(slot) = self.slots.get_mut(token) {
                let _ = slot.connection.close(error::CLOSE_GOING_AWAY);
            }
        }

        let deadline = std::time::Instant::now() + SHUTDOWN_DRAIN;
        let mut events = Events::with_capacity(1024);
        while std::time::Instant::now() < deadline && !self.slots.is_empty() {
            if self.poll.poll(&mut events, Some(Duration::from_millis(100))).is_err() {
                break
            }
            let writable_tokens: Vec<Token> = events.iter().map(|e| e.token()).collect();
            for token in writable_tokens {
                self.handle_writable(token);
            }
            self.reap_closed();
        }

        log::info!("shutdown complete, {} connection(s) dropped undrained", self.slots.len());
    }
}
