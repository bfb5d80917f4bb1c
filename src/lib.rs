// Copyright (c) 2016 twist developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! A non-blocking, single-threaded [RFC 6455][rfc6455] WebSocket server
//! core: handshake verification, frame codec, fragmented message
//! reassembly, and a readiness-notifier event loop dispatching to
//! application-registered [`Handler`]s by URL path.
//!
//! # Basic usage
//!
//! ```ignore
//! use wscore::{config::ServerConfig, router::{Router, Route}, event_loop::EventLoop};
//! use std::rc::Rc;
//!
//! let config = ServerConfig::builder("0.0.0.0", 9000).build();
//! let mut router = Router::new();
//! router.register_default(Route {
//!     handler_factory: Rc::new(|_broadcast| Box::new(MyHandler::default())),
//!     controller_factory: Rc::new(wscore::connection::Connection::new),
//! });
//! EventLoop::new(config, router)?.run()?;
//! ```
//!
//! [rfc6455]: https://tools.ietf.org/html/rfc6455
#![warn(missing_docs)]

pub mod access_control;
pub mod broadcast;
pub mod buffer;
pub mod config;
pub mod connection;
pub mod error;
pub mod event_loop;
pub mod frame;
pub mod handler;
pub mod handshake;
pub mod http;
pub mod message;
pub mod router;

pub use config::{ServerConfig, ServerConfigBuilder};
pub use connection::Connection;
pub use error::WsError;
pub use event_loop::EventLoop;
pub use handler::{ConnectionId, Handler, HandlerAction};
pub use message::Message;
pub use router::{Route, Router};
