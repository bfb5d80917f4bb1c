//! The application-facing contract: a [`Handler`] is registered against a
//! path and driven by the event loop as messages arrive on connections to
//! that path.

use crate::broadcast::BroadcastHandle;
use crate::error::WsError;
use crate::message::Message;

/// A unique, event-loop-assigned identifier for one connection.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ConnectionId(pub u64);

/// What the event loop should do with a connection after a [`Handler`]
/// callback returns (4.I: "reply, stay silent, or initiate close").
#[derive(Debug)]
pub enum HandlerAction {
    /// Send this message back to the connection that triggered the callback.
    Reply(Message),
    /// Do nothing; any sends already queued via [`BroadcastHandle`] still go out.
    Silent,
    /// Begin the close handshake with the given close code.
    Close(crate::error::CloseCode),
}

/// Application logic for a path. One instance is constructed per connection
/// that handshakes against the path it is registered under.
///
/// Implementations must not block: the event loop is single-threaded and a
/// blocking call in a handler stalls every other connection.
pub trait Handler {
    /// A new connection completed its opening handshake. May return a
    /// message to send immediately (e.g. a welcome frame).
    fn on_connect(&mut self, id: ConnectionId, broadcast: &BroadcastHandle) -> Option<Message> {
        let _ = (id, broadcast);
        None
    }

    /// A complete application message was received from `id`.
    fn on_message(&mut self, id: ConnectionId, message: Message, broadcast: &BroadcastHandle) -> Result<HandlerAction, WsError>;

    /// The connection `id` finished its close handshake or was dropped.
    fn on_close(&mut self, id: ConnectionId, code: Option<u16>) {
        let _ = (id, code);
    }

    /// An error occurred on `id` outside of `on_message`; the connection is
    /// about to be torn down.
    fn on_error(&mut self, id: ConnectionId, error: &WsError) {
        let _ = (id, error);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::broadcast::BroadcastRegistry;
    use bytes::BytesMut;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    struct Echo;
    impl Handler for Echo {
        fn on_message(&mut self, _id: ConnectionId, message: Message, _broadcast: &BroadcastHandle) -> Result<HandlerAction, WsError> {
            Ok(HandlerAction::Reply(message))
        }
    }

    fn handle(id: ConnectionId) -> BroadcastHandle {
        let registry = Rc::new(RefCell::new(BroadcastRegistry::new()));
        let outbox = Rc::new(RefCell::new(VecDeque::new()));
        BroadcastHandle::new("/chat".to_string(), id, registry, outbox)
    }

    #[test]
    fn default_callbacks_are_no_ops() {
        struct Minimal;
        impl Handler for Minimal {
            fn on_message(&mut self, _id: ConnectionId, _message: Message, _broadcast: &BroadcastHandle) -> Result<HandlerAction, WsError> {
                Ok(HandlerAction::Silent)
            }
        }

        let mut handler = Minimal;
        let h = handle(ConnectionId(1));
        assert!(handler.on_connect(ConnectionId(1), &h).is_none());
        handler.on_close(ConnectionId(1), Some(1000));
    }

    #[test]
    fn echo_handler_replies_with_the_same_message() {
        let mut handler = Echo;
        let h = handle(ConnectionId(1));
        let msg = Message::text(BytesMut::from(&b"hi"[..]));
        match handler.on_message(ConnectionId(1), msg, &h).unwrap() {
            HandlerAction::Reply(reply) => assert_eq!(&reply.payload[..], b"hi"),
            other => panic!("expected Reply, got {:?}", other),
        }
    }
}
