//! Namespace → connection-set registry used to fan a message out to every
//! connection subscribed to a namespace.

use crate::handler::ConnectionId;
use crate::message::Message;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

/// Tracks which connections belong to which broadcast namespaces. Mutated
/// only when a connection opens (join) or closes (leave); membership is
/// otherwise read-only from the event loop's perspective.
#[derive(Default)]
pub struct BroadcastRegistry {
    namespaces: HashMap<String, HashSet<ConnectionId>>,
}

impl BroadcastRegistry {
    pub fn new() -> Self {
        BroadcastRegistry::default()
    }

    /// Subscribe `id` to `namespace`.
    pub fn join(&mut self, namespace: &str, id: ConnectionId) {
        self.namespaces.entry(namespace.to_string()).or_default().insert(id);
    }

    /// Unsubscribe `id` from `namespace`.
    pub fn leave(&mut self, namespace: &str, id: ConnectionId) {
        if let Some(members) = self.namespaces.get_mut(namespace) {
            members.remove(&id);
        }
    }

    /// Remove `id` from every namespace it belongs to. Called once a
    /// connection reaches CLOSED.
    pub fn leave_all(&mut self, id: ConnectionId) {
        for members in self.namespaces.values_mut() {
            members.remove(&id);
        }
    }

    pub fn members(&self, namespace: &str) -> impl Iterator<Item = ConnectionId> + '_ {
        self.namespaces.get(namespace).into_iter().flatten().copied()
    }

    /// Call `send` for every member of `namespace`, skipping `sender` unless
    /// `include_self` is set. Returns the number of recipients notified.
    /// Encoding and actually enqueueing the message onto a connection's
    /// outbound buffer is the caller's responsibility via `send`.
    pub fn broadcast(&self, namespace: &str, sender: ConnectionId, include_self: bool, mut send: impl FnMut(ConnectionId)) -> usize {
        let mut count = 0;
        for id in self.members(namespace) {
            if !include_self && id == sender {
                continue
            }
            send(id);
            count += 1;
        }
        count
    }
}

/// A message a handler enqueued for some other connection. The event loop
/// drains these once per iteration and appends each to its target's
/// outbound buffer (4.H step 3 / 4.J ordering guarantee).
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub target: ConnectionId,
    pub message: Message,
}

/// Given to a [`crate::handler::Handler`] at construction so it can reach
/// the broadcast registry without holding a reference to the event loop
/// itself (4.I "Handlers can request broadcast via the registry").
///
/// Enqueues are plain data pushes: the actual encode-and-write happens on
/// the event loop's own schedule, after the callback that queued them
/// returns.
#[derive(Clone)]
pub struct BroadcastHandle {
    namespace: String,
    self_id: ConnectionId,
    registry: Rc<RefCell<BroadcastRegistry>>,
    outbox: Rc<RefCell<VecDeque<PendingSend>>>,
}

impl BroadcastHandle {
    pub(crate) fn new(
        namespace: String,
        self_id: ConnectionId,
        registry: Rc<RefCell<BroadcastRegistry>>,
        outbox: Rc<RefCell<VecDeque<PendingSend>>>,
    ) -> Self {
        BroadcastHandle { namespace, self_id, registry, outbox }
    }

    /// The namespace (request path) this connection joined at handshake.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// This connection's own identity, for comparing against broadcast
    /// membership or tagging outbound messages.
    pub fn connection_id(&self) -> ConnectionId {
        self.self_id
    }

    /// Enqueue `message` for every other connection in this handle's
    /// namespace (or every connection, including this one, if
    /// `include_self` is set). Returns the number of recipients.
    pub fn broadcast(&self, message: Message, include_self: bool) -> usize {
        let registry = self.registry.borrow();
        let mut outbox = self.outbox.borrow_mut();
        registry.broadcast(&self.namespace, self.self_id, include_self, |target| {
            outbox.push_back(PendingSend { target, message: message.clone() });
        })
    }

    /// Enqueue `message` for one specific connection, regardless of
    /// namespace membership.
    pub fn send_to(&self, target: ConnectionId, message: Message) {
        self.outbox.borrow_mut().push_back(PendingSend { target, message });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn broadcast_excludes_sender_by_default() {
        let mut reg = BroadcastRegistry::new();
        reg.join("room", ConnectionId(1));
        reg.join("room", ConnectionId(2));

        let mut recipients = Vec::new();
        let count = reg.broadcast("room", ConnectionId(1), false, |id| recipients.push(id));
        assert_eq!(count, 1);
        assert_eq!(recipients, vec![ConnectionId(2)]);
    }

    #[test]
    fn broadcast_includes_sender_when_requested() {
        let mut reg = BroadcastRegistry::new();
        reg.join("room", ConnectionId(1));
        reg.join("room", ConnectionId(2));

        let mut recipients = Vec::new();
        let count = reg.broadcast("room", ConnectionId(1), true, |id| recipients.push(id));
        assert_eq!(count, 2);
        assert!(recipients.contains(&ConnectionId(1)));
        assert!(recipients.contains(&ConnectionId(2)));
    }

    #[test]
    fn leave_all_removes_from_every_namespace() {
        let mut reg = BroadcastRegistry::new();
        reg.join("a", ConnectionId(1));
        reg.join("b", ConnectionId(1));
        reg.leave_all(ConnectionId(1));
        assert_eq!(reg.members("a").count(), 0);
        assert_eq!(reg.members("b").count(), 0);
    }

    #[test]
    fn handle_broadcast_enqueues_into_shared_outbox() {
        let registry = Rc::new(RefCell::new(BroadcastRegistry::new()));
        registry.borrow_mut().join("room", ConnectionId(1));
        registry.borrow_mut().join("room", ConnectionId(2));
        let outbox = Rc::new(RefCell::new(VecDeque::new()));

        let handle = BroadcastHandle::new("room".to_string(), ConnectionId(1), Rc::clone(&registry), Rc::clone(&outbox));
        let count = handle.broadcast(Message::text(bytes::BytesMut::from(&b"hi"[..])), false);
        assert_eq!(count, 1);

        let queued = outbox.borrow_mut().pop_front().unwrap();
        assert_eq!(queued.target, ConnectionId(2));
        assert_eq!(&queued.message.payload[..], b"hi");
    }

    #[test]
    fn unknown_namespace_has_no_members() {
        let reg = BroadcastRegistry::new();
        assert_eq!(reg.members("ghost").count(), 0);
    }
}
