//! Per-connection dispatcher: passive observers plus the pending-request
//! table.
//!
//! Each [`ServerConnection`](crate::ServerConnection) owns exactly one
//! dispatcher behind a short-lived lock. The lock is never held while user
//! code runs: callers take a snapshot of the handlers they need, release the
//! lock, then invoke them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use kelimelik_protocol::Packet;
use tokio::sync::oneshot;

use crate::pending::{PendingKey, PendingTable};

/// A passive packet observer.
pub type Handler = Arc<dyn Fn(&Packet) + Send + Sync>;

/// Runs once when the connection closes.
pub(crate) type CloseHandler = Box<dyn FnOnce() + Send>;

/// What an observer is subscribed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Every dispatched incoming packet.
    All,
    /// Incoming packets with exactly this header.
    Header(String),
    /// Every packet this side is about to write.
    Outgoing,
}

impl Topic {
    pub fn header(header: impl Into<String>) -> Self {
        Self::Header(header.into())
    }
}

/// Identifies a registered observer so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obs-{}", self.0)
    }
}

/// One outstanding expectation: the headers that satisfy it and where to
/// deliver the packet.
pub(crate) struct Registration {
    headers: Vec<String>,
    reply: oneshot::Sender<Packet>,
}

impl Registration {
    fn accepts(&self, header: &str) -> bool {
        self.headers.iter().any(|h| h == header)
    }
}

#[derive(Default)]
pub(crate) struct Dispatcher {
    all: Vec<(ObserverId, Handler)>,
    by_header: HashMap<String, Vec<(ObserverId, Handler)>>,
    outgoing: Vec<(ObserverId, Handler)>,
    on_close: Vec<CloseHandler>,
    pending: PendingTable<Registration>,
    next_observer: u64,
    closed: bool,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn observe(&mut self, topic: Topic, handler: Handler) -> ObserverId {
        self.next_observer += 1;
        let id = ObserverId(self.next_observer);
        match topic {
            Topic::All => self.all.push((id, handler)),
            Topic::Header(header) => self.by_header.entry(header).or_default().push((id, handler)),
            Topic::Outgoing => self.outgoing.push((id, handler)),
        }
        id
    }

    pub(crate) fn unobserve(&mut self, id: ObserverId) -> bool {
        fn remove(list: &mut Vec<(ObserverId, Handler)>, id: ObserverId) -> bool {
            let before = list.len();
            list.retain(|(existing, _)| *existing != id);
            list.len() != before
        }

        if remove(&mut self.all, id) || remove(&mut self.outgoing, id) {
            return true;
        }
        let mut found = false;
        self.by_header.retain(|_, list| {
            found |= remove(list, id);
            !list.is_empty()
        });
        found
    }

    /// Handlers for an incoming packet: `All` observers first, then the
    /// header-specific ones, each in subscription order.
    pub(crate) fn incoming_handlers(&self, header: &str) -> Vec<Handler> {
        let specific = self.by_header.get(header).into_iter().flatten();
        self.all
            .iter()
            .chain(specific)
            .map(|(_, handler)| Arc::clone(handler))
            .collect()
    }

    pub(crate) fn outgoing_handlers(&self) -> Vec<Handler> {
        self.outgoing
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect()
    }

    /// Records an expectation. Returns `None` once the dispatcher is closed.
    pub(crate) fn register(
        &mut self,
        headers: Vec<String>,
    ) -> Option<(PendingKey, oneshot::Receiver<Packet>)> {
        if self.closed {
            return None;
        }
        let (reply, rx) = oneshot::channel();
        let key = self.pending.insert(Registration { headers, reply });
        Some((key, rx))
    }

    pub(crate) fn deregister(&mut self, key: PendingKey) -> bool {
        self.pending.remove(key).is_some()
    }

    /// Completes and removes every registration that accepts the packet's
    /// header, all in one pass. Returns how many were completed.
    pub(crate) fn resolve(&mut self, packet: &Packet) -> usize {
        let matched = self.pending.drain_matching(|r| r.accepts(&packet.header));
        let count = matched.len();
        for registration in matched {
            // The receiver may be mid-drop; nothing is waiting then.
            let _ = registration.reply.send(packet.clone());
        }
        count
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of registrations that a packet with `header` would complete.
    pub(crate) fn pending_for(&self, header: &str) -> usize {
        self.pending.iter().filter(|r| r.accepts(header)).count()
    }

    /// Queues a close handler. Hands it back if the dispatcher is already
    /// closed so the caller can run it immediately.
    pub(crate) fn on_close(&mut self, handler: CloseHandler) -> Option<CloseHandler> {
        if self.closed {
            return Some(handler);
        }
        self.on_close.push(handler);
        None
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Marks the dispatcher closed. Every pending registration is dropped,
    /// which rejects its expectation. Returns the number of rejected
    /// registrations and the close handlers to run.
    pub(crate) fn close(&mut self) -> (usize, Vec<CloseHandler>) {
        if self.closed {
            return (0, Vec::new());
        }
        self.closed = true;
        let abandoned = self.pending.drain_all().len();
        (abandoned, std::mem::take(&mut self.on_close))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn headers(list: &[&str]) -> Vec<String> {
        list.iter().map(|h| h.to_string()).collect()
    }

    fn counter() -> (Arc<AtomicUsize>, Handler) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, Arc::new(move |_: &Packet| {
            c.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_fan_out_completes_every_matching_registration() {
        let mut d = Dispatcher::new();
        let (_, mut x1) = d.register(headers(&["X"])).unwrap();
        let (_, mut x2) = d.register(headers(&["X"])).unwrap();
        let (_, mut y) = d.register(headers(&["Y"])).unwrap();

        let packet = Packet::new("X").value(1);
        assert_eq!(d.resolve(&packet), 2);

        assert_eq!(x1.try_recv().unwrap(), packet);
        assert_eq!(x2.try_recv().unwrap(), packet);
        assert!(y.try_recv().is_err());
        assert_eq!(d.pending_for("X"), 0);
        assert_eq!(d.pending_for("Y"), 1);
    }

    #[test]
    fn test_mixed_header_sets() {
        let mut d = Dispatcher::new();
        let (_, mut only_x) = d.register(headers(&["X"])).unwrap();
        let (_, mut only_y) = d.register(headers(&["Y"])).unwrap();
        let (_, mut x_or_y) = d.register(headers(&["X", "Y"])).unwrap();

        assert_eq!(d.resolve(&Packet::new("Y")), 2);

        assert!(only_x.try_recv().is_err());
        assert_eq!(only_y.try_recv().unwrap().header, "Y");
        assert_eq!(x_or_y.try_recv().unwrap().header, "Y");
        assert_eq!(d.pending_len(), 1);
        assert_eq!(d.pending_for("X"), 1);
    }

    #[test]
    fn test_deregister_removes_entry() {
        let mut d = Dispatcher::new();
        let (key, _rx) = d.register(headers(&["X"])).unwrap();
        assert!(d.deregister(key));
        assert!(!d.deregister(key));
        assert_eq!(d.resolve(&Packet::new("X")), 0);
    }

    #[test]
    fn test_incoming_handlers_all_before_header() {
        let mut d = Dispatcher::new();
        let (_, specific) = counter();
        let (_, general) = counter();
        d.observe(Topic::header("X"), Arc::clone(&specific));
        d.observe(Topic::All, Arc::clone(&general));

        let handlers = d.incoming_handlers("X");
        assert_eq!(handlers.len(), 2);
        assert!(Arc::ptr_eq(&handlers[0], &general));
        assert!(Arc::ptr_eq(&handlers[1], &specific));
        assert_eq!(d.incoming_handlers("Y").len(), 1);
    }

    #[test]
    fn test_unobserve_each_topic() {
        let mut d = Dispatcher::new();
        let (_, h) = counter();
        let a = d.observe(Topic::All, Arc::clone(&h));
        let b = d.observe(Topic::header("X"), Arc::clone(&h));
        let c = d.observe(Topic::Outgoing, Arc::clone(&h));

        assert!(d.unobserve(b));
        assert!(d.incoming_handlers("X").len() == 1);
        assert!(d.unobserve(a));
        assert!(d.unobserve(c));
        assert!(!d.unobserve(c));
        assert!(d.incoming_handlers("X").is_empty());
        assert!(d.outgoing_handlers().is_empty());
    }

    #[test]
    fn test_close_rejects_pending_and_refuses_new() {
        let mut d = Dispatcher::new();
        let (_, mut rx) = d.register(headers(&["X"])).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        assert!(d.on_close(Box::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        })).is_none());

        let (abandoned, handlers) = d.close();
        assert_eq!(abandoned, 1);
        assert_eq!(handlers.len(), 1);
        handlers.into_iter().for_each(|h| h());
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        // Sender dropped: the receiver sees the channel closed.
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
        assert!(d.register(headers(&["X"])).is_none());
        assert_eq!(d.close().0, 0);
        assert!(d.on_close(Box::new(|| {})).is_some());
    }
}
