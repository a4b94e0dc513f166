//! The completion handle returned by `expect`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};

use kelimelik_protocol::Packet;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::ClientError;
use crate::dispatcher::Dispatcher;
use crate::pending::PendingKey;

/// Resolves to the first dispatched packet whose header is one of the
/// expected headers.
///
/// Completes exactly once. If the connection closes first it resolves to
/// [`ClientError::ConnectionClosed`].
///
/// Dropping an unresolved `Expectation` removes its registration, so racing
/// it against a timer never leaks an entry:
///
/// ```rust,ignore
/// match tokio::time::timeout(Duration::from_secs(5), conn.expect(["GameModule_playerStats"])).await {
///     Ok(reply) => handle(reply?),
///     Err(_) => tracing::warn!("no player stats within 5s"),
/// }
/// ```
#[must_use = "an expectation does nothing unless awaited"]
pub struct Expectation {
    reply: oneshot::Receiver<Packet>,
    key: Option<PendingKey>,
    dispatcher: Weak<Mutex<Dispatcher>>,
}

impl Expectation {
    pub(crate) fn registered(
        reply: oneshot::Receiver<Packet>,
        key: PendingKey,
        dispatcher: Weak<Mutex<Dispatcher>>,
    ) -> Self {
        Self {
            reply,
            key: Some(key),
            dispatcher,
        }
    }

    /// An expectation that is already rejected.
    pub(crate) fn rejected() -> Self {
        let (_, reply) = oneshot::channel();
        Self {
            reply,
            key: None,
            dispatcher: Weak::new(),
        }
    }
}

impl Future for Expectation {
    type Output = Result<Packet, ClientError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let result = match Pin::new(&mut this.reply).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(result) => result,
        };
        // Either way the dispatcher no longer holds our registration.
        this.key = None;
        Poll::Ready(result.map_err(|_| ClientError::ConnectionClosed))
    }
}

impl Drop for Expectation {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            if dispatcher.lock().deregister(key) {
                tracing::trace!("unresolved expectation dropped, registration removed");
            }
        }
    }
}

impl std::fmt::Debug for Expectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Expectation")
            .field("registered", &self.key.is_some())
            .finish()
    }
}
