//! The backend-independent [`Topic`] contract.
//!
//! A `Topic<T>` is a named fan-out point: every [`Channel`](crate::channel::Channel)
//! attached to it receives an independent copy of each published
//! [`Message<T>`]. The trait is dyn-compatible — methods return
//! `Pin<Box<dyn Future<...> + Send + '_>>` instead of using `async fn` — so
//! the Queue facade can hand back `Arc<dyn Topic<T>>` regardless of which
//! backend built it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::channel::Channel;
use crate::config::TopicConfig;
use crate::error::Error;
use crate::message::Message;

/// A boxed, `Send` future — the return type every async `Topic`/`Channel`
/// method uses so the traits stay dyn-compatible.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Named fan-out point for messages of body type `T`.
///
/// In particular:
/// - Per-Channel publish failures are logged but never abort the fan-out —
///   the caller only sees a `TopicClosed` error if the Topic itself is
///   closed.
/// - `get_or_add_channel` is idempotent: a second call with the same name
///   returns the existing Channel and ignores the supplied config.
pub trait Topic<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// The Topic's name.
    fn name(&self) -> &str;

    /// Wrap `body` into a fresh [`Message`] (generated id, current
    /// timestamp) and fan it out to every attached Channel.
    fn publish(&self, body: T) -> BoxFuture<'_, Result<(), Error>>
    where
        T: Clone + 'static,
    {
        self.publish_msg(Message::new(body))
    }

    /// [`Self::publish`] for a batch of bodies. Empty batches succeed with no
    /// state change. Stops at the first failure.
    fn publish_batch(&self, bodies: Vec<T>) -> BoxFuture<'_, Result<(), Error>>
    where
        T: Clone + 'static,
    {
        self.publish_msg_batch(bodies.into_iter().map(Message::new).collect())
    }

    /// Fan out a caller-constructed [`Message`], after normalizing an empty
    /// id / zero timestamp. Fails with [`Error::topic_closed`] if the Topic
    /// is closed.
    fn publish_msg(&self, msg: Message<T>) -> BoxFuture<'_, Result<(), Error>>
    where
        T: Clone + 'static;

    /// [`Self::publish_msg`] for a batch. Empty batches succeed with no
    /// state change. Stops at the first failure.
    fn publish_msg_batch(&self, msgs: Vec<Message<T>>) -> BoxFuture<'_, Result<(), Error>>
    where
        T: Clone + 'static;

    /// Return the Channel named `name`, creating it with `cfg` if it
    /// doesn't exist yet. Idempotent: an existing Channel is returned as-is
    /// and `cfg` is ignored. Fails with [`Error::topic_closed`] after close.
    fn get_or_add_channel(
        &self,
        name: &str,
        cfg: TopicConfig,
    ) -> BoxFuture<'_, Result<Arc<dyn Channel<T>>, Error>>
    where
        T: Clone + 'static;

    /// Read-only lookup. Fails with [`Error::channel_not_found`] if absent.
    fn get_channel(&self, name: &str) -> BoxFuture<'_, Result<Arc<dyn Channel<T>>, Error>>
    where
        T: Clone + 'static;

    /// Snapshot of currently attached Channel names. Ordering is
    /// unspecified.
    fn channel_list(&self) -> BoxFuture<'_, Vec<String>>;

    /// Idempotently close the Topic and every Channel it owns. Errors
    /// closing individual Channels are logged, not propagated.
    fn close(&self) -> BoxFuture<'_, ()>;

    /// Whether the Topic has been closed.
    fn is_closed(&self) -> BoxFuture<'_, bool>;
}
