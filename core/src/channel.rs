//! The backend-independent [`Channel`] contract.
//!
//! A `Channel<T>` is the per-subscriber delivery queue belonging to one
//! [`Topic`](crate::topic::Topic): the unit of consumption, acknowledgement,
//! and concurrency. Like `Topic`, it is written dyn-compatible so the Queue
//! facade can return `Arc<dyn Channel<T>>` without the caller knowing which
//! backend built it.

use std::time::Duration;

use crate::error::Error;
use crate::handler::Handler;
use crate::message::Message;
use crate::topic::BoxFuture;

/// Per-subscriber delivery queue.
///
/// Backend-specific notes:
/// - **Memory**: `depth()` is always exact.
/// - **Redis Streams**: `depth()` is `XLEN + XPENDING.count`.
/// - **Kafka**: `depth()` always returns `-1` (cannot be computed cheaply);
///   `ack`/`nack` are no-ops since delivery is acknowledged via offset
///   commit, not by message id.
pub trait Channel<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// The Channel's name, constant for its lifetime.
    fn name(&self) -> &str;

    /// Block until a deliverable message exists or the Channel closes.
    /// Transitions the returned message to in-flight. Never returns
    /// `NoMessage` — in blocking mode there is no such thing as "none yet",
    /// only "none ever again" ([`Error::channel_closed`]).
    fn next(&self) -> BoxFuture<'_, Result<Message<T>, Error>>;

    /// Non-blocking (`timeout == Duration::ZERO`) or bounded-wait variant of
    /// [`Self::next`]. Returns [`Error::no_message`] on timeout,
    /// [`Error::channel_closed`] if the Channel closes while waiting.
    fn try_next(&self, timeout: Duration) -> BoxFuture<'_, Result<Message<T>, Error>>;

    /// Start a background consumer loop invoking `handler` for every
    /// message this Channel delivers, gated by a concurrency cap of
    /// `MaxInFlight` simultaneous handler invocations. At most one active
    /// subscription per Channel — calling this again while one is already
    /// running is a no-op. Fetch is serialized, handler execution is
    /// parallel up to the concurrency cap, panics are contained, and the
    /// loop drains in-flight handlers before stopping on close.
    fn subscribe(&self, handler: Handler<T>) -> BoxFuture<'_, Result<(), Error>>;

    /// Positively acknowledge `id`. Idempotent on the memory backend;
    /// fails with [`Error::channel_closed`] after close.
    fn ack(&self, id: &str) -> BoxFuture<'_, Result<(), Error>>;

    /// Negatively acknowledge `id`: re-enqueue a fresh copy with
    /// `attempts + 1`. Fails with [`Error::channel_closed`] after close.
    fn nack(&self, id: &str) -> BoxFuture<'_, Result<(), Error>>;

    /// Queued-plus-in-flight message count, or `-1` when the backend can't
    /// compute it cheaply.
    fn depth(&self) -> BoxFuture<'_, i64>;

    /// Terminate the consumer loop and release backend resources.
    /// Double-close is a no-op on the memory backend and
    /// [`Error::channel_closed`] on broker-backed channels.
    fn close(&self) -> BoxFuture<'_, Result<(), Error>>;

    /// Whether the Channel has been closed.
    fn is_closed(&self) -> BoxFuture<'_, bool>;
}
