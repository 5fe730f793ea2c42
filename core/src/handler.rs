//! The consumer callback contract and the panic-trapping runner around it.
//!
//! A [`Channel::subscribe`](crate::channel::Channel::subscribe) loop invokes a
//! user-supplied [`Handler`] for every dequeued [`Message`]. The handler
//! returns a [`ProcessResult`] that tells the loop whether to ack or nack,
//! plus an optional [`Error`] that is logged either way. [`HandlerRunner`]
//! wraps that call so a panicking handler degrades to an ordinary error
//! outcome instead of tearing down the consumer loop.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;

use crate::error::Error;
use crate::message::Message;

/// What a [`Handler`] wants done with the message it was given.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcessResult {
    /// If `true`, the message should be redelivered (subject to
    /// `MaxRetries`); if `false`, it should be acked regardless of any
    /// accompanying error.
    pub retry: bool,
    /// If `true`, this delivery attempt does not count against
    /// `MaxRetries` — for transient backpressure retries that shouldn't
    /// burn a real retry budget.
    pub skip_attempts: bool,
}

impl ProcessResult {
    /// The message was handled successfully; ack it.
    #[must_use]
    pub const fn ack() -> Self {
        Self {
            retry: false,
            skip_attempts: false,
        }
    }

    /// The message failed and should be redelivered, counting against
    /// `MaxRetries`.
    #[must_use]
    pub const fn retry() -> Self {
        Self {
            retry: true,
            skip_attempts: false,
        }
    }

    /// The message failed for a transient reason that shouldn't consume a
    /// retry attempt.
    #[must_use]
    pub const fn retry_without_counting() -> Self {
        Self {
            retry: true,
            skip_attempts: true,
        }
    }
}

/// A future, boxed so it can be stored and invoked without knowing the
/// concrete handler type.
pub type HandlerFuture = Pin<Box<dyn Future<Output = (ProcessResult, Option<Error>)> + Send>>;

/// A consumer callback for messages of body type `T`.
///
/// Type alias over an `Arc<dyn Fn(...) -> HandlerFuture>` so a single handler
/// value can be cloned cheaply and shared across the concurrency-gated tasks
/// a `Subscribe` loop spawns.
pub type Handler<T> = Arc<dyn Fn(Message<T>) -> HandlerFuture + Send + Sync>;

/// Invokes a [`Handler`], converting a panic into an ordinary error outcome.
///
/// No retries, no logging policy of its own (the caller logs using the
/// `Error` it gets back) — just panic containment, because a user callback
/// must never be able to crash a `Subscribe` loop.
pub struct HandlerRunner;

impl HandlerRunner {
    /// Run `handler(msg)`, trapping any panic.
    ///
    /// On a panic, returns `(ProcessResult::ack(), Some(err))` where `err`
    /// carries the formatted panic payload — a panicking handler's message
    /// is acked (dropped) after logging, the same as any other default
    /// `ProcessResult`, rather than redelivered.
    pub async fn run<T>(handler: &Handler<T>, msg: Message<T>) -> (ProcessResult, Option<Error>) {
        let fut = AssertUnwindSafe(handler(msg));
        match fut.catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let payload = panic_message(&panic);
                tracing::error!(panic = %payload, "handler panicked");
                (
                    ProcessResult::ack(),
                    Some(Error::backend(format!("handler panicked: {payload}"))),
                )
            }
        }
    }
}

/// Best-effort extraction of a human-readable message from a panic payload.
fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
