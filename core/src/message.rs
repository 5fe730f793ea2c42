//! The envelope every published payload travels in.
//!
//! [`Message<T>`] is deliberately dumb: it carries an id, a body, a couple of
//! unix-second timestamps, an attempt counter, and the name of the [`Channel`]
//! it belongs to. Every backend (memory, Redis Streams, Kafka) constructs,
//! serializes, and mutates the same shape; only the wire encoding differs.
//!
//! [`Channel`]: crate::channel::Channel

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a new message id.
///
/// Uses UUIDv7, which embeds a millisecond timestamp in its most significant
/// bits, so ids sort lexicographically by creation time the same way a ULID
/// would (spec requirement: "ULID preferred for lexicographic time order").
#[must_use]
pub fn new_message_id() -> String {
    Uuid::now_v7().to_string()
}

/// Current unix time in whole seconds.
///
/// # Panics
///
/// Never: the system clock is assumed to be after the Unix epoch, which holds
/// on every supported target.
#[must_use]
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A single delivery of a payload, fanned out from a [`Topic`] to one
/// [`Channel`].
///
/// Each `Channel` that was attached to a `Topic` at publish time receives its
/// own independently-owned `Message<T>` (the fan-out clones the body), so
/// mutating the attempt count on one Channel's copy has no effect on any
/// sibling's copy.
///
/// [`Topic`]: crate::topic::Topic
/// [`Channel`]: crate::channel::Channel
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message<T> {
    /// Globally unique id. Generated at publish time if the caller left it
    /// empty.
    pub id: String,

    /// The payload.
    pub body: T,

    /// Unix-seconds production timestamp. Filled with [`now_unix`] if the
    /// caller left it zero.
    pub timestamp: u64,

    /// Unix-seconds absolute deadline. `0` means "never expires".
    pub expires_at: u64,

    /// Number of delivery attempts so far. `0` on first delivery.
    pub attempts: u32,

    /// Name of the [`Channel`] this copy belongs to. Empty until fan-out
    /// assigns it.
    ///
    /// [`Channel`]: crate::channel::Channel
    #[serde(default)]
    pub channel: String,
}

impl<T> Message<T> {
    /// Wrap a body into a brand-new message: empty id and zero timestamp are
    /// filled in, `expires_at` defaults to never, `attempts` to zero.
    #[must_use]
    pub fn new(body: T) -> Self {
        Self {
            id: new_message_id(),
            body,
            timestamp: now_unix(),
            expires_at: 0,
            attempts: 0,
            channel: String::new(),
        }
    }

    /// Normalize a caller-supplied message before publishing: an empty id
    /// is generated, a zero timestamp is filled with [`now_unix`].
    /// `expires_at` and `attempts` are left exactly as given.
    #[must_use]
    pub fn normalize(mut self) -> Self {
        if self.id.is_empty() {
            self.id = new_message_id();
        }
        if self.timestamp == 0 {
            self.timestamp = now_unix();
        }
        self
    }

    /// Whether this message is past its deadline, as of `now`.
    ///
    /// A message with `expires_at == 0` never expires.
    #[must_use]
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at != 0 && now > self.expires_at
    }

    /// Whether this message is past its deadline right now.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_unix())
    }

    /// Return a clone of this message addressed to `channel`, with
    /// `attempts` reset to zero — the shape fan-out hands to each attached
    /// Channel.
    #[must_use]
    pub fn fanned_out_to(&self, channel: &str) -> Self
    where
        T: Clone,
    {
        Self {
            id: self.id.clone(),
            body: self.body.clone(),
            timestamp: self.timestamp,
            expires_at: self.expires_at,
            attempts: self.attempts,
            channel: channel.to_string(),
        }
    }

    /// Return a clone of this message with `attempts` incremented and a
    /// fresh id — the shape a negative acknowledgement republishes as a new
    /// delivery attempt.
    #[must_use]
    pub fn redelivered(&self) -> Self
    where
        T: Clone,
    {
        Self {
            id: new_message_id(),
            body: self.body.clone(),
            timestamp: self.timestamp,
            expires_at: self.expires_at,
            attempts: self.attempts + 1,
            channel: self.channel.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_fills_id_and_timestamp() {
        let msg = Message::new("hello");
        assert!(!msg.id.is_empty());
        assert!(msg.timestamp > 0);
        assert_eq!(msg.attempts, 0);
        assert_eq!(msg.expires_at, 0);
    }

    #[test]
    fn normalize_keeps_caller_supplied_id() {
        let msg = Message {
            id: "caller-id".to_string(),
            body: 1,
            timestamp: 42,
            expires_at: 0,
            attempts: 0,
            channel: String::new(),
        }
        .normalize();
        assert_eq!(msg.id, "caller-id");
        assert_eq!(msg.timestamp, 42);
    }

    #[test]
    fn normalize_fills_empty_id_and_zero_timestamp() {
        let msg = Message {
            id: String::new(),
            body: 1,
            timestamp: 0,
            expires_at: 0,
            attempts: 0,
            channel: String::new(),
        }
        .normalize();
        assert!(!msg.id.is_empty());
        assert!(msg.timestamp > 0);
    }

    #[test]
    fn expiry_is_never_when_zero() {
        let msg = Message::new(1);
        assert!(!msg.is_expired_at(u64::MAX));
    }

    #[test]
    fn expiry_fires_strictly_after_deadline() {
        let mut msg = Message::new(1);
        msg.expires_at = 100;
        assert!(!msg.is_expired_at(100));
        assert!(msg.is_expired_at(101));
    }

    #[test]
    fn fan_out_clone_is_independent() {
        let msg = Message::new(vec![1, 2, 3]);
        let mut a = msg.fanned_out_to("a");
        let b = msg.fanned_out_to("b");
        a.body.push(4);
        assert_eq!(a.channel, "a");
        assert_eq!(b.channel, "b");
        assert_eq!(b.body, vec![1, 2, 3]);
        assert_ne!(a.body, b.body);
    }

    #[test]
    fn redelivered_bumps_attempts_and_reissues_id() {
        let msg = Message::new(1);
        let again = msg.redelivered();
        assert_eq!(again.attempts, 1);
        assert_ne!(again.id, msg.id);
        assert_eq!(again.channel, msg.channel);
    }
}
