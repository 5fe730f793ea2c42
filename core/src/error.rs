//! The stable `{code, msg}` error envelope and the i18n/localization boundary.
//!
//! Three collaborators are out of scope for this crate and only their
//! interfaces are modeled here: the localization dictionary ([`Localizer`]),
//! the structured error taxonomy ([`Error`] itself), and HTTP error
//! middleware ([`Error::http_status`]). None of them carry translation
//! tables or a web framework dependency — just the boundary a real
//! implementation would plug into.

use std::fmt;

/// `QueueClosed` — the Queue facade's owning client has been closed.
pub const QUEUE_CLOSED: i32 = 20_001;
/// `TopicClosed` — the Topic has been closed; no further publishes or
/// Channel creation are accepted.
pub const TOPIC_CLOSED: i32 = 20_002;
/// `ChannelClosed` — the Channel has been closed; no further dequeues, acks,
/// or nacks are accepted.
pub const CHANNEL_CLOSED: i32 = 20_003;
/// `ChannelNotFound` — `GetChannel` was called with an unknown name.
pub const CHANNEL_NOT_FOUND: i32 = 20_004;
/// `NoMessage` — a non-blocking `TryNext` found nothing before its deadline.
pub const NO_MESSAGE: i32 = 20_005;

/// Generic/unclassified system error.
pub const SYSTEM: i32 = -1;
/// A caller-supplied parameter failed validation.
pub const INVALID_PARAM: i32 = 1_001;
/// The caller is not authenticated.
pub const NO_AUTH: i32 = 1_002;
/// The requested resource has no data.
pub const NO_DATA: i32 = 1_003;
/// The operation conflicts with existing state.
pub const CONFLICT: i32 = 1_004;

/// `400 Bad Request`.
pub const HTTP_BAD_REQUEST: i32 = 400;
/// `401 Unauthorized`.
pub const HTTP_UNAUTHORIZED: i32 = 401;
/// `403 Forbidden`.
pub const HTTP_FORBIDDEN: i32 = 403;
/// `404 Not Found`.
pub const HTTP_NOT_FOUND: i32 = 404;
/// `500 Internal Server Error`.
pub const HTTP_INTERNAL_SERVER_ERROR: i32 = 500;

/// Look up the canonical message registered for `code`, if any.
///
/// This is the static table consulted before falling back to a
/// [`Localizer`].
#[must_use]
pub fn registered_message(code: i32) -> Option<&'static str> {
    Some(match code {
        QUEUE_CLOSED => "queue closed",
        TOPIC_CLOSED => "topic closed",
        CHANNEL_CLOSED => "channel closed",
        CHANNEL_NOT_FOUND => "channel not found",
        NO_MESSAGE => "no message",
        SYSTEM => "system error",
        INVALID_PARAM => "invalid parameter",
        NO_AUTH => "not authenticated",
        NO_DATA => "no data",
        CONFLICT => "conflict",
        HTTP_BAD_REQUEST => "Bad Request",
        HTTP_UNAUTHORIZED => "Unauthorized",
        HTTP_FORBIDDEN => "Forbidden",
        HTTP_NOT_FOUND => "Not Found",
        HTTP_INTERNAL_SERVER_ERROR => "Internal Server Error",
        _ => return None,
    })
}

/// A structured error: an integer `code` plus a human-readable `msg`.
///
/// Equality is by `code` alone, since the message may be localized and
/// therefore differ between two otherwise identical errors.
#[derive(Clone, Debug)]
pub struct Error {
    /// The stable integer code.
    pub code: i32,
    /// A human-readable message, possibly localized.
    pub msg: String,
}

impl Error {
    /// Build an error for `code`, consulting `localizer` only when `code` is
    /// absent from the registered table.
    #[must_use]
    pub fn new(code: i32, langs: &[&str], localizer: Option<&dyn Localizer>) -> Self {
        if let Some(msg) = registered_message(code) {
            return Self {
                code,
                msg: msg.to_string(),
            };
        }
        let msg = localizer
            .and_then(|l| l.localize(code, langs))
            .unwrap_or_else(|| format!("unknown error code {code}"));
        Self { code, msg }
    }

    /// Build an error for `code` using only the registered table (no
    /// localizer, no extra languages) — the common case for internal
    /// plumbing where a caller's locale isn't available.
    #[must_use]
    pub fn plain(code: i32) -> Self {
        Self::new(code, &[], None)
    }

    /// `TopicClosed`.
    #[must_use]
    pub fn topic_closed() -> Self {
        Self::plain(TOPIC_CLOSED)
    }

    /// `ChannelClosed`.
    #[must_use]
    pub fn channel_closed() -> Self {
        Self::plain(CHANNEL_CLOSED)
    }

    /// `ChannelNotFound`.
    #[must_use]
    pub fn channel_not_found() -> Self {
        Self::plain(CHANNEL_NOT_FOUND)
    }

    /// `NoMessage`.
    #[must_use]
    pub fn no_message() -> Self {
        Self::plain(NO_MESSAGE)
    }

    /// `QueueClosed`.
    #[must_use]
    pub fn queue_closed() -> Self {
        Self::plain(QUEUE_CLOSED)
    }

    /// Wrap an arbitrary backend failure as a `SYSTEM` error, preserving
    /// `cause`'s message.
    #[must_use]
    pub fn backend(cause: impl fmt::Display) -> Self {
        Self {
            code: SYSTEM,
            msg: cause.to_string(),
        }
    }

    /// The HTTP status this error maps to, for the (out-of-scope) HTTP error
    /// middleware boundary: registered HTTP codes map to themselves,
    /// everything else maps to 500.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self.code {
            HTTP_BAD_REQUEST => 400,
            HTTP_UNAUTHORIZED => 401,
            HTTP_FORBIDDEN => 403,
            HTTP_NOT_FOUND => 404,
            _ => 500,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code:{},msg:{}", self.code, self.msg)
    }
}

impl std::error::Error for Error {}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

impl Eq for Error {}

/// Translates an error code into a localized message.
///
/// This is the entire i18n collaborator's interface: no bundled dictionary,
/// no dependency on a translation crate. A real deployment injects an
/// implementation backed by whatever message-catalog format it prefers.
pub trait Localizer: Send + Sync {
    /// Look up a message for `code` in the first of `langs` that has one.
    ///
    /// Returns `None` if no supplied language has a translation for `code`.
    fn localize(&self, code: i32, langs: &[&str]) -> Option<String>;
}

/// A normalized language tag.
///
/// A handful of Chinese-locale prefixes are special-cased, everything else
/// falls back to lowercasing and keeping the primary subtag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lang {
    /// Generic Chinese, no script/region disambiguation (`zh-CN`).
    Chinese,
    /// Simplified Chinese (`zh-Hans`, `zh-CHS`).
    SimplifiedChinese,
    /// Traditional Chinese (`zh-HK`, `zh-TW`, `zh-MO`, `zh-SG`, `zh-CHT`).
    TraditionalChinese,
    /// Anything else, reduced to its lowercase primary subtag (e.g. `"en"`
    /// from `"en-US"`).
    Other(String),
}

impl Lang {
    /// Parse and normalize a language tag.
    #[must_use]
    pub fn parse(tag: &str) -> Self {
        let folded = tag.to_lowercase();
        match folded.as_str() {
            "zh-cn" => Self::Chinese,
            "zh-hans" | "zh-chs" => Self::SimplifiedChinese,
            "zh-hk" | "zh-tw" | "zh-mo" | "zh-sg" | "zh-cht" => Self::TraditionalChinese,
            _ => {
                let primary = folded.split(['-', '_']).next().unwrap_or(&folded);
                Self::Other(primary.to_string())
            }
        }
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chinese => write!(f, "zh"),
            Self::SimplifiedChinese => write!(f, "zh-Hans"),
            Self::TraditionalChinese => write!(f, "zh-Hant"),
            Self::Other(tag) => write!(f, "{tag}"),
        }
    }
}
