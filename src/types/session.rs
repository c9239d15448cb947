use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::types::Message;
use crate::utils::time::{date_stamp, now, unix_millis};

/// Titles longer than this many characters are shortened.
pub const MAX_TITLE_CHARS: usize = 50;

const ELLIPSIS: &str = "...";

static LAST_ISSUED_ID: AtomicU64 = AtomicU64::new(0);

/// Identifier of a saved conversation.
///
/// Ids are wall-clock milliseconds, bumped when needed so that every id
/// issued by this process is strictly greater than the previous one.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    /// Wrap a raw id, e.g. one parsed from user input.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Issue a fresh id based on the current time.
    pub fn generate() -> Self {
        Self::generate_at(unix_millis(now()))
    }

    fn generate_at(millis: u64) -> Self {
        let mut current = LAST_ISSUED_ID.load(Ordering::Relaxed);
        loop {
            let next = millis.max(current.saturating_add(1));
            match LAST_ISSUED_ID.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Self(next),
                Err(observed) => current = observed,
            }
        }
    }

    /// The raw numeric id.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(SessionId)
    }
}

/// A saved, named conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    /// Immutable identifier.
    pub id: SessionId,

    /// Display title, usually derived from the first user message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// The turns of the conversation, oldest first.
    pub messages: Vec<Message>,

    /// When the session was first saved.
    #[serde(with = "crate::utils::time")]
    pub created_at: OffsetDateTime,

    /// When the session was last changed; never earlier than `created_at`.
    #[serde(with = "crate::utils::time")]
    pub updated_at: OffsetDateTime,
}

impl Session {
    /// Create a new `Session` holding `messages`, titled from its first user turn.
    pub fn new(id: SessionId, messages: Vec<Message>) -> Self {
        let created_at = now();
        Self {
            id,
            title: Some(derive_title(&messages)),
            messages,
            created_at,
            updated_at: created_at,
        }
    }

    /// Replace the messages and bump `updated_at`.
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.touch();
    }

    /// Rename the session and bump `updated_at`.
    pub fn rename(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
        self.touch();
    }

    /// The title to show, falling back to a derived one.
    pub fn display_title(&self) -> String {
        match &self.title {
            Some(title) => title.clone(),
            None => derive_title(&self.messages),
        }
    }

    fn touch(&mut self) {
        self.updated_at = now().max(self.created_at);
    }
}

/// Derive a session title from the first user message.
///
/// The text is trimmed; anything longer than [`MAX_TITLE_CHARS`] characters
/// is cut to 47 characters plus `"..."`. Without a user message the title is
/// `"Chat <date>"`.
pub fn derive_title(messages: &[Message]) -> String {
    let Some(first) = messages.iter().find(|m| m.is_user()) else {
        return format!("Chat {}", date_stamp(now()));
    };
    let text = first.text.trim();
    if text.chars().count() > MAX_TITLE_CHARS {
        let keep = MAX_TITLE_CHARS - ELLIPSIS.len();
        let mut title: String = text.chars().take(keep).collect();
        title.push_str(ELLIPSIS);
        title
    } else {
        text.to_string()
    }
}
