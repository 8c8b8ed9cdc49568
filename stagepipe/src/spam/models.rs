//! Records flowing through the spam report pipeline.

use crate::stages::{Flagged, Identified};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A mailbox owner. Aliased addresses resolve to the same user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    /// Canonical user id.
    pub id: u64,
    /// Canonical email address.
    pub email: String,
}

impl User {
    /// Creates a new user.
    #[must_use]
    pub fn new(id: u64, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
        }
    }
}

impl Identified for User {
    type Key = u64;

    fn identity(&self) -> u64 {
        self.id
    }
}

/// Message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MsgId(pub u64);

impl fmt::Display for MsgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Spam verdict for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgData {
    /// The checked message.
    pub id: MsgId,
    /// Whether the message is spam.
    pub has_spam: bool,
}

impl MsgData {
    /// Creates a new verdict.
    #[must_use]
    pub const fn new(id: MsgId, has_spam: bool) -> Self {
        Self { id, has_spam }
    }
}

impl Flagged for MsgData {
    fn flag(&self) -> bool {
        self.has_spam
    }

    fn ordinal(&self) -> u64 {
        self.id.0
    }
}

/// Report line format: `"<has_spam> <id>"`.
impl fmt::Display for MsgData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.has_spam, self.id)
    }
}
