/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to identify things, and do not have any major "active" behavior.

use std::{
    borrow::Borrow,
    fmt::{self, Debug, Display, Formatter},
};

use serde::{Deserialize, Serialize};

/// Identifier of an [`Operation`](super::operation::Operation).
///
/// Operation IDs are opaque: they are chosen by the client that first submits an operation and are
/// compared by exact byte identity, without any Unicode normalization.
///
/// The empty `OpID` ([`OpID::none`]) is meaningful in two places:
/// 1. As a BasisID, it denotes the start of a model's log (i.e., "nothing seen yet").
/// 2. As a ParentID, it denotes that the client has not submitted any operation yet.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpID(String);

impl OpID {
    /// Create a new `OpID` wrapping `id`.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The empty `OpID`.
    pub const fn none() -> Self {
        Self(String::new())
    }

    /// Check whether this is the empty `OpID`.
    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the raw bytes of this `OpID`.
    pub fn bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for OpID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Debug for OpID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl From<&str> for OpID {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier of a model, i.e., of a single shared, collaboratively edited document.
///
/// Every model owns exactly one operation log.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelID(String);

impl ModelID {
    /// Create a new `ModelID` wrapping `id`.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ModelID {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Display for ModelID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Debug for ModelID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl From<&str> for ModelID {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier of a subscription, chosen by the client.
///
/// A `SubID` is only unique within the connection that created it. Two connections may use the same
/// `SubID` for unrelated subscriptions.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubID(String);

impl SubID {
    /// Create a new `SubID` wrapping `id`.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SubID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Debug for SubID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl From<&str> for SubID {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Process-unique number assigned by the [`Server`](crate::server::Server) to each registered
/// connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionID(u64);

impl ConnectionID {
    /// Create a new `ConnectionID` with an `int` value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the `u64` value of this `ConnectionID`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for ConnectionID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Position of an entry in a model's operation log.
///
/// Insertion order is logical time: the first entry appended to a log has position 0, and every
/// subsequent entry has the position of its predecessor plus 1. [`LogPosition::START`] sorts before
/// every entry and is the position of the empty BasisID.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogPosition(Option<u64>);

impl LogPosition {
    /// The position before the first entry of every log.
    pub const START: LogPosition = LogPosition(None);

    /// Create a new `LogPosition` for the entry at `index`.
    pub const fn new(index: u64) -> Self {
        Self(Some(index))
    }

    /// Get the index of the entry at this position, or `None` for [`LogPosition::START`].
    pub const fn index(&self) -> Option<u64> {
        self.0
    }

    /// Get the position of the entry that follows this position.
    pub fn next(&self) -> LogPosition {
        match self.0 {
            None => LogPosition::new(0),
            Some(index) => LogPosition::new(index + 1),
        }
    }
}

impl Display for LogPosition {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.0 {
            None => write!(f, "start"),
            Some(index) => Display::fmt(&index, f),
        }
    }
}

impl Debug for LogPosition {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// Durable sequence number assigned by a [`Journal`](crate::operation_log::pluggables::Journal) to
/// every raw operation it persists.
///
/// Journal sequence numbers form a per-model total order. Two client operations that race against
/// the same basis are committed in journal order: the one with the lower sequence number is appended
/// verbatim, and the other is transformed against it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JournalSequence(u64);

impl JournalSequence {
    /// Create a new `JournalSequence` with an `int` value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the `u64` value of this `JournalSequence`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for JournalSequence {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}
