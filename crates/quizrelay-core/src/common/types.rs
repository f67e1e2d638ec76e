//! # Correlation Types and Channel Naming
//!
//! This module defines the identifiers shared by every component of the
//! correlation layer and by the generation workers on the other side of the
//! backbone. Both sides must agree on channel names and on the meaning of
//! sequence positions, so these definitions are the contract between them.
//!
//! ## Overview
//!
//! - [`ClientIdentity`] - opaque correlation key attached to every message
//! - [`Family`] - the closed set of work families (questions, explanations)
//! - [`Channel`] - one worker-addressable request channel of a family
//! - [`SequenceMarker`] / [`CommittedPosition`] - publish and consumption
//!   positions used for queue estimation
//!
//! ## Channel names
//!
//! Request channels are numbered from 1 (`QuestionRequest1`,
//! `QuestionRequest2`, ...), while each family shares a single response
//! channel (`QuestionResponse`, `ExplanationResponse`) keyed by identity.

use core::fmt;
use std::sync::Arc;

/// Opaque per-requester correlation key (session id or account id).
///
/// Cloning is cheap: the underlying string is shared.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientIdentity(Arc<str>);

impl ClientIdentity {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientIdentity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ClientIdentity {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl AsRef<str> for ClientIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The two disjoint channel families served by the relay.
///
/// There is deliberately no catch-all variant: a family that is not listed
/// here cannot be named, so there is nothing to validate at runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Family {
    Question,
    Explanation,
}

impl Family {
    /// Every family, in a stable order.
    pub const ALL: [Self; 2] = [Self::Question, Self::Explanation];

    /// Lowercase label used in store keys, logs and metric attributes.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Question => "question",
            Self::Explanation => "explanation",
        }
    }

    /// Prefix shared by all request channels of this family.
    pub const fn request_prefix(self) -> &'static str {
        match self {
            Self::Question => "QuestionRequest",
            Self::Explanation => "ExplanationRequest",
        }
    }

    /// The single response channel workers of this family publish to.
    pub const fn response_topic(self) -> &'static str {
        match self {
            Self::Question => "QuestionResponse",
            Self::Explanation => "ExplanationResponse",
        }
    }

    /// Dense index, usable for per-family arrays.
    pub const fn index(self) -> usize {
        match self {
            Self::Question => 0,
            Self::Explanation => 1,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A worker-addressable request channel.
///
/// `index` is zero-based; the backbone name is one-based to match the worker
/// deployment (`QuestionRequest1` is index 0).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Channel {
    family: Family,
    index: usize,
}

impl Channel {
    pub const fn new(family: Family, index: usize) -> Self {
        Self { family, index }
    }

    pub const fn family(&self) -> Family {
        self.family
    }

    pub const fn index(&self) -> usize {
        self.index
    }

    /// Backbone topic name of this channel.
    pub fn name(&self) -> String {
        format!("{}{}", self.family.request_prefix(), self.index + 1)
    }

    /// Parses a backbone topic name back into a channel.
    ///
    /// Returns `None` for response topics, unknown prefixes and the
    /// non-existent channel number `0`.
    pub fn parse(name: &str) -> Option<Self> {
        Family::ALL.into_iter().find_map(|family| {
            let number: usize = name.strip_prefix(family.request_prefix())?.parse().ok()?;
            number.checked_sub(1).map(|index| Self::new(family, index))
        })
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.family.request_prefix(), self.index + 1)
    }
}

/// Backbone-assigned position of a published message on its channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SequenceMarker(pub u64);

impl SequenceMarker {
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Number of messages at or before this marker that the consumer group has
    /// not yet consumed, including this one.
    ///
    /// Computed as `marker - committed + 1`, saturating at zero once the
    /// message itself has been consumed. `None` when the commit position is
    /// unknown, which callers treat as "front of the queue".
    pub const fn messages_ahead(self, committed: CommittedPosition) -> Option<u64> {
        match committed {
            CommittedPosition::Unknown => None,
            CommittedPosition::At(offset) => Some((self.0 + 1).saturating_sub(offset)),
        }
    }
}

impl fmt::Display for SequenceMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A consumer group's durable consumption position on a channel.
///
/// `At(n)` follows the usual broker convention: `n` is the next offset the
/// group will read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum CommittedPosition {
    #[default]
    Unknown,
    At(u64),
}

impl CommittedPosition {
    pub const fn offset(self) -> Option<u64> {
        match self {
            Self::Unknown => None,
            Self::At(offset) => Some(offset),
        }
    }
}
