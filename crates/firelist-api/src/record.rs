use serde::{Deserialize, Serialize};

use crate::query::EventKind;

/// Anything that carries a stable, unique key inside an ordered collection.
pub trait Keyed {
    fn key(&self) -> &str;
}

/// A keyed value held in an ordered collection.
///
/// The key is stable across updates; the payload may change. A `Null` payload
/// means the remote node does not exist (e.g. a per-key content lookup whose
/// target was never written).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub value: serde_json::Value,
}

impl Record {
    pub fn new(key: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// Whether the remote node backing this record exists.
    pub fn exists(&self) -> bool {
        !self.value.is_null()
    }
}

impl Keyed for Record {
    fn key(&self) -> &str {
        &self.key
    }
}

/// A per-child notification from an observable query.
///
/// `preceding_key` is the key of the sibling that must sit immediately before
/// the record once the event is applied; `None` means the record comes first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChildEvent {
    Added {
        record: Record,
        preceding_key: Option<String>,
    },
    Changed {
        record: Record,
        preceding_key: Option<String>,
    },
    Removed {
        record: Record,
        preceding_key: Option<String>,
    },
    Moved {
        record: Record,
        preceding_key: Option<String>,
    },
}

impl ChildEvent {
    /// Build the child event matching an observer's event kind.
    ///
    /// Returns `None` for `EventKind::Value`, which is not a child event.
    pub fn from_parts(
        kind: EventKind,
        record: Record,
        preceding_key: Option<String>,
    ) -> Option<Self> {
        match kind {
            EventKind::ChildAdded => Some(Self::Added {
                record,
                preceding_key,
            }),
            EventKind::ChildChanged => Some(Self::Changed {
                record,
                preceding_key,
            }),
            EventKind::ChildRemoved => Some(Self::Removed {
                record,
                preceding_key,
            }),
            EventKind::ChildMoved => Some(Self::Moved {
                record,
                preceding_key,
            }),
            EventKind::Value => None,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Added { .. } => EventKind::ChildAdded,
            Self::Changed { .. } => EventKind::ChildChanged,
            Self::Removed { .. } => EventKind::ChildRemoved,
            Self::Moved { .. } => EventKind::ChildMoved,
        }
    }

    pub fn record(&self) -> &Record {
        match self {
            Self::Added { record, .. }
            | Self::Changed { record, .. }
            | Self::Removed { record, .. }
            | Self::Moved { record, .. } => record,
        }
    }

    pub fn preceding_key(&self) -> Option<&str> {
        match self {
            Self::Added { preceding_key, .. }
            | Self::Changed { preceding_key, .. }
            | Self::Removed { preceding_key, .. }
            | Self::Moved { preceding_key, .. } => preceding_key.as_deref(),
        }
    }
}
