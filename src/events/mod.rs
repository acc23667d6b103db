//! Envelope model and the publish seam into the host daemon's event bus.
//!
//! The envelope is the wrapper structure the minion daemon expects on its
//! internal bus: the actual payload records plus routing metadata. It is
//! constructed and immediately handed off, never retained.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Constants ───────────────────────────────────────────────────

/// Routing label that triggers the minion daemon to forward the envelope
/// to the master's event bus.
pub const FIRE_MASTER: &str = "fire_master";

/// Default filter tag stamped onto forwarded return records.
pub const THIRD_PARTY_TAG: &str = "third-party";

// ── Envelope ────────────────────────────────────────────────────

/// The package handed to the host's publish primitive.
///
/// `tag`, `pretag` and `data` are reserved for the host bus's routing
/// logic and stay `None` here. They serialize as explicit nulls — the
/// daemon expects the fields present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Ordered sequence of return records. Always a list, even for a
    /// single record: the master side only expands list-shaped payloads.
    pub events: Vec<Value>,
    pub tag: Option<String>,
    pub pretag: Option<String>,
    pub data: Option<Value>,
}

impl Envelope {
    /// Wrap a single return record.
    pub fn single(event: Value) -> Self {
        Self::batch(vec![event])
    }

    /// Wrap a list of return records in one envelope.
    pub fn batch(events: Vec<Value>) -> Self {
        Self {
            events,
            tag: None,
            pretag: None,
            data: None,
        }
    }
}

// ── Publish seam ────────────────────────────────────────────────

/// Host-provided event-publish primitive.
///
/// The host daemon owns the bus client — sockets, serialization, buffering.
/// Failures propagate unmodified to the caller; this crate does no retry
/// and no error translation.
pub trait EventPublisher: Send + Sync {
    fn fire_event(&self, package: &Envelope, label: &str) -> Result<()>;
}

// ── Tests ───────────────────────────────────────────────────────
