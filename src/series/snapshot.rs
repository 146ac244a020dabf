//! Versioned snapshots and the long-poll replication protocol types

use super::error::SyncError;
use super::point::{Kline, SeriesKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

/// Immutable copy of a source store's state at one serial.
///
/// `version` is the epoch of the store instance that produced it; `serial`
/// is the last mutation included. `items` is ordered by open time and holds
/// at most one revision per identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedSnapshot {
    /// The series this snapshot belongs to
    pub key: SeriesKey,
    /// Epoch marker of the producing store instance
    pub version: Uuid,
    /// Last serial included in this snapshot
    pub serial: u64,
    /// Points ordered by open time
    pub items: Vec<Kline>,
    /// Highest eviction cutoff this store instance has applied
    #[serde(default)]
    pub evicted_before: Option<i64>,
}

impl VersionedSnapshot {
    /// An empty snapshot at serial zero.
    pub fn empty(key: SeriesKey, version: Uuid) -> Self {
        Self {
            key,
            version,
            serial: 0,
            items: Vec::new(),
            evicted_before: None,
        }
    }

    /// Watermark a replica holds after applying this snapshot.
    #[must_use]
    #[inline]
    pub fn cursor(&self) -> ReplicationCursor {
        ReplicationCursor::new(self.version, self.serial)
    }

    /// Number of points in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the snapshot holds no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Hex-encoded SHA-256 over the serialized items.
    ///
    /// Two snapshots with equal checksums hold the same revisions in the same
    /// order, whatever their version and serial.
    pub fn items_checksum(&self) -> Result<String, SyncError> {
        checksum_of(&self.items)
    }

    /// Serializes the snapshot to JSON.
    pub fn to_json(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserializes a snapshot from JSON.
    pub fn from_json(data: &str) -> Result<Self, SyncError> {
        Ok(serde_json::from_str(data)?)
    }
}

/// Hex-encoded SHA-256 over the JSON form of a point sequence.
pub fn checksum_of(items: &[Kline]) -> Result<String, SyncError> {
    let payload = serde_json::to_vec(items)?;

    let mut hasher = Sha256::new();
    hasher.update(payload);

    let digest = hasher.finalize();
    Ok(digest.iter().map(|byte| format!("{byte:02x}")).collect())
}

/// The `(version, serial)` watermark a replica has observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationCursor {
    /// Last seen store epoch
    pub version: Uuid,
    /// Last seen serial within that epoch
    pub serial: u64,
}

impl ReplicationCursor {
    /// Create a new cursor.
    #[inline]
    pub fn new(version: Uuid, serial: u64) -> Self {
        Self { version, serial }
    }

    /// Cursor that matches no store epoch, forcing a full snapshot.
    #[must_use]
    pub fn unset() -> Self {
        Self::new(Uuid::nil(), 0)
    }

    /// First serial the holder has not yet observed.
    #[must_use]
    #[inline]
    pub fn next_serial(&self) -> u64 {
        self.serial.saturating_add(1)
    }
}

/// A point revision together with the serial the store assigned to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    /// Serial of this revision
    pub serial: u64,
    /// The point itself
    pub point: Kline,
}

/// Response to a long-poll for changes.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeSet {
    /// The caller's epoch is stale: replace local state wholesale.
    Snapshot(Arc<VersionedSnapshot>),

    /// Current revisions of every point whose serial is in
    /// `from_serial..=to_serial`, ordered by serial.
    Delta {
        /// Store epoch
        version: Uuid,
        /// First serial requested
        from_serial: u64,
        /// Current store serial
        to_serial: u64,
        /// Revisions whose current serial falls in the range
        points: Vec<Revision>,
    },

    /// Nothing changed before the long-poll deadline.
    Unchanged {
        /// Store epoch
        version: Uuid,
        /// Current store serial
        serial: u64,
    },
}

impl ChangeSet {
    /// Watermark the receiver holds after applying this change set.
    ///
    /// `Unchanged` keeps the caller's serial: a deadline never moves the
    /// cursor past what was actually delivered.
    #[must_use]
    pub fn cursor(&self, previous: ReplicationCursor) -> ReplicationCursor {
        match self {
            ChangeSet::Snapshot(snapshot) => snapshot.cursor(),
            ChangeSet::Delta {
                version,
                to_serial,
                ..
            } => ReplicationCursor::new(*version, *to_serial),
            ChangeSet::Unchanged { .. } => previous,
        }
    }

    /// Number of points carried.
    #[must_use]
    pub fn point_count(&self) -> usize {
        match self {
            ChangeSet::Snapshot(snapshot) => snapshot.items.len(),
            ChangeSet::Delta { points, .. } => points.len(),
            ChangeSet::Unchanged { .. } => 0,
        }
    }
}
