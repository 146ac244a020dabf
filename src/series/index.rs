//! Ordered, serial-indexed point collection owned by a single writer.
//!
//! [`SeriesIndex`] keeps three structures in lock-step:
//!
//! - `items` — points ordered by open time (range queries, eviction from the
//!   low end)
//! - `point_to_serial` — identity to the serial of its current revision
//! - `serial_to_point` — serial to the identity it was assigned to
//!
//! Serials are assigned densely (`++current_serial`) on every insert or
//! replace. A replaced revision loses its old serial entry, so a serial
//! range replay always yields current revisions. Any disagreement between
//! the three structures is index corruption and panics.

use super::point::{Kline, KlineId, SeriesKey};
use super::snapshot::Revision;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use tracing::{error, trace};

/// Point collection for one series key.
#[derive(Debug, Clone)]
pub struct SeriesIndex {
    key: SeriesKey,
    items: BTreeMap<i64, Kline>,
    point_to_serial: HashMap<KlineId, u64>,
    serial_to_point: BTreeMap<u64, KlineId>,
    current_serial: u64,
}

impl SeriesIndex {
    /// Creates an empty index at serial zero.
    pub fn new(key: SeriesKey) -> Self {
        Self {
            key,
            items: BTreeMap::new(),
            point_to_serial: HashMap::new(),
            serial_to_point: BTreeMap::new(),
            current_serial: 0,
        }
    }

    /// The key every point in this index belongs to.
    #[must_use]
    pub fn key(&self) -> &SeriesKey {
        &self.key
    }

    /// Serial assigned to the most recent mutation (zero when none).
    #[must_use]
    #[inline]
    pub fn current_serial(&self) -> u64 {
        self.current_serial
    }

    /// Number of live points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the index holds no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Inserts a new revision and returns the serial assigned to it.
    ///
    /// An existing revision with the same identity is removed first, together
    /// with its serial entries. The caller must have checked that `point`
    /// belongs to this index's key.
    pub fn insert(&mut self, point: Kline) -> u64 {
        debug_assert!(point.belongs_to(&self.key));

        let id = point.id();
        if self.items.remove(&point.open_time).is_some() {
            self.unindex(&id);
        }

        self.current_serial += 1;
        let serial = self.current_serial;
        self.point_to_serial.insert(id.clone(), serial);
        self.serial_to_point.insert(serial, id);
        self.items.insert(point.open_time, point);

        trace!(key = %self.key, serial, "point indexed");
        serial
    }

    /// Removes the point with the given identity, if present.
    pub fn remove_by_identity(&mut self, id: &KlineId) -> Option<Kline> {
        if id.symbol != self.key.symbol || id.interval != self.key.interval {
            return None;
        }
        let removed = self.items.remove(&id.open_time)?;
        self.unindex(id);
        Some(removed)
    }

    /// Current revision at `open_time`.
    #[must_use]
    pub fn get(&self, open_time: i64) -> Option<&Kline> {
        self.items.get(&open_time)
    }

    /// Serial of the current revision of `id`.
    #[must_use]
    pub fn serial_of(&self, id: &KlineId) -> Option<u64> {
        self.point_to_serial.get(id).copied()
    }

    /// Point with the lowest open time.
    #[must_use]
    pub fn min(&self) -> Option<&Kline> {
        self.items.values().next()
    }

    /// Point with the highest open time.
    #[must_use]
    pub fn max(&self) -> Option<&Kline> {
        self.items.values().next_back()
    }

    /// Points with `open_time >= from`, ascending.
    pub fn range_from(&self, from: i64) -> impl DoubleEndedIterator<Item = &Kline> {
        self.items
            .range((Bound::Included(from), Bound::Unbounded))
            .map(|(_, point)| point)
    }

    /// All points, ascending by open time.
    pub fn items(&self) -> impl DoubleEndedIterator<Item = &Kline> {
        self.items.values()
    }

    /// Snapshot copy of all points, ascending by open time.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Kline> {
        self.items.values().cloned().collect()
    }

    /// Current revisions whose serial lies in `from..=to`, ordered by serial.
    #[must_use]
    pub fn replay(&self, from: u64, to: u64) -> Vec<Revision> {
        if from > to {
            return Vec::new();
        }
        self.serial_to_point
            .range(from..=to)
            .map(|(serial, id)| match self.items.get(&id.open_time) {
                Some(point) => Revision {
                    serial: *serial,
                    point: point.clone(),
                },
                None => invariant_violation(
                    &self.key,
                    &format!("serial {serial} maps to {id:?} which is not in items"),
                ),
            })
            .collect()
    }

    /// Removes every point with `open_time < cutoff`. Returns how many were
    /// removed.
    pub fn evict_before(&mut self, cutoff: i64) -> usize {
        let kept = self.items.split_off(&cutoff);
        let evicted = std::mem::replace(&mut self.items, kept);
        for point in evicted.values() {
            self.unindex(&point.id());
        }
        evicted.len()
    }

    /// Panics unless the three structures describe the same set of points.
    pub fn assert_consistent(&self) {
        if self.items.len() != self.point_to_serial.len()
            || self.items.len() != self.serial_to_point.len()
        {
            invariant_violation(
                &self.key,
                &format!(
                    "size mismatch: items {}, point_to_serial {}, serial_to_point {}",
                    self.items.len(),
                    self.point_to_serial.len(),
                    self.serial_to_point.len()
                ),
            );
        }
        for point in self.items.values() {
            let id = point.id();
            let Some(serial) = self.point_to_serial.get(&id) else {
                invariant_violation(&self.key, &format!("{id:?} has no serial"));
            };
            if self.serial_to_point.get(serial) != Some(&id) {
                invariant_violation(&self.key, &format!("serial {serial} does not map back"));
            }
            if *serial > self.current_serial {
                invariant_violation(&self.key, &format!("serial {serial} is in the future"));
            }
        }
    }

    fn unindex(&mut self, id: &KlineId) {
        let Some(serial) = self.point_to_serial.remove(id) else {
            invariant_violation(&self.key, &format!("{id:?} is live but has no serial"));
        };
        if self.serial_to_point.remove(&serial).is_none() {
            invariant_violation(
                &self.key,
                &format!("{id:?} held serial {serial} which has no reverse entry"),
            );
        }
    }
}

/// Index corruption: log loudly and bring down the owning actor.
#[cold]
#[inline(never)]
fn invariant_violation(key: &SeriesKey, detail: &str) -> ! {
    error!(key = %key, detail, "series index invariant violated");
    panic!("series index invariant violated for {key}: {detail}");
}
