//! Tests for the serial-indexed point collection.

#[cfg(test)]
mod tests {
    use crate::series::index::SeriesIndex;
    use crate::series::point::{Interval, Kline, SeriesKey};
    use crate::series::tests::test_helpers::helpers::{MINUTE, key, kline};
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn new_index_starts_at_serial_zero() {
        let index = SeriesIndex::new(key());
        assert_eq!(index.current_serial(), 0);
        assert!(index.is_empty());
        assert!(index.replay(1, 10).is_empty());
    }

    #[test]
    fn every_insert_takes_the_next_serial() {
        let mut index = SeriesIndex::new(key());
        assert_eq!(index.insert(kline(0, 0)), 1);
        assert_eq!(index.insert(kline(MINUTE, 0)), 2);
        assert_eq!(index.insert(kline(0, 1)), 3);
        assert_eq!(index.current_serial(), 3);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn replacing_a_revision_drops_its_old_serial() {
        let mut index = SeriesIndex::new(key());
        index.insert(kline(0, 0));
        index.insert(kline(MINUTE, 0));
        index.insert(kline(0, 7));

        let replay = index.replay(1, 3);
        let serials: Vec<u64> = replay.iter().map(|r| r.serial).collect();
        assert_eq!(serials, vec![2, 3]);
        assert_eq!(replay[1].point.close, 107.0);
        assert_eq!(index.serial_of(&kline(0, 0).id()), Some(3));
        index.assert_consistent();
    }

    #[test]
    fn replay_of_inverted_range_is_empty() {
        let mut index = SeriesIndex::new(key());
        index.insert(kline(0, 0));
        assert!(index.replay(2, 1).is_empty());
    }

    #[test]
    fn range_and_extremes_follow_open_time() {
        let mut index = SeriesIndex::new(key());
        for open_time in [3 * MINUTE, MINUTE, 2 * MINUTE] {
            index.insert(kline(open_time, 0));
        }
        assert_eq!(index.min().map(|p| p.open_time), Some(MINUTE));
        assert_eq!(index.max().map(|p| p.open_time), Some(3 * MINUTE));
        let from: Vec<i64> = index.range_from(2 * MINUTE).map(|p| p.open_time).collect();
        assert_eq!(from, vec![2 * MINUTE, 3 * MINUTE]);
    }

    #[test]
    fn evict_before_removes_only_older_points() {
        let mut index = SeriesIndex::new(key());
        for i in 0..5 {
            index.insert(kline(i * MINUTE, 0));
        }
        assert_eq!(index.evict_before(2 * MINUTE), 2);
        assert_eq!(index.len(), 3);
        assert_eq!(index.min().map(|p| p.open_time), Some(2 * MINUTE));
        assert_eq!(index.current_serial(), 5);
        index.assert_consistent();
    }

    #[test]
    fn remove_by_identity_of_other_key_is_ignored() {
        let mut index = SeriesIndex::new(key());
        index.insert(kline(0, 0));
        let foreign = Kline::new("ETHUSDT", Interval::OneMinute, 0).id();
        assert!(index.remove_by_identity(&foreign).is_none());
        assert!(index.remove_by_identity(&kline(0, 0).id()).is_some());
        assert!(index.is_empty());
        index.assert_consistent();
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(i64, i64),
        Remove(i64),
        Evict(i64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            6 => (0i64..20, 0i64..1_000).prop_map(|(slot, rev)| Op::Insert(slot, rev)),
            1 => (0i64..20).prop_map(Op::Remove),
            1 => (0i64..20).prop_map(Op::Evict),
        ]
    }

    proptest! {
        #[test]
        fn index_structures_stay_in_lock_step(ops in proptest::collection::vec(op(), 1..200)) {
            let mut index = SeriesIndex::new(SeriesKey::new("BTCUSDT", Interval::OneMinute));
            let mut last_serial = 0;

            for op in ops {
                match op {
                    Op::Insert(slot, rev) => {
                        let serial = index.insert(kline(slot * MINUTE, rev));
                        prop_assert!(serial > last_serial);
                        last_serial = serial;
                    }
                    Op::Remove(slot) => {
                        index.remove_by_identity(&kline(slot * MINUTE, 0).id());
                    }
                    Op::Evict(slot) => {
                        index.evict_before(slot * MINUTE);
                    }
                }
                index.assert_consistent();
                prop_assert_eq!(index.current_serial(), last_serial);
            }

            // One revision per identity, and a full replay yields exactly the live set.
            let live: Vec<i64> = index.items().map(|p| p.open_time).collect();
            let unique: HashSet<i64> = live.iter().copied().collect();
            prop_assert_eq!(unique.len(), live.len());

            let mut replayed: Vec<i64> = index
                .replay(1, index.current_serial())
                .into_iter()
                .map(|r| r.point.open_time)
                .collect();
            replayed.sort_unstable();
            prop_assert_eq!(replayed, live);
        }
    }
}
