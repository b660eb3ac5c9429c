use geodispatch_core::{Coordinates, ResultRecord, RowIndex};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Index-addressed table of computed coordinates.
///
/// Writes replace the whole entry for an index under the write lock, so a
/// snapshot never sees half of a record. Writing an index twice keeps the
/// last value.
#[derive(Default)]
pub struct ResultStore {
    records: RwLock<BTreeMap<RowIndex, Option<Coordinates>>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, index: RowIndex, coordinates: Option<Coordinates>) {
        self.records.write().insert(index, coordinates);
    }

    /// Load records carried over from a previous run
    pub fn seed(&self, records: impl IntoIterator<Item = ResultRecord>) -> usize {
        let mut table = self.records.write();
        let before = table.len();
        for record in records {
            table.insert(record.index, record.coordinates);
        }
        table.len() - before
    }

    pub fn get(&self, index: RowIndex) -> Option<ResultRecord> {
        self.records
            .read()
            .get(&index)
            .map(|coordinates| ResultRecord::new(index, *coordinates))
    }

    /// Whether the index has a record with both coordinates
    pub fn has_coordinates(&self, index: RowIndex) -> bool {
        matches!(self.records.read().get(&index), Some(Some(_)))
    }

    /// All records ordered by index
    pub fn snapshot(&self) -> Vec<ResultRecord> {
        self.records
            .read()
            .iter()
            .map(|(index, coordinates)| ResultRecord::new(*index, *coordinates))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn coords(lat: f64, lon: f64) -> Option<Coordinates> {
        Some(Coordinates::new(lat, lon).unwrap())
    }

    #[test]
    fn test_record_and_snapshot_order() {
        let store = ResultStore::new();
        store.record(2, coords(14.0, 36.0));
        store.record(0, coords(12.0, 34.0));
        store.record(1, None);

        let snapshot = store.snapshot();
        let indices: Vec<_> = snapshot.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(snapshot[0].latitude(), Some(12.0));
        assert_eq!(snapshot[1].coordinates, None);
    }

    #[test]
    fn test_overwrite_keeps_last() {
        let store = ResultStore::new();
        store.record(5, coords(1.0, 2.0));
        store.record(5, coords(3.0, 4.0));

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(5).unwrap().latitude(), Some(3.0));
    }

    #[test]
    fn test_seed_and_has_coordinates() {
        let store = ResultStore::new();
        let added = store.seed(vec![
            ResultRecord::new(0, coords(1.0, 1.0)),
            ResultRecord::new(3, None),
        ]);

        assert_eq!(added, 2);
        assert!(store.has_coordinates(0));
        assert!(!store.has_coordinates(3));
        assert!(!store.has_coordinates(7));
    }

    proptest! {
        /// Property: concurrent writers on distinct indices never clobber each other.
        #[test]
        fn prop_concurrent_distinct_writers(
            values in prop::collection::vec((-90.0f64..90.0, -180.0f64..180.0), 1..32)
        ) {
            let store = Arc::new(ResultStore::new());

            let handles: Vec<_> = values
                .iter()
                .copied()
                .enumerate()
                .map(|(index, (lat, lon))| {
                    let store = store.clone();
                    std::thread::spawn(move || {
                        store.record(index, Some(Coordinates::new(lat, lon).unwrap()));
                        // Readers running alongside writers only see whole records
                        for record in store.snapshot() {
                            assert_eq!(record.latitude().is_some(), record.longitude().is_some());
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            prop_assert_eq!(store.len(), values.len());
            for (index, (lat, lon)) in values.iter().enumerate() {
                let record = store.get(index).unwrap();
                prop_assert_eq!(record.latitude(), Some(*lat));
                prop_assert_eq!(record.longitude(), Some(*lon));
            }
        }
    }
}
