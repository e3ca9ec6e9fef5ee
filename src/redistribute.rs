use crate::Relation;
use std::collections::HashMap;
use std::hash::Hash;

/// The result of matching fetched records back onto the keys they answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redistribution<V> {
    /// One value per requested key, in the same order as the keys.
    pub values: Vec<V>,

    /// The number of records whose correlation key was not requested. These
    /// records are dropped.
    pub unmatched: usize,
}

impl<V> Redistribution<V> {
    pub fn into_values(self) -> Vec<V> {
        self.values
    }
}

/// Group `records` by the key returned by `key_of`, returning one value per
/// entry of `keys` in the same order. Keys without any records get the
/// relation's [`absent`](Relation::absent) value, and records for keys that
/// were never requested are ignored.
///
/// If a key appears more than once in `keys`, every position receives the
/// same value.
///
/// ```
/// # use cos_dataloader::{group_by_key, ToMany};
/// let keys = ["a", "b", "c"];
/// let records = vec![("c", 3), ("a", 1), ("a", 2)];
/// let grouped = group_by_key::<ToMany, _, _, _>(&keys, records, |(key, _)| *key);
///
/// assert_eq!(
///     grouped.values,
///     vec![vec![("a", 1), ("a", 2)], vec![], vec![("c", 3)]],
/// );
/// ```
pub fn group_by_key<Rel, K, R, KeyFn>(
    keys: &[K],
    records: impl IntoIterator<Item = R>,
    mut key_of: KeyFn,
) -> Redistribution<Rel::Output>
where
    Rel: Relation<R>,
    K: Hash + Eq,
    KeyFn: FnMut(&R) -> K,
{
    // Index of the first occurrence of each key
    let mut key_order: HashMap<&K, usize> = HashMap::with_capacity(keys.len());
    let first_positions: Vec<usize> = keys
        .iter()
        .enumerate()
        .map(|(ix, key)| *key_order.entry(key).or_insert(ix))
        .collect();

    let mut values: Vec<Rel::Output> = keys.iter().map(|_| Rel::absent()).collect();
    let mut unmatched = 0;
    for record in records {
        let key = key_of(&record);
        match key_order.get(&key) {
            Some(&ix) => Rel::push(&mut values[ix], record),
            None => unmatched += 1,
        }
    }

    for (ix, first_ix) in first_positions.into_iter().enumerate() {
        if ix != first_ix {
            values[ix] = values[first_ix].clone();
        }
    }

    Redistribution { values, unmatched }
}
