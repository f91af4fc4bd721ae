//! Record grouping and duplicate detection
//!
//! A single O(n) pass partitions records into an order-preserving
//! multi-map: every record lands in exactly one group, and groups iterate
//! in first-seen key order. Purely computational; safe to call from
//! multiple workers on disjoint inputs.

use std::collections::HashMap;

/// An order-preserving multi-map of grouped items.
#[derive(Debug, Clone)]
pub struct Grouping<T> {
    keys: Vec<String>,
    groups: HashMap<String, Vec<T>>,
}

impl<T> Grouping<T> {
    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Total members across all groups; equals the input length.
    pub fn total_members(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    /// Members of one group, if the key exists.
    pub fn get(&self, key: &str) -> Option<&[T]> {
        self.groups.get(key).map(Vec::as_slice)
    }

    /// All groups in first-seen key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[T])> {
        self.keys
            .iter()
            .map(move |k| (k.as_str(), self.groups[k].as_slice()))
    }

    /// Groups with more than one member, in first-seen key order.
    pub fn duplicates(&self) -> impl Iterator<Item = (&str, &[T])> {
        self.iter().filter(|(_, members)| members.len() > 1)
    }

    /// Count of duplicate groups.
    pub fn duplicate_count(&self) -> usize {
        self.duplicates().count()
    }
}

/// Partition items by a derived key.
///
/// `key_fn` must be a pure function of the item; canonicalization belongs
/// in the key function (two textual spellings of one address must map to
/// one key).
pub fn group_by<T, F>(items: Vec<T>, key_fn: F) -> Grouping<T>
where
    F: Fn(&T) -> String,
{
    let mut keys: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<T>> = HashMap::new();

    for item in items {
        let key = key_fn(&item);
        let entry = groups.entry(key.clone()).or_default();
        if entry.is_empty() {
            keys.push(key);
        }
        entry.push(item);
    }

    Grouping { keys, groups }
}
