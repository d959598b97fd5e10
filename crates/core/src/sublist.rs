//! Keyed-sublist merge: reconcile an ordered list of named child entries inside
//! one object. Controlled fields follow the desired entry, everything else on an
//! existing entry is kept. Entries unknown to the desired list are dropped and the
//! result is always in desired order.

use std::collections::{HashMap, HashSet};

/// An element of a keyed sublist.
pub trait KeyedEntry: Clone {
    fn key(&self) -> &str;

    /// Overwrite the controlled fields of `self` with those of `desired`.
    /// Returns true if any of them differed.
    fn reconcile_controlled(&mut self, desired: &Self) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SublistMerge<T> {
    pub entries: Vec<T>,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

impl<T> SublistMerge<T> {
    /// Content changed. Order alone does not count.
    pub fn changed(&self) -> bool { self.added + self.updated + self.removed > 0 }
}

/// Merge `existing` into the shape of `desired`. Desired keys are unique by
/// construction; `None` for existing behaves like an empty list.
pub fn merge_keyed<T: KeyedEntry>(desired: &[T], existing: Option<&[T]>) -> SublistMerge<T> {
    let existing = existing.unwrap_or(&[]);
    let mut index: HashMap<&str, &T> = HashMap::with_capacity(existing.len());
    for e in existing {
        index.entry(e.key()).or_insert(e);
    }

    let mut entries = Vec::with_capacity(desired.len());
    let mut matched: HashSet<&str> = HashSet::with_capacity(desired.len());
    let (mut added, mut updated) = (0usize, 0usize);
    for want in desired {
        match index.get(want.key()) {
            Some(have) => {
                let mut merged = (*have).clone();
                if merged.reconcile_controlled(want) {
                    updated += 1;
                }
                matched.insert(want.key());
                entries.push(merged);
            }
            None => {
                added += 1;
                entries.push(want.clone());
            }
        }
    }
    // duplicates on the existing side collapse into one entry, which is a removal too
    let removed = existing.len() - existing.iter().filter(|e| matched.remove(e.key())).count();

    SublistMerge { entries, added, updated, removed }
}
