use crate::value::ObjectKey;
use std::collections::HashMap;

/// Index sets describing how a collection changed between two versions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Indices in the old sequence that were removed or moved.
    pub deletions: Vec<usize>,
    /// Indices in the new sequence that were added or moved.
    pub insertions: Vec<usize>,
    /// Indices in the old sequence whose object changed in place.
    pub modifications: Vec<usize>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty() && self.insertions.is_empty() && self.modifications.is_empty()
    }
}

/// Tag each key with its occurrence number, so lists holding the same
/// object twice still diff one entry at a time.
fn identities(keys: &[ObjectKey]) -> Vec<(ObjectKey, usize)> {
    let mut seen: HashMap<ObjectKey, usize> = HashMap::with_capacity(keys.len());
    keys.iter()
        .map(|k| {
            let n = seen.entry(*k).or_insert(0);
            *n += 1;
            (*k, *n - 1)
        })
        .collect()
}

/// Positional diff by key identity. Entries present on both sides are
/// compared by their rank among the survivors; a different rank counts as a
/// deletion plus an insertion. `changed` reports in-place modifications.
pub(crate) fn diff(
    old: &[ObjectKey],
    new: &[ObjectKey],
    changed: impl Fn(ObjectKey) -> bool,
) -> ChangeSet {
    let old_ids = identities(old);
    let new_ids = identities(new);
    let in_new: HashMap<(ObjectKey, usize), usize> =
        new_ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let in_old: HashMap<(ObjectKey, usize), usize> =
        old_ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let old_rank: HashMap<(ObjectKey, usize), usize> = old_ids
        .iter()
        .filter(|id| in_new.contains_key(id))
        .enumerate()
        .map(|(rank, id)| (*id, rank))
        .collect();
    let new_rank: HashMap<(ObjectKey, usize), usize> = new_ids
        .iter()
        .filter(|id| in_old.contains_key(id))
        .enumerate()
        .map(|(rank, id)| (*id, rank))
        .collect();

    let mut changes = ChangeSet::default();
    for (i, id) in old_ids.iter().enumerate() {
        match (old_rank.get(id), new_rank.get(id)) {
            (Some(a), Some(b)) if a == b => {
                if changed(id.0) {
                    changes.modifications.push(i);
                }
            }
            _ => changes.deletions.push(i),
        }
    }
    for (j, id) in new_ids.iter().enumerate() {
        match (old_rank.get(id), new_rank.get(id)) {
            (Some(a), Some(b)) if a == b => {}
            _ => changes.insertions.push(j),
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(ids: &[u64]) -> Vec<ObjectKey> {
        ids.iter().map(|i| ObjectKey(*i)).collect()
    }

    #[test]
    fn test_append() {
        let changes = diff(&keys(&[0, 1]), &keys(&[0, 1, 2]), |_| false);
        assert_eq!(
            changes,
            ChangeSet {
                deletions: vec![],
                insertions: vec![2],
                modifications: vec![],
            }
        );
    }

    #[test]
    fn test_delete_from_middle() {
        let changes = diff(&keys(&[0, 1, 2]), &keys(&[0, 2]), |_| false);
        assert_eq!(changes.deletions, vec![1]);
        assert!(changes.insertions.is_empty());
    }

    #[test]
    fn test_move_is_delete_plus_insert() {
        let changes = diff(&keys(&[0, 1, 2]), &keys(&[1, 0, 2]), |_| false);
        assert_eq!(changes.deletions, vec![0, 1]);
        assert_eq!(changes.insertions, vec![0, 1]);
    }

    #[test]
    fn test_modifications_use_old_indices() {
        let changes = diff(&keys(&[5, 6, 7]), &keys(&[6, 7]), |k| k == ObjectKey(7));
        assert_eq!(changes.deletions, vec![0]);
        assert_eq!(changes.modifications, vec![2]);
    }

    #[test]
    fn test_duplicate_entries() {
        let changes = diff(&keys(&[1, 1]), &keys(&[1, 1, 1]), |_| false);
        assert_eq!(changes.insertions, vec![2]);
        assert!(changes.deletions.is_empty());
        assert!(diff(&keys(&[1, 2]), &keys(&[1, 2]), |_| false).is_empty());
    }
}
