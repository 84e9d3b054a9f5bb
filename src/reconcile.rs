//! Diffing a remote collection against its local mirror.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Operations that bring a local collection in line with a remote one.
///
/// Each list keeps the order in which its items appeared in the corresponding input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff<R, L> {
    /// Remote items with no local counterpart.
    pub to_add: Vec<R>,

    /// Local items paired with the remote values they should take.
    pub to_update: Vec<(L, R)>,

    /// Local items no longer present remotely.
    pub to_remove: Vec<L>,
}

impl<R, L> Diff<R, L> {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_remove.is_empty()
    }
}

/// Computes the operations that turn `local` into `remote`.
///
/// Items are matched by key; a matched pair produces an update only if `equals` reports a
/// difference. If several local items share a key, the first one is matched and the rest are
/// scheduled for removal. If several remote items share a key, only the first is considered.
pub fn diff<R, L, K>(
    remote: impl IntoIterator<Item = R>,
    local: impl IntoIterator<Item = L>,
    remote_key: impl Fn(&R) -> K,
    local_key: impl Fn(&L) -> K,
    equals: impl Fn(&R, &L) -> bool,
) -> Diff<R, L>
where
    K: Eq + Hash,
{
    let mut slots: Vec<Option<L>> = Vec::new();
    let mut by_key: HashMap<K, usize> = HashMap::new();

    for item in local {
        by_key.entry(local_key(&item)).or_insert(slots.len());
        slots.push(Some(item));
    }

    let mut to_add = Vec::new();
    let mut to_update = Vec::new();
    let mut unmatched_keys = HashSet::new();

    for item in remote {
        let key = remote_key(&item);

        match by_key.get(&key) {
            Some(&idx) => {
                // `None` means an earlier remote item with this key already claimed the slot.
                let Some(existing) = slots[idx].take() else {
                    continue;
                };

                if !equals(&item, &existing) {
                    to_update.push((existing, item));
                }
            }

            None => {
                if unmatched_keys.insert(key) {
                    to_add.push(item);
                }
            }
        }
    }

    let to_remove = slots.into_iter().flatten().collect();

    Diff {
        to_add,
        to_update,
        to_remove,
    }
}
