//! Generational slot storage.
//!
//! Managed values and handle records both live in arenas and are named by
//! stable index/generation pairs instead of addresses. Removing a slot
//! bumps its generation, so an identifier that outlives its slot is
//! detectable (lookup returns `None`) rather than dangling. That property
//! is what keeps the tree-repair search in [`crate::gc`] memory-safe while
//! it walks referrer chains of a graph that is being torn down.

use std::fmt;

/// Index + generation pair naming a slot in an [`Arena`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawId {
    index: u32,
    generation: u32,
}

impl fmt::Debug for RawId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

enum Entry<U> {
    /// Free slot, threaded on the free list.
    Vacant { next_free: Option<u32> },
    Occupied(U),
}

struct Slot<U> {
    /// Bumped every time the slot is vacated.
    generation: u32,
    entry: Entry<U>,
}

/// A generational arena.
///
/// Slots are reused through an intrusive free list; a freed slot's
/// generation is incremented so stale [`RawId`]s miss on lookup.
pub struct Arena<U> {
    slots: Vec<Slot<U>>,
    free_head: Option<u32>,
    live: usize,
}

impl<U> Arena<U> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            live: 0,
        }
    }

    /// Store `value`, reusing a vacant slot when one is available.
    pub fn insert(&mut self, value: U) -> RawId {
        self.live += 1;
        match self.free_head {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                self.free_head = match slot.entry {
                    Entry::Vacant { next_free } => next_free,
                    Entry::Occupied(_) => unreachable!("occupied slot on the free list"),
                };
                slot.entry = Entry::Occupied(value);
                RawId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Entry::Occupied(value),
                });
                RawId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    /// Vacate the slot named by `id` and return its value.
    ///
    /// Returns `None` if the slot was already vacated (stale id).
    pub fn remove(&mut self, id: RawId) -> Option<U> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        if matches!(slot.entry, Entry::Vacant { .. }) {
            return None;
        }
        slot.generation += 1;
        let entry = std::mem::replace(
            &mut slot.entry,
            Entry::Vacant {
                next_free: self.free_head,
            },
        );
        self.free_head = Some(id.index);
        self.live -= 1;
        match entry {
            Entry::Occupied(value) => Some(value),
            Entry::Vacant { .. } => unreachable!(),
        }
    }

    pub fn get(&self, id: RawId) -> Option<&U> {
        let slot = self.slots.get(id.index as usize)?;
        match &slot.entry {
            Entry::Occupied(value) if slot.generation == id.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: RawId) -> Option<&mut U> {
        let slot = self.slots.get_mut(id.index as usize)?;
        match &mut slot.entry {
            Entry::Occupied(value) if slot.generation == id.generation => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, id: RawId) -> bool {
        self.get(id).is_some()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

impl<U> Default for Arena<U> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_remove_returns_value() {
        let mut arena = Arena::new();
        let a = arena.insert(7u32);
        assert_eq!(arena.remove(a), Some(7));
        assert_eq!(arena.len(), 0);
        assert!(arena.is_empty());
    }

    #[test]
    fn test_stale_id_misses() {
        let mut arena = Arena::new();
        let a = arena.insert(1u32);
        arena.remove(a);

        // Same slot, new generation — the old id must not resolve.
        let b = arena.insert(2u32);
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get_mut(a), None);
        assert!(!arena.contains(a));
        assert_eq!(arena.remove(a), None);
        assert_eq!(arena.get(b), Some(&2));
    }

    #[test]
    fn test_slot_reuse() {
        let mut arena = Arena::new();
        let a = arena.insert(1u32);
        let _b = arena.insert(2u32);
        arena.remove(a);
        let c = arena.insert(3u32);

        // Freed slot was recycled instead of growing the backing vec.
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(c), Some(&3));
        assert_ne!(a, c);
    }

    #[test]
    fn test_get_mut() {
        let mut arena = Arena::new();
        let a = arena.insert(vec![1, 2]);
        arena.get_mut(a).unwrap().push(3);
        assert_eq!(arena.get(a), Some(&vec![1, 2, 3]));
    }

    #[test]
    fn test_double_remove_is_none() {
        let mut arena = Arena::new();
        let a = arena.insert(());
        assert_eq!(arena.remove(a), Some(()));
        assert_eq!(arena.remove(a), None);
    }
}
