//! Generation-tagged slot arena backing the parsing engine's handle space.
//!
//! Parser state machines are addressed by opaque [`Handle`]s rather than
//! references. A handle carries the generation of the slot it was allocated
//! from, so a handle that outlives its slot (freed, or freed and reallocated)
//! is detected instead of silently aliasing another parser.

/// Opaque identifier for one slot in an [`Arena`].
///
/// Handles are cheap to copy and remain valid until the slot is removed.
/// After removal every surviving copy is stale: lookups return `None` and a
/// second removal fails, so the exactly-once free contract is checkable at
/// runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    /// Raw slot index, exposed for logging only.
    pub fn index(&self) -> u32 {
        self.index
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot map with generation tags on every slot.
///
/// Freed slots are recycled in LIFO order; each removal bumps the slot's
/// generation so recycled slots never honor handles from a previous life.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self { slots: Vec::new(), free: Vec::new(), live: 0 }
    }

    /// Stores `value` and returns a handle to it.
    pub fn insert(&mut self, value: T) -> Handle {
        self.live += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Handle { index, generation: slot.generation };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot { generation: 0, value: Some(value) });
        Handle { index, generation: 0 }
    }

    /// Looks up a live value, rejecting stale handles.
    pub fn get(&self, handle: Handle) -> Option<&T> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Removes the value behind `handle`, invalidating every copy of it.
    ///
    /// Returns `None` when the handle is stale or already removed.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }

        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.live -= 1;
        Some(value)
    }

    /// Number of live slots.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");

        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn double_remove_is_rejected() {
        let mut arena = Arena::new();
        let handle = arena.insert(1u8);

        assert_eq!(arena.remove(handle), Some(1));
        assert_eq!(arena.remove(handle), None);
        assert!(arena.is_empty());
    }

    #[test]
    fn stale_handle_does_not_alias_recycled_slot() {
        let mut arena = Arena::new();
        let old = arena.insert("old");
        arena.remove(old);

        // The freed slot is recycled for the next insert, with a new generation.
        let new = arena.insert("new");
        assert_eq!(new.index(), old.index());
        assert_ne!(new, old);

        assert_eq!(arena.get(old), None);
        assert_eq!(arena.get_mut(old), None);
        assert_eq!(arena.remove(old), None);
        assert_eq!(arena.get(new), Some(&"new"));
    }
}
