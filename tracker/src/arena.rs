//! Per-run arena that owns every tracker node.
//!
//! Nodes reference each other (parent links, child lists, the context's
//! cursor) through copyable [`ArenaId`] handles instead of references, so
//! tearing down a subtree can never leave a dangling pointer behind. Each
//! slot carries a generation counter; a handle into a slot that has since
//! been vacated or refilled fails the generation check and resolves to
//! `None`.

use std::fmt;

/// Handle to a value stored in an [`Arena`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ArenaId {
    index: u32,
    generation: u32,
}

impl fmt::Debug for ArenaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArenaId({}:{})", self.index, self.generation)
    }
}

#[derive(Debug)]
enum Entry<T> {
    Occupied { value: T, generation: u32 },
    Vacant { next_free: Option<u32>, generation: u32 },
}

/// Generation-checked slot arena.
///
/// Vacated slots are kept on a free list and reused with a bumped
/// generation, so a stale [`ArenaId`] can never resolve to a newer value.
#[derive(Debug, Default)]
pub struct Arena<T> {
    entries: Vec<Entry<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Store `value` and return its handle.
    pub fn insert(&mut self, value: T) -> ArenaId {
        self.len += 1;

        if let Some(index) = self.free_head {
            let entry = &mut self.entries[index as usize];
            let Entry::Vacant {
                next_free,
                generation,
            } = *entry
            else {
                unreachable!("free list pointed at an occupied slot");
            };
            self.free_head = next_free;
            *entry = Entry::Occupied { value, generation };
            ArenaId { index, generation }
        } else {
            let index = u32::try_from(self.entries.len()).expect("arena slot count overflow");
            self.entries.push(Entry::Occupied {
                value,
                generation: 0,
            });
            ArenaId {
                index,
                generation: 0,
            }
        }
    }

    /// Remove the value behind `id`, vacating its slot.
    ///
    /// Returns `None` if the handle is stale or unknown.
    pub fn remove(&mut self, id: ArenaId) -> Option<T> {
        let entry = self.entries.get_mut(id.index as usize)?;
        match entry {
            Entry::Occupied { generation, .. } if *generation == id.generation => {
                let vacated = Entry::Vacant {
                    next_free: self.free_head,
                    generation: generation.wrapping_add(1),
                };
                let Entry::Occupied { value, .. } = std::mem::replace(entry, vacated) else {
                    unreachable!();
                };
                self.free_head = Some(id.index);
                self.len -= 1;
                Some(value)
            }
            _ => None,
        }
    }

    pub fn get(&self, id: ArenaId) -> Option<&T> {
        match self.entries.get(id.index as usize)? {
            Entry::Occupied { value, generation } if *generation == id.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: ArenaId) -> Option<&mut T> {
        match self.entries.get_mut(id.index as usize)? {
            Entry::Occupied { value, generation } if *generation == id.generation => Some(value),
            _ => None,
        }
    }
}
