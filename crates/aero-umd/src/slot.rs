//! Generation-checked object storage.
//!
//! Every device-owned object kind (resources, shaders, views, state objects)
//! lives in its own [`SlotMap`]. Public ids are `{index, generation}` pairs;
//! an id that was destroyed, or whose slot has since been reused, fails
//! lookups instead of aliasing an unrelated object.

/// Index plus generation into one [`SlotMap`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SlotKey {
    index: u32,
    generation: u32,
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub struct SlotMap<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> SlotMap<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn insert(&mut self, value: T) -> SlotKey {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            SlotKey {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                value: Some(value),
            });
            SlotKey { index, generation: 0 }
        }
    }

    pub fn get(&self, key: SlotKey) -> Option<&T> {
        let slot = self.slots.get(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, key: SlotKey) -> Option<&mut T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Removes the value behind `key`, retiring the generation so the key
    /// (and any copy of it) goes stale immediately.
    pub fn remove(&mut self, key: SlotKey) -> Option<T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        Some(value)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SlotKey, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            let value = slot.value.as_mut()?;
            let key = SlotKey {
                index: index as u32,
                generation,
            };
            Some((key, value))
        })
    }
}

impl<T> Default for SlotMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove_round_trip() {
        let mut map = SlotMap::new();
        let a = map.insert("a");
        let b = map.insert("b");
        assert_eq!(map.get(a), Some(&"a"));
        assert_eq!(map.get(b), Some(&"b"));

        assert_eq!(map.remove(a), Some("a"));
        assert_eq!(map.get(a), None);
        assert_eq!(map.get(b), Some(&"b"));
    }

    #[test]
    fn stale_key_fails_after_slot_reuse() {
        let mut map = SlotMap::new();
        let a = map.insert(1u32);
        map.remove(a);

        // Reuses slot 0 with a bumped generation.
        let b = map.insert(2u32);
        assert_eq!(map.get(a), None);
        assert_eq!(map.remove(a), None);
        assert_eq!(map.get(b), Some(&2));
    }

    #[test]
    fn double_remove_is_a_no_op() {
        let mut map = SlotMap::new();
        let a = map.insert(7u8);
        assert_eq!(map.remove(a), Some(7));
        assert_eq!(map.remove(a), None);
    }

    #[test]
    fn iter_mut_skips_freed_slots() {
        let mut map = SlotMap::new();
        let a = map.insert(10u32);
        let b = map.insert(20u32);
        let c = map.insert(30u32);
        map.remove(b);

        for (_, value) in map.iter_mut() {
            *value += 1;
        }
        let live: Vec<u32> = map.iter_mut().map(|(_, v)| *v).collect();
        assert_eq!(live, vec![11, 31]);
        assert_eq!(map.get(a), Some(&11));
        assert_eq!(map.get(c), Some(&31));
    }
}
