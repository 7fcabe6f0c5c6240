/// Stable handle into a [`TilePool`]. Stale handles never alias a newer tile
/// because each slot carries a generation counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId {
    slot: u32,
    generation: u32,
}

impl TileId {
    #[inline]
    pub fn slot(&self) -> u32 {
        self.slot
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slab storage for tiles with generation-checked handles.
pub struct TilePool<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> TilePool<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> TileId {
        self.insert_with(|_| value)
    }

    /// Inserts a value built from the handle it will live under.
    pub fn insert_with(&mut self, make: impl FnOnce(TileId) -> T) -> TileId {
        self.len += 1;
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot as usize];
            let id = TileId {
                slot,
                generation: entry.generation,
            };
            entry.value = Some(make(id));
            return id;
        }

        let id = TileId {
            slot: self.slots.len() as u32,
            generation: 0,
        };
        self.slots.push(Slot {
            generation: 0,
            value: Some(make(id)),
        });
        id
    }

    pub fn get_ref(&self, id: TileId) -> Option<&T> {
        self.slots
            .get(id.slot as usize)
            .filter(|entry| entry.generation == id.generation)
            .and_then(|entry| entry.value.as_ref())
    }

    pub fn get_mut_ref(&mut self, id: TileId) -> Option<&mut T> {
        self.slots
            .get_mut(id.slot as usize)
            .filter(|entry| entry.generation == id.generation)
            .and_then(|entry| entry.value.as_mut())
    }

    pub fn contains(&self, id: TileId) -> bool {
        self.get_ref(id).is_some()
    }

    /// Removes and returns the tile. The slot's generation is bumped so `id`
    /// becomes permanently invalid.
    pub fn release(&mut self, id: TileId) -> Option<T> {
        let entry = self.slots.get_mut(id.slot as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        let value = entry.value.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.slot);
        self.len -= 1;
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn for_each_occupied(&self, mut f: impl FnMut(TileId, &T)) {
        for (slot, entry) in self.slots.iter().enumerate() {
            if let Some(value) = entry.value.as_ref() {
                f(
                    TileId {
                        slot: slot as u32,
                        generation: entry.generation,
                    },
                    value,
                );
            }
        }
    }
}

impl<T> Default for TilePool<T> {
    fn default() -> Self {
        Self::new()
    }
}
