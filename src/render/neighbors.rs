use std::collections::HashMap;

use glam::IVec2;
use tracing::warn;

use super::arena::{TileId, TilePool};

/// Identifies one landscape instance inside one world.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LandscapeKey {
    pub world: u32,
    pub guid: u128,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NeighborDirection {
    North = 0,
    West = 1,
    East = 2,
    South = 3,
}

impl NeighborDirection {
    pub const ALL: [NeighborDirection; 4] = [
        NeighborDirection::North,
        NeighborDirection::West,
        NeighborDirection::East,
        NeighborDirection::South,
    ];

    #[inline]
    pub fn offset(self) -> IVec2 {
        match self {
            NeighborDirection::North => IVec2::new(0, -1),
            NeighborDirection::West => IVec2::new(-1, 0),
            NeighborDirection::East => IVec2::new(1, 0),
            NeighborDirection::South => IVec2::new(0, 1),
        }
    }

    #[inline]
    pub fn opposite(self) -> NeighborDirection {
        Self::ALL[3 - self as usize]
    }
}

/// Neighbor bookkeeping every tile carries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NeighborInfo {
    pub landscape: LandscapeKey,
    pub component_base: IVec2,
    pub neighbors: [Option<TileId>; 4],
    pub registered: bool,
}

impl NeighborInfo {
    pub fn new(landscape: LandscapeKey, component_base: IVec2) -> Self {
        Self {
            landscape,
            component_base,
            ..Default::default()
        }
    }

    #[inline]
    pub fn neighbor(&self, direction: NeighborDirection) -> Option<TileId> {
        self.neighbors[direction as usize]
    }
}

/// Anything stored in a [`TilePool`] that takes part in neighbor lookup.
pub trait HasNeighborInfo {
    fn neighbor_info(&self) -> &NeighborInfo;
    fn neighbor_info_mut(&mut self) -> &mut NeighborInfo;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Registration {
    /// Linked in. `first_for_landscape` is set when the landscape had no tiles.
    Registered { first_for_landscape: bool },
    AlreadyRegistered,
    Duplicate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Unregistration {
    /// Unlinked. `landscape_empty` is set when it was the landscape's last tile.
    Unregistered { landscape_empty: bool },
    NotRegistered,
}

/// Per-landscape map of component coordinates to tiles.
#[derive(Default)]
pub struct NeighborRegistry {
    landscapes: HashMap<LandscapeKey, HashMap<IVec2, TileId>>,
}

impl NeighborRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: HasNeighborInfo>(&mut self, tiles: &mut TilePool<T>, id: TileId) -> Registration {
        let Some(info) = tiles.get_ref(id).map(|tile| *tile.neighbor_info()) else {
            return Registration::AlreadyRegistered;
        };
        if info.registered {
            return Registration::AlreadyRegistered;
        }

        let first_for_landscape = !self.landscapes.contains_key(&info.landscape);
        let map = self.landscapes.entry(info.landscape).or_default();
        if map.contains_key(&info.component_base) {
            warn!(
                "Duplicate component base {}, {}",
                info.component_base.x, info.component_base.y
            );
            return Registration::Duplicate;
        }
        map.insert(info.component_base, id);

        let mut neighbors = [None; 4];
        for direction in NeighborDirection::ALL {
            let neighbor = map.get(&(info.component_base + direction.offset())).copied();
            if let Some(other) = neighbor.and_then(|other| tiles.get_mut_ref(other)) {
                other.neighbor_info_mut().neighbors[direction.opposite() as usize] = Some(id);
            }
            neighbors[direction as usize] = neighbor;
        }

        if let Some(tile) = tiles.get_mut_ref(id) {
            let own = tile.neighbor_info_mut();
            own.neighbors = neighbors;
            own.registered = true;
        }

        Registration::Registered { first_for_landscape }
    }

    pub fn unregister<T: HasNeighborInfo>(
        &mut self,
        tiles: &mut TilePool<T>,
        id: TileId,
    ) -> Unregistration {
        let Some(info) = tiles.get_ref(id).map(|tile| *tile.neighbor_info()) else {
            return Unregistration::NotRegistered;
        };
        if !info.registered {
            return Unregistration::NotRegistered;
        }

        let Some(map) = self.landscapes.get_mut(&info.landscape) else {
            return Unregistration::NotRegistered;
        };
        if map.get(&info.component_base) != Some(&id) {
            return Unregistration::NotRegistered;
        }
        map.remove(&info.component_base);

        let landscape_empty = map.is_empty();
        if landscape_empty {
            self.landscapes.remove(&info.landscape);
        } else {
            for direction in NeighborDirection::ALL {
                if let Some(other) = info.neighbors[direction as usize].and_then(|other| tiles.get_mut_ref(other)) {
                    other.neighbor_info_mut().neighbors[direction.opposite() as usize] = None;
                }
            }
        }

        if let Some(tile) = tiles.get_mut_ref(id) {
            let own = tile.neighbor_info_mut();
            own.neighbors = [None; 4];
            own.registered = false;
        }

        Unregistration::Unregistered { landscape_empty }
    }

    pub fn tile_at(&self, landscape: &LandscapeKey, component_base: IVec2) -> Option<TileId> {
        self.landscapes
            .get(landscape)
            .and_then(|map| map.get(&component_base))
            .copied()
    }

    pub fn num_tiles(&self, landscape: &LandscapeKey) -> usize {
        self.landscapes.get(landscape).map_or(0, HashMap::len)
    }

    pub fn contains_landscape(&self, landscape: &LandscapeKey) -> bool {
        self.landscapes.contains_key(landscape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl HasNeighborInfo for NeighborInfo {
        fn neighbor_info(&self) -> &NeighborInfo {
            self
        }

        fn neighbor_info_mut(&mut self) -> &mut NeighborInfo {
            self
        }
    }

    #[test]
    fn opposite_directions_pair_up() {
        for direction in NeighborDirection::ALL {
            assert_eq!(direction.opposite().opposite(), direction);
            assert_eq!(direction.offset() + direction.opposite().offset(), IVec2::ZERO);
        }
    }

    #[test]
    fn registers_and_unlinks_pairs() {
        let key = LandscapeKey { world: 1, guid: 7 };
        let mut tiles = TilePool::new();
        let mut registry = NeighborRegistry::new();

        let a = tiles.insert(NeighborInfo::new(key, IVec2::new(0, 0)));
        let b = tiles.insert(NeighborInfo::new(key, IVec2::new(1, 0)));
        assert_eq!(
            registry.register(&mut tiles, a),
            Registration::Registered { first_for_landscape: true }
        );
        assert_eq!(
            registry.register(&mut tiles, b),
            Registration::Registered { first_for_landscape: false }
        );
        assert_eq!(tiles.get_ref(a).unwrap().neighbor(NeighborDirection::East), Some(b));
        assert_eq!(tiles.get_ref(b).unwrap().neighbor(NeighborDirection::West), Some(a));

        assert_eq!(
            registry.unregister(&mut tiles, b),
            Unregistration::Unregistered { landscape_empty: false }
        );
        assert_eq!(tiles.get_ref(a).unwrap().neighbor(NeighborDirection::East), None);
        assert_eq!(registry.unregister(&mut tiles, b), Unregistration::NotRegistered);
        assert_eq!(
            registry.unregister(&mut tiles, a),
            Unregistration::Unregistered { landscape_empty: true }
        );
        assert!(!registry.contains_landscape(&key));
    }
}
