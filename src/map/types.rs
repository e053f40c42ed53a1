//! Stable identifiers for map entities.
//!
//! KeyFrames and MapPoints reference each other; storing them in id-indexed
//! arenas and cross-referencing by id avoids the cyclic-ownership problem
//! that direct Rc/Arc links would create.

/// Unique identifier for a KeyFrame within a Map, assigned sequentially.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyFrameId(pub u64);

impl std::fmt::Display for KeyFrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KF{}", self.0)
    }
}

/// Unique identifier for a MapPoint within a Map, assigned sequentially.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MapPointId(pub u64);

impl std::fmt::Display for MapPointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MP{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn ids_compare_by_value() {
        assert_eq!(KeyFrameId(42), KeyFrameId(42));
        assert_ne!(MapPointId(1), MapPointId(2));
        assert!(KeyFrameId(3) < KeyFrameId(4));
    }

    #[test]
    fn ids_work_as_hashmap_keys() {
        let mut map: HashMap<MapPointId, &str> = HashMap::new();
        map.insert(MapPointId(1), "first");
        assert_eq!(map.get(&MapPointId(1)), Some(&"first"));
        assert_eq!(map.get(&MapPointId(9)), None);
    }

    #[test]
    fn display_forms() {
        assert_eq!(format!("{}", KeyFrameId(7)), "KF7");
        assert_eq!(format!("{}", MapPointId(123)), "MP123");
    }
}
