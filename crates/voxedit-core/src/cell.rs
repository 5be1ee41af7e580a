use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{EditError, Result};

/// Largest absolute cell coordinate accepted from world space. Anchors of
/// every cell within a footprint of this range are exact in `f32`, so an
/// instance placed in a cell maps back to that same cell.
pub const GRID_LIMIT: i32 = 1 << 22;

/// Integer coordinate of one grid cell.
///
/// Keys order lexicographically by `(x, y, z)`, which is the iteration
/// order of every cell map in this crate. The canonical text encoding is
/// `"x,y,z"` and is what keys serialize to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl CellKey {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The key `(dx, dy, dz)` away, or `None` past the edge of `i32`.
    pub fn checked_offset(&self, dx: i32, dy: i32, dz: i32) -> Option<Self> {
        Some(Self::new(
            self.x.checked_add(dx)?,
            self.y.checked_add(dy)?,
            self.z.checked_add(dz)?,
        ))
    }

    /// Snap a world-space position onto the grid. Cells beyond
    /// [`GRID_LIMIT`] on any axis are rejected.
    pub fn try_from_world(position: [f64; 3]) -> Result<Self> {
        if position.iter().any(|c| !c.is_finite()) {
            return Err(EditError::NonFiniteCoordinate(position));
        }
        let limit = GRID_LIMIT as f64;
        let snap = |c: f64| {
            let f = c.floor();
            if f < -limit || f > limit {
                None
            } else {
                Some(f as i32)
            }
        };
        match (snap(position[0]), snap(position[1]), snap(position[2])) {
            (Some(x), Some(y), Some(z)) => Ok(Self::new(x, y, z)),
            _ => Err(EditError::CoordinateOutOfRange(position)),
        }
    }

    /// The cell an instance standing at `position` occupies.
    pub fn containing(position: [f32; 3]) -> Self {
        Self::new(
            position[0].floor() as i32,
            position[1].floor() as i32,
            position[2].floor() as i32,
        )
    }

    /// Anchor point for an object placed in this cell: centred on X/Z,
    /// resting on the cell floor.
    pub fn anchor(&self) -> [f32; 3] {
        [self.x as f32 + 0.5, self.y as f32, self.z as f32 + 0.5]
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

impl FromStr for CellKey {
    type Err = EditError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(',').map(|p| p.trim().parse::<i32>());
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(Ok(x)), Some(Ok(y)), Some(Ok(z)), None) => Ok(Self::new(x, y, z)),
            _ => Err(EditError::InvalidCellKey(s.to_string())),
        }
    }
}

impl Serialize for CellKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CellKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_key_ordering() {
        let mut keys = vec![
            CellKey::new(1, 0, 0),
            CellKey::new(0, 5, 0),
            CellKey::new(0, 0, -3),
            CellKey::new(-1, 9, 9),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                CellKey::new(-1, 9, 9),
                CellKey::new(0, 0, -3),
                CellKey::new(0, 5, 0),
                CellKey::new(1, 0, 0),
            ]
        );
    }

    #[test]
    fn test_key_text_encoding() {
        let key = CellKey::new(-4, 12, 0);
        assert_eq!(key.to_string(), "-4,12,0");
        assert_eq!("-4,12,0".parse::<CellKey>().unwrap(), key);
        assert!("1,2".parse::<CellKey>().is_err());
        assert!("1,2,3,4".parse::<CellKey>().is_err());
        assert!("a,b,c".parse::<CellKey>().is_err());
    }

    #[test]
    fn test_key_as_json_map_key() {
        let mut map = BTreeMap::new();
        map.insert(CellKey::new(1, 2, 3), 7u32);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"1,2,3":7}"#);
        let back: BTreeMap<CellKey, u32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_world_snapping() {
        let key = CellKey::try_from_world([1.7, -0.2, -3.0]).unwrap();
        assert_eq!(key, CellKey::new(1, -1, -3));
        assert!(matches!(
            CellKey::try_from_world([f64::NAN, 0.0, 0.0]),
            Err(EditError::NonFiniteCoordinate(_))
        ));
        assert!(matches!(
            CellKey::try_from_world([0.0, f64::INFINITY, 0.0]),
            Err(EditError::NonFiniteCoordinate(_))
        ));
        assert!(matches!(
            CellKey::try_from_world([1e12, 0.0, 0.0]),
            Err(EditError::CoordinateOutOfRange(_))
        ));
    }

    #[test]
    fn test_containing_and_anchor() {
        let key = CellKey::new(2, 0, -1);
        assert_eq!(CellKey::containing(key.anchor()), key);
    }

    #[test]
    fn test_grid_limit() {
        let edge = GRID_LIMIT as f64;
        assert!(CellKey::try_from_world([edge + 0.9, -edge, 0.0]).is_ok());
        assert!(matches!(
            CellKey::try_from_world([edge + 1.0, 0.0, 0.0]),
            Err(EditError::CoordinateOutOfRange(_))
        ));
        assert!(matches!(
            CellKey::try_from_world([0.0, 0.0, -edge - 0.5]),
            Err(EditError::CoordinateOutOfRange(_))
        ));
        assert!(matches!(
            CellKey::try_from_world([8_388_609.0, 0.0, 0.0]),
            Err(EditError::CoordinateOutOfRange(_))
        ));
    }

    #[test]
    fn test_anchor_round_trips_near_limit() {
        // Footprints reach two cells past an accepted centre.
        for x in [GRID_LIMIT + 2, -GRID_LIMIT - 2, GRID_LIMIT - 1] {
            let key = CellKey::new(x, GRID_LIMIT, -x);
            assert_eq!(CellKey::containing(key.anchor()), key);
        }
    }

    #[test]
    fn test_checked_offset() {
        let key = CellKey::new(i32::MAX, 0, i32::MIN);
        assert_eq!(key.checked_offset(1, 0, 0), None);
        assert_eq!(key.checked_offset(0, 0, -1), None);
        assert_eq!(
            key.checked_offset(-1, 2, 1),
            Some(CellKey::new(i32::MAX - 1, 2, i32::MIN + 1))
        );
    }
}
