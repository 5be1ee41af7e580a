use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cell::CellKey;
use crate::error::EditError;

/// Footprint shape of one placement or removal command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementPattern {
    #[default]
    Single,
    Cross,
    Diamond,
    Square9,
    Square16,
}

/// Orthogonal neighbours on the X/Z plane, in enumeration order.
const ORTHOGONAL: [(i32, i32); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];
const DIAGONAL: [(i32, i32); 4] = [(1, 1), (1, -1), (-1, 1), (-1, -1)];

impl PlacementPattern {
    pub const ALL: [PlacementPattern; 5] = [
        PlacementPattern::Single,
        PlacementPattern::Cross,
        PlacementPattern::Diamond,
        PlacementPattern::Square9,
        PlacementPattern::Square16,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            PlacementPattern::Single => "single",
            PlacementPattern::Cross => "cross",
            PlacementPattern::Diamond => "diamond",
            PlacementPattern::Square9 => "square9",
            PlacementPattern::Square16 => "square16",
        }
    }

    pub fn cell_count(&self) -> usize {
        match self {
            PlacementPattern::Single => 1,
            PlacementPattern::Cross => 5,
            PlacementPattern::Diamond => 13,
            PlacementPattern::Square9 => 9,
            PlacementPattern::Square16 => 16,
        }
    }

    /// X/Z offsets relative to the centre. The centre is always first and
    /// every offset stays on the centre's Y level.
    pub fn offsets(&self) -> Vec<(i32, i32)> {
        let mut out = Vec::with_capacity(self.cell_count());
        out.push((0, 0));
        match self {
            PlacementPattern::Single => {}
            PlacementPattern::Cross => out.extend_from_slice(&ORTHOGONAL),
            PlacementPattern::Diamond => {
                out.extend_from_slice(&ORTHOGONAL);
                out.extend_from_slice(&DIAGONAL);
                out.extend(ORTHOGONAL.iter().map(|&(dx, dz)| (dx * 2, dz * 2)));
            }
            PlacementPattern::Square9 => out.extend(square(-1..=1)),
            PlacementPattern::Square16 => out.extend(square(-2..=1)),
        }
        out
    }

    /// The ordered list of cells covered when this pattern is stamped at
    /// `center`. Fails if any cell would fall outside the `i32` grid.
    pub fn footprint(&self, center: CellKey) -> Result<Vec<CellKey>, EditError> {
        self.offsets()
            .into_iter()
            .map(|(dx, dz)| {
                center.checked_offset(dx, 0, dz).ok_or(EditError::CoordinateOutOfRange([
                    center.x as f64 + dx as f64,
                    center.y as f64,
                    center.z as f64 + dz as f64,
                ]))
            })
            .collect()
    }
}

/// Row-major sweep over a square block of offsets, skipping the centre.
fn square(span: std::ops::RangeInclusive<i32>) -> impl Iterator<Item = (i32, i32)> {
    let rows = span.clone();
    rows.flat_map(move |dx| span.clone().map(move |dz| (dx, dz)))
        .filter(|&offset| offset != (0, 0))
}

impl fmt::Display for PlacementPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for PlacementPattern {
    type Err = EditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PlacementPattern::ALL
            .into_iter()
            .find(|p| p.tag() == s)
            .ok_or_else(|| EditError::UnknownPattern(s.to_string()))
    }
}
