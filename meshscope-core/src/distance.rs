//! Coarse distance heuristic between two locations
//!
//! Sectors map onto a 3x3 compass grid (x: west/center/east, y: south/center/north)
//! and floors onto their rank in an ordered list. The distance is the Manhattan
//! distance on the grid plus 1.5 per floor crossed. Anything unrecognised sits
//! at the center coordinate (1).

use crate::model::Location;
use serde::{Deserialize, Serialize};

/// Weight applied to each floor crossed
pub const FLOOR_WEIGHT: f64 = 1.5;

/// Coordinate used for unknown axis values
pub const CENTER: i32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceModel {
    /// Floor labels from lowest to highest, compared case-insensitively
    floors: Vec<String>,
}

impl Default for DistanceModel {
    fn default() -> Self {
        Self::new(["basement", "ground", "upper"])
    }
}

impl DistanceModel {
    pub fn new<I, S>(floors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            floors: floors
                .into_iter()
                .map(|f| f.as_ref().trim().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn floors(&self) -> &[String] {
        &self.floors
    }

    pub fn floor_rank(&self, floor: &str) -> i32 {
        let wanted = floor.trim().to_ascii_lowercase();
        self.floors
            .iter()
            .position(|f| *f == wanted)
            .map(|p| p as i32)
            .unwrap_or(CENTER)
    }

    pub fn distance(&self, a: &Location, b: &Location) -> f64 {
        let (ax, ay) = sector_coord(&a.sector);
        let (bx, by) = sector_coord(&b.sector);
        let floors = (self.floor_rank(&a.floor) - self.floor_rank(&b.floor)).abs();
        f64::from((ax - bx).abs() + (ay - by).abs()) + FLOOR_WEIGHT * f64::from(floors)
    }
}

/// Maps a sector label such as `center-west`, `north east` or `nw` to `(x, y)`.
pub fn sector_coord(sector: &str) -> (i32, i32) {
    let mut x = None;
    let mut y = None;
    for token in sector
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let (tx, ty) = axis_of(&token.to_ascii_lowercase());
        x = x.or(tx);
        y = y.or(ty);
    }
    (x.unwrap_or(CENTER), y.unwrap_or(CENTER))
}

fn axis_of(token: &str) -> (Option<i32>, Option<i32>) {
    match token {
        "west" | "w" => (Some(0), None),
        "east" | "e" => (Some(2), None),
        "south" | "s" => (None, Some(0)),
        "north" | "n" => (None, Some(2)),
        "nw" => (Some(0), Some(2)),
        "ne" => (Some(2), Some(2)),
        "sw" => (Some(0), Some(0)),
        "se" => (Some(2), Some(0)),
        compound => {
            let y = if compound.starts_with("north") {
                Some(2)
            } else if compound.starts_with("south") {
                Some(0)
            } else {
                None
            };
            let x = if y.is_none() {
                None
            } else if compound.ends_with("west") {
                Some(0)
            } else if compound.ends_with("east") {
                Some(2)
            } else {
                None
            };
            (x, y)
        }
    }
}
