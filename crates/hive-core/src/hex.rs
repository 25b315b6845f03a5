//! Axial hex coordinates, tile borders, and path sites.
//!
//! Tiles are addressed with axial `{q, r}` coordinates (pointy-top). The
//! border between two adjacent tiles is a [`Border`], stored as a normalized
//! pair so that `Border::between(a, b) == Border::between(b, a)`. Every path
//! handed out by the pathfinding collaborator is a sequence of [`Site`]s,
//! alternating tile and border positions.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Axial
// ---------------------------------------------------------------------------

/// A tile position in axial hex coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Axial {
    pub q: i32,
    pub r: i32,
}

impl Axial {
    pub const fn new(q: i32, r: i32) -> Self {
        Self { q, r }
    }

    /// The tile one step away in `dir`.
    pub fn step(self, dir: Direction) -> Self {
        let (dq, dr) = dir.offset();
        Self::new(self.q + dq, self.r + dr)
    }

    /// All six neighbouring tiles, in [`Direction::all`] order.
    pub fn neighbors(self) -> [Axial; 6] {
        Direction::all().map(|d| self.step(d))
    }

    /// Hex (cube) distance: `max(|dq|, |dr|, |dq + dr|)`.
    pub fn distance(self, other: Axial) -> u32 {
        let dq = self.q - other.q;
        let dr = self.r - other.r;
        dq.unsigned_abs()
            .max(dr.unsigned_abs())
            .max((dq + dr).unsigned_abs())
    }

    pub fn is_adjacent(self, other: Axial) -> bool {
        self.distance(other) == 1
    }
}

impl fmt::Display for Axial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.q, self.r)
    }
}

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// The six hex directions, pointy-top orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    East,
    NorthEast,
    NorthWest,
    West,
    SouthWest,
    SouthEast,
}

impl Direction {
    pub fn all() -> [Direction; 6] {
        [
            Direction::East,
            Direction::NorthEast,
            Direction::NorthWest,
            Direction::West,
            Direction::SouthWest,
            Direction::SouthEast,
        ]
    }

    /// Axial `(dq, dr)` offset for this direction.
    pub fn offset(&self) -> (i32, i32) {
        match self {
            Direction::East => (1, 0),
            Direction::NorthEast => (1, -1),
            Direction::NorthWest => (0, -1),
            Direction::West => (-1, 0),
            Direction::SouthWest => (-1, 1),
            Direction::SouthEast => (0, 1),
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::East => Direction::West,
            Direction::NorthEast => Direction::SouthWest,
            Direction::NorthWest => Direction::SouthEast,
            Direction::West => Direction::East,
            Direction::SouthWest => Direction::NorthEast,
            Direction::SouthEast => Direction::NorthWest,
        }
    }
}

// ---------------------------------------------------------------------------
// Border
// ---------------------------------------------------------------------------

/// The shared edge between two adjacent tiles. The lower tile is always
/// stored first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Border {
    a: Axial,
    b: Axial,
}

impl Border {
    /// The border between two tiles. Returns `None` if they are not adjacent.
    pub fn between(x: Axial, y: Axial) -> Option<Self> {
        if !x.is_adjacent(y) {
            return None;
        }
        let (a, b) = if x <= y { (x, y) } else { (y, x) };
        Some(Self { a, b })
    }

    /// The two tiles on either side, lower first.
    pub fn tiles(&self) -> (Axial, Axial) {
        (self.a, self.b)
    }

    pub fn touches(&self, tile: Axial) -> bool {
        self.a == tile || self.b == tile
    }

    /// The tile across the border from `tile`, if `tile` is one of its sides.
    pub fn other(&self, tile: Axial) -> Option<Axial> {
        if tile == self.a {
            Some(self.b)
        } else if tile == self.b {
            Some(self.a)
        } else {
            None
        }
    }

    /// All six borders of a tile.
    pub fn around(tile: Axial) -> impl Iterator<Item = Border> {
        tile.neighbors()
            .into_iter()
            .filter_map(move |n| Border::between(tile, n))
    }
}

impl fmt::Display for Border {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.a, self.b)
    }
}

// ---------------------------------------------------------------------------
// Site
// ---------------------------------------------------------------------------

/// A position a good can occupy: a tile (facility) or a border (gate).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Site {
    Tile(Axial),
    Border(Border),
}

impl Site {
    pub fn tile(&self) -> Option<Axial> {
        match self {
            Site::Tile(t) => Some(*t),
            Site::Border(_) => None,
        }
    }

    pub fn border(&self) -> Option<Border> {
        match self {
            Site::Tile(_) => None,
            Site::Border(b) => Some(*b),
        }
    }

    /// Whether this site is the tile itself or one of its borders.
    pub fn touches(&self, tile: Axial) -> bool {
        match self {
            Site::Tile(t) => *t == tile,
            Site::Border(b) => b.touches(tile),
        }
    }
}

impl From<Axial> for Site {
    fn from(tile: Axial) -> Self {
        Site::Tile(tile)
    }
}

impl From<Border> for Site {
    fn from(border: Border) -> Self {
        Site::Border(border)
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Site::Tile(t) => write!(f, "tile {t}"),
            Site::Border(b) => write!(f, "border {b}"),
        }
    }
}
