//! Core types for Botfleet

use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};
use std::sync::Arc;

/// Agent identifier - cheaply cloneable.
///
/// Before authentication this is the initial handle (a stored account name or a
/// generated temporary name); afterwards the server-assigned final handle.
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct AgentHandle(Arc<str>);

impl AgentHandle {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Hash and Eq come from `Arc<str>`, so they agree with `str`.
impl std::borrow::Borrow<str> for AgentHandle {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AgentHandle {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for AgentHandle {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Continuous world position.
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance_to(&self, other: Vec3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// The block this position lies in.
    pub fn block(&self) -> BlockPos {
        BlockPos::new(
            self.x.floor() as i32,
            self.y.floor() as i32,
            self.z.floor() as i32,
        )
    }
}

/// Integer block coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// The six axis-aligned unit offsets.
pub const FACES: [BlockPos; 6] = [
    BlockPos::new(0, -1, 0),
    BlockPos::new(0, 1, 0),
    BlockPos::new(-1, 0, 0),
    BlockPos::new(1, 0, 0),
    BlockPos::new(0, 0, -1),
    BlockPos::new(0, 0, 1),
];

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn center(&self) -> Vec3 {
        Vec3::new(
            self.x as f64 + 0.5,
            self.y as f64 + 0.5,
            self.z as f64 + 0.5,
        )
    }

    pub fn neighbors(&self) -> impl Iterator<Item = BlockPos> + '_ {
        FACES.iter().map(move |f| *self + *f)
    }
}

impl Add for BlockPos {
    type Output = BlockPos;
    fn add(self, rhs: BlockPos) -> BlockPos {
        BlockPos::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for BlockPos {
    type Output = BlockPos;
    fn sub(self, rhs: BlockPos) -> BlockPos {
        BlockPos::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl std::fmt::Display for BlockPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Names the world uses for empty space.
pub const AIR_BLOCKS: &[&str] = &["air", "cave_air", "void_air"];

/// A block as seen by an agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub name: String,
}

impl Block {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn air() -> Self {
        Self::new("air")
    }

    pub fn is_empty(&self) -> bool {
        AIR_BLOCKS.contains(&self.name.as_str())
    }

    pub fn is_solid(&self) -> bool {
        !self.is_empty() && !matches!(self.name.as_str(), "water" | "lava")
    }
}
