//! Terrain queries used to validate move and build orders.

use std::collections::HashSet;

pub trait Terrain: Send {
    fn width(&self) -> i32;
    fn height(&self) -> i32;

    fn is_valid_position(&self, x: i32, y: i32) -> bool {
        (0..self.width()).contains(&x) && (0..self.height()).contains(&y)
    }

    fn is_walkable(&self, x: i32, y: i32) -> bool;
    fn is_buildable(&self, x: i32, y: i32) -> bool;
}

/// Flat map where every in-bounds tile is walkable and buildable unless it
/// has been blocked.
#[derive(Debug, Clone)]
pub struct OpenField {
    width: i32,
    height: i32,
    blocked: HashSet<(i32, i32)>,
}

impl OpenField {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            blocked: HashSet::new(),
        }
    }

    /// Marks a tile as impassable. Out-of-bounds tiles are ignored.
    pub fn block(&mut self, x: i32, y: i32) {
        if self.is_valid_position(x, y) {
            self.blocked.insert((x, y));
        }
    }
}

impl Terrain for OpenField {
    fn width(&self) -> i32 {
        self.width
    }

    fn height(&self) -> i32 {
        self.height
    }

    fn is_walkable(&self, x: i32, y: i32) -> bool {
        self.is_valid_position(x, y) && !self.blocked.contains(&(x, y))
    }

    fn is_buildable(&self, x: i32, y: i32) -> bool {
        self.is_walkable(x, y)
    }
}
