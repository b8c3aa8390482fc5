// src/geometry.rs

//! Integer points and inclusive rectangles in surface coordinates.
//!
//! A `Rect` is two corners, `p1` the minimum and `p2` the maximum, and both
//! are *inclusive*: `Rect::new(1, 1, 1, 1)` covers exactly one pixel. This is
//! the convention the toolkit uses for its flush areas, so tiles and dirty
//! bounds share it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub p1: Point,
    pub p2: Point,
}

impl Rect {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            p1: Point::new(x1, y1),
            p2: Point::new(x2, y2),
        }
    }

    /// Rectangle covering a whole `width` x `height` surface.
    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32 - 1, height as i32 - 1)
    }

    /// A single-pixel rectangle.
    pub const fn point(x: i32, y: i32) -> Self {
        Self::new(x, y, x, y)
    }

    /// True when `p1` is not past `p2` on either axis.
    pub fn is_valid(&self) -> bool {
        self.p1.x <= self.p2.x && self.p1.y <= self.p2.y
    }

    pub fn width(&self) -> u32 {
        (self.p2.x - self.p1.x + 1).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.p2.y - self.p1.y + 1).max(0) as u32
    }

    pub fn area(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.p1.x && x <= self.p2.x && y >= self.p1.y && y <= self.p2.y
    }

    pub fn contains(&self, other: &Rect) -> bool {
        self.contains_point(other.p1.x, other.p1.y) && self.contains_point(other.p2.x, other.p2.y)
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.p1.x <= other.p2.x
            && other.p1.x <= self.p2.x
            && self.p1.y <= other.p2.y
            && other.p1.y <= self.p2.y
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        if !self.intersects(other) {
            return None;
        }
        Some(Rect::new(
            self.p1.x.max(other.p1.x),
            self.p1.y.max(other.p1.y),
            self.p2.x.min(other.p2.x),
            self.p2.y.min(other.p2.y),
        ))
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect::new(
            self.p1.x.min(other.p1.x),
            self.p1.y.min(other.p1.y),
            self.p2.x.max(other.p2.x),
            self.p2.y.max(other.p2.y),
        )
    }
}

/// Running bounding box of changed pixels inside one tile.
///
/// Starts inverted (`p1` at the tile's max corner, `p2` at its min corner) so
/// the first included pixel collapses it onto that pixel and every later one
/// only grows it outward.
#[derive(Debug, Clone, Copy)]
pub struct DirtyBounds {
    bounds: Rect,
    touched: bool,
}

impl DirtyBounds {
    pub fn new(tile: Rect) -> Self {
        Self {
            bounds: Rect {
                p1: tile.p2,
                p2: tile.p1,
            },
            touched: false,
        }
    }

    pub fn include(&mut self, x: i32, y: i32) {
        self.touched = true;
        self.bounds.p1.x = self.bounds.p1.x.min(x);
        self.bounds.p1.y = self.bounds.p1.y.min(y);
        self.bounds.p2.x = self.bounds.p2.x.max(x);
        self.bounds.p2.y = self.bounds.p2.y.max(y);
    }

    pub fn is_empty(&self) -> bool {
        !self.touched
    }

    /// The tight rectangle, or `None` if nothing was included.
    pub fn finish(self) -> Option<Rect> {
        self.touched.then_some(self.bounds)
    }
}
