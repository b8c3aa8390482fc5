// src/input.rs

//! Pointer input sources: device path, raw-coordinate calibration and the
//! mapping from raw device coordinates onto the display.
//!
//! Device discovery and raw event delivery belong to the toolkit; this module
//! only describes the two pointer sources the renderer registers and how their
//! raw samples land on screen.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::geometry::Point;

/// Raw-coordinate range reported by a pointer device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calibration {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl Calibration {
    pub const fn new(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Maps a raw sample onto a `width` x `height` display, clamped to its
    /// edges. Inverted ranges (`min > max`) flip the axis.
    pub fn map(&self, raw_x: i32, raw_y: i32, width: u32, height: u32) -> Point {
        Point::new(
            map_axis(raw_x, self.min_x, self.max_x, width),
            map_axis(raw_y, self.min_y, self.max_y, height),
        )
    }
}

fn map_axis(raw: i32, min: i32, max: i32, extent: u32) -> i32 {
    if extent == 0 {
        return 0;
    }
    let last = extent as i64 - 1;
    if min == max {
        return 0;
    }
    let scaled = (raw as i64 - min as i64) * extent as i64 / (max as i64 - min as i64);
    scaled.clamp(0, last) as i32
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerDeviceConfig {
    pub path: PathBuf,
    pub calibration: Calibration,
}

impl PointerDeviceConfig {
    /// Capacitive touch digitizer.
    pub fn default_touch() -> Self {
        Self {
            path: PathBuf::from("/dev/input/event3"),
            calibration: Calibration::new(0, 0, 2058, 2826),
        }
    }

    /// Stylus digitizer.
    pub fn default_pen() -> Self {
        Self {
            path: PathBuf::from("/dev/input/event2"),
            calibration: Calibration::new(0, 0, 11172, 15328),
        }
    }
}

/// A pointer sample after calibration, as dispatched by the toolkit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerEvent {
    pub point: Point,
    pub pressed: bool,
}
