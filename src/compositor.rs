// src/compositor.rs

//! The tile compositor: blends one flushed tile onto the shared surface and
//! reports the tight bounding box of pixels that actually changed.
//!
//! Tile geometry is a trusted input. The toolkit never hands out an area that
//! falls outside the display it created from the surface, so release builds
//! only get the bounds checks that slice indexing already performs; debug
//! builds assert containment up front.

use log::debug;

use crate::color::{blend_over, Argb, BYTES_PER_PIXEL};
use crate::error::OverlayError;
use crate::geometry::{DirtyBounds, Point, Rect};
use crate::surface::{SharedSurface, SurfaceView};

/// A rectangle of freshly rendered pixels, borrowed for one flush.
///
/// Pixel `(x, y)` of the area lives at
/// `(y - origin.y) * stride + (x - origin.x) * 4` in `pixels`.
#[derive(Debug, Clone, Copy)]
pub struct Tile<'a> {
    area: Rect,
    pixels: &'a [u8],
    origin: Point,
    stride: usize,
}

impl<'a> Tile<'a> {
    /// A tile whose buffer holds exactly the area, row after row.
    pub fn packed(area: Rect, pixels: &'a [u8]) -> Result<Self, OverlayError> {
        Self::new(area, pixels, area.p1, area.width() as usize * BYTES_PER_PIXEL)
    }

    /// A tile addressed inside a full-screen buffer `width` pixels wide, the
    /// layout the toolkit uses in direct render mode.
    pub fn direct(area: Rect, buffer: &'a [u8], width: u32) -> Result<Self, OverlayError> {
        Self::new(area, buffer, Point::new(0, 0), width as usize * BYTES_PER_PIXEL)
    }

    fn new(area: Rect, pixels: &'a [u8], origin: Point, stride: usize) -> Result<Self, OverlayError> {
        debug_assert!(area.is_valid(), "inverted tile area {area:?}");
        debug_assert!(area.p1.x >= origin.x && area.p1.y >= origin.y);
        let last_row = (area.p2.y - origin.y) as usize;
        let row_end = (area.p2.x - origin.x + 1) as usize * BYTES_PER_PIXEL;
        let needed = last_row * stride + row_end;
        if pixels.len() < needed {
            return Err(OverlayError::TileBufferTooSmall {
                area,
                needed,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            area,
            pixels,
            origin,
            stride,
        })
    }

    pub fn area(&self) -> Rect {
        self.area
    }

    /// Source pixels of row `y`, columns `x1..=x2`.
    fn row(&self, y: i32) -> &'a [u8] {
        let start = (y - self.origin.y) as usize * self.stride
            + (self.area.p1.x - self.origin.x) as usize * BYTES_PER_PIXEL;
        &self.pixels[start..start + self.area.width() as usize * BYTES_PER_PIXEL]
    }
}

/// What a flush did to the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushDamage {
    /// Tight bounds of the changed pixels, `None` if nothing changed.
    pub dirty: Option<Rect>,
    pub changed_pixels: usize,
}

/// Blends `tile` onto an already-locked surface.
pub fn composite_tile(view: &mut SurfaceView<'_>, tile: &Tile<'_>) -> FlushDamage {
    let area = tile.area;
    debug_assert!(
        Rect::from_size(view.width(), view.height()).contains(&area),
        "tile {area:?} outside {}x{} surface",
        view.width(),
        view.height()
    );

    let mut bounds = DirtyBounds::new(area);
    let mut changed_pixels = 0;
    let x_start = area.p1.x as usize * BYTES_PER_PIXEL;

    for y in area.p1.y..=area.p2.y {
        let src_row = tile.row(y);
        let dst_row = view.row_mut(y as u32);
        let dst_row = &mut dst_row[x_start..x_start + src_row.len()];

        let pairs = src_row
            .chunks_exact(BYTES_PER_PIXEL)
            .zip(dst_row.chunks_exact_mut(BYTES_PER_PIXEL));
        for (x, (src, dst)) in (area.p1.x..).zip(pairs) {
            let before = Argb::from_bytes(dst);
            let after = blend_over(before, Argb::from_bytes(src));
            if after != before {
                dst.copy_from_slice(&after.to_bytes());
                bounds.include(x, y);
                changed_pixels += 1;
            }
        }
    }

    FlushDamage {
        dirty: bounds.finish(),
        changed_pixels,
    }
}

/// Locks `surface`, blends `tile` onto it and returns the damage.
pub fn flush(surface: &SharedSurface, tile: &Tile<'_>) -> Result<FlushDamage, OverlayError> {
    let damage = surface.with_locked_surface(|view| composite_tile(view, tile))?;
    debug!(
        "requested flushing area: {:?}; actual flushing area: {:?} ({} px changed)",
        tile.area, damage.dirty, damage.changed_pixels
    );
    Ok(damage)
}
