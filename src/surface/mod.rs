// src/surface/mod.rs

//! Lock-guarded access to the host-owned destination surface.
//!
//! - `PixelSurface`: what the host has to provide (geometry + raw bytes)
//! - `SharedSurface`: the clonable, mutex-guarded handle the renderer holds
//! - `SurfaceView`: the row-addressable view handed out while the lock is held
//!
//! The surface lock is its own domain, separate from the toolkit-state lock,
//! and is taken after it on the flush path. Callers of `with_locked_surface`
//! must not reach the toolkit from inside the closure (for example by calling
//! `Renderer::tick` through a captured handle): that takes the locks in the
//! reverse order and deadlocks against a concurrent tick. Nothing enforces
//! this; the closure only receives a `SurfaceView`, but it can capture anything.

pub mod memory;
pub mod raw;

#[cfg(target_os = "linux")]
pub mod fbdev;

pub use memory::MemorySurface;
pub use raw::RawSurface;

#[cfg(target_os = "linux")]
pub use fbdev::FbdevSurface;

use std::sync::{Arc, Mutex};

use crate::color::{Argb, BYTES_PER_PIXEL, SUPPORTED_DEPTH_BITS};
use crate::error::OverlayError;

/// A host-owned pixel surface.
///
/// Geometry must stay constant for the surface's lifetime; the renderer sizes
/// its display and compose buffer from it exactly once.
pub trait PixelSurface: Send {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    /// Pixel depth in bits.
    fn depth(&self) -> u32;
    /// Bytes between the starts of two consecutive rows.
    fn stride(&self) -> usize;
    /// The whole pixel store, at least `stride * height` bytes long.
    fn bytes(&self) -> &[u8];
    fn bytes_mut(&mut self) -> &mut [u8];
}

/// Borrowed, row-addressable view of a locked 32-bit surface.
pub struct SurfaceView<'a> {
    width: u32,
    height: u32,
    depth: u32,
    stride: usize,
    bytes: &'a mut [u8],
}

impl<'a> SurfaceView<'a> {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// The visible part of row `y` (`width * 4` bytes; stride padding excluded).
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.bytes[start..start + self.width as usize * BYTES_PER_PIXEL]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.stride;
        &mut self.bytes[start..start + self.width as usize * BYTES_PER_PIXEL]
    }

    pub fn pixel(&self, x: u32, y: u32) -> Argb {
        let offset = x as usize * BYTES_PER_PIXEL;
        Argb::from_bytes(&self.row(y)[offset..offset + BYTES_PER_PIXEL])
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: Argb) {
        let offset = x as usize * BYTES_PER_PIXEL;
        self.row_mut(y)[offset..offset + BYTES_PER_PIXEL].copy_from_slice(&color.to_bytes());
    }

    pub fn fill(&mut self, color: Argb) {
        let bytes = color.to_bytes();
        for y in 0..self.height {
            for px in self.row_mut(y).chunks_exact_mut(BYTES_PER_PIXEL) {
                px.copy_from_slice(&bytes);
            }
        }
    }
}

/// Clonable handle to the destination surface; every clone shares one lock.
#[derive(Clone)]
pub struct SharedSurface {
    inner: Arc<Mutex<Box<dyn PixelSurface>>>,
    width: u32,
    height: u32,
}

impl std::fmt::Debug for SharedSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSurface")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl SharedSurface {
    /// Wraps a host surface, rejecting anything that is not 32 bits deep or
    /// whose store is shorter than `stride * height`.
    pub fn new<S: PixelSurface + 'static>(surface: S) -> Result<Self, OverlayError> {
        validate(&surface)?;
        Ok(Self {
            width: surface.width(),
            height: surface.height(),
            inner: Arc::new(Mutex::new(Box::new(surface))),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Runs `f` with exclusive access to the pixels.
    ///
    /// The guard is dropped before this returns, on the error path and when
    /// `f` unwinds. A depth other than 32 bits is re-checked here and aborts
    /// the call before `f` sees any pixels.
    ///
    /// `f` must not call back into a `Renderer` sharing this surface; see the
    /// module docs on lock order.
    pub fn with_locked_surface<R>(
        &self,
        f: impl FnOnce(&mut SurfaceView<'_>) -> R,
    ) -> Result<R, OverlayError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| OverlayError::SurfacePoisoned)?;
        let surface: &mut dyn PixelSurface = guard.as_mut();
        validate(surface)?;

        let mut view = SurfaceView {
            width: surface.width(),
            height: surface.height(),
            depth: surface.depth(),
            stride: surface.stride(),
            bytes: surface.bytes_mut(),
        };
        Ok(f(&mut view))
    }
}

fn validate(surface: &dyn PixelSurface) -> Result<(), OverlayError> {
    if surface.depth() != SUPPORTED_DEPTH_BITS {
        return Err(OverlayError::UnsupportedDepth {
            bits: surface.depth(),
        });
    }
    let needed = surface.stride() * surface.height() as usize;
    let row = surface.width() as usize * BYTES_PER_PIXEL;
    let actual = surface.bytes().len();
    if surface.stride() < row || actual < needed {
        return Err(OverlayError::SurfaceBufferTooSmall {
            needed: needed.max(row * surface.height() as usize),
            actual,
        });
    }
    Ok(())
}
