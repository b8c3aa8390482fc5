// src/surface/raw.rs

//! Surface over memory the host owns: a base address, a stride and a size,
//! handed over by whatever intercepted the host's surface factory.

use std::ptr::NonNull;

use crate::surface::PixelSurface;

#[derive(Debug)]
pub struct RawSurface {
    base: NonNull<u8>,
    width: u32,
    height: u32,
    depth: u32,
    stride: usize,
}

// SAFETY: the host guarantees the memory outlives the surface, and all access
// goes through `SharedSurface`'s mutex.
unsafe impl Send for RawSurface {}

impl RawSurface {
    /// # Safety
    /// `base` must point at `stride * height` writable bytes that stay valid,
    /// and are not resized, for as long as this surface (or any
    /// `SharedSurface` wrapping it) is alive.
    pub unsafe fn from_raw_parts(
        base: NonNull<u8>,
        width: u32,
        height: u32,
        depth: u32,
        stride: usize,
    ) -> Self {
        Self {
            base,
            width,
            height,
            depth,
            stride,
        }
    }

    fn len(&self) -> usize {
        self.stride * self.height as usize
    }
}

impl PixelSurface for RawSurface {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn depth(&self) -> u32 {
        self.depth
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn bytes(&self) -> &[u8] {
        // SAFETY: see `from_raw_parts`.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr(), self.len()) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: see `from_raw_parts`; `&mut self` makes this the only live slice.
        unsafe { std::slice::from_raw_parts_mut(self.base.as_ptr(), self.len()) }
    }
}
