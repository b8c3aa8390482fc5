// src/surface/memory.rs

//! Heap-backed surface. Stands in for the host surface in the headless binary
//! and in tests.

use crate::color::{Argb, BYTES_PER_PIXEL, SUPPORTED_DEPTH_BITS};
use crate::surface::PixelSurface;

#[derive(Debug, Clone)]
pub struct MemorySurface {
    width: u32,
    height: u32,
    stride: usize,
    bytes: Vec<u8>,
}

impl MemorySurface {
    /// Tightly packed surface, zero-filled (transparent black).
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_stride(width, height, width as usize * BYTES_PER_PIXEL)
    }

    /// Surface whose rows are `stride` bytes apart. `stride` must be at least
    /// `width * 4`.
    pub fn with_stride(width: u32, height: u32, stride: usize) -> Self {
        Self {
            width,
            height,
            stride,
            bytes: vec![0; stride * height as usize],
        }
    }

    pub fn filled(width: u32, height: u32, color: Argb) -> Self {
        let mut surface = Self::new(width, height);
        for px in surface.bytes.chunks_exact_mut(BYTES_PER_PIXEL) {
            px.copy_from_slice(&color.to_bytes());
        }
        surface
    }
}

impl PixelSurface for MemorySurface {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn depth(&self) -> u32 {
        SUPPORTED_DEPTH_BITS
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}
