// src/error.rs

//! Error taxonomy for the overlay core.
//!
//! Everything here is a precondition failure: the call that hit it is aborted
//! and the error is propagated to whoever drove it (usually `Renderer::tick`).
//! Toolkit-facing code wraps these in `anyhow::Error`; use
//! `err.downcast_ref::<OverlayError>()` to recover the variant.

use thiserror::Error;

use crate::geometry::Rect;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OverlayError {
    #[error("unsupported surface depth: {bits} bits per pixel (expected 32)")]
    UnsupportedDepth { bits: u32 },
    #[error("renderer is already initialized")]
    AlreadyInitialized,
    #[error("renderer is not initialized")]
    NotInitialized,
    #[error("no live instance registered for '{0}'")]
    NoLiveInstance(String),
    #[error("'{0}' is already registered")]
    AlreadyRegistered(String),
    #[error("tile buffer too small for {area:?}: need {needed} bytes, got {actual}")]
    TileBufferTooSmall {
        area: Rect,
        needed: usize,
        actual: usize,
    },
    #[error("surface buffer too small: need {needed} bytes, got {actual}")]
    SurfaceBufferTooSmall { needed: usize, actual: usize },
    #[error("surface lock poisoned by a panicking writer")]
    SurfacePoisoned,
    #[error("unsupported color format: {0}")]
    UnsupportedColorFormat(String),
}
