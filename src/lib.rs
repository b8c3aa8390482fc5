// src/lib.rs

//! Framebuffer overlay for a retained-mode UI toolkit.
//!
//! The toolkit draws into a private compose buffer; every flush is alpha
//! blended onto a host-owned 32-bit surface, the tight rectangle of pixels
//! that actually changed is computed, and a PARTIAL or FULL refresh request
//! for that rectangle goes to the downstream display driver.

pub mod bridge;
pub mod color;
pub mod compositor;
pub mod config;
pub mod error;
pub mod geometry;
pub mod hooks;
pub mod input;
pub mod refresh;
pub mod renderer;
pub mod surface;
pub mod toolkit;

pub use color::Argb;
pub use config::Config;
pub use error::OverlayError;
pub use geometry::{Point, Rect};
pub use refresh::{ForcedFlagPolicy, RefreshMode, RefreshRequest, RefreshSink};
pub use renderer::{FlushStats, Renderer};
pub use surface::{MemorySurface, PixelSurface, RawSurface, SharedSurface};
pub use toolkit::{HeadlessToolkit, Toolkit};
