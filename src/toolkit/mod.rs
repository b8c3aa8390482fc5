// src/toolkit/mod.rs

//! The retained-mode toolkit boundary.
//!
//! - `Toolkit`: the primitives the renderer needs from a toolkit (display,
//!   buffers, flush callback, pointer inputs, layer styles, timer handler)
//! - `HeadlessToolkit`: a software implementation for the binary and tests
//!
//! ## Callbacks
//! Toolkits call back through plain function pointers with no user-data slot.
//! `FlushCallback` therefore receives only the display handle; the renderer
//! finds itself again through a process-wide registry keyed by that handle.
//!
//! ## Threading
//! A toolkit is not reentrant. The renderer keeps it behind the toolkit-state
//! mutex and every method here runs with that lock held.

pub mod headless;

pub use headless::HeadlessToolkit;

use anyhow::Result;
use bitflags::bitflags;
use std::cell::Cell;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::color::Argb;
use crate::geometry::Rect;
use crate::input::PointerDeviceConfig;

static NEXT_DISPLAY_ID: AtomicU32 = AtomicU32::new(1);
static NEXT_INPUT_ID: AtomicU32 = AtomicU32::new(1);

/// Identity of a toolkit display. Unique across the whole process so that it
/// can key the callback registry no matter which toolkit instance issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DisplayHandle(u32);

impl DisplayHandle {
    pub fn allocate() -> Self {
        Self(NEXT_DISPLAY_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for DisplayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "display#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputHandle(u32);

impl InputHandle {
    pub fn allocate() -> Self {
        Self(NEXT_INPUT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// How the toolkit uses the buffer bound to a display. The flush path
/// addresses tiles by screen position, so direct mode is the only one offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// The buffer is screen-sized and every pixel sits at its screen
    /// position; only invalidated areas are redrawn.
    Direct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFormat {
    Argb8888,
    Rgb565,
}

bitflags! {
    /// Layers whose style a call applies to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Layers: u8 {
        /// The active screen object.
        const SCREEN = 1 << 0;
        /// The layer drawn beneath every screen.
        const BOTTOM = 1 << 1;
    }
}

/// Fully transparent opacity.
pub const OPA_TRANSP: u8 = 0;
/// Fully opaque opacity.
pub const OPA_COVER: u8 = 255;

/// Completion token for one flush.
///
/// The flush callback must call [`FlushReady::ready`] once the pixels have
/// been consumed; until then the toolkit treats the buffer as busy.
#[derive(Debug, Default)]
pub struct FlushReady {
    done: Cell<bool>,
}

impl FlushReady {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready(&self) {
        self.done.set(true);
    }

    pub fn is_ready(&self) -> bool {
        self.done.get()
    }
}

/// Called by the toolkit whenever it wants `area` of `pixels` written out.
/// `pixels` is the buffer bound with [`Toolkit::set_buffers`], laid out as its
/// render mode dictates.
pub type FlushCallback = fn(DisplayHandle, &Rect, &[u8], &FlushReady) -> Result<()>;

/// Monotonic millisecond clock the toolkit schedules its timers against.
pub type TickSource = fn() -> u32;

pub trait Toolkit: Send {
    /// Establishes the toolkit's internal state. Fails if already initialized.
    fn init(&mut self) -> Result<()>;

    /// Releases everything `init` set up. Displays and inputs must already be gone.
    fn deinit(&mut self);

    fn set_tick_source(&mut self, source: TickSource);

    fn create_display(&mut self, width: u32, height: u32) -> Result<DisplayHandle>;

    /// Deletes a display, handing back the buffer bound to it, if any.
    fn delete_display(&mut self, display: DisplayHandle) -> Option<Box<[u8]>>;

    /// Binds `buffer` to `display`. The toolkit owns it until the display is deleted.
    fn set_buffers(&mut self, display: DisplayHandle, buffer: Box<[u8]>, mode: RenderMode)
        -> Result<()>;

    fn set_flush_callback(&mut self, display: DisplayHandle, callback: FlushCallback)
        -> Result<()>;

    fn set_color_format(&mut self, display: DisplayHandle, format: ColorFormat) -> Result<()>;

    fn set_bg_color(&mut self, display: DisplayHandle, layers: Layers, color: Argb) -> Result<()>;

    fn set_bg_opa(&mut self, display: DisplayHandle, layers: Layers, opa: u8) -> Result<()>;

    /// Creates a pointer input reading from `device`.
    fn create_pointer_input(&mut self, device: &PointerDeviceConfig) -> Result<InputHandle>;

    fn set_input_display(&mut self, input: InputHandle, display: DisplayHandle) -> Result<()>;

    fn delete_input(&mut self, input: InputHandle);

    /// Runs due timers once: reads inputs, redraws invalidated areas and
    /// flushes them. Returns the milliseconds until the next timer is due.
    fn timer_handler(&mut self) -> Result<u32>;
}
