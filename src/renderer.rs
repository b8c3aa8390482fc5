// src/renderer.rs

//! This module defines the `Renderer`.
//!
//! The `Renderer` owns one toolkit instance bound to a host surface. It
//! creates a screen-sized display in direct render mode, registers the touch
//! and pen inputs, and serves the toolkit's flush callbacks by compositing
//! each flushed tile onto the surface and forwarding the damaged rectangle to
//! a `RefreshSink`.
//!
//! ## Locking
//! Two locks, always taken in the same order:
//! 1. the toolkit-state mutex inside the `Renderer`, held for every toolkit
//!    call including the whole of `tick()`;
//! 2. the surface mutex inside `SharedSurface`, taken by the flush path while
//!    (1) is held.
//!
//! `request_full_refresh` and the hint setters touch neither; they only flip
//! atomics in the `RefreshPolicy`, so any thread may call them at any time.
//!
//! ## Callback routing
//! The flush callback is a plain `fn` that receives only a `DisplayHandle`.
//! The `FlushTarget` it needs is found through a process-wide
//! `InstanceRegistry`, registered in `initialize()` and removed before the
//! display is deleted on drop. A flush for a handle with no live target is
//! acknowledged and otherwise ignored.

use anyhow::{anyhow, Context, Result};
use log::{debug, info, trace};
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::color::{Argb, BYTES_PER_PIXEL};
use crate::compositor::{self, Tile};
use crate::config::Config;
use crate::error::OverlayError;
use crate::geometry::Rect;
use crate::hooks::InstanceRegistry;
use crate::refresh::{RefreshMode, RefreshPolicy, RefreshRequest, RefreshSink};
use crate::surface::SharedSurface;
use crate::toolkit::{
    ColorFormat, DisplayHandle, FlushReady, InputHandle, Layers, RenderMode, Toolkit, OPA_TRANSP,
};

static FLUSH_TARGETS: Lazy<InstanceRegistry<DisplayHandle, FlushTarget>> =
    Lazy::new(InstanceRegistry::new);

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Milliseconds since the first call in this process. Wraps after ~49 days,
/// which toolkits expect of a `u32` tick.
fn monotonic_ms() -> u32 {
    EPOCH.elapsed().as_millis() as u32
}

fn flush_trampoline(
    display: DisplayHandle,
    area: &Rect,
    pixels: &[u8],
    ready: &FlushReady,
) -> Result<()> {
    match FLUSH_TARGETS.lookup(display) {
        Some(target) => target.on_flush(area, pixels, ready),
        None => {
            // Renderer already gone: release the toolkit and drop the pixels.
            trace!("Renderer: flush of {:?} on {} with no live renderer", area, display);
            ready.ready();
            Ok(())
        }
    }
}

/// Counters of what the flush path has done since initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushStats {
    /// Flush callbacks served.
    pub flushes: u64,
    /// Refresh requests handed to the sink.
    pub refreshes: u64,
    /// Surface pixels whose value changed.
    pub changed_pixels: u64,
}

#[derive(Debug, Default)]
struct FlushCounters {
    flushes: AtomicU64,
    refreshes: AtomicU64,
    changed_pixels: AtomicU64,
}

/// Everything a flush needs, shared between the `Renderer` and the registry.
struct FlushTarget {
    surface: SharedSurface,
    width: u32,
    policy: RefreshPolicy,
    sink: Arc<dyn RefreshSink>,
    counters: FlushCounters,
}

impl FlushTarget {
    fn on_flush(&self, area: &Rect, pixels: &[u8], ready: &FlushReady) -> Result<()> {
        let tile = Tile::direct(*area, pixels, self.width)?;
        let damage = compositor::flush(&self.surface, &tile)?;
        let mode = self.policy.resolve(damage.dirty.is_some());

        self.counters.flushes.fetch_add(1, Ordering::Relaxed);
        self.counters
            .changed_pixels
            .fetch_add(damage.changed_pixels as u64, Ordering::Relaxed);

        if let Some(rect) = damage.dirty {
            self.counters.refreshes.fetch_add(1, Ordering::Relaxed);
            self.sink.on_refresh(RefreshRequest { rect, mode });
        }
        ready.ready();
        Ok(())
    }

    fn stats(&self) -> FlushStats {
        FlushStats {
            flushes: self.counters.flushes.load(Ordering::Relaxed),
            refreshes: self.counters.refreshes.load(Ordering::Relaxed),
            changed_pixels: self.counters.changed_pixels.load(Ordering::Relaxed),
        }
    }
}

/// Toolkit objects created by `initialize()`, in acquisition order.
#[derive(Debug)]
struct Resources {
    display: DisplayHandle,
    registered: bool,
    inputs: Vec<InputHandle>,
}

struct ToolkitState<T> {
    toolkit: T,
    resources: Option<Resources>,
}

/// Releases `resources`: the registry entry first so no flush can reach a
/// half-torn-down renderer, then the inputs and display in reverse
/// acquisition order. The display buffer comes back from the toolkit and is
/// dropped here.
fn release<T: Toolkit>(toolkit: &mut T, resources: Resources) {
    if resources.registered {
        FLUSH_TARGETS.unregister(resources.display);
    }
    for input in resources.inputs.iter().rev() {
        toolkit.delete_input(*input);
    }
    if let Some(buffer) = toolkit.delete_display(resources.display) {
        debug!(
            "Renderer: released {} byte compose buffer of {}",
            buffer.len(),
            resources.display
        );
    }
}

pub struct Renderer<T: Toolkit> {
    state: Mutex<ToolkitState<T>>,
    target: Arc<FlushTarget>,
    config: Config,
}

impl<T: Toolkit> Renderer<T> {
    /// Binds a renderer to `surface`. Nothing is created in the toolkit until
    /// [`Renderer::initialize`].
    pub fn new(
        surface: SharedSurface,
        toolkit: T,
        sink: Arc<dyn RefreshSink>,
        config: &Config,
    ) -> Self {
        let target = FlushTarget {
            width: surface.width(),
            surface,
            policy: RefreshPolicy::new(config.refresh.default_hint, config.refresh.forced_flag),
            sink,
            counters: FlushCounters::default(),
        };
        Self {
            state: Mutex::new(ToolkitState {
                toolkit,
                resources: None,
            }),
            target: Arc::new(target),
            config: config.clone(),
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, ToolkitState<T>>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("Renderer: toolkit state lock poisoned"))
    }

    /// Brings up the toolkit against the surface: display, compose buffer,
    /// flush callback, pointer inputs, opaque background and ARGB8888 output.
    /// Fails with `AlreadyInitialized` on a second call.
    pub fn initialize(&self) -> Result<()> {
        let mut state = self.lock_state()?;
        if state.resources.is_some() {
            return Err(OverlayError::AlreadyInitialized.into());
        }

        state.toolkit.init().context("Failed to initialize toolkit")?;
        match self.acquire(&mut state.toolkit) {
            Ok(resources) => {
                info!(
                    "Renderer: initialized {}x{} overlay on {} ({} pointer inputs)",
                    self.target.surface.width(),
                    self.target.surface.height(),
                    resources.display,
                    resources.inputs.len()
                );
                state.resources = Some(resources);
                Ok(())
            }
            Err(e) => {
                state.toolkit.deinit();
                Err(e)
            }
        }
    }

    fn acquire(&self, toolkit: &mut T) -> Result<Resources> {
        Lazy::force(&EPOCH);
        toolkit.set_tick_source(monotonic_ms);
        let (width, height) = (self.target.surface.width(), self.target.surface.height());
        let display = toolkit
            .create_display(width, height)
            .context("Failed to create display")?;
        let mut resources = Resources {
            display,
            registered: false,
            inputs: Vec::with_capacity(2),
        };
        match self.populate(toolkit, &mut resources) {
            Ok(()) => Ok(resources),
            Err(e) => {
                release(toolkit, resources);
                Err(e)
            }
        }
    }

    fn populate(&self, toolkit: &mut T, resources: &mut Resources) -> Result<()> {
        let display = resources.display;
        let (width, height) = (self.target.surface.width(), self.target.surface.height());

        // Direct mode: screen-sized buffer, stride equal to the screen width.
        let buffer = vec![0u8; width as usize * height as usize * BYTES_PER_PIXEL];
        toolkit
            .set_buffers(display, buffer.into_boxed_slice(), RenderMode::Direct)
            .context("Failed to bind compose buffer")?;

        FLUSH_TARGETS.register(display, &self.target)?;
        resources.registered = true;
        toolkit.set_flush_callback(display, flush_trampoline)?;

        for device in [&self.config.input.touch, &self.config.input.pen] {
            let input = toolkit
                .create_pointer_input(device)
                .with_context(|| format!("Failed to open pointer {}", device.path.display()))?;
            resources.inputs.push(input);
            toolkit.set_input_display(input, display)?;
        }

        toolkit.set_bg_color(display, Layers::SCREEN, self.config.renderer.background.to_argb())?;
        toolkit.set_color_format(display, ColorFormat::Argb8888)?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.lock_state()
            .map(|state| state.resources.is_some())
            .unwrap_or(false)
    }

    /// The display created by `initialize()`.
    pub fn display(&self) -> Option<DisplayHandle> {
        self.lock_state()
            .ok()
            .and_then(|state| state.resources.as_ref().map(|r| r.display))
    }

    /// Runs the toolkit's timer handler once. Every flush it triggers is
    /// composited and reported before this returns. Returns the delay in
    /// milliseconds until the toolkit next wants to run.
    pub fn tick(&self) -> Result<u32> {
        let mut state = self.lock_state()?;
        if state.resources.is_none() {
            return Err(OverlayError::NotInitialized.into());
        }
        state.toolkit.timer_handler()
    }

    /// Makes the next refresh emitted `Full`, whatever the standing hint.
    /// Safe from any thread, including while another thread is in `tick()`.
    pub fn request_full_refresh(&self) {
        debug!("Renderer: full refresh requested");
        self.target.policy.request_full_refresh();
    }

    pub fn is_full_refresh_pending(&self) -> bool {
        self.target.policy.is_full_refresh_pending()
    }

    pub fn set_refresh_hint(&self, mode: RefreshMode) {
        self.target.policy.set_global_hint(mode);
    }

    pub fn refresh_hint(&self) -> RefreshMode {
        self.target.policy.global_hint()
    }

    /// Makes the screen and bottom layer backgrounds fully transparent, so a
    /// flush only changes surface pixels under drawn content.
    pub fn enable_transparent_bg(&self) -> Result<()> {
        self.with_toolkit(|toolkit, display| {
            toolkit.set_bg_opa(display, Layers::SCREEN | Layers::BOTTOM, OPA_TRANSP)
        })??;
        info!("Renderer: transparent background enabled");
        Ok(())
    }

    /// Runs `f` with the toolkit and the renderer's display under the
    /// toolkit lock. This is how hosts build and change content.
    pub fn with_toolkit<R>(&self, f: impl FnOnce(&mut T, DisplayHandle) -> R) -> Result<R> {
        let mut state = self.lock_state()?;
        let state = &mut *state;
        let display = state
            .resources
            .as_ref()
            .map(|r| r.display)
            .ok_or(OverlayError::NotInitialized)?;
        Ok(f(&mut state.toolkit, display))
    }

    pub fn surface(&self) -> &SharedSurface {
        &self.target.surface
    }

    pub fn background(&self) -> Argb {
        self.config.renderer.background.to_argb()
    }

    pub fn stats(&self) -> FlushStats {
        self.target.stats()
    }
}

impl<T: Toolkit> Drop for Renderer<T> {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(resources) = state.resources.take() {
            let display = resources.display;
            release(&mut state.toolkit, resources);
            state.toolkit.deinit();
            info!("Renderer: {} torn down", display);
        }
    }
}
