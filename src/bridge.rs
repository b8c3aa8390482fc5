// src/bridge.rs

//! Surface-factory interception.
//!
//! The host creates its framebuffer through a factory function. Hooking that
//! function lets the overlay start as soon as the surface exists: the hook
//! calls the displaced factory, hands the surface to the live
//! `SurfaceConsumer`, and returns the surface to the host unchanged.
//!
//! The hook is a plain `fn`, so both the displaced original and the consumer
//! are found through process-wide tables keyed by the hooked symbol.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::error::OverlayError;
use crate::hooks::{HookTable, InstanceRegistry};
use crate::refresh::RefreshSink;
use crate::renderer::Renderer;
use crate::surface::SharedSurface;
use crate::toolkit::Toolkit;

/// Host function that produces the framebuffer surface.
pub type SurfaceFactory = fn() -> Result<SharedSurface>;

/// Symbol the surface hook is installed on.
pub const SURFACE_FACTORY_SYMBOL: &str = "create_framebuffer";

static SURFACE_HOOKS: Lazy<HookTable<SurfaceFactory>> = Lazy::new(HookTable::new);

static SURFACE_CONSUMERS: Lazy<InstanceRegistry<&'static str, dyn SurfaceConsumer>> =
    Lazy::new(InstanceRegistry::new);

/// Receives the host surface once the factory has produced it.
pub trait SurfaceConsumer: Send + Sync {
    fn attach_surface(&self, surface: SharedSurface) -> Result<()>;
}

/// Puts [`surface_factory_hook`] in place of `original`, delivering surfaces to
/// `consumer`. The consumer is held weakly; drop it and the hook fails with
/// `NoLiveInstance`.
pub fn install_surface_hook(
    original: SurfaceFactory,
    consumer: &Arc<dyn SurfaceConsumer>,
) -> Result<()> {
    SURFACE_HOOKS.install(SURFACE_FACTORY_SYMBOL, original, surface_factory_hook)?;
    if let Err(e) = SURFACE_CONSUMERS.register(SURFACE_FACTORY_SYMBOL, consumer) {
        SURFACE_HOOKS.uninstall(SURFACE_FACTORY_SYMBOL);
        return Err(e.into());
    }
    info!("Bridge: hooked '{}'", SURFACE_FACTORY_SYMBOL);
    Ok(())
}

/// Removes the hook, returning the original factory if one was installed.
pub fn uninstall_surface_hook() -> Option<SurfaceFactory> {
    SURFACE_CONSUMERS.unregister(SURFACE_FACTORY_SYMBOL);
    let entry = SURFACE_HOOKS.uninstall(SURFACE_FACTORY_SYMBOL)?;
    info!("Bridge: unhooked '{}'", SURFACE_FACTORY_SYMBOL);
    Some(entry.original)
}

/// Replacement for the host's surface factory.
pub fn surface_factory_hook() -> Result<SharedSurface> {
    let original = SURFACE_HOOKS
        .original(SURFACE_FACTORY_SYMBOL)
        .ok_or_else(|| OverlayError::NoLiveInstance(SURFACE_FACTORY_SYMBOL.to_string()))?;
    let consumer = SURFACE_CONSUMERS.require(SURFACE_FACTORY_SYMBOL)?;

    let surface = original().context("Host surface factory failed")?;
    debug!(
        "Bridge: host produced a {}x{} surface",
        surface.width(),
        surface.height()
    );
    consumer
        .attach_surface(surface.clone())
        .context("Failed to attach overlay to host surface")?;
    Ok(surface)
}

/// A `SurfaceConsumer` that brings up a `Renderer` on the first surface it is
/// given.
///
/// Each attach builds its toolkit with `make_toolkit`, so an attach whose
/// initialization fails leaves the app ready for the next surface.
pub struct OverlayApp<T: Toolkit> {
    config: Config,
    sink: Arc<dyn RefreshSink>,
    make_toolkit: fn() -> T,
    renderer: Mutex<Option<Arc<Renderer<T>>>>,
}

impl<T: Toolkit> OverlayApp<T> {
    pub fn new(make_toolkit: fn() -> T, sink: Arc<dyn RefreshSink>, config: Config) -> Self {
        Self {
            config,
            sink,
            make_toolkit,
            renderer: Mutex::new(None),
        }
    }

    /// The renderer built by `attach_surface`, once there is one.
    pub fn renderer(&self) -> Option<Arc<Renderer<T>>> {
        match self.renderer.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl<T: Toolkit + 'static> SurfaceConsumer for OverlayApp<T> {
    fn attach_surface(&self, surface: SharedSurface) -> Result<()> {
        let mut slot = self
            .renderer
            .lock()
            .map_err(|_| anyhow::anyhow!("OverlayApp: renderer slot poisoned"))?;
        if slot.is_some() {
            return Err(OverlayError::AlreadyInitialized.into());
        }

        let toolkit = (self.make_toolkit)();
        let renderer = Renderer::new(surface, toolkit, Arc::clone(&self.sink), &self.config);
        renderer
            .initialize()
            .context("OverlayApp: renderer initialization failed")?;
        if self.config.renderer.transparent_background {
            renderer.enable_transparent_bg()?;
        } else {
            warn!("OverlayApp: opaque background will cover the host surface");
        }
        *slot = Some(Arc::new(renderer));
        Ok(())
    }
}
