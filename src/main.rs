// src/main.rs

//! `fb-overlay`: runs the overlay against an in-memory or fbdev surface with
//! the headless toolkit and logs every refresh request.
//!
//! Usage: `fb-overlay [config.json] [ticks]`

use anyhow::{bail, Context};
use log::{error, info};
use once_cell::sync::OnceCell;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fb_overlay::bridge::{self, OverlayApp, SurfaceConsumer};
use fb_overlay::config::{SurfaceBackend, SurfaceConfig};
use fb_overlay::toolkit::HeadlessToolkit;
use fb_overlay::{Argb, Config, Rect, RefreshRequest, RefreshSink, SharedSurface};

const DEFAULT_TICKS: u32 = 120;

/// Surface settings for `open_host_surface`, which as a factory takes no arguments.
static SURFACE_CONFIG: OnceCell<SurfaceConfig> = OnceCell::new();

/// Stands in for the host's framebuffer factory.
fn open_host_surface() -> anyhow::Result<SharedSurface> {
    let Some(config) = SURFACE_CONFIG.get() else {
        bail!("surface configuration not set");
    };
    match config.backend {
        SurfaceBackend::Memory => Ok(SharedSurface::new(fb_overlay::MemorySurface::filled(
            config.width,
            config.height,
            Argb::WHITE,
        ))?),
        #[cfg(target_os = "linux")]
        SurfaceBackend::Fbdev => Ok(SharedSurface::new(
            fb_overlay::surface::FbdevSurface::open(&config.fbdev_path)?,
        )?),
        #[cfg(not(target_os = "linux"))]
        SurfaceBackend::Fbdev => bail!("fbdev surfaces are only available on Linux"),
    }
}

/// Main entry point for the `fb-overlay` application.
fn main() -> anyhow::Result<()> {
    // Initialize the logger. Default filter is "info" if RUST_LOG is not set.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    info!("Starting fb-overlay...");

    // --- Configuration ---
    let mut args = std::env::args().skip(1);
    let config_path = args.next().map(PathBuf::from);
    let ticks = match args.next() {
        Some(n) => n
            .parse::<u32>()
            .with_context(|| format!("Invalid tick count '{}'", n))?,
        None => DEFAULT_TICKS,
    };
    let config = Config::load_or_default(config_path.as_deref())?;
    SURFACE_CONFIG
        .set(config.surface.clone())
        .map_err(|_| anyhow::anyhow!("surface configuration already set"))?;

    // --- Overlay bring-up through the surface hook ---
    let sink: Arc<dyn RefreshSink> = Arc::new(|request: RefreshRequest| {
        info!(
            "Refresh {:?} ({},{})-({},{})",
            request.mode, request.rect.p1.x, request.rect.p1.y, request.rect.p2.x, request.rect.p2.y
        );
    });
    let app = Arc::new(OverlayApp::new(HeadlessToolkit::new, sink, config.clone()));
    let consumer: Arc<dyn SurfaceConsumer> = app.clone();
    bridge::install_surface_hook(open_host_surface, &consumer)
        .context("Failed to install surface hook")?;

    // The host would call its factory here and land in the hook.
    let surface = bridge::surface_factory_hook()?;
    info!(
        "Host surface {}x{} ready",
        surface.width(),
        surface.height()
    );
    let renderer = app
        .renderer()
        .context("Overlay did not start on the host surface")?;

    // --- Demo content ---
    let (w, h) = (surface.width() as i32, surface.height() as i32);
    renderer.with_toolkit(|toolkit, display| {
        toolkit.fill_rect(display, Rect::new(w / 8, h / 8, w / 2, h / 4), Argb::BLACK)?;
        toolkit.fill_rect(
            display,
            Rect::new(w / 4, h / 2, w - w / 4, h - h / 8),
            Argb::new(128, 0, 0, 0),
        )
    })??;

    // --- Main tick loop ---
    let interval = Duration::from_millis(config.renderer.tick_interval_ms);
    info!("Running {} ticks every {:?}", ticks, interval);
    for n in 0..ticks {
        if let Err(e) = renderer.tick() {
            error!("Tick {} failed: {:#}. Exiting.", n, e);
            break;
        }
        if n == ticks / 2 {
            renderer.request_full_refresh();
            renderer.with_toolkit(|toolkit, display| {
                toolkit.fill_rect(display, Rect::new(0, 0, w - 1, h / 16), Argb::BLACK)
            })??;
        }
        std::thread::sleep(interval);
    }

    let stats = renderer.stats();
    info!(
        "Done: {} flushes, {} refreshes, {} pixels changed",
        stats.flushes, stats.refreshes, stats.changed_pixels
    );

    // --- Cleanup ---
    drop(renderer);
    drop(consumer);
    drop(app);
    bridge::uninstall_surface_hook();
    info!("fb-overlay exited successfully.");
    Ok(())
}
