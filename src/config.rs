// src/config.rs

//! Configuration for the overlay renderer.
//!
//! Every section derives `Deserialize` with `#[serde(default)]`, so a JSON
//! file only needs the keys it wants to change:
//!
//! ```json
//! { "refresh": { "forced_flag": "persist_until_emitted" },
//!   "input": { "pen": { "path": "/dev/input/event1",
//!                       "calibration": { "min_x": 0, "min_y": 0, "max_x": 20967, "max_y": 15725 } } } }
//! ```

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::color::Rgb;
use crate::input::PointerDeviceConfig;
use crate::refresh::{ForcedFlagPolicy, RefreshMode};

// --- Top-Level Configuration Structure ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub renderer: RendererConfig,
    pub refresh: RefreshConfig,
    pub input: InputConfig,
    pub surface: SurfaceConfig,
}

impl Config {
    /// Reads a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_json(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// `load(path)` when a path is given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                info!("No config file given, using defaults");
                Ok(Self::default())
            }
        }
    }
}

// --- Renderer ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Interval between `tick()` calls when the binary drives the loop.
    pub tick_interval_ms: u64,
    /// Opaque background set on the screen layer at initialization.
    pub background: Rgb,
    /// Make the screen and bottom layers transparent once the renderer is up,
    /// so only drawn content reaches the host surface.
    pub transparent_background: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        RendererConfig {
            tick_interval_ms: 16,
            background: Rgb::WHITE,
            transparent_background: true,
        }
    }
}

// --- Refresh ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RefreshConfig {
    /// Standing hint reported with every refresh that is not forced full.
    pub default_hint: RefreshMode,
    /// When a forced full refresh request is consumed.
    pub forced_flag: ForcedFlagPolicy,
}

// --- Input ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub touch: PointerDeviceConfig,
    pub pen: PointerDeviceConfig,
}

impl Default for InputConfig {
    fn default() -> Self {
        InputConfig {
            touch: PointerDeviceConfig::default_touch(),
            pen: PointerDeviceConfig::default_pen(),
        }
    }
}

// --- Surface ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceBackend {
    /// Heap buffer of `width` x `height`.
    #[default]
    Memory,
    /// Linux framebuffer device at `fbdev_path`.
    Fbdev,
}

/// Where the binary gets its destination surface from. Library users hand a
/// `SharedSurface` to the renderer directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub backend: SurfaceBackend,
    pub width: u32,
    pub height: u32,
    pub fbdev_path: PathBuf,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        SurfaceConfig {
            backend: SurfaceBackend::Memory,
            width: 1404,
            height: 1872,
            fbdev_path: PathBuf::from("/dev/fb0"),
        }
    }
}
