// src/toolkit/headless.rs

//! Headless software toolkit.
//!
//! Keeps a flat list of filled rectangles per display instead of a widget
//! tree, but otherwise behaves the way the renderer expects a real toolkit to:
//! style changes and new content invalidate areas, `timer_handler` redraws the
//! invalidated areas into the bound buffer and hands them to the flush
//! callback, and an unacknowledged flush keeps the display busy until
//! `flush_ready` is called.

use anyhow::{anyhow, bail, Result};
use log::{debug, info, trace, warn};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

use crate::color::{blend_over, Argb, BYTES_PER_PIXEL};
use crate::error::OverlayError;
use crate::geometry::Rect;
use crate::input::{PointerDeviceConfig, PointerEvent};
use crate::toolkit::{
    ColorFormat, DisplayHandle, FlushCallback, FlushReady, InputHandle, Layers, RenderMode,
    TickSource, Toolkit, OPA_COVER, OPA_TRANSP,
};

/// Period reported back from `timer_handler`.
pub const DEFAULT_REFRESH_PERIOD_MS: u32 = 33;

#[derive(Debug, Clone, Copy)]
struct FilledRect {
    area: Rect,
    color: Argb,
}

#[derive(Debug, Clone, Copy)]
struct LayerStyle {
    color: Argb,
    opa: u8,
}

impl LayerStyle {
    fn fill(&self) -> Argb {
        let alpha = (self.color.a as u32 * self.opa as u32 / 255) as u8;
        self.color.with_alpha(alpha)
    }
}

struct HeadlessDisplay {
    width: u32,
    height: u32,
    buffer: Option<Box<[u8]>>,
    mode: RenderMode,
    flush_cb: Option<FlushCallback>,
    format: ColorFormat,
    screen: LayerStyle,
    bottom: LayerStyle,
    rects: Vec<FilledRect>,
    invalid: Vec<Rect>,
    flush_pending: bool,
    flush_count: usize,
    pointer_events: Vec<(InputHandle, PointerEvent)>,
}

impl HeadlessDisplay {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            buffer: None,
            mode: RenderMode::Direct,
            flush_cb: None,
            format: ColorFormat::Argb8888,
            screen: LayerStyle {
                color: Argb::WHITE,
                opa: OPA_COVER,
            },
            bottom: LayerStyle {
                color: Argb::BLACK,
                opa: OPA_TRANSP,
            },
            rects: Vec::new(),
            invalid: Vec::new(),
            flush_pending: false,
            flush_count: 0,
            pointer_events: Vec::new(),
        }
    }

    fn bounds(&self) -> Rect {
        Rect::from_size(self.width, self.height)
    }

    fn invalidate(&mut self, area: Rect) {
        let Some(mut area) = area.intersection(&self.bounds()) else {
            return;
        };
        // Fold every overlapping area into the new one until none overlap.
        loop {
            let before = self.invalid.len();
            self.invalid.retain(|existing| {
                if existing.intersects(&area) {
                    area = area.union(existing);
                    false
                } else {
                    true
                }
            });
            if self.invalid.len() == before {
                break;
            }
        }
        self.invalid.push(area);
    }

    fn invalidate_all(&mut self) {
        self.invalid.clear();
        self.invalid.push(self.bounds());
    }

    fn compose_pixel(&self, x: i32, y: i32) -> Argb {
        let mut px = blend_over(Argb::TRANSPARENT, self.bottom.fill());
        px = blend_over(px, self.screen.fill());
        for rect in self.rects.iter().filter(|r| r.area.contains_point(x, y)) {
            px = blend_over(px, rect.color);
        }
        px
    }

    /// Renders `area` into the screen-sized `buffer` at its screen offsets.
    fn render(&self, area: &Rect, buffer: &mut [u8]) {
        let stride = self.width as usize * BYTES_PER_PIXEL;
        for y in area.p1.y..=area.p2.y {
            let row = y as usize * stride;
            for x in area.p1.x..=area.p2.x {
                let offset = row + x as usize * BYTES_PER_PIXEL;
                buffer[offset..offset + BYTES_PER_PIXEL]
                    .copy_from_slice(&self.compose_pixel(x, y).to_bytes());
            }
        }
    }
}

struct HeadlessInput {
    device: PointerDeviceConfig,
    display: Option<DisplayHandle>,
    pending: VecDeque<(i32, i32, bool)>,
}

pub struct HeadlessToolkit {
    initialized: bool,
    tick_source: Option<TickSource>,
    last_tick_ms: u32,
    refresh_period_ms: u32,
    displays: BTreeMap<DisplayHandle, HeadlessDisplay>,
    inputs: BTreeMap<InputHandle, HeadlessInput>,
}

impl Default for HeadlessToolkit {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessToolkit {
    pub fn new() -> Self {
        Self {
            initialized: false,
            tick_source: None,
            last_tick_ms: 0,
            refresh_period_ms: DEFAULT_REFRESH_PERIOD_MS,
            displays: BTreeMap::new(),
            inputs: BTreeMap::new(),
        }
    }

    fn display(&self, display: DisplayHandle) -> Result<&HeadlessDisplay> {
        self.displays
            .get(&display)
            .ok_or_else(|| anyhow!("unknown {}", display))
    }

    fn display_mut(&mut self, display: DisplayHandle) -> Result<&mut HeadlessDisplay> {
        self.displays
            .get_mut(&display)
            .ok_or_else(|| anyhow!("unknown {}", display))
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn last_tick_ms(&self) -> u32 {
        self.last_tick_ms
    }

    pub fn display_count(&self) -> usize {
        self.displays.len()
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Adds a filled rectangle on top of the display's content.
    pub fn fill_rect(&mut self, display: DisplayHandle, area: Rect, color: Argb) -> Result<()> {
        let d = self.display_mut(display)?;
        d.rects.push(FilledRect { area, color });
        d.invalidate(area);
        Ok(())
    }

    /// Removes all content, leaving only the layer backgrounds.
    pub fn clear(&mut self, display: DisplayHandle) -> Result<()> {
        let d = self.display_mut(display)?;
        d.rects.clear();
        d.invalidate_all();
        Ok(())
    }

    pub fn invalidate(&mut self, display: DisplayHandle, area: Rect) -> Result<()> {
        self.display_mut(display)?.invalidate(area);
        Ok(())
    }

    pub fn invalid_areas(&self, display: DisplayHandle) -> Result<Vec<Rect>> {
        Ok(self.display(display)?.invalid.clone())
    }

    /// Acknowledges a flush out of band, releasing a busy display.
    pub fn flush_ready(&mut self, display: DisplayHandle) -> Result<()> {
        self.display_mut(display)?.flush_pending = false;
        Ok(())
    }

    pub fn is_flush_pending(&self, display: DisplayHandle) -> Result<bool> {
        Ok(self.display(display)?.flush_pending)
    }

    pub fn flush_count(&self, display: DisplayHandle) -> Result<usize> {
        Ok(self.display(display)?.flush_count)
    }

    pub fn render_mode(&self, display: DisplayHandle) -> Result<RenderMode> {
        Ok(self.display(display)?.mode)
    }

    pub fn color_format(&self, display: DisplayHandle) -> Result<ColorFormat> {
        Ok(self.display(display)?.format)
    }

    /// The effective background fill of the screen and bottom layers.
    pub fn layer_fills(&self, display: DisplayHandle) -> Result<(Argb, Argb)> {
        let d = self.display(display)?;
        Ok((d.screen.fill(), d.bottom.fill()))
    }

    pub fn input_for_device(&self, path: &Path) -> Option<InputHandle> {
        self.inputs
            .iter()
            .find(|(_, input)| input.device.path == path)
            .map(|(handle, _)| *handle)
    }

    pub fn input_display(&self, input: InputHandle) -> Option<DisplayHandle> {
        self.inputs.get(&input).and_then(|i| i.display)
    }

    /// Queues a raw device sample, read on the next `timer_handler`.
    pub fn push_raw_pointer(
        &mut self,
        input: InputHandle,
        raw_x: i32,
        raw_y: i32,
        pressed: bool,
    ) -> Result<()> {
        let input = self
            .inputs
            .get_mut(&input)
            .ok_or_else(|| anyhow!("unknown input {:?}", input))?;
        input.pending.push_back((raw_x, raw_y, pressed));
        Ok(())
    }

    /// Drains the pointer events dispatched to `display`.
    pub fn take_pointer_events(
        &mut self,
        display: DisplayHandle,
    ) -> Result<Vec<(InputHandle, PointerEvent)>> {
        Ok(std::mem::take(&mut self.display_mut(display)?.pointer_events))
    }

    fn read_inputs(&mut self) {
        for (handle, input) in self.inputs.iter_mut() {
            let Some(display) = input.display else {
                continue;
            };
            let Some(d) = self.displays.get_mut(&display) else {
                continue;
            };
            while let Some((raw_x, raw_y, pressed)) = input.pending.pop_front() {
                let point = input
                    .device
                    .calibration
                    .map(raw_x, raw_y, d.width, d.height);
                trace!(
                    "HeadlessToolkit: {} raw ({}, {}) -> {:?}",
                    input.device.path.display(),
                    raw_x,
                    raw_y,
                    point
                );
                d.pointer_events.push((*handle, PointerEvent { point, pressed }));
            }
        }
    }

    fn refresh(&mut self, handle: DisplayHandle) -> Result<()> {
        let Some(d) = self.displays.get_mut(&handle) else {
            return Ok(());
        };
        if d.flush_pending {
            trace!("HeadlessToolkit: {} still flushing, skipping refresh", handle);
            return Ok(());
        }
        let Some(callback) = d.flush_cb else {
            return Ok(());
        };
        if d.invalid.is_empty() {
            return Ok(());
        }
        if d.format != ColorFormat::Argb8888 {
            return Err(OverlayError::UnsupportedColorFormat(format!("{:?}", d.format)).into());
        }
        let Some(mut buffer) = d.buffer.take() else {
            return Ok(());
        };

        let mut areas: VecDeque<Rect> = d.invalid.drain(..).collect();
        let mut result = Ok(());
        while let Some(area) = areas.pop_front() {
            d.render(&area, &mut buffer);
            let ready = FlushReady::new();
            d.flush_count += 1;
            if let Err(e) = callback(handle, &area, &buffer, &ready) {
                // Not composited, so it still needs drawing.
                areas.push_front(area);
                result = Err(e);
                break;
            }
            if !ready.is_ready() {
                warn!(
                    "HeadlessToolkit: flush of {:?} on {} was not acknowledged",
                    area, handle
                );
                d.flush_pending = true;
                break;
            }
        }
        // Whatever was not flushed stays invalid for the next tick.
        d.invalid.extend(areas);
        d.buffer = Some(buffer);
        result
    }
}

impl Toolkit for HeadlessToolkit {
    fn init(&mut self) -> Result<()> {
        if self.initialized {
            bail!("HeadlessToolkit already initialized");
        }
        self.initialized = true;
        info!("HeadlessToolkit: initialized");
        Ok(())
    }

    fn deinit(&mut self) {
        if !self.displays.is_empty() || !self.inputs.is_empty() {
            warn!(
                "HeadlessToolkit: deinit with {} displays and {} inputs still alive",
                self.displays.len(),
                self.inputs.len()
            );
        }
        self.initialized = false;
        self.tick_source = None;
        info!("HeadlessToolkit: deinitialized");
    }

    fn set_tick_source(&mut self, source: TickSource) {
        self.tick_source = Some(source);
    }

    fn create_display(&mut self, width: u32, height: u32) -> Result<DisplayHandle> {
        if !self.initialized {
            bail!("HeadlessToolkit: create_display before init");
        }
        if width == 0 || height == 0 {
            bail!("HeadlessToolkit: cannot create a {}x{} display", width, height);
        }
        let handle = DisplayHandle::allocate();
        self.displays.insert(handle, HeadlessDisplay::new(width, height));
        debug!("HeadlessToolkit: created {} ({}x{})", handle, width, height);
        Ok(handle)
    }

    fn delete_display(&mut self, display: DisplayHandle) -> Option<Box<[u8]>> {
        let removed = self.displays.remove(&display)?;
        for input in self.inputs.values_mut() {
            if input.display == Some(display) {
                input.display = None;
            }
        }
        debug!("HeadlessToolkit: deleted {}", display);
        removed.buffer
    }

    fn set_buffers(
        &mut self,
        display: DisplayHandle,
        buffer: Box<[u8]>,
        mode: RenderMode,
    ) -> Result<()> {
        let d = self.display_mut(display)?;
        let needed = match mode {
            RenderMode::Direct => d.width as usize * BYTES_PER_PIXEL * d.height as usize,
        };
        if buffer.len() < needed {
            bail!(
                "HeadlessToolkit: {:?} buffer for {} needs {} bytes, got {}",
                mode,
                display,
                needed,
                buffer.len()
            );
        }
        d.buffer = Some(buffer);
        d.mode = mode;
        d.invalidate_all();
        Ok(())
    }

    fn set_flush_callback(&mut self, display: DisplayHandle, callback: FlushCallback) -> Result<()> {
        self.display_mut(display)?.flush_cb = Some(callback);
        Ok(())
    }

    fn set_color_format(&mut self, display: DisplayHandle, format: ColorFormat) -> Result<()> {
        let d = self.display_mut(display)?;
        d.format = format;
        d.invalidate_all();
        Ok(())
    }

    fn set_bg_color(&mut self, display: DisplayHandle, layers: Layers, color: Argb) -> Result<()> {
        let d = self.display_mut(display)?;
        if layers.contains(Layers::SCREEN) {
            d.screen.color = color;
        }
        if layers.contains(Layers::BOTTOM) {
            d.bottom.color = color;
        }
        d.invalidate_all();
        Ok(())
    }

    fn set_bg_opa(&mut self, display: DisplayHandle, layers: Layers, opa: u8) -> Result<()> {
        let d = self.display_mut(display)?;
        if layers.contains(Layers::SCREEN) {
            d.screen.opa = opa;
        }
        if layers.contains(Layers::BOTTOM) {
            d.bottom.opa = opa;
        }
        d.invalidate_all();
        Ok(())
    }

    fn create_pointer_input(&mut self, device: &PointerDeviceConfig) -> Result<InputHandle> {
        if !self.initialized {
            bail!("HeadlessToolkit: create_pointer_input before init");
        }
        let handle = InputHandle::allocate();
        self.inputs.insert(
            handle,
            HeadlessInput {
                device: device.clone(),
                display: None,
                pending: VecDeque::new(),
            },
        );
        debug!(
            "HeadlessToolkit: pointer input {:?} on {}",
            handle,
            device.path.display()
        );
        Ok(handle)
    }

    fn set_input_display(&mut self, input: InputHandle, display: DisplayHandle) -> Result<()> {
        self.display(display)?;
        let input = self
            .inputs
            .get_mut(&input)
            .ok_or_else(|| anyhow!("unknown input {:?}", input))?;
        input.display = Some(display);
        Ok(())
    }

    fn delete_input(&mut self, input: InputHandle) {
        if self.inputs.remove(&input).is_some() {
            debug!("HeadlessToolkit: deleted input {:?}", input);
        }
    }

    fn timer_handler(&mut self) -> Result<u32> {
        if !self.initialized {
            bail!("HeadlessToolkit: timer_handler before init");
        }
        if let Some(source) = self.tick_source {
            self.last_tick_ms = source();
        }
        self.read_inputs();
        let handles: Vec<DisplayHandle> = self.displays.keys().copied().collect();
        for handle in handles {
            self.refresh(handle)?;
        }
        Ok(self.refresh_period_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    thread_local! {
        static FLUSHED: RefCell<Vec<(Rect, Vec<u8>)>> = const { RefCell::new(Vec::new()) };
    }

    fn recording_flush(_: DisplayHandle, area: &Rect, pixels: &[u8], ready: &FlushReady) -> Result<()> {
        FLUSHED.with(|f| f.borrow_mut().push((*area, pixels.to_vec())));
        ready.ready();
        Ok(())
    }

    fn lazy_flush(_: DisplayHandle, _: &Rect, _: &[u8], _: &FlushReady) -> Result<()> {
        Ok(())
    }

    fn failing_flush(_: DisplayHandle, _: &Rect, _: &[u8], _: &FlushReady) -> Result<()> {
        bail!("panel busy")
    }

    fn take_flushed() -> Vec<(Rect, Vec<u8>)> {
        FLUSHED.with(|f| std::mem::take(&mut *f.borrow_mut()))
    }

    fn toolkit_with_display(w: u32, h: u32, mode: RenderMode) -> (HeadlessToolkit, DisplayHandle) {
        let mut tk = HeadlessToolkit::new();
        tk.init().unwrap();
        let d = tk.create_display(w, h).unwrap();
        let len = (w * h) as usize * 4;
        tk.set_buffers(d, vec![0; len].into_boxed_slice(), mode).unwrap();
        tk.set_flush_callback(d, recording_flush).unwrap();
        (tk, d)
    }

    #[test]
    fn double_init_is_rejected() {
        let mut tk = HeadlessToolkit::new();
        tk.init().unwrap();
        assert!(tk.init().is_err());
    }

    #[test]
    fn first_tick_flushes_the_whole_screen_with_the_background() {
        let (mut tk, d) = toolkit_with_display(3, 2, RenderMode::Direct);
        take_flushed();
        tk.timer_handler().unwrap();

        let flushed = take_flushed();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].0, Rect::new(0, 0, 2, 1));
        assert!(flushed[0].1.chunks_exact(4).all(|px| px == [255, 255, 255, 255]));
        assert!(tk.invalid_areas(d).unwrap().is_empty());
    }

    #[test]
    fn content_lands_at_screen_offsets_in_direct_mode() {
        let (mut tk, d) = toolkit_with_display(4, 4, RenderMode::Direct);
        tk.timer_handler().unwrap();
        take_flushed();

        tk.fill_rect(d, Rect::point(2, 3), Argb::opaque(255, 0, 0)).unwrap();
        tk.timer_handler().unwrap();

        let flushed = take_flushed();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].0, Rect::point(2, 3));
        let offset = (3 * 4 + 2) * 4;
        assert_eq!(&flushed[0].1[offset..offset + 4], &[0, 0, 255, 255]);
    }

    #[test]
    fn overlapping_invalidations_merge() {
        let (mut tk, d) = toolkit_with_display(10, 10, RenderMode::Direct);
        tk.timer_handler().unwrap();
        tk.invalidate(d, Rect::new(0, 0, 3, 3)).unwrap();
        tk.invalidate(d, Rect::new(8, 8, 9, 9)).unwrap();
        tk.invalidate(d, Rect::new(2, 2, 8, 8)).unwrap();
        assert_eq!(tk.invalid_areas(d).unwrap(), vec![Rect::new(0, 0, 9, 9)]);
        tk.invalidate(d, Rect::new(-5, -5, 20, 0)).unwrap();
        assert_eq!(tk.invalid_areas(d).unwrap(), vec![Rect::new(0, 0, 9, 9)]);
    }

    #[test]
    fn transparent_layers_render_transparent_pixels() {
        let (mut tk, d) = toolkit_with_display(2, 2, RenderMode::Direct);
        tk.set_bg_opa(d, Layers::SCREEN | Layers::BOTTOM, OPA_TRANSP).unwrap();
        take_flushed();
        tk.timer_handler().unwrap();
        let flushed = take_flushed();
        assert!(flushed[0].1.iter().all(|b| *b == 0));
        assert_eq!(tk.layer_fills(d).unwrap(), (Argb::new(0, 255, 255, 255), Argb::TRANSPARENT));
    }

    #[test]
    fn short_buffer_is_rejected() {
        let mut tk = HeadlessToolkit::new();
        tk.init().unwrap();
        let d = tk.create_display(3, 5).unwrap();
        let err = tk
            .set_buffers(d, vec![0; 3 * 4 * 2].into_boxed_slice(), RenderMode::Direct)
            .unwrap_err();
        assert!(err.to_string().contains("needs 60 bytes"));
    }

    #[test]
    fn failed_flush_leaves_the_area_invalid() {
        let (mut tk, d) = toolkit_with_display(3, 3, RenderMode::Direct);
        tk.set_flush_callback(d, failing_flush).unwrap();
        assert!(tk.timer_handler().is_err());
        assert_eq!(tk.invalid_areas(d).unwrap(), vec![Rect::new(0, 0, 2, 2)]);
        assert!(!tk.is_flush_pending(d).unwrap());

        tk.set_flush_callback(d, recording_flush).unwrap();
        take_flushed();
        tk.timer_handler().unwrap();
        let flushed = take_flushed();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].0, Rect::new(0, 0, 2, 2));
        assert!(tk.invalid_areas(d).unwrap().is_empty());
    }

    #[test]
    fn unacknowledged_flush_keeps_the_display_busy() {
        let (mut tk, d) = toolkit_with_display(2, 2, RenderMode::Direct);
        tk.set_flush_callback(d, lazy_flush).unwrap();
        tk.timer_handler().unwrap();
        assert!(tk.is_flush_pending(d).unwrap());

        tk.fill_rect(d, Rect::point(0, 0), Argb::BLACK).unwrap();
        tk.timer_handler().unwrap();
        assert_eq!(tk.flush_count(d).unwrap(), 1);

        tk.flush_ready(d).unwrap();
        tk.timer_handler().unwrap();
        assert_eq!(tk.flush_count(d).unwrap(), 2);
    }

    #[test]
    fn pointer_samples_are_calibrated_onto_the_display() {
        let (mut tk, d) = toolkit_with_display(100, 200, RenderMode::Direct);
        let pen = PointerDeviceConfig::default_pen();
        let input = tk.create_pointer_input(&pen).unwrap();
        tk.set_input_display(input, d).unwrap();
        assert_eq!(tk.input_for_device(&pen.path), Some(input));

        tk.push_raw_pointer(input, 11172 / 2, 15328 / 4, true).unwrap();
        tk.timer_handler().unwrap();

        let events = tk.take_pointer_events(d).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, input);
        assert_eq!(events[0].1.point, crate::geometry::Point::new(50, 50));
        assert!(events[0].1.pressed);
    }

    #[test]
    fn unsupported_color_format_fails_the_tick() {
        let (mut tk, d) = toolkit_with_display(2, 2, RenderMode::Direct);
        tk.set_color_format(d, ColorFormat::Rgb565).unwrap();
        let err = tk.timer_handler().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OverlayError>(),
            Some(OverlayError::UnsupportedColorFormat(_))
        ));
    }

    #[test]
    fn deleting_a_display_returns_its_buffer() {
        let (mut tk, d) = toolkit_with_display(2, 2, RenderMode::Direct);
        let buffer = tk.delete_display(d).unwrap();
        assert_eq!(buffer.len(), 16);
        assert_eq!(tk.display_count(), 0);
        assert!(tk.delete_display(d).is_none());
    }
}
