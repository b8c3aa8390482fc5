// tests/overlay_scenarios.rs

//! End-to-end runs of the overlay: headless toolkit, host surface, recording sink.

use std::ptr::NonNull;
use std::sync::{Arc, Mutex};
use std::thread;

use fb_overlay::config::Config;
use fb_overlay::refresh::ForcedFlagPolicy;
use fb_overlay::surface::{MemorySurface, RawSurface, SharedSurface};
use fb_overlay::toolkit::{HeadlessToolkit, Toolkit};
use fb_overlay::{Argb, OverlayError, Rect, RefreshMode, RefreshRequest, RefreshSink, Renderer};
use test_log::test;

const RED: Argb = Argb::opaque(255, 0, 0);

type Requests = Arc<Mutex<Vec<RefreshRequest>>>;

fn recording_sink() -> (Arc<dyn RefreshSink>, Requests) {
    let requests: Requests = Arc::default();
    let recorded = Arc::clone(&requests);
    let sink: Arc<dyn RefreshSink> =
        Arc::new(move |request: RefreshRequest| recorded.lock().unwrap().push(request));
    (sink, requests)
}

fn drain(requests: &Requests) -> Vec<RefreshRequest> {
    std::mem::take(&mut *requests.lock().unwrap())
}

/// Renderer over `surface` with transparent layers, initial flush consumed.
fn start_overlay(
    surface: SharedSurface,
    config: &Config,
) -> (Renderer<HeadlessToolkit>, Requests) {
    let (sink, requests) = recording_sink();
    let renderer = Renderer::new(surface, HeadlessToolkit::new(), sink, config);
    renderer.initialize().unwrap();
    renderer.enable_transparent_bg().unwrap();
    renderer.tick().unwrap();
    assert!(drain(&requests).is_empty(), "transparent layers must not touch the host");
    (renderer, requests)
}

fn draw(renderer: &Renderer<HeadlessToolkit>, area: Rect, color: Argb) {
    renderer
        .with_toolkit(|toolkit, display| toolkit.fill_rect(display, area, color))
        .unwrap()
        .unwrap();
}

fn invalidate(renderer: &Renderer<HeadlessToolkit>, area: Rect) {
    renderer
        .with_toolkit(|toolkit, display| toolkit.invalidate(display, area))
        .unwrap()
        .unwrap();
}

#[test]
fn red_pixel_on_white_surface() {
    let surface = SharedSurface::new(MemorySurface::filled(4, 4, Argb::WHITE)).unwrap();
    let (renderer, requests) = start_overlay(surface.clone(), &Config::default());

    draw(&renderer, Rect::point(1, 1), RED);
    invalidate(&renderer, Rect::new(1, 1, 2, 2));
    renderer.tick().unwrap();

    assert_eq!(
        drain(&requests),
        vec![RefreshRequest {
            rect: Rect::new(1, 1, 1, 1),
            mode: RefreshMode::Partial,
        }]
    );
    surface
        .with_locked_surface(|view| {
            for y in 0..4 {
                for x in 0..4 {
                    let expected = if (x, y) == (1, 1) { RED } else { Argb::WHITE };
                    assert_eq!(view.pixel(x, y), expected, "pixel ({x},{y})");
                }
            }
        })
        .unwrap();
}

#[test]
fn translucent_content_blends_with_the_host() {
    let surface = SharedSurface::new(MemorySurface::filled(3, 3, Argb::WHITE)).unwrap();
    let (renderer, requests) = start_overlay(surface.clone(), &Config::default());

    draw(&renderer, Rect::new(0, 0, 2, 0), Argb::new(128, 0, 0, 0));
    renderer.tick().unwrap();

    assert_eq!(drain(&requests)[0].rect, Rect::new(0, 0, 2, 0));
    surface
        .with_locked_surface(|view| {
            assert_eq!(view.pixel(1, 0), Argb::new(128, 127, 127, 127));
            assert_eq!(view.pixel(1, 1), Argb::WHITE);
        })
        .unwrap();
}

#[test]
fn dirty_rect_spans_scattered_changes() {
    let surface = SharedSurface::new(MemorySurface::filled(16, 12, Argb::WHITE)).unwrap();
    let (renderer, requests) = start_overlay(surface, &Config::default());

    draw(&renderer, Rect::point(3, 9), RED);
    draw(&renderer, Rect::point(12, 2), RED);
    // One merged invalid area covering both pixels.
    invalidate(&renderer, Rect::new(0, 0, 15, 11));
    renderer.tick().unwrap();

    let emitted = drain(&requests);
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].rect, Rect::new(3, 2, 12, 9));
}

#[test]
fn padded_host_rows_are_respected() {
    // 3 pixels wide, 16 bytes of padding per row.
    let surface =
        SharedSurface::new(MemorySurface::with_stride(3, 2, 3 * 4 + 16)).unwrap();
    surface.with_locked_surface(|view| view.fill(Argb::WHITE)).unwrap();
    let (renderer, requests) = start_overlay(surface.clone(), &Config::default());

    draw(&renderer, Rect::point(2, 1), RED);
    renderer.tick().unwrap();

    assert_eq!(drain(&requests)[0].rect, Rect::point(2, 1));
    surface
        .with_locked_surface(|view| {
            assert_eq!(view.stride(), 28);
            assert_eq!(view.pixel(2, 1), RED);
            assert_eq!(view.pixel(2, 0), Argb::WHITE);
        })
        .unwrap();
}

#[test]
fn host_owned_memory_receives_the_overlay() {
    let (width, height, stride) = (4u32, 2u32, 4 * 4);
    let mut host = vec![0xFFu8; stride * height as usize];
    let base = NonNull::new(host.as_mut_ptr()).unwrap();
    // SAFETY: `host` outlives the renderer and the surface; both are dropped
    // before it is read below.
    let raw = unsafe { RawSurface::from_raw_parts(base, width, height, 32, stride) };
    let surface = SharedSurface::new(raw).unwrap();

    {
        let (renderer, requests) = start_overlay(surface.clone(), &Config::default());
        draw(&renderer, Rect::point(3, 1), Argb::from_u32(0xFF123456));
        renderer.tick().unwrap();
        assert_eq!(drain(&requests)[0].rect, Rect::point(3, 1));
    }
    drop(surface);

    let offset = stride + 3 * 4;
    assert_eq!(&host[offset..offset + 4], &[0x56, 0x34, 0x12, 0xFF]);
    assert_eq!(&host[0..4], &[0xFF, 0xFF, 0xFF, 0xFF]);
}

#[test]
fn depth_other_than_32_bits_is_refused() {
    let mut host = vec![0u8; 4 * 4 * 2];
    let base = NonNull::new(host.as_mut_ptr()).unwrap();
    // SAFETY: `host` outlives the rejected surface.
    let raw = unsafe { RawSurface::from_raw_parts(base, 4, 4, 16, 8) };
    assert_eq!(
        SharedSurface::new(raw).err(),
        Some(OverlayError::UnsupportedDepth { bits: 16 })
    );
}

#[test]
fn forced_full_survives_noop_flush_only_when_configured() {
    for (policy, expected) in [
        (ForcedFlagPolicy::ClearOnAttempt, RefreshMode::Partial),
        (ForcedFlagPolicy::PersistUntilEmitted, RefreshMode::Full),
    ] {
        let mut config = Config::default();
        config.refresh.forced_flag = policy;
        let surface = SharedSurface::new(MemorySurface::filled(4, 4, Argb::WHITE)).unwrap();
        let (renderer, requests) = start_overlay(surface, &config);

        renderer.request_full_refresh();
        invalidate(&renderer, Rect::new(0, 0, 3, 3));
        renderer.tick().unwrap();
        assert!(drain(&requests).is_empty());

        draw(&renderer, Rect::point(0, 3), RED);
        renderer.tick().unwrap();
        assert_eq!(drain(&requests)[0].mode, expected, "{policy:?}");
    }
}

#[test]
fn full_refresh_requested_from_another_thread() {
    let surface = SharedSurface::new(MemorySurface::filled(8, 8, Argb::WHITE)).unwrap();
    let (renderer, requests) = start_overlay(surface, &Config::default());
    let renderer = Arc::new(renderer);

    let requester = {
        let renderer = Arc::clone(&renderer);
        thread::spawn(move || renderer.request_full_refresh())
    };
    requester.join().unwrap();

    draw(&renderer, Rect::point(4, 4), RED);
    renderer.tick().unwrap();
    draw(&renderer, Rect::point(5, 5), RED);
    renderer.tick().unwrap();

    let modes: Vec<RefreshMode> = drain(&requests).iter().map(|r| r.mode).collect();
    assert_eq!(modes, vec![RefreshMode::Full, RefreshMode::Partial]);
}

#[test]
fn requests_race_with_ticks_without_deadlock() {
    let surface = SharedSurface::new(MemorySurface::filled(8, 8, Argb::WHITE)).unwrap();
    let (renderer, requests) = start_overlay(surface, &Config::default());
    let renderer = Arc::new(renderer);

    let requester = {
        let renderer = Arc::clone(&renderer);
        thread::spawn(move || {
            for _ in 0..200 {
                renderer.request_full_refresh();
                thread::yield_now();
            }
        })
    };
    for i in 0..64 {
        let color = if i % 2 == 0 { RED } else { Argb::opaque(0, 0, 255) };
        draw(&renderer, Rect::point(i % 8, i / 8), color);
        renderer.tick().unwrap();
    }
    requester.join().unwrap();

    let emitted = drain(&requests);
    assert_eq!(emitted.len(), 64);
    assert!(emitted.iter().all(|r| r.rect.area() == 1));
}

#[test]
fn host_writer_on_another_thread_coexists_with_ticks() {
    const BLUE: Argb = Argb::opaque(0, 0, 255);
    let surface = SharedSurface::new(MemorySurface::filled(8, 8, Argb::WHITE)).unwrap();
    let (renderer, requests) = start_overlay(surface.clone(), &Config::default());

    // The host keeps painting the bottom row, which the overlay never draws on.
    let host = {
        let surface = surface.clone();
        thread::spawn(move || {
            for i in 0..500u32 {
                surface
                    .with_locked_surface(|view| view.set_pixel(i % 8, 7, BLUE))
                    .unwrap();
                thread::yield_now();
            }
        })
    };
    let drawn: Vec<Rect> = (0..48).map(|i| Rect::point(i % 8, i / 8)).collect();
    for &point in &drawn {
        draw(&renderer, point, RED);
        renderer.tick().unwrap();
    }
    host.join().unwrap();

    let emitted: Vec<Rect> = drain(&requests).iter().map(|r| r.rect).collect();
    assert_eq!(emitted, drawn);
    surface
        .with_locked_surface(|view| {
            for x in 0..8 {
                assert_eq!(view.pixel(x, 7), BLUE);
                assert_eq!(view.pixel(x, 0), RED);
            }
        })
        .unwrap();
}

#[test]
fn dropping_the_renderer_tears_down_the_toolkit() {
    let surface = SharedSurface::new(MemorySurface::filled(4, 4, Argb::WHITE)).unwrap();
    let (renderer, _requests) = start_overlay(surface.clone(), &Config::default());
    renderer
        .with_toolkit(|toolkit, _| {
            assert_eq!(toolkit.display_count(), 1);
            assert_eq!(toolkit.input_count(), 2);
        })
        .unwrap();
    drop(renderer);

    // The surface handle is still usable by the host.
    surface
        .with_locked_surface(|view| assert_eq!(view.pixel(0, 0), Argb::WHITE))
        .unwrap();
}

#[test]
fn headless_toolkit_requires_init() {
    let mut toolkit = HeadlessToolkit::new();
    assert!(toolkit.timer_handler().is_err());
    assert!(toolkit.create_display(4, 4).is_err());
    toolkit.init().unwrap();
    assert!(toolkit.init().is_err());
}
