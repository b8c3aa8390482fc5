// src/refresh.rs

//! Refresh requests handed to the downstream display driver, and the policy
//! that picks their mode.
//!
//! The policy is the only state shared with threads other than the one
//! driving `tick()`, so it is lock-free: a forced-full flag and the standing
//! hint are plain atomics that take effect on the next flush.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::geometry::Rect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RefreshMode {
    #[default]
    Partial = 0,
    Full = 1,
}

impl RefreshMode {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RefreshMode::Full,
            _ => RefreshMode::Partial,
        }
    }
}

/// One refresh for the display driver: the damaged rectangle and how to repaint it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshRequest {
    pub rect: Rect,
    pub mode: RefreshMode,
}

/// Receiver of refresh requests, owned outside the core.
///
/// Called from inside the tick critical section, so implementations should
/// hand the request off rather than block on the panel.
pub trait RefreshSink: Send + Sync {
    fn on_refresh(&self, request: RefreshRequest);
}

impl<F> RefreshSink for F
where
    F: Fn(RefreshRequest) + Send + Sync,
{
    fn on_refresh(&self, request: RefreshRequest) {
        self(request)
    }
}

/// When a pending forced-full request is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForcedFlagPolicy {
    /// Every flush attempt clears the flag, even one that changed no pixels.
    #[default]
    ClearOnAttempt,
    /// The flag survives no-op flushes and is cleared by the first emitted refresh.
    PersistUntilEmitted,
}

/// `Full` when a full refresh is forced, the standing hint otherwise.
pub fn decide_mode(forced: bool, hint: RefreshMode) -> RefreshMode {
    if forced {
        RefreshMode::Full
    } else {
        hint
    }
}

#[derive(Debug)]
pub struct RefreshPolicy {
    forced: AtomicBool,
    hint: AtomicU8,
    flag_policy: ForcedFlagPolicy,
}

impl RefreshPolicy {
    pub fn new(hint: RefreshMode, flag_policy: ForcedFlagPolicy) -> Self {
        Self {
            forced: AtomicBool::new(false),
            hint: AtomicU8::new(hint as u8),
            flag_policy,
        }
    }

    /// Makes the next flush report `Full`.
    pub fn request_full_refresh(&self) {
        self.forced.store(true, Ordering::Release);
    }

    pub fn is_full_refresh_pending(&self) -> bool {
        self.forced.load(Ordering::Acquire)
    }

    pub fn set_global_hint(&self, mode: RefreshMode) {
        self.hint.store(mode as u8, Ordering::Release);
    }

    pub fn global_hint(&self) -> RefreshMode {
        RefreshMode::from_u8(self.hint.load(Ordering::Acquire))
    }

    pub fn flag_policy(&self) -> ForcedFlagPolicy {
        self.flag_policy
    }

    /// Resolves the mode for one flush attempt, consuming the forced flag as
    /// the configured policy dictates. `changed` is whether the flush altered
    /// any pixel.
    pub fn resolve(&self, changed: bool) -> RefreshMode {
        let forced = match self.flag_policy {
            ForcedFlagPolicy::ClearOnAttempt => self.forced.swap(false, Ordering::AcqRel),
            ForcedFlagPolicy::PersistUntilEmitted if changed => {
                self.forced.swap(false, Ordering::AcqRel)
            }
            ForcedFlagPolicy::PersistUntilEmitted => self.forced.load(Ordering::Acquire),
        };
        decide_mode(forced, self.global_hint())
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self::new(RefreshMode::Partial, ForcedFlagPolicy::default())
    }
}
