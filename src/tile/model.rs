//! Tile data model.
//!
//! A [`Tile`] is one rectangle of the source image at one sample size. Its
//! mutable fields belong to the tile manager; the rest of the world only sees
//! immutable [`TileSnapshot`] copies.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::TileAnimationSpec;
use crate::geometry::{IntOffset, IntRect};

use super::image::TileImage;

/// Fully opaque alpha.
pub const ALPHA_OPAQUE: u8 = 255;

/// Load state of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TileState {
    /// No image and no pending decode
    None,
    /// A decode job is in flight
    Loading,
    /// An image is attached
    Loaded,
    /// The last decode failed
    Error,
}

impl fmt::Display for TileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TileState::None => "NONE",
            TileState::Loading => "LOADING",
            TileState::Loaded => "LOADED",
            TileState::Error => "ERROR",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Animation
// =============================================================================

/// Fade-in progress of a tile image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimationState {
    alpha: u8,
    start: Option<Instant>,
    duration: Duration,
}

impl AnimationState {
    pub fn new() -> Self {
        Self {
            alpha: 0,
            start: None,
            duration: Duration::ZERO,
        }
    }

    pub fn alpha(&self) -> u8 {
        self.alpha
    }

    /// True while a fade is in progress.
    pub fn is_running(&self) -> bool {
        self.start.is_some()
    }

    pub(crate) fn start(&mut self, now: Instant, duration: Duration) {
        if duration.is_zero() {
            self.finish();
            return;
        }
        self.alpha = 0;
        self.start = Some(now);
        self.duration = duration;
    }

    pub(crate) fn finish(&mut self) {
        self.alpha = ALPHA_OPAQUE;
        self.start = None;
    }

    pub(crate) fn reset(&mut self) {
        self.alpha = 0;
        self.start = None;
    }

    /// Advance to `now`. Returns true if the fade is still running.
    pub(crate) fn update(&mut self, now: Instant) -> bool {
        let Some(start) = self.start else {
            return false;
        };
        let elapsed = now.saturating_duration_since(start);
        if elapsed >= self.duration {
            self.finish();
            return false;
        }
        let progress = elapsed.as_secs_f64() / self.duration.as_secs_f64();
        self.alpha = (progress * ALPHA_OPAQUE as f64) as u8;
        true
    }
}

impl Default for AnimationState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Load Job
// =============================================================================

/// Handle to an in-flight decode for one tile.
#[derive(Debug)]
pub(crate) struct LoadJob {
    id: u64,
    canceled: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl LoadJob {
    pub(crate) fn new(id: u64, canceled: Arc<AtomicBool>, handle: JoinHandle<()>) -> Self {
        Self {
            id,
            canceled,
            handle,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// A job still waiting for a decode permit stops. A decode already on a
    /// worker skips its work if it has not begun, and otherwise reports back
    /// as a stale result whose buffer is recycled.
    pub(crate) fn cancel(self) {
        self.canceled.store(true, Ordering::Release);
        self.handle.abort();
    }
}

// =============================================================================
// Tile
// =============================================================================

/// One rectangle of the source image at one sample size.
///
/// Invariant: `image()` is `Some` iff `state() == TileState::Loaded`.
#[derive(Debug)]
pub struct Tile {
    /// Column/row within the grid
    pub coordinate: IntOffset,

    /// Rectangle in image pixels
    pub src_rect: IntRect,

    /// Downsample factor
    pub sample_size: u32,

    state: TileState,
    image: Option<TileImage>,
    job: Option<LoadJob>,
    animation: AnimationState,
}

impl Tile {
    pub fn new(coordinate: IntOffset, src_rect: IntRect, sample_size: u32) -> Self {
        Self {
            coordinate,
            src_rect,
            sample_size,
            state: TileState::None,
            image: None,
            job: None,
            animation: AnimationState::new(),
        }
    }

    pub fn state(&self) -> TileState {
        self.state
    }

    pub fn image(&self) -> Option<&TileImage> {
        self.image.as_ref()
    }

    pub fn alpha(&self) -> u8 {
        self.animation.alpha()
    }

    pub fn animation(&self) -> &AnimationState {
        &self.animation
    }

    /// Whether a decode job is attached.
    pub fn has_job(&self) -> bool {
        self.job.is_some()
    }

    /// Immutable copy of the observable fields.
    pub fn snapshot(&self) -> TileSnapshot {
        TileSnapshot {
            coordinate: self.coordinate,
            src_rect: self.src_rect,
            sample_size: self.sample_size,
            image: self.image.clone(),
            state: self.state,
            alpha: self.animation.alpha(),
        }
    }

    /// Attach an image and mark the tile loaded.
    pub(crate) fn set_image(
        &mut self,
        image: TileImage,
        allow_animate: bool,
        animation: &TileAnimationSpec,
        now: Instant,
    ) {
        self.image = Some(image);
        self.state = TileState::Loaded;
        if animation.enabled && allow_animate {
            self.animation.start(now, animation.duration);
        } else {
            self.animation.finish();
        }
    }

    /// Detach the image and return the tile to `None`.
    pub(crate) fn take_image(&mut self) -> Option<TileImage> {
        self.state = TileState::None;
        self.animation.reset();
        self.image.take()
    }

    pub(crate) fn mark_loading(&mut self, job: LoadJob) {
        self.state = TileState::Loading;
        self.job = Some(job);
    }

    pub(crate) fn mark_error(&mut self) {
        self.state = TileState::Error;
        self.job = None;
    }

    pub(crate) fn mark_none(&mut self) {
        self.state = TileState::None;
        self.job = None;
        self.animation.reset();
    }

    pub(crate) fn job_id(&self) -> Option<u64> {
        self.job.as_ref().map(LoadJob::id)
    }

    pub(crate) fn take_job(&mut self) -> Option<LoadJob> {
        self.job.take()
    }

    pub(crate) fn update_animation(&mut self, now: Instant) -> bool {
        self.animation.update(now)
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tile(coordinate={}, srcRect={}, state={}, sampleSize={})",
            self.coordinate, self.src_rect, self.state, self.sample_size
        )
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Immutable, paint-ready copy of a tile.
#[derive(Debug, Clone, Serialize)]
pub struct TileSnapshot {
    pub coordinate: IntOffset,
    pub src_rect: IntRect,
    pub sample_size: u32,
    #[serde(skip)]
    pub image: Option<TileImage>,
    pub state: TileState,
    pub alpha: u8,
}
