//! The frame driver: per-frame animation, capture alternation and render
//! cadence.

use beachscape_common::NodeId;
use beachscape_scene::{CaptureSlot, DioramaConfig, Scene};
use glam::Vec3;
use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::renderer::{RenderView, SceneRenderer};

/// Frames between two refreshes of the same capture pass.
pub const CAPTURE_ALTERNATION_PERIOD: u64 = 2;

/// Capture pass refreshed on a given frame: A on even frames, B on odd.
///
/// Parity of a wrapping counter stays alternating across the wrap because
/// `u64::MAX` is odd and 0 is even.
pub fn capture_for_frame(frame: u64) -> CaptureSlot {
    if frame % CAPTURE_ALTERNATION_PERIOD == 0 {
        CaptureSlot::A
    } else {
        CaptureSlot::B
    }
}

/// Host capability to run the driver again on the next display refresh.
pub trait FrameScheduler {
    fn request_next_frame(&self);
}

/// Scheduler for headless loops: counts requests so the caller can decide
/// when to tick again.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    pending: Cell<u64>,
    total: Cell<u64>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one pending request. Returns false when none is pending.
    pub fn take_request(&self) -> bool {
        let pending = self.pending.get();
        if pending == 0 {
            return false;
        }
        self.pending.set(pending - 1);
        true
    }

    pub fn total_requests(&self) -> u64 {
        self.total.get()
    }
}

impl FrameScheduler for ManualScheduler {
    fn request_next_frame(&self) {
        self.pending.set(self.pending.get() + 1);
        self.total.set(self.total.get() + 1);
    }
}

/// Shared cancellation flag for the frame loop.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Per-frame animation settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverConfig {
    /// Euler increment added to the rotating node every frame.
    pub rotation_step: Vec3,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            rotation_step: Vec3::splat(0.01),
        }
    }
}

impl DriverConfig {
    pub fn from_diorama(config: &DioramaConfig) -> Self {
        Self {
            rotation_step: Vec3::splat(config.rotation_step),
        }
    }
}

/// What a call to [`FrameDriver::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Frame `frame` ran: `capture` was refreshed, then the scene rendered.
    Rendered { frame: u64, capture: CaptureSlot },
    /// The stop token was cancelled; nothing happened and nothing was
    /// rescheduled.
    Stopped,
}

/// Owns the frame counter and drives one frame per tick.
///
/// The driver only holds the rotating node's id; the node itself belongs to
/// the scene. Ticks are strictly sequential: the next one is requested only
/// at the end of the current one.
#[derive(Debug)]
pub struct FrameDriver {
    config: DriverConfig,
    rotating: NodeId,
    frame_count: u64,
    stop: StopToken,
    warned_missing: bool,
}

impl FrameDriver {
    pub fn new(config: DriverConfig, rotating: NodeId) -> Self {
        Self {
            config,
            rotating,
            frame_count: 0,
            stop: StopToken::new(),
            warned_missing: false,
        }
    }

    /// Completed ticks so far (wrapping).
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn rotating_node(&self) -> NodeId {
        self.rotating
    }

    /// A handle that stops the loop from outside the tick.
    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    /// Run one frame: rotate, refresh one capture pass, advance the counter,
    /// render, then ask the scheduler for the next frame.
    pub fn tick<R, S>(
        &mut self,
        scene: &mut Scene,
        view: &RenderView,
        renderer: &mut R,
        scheduler: &S,
    ) -> TickOutcome
    where
        R: SceneRenderer + ?Sized,
        S: FrameScheduler + ?Sized,
    {
        if self.stop.is_cancelled() {
            return TickOutcome::Stopped;
        }

        let frame = self.frame_count;
        let _span = tracing::trace_span!("tick", frame).entered();

        if let Err(e) = scene.rotate(self.rotating, self.config.rotation_step) {
            if !self.warned_missing {
                tracing::warn!("rotating node unavailable, frames continue without it: {e}");
                self.warned_missing = true;
            }
        }

        let capture = capture_for_frame(frame);
        renderer.refresh_capture(capture, scene);

        self.frame_count = frame.wrapping_add(1);

        renderer.render(scene, view);
        scheduler.request_next_frame();

        TickOutcome::Rendered { frame, capture }
    }
}
