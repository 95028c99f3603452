//! Rendering Adapter: renderer-agnostic interface and the frame driver.
//!
//! # Invariants
//! - Renderers read the scene; only the frame driver and asset attaches
//!   mutate it.
//! - Each tick refreshes exactly one capture pass, chosen by frame parity,
//!   and renders the scene exactly once afterwards.
//! - A tick never fails; it reschedules itself until stopped.

mod driver;
mod renderer;

pub use beachscape_scene::CaptureSlot;
pub use driver::{
    CAPTURE_ALTERNATION_PERIOD, DriverConfig, FrameDriver, FrameScheduler, ManualScheduler,
    StopToken, TickOutcome, capture_for_frame,
};
pub use renderer::{
    CountingRenderer, DebugTextRenderer, RecordingRenderer, RenderCall, RenderView, SceneRenderer,
};

pub fn crate_info() -> &'static str {
    "beachscape-render v0.1.0"
}
