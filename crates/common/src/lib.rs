//! Shared value types for the beachscape workspace.

mod types;

pub use types::{NodeId, Rgb, Transform};
