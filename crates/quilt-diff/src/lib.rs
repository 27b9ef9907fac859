//! Structural diff between two values.
//!
//! [`diff`] walks two values and produces a stream of [`Difference`]s:
//! one record per changed position, with the structural [`Path`] to it.
//! Same-kind non-primitive values are descended into (except refs, which
//! compare by address); a kind mismatch or primitive change is a single
//! `Modified` at the current path. The stream runs on its own thread
//! with a bounded channel for backpressure and an explicit stop handle
//! for cancellation.
//!
//! [`apply`] is the inverse: replaying a patch against the left value
//! reconstructs the right one.

pub mod apply;
pub mod error;
pub mod stream;

pub use apply::apply;
pub use error::{DiffError, DiffResult};
pub use stream::{diff, diff_collect, ChangeType, DiffStream, Difference};
