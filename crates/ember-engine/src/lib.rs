//! Ember engine GPU core.
//!
//! Streams CPU-side vertex and index bytes to GPU buffers with a
//! capability-gated upload strategy, diffs uniform and attribute state so
//! redundant driver calls are never issued, and recreates every GPU object
//! once after a context loss.
//!
//! All driver access goes through a [`gl::GlContext`] passed by `&mut`. The
//! native backend is [`gl::GlowApi`]; [`gl::RecordingGl`] runs headless.

pub mod buffer;
pub mod gl;
pub mod logging;
pub mod shader;
pub mod vertex;
