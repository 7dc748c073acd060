//! Loop internals — execution, tool enforcement, and quality control.
//!
//! The turn pipeline lives in [`crate::agent_loop`]; these modules hold the
//! inner machinery: the iteration loop with model fallback
//! ([`execution`]), required-tool enforcement with its deterministic
//! fallback ([`enforcement`]), and planning / self-eval / critic helpers
//! ([`quality`]). Tool-correctness runs before self-eval and critic — that
//! ordering is load-bearing.

pub mod enforcement;
pub mod execution;
pub mod quality;
