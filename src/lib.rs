//! Determines a remote HTTP server's wall-clock time to sub-millisecond
//! precision by observing only its coarse, one-second-resolution `Date`
//! response header.
//!
//! The engine runs four phases in sequence: latency profiling, whole-second
//! resolution, binary-search sub-second refinement, and verification. See
//! [`core::orchestrator`] for the entry point.

pub mod cli;
pub mod core;
