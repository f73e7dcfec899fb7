//! bistatic-core: Pure geometry + correlation library for a passive bistatic radar.
//!
//! No async, no I/O beyond reading config files. This crate is the shared core
//! used by `bistatic-hub` (ingestion, truth matching, HTTP API, CLI).

pub mod compare;
pub mod config;
pub mod correlate;
pub mod extrapolate;
pub mod framer;
pub mod geometry;
pub mod types;

// Re-export commonly used types at crate root
pub use correlate::{Correlator, Tolerances};
pub use extrapolate::{extrapolate, extrapolate_set, ExtrapolationStats};
pub use framer::{framer_for, Framed, Framer};
pub use geometry::Sites;
pub use types::*;
