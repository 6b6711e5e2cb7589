//! Upstream lookup.
//!
//! - [`executor`]: one paced network attempt per call, typed outcomes
//! - [`parser`]: raw document → name/metric extraction

pub mod executor;
pub mod parser;
