//! Execution-repair loop: error classification, textual rewrites and the
//! bounded attempt loop.

pub mod error_classifier;
pub mod error_recovery;
pub mod repair_loop;

pub use error_classifier::*;
pub use error_recovery::*;
pub use repair_loop::*;
