//! Evidence aggregation modules.
//!
//! Collector outputs are joined and normalized here before the report
//! writer and the narrative engine consume them.

pub mod aggregator;

pub use aggregator::*;
