//! AccessReview - cloud access review evidence pipeline.
//!
//! Collectors gather findings from read-only sources, the aggregator folds
//! them into one ordered [`models::Report`], and the report is written as a
//! CSV artifact while the narrative engine summarizes it. Both outputs are
//! then handed to a delivery transport.

pub mod analysis;
pub mod cli;
pub mod collectors;
pub mod config;
pub mod delivery;
pub mod error;
pub mod models;
pub mod narrative;
pub mod pipeline;
pub mod report;
pub mod source;

pub use pipeline::{Pipeline, RunOutcome, RunSettings};
