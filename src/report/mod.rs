//! Report writer.
//!
//! Serializes an aggregated report into the durable tabular artifact.

pub mod writer;

pub use writer::{render, write, write_to_dir};
