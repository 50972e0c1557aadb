//! This crate extracts dense reference time by lead time grids of a derived quantity from an
//! archive of forecast fields. Each cell of a grid is the reduction of the archive records in
//! one window: the mean over a lead time bucket, or the growth rate between two records a fixed
//! spacing apart. Grids are persisted so that repeated requests, and requests for a span already
//! covered by a stored grid, are answered without reading the archive again.
//!
//! The pipeline runs in four stages.
//!
//! * [window] generates the (reference time, lead time bucket) windows of a span.
//! * [archive] answers one query per reference time, from files or from memory.
//! * [operation] and [operations] select and reduce the records of each window.
//! * [assembler] merges the reduced samples into a validated [grid::Grid].
//!
//! [grid_cache] wraps the pipeline with read-through persistence and [pipeline::Extractor] is
//! the entry point for callers.
//!
//! The crate is built on top of a number of open source components.
//!
//! * [ndarray] provides the n-dimensional arrays that hold field values.
//! * [Serde](serde) performs (de)serialisation of configuration, archive and grid documents.
//! * [cached] and [sled] provide the on-disk cache index.
//! * The `tracing` crate and [prometheus] provide logging and metrics.

pub mod archive;
pub mod assembler;
pub mod cli;
pub mod compression;
pub mod error;
pub mod format;
pub mod grid;
pub mod grid_cache;
pub mod metrics;
pub mod models;
pub mod operation;
pub mod operations;
pub mod pipeline;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod types;
pub mod window;
