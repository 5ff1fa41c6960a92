//! Tabula: versioned, composable data artifacts.
//!
//! Schema identity across artifacts, datascript/bedrock conversion, and
//! per-environment pipeline stage resolution for an external build-graph tool.

pub mod cli;
pub mod config;
pub mod convert;
pub mod datascript;
pub mod error;
pub mod hasher;
pub mod persist;
pub mod pipeline;
pub mod runtime;
pub mod schema;
pub mod storage;
pub mod transport;

pub use error::{Error, Result};
