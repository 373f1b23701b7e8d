//! FILENAME: cube-engine/src/lib.rs
//! In-memory OLAP cube engine.
//!
//! Facts of any record type are classified into hierarchical dimensions and
//! aggregated by measures, for any number of queries in a single scan.
//!
//! Layers:
//! - `dimension`: Builder rules and the immutable classification tree
//! - `measure`: Count / Sum / Filtered aggregates and their values
//! - `query`: Which dimensions and measures one cube slice computes
//! - `engine`: Shared-scan execution (sequential or partitioned)
//! - `result`: Per-query cell grids and the addressing cursor

pub mod config;
pub mod dimension;
pub mod engine;
pub mod error;
pub mod measure;
pub mod query;
pub mod result;

pub use config::CubeConfig;
pub use dimension::{
    Dimension, DimensionBuilder, DimensionId, KeyFn, Node, NodeId, NodeRef, Temporal,
};
pub use engine::{execute, CubeEngine};
pub use error::{CubeError, Result};
pub use measure::{
    Measure, MeasureId, MeasureKind, MeasureResult, MeasureValue, Predicate, Selector,
};
pub use query::{Query, QueryId};
pub use result::{Coord, CubeResult, CubeView};
