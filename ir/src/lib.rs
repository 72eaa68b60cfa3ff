//! Compute-graph description for the tessel schedule engine.
//!
//! This crate models the host computation a schedule is built for: a DAG of
//! tensor operations in topological order, each one either an input
//! placeholder or a compute over an iteration space (spatial axes plus
//! optional reduction axes) reading other tensors through index expressions.
//!
//! # Module Organization
//!
//! - [`types`] - Element types, memory scopes, iterator kinds, access indices
//! - [`op`] - [`Operation`] and its builders, cache-copy constructors
//! - [`dag`] - [`ComputeDag`] and the static [`AccessAnalyzer`]
//! - [`error`] - Error types and result handling

pub mod dag;
pub mod error;
pub mod op;
pub mod types;


pub use dag::{AccessAnalyzer, ComputeDag};
pub use error::{Error, Result};
pub use op::{Access, Axis, OpKind, Operation};
pub use types::{AccessIndex, DType, IterKind, MemScope, OpFlag};
