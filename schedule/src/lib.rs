//! Schedule transformation engine for tessel compute graphs.
//!
//! A schedule is built by applying primitive loop transformations to a
//! [`State`]: split, fuse, reorder, bind, vectorize, compute-at, cache
//! insertion, reduction factoring and tensorization. Every primitive is validated before it
//! changes anything and is recorded in the state's transform log, so a state
//! can always be rebuilt by replaying its log on the initial state of the
//! graph, and later steps can follow the parameters of earlier ones.
//!
//! # Module Organization
//!
//! - [`state`] - Iterators, stages, the attach map and [`State`]
//! - [`steps`] - Transform log entries and replay
//! - [`intrinsic`] - Tensor intrinsic descriptors and the [`IntrinsicRegistry`]
//! - [`analysis`] - Graph queries against a state (consumers, inlining, tiling)
//! - [`sketch`] - Sketch rules and the [`SketchPolicy`] driver
//! - [`task`] - [`SearchTask`]: graph, target and intrinsics
//! - [`config`] - Hardware parameters, limits and sketch parameters
//! - [`error`] - Error types and result handling

pub mod analysis;
pub mod config;
pub mod error;
pub mod intrinsic;
pub mod sketch;
pub mod state;
pub mod steps;
pub mod task;


pub use config::{HardwareParams, ScheduleLimits, SketchParams};
pub use error::{ErrorKind, Result, ScheduleError};
pub use intrinsic::{BufferDecl, IntrinsicCall, IntrinsicRegistry, TensorIntrinsic};
pub use sketch::{ConditionKind, CustomSketchRule, Expansion, SketchPolicy, SketchRule};
pub use state::{ComputeAtKind, IterAnnotation, LoopIter, Stage, State};
pub use steps::Step;
pub use task::SearchTask;

pub use tessel_ir::{ComputeDag, DType, MemScope, Operation};
