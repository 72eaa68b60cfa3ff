//! The compute DAG and its static access analysis.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;
use snafu::ensure;

use crate::error::*;
use crate::op::Operation;
use crate::types::{AccessIndex, OpFlag};

/// A validated compute graph with operations in topological order.
#[derive(Debug, Clone)]
pub struct ComputeDag {
    ops: Vec<Arc<Operation>>,
}

impl ComputeDag {
    /// Build a DAG from operations listed producers-first.
    pub fn new(ops: impl IntoIterator<Item = Operation>) -> Result<Self> {
        let ops: Vec<Arc<Operation>> = ops.into_iter().map(Arc::new).collect();
        validate(&ops)?;
        tracing::debug!(num_ops = ops.len(), "compute dag created");
        Ok(Self { ops })
    }

    pub fn ops(&self) -> &[Arc<Operation>] {
        &self.ops
    }

    pub fn op(&self, name: &str) -> Option<&Arc<Operation>> {
        self.ops.iter().find(|op| op.name == name)
    }

    pub fn analyzer(&self) -> AccessAnalyzer<'_> {
        AccessAnalyzer::new(self.ops.iter().map(Arc::as_ref))
    }

    /// Multiply-accumulate count of all compute operations, `None` if it
    /// does not fit in an `i64`.
    pub fn flop_count(&self) -> Option<i64> {
        self.ops.iter().filter(|op| !op.is_placeholder()).try_fold(0i64, |total, op| {
            let points = op.axes.iter().chain(&op.reduce_axes).try_fold(1i64, |acc, a| acc.checked_mul(a.extent))?;
            total.checked_add(points)
        })
    }
}

impl fmt::Display for ComputeDag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for op in &self.ops {
            writeln!(f, "{op}")?;
        }
        Ok(())
    }
}

fn validate(ops: &[Arc<Operation>]) -> Result<()> {
    let mut seen: HashMap<&str, usize> = HashMap::with_capacity(ops.len());
    for (pos, op) in ops.iter().enumerate() {
        ensure!(!seen.contains_key(op.name.as_str()), DuplicateOpSnafu { name: op.name.clone() });
        ensure!(op.is_placeholder() || !op.axes.is_empty() || op.has_reduce(), EmptyShapeSnafu { op: op.name.clone() });

        for access in &op.reads {
            let producer = match seen.get(access.tensor.as_str()) {
                Some(&idx) => &ops[idx],
                None if ops[pos..].iter().any(|later| later.name == access.tensor) => {
                    return NotTopologicalSnafu { op: op.name.clone(), tensor: access.tensor.clone() }.fail();
                }
                None => return UnknownTensorSnafu { op: op.name.clone(), tensor: access.tensor.clone() }.fail(),
            };
            ensure!(
                access.indices.len() == producer.ndim(),
                AccessAritySnafu {
                    op: op.name.clone(),
                    tensor: access.tensor.clone(),
                    expected: producer.ndim(),
                    got: access.indices.len(),
                }
            );
            for idx in &access.indices {
                match *idx {
                    AccessIndex::Axis(a) => ensure!(
                        a < op.axes.len(),
                        AxisOutOfBoundsSnafu { op: op.name.clone(), axis: a, count: op.axes.len() }
                    ),
                    AccessIndex::Reduce(r) => ensure!(
                        r < op.reduce_axes.len(),
                        AxisOutOfBoundsSnafu { op: op.name.clone(), axis: r, count: op.reduce_axes.len() }
                    ),
                    AccessIndex::Const(_) | AccessIndex::Expr => {}
                }
            }
        }
        seen.insert(op.name.as_str(), pos);
    }
    Ok(())
}

/// Read/write relations between a set of operations.
///
/// Built over any ordered operation list so the schedule layer can run the
/// same queries against the graph as rewritten by cache stages.
#[derive(Debug, Clone)]
pub struct AccessAnalyzer<'a> {
    ops: Vec<&'a Operation>,
    index: HashMap<&'a str, usize>,
}

impl<'a> AccessAnalyzer<'a> {
    pub fn new(ops: impl IntoIterator<Item = &'a Operation>) -> Self {
        let ops: Vec<&'a Operation> = ops.into_iter().collect();
        let index = ops.iter().enumerate().map(|(i, op)| (op.name.as_str(), i)).collect();
        Self { ops, index }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn op(&self, id: usize) -> &'a Operation {
        self.ops[id]
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Operations reading `id`, in graph order.
    pub fn consumers(&self, id: usize) -> SmallVec<[usize; 4]> {
        let name = self.ops[id].name.as_str();
        self.ops.iter().enumerate().filter(|(_, op)| op.reads_from(name)).map(|(i, _)| i).collect()
    }

    /// Operations read by `id`, deduplicated, in access order.
    pub fn producers(&self, id: usize) -> SmallVec<[usize; 4]> {
        let mut out = SmallVec::new();
        for access in &self.ops[id].reads {
            if let Some(p) = self.index_of(&access.tensor)
                && !out.contains(&p)
            {
                out.push(p);
            }
        }
        out
    }

    pub fn is_output(&self, id: usize) -> bool {
        !self.ops[id].is_placeholder() && self.consumers(id).is_empty()
    }

    /// Injective, broadcast or elementwise compute without reduction.
    pub fn is_simple_access(&self, id: usize) -> bool {
        let op = self.ops[id];
        !op.is_placeholder()
            && !op.has_reduce()
            && op.reads.iter().flat_map(|a| &a.indices).all(|idx| matches!(idx, AccessIndex::Axis(_) | AccessIndex::Const(_)))
    }

    /// Simple access and cheap enough to be recomputed by its consumer.
    pub fn is_strict_inlineable(&self, id: usize) -> bool {
        self.is_simple_access(id) && !self.ops[id].has_flag(OpFlag::Expensive)
    }

    /// Whether the op has data reuse worth multi-level tiling (matmul, conv).
    ///
    /// True when at least two input tensors are indexed without some spatial
    /// axis, or one is and the op also reduces.
    pub fn needs_multi_level_tiling(&self, id: usize) -> bool {
        let op = self.ops[id];
        if op.is_placeholder() {
            return false;
        }

        let mut n_missing = 0;
        for access in &op.reads {
            if access.indices.contains(&AccessIndex::Expr) {
                continue;
            }
            if (0..op.ndim()).any(|axis| !access.uses_axis(axis)) {
                n_missing += 1;
            }
            if n_missing >= 2 || (n_missing >= 1 && op.has_reduce()) {
                return true;
            }
        }
        false
    }

    /// Whether every hop from `id` to `target` is a single-consumer,
    /// same-shape, identity-indexed read.
    pub fn elementwise_match(&self, id: usize, target: usize) -> bool {
        let mut cur = id;
        while cur != target {
            let consumers = self.consumers(cur);
            let [next] = consumers.as_slice() else {
                return false;
            };
            let (cur_op, next_op) = (self.ops[cur], self.ops[*next]);
            if cur_op.is_placeholder() || cur_op.shape() != next_op.shape() {
                return false;
            }
            if !next_op.reads.iter().filter(|a| a.tensor == cur_op.name).all(|a| a.is_identity()) {
                return false;
            }
            cur = *next;
        }
        true
    }
}
