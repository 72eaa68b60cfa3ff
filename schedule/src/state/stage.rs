use std::sync::Arc;

use tessel_ir::{IterKind, MemScope, Operation};

use super::iterator::LoopIter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum StageKind {
    Placeholder,
    Compute,
}

/// Where a stage is computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ComputeAtKind {
    /// Own loop nest at the top level.
    #[default]
    Root,
    /// Substituted into its consumer; no loop nest of its own.
    Inlined,
    /// Nested inside an iterator of another stage. The attach map knows which.
    Iter,
}

/// Storage of the buffer a stage produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferLayout {
    pub scope: MemScope,
    /// Byte alignment of the buffer start.
    pub data_alignment: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub op: Arc<Operation>,
    pub kind: StageKind,
    pub iters: Vec<LoopIter>,
    pub compute_at: ComputeAtKind,
    pub layout: BufferLayout,
}

impl Stage {
    /// Fresh stage for `op`: one iterator per spatial axis followed by one
    /// per reduction axis. Placeholders have no loops.
    pub fn new(op: Arc<Operation>, scope: MemScope, data_alignment: usize) -> Self {
        let (kind, iters) = if op.is_placeholder() {
            (StageKind::Placeholder, Vec::new())
        } else {
            let n = op.axes.len();
            let spatial =
                op.axes.iter().enumerate().map(|(i, a)| LoopIter::for_axis(&a.name, i, a.extent, IterKind::Spatial));
            let reduce = op
                .reduce_axes
                .iter()
                .enumerate()
                .map(|(r, a)| LoopIter::for_axis(&a.name, n + r, a.extent, IterKind::Reduction));
            (StageKind::Compute, spatial.chain(reduce).collect())
        };
        Self { op, kind, iters, compute_at: ComputeAtKind::Root, layout: BufferLayout { scope, data_alignment } }
    }

    pub fn name(&self) -> &str {
        &self.op.name
    }

    pub fn is_placeholder(&self) -> bool {
        self.kind == StageKind::Placeholder
    }

    pub fn is_inlined(&self) -> bool {
        self.compute_at == ComputeAtKind::Inlined
    }

    pub fn has_reduce_iter(&self) -> bool {
        self.iters.iter().any(|it| matches!(it.kind, IterKind::Reduction | IterKind::Mixed))
    }

    pub(crate) fn describe(&self) -> &'static str {
        match (self.kind, self.compute_at) {
            (StageKind::Placeholder, _) => "placeholder",
            (_, ComputeAtKind::Inlined) => "inlined",
            _ => "compute",
        }
    }

    /// Position of the tensorized leaf, if any.
    pub fn tensorized_iter(&self) -> Option<usize> {
        self.iters.iter().position(LoopIter::is_tensorized)
    }
}
