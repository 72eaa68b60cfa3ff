//! Loop extents of a stage computed inside another one.
//!
//! A stage attached at iterator `p` of a target only produces the part of its
//! buffer that one pass over the target's loops inside `p` reads. That region
//! comes from the access indices, followed through every stage between the
//! producer and the target, and is written back onto the producer's loops:
//! the outermost loop walking an axis absorbs the change and inner split
//! parts keep their lengths.
//!
//! Bounds are inferred when the attachment is made. Later transforms of the
//! target do not re-infer them.

use smallvec::SmallVec;
use tessel_ir::AccessIndex;

use super::State;
use super::iterator::ceil_div;
use super::stage::{ComputeAtKind, Stage};

/// One span per operation axis, spatial first then reduction.
type Spans = SmallVec<[Option<i64>; 8]>;

impl State {
    /// Reset the loop extents of `stage_id` to the region its attach point
    /// reads, or to the whole buffer if it is not attached.
    pub(crate) fn infer_bound(&mut self, stage_id: usize) {
        let region = match self.attach_map.attach_point(stage_id) {
            Some((target_id, iter_id)) if self.stages[stage_id].compute_at == ComputeAtKind::Iter => {
                let stage = &self.stages[stage_id];
                let read = self.read_region(target_id, &covered(&self.stages[target_id], iter_id), stage_id);
                let mut spans = full_spans(stage);
                for (span, read) in spans.iter_mut().zip(read.iter().flatten()) {
                    *span = *read;
                }
                spans
            }
            _ => full_spans(&self.stages[stage_id]),
        };
        tracing::trace!(stage = stage_id, region = ?region.as_slice(), "bound inferred");
        write_back(self.stage_mut(stage_id), &region);
    }

    /// Span of each dimension of `producer_id` read while `reader_id` walks
    /// `spans` of its own axes, over every access path between the two.
    /// `None` when no path leads to the producer.
    fn read_region(&self, reader_id: usize, spans: &[Option<i64>], producer_id: usize) -> Option<Spans> {
        let reader = &self.stages[reader_id].op;
        let n = reader.axes.len();
        let mut region: Option<Spans> = None;

        for access in &reader.reads {
            let Some(src_id) = self.stage_id(&access.tensor).filter(|&id| id >= producer_id && id < reader_id) else {
                continue;
            };
            let src = &self.stages[src_id];
            let dims: Spans = access
                .indices
                .iter()
                .zip(&src.op.axes)
                .map(|(idx, axis)| {
                    let span = match *idx {
                        AccessIndex::Axis(a) => spans.get(a).copied().unwrap_or(Some(axis.extent)),
                        AccessIndex::Reduce(r) => spans.get(n + r).copied().unwrap_or(Some(axis.extent)),
                        AccessIndex::Const(_) => Some(1),
                        AccessIndex::Expr => Some(axis.extent),
                    };
                    span.map(|s| s.min(axis.extent))
                })
                .collect();

            let found = if src_id == producer_id {
                Some(dims)
            } else if src.is_placeholder() {
                None
            } else {
                let mut inner = full_spans(src);
                for (span, dim) in inner.iter_mut().zip(&dims) {
                    *span = *dim;
                }
                self.read_region(src_id, &inner, producer_id)
            };
            region = match (region, found) {
                (Some(a), Some(b)) => Some(a.iter().zip(&b).map(|(x, y)| x.zip(*y).map(|(x, y)| x.max(y))).collect()),
                (a, b) => a.or(b),
            };
        }
        region
    }
}

fn full_spans(stage: &Stage) -> Spans {
    stage.op.axes.iter().chain(&stage.op.reduce_axes).map(|a| Some(a.extent)).collect()
}

/// Share of each axis of `target` walked by the loops inside `iter_id`.
fn covered(target: &Stage, iter_id: usize) -> Spans {
    let inner = target.iters.get(iter_id + 1..).unwrap_or_default();
    target
        .op
        .axes
        .iter()
        .chain(&target.op.reduce_axes)
        .enumerate()
        .map(|(axis, a)| {
            let share = inner
                .iter()
                .filter(|it| it.walks(axis))
                .try_fold(1i64, |acc, it| it.share_of(axis).and_then(|s| acc.checked_mul(s)));
            share.map(|s| s.min(a.extent))
        })
        .collect()
}

fn write_back(stage: &mut Stage, region: &[Option<i64>]) {
    for (axis, &span) in region.iter().enumerate() {
        let Some(outer) = stage.iters.iter().position(|it| it.walks(axis)) else {
            continue;
        };
        let rest = stage.iters[outer + 1..]
            .iter()
            .filter(|it| it.walks(axis))
            .try_fold(1i64, |acc, it| it.share_of(axis).and_then(|s| acc.checked_mul(s)));
        let share = span.zip(rest).map(|(s, r)| ceil_div(s, r));

        let it = &mut stage.iters[outer];
        // A fused loop whose parts are no longer known keeps its extent.
        let blurred = it.origin.len() > 1 && it.origin.iter().any(|(_, s)| s.is_none());
        if it.is_tensorized() || blurred || it.share_of(axis) == share {
            continue;
        }
        for entry in it.origin.iter_mut().filter(|(a, _)| *a == axis) {
            entry.1 = share;
        }
        it.extent = it.origin.iter().try_fold(1i64, |acc, &(_, s)| s.and_then(|s| acc.checked_mul(s)));
    }
}
