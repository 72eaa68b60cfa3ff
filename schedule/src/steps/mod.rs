//! Transform steps: the entries of a state's log.
//!
//! Every primitive on [`crate::State`] is recorded as one [`Step`]. A step
//! holds ids and parameters only, never references into the state, so a log
//! can be serialized, stored and replayed on a fresh state of the same graph.
//! `follow_*` steps refer to earlier splits by their position in the log.

mod annotation;
mod cache;
mod compute;
mod fuse;
mod reorder;
mod rfactor;
mod split;
pub(crate) mod tensorize;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use annotation::AnnotationStep;
pub use cache::{CacheReadStep, CacheWriteStep};
pub use compute::{ComputeAtStep, ComputeInlineStep, ComputeRootStep};
pub use fuse::FuseStep;
pub use reorder::ReorderStep;
pub use rfactor::RfactorStep;
pub use split::{FollowFusedSplitStep, FollowSplitStep, Lengths, SplitStep};
pub use tensorize::TensorizeStep;

use crate::error::*;
use crate::intrinsic::IntrinsicRegistry;
use crate::state::State;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    Split(SplitStep),
    FollowSplit(FollowSplitStep),
    FollowFusedSplit(FollowFusedSplitStep),
    Fuse(FuseStep),
    Reorder(ReorderStep),
    Annotation(AnnotationStep),
    ComputeAt(ComputeAtStep),
    ComputeInline(ComputeInlineStep),
    ComputeRoot(ComputeRootStep),
    CacheRead(CacheReadStep),
    CacheWrite(CacheWriteStep),
    Rfactor(RfactorStep),
    Tensorize(TensorizeStep),
}

impl Step {
    /// Stage the step was applied to, as numbered when it was applied.
    pub fn stage_id(&self) -> usize {
        match self {
            Self::Split(s) => s.stage_id,
            Self::FollowSplit(s) => s.stage_id,
            Self::FollowFusedSplit(s) => s.stage_id,
            Self::Fuse(s) => s.stage_id,
            Self::Reorder(s) => s.stage_id,
            Self::Annotation(s) => s.stage_id,
            Self::ComputeAt(s) => s.stage_id,
            Self::ComputeInline(s) => s.stage_id,
            Self::ComputeRoot(s) => s.stage_id,
            Self::CacheRead(s) => s.stage_id,
            Self::CacheWrite(s) => s.stage_id,
            Self::Rfactor(s) => s.stage_id,
            Self::Tensorize(s) => s.stage_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Split(_) => "split",
            Self::FollowSplit(_) => "follow_split",
            Self::FollowFusedSplit(_) => "follow_fused_split",
            Self::Fuse(_) => "fuse",
            Self::Reorder(_) => "reorder",
            Self::Annotation(s) => s.primitive(),
            Self::ComputeAt(_) => "compute_at",
            Self::ComputeInline(_) => "compute_inline",
            Self::ComputeRoot(_) => "compute_root",
            Self::CacheRead(_) => "cache_read",
            Self::CacheWrite(_) => "cache_write",
            Self::Rfactor(_) => "rfactor",
            Self::Tensorize(_) => "tensorize",
        }
    }

    /// Re-apply the step to `state` without logging it.
    pub(crate) fn apply_to_state(&self, state: &mut State, registry: &IntrinsicRegistry) -> Result<()> {
        match self {
            Self::Split(s) => s.apply_to_state(state).map(drop),
            Self::FollowSplit(s) => s.apply_to_state(state).map(drop),
            Self::FollowFusedSplit(s) => s.apply_to_state(state).map(drop),
            Self::Fuse(s) => s.apply_to_state(state).map(drop),
            Self::Reorder(s) => s.apply_to_state(state),
            Self::Annotation(s) => s.apply_to_state(state).map(drop),
            Self::ComputeAt(s) => s.apply_to_state(state),
            Self::ComputeInline(s) => s.apply_to_state(state),
            Self::ComputeRoot(s) => s.apply_to_state(state),
            Self::CacheRead(s) => s.apply_to_state(state).map(drop),
            Self::CacheWrite(s) => s.apply_to_state(state).map(drop),
            Self::Rfactor(s) => s.apply_to_state(state).map(drop),
            Self::Tensorize(s) => s.apply_to_state(state, registry).map(drop),
        }
    }
}

fn fmt_lengths(f: &mut fmt::Formatter<'_>, lengths: &[Option<i64>]) -> fmt::Result {
    write!(f, "[")?;
    for (i, len) in lengths.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        match len {
            Some(l) => write!(f, "{l}")?,
            None => write!(f, "None")?,
        }
    }
    write!(f, "]")
}

/// Call-like rendering with stage and iterator ids, e.g.
/// `split(2, 0, [None, 16], inner_to_outer=true)`.
impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name();
        match self {
            Self::Split(s) => {
                write!(f, "{name}({}, {}, ", s.stage_id, s.iter_id)?;
                fmt_lengths(f, &s.lengths)?;
                write!(f, ", inner_to_outer={})", s.inner_to_outer)
            }
            Self::FollowSplit(s) => write!(f, "{name}({}, {}, {}, {})", s.stage_id, s.iter_id, s.src_step_id, s.n_split),
            Self::FollowFusedSplit(s) => write!(
                f,
                "{name}({}, {}, {:?}, {}, {})",
                s.stage_id,
                s.iter_id,
                s.src_step_ids.as_slice(),
                s.level,
                s.factor_or_nparts
            ),
            Self::Fuse(s) => write!(f, "{name}({}, {:?})", s.stage_id, s.iter_ids.as_slice()),
            Self::Reorder(s) => write!(f, "{name}({}, {:?})", s.stage_id, s.after_ids.as_slice()),
            Self::Annotation(s) if s.primitive() == "bind" => {
                write!(f, "{name}({}, {}, \"{}\")", s.stage_id, s.iter_id, s.annotation)
            }
            Self::Annotation(s) => write!(f, "{name}({}, {})", s.stage_id, s.iter_id),
            Self::ComputeAt(s) => write!(f, "{name}({}, {}, {})", s.stage_id, s.target_stage_id, s.target_iter_id),
            Self::ComputeInline(s) => write!(f, "{name}({})", s.stage_id),
            Self::ComputeRoot(s) => write!(f, "{name}({})", s.stage_id),
            Self::CacheRead(s) => {
                write!(f, "{name}({}, \"{}\", {:?})", s.stage_id, s.scope, s.reader_stage_ids.as_slice())
            }
            Self::CacheWrite(s) => write!(f, "{name}({}, \"{}\")", s.stage_id, s.scope),
            Self::Rfactor(s) => write!(f, "{name}({}, {}, {})", s.stage_id, s.iter_id, s.factor_iter_id),
            Self::Tensorize(s) => write!(f, "{name}({}, {}, \"{}\")", s.stage_id, s.iter_id, s.intrinsic),
        }
    }
}
