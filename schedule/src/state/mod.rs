//! Schedule state: stages, their loop nests and the transform log.
//!
//! A [`State`] is a value. Cloning it is cheap (stages are shared behind
//! `Arc` and copied on first write) and the clone evolves independently, so a
//! search driver can fork one state into many branches. The only way to
//! change a state is through the primitives below; every primitive validates
//! its arguments before it touches anything, so a failure leaves the state
//! and its log exactly as they were.

pub mod attach;
mod bound;
pub mod iterator;
mod print;
pub mod stage;

use std::sync::Arc;

use smallvec::SmallVec;
use snafu::OptionExt;
use tessel_ir::{AccessAnalyzer, ComputeDag, MemScope};

pub use attach::AttachMap;
pub use iterator::{IterAnnotation, LoopIter, Origin};
pub use stage::{BufferLayout, ComputeAtKind, Stage, StageKind};

use crate::config::ScheduleLimits;
use crate::error::*;
use crate::intrinsic::IntrinsicRegistry;
use crate::steps::*;

#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub(crate) stages: Vec<Arc<Stage>>,
    pub(crate) steps: Vec<Step>,
    pub(crate) attach_map: AttachMap,
    pub(crate) limits: Arc<ScheduleLimits>,
}

impl State {
    /// Initial state of `dag`: one root stage per operation, one iterator per
    /// loop dimension, empty log.
    pub fn new(dag: &ComputeDag) -> Self {
        Self::with_limits(dag, ScheduleLimits::default())
    }

    pub fn with_limits(dag: &ComputeDag, limits: ScheduleLimits) -> Self {
        let stages = dag
            .ops()
            .iter()
            .map(|op| Arc::new(Stage::new(op.clone(), MemScope::Global, limits.default_data_alignment)))
            .collect();
        Self { stages, steps: Vec::new(), attach_map: AttachMap::default(), limits: Arc::new(limits) }
    }

    pub fn stages(&self) -> &[Arc<Stage>] {
        &self.stages
    }

    pub fn stage(&self, stage_id: usize) -> Option<&Stage> {
        self.stages.get(stage_id).map(Arc::as_ref)
    }

    /// Current id of the stage computing `name`.
    pub fn stage_id(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name() == name)
    }

    /// Transform log, oldest first.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn attach_map(&self) -> &AttachMap {
        &self.attach_map
    }

    pub fn limits(&self) -> &ScheduleLimits {
        &self.limits
    }

    /// Graph queries over the operations as rewritten by cache stages.
    /// Operation indices equal stage ids.
    pub fn analyzer(&self) -> AccessAnalyzer<'_> {
        AccessAnalyzer::new(self.stages.iter().map(|s| s.op.as_ref()))
    }

    // ========================================================================
    // Primitives
    // ========================================================================

    /// Split an iterator into `lengths.len() + 1` iterators.
    ///
    /// With `inner_to_outer` the lengths are the extents of the inner
    /// iterators and the outermost one takes the remainder; otherwise they
    /// are the outer extents and the innermost takes the remainder. `None`
    /// leaves a length to be decided later (see [`Self::fill_split_lengths`]).
    pub fn split(
        &mut self,
        stage_id: usize,
        iter_id: usize,
        lengths: &[Option<i64>],
        inner_to_outer: bool,
    ) -> Result<Vec<LoopIter>> {
        let extent = self.iter_checked("split", stage_id, iter_id)?.extent;
        let step = SplitStep { stage_id, iter_id, extent, lengths: lengths.into(), inner_to_outer };
        let out = step.apply_to_state(self)?;
        self.commit(Step::Split(step));
        Ok(out)
    }

    /// Split with the lengths of the split at `src_step_id` in the log,
    /// folded into `n_split` lengths.
    pub fn follow_split(
        &mut self,
        stage_id: usize,
        iter_id: usize,
        src_step_id: usize,
        n_split: usize,
    ) -> Result<Vec<LoopIter>> {
        let step = FollowSplitStep { stage_id, iter_id, src_step_id, n_split };
        let out = step.apply_to_state(self)?;
        self.commit(Step::FollowSplit(step));
        Ok(out)
    }

    /// One-length split whose length is the product of `lengths[level]` of
    /// the splits at `src_step_ids`. `factor_or_nparts` selects whether that
    /// product is the inner factor or the number of outer parts.
    pub fn follow_fused_split(
        &mut self,
        stage_id: usize,
        iter_id: usize,
        src_step_ids: &[usize],
        level: usize,
        factor_or_nparts: bool,
    ) -> Result<Vec<LoopIter>> {
        let step =
            FollowFusedSplitStep { stage_id, iter_id, src_step_ids: src_step_ids.into(), level, factor_or_nparts };
        let out = step.apply_to_state(self)?;
        self.commit(Step::FollowFusedSplit(step));
        Ok(out)
    }

    /// Merge a consecutive run of iterators into one.
    pub fn fuse(&mut self, stage_id: usize, iter_ids: &[usize]) -> Result<LoopIter> {
        let step = FuseStep { stage_id, iter_ids: iter_ids.into() };
        let out = step.apply_to_state(self)?;
        self.commit(Step::Fuse(step));
        Ok(out)
    }

    /// Permute the iterators: the new `i`-th iterator is the old `order[i]`-th.
    pub fn reorder(&mut self, stage_id: usize, order: &[usize]) -> Result<()> {
        let step = ReorderStep { stage_id, after_ids: order.into() };
        step.apply_to_state(self)?;
        self.commit(Step::Reorder(step));
        Ok(())
    }

    /// Bind an iterator to a block, virtual thread or thread axis.
    pub fn bind(&mut self, stage_id: usize, iter_id: usize, binding: IterAnnotation) -> Result<LoopIter> {
        self.annotate(stage_id, iter_id, binding)
    }

    pub fn vectorize(&mut self, stage_id: usize, iter_id: usize) -> Result<LoopIter> {
        self.annotate(stage_id, iter_id, IterAnnotation::Vectorize)
    }

    pub fn parallel(&mut self, stage_id: usize, iter_id: usize) -> Result<LoopIter> {
        self.annotate(stage_id, iter_id, IterAnnotation::Parallel)
    }

    pub fn unroll(&mut self, stage_id: usize, iter_id: usize) -> Result<LoopIter> {
        self.annotate(stage_id, iter_id, IterAnnotation::Unroll)
    }

    fn annotate(&mut self, stage_id: usize, iter_id: usize, annotation: IterAnnotation) -> Result<LoopIter> {
        let step = AnnotationStep { stage_id, iter_id, annotation };
        let out = step.apply_to_state(self)?;
        self.commit(Step::Annotation(step));
        Ok(out)
    }

    /// Compute `stage_id` inside iterator `target_iter_id` of `target_stage_id`.
    pub fn compute_at(&mut self, stage_id: usize, target_stage_id: usize, target_iter_id: usize) -> Result<()> {
        let step = ComputeAtStep { stage_id, target_stage_id, target_iter_id };
        step.apply_to_state(self)?;
        self.commit(Step::ComputeAt(step));
        Ok(())
    }

    pub fn compute_root(&mut self, stage_id: usize) -> Result<()> {
        let step = ComputeRootStep { stage_id };
        step.apply_to_state(self)?;
        self.commit(Step::ComputeRoot(step));
        Ok(())
    }

    /// Substitute the stage into its single elementwise consumer.
    pub fn compute_inline(&mut self, stage_id: usize) -> Result<()> {
        let step = ComputeInlineStep { stage_id };
        step.apply_to_state(self)?;
        self.commit(Step::ComputeInline(step));
        Ok(())
    }

    /// Insert a copy of `stage_id` in `scope`, read by `reader_stage_ids`
    /// instead of the original. Returns the id of the new stage, which is
    /// `stage_id + 1`; stages after it move up by one.
    pub fn cache_read(&mut self, stage_id: usize, scope: MemScope, reader_stage_ids: &[usize]) -> Result<usize> {
        let step = CacheReadStep { stage_id, scope, reader_stage_ids: reader_stage_ids.into() };
        let out = step.apply_to_state(self)?;
        self.commit(Step::CacheRead(step));
        Ok(out)
    }

    /// Move the computation of `stage_id` into a new stage writing `scope`.
    /// Returns the id of the new stage, which is `stage_id`; the original
    /// becomes a copy-out at `stage_id + 1`.
    pub fn cache_write(&mut self, stage_id: usize, scope: MemScope) -> Result<usize> {
        let step = CacheWriteStep { stage_id, scope };
        let out = step.apply_to_state(self)?;
        self.commit(Step::CacheWrite(step));
        Ok(out)
    }

    /// Factor reduction loop `iter_id` out of `stage_id`: a new stage
    /// `name.rf` computes one partial result per value of that loop, with the
    /// loop as spatial axis `factor_iter_id`, and the original stage reduces
    /// the partial results. Returns the id of the new stage, which is
    /// `stage_id`; the original moves to `stage_id + 1`.
    pub fn rfactor(&mut self, stage_id: usize, iter_id: usize, factor_iter_id: usize) -> Result<usize> {
        let step = RfactorStep { stage_id, iter_id, factor_iter_id };
        let out = step.apply_to_state(self)?;
        self.commit(Step::Rfactor(step));
        Ok(out)
    }

    /// Replace the nest rooted at `iter_id` by a call to `intrinsic`.
    pub fn tensorize(
        &mut self,
        stage_id: usize,
        iter_id: usize,
        intrinsic: &str,
        registry: &IntrinsicRegistry,
    ) -> Result<LoopIter> {
        let step = TensorizeStep { stage_id, iter_id, intrinsic: intrinsic.to_string() };
        let out = step.apply_to_state(self, registry)?;
        self.commit(Step::Tensorize(step));
        Ok(out)
    }

    // ========================================================================
    // Replay
    // ========================================================================

    /// Rebuild a state by applying `steps` to the initial state of `dag`.
    pub fn replay(dag: &ComputeDag, registry: &IntrinsicRegistry, steps: &[Step]) -> Result<Self> {
        Self::replay_with_limits(dag, registry, steps, ScheduleLimits::default())
    }

    #[tracing::instrument(skip_all, fields(num_steps = steps.len()))]
    pub fn replay_with_limits(
        dag: &ComputeDag,
        registry: &IntrinsicRegistry,
        steps: &[Step],
        limits: ScheduleLimits,
    ) -> Result<Self> {
        let mut state = Self::with_limits(dag, limits);
        for step in steps {
            step.apply_to_state(&mut state, registry)?;
            state.commit(step.clone());
        }
        Ok(state)
    }

    /// Resolve the lengths of the split at `step_id` and replay, so every
    /// follower of that split picks the new lengths up. The known lengths
    /// must fit in the extent the split was recorded with.
    pub fn fill_split_lengths(
        &self,
        dag: &ComputeDag,
        registry: &IntrinsicRegistry,
        step_id: usize,
        lengths: &[Option<i64>],
    ) -> Result<Self> {
        let mut steps = self.steps.clone();
        let Some(Step::Split(split)) = steps.get_mut(step_id) else {
            return ReplaySnafu { step_id, reason: "not a split step" }.fail();
        };
        snafu::ensure!(
            split.lengths.len() == lengths.len(),
            ReplaySnafu {
                step_id,
                reason: format!("split has {} lengths, {} given", split.lengths.len(), lengths.len()),
            }
        );
        if let Some(extent) = split.extent {
            let tile = lengths.iter().flatten().try_fold(1i64, |acc, &l| acc.checked_mul(l));
            snafu::ensure!(
                tile.is_some_and(|t| t <= extent),
                ReplaySnafu { step_id, reason: format!("lengths {lengths:?} do not fit in extent {extent}") }
            );
        }
        split.lengths = lengths.into();
        Self::replay_with_limits(dag, registry, &steps, self.limits.as_ref().clone())
    }

    // ========================================================================
    // Internals shared by the step implementations
    // ========================================================================

    pub(crate) fn stage_checked(&self, step: &'static str, stage_id: usize) -> Result<&Stage> {
        self.stage(stage_id).context(InvalidTransformSnafu {
            step,
            reason: format!("stage {stage_id} does not exist (state has {})", self.stages.len()),
        })
    }

    pub(crate) fn iter_checked(&self, step: &'static str, stage_id: usize, iter_id: usize) -> Result<&LoopIter> {
        let stage = self.stage_checked(step, stage_id)?;
        stage.iters.get(iter_id).context(InvalidTransformSnafu {
            step,
            reason: format!("stage {} has no iterator {iter_id} (it has {})", stage.name(), stage.iters.len()),
        })
    }

    /// Unique handle on a stage; callers validate `stage_id` first.
    pub(crate) fn stage_mut(&mut self, stage_id: usize) -> &mut Stage {
        Arc::make_mut(&mut self.stages[stage_id])
    }

    /// Ids of iterators in `stage_id` something is attached to.
    pub(crate) fn attached_iters(&self, stage_id: usize) -> SmallVec<[usize; 4]> {
        self.attach_map.attached_iters(stage_id).collect()
    }

    fn commit(&mut self, step: Step) {
        tracing::debug!(stage = step.stage_id(), step_id = self.steps.len(), step = %step, "transform step applied");
        self.steps.push(step);
    }
}
