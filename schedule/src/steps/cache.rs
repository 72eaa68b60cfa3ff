use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use snafu::ensure;
use tessel_ir::{MemScope, Operation};

use crate::error::*;
use crate::state::{ComputeAtKind, Stage, State};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheReadStep {
    pub stage_id: usize,
    pub scope: MemScope,
    pub reader_stage_ids: SmallVec<[usize; 4]>,
}

impl CacheReadStep {
    /// Returns the id of the inserted stage.
    pub(crate) fn apply_to_state(&self, state: &mut State) -> Result<usize> {
        const STEP: &str = "cache_read";
        let stage = state.stage_checked(STEP, self.stage_id)?;
        ensure!(
            !stage.is_inlined(),
            InvalidTransformSnafu { step: STEP, reason: format!("stage {} is inlined", stage.name()) }
        );
        ensure!(!self.reader_stage_ids.is_empty(), InvalidTransformSnafu { step: STEP, reason: "no readers given" });
        for &reader_id in &self.reader_stage_ids {
            let reader = state.stage_checked(STEP, reader_id)?;
            ensure!(
                reader_id != self.stage_id && reader.op.reads_from(stage.name()),
                InvalidTransformSnafu { step: STEP, reason: format!("{} does not read {}", reader.name(), stage.name()) }
            );
        }

        let op = Operation::cache_read_of(&stage.op, self.scope);
        ensure!(
            state.stage_id(&op.name).is_none(),
            InvalidTransformSnafu { step: STEP, reason: format!("stage {} already exists", op.name) }
        );

        let (source, cache) = (stage.name().to_string(), op.name.clone());
        let new_id = self.stage_id + 1;
        let cache_stage = Stage::new(Arc::new(op), self.scope, state.limits.default_data_alignment);
        state.attach_map.shift_stage_ids(new_id);
        state.stages.insert(new_id, Arc::new(cache_stage));

        let mut readers = self.reader_stage_ids.clone();
        readers.sort_unstable();
        readers.dedup();
        for reader_id in readers {
            let reader_id = if reader_id >= new_id { reader_id + 1 } else { reader_id };
            let reader = state.stage_mut(reader_id);
            reader.op = Arc::new(reader.op.redirect_reads(&source, &cache));
        }
        Ok(new_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheWriteStep {
    pub stage_id: usize,
    pub scope: MemScope,
}

impl CacheWriteStep {
    /// Returns the id of the inserted stage, which takes over `stage_id`.
    pub(crate) fn apply_to_state(&self, state: &mut State) -> Result<usize> {
        const STEP: &str = "cache_write";
        let stage = state.stage_checked(STEP, self.stage_id)?;
        let name = stage.name();
        ensure!(
            !stage.is_placeholder() && !stage.is_inlined(),
            InvalidTransformSnafu { step: STEP, reason: format!("stage {name} is a {} stage", stage.describe()) }
        );
        ensure!(
            !state.attach_map.has_attached(self.stage_id),
            InvalidTransformSnafu { step: STEP, reason: format!("stages are attached to {name}") }
        );
        ensure!(
            stage.tensorized_iter().is_none(),
            InvalidTransformSnafu { step: STEP, reason: format!("stage {name} is tensorized") }
        );

        let (cache, write_back) = Operation::cache_write_of(&stage.op, self.scope);
        ensure!(
            state.stage_id(&cache.name).is_none(),
            InvalidTransformSnafu { step: STEP, reason: format!("stage {} already exists", cache.name) }
        );

        let cache_stage = Stage::new(Arc::new(cache), self.scope, state.limits.default_data_alignment);
        let mut write_back = Stage::new(Arc::new(write_back), stage.layout.scope, stage.layout.data_alignment);
        write_back.compute_at = stage.compute_at;

        state.attach_map.shift_stage_ids(self.stage_id);
        state.stages[self.stage_id] = Arc::new(write_back);
        state.stages.insert(self.stage_id, Arc::new(cache_stage));
        if state.stages[self.stage_id + 1].compute_at == ComputeAtKind::Iter {
            state.infer_bound(self.stage_id + 1);
        }
        Ok(self.stage_id)
    }
}
