use std::sync::Arc;

use bon::bon;
use tessel_ir::ComputeDag;

use crate::config::{HardwareParams, ScheduleLimits};
use crate::error::Result;
use crate::intrinsic::IntrinsicRegistry;
use crate::state::State;
use crate::steps::Step;

/// A compute graph to schedule, together with the target it runs on and the
/// intrinsics tensorization may use.
#[derive(Debug, Clone)]
pub struct SearchTask {
    pub name: String,
    pub dag: ComputeDag,
    pub hardware: HardwareParams,
    pub intrinsics: Arc<IntrinsicRegistry>,
}

#[bon]
impl SearchTask {
    #[builder]
    pub fn builder(
        #[builder(into)] name: String,
        dag: ComputeDag,
        #[builder(default)] hardware: HardwareParams,
        #[builder(default)] intrinsics: Arc<IntrinsicRegistry>,
    ) -> Self {
        Self { name, dag, hardware, intrinsics }
    }
}

impl SearchTask {
    pub fn limits(&self) -> ScheduleLimits {
        ScheduleLimits::from_hardware(&self.hardware)
    }

    pub fn init_state(&self) -> State {
        State::with_limits(&self.dag, self.limits())
    }

    /// Rebuild a state of this task from a recorded log.
    pub fn replay(&self, steps: &[Step]) -> Result<State> {
        State::replay_with_limits(&self.dag, &self.intrinsics, steps, self.limits())
    }

    /// See [`State::fill_split_lengths`].
    pub fn fill_split_lengths(&self, state: &State, step_id: usize, lengths: &[Option<i64>]) -> Result<State> {
        state.fill_split_lengths(&self.dag, &self.intrinsics, step_id, lengths)
    }
}
