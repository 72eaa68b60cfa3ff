//! Sketch generation: rule-driven enumeration of schedule skeletons.
//!
//! A sketch is a state whose structure (tiling levels, cache stages,
//! attachments, tensorization) is fixed while split lengths may still be
//! unknown. [`SketchPolicy`] walks the stages of a task from the output
//! backwards and, for each stage, asks every registered [`SketchRule`] in
//! order whether it applies. A rule that applies returns any number of
//! `(state, next stage)` expansions; each expansion is an independent branch.

mod policy;
pub mod rules;
pub mod tiling;

use std::fmt;

pub use policy::SketchPolicy;

use crate::error::Result;
use crate::state::State;
use crate::task::SearchTask;

/// A branch produced by a rule: the new state and the stage to process next.
/// `None` means the state needs no further stage-specific processing.
pub type Expansion = (State, Option<usize>);

/// Verdict of a rule's condition for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConditionKind {
    /// Not applicable; ask the next rule.
    Pass,
    /// Apply, then keep asking the remaining rules. Their expansions are
    /// separate branches, not applied on top of this one.
    Apply,
    /// Apply and skip every remaining rule for this stage.
    ApplyAndSkipRest,
}

/// A stage-specific scheduling decision.
pub trait SketchRule: Send + Sync {
    fn name(&self) -> &str;

    fn meet_condition(&self, task: &SearchTask, state: &State, stage_id: usize) -> ConditionKind;

    /// Expand `state` at `stage_id`. `state` is shared with the other rules;
    /// clone it before applying primitives.
    fn apply(&self, task: &SearchTask, state: &State, stage_id: usize) -> Result<Vec<Expansion>>;
}

type ConditionFn = dyn Fn(&SearchTask, &State, usize) -> ConditionKind + Send + Sync;
type ApplyFn = dyn Fn(&SearchTask, &State, usize) -> Result<Vec<Expansion>> + Send + Sync;

/// Rule built from a pair of closures, for hand-written schedules of
/// particular operations (usually recognized by their tag).
pub struct CustomSketchRule {
    name: String,
    condition: Box<ConditionFn>,
    apply: Box<ApplyFn>,
}

impl CustomSketchRule {
    pub fn new(
        name: impl Into<String>,
        condition: impl Fn(&SearchTask, &State, usize) -> ConditionKind + Send + Sync + 'static,
        apply: impl Fn(&SearchTask, &State, usize) -> Result<Vec<Expansion>> + Send + Sync + 'static,
    ) -> Self {
        Self { name: name.into(), condition: Box::new(condition), apply: Box::new(apply) }
    }
}

impl fmt::Debug for CustomSketchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomSketchRule").field("name", &self.name).finish_non_exhaustive()
    }
}

impl SketchRule for CustomSketchRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn meet_condition(&self, task: &SearchTask, state: &State, stage_id: usize) -> ConditionKind {
        (self.condition)(task, state, stage_id)
    }

    fn apply(&self, task: &SearchTask, state: &State, stage_id: usize) -> Result<Vec<Expansion>> {
        (self.apply)(task, state, stage_id)
    }
}
