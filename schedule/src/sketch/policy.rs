use std::sync::Arc;

use super::rules::builtin_rules;
use super::{ConditionKind, Expansion, SketchRule};
use crate::config::SketchParams;
use crate::state::State;
use crate::task::SearchTask;

/// Ordered rule registry plus the driver that enumerates sketches.
///
/// Rules are fixed once generation starts: registration takes `&mut self`,
/// generation `&self`.
pub struct SketchPolicy {
    task: Arc<SearchTask>,
    params: SketchParams,
    custom: Vec<Arc<dyn SketchRule>>,
    builtin: Vec<Arc<dyn SketchRule>>,
}

impl SketchPolicy {
    pub fn new(task: Arc<SearchTask>, params: SketchParams) -> Self {
        let builtin = if params.builtin_rules { builtin_rules(&params) } else { Vec::new() };
        Self { task, params, custom: Vec::new(), builtin }
    }

    /// Add a rule. Custom rules are asked before every built-in rule, in
    /// registration order.
    pub fn register_rule(&mut self, rule: Arc<dyn SketchRule>) {
        tracing::debug!(rule = rule.name(), "sketch rule registered");
        self.custom.push(rule);
    }

    pub fn task(&self) -> &SearchTask {
        &self.task
    }

    pub fn params(&self) -> &SketchParams {
        &self.params
    }

    /// All rules in evaluation order.
    pub fn rules(&self) -> impl Iterator<Item = &Arc<dyn SketchRule>> {
        self.custom.iter().chain(&self.builtin)
    }

    /// One dispatch round: evaluate every rule for `stage_id` and collect
    /// the expansions of the ones that apply.
    ///
    /// A rule whose `apply` fails contributes no branch; the others are
    /// unaffected. When no rule applies at all the stage is skipped, so the
    /// branch carries on with the previous stage. A `stage_id` past the last
    /// stage yields nothing.
    pub fn expand(&self, state: &State, stage_id: usize) -> Vec<Expansion> {
        if stage_id >= state.stages().len() {
            tracing::warn!(stage_id, num_stages = state.stages().len(), "no such stage, nothing to expand");
            return Vec::new();
        }

        let mut out = Vec::new();
        let mut applied = false;
        for rule in self.rules() {
            let condition = rule.meet_condition(&self.task, state, stage_id);
            tracing::trace!(rule = rule.name(), stage_id, %condition, "rule condition");
            if condition == ConditionKind::Pass {
                continue;
            }

            applied = true;
            match rule.apply(&self.task, state, stage_id) {
                Ok(expansions) => out.extend(expansions),
                Err(error) => tracing::warn!(rule = rule.name(), stage_id, %error, "sketch rule failed, branch dropped"),
            }
            if condition == ConditionKind::ApplyAndSkipRest {
                break;
            }
        }

        if !applied {
            tracing::debug!(stage_id, "no rule applies, stage skipped");
            out.push((state.clone(), stage_id.checked_sub(1)));
        }
        out
    }

    /// Enumerate sketches, starting from the last stage of the initial state.
    #[tracing::instrument(skip_all, fields(task = %self.task.name))]
    pub fn generate_sketches(&self) -> Vec<State> {
        let init = self.task.init_state();
        let last = init.stages().len().checked_sub(1);
        let mut pending: Vec<Expansion> = vec![(init, last)];
        let mut done = Vec::new();

        while !pending.is_empty() {
            let mut next = Vec::new();
            for (state, stage_id) in pending {
                match stage_id {
                    None => done.push(state),
                    Some(id) => next.extend(self.expand(&state, id)),
                }
            }

            let budget = self.params.max_sketches.saturating_sub(done.len());
            if next.len() > budget {
                tracing::debug!(pending = next.len(), budget, "sketch branches truncated");
                next.truncate(budget);
            }
            pending = next;
        }

        tracing::debug!(num_sketches = done.len(), "sketches generated");
        done
    }
}
