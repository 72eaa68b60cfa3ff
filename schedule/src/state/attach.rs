//! Compute-at relations between stages.

use std::collections::BTreeMap;

/// `(stage id, iterator id)` of an attach point.
pub type IterKey = (usize, usize);

/// Which stage is computed inside which iterator, indexed both ways.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachMap {
    stage_to_iter: BTreeMap<usize, IterKey>,
    iter_to_stages: BTreeMap<IterKey, Vec<usize>>,
}

impl AttachMap {
    pub fn attach_point(&self, stage_id: usize) -> Option<IterKey> {
        self.stage_to_iter.get(&stage_id).copied()
    }

    /// Stages attached at `key`, in attachment order.
    pub fn attached_at(&self, key: IterKey) -> &[usize] {
        self.iter_to_stages.get(&key).map_or(&[], Vec::as_slice)
    }

    /// Whether any stage is attached to an iterator of `stage_id`.
    pub fn has_attached(&self, stage_id: usize) -> bool {
        self.iter_to_stages.range((stage_id, 0)..=(stage_id, usize::MAX)).next().is_some()
    }

    /// Iterator ids of `stage_id` that have something attached.
    pub fn attached_iters(&self, stage_id: usize) -> impl Iterator<Item = usize> + '_ {
        self.iter_to_stages.range((stage_id, 0)..=(stage_id, usize::MAX)).map(|(&(_, iter), _)| iter)
    }

    /// Walk the attach chain upward from `stage_id`, nearest target first.
    pub fn ancestors(&self, stage_id: usize) -> impl Iterator<Item = usize> + '_ {
        let mut cur = stage_id;
        let mut budget = self.stage_to_iter.len();
        std::iter::from_fn(move || {
            if budget == 0 {
                return None;
            }
            budget -= 1;
            let (target, _) = self.attach_point(cur)?;
            cur = target;
            Some(target)
        })
    }

    pub fn set_compute_at(&mut self, stage_id: usize, target_stage_id: usize, target_iter_id: usize) {
        self.detach(stage_id);
        let key = (target_stage_id, target_iter_id);
        self.stage_to_iter.insert(stage_id, key);
        self.iter_to_stages.entry(key).or_default().push(stage_id);
    }

    /// Drop the attach point of `stage_id`, if any.
    pub fn detach(&mut self, stage_id: usize) {
        let Some(key) = self.stage_to_iter.remove(&stage_id) else {
            return;
        };
        if let Some(stages) = self.iter_to_stages.get_mut(&key) {
            stages.retain(|&s| s != stage_id);
            if stages.is_empty() {
                self.iter_to_stages.remove(&key);
            }
        }
    }

    /// Move every attach point on `stage_id` through `remap`, which maps an
    /// old iterator id to its new one.
    pub fn remap_iters(&mut self, stage_id: usize, remap: impl Fn(usize) -> usize) {
        self.rebuild(|(s, i)| if s == stage_id { (s, remap(i)) } else { (s, i) }, |s| s);
    }

    /// Shift every stage id `>= start` up by one, making room for a stage
    /// inserted at `start`.
    pub fn shift_stage_ids(&mut self, start: usize) {
        let shift = |s: usize| if s >= start { s + 1 } else { s };
        self.rebuild(|(s, i)| (shift(s), i), shift);
    }

    fn rebuild(&mut self, key_fn: impl Fn(IterKey) -> IterKey, stage_fn: impl Fn(usize) -> usize) {
        let old = std::mem::take(&mut self.iter_to_stages);
        self.stage_to_iter.clear();
        for (key, stages) in old {
            let key = key_fn(key);
            for stage in stages {
                let stage = stage_fn(stage);
                self.stage_to_iter.insert(stage, key);
                self.iter_to_stages.entry(key).or_default().push(stage);
            }
        }
    }
}
