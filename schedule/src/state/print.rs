use std::fmt;

use super::{IterAnnotation, State};

fn extent(e: Option<i64>) -> String {
    e.map_or_else(|| "None".to_string(), |e| e.to_string())
}

impl State {
    fn fmt_stage(&self, f: &mut fmt::Formatter<'_>, stage_id: usize, indent: usize) -> fmt::Result {
        let stage = &self.stages[stage_id];
        if stage.is_inlined() {
            return Ok(());
        }

        let mut depth = indent;
        for (iter_id, it) in stage.iters.iter().enumerate() {
            let pad = "  ".repeat(depth);
            match it.annotation {
                IterAnnotation::Tensorize => {
                    let intrinsic = it.intrinsic.as_deref().unwrap_or("?");
                    writeln!(f, "{pad}tensorize {intrinsic} {:?}", it.collapsed.as_slice())?;
                }
                IterAnnotation::None => writeln!(f, "{pad}for {} (0,{})", it.name, extent(it.extent))?,
                ann => writeln!(f, "{pad}{ann} {} (0,{})", it.name, extent(it.extent))?,
            }
            depth += 1;
            for &attached in self.attach_map.attached_at((stage_id, iter_id)) {
                self.fmt_stage(f, attached, depth)?;
            }
        }
        writeln!(f, "{}{} = ...", "  ".repeat(depth), stage.name())
    }
}

/// Loop nest rendering: placeholders first, then every root stage with the
/// stages attached to it printed inside the iterator they are attached at.
impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let placeholders: Vec<&str> =
            self.stages.iter().filter(|s| s.is_placeholder()).map(|s| s.name()).collect();
        if !placeholders.is_empty() {
            writeln!(f, "Placeholder: {}", placeholders.join(", "))?;
        }
        for (stage_id, stage) in self.stages.iter().enumerate() {
            if stage.is_placeholder() || self.attach_map.attach_point(stage_id).is_some() {
                continue;
            }
            self.fmt_stage(f, stage_id, 0)?;
        }
        Ok(())
    }
}
