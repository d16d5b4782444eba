//! The deferred scheduling pass.
//!
//! Commits never evaluate dependents inline; they only queue them. A
//! pass drains the queue in a later turn, re-evaluating stale nodes.
//! Nodes whose outputs change re-stale their own dependents, which join
//! the same pass — so a feedback cycle shows up as a pass that never
//! drains. The pass therefore carries a hard evaluation budget; blowing
//! it abandons the pass with an explicit error instead of hanging, and
//! leaves the runtime usable.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::graph::registry::Graph;
use crate::store::Store;

/// What one scheduling pass did.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassSummary {
    /// Nodes evaluated during the pass.
    pub evaluations: usize,
    /// How many of those evaluations changed their output.
    pub changed: usize,
}

/// Drain the deferred queue, bounded by `bound` evaluations.
pub(crate) fn run_pass(store: &Store, graph: &Arc<Graph>, bound: usize) -> Result<PassSummary> {
    let mut summary = PassSummary::default();

    while let Some(node) = graph.pop_ready() {
        // A pull earlier in this pass may have settled it already.
        if !node.state().needs_evaluation() {
            continue;
        }

        if summary.evaluations >= bound {
            graph.clear_queue();
            warn!(bound, "scheduling pass exceeded its evaluation budget, abandoning");
            return Err(Error::IterationBound {
                evaluations: summary.evaluations,
                bound,
            });
        }

        summary.evaluations += 1;
        if node.reevaluate(store, graph)? {
            summary.changed += 1;
        }
    }

    if summary.evaluations > 0 {
        debug!(
            evaluations = summary.evaluations,
            changed = summary.changed,
            "scheduling pass complete"
        );
    }
    Ok(summary)
}
