//! Optimization passes over the Sea-of-Nodes IR.
//!
//! - **Canonicalizer** (`canonicalize`): worklist-driven local rewriting,
//!   stamp inference, control-flow simplification and floating GVN
//! - **Conditional elimination** (`conditional`): dominator-tree walk that
//!   proves branches and guards redundant
//! - **Dominator GVN** (`dominator_gvn`): memory-aware value numbering of
//!   fixed reads with loop-invariant code motion
//! - **Pipeline** (`pipeline`): ordered execution with cleanup canonicalization
//!
//! Passes declare the `GraphState` they need and the state they establish;
//! `run_pass` enforces both.

pub mod canonicalize;
pub mod conditional;
pub mod dominator_gvn;
pub mod pipeline;

pub use canonicalize::{Canonicalizer, CanonicalizerConfig, CanonicalizerStats};
pub use conditional::{
    ConditionalElimination, ConditionalEliminationConfig, ConditionalEliminationStats,
};
pub use dominator_gvn::{DominatorGvn, DominatorGvnConfig, DominatorGvnStats};
pub use pipeline::{OptPipeline, PassPhase, PipelineConfig, PipelineStats};

use crate::error::{OptError, OptResult};
use crate::ir::graph::{Graph, GraphState};

/// An optimization pass over a whole graph.
pub trait OptimizationPass {
    /// Short, stable pass name used in logs and statistics.
    fn name(&self) -> &'static str;

    /// Run the pass; returns whether the graph changed.
    fn run(&mut self, graph: &mut Graph) -> OptResult<bool>;

    /// Graph state that must hold before the pass runs.
    fn required_state(&self) -> GraphState {
        GraphState::empty()
    }

    /// Graph state that holds after the pass ran.
    fn established_state(&self) -> GraphState {
        GraphState::empty()
    }

    /// Graph state a changing run no longer guarantees.
    fn invalidated_state(&self) -> GraphState {
        GraphState::CANONICAL
    }
}

/// Run `pass` after checking its prerequisites, then update the graph state.
pub fn run_pass(pass: &mut dyn OptimizationPass, graph: &mut Graph) -> OptResult<bool> {
    let required = pass.required_state();
    if !graph.has_state(required) {
        return Err(OptError::MissingGraphState {
            pass: pass.name(),
            required,
        });
    }
    let changed = pass.run(graph)?;
    if changed {
        graph.remove_state(pass.invalidated_state());
    }
    graph.add_state(pass.established_state());
    Ok(changed)
}
