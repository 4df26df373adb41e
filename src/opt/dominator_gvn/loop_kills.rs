//! Loop summaries for memory-aware value numbering.
//!
//! - **Kill sets**: every location a loop body may invalidate in any
//!   iteration, computed once per loop
//! - **Invariance**: whether a value is computed outside a loop (or already
//!   hoisted out of it)
//! - **Hoist positions**: blocks that execute on every iteration that enters
//!   the loop

use rustc_hash::FxHashSet;

use crate::ir::cfg::{BlockId, ControlFlowView, Loop};
use crate::ir::graph::Graph;
use crate::ir::node::{NodeFlags, NodeId};
use crate::ir::operators::{LocationIdentity, Operator};

// =============================================================================
// Kill Sets
// =============================================================================

/// Locations one loop may kill.
#[derive(Debug, Clone, Default)]
pub struct KillSet {
    any: bool,
    locations: FxHashSet<LocationIdentity>,
}

impl KillSet {
    pub fn insert(&mut self, location: LocationIdentity) {
        if location.is_immutable() {
            return;
        }
        if location.is_any() {
            self.any = true;
        } else {
            self.locations.insert(location);
        }
    }

    /// Whether a read of `location` may see a different value in another
    /// iteration.
    pub fn kills(&self, location: LocationIdentity) -> bool {
        if location.is_immutable() {
            return false;
        }
        self.any
            || (location.is_any() && !self.locations.is_empty())
            || self.locations.contains(&location)
    }

    pub fn kills_any(&self) -> bool {
        self.any
    }

    pub fn is_empty(&self) -> bool {
        !self.any && self.locations.is_empty()
    }

    /// Killed locations, `Any` first when present.
    pub fn locations(&self) -> Vec<LocationIdentity> {
        let mut result = Vec::with_capacity(self.locations.len() + 1);
        if self.any {
            result.push(LocationIdentity::Any);
        }
        result.extend(self.locations.iter().copied());
        result
    }
}

/// Kill sets of every loop of a control-flow view, indexed like
/// `LoopAnalysis::loops`.
#[derive(Debug, Clone)]
pub struct LoopKillSummary {
    kills: Vec<KillSet>,
}

impl LoopKillSummary {
    pub fn compute(graph: &Graph, view: &ControlFlowView) -> Self {
        let kills = view
            .loops
            .loops
            .iter()
            .map(|lp| Self::kill_set(graph, view, lp))
            .collect();
        LoopKillSummary { kills }
    }

    /// Nested loops are part of the body, so their kills count too.
    fn kill_set(graph: &Graph, view: &ControlFlowView, lp: &Loop) -> KillSet {
        let mut set = KillSet::default();
        for &block in &lp.body {
            for &node in &view.cfg.block(block).nodes {
                if let Some(location) = graph.op(node).location_killed() {
                    set.insert(location);
                }
            }
        }
        set
    }

    pub fn for_loop(&self, index: usize) -> Option<&KillSet> {
        self.kills.get(index)
    }

    pub fn len(&self) -> usize {
        self.kills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kills.is_empty()
    }
}

// =============================================================================
// Invariance
// =============================================================================

/// Whether an operator produces the same value wherever it is evaluated.
#[inline]
fn is_defined_outside_loop(op: &Operator) -> bool {
    matches!(
        op,
        Operator::ConstInt(_) | Operator::ConstLogic(_) | Operator::Null | Operator::Parameter(_)
    )
}

/// Whether `node` has the same value in every iteration of loop `index`.
///
/// Recursion through floating inputs stops after `depth` levels and then
/// answers `false`.
pub fn is_loop_invariant(
    graph: &Graph,
    view: &ControlFlowView,
    index: usize,
    node: NodeId,
    depth: u32,
) -> bool {
    let n = graph.node(node);
    if is_defined_outside_loop(&n.op) || n.flags.contains(NodeFlags::HOISTED) {
        return true;
    }
    let lp = &view.loops.loops[index];
    if n.is_fixed() {
        return view
            .cfg
            .block_of(node)
            .is_some_and(|block| !lp.contains(block));
    }
    if n.op.is_phi() {
        return n
            .input(0)
            .and_then(|merge| view.cfg.block_of(merge))
            .is_some_and(|block| !lp.contains(block));
    }
    if depth == 0 {
        return false;
    }
    n.inputs
        .iter()
        .all(|input| is_loop_invariant(graph, view, index, input, depth - 1))
}

/// Whether `block` runs whenever loop `lp` is entered: it dominates every
/// back edge and every block the loop can be left from.
pub fn executes_every_iteration(view: &ControlFlowView, lp: &Loop, block: BlockId) -> bool {
    lp.back_edges
        .iter()
        .chain(&lp.exit_sources)
        .all(|&b| view.dom.dominates(block, b))
}

// =============================================================================
// Tests
// =============================================================================
