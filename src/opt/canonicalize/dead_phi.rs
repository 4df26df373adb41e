//! Removal of dead loop-phi cycles.
//!
//! An induction variable whose result is never consumed outside its own
//! update chain keeps itself alive through the back edge: every node of the
//! cycle has a usage, so the zero-usage cascade never fires. A forward flood
//! over the usages of each loop phi finds such cycles.

use rustc_hash::FxHashSet;

use crate::error::OptResult;
use crate::ir::graph::Graph;
use crate::ir::graph_util::{is_dead_floating, kill_with_unused_floating_inputs};
use crate::ir::node::NodeId;
use crate::ir::operators::Operator;
use crate::ir::opt_log::RewriteKind;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeadPhiSweep {
    pub cycles_removed: usize,
    pub nodes_removed: usize,
    pub floods_abandoned: usize,
}

enum Flood {
    /// Every usage stays inside this set.
    Dead(Vec<NodeId>),
    /// Something outside the floating cycle consumes it.
    Live,
    /// The step bound was exceeded.
    Abandoned,
}

/// Delete every loop phi whose forward closure is a closed floating cycle.
pub fn remove_dead_phi_cycles(
    graph: &mut Graph,
    pass: &'static str,
    flood_limit: usize,
) -> OptResult<DeadPhiSweep> {
    let loop_phis: Vec<NodeId> = graph
        .iter()
        .filter(|(_, n)| {
            n.op.is_phi() && n.input(0).is_some_and(|m| graph.op(m).is_loop_begin())
        })
        .map(|(id, _)| id)
        .collect();

    let mut sweep = DeadPhiSweep::default();
    for phi in loop_phis {
        if !graph.is_alive(phi) {
            continue;
        }
        match flood(graph, phi, flood_limit) {
            Flood::Dead(cycle) => {
                log::trace!("dead phi cycle at {:?}: {} nodes", phi, cycle.len());
                graph.report(pass, RewriteKind::DeadPhiCycle, phi, None);
                sweep.cycles_removed += 1;
                sweep.nodes_removed += cycle.len();
                delete_cycle(graph, &cycle)?;
            }
            Flood::Live => {}
            Flood::Abandoned => {
                log::debug!("dead phi flood from {:?} exceeded {} steps", phi, flood_limit);
                sweep.floods_abandoned += 1;
            }
        }
    }
    Ok(sweep)
}

fn flood(graph: &Graph, phi: NodeId, limit: usize) -> Flood {
    let mut visited: FxHashSet<NodeId> = FxHashSet::default();
    visited.insert(phi);
    let mut members = vec![phi];
    let mut stack = vec![phi];
    let mut steps = 0usize;

    while let Some(current) = stack.pop() {
        for usage in graph.distinct_usages(current) {
            steps += 1;
            if steps > limit {
                return Flood::Abandoned;
            }
            if visited.contains(&usage) {
                continue;
            }
            let node = graph.node(usage);
            if node.is_fixed() || node.op.is_guard() || matches!(node.op, Operator::FrameState(_))
            {
                return Flood::Live;
            }
            visited.insert(usage);
            members.push(usage);
            stack.push(usage);
        }
    }
    Flood::Dead(members)
}

fn delete_cycle(graph: &mut Graph, cycle: &[NodeId]) -> OptResult<()> {
    let members: FxHashSet<NodeId> = cycle.iter().copied().collect();
    let mut outside = Vec::new();
    for &node in cycle {
        for input in graph.node(node).inputs.iter() {
            if !members.contains(&input) && !outside.contains(&input) {
                outside.push(input);
            }
        }
    }
    for &node in cycle {
        graph.clear_inputs(node);
    }
    for &node in cycle {
        graph.delete_detached(node);
    }
    for input in outside {
        if is_dead_floating(graph, input) {
            kill_with_unused_floating_inputs(graph, input)?;
        }
    }
    Ok(())
}
