//! Deletion cascades and control-flow surgery on the graph.
//!
//! These helpers keep the structural invariants intact while passes rewrite
//! control flow: every fixed node stays linked from `Start`, deleted nodes
//! leave no dangling edges behind, and floating inputs that become unused are
//! swept locally instead of waiting for a global collection.

use rustc_hash::FxHashSet;

use super::graph::Graph;
use super::node::NodeId;
use super::operators::{ControlOp, ControlShape, Operator};
use crate::error::{OptError, OptResult};

/// Floating, unused and not a guard: deleting it cannot change behavior.
pub fn is_dead_floating(graph: &Graph, node: NodeId) -> bool {
    graph.is_alive(node)
        && graph.node(node).is_floating()
        && !graph.has_usages(node)
        && !graph.op(node).is_guard()
}

/// Delete an unused node and every floating input that becomes unused.
///
/// Guards are never swept by the cascade: an unused guard still checks.
pub fn kill_with_unused_floating_inputs(graph: &mut Graph, node: NodeId) -> OptResult<()> {
    if !graph.is_alive(node) {
        return Err(OptError::DeletedNode { node });
    }
    if graph.has_usages(node) {
        return Err(OptError::contract(node, "killing a node that still has usages"));
    }
    let mut worklist = vec![node];
    while let Some(current) = worklist.pop() {
        if !graph.is_alive(current) || graph.has_usages(current) {
            continue;
        }
        let inputs = graph.node(current).inputs.to_vec();
        graph.delete_detached(current);
        for input in inputs {
            if is_dead_floating(graph, input) && !worklist.contains(&input) {
                worklist.push(input);
            }
        }
    }
    Ok(())
}

/// Kill the control-flow subgraph reachable from `node`.
///
/// Ends reaching a surviving merge are removed from it (with their phi
/// inputs). A merge that loses all forward ends, or a loop that loses its
/// entry, dies as well. Floating nodes depending on killed fixed nodes are
/// killed with them, and outside inputs left unused are swept.
pub fn kill_cfg(graph: &mut Graph, node: NodeId) -> OptResult<()> {
    if !graph.is_alive(node) {
        return Ok(());
    }
    let mut marked: FxHashSet<NodeId> = FxHashSet::default();
    let mut order = Vec::new();
    let mut worklist = vec![node];

    while let Some(current) = worklist.pop() {
        if !graph.is_alive(current) || !marked.insert(current) {
            continue;
        }
        order.push(current);
        if graph.op(current).is_end() {
            if let Some(merge) = graph.merge_of_end(current) {
                if marked.contains(&merge) {
                    continue;
                }
                let loop_entry = graph.op(merge).is_loop_begin()
                    && graph.node(merge).input(0) == Some(current);
                let last_end = graph.node(merge).inputs.len() == 1;
                if loop_entry || last_end {
                    worklist.push(merge);
                } else {
                    remove_merge_end(graph, merge, current)?;
                }
            }
            continue;
        }
        for &successor in graph.node(current).successors.iter() {
            if successor.is_valid() {
                worklist.push(successor);
            }
        }
    }

    // Floating nodes hanging off the dead region die with it.
    let mut floating = Vec::new();
    let mut frontier = order.clone();
    while let Some(current) = frontier.pop() {
        for usage in graph.distinct_usages(current) {
            if graph.node(usage).is_floating() && marked.insert(usage) {
                floating.push(usage);
                frontier.push(usage);
            }
        }
    }
    order.extend(floating);

    graph.replace_at_predecessor(node, NodeId::INVALID);

    let mut candidates = Vec::new();
    for &dead in &order {
        for input in graph.node(dead).inputs.iter() {
            if !marked.contains(&input) && !candidates.contains(&input) {
                candidates.push(input);
            }
        }
    }
    for &dead in &order {
        graph.clear_inputs(dead);
    }
    for &dead in &order {
        graph.replace_at_usages(dead, NodeId::INVALID);
        graph.delete_detached(dead);
    }
    log::trace!("kill_cfg from {:?}: {} nodes", node, order.len());

    for candidate in candidates {
        if is_dead_floating(graph, candidate) {
            kill_with_unused_floating_inputs(graph, candidate)?;
        }
    }
    Ok(())
}

/// Splice a fixed-with-next node out of the control chain.
pub fn unlink_fixed_node(graph: &mut Graph, node: NodeId) -> OptResult<()> {
    let op = graph.op(node);
    let single_next = op.has_next()
        || (op.shape() == ControlShape::WithException && graph.node(node).successors.len() <= 1);
    if !single_next {
        return Err(OptError::contract(node, "unlinking a node without a single next"));
    }
    let next = graph.node(node).next().unwrap_or(NodeId::INVALID);
    graph.set_next(node, NodeId::INVALID);
    graph.replace_at_predecessor(node, next);
    Ok(())
}

/// Unlink an unused fixed node and delete it with its unused inputs.
pub fn remove_fixed_with_unused_inputs(graph: &mut Graph, node: NodeId) -> OptResult<()> {
    unlink_fixed_node(graph, node)?;
    kill_with_unused_floating_inputs(graph, node)
}

/// Detach and kill the exception successor of an invoke.
pub fn unlink_and_kill_exception_edge(graph: &mut Graph, node: NodeId) -> OptResult<()> {
    let exception = graph.node(node).successors.get(1).copied();
    if let Some(exception) = exception.and_then(NodeId::valid) {
        graph.set_successor(node, 1, NodeId::INVALID);
        kill_cfg(graph, exception)?;
    }
    graph.truncate_successors(node, 1);
    Ok(())
}

/// Replace a linked fixed-with-next node by an unlinked one in place.
pub fn replace_fixed_with_fixed(graph: &mut Graph, old: NodeId, new: NodeId) -> OptResult<()> {
    if graph.node(new).predecessor().is_some() || graph.node(new).next().is_some() {
        return Err(OptError::contract(new, "replacement is already linked"));
    }
    graph.replace_at_usages(old, new);
    let next = graph.node(old).next().unwrap_or(NodeId::INVALID);
    graph.set_next(old, NodeId::INVALID);
    graph.replace_at_predecessor(old, new);
    graph.set_next(new, next);
    kill_with_unused_floating_inputs(graph, old)
}

/// Replace a fixed-with-next node by a floating value and unlink it.
pub fn replace_fixed_with_floating(graph: &mut Graph, old: NodeId, new: NodeId) -> OptResult<()> {
    graph.replace_at_usages(old, new);
    remove_fixed_with_unused_inputs(graph, old)
}

/// Replace a split by one of its successors.
///
/// The other successors are detached but not killed; they are returned so the
/// caller can kill them when it is safe to do so.
pub fn remove_split(graph: &mut Graph, split: NodeId, survivor: NodeId) -> OptResult<Vec<NodeId>> {
    if !graph.op(split).is_split() {
        return Err(OptError::contract(split, "remove_split on a non-split node"));
    }
    let successors: Vec<NodeId> = graph
        .node(split)
        .successors
        .iter()
        .copied()
        .filter(|s| s.is_valid())
        .collect();
    if !successors.contains(&survivor) {
        return Err(OptError::contract(survivor, "survivor is not a successor"));
    }
    graph.clear_successors(split);
    graph.replace_at_predecessor(split, survivor);
    kill_with_unused_floating_inputs(graph, split)?;
    Ok(successors.into_iter().filter(|&s| s != survivor).collect())
}

/// Insert the unlinked fixed-with-next `new` right after `anchor`.
pub fn add_after_fixed(graph: &mut Graph, anchor: NodeId, new: NodeId) {
    let next = graph.node(anchor).next().unwrap_or(NodeId::INVALID);
    graph.set_next(anchor, new);
    graph.set_next(new, next);
}

/// Insert the unlinked fixed-with-next `new` right before `node`.
pub fn add_before_fixed(graph: &mut Graph, node: NodeId, new: NodeId) {
    graph.replace_at_predecessor(node, new);
    graph.set_next(new, node);
}

/// Remove `end` from `merge`, dropping the matching input of every phi.
pub fn remove_merge_end(graph: &mut Graph, merge: NodeId, end: NodeId) -> OptResult<()> {
    let Some(index) = graph.node(merge).inputs.position(end) else {
        return Err(OptError::contract(end, "end does not flow into merge"));
    };
    for phi in graph.phis_of(merge) {
        graph.remove_input(phi, index + 1);
    }
    graph.remove_input(merge, index);
    Ok(())
}

/// The begin node of the block containing `node`.
pub fn prev_begin(graph: &Graph, node: NodeId) -> Option<NodeId> {
    let mut current = node;
    loop {
        if graph.op(current).is_begin() {
            return Some(current);
        }
        current = graph.node(current).predecessor()?;
    }
}

/// Collapse a merge (or a loop without back edges) that has a single end.
///
/// Phis are replaced by their only value, the end and the merge disappear,
/// and anything anchored at the merge moves to the begin before the end.
pub fn reduce_trivial_merge(graph: &mut Graph, merge: NodeId) -> OptResult<()> {
    if !graph.op(merge).is_merge() || graph.node(merge).inputs.len() != 1 {
        return Err(OptError::contract(merge, "merge is not trivial"));
    }
    let Some(end) = graph.node(merge).input(0) else {
        return Err(OptError::malformed(merge, "merge without end"));
    };
    let anchor = prev_begin(graph, end).unwrap_or(NodeId::INVALID);

    for phi in graph.phis_of(merge) {
        let value = graph.node(phi).input(1).unwrap_or(NodeId::INVALID);
        if value == phi {
            return Err(OptError::malformed(phi, "phi of a trivial merge reads itself"));
        }
        graph.replace_at_usages(phi, value);
        kill_with_unused_floating_inputs(graph, phi)?;
    }

    let next = graph.node(merge).next().unwrap_or(NodeId::INVALID);
    graph.set_next(merge, NodeId::INVALID);
    graph.replace_at_predecessor(end, next);
    graph.clear_inputs(merge);
    graph.replace_at_usages(merge, anchor);
    graph.delete_detached(merge);
    graph.delete_detached(end);
    Ok(())
}

/// Turn a loop that lost all its back edges into straight-line code.
pub fn reduce_degenerate_loop(graph: &mut Graph, loop_begin: NodeId) -> OptResult<()> {
    if !graph.op(loop_begin).is_loop_begin() {
        return Err(OptError::contract(loop_begin, "not a loop begin"));
    }
    let exits: Vec<NodeId> = graph
        .distinct_usages(loop_begin)
        .into_iter()
        .filter(|&u| matches!(graph.op(u), Operator::Control(ControlOp::LoopExit)))
        .collect();
    for exit in exits {
        graph.clear_inputs(exit);
        graph.set_op(exit, Operator::control(ControlOp::Begin));
    }
    reduce_trivial_merge(graph, loop_begin)
}

// =============================================================================
// Tests
// =============================================================================
