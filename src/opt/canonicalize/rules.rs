//! Per-operator rewrite rules: `canonicalize`, `infer_stamp` and `simplify`.
//!
//! Rules are dispatched by matching on the operator. A rule may create new
//! nodes for its result, but it never mutates nodes other than the one it was
//! asked about; the driver applies the result through the replacement
//! protocol. `simplify` is the exception: it restructures control flow around
//! its node directly and defers killing dead branches to the driver.

use super::replace::perform_replacement;
use crate::error::OptResult;
use crate::ir::graph::Graph;
use crate::ir::graph_util::{
    add_after_fixed, kill_with_unused_floating_inputs, prev_begin, reduce_degenerate_loop,
    reduce_trivial_merge, remove_fixed_with_unused_inputs, remove_split, unlink_fixed_node,
};
use crate::ir::node::NodeId;
use crate::ir::operators::{
    ArithOp, BitwiseOp, CallTarget, CmpOp, ControlOp, ControlShape, GuardInfo, Operator,
};
use crate::ir::stamp::{LogicStamp, Stamp};

/// Result of asking a node for its canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Canonical {
    /// The node is already canonical.
    Unchanged,
    /// Replace the node by this (possibly new) node.
    Replace(NodeId),
    /// Delete the node; it must have no usages.
    Delete,
}

/// Side requests collected while simplifying control flow.
#[derive(Debug, Default)]
pub struct SimplifierTool {
    /// Nodes whose surroundings changed and should be revisited.
    pub revisit: Vec<NodeId>,
    /// Detached branch begins to kill once the current step is over.
    pub dead_branches: Vec<NodeId>,
}

impl SimplifierTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_to_worklist(&mut self, node: NodeId) {
        self.revisit.push(node);
    }

    pub fn delete_branch(&mut self, begin: NodeId) {
        self.dead_branches.push(begin);
    }
}

fn int_value(graph: &Graph, node: Option<NodeId>) -> Option<i64> {
    graph.node(node?).as_int()
}

// =============================================================================
// Canonicalize
// =============================================================================

/// Compute the canonical form of `node`.
pub fn canonicalize(graph: &mut Graph, node: NodeId) -> Canonical {
    let op = graph.op(node).clone();
    match op {
        Operator::IntOp(arith) => canonical_arith(graph, node, arith),
        Operator::Bitwise(bitwise) => canonical_bitwise(graph, node, bitwise),
        Operator::IntCmp(cmp) => canonical_compare(graph, node, cmp),
        Operator::IsNull => {
            let of_null = graph
                .node(node)
                .input(0)
                .is_some_and(|x| graph.op(x) == &Operator::Null);
            if of_null {
                Canonical::Replace(graph.const_logic(true))
            } else {
                Canonical::Unchanged
            }
        }
        Operator::LogicNegation => canonical_negation(graph, node),
        Operator::Phi => canonical_phi(graph, node),
        Operator::Pi(stamp) => {
            let Some(value) = graph.node(node).input(0) else {
                return Canonical::Unchanged;
            };
            if graph.stamp(value).is_subset_of(&stamp) {
                Canonical::Replace(value)
            } else {
                Canonical::Unchanged
            }
        }
        Operator::Guard(info) => canonical_guard(graph, node, info),
        Operator::FixedGuard(info) => {
            let Some((inner, _)) = negated_condition(graph, node) else {
                return Canonical::Unchanged;
            };
            let flipped = graph.add(Operator::FixedGuard(info.negated()), &[inner]);
            Canonical::Replace(flipped)
        }
        Operator::Load(_) if !graph.has_usages(node) => Canonical::Delete,
        Operator::Invoke(CallTarget::Intrinsic(intrinsic)) => {
            let args: Option<Vec<i64>> = graph
                .node(node)
                .inputs
                .as_slice()
                .get(1..)
                .unwrap_or_default()
                .iter()
                .map(|&arg| arg.valid().and_then(|a| graph.node(a).as_int()))
                .collect();
            match args.and_then(|args| intrinsic.fold(&args)) {
                Some(value) => Canonical::Replace(graph.const_int(value)),
                None => Canonical::Unchanged,
            }
        }
        _ => Canonical::Unchanged,
    }
}

fn canonical_arith(graph: &mut Graph, node: NodeId, op: ArithOp) -> Canonical {
    let n = graph.node(node);
    let Some(x) = n.input(0) else {
        return Canonical::Unchanged;
    };
    if op.is_unary() {
        if let Some(c) = graph.node(x).as_int() {
            return Canonical::Replace(graph.const_int(op.fold(c, 0)));
        }
        if graph.op(x) == &Operator::IntOp(ArithOp::Neg) {
            if let Some(inner) = graph.node(x).input(0) {
                return Canonical::Replace(inner);
            }
        }
        return Canonical::Unchanged;
    }
    let Some(y) = n.input(1) else {
        return Canonical::Unchanged;
    };
    if let (Some(a), Some(b)) = (int_value(graph, Some(x)), int_value(graph, Some(y))) {
        return Canonical::Replace(graph.const_int(op.fold(a, b)));
    }
    let (x, y) = if op.is_commutative() && graph.node(x).is_constant() {
        (y, x)
    } else {
        (x, y)
    };
    if let Some(c) = graph.node(y).as_int() {
        match op {
            ArithOp::Add | ArithOp::Sub if c == 0 => return Canonical::Replace(x),
            ArithOp::Mul if c == 1 => return Canonical::Replace(x),
            ArithOp::Mul if c == 0 => return Canonical::Replace(y),
            ArithOp::Mul if c > 1 && c.count_ones() == 1 => {
                let amount = graph.const_int(i64::from(c.trailing_zeros()));
                let shift = graph.add_unique(Operator::Bitwise(BitwiseOp::Shl), &[x, amount]);
                return Canonical::Replace(shift);
            }
            _ => {}
        }
        // (a op c1) op c2 => a op (c1 op c2)
        if op.is_associative() && graph.op(x) == &Operator::IntOp(op) {
            let inner = graph.node(x);
            if let (Some(a), Some(c1)) = (inner.input(0), int_value(graph, inner.input(1))) {
                let folded = graph.const_int(op.fold(c1, c));
                return Canonical::Replace(graph.add_unique(Operator::IntOp(op), &[a, folded]));
            }
        }
    }
    if op == ArithOp::Sub && x == y {
        return Canonical::Replace(graph.const_int(0));
    }
    Canonical::Unchanged
}

fn canonical_bitwise(graph: &mut Graph, node: NodeId, op: BitwiseOp) -> Canonical {
    let n = graph.node(node);
    let Some(x) = n.input(0) else {
        return Canonical::Unchanged;
    };
    if op.is_unary() {
        if let Some(c) = graph.node(x).as_int() {
            return Canonical::Replace(graph.const_int(op.fold(c, 0)));
        }
        if graph.op(x) == &Operator::Bitwise(BitwiseOp::Not) {
            if let Some(inner) = graph.node(x).input(0) {
                return Canonical::Replace(inner);
            }
        }
        return Canonical::Unchanged;
    }
    let Some(y) = n.input(1) else {
        return Canonical::Unchanged;
    };
    if let (Some(a), Some(b)) = (int_value(graph, Some(x)), int_value(graph, Some(y))) {
        return Canonical::Replace(graph.const_int(op.fold(a, b)));
    }
    let (x, y) = if op.is_commutative() && graph.node(x).is_constant() {
        (y, x)
    } else {
        (x, y)
    };
    if let Some(c) = graph.node(y).as_int() {
        match (op, c) {
            (BitwiseOp::And, 0) | (BitwiseOp::Or, -1) => return Canonical::Replace(y),
            (BitwiseOp::And, -1)
            | (BitwiseOp::Or, 0)
            | (BitwiseOp::Xor, 0)
            | (BitwiseOp::Shl, 0) => return Canonical::Replace(x),
            _ => {}
        }
    }
    if x == y {
        match op {
            BitwiseOp::And | BitwiseOp::Or => return Canonical::Replace(x),
            BitwiseOp::Xor => return Canonical::Replace(graph.const_int(0)),
            _ => {}
        }
    }
    Canonical::Unchanged
}

fn canonical_compare(graph: &mut Graph, node: NodeId, cmp: CmpOp) -> Canonical {
    let n = graph.node(node);
    let (Some(x), Some(y)) = (n.input(0), n.input(1)) else {
        return Canonical::Unchanged;
    };
    if let (Some(a), Some(b)) = (int_value(graph, Some(x)), int_value(graph, Some(y))) {
        return Canonical::Replace(graph.const_logic(cmp.fold(a, b)));
    }
    if x == y {
        return Canonical::Replace(graph.const_logic(cmp == CmpOp::Equals));
    }
    Canonical::Unchanged
}

fn canonical_negation(graph: &mut Graph, node: NodeId) -> Canonical {
    let Some(inner) = graph.node(node).input(0) else {
        return Canonical::Unchanged;
    };
    if let Some(value) = graph.node(inner).as_logic() {
        return Canonical::Replace(graph.const_logic(!value));
    }
    if graph.op(inner) == &Operator::LogicNegation {
        if let Some(original) = graph.node(inner).input(0) {
            return Canonical::Replace(original);
        }
    }
    Canonical::Unchanged
}

/// A phi whose values are all one node (ignoring itself) is that node.
fn canonical_phi(graph: &Graph, node: NodeId) -> Canonical {
    if !phi_is_complete(graph, node) {
        return Canonical::Unchanged;
    }
    let mut unique = None;
    for value in graph.node(node).inputs.as_slice()[1..].iter().copied() {
        if value == node {
            continue;
        }
        match unique {
            None => unique = Some(value),
            Some(u) if u == value => {}
            Some(_) => return Canonical::Unchanged,
        }
    }
    match unique {
        Some(value) if value.is_valid() => Canonical::Replace(value),
        _ => Canonical::Unchanged,
    }
}

/// The phi has a live merge and one value per merge input.
fn phi_is_complete(graph: &Graph, phi: NodeId) -> bool {
    let n = graph.node(phi);
    match n.input(0) {
        Some(merge) => {
            graph.is_alive(merge) && graph.node(merge).inputs.len() + 1 == n.inputs.len()
        }
        None => false,
    }
}

/// `(c, negation)` if the condition input of `node` is `LogicNegation(c)`.
fn negated_condition(graph: &Graph, node: NodeId) -> Option<(NodeId, NodeId)> {
    let condition = graph.node(node).input(0)?;
    if graph.op(condition) != &Operator::LogicNegation {
        return None;
    }
    Some((graph.node(condition).input(0)?, condition))
}

fn canonical_guard(graph: &mut Graph, node: NodeId, info: GuardInfo) -> Canonical {
    let Some((inner, _)) = negated_condition(graph, node) else {
        return Canonical::Unchanged;
    };
    let anchor = graph
        .node(node)
        .inputs
        .as_slice()
        .get(1)
        .copied()
        .unwrap_or(NodeId::INVALID);
    Canonical::Replace(graph.add_unique(Operator::Guard(info.negated()), &[inner, anchor]))
}

// =============================================================================
// Stamp Inference
// =============================================================================

/// Stamp of `node` computed from its current input stamps.
pub fn infer_stamp(graph: &Graph, node: NodeId) -> Option<Stamp> {
    let n = graph.node(node);
    let input = |i: usize| n.input(i).map(|id| graph.stamp(id));
    let int_input = |i: usize| input(i).and_then(|s| s.as_integer().copied());

    match &n.op {
        Operator::IntOp(op) => {
            let x = int_input(0)?;
            let stamp = match op {
                ArithOp::Neg => x.neg(),
                ArithOp::Add => x.add(&int_input(1)?),
                ArithOp::Sub => x.sub(&int_input(1)?),
                ArithOp::Mul => x.mul(&int_input(1)?),
            };
            Some(Stamp::Integer(stamp))
        }
        Operator::Bitwise(op) => {
            let x = int_input(0)?;
            let stamp = match op {
                BitwiseOp::Not => x.not(),
                BitwiseOp::And => x.and(&int_input(1)?),
                BitwiseOp::Or => x.or(&int_input(1)?),
                BitwiseOp::Xor => x.xor(&int_input(1)?),
                BitwiseOp::Shl => x.shl(&int_input(1)?),
            };
            Some(Stamp::Integer(stamp))
        }
        Operator::IntCmp(_) => {
            let folded = n.op.try_fold_binary(&input(0)?, &input(1)?);
            Some(Stamp::Logic(LogicStamp::from_tri_state(folded)))
        }
        Operator::IsNull => {
            let folded = n.op.try_fold_unary(&input(0)?);
            Some(Stamp::Logic(LogicStamp::from_tri_state(folded)))
        }
        Operator::LogicNegation => match input(0)? {
            Stamp::Logic(s) => Some(Stamp::Logic(LogicStamp::from_tri_state(
                s.to_tri_state().negate(),
            ))),
            _ => None,
        },
        Operator::Phi => {
            if !phi_is_complete(graph, node) {
                return None;
            }
            n.inputs.as_slice()[1..]
                .iter()
                .copied()
                .filter(|&v| v != node && v.is_valid())
                .map(|v| graph.stamp(v))
                .reduce(|acc, s| acc.meet(&s))
        }
        Operator::Pi(stamp) => Some(input(0)?.join(stamp)),
        _ => None,
    }
}

// =============================================================================
// Control-Flow Simplification
// =============================================================================

/// Restructure control flow around `node`; returns whether anything changed.
pub fn simplify(graph: &mut Graph, tool: &mut SimplifierTool, node: NodeId) -> OptResult<bool> {
    let op = graph.op(node).clone();
    match op {
        Operator::If(probability) => {
            let Some(condition) = graph.node(node).input(0) else {
                return Ok(false);
            };
            if let Some(value) = graph.node(condition).as_logic() {
                let index = if value { 0 } else { 1 };
                return remove_dead_successors(graph, tool, node, index);
            }
            if let Some((inner, _)) = negated_condition(graph, node) {
                graph.set_input(node, 0, inner);
                graph.swap_successors(node, 0, 1);
                graph.set_op(node, Operator::If(probability.negate()));
                return Ok(true);
            }
            Ok(false)
        }
        Operator::IntegerSwitch(keys) => {
            let Some(value) = int_value(graph, graph.node(node).input(0)) else {
                return Ok(false);
            };
            let index = keys.iter().position(|&k| k == value).unwrap_or(keys.len());
            remove_dead_successors(graph, tool, node, index)
        }
        Operator::Control(ControlOp::Merge) if graph.node(node).inputs.len() == 1 => {
            if let Some(next) = graph.node(node).next() {
                tool.add_to_worklist(next);
            }
            reduce_trivial_merge(graph, node)?;
            Ok(true)
        }
        Operator::Control(ControlOp::LoopBegin) if graph.node(node).inputs.len() == 1 => {
            for usage in graph.distinct_usages(node) {
                tool.add_to_worklist(usage);
            }
            reduce_degenerate_loop(graph, node)?;
            Ok(true)
        }
        Operator::Control(ControlOp::Begin) => simplify_begin(graph, node),
        Operator::FixedGuard(info) => {
            let Some(value) = guard_condition_value(graph, node) else {
                return Ok(false);
            };
            if value != info.negated {
                let Some(anchor) = prev_begin(graph, node) else {
                    return Ok(false);
                };
                graph.replace_at_usages(node, anchor);
                remove_fixed_with_unused_inputs(graph, node)?;
            } else {
                let deopt = graph.add(Operator::Deoptimize(info.deopt_info()), &[NodeId::INVALID]);
                perform_replacement(graph, node, Some(deopt))?;
            }
            Ok(true)
        }
        Operator::Guard(info) => {
            let (Some(value), Some(anchor)) =
                (guard_condition_value(graph, node), graph.node(node).input(1))
            else {
                return Ok(false);
            };
            if value != info.negated {
                graph.replace_at_usages(node, anchor);
            } else {
                let never = graph.const_logic(false);
                let failing = GuardInfo {
                    negated: false,
                    ..info
                };
                let fixed = graph.add(Operator::FixedGuard(failing), &[never]);
                add_after_fixed(graph, anchor, fixed);
                graph.replace_at_usages(node, fixed);
                tool.add_to_worklist(fixed);
            }
            kill_with_unused_floating_inputs(graph, node)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn guard_condition_value(graph: &Graph, guard: NodeId) -> Option<bool> {
    graph.node(graph.node(guard).input(0)?).as_logic()
}

fn remove_dead_successors(
    graph: &mut Graph,
    tool: &mut SimplifierTool,
    split: NodeId,
    index: usize,
) -> OptResult<bool> {
    let Some(survivor) = graph.node(split).successors.get(index).copied() else {
        return Ok(false);
    };
    for dead in remove_split(graph, split, survivor)? {
        tool.delete_branch(dead);
    }
    tool.add_to_worklist(survivor);
    Ok(true)
}

/// A `Begin` that does not follow a split carries no information.
fn simplify_begin(graph: &mut Graph, begin: NodeId) -> OptResult<bool> {
    let Some(pred) = graph.node(begin).predecessor() else {
        return Ok(false);
    };
    if graph.op(pred).shape() != ControlShape::WithNext {
        return Ok(false);
    }
    let Some(anchor) = prev_begin(graph, pred) else {
        return Ok(false);
    };
    graph.replace_at_usages(begin, anchor);
    unlink_fixed_node(graph, begin)?;
    graph.safe_delete(begin)?;
    Ok(true)
}
