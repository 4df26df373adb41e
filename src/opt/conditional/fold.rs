//! Proving conditions and folding guards into earlier pending guards.

use super::{Walker, PASS_NAME};
use crate::error::OptResult;
use crate::ir::graph::Graph;
use crate::ir::graph_util::{kill_with_unused_floating_inputs, remove_fixed_with_unused_inputs};
use crate::ir::node::NodeId;
use crate::ir::operators::{CmpOp, GuardInfo, Operator};
use crate::ir::opt_log::RewriteKind;
use crate::ir::stamp::{Stamp, TriState};

impl<'a> Walker<'a> {
    /// The outcome of `condition` at the current position and the node that
    /// justifies it.
    pub(super) fn try_prove(&self, condition: NodeId) -> Option<(bool, NodeId)> {
        let limit = self.config.max_chain_walk;

        if let Some(info) = self.infos.top(condition) {
            if let Some(value) = logic_value(&info.stamp) {
                return Some((value, info.guard));
            }
        }

        for fact in self.infos.conditions().iter().rev().take(limit) {
            if let Some(value) = implies(self.graph, fact.condition, !fact.negated, condition) {
                return Some((value, fact.guard));
            }
        }

        let node = self.graph.node(condition);
        match &node.op {
            Operator::LogicNegation => {
                let (value, guard) = self.try_prove(node.input(0)?)?;
                Some((!value, guard))
            }
            op @ Operator::IntCmp(_) => {
                let (x, y) = (node.input(0)?, node.input(1)?);
                let (xs, ys) = (self.graph.stamp(x), self.graph.stamp(y));
                for info in self.infos.chain(x).take(limit) {
                    if let Some(value) = op.try_fold_binary(&info.stamp, &ys).to_bool() {
                        return Some((value, info.guard));
                    }
                }
                for info in self.infos.chain(y).take(limit) {
                    if let Some(value) = op.try_fold_binary(&xs, &info.stamp).to_bool() {
                        return Some((value, info.guard));
                    }
                }
                None
            }
            op @ Operator::IsNull => {
                let x = node.input(0)?;
                self.infos
                    .chain(x)
                    .take(limit)
                    .find_map(|info| op.try_fold_unary(&info.stamp).to_bool().map(|v| (v, info.guard)))
            }
            _ => None,
        }
    }

    /// Try to fold `guard` into a pending guard of this block.
    ///
    /// If `guard` passing implies that a pending guard passes, the pending
    /// guard takes over the stronger condition and `guard` is removed.
    pub(super) fn try_fold_pending(
        &mut self,
        guard: NodeId,
        condition: NodeId,
        info: GuardInfo,
    ) -> OptResult<bool> {
        for (original, new_stamp) in self.succeeding_stamps(condition, info.negated) {
            for index in 0..self.pending.len() {
                let pending = self.pending[index];
                if !self.graph.is_alive(pending) {
                    continue;
                }
                let Some(pending_info) = super::guard_info(self.graph.op(pending)) else {
                    continue;
                };
                let Some(pending_condition) = self.graph.node(pending).input(0) else {
                    continue;
                };
                let outcome = fold_with_stamp(self.graph, pending_condition, original, &new_stamp);
                if outcome.to_bool() != Some(!pending_info.negated) {
                    continue;
                }
                let Some(action) = pending_info.action.merge(info.action) else {
                    continue;
                };
                if pending_info.speculation != info.speculation {
                    continue;
                }
                let target = if self.graph.node(pending).is_fixed() {
                    Some(pending)
                } else {
                    self.graph.node(pending).input(1)
                };
                let Some(target) = target else {
                    continue;
                };
                if !self.can_schedule_above(condition, target, 0) {
                    continue;
                }

                let merged = GuardInfo {
                    reason: info.reason,
                    action,
                    speculation: info.speculation,
                    negated: info.negated,
                };
                let op = match self.graph.op(pending) {
                    Operator::FixedGuard(_) => Operator::FixedGuard(merged),
                    _ => Operator::Guard(merged),
                };
                self.graph.set_input(pending, 0, condition);
                self.graph.set_op(pending, op);
                if !self.graph.has_usages(pending_condition) {
                    kill_with_unused_floating_inputs(self.graph, pending_condition)?;
                }
                self.graph
                    .report(PASS_NAME, RewriteKind::GuardFolding, guard, Some(pending));
                self.stats.guards_folded += 1;
                log::trace!("guard {:?} folded into {:?}", guard, pending);

                self.register_condition(condition, info.negated, pending);
                self.eliminate_folded(guard, pending)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn eliminate_folded(&mut self, guard: NodeId, into: NodeId) -> OptResult<()> {
        self.graph.replace_at_usages(guard, into);
        if self.graph.node(guard).is_fixed() {
            remove_fixed_with_unused_inputs(self.graph, guard)
        } else {
            kill_with_unused_floating_inputs(self.graph, guard)
        }
    }

    /// For each operand of `condition`, the stamp it has when the condition
    /// evaluates to `!negated`.
    fn succeeding_stamps(&self, condition: NodeId, negated: bool) -> Vec<(NodeId, Stamp)> {
        let node = self.graph.node(condition);
        let mut result = Vec::new();
        match &node.op {
            op @ Operator::IntCmp(_) => {
                let (Some(x), Some(y)) = (node.input(0), node.input(1)) else {
                    return result;
                };
                let (xs, ys) = (self.graph.stamp(x), self.graph.stamp(y));
                if let Some(stamp) = op.succeeding_stamp_for_x(negated, &xs, &ys) {
                    result.push((x, stamp));
                }
                if let Some(stamp) = op.succeeding_stamp_for_y(negated, &xs, &ys) {
                    result.push((y, stamp));
                }
            }
            op @ Operator::IsNull => {
                if let Some(x) = node.input(0) {
                    if let Some(stamp) = op.succeeding_stamp(negated, &self.graph.stamp(x)) {
                        result.push((x, stamp));
                    }
                }
            }
            _ => {}
        }
        result
    }

    /// Whether `node` and its floating inputs are available above the fixed
    /// node `target`.
    fn can_schedule_above(&self, node: NodeId, target: NodeId, depth: u32) -> bool {
        if depth > self.config.max_schedule_depth {
            return false;
        }
        let n = self.graph.node(node);
        if n.is_fixed() {
            return node != target && self.view.dominates(node, target);
        }
        n.inputs
            .iter()
            .all(|input| self.can_schedule_above(input, target, depth + 1))
    }
}

fn logic_value(stamp: &Stamp) -> Option<bool> {
    match stamp {
        Stamp::Logic(s) => s.to_tri_state().to_bool(),
        _ => None,
    }
}

/// Evaluate `condition` assuming `value` has `stamp`.
fn fold_with_stamp(graph: &Graph, condition: NodeId, value: NodeId, stamp: &Stamp) -> TriState {
    let node = graph.node(condition);
    match &node.op {
        op @ Operator::IsNull if node.input(0) == Some(value) => op.try_fold_unary(stamp),
        op @ Operator::IntCmp(_) => {
            let (Some(x), Some(y)) = (node.input(0), node.input(1)) else {
                return TriState::Unknown;
            };
            if x == value {
                op.try_fold_binary(stamp, &graph.stamp(y))
            } else if y == value {
                op.try_fold_binary(&graph.stamp(x), stamp)
            } else {
                TriState::Unknown
            }
        }
        _ => TriState::Unknown,
    }
}

/// What knowing that `fact` evaluates to `value` says about `condition`.
pub(super) fn implies(graph: &Graph, fact: NodeId, value: bool, condition: NodeId) -> Option<bool> {
    if fact == condition || graph.value_equals(fact, condition) {
        return Some(value);
    }
    let cond = graph.node(condition);
    if cond.op == Operator::LogicNegation {
        if let Some(inner) = cond.input(0) {
            if inner == fact || graph.value_equals(inner, fact) {
                return Some(!value);
            }
        }
    }

    let fact_node = graph.node(fact);
    let (Operator::IntCmp(a), Operator::IntCmp(b)) = (&fact_node.op, &cond.op) else {
        return None;
    };
    let (Some(x1), Some(y1), Some(x2), Some(y2)) = (
        fact_node.input(0),
        fact_node.input(1),
        cond.input(0),
        cond.input(1),
    ) else {
        return None;
    };
    if !value {
        return None;
    }
    let same = x1 == x2 && y1 == y2;
    let swapped = x1 == y2 && y1 == x2;
    match (a, b) {
        // x == y excludes x < y, y < x and the unsigned forms.
        (CmpOp::Equals, CmpOp::LessThan | CmpOp::Below) if same || swapped => Some(false),
        (CmpOp::Equals, CmpOp::Equals) if swapped => Some(true),
        // x < y excludes x == y and y < x.
        (CmpOp::LessThan, CmpOp::Equals) if same || swapped => Some(false),
        (CmpOp::LessThan, CmpOp::LessThan) if swapped => Some(false),
        (CmpOp::Below, CmpOp::Equals) if same || swapped => Some(false),
        (CmpOp::Below, CmpOp::Below) if swapped => Some(false),
        _ => None,
    }
}
