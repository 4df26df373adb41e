//! Dominator-based conditional elimination.
//!
//! Walks the dominator tree in pre-order, collecting what every dominating
//! branch and guard proves about values (scoped info elements, see `info`).
//! With that knowledge it:
//!
//! - Proves `If` conditions and replaces them by constants
//! - Removes guards whose condition is already known to pass, and turns
//!   guards known to fail into unconditional failing guards
//! - Folds a guard into an earlier pending guard in the same block when the
//!   later condition implies the earlier one (see `fold`)
//! - Narrows phi stamps at merges from the stamps known on each incoming edge
//!   (see `merge`)
//! - Replaces a switch value by the constant a dominating test proved
//!
//! Dead branches are not removed here; the condition becomes a constant and
//! the canonicalizer deletes the branch afterwards, so the walk never
//! invalidates blocks it has not visited yet.
//!
//! # Example
//!
//! ```text
//! if (x < 0) deopt;          // else-branch registers x >= 0
//! guard(!(x < 0))            // proven: removed, usages use the else-begin
//! ```

mod fold;
pub mod info;
mod merge;

pub use info::{ConditionFact, InfoElement, InfoStack, Mark};

use rustc_hash::FxHashMap;

use crate::error::OptResult;
use crate::ir::cfg::{BlockId, ControlFlowView};
use crate::ir::graph::{Graph, GraphState};
use crate::ir::graph_util::{
    add_after_fixed, kill_with_unused_floating_inputs, prev_begin, remove_fixed_with_unused_inputs,
};
use crate::ir::node::NodeId;
use crate::ir::operators::{ControlOp, GuardInfo, InputType, Operator};
use crate::ir::opt_log::RewriteKind;
use crate::ir::stamp::Stamp;
use crate::opt::OptimizationPass;

use merge::EdgeStamp;

const PASS_NAME: &str = "conditional_elimination";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for conditional elimination.
#[derive(Debug, Clone)]
pub struct ConditionalEliminationConfig {
    /// Fold later guards into earlier pending guards.
    pub fold_guards: bool,
    /// Narrow phi stamps at merges.
    pub improve_phis: bool,
    /// Info elements and conditions inspected per proof attempt.
    pub max_chain_walk: usize,
    /// Recursion bound when checking that a condition can move up.
    pub max_schedule_depth: u32,
}

impl Default for ConditionalEliminationConfig {
    fn default() -> Self {
        Self {
            fold_guards: true,
            improve_phis: true,
            max_chain_walk: 32,
            max_schedule_depth: 8,
        }
    }
}

impl ConditionalEliminationConfig {
    /// Only prove branches and guards; no folding or phi rewriting.
    pub fn conservative() -> Self {
        Self {
            fold_guards: false,
            improve_phis: false,
            ..Self::default()
        }
    }
}

/// Statistics from the last run.
#[derive(Debug, Clone, Default)]
pub struct ConditionalEliminationStats {
    pub blocks_visited: usize,
    pub conditions_registered: usize,
    pub stamps_registered: usize,
    pub ifs_eliminated: usize,
    pub guards_eliminated: usize,
    pub fixed_guards_eliminated: usize,
    pub guards_failing: usize,
    pub guards_folded: usize,
    pub phis_improved: usize,
    pub switches_proven: usize,
}

impl ConditionalEliminationStats {
    pub fn total_rewrites(&self) -> usize {
        self.ifs_eliminated
            + self.guards_eliminated
            + self.fixed_guards_eliminated
            + self.guards_failing
            + self.guards_folded
            + self.phis_improved
            + self.switches_proven
    }
}

// =============================================================================
// Pass
// =============================================================================

#[derive(Debug)]
pub struct ConditionalElimination {
    config: ConditionalEliminationConfig,
    stats: ConditionalEliminationStats,
}

impl ConditionalElimination {
    pub fn new() -> Self {
        Self::with_config(ConditionalEliminationConfig::default())
    }

    pub fn with_config(config: ConditionalEliminationConfig) -> Self {
        Self {
            config,
            stats: ConditionalEliminationStats::default(),
        }
    }

    pub fn stats(&self) -> &ConditionalEliminationStats {
        &self.stats
    }

    /// Run on a freshly computed control-flow view.
    pub fn apply(&mut self, graph: &mut Graph) -> OptResult<bool> {
        let view = ControlFlowView::compute(graph);
        self.run_with_view(graph, &view)
    }

    /// Run with a view supplied by the caller; it must match the graph.
    pub fn run_with_view(&mut self, graph: &mut Graph, view: &ControlFlowView) -> OptResult<bool> {
        view.cfg.check_fresh(graph)?;
        let mut walker = Walker {
            graph,
            view,
            config: &self.config,
            stats: ConditionalEliminationStats::default(),
            infos: InfoStack::new(),
            pending: Vec::new(),
            end_stamps: FxHashMap::default(),
            switch_stamps: FxHashMap::default(),
        };
        walker.walk()?;
        self.stats = walker.stats;

        log::debug!(
            "conditional elimination: {} blocks, {} ifs, {} guards, {} fixed guards, {} folded, {} phis",
            self.stats.blocks_visited,
            self.stats.ifs_eliminated,
            self.stats.guards_eliminated,
            self.stats.fixed_guards_eliminated,
            self.stats.guards_folded,
            self.stats.phis_improved,
        );
        Ok(self.stats.total_rewrites() > 0)
    }
}

impl Default for ConditionalElimination {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizationPass for ConditionalElimination {
    fn name(&self) -> &'static str {
        PASS_NAME
    }

    fn run(&mut self, graph: &mut Graph) -> OptResult<bool> {
        self.apply(graph)
    }

    fn required_state(&self) -> GraphState {
        GraphState::CANONICAL
    }

    fn established_state(&self) -> GraphState {
        GraphState::CONDITIONS_ELIMINATED
    }
}

// =============================================================================
// Dominator Walk
// =============================================================================

enum StackEntry {
    Visit(BlockId),
    Leave(Mark),
}

/// State of one dominator-tree walk.
struct Walker<'a> {
    graph: &'a mut Graph,
    view: &'a ControlFlowView,
    config: &'a ConditionalEliminationConfig,
    stats: ConditionalEliminationStats,
    infos: InfoStack,
    /// Unproven guards of the current block, in order.
    pending: Vec<NodeId>,
    /// Per phi, the best stamp seen on each incoming edge.
    end_stamps: FxHashMap<NodeId, Vec<Option<EdgeStamp>>>,
    /// Per switch, the stamp of the value on each successor.
    switch_stamps: FxHashMap<NodeId, Vec<Option<Stamp>>>,
}

impl<'a> Walker<'a> {
    fn walk(&mut self) -> OptResult<()> {
        let mut stack = vec![StackEntry::Visit(self.view.cfg.entry)];
        while let Some(entry) = stack.pop() {
            match entry {
                StackEntry::Visit(block) => {
                    let mark = self.infos.mark();
                    self.process_block(block)?;
                    stack.push(StackEntry::Leave(mark));
                    for &child in self.view.dom.children(block).iter().rev() {
                        stack.push(StackEntry::Visit(child));
                    }
                }
                StackEntry::Leave(mark) => self.infos.rewind(mark),
            }
        }
        Ok(())
    }

    fn process_block(&mut self, block: BlockId) -> OptResult<()> {
        self.stats.blocks_visited += 1;
        self.pending.clear();
        let nodes = self.view.cfg.block(block).nodes.clone();
        let Some(&begin) = nodes.first() else {
            return Ok(());
        };

        self.register_block_entry(begin);
        if matches!(self.graph.op(begin), Operator::Control(ControlOp::Merge)) {
            self.improve_phis(begin)?;
        }

        let anchored: Vec<NodeId> = self
            .graph
            .distinct_usages(begin)
            .into_iter()
            .filter(|&u| {
                matches!(self.graph.op(u), Operator::Guard(_))
                    && self.graph.node(u).input(1) == Some(begin)
            })
            .collect();
        for guard in anchored {
            if self.graph.is_alive(guard) {
                self.process_guard(guard)?;
            }
        }

        for node in nodes {
            if !self.graph.is_alive(node) {
                continue;
            }
            let op = self.graph.op(node).clone();
            match op {
                Operator::If(_) => self.process_if(node),
                Operator::IntegerSwitch(_) => self.process_switch(node),
                Operator::FixedGuard(_) => self.process_guard(node)?,
                Operator::Control(ControlOp::End) => self.record_end(node),
                _ if op.is_state_split() => self.pending.clear(),
                _ => {}
            }
        }
        Ok(())
    }

    /// Register what the branch leading into `begin` proves.
    fn register_block_entry(&mut self, begin: NodeId) {
        let Some(pred) = self.graph.node(begin).predecessor() else {
            return;
        };
        let successors = self.graph.node(pred).successors.clone();
        let Some(index) = successors.iter().position(|&s| s == begin) else {
            return;
        };
        let pred_op = self.graph.op(pred).clone();
        match pred_op {
            Operator::If(_) => {
                if let Some(condition) = self.graph.node(pred).input(0) {
                    self.register_condition(condition, index == 1, begin);
                }
            }
            Operator::IntegerSwitch(_) => {
                let Some(value) = self.graph.node(pred).input(0) else {
                    return;
                };
                if !self.switch_stamps.contains_key(&pred) {
                    let current = self.infos.best_stamp(self.graph, value);
                    let stamps = (0..successors.len())
                        .map(|i| pred_op.switch_successor_stamp(i, &current))
                        .collect();
                    self.switch_stamps.insert(pred, stamps);
                }
                let stamp = self
                    .switch_stamps
                    .get(&pred)
                    .and_then(|stamps| stamps.get(index).copied().flatten());
                if let Some(stamp) = stamp {
                    self.register_new_stamp(value, stamp, begin);
                }
            }
            _ => {}
        }
    }

    /// Record that `condition` evaluates to `!negated` below `guard`.
    fn register_condition(&mut self, condition: NodeId, negated: bool, guard: NodeId) {
        if self.graph.node(condition).is_constant() {
            return;
        }
        self.stats.conditions_registered += 1;
        if self.graph.usage_count(condition) > 1 {
            let stamp = if negated {
                Stamp::contradiction()
            } else {
                Stamp::tautology()
            };
            self.register_new_stamp(condition, stamp, guard);
        }
        self.infos.push_condition(condition, negated, guard);

        let op = self.graph.op(condition).clone();
        let node = self.graph.node(condition);
        match op {
            Operator::LogicNegation => {
                if let Some(inner) = node.input(0) {
                    self.register_condition(inner, !negated, guard);
                }
            }
            Operator::IntCmp(_) => {
                let (Some(x), Some(y)) = (node.input(0), node.input(1)) else {
                    return;
                };
                let xs = self.infos.best_stamp(self.graph, x);
                let ys = self.infos.best_stamp(self.graph, y);
                if self.worth_registering(x) {
                    if let Some(stamp) = op.succeeding_stamp_for_x(negated, &xs, &ys) {
                        self.register_new_stamp(x, stamp, guard);
                    }
                }
                if self.worth_registering(y) {
                    if let Some(stamp) = op.succeeding_stamp_for_y(negated, &xs, &ys) {
                        self.register_new_stamp(y, stamp, guard);
                    }
                }
            }
            Operator::IsNull => {
                let Some(x) = node.input(0) else {
                    return;
                };
                if self.worth_registering(x) {
                    let xs = self.infos.best_stamp(self.graph, x);
                    if let Some(stamp) = op.succeeding_stamp(negated, &xs) {
                        self.register_new_stamp(x, stamp, guard);
                    }
                }
            }
            _ => {}
        }
    }

    /// Operands only read by the condition gain nothing from a stamp.
    fn worth_registering(&self, value: NodeId) -> bool {
        !self.graph.node(value).is_constant()
            && (self.graph.usage_count(value) > 1
                || matches!(self.graph.op(value), Operator::Pi(_)))
    }

    fn register_new_stamp(&mut self, value: NodeId, stamp: Stamp, guard: NodeId) {
        if self.graph.node(value).is_constant() {
            return;
        }
        let best = self.infos.best_stamp(self.graph, value);
        let joined = best.join(&stamp);
        if joined.is_empty() || joined == best {
            return;
        }
        log::trace!("{:?} : {:?} under {:?}", value, joined, guard);
        self.stats.stamps_registered += 1;
        self.infos.push_info(value, joined, guard);
    }

    // -------------------------------------------------------------------------
    // Branches and switches
    // -------------------------------------------------------------------------

    fn process_if(&mut self, node: NodeId) {
        let Some(condition) = self.graph.node(node).input(0) else {
            return;
        };
        if self.graph.node(condition).is_constant() {
            return;
        }
        let Some((value, proof)) = self.try_prove(condition) else {
            return;
        };
        let survivor = self
            .graph
            .node(node)
            .successors
            .get(if value { 0 } else { 1 })
            .copied()
            .unwrap_or(NodeId::INVALID);
        let constant = self.graph.const_logic(value);
        self.graph.set_input(node, 0, constant);
        if survivor.is_valid() {
            self.graph
                .replace_at_usages_of_type(survivor, proof, InputType::Guard);
        }
        self.graph
            .report(PASS_NAME, RewriteKind::IfElimination, node, Some(constant));
        self.stats.ifs_eliminated += 1;
    }

    fn process_switch(&mut self, node: NodeId) {
        let Some(value) = self.graph.node(node).input(0) else {
            return;
        };
        if self.graph.node(value).is_constant() {
            return;
        }
        let best = self.infos.best_stamp(self.graph, value);
        let Some(constant) = best.as_integer().and_then(|s| s.as_constant()) else {
            return;
        };
        let constant = self.graph.const_int(constant);
        self.graph.set_input(node, 0, constant);
        self.graph
            .report(PASS_NAME, RewriteKind::SwitchValueProven, node, Some(constant));
        self.stats.switches_proven += 1;
    }

    // -------------------------------------------------------------------------
    // Guards
    // -------------------------------------------------------------------------

    fn process_guard(&mut self, guard: NodeId) -> OptResult<()> {
        let Some(info) = guard_info(self.graph.op(guard)) else {
            return Ok(());
        };
        let Some(condition) = self.graph.node(guard).input(0) else {
            return Ok(());
        };
        if self.graph.node(condition).is_constant() {
            return Ok(());
        }

        if let Some((value, proof)) = self.try_prove(condition) {
            if value != info.negated {
                self.eliminate_guard(guard, proof)?;
            } else {
                self.fail_guard(guard, info)?;
            }
            return Ok(());
        }

        if self.config.fold_guards && self.try_fold_pending(guard, condition, info)? {
            return Ok(());
        }

        self.register_condition(condition, info.negated, guard);
        self.pending.push(guard);
        Ok(())
    }

    /// The guard always passes: its usages move to `proof`.
    fn eliminate_guard(&mut self, guard: NodeId, proof: NodeId) -> OptResult<()> {
        self.graph.replace_at_usages(guard, proof);
        if self.graph.node(guard).is_fixed() {
            remove_fixed_with_unused_inputs(self.graph, guard)?;
            self.graph
                .report(PASS_NAME, RewriteKind::FixedGuardElimination, guard, Some(proof));
            self.stats.fixed_guards_eliminated += 1;
        } else {
            kill_with_unused_floating_inputs(self.graph, guard)?;
            self.graph
                .report(PASS_NAME, RewriteKind::GuardElimination, guard, Some(proof));
            self.stats.guards_eliminated += 1;
        }
        Ok(())
    }

    /// The guard always fails. A fixed guard gets a constant condition; a
    /// floating one is replaced by a failing fixed guard after its anchor.
    fn fail_guard(&mut self, guard: NodeId, info: GuardInfo) -> OptResult<()> {
        if self.graph.node(guard).is_fixed() {
            let constant = self.graph.const_logic(info.negated);
            self.graph.set_input(guard, 0, constant);
            self.graph
                .report(PASS_NAME, RewriteKind::FixedGuardElimination, guard, None);
        } else {
            let anchor = match self.graph.node(guard).input(1) {
                Some(anchor) => Some(anchor),
                None => prev_begin(self.graph, guard),
            };
            let Some(anchor) = anchor else {
                return Ok(());
            };
            let never = self.graph.const_logic(false);
            let failing = GuardInfo {
                negated: false,
                ..info
            };
            let fixed = self.graph.add(Operator::FixedGuard(failing), &[never]);
            add_after_fixed(self.graph, anchor, fixed);
            self.graph.replace_at_usages(guard, fixed);
            kill_with_unused_floating_inputs(self.graph, guard)?;
            self.graph
                .report(PASS_NAME, RewriteKind::GuardElimination, guard, Some(fixed));
        }
        self.stats.guards_failing += 1;
        Ok(())
    }
}

fn guard_info(op: &Operator) -> Option<GuardInfo> {
    match op {
        Operator::Guard(info) | Operator::FixedGuard(info) => Some(*info),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::GraphBuilder;
    use crate::ir::operators::{DeoptAction, DeoptReason, Probability};

    fn range_check() -> GuardInfo {
        GuardInfo::new(DeoptReason::RangeCheck, DeoptAction::InvalidateRecompile)
    }

    /// `if (x < 0) deopt; guard(!(x < 0))` with the guard's own comparison.
    fn branch_then_guard() -> (Graph, NodeId, NodeId) {
        let mut b = GraphBuilder::new();
        let x = b.parameter(0, Stamp::int_unrestricted());
        let zero = b.const_int(0);
        let c1 = b.int_lt(x, zero);
        let (t, f) = b.if_then_else(c1, Probability::UNLIKELY);
        b.switch_to(t);
        b.deoptimize(range_check().deopt_info());
        b.switch_to(f);
        let c2 = b.int_lt(x, zero);
        let guard = b.fixed_guard(c2, range_check().negated());
        let ret = b.return_value(Some(x));
        (b.finish(), guard, ret)
    }

    #[test]
    fn test_dominating_branch_eliminates_guard() {
        let (mut graph, guard, ret) = branch_then_guard();
        let mut ce = ConditionalElimination::new();
        assert!(ce.apply(&mut graph).unwrap());
        assert!(!graph.is_alive(guard));
        assert_eq!(ce.stats().fixed_guards_eliminated, 1);
        assert_eq!(graph.log().count(RewriteKind::FixedGuardElimination), 1);
        assert!(graph.node(ret).predecessor().is_some());
        graph.verify().unwrap();
    }

    #[test]
    fn test_guard_failing_under_branch_gets_constant_condition() {
        let mut b = GraphBuilder::new();
        let x = b.parameter(0, Stamp::int_unrestricted());
        let zero = b.const_int(0);
        let c1 = b.int_lt(x, zero);
        let (t, f) = b.if_then_else(c1, Probability::EVEN);
        b.switch_to(f);
        b.return_value(None);
        b.switch_to(t);
        // In the true branch x < 0 holds, so a guard requiring !(x < 0) fails.
        let guard = b.fixed_guard(c1, range_check().negated());
        b.return_value(None);
        let mut graph = b.finish();

        let mut ce = ConditionalElimination::new();
        assert!(ce.apply(&mut graph).unwrap());
        assert!(graph.is_alive(guard));
        let condition = graph.node(guard).input(0).unwrap();
        assert_eq!(graph.node(condition).as_logic(), Some(true));
        assert_eq!(ce.stats().guards_failing, 1);
    }

    #[test]
    fn test_nested_if_is_proven() {
        let mut b = GraphBuilder::new();
        let x = b.parameter(0, Stamp::int_unrestricted());
        let ten = b.const_int(10);
        let c = b.int_lt(x, ten);
        let (t, f) = b.if_then_else(c, Probability::EVEN);
        b.switch_to(f);
        b.return_value(None);
        b.switch_to(t);
        let inner = b.int_lt(x, ten);
        let (it, ie) = b.if_then_else(inner, Probability::EVEN);
        b.switch_to(it);
        b.return_value(Some(x));
        b.switch_to(ie);
        b.return_value(None);
        let mut graph = b.finish();
        let inner_if = graph.node(it).predecessor().unwrap();

        let mut ce = ConditionalElimination::new();
        assert!(ce.apply(&mut graph).unwrap());
        let condition = graph.node(inner_if).input(0).unwrap();
        assert_eq!(graph.node(condition).as_logic(), Some(true));
        assert_eq!(ce.stats().ifs_eliminated, 1);
    }

    #[test]
    fn test_unsigned_compare_leaves_sign_of_larger_side_open() {
        // if (x <u y) { if (y < 0) return y; } with x in [0, 10]: y == -1
        // takes both branches, since -1 is the largest unsigned value.
        let mut b = GraphBuilder::new();
        let x = b.parameter(0, Stamp::int_range(0, 10));
        let y = b.parameter(1, Stamp::int_unrestricted());
        let zero = b.const_int(0);
        let below = b.int_below(x, y);
        let (t, f) = b.if_then_else(below, Probability::EVEN);
        b.switch_to(f);
        b.return_value(None);
        b.switch_to(t);
        let negative = b.int_lt(y, zero);
        let (it, ie) = b.if_then_else(negative, Probability::EVEN);
        b.switch_to(it);
        b.return_value(Some(y));
        b.switch_to(ie);
        b.return_value(None);
        let mut graph = b.finish();
        let inner_if = graph.node(it).predecessor().unwrap();

        let mut ce = ConditionalElimination::new();
        ce.apply(&mut graph).unwrap();
        assert_eq!(graph.node(inner_if).input(0), Some(negative));
        assert_eq!(graph.node(negative).as_logic(), None);
        assert_eq!(ce.stats().ifs_eliminated, 0);
        graph.verify().unwrap();
    }

    #[test]
    fn test_guard_fact_does_not_leak_into_sibling_branch() {
        // if (p < 0) { guard(!(x < 0)); guard(!(x < 0)); } else { guard(!(x < 0)); }
        let mut b = GraphBuilder::new();
        let x = b.parameter(0, Stamp::int_unrestricted());
        let p = b.parameter(1, Stamp::int_unrestricted());
        let zero = b.const_int(0);
        let split = b.int_lt(p, zero);
        let (t, f) = b.if_then_else(split, Probability::EVEN);
        b.switch_to(t);
        let x_negative = b.int_lt(x, zero);
        let first = b.fixed_guard(x_negative, range_check().negated());
        let repeated = b.fixed_guard(x_negative, range_check().negated());
        b.return_value(None);
        b.switch_to(f);
        let sibling = b.fixed_guard(x_negative, range_check().negated());
        b.return_value(None);
        let mut graph = b.finish();

        let mut ce = ConditionalElimination::new();
        assert!(ce.apply(&mut graph).unwrap());
        assert!(graph.is_alive(first));
        assert!(!graph.is_alive(repeated));
        assert!(graph.is_alive(sibling));
        assert_eq!(graph.node(sibling).input(0), Some(x_negative));
        assert_eq!(ce.stats().fixed_guards_eliminated, 1);
        graph.verify().unwrap();
    }

    #[test]
    fn test_switch_value_proven_by_dominating_equality() {
        let mut b = GraphBuilder::new();
        let x = b.parameter(0, Stamp::int_unrestricted());
        let three = b.const_int(3);
        let c = b.int_eq(x, three);
        let (t, f) = b.if_then_else(c, Probability::EVEN);
        b.switch_to(f);
        b.return_value(None);
        b.switch_to(t);
        let arms = b.switch(x, &[1, 3]);
        for arm in arms {
            b.switch_to(arm);
            b.return_value(None);
        }
        let mut graph = b.finish();

        let mut ce = ConditionalElimination::new();
        assert!(ce.apply(&mut graph).unwrap());
        assert_eq!(ce.stats().switches_proven, 1);
        assert_eq!(graph.log().count(RewriteKind::SwitchValueProven), 1);
    }

    #[test]
    fn test_stale_view_rejected() {
        let (mut graph, guard, _) = branch_then_guard();
        let view = ControlFlowView::compute(&graph);
        remove_fixed_with_unused_inputs(&mut graph, guard).unwrap();
        let err = ConditionalElimination::new()
            .run_with_view(&mut graph, &view)
            .unwrap_err();
        assert!(matches!(err, crate::error::OptError::StaleControlFlow { .. }));
    }
}
