//! Canonicalization and floating global value numbering.
//!
//! The canonicalizer drives every node it is given to a local fixed point:
//!
//! 1. Dead floating nodes are deleted together with inputs that become unused
//! 2. The operator's `canonicalize` rule proposes a replacement
//! 3. Commutative operands are put in canonical order
//! 4. The stamp is re-inferred from the inputs; a constant stamp folds the node
//! 5. Control flow around the node is simplified
//! 6. Floating value-numberable nodes are merged with a value-equal twin
//!
//! The worklist is fed by the graph's own mutation events, so every rewrite
//! cascades to the nodes it touched. Once the worklist drains, a sweep removes
//! loop-phi cycles that only keep themselves alive.
//!
//! # Example
//!
//! ```text
//! c1 = const(2); c2 = const(3); a = add(c1, c2)
//! // after:  usages of `a` read const(5); c1, c2 and a are deleted
//! ```

pub mod dead_phi;
pub mod replace;
pub mod rules;
pub mod worklist;

pub use dead_phi::{remove_dead_phi_cycles, DeadPhiSweep};
pub use replace::perform_replacement;
pub use rules::{Canonical, SimplifierTool};
pub use worklist::Worklist;

use crate::error::{OptError, OptResult};
use crate::ir::graph::{Graph, GraphEvent, GraphState};
use crate::ir::graph_util::{is_dead_floating, kill_cfg, kill_with_unused_floating_inputs};
use crate::ir::node::NodeId;
use crate::ir::opt_log::RewriteKind;
use crate::ir::stamp::ConstantValue;
use crate::opt::OptimizationPass;

const PASS_NAME: &str = "canonicalizer";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the canonicalizer.
#[derive(Debug, Clone)]
pub struct CanonicalizerConfig {
    /// Rule applications per visit before the node is left as is.
    pub max_retries_per_node: u32,
    /// Times a node may be dequeued during one run.
    pub max_visits_per_node: u32,
    /// Usage edges a dead-phi flood may follow before giving up.
    pub dead_phi_flood_limit: usize,
    /// Run control-flow simplification.
    pub simplify: bool,
    /// Treat a rule that creates nodes without rewriting as a contract
    /// violation.
    pub check_contract: bool,
}

impl Default for CanonicalizerConfig {
    fn default() -> Self {
        Self {
            max_retries_per_node: 10,
            max_visits_per_node: 64,
            dead_phi_flood_limit: 512,
            simplify: true,
            check_contract: false,
        }
    }
}

impl CanonicalizerConfig {
    /// Pure data-flow canonicalization, control flow is left alone.
    pub fn without_simplification() -> Self {
        Self {
            simplify: false,
            ..Self::default()
        }
    }

    /// Contract-checked configuration for verification runs.
    pub fn checked() -> Self {
        Self {
            check_contract: true,
            ..Self::default()
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics from the last canonicalizer run.
#[derive(Debug, Clone, Default)]
pub struct CanonicalizerStats {
    /// Worklist entries visited.
    pub nodes_processed: usize,
    /// Nodes replaced by their canonical form.
    pub rewrites: usize,
    /// Unused nodes deleted.
    pub dead_nodes_removed: usize,
    /// Floating nodes merged with a value-equal node.
    pub value_numbered: usize,
    /// Stamps made more precise.
    pub stamps_narrowed: usize,
    /// Control-flow simplifications.
    pub cfg_simplifications: usize,
    /// Dead loop-phi cycles removed.
    pub dead_phi_cycles: usize,
    /// Dead-phi floods that hit the step bound.
    pub floods_abandoned: usize,
    /// Visits that stopped at the retry bound.
    pub retry_caps_hit: usize,
}

impl CanonicalizerStats {
    pub fn total_changes(&self) -> usize {
        self.rewrites
            + self.dead_nodes_removed
            + self.value_numbered
            + self.cfg_simplifications
            + self.dead_phi_cycles
    }
}

// =============================================================================
// Canonicalizer
// =============================================================================

/// Worklist-driven canonicalization pass.
#[derive(Debug)]
pub struct Canonicalizer {
    config: CanonicalizerConfig,
    stats: CanonicalizerStats,
}

impl Canonicalizer {
    pub fn new() -> Self {
        Self::with_config(CanonicalizerConfig::default())
    }

    pub fn with_config(config: CanonicalizerConfig) -> Self {
        Self {
            config,
            stats: CanonicalizerStats::default(),
        }
    }

    pub fn config(&self) -> &CanonicalizerConfig {
        &self.config
    }

    pub fn stats(&self) -> &CanonicalizerStats {
        &self.stats
    }

    /// Canonicalize the whole graph; returns whether anything changed.
    pub fn apply(&mut self, graph: &mut Graph) -> OptResult<bool> {
        let seeds = graph.live_ids();
        self.run_worklist(graph, seeds)
    }

    /// Canonicalize starting from `nodes` only, following the cascade of
    /// rewrites from there.
    pub fn apply_incremental(&mut self, graph: &mut Graph, nodes: &[NodeId]) -> OptResult<bool> {
        self.run_worklist(graph, nodes.to_vec())
    }

    fn run_worklist(&mut self, graph: &mut Graph, seeds: Vec<NodeId>) -> OptResult<bool> {
        self.stats = CanonicalizerStats::default();
        graph.track_events();
        let result = self.drain(graph, seeds);
        graph.stop_tracking_events();
        let changed = result?;

        log::debug!(
            "canonicalizer: {} visits, {} rewrites, {} dead, {} numbered, {} cfg, {} phi cycles",
            self.stats.nodes_processed,
            self.stats.rewrites,
            self.stats.dead_nodes_removed,
            self.stats.value_numbered,
            self.stats.cfg_simplifications,
            self.stats.dead_phi_cycles,
        );
        Ok(changed)
    }

    fn drain(&mut self, graph: &mut Graph, seeds: Vec<NodeId>) -> OptResult<bool> {
        let mut worklist = Worklist::new(self.config.max_visits_per_node);
        worklist.extend(seeds);
        let mut changed = false;

        loop {
            loop {
                enqueue_events(graph, &mut worklist);
                let Some(node) = worklist.pop() else {
                    break;
                };
                changed |= self.process(graph, &mut worklist, node)?;
            }

            let sweep = remove_dead_phi_cycles(graph, PASS_NAME, self.config.dead_phi_flood_limit)?;
            self.stats.dead_phi_cycles += sweep.cycles_removed;
            self.stats.floods_abandoned += sweep.floods_abandoned;
            if sweep.cycles_removed == 0 {
                break;
            }
            changed = true;
        }

        if worklist.saturated() > 0 {
            log::warn!(
                "canonicalizer: {} re-enqueues refused at the visit bound",
                worklist.saturated()
            );
        }
        Ok(changed)
    }

    /// Visit one node; returns whether the graph changed.
    fn process(
        &mut self,
        graph: &mut Graph,
        worklist: &mut Worklist,
        node: NodeId,
    ) -> OptResult<bool> {
        if !graph.is_alive(node) {
            return Ok(false);
        }
        self.stats.nodes_processed += 1;

        if is_dead_floating(graph, node) {
            kill_with_unused_floating_inputs(graph, node)?;
            graph.report(PASS_NAME, RewriteKind::DeadCodeElimination, node, None);
            self.stats.dead_nodes_removed += 1;
            return Ok(true);
        }

        if self.try_canonicalize(graph, worklist, node)? {
            return Ok(true);
        }
        if !graph.is_alive(node) {
            return Ok(false);
        }

        let simplifiable = graph.node(node).is_fixed() || graph.op(node).is_guard();
        if self.config.simplify && simplifiable && self.try_simplify(graph, worklist, node)? {
            return Ok(true);
        }

        if graph.node(node).is_floating() && graph.op(node).is_value_numberable() {
            if let Some(duplicate) = graph.find_duplicate(node) {
                worklist.extend(graph.distinct_usages(node));
                perform_replacement(graph, node, Some(duplicate))?;
                graph.report(PASS_NAME, RewriteKind::ValueNumbering, node, Some(duplicate));
                self.stats.value_numbered += 1;
                return Ok(true);
            }
            graph.register_leaf(node);
        }
        Ok(false)
    }

    /// Rewrite rules, operand order and stamp inference, retried until the
    /// node settles.
    fn try_canonicalize(
        &mut self,
        graph: &mut Graph,
        worklist: &mut Worklist,
        node: NodeId,
    ) -> OptResult<bool> {
        let mut changed = false;
        for _ in 0..self.config.max_retries_per_node {
            let capacity = graph.capacity();
            match rules::canonicalize(graph, node) {
                Canonical::Replace(replacement) if replacement != node => {
                    worklist.extend(graph.distinct_usages(node));
                    worklist.push(replacement);
                    perform_replacement(graph, node, Some(replacement))?;
                    graph.report(PASS_NAME, RewriteKind::Canonicalization, node, Some(replacement));
                    self.stats.rewrites += 1;
                    return Ok(true);
                }
                Canonical::Delete => {
                    perform_replacement(graph, node, None)?;
                    graph.report(PASS_NAME, RewriteKind::DeadCodeElimination, node, None);
                    self.stats.dead_nodes_removed += 1;
                    return Ok(true);
                }
                _ => {
                    if self.config.check_contract && graph.capacity() != capacity {
                        return Err(OptError::contract(
                            node,
                            "canonicalization created nodes without rewriting",
                        ));
                    }
                }
            }

            if reorder_commutative(graph, node) {
                changed = true;
                continue;
            }

            let Some(inferred) = rules::infer_stamp(graph, node) else {
                return self.fold_constant_stamp(graph, worklist, node, changed);
            };
            match graph.stamp(node).try_improve_with(&inferred) {
                Some(improved) => {
                    graph.set_stamp(node, improved);
                    self.stats.stamps_narrowed += 1;
                    log::trace!("stamp of {:?} narrowed to {:?}", node, improved);
                    worklist.extend(graph.distinct_usages(node));
                    changed = true;
                }
                None => return self.fold_constant_stamp(graph, worklist, node, changed),
            }
        }
        self.stats.retry_caps_hit += 1;
        log::debug!("canonicalizer: retry bound reached at {:?}", node);
        Ok(changed)
    }

    /// A floating node whose stamp allows a single value becomes that value.
    fn fold_constant_stamp(
        &mut self,
        graph: &mut Graph,
        worklist: &mut Worklist,
        node: NodeId,
        changed: bool,
    ) -> OptResult<bool> {
        let n = graph.node(node);
        if !n.is_floating() || n.is_constant() || n.op.is_guard() {
            return Ok(changed);
        }
        let Some(value) = n.stamp.as_constant() else {
            return Ok(changed);
        };
        let constant = match value {
            ConstantValue::Int(v) => graph.const_int(v),
            ConstantValue::Null => graph.null_constant(),
            ConstantValue::Logic(b) => graph.const_logic(b),
        };
        worklist.extend(graph.distinct_usages(node));
        perform_replacement(graph, node, Some(constant))?;
        graph.report(PASS_NAME, RewriteKind::StampFolding, node, Some(constant));
        self.stats.rewrites += 1;
        Ok(true)
    }

    fn try_simplify(
        &mut self,
        graph: &mut Graph,
        worklist: &mut Worklist,
        node: NodeId,
    ) -> OptResult<bool> {
        let mut tool = SimplifierTool::new();
        if !rules::simplify(graph, &mut tool, node)? {
            return Ok(false);
        }
        graph.report(PASS_NAME, RewriteKind::ControlFlowSimplification, node, None);
        self.stats.cfg_simplifications += 1;
        if graph.is_alive(node) {
            worklist.push(node);
        }
        worklist.extend(tool.revisit);
        for dead in tool.dead_branches {
            kill_cfg(graph, dead)?;
        }
        Ok(true)
    }
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizationPass for Canonicalizer {
    fn name(&self) -> &'static str {
        PASS_NAME
    }

    fn run(&mut self, graph: &mut Graph) -> OptResult<bool> {
        self.apply(graph)
    }

    fn established_state(&self) -> GraphState {
        GraphState::CANONICAL
    }

    fn invalidated_state(&self) -> GraphState {
        GraphState::empty()
    }
}

fn enqueue_events(graph: &mut Graph, worklist: &mut Worklist) {
    for event in graph.take_events() {
        let node = match event {
            GraphEvent::NodeAdded(n) | GraphEvent::InputChanged(n) | GraphEvent::ZeroUsages(n) => n,
        };
        if graph.is_alive(node) {
            worklist.push(node);
        }
    }
}

/// Constants go right; otherwise the lower node id goes left.
fn reorder_commutative(graph: &mut Graph, node: NodeId) -> bool {
    if !graph.op(node).is_commutative() {
        return false;
    }
    let n = graph.node(node);
    let (Some(x), Some(y)) = (n.input(0), n.input(1)) else {
        return false;
    };
    let key = |id: NodeId| (graph.node(id).is_constant(), id.index());
    if key(x) > key(y) {
        graph.swap_inputs(node, 0, 1);
        true
    } else {
        false
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::GraphBuilder;
    use crate::ir::operators::{
        DeoptAction, DeoptReason, GuardInfo, LocationIdentity, Operator, Probability,
    };
    use crate::ir::stamp::Stamp;

    #[test]
    fn test_constant_chain_folds() {
        let mut b = GraphBuilder::new();
        let two = b.const_int(2);
        let three = b.const_int(3);
        let sum = b.add(two, three);
        let four = b.const_int(4);
        let product = b.mul(sum, four);
        let ret = b.return_value(Some(product));
        let mut graph = b.finish();

        let mut canon = Canonicalizer::new();
        assert!(canon.apply(&mut graph).unwrap());
        let result = graph.node(ret).input(0).unwrap();
        assert_eq!(graph.node(result).as_int(), Some(20));
        assert!(!graph.is_alive(sum));
        assert!(!graph.is_alive(product));
        graph.verify().unwrap();
    }

    #[test]
    fn test_commutative_operands_reordered() {
        let mut b = GraphBuilder::new();
        let p = b.parameter(0, Stamp::int_unrestricted());
        let q = b.parameter(1, Stamp::int_unrestricted());
        let five = b.const_int(5);
        let x = b.add(five, p);
        let y = b.mul(q, p);
        let diff = b.sub(x, y);
        b.return_value(Some(diff));
        let mut graph = b.finish();

        Canonicalizer::new().apply(&mut graph).unwrap();
        assert_eq!(graph.node(x).inputs.as_slice(), &[p, five]);
        assert_eq!(graph.node(y).inputs.as_slice(), &[p, q]);
    }

    #[test]
    fn test_floating_gvn_merges_twins() {
        let mut b = GraphBuilder::new();
        let p = b.parameter(0, Stamp::int_unrestricted());
        let q = b.parameter(1, Stamp::int_unrestricted());
        let first = b.add(p, q);
        let second = b.add(q, p);
        let total = b.mul(first, second);
        let ret = b.return_value(Some(total));
        let mut graph = b.finish();

        let mut canon = Canonicalizer::new();
        canon.apply(&mut graph).unwrap();
        let total = graph.node(ret).input(0).unwrap();
        let inputs = graph.node(total).inputs.to_vec();
        assert_eq!(inputs[0], inputs[1]);
        assert_eq!(canon.stats().value_numbered, 1);
        assert_eq!(graph.log().count(RewriteKind::ValueNumbering), 1);
        graph.verify().unwrap();
    }

    #[test]
    fn test_stamp_folds_comparison() {
        let mut b = GraphBuilder::new();
        let p = b.parameter(0, Stamp::int_range(0, 10));
        let zero = b.const_int(0);
        let cond = b.int_lt(p, zero);
        let (t, f) = b.if_then_else(cond, Probability::EVEN);
        b.switch_to(t);
        let r1 = b.return_value(Some(zero));
        b.switch_to(f);
        let r2 = b.return_value(Some(p));
        let mut graph = b.finish();

        let mut canon = Canonicalizer::new();
        assert!(canon.apply(&mut graph).unwrap());
        assert!(!graph.is_alive(cond));
        assert!(!graph.is_alive(r1));
        assert!(graph.is_alive(r2));
        assert_eq!(graph.node(graph.start()).next(), Some(r2));
        assert!(graph.log().count(RewriteKind::StampFolding) >= 1);
        graph.verify().unwrap();
    }

    #[test]
    fn test_passing_fixed_guard_removed() {
        let mut b = GraphBuilder::new();
        let obj = b.parameter(0, Stamp::object_non_null());
        let is_null = b.is_null(obj);
        let info = GuardInfo::new(DeoptReason::NullCheck, DeoptAction::InvalidateReprofile);
        let guard = b.fixed_guard(is_null, info.negated());
        let load = b.load(obj, LocationIdentity::Field(1));
        let ret = b.return_value(Some(load));
        let mut graph = b.finish();

        Canonicalizer::new().apply(&mut graph).unwrap();
        assert!(!graph.is_alive(guard));
        assert_eq!(graph.node(graph.start()).next(), Some(load));
        assert_eq!(graph.node(load).next(), Some(ret));
        graph.verify().unwrap();
    }

    #[test]
    fn test_second_run_is_idle() {
        let mut b = GraphBuilder::new();
        let p = b.parameter(0, Stamp::int_unrestricted());
        let zero = b.const_int(0);
        let one = b.const_int(1);
        let cond = b.int_lt(p, zero);
        let (t, f) = b.if_then_else(cond, Probability::EVEN);
        b.switch_to(t);
        let a = b.add(p, one);
        let te = b.end();
        b.switch_to(f);
        let c = b.sub(p, zero);
        let fe = b.end();
        let merge = b.merge(&[te, fe]);
        let phi = b.phi(merge, &[a, c]);
        let doubled = b.add(phi, phi);
        b.return_value(Some(doubled));
        let mut graph = b.finish();

        let mut canon = Canonicalizer::new();
        assert!(canon.apply(&mut graph).unwrap());
        let log_len = graph.log().len();
        assert!(!canon.apply(&mut graph).unwrap());
        assert_eq!(graph.log().len(), log_len);
        assert_eq!(canon.stats().total_changes(), 0);
    }

    #[test]
    fn test_incremental_run_follows_cascade() {
        let mut b = GraphBuilder::new();
        let p = b.parameter(0, Stamp::int_unrestricted());
        let zero = b.const_int(0);
        let add = b.add(p, zero);
        let neg = b.neg(add);
        let ret = b.return_value(Some(neg));
        let mut graph = b.finish();

        let mut canon = Canonicalizer::new();
        assert!(canon.apply_incremental(&mut graph, &[add]).unwrap());
        assert_eq!(graph.node(neg).input(0), Some(p));
        assert_eq!(graph.node(ret).input(0), Some(neg));
    }

    #[test]
    fn test_checked_mode_accepts_rewrites() {
        let mut b = GraphBuilder::new();
        let p = b.parameter(0, Stamp::int_unrestricted());
        let eight = b.const_int(8);
        let mul = b.mul(p, eight);
        let ret = b.return_value(Some(mul));
        let mut graph = b.finish();

        let mut canon = Canonicalizer::with_config(CanonicalizerConfig::checked());
        canon.apply(&mut graph).unwrap();
        let shift = graph.node(ret).input(0).unwrap();
        assert!(matches!(graph.op(shift), Operator::Bitwise(_)));
    }
}
