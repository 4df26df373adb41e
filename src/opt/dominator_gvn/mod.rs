//! Memory- and loop-aware value numbering of fixed reads.
//!
//! A dominator-tree walk carries a `ValueMap` per path: reads seen so far
//! that no later node on the path could have invalidated. Per block:
//!
//! - A loop header first kills everything its loop may kill in any
//!   iteration (see `loop_kills`), since back edges make the order of kills
//!   inside the body irrelevant
//! - A merge kills what the blocks between its dominator and itself kill
//! - A node killing a location drops overlapping reads from the map
//! - A read that runs on every iteration of a loop that never kills its
//!   location, with invariant inputs, is hoisted in front of the loop
//! - A read with a dominating value-equal read is replaced by it, unless
//!   that read lives in a loop not enclosing this one
//!
//! Hoisting runs first so the hoisted read can absorb later duplicates.

pub mod loop_kills;
pub mod value_map;

pub use loop_kills::{is_loop_invariant, KillSet, LoopKillSummary};
pub use value_map::ValueMap;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::OptResult;
use crate::ir::cfg::{BlockId, ControlFlowView};
use crate::ir::graph::{Graph, GraphState};
use crate::ir::graph_util::{add_before_fixed, remove_fixed_with_unused_inputs, unlink_fixed_node};
use crate::ir::node::{NodeFlags, NodeId};
use crate::ir::operators::LocationIdentity;
use crate::ir::opt_log::RewriteKind;
use crate::opt::OptimizationPass;

const PASS_NAME: &str = "dominator_gvn";

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct DominatorGvnConfig {
    /// Hoist invariant reads out of loops.
    pub enable_licm: bool,
    /// Floating-input levels inspected when proving a read loop-invariant.
    pub max_invariance_depth: u32,
}

impl Default for DominatorGvnConfig {
    fn default() -> Self {
        Self {
            enable_licm: true,
            max_invariance_depth: 8,
        }
    }
}

impl DominatorGvnConfig {
    pub fn without_licm() -> Self {
        Self {
            enable_licm: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DominatorGvnStats {
    pub blocks_visited: usize,
    pub reads_seen: usize,
    pub kills_seen: usize,
    pub reads_replaced: usize,
    pub reads_hoisted: usize,
}

// =============================================================================
// Pass
// =============================================================================

#[derive(Debug)]
pub struct DominatorGvn {
    config: DominatorGvnConfig,
    stats: DominatorGvnStats,
}

impl DominatorGvn {
    pub fn new() -> Self {
        Self::with_config(DominatorGvnConfig::default())
    }

    pub fn with_config(config: DominatorGvnConfig) -> Self {
        Self {
            config,
            stats: DominatorGvnStats::default(),
        }
    }

    pub fn stats(&self) -> &DominatorGvnStats {
        &self.stats
    }

    pub fn apply(&mut self, graph: &mut Graph) -> OptResult<bool> {
        let view = ControlFlowView::compute(graph);
        self.run_with_view(graph, &view)
    }

    pub fn run_with_view(&mut self, graph: &mut Graph, view: &ControlFlowView) -> OptResult<bool> {
        view.cfg.check_fresh(graph)?;
        let kills = LoopKillSummary::compute(graph, view);
        let mut walker = GvnWalker {
            graph,
            view,
            config: &self.config,
            kills: &kills,
            stats: DominatorGvnStats::default(),
            moved: FxHashMap::default(),
        };
        walker.walk()?;
        self.stats = walker.stats;

        log::debug!(
            "dominator gvn: {} blocks, {} reads, {} replaced, {} hoisted",
            self.stats.blocks_visited,
            self.stats.reads_seen,
            self.stats.reads_replaced,
            self.stats.reads_hoisted,
        );
        Ok(self.stats.reads_replaced + self.stats.reads_hoisted > 0)
    }
}

impl Default for DominatorGvn {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizationPass for DominatorGvn {
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
        GraphState::MEMORY_VALUE_NUMBERED
    }
}

// =============================================================================
// Dominator Walk
// =============================================================================

struct GvnWalker<'a> {
    graph: &'a mut Graph,
    view: &'a ControlFlowView,
    config: &'a DominatorGvnConfig,
    kills: &'a LoopKillSummary,
    stats: DominatorGvnStats,
    /// Innermost loop of every read hoisted during this walk.
    moved: FxHashMap<NodeId, Option<usize>>,
}

impl<'a> GvnWalker<'a> {
    fn walk(&mut self) -> OptResult<()> {
        let mut stack = vec![(self.view.cfg.entry, ValueMap::new())];
        while let Some((block, mut map)) = stack.pop() {
            self.process_block(block, &mut map)?;
            let children = self.view.dom.children(block);
            for (i, &child) in children.iter().enumerate().rev() {
                if i == 0 {
                    stack.push((child, std::mem::take(&mut map)));
                } else {
                    stack.push((child, map.clone()));
                }
            }
        }
        Ok(())
    }

    fn process_block(&mut self, block: BlockId, map: &mut ValueMap) -> OptResult<()> {
        self.stats.blocks_visited += 1;
        let nodes = self.view.cfg.block(block).nodes.clone();
        let Some(&begin) = nodes.first() else {
            return Ok(());
        };

        if let Some(index) = self.view.loops.loop_of_header(block) {
            match self.kills.for_loop(index) {
                Some(kills) if kills.kills_any() => map.kill_all(self.graph),
                Some(kills) => {
                    for location in kills.locations() {
                        map.kill(self.graph, location);
                    }
                }
                None => {}
            }
        } else if self.graph.op(begin).is_merge() {
            for location in self.kills_into_merge(block) {
                map.kill(self.graph, location);
            }
        }

        for node in nodes {
            if !self.graph.is_alive(node) {
                continue;
            }
            let (read, killed) = {
                let op = self.graph.op(node);
                (op.location_read(), op.location_killed())
            };
            if let Some(location) = killed {
                self.stats.kills_seen += 1;
                map.kill(self.graph, location);
            }
            if let Some(location) = read {
                self.stats.reads_seen += 1;
                self.process_read(node, location, block, map)?;
            }
        }
        Ok(())
    }

    /// Locations killed on some path from the merge's dominator to it.
    fn kills_into_merge(&self, merge: BlockId) -> Vec<LocationIdentity> {
        let idom = self.view.dom.idom(merge);
        let mut seen = FxHashSet::default();
        let mut worklist: Vec<BlockId> = self.view.cfg.block(merge).predecessors.clone();
        let mut killed = Vec::new();
        while let Some(block) = worklist.pop() {
            if Some(block) == idom || block == merge || !seen.insert(block) {
                continue;
            }
            for &node in &self.view.cfg.block(block).nodes {
                if !self.graph.is_alive(node) {
                    continue;
                }
                if let Some(location) = self.graph.op(node).location_killed() {
                    if !killed.contains(&location) {
                        killed.push(location);
                    }
                }
            }
            worklist.extend(self.view.cfg.block(block).predecessors.iter().copied());
        }
        killed
    }

    fn process_read(
        &mut self,
        node: NodeId,
        location: LocationIdentity,
        block: BlockId,
        map: &mut ValueMap,
    ) -> OptResult<()> {
        let mut current_loop = self.view.loops.innermost(block);

        if self.config.enable_licm {
            if let Some(index) = current_loop {
                if self.try_hoist(node, location, index, block)? {
                    current_loop = self.moved.get(&node).copied().flatten();
                }
            }
        }

        let killed_in_loop = current_loop
            .and_then(|index| self.kills.for_loop(index))
            .is_some_and(|kills| kills.kills(location));
        if !killed_in_loop {
            if let Some(dup) = map.lookup(self.graph, node) {
                if self.may_substitute(dup, current_loop) {
                    self.graph.replace_at_usages(node, dup);
                    remove_fixed_with_unused_inputs(self.graph, node)?;
                    self.graph
                        .report(PASS_NAME, RewriteKind::MemoryValueNumbering, node, Some(dup));
                    self.stats.reads_replaced += 1;
                    log::trace!("read {:?} replaced by {:?}", node, dup);
                    return Ok(());
                }
            }
        }
        map.remember(node);
        Ok(())
    }

    /// The dominating read must not come from a loop this one is not part of.
    fn may_substitute(&self, dup: NodeId, current_loop: Option<usize>) -> bool {
        let dup_loop = match self.moved.get(&dup) {
            Some(&moved) => moved,
            None => self
                .view
                .cfg
                .block_of(dup)
                .and_then(|b| self.view.loops.innermost(b)),
        };
        match (dup_loop, current_loop) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(outer), Some(inner)) => self.view.loops.encloses(outer, inner),
        }
    }

    fn try_hoist(
        &mut self,
        node: NodeId,
        location: LocationIdentity,
        index: usize,
        block: BlockId,
    ) -> OptResult<bool> {
        let lp = &self.view.loops.loops[index];
        if self.kills.for_loop(index).map_or(true, |k| k.kills(location)) {
            return Ok(false);
        }
        if !loop_kills::executes_every_iteration(self.view, lp, block) {
            return Ok(false);
        }
        let depth = self.config.max_invariance_depth;
        let inputs_invariant = self
            .graph
            .node(node)
            .inputs
            .iter()
            .all(|input| is_loop_invariant(self.graph, self.view, index, input, depth));
        if !inputs_invariant {
            return Ok(false);
        }
        let header = self.view.cfg.block(lp.header).begin();
        let Some(entry) = self.graph.node(header).input(0) else {
            return Ok(false);
        };

        unlink_fixed_node(self.graph, node)?;
        add_before_fixed(self.graph, entry, node);
        self.graph.add_flags(node, NodeFlags::HOISTED);
        let outer = self
            .view
            .cfg
            .block_of(entry)
            .and_then(|b| self.view.loops.innermost(b));
        self.moved.insert(node, outer);
        self.graph
            .report(PASS_NAME, RewriteKind::LoopInvariantMotion, node, None);
        self.stats.reads_hoisted += 1;
        log::trace!("read {:?} hoisted out of loop {}", node, index);
        Ok(true)
    }
}

// =============================================================================
// Tests
// =============================================================================
