//! Control-flow view of the Sea-of-Nodes IR.
//!
//! While Sea-of-Nodes unifies data and control flow, flow-sensitive passes
//! need explicit block structure:
//! - **Basic blocks**: maximal runs of fixed nodes from a begin node along
//!   `next` links to a block end (split, end, control sink, invoke)
//! - **Dominator tree**: Cooper, Harvey & Kennedy over reverse postorder,
//!   children ordered by reverse postorder
//! - **Loop analysis**: natural loops, nesting, back-edge and exit blocks
//! - **Frequencies**: relative block execution estimates
//!
//! The view is a snapshot. It records the graph's topology version and must
//! be rebuilt once fixed-node topology changes.

use rustc_hash::FxHashMap;

use super::arena::{BitSet, Id, SecondaryMap};
use super::graph::Graph;
use super::node::NodeId;
use super::operators::{ControlShape, Operator};
use crate::error::{OptError, OptResult};

/// Assumed iteration count of a loop, for frequency estimates.
const LOOP_FREQUENCY: f64 = 10.0;

// =============================================================================
// Basic Block
// =============================================================================

/// A basic block in the CFG.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Fixed nodes in control order; `nodes[0]` is the begin node.
    pub nodes: Vec<NodeId>,

    /// Predecessor blocks; for merges, in merge-input order.
    pub predecessors: Vec<BlockId>,

    /// Successor blocks, in successor order of the block end.
    pub successors: Vec<BlockId>,

    /// Loop depth (0 = not in loop).
    pub loop_depth: u32,

    /// Estimated executions per method invocation.
    pub frequency: f64,
}

impl BasicBlock {
    fn new() -> Self {
        BasicBlock {
            nodes: Vec::new(),
            predecessors: Vec::new(),
            successors: Vec::new(),
            loop_depth: 0,
            frequency: 0.0,
        }
    }

    /// The begin node.
    #[inline]
    pub fn begin(&self) -> NodeId {
        self.nodes[0]
    }

    /// The last fixed node.
    #[inline]
    pub fn end(&self) -> NodeId {
        self.nodes[self.nodes.len() - 1]
    }
}

/// Block identifier.
pub type BlockId = Id<BasicBlock>;

// =============================================================================
// CFG
// =============================================================================

/// Basic-block view of a graph's fixed nodes.
#[derive(Debug, Clone)]
pub struct Cfg {
    blocks: Vec<BasicBlock>,

    /// Block of every reachable fixed node.
    node_to_block: FxHashMap<NodeId, BlockId>,

    /// Entry block (begins with Start).
    pub entry: BlockId,

    /// Reverse postorder.
    pub rpo: Vec<BlockId>,

    /// Position of each block in `rpo`.
    rpo_index: SecondaryMap<BasicBlock, u32>,

    /// Topology version of the graph this view was built from.
    version: u64,
}

impl Cfg {
    /// Build the block view of everything reachable from `Start`.
    pub fn build(graph: &Graph) -> Self {
        let mut cfg = Cfg {
            blocks: Vec::new(),
            node_to_block: FxHashMap::default(),
            entry: BlockId::INVALID,
            rpo: Vec::new(),
            rpo_index: SecondaryMap::new(),
            version: graph.topology_version(),
        };

        let mut worklist = vec![graph.start()];
        while let Some(begin) = worklist.pop() {
            if cfg.node_to_block.contains_key(&begin) {
                continue;
            }
            let block = cfg.add_block();
            let mut current = begin;
            loop {
                cfg.blocks[block.as_usize()].nodes.push(current);
                cfg.node_to_block.insert(current, block);
                let next = Self::chain_next(graph, current);
                match next {
                    Some(next) => current = next,
                    None => {
                        worklist.extend(Self::block_successors(graph, current));
                        break;
                    }
                }
            }
        }
        cfg.entry = cfg.node_to_block[&graph.start()];

        cfg.connect(graph);
        cfg.compute_rpo();
        cfg.compute_frequencies(graph);
        cfg
    }

    /// The next node in the same block, if the block continues.
    fn chain_next(graph: &Graph, node: NodeId) -> Option<NodeId> {
        let n = graph.node(node);
        if n.op.shape() != ControlShape::WithNext {
            return None;
        }
        n.next().filter(|&next| !graph.op(next).is_begin())
    }

    /// Begin nodes following a block end.
    fn block_successors(graph: &Graph, end: NodeId) -> Vec<NodeId> {
        let n = graph.node(end);
        match n.op.shape() {
            ControlShape::End => graph.merge_of_end(end).into_iter().collect(),
            _ => n.successors.iter().copied().filter(|s| s.is_valid()).collect(),
        }
    }

    fn add_block(&mut self) -> BlockId {
        let id = BlockId::new(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::new());
        id
    }

    fn connect(&mut self, graph: &Graph) {
        for index in 0..self.blocks.len() {
            let block = BlockId::new(index as u32);
            let end = self.blocks[index].end();
            for successor in Self::block_successors(graph, end) {
                let Some(&target) = self.node_to_block.get(&successor) else {
                    continue;
                };
                self.blocks[index].successors.push(target);
                if !graph.op(successor).is_merge() {
                    self.blocks[target.as_usize()].predecessors.push(block);
                }
            }
        }
        for index in 0..self.blocks.len() {
            let begin = self.blocks[index].begin();
            if graph.op(begin).is_merge() {
                let preds: Vec<BlockId> = graph
                    .node(begin)
                    .inputs
                    .iter()
                    .filter_map(|end| self.node_to_block.get(&end).copied())
                    .collect();
                self.blocks[index].predecessors = preds;
            }
        }
    }

    /// Iterative postorder DFS from the entry.
    fn compute_rpo(&mut self) {
        let mut visited = BitSet::with_capacity(self.blocks.len());
        let mut postorder = Vec::with_capacity(self.blocks.len());
        let mut stack: Vec<(BlockId, usize)> = vec![(self.entry, 0)];
        visited.insert(self.entry.as_usize());

        while let Some((block, child)) = stack.pop() {
            let successors = &self.blocks[block.as_usize()].successors;
            if child < successors.len() {
                let next = successors[child];
                stack.push((block, child + 1));
                if visited.insert(next.as_usize()) {
                    stack.push((next, 0));
                }
            } else {
                postorder.push(block);
            }
        }

        postorder.reverse();
        for (i, &block) in postorder.iter().enumerate() {
            self.rpo_index.set(block, i as u32);
        }
        self.rpo = postorder;
    }

    /// Propagate frequencies in reverse postorder.
    ///
    /// Loop headers take their entry frequency times `LOOP_FREQUENCY`; back
    /// edges are ignored.
    fn compute_frequencies(&mut self, graph: &Graph) {
        for i in 0..self.rpo.len() {
            let block = self.rpo[i];
            if block == self.entry {
                self.blocks[block.as_usize()].frequency = 1.0;
                continue;
            }
            let begin = self.blocks[block.as_usize()].begin();
            let is_loop = graph.op(begin).is_loop_begin();
            let mut frequency = 0.0;
            for &pred in &self.blocks[block.as_usize()].predecessors {
                if self.rpo_index[pred] >= self.rpo_index[block] {
                    continue;
                }
                let pred_block = &self.blocks[pred.as_usize()];
                frequency += pred_block.frequency * Self::edge_probability(graph, pred_block.end(), begin);
                if is_loop {
                    break;
                }
            }
            if is_loop {
                frequency *= LOOP_FREQUENCY;
            }
            self.blocks[block.as_usize()].frequency = frequency;
        }
    }

    fn edge_probability(graph: &Graph, end: NodeId, successor: NodeId) -> f64 {
        let node = graph.node(end);
        match &node.op {
            Operator::If(probability) => {
                if node.successors.first() == Some(&successor) {
                    probability.as_fraction()
                } else {
                    probability.negate().as_fraction()
                }
            }
            Operator::IntegerSwitch(keys) => 1.0 / (keys.len() + 1) as f64,
            Operator::Invoke(_) => {
                if node.successors.first() == Some(&successor) {
                    1.0
                } else {
                    0.0
                }
            }
            _ => 1.0,
        }
    }

    /// Get a block by ID.
    #[inline]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.as_usize()]
    }

    /// The block containing a fixed node.
    pub fn block_of(&self, node: NodeId) -> Option<BlockId> {
        self.node_to_block.get(&node).copied()
    }

    #[inline]
    pub fn rpo_index(&self, block: BlockId) -> u32 {
        self.rpo_index[block]
    }

    /// Get the number of blocks.
    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Iterate over blocks in reverse postorder.
    pub fn iter_rpo(&self) -> impl Iterator<Item = (BlockId, &BasicBlock)> {
        self.rpo
            .iter()
            .copied()
            .map(move |id| (id, &self.blocks[id.as_usize()]))
    }

    /// Iterate over all blocks.
    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &BasicBlock)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (BlockId::new(i as u32), b))
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether fixed-node topology changed since this view was built.
    pub fn is_stale(&self, graph: &Graph) -> bool {
        self.version != graph.topology_version()
    }

    pub fn check_fresh(&self, graph: &Graph) -> OptResult<()> {
        if self.is_stale(graph) {
            Err(OptError::StaleControlFlow {
                expected: self.version,
                actual: graph.topology_version(),
            })
        } else {
            Ok(())
        }
    }
}

// =============================================================================
// Dominator Tree
// =============================================================================

/// Dominator tree for the CFG.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    /// Immediate dominator for each block (the entry maps to itself).
    idom: SecondaryMap<BasicBlock, BlockId>,

    /// Dominator tree children, in reverse postorder.
    children: SecondaryMap<BasicBlock, Vec<BlockId>>,

    /// Dominator tree depth.
    depth: SecondaryMap<BasicBlock, u32>,
}

impl DominatorTree {
    /// Build the tree with the Cooper-Harvey-Kennedy iteration.
    pub fn build(cfg: &Cfg) -> Self {
        let n = cfg.len();
        let mut dom = DominatorTree {
            idom: SecondaryMap::with_capacity(n),
            children: SecondaryMap::with_capacity(n),
            depth: SecondaryMap::with_capacity(n),
        };
        if n == 0 {
            return dom;
        }

        for i in 0..n {
            dom.idom.set(BlockId::new(i as u32), BlockId::INVALID);
        }
        dom.idom.set(cfg.entry, cfg.entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &block in &cfg.rpo {
                if block == cfg.entry {
                    continue;
                }
                let mut new_idom = BlockId::INVALID;
                for &pred in &cfg.block(block).predecessors {
                    if !dom.idom[pred].is_valid() {
                        continue;
                    }
                    new_idom = if new_idom.is_valid() {
                        dom.intersect(pred, new_idom, cfg)
                    } else {
                        pred
                    };
                }
                if new_idom.is_valid() && dom.idom[block] != new_idom {
                    dom.idom.set(block, new_idom);
                    changed = true;
                }
            }
        }

        for &block in &cfg.rpo {
            if block == cfg.entry {
                continue;
            }
            let idom = dom.idom[block];
            if idom.is_valid() {
                dom.children.get_mut(idom).push(block);
            }
        }

        for &block in &cfg.rpo {
            let depth = match dom.idom(block) {
                Some(parent) => dom.depth[parent] + 1,
                None => 0,
            };
            dom.depth.set(block, depth);
        }

        dom
    }

    /// Walk both fingers up to their common dominator.
    fn intersect(&self, mut b1: BlockId, mut b2: BlockId, cfg: &Cfg) -> BlockId {
        while b1 != b2 {
            while cfg.rpo_index(b1) > cfg.rpo_index(b2) {
                b1 = self.idom[b1];
            }
            while cfg.rpo_index(b2) > cfg.rpo_index(b1) {
                b2 = self.idom[b2];
            }
        }
        b1
    }

    /// Get immediate dominator.
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        let idom = self.idom.get(block).copied().unwrap_or(BlockId::INVALID);
        if idom.is_valid() && idom != block {
            Some(idom)
        } else {
            None
        }
    }

    /// Get dominator tree children.
    pub fn children(&self, block: BlockId) -> &[BlockId] {
        self.children
            .get(block)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Get dominator depth.
    pub fn depth(&self, block: BlockId) -> u32 {
        self.depth.get(block).copied().unwrap_or(0)
    }

    /// Check if `a` dominates `b`.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let target = self.depth(a);
        let mut current = b;
        while self.depth(current) > target {
            match self.idom(current) {
                Some(idom) => current = idom,
                None => return false,
            }
        }
        current == a
    }

    /// Check if `a` strictly dominates `b`.
    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }
}

// =============================================================================
// Loop Analysis
// =============================================================================

/// A natural loop in the CFG.
#[derive(Debug, Clone)]
pub struct Loop {
    /// The loop header block.
    pub header: BlockId,

    /// Back edge sources (blocks that jump back to header).
    pub back_edges: Vec<BlockId>,

    /// All blocks in the loop body, header included.
    pub body: Vec<BlockId>,

    body_set: BitSet,

    /// Blocks outside the loop entered from inside it.
    pub exits: Vec<BlockId>,

    /// Blocks inside the loop with a successor outside it.
    pub exit_sources: Vec<BlockId>,

    /// Parent loop (if nested).
    pub parent: Option<usize>,

    /// Child loops (nested).
    pub children: Vec<usize>,

    /// Loop depth (1 = outermost).
    pub depth: u32,
}

impl Loop {
    #[inline]
    pub fn contains(&self, block: BlockId) -> bool {
        self.body_set.contains(block.as_usize())
    }
}

/// Loop analysis results.
#[derive(Debug, Clone, Default)]
pub struct LoopAnalysis {
    /// All detected loops.
    pub loops: Vec<Loop>,

    /// Map from header block to loop index.
    pub header_to_loop: FxHashMap<BlockId, usize>,

    /// Map from block to innermost containing loop.
    pub block_to_loop: FxHashMap<BlockId, usize>,
}

impl LoopAnalysis {
    /// Compute loop analysis.
    pub fn compute(cfg: &Cfg, dom: &DominatorTree) -> Self {
        let mut analysis = LoopAnalysis::default();

        // A back edge targets a block that dominates its source.
        for &block in &cfg.rpo {
            for &succ in &cfg.block(block).successors {
                if dom.dominates(succ, block) {
                    analysis.add_loop(succ, block);
                }
            }
        }
        for index in 0..analysis.loops.len() {
            analysis.fill_body(index, cfg);
        }
        analysis.compute_nesting();
        analysis
    }

    fn add_loop(&mut self, header: BlockId, back_edge: BlockId) {
        if let Some(&loop_idx) = self.header_to_loop.get(&header) {
            if !self.loops[loop_idx].back_edges.contains(&back_edge) {
                self.loops[loop_idx].back_edges.push(back_edge);
            }
            return;
        }
        self.header_to_loop.insert(header, self.loops.len());
        self.loops.push(Loop {
            header,
            back_edges: vec![back_edge],
            body: Vec::new(),
            body_set: BitSet::new(),
            exits: Vec::new(),
            exit_sources: Vec::new(),
            parent: None,
            children: Vec::new(),
            depth: 1,
        });
    }

    /// Reverse flood from the back edges up to the header.
    fn fill_body(&mut self, index: usize, cfg: &Cfg) {
        let header = self.loops[index].header;
        let mut body = BitSet::with_capacity(cfg.len());
        body.insert(header.as_usize());
        let mut worklist = self.loops[index].back_edges.clone();
        while let Some(block) = worklist.pop() {
            if body.insert(block.as_usize()) {
                worklist.extend(cfg.block(block).predecessors.iter().copied());
            }
        }

        let lp = &mut self.loops[index];
        lp.body = body.iter().map(BlockId::from_usize).collect();
        for &block in &lp.body {
            for &succ in &cfg.block(block).successors {
                if !body.contains(succ.as_usize()) {
                    if !lp.exits.contains(&succ) {
                        lp.exits.push(succ);
                    }
                    if !lp.exit_sources.contains(&block) {
                        lp.exit_sources.push(block);
                    }
                }
            }
        }
        lp.body_set = body;
    }

    /// Compute loop nesting.
    fn compute_nesting(&mut self) {
        let n = self.loops.len();

        for i in 0..n {
            let header = self.loops[i].header;
            let parent = (0..n)
                .filter(|&j| j != i && self.loops[j].contains(header))
                .min_by_key(|&j| self.loops[j].body.len());
            if let Some(parent) = parent {
                self.loops[i].parent = Some(parent);
                self.loops[parent].children.push(i);
            }
        }

        for i in 0..n {
            self.loops[i].depth = self.compute_loop_depth(i);
        }

        // Innermost loop wins.
        for i in 0..n {
            for b in 0..self.loops[i].body.len() {
                let block = self.loops[i].body[b];
                let replace = match self.block_to_loop.get(&block) {
                    Some(&current) => self.loops[current].depth < self.loops[i].depth,
                    None => true,
                };
                if replace {
                    self.block_to_loop.insert(block, i);
                }
            }
        }
    }

    /// Compute loop depth.
    fn compute_loop_depth(&self, loop_idx: usize) -> u32 {
        let mut depth = 1;
        let mut current = self.loops[loop_idx].parent;
        while let Some(parent) = current {
            depth += 1;
            current = self.loops[parent].parent;
        }
        depth
    }

    /// Index of the innermost loop containing a block.
    pub fn innermost(&self, block: BlockId) -> Option<usize> {
        self.block_to_loop.get(&block).copied()
    }

    /// Get the innermost loop containing a block.
    pub fn loop_for_block(&self, block: BlockId) -> Option<&Loop> {
        self.innermost(block).map(|idx| &self.loops[idx])
    }

    /// Loop index of a header block.
    pub fn loop_of_header(&self, block: BlockId) -> Option<usize> {
        self.header_to_loop.get(&block).copied()
    }

    /// Whether loop `outer` is `inner` or encloses it.
    pub fn encloses(&self, outer: usize, inner: usize) -> bool {
        let mut current = Some(inner);
        while let Some(idx) = current {
            if idx == outer {
                return true;
            }
            current = self.loops[idx].parent;
        }
        false
    }

    /// Check if a block is in any loop.
    pub fn is_in_loop(&self, block: BlockId) -> bool {
        self.block_to_loop.contains_key(&block)
    }

    /// Get loop depth for a block (0 if not in loop).
    pub fn loop_depth(&self, block: BlockId) -> u32 {
        self.block_to_loop
            .get(&block)
            .map(|&idx| self.loops[idx].depth)
            .unwrap_or(0)
    }
}

// =============================================================================
// Control Flow View
// =============================================================================

/// Blocks, dominators and loops computed together from one graph snapshot.
#[derive(Debug, Clone)]
pub struct ControlFlowView {
    pub cfg: Cfg,
    pub dom: DominatorTree,
    pub loops: LoopAnalysis,
}

impl ControlFlowView {
    pub fn compute(graph: &Graph) -> Self {
        let mut cfg = Cfg::build(graph);
        let dom = DominatorTree::build(&cfg);
        let loops = LoopAnalysis::compute(&cfg, &dom);
        for (block, depth) in cfg
            .iter()
            .map(|(b, _)| (b, loops.loop_depth(b)))
            .collect::<Vec<_>>()
        {
            cfg.blocks[block.as_usize()].loop_depth = depth;
        }
        ControlFlowView { cfg, dom, loops }
    }

    /// Whether fixed node `a` dominates fixed node `b`.
    pub fn dominates(&self, a: NodeId, b: NodeId) -> bool {
        let (Some(ba), Some(bb)) = (self.cfg.block_of(a), self.cfg.block_of(b)) else {
            return false;
        };
        if ba == bb {
            let nodes = &self.cfg.block(ba).nodes;
            let pa = nodes.iter().position(|&n| n == a);
            let pb = nodes.iter().position(|&n| n == b);
            return pa <= pb;
        }
        self.dom.dominates(ba, bb)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::GraphBuilder;
    use crate::ir::operators::{LocationIdentity, Probability};
    use crate::ir::stamp::Stamp;

    fn diamond() -> (Graph, NodeId, NodeId, NodeId) {
        let mut b = GraphBuilder::new();
        let p = b.parameter(0, Stamp::int_unrestricted());
        let zero = b.const_int(0);
        let cond = b.int_lt(p, zero);
        let (t, f) = b.if_then_else(cond, Probability::from_basis_points(2_000));
        b.switch_to(t);
        let t_end = b.end();
        b.switch_to(f);
        let f_end = b.end();
        let merge = b.merge(&[t_end, f_end]);
        b.return_value(None);
        (b.finish(), t, f, merge)
    }

    #[test]
    fn test_cfg_diamond_blocks() {
        let (graph, t, f, merge) = diamond();
        let cfg = Cfg::build(&graph);

        assert_eq!(cfg.len(), 4);
        let entry = cfg.entry;
        let bt = cfg.block_of(t).unwrap();
        let bf = cfg.block_of(f).unwrap();
        let bm = cfg.block_of(merge).unwrap();
        assert_eq!(cfg.block(entry).successors, vec![bt, bf]);
        assert_eq!(cfg.block(bm).predecessors, vec![bt, bf]);
        assert_eq!(cfg.rpo[0], entry);
        assert_eq!(*cfg.rpo.last().unwrap(), bm);
    }

    #[test]
    fn test_dominator_tree_diamond() {
        let (graph, t, _f, merge) = diamond();
        let view = ControlFlowView::compute(&graph);
        let bt = view.cfg.block_of(t).unwrap();
        let bm = view.cfg.block_of(merge).unwrap();

        assert_eq!(view.dom.idom(bm), Some(view.cfg.entry));
        assert!(view.dom.dominates(view.cfg.entry, bt));
        assert!(!view.dom.dominates(bt, bm));
        assert_eq!(view.dom.children(view.cfg.entry).len(), 3);
        assert_eq!(view.dom.depth(bm), 1);
    }

    #[test]
    fn test_frequencies_follow_probabilities() {
        let (graph, t, f, merge) = diamond();
        let cfg = Cfg::build(&graph);
        let ft = cfg.block(cfg.block_of(t).unwrap()).frequency;
        let ff = cfg.block(cfg.block_of(f).unwrap()).frequency;
        let fm = cfg.block(cfg.block_of(merge).unwrap()).frequency;
        assert!((ft - 0.2).abs() < 1e-9);
        assert!((ff - 0.8).abs() < 1e-9);
        assert!((fm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_loop_detection() {
        let mut b = GraphBuilder::new();
        let obj = b.parameter(0, Stamp::object_non_null());
        let n = b.parameter(1, Stamp::int_unrestricted());
        let zero = b.const_int(0);
        let one = b.const_int(1);
        let lp = b.loop_begin();
        let i = b.loop_phi(lp, zero);
        let cond = b.int_lt(i, n);
        let (body, exit) = b.if_loop_exit(cond, lp, Probability::from_basis_points(9_000));
        b.switch_to(body);
        let load = b.load(obj, LocationIdentity::Field(0));
        let next = b.add(i, one);
        b.loop_end(lp, &[(i, next)]);
        b.switch_to(exit);
        b.return_value(None);
        let graph = b.finish();

        let view = ControlFlowView::compute(&graph);
        let header = view.cfg.block_of(lp).unwrap();
        let body_block = view.cfg.block_of(load).unwrap();
        let exit_block = view.cfg.block_of(exit).unwrap();

        assert_eq!(view.loops.loops.len(), 1);
        let l = &view.loops.loops[0];
        assert_eq!(l.header, header);
        assert!(l.contains(body_block));
        assert!(!l.contains(exit_block));
        assert_eq!(l.exits, vec![exit_block]);
        assert_eq!(l.exit_sources, vec![header]);
        assert_eq!(view.loops.loop_depth(body_block), 1);
        assert_eq!(view.cfg.block(body_block).loop_depth, 1);
        assert!((view.cfg.block(header).frequency - 10.0).abs() < 1e-9);
        assert!(view.dominates(lp, load));
    }

    #[test]
    fn test_staleness_tracks_topology() {
        let (mut graph, t, _f, _merge) = diamond();
        let cfg = Cfg::build(&graph);
        assert!(cfg.check_fresh(&graph).is_ok());

        let end = graph.node(t).next().unwrap();
        graph.set_next(t, NodeId::INVALID);
        graph.set_next(t, end);
        assert!(cfg.is_stale(&graph));
        assert!(matches!(
            cfg.check_fresh(&graph),
            Err(OptError::StaleControlFlow { .. })
        ));
    }
}
