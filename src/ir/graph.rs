//! Sea-of-Nodes graph structure.
//!
//! The graph provides:
//! - **Arena-based storage**: nodes are never moved or reused; deletion flips
//!   a flag and detaches edges
//! - **Usage chains**: the reverse of every input edge, one entry per edge
//! - **Control links**: successor lists with a mirrored predecessor pointer
//! - **Mutation events**: an opt-in record of added nodes, changed inputs and
//!   nodes whose usages dropped to zero, drained by the canonicalizer
//! - **Structural identity**: value equality and duplicate lookup for GVN
//!
//! A monotonically increasing *topology version* is bumped on every change to
//! control links, so derived control-flow views can detect that they are
//! stale.

use rustc_hash::FxHashMap;

use super::arena::{Arena, SecondaryMap};
use super::node::{InputList, Node, NodeFlags, NodeId};
use super::operators::{ControlOp, InputType, Operator};
use super::opt_log::{OptimizationLog, RewriteKind};
use super::stamp::Stamp;
use crate::error::{OptError, OptResult};

// =============================================================================
// Events and State
// =============================================================================

/// A graph mutation observed while event tracking is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphEvent {
    NodeAdded(NodeId),
    /// An input of this node changed.
    InputChanged(NodeId),
    /// This node just lost its last usage.
    ZeroUsages(NodeId),
}

bitflags::bitflags! {
    /// Structural guarantees established by passes that ran on the graph.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct GraphState: u8 {
        /// The canonicalizer reached a fixed point.
        const CANONICAL = 0b0000_0001;
        /// Conditional elimination ran.
        const CONDITIONS_ELIMINATED = 0b0000_0010;
        /// Memory-aware value numbering ran.
        const MEMORY_VALUE_NUMBERED = 0b0000_0100;
    }
}

impl Default for GraphState {
    fn default() -> Self {
        GraphState::empty()
    }
}

// =============================================================================
// Graph Structure
// =============================================================================

/// A Sea-of-Nodes graph for one method.
#[derive(Clone)]
pub struct Graph {
    /// Arena for node storage.
    nodes: Arena<Node>,

    /// Usage chains, one entry per input edge.
    usages: SecondaryMap<Node, Vec<NodeId>>,

    /// The start node (control entry).
    start: NodeId,

    /// Value-numbered input-less nodes, keyed by operator.
    leaf_cache: FxHashMap<Operator, NodeId>,

    /// Recorded mutations, `None` while tracking is off.
    events: Option<Vec<GraphEvent>>,

    topology_version: u64,

    live_nodes: usize,

    state: GraphState,

    log: OptimizationLog,
}

impl Graph {
    /// Create a new graph containing only the start node.
    pub fn new() -> Self {
        let mut nodes = Arena::with_capacity(64);
        let start = nodes.alloc(Node::new(
            Operator::control(ControlOp::Start),
            InputList::empty(),
        ));
        Graph {
            nodes,
            usages: SecondaryMap::new(),
            start,
            leaf_cache: FxHashMap::default(),
            events: None,
            topology_version: 0,
            live_nodes: 1,
            state: GraphState::empty(),
            log: OptimizationLog::new(),
        }
    }

    // =========================================================================
    // Node Access
    // =========================================================================

    #[inline]
    pub fn start(&self) -> NodeId {
        self.start
    }

    /// Get a reference to a node.
    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    #[inline]
    pub fn op(&self, id: NodeId) -> &Operator {
        &self.nodes[id].op
    }

    #[inline]
    pub fn stamp(&self, id: NodeId) -> Stamp {
        self.nodes[id].stamp
    }

    /// Whether `id` refers to a node that exists and is not deleted.
    #[inline]
    pub fn is_alive(&self, id: NodeId) -> bool {
        id.is_valid() && self.nodes.get(id).is_some_and(Node::is_alive)
    }

    /// Number of nodes ever allocated, including deleted ones.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// Number of live nodes.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.live_nodes
    }

    /// Iterate over live nodes.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().filter(|(_, n)| n.is_alive())
    }

    /// Live node IDs, collected so callers may mutate while walking them.
    pub fn live_ids(&self) -> Vec<NodeId> {
        self.iter().map(|(id, _)| id).collect()
    }

    // =========================================================================
    // State, Versioning, Log
    // =========================================================================

    #[inline]
    pub fn topology_version(&self) -> u64 {
        self.topology_version
    }

    #[inline]
    fn topology_changed(&mut self) {
        self.topology_version += 1;
    }

    #[inline]
    pub fn state(&self) -> GraphState {
        self.state
    }

    pub fn has_state(&self, required: GraphState) -> bool {
        self.state.contains(required)
    }

    pub fn add_state(&mut self, state: GraphState) {
        self.state.insert(state);
    }

    pub fn remove_state(&mut self, state: GraphState) {
        self.state.remove(state);
    }

    pub fn log(&self) -> &OptimizationLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut OptimizationLog {
        &mut self.log
    }

    pub(crate) fn report(
        &mut self,
        pass: &'static str,
        kind: RewriteKind,
        node: NodeId,
        replacement: Option<NodeId>,
    ) {
        self.log.report(pass, kind, node, replacement);
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Start recording mutation events.
    pub fn track_events(&mut self) {
        if self.events.is_none() {
            self.events = Some(Vec::new());
        }
    }

    /// Stop recording and drop anything pending.
    pub fn stop_tracking_events(&mut self) {
        self.events = None;
    }

    /// Take a snapshot of the pending events.
    pub fn take_events(&mut self) -> Vec<GraphEvent> {
        self.events.as_mut().map(std::mem::take).unwrap_or_default()
    }

    #[inline]
    fn record(&mut self, event: GraphEvent) {
        if let Some(events) = self.events.as_mut() {
            events.push(event);
        }
    }

    // =========================================================================
    // Node Creation
    // =========================================================================

    /// Add a node with the operator's default stamp.
    pub fn add(&mut self, op: Operator, inputs: &[NodeId]) -> NodeId {
        let stamp = op.default_stamp();
        self.add_with_stamp(op, inputs, stamp)
    }

    pub fn add_with_stamp(&mut self, op: Operator, inputs: &[NodeId], stamp: Stamp) -> NodeId {
        let node = Node::with_stamp(op, InputList::from_slice(inputs), stamp);
        let id = self.nodes.alloc(node);
        for &input in inputs {
            if input.is_valid() {
                self.usages.get_mut(input).push(id);
            }
        }
        self.live_nodes += 1;
        self.record(GraphEvent::NodeAdded(id));
        id
    }

    /// Add a node unless a value-equal live node already exists.
    pub fn add_unique(&mut self, op: Operator, inputs: &[NodeId]) -> NodeId {
        if op.is_value_numberable() {
            if let Some(existing) = self.find_value_equal(&op, inputs) {
                return existing;
            }
        }
        let id = self.add(op, inputs);
        self.register_leaf(id);
        id
    }

    pub fn const_int(&mut self, value: i64) -> NodeId {
        self.add_unique(Operator::ConstInt(value), &[])
    }

    pub fn const_logic(&mut self, value: bool) -> NodeId {
        self.add_unique(Operator::ConstLogic(value), &[])
    }

    pub fn null_constant(&mut self) -> NodeId {
        self.add_unique(Operator::Null, &[])
    }

    // =========================================================================
    // Usage Chains
    // =========================================================================

    #[inline]
    pub fn usages(&self, id: NodeId) -> &[NodeId] {
        &self.usages[id]
    }

    #[inline]
    pub fn usage_count(&self, id: NodeId) -> usize {
        self.usages[id].len()
    }

    #[inline]
    pub fn has_usages(&self, id: NodeId) -> bool {
        !self.usages[id].is_empty()
    }

    /// Usages with duplicates removed, in first-use order.
    pub fn distinct_usages(&self, id: NodeId) -> Vec<NodeId> {
        let mut seen = Vec::new();
        for &usage in self.usages(id) {
            if !seen.contains(&usage) {
                seen.push(usage);
            }
        }
        seen
    }

    fn remove_usage(&mut self, def: NodeId, user: NodeId) {
        let list = self.usages.get_mut(def);
        if let Some(pos) = list.iter().position(|&u| u == user) {
            list.swap_remove(pos);
            if list.is_empty() {
                self.record(GraphEvent::ZeroUsages(def));
            }
        }
    }

    // =========================================================================
    // Input Mutation
    // =========================================================================

    /// Set input `index` of `node`, keeping usage chains in sync.
    pub fn set_input(&mut self, node: NodeId, index: usize, value: NodeId) {
        let Some(old) = self.nodes[node].inputs.as_slice().get(index).copied() else {
            return;
        };
        if old == value {
            return;
        }
        self.nodes[node].inputs.set(index, value);
        if value.is_valid() {
            self.usages.get_mut(value).push(node);
        }
        if old.is_valid() {
            self.remove_usage(old, node);
        }
        self.record(GraphEvent::InputChanged(node));
    }

    pub fn push_input(&mut self, node: NodeId, value: NodeId) {
        self.nodes[node].inputs.push(value);
        if value.is_valid() {
            self.usages.get_mut(value).push(node);
        }
        self.record(GraphEvent::InputChanged(node));
    }

    /// Remove input `index`, shifting later inputs down.
    pub fn remove_input(&mut self, node: NodeId, index: usize) {
        if index >= self.nodes[node].inputs.len() {
            return;
        }
        let old = self.nodes[node].inputs.remove(index);
        if old.is_valid() {
            self.remove_usage(old, node);
        }
        self.record(GraphEvent::InputChanged(node));
    }

    pub fn swap_inputs(&mut self, node: NodeId, a: usize, b: usize) {
        self.nodes[node].inputs.swap(a, b);
        self.record(GraphEvent::InputChanged(node));
    }

    /// Detach every input of `node`.
    pub fn clear_inputs(&mut self, node: NodeId) {
        let inputs = std::mem::take(&mut self.nodes[node].inputs);
        for input in inputs.iter() {
            self.remove_usage(input, node);
        }
    }

    /// Redirect every usage edge of `old` to `new` (`INVALID` detaches).
    pub fn replace_at_usages(&mut self, old: NodeId, new: NodeId) {
        self.replace_at_usages_where(old, new, |_, _| true);
    }

    /// Redirect only usage edges of the given input type.
    pub fn replace_at_usages_of_type(&mut self, old: NodeId, new: NodeId, ty: InputType) {
        self.replace_at_usages_where(old, new, |op, index| op.input_type(index) == ty);
    }

    /// Redirect usage edges of `old` accepted by `filter(usage_op, index)`.
    pub fn replace_at_usages_where<F>(&mut self, old: NodeId, new: NodeId, filter: F)
    where
        F: Fn(&Operator, usize) -> bool,
    {
        if old == new {
            return;
        }
        for usage in self.distinct_usages(old) {
            let node = &self.nodes[usage];
            let positions: Vec<usize> = node
                .inputs
                .as_slice()
                .iter()
                .enumerate()
                .filter(|&(i, &input)| input == old && filter(&node.op, i))
                .map(|(i, _)| i)
                .collect();
            for index in positions {
                self.set_input(usage, index, new);
            }
        }
    }

    /// Overwrite the stamp of `node`; returns whether it changed.
    pub fn set_stamp(&mut self, node: NodeId, stamp: Stamp) -> bool {
        let slot = &mut self.nodes[node].stamp;
        if *slot == stamp {
            return false;
        }
        *slot = stamp;
        true
    }

    /// Set bookkeeping flags on a node.
    pub(crate) fn add_flags(&mut self, node: NodeId, flags: NodeFlags) {
        self.nodes[node].flags.insert(flags);
    }

    /// Replace the operator of a node in place, keeping its inputs.
    pub(crate) fn set_op(&mut self, node: NodeId, op: Operator) {
        let old = std::mem::replace(&mut self.nodes[node].op, op);
        if self.leaf_cache.get(&old) == Some(&node) {
            self.leaf_cache.remove(&old);
        }
        self.record(GraphEvent::InputChanged(node));
    }

    // =========================================================================
    // Control Links
    // =========================================================================

    /// Set successor `index` of `node`, maintaining predecessor pointers.
    pub fn set_successor(&mut self, node: NodeId, index: usize, successor: NodeId) {
        let successors = &mut self.nodes[node].successors;
        if successors.len() <= index {
            successors.resize(index + 1, NodeId::INVALID);
        }
        let old = successors[index];
        if old == successor {
            return;
        }
        successors[index] = successor;
        let still_linked = successors.contains(&old);
        if old.is_valid() && !still_linked && self.nodes[old].predecessor == node {
            self.nodes[old].predecessor = NodeId::INVALID;
        }
        if successor.is_valid() {
            let previous = self.nodes[successor].predecessor;
            if previous.is_valid() && previous != node {
                self.clear_successor_slot(previous, successor);
            }
            self.nodes[successor].predecessor = node;
        }
        self.topology_changed();
    }

    /// Set the `next` successor of a fixed-with-next node.
    #[inline]
    pub fn set_next(&mut self, node: NodeId, next: NodeId) {
        self.set_successor(node, 0, next);
    }

    fn clear_successor_slot(&mut self, node: NodeId, successor: NodeId) {
        for slot in self.nodes[node].successors.iter_mut() {
            if *slot == successor {
                *slot = NodeId::INVALID;
            }
        }
    }

    /// Exchange two successors of a split; predecessors are unaffected.
    pub fn swap_successors(&mut self, node: NodeId, a: usize, b: usize) {
        self.nodes[node].successors.swap(a, b);
        self.topology_changed();
    }

    /// Drop trailing successor slots past `len`, unlinking them.
    pub(crate) fn truncate_successors(&mut self, node: NodeId, len: usize) {
        while self.nodes[node].successors.len() > len {
            let index = self.nodes[node].successors.len() - 1;
            self.set_successor(node, index, NodeId::INVALID);
            self.nodes[node].successors.pop();
        }
    }

    /// In `node`'s successor list, replace `old` by `new`.
    pub fn replace_successor(&mut self, node: NodeId, old: NodeId, new: NodeId) {
        if let Some(index) = self.nodes[node].successors.iter().position(|&s| s == old) {
            self.set_successor(node, index, new);
        }
    }

    /// Make `new` take `old`'s place below `old`'s predecessor.
    pub fn replace_at_predecessor(&mut self, old: NodeId, new: NodeId) {
        if let Some(pred) = self.nodes[old].predecessor() {
            self.replace_successor(pred, old, new);
        }
    }

    /// Detach all successors of `node`.
    pub fn clear_successors(&mut self, node: NodeId) {
        let successors = std::mem::take(&mut self.nodes[node].successors);
        for successor in successors {
            if successor.is_valid() && self.nodes[successor].predecessor == node {
                self.nodes[successor].predecessor = NodeId::INVALID;
            }
        }
        self.topology_changed();
    }

    /// The merge an end flows into.
    pub fn merge_of_end(&self, end: NodeId) -> Option<NodeId> {
        self.usages(end)
            .iter()
            .copied()
            .find(|&u| self.nodes[u].op.is_merge())
    }

    /// Phis attached to a merge.
    pub fn phis_of(&self, merge: NodeId) -> Vec<NodeId> {
        self.distinct_usages(merge)
            .into_iter()
            .filter(|&u| self.nodes[u].op.is_phi() && self.nodes[u].input(0) == Some(merge))
            .collect()
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Delete a node that has no usages, detaching its own edges.
    pub fn safe_delete(&mut self, node: NodeId) -> OptResult<()> {
        if !self.is_alive(node) {
            return Err(OptError::DeletedNode { node });
        }
        if self.has_usages(node) {
            return Err(OptError::contract(
                node,
                format!("safe_delete with {} live usages", self.usage_count(node)),
            ));
        }
        self.delete_detached(node);
        Ok(())
    }

    /// Delete `node` whatever its usages; callers detach usages themselves.
    pub(crate) fn delete_detached(&mut self, node: NodeId) {
        self.clear_inputs(node);
        if self.nodes[node].is_fixed() {
            self.replace_at_predecessor(node, NodeId::INVALID);
            self.clear_successors(node);
        }
        let op = &self.nodes[node].op;
        if self.leaf_cache.get(op) == Some(&node) {
            self.leaf_cache.remove(op);
        }
        self.nodes[node].mark_deleted();
        self.live_nodes -= 1;
    }

    // =========================================================================
    // Structural Identity
    // =========================================================================

    /// Same operator, same data fields, same ordered inputs.
    pub fn value_equals(&self, a: NodeId, b: NodeId) -> bool {
        let (na, nb) = (&self.nodes[a], &self.nodes[b]);
        na.op == nb.op && na.inputs.as_slice() == nb.inputs.as_slice()
    }

    fn find_value_equal(&self, op: &Operator, inputs: &[NodeId]) -> Option<NodeId> {
        match inputs.iter().copied().find(|i| i.is_valid()) {
            None => self
                .leaf_cache
                .get(op)
                .copied()
                .filter(|&id| self.is_alive(id) && self.nodes[id].inputs.as_slice() == inputs),
            Some(first) => self.usages(first).iter().copied().find(|&u| {
                let n = &self.nodes[u];
                n.is_alive() && n.op == *op && n.inputs.as_slice() == inputs
            }),
        }
    }

    /// A different live node value-equal to `node`, for GVN.
    pub fn find_duplicate(&self, node: NodeId) -> Option<NodeId> {
        let n = &self.nodes[node];
        if !n.op.is_value_numberable() {
            return None;
        }
        match n.inputs.iter().next() {
            None => self
                .leaf_cache
                .get(&n.op)
                .copied()
                .filter(|&id| id != node && self.is_alive(id) && self.value_equals(id, node)),
            Some(first) => self
                .usages(first)
                .iter()
                .copied()
                .find(|&u| u != node && self.is_alive(u) && self.value_equals(u, node)),
        }
    }

    /// Remember an input-less node for later duplicate lookups.
    pub fn register_leaf(&mut self, node: NodeId) {
        let n = &self.nodes[node];
        if n.inputs.is_empty() && n.op.is_value_numberable() {
            let live = self
                .leaf_cache
                .get(&n.op)
                .is_some_and(|&id| self.is_alive(id));
            if !live {
                let op = n.op.clone();
                self.leaf_cache.insert(op, node);
            }
        }
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Verify structural consistency of all live nodes.
    pub fn verify(&self) -> OptResult<()> {
        for (id, node) in self.iter() {
            for input in node.inputs.iter() {
                if !self.is_alive(input) {
                    return Err(OptError::malformed(id, format!("dead input {:?}", input)));
                }
                let edges = node.inputs.iter().filter(|&i| i == input).count();
                let back = self.usages(input).iter().filter(|&&u| u == id).count();
                if edges != back {
                    return Err(OptError::malformed(
                        id,
                        format!("{} edges to {:?} but {} usages", edges, input, back),
                    ));
                }
            }
            for &usage in self.usages(id) {
                if !self.is_alive(usage) {
                    return Err(OptError::malformed(id, format!("dead usage {:?}", usage)));
                }
                if self.nodes[usage].inputs.position(id).is_none() {
                    return Err(OptError::malformed(
                        id,
                        format!("usage {:?} does not read this node", usage),
                    ));
                }
            }
            for &successor in node.successors.iter() {
                if !successor.is_valid() {
                    continue;
                }
                if !self.is_alive(successor) {
                    return Err(OptError::malformed(
                        id,
                        format!("dead successor {:?}", successor),
                    ));
                }
                if self.nodes[successor].predecessor != id {
                    return Err(OptError::malformed(
                        successor,
                        format!("predecessor does not match {:?}", id),
                    ));
                }
            }
            if node.is_fixed() && id != self.start && !node.op.is_merge() {
                let Some(pred) = node.predecessor() else {
                    return Err(OptError::malformed(id, "fixed node without predecessor"));
                };
                if !self.is_alive(pred) || !self.nodes[pred].successors.contains(&id) {
                    return Err(OptError::malformed(id, "predecessor does not link back"));
                }
            }
        }
        Ok(())
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Graph {{")?;
        for (id, node) in self.iter() {
            writeln!(f, "  {:?}: {:?}", id, node)?;
        }
        write!(f, "}}")
    }
}

// =============================================================================
// Tests
// =============================================================================
