//! IR node definitions for the Sea-of-Nodes IR.
//!
//! Sea-of-Nodes represents both data flow and control flow uniformly as edges
//! between nodes. Every node has:
//! - **Operator**: what the node computes
//! - **Inputs**: data, condition, guard and structural dependencies
//! - **Successors**: control successors (fixed nodes only)
//! - **Predecessor**: the unique control predecessor (fixed nodes only)
//! - **Stamp**: the abstract value of the node's result
//!
//! Usages (the reverse of inputs) are maintained by the graph, not the node.
//!
//! # Fixed vs Floating
//!
//! - **Fixed nodes** sit in the control chain: begins, merges, ends, splits,
//!   guards, loads, stores, invokes.
//! - **Floating nodes** are pure values scheduled wherever their inputs are
//!   available: constants, arithmetic, logic, phis, pis, floating guards.

use smallvec::SmallVec;

use super::arena::Id;
use super::operators::Operator;
use super::stamp::Stamp;

// =============================================================================
// Node ID Type Alias
// =============================================================================

/// Unique identifier for a node in the graph.
pub type NodeId = Id<Node>;

// =============================================================================
// Input List
// =============================================================================

/// Maximum number of inline inputs before spilling to heap.
const INLINE_INPUTS: usize = 4;

/// Compact input list optimized for small node arity.
///
/// Optional inputs (a load without a guard, a pi without an anchor) hold
/// `NodeId::INVALID`.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct InputList(SmallVec<[NodeId; INLINE_INPUTS]>);

impl InputList {
    pub fn empty() -> Self {
        InputList(SmallVec::new())
    }

    pub fn from_slice(inputs: &[NodeId]) -> Self {
        InputList(SmallVec::from_slice(inputs))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Input at `index`; `None` past the end or for an absent optional input.
    #[inline]
    pub fn get(&self, index: usize) -> Option<NodeId> {
        self.0.get(index).copied().and_then(NodeId::valid)
    }

    #[inline]
    pub(crate) fn set(&mut self, index: usize, value: NodeId) {
        if let Some(slot) = self.0.get_mut(index) {
            *slot = value;
        }
    }

    #[inline]
    pub(crate) fn push(&mut self, value: NodeId) {
        self.0.push(value);
    }

    pub(crate) fn remove(&mut self, index: usize) -> NodeId {
        self.0.remove(index)
    }

    pub(crate) fn swap(&mut self, a: usize, b: usize) {
        self.0.swap(a, b);
    }

    pub(crate) fn clear(&mut self) {
        self.0.clear();
    }

    /// All slots, including absent optional inputs.
    #[inline]
    pub fn as_slice(&self) -> &[NodeId] {
        &self.0
    }

    /// Present inputs.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.0.iter().copied().filter(|id| id.is_valid())
    }

    pub fn to_vec(&self) -> Vec<NodeId> {
        self.iter().collect()
    }

    /// Position of the first occurrence of `id`.
    pub fn position(&self, id: NodeId) -> Option<usize> {
        self.0.iter().position(|&i| i == id)
    }
}

impl std::fmt::Debug for InputList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

/// Control successors of a fixed node.
pub type SuccessorList = SmallVec<[NodeId; 2]>;

// =============================================================================
// Node
// =============================================================================

/// A node in the Sea-of-Nodes IR graph.
#[derive(Clone)]
pub struct Node {
    /// The operation this node performs.
    pub op: Operator,

    /// Input edges.
    pub inputs: InputList,

    /// Control successors; `successors[0]` is `next` for fixed-with-next
    /// nodes and the true branch of an `If`.
    pub successors: SuccessorList,

    /// Control predecessor, `INVALID` when unlinked or not fixed.
    pub predecessor: NodeId,

    /// Abstract value of the result.
    pub stamp: Stamp,

    /// Flags for various node properties.
    pub flags: NodeFlags,
}

impl Node {
    /// Create a new node with the operator's default stamp.
    pub fn new(op: Operator, inputs: InputList) -> Self {
        let stamp = op.default_stamp();
        Node::with_stamp(op, inputs, stamp)
    }

    pub fn with_stamp(op: Operator, inputs: InputList, stamp: Stamp) -> Self {
        Node {
            op,
            inputs,
            successors: SmallVec::new(),
            predecessor: NodeId::INVALID,
            stamp,
            flags: NodeFlags::empty(),
        }
    }

    /// `successors[0]` for fixed-with-next nodes.
    #[inline]
    pub fn next(&self) -> Option<NodeId> {
        self.successors.first().copied().and_then(NodeId::valid)
    }

    #[inline]
    pub fn predecessor(&self) -> Option<NodeId> {
        self.predecessor.valid()
    }

    #[inline]
    pub fn input(&self, index: usize) -> Option<NodeId> {
        self.inputs.get(index)
    }

    #[inline]
    pub fn is_fixed(&self) -> bool {
        self.op.is_fixed()
    }

    #[inline]
    pub fn is_floating(&self) -> bool {
        self.op.is_floating()
    }

    pub fn is_constant(&self) -> bool {
        self.op.is_constant()
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.op {
            Operator::ConstInt(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_logic(&self) -> Option<bool> {
        match self.op {
            Operator::ConstLogic(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.flags.contains(NodeFlags::DELETED)
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        !self.is_deleted()
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.flags.insert(NodeFlags::DELETED);
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.op)?;
        if !self.inputs.is_empty() {
            write!(f, " {:?}", self.inputs)?;
        }
        if !self.successors.is_empty() {
            write!(f, " -> {:?}", self.successors.as_slice())?;
        }
        write!(f, " : {:?}", self.stamp)?;
        if self.is_deleted() {
            write!(f, " (deleted)")?;
        }
        Ok(())
    }
}

// =============================================================================
// Node Flags
// =============================================================================

bitflags::bitflags! {
    /// Flags for node properties.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct NodeFlags: u8 {
        /// Node has been deleted; its handle stays valid but inert.
        const DELETED = 0b0000_0001;
        /// Node has been hoisted out of a loop.
        const HOISTED = 0b0000_0010;
    }
}

impl Default for NodeFlags {
    fn default() -> Self {
        NodeFlags::empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
