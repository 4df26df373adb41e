//! FIFO worklist with membership tracking and a per-node visit budget.

use std::collections::VecDeque;

use crate::ir::arena::{BitSet, SecondaryMap};
use crate::ir::node::{Node, NodeId};

/// Nodes waiting to be canonicalized.
///
/// A node is queued at most once at a time. Each node may be dequeued at most
/// `max_visits` times per run, which bounds oscillating rewrite rules.
#[derive(Debug)]
pub struct Worklist {
    queue: VecDeque<NodeId>,
    queued: BitSet,
    visits: SecondaryMap<Node, u32>,
    max_visits: u32,
    saturated: usize,
}

impl Worklist {
    pub fn new(max_visits: u32) -> Self {
        Worklist {
            queue: VecDeque::new(),
            queued: BitSet::new(),
            visits: SecondaryMap::new(),
            max_visits,
            saturated: 0,
        }
    }

    /// Enqueue `node`; returns false if it was already queued or is out of
    /// visits.
    pub fn push(&mut self, node: NodeId) -> bool {
        if !node.is_valid() || self.queued.contains(node.as_usize()) {
            return false;
        }
        if self.visits[node] >= self.max_visits {
            self.saturated += 1;
            return false;
        }
        self.queued.insert(node.as_usize());
        self.queue.push_back(node);
        true
    }

    pub fn extend<I: IntoIterator<Item = NodeId>>(&mut self, nodes: I) {
        for node in nodes {
            self.push(node);
        }
    }

    pub fn pop(&mut self) -> Option<NodeId> {
        let node = self.queue.pop_front()?;
        self.queued.remove(node.as_usize());
        *self.visits.get_mut(node) += 1;
        Some(node)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Pushes rejected because a node ran out of visits.
    pub fn saturated(&self) -> usize {
        self.saturated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worklist_deduplicates_queued_nodes() {
        let mut wl = Worklist::new(8);
        assert!(wl.push(NodeId::new(3)));
        assert!(!wl.push(NodeId::new(3)));
        wl.push(NodeId::new(1));
        assert_eq!(wl.len(), 2);

        assert_eq!(wl.pop(), Some(NodeId::new(3)));
        assert!(wl.push(NodeId::new(3)));
        assert_eq!(wl.pop(), Some(NodeId::new(1)));
        assert_eq!(wl.pop(), Some(NodeId::new(3)));
        assert!(wl.is_empty());
    }

    #[test]
    fn test_worklist_visit_budget() {
        let mut wl = Worklist::new(2);
        let n = NodeId::new(0);
        for _ in 0..2 {
            assert!(wl.push(n));
            wl.pop();
        }
        assert!(!wl.push(n));
        assert_eq!(wl.saturated(), 1);
        assert!(!wl.push(NodeId::INVALID));
    }
}
