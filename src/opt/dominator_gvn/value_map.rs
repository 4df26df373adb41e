//! Remembered memory reads along one dominator-tree path.

use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::LocationIdentity;

/// Reads available for substitution on the current path.
#[derive(Debug, Clone, Default)]
pub struct ValueMap {
    entries: Vec<NodeId>,
}

impl ValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A remembered read value-equal to `node`.
    pub fn lookup(&self, graph: &Graph, node: NodeId) -> Option<NodeId> {
        self.entries
            .iter()
            .copied()
            .find(|&e| e != node && graph.is_alive(e) && graph.value_equals(e, node))
    }

    pub fn remember(&mut self, node: NodeId) {
        if !self.entries.contains(&node) {
            self.entries.push(node);
        }
    }

    /// Forget every read that a kill of `location` may invalidate.
    pub fn kill(&mut self, graph: &Graph, location: LocationIdentity) {
        if location.is_immutable() {
            return;
        }
        self.entries.retain(|&e| {
            graph.is_alive(e)
                && graph
                    .op(e)
                    .location_read()
                    .is_some_and(|read| !location.overlaps(read))
        });
    }

    /// Forget every mutable read; immutable ones survive any kill.
    pub fn kill_all(&mut self, graph: &Graph) {
        self.entries.retain(|&e| {
            graph.is_alive(e)
                && graph
                    .op(e)
                    .location_read()
                    .is_some_and(|read| read.is_immutable())
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::GraphBuilder;
    use crate::ir::stamp::Stamp;

    #[test]
    fn test_kill_only_overlapping_reads() {
        let mut b = GraphBuilder::new();
        let obj = b.parameter(0, Stamp::object_non_null());
        let f0 = b.load(obj, LocationIdentity::Field(0));
        let f1 = b.load(obj, LocationIdentity::Field(1));
        let init = b.load(obj, LocationIdentity::Init);
        let again = b.load(obj, LocationIdentity::Field(1));
        b.return_value(None);
        let graph = b.finish();

        let mut map = ValueMap::new();
        map.remember(f0);
        map.remember(f1);
        map.remember(init);
        assert_eq!(map.lookup(&graph, again), Some(f1));

        map.kill(&graph, LocationIdentity::Field(1));
        assert_eq!(map.len(), 2);
        assert_eq!(map.lookup(&graph, again), None);

        map.kill_all(&graph);
        assert_eq!(map.len(), 1);
        assert!(!map.is_empty());
    }

    #[test]
    fn test_clone_is_independent() {
        let mut b = GraphBuilder::new();
        let obj = b.parameter(0, Stamp::object_non_null());
        let f0 = b.load(obj, LocationIdentity::Field(0));
        b.return_value(None);
        let graph = b.finish();

        let mut parent = ValueMap::new();
        parent.remember(f0);
        let mut child = parent.clone();
        child.kill(&graph, LocationIdentity::Field(0));
        assert!(child.is_empty());
        assert_eq!(parent.len(), 1);
    }
}
