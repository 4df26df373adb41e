//! Scoped, flow-sensitive knowledge about values.
//!
//! Each fact is an *info element*: a stamp proven for a value, the node that
//! justifies it, and a link to the element it shadows. Elements live in one
//! arena-like `Vec`; a per-value map points at the newest element. Entering a
//! dominator-tree block takes a `Mark`, leaving it rewinds to the mark, which
//! restores every value's newest element to what it was before the block.

use rustc_hash::FxHashMap;

use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::stamp::Stamp;

/// A proven stamp for one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoElement {
    pub stamp: Stamp,
    /// The begin or guard that makes the stamp hold.
    pub guard: NodeId,
    parent: Option<usize>,
}

/// A condition known to have a fixed outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionFact {
    pub condition: NodeId,
    /// The condition is known to be false.
    pub negated: bool,
    pub guard: NodeId,
}

/// Stack heights to rewind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    undo_len: usize,
    conditions_len: usize,
    elements_len: usize,
}

#[derive(Debug, Default)]
pub struct InfoStack {
    elements: Vec<InfoElement>,
    top: FxHashMap<NodeId, usize>,
    /// `(value, previous top)` for every push.
    undo: Vec<(NodeId, Option<usize>)>,
    conditions: Vec<ConditionFact>,
}

impl InfoStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self) -> Mark {
        Mark {
            undo_len: self.undo.len(),
            conditions_len: self.conditions.len(),
            elements_len: self.elements.len(),
        }
    }

    /// Forget everything pushed since `mark`.
    pub fn rewind(&mut self, mark: Mark) {
        while self.undo.len() > mark.undo_len {
            let Some((value, previous)) = self.undo.pop() else {
                break;
            };
            match previous {
                Some(index) => {
                    self.top.insert(value, index);
                }
                None => {
                    self.top.remove(&value);
                }
            }
        }
        self.conditions.truncate(mark.conditions_len);
        self.elements.truncate(mark.elements_len);
    }

    /// Record `stamp` for `value`, shadowing its current element.
    pub fn push_info(&mut self, value: NodeId, stamp: Stamp, guard: NodeId) {
        let parent = self.top.get(&value).copied();
        self.elements.push(InfoElement {
            stamp,
            guard,
            parent,
        });
        self.top.insert(value, self.elements.len() - 1);
        self.undo.push((value, parent));
    }

    pub fn push_condition(&mut self, condition: NodeId, negated: bool, guard: NodeId) {
        self.conditions.push(ConditionFact {
            condition,
            negated,
            guard,
        });
    }

    /// The newest element for `value`.
    pub fn top(&self, value: NodeId) -> Option<&InfoElement> {
        self.top.get(&value).map(|&i| &self.elements[i])
    }

    /// Elements for `value`, newest first.
    pub fn chain(&self, value: NodeId) -> InfoChain<'_> {
        InfoChain {
            elements: &self.elements,
            next: self.top.get(&value).copied(),
        }
    }

    /// Known conditions, oldest first.
    pub fn conditions(&self) -> &[ConditionFact] {
        &self.conditions
    }

    /// The most precise stamp known for `value` here.
    pub fn best_stamp(&self, graph: &Graph, value: NodeId) -> Stamp {
        match self.top(value) {
            Some(info) => info.stamp,
            None => graph.stamp(value),
        }
    }

    /// The best stamp together with the node justifying it, if any.
    pub fn best_with_guard(&self, graph: &Graph, value: NodeId) -> (Stamp, Option<NodeId>) {
        match self.top(value) {
            Some(info) => (info.stamp, Some(info.guard)),
            None => (graph.stamp(value), None),
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Iterator over the shadowed elements of one value.
pub struct InfoChain<'a> {
    elements: &'a [InfoElement],
    next: Option<usize>,
}

impl<'a> Iterator for InfoChain<'a> {
    type Item = &'a InfoElement;

    fn next(&mut self) -> Option<Self::Item> {
        let element = self.elements.get(self.next?)?;
        self.next = element.parent;
        Some(element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_shadows_and_rewind_restores() {
        let graph = Graph::new();
        let value = NodeId::new(1);
        let guard = NodeId::new(2);
        let mut infos = InfoStack::new();

        infos.push_info(value, Stamp::int_range(0, 100), guard);
        let outer = infos.mark();
        infos.push_info(value, Stamp::int_range(0, 10), guard);
        infos.push_condition(NodeId::new(3), true, guard);
        assert_eq!(infos.top(value).unwrap().stamp, Stamp::int_range(0, 10));
        assert_eq!(infos.chain(value).count(), 2);

        infos.rewind(outer);
        assert_eq!(infos.best_stamp(&graph, value), Stamp::int_range(0, 100));
        assert!(infos.conditions().is_empty());
        assert_eq!(infos.len(), 1);
    }

    #[test]
    fn test_rewind_to_empty_forgets_value() {
        let graph = Graph::new();
        let start = graph.start();
        let mut infos = InfoStack::new();
        let mark = infos.mark();
        infos.push_info(start, Stamp::int_constant(1), start);
        infos.rewind(mark);
        assert!(infos.top(start).is_none());
        assert_eq!(infos.best_with_guard(&graph, start), (Stamp::Void, None));
        assert!(infos.is_empty());
    }

    #[test]
    fn test_nested_marks_rewind_in_order() {
        let a = NodeId::new(5);
        let b = NodeId::new(6);
        let g = NodeId::new(7);
        let mut infos = InfoStack::new();

        let m0 = infos.mark();
        infos.push_info(a, Stamp::int_non_negative(), g);
        let m1 = infos.mark();
        infos.push_info(b, Stamp::int_constant(3), g);
        infos.push_info(a, Stamp::int_range(0, 5), g);

        infos.rewind(m1);
        assert_eq!(infos.top(a).unwrap().stamp, Stamp::int_non_negative());
        assert!(infos.top(b).is_none());
        infos.rewind(m0);
        assert!(infos.top(a).is_none());
    }
}
