//! Phi stamp improvement at merges.
//!
//! Every `End` into a merge records, per phi, the best stamp the phi's input
//! on that edge has at the end of the predecessor block. When the merge is
//! reached and the meet of those stamps is strictly better than the phi's
//! stamp, the phi is rebuilt with narrowed inputs. An input that does not
//! already carry the edge stamp is wrapped in a `Pi` anchored at the guard
//! that proved it.

use super::{Walker, PASS_NAME};
use crate::error::OptResult;
use crate::ir::graph_util::kill_with_unused_floating_inputs;
use crate::ir::node::NodeId;
use crate::ir::operators::{ControlOp, Operator};
use crate::ir::opt_log::RewriteKind;
use crate::ir::stamp::Stamp;

/// What was known about one phi input at the end of its predecessor.
#[derive(Debug, Clone, Copy)]
pub(super) struct EdgeStamp {
    pub stamp: Stamp,
    pub guard: Option<NodeId>,
}

impl<'a> Walker<'a> {
    /// Remember the stamps of the phi inputs flowing through `end`.
    pub(super) fn record_end(&mut self, end: NodeId) {
        if !self.config.improve_phis {
            return;
        }
        let Some(merge) = self.graph.merge_of_end(end) else {
            return;
        };
        if !matches!(self.graph.op(merge), Operator::Control(ControlOp::Merge)) {
            return;
        }
        let merge_node = self.graph.node(merge);
        let Some(index) = merge_node.inputs.position(end) else {
            return;
        };
        let ends = merge_node.inputs.len();

        for phi in self.graph.phis_of(merge) {
            let Some(value) = self.graph.node(phi).input(index + 1) else {
                continue;
            };
            let (stamp, guard) = self.infos.best_with_guard(self.graph, value);
            let slots = self
                .end_stamps
                .entry(phi)
                .or_insert_with(|| vec![None; ends]);
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(EdgeStamp { stamp, guard });
            }
        }
    }

    /// Rebuild the phis of `merge` whose stamps the incoming edges improve.
    pub(super) fn improve_phis(&mut self, merge: NodeId) -> OptResult<()> {
        if !self.config.improve_phis {
            return Ok(());
        }
        for phi in self.graph.phis_of(merge) {
            let Some(slots) = self.end_stamps.remove(&phi) else {
                continue;
            };
            let Some(edges) = slots.into_iter().collect::<Option<Vec<EdgeStamp>>>() else {
                continue;
            };
            self.improve_phi(merge, phi, &edges)?;
        }
        Ok(())
    }

    fn improve_phi(&mut self, merge: NodeId, phi: NodeId, edges: &[EdgeStamp]) -> OptResult<()> {
        let Some(meet) = edges
            .iter()
            .map(|e| e.stamp)
            .reduce(|acc, s| acc.meet(&s))
        else {
            return Ok(());
        };
        let old = self.graph.stamp(phi);
        let Some(new) = old.try_improve_with(&meet) else {
            return Ok(());
        };
        if !worth_improving(&old, &new) {
            return Ok(());
        }

        let values: Vec<NodeId> = self
            .graph
            .node(phi)
            .inputs
            .as_slice()
            .get(1..)
            .map(<[NodeId]>::to_vec)
            .unwrap_or_default();
        if values.len() != edges.len() {
            return Ok(());
        }
        let mut inputs = Vec::with_capacity(values.len() + 1);
        inputs.push(merge);
        for (&value, edge) in values.iter().zip(edges) {
            if self.graph.stamp(value).is_subset_of(&new) {
                inputs.push(value);
                continue;
            }
            let Some(guard) = edge.guard else {
                return Ok(());
            };
            let pi = self
                .graph
                .add_unique(Operator::Pi(edge.stamp), &[value, guard]);
            let narrowed = self.graph.stamp(value).join(&edge.stamp);
            self.graph.set_stamp(pi, narrowed);
            inputs.push(pi);
        }

        let new_phi = self.graph.add_with_stamp(Operator::Phi, &inputs, new);
        self.graph.replace_at_usages(phi, new_phi);
        kill_with_unused_floating_inputs(self.graph, phi)?;
        self.graph
            .report(PASS_NAME, RewriteKind::PhiImprovement, phi, Some(new_phi));
        self.stats.phis_improved += 1;
        log::trace!("phi {:?} narrowed to {:?} as {:?}", phi, new, new_phi);
        Ok(())
    }
}

/// Narrowing pays off when it can fold something downstream.
fn worth_improving(old: &Stamp, new: &Stamp) -> bool {
    match (old, new) {
        (Stamp::Object(_), Stamp::Object(_)) => true,
        (Stamp::Integer(old), Stamp::Integer(new)) => {
            new.as_constant().is_some()
                || old.is_unrestricted()
                || (new.is_positive() && !old.is_positive())
                || (new.is_negative() && !old.is_negative())
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::GraphBuilder;
    use crate::ir::operators::Probability;
    use crate::opt::conditional::{ConditionalElimination, ConditionalEliminationConfig};

    /// `phi(1, p)` where `p` only reaches the merge on the `p >= 0` branch.
    fn guarded_merge() -> (crate::ir::graph::Graph, NodeId, NodeId, NodeId) {
        let mut b = GraphBuilder::new();
        let p = b.parameter(0, Stamp::int_unrestricted());
        let zero = b.const_int(0);
        let one = b.const_int(1);
        let negative = b.int_lt(p, zero);
        let (t, f) = b.if_then_else(negative, Probability::EVEN);
        b.switch_to(t);
        let e1 = b.end();
        b.switch_to(f);
        let e2 = b.end();
        let merge = b.merge(&[e1, e2]);
        let phi = b.phi(merge, &[one, p]);
        let ret = b.return_value(Some(phi));
        (b.finish(), p, phi, ret)
    }

    #[test]
    fn test_phi_narrowed_by_branch() {
        let (mut graph, p, phi, ret) = guarded_merge();
        assert!(graph.stamp(phi).as_integer().unwrap().is_unrestricted());

        let mut ce = ConditionalElimination::new();
        assert!(ce.apply(&mut graph).unwrap());
        assert_eq!(ce.stats().phis_improved, 1);
        assert!(!graph.is_alive(phi));

        let new_phi = graph.node(ret).input(0).unwrap();
        let stamp = graph.stamp(new_phi);
        assert!(stamp.as_integer().unwrap().is_positive());

        let pi = graph.node(new_phi).input(2).unwrap();
        assert!(matches!(graph.op(pi), Operator::Pi(_)));
        assert_eq!(graph.node(pi).input(0), Some(p));
        graph.verify().unwrap();
    }

    #[test]
    fn test_phi_untouched_when_disabled() {
        let (mut graph, _, phi, _) = guarded_merge();
        let mut ce = ConditionalElimination::with_config(ConditionalEliminationConfig::conservative());
        ce.apply(&mut graph).unwrap();
        assert!(graph.is_alive(phi));
        assert_eq!(ce.stats().phis_improved, 0);
    }

    #[test]
    fn test_worth_improving() {
        let unrestricted = Stamp::int_unrestricted();
        let wide = Stamp::int_range(-10, 10);
        assert!(worth_improving(&unrestricted, &Stamp::int_range(-5, 5)));
        assert!(worth_improving(&wide, &Stamp::int_range(0, 10)));
        assert!(worth_improving(&wide, &Stamp::int_constant(3)));
        assert!(!worth_improving(&wide, &Stamp::int_range(-5, 5)));
    }
}
