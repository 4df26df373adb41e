//! The structural replacement protocol.
//!
//! Replacing `old` by a canonical form depends only on the shapes of the two
//! nodes:
//!
//! | old                 | replacement                  | action                                   |
//! |---------------------|------------------------------|------------------------------------------|
//! | floating            | node                         | redirect usages, delete old              |
//! | floating, unused    | none                         | delete old                               |
//! | fixed with next     | none (old unused)            | unlink, delete                           |
//! | fixed with next     | floating                     | redirect usages, unlink, delete          |
//! | fixed with next     | control sink, unlinked       | splice sink in, kill the rest of chain   |
//! | fixed with next     | fixed, unlinked              | splice replacement into old's position   |
//! | fixed with next     | fixed, already linked        | redirect usages, unlink, delete          |
//! | with exception edge | anything but an invoke       | kill exception edge, then as with next   |
//! | with exception edge | invoke, unlinked             | hand both successors over                |
//!
//! Splits, ends and sinks are never replaced; split removal goes through
//! control-flow simplification.

use crate::error::{OptError, OptResult};
use crate::ir::graph::Graph;
use crate::ir::graph_util::{
    kill_cfg, kill_with_unused_floating_inputs, remove_fixed_with_unused_inputs,
    replace_fixed_with_fixed, replace_fixed_with_floating, unlink_and_kill_exception_edge,
};
use crate::ir::node::NodeId;
use crate::ir::operators::ControlShape;

/// Replace `old` by `replacement` (or delete it when `None`).
pub fn perform_replacement(
    graph: &mut Graph,
    old: NodeId,
    replacement: Option<NodeId>,
) -> OptResult<()> {
    if !graph.is_alive(old) {
        return Err(OptError::DeletedNode { node: old });
    }
    if let Some(r) = replacement {
        if !graph.is_alive(r) {
            return Err(OptError::DeletedNode { node: r });
        }
    }
    match graph.op(old).shape() {
        ControlShape::Floating => replace_floating(graph, old, replacement),
        ControlShape::WithNext => replace_fixed_with_next(graph, old, replacement),
        ControlShape::WithException => replace_with_exception(graph, old, replacement),
        ControlShape::Split => Err(OptError::contract(
            old,
            "splits are removed by simplification, not replaced",
        )),
        ControlShape::End | ControlShape::Sink => {
            Err(OptError::contract(old, "control ends cannot be replaced"))
        }
    }
}

fn replace_floating(graph: &mut Graph, old: NodeId, replacement: Option<NodeId>) -> OptResult<()> {
    match replacement {
        None if graph.has_usages(old) => Err(OptError::contract(
            old,
            "floating node with usages replaced by nothing",
        )),
        None => kill_with_unused_floating_inputs(graph, old),
        Some(r) => {
            graph.replace_at_usages(old, r);
            kill_with_unused_floating_inputs(graph, old)
        }
    }
}

fn replace_fixed_with_next(
    graph: &mut Graph,
    old: NodeId,
    replacement: Option<NodeId>,
) -> OptResult<()> {
    let Some(r) = replacement else {
        if graph.has_usages(old) {
            return Err(OptError::contract(
                old,
                "fixed node with usages replaced by nothing",
            ));
        }
        return remove_fixed_with_unused_inputs(graph, old);
    };

    let replacement = graph.node(r);
    if replacement.is_floating() {
        return replace_fixed_with_floating(graph, old, r);
    }
    let linked = replacement.predecessor().is_some();
    if replacement.op.is_control_sink() {
        if linked {
            return Err(OptError::contract(r, "control sink replacement is already linked"));
        }
        graph.replace_at_usages(old, r);
        let next = graph.node(old).next();
        graph.set_next(old, NodeId::INVALID);
        graph.replace_at_predecessor(old, r);
        kill_with_unused_floating_inputs(graph, old)?;
        if let Some(next) = next {
            kill_cfg(graph, next)?;
        }
        return Ok(());
    }
    if !linked {
        return replace_fixed_with_fixed(graph, old, r);
    }
    graph.replace_at_usages(old, r);
    remove_fixed_with_unused_inputs(graph, old)
}

fn replace_with_exception(
    graph: &mut Graph,
    old: NodeId,
    replacement: Option<NodeId>,
) -> OptResult<()> {
    let Some(r) = replacement.filter(|&r| graph.op(r).shape() == ControlShape::WithException)
    else {
        unlink_and_kill_exception_edge(graph, old)?;
        return replace_fixed_with_next(graph, old, replacement);
    };
    if graph.node(r).predecessor().is_some() {
        return Err(OptError::contract(r, "invoke replacement is already linked"));
    }
    graph.replace_at_usages(old, r);
    let successors: Vec<NodeId> = graph.node(old).successors.to_vec();
    graph.clear_successors(old);
    for (index, successor) in successors.into_iter().enumerate() {
        graph.set_successor(r, index, successor);
    }
    graph.replace_at_predecessor(old, r);
    kill_with_unused_floating_inputs(graph, old)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::GraphBuilder;
    use crate::ir::operators::{
        CallTarget, DeoptAction, DeoptInfo, DeoptReason, Intrinsic, LocationIdentity, Operator,
        Speculation,
    };
    use crate::ir::stamp::Stamp;

    #[test]
    fn test_floating_replacement_redirects_usages() {
        let mut b = GraphBuilder::new();
        let p = b.parameter(0, Stamp::int_unrestricted());
        let zero = b.const_int(0);
        let sum = b.add(p, zero);
        let ret = b.return_value(Some(sum));
        let mut graph = b.finish();

        perform_replacement(&mut graph, sum, Some(p)).unwrap();
        assert!(!graph.is_alive(sum));
        assert!(!graph.is_alive(zero));
        assert_eq!(graph.node(ret).input(0), Some(p));
        graph.verify().unwrap();
    }

    #[test]
    fn test_floating_with_usages_cannot_vanish() {
        let mut b = GraphBuilder::new();
        let p = b.parameter(0, Stamp::int_unrestricted());
        let neg = b.neg(p);
        b.return_value(Some(neg));
        let mut graph = b.finish();

        let err = perform_replacement(&mut graph, neg, None).unwrap_err();
        assert!(matches!(err, OptError::ContractViolation { .. }));
    }

    #[test]
    fn test_unused_fixed_node_is_unlinked() {
        let mut b = GraphBuilder::new();
        let obj = b.parameter(0, Stamp::object_non_null());
        let load = b.load(obj, LocationIdentity::Field(0));
        let ret = b.return_value(None);
        let mut graph = b.finish();

        perform_replacement(&mut graph, load, None).unwrap();
        assert!(!graph.is_alive(load));
        assert_eq!(graph.node(graph.start()).next(), Some(ret));
        graph.verify().unwrap();
    }

    #[test]
    fn test_unlinked_fixed_replacement_takes_position() {
        let mut b = GraphBuilder::new();
        let obj = b.parameter(0, Stamp::object_non_null());
        let load = b.load(obj, LocationIdentity::Field(0));
        let ret = b.return_value(Some(load));
        let mut graph = b.finish();

        let fresh = graph.add(Operator::Load(LocationIdentity::Field(1)), &[obj]);
        perform_replacement(&mut graph, load, Some(fresh)).unwrap();
        assert_eq!(graph.node(graph.start()).next(), Some(fresh));
        assert_eq!(graph.node(fresh).next(), Some(ret));
        assert_eq!(graph.node(ret).input(0), Some(fresh));
        graph.verify().unwrap();
    }

    #[test]
    fn test_linked_fixed_replacement_unlinks_old() {
        let mut b = GraphBuilder::new();
        let obj = b.parameter(0, Stamp::object_non_null());
        let first = b.load(obj, LocationIdentity::Field(0));
        let second = b.load(obj, LocationIdentity::Field(0));
        let sum = b.add(first, second);
        let ret = b.return_value(Some(sum));
        let mut graph = b.finish();

        perform_replacement(&mut graph, second, Some(first)).unwrap();
        assert!(!graph.is_alive(second));
        assert_eq!(graph.node(first).next(), Some(ret));
        assert_eq!(graph.node(sum).inputs.to_vec(), vec![first, first]);
        graph.verify().unwrap();
    }

    #[test]
    fn test_control_sink_replacement_kills_rest() {
        let mut b = GraphBuilder::new();
        let obj = b.parameter(0, Stamp::object_non_null());
        let load = b.load(obj, LocationIdentity::Field(0));
        let later = b.load(obj, LocationIdentity::Field(1));
        let ret = b.return_value(Some(later));
        let mut graph = b.finish();

        let info = DeoptInfo {
            reason: DeoptReason::UnreachedCode,
            action: DeoptAction::InvalidateReprofile,
            speculation: Speculation::NONE,
        };
        let deopt = graph.add(Operator::Deoptimize(info), &[NodeId::INVALID]);
        perform_replacement(&mut graph, load, Some(deopt)).unwrap();
        assert_eq!(graph.node(graph.start()).next(), Some(deopt));
        assert!(!graph.is_alive(later));
        assert!(!graph.is_alive(ret));
        graph.verify().unwrap();
    }

    #[test]
    fn test_exception_edge_is_killed() {
        let mut b = GraphBuilder::new();
        let x = b.const_int(-4);
        let (invoke, exception) = b.invoke(CallTarget::Intrinsic(Intrinsic::Abs), None, &[x]);
        let ret = b.return_value(Some(invoke));
        b.switch_to(exception);
        let unwind = b.unwind(None);
        let mut graph = b.finish();

        let four = graph.const_int(4);
        perform_replacement(&mut graph, invoke, Some(four)).unwrap();
        assert!(!graph.is_alive(invoke));
        assert!(!graph.is_alive(exception));
        assert!(!graph.is_alive(unwind));
        assert_eq!(graph.node(ret).input(0), Some(four));
        let normal = graph.node(graph.start()).next().unwrap();
        assert_eq!(graph.node(normal).next(), Some(ret));
        graph.verify().unwrap();
    }

    #[test]
    fn test_split_replacement_is_contract_violation() {
        let mut b = GraphBuilder::new();
        let c = b.const_logic(true);
        let (t, _f) = b.if_then_else(c, crate::ir::operators::Probability::EVEN);
        let mut graph = b.finish();
        let split = graph.node(t).predecessor().unwrap();
        let err = perform_replacement(&mut graph, split, Some(c)).unwrap_err();
        assert_eq!(err.node(), Some(split));
    }
}
