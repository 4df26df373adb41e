//! End-to-end behaviour of the passes on small method graphs.

use prism_opt::ir::{
    ControlFlowView, DeoptAction, DeoptReason, Graph, GraphBuilder, GuardInfo, LocationIdentity,
    NodeFlags, NodeId, Operator, Probability, RewriteKind, Stamp,
};
use prism_opt::opt::conditional::InfoStack;
use prism_opt::opt::{Canonicalizer, ConditionalElimination, DominatorGvn};
use prism_opt::optimize_full;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn range_check() -> GuardInfo {
    GuardInfo::new(DeoptReason::RangeCheck, DeoptAction::InvalidateReprofile)
}

fn live_ops(graph: &Graph) -> Vec<Operator> {
    graph.iter().map(|(_, n)| n.op.clone()).collect()
}

// =============================================================================
// Canonicalization
// =============================================================================

#[test]
fn test_constant_addition_folds_and_drops_operands() {
    init_logging();
    let mut b = GraphBuilder::new();
    let c1 = b.const_int(2);
    let c2 = b.const_int(3);
    let a = b.add(c1, c2);
    let ret = b.return_value(Some(a));
    let mut graph = b.finish();

    assert!(Canonicalizer::new().apply(&mut graph).unwrap());
    let result = graph.node(ret).input(0).unwrap();
    assert_eq!(graph.node(result).as_int(), Some(5));
    assert!(!graph.is_alive(a));
    assert!(!graph.is_alive(c1));
    assert!(!graph.is_alive(c2));
    graph.verify().unwrap();
}

#[test]
fn test_canonicalization_is_idempotent() {
    let mut b = GraphBuilder::new();
    let p = b.parameter(0, Stamp::int_unrestricted());
    let obj = b.parameter(1, Stamp::object());
    let zero = b.const_int(0);
    let four = b.const_int(4);
    let scaled = b.mul(p, four);
    let shifted = b.add(scaled, zero);
    let is_null = b.is_null(obj);
    let (t, f) = b.if_then_else(is_null, Probability::UNLIKELY);
    b.switch_to(t);
    b.return_value(Some(zero));
    b.switch_to(f);
    let negated = b.neg(shifted);
    let twice = b.neg(negated);
    b.return_value(Some(twice));
    let mut graph = b.finish();

    let mut canon = Canonicalizer::new();
    assert!(canon.apply(&mut graph).unwrap());
    let live_before = graph.live_ids();
    let log_len = graph.log().len();

    assert!(!canon.apply(&mut graph).unwrap());
    assert_eq!(graph.live_ids(), live_before);
    assert_eq!(graph.log().len(), log_len);
}

#[test]
fn test_identical_floating_nodes_collapse() {
    let mut b = GraphBuilder::new();
    let p = b.parameter(0, Stamp::int_unrestricted());
    let q = b.parameter(1, Stamp::int_unrestricted());
    let x1 = b.xor(p, q);
    let x2 = b.xor(p, q);
    let lhs = b.sub(x1, p);
    let rhs = b.sub(x2, q);
    let total = b.mul(lhs, rhs);
    b.return_value(Some(total));
    let mut graph = b.finish();

    Canonicalizer::new().apply(&mut graph).unwrap();
    let survivors: Vec<NodeId> = [x1, x2]
        .into_iter()
        .filter(|&x| graph.is_alive(x))
        .collect();
    assert_eq!(survivors.len(), 1);
    let keep = survivors[0];
    assert_eq!(graph.node(lhs).input(0), Some(keep));
    assert_eq!(graph.node(rhs).input(0), Some(keep));
    graph.verify().unwrap();
}

/// `for (i = 0; i < n; i++) { j++ }`, returning `j` when `escape`.
fn loop_with_counter(escape: bool) -> (Graph, NodeId, NodeId) {
    let mut b = GraphBuilder::new();
    let n = b.parameter(0, Stamp::int_unrestricted());
    let zero = b.const_int(0);
    let one = b.const_int(1);
    let header = b.loop_begin();
    let i = b.loop_phi(header, zero);
    let j = b.loop_phi(header, zero);
    let cond = b.int_lt(i, n);
    let (_, exit) = b.if_loop_exit(cond, header, Probability::from_basis_points(9_000));
    let next_i = b.add(i, one);
    let next_j = b.add(j, one);
    b.loop_end(header, &[(i, next_i), (j, next_j)]);
    b.switch_to(exit);
    b.return_value(if escape { Some(j) } else { None });
    (b.finish(), i, j)
}

#[test]
fn test_dead_loop_phi_cycle_removed() {
    let (mut graph, i, j) = loop_with_counter(false);
    let mut canon = Canonicalizer::new();
    canon.apply(&mut graph).unwrap();
    assert!(!graph.is_alive(j));
    assert!(graph.is_alive(i));
    assert_eq!(canon.stats().dead_phi_cycles, 1);
    assert_eq!(graph.log().count(RewriteKind::DeadPhiCycle), 1);
    graph.verify().unwrap();
}

#[test]
fn test_loop_phi_with_external_usage_kept() {
    let (mut graph, i, j) = loop_with_counter(true);
    Canonicalizer::new().apply(&mut graph).unwrap();
    assert!(graph.is_alive(i));
    assert!(graph.is_alive(j));
}

// =============================================================================
// Conditional elimination
// =============================================================================

/// `if (x < 0) deopt; guard(!(x < 0))`, with a floating guard.
fn branch_then_floating_guard(x_stamp: Stamp) -> (Graph, NodeId, NodeId) {
    let mut b = GraphBuilder::new();
    let x = b.parameter(0, x_stamp);
    let obj = b.parameter(1, Stamp::object_non_null());
    let zero = b.const_int(0);
    let c1 = b.int_lt(x, zero);
    let (t, f) = b.if_then_else(c1, Probability::UNLIKELY);
    b.switch_to(t);
    b.deoptimize(range_check().deopt_info());
    b.switch_to(f);
    let c2 = b.int_lt(x, zero);
    let guard = b.guard(c2, range_check().negated());
    let load = b.guarded_load(obj, LocationIdentity::Init, guard);
    let ret = b.return_value(Some(load));
    (b.finish(), guard, ret)
}

#[test]
fn test_dominating_branch_proves_later_guard() {
    init_logging();
    let (mut graph, guard, _) = branch_then_floating_guard(Stamp::int_unrestricted());

    let mut ce = ConditionalElimination::new();
    assert!(ce.apply(&mut graph).unwrap());
    assert!(!graph.is_alive(guard));
    assert_eq!(ce.stats().guards_eliminated, 1);
    assert_eq!(graph.log().count(RewriteKind::GuardElimination), 1);
    graph.verify().unwrap();
}

#[test]
fn test_pipeline_removes_branch_and_guard_for_non_negative_value() {
    let (mut graph, guard, ret) = branch_then_floating_guard(Stamp::int_non_negative());

    optimize_full(&mut graph).unwrap();
    assert!(!graph.is_alive(guard));
    assert!(graph.is_alive(ret));
    let ops = live_ops(&graph);
    assert!(!ops.iter().any(|op| matches!(op, Operator::If(_))));
    assert!(!ops.iter().any(|op| matches!(op, Operator::Deoptimize(_))));
}

#[test]
fn test_phi_narrowing_only_narrows() {
    let mut b = GraphBuilder::new();
    let p = b.parameter(0, Stamp::int_range(-100, 100));
    let zero = b.const_int(0);
    let five = b.const_int(5);
    let negative = b.int_lt(p, zero);
    let (t, f) = b.if_then_else(negative, Probability::EVEN);
    b.switch_to(t);
    let e1 = b.end();
    b.switch_to(f);
    let e2 = b.end();
    let merge = b.merge(&[e1, e2]);
    let phi = b.phi(merge, &[five, p]);
    let ret = b.return_value(Some(phi));
    let mut graph = b.finish();
    let before = graph.stamp(phi);

    ConditionalElimination::new().apply(&mut graph).unwrap();
    let after = graph.stamp(graph.node(ret).input(0).unwrap());
    assert!(after.is_subset_of(&before));
    assert_eq!(after, Stamp::int_range(0, 100));
}

#[test]
fn test_info_stack_rewinds_to_mark() {
    let mut b = GraphBuilder::new();
    let x = b.parameter(0, Stamp::int_unrestricted());
    let graph = b.finish();
    let guard = graph.start();

    let mut infos = InfoStack::new();
    let original = infos.best_stamp(&graph, x);

    let outer = infos.mark();
    infos.push_info(x, Stamp::int_range(0, 100), guard);
    infos.push_condition(x, false, guard);
    let after_outer = infos.best_stamp(&graph, x);

    let inner = infos.mark();
    infos.push_info(x, Stamp::int_range(10, 20), guard);
    infos.push_info(x, Stamp::int_constant(15), guard);
    assert_eq!(infos.best_stamp(&graph, x), Stamp::int_constant(15));

    infos.rewind(inner);
    assert_eq!(infos.best_stamp(&graph, x), after_outer);
    assert_eq!(infos.conditions().len(), 1);

    infos.rewind(outer);
    assert_eq!(infos.best_stamp(&graph, x), original);
    assert!(infos.conditions().is_empty());
    assert!(infos.is_empty());
}

// =============================================================================
// Memory-aware value numbering
// =============================================================================

/// A read before a loop and the same read in the loop body; the body writes
/// `write` each iteration.
fn read_before_and_in_loop(write: LocationIdentity) -> (Graph, NodeId, NodeId) {
    let mut b = GraphBuilder::new();
    let obj = b.parameter(0, Stamp::object_non_null());
    let n = b.parameter(1, Stamp::int_unrestricted());
    let zero = b.const_int(0);
    let one = b.const_int(1);
    let before = b.load(obj, LocationIdentity::Field(0));
    let header = b.loop_begin();
    let i = b.loop_phi(header, zero);
    let acc = b.loop_phi(header, zero);
    let cond = b.int_lt(i, n);
    let (body, exit) = b.if_loop_exit(cond, header, Probability::from_basis_points(9_000));
    b.switch_to(body);
    b.store(obj, i, write);
    let inside = b.load(obj, LocationIdentity::Field(0));
    let next_acc = b.add(acc, inside);
    let next_i = b.add(i, one);
    b.loop_end(header, &[(i, next_i), (acc, next_acc)]);
    b.switch_to(exit);
    let result = b.add(acc, before);
    b.return_value(Some(result));
    (b.finish(), before, inside)
}

#[test]
fn test_read_across_loop_header_replaced() {
    init_logging();
    let (mut graph, before, inside) = read_before_and_in_loop(LocationIdentity::Field(1));

    let mut gvn = DominatorGvn::new();
    assert!(gvn.apply(&mut graph).unwrap());
    assert!(!graph.is_alive(inside));
    assert!(graph.is_alive(before));
    assert_eq!(gvn.stats().reads_replaced, 1);
    assert_eq!(graph.log().count(RewriteKind::MemoryValueNumbering), 1);
    graph.verify().unwrap();
}

#[test]
fn test_read_not_replaced_when_loop_writes_location() {
    let (mut graph, _, inside) = read_before_and_in_loop(LocationIdentity::Field(0));
    let mut gvn = DominatorGvn::new();
    assert!(!gvn.apply(&mut graph).unwrap());
    assert!(graph.is_alive(inside));
}

#[test]
fn test_read_not_replaced_when_loop_writes_anything() {
    let (mut graph, _, inside) = read_before_and_in_loop(LocationIdentity::Any);
    DominatorGvn::new().apply(&mut graph).unwrap();
    assert!(graph.is_alive(inside));
}

#[test]
fn test_read_after_loop_sees_loop_writes() {
    let mut b = GraphBuilder::new();
    let obj = b.parameter(0, Stamp::object_non_null());
    let n = b.parameter(1, Stamp::int_unrestricted());
    let zero = b.const_int(0);
    let one = b.const_int(1);
    let before = b.load(obj, LocationIdentity::Field(0));
    let header = b.loop_begin();
    let i = b.loop_phi(header, zero);
    let cond = b.int_lt(i, n);
    let (body, exit) = b.if_loop_exit(cond, header, Probability::from_basis_points(9_000));
    b.switch_to(body);
    b.store(obj, i, LocationIdentity::Field(0));
    let next_i = b.add(i, one);
    b.loop_end(header, &[(i, next_i)]);
    b.switch_to(exit);
    let after = b.load(obj, LocationIdentity::Field(0));
    let sum = b.add(before, after);
    b.return_value(Some(sum));
    let mut graph = b.finish();

    DominatorGvn::new().apply(&mut graph).unwrap();
    assert!(graph.is_alive(after));
    assert_eq!(graph.node(sum).inputs.to_vec(), vec![before, after]);
}

#[test]
fn test_invariant_read_hoisted_before_loop() {
    init_logging();
    let mut b = GraphBuilder::new();
    let obj = b.parameter(0, Stamp::object_non_null());
    let n = b.parameter(1, Stamp::int_unrestricted());
    let zero = b.const_int(0);
    let one = b.const_int(1);
    let header = b.loop_begin();
    let i = b.loop_phi(header, zero);
    let limit = b.load(obj, LocationIdentity::Field(3));
    let bound = b.sub(limit, n);
    let cond = b.int_lt(i, bound);
    let (body, exit) = b.if_loop_exit(cond, header, Probability::from_basis_points(9_000));
    b.switch_to(body);
    b.store(obj, i, LocationIdentity::ArrayElement);
    let next_i = b.add(i, one);
    b.loop_end(header, &[(i, next_i)]);
    b.switch_to(exit);
    b.return_value(Some(i));
    let mut graph = b.finish();
    let forward_end = graph.node(header).input(0).unwrap();

    let stats = optimize_full(&mut graph).unwrap();
    assert!(stats.changes >= 1);
    assert!(graph.is_alive(limit));
    assert_eq!(graph.node(limit).next(), Some(forward_end));
    assert!(graph.node(limit).flags.contains(NodeFlags::HOISTED));
    assert_eq!(graph.log().count(RewriteKind::LoopInvariantMotion), 1);

    let view = ControlFlowView::compute(&graph);
    let block = view.cfg.block_of(limit).unwrap();
    assert!(!view.loops.is_in_loop(block));
}
