//! Structured construction of Sea-of-Nodes graphs.
//!
//! The builder keeps a *cursor*: the last fixed node whose `next` is still
//! open. Fixed nodes are appended at the cursor; floating nodes are created
//! detached. Control-flow constructors close the cursor and hand back the
//! begin nodes of the new blocks, which callers reopen with `switch_to`.
//!
//! ```text
//!   Start ─► If ──► Begin(t) ─► ... ─► End ─┐
//!             └───► Begin(f) ─► ... ─► End ─┴► Merge ─► Return
//! ```
//!
//! Floating values are created with `Graph::add`, not deduplicated, so tests
//! can hand the optimizer redundant graphs.

use super::graph::Graph;
use super::graph_util::prev_begin;
use super::node::NodeId;
use super::operators::{
    ArithOp, BitwiseOp, CallTarget, CmpOp, ControlOp, DeoptInfo, GuardInfo, LocationIdentity,
    Operator, Probability,
};
use super::stamp::Stamp;

// =============================================================================
// Graph Builder
// =============================================================================

/// Builder for IR graphs.
pub struct GraphBuilder {
    /// The graph being built.
    graph: Graph,

    /// Last fixed node with an open `next`, `INVALID` once a block is closed.
    current: NodeId,
}

impl GraphBuilder {
    /// Create a builder positioned after `Start`.
    pub fn new() -> Self {
        let graph = Graph::new();
        let current = graph.start();
        GraphBuilder { graph, current }
    }

    /// Get the constructed graph.
    pub fn finish(self) -> Graph {
        self.graph
    }

    /// Get a reference to the graph.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Get a mutable reference to the graph.
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// The node new fixed nodes are appended to.
    pub fn current(&self) -> Option<NodeId> {
        self.current.valid()
    }

    /// Continue appending after `node`.
    pub fn switch_to(&mut self, node: NodeId) {
        self.current = node;
    }

    /// Link `node` at the cursor and advance the cursor if it has a `next`.
    fn append(&mut self, node: NodeId) -> NodeId {
        if self.current.is_valid() {
            self.graph.set_next(self.current, node);
        }
        self.current = if self.graph.op(node).has_next() {
            node
        } else {
            NodeId::INVALID
        };
        node
    }

    fn fixed(&mut self, op: Operator, inputs: &[NodeId]) -> NodeId {
        let node = self.graph.add(op, inputs);
        self.append(node)
    }

    // =========================================================================
    // Values
    // =========================================================================

    /// A method parameter with a known stamp.
    pub fn parameter(&mut self, index: u16, stamp: Stamp) -> NodeId {
        self.graph
            .add_with_stamp(Operator::Parameter(index), &[], stamp)
    }

    pub fn const_int(&mut self, value: i64) -> NodeId {
        self.graph.const_int(value)
    }

    pub fn const_logic(&mut self, value: bool) -> NodeId {
        self.graph.const_logic(value)
    }

    pub fn null(&mut self) -> NodeId {
        self.graph.null_constant()
    }

    /// Any binary floating operator.
    pub fn binary(&mut self, op: Operator, x: NodeId, y: NodeId) -> NodeId {
        self.graph.add(op, &[x, y])
    }

    pub fn add(&mut self, x: NodeId, y: NodeId) -> NodeId {
        self.binary(Operator::IntOp(ArithOp::Add), x, y)
    }

    pub fn sub(&mut self, x: NodeId, y: NodeId) -> NodeId {
        self.binary(Operator::IntOp(ArithOp::Sub), x, y)
    }

    pub fn mul(&mut self, x: NodeId, y: NodeId) -> NodeId {
        self.binary(Operator::IntOp(ArithOp::Mul), x, y)
    }

    pub fn neg(&mut self, x: NodeId) -> NodeId {
        self.graph.add(Operator::IntOp(ArithOp::Neg), &[x])
    }

    pub fn and(&mut self, x: NodeId, y: NodeId) -> NodeId {
        self.binary(Operator::Bitwise(BitwiseOp::And), x, y)
    }

    pub fn or(&mut self, x: NodeId, y: NodeId) -> NodeId {
        self.binary(Operator::Bitwise(BitwiseOp::Or), x, y)
    }

    pub fn xor(&mut self, x: NodeId, y: NodeId) -> NodeId {
        self.binary(Operator::Bitwise(BitwiseOp::Xor), x, y)
    }

    pub fn shl(&mut self, x: NodeId, amount: NodeId) -> NodeId {
        self.binary(Operator::Bitwise(BitwiseOp::Shl), x, amount)
    }

    pub fn not(&mut self, x: NodeId) -> NodeId {
        self.graph.add(Operator::Bitwise(BitwiseOp::Not), &[x])
    }

    // =========================================================================
    // Logic
    // =========================================================================

    pub fn int_eq(&mut self, x: NodeId, y: NodeId) -> NodeId {
        self.binary(Operator::IntCmp(CmpOp::Equals), x, y)
    }

    pub fn int_lt(&mut self, x: NodeId, y: NodeId) -> NodeId {
        self.binary(Operator::IntCmp(CmpOp::LessThan), x, y)
    }

    /// Unsigned `x < y`.
    pub fn int_below(&mut self, x: NodeId, y: NodeId) -> NodeId {
        self.binary(Operator::IntCmp(CmpOp::Below), x, y)
    }

    pub fn is_null(&mut self, x: NodeId) -> NodeId {
        self.graph.add(Operator::IsNull, &[x])
    }

    pub fn logic_not(&mut self, condition: NodeId) -> NodeId {
        self.graph.add(Operator::LogicNegation, &[condition])
    }

    /// Narrow `value` to `stamp`, optionally under `guard`.
    pub fn pi(&mut self, value: NodeId, stamp: Stamp, guard: Option<NodeId>) -> NodeId {
        self.graph
            .add(Operator::Pi(stamp), &[value, guard.unwrap_or(NodeId::INVALID)])
    }

    /// Interpreter state at `bci` capturing `values`.
    pub fn frame_state(&mut self, bci: u32, values: &[NodeId]) -> NodeId {
        let mut inputs = Vec::with_capacity(values.len() + 1);
        inputs.push(NodeId::INVALID);
        inputs.extend_from_slice(values);
        self.graph.add(Operator::FrameState(bci), &inputs)
    }

    // =========================================================================
    // Guards
    // =========================================================================

    /// Deoptimize unless `condition` holds (or fails, when negated).
    pub fn fixed_guard(&mut self, condition: NodeId, info: GuardInfo) -> NodeId {
        self.fixed(Operator::FixedGuard(info), &[condition])
    }

    /// A floating guard anchored at the begin of the current block.
    pub fn guard(&mut self, condition: NodeId, info: GuardInfo) -> NodeId {
        let anchor = self
            .current
            .valid()
            .and_then(|c| prev_begin(&self.graph, c))
            .unwrap_or(NodeId::INVALID);
        self.graph.add(Operator::Guard(info), &[condition, anchor])
    }

    // =========================================================================
    // Memory
    // =========================================================================

    pub fn load(&mut self, object: NodeId, location: LocationIdentity) -> NodeId {
        self.fixed(Operator::Load(location), &[object])
    }

    /// A load that may only execute once `guard` has passed.
    pub fn guarded_load(
        &mut self,
        object: NodeId,
        location: LocationIdentity,
        guard: NodeId,
    ) -> NodeId {
        self.fixed(Operator::Load(location), &[object, guard])
    }

    pub fn store(&mut self, object: NodeId, value: NodeId, location: LocationIdentity) -> NodeId {
        self.fixed(Operator::Store(location), &[object, value])
    }

    // =========================================================================
    // Control Flow
    // =========================================================================

    /// A plain `Begin` in the middle of a block.
    pub fn begin(&mut self) -> NodeId {
        self.fixed(Operator::control(ControlOp::Begin), &[])
    }

    /// Branch on `condition`; returns the `(true, false)` begins.
    pub fn if_then_else(&mut self, condition: NodeId, probability: Probability) -> (NodeId, NodeId) {
        let split = self.fixed(Operator::If(probability), &[condition]);
        let t = self.graph.add(Operator::control(ControlOp::Begin), &[]);
        let f = self.graph.add(Operator::control(ControlOp::Begin), &[]);
        self.graph.set_successor(split, 0, t);
        self.graph.set_successor(split, 1, f);
        (t, f)
    }

    /// Switch on `value`; one begin per key, then the default begin.
    pub fn switch(&mut self, value: NodeId, keys: &[i64]) -> Vec<NodeId> {
        let split = self.fixed(Operator::IntegerSwitch(keys.into()), &[value]);
        (0..=keys.len())
            .map(|i| {
                let begin = self.graph.add(Operator::control(ControlOp::Begin), &[]);
                self.graph.set_successor(split, i, begin);
                begin
            })
            .collect()
    }

    /// Close the current block with a forward end.
    pub fn end(&mut self) -> NodeId {
        self.fixed(Operator::control(ControlOp::End), &[])
    }

    /// Join `ends`; the cursor moves to the merge.
    pub fn merge(&mut self, ends: &[NodeId]) -> NodeId {
        let merge = self.graph.add(Operator::control(ControlOp::Merge), ends);
        self.current = merge;
        merge
    }

    pub fn phi(&mut self, merge: NodeId, values: &[NodeId]) -> NodeId {
        let mut inputs = Vec::with_capacity(values.len() + 1);
        inputs.push(merge);
        inputs.extend_from_slice(values);
        let stamp = values
            .iter()
            .map(|&v| self.graph.stamp(v))
            .reduce(|acc, s| acc.meet(&s))
            .unwrap_or_else(Stamp::int_unrestricted);
        self.graph.add_with_stamp(Operator::Phi, &inputs, stamp)
    }

    /// Enter a loop through a fresh forward end.
    pub fn loop_begin(&mut self) -> NodeId {
        let entry = self.end();
        let header = self
            .graph
            .add(Operator::control(ControlOp::LoopBegin), &[entry]);
        self.current = header;
        header
    }

    /// A loop phi with its entry value; back-edge values come with `loop_end`.
    pub fn loop_phi(&mut self, header: NodeId, initial: NodeId) -> NodeId {
        let stamp = self.graph.stamp(initial).unrestricted();
        self.graph
            .add_with_stamp(Operator::Phi, &[header, initial], stamp)
    }

    /// Close the current block with a back edge, feeding each phi its value.
    pub fn loop_end(&mut self, header: NodeId, values: &[(NodeId, NodeId)]) -> NodeId {
        let end = self.fixed(Operator::control(ControlOp::LoopEnd), &[]);
        self.graph.push_input(header, end);
        for &(phi, value) in values {
            self.graph.push_input(phi, value);
        }
        end
    }

    /// Branch on `condition`; the false side leaves loop `header`.
    ///
    /// Returns `(body, exit)`.
    pub fn if_loop_exit(
        &mut self,
        condition: NodeId,
        header: NodeId,
        probability: Probability,
    ) -> (NodeId, NodeId) {
        let split = self.fixed(Operator::If(probability), &[condition]);
        let body = self.graph.add(Operator::control(ControlOp::Begin), &[]);
        let exit = self
            .graph
            .add(Operator::control(ControlOp::LoopExit), &[header]);
        self.graph.set_successor(split, 0, body);
        self.graph.set_successor(split, 1, exit);
        (body, exit)
    }

    /// Call `target`; the cursor continues on the normal path.
    ///
    /// Returns the invoke and the begin of its exception path.
    pub fn invoke(
        &mut self,
        target: CallTarget,
        state: Option<NodeId>,
        args: &[NodeId],
    ) -> (NodeId, NodeId) {
        let mut inputs = Vec::with_capacity(args.len() + 1);
        inputs.push(state.unwrap_or(NodeId::INVALID));
        inputs.extend_from_slice(args);
        let invoke = self.fixed(Operator::Invoke(target), &inputs);
        let next = self.graph.add(Operator::control(ControlOp::Begin), &[]);
        let exception = self
            .graph
            .add(Operator::control(ControlOp::ExceptionBegin), &[]);
        self.graph.set_successor(invoke, 0, next);
        self.graph.set_successor(invoke, 1, exception);
        self.current = next;
        (invoke, exception)
    }

    pub fn deoptimize(&mut self, info: DeoptInfo) -> NodeId {
        self.fixed(Operator::Deoptimize(info), &[NodeId::INVALID])
    }

    pub fn return_value(&mut self, value: Option<NodeId>) -> NodeId {
        let inputs: &[NodeId] = match &value {
            Some(v) => std::slice::from_ref(v),
            None => &[],
        };
        self.fixed(Operator::control(ControlOp::Return), inputs)
    }

    pub fn unwind(&mut self, exception: Option<NodeId>) -> NodeId {
        let inputs: &[NodeId] = match &exception {
            Some(v) => std::slice::from_ref(v),
            None => &[],
        };
        self.fixed(Operator::control(ControlOp::Unwind), inputs)
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::operators::{DeoptAction, DeoptReason, Intrinsic};

    #[test]
    fn test_straight_line_chain() {
        let mut b = GraphBuilder::new();
        let obj = b.parameter(0, Stamp::object_non_null());
        let load = b.load(obj, LocationIdentity::Field(0));
        let ret = b.return_value(Some(load));
        let graph = b.finish();

        assert_eq!(graph.node(graph.start()).next(), Some(load));
        assert_eq!(graph.node(load).next(), Some(ret));
        graph.verify().unwrap();
    }

    #[test]
    fn test_diamond_with_phi() {
        let mut b = GraphBuilder::new();
        let p = b.parameter(0, Stamp::int_unrestricted());
        let zero = b.const_int(0);
        let cond = b.int_lt(p, zero);
        let (t, f) = b.if_then_else(cond, Probability::EVEN);
        b.switch_to(t);
        let te = b.end();
        b.switch_to(f);
        let fe = b.end();
        let merge = b.merge(&[te, fe]);
        let phi = b.phi(merge, &[p, zero]);
        b.return_value(Some(phi));
        let graph = b.finish();

        assert_eq!(graph.phis_of(merge), vec![phi]);
        assert_eq!(graph.merge_of_end(te), Some(merge));
        graph.verify().unwrap();
    }

    #[test]
    fn test_loop_shape() {
        let mut b = GraphBuilder::new();
        let n = b.parameter(0, Stamp::int_unrestricted());
        let zero = b.const_int(0);
        let one = b.const_int(1);
        let header = b.loop_begin();
        let i = b.loop_phi(header, zero);
        let cond = b.int_lt(i, n);
        let (body, exit) = b.if_loop_exit(cond, header, Probability::EVEN);
        b.switch_to(body);
        let next = b.add(i, one);
        let back = b.loop_end(header, &[(i, next)]);
        b.switch_to(exit);
        b.return_value(Some(i));
        let graph = b.finish();

        assert_eq!(graph.node(header).inputs.len(), 2);
        assert_eq!(graph.node(header).input(1), Some(back));
        assert_eq!(graph.node(i).inputs.to_vec(), vec![header, zero, next]);
        graph.verify().unwrap();
    }

    #[test]
    fn test_invoke_and_guards() {
        let mut b = GraphBuilder::new();
        let x = b.const_int(-3);
        let (invoke, exception) = b.invoke(CallTarget::Intrinsic(Intrinsic::Abs), None, &[x]);
        let normal = b.current().unwrap();
        let cond = b.is_null(x);
        let info = GuardInfo::new(DeoptReason::NullCheck, DeoptAction::InvalidateReprofile);
        let guard = b.guard(cond, info);
        b.return_value(Some(invoke));
        b.switch_to(exception);
        b.unwind(None);
        let graph = b.finish();

        assert_eq!(graph.node(invoke).successors.as_slice(), &[normal, exception]);
        assert_eq!(graph.node(guard).input(1), Some(normal));
        graph.verify().unwrap();
    }
}
