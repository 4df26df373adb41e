//! IR operator definitions for the Sea-of-Nodes IR.
//!
//! Operators are organized by category:
//! - **Control**: begins, merges, ends, splits and control sinks
//! - **Guards**: fixed and floating speculation checks
//! - **Memory**: field/array loads and stores with location identities
//! - **Calls**: invokes with an exception edge
//! - **Values**: constants, parameters, integer arithmetic, bitwise ops
//! - **Logic**: comparisons, null checks, negation
//! - **SSA**: phis, narrowing pis and frame states
//!
//! Each operator carries the semantic information the optimizer needs:
//! - Fixed vs. floating, and the shape of its control successors
//! - Typed input positions
//! - Commutativity and value-numberability (for GVN)
//! - Memory effects (location read / location killed)
//! - For logic operators: predicate folding and the stamps implied on operands

use super::stamp::{IntegerStamp, ObjectStamp, Stamp, TriState};

// =============================================================================
// Input Types
// =============================================================================

/// The kind of dependency an input edge expresses.
///
/// Replacement at usages can be restricted to one input type, so that e.g.
/// a guard is only substituted where a guard is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InputType {
    /// Plain data value.
    Value = 0,
    /// Logic value consumed by a branch or guard.
    Condition = 1,
    /// Guard dependency of a narrowed or guarded value.
    Guard = 2,
    /// Memory state.
    Memory = 3,
    /// Control anchor of a floating node.
    Anchor = 4,
    /// Structural association (phi to merge, end to merge, exit to loop).
    Association = 5,
    /// Extension data.
    Extension = 6,
    /// Frame state for deoptimization.
    State = 7,
}

// =============================================================================
// Control Shape
// =============================================================================

/// How a node participates in control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlShape {
    /// No control position.
    Floating,
    /// Fixed, with exactly one successor (`next`).
    WithNext,
    /// Fixed, with a normal `next` and an exception successor.
    WithException,
    /// Fixed, with two or more successors of which exactly one is taken.
    Split,
    /// Forward or loop end; its merge is found through usages.
    End,
    /// Never falls through.
    Sink,
}

// =============================================================================
// Branch Probability
// =============================================================================

/// Probability of a split taking its first successor, in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Probability(u16);

impl Probability {
    pub const NEVER: Probability = Probability(0);
    pub const EVEN: Probability = Probability(5_000);
    pub const ALWAYS: Probability = Probability(10_000);
    /// Probability used for branches leading to deoptimization.
    pub const UNLIKELY: Probability = Probability(1);

    pub fn from_basis_points(points: u16) -> Self {
        Probability(points.min(10_000))
    }

    pub fn basis_points(self) -> u16 {
        self.0
    }

    pub fn as_fraction(self) -> f64 {
        self.0 as f64 / 10_000.0
    }

    /// Probability of the other successor.
    pub fn negate(self) -> Self {
        Probability(10_000 - self.0)
    }
}

// =============================================================================
// Deoptimization Metadata
// =============================================================================

/// Why a guard or deoptimization exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeoptReason {
    NullCheck = 0,
    BoundsCheck = 1,
    TypeCheck = 2,
    RangeCheck = 3,
    UnreachedCode = 4,
    TransferToInterpreter = 5,
}

/// What the runtime does when a deoptimization is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeoptAction {
    None = 0,
    RecompileIfTooManyDeopts = 1,
    InvalidateReprofile = 2,
    InvalidateRecompile = 3,
}

impl DeoptAction {
    /// Combine the actions of two guards folded into one.
    ///
    /// Only identical actions and the reprofile/recompile pair merge; any
    /// other combination refuses, and the fold is skipped.
    pub fn merge(self, other: DeoptAction) -> Option<DeoptAction> {
        match (self, other) {
            (a, b) if a == b => Some(a),
            (DeoptAction::InvalidateRecompile, DeoptAction::InvalidateReprofile)
            | (DeoptAction::InvalidateReprofile, DeoptAction::InvalidateRecompile) => {
                Some(DeoptAction::InvalidateReprofile)
            }
            _ => None,
        }
    }
}

/// Identifier of the speculation a guard relies on, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Speculation(pub Option<u32>);

impl Speculation {
    pub const NONE: Speculation = Speculation(None);
}

/// Deoptimization data carried by guards.
///
/// A guard with `negated == false` passes when its condition is true; a
/// negated guard passes when it is false.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GuardInfo {
    pub reason: DeoptReason,
    pub action: DeoptAction,
    pub speculation: Speculation,
    pub negated: bool,
}

impl GuardInfo {
    pub fn new(reason: DeoptReason, action: DeoptAction) -> Self {
        GuardInfo {
            reason,
            action,
            speculation: Speculation::NONE,
            negated: false,
        }
    }

    pub fn negated(self) -> Self {
        GuardInfo {
            negated: !self.negated,
            ..self
        }
    }

    pub fn deopt_info(&self) -> DeoptInfo {
        DeoptInfo {
            reason: self.reason,
            action: self.action,
            speculation: self.speculation,
        }
    }
}

/// Data of an unconditional deoptimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeoptInfo {
    pub reason: DeoptReason,
    pub action: DeoptAction,
    pub speculation: Speculation,
}

// =============================================================================
// Memory Locations
// =============================================================================

/// Abstract memory location category read or killed by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationIdentity {
    /// Every mutable location.
    Any,
    /// A specific field, identified by its slot number.
    Field(u32),
    /// Any array element.
    ArrayElement,
    /// Memory written only during initialization; never killed afterwards.
    Init,
}

impl LocationIdentity {
    #[inline]
    pub fn is_any(self) -> bool {
        self == LocationIdentity::Any
    }

    #[inline]
    pub fn is_immutable(self) -> bool {
        self == LocationIdentity::Init
    }

    /// Whether a kill of `self` may invalidate a read of `other`.
    pub fn overlaps(self, other: LocationIdentity) -> bool {
        if self.is_immutable() || other.is_immutable() {
            return false;
        }
        self.is_any() || other.is_any() || self == other
    }
}

// =============================================================================
// Calls
// =============================================================================

/// Call targets the optimizer can reason about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Intrinsic {
    Abs = 0,
    Max = 1,
    Min = 2,
}

impl Intrinsic {
    /// Evaluate on constant arguments.
    pub fn fold(self, args: &[i64]) -> Option<i64> {
        match (self, args) {
            (Intrinsic::Abs, [x]) => x.checked_abs(),
            (Intrinsic::Max, [x, y]) => Some(*x.max(y)),
            (Intrinsic::Min, [x, y]) => Some(*x.min(y)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallTarget {
    /// An opaque method; kills all memory and may throw.
    Method(u32),
    Intrinsic(Intrinsic),
}

// =============================================================================
// Control Flow Operators
// =============================================================================

/// Control flow operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlOp {
    /// Method entry.
    Start = 0,
    /// Block begin after a split or in straight-line code.
    Begin = 1,
    /// Block begin leaving a loop; input 0 is the loop begin.
    LoopExit = 2,
    /// Exception successor of an invoke.
    ExceptionBegin = 3,
    /// Control merge; inputs are the forward ends.
    Merge = 4,
    /// Loop header; input 0 is the forward end, the rest are loop ends.
    LoopBegin = 5,
    /// Forward end flowing into a merge.
    End = 6,
    /// Back edge flowing into a loop begin.
    LoopEnd = 7,
    /// Return from the method.
    Return = 8,
    /// Rethrow to the caller.
    Unwind = 9,
}

// =============================================================================
// Arithmetic, Bitwise, Comparison
// =============================================================================

/// Integer arithmetic operator kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ArithOp {
    Add = 0,
    Sub = 1,
    Mul = 2,
    /// Unary negation.
    Neg = 16,
}

impl ArithOp {
    #[inline]
    pub const fn is_commutative(self) -> bool {
        matches!(self, ArithOp::Add | ArithOp::Mul)
    }

    #[inline]
    pub const fn is_associative(self) -> bool {
        matches!(self, ArithOp::Add | ArithOp::Mul)
    }

    #[inline]
    pub const fn is_unary(self) -> bool {
        (self as u8) >= 16
    }

    /// Right identity element.
    pub const fn identity(self) -> Option<i64> {
        match self {
            ArithOp::Add | ArithOp::Sub => Some(0),
            ArithOp::Mul => Some(1),
            ArithOp::Neg => None,
        }
    }

    /// Wrapping evaluation on constants.
    pub fn fold(self, x: i64, y: i64) -> i64 {
        match self {
            ArithOp::Add => x.wrapping_add(y),
            ArithOp::Sub => x.wrapping_sub(y),
            ArithOp::Mul => x.wrapping_mul(y),
            ArithOp::Neg => x.wrapping_neg(),
        }
    }
}

/// Bitwise operator kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BitwiseOp {
    And = 0,
    Or = 1,
    Xor = 2,
    Shl = 3,
    /// Unary complement.
    Not = 16,
}

impl BitwiseOp {
    #[inline]
    pub const fn is_commutative(self) -> bool {
        matches!(self, BitwiseOp::And | BitwiseOp::Or | BitwiseOp::Xor)
    }

    #[inline]
    pub const fn is_associative(self) -> bool {
        self.is_commutative()
    }

    #[inline]
    pub const fn is_unary(self) -> bool {
        (self as u8) >= 16
    }

    pub fn fold(self, x: i64, y: i64) -> i64 {
        match self {
            BitwiseOp::And => x & y,
            BitwiseOp::Or => x | y,
            BitwiseOp::Xor => x ^ y,
            BitwiseOp::Shl => x.wrapping_shl((y & 63) as u32),
            BitwiseOp::Not => !x,
        }
    }
}

/// Integer comparison kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CmpOp {
    /// `x == y`
    Equals = 0,
    /// Signed `x < y`
    LessThan = 1,
    /// Unsigned `x < y`
    Below = 2,
}

impl CmpOp {
    #[inline]
    pub const fn is_commutative(self) -> bool {
        matches!(self, CmpOp::Equals)
    }

    pub fn fold(self, x: i64, y: i64) -> bool {
        match self {
            CmpOp::Equals => x == y,
            CmpOp::LessThan => x < y,
            CmpOp::Below => (x as u64) < (y as u64),
        }
    }

    /// Fold using operand stamps.
    pub fn fold_stamps(self, x: &IntegerStamp, y: &IntegerStamp) -> TriState {
        match self {
            CmpOp::Equals => x.fold_equals(y),
            CmpOp::LessThan => x.fold_less_than(y),
            CmpOp::Below => x.fold_below(y),
        }
    }
}

// =============================================================================
// Operator (Unified)
// =============================================================================

/// Unified operator representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operator {
    // Control flow
    /// Control operation without extra data.
    Control(ControlOp),
    /// Two-way branch; successors are `[true, false]`.
    If(Probability),
    /// Multi-way branch; successor `i` is taken for `keys[i]`, the last
    /// successor is the default.
    IntegerSwitch(Box<[i64]>),
    /// Unconditional deoptimization.
    Deoptimize(DeoptInfo),

    // Guards
    /// Guard fixed in the control chain.
    FixedGuard(GuardInfo),
    /// Guard floating below its anchor (input 1).
    Guard(GuardInfo),

    // Calls
    /// Call with `[next, exception]` successors.
    Invoke(CallTarget),

    // Memory
    /// Read of `object` (input 0), optionally guarded (input 1).
    Load(LocationIdentity),
    /// Write of `value` (input 1) into `object` (input 0).
    Store(LocationIdentity),

    // Values
    /// Method parameter.
    Parameter(u16),
    /// Integer constant.
    ConstInt(i64),
    /// The null reference.
    Null,
    /// Logic constant.
    ConstLogic(bool),
    /// Integer arithmetic.
    IntOp(ArithOp),
    /// Bitwise operation.
    Bitwise(BitwiseOp),

    // Logic
    /// Integer comparison.
    IntCmp(CmpOp),
    /// Null test.
    IsNull,
    /// Logical negation of a condition.
    LogicNegation,

    // SSA
    /// Value merge; input 0 is the merge, then one value per merge input.
    Phi,
    /// Value narrowed to a stamp under a guard (input 1).
    Pi(Stamp),
    /// Interpreter state at a bytecode index.
    FrameState(u32),
}

impl Operator {
    /// Shorthand for `Operator::Control`.
    #[inline]
    pub const fn control(op: ControlOp) -> Self {
        Operator::Control(op)
    }

    /// The control shape of this operator.
    pub fn shape(&self) -> ControlShape {
        match self {
            Operator::Control(op) => match op {
                ControlOp::Start
                | ControlOp::Begin
                | ControlOp::LoopExit
                | ControlOp::ExceptionBegin
                | ControlOp::Merge
                | ControlOp::LoopBegin => ControlShape::WithNext,
                ControlOp::End | ControlOp::LoopEnd => ControlShape::End,
                ControlOp::Return | ControlOp::Unwind => ControlShape::Sink,
            },
            Operator::If(_) | Operator::IntegerSwitch(_) => ControlShape::Split,
            Operator::Deoptimize(_) => ControlShape::Sink,
            Operator::FixedGuard(_) | Operator::Load(_) | Operator::Store(_) => {
                ControlShape::WithNext
            }
            Operator::Invoke(_) => ControlShape::WithException,
            _ => ControlShape::Floating,
        }
    }

    #[inline]
    pub fn is_fixed(&self) -> bool {
        self.shape() != ControlShape::Floating
    }

    #[inline]
    pub fn is_floating(&self) -> bool {
        self.shape() == ControlShape::Floating
    }

    /// Fixed node with a single `next` successor.
    #[inline]
    pub fn has_next(&self) -> bool {
        self.shape() == ControlShape::WithNext
    }

    /// Fixed node that starts a basic block.
    pub fn is_begin(&self) -> bool {
        matches!(
            self,
            Operator::Control(
                ControlOp::Start
                    | ControlOp::Begin
                    | ControlOp::LoopExit
                    | ControlOp::ExceptionBegin
                    | ControlOp::Merge
                    | ControlOp::LoopBegin
            )
        )
    }

    #[inline]
    pub fn is_merge(&self) -> bool {
        matches!(
            self,
            Operator::Control(ControlOp::Merge | ControlOp::LoopBegin)
        )
    }

    #[inline]
    pub fn is_loop_begin(&self) -> bool {
        matches!(self, Operator::Control(ControlOp::LoopBegin))
    }

    #[inline]
    pub fn is_end(&self) -> bool {
        self.shape() == ControlShape::End
    }

    #[inline]
    pub fn is_split(&self) -> bool {
        self.shape() == ControlShape::Split
    }

    #[inline]
    pub fn is_control_sink(&self) -> bool {
        self.shape() == ControlShape::Sink
    }

    #[inline]
    pub fn is_phi(&self) -> bool {
        matches!(self, Operator::Phi)
    }

    #[inline]
    pub fn is_guard(&self) -> bool {
        matches!(self, Operator::Guard(_) | Operator::FixedGuard(_))
    }

    /// Nodes with a side effect a deoptimization must not repeat.
    pub fn is_state_split(&self) -> bool {
        matches!(self, Operator::Invoke(_) | Operator::Store(_))
    }

    pub fn is_constant(&self) -> bool {
        matches!(
            self,
            Operator::ConstInt(_) | Operator::Null | Operator::ConstLogic(_)
        )
    }

    /// Operators producing a logic value.
    pub fn is_logic(&self) -> bool {
        matches!(
            self,
            Operator::IntCmp(_) | Operator::IsNull | Operator::LogicNegation | Operator::ConstLogic(_)
        )
    }

    /// Check if this operator is commutative.
    pub fn is_commutative(&self) -> bool {
        match self {
            Operator::IntOp(op) => op.is_commutative(),
            Operator::Bitwise(op) => op.is_commutative(),
            Operator::IntCmp(op) => op.is_commutative(),
            _ => false,
        }
    }

    /// Whether two nodes with this operator and equal inputs may be merged.
    ///
    /// Loads are value-numberable; the memory-aware pass decides when that
    /// is safe. Phis and frame states are identity-bearing.
    pub fn is_value_numberable(&self) -> bool {
        matches!(
            self,
            Operator::Parameter(_)
                | Operator::ConstInt(_)
                | Operator::Null
                | Operator::ConstLogic(_)
                | Operator::IntOp(_)
                | Operator::Bitwise(_)
                | Operator::IntCmp(_)
                | Operator::IsNull
                | Operator::LogicNegation
                | Operator::Pi(_)
                | Operator::Guard(_)
                | Operator::Load(_)
        )
    }

    /// The type of the input edge at `index`.
    pub fn input_type(&self, index: usize) -> InputType {
        match self {
            Operator::If(_)
            | Operator::FixedGuard(_)
            | Operator::LogicNegation => InputType::Condition,
            Operator::Guard(_) => {
                if index == 0 {
                    InputType::Condition
                } else {
                    InputType::Anchor
                }
            }
            Operator::Pi(_) | Operator::Load(_) => {
                if index == 0 {
                    InputType::Value
                } else {
                    InputType::Guard
                }
            }
            Operator::Phi => {
                if index == 0 {
                    InputType::Association
                } else {
                    InputType::Value
                }
            }
            Operator::Control(
                ControlOp::Merge | ControlOp::LoopBegin | ControlOp::LoopExit,
            ) => InputType::Association,
            Operator::Invoke(_) | Operator::Deoptimize(_) | Operator::FrameState(_) => {
                if index == 0 {
                    InputType::State
                } else {
                    InputType::Value
                }
            }
            _ => InputType::Value,
        }
    }

    /// The location this operator reads, if it is a memory read.
    pub fn location_read(&self) -> Option<LocationIdentity> {
        match self {
            Operator::Load(location) => Some(*location),
            _ => None,
        }
    }

    /// The location this operator may invalidate, if any.
    pub fn location_killed(&self) -> Option<LocationIdentity> {
        match self {
            Operator::Store(location) => Some(*location),
            Operator::Invoke(CallTarget::Method(_)) => Some(LocationIdentity::Any),
            _ => None,
        }
    }

    /// The stamp a freshly created node with this operator starts with.
    pub fn default_stamp(&self) -> Stamp {
        match self {
            Operator::ConstInt(v) => Stamp::int_constant(*v),
            Operator::Null => Stamp::null(),
            Operator::ConstLogic(true) => Stamp::tautology(),
            Operator::ConstLogic(false) => Stamp::contradiction(),
            Operator::Parameter(_)
            | Operator::IntOp(_)
            | Operator::Bitwise(_)
            | Operator::Load(_)
            | Operator::Invoke(_)
            | Operator::Phi => Stamp::int_unrestricted(),
            Operator::IntCmp(_) | Operator::IsNull | Operator::LogicNegation => Stamp::logic(),
            Operator::Pi(stamp) => *stamp,
            _ => Stamp::Void,
        }
    }

    // -------------------------------------------------------------------------
    // Predicate capabilities
    // -------------------------------------------------------------------------

    /// Fold a binary predicate over operand stamps.
    pub fn try_fold_binary(&self, x: &Stamp, y: &Stamp) -> TriState {
        match (self, x, y) {
            (Operator::IntCmp(cmp), Stamp::Integer(x), Stamp::Integer(y)) => cmp.fold_stamps(x, y),
            _ => TriState::Unknown,
        }
    }

    /// Fold a unary predicate over its operand stamp.
    pub fn try_fold_unary(&self, x: &Stamp) -> TriState {
        match (self, x) {
            (Operator::IsNull, Stamp::Object(s)) => s.fold_is_null(),
            _ => TriState::Unknown,
        }
    }

    /// The stamp `x` must have when this binary predicate evaluates to
    /// `!negated`.
    pub fn succeeding_stamp_for_x(&self, negated: bool, x: &Stamp, y: &Stamp) -> Option<Stamp> {
        let (Operator::IntCmp(cmp), Stamp::Integer(xs), Stamp::Integer(ys)) = (self, x, y) else {
            return None;
        };
        let implied = match (cmp, negated) {
            (CmpOp::Equals, false) => *ys,
            (CmpOp::Equals, true) => not_equal_stamp(xs, ys)?,
            // x < y
            (CmpOp::LessThan, false) => {
                IntegerStamp::new(i64::MIN, ys.upper().checked_sub(1)?)
            }
            // x >= y
            (CmpOp::LessThan, true) => IntegerStamp::new(ys.lower(), i64::MAX),
            // 0 <= x <u y holds for any non-negative y.
            (CmpOp::Below, false) if ys.is_positive() => {
                IntegerStamp::new(0, ys.upper().checked_sub(1)?)
            }
            _ => return None,
        };
        Some(Stamp::Integer(xs.join(&implied)))
    }

    /// The stamp `y` must have when this binary predicate evaluates to
    /// `!negated`.
    pub fn succeeding_stamp_for_y(&self, negated: bool, x: &Stamp, y: &Stamp) -> Option<Stamp> {
        let (Operator::IntCmp(cmp), Stamp::Integer(xs), Stamp::Integer(ys)) = (self, x, y) else {
            return None;
        };
        let implied = match (cmp, negated) {
            (CmpOp::Equals, false) => *xs,
            (CmpOp::Equals, true) => not_equal_stamp(ys, xs)?,
            // y > x
            (CmpOp::LessThan, false) => IntegerStamp::new(xs.lower().checked_add(1)?, i64::MAX),
            // y <= x
            (CmpOp::LessThan, true) => IntegerStamp::new(i64::MIN, xs.upper()),
            // A negative y is a large unsigned value, so only a y already
            // known to be non-negative is ordered like x.
            (CmpOp::Below, false) if xs.is_positive() && ys.is_positive() => {
                IntegerStamp::new(xs.lower().checked_add(1)?, i64::MAX)
            }
            _ => return None,
        };
        Some(Stamp::Integer(ys.join(&implied)))
    }

    /// The stamp the operand of a unary predicate must have when it
    /// evaluates to `!negated`.
    pub fn succeeding_stamp(&self, negated: bool, x: &Stamp) -> Option<Stamp> {
        match (self, x) {
            (Operator::IsNull, Stamp::Object(s)) => {
                let implied = if negated {
                    ObjectStamp::non_null()
                } else {
                    ObjectStamp::always_null()
                };
                Some(Stamp::Object(s.join(&implied)))
            }
            _ => None,
        }
    }

    /// Stamp of the switch value on the edge to `successor`.
    pub fn switch_successor_stamp(&self, successor: usize, value: &Stamp) -> Option<Stamp> {
        let (Operator::IntegerSwitch(keys), Stamp::Integer(current)) = (self, value) else {
            return None;
        };
        let key = *keys.get(successor)?;
        Some(Stamp::Integer(current.join(&IntegerStamp::constant(key))))
    }
}

/// `x != c` can only narrow `x` when `c` sits at one end of `x`'s range.
fn not_equal_stamp(x: &IntegerStamp, other: &IntegerStamp) -> Option<IntegerStamp> {
    let c = other.as_constant()?;
    if c == x.lower() && c != i64::MAX {
        Some(IntegerStamp::new(c + 1, x.upper()))
    } else if c == x.upper() && c != i64::MIN {
        Some(IntegerStamp::new(x.lower(), c - 1))
    } else {
        None
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_shapes() {
        assert_eq!(Operator::If(Probability::EVEN).shape(), ControlShape::Split);
        assert_eq!(
            Operator::Invoke(CallTarget::Method(0)).shape(),
            ControlShape::WithException
        );
        assert!(Operator::control(ControlOp::LoopBegin).is_merge());
        assert!(Operator::control(ControlOp::LoopEnd).is_end());
        assert!(Operator::Deoptimize(DeoptInfo {
            reason: DeoptReason::UnreachedCode,
            action: DeoptAction::None,
            speculation: Speculation::NONE,
        })
        .is_control_sink());
        assert!(Operator::IntOp(ArithOp::Add).is_floating());
    }

    #[test]
    fn test_input_types() {
        let guard = Operator::Guard(GuardInfo::new(DeoptReason::NullCheck, DeoptAction::None));
        assert_eq!(guard.input_type(0), InputType::Condition);
        assert_eq!(guard.input_type(1), InputType::Anchor);
        assert_eq!(Operator::Phi.input_type(0), InputType::Association);
        assert_eq!(Operator::Phi.input_type(2), InputType::Value);
        assert_eq!(
            Operator::Pi(Stamp::int_non_negative()).input_type(1),
            InputType::Guard
        );
    }

    #[test]
    fn test_location_overlap() {
        let f = LocationIdentity::Field(1);
        let g = LocationIdentity::Field(2);
        assert!(f.overlaps(f));
        assert!(!f.overlaps(g));
        assert!(LocationIdentity::Any.overlaps(g));
        assert!(!LocationIdentity::Any.overlaps(LocationIdentity::Init));
        assert_eq!(
            Operator::Invoke(CallTarget::Method(3)).location_killed(),
            Some(LocationIdentity::Any)
        );
        assert_eq!(
            Operator::Invoke(CallTarget::Intrinsic(Intrinsic::Abs)).location_killed(),
            None
        );
    }

    #[test]
    fn test_deopt_action_merge() {
        let none = DeoptAction::None;
        assert_eq!(none.merge(none), Some(none));
        assert_eq!(
            DeoptAction::InvalidateRecompile.merge(DeoptAction::InvalidateReprofile),
            Some(DeoptAction::InvalidateReprofile)
        );
        assert_eq!(none.merge(DeoptAction::InvalidateRecompile), None);
    }

    #[test]
    fn test_less_than_succeeding_stamps() {
        let lt = Operator::IntCmp(CmpOp::LessThan);
        let x = Stamp::int_unrestricted();
        let zero = Stamp::int_constant(0);

        // x < 0
        assert_eq!(
            lt.succeeding_stamp_for_x(false, &x, &zero),
            Some(Stamp::int_range(i64::MIN, -1))
        );
        // !(x < 0)
        assert_eq!(
            lt.succeeding_stamp_for_x(true, &x, &zero),
            Some(Stamp::int_range(0, i64::MAX))
        );
        // !(0 < y) => y <= 0
        assert_eq!(
            lt.succeeding_stamp_for_y(true, &zero, &x),
            Some(Stamp::int_range(i64::MIN, 0))
        );
    }

    #[test]
    fn test_below_succeeding_stamps_for_x() {
        let below = Operator::IntCmp(CmpOp::Below);
        let x = Stamp::int_unrestricted();

        // x <u 10 pins x to [0, 9].
        assert_eq!(
            below.succeeding_stamp_for_x(false, &x, &Stamp::int_range(0, 10)),
            Some(Stamp::int_range(0, 9))
        );
        // A y that may be negative bounds nothing.
        assert_eq!(below.succeeding_stamp_for_x(false, &x, &Stamp::int_range(-5, 10)), None);
        assert_eq!(below.succeeding_stamp_for_x(true, &x, &Stamp::int_range(0, 10)), None);
    }

    #[test]
    fn test_below_succeeding_stamps_for_y() {
        let below = Operator::IntCmp(CmpOp::Below);
        let x = Stamp::int_range(0, 10);

        // 0 <u -1 holds, so an unrestricted y stays unrestricted.
        assert_eq!(below.succeeding_stamp_for_y(false, &x, &Stamp::int_unrestricted()), None);
        assert_eq!(below.succeeding_stamp_for_y(false, &x, &Stamp::int_range(-3, 20)), None);
        // A negative x says nothing about y either.
        assert_eq!(
            below.succeeding_stamp_for_y(false, &Stamp::int_range(-4, 10), &Stamp::int_range(0, 20)),
            None
        );
        // Both sides non-negative: y > x.lower.
        assert_eq!(
            below.succeeding_stamp_for_y(false, &x, &Stamp::int_range(0, 20)),
            Some(Stamp::int_range(1, 20))
        );
    }

    #[test]
    fn test_not_equals_trims_range_end() {
        let eq = Operator::IntCmp(CmpOp::Equals);
        let x = Stamp::int_range(0, 10);
        assert_eq!(
            eq.succeeding_stamp_for_x(true, &x, &Stamp::int_constant(0)),
            Some(Stamp::int_range(1, 10))
        );
        assert_eq!(
            eq.succeeding_stamp_for_x(true, &x, &Stamp::int_constant(5)),
            None
        );
    }

    #[test]
    fn test_is_null_succeeding_stamp() {
        let obj = Stamp::object();
        assert_eq!(
            Operator::IsNull.succeeding_stamp(true, &obj),
            Some(Stamp::object_non_null())
        );
        assert_eq!(
            Operator::IsNull.try_fold_unary(&Stamp::object_non_null()),
            TriState::False
        );
    }

    #[test]
    fn test_intrinsic_fold() {
        assert_eq!(Intrinsic::Abs.fold(&[-4]), Some(4));
        assert_eq!(Intrinsic::Abs.fold(&[i64::MIN]), None);
        assert_eq!(Intrinsic::Max.fold(&[3, 9]), Some(9));
        assert_eq!(Intrinsic::Min.fold(&[3]), None);
    }
}
