//! Stamps: the abstract value lattice attached to every IR node.
//!
//! A stamp over-approximates the set of runtime values a node can produce.
//! Two lattice operations combine stamps:
//!
//! - **meet** (union of possibilities) is used where control flow merges, e.g.
//!   a phi's stamp is the meet of its inputs' stamps.
//! - **join** (intersection) is used when two independent facts about the same
//!   value hold at once, e.g. a parameter's declared range joined with the
//!   range implied by a dominating branch.
//!
//! A join can produce an *empty* stamp. An empty stamp means "no value is
//! possible here", which in practice marks unreachable code.
//!
//! # Kinds
//!
//! | Kind      | Domain                                    |
//! |-----------|-------------------------------------------|
//! | `Integer` | closed signed 64-bit range `[lower, upper]` |
//! | `Object`  | nullness plus optional exact type          |
//! | `Logic`   | tautology / contradiction / unknown        |
//! | `Void`    | control and guard nodes, carries nothing   |
//!
//! All arithmetic folding here is sound for wrapping 64-bit arithmetic: when
//! a bound computation could overflow, the result widens to unrestricted.

use std::fmt;

// =============================================================================
// Tri-State
// =============================================================================

/// Result of evaluating a predicate against stamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriState {
    True,
    False,
    Unknown,
}

impl TriState {
    #[inline]
    pub fn from_bool(value: bool) -> Self {
        if value {
            TriState::True
        } else {
            TriState::False
        }
    }

    #[inline]
    pub fn is_known(self) -> bool {
        self != TriState::Unknown
    }

    /// The decided value, if any.
    #[inline]
    pub fn to_bool(self) -> Option<bool> {
        match self {
            TriState::True => Some(true),
            TriState::False => Some(false),
            TriState::Unknown => None,
        }
    }

    #[inline]
    pub fn negate(self) -> Self {
        match self {
            TriState::True => TriState::False,
            TriState::False => TriState::True,
            TriState::Unknown => TriState::Unknown,
        }
    }
}

// =============================================================================
// Constants
// =============================================================================

/// A single concrete value a stamp can collapse to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstantValue {
    Int(i64),
    Null,
    Logic(bool),
}

// =============================================================================
// Integer Stamp
// =============================================================================

/// A closed signed range of 64-bit integers.
///
/// The empty range is normalized to `lower = i64::MAX, upper = i64::MIN` so
/// that structural equality works for emptiness too.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntegerStamp {
    lower: i64,
    upper: i64,
}

impl IntegerStamp {
    pub const UNRESTRICTED: IntegerStamp = IntegerStamp {
        lower: i64::MIN,
        upper: i64::MAX,
    };

    pub const EMPTY: IntegerStamp = IntegerStamp {
        lower: i64::MAX,
        upper: i64::MIN,
    };

    /// Create a range; `lower > upper` yields the empty stamp.
    #[inline]
    pub fn new(lower: i64, upper: i64) -> Self {
        if lower > upper {
            Self::EMPTY
        } else {
            IntegerStamp { lower, upper }
        }
    }

    #[inline]
    pub fn constant(value: i64) -> Self {
        IntegerStamp {
            lower: value,
            upper: value,
        }
    }

    #[inline]
    pub fn lower(&self) -> i64 {
        self.lower
    }

    #[inline]
    pub fn upper(&self) -> i64 {
        self.upper
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lower > self.upper
    }

    #[inline]
    pub fn is_unrestricted(&self) -> bool {
        *self == Self::UNRESTRICTED
    }

    #[inline]
    pub fn as_constant(&self) -> Option<i64> {
        (self.lower == self.upper).then_some(self.lower)
    }

    #[inline]
    pub fn contains(&self, value: i64) -> bool {
        self.lower <= value && value <= self.upper
    }

    pub fn is_positive(&self) -> bool {
        self.lower >= 0
    }

    pub fn is_negative(&self) -> bool {
        self.upper <= 0
    }

    pub fn is_strictly_positive(&self) -> bool {
        self.lower > 0
    }

    pub fn is_strictly_negative(&self) -> bool {
        self.upper < 0
    }

    pub fn meet(&self, other: &IntegerStamp) -> IntegerStamp {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        IntegerStamp::new(self.lower.min(other.lower), self.upper.max(other.upper))
    }

    pub fn join(&self, other: &IntegerStamp) -> IntegerStamp {
        IntegerStamp::new(self.lower.max(other.lower), self.upper.min(other.upper))
    }

    // -------------------------------------------------------------------------
    // Arithmetic
    // -------------------------------------------------------------------------

    fn from_checked(lower: Option<i64>, upper: Option<i64>) -> IntegerStamp {
        match (lower, upper) {
            (Some(lo), Some(hi)) => IntegerStamp::new(lo, hi),
            _ => Self::UNRESTRICTED,
        }
    }

    pub fn add(&self, other: &IntegerStamp) -> IntegerStamp {
        if self.is_empty() || other.is_empty() {
            return Self::EMPTY;
        }
        Self::from_checked(
            self.lower.checked_add(other.lower),
            self.upper.checked_add(other.upper),
        )
    }

    pub fn sub(&self, other: &IntegerStamp) -> IntegerStamp {
        if self.is_empty() || other.is_empty() {
            return Self::EMPTY;
        }
        Self::from_checked(
            self.lower.checked_sub(other.upper),
            self.upper.checked_sub(other.lower),
        )
    }

    pub fn mul(&self, other: &IntegerStamp) -> IntegerStamp {
        if self.is_empty() || other.is_empty() {
            return Self::EMPTY;
        }
        let corners = [
            self.lower.checked_mul(other.lower),
            self.lower.checked_mul(other.upper),
            self.upper.checked_mul(other.lower),
            self.upper.checked_mul(other.upper),
        ];
        let mut lower = i64::MAX;
        let mut upper = i64::MIN;
        for corner in corners {
            match corner {
                Some(v) => {
                    lower = lower.min(v);
                    upper = upper.max(v);
                }
                None => return Self::UNRESTRICTED,
            }
        }
        IntegerStamp::new(lower, upper)
    }

    pub fn neg(&self) -> IntegerStamp {
        if self.is_empty() {
            return Self::EMPTY;
        }
        Self::from_checked(self.upper.checked_neg(), self.lower.checked_neg())
    }

    /// Bitwise not is `-x - 1`: monotonically decreasing and never overflows.
    pub fn not(&self) -> IntegerStamp {
        if self.is_empty() {
            return Self::EMPTY;
        }
        IntegerStamp::new(!self.upper, !self.lower)
    }

    /// Smallest all-ones mask covering every bit of a non-negative value.
    fn covering_mask(value: i64) -> i64 {
        debug_assert!(value >= 0);
        if value == 0 {
            0
        } else {
            let bits = 64 - (value as u64).leading_zeros();
            if bits >= 63 {
                i64::MAX
            } else {
                (1i64 << bits) - 1
            }
        }
    }

    pub fn and(&self, other: &IntegerStamp) -> IntegerStamp {
        if self.is_empty() || other.is_empty() {
            return Self::EMPTY;
        }
        if let (Some(a), Some(b)) = (self.as_constant(), other.as_constant()) {
            return IntegerStamp::constant(a & b);
        }
        match (self.is_positive(), other.is_positive()) {
            (true, true) => IntegerStamp::new(0, self.upper.min(other.upper)),
            (true, false) => IntegerStamp::new(0, self.upper),
            (false, true) => IntegerStamp::new(0, other.upper),
            (false, false) => Self::UNRESTRICTED,
        }
    }

    pub fn or(&self, other: &IntegerStamp) -> IntegerStamp {
        if self.is_empty() || other.is_empty() {
            return Self::EMPTY;
        }
        if let (Some(a), Some(b)) = (self.as_constant(), other.as_constant()) {
            return IntegerStamp::constant(a | b);
        }
        if self.is_positive() && other.is_positive() {
            let mask = Self::covering_mask(self.upper.max(other.upper));
            IntegerStamp::new(self.lower.max(other.lower), mask)
        } else {
            Self::UNRESTRICTED
        }
    }

    pub fn xor(&self, other: &IntegerStamp) -> IntegerStamp {
        if self.is_empty() || other.is_empty() {
            return Self::EMPTY;
        }
        if let (Some(a), Some(b)) = (self.as_constant(), other.as_constant()) {
            return IntegerStamp::constant(a ^ b);
        }
        if self.is_positive() && other.is_positive() {
            IntegerStamp::new(0, Self::covering_mask(self.upper.max(other.upper)))
        } else {
            Self::UNRESTRICTED
        }
    }

    /// Left shift; only a constant in-range shift amount is precise.
    pub fn shl(&self, amount: &IntegerStamp) -> IntegerStamp {
        if self.is_empty() || amount.is_empty() {
            return Self::EMPTY;
        }
        let Some(shift) = amount.as_constant() else {
            return Self::UNRESTRICTED;
        };
        let shift = (shift & 63) as u32;
        if let Some(value) = self.as_constant() {
            return IntegerStamp::constant(value.wrapping_shl(shift));
        }
        let factor = 1i64.checked_shl(shift).filter(|f| *f > 0);
        match factor {
            Some(f) => Self::from_checked(self.lower.checked_mul(f), self.upper.checked_mul(f)),
            None => Self::UNRESTRICTED,
        }
    }

    // -------------------------------------------------------------------------
    // Predicates
    // -------------------------------------------------------------------------

    pub fn fold_equals(&self, other: &IntegerStamp) -> TriState {
        if self.is_empty() || other.is_empty() {
            return TriState::Unknown;
        }
        match (self.as_constant(), other.as_constant()) {
            (Some(a), Some(b)) => TriState::from_bool(a == b),
            _ if self.join(other).is_empty() => TriState::False,
            _ => TriState::Unknown,
        }
    }

    pub fn fold_less_than(&self, other: &IntegerStamp) -> TriState {
        if self.is_empty() || other.is_empty() {
            return TriState::Unknown;
        }
        if self.upper < other.lower {
            TriState::True
        } else if self.lower >= other.upper {
            TriState::False
        } else {
            TriState::Unknown
        }
    }

    /// Unsigned less-than; decidable only when both ranges are non-negative.
    pub fn fold_below(&self, other: &IntegerStamp) -> TriState {
        if self.is_positive() && other.is_positive() {
            self.fold_less_than(other)
        } else {
            TriState::Unknown
        }
    }
}

impl fmt::Debug for IntegerStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "i64[empty]")
        } else if self.is_unrestricted() {
            write!(f, "i64")
        } else if let Some(c) = self.as_constant() {
            write!(f, "i64[{}]", c)
        } else {
            write!(f, "i64[{}..{}]", self.lower, self.upper)
        }
    }
}

// =============================================================================
// Object Stamp
// =============================================================================

/// Nullness and exact-type knowledge about a reference.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ObjectStamp {
    pub non_null: bool,
    pub always_null: bool,
    pub exact_type: Option<u32>,
}

impl ObjectStamp {
    pub const UNRESTRICTED: ObjectStamp = ObjectStamp {
        non_null: false,
        always_null: false,
        exact_type: None,
    };

    pub fn non_null() -> Self {
        ObjectStamp {
            non_null: true,
            ..Self::UNRESTRICTED
        }
    }

    pub fn always_null() -> Self {
        ObjectStamp {
            always_null: true,
            ..Self::UNRESTRICTED
        }
    }

    pub fn exact(type_id: u32) -> Self {
        ObjectStamp {
            non_null: true,
            always_null: false,
            exact_type: Some(type_id),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.non_null && self.always_null
    }

    pub fn meet(&self, other: &ObjectStamp) -> ObjectStamp {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let exact_type = match (self.exact_type, other.exact_type) {
            (Some(a), Some(b)) if a == b => Some(a),
            (Some(a), None) if other.always_null => Some(a),
            (None, Some(b)) if self.always_null => Some(b),
            _ => None,
        };
        ObjectStamp {
            non_null: self.non_null && other.non_null,
            always_null: self.always_null && other.always_null,
            exact_type,
        }
    }

    pub fn join(&self, other: &ObjectStamp) -> ObjectStamp {
        let (exact_type, conflict) = match (self.exact_type, other.exact_type) {
            (Some(a), Some(b)) => (Some(a), a != b),
            (a, b) => (a.or(b), false),
        };
        ObjectStamp {
            non_null: self.non_null || other.non_null,
            // Two different exact types only agree on null.
            always_null: self.always_null || other.always_null || conflict,
            exact_type,
        }
    }

    pub fn fold_is_null(&self) -> TriState {
        if self.is_empty() {
            TriState::Unknown
        } else if self.always_null {
            TriState::True
        } else if self.non_null {
            TriState::False
        } else {
            TriState::Unknown
        }
    }
}

impl fmt::Debug for ObjectStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj")?;
        if self.is_empty() {
            return write!(f, "[empty]");
        }
        if self.always_null {
            write!(f, "[null]")?;
        } else if self.non_null {
            write!(f, "!")?;
        }
        if let Some(ty) = self.exact_type {
            write!(f, "<{}>", ty)?;
        }
        Ok(())
    }
}

// =============================================================================
// Logic Stamp
// =============================================================================

/// Knowledge about a condition node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicStamp {
    Unknown,
    Tautology,
    Contradiction,
    Empty,
}

impl LogicStamp {
    pub fn meet(self, other: LogicStamp) -> LogicStamp {
        match (self, other) {
            (LogicStamp::Empty, x) | (x, LogicStamp::Empty) => x,
            (a, b) if a == b => a,
            _ => LogicStamp::Unknown,
        }
    }

    pub fn join(self, other: LogicStamp) -> LogicStamp {
        match (self, other) {
            (LogicStamp::Unknown, x) | (x, LogicStamp::Unknown) => x,
            (a, b) if a == b => a,
            _ => LogicStamp::Empty,
        }
    }

    pub fn from_tri_state(state: TriState) -> LogicStamp {
        match state {
            TriState::True => LogicStamp::Tautology,
            TriState::False => LogicStamp::Contradiction,
            TriState::Unknown => LogicStamp::Unknown,
        }
    }

    pub fn to_tri_state(self) -> TriState {
        match self {
            LogicStamp::Tautology => TriState::True,
            LogicStamp::Contradiction => TriState::False,
            _ => TriState::Unknown,
        }
    }
}

// =============================================================================
// Stamp
// =============================================================================

/// The abstract value of a node.
///
/// Lattice operations between stamps of different kinds are not meaningful;
/// they return the receiver unchanged, which never claims more than was known.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stamp {
    /// Control, guard and other non-value nodes.
    Void,
    Integer(IntegerStamp),
    Object(ObjectStamp),
    Logic(LogicStamp),
}

impl Stamp {
    pub fn int_unrestricted() -> Self {
        Stamp::Integer(IntegerStamp::UNRESTRICTED)
    }

    pub fn int_range(lower: i64, upper: i64) -> Self {
        Stamp::Integer(IntegerStamp::new(lower, upper))
    }

    pub fn int_constant(value: i64) -> Self {
        Stamp::Integer(IntegerStamp::constant(value))
    }

    /// Integers `>= 0`.
    pub fn int_non_negative() -> Self {
        Stamp::int_range(0, i64::MAX)
    }

    pub fn object() -> Self {
        Stamp::Object(ObjectStamp::UNRESTRICTED)
    }

    pub fn object_non_null() -> Self {
        Stamp::Object(ObjectStamp::non_null())
    }

    pub fn null() -> Self {
        Stamp::Object(ObjectStamp::always_null())
    }

    pub fn logic() -> Self {
        Stamp::Logic(LogicStamp::Unknown)
    }

    pub fn tautology() -> Self {
        Stamp::Logic(LogicStamp::Tautology)
    }

    pub fn contradiction() -> Self {
        Stamp::Logic(LogicStamp::Contradiction)
    }

    pub fn for_constant(value: ConstantValue) -> Self {
        match value {
            ConstantValue::Int(v) => Stamp::int_constant(v),
            ConstantValue::Null => Stamp::null(),
            ConstantValue::Logic(true) => Stamp::tautology(),
            ConstantValue::Logic(false) => Stamp::contradiction(),
        }
    }

    /// The least precise stamp of the same kind.
    pub fn unrestricted(&self) -> Stamp {
        match self {
            Stamp::Void => Stamp::Void,
            Stamp::Integer(_) => Stamp::int_unrestricted(),
            Stamp::Object(_) => Stamp::object(),
            Stamp::Logic(_) => Stamp::logic(),
        }
    }

    pub fn as_integer(&self) -> Option<&IntegerStamp> {
        match self {
            Stamp::Integer(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectStamp> {
        match self {
            Stamp::Object(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_compatible(&self, other: &Stamp) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Stamp::Void => false,
            Stamp::Integer(s) => s.is_empty(),
            Stamp::Object(s) => s.is_empty(),
            Stamp::Logic(s) => *s == LogicStamp::Empty,
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        *self == self.unrestricted()
    }

    pub fn as_constant(&self) -> Option<ConstantValue> {
        match self {
            Stamp::Integer(s) => s.as_constant().map(ConstantValue::Int),
            Stamp::Object(s) if s.always_null && !s.non_null => Some(ConstantValue::Null),
            Stamp::Logic(LogicStamp::Tautology) => Some(ConstantValue::Logic(true)),
            Stamp::Logic(LogicStamp::Contradiction) => Some(ConstantValue::Logic(false)),
            _ => None,
        }
    }

    pub fn meet(&self, other: &Stamp) -> Stamp {
        match (self, other) {
            (Stamp::Integer(a), Stamp::Integer(b)) => Stamp::Integer(a.meet(b)),
            (Stamp::Object(a), Stamp::Object(b)) => Stamp::Object(a.meet(b)),
            (Stamp::Logic(a), Stamp::Logic(b)) => Stamp::Logic(a.meet(*b)),
            _ => *self,
        }
    }

    pub fn join(&self, other: &Stamp) -> Stamp {
        match (self, other) {
            (Stamp::Integer(a), Stamp::Integer(b)) => Stamp::Integer(a.join(b)),
            (Stamp::Object(a), Stamp::Object(b)) => Stamp::Object(a.join(b)),
            (Stamp::Logic(a), Stamp::Logic(b)) => Stamp::Logic(a.join(*b)),
            _ => *self,
        }
    }

    /// Join `other` into `self`; `Some` only if that is strictly more precise
    /// and still satisfiable.
    pub fn try_improve_with(&self, other: &Stamp) -> Option<Stamp> {
        let joined = self.join(other);
        if joined != *self && !joined.is_empty() {
            Some(joined)
        } else {
            None
        }
    }

    /// Whether every value of `self` is also a value of `other`.
    pub fn is_subset_of(&self, other: &Stamp) -> bool {
        self.join(other) == *self
    }
}

impl Default for Stamp {
    fn default() -> Self {
        Stamp::Void
    }
}

impl fmt::Debug for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stamp::Void => write!(f, "void"),
            Stamp::Integer(s) => write!(f, "{:?}", s),
            Stamp::Object(s) => write!(f, "{:?}", s),
            Stamp::Logic(s) => write!(f, "logic:{:?}", s),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_meet_and_join() {
        let a = IntegerStamp::new(0, 10);
        let b = IntegerStamp::new(5, 20);

        assert_eq!(a.meet(&b), IntegerStamp::new(0, 20));
        assert_eq!(a.join(&b), IntegerStamp::new(5, 10));
        assert!(a.join(&IntegerStamp::new(11, 12)).is_empty());
        assert_eq!(IntegerStamp::EMPTY.meet(&a), a);
    }

    #[test]
    fn test_integer_add_overflow_widens() {
        let a = IntegerStamp::new(0, i64::MAX);
        let one = IntegerStamp::constant(1);
        assert!(a.add(&one).is_unrestricted());
        assert_eq!(
            IntegerStamp::constant(2).add(&IntegerStamp::constant(3)),
            IntegerStamp::constant(5)
        );
        assert_eq!(
            IntegerStamp::new(-3, 4).mul(&IntegerStamp::new(2, 5)),
            IntegerStamp::new(-15, 20)
        );
    }

    #[test]
    fn test_integer_bitwise() {
        let small = IntegerStamp::new(0, 5);
        assert_eq!(small.and(&IntegerStamp::constant(3)), IntegerStamp::new(0, 3));
        assert_eq!(small.or(&IntegerStamp::new(2, 4)), IntegerStamp::new(2, 7));
        assert_eq!(IntegerStamp::new(1, 3).not(), IntegerStamp::new(-4, -2));
        assert_eq!(
            IntegerStamp::new(1, 3).shl(&IntegerStamp::constant(2)),
            IntegerStamp::new(4, 12)
        );
    }

    #[test]
    fn test_integer_compare_folding() {
        let low = IntegerStamp::new(0, 4);
        let high = IntegerStamp::new(5, 9);

        assert_eq!(low.fold_less_than(&high), TriState::True);
        assert_eq!(high.fold_less_than(&low), TriState::False);
        assert_eq!(low.fold_equals(&high), TriState::False);
        assert_eq!(low.fold_equals(&low), TriState::Unknown);
        assert_eq!(
            IntegerStamp::new(-1, 4).fold_below(&high),
            TriState::Unknown
        );
    }

    #[test]
    fn test_object_lattice() {
        let non_null = ObjectStamp::non_null();
        let null = ObjectStamp::always_null();

        assert!(non_null.join(&null).is_empty());
        assert_eq!(non_null.meet(&null), ObjectStamp::UNRESTRICTED);
        assert_eq!(null.fold_is_null(), TriState::True);
        assert_eq!(non_null.fold_is_null(), TriState::False);

        let joined = ObjectStamp::exact(1).join(&ObjectStamp::exact(2));
        assert!(joined.is_empty());
    }

    #[test]
    fn test_logic_lattice() {
        assert_eq!(
            LogicStamp::Tautology.join(LogicStamp::Contradiction),
            LogicStamp::Empty
        );
        assert_eq!(
            LogicStamp::Tautology.meet(LogicStamp::Contradiction),
            LogicStamp::Unknown
        );
        assert_eq!(
            Stamp::tautology().as_constant(),
            Some(ConstantValue::Logic(true))
        );
    }

    #[test]
    fn test_try_improve_is_narrowing_only() {
        let wide = Stamp::int_unrestricted();
        let narrow = Stamp::int_range(0, 10);

        assert_eq!(wide.try_improve_with(&narrow), Some(narrow));
        assert_eq!(narrow.try_improve_with(&wide), None);
        assert_eq!(narrow.try_improve_with(&Stamp::int_range(20, 30)), None);
        assert!(narrow.is_subset_of(&wide));
        assert!(!wide.is_subset_of(&narrow));
    }
}
