//! The sign-set domain: which of `{−, 0, +}` a value may be.
//!
//! A finite abstraction of integer sets. Arithmetic is lifted pairwise over
//! sign tables; division skips divisor-zero pairs entirely (the transfer
//! function surfaces those as a divide-by-zero outcome). The lattice is
//! finite, so no widening is ever needed.

use std::fmt;

use super::{BoolSet, CmpCond, Domain, RelSet};

const NEG: u8 = 0b001;
const ZERO: u8 = 0b010;
const POS: u8 = 0b100;
const ALL: u8 = NEG | ZERO | POS;

/// One sign, used when lifting tables pairwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sign {
    Neg,
    Zero,
    Pos,
}

impl Sign {
    fn bit(self) -> u8 {
        match self {
            Self::Neg => NEG,
            Self::Zero => ZERO,
            Self::Pos => POS,
        }
    }

    fn of(value: f64) -> Self {
        if value == 0.0 {
            Self::Zero
        } else if value > 0.0 {
            Self::Pos
        } else {
            Self::Neg
        }
    }
}

const SIGNS: [Sign; 3] = [Sign::Neg, Sign::Zero, Sign::Pos];

/// A subset of `{−, 0, +}`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignSet(u8);

impl SignSet {
    const BOTTOM: Self = Self(0);
    const TOP: Self = Self(ALL);

    fn has(self, sign: Sign) -> bool {
        self.0 & sign.bit() != 0
    }

    fn signs(self) -> impl Iterator<Item = Sign> {
        SIGNS.into_iter().filter(move |s| self.has(*s))
    }

    /// Lifts a pairwise sign table over both operands, with an early exit
    /// once the union reaches top.
    fn lift(self, other: Self, table: impl Fn(Sign, Sign) -> Self) -> Self {
        let mut out = Self::BOTTOM;
        for sa in self.signs() {
            for sb in other.signs() {
                out.0 |= table(sa, sb).0;
                if out == Self::TOP {
                    return out;
                }
            }
        }
        out
    }

    /// The possible three-way relations of `self` against `other`, read off
    /// the signs of the difference.
    fn rels(self, other: &Self) -> RelSet {
        let diff = Domain::sub(&self, other);
        RelSet {
            less: diff.has(Sign::Neg),
            equal: diff.has(Sign::Zero),
            greater: diff.has(Sign::Pos),
        }
    }
}

fn add_table(a: Sign, b: Sign) -> SignSet {
    match (a, b) {
        (Sign::Pos, Sign::Pos | Sign::Zero) | (Sign::Zero, Sign::Pos) => SignSet(POS),
        (Sign::Zero, Sign::Zero) => SignSet(ZERO),
        (Sign::Neg, Sign::Neg | Sign::Zero) | (Sign::Zero, Sign::Neg) => SignSet(NEG),
        (Sign::Pos, Sign::Neg) | (Sign::Neg, Sign::Pos) => SignSet::TOP,
    }
}

fn mul_table(a: Sign, b: Sign) -> SignSet {
    match (a, b) {
        (Sign::Zero, _) | (_, Sign::Zero) => SignSet(ZERO),
        (Sign::Pos, Sign::Pos) | (Sign::Neg, Sign::Neg) => SignSet(POS),
        (Sign::Pos, Sign::Neg) | (Sign::Neg, Sign::Pos) => SignSet(NEG),
    }
}

/// The possible relations between a value of sign `a` and one of sign `b`.
fn rel_table(a: Sign, b: Sign) -> RelSet {
    match (a, b) {
        (Sign::Neg, Sign::Neg) | (Sign::Pos, Sign::Pos) => RelSet::ALL,
        (Sign::Neg, Sign::Zero | Sign::Pos) | (Sign::Zero, Sign::Pos) => {
            RelSet { less: true, equal: false, greater: false }
        }
        (Sign::Zero, Sign::Zero) => RelSet { less: false, equal: true, greater: false },
        (Sign::Zero | Sign::Pos, Sign::Neg) | (Sign::Pos, Sign::Zero) => {
            RelSet { less: false, equal: false, greater: true }
        }
    }
}

impl Domain for SignSet {
    fn bottom() -> Self {
        Self::BOTTOM
    }

    fn top() -> Self {
        Self::TOP
    }

    fn alpha<I: IntoIterator<Item = f64>>(values: I) -> Self {
        let mut out = Self::BOTTOM;
        for v in values {
            out.0 |= Sign::of(v).bit();
            if out == Self::TOP {
                break;
            }
        }
        out
    }

    fn is_bottom(&self) -> bool {
        self.0 == 0
    }

    fn contains(&self, value: f64) -> bool {
        self.has(Sign::of(value))
    }

    fn concrete(&self) -> Option<f64> {
        (self.0 == ZERO).then_some(0.0)
    }

    fn le(&self, other: &Self) -> bool {
        self.0 & !other.0 == 0
    }

    fn join(&self, other: &Self) -> Self {
        Self(self.0 | other.0)
    }

    fn meet(&self, other: &Self) -> Self {
        Self(self.0 & other.0)
    }

    fn add(&self, other: &Self) -> Self {
        self.lift(*other, add_table)
    }

    fn sub(&self, other: &Self) -> Self {
        self.lift(other.neg(), add_table)
    }

    fn mul(&self, other: &Self) -> Self {
        self.lift(*other, mul_table)
    }

    fn div(&self, other: &Self) -> Self {
        // Divisor-zero pairs are undefined and contribute nothing.
        self.lift(*other, |sa, sb| match (sa, sb) {
            (_, Sign::Zero) => Self::BOTTOM,
            (Sign::Zero, _) => Self(ZERO),
            (a, b) if a == b => Self(POS),
            _ => Self(NEG),
        })
    }

    fn rem(&self, other: &Self) -> Self {
        // The remainder follows the sign of the dividend and may be zero.
        self.lift(*other, |sa, sb| match (sa, sb) {
            (_, Sign::Zero) => Self::BOTTOM,
            (Sign::Zero, _) => Self(ZERO),
            (Sign::Pos, _) => Self(POS | ZERO),
            (Sign::Neg, _) => Self(NEG | ZERO),
        })
    }

    fn neg(&self) -> Self {
        let mut out = self.0 & ZERO;
        if self.0 & NEG != 0 {
            out |= POS;
        }
        if self.0 & POS != 0 {
            out |= NEG;
        }
        Self(out)
    }

    fn compare(&self, other: &Self, cond: CmpCond) -> BoolSet {
        self.rels(other).outcomes(cond)
    }

    fn constrain(prev: &Self, other: &Self, cond: CmpCond) -> (Self, Self) {
        if prev.is_bottom() || other.is_bottom() {
            return (Self::BOTTOM, Self::BOTTOM);
        }
        let mut when_true = Self::BOTTOM;
        let mut when_false = Self::BOTTOM;
        for sx in prev.signs() {
            for sy in other.signs() {
                for rel in rel_table(sx, sy).iter() {
                    if cond.holds(rel) {
                        when_true.0 |= sx.bit();
                    } else {
                        when_false.0 |= sx.bit();
                    }
                }
            }
        }
        (when_true, when_false)
    }

    fn compare_floating(&self, other: &Self) -> RelSet {
        if self.is_bottom() || other.is_bottom() {
            return RelSet::EMPTY;
        }
        self.rels(other)
    }
}

impl fmt::Debug for SignSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignSet({self})")
    }
}

impl fmt::Display for SignSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        let mut first = true;
        for (bit, label) in [(NEG, "-"), (ZERO, "0"), (POS, "+")] {
            if self.0 & bit != 0 {
                if !first {
                    write!(f, ",")?;
                }
                write!(f, "{label}")?;
                first = false;
            }
        }
        write!(f, "}}")
    }
}
