//! Abstract domains for the fixed-point analysis.
//!
//! A domain is a complete lattice whose elements over-approximate sets of
//! concrete values. Two realisations ship with the crate and are
//! interchangeable through the [`Domain`] trait: [`SignSet`] (finite, no
//! widening needed) and [`Interval`] (infinite ascending chains, widened by
//! the state set). The driver is generic over the trait; nothing downstream
//! knows which domain is running.

pub use interval::Interval;
pub use sign::SignSet;

mod interval;
mod sign;

use std::{cmp::Ordering, fmt};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Comparison condition of a conditional branch.
///
/// `Is`/`IsNot` are the decompiler's reference conditions (`if_acmpeq`,
/// `ifnull`, …); numerically they behave as equality against the null
/// sentinel 0.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CmpCond {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Is,
    IsNot,
}

impl CmpCond {
    /// Does the condition hold for a three-way comparison result?
    pub fn holds(self, rel: Ordering) -> bool {
        match self {
            Self::Eq | Self::Is => rel == Ordering::Equal,
            Self::Ne | Self::IsNot => rel != Ordering::Equal,
            Self::Lt => rel == Ordering::Less,
            Self::Le => rel != Ordering::Greater,
            Self::Gt => rel == Ordering::Greater,
            Self::Ge => rel != Ordering::Less,
        }
    }

    /// The condition seen from the right operand: `x cond y` iff `y cond.swap() x`.
    pub fn swap(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
            Self::Eq | Self::Ne | Self::Is | Self::IsNot => self,
        }
    }

    /// The condition a single three-way relation asserts.
    pub fn from_rel(rel: Ordering) -> Self {
        match rel {
            Ordering::Less => Self::Lt,
            Ordering::Equal => Self::Eq,
            Ordering::Greater => Self::Gt,
        }
    }
}

/// A subset of `{true, false}`: the possible outcomes of an abstract compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoolSet {
    pub may_true: bool,
    pub may_false: bool,
}

impl BoolSet {
    pub const EMPTY: Self = Self { may_true: false, may_false: false };

    pub fn of(may_true: bool, may_false: bool) -> Self {
        Self { may_true, may_false }
    }

    pub fn is_empty(self) -> bool {
        !self.may_true && !self.may_false
    }
}

/// A subset of `{Less, Equal, Greater}`: the possible three-way relations
/// between two abstract values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelSet {
    pub less: bool,
    pub equal: bool,
    pub greater: bool,
}

impl RelSet {
    pub const EMPTY: Self = Self { less: false, equal: false, greater: false };
    pub const ALL: Self = Self { less: true, equal: true, greater: true };

    pub fn insert(&mut self, rel: Ordering) {
        match rel {
            Ordering::Less => self.less = true,
            Ordering::Equal => self.equal = true,
            Ordering::Greater => self.greater = true,
        }
    }

    pub fn contains(self, rel: Ordering) -> bool {
        match rel {
            Ordering::Less => self.less,
            Ordering::Equal => self.equal,
            Ordering::Greater => self.greater,
        }
    }

    pub fn is_empty(self) -> bool {
        !self.less && !self.equal && !self.greater
    }

    pub fn union(self, other: Self) -> Self {
        Self {
            less: self.less || other.less,
            equal: self.equal || other.equal,
            greater: self.greater || other.greater,
        }
    }

    /// Iterates the relations present in the set, in `Less, Equal, Greater` order.
    pub fn iter(self) -> impl Iterator<Item = Ordering> {
        [Ordering::Less, Ordering::Equal, Ordering::Greater]
            .into_iter()
            .filter(move |rel| self.contains(*rel))
    }

    /// Splits the set into the relations for which `cond` holds and those for
    /// which it fails.
    pub fn split(self, cond: CmpCond) -> (Self, Self) {
        let mut holds = Self::EMPTY;
        let mut fails = Self::EMPTY;
        for rel in self.iter() {
            if cond.holds(rel) {
                holds.insert(rel);
            } else {
                fails.insert(rel);
            }
        }
        (holds, fails)
    }

    /// The branch outcomes implied by the set under `cond`.
    pub fn outcomes(self, cond: CmpCond) -> BoolSet {
        let (holds, fails) = self.split(cond);
        BoolSet::of(!holds.is_empty(), !fails.is_empty())
    }
}

/// Capability set of an abstract domain.
///
/// Every operation is a sound over-approximation of its concrete counterpart,
/// lifted pointwise over the concretisation. Concrete values are `f64`
/// throughout: bytecode integer constants are exact far beyond the range this
/// analysis meets, and the interval domain needs the infinities anyway.
pub trait Domain: Clone + PartialEq + fmt::Debug + fmt::Display + Sized {
    /// The least element (empty concretisation).
    fn bottom() -> Self;

    /// The greatest element (every concrete value).
    fn top() -> Self;

    /// The abstraction function: the least element covering every value in
    /// the finite input set. An empty input abstracts to bottom.
    fn alpha<I: IntoIterator<Item = f64>>(values: I) -> Self;

    /// Abstraction of a single constant.
    fn constant(value: f64) -> Self {
        Self::alpha([value])
    }

    fn is_bottom(&self) -> bool;

    /// True iff the concretisation admits `value`.
    fn contains(&self, value: f64) -> bool;

    /// The single concrete value, if the concretisation is a singleton.
    fn concrete(&self) -> Option<f64>;

    /// Partial order: `self ⊑ other`.
    fn le(&self, other: &Self) -> bool;

    /// Least upper bound.
    fn join(&self, other: &Self) -> Self;

    /// Greatest lower bound.
    fn meet(&self, other: &Self) -> Self;

    /// Widening: an upper bound of `self ⊔ newer` that cuts infinite
    /// ascending chains. `self` is the older element. Domains with finite
    /// height keep the default (plain join).
    fn widen(&self, newer: &Self) -> Self {
        self.join(newer)
    }

    fn add(&self, other: &Self) -> Self;
    fn sub(&self, other: &Self) -> Self;
    fn mul(&self, other: &Self) -> Self;

    /// Division over the non-zero portion of `other`. The caller is
    /// responsible for surfacing the divide-by-zero outcome when
    /// `other.contains(0.0)`.
    fn div(&self, other: &Self) -> Self;

    /// Remainder; the result follows the sign of the dividend.
    fn rem(&self, other: &Self) -> Self;

    fn neg(&self) -> Self;

    /// The possible branch outcomes of `self cond other`. Non-empty whenever
    /// both operands are non-bottom.
    fn compare(&self, other: &Self, cond: CmpCond) -> BoolSet;

    /// Branch refinement: the greatest sub-elements of `prev` consistent with
    /// `cond` holding (resp. failing) against `other`. Both sides are `⊑
    /// prev`; an infeasible side is bottom.
    fn constrain(prev: &Self, other: &Self, cond: CmpCond) -> (Self, Self);

    /// The possible three-way relations between `self` and `other`, used to
    /// model the floating-point compare opcodes.
    fn compare_floating(&self, other: &Self) -> RelSet;
}
