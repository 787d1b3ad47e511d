//! Value names and the named-constraint store.
//!
//! A [`ValueName`] identifies one *source* of abstract value. Two stack or
//! local positions holding the same name are known to hold exactly the same
//! (unknown but shared) value, so refining a name's constraint on one branch
//! side refines every occurrence of it on that side.
//!
//! Names are keyed by their minting site rather than a global counter:
//! re-processing a program point re-mints the *same* name, which is what lets
//! the state set reach equality (and therefore a fixed point) on loops. Each
//! site mints at most one name, so uniqueness is preserved.

use std::{cmp::Ordering, fmt};

use ahash::AHashMap;

use crate::domain::{Domain, RelSet};

/// An opaque identity token for one source of abstract value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueName {
    /// Method parameter `i`, seeded into the locals at entry.
    Arg(u16),
    /// Minted by the value-producing opcode at this bytecode offset.
    Temp { offset: u32 },
    /// Minted when a pointwise join reconciles two different names at a slot
    /// of the program point `offset`.
    Merged { offset: u32, slot: MergeSlot },
    /// Element slot `index` of the array at heap address `addr`.
    Elem { addr: u32, index: i64 },
}

/// The position a [`ValueName::Merged`] name was minted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MergeSlot {
    /// A local variable slot.
    Local(u16),
    /// A heap address.
    Heap(u32),
    /// The length of the array at a heap address.
    Len(u32),
}

impl fmt::Display for ValueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Arg(i) => write!(f, "arg{i}"),
            Self::Temp { offset } => write!(f, "t{offset}"),
            Self::Merged { offset, slot: MergeSlot::Local(i) } => write!(f, "phi{offset}_l{i}"),
            Self::Merged { offset, slot: MergeSlot::Heap(a) } => write!(f, "phi{offset}_h{a}"),
            Self::Merged { offset, slot: MergeSlot::Len(a) } => write!(f, "phi{offset}_n{a}"),
            Self::Elem { addr, index } => write!(f, "h{addr}[{index}]"),
        }
    }
}

/// The pushed result of a float three-way compare, waiting for the branch
/// that consumes it.
///
/// No arithmetic is defined on this element; the conditional that pops it
/// filters `rels` through its condition and re-derives the refinement of the
/// left operand per surviving relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloatCmpResult {
    /// Name of the left operand at the time of the compare.
    pub left: ValueName,
    /// Name of the right operand.
    pub right: ValueName,
    /// The relations the compare may produce, the NaN sentinel included.
    pub rels: RelSet,
    /// The relation the opcode maps NaN to (`fcmpg` vs `fcmpl`).
    pub on_nan: Ordering,
}

/// What a name is bound to in the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint<D> {
    /// An abstract element of the domain.
    Value(D),
    /// Array metadata: the heap address and the name of the length value.
    Array { addr: u32, length: ValueName },
    /// The distinguished float-compare result.
    FloatCmp(FloatCmpResult),
}

impl<D: Domain> Constraint<D> {
    /// The abstract element, if this is a plain value constraint.
    pub fn as_value(&self) -> Option<&D> {
        match self {
            Self::Value(v) => Some(v),
            Self::Array { .. } | Self::FloatCmp(_) => None,
        }
    }

    /// A numeric view usable by comparisons: array references read as their
    /// non-null address sentinel, float-compare results have none.
    pub(crate) fn numeric(&self) -> Option<D> {
        match self {
            Self::Value(v) => Some(v.clone()),
            Self::Array { addr, .. } => Some(D::constant(f64::from(*addr) + 1.0)),
            Self::FloatCmp(_) => None,
        }
    }
}

/// Mapping from value name to constraint.
///
/// Invariant: every name referenced by any frame's locals or stack, or by the
/// heap, appears here. Two stores are equal iff they have the same key set
/// and equal constraints per key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Constraints<D> {
    map: AHashMap<ValueName, Constraint<D>>,
}

impl<D: Domain> Constraints<D> {
    pub fn new() -> Self {
        Self { map: AHashMap::new() }
    }

    pub fn get(&self, name: ValueName) -> Option<&Constraint<D>> {
        self.map.get(&name)
    }

    pub fn set(&mut self, name: ValueName, constraint: Constraint<D>) {
        self.map.insert(name, constraint);
    }

    pub fn contains(&self, name: ValueName) -> bool {
        self.map.contains_key(&name)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// The element slots currently tracked for the array at `addr`.
    pub(crate) fn elem_slots(&self, addr: u32) -> Vec<ValueName> {
        let mut slots: Vec<ValueName> = self
            .map
            .keys()
            .filter(|name| matches!(name, ValueName::Elem { addr: a, .. } if *a == addr))
            .copied()
            .collect();
        slots.sort_unstable();
        slots
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (ValueName, &Constraint<D>)> {
        self.map.iter().map(|(name, c)| (*name, c))
    }
}
