//! Per-frame state and the abstract state triple.
//!
//! An [`AState`] is (heap, frame stack, constraint store). The *program
//! point* of a state is the program counter of its top frame; the state set
//! keeps one pointwise-joined state per program point.
//!
//! The in-place join adopts, merges, or renames by the three-case rule of
//! the name-merging scheme: an absent slot adopts the foreign name, matching
//! names join their constraints under the shared name, and clashing names
//! get a `Merged` name keyed by the program point so repeated joins are
//! idempotent.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::{
    constraint::{Constraint, Constraints, MergeSlot, ValueName},
    domain::Domain,
    error::AnalysisError,
};

/// A program counter: the bytecode offset within the method under analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pc {
    pub offset: u32,
}

impl Pc {
    pub fn new(offset: u32) -> Self {
        Self { offset }
    }

    /// The next instruction in fall-through order. Offsets index the opcode
    /// list directly, so the step is always one.
    pub fn next(self) -> Self {
        Self { offset: self.offset + 1 }
    }
}

impl fmt::Display for Pc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.offset)
    }
}

/// One call frame: locals, operand stack, program counter, and the pending
/// (not-yet-read) store spans used for dead-store detection.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    locals: AHashMap<u16, ValueName>,
    stack: SmallVec<[ValueName; 8]>,
    pc: Pc,
    /// Local index → offsets of the latest store to it (and of the opcode
    /// that produced the stored value) that no load has read yet.
    pending_stores: BTreeMap<u16, BTreeSet<u32>>,
}

impl Frame {
    pub fn new(pc: Pc) -> Self {
        Self { locals: AHashMap::new(), stack: SmallVec::new(), pc, pending_stores: BTreeMap::new() }
    }

    pub fn pc(&self) -> Pc {
        self.pc
    }

    pub fn advance(&mut self) {
        self.pc = self.pc.next();
    }

    pub fn jump(&mut self, target: u32) {
        self.pc = Pc::new(target);
    }

    pub fn push(&mut self, name: ValueName) {
        self.stack.push(name);
    }

    pub fn pop(&mut self) -> Option<ValueName> {
        self.stack.pop()
    }

    pub fn peek(&self) -> Option<ValueName> {
        self.stack.last().copied()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn local(&self, index: u16) -> Option<ValueName> {
        self.locals.get(&index).copied()
    }

    pub fn set_local(&mut self, index: u16, name: ValueName) {
        self.locals.insert(index, name);
    }

    /// Removes and returns the pending store span for a local slot.
    pub(crate) fn take_pending(&mut self, index: u16) -> BTreeSet<u32> {
        self.pending_stores.remove(&index).unwrap_or_default()
    }

    pub(crate) fn set_pending(&mut self, index: u16, span: BTreeSet<u32>) {
        self.pending_stores.insert(index, span);
    }

    /// All offsets still pending in this frame, in order.
    pub(crate) fn pending_offsets(&self) -> impl Iterator<Item = u32> + '_ {
        self.pending_stores.values().flatten().copied()
    }
}

/// The abstract state: heap, call-frame stack, and shared constraint store.
///
/// Invariant: the frame stack is never empty. A `return` from the last frame
/// becomes a terminal outcome instead of an empty state.
#[derive(Debug, Clone, PartialEq)]
pub struct AState<D> {
    heap: BTreeMap<u32, ValueName>,
    frames: SmallVec<[Frame; 2]>,
    constraints: Constraints<D>,
}

impl<D: Domain> AState<D> {
    pub fn new(entry: Frame, constraints: Constraints<D>) -> Self {
        let mut frames = SmallVec::new();
        frames.push(entry);
        Self { heap: BTreeMap::new(), frames, constraints }
    }

    /// The program point: the pc of the top frame.
    pub fn pc(&self) -> Pc {
        self.top_frame().pc
    }

    pub fn top_frame(&self) -> &Frame {
        self.frames.last().expect("state has at least one frame")
    }

    pub fn top_frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("state has at least one frame")
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Pops the top frame. The caller must either emit a terminal or push the
    /// return value onto the new top frame; a state is never left frameless.
    pub(crate) fn pop_frame(&mut self) -> Option<Frame> {
        if self.frames.len() > 1 { self.frames.pop() } else { None }
    }

    pub fn constraints(&self) -> &Constraints<D> {
        &self.constraints
    }

    pub fn constraints_mut(&mut self) -> &mut Constraints<D> {
        &mut self.constraints
    }

    pub fn heap(&self) -> &BTreeMap<u32, ValueName> {
        &self.heap
    }

    pub(crate) fn heap_insert(&mut self, addr: u32, name: ValueName) {
        self.heap.insert(addr, name);
    }

    /// How many positions (heap, locals, stacks, array metadata) refer to a
    /// name. Used to decide whether `incr` may rewrite a constraint in place.
    pub(crate) fn occurrences(&self, name: ValueName) -> usize {
        let mut n = self.heap.values().filter(|&&v| v == name).count();
        for frame in &self.frames {
            n += frame.locals.values().filter(|&&v| v == name).count();
            n += frame.stack.iter().filter(|&&v| v == name).count();
        }
        n + self
            .constraints
            .iter()
            .filter(|(_, c)| match c {
                Constraint::Array { length, .. } => *length == name,
                Constraint::FloatCmp(fc) => fc.left == name || fc.right == name,
                Constraint::Value(_) => false,
            })
            .count()
    }

    /// Joins `other` into `self`, pointwise. Both states must sit at the same
    /// program point with the same frame depth and stack heights; anything
    /// else is a bug in the transfer function, not a program property.
    pub(crate) fn join_from(&mut self, other: &Self) -> Result<(), AnalysisError> {
        let pc = self.pc();
        let offset = pc.offset;
        if self.frames.len() != other.frames.len() || pc != other.pc() {
            return Err(AnalysisError::FrameMismatch { offset });
        }
        let Self { heap, frames, constraints } = self;

        // Heap, by address: adopt, merge under the shared name, or rename.
        for (&addr, &theirs) in &other.heap {
            match heap.get(&addr).copied() {
                None => {
                    heap.insert(addr, theirs);
                    adopt(constraints, &other.constraints, theirs, offset)?;
                }
                Some(ours) if ours == theirs => {
                    merge_in_place(constraints, &other.constraints, ours, offset)?;
                }
                Some(ours) => {
                    let joined = merge_names(constraints, &other.constraints, ours, theirs, offset)?;
                    let merged = ValueName::Merged { offset, slot: MergeSlot::Heap(addr) };
                    constraints.set(merged, joined);
                    heap.insert(addr, merged);
                }
            }
        }

        for (ours, theirs) in frames.iter_mut().zip(&other.frames) {
            if ours.pc != theirs.pc {
                return Err(AnalysisError::FrameMismatch { offset });
            }

            // Locals, by index: the same three-case merge.
            for (&index, &their_name) in &theirs.locals {
                match ours.locals.get(&index).copied() {
                    None => {
                        ours.locals.insert(index, their_name);
                        adopt(constraints, &other.constraints, their_name, offset)?;
                    }
                    Some(our_name) if our_name == their_name => {
                        merge_in_place(constraints, &other.constraints, our_name, offset)?;
                    }
                    Some(our_name) => {
                        let joined = merge_names(constraints, &other.constraints, our_name, their_name, offset)?;
                        let merged = ValueName::Merged { offset, slot: MergeSlot::Local(index) };
                        constraints.set(merged, joined);
                        ours.locals.insert(index, merged);
                    }
                }
            }

            // Stack, by height: the name established at first visit stays;
            // the foreign constraint joins in under it.
            if ours.stack.len() != theirs.stack.len() {
                return Err(AnalysisError::StackHeightMismatch {
                    offset,
                    left: ours.stack.len(),
                    right: theirs.stack.len(),
                });
            }
            for (&our_name, &their_name) in ours.stack.iter().zip(&theirs.stack) {
                let joined = merge_names(constraints, &other.constraints, our_name, their_name, offset)?;
                constraints.set(our_name, joined);
            }

            // Pending store spans union: a store is only dead if no path
            // reads it, so candidates accumulate and reads retire them later.
            for (&index, span) in &theirs.pending_stores {
                ours.pending_stores.entry(index).or_default().extend(span);
            }
        }
        Ok(())
    }
}

/// Copies a foreign name's constraint into the local store, joining with any
/// existing binding under the same name. Names the constraint itself refers
/// to (an array's length, a float compare's operands) come along, so the
/// store invariant survives the adoption.
fn adopt<D: Domain>(
    ours: &mut Constraints<D>,
    theirs: &Constraints<D>,
    name: ValueName,
    offset: u32,
) -> Result<(), AnalysisError> {
    match (ours.get(name).cloned(), theirs.get(name).cloned()) {
        (None, Some(b)) => {
            adopt_referenced(ours, theirs, &b, offset)?;
            ours.set(name, b);
            Ok(())
        }
        (Some(a), Some(b)) => {
            let joined = join_constraints(ours, theirs, &a, &b, offset)?;
            ours.set(name, joined);
            Ok(())
        }
        (_, None) => Err(AnalysisError::MissingConstraint { offset }),
    }
}

fn adopt_referenced<D: Domain>(
    ours: &mut Constraints<D>,
    theirs: &Constraints<D>,
    constraint: &Constraint<D>,
    offset: u32,
) -> Result<(), AnalysisError> {
    match constraint {
        Constraint::Array { length, .. } => adopt(ours, theirs, *length, offset),
        Constraint::FloatCmp(fc) => {
            adopt(ours, theirs, fc.left, offset)?;
            adopt(ours, theirs, fc.right, offset)
        }
        Constraint::Value(_) => Ok(()),
    }
}

/// Joins both stores' bindings of a shared name, in place.
fn merge_in_place<D: Domain>(
    ours: &mut Constraints<D>,
    theirs: &Constraints<D>,
    name: ValueName,
    offset: u32,
) -> Result<(), AnalysisError> {
    match (ours.get(name).cloned(), theirs.get(name).cloned()) {
        (Some(a), Some(b)) => {
            let joined = join_constraints(ours, theirs, &a, &b, offset)?;
            ours.set(name, joined);
            Ok(())
        }
        (Some(_), None) => Ok(()),
        (None, Some(b)) => {
            ours.set(name, b);
            Ok(())
        }
        (None, None) => Err(AnalysisError::MissingConstraint { offset }),
    }
}

/// Joins the constraints bound to two (possibly different) names, looking
/// each name up in its own store first.
fn merge_names<D: Domain>(
    ours: &mut Constraints<D>,
    theirs: &Constraints<D>,
    our_name: ValueName,
    their_name: ValueName,
    offset: u32,
) -> Result<Constraint<D>, AnalysisError> {
    let a = ours
        .get(our_name)
        .cloned()
        .or_else(|| theirs.get(our_name).cloned())
        .ok_or(AnalysisError::MissingConstraint { offset })?;
    let b = theirs
        .get(their_name)
        .cloned()
        .or_else(|| ours.get(their_name).cloned())
        .ok_or(AnalysisError::MissingConstraint { offset })?;
    join_constraints(ours, theirs, &a, &b, offset)
}

/// The join of two constraints.
///
/// Arrays must agree on their address; lengths recorded under different
/// names get a `Merged` length name. A float-compare result joined with
/// anything other than its exact twin folds to the plain value
/// `alpha({−1, 0, 1})`, which is what the concrete compare can produce.
fn join_constraints<D: Domain>(
    ours: &mut Constraints<D>,
    theirs: &Constraints<D>,
    a: &Constraint<D>,
    b: &Constraint<D>,
    offset: u32,
) -> Result<Constraint<D>, AnalysisError> {
    match (a, b) {
        (Constraint::Value(x), Constraint::Value(y)) => Ok(Constraint::Value(x.join(y))),
        (Constraint::Array { addr: a1, length: l1 }, Constraint::Array { addr: a2, length: l2 }) => {
            if a1 != a2 {
                return Err(AnalysisError::TypeMismatch { offset });
            }
            if l1 == l2 {
                merge_in_place(ours, theirs, *l1, offset)?;
                Ok(Constraint::Array { addr: *a1, length: *l1 })
            } else {
                let joined = merge_names(ours, theirs, *l1, *l2, offset)?;
                let merged = ValueName::Merged { offset, slot: MergeSlot::Len(*a1) };
                ours.set(merged, joined);
                Ok(Constraint::Array { addr: *a1, length: merged })
            }
        }
        (Constraint::FloatCmp(x), Constraint::FloatCmp(y))
            if x.left == y.left && x.right == y.right && x.on_nan == y.on_nan =>
        {
            let mut fc = *x;
            fc.rels = fc.rels.union(y.rels);
            Ok(Constraint::FloatCmp(fc))
        }
        (Constraint::FloatCmp(_), _) | (_, Constraint::FloatCmp(_)) => {
            Ok(Constraint::Value(D::alpha([-1.0, 0.0, 1.0])))
        }
        (Constraint::Array { .. }, Constraint::Value(_)) | (Constraint::Value(_), Constraint::Array { .. }) => {
            Err(AnalysisError::TypeMismatch { offset })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SignSet;

    fn arg_state(args: u16, pc: Pc) -> AState<SignSet> {
        let mut frame = Frame::new(pc);
        let mut constraints = Constraints::new();
        for i in 0..args {
            frame.set_local(i, ValueName::Arg(i));
            constraints.set(ValueName::Arg(i), Constraint::Value(SignSet::top()));
        }
        AState::new(frame, constraints)
    }

    #[test]
    fn join_of_identical_states_is_identity() {
        let mut a = arg_state(2, Pc::new(3));
        let b = a.clone();
        a.join_from(&b).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn join_merges_shared_names_in_place() {
        let mut a = arg_state(1, Pc::new(0));
        let mut b = a.clone();
        a.constraints_mut().set(ValueName::Arg(0), Constraint::Value(SignSet::alpha([1.0])));
        b.constraints_mut().set(ValueName::Arg(0), Constraint::Value(SignSet::alpha([-1.0])));
        a.join_from(&b).unwrap();
        let joined = a.constraints().get(ValueName::Arg(0)).unwrap();
        assert_eq!(joined, &Constraint::Value(SignSet::alpha([1.0, -1.0])));
    }

    #[test]
    fn join_renames_clashing_locals_deterministically() {
        let mut a = arg_state(0, Pc::new(5));
        let mut b = arg_state(0, Pc::new(5));
        let na = ValueName::Temp { offset: 1 };
        let nb = ValueName::Temp { offset: 3 };
        a.constraints_mut().set(na, Constraint::Value(SignSet::alpha([1.0])));
        a.top_frame_mut().set_local(0, na);
        b.constraints_mut().set(nb, Constraint::Value(SignSet::alpha([0.0])));
        b.top_frame_mut().set_local(0, nb);

        a.join_from(&b).unwrap();
        let merged = ValueName::Merged { offset: 5, slot: MergeSlot::Local(0) };
        assert_eq!(a.top_frame().local(0), Some(merged));
        assert_eq!(
            a.constraints().get(merged).unwrap(),
            &Constraint::Value(SignSet::alpha([0.0, 1.0]))
        );

        // A second identical join settles: the merged name absorbs the
        // foreign constraint without minting anything new.
        let snapshot = a.clone();
        a.join_from(&b).unwrap();
        assert_eq!(a, snapshot);
    }

    #[test]
    fn join_rejects_stack_height_mismatch() {
        let mut a = arg_state(0, Pc::new(2));
        let mut b = arg_state(0, Pc::new(2));
        let name = ValueName::Temp { offset: 0 };
        b.constraints_mut().set(name, Constraint::Value(SignSet::top()));
        b.top_frame_mut().push(name);
        let err = a.join_from(&b).unwrap_err();
        assert_eq!(err, AnalysisError::StackHeightMismatch { offset: 2, left: 0, right: 1 });
    }

    #[test]
    fn occurrences_sees_all_positions() {
        let mut s = arg_state(1, Pc::new(0));
        let name = ValueName::Arg(0);
        assert_eq!(s.occurrences(name), 1);
        s.top_frame_mut().push(name);
        assert_eq!(s.occurrences(name), 2);
        s.heap_insert(0, name);
        assert_eq!(s.occurrences(name), 3);
    }
}
