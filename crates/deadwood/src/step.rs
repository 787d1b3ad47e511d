//! The per-opcode transfer function.
//!
//! One step takes the joined state at a program point and the opcode sitting
//! there, and yields successor outcomes: continuing states to be joined back
//! into the state set, and terminal tags (sinks) to be collected per method.
//! The opcode union is closed — every tag is either modelled here or an
//! explicit unsupported-opcode error, never silent fall-through.

use std::{cmp::Ordering, collections::BTreeSet};

use smallvec::{SmallVec, smallvec};

use crate::{
    analysis::MethodAnalyzer,
    bytecode::{BinaryOp, ConstValue, InvokeAccess, Opcode},
    constraint::{Constraint, FloatCmpResult, ValueName},
    domain::{CmpCond, Domain, RelSet},
    error::{AnalysisError, StepResult, Terminal},
    state::AState,
    tracer::AnalysisTracer,
};

/// One successor outcome of a transfer step: a new abstract state, or a
/// terminal tag that sinks the path.
#[derive(Debug, Clone, PartialEq)]
pub enum Successor<D> {
    State(AState<D>),
    Terminal(Terminal),
}

pub(crate) type Successors<D> = SmallVec<[Successor<D>; 2]>;

/// The concrete index of an array access, when the abstract element pins one.
fn concrete_index<D: Domain>(index: &D) -> Option<i64> {
    let v = index.concrete()?;
    (v.fract() == 0.0).then_some(v as i64)
}

impl<D: Domain, Tr: AnalysisTracer> MethodAnalyzer<'_, D, Tr> {
    /// Applies the opcode at the state's program point.
    pub(crate) fn step(&mut self, state: &AState<D>) -> StepResult<Successors<D>> {
        let pc = state.pc();
        let offset = pc.offset;
        let code = self.code;
        let op = code.get(offset as usize).ok_or(AnalysisError::PcOutOfBounds { offset })?;
        self.op_hit.insert(offset);
        self.tracer.on_step(pc, op, state.frames().len());

        match op {
            Opcode::Push { value, .. } => {
                let mut s = state.clone();
                let name = ValueName::Temp { offset };
                let v = value.as_ref().map_or(0.0, ConstValue::as_f64);
                s.constraints_mut().set(name, Constraint::Value(D::constant(v)));
                self.producers.insert(name, offset);
                let frame = s.top_frame_mut();
                frame.push(name);
                frame.advance();
                Ok(smallvec![Successor::State(s)])
            }

            Opcode::Load { index, .. } => {
                let mut s = state.clone();
                let frame = s.top_frame_mut();
                let name = frame
                    .local(*index)
                    .ok_or(AnalysisError::UnknownLocal { offset, index: *index })?;
                // The pending store (if any) has been read; its span is live.
                let span = frame.take_pending(*index);
                frame.push(name);
                frame.advance();
                self.read_offsets.extend(span);
                if let ValueName::Arg(i) = name {
                    self.dead_args.remove(&i);
                }
                Ok(smallvec![Successor::State(s)])
            }

            Opcode::Store { index, .. } => {
                let mut s = state.clone();
                let frame = s.top_frame_mut();
                let name = frame.pop().ok_or(AnalysisError::StackUnderflow { offset })?;
                // Overwriting an unread store retires it as a dead-store
                // candidate; a later read on any path withdraws it again.
                let overwritten = frame.take_pending(*index);
                let mut span = BTreeSet::new();
                span.insert(offset);
                if let Some(&producer) = self.producers.get(&name) {
                    span.insert(producer);
                }
                frame.set_pending(*index, span);
                frame.set_local(*index, name);
                frame.advance();
                self.retired_stores.extend(overwritten);
                Ok(smallvec![Successor::State(s)])
            }

            Opcode::Dup { .. } => {
                let mut s = state.clone();
                let frame = s.top_frame_mut();
                let top = frame.peek().ok_or(AnalysisError::StackUnderflow { offset })?;
                frame.push(top);
                frame.advance();
                Ok(smallvec![Successor::State(s)])
            }

            Opcode::Binary { operant, .. } => self.binary(state, *operant, offset),

            Opcode::Negate { .. } => {
                let mut s = state.clone();
                let n = s.top_frame_mut().pop().ok_or(AnalysisError::StackUnderflow { offset })?;
                let v = self.value_constraint(&s, n, offset)?;
                let name = ValueName::Temp { offset };
                s.constraints_mut().set(name, Constraint::Value(v.neg()));
                self.producers.insert(name, offset);
                let frame = s.top_frame_mut();
                frame.push(name);
                frame.advance();
                Ok(smallvec![Successor::State(s)])
            }

            Opcode::Ifz { condition, target, .. } => {
                let mut s = state.clone();
                let n = s.top_frame_mut().pop().ok_or(AnalysisError::StackUnderflow { offset })?;
                let constraint = s
                    .constraints()
                    .get(n)
                    .cloned()
                    .ok_or(AnalysisError::MissingConstraint { offset })?;
                match constraint {
                    Constraint::FloatCmp(fc) => self.float_conditional(s, fc, *condition, *target, offset),
                    other => {
                        let v = other.numeric().ok_or(AnalysisError::TypeMismatch { offset })?;
                        self.conditional(s, n, v, None, *condition, *target, offset)
                    }
                }
            }

            Opcode::If { condition, target, .. } => {
                let mut s = state.clone();
                let frame = s.top_frame_mut();
                let n2 = frame.pop().ok_or(AnalysisError::StackUnderflow { offset })?;
                let n1 = frame.pop().ok_or(AnalysisError::StackUnderflow { offset })?;
                let c1 = s
                    .constraints()
                    .get(n1)
                    .cloned()
                    .ok_or(AnalysisError::MissingConstraint { offset })?;
                match c1 {
                    Constraint::FloatCmp(fc) => self.float_conditional(s, fc, *condition, *target, offset),
                    other => {
                        let v1 = other.numeric().ok_or(AnalysisError::TypeMismatch { offset })?;
                        let v2 = s
                            .constraints()
                            .get(n2)
                            .cloned()
                            .ok_or(AnalysisError::MissingConstraint { offset })?
                            .numeric()
                            .ok_or(AnalysisError::TypeMismatch { offset })?;
                        self.conditional(s, n1, v1, Some((n2, v2)), *condition, *target, offset)
                    }
                }
            }

            Opcode::Goto { target, .. } => {
                self.check_target(*target, offset)?;
                let mut s = state.clone();
                s.top_frame_mut().jump(*target);
                Ok(smallvec![Successor::State(s)])
            }

            Opcode::Incr { index, amount, .. } => {
                let mut s = state.clone();
                let name = s
                    .top_frame()
                    .local(*index)
                    .ok_or(AnalysisError::UnknownLocal { offset, index: *index })?;
                let v = self.value_constraint(&s, name, offset)?;
                let result = v.add(&D::constant(*amount as f64));
                if s.occurrences(name) <= 1 {
                    // The name is unique to this slot: rewrite in place.
                    s.constraints_mut().set(name, Constraint::Value(result));
                } else {
                    let fresh = ValueName::Temp { offset };
                    s.constraints_mut().set(fresh, Constraint::Value(result));
                    s.top_frame_mut().set_local(*index, fresh);
                    self.producers.insert(fresh, offset);
                }
                s.top_frame_mut().advance();
                Ok(smallvec![Successor::State(s)])
            }

            Opcode::Return { ty, .. } => {
                let mut s = state.clone();
                let ret = if ty.is_some() {
                    Some(s.top_frame_mut().pop().ok_or(AnalysisError::StackUnderflow { offset })?)
                } else {
                    None
                };
                if s.frames().len() == 1 {
                    self.retire_pendings(&s);
                    return Ok(smallvec![Successor::Terminal(Terminal::Ok)]);
                }
                let popped = s.pop_frame().ok_or(AnalysisError::FrameMismatch { offset })?;
                for o in popped.pending_offsets() {
                    self.retired_stores.insert(o);
                }
                let caller = s.top_frame_mut();
                if let Some(r) = ret {
                    caller.push(r);
                }
                caller.advance();
                Ok(smallvec![Successor::State(s)])
            }

            Opcode::Get { field, .. } => {
                let mut s = state.clone();
                let name = ValueName::Temp { offset };
                // Only the assertion-machinery sentinel is modelled; any
                // other field reads as an unknown value.
                let v = if field.name == "$assertionsDisabled" { D::constant(0.0) } else { D::top() };
                s.constraints_mut().set(name, Constraint::Value(v));
                self.producers.insert(name, offset);
                let frame = s.top_frame_mut();
                frame.push(name);
                frame.advance();
                Ok(smallvec![Successor::State(s)])
            }

            Opcode::New { class, .. } => {
                if class == "java/lang/AssertionError" {
                    self.retire_pendings(state);
                    return Ok(smallvec![Successor::Terminal(Terminal::AssertionError)]);
                }
                // Other constructions are not modelled; the path continues.
                let mut s = state.clone();
                s.top_frame_mut().advance();
                Ok(smallvec![Successor::State(s)])
            }

            Opcode::NewArray { .. } => self.new_array(state, offset),
            Opcode::ArrayStore { .. } => self.array_store(state, offset),
            Opcode::ArrayLoad { .. } => self.array_load(state, offset),

            Opcode::ArrayLength { .. } => {
                let mut s = state.clone();
                let array = s.top_frame_mut().pop().ok_or(AnalysisError::StackUnderflow { offset })?;
                let (_, length) = self.array_of(&s, array, offset)?;
                let frame = s.top_frame_mut();
                frame.push(length);
                frame.advance();
                Ok(smallvec![Successor::State(s)])
            }

            Opcode::Cast { .. } => {
                // Abstract identity: the value keeps its name.
                let mut s = state.clone();
                s.top_frame_mut().advance();
                Ok(smallvec![Successor::State(s)])
            }

            Opcode::CompareFloating { onnan, .. } => {
                let mut s = state.clone();
                let frame = s.top_frame_mut();
                let n2 = frame.pop().ok_or(AnalysisError::StackUnderflow { offset })?;
                let n1 = frame.pop().ok_or(AnalysisError::StackUnderflow { offset })?;
                let v1 = self.value_constraint(&s, n1, offset)?;
                let v2 = self.value_constraint(&s, n2, offset)?;
                let on_nan = if *onnan < 0 { Ordering::Less } else { Ordering::Greater };
                let mut rels = v1.compare_floating(&v2);
                if !v1.is_bottom() && !v2.is_bottom() {
                    // NaN can never be excluded, so its sentinel relation is
                    // always possible.
                    rels.insert(on_nan);
                }
                let name = ValueName::Temp { offset };
                s.constraints_mut()
                    .set(name, Constraint::FloatCmp(FloatCmpResult { left: n1, right: n2, rels, on_nan }));
                self.producers.insert(name, offset);
                let frame = s.top_frame_mut();
                frame.push(name);
                frame.advance();
                Ok(smallvec![Successor::State(s)])
            }

            Opcode::Invoke { access, method, .. } => {
                // Interprocedural analysis is out of scope: an invocation is
                // an arity-correct pop followed by an unknown result.
                let mut s = state.clone();
                let receiver = usize::from(!matches!(access, InvokeAccess::Static | InvokeAccess::Dynamic));
                {
                    let frame = s.top_frame_mut();
                    for _ in 0..method.args.len() + receiver {
                        frame.pop().ok_or(AnalysisError::StackUnderflow { offset })?;
                    }
                }
                if !method.returns_void() {
                    let name = ValueName::Temp { offset };
                    s.constraints_mut().set(name, Constraint::Value(D::top()));
                    self.producers.insert(name, offset);
                    s.top_frame_mut().push(name);
                }
                s.top_frame_mut().advance();
                Ok(smallvec![Successor::State(s)])
            }

            Opcode::Throw { .. } => Err(AnalysisError::UnsupportedOpcode { offset, opcode: op.mnemonic() }),
        }
    }

    /// Binary arithmetic, with the divide-by-zero protocol for `div`/`rem`:
    /// a possibly-zero divisor emits the terminal, and the computation
    /// continues against the non-zero portion unless the divisor is exactly
    /// zero.
    fn binary(&mut self, state: &AState<D>, operant: BinaryOp, offset: u32) -> StepResult<Successors<D>> {
        let mut s = state.clone();
        let (n1, n2) = {
            let frame = s.top_frame_mut();
            let n2 = frame.pop().ok_or(AnalysisError::StackUnderflow { offset })?;
            let n1 = frame.pop().ok_or(AnalysisError::StackUnderflow { offset })?;
            (n1, n2)
        };
        let v1 = self.value_constraint(&s, n1, offset)?;
        let mut v2 = self.value_constraint(&s, n2, offset)?;

        let mut out = Successors::new();
        if matches!(operant, BinaryOp::Div | BinaryOp::Rem) && v2.contains(0.0) {
            out.push(Successor::Terminal(Terminal::DivideByZero));
            self.retire_pendings(state);
            let (nonzero, _) = D::constrain(&v2, &D::constant(0.0), CmpCond::Ne);
            if nonzero.is_bottom() {
                return Ok(out);
            }
            s.constraints_mut().set(n2, Constraint::Value(nonzero.clone()));
            v2 = nonzero;
        }

        let result = match operant {
            BinaryOp::Add => v1.add(&v2),
            BinaryOp::Sub => v1.sub(&v2),
            BinaryOp::Mul => v1.mul(&v2),
            BinaryOp::Div => v1.div(&v2),
            BinaryOp::Rem => v1.rem(&v2),
        };
        let name = ValueName::Temp { offset };
        s.constraints_mut().set(name, Constraint::Value(result));
        self.producers.insert(name, offset);
        let frame = s.top_frame_mut();
        frame.push(name);
        frame.advance();
        out.push(Successor::State(s));
        Ok(out)
    }

    /// Two-sided conditional emission with branch refinement under the
    /// operand names. With a right-hand operand, both names are refined on
    /// each side (the right one through the swapped condition).
    #[expect(clippy::too_many_arguments, reason = "branch emission wants the full picture")]
    fn conditional(
        &mut self,
        s: AState<D>,
        n1: ValueName,
        v1: D,
        rhs: Option<(ValueName, D)>,
        cond: CmpCond,
        target: u32,
        offset: u32,
    ) -> StepResult<Successors<D>> {
        self.check_target(target, offset)?;
        let v2 = rhs.as_ref().map_or_else(|| D::constant(0.0), |(_, v)| v.clone());
        let outcomes = v1.compare(&v2, cond);
        let (when_true, when_false) = D::constrain(&v1, &v2, cond);
        let refine_rhs = rhs.map(|(n2, v2v)| (n2, D::constrain(&v2v, &v1, cond.swap())));

        let mut out = Successors::new();
        if outcomes.may_true {
            let mut st = s.clone();
            st.constraints_mut().set(n1, Constraint::Value(when_true));
            if let Some((n2, (t2, _))) = &refine_rhs {
                st.constraints_mut().set(*n2, Constraint::Value(t2.clone()));
            }
            st.top_frame_mut().jump(target);
            out.push(Successor::State(st));
        }
        if outcomes.may_false {
            let mut st = s;
            st.constraints_mut().set(n1, Constraint::Value(when_false));
            if let Some((n2, (_, f2))) = refine_rhs {
                st.constraints_mut().set(n2, Constraint::Value(f2));
            }
            st.top_frame_mut().advance();
            out.push(Successor::State(st));
        }
        if out.is_empty() {
            // No feasible side: the branch never executed abstractly.
            self.op_hit.remove(&offset);
        }
        Ok(out)
    }

    /// Conditional consuming a float-compare result: the stored relation set
    /// is filtered through the branch condition, and the left operand is
    /// re-refined per surviving relation.
    fn float_conditional(
        &mut self,
        s: AState<D>,
        fc: FloatCmpResult,
        cond: CmpCond,
        target: u32,
        offset: u32,
    ) -> StepResult<Successors<D>> {
        self.check_target(target, offset)?;
        let left = self.value_constraint(&s, fc.left, offset)?;
        let right = self.value_constraint(&s, fc.right, offset)?;
        let (true_rels, false_rels) = fc.rels.split(cond);
        let refine = |rels: RelSet| {
            let mut acc = D::bottom();
            for rel in rels.iter() {
                let (refined, _) = D::constrain(&left, &right, CmpCond::from_rel(rel));
                acc = acc.join(&refined);
            }
            acc
        };

        let mut out = Successors::new();
        if !true_rels.is_empty() {
            let mut st = s.clone();
            st.constraints_mut().set(fc.left, Constraint::Value(refine(true_rels)));
            st.top_frame_mut().jump(target);
            out.push(Successor::State(st));
        }
        if !false_rels.is_empty() {
            let mut st = s;
            st.constraints_mut().set(fc.left, Constraint::Value(refine(false_rels)));
            st.top_frame_mut().advance();
            out.push(Successor::State(st));
        }
        if out.is_empty() {
            self.op_hit.remove(&offset);
        }
        Ok(out)
    }

    fn new_array(&mut self, state: &AState<D>, offset: u32) -> StepResult<Successors<D>> {
        let mut s = state.clone();
        let size_name = s.top_frame_mut().pop().ok_or(AnalysisError::StackUnderflow { offset })?;
        let size = self.value_constraint(&s, size_name, offset)?;
        let negative = size.compare(&D::constant(0.0), CmpCond::Lt);
        if negative.may_true && !negative.may_false {
            self.retire_pendings(state);
            return Ok(smallvec![Successor::Terminal(Terminal::NegativeSize)]);
        }
        // Allocation-site keyed: re-processing this offset reuses its
        // address, keeping the heap finite over loops.
        let addr = self.alloc_site(offset);
        let name = ValueName::Temp { offset };
        s.heap_insert(addr, name);
        s.constraints_mut().set(name, Constraint::Array { addr, length: size_name });
        self.producers.insert(name, offset);
        let frame = s.top_frame_mut();
        frame.push(name);
        frame.advance();
        Ok(smallvec![Successor::State(s)])
    }

    fn array_store(&mut self, state: &AState<D>, offset: u32) -> StepResult<Successors<D>> {
        let mut s = state.clone();
        let (value_name, index_name, array_name) = {
            let frame = s.top_frame_mut();
            let value = frame.pop().ok_or(AnalysisError::StackUnderflow { offset })?;
            let index = frame.pop().ok_or(AnalysisError::StackUnderflow { offset })?;
            let array = frame.pop().ok_or(AnalysisError::StackUnderflow { offset })?;
            (value, index, array)
        };
        let (addr, length_name) = self.array_of(&s, array_name, offset)?;
        let length = self.value_constraint(&s, length_name, offset)?;
        let index = self.value_constraint(&s, index_name, offset)?;

        let mut out = Successors::new();
        let Some(index) = self.check_bounds(&mut s, &mut out, state, index_name, index, &length, offset)? else {
            return Ok(out);
        };

        let value = s
            .constraints()
            .get(value_name)
            .cloned()
            .ok_or(AnalysisError::MissingConstraint { offset })?;
        if let Some(i) = concrete_index(&index) {
            s.constraints_mut().set(ValueName::Elem { addr, index: i }, value);
        } else {
            // Weak update: the index could be any slot, so every tracked
            // slot absorbs the value.
            let Constraint::Value(value) = value else {
                return Err(AnalysisError::TypeMismatch { offset });
            };
            for slot in s.constraints().elem_slots(addr) {
                if let Some(Constraint::Value(existing)) = s.constraints().get(slot).cloned() {
                    s.constraints_mut().set(slot, Constraint::Value(existing.join(&value)));
                }
            }
        }
        s.top_frame_mut().advance();
        out.push(Successor::State(s));
        Ok(out)
    }

    fn array_load(&mut self, state: &AState<D>, offset: u32) -> StepResult<Successors<D>> {
        let mut s = state.clone();
        let (index_name, array_name) = {
            let frame = s.top_frame_mut();
            let index = frame.pop().ok_or(AnalysisError::StackUnderflow { offset })?;
            let array = frame.pop().ok_or(AnalysisError::StackUnderflow { offset })?;
            (index, array)
        };
        let (addr, length_name) = self.array_of(&s, array_name, offset)?;
        let length = self.value_constraint(&s, length_name, offset)?;
        let index = self.value_constraint(&s, index_name, offset)?;

        let mut out = Successors::new();
        let Some(index) = self.check_bounds(&mut s, &mut out, state, index_name, index, &length, offset)? else {
            return Ok(out);
        };

        if let Some(i) = concrete_index(&index) {
            let elem = ValueName::Elem { addr, index: i };
            if !s.constraints().contains(elem) {
                s.constraints_mut().set(elem, Constraint::Value(D::top()));
            }
            s.top_frame_mut().push(elem);
        } else {
            // Unknown slot: the result is the join of everything the array
            // may hold.
            let slots = s.constraints().elem_slots(addr);
            let mut acc = D::bottom();
            let mut opaque = slots.is_empty();
            for slot in &slots {
                match s.constraints().get(*slot) {
                    Some(Constraint::Value(v)) => acc = acc.join(v),
                    _ => opaque = true,
                }
            }
            let name = ValueName::Temp { offset };
            let result = if opaque { D::top() } else { acc };
            s.constraints_mut().set(name, Constraint::Value(result));
            self.producers.insert(name, offset);
            s.top_frame_mut().push(name);
        }
        s.top_frame_mut().advance();
        out.push(Successor::State(s));
        Ok(out)
    }

    /// Emits the out-of-bounds terminal when the index may escape
    /// `[0, length)` and installs the in-bounds refinement under the index's
    /// own name. Returns `None` when no in-bounds execution exists.
    #[expect(clippy::too_many_arguments, reason = "bounds handling spans both states")]
    fn check_bounds(
        &mut self,
        s: &mut AState<D>,
        out: &mut Successors<D>,
        original: &AState<D>,
        index_name: ValueName,
        index: D,
        length: &D,
        offset: u32,
    ) -> StepResult<Option<D>> {
        let zero = D::constant(0.0);
        let below = index.compare(&zero, CmpCond::Lt);
        let above = index.compare(length, CmpCond::Ge);
        if !below.may_true && !above.may_true {
            return Ok(Some(index));
        }
        out.push(Successor::Terminal(Terminal::ArrayOutOfBounds));
        self.retire_pendings(original);
        let (non_negative, _) = D::constrain(&index, &zero, CmpCond::Ge);
        let (in_bounds, _) = D::constrain(&non_negative, length, CmpCond::Lt);
        if in_bounds.is_bottom() {
            return Ok(None);
        }
        s.constraints_mut().set(index_name, Constraint::Value(in_bounds.clone()));
        Ok(Some(in_bounds))
    }

    fn value_constraint(&self, state: &AState<D>, name: ValueName, offset: u32) -> StepResult<D> {
        match state.constraints().get(name) {
            Some(Constraint::Value(v)) => Ok(v.clone()),
            Some(_) => Err(AnalysisError::TypeMismatch { offset }),
            None => Err(AnalysisError::MissingConstraint { offset }),
        }
    }

    fn array_of(&self, state: &AState<D>, name: ValueName, offset: u32) -> StepResult<(u32, ValueName)> {
        match state.constraints().get(name) {
            Some(Constraint::Array { addr, length }) => Ok((*addr, *length)),
            Some(_) => Err(AnalysisError::TypeMismatch { offset }),
            None => Err(AnalysisError::MissingConstraint { offset }),
        }
    }

    fn check_target(&self, target: u32, offset: u32) -> StepResult<()> {
        if (target as usize) < self.code.len() {
            Ok(())
        } else {
            Err(AnalysisError::PcOutOfBounds { offset })
        }
    }

    fn alloc_site(&mut self, offset: u32) -> u32 {
        if let Some(&addr) = self.alloc_sites.get(&offset) {
            return addr;
        }
        let addr = self.next_addr;
        self.next_addr += 1;
        self.alloc_sites.insert(offset, addr);
        addr
    }

    /// Retires every pending store span of a state that is about to sink
    /// into a terminal: a value unread on every path is dead.
    fn retire_pendings(&mut self, state: &AState<D>) {
        for frame in state.frames() {
            for o in frame.pending_offsets() {
                self.retired_stores.insert(o);
            }
        }
    }
}
