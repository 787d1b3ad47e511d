//! The fixed-point analysis driver.
//!
//! A [`MethodAnalyzer`] is single-use: it seeds the entry state from the
//! method signature (one frame, one top-bound name per parameter), runs the
//! worklist to a fixed point under the configured limits, and produces a
//! [`MethodAnalysis`]. All per-method trackers live inside the analyzer, so
//! nothing has to be cleared between methods — the class driver builds a
//! fresh analyzer per entry.

use std::{collections::BTreeSet, marker::PhantomData};

use ahash::{AHashMap, AHashSet};
use indexmap::IndexMap;
use serde::Serialize;

use crate::{
    bytecode::{DecompiledClass, Opcode},
    constraint::{Constraint, Constraints, ValueName},
    domain::Domain,
    error::{AnalysisError, ClassError, StepResult, Terminal},
    limits::AnalysisLimits,
    lines::LineTable,
    state::{AState, Frame, Pc},
    state_set::StateSet,
    step::Successor,
    tracer::{AnalysisTracer, NoopTracer},
};

/// The result of analysing one method.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodAnalysis {
    /// Bytecode offsets that are dead: never hit at fixed point, or recorded
    /// as a dead store (with the opcode that produced the stored value).
    pub dead_offsets: Vec<u32>,
    /// The dead offsets mapped through the method's offset→line table.
    pub dead_lines: Vec<u32>,
    /// Parameter indices whose value is never loaded.
    pub dead_args: Vec<u16>,
    /// Whether the worklist drained within the iteration budget. When it did
    /// not, the dead sets are left empty: an unfinished analysis must not
    /// report dead code.
    pub reached_fixed_point: bool,
    /// Every terminal outcome the method can reach.
    pub terminals: BTreeSet<Terminal>,
}

impl MethodAnalysis {
    /// Fills `dead_lines` from the method's offset→line table.
    pub fn map_lines(&mut self, table: &LineTable) {
        self.dead_lines = table.dead_lines(&self.dead_offsets);
    }
}

/// Per-method worklist driver, generic over the abstract domain and tracer.
#[derive(Debug)]
pub struct MethodAnalyzer<'a, D, Tr> {
    pub(crate) code: &'a [Opcode],
    pub(crate) limits: AnalysisLimits,
    pub(crate) tracer: Tr,
    param_count: u16,
    /// Offsets executed by at least one successful transfer step.
    pub(crate) op_hit: AHashSet<u32>,
    /// Parameter indices not yet seen by a `load`.
    pub(crate) dead_args: BTreeSet<u16>,
    /// Dead-store candidates: spans overwritten before a read, or still
    /// pending when a path sank into a terminal.
    pub(crate) retired_stores: AHashSet<u32>,
    /// Offsets whose stored value some path did read; these never die.
    pub(crate) read_offsets: AHashSet<u32>,
    /// Name → offset of the opcode that minted it, for dead-store spans.
    pub(crate) producers: AHashMap<ValueName, u32>,
    /// Allocation sites: `newarray` offset → reused heap address.
    pub(crate) alloc_sites: AHashMap<u32, u32>,
    pub(crate) next_addr: u32,
    pub(crate) terminals: BTreeSet<Terminal>,
    _domain: PhantomData<D>,
}

impl<'a, D: Domain, Tr: AnalysisTracer> MethodAnalyzer<'a, D, Tr> {
    pub fn new(code: &'a [Opcode], param_count: u16, limits: AnalysisLimits, tracer: Tr) -> Self {
        Self {
            code,
            limits,
            tracer,
            param_count,
            op_hit: AHashSet::new(),
            dead_args: BTreeSet::new(),
            retired_stores: AHashSet::new(),
            read_offsets: AHashSet::new(),
            producers: AHashMap::new(),
            alloc_sites: AHashMap::new(),
            next_addr: 0,
            terminals: BTreeSet::new(),
            _domain: PhantomData,
        }
    }

    /// The entry state: one frame at offset 0, each parameter bound to top
    /// under its `Arg` name.
    fn entry_state(&mut self) -> AState<D> {
        let mut frame = Frame::new(Pc::new(0));
        let mut constraints = Constraints::new();
        for i in 0..self.param_count {
            frame.set_local(i, ValueName::Arg(i));
            constraints.set(ValueName::Arg(i), Constraint::Value(D::top()));
            self.dead_args.insert(i);
        }
        AState::new(frame, constraints)
    }

    /// Runs the worklist to a fixed point and collects the results.
    pub fn run(mut self) -> StepResult<MethodAnalysis> {
        let mut set = StateSet::new(self.limits.widen_after);
        if !self.code.is_empty() {
            let entry = self.entry_state();
            set.join(entry)?;
        }

        let mut iterations = 0usize;
        let mut fixed_point = true;
        while let Some(state) = set.pop() {
            if iterations >= self.limits.max_iterations {
                fixed_point = false;
                break;
            }
            iterations += 1;
            for successor in self.step(&state)? {
                match successor {
                    Successor::State(s) => {
                        let pc = s.pc();
                        let changed = set.join(s)?;
                        self.tracer.on_join(pc, changed);
                    }
                    Successor::Terminal(terminal) => {
                        self.terminals.insert(terminal);
                        self.tracer.on_terminal(terminal);
                    }
                }
            }
        }
        self.tracer.on_finished(iterations, fixed_point);

        let (dead_offsets, dead_args) = if fixed_point {
            let mut dead: BTreeSet<u32> = self
                .code
                .iter()
                .map(Opcode::offset)
                .filter(|o| !self.op_hit.contains(o))
                .collect();
            dead.extend(self.retired_stores.iter().copied().filter(|o| !self.read_offsets.contains(o)));
            (dead.into_iter().collect(), self.dead_args.iter().copied().collect())
        } else {
            (Vec::new(), Vec::new())
        };

        Ok(MethodAnalysis {
            dead_offsets,
            dead_lines: Vec::new(),
            dead_args,
            reached_fixed_point: fixed_point,
            terminals: self.terminals,
        })
    }
}

/// The outcome of one entry method in a class run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MethodOutcome {
    /// Analysis reached a result; the rewriter may apply it.
    Analyzed(MethodAnalysis),
    /// A recoverable per-method error; the rewriter leaves the method alone.
    Skipped { reason: AnalysisError },
}

/// The per-class analysis report, keyed by method name in entry order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassReport {
    pub class_name: String,
    pub methods: IndexMap<String, MethodOutcome>,
}

/// Analyses every entry method of a decompiled class.
///
/// Unsupported opcodes skip the affected method; missing methods or code
/// attributes and internal analysis bugs fail the run.
pub fn debloat_class<D: Domain, S: AsRef<str>>(
    class: &DecompiledClass,
    entries: &[S],
    limits: AnalysisLimits,
) -> Result<ClassReport, ClassError> {
    let mut methods = IndexMap::new();
    for entry in entries {
        let name = entry.as_ref();
        let method = class
            .method(name)
            .ok_or_else(|| ClassError::MissingMethod(name.to_string()))?;
        let code = method
            .code
            .as_ref()
            .ok_or_else(|| ClassError::MissingCode(name.to_string()))?;
        let param_count = method.params.len() as u16;
        let analyzer = MethodAnalyzer::<D, _>::new(&code.bytecode, param_count, limits, NoopTracer);
        let outcome = match analyzer.run() {
            Ok(mut analysis) => {
                analysis.map_lines(&LineTable::new(code.lines.clone()));
                MethodOutcome::Analyzed(analysis)
            }
            Err(error) if error.is_recoverable() => MethodOutcome::Skipped { reason: error },
            Err(error) => return Err(ClassError::Analysis { method: name.to_string(), error }),
        };
        methods.insert(name.to_string(), outcome);
    }
    Ok(ClassReport { class_name: class.name.clone(), methods })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        bytecode::BinaryOp,
        domain::{CmpCond, Interval, SignSet},
        tracer::NoopTracer,
    };

    fn analyze<D: Domain>(code: &[Opcode], params: u16) -> MethodAnalysis {
        MethodAnalyzer::<D, _>::new(code, params, AnalysisLimits::default(), NoopTracer)
            .run()
            .unwrap()
    }

    fn push(offset: u32, value: i64) -> Opcode {
        Opcode::Push { offset, value: Some(crate::bytecode::ConstValue::Int { value }) }
    }

    fn iret(offset: u32) -> Opcode {
        Opcode::Return { offset, ty: Some(crate::bytecode::JvmType::Primitive(crate::bytecode::Primitive::Int)) }
    }

    /// A counting loop written with `incr` reaches a fixed point under the
    /// interval domain thanks to widening.
    #[test]
    fn interval_loop_terminates_via_widening() {
        let code = vec![
            push(0, 0),
            Opcode::Store { offset: 1, ty: None, index: 0 },
            Opcode::Load { offset: 2, ty: None, index: 0 },
            push(3, 10),
            Opcode::If { offset: 4, condition: CmpCond::Ge, target: 8 },
            Opcode::Incr { offset: 5, index: 0, amount: 1 },
            Opcode::Goto { offset: 6, target: 2 },
            push(7, 0),
            Opcode::Load { offset: 8, ty: None, index: 0 },
            iret(9),
        ];
        let analysis = analyze::<Interval>(&code, 0);
        assert!(analysis.reached_fixed_point);
        assert!(analysis.terminals.contains(&Terminal::Ok));
        // The unconditional loop structure leaves only the stray push dead.
        assert_eq!(analysis.dead_offsets, vec![7]);
    }

    /// A loop that stores to a local reaches a fixed point because names are
    /// minted per site, so re-processing the loop head is idempotent.
    #[test]
    fn store_loop_terminates() {
        let code = vec![
            push(0, 0),
            Opcode::Store { offset: 1, ty: None, index: 0 },
            Opcode::Load { offset: 2, ty: None, index: 0 },
            push(3, 1),
            Opcode::Binary { offset: 4, ty: None, operant: BinaryOp::Add },
            Opcode::Store { offset: 5, ty: None, index: 0 },
            Opcode::Load { offset: 6, ty: None, index: 0 },
            push(7, 10),
            Opcode::If { offset: 8, condition: CmpCond::Lt, target: 2 },
            Opcode::Load { offset: 9, ty: None, index: 0 },
            iret(10),
        ];
        let analysis = analyze::<SignSet>(&code, 0);
        assert!(analysis.reached_fixed_point);
        assert!(analysis.dead_offsets.is_empty());
        assert_eq!(analysis.terminals, BTreeSet::from([Terminal::Ok]));
    }

    /// Running the same method twice yields identical results.
    #[test]
    fn reanalysis_is_idempotent() {
        let code = vec![
            Opcode::Load { offset: 0, ty: None, index: 0 },
            Opcode::Ifz { offset: 1, condition: CmpCond::Gt, target: 4 },
            push(2, 0),
            iret(3),
            push(4, 1),
            iret(5),
        ];
        let first = analyze::<SignSet>(&code, 1);
        let second = analyze::<SignSet>(&code, 1);
        assert_eq!(first, second);
        assert!(first.dead_offsets.is_empty());
    }

    /// After the worklist drains, every successor of every installed state
    /// is already subsumed by the state set.
    #[test]
    fn fixed_point_is_stable() {
        let code = vec![
            Opcode::Load { offset: 0, ty: None, index: 0 },
            Opcode::Ifz { offset: 1, condition: CmpCond::Gt, target: 4 },
            push(2, 0),
            iret(3),
            push(4, 1),
            iret(5),
        ];
        let mut analyzer = MethodAnalyzer::<SignSet, _>::new(&code, 1, AnalysisLimits::default(), NoopTracer);
        let mut set = StateSet::new(analyzer.limits.widen_after);
        let entry = analyzer.entry_state();
        set.join(entry).unwrap();
        while let Some(state) = set.pop() {
            for successor in analyzer.step(&state).unwrap() {
                if let Successor::State(s) = successor {
                    set.join(s).unwrap();
                }
            }
        }
        let points: Vec<_> = set.points().collect();
        for pc in points {
            let state = set.state_at(pc).unwrap().clone();
            for successor in analyzer.step(&state).unwrap() {
                if let Successor::State(s) = successor {
                    assert!(!set.join(s).unwrap(), "state at {pc} was not a fixed point");
                }
            }
        }
    }

    /// The iteration budget turns a diverging analysis into a soft failure
    /// with empty dead sets.
    #[test]
    fn budget_exhaustion_is_soft() {
        let code = vec![
            Opcode::Load { offset: 0, ty: None, index: 0 },
            Opcode::Ifz { offset: 1, condition: CmpCond::Gt, target: 0 },
            push(2, 0),
            iret(3),
        ];
        let limits = AnalysisLimits { max_iterations: 2, widen_after: 3 };
        let analysis = MethodAnalyzer::<SignSet, _>::new(&code, 1, limits, NoopTracer).run().unwrap();
        assert!(!analysis.reached_fixed_point);
        assert!(analysis.dead_offsets.is_empty());
        assert!(analysis.dead_args.is_empty());
    }
}
