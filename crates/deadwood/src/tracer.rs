//! Analysis tracing infrastructure.
//!
//! A trait-based hook system with zero-cost defaults: the driver is
//! parameterized over `Tr: AnalysisTracer`, so with [`NoopTracer`] every hook
//! monomorphises away. [`StderrTracer`] gives a human-readable trace of the
//! fixed-point iteration, [`RecordingTracer`] captures events for tests and
//! post-mortems.

use std::fmt;

use crate::{bytecode::Opcode, error::Terminal, state::Pc};

/// One recorded analysis event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// The transfer function ran an opcode.
    Step {
        pc: Pc,
        mnemonic: &'static str,
        frame_depth: usize,
    },
    /// A successor state was joined into the state set.
    Join {
        pc: Pc,
        changed: bool,
    },
    /// A terminal outcome was collected.
    Terminal(Terminal),
    /// The worklist drained (or the iteration budget ran out).
    Finished {
        iterations: usize,
        fixed_point: bool,
    },
}

/// Hooks into the fixed-point iteration.
///
/// All methods default to no-ops; implementations override only what they
/// care about.
pub trait AnalysisTracer: fmt::Debug {
    /// Called before each transfer-function step.
    #[inline(always)]
    fn on_step(&mut self, _pc: Pc, _opcode: &Opcode, _frame_depth: usize) {}

    /// Called after a successor state was joined into the state set.
    #[inline(always)]
    fn on_join(&mut self, _pc: Pc, _changed: bool) {}

    /// Called when a terminal outcome is collected.
    #[inline(always)]
    fn on_terminal(&mut self, _terminal: Terminal) {}

    /// Called once when the iteration ends.
    #[inline(always)]
    fn on_finished(&mut self, _iterations: usize, _fixed_point: bool) {}
}

/// A mutable reference forwards every hook, so callers can keep their tracer
/// and inspect it after the (consuming) driver run.
impl<T: AnalysisTracer> AnalysisTracer for &mut T {
    fn on_step(&mut self, pc: Pc, opcode: &Opcode, frame_depth: usize) {
        (**self).on_step(pc, opcode, frame_depth);
    }

    fn on_join(&mut self, pc: Pc, changed: bool) {
        (**self).on_join(pc, changed);
    }

    fn on_terminal(&mut self, terminal: Terminal) {
        (**self).on_terminal(terminal);
    }

    fn on_finished(&mut self, iterations: usize, fixed_point: bool) {
        (**self).on_finished(iterations, fixed_point);
    }
}

/// The production default: every hook compiles to nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl AnalysisTracer for NoopTracer {}

/// Human-readable iteration log on stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrTracer;

impl AnalysisTracer for StderrTracer {
    fn on_step(&mut self, pc: Pc, opcode: &Opcode, frame_depth: usize) {
        eprintln!("step {pc} {} (depth {frame_depth})", opcode.mnemonic());
    }

    fn on_join(&mut self, pc: Pc, changed: bool) {
        if changed {
            eprintln!("join {pc} grew");
        }
    }

    fn on_terminal(&mut self, terminal: Terminal) {
        eprintln!("terminal: {terminal}");
    }

    fn on_finished(&mut self, iterations: usize, fixed_point: bool) {
        if fixed_point {
            eprintln!("fixed point after {iterations} iterations");
        } else {
            eprintln!("iteration budget exhausted after {iterations} iterations");
        }
    }
}

/// Records every event for later inspection.
#[derive(Debug, Clone, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// The offsets stepped, in execution order.
    pub fn stepped_offsets(&self) -> Vec<u32> {
        self.events
            .iter()
            .filter_map(|e| match e {
                TraceEvent::Step { pc, .. } => Some(pc.offset),
                _ => None,
            })
            .collect()
    }
}

impl AnalysisTracer for RecordingTracer {
    fn on_step(&mut self, pc: Pc, opcode: &Opcode, frame_depth: usize) {
        self.events.push(TraceEvent::Step { pc, mnemonic: opcode.mnemonic(), frame_depth });
    }

    fn on_join(&mut self, pc: Pc, changed: bool) {
        self.events.push(TraceEvent::Join { pc, changed });
    }

    fn on_terminal(&mut self, terminal: Terminal) {
        self.events.push(TraceEvent::Terminal(terminal));
    }

    fn on_finished(&mut self, iterations: usize, fixed_point: bool) {
        self.events.push(TraceEvent::Finished { iterations, fixed_point });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::MethodAnalyzer,
        bytecode::{ConstValue, JvmType, Primitive},
        domain::SignSet,
        limits::AnalysisLimits,
    };

    /// A recording tracer passed by reference survives the consuming run and
    /// holds the step sequence and the final event.
    #[test]
    fn recording_tracer_captures_the_run() {
        let code = vec![
            Opcode::Push { offset: 0, value: Some(ConstValue::Int { value: 1 }) },
            Opcode::Return { offset: 1, ty: Some(JvmType::Primitive(Primitive::Int)) },
        ];
        let mut tracer = RecordingTracer::new();
        MethodAnalyzer::<SignSet, _>::new(&code, 0, AnalysisLimits::default(), &mut tracer)
            .run()
            .unwrap();
        assert_eq!(tracer.stepped_offsets(), vec![0, 1]);
        assert!(tracer.events().contains(&TraceEvent::Terminal(Terminal::Ok)));
        assert!(matches!(
            tracer.events().last(),
            Some(TraceEvent::Finished { fixed_point: true, .. })
        ));
    }
}
