//! The state set: one joined abstract state per program point, plus the
//! worklist of points whose state grew since they were last processed.
//!
//! Re-processing is gated on strict growth, which guarantees termination for
//! lattices without infinite ascending chains. The interval domain has such
//! chains, so after a configurable number of joins at the same point the
//! installed element is widened: any bound that strictly grew jumps to its
//! infinity.

use ahash::AHashMap;
use indexmap::{IndexMap, IndexSet};

use crate::{
    constraint::Constraint,
    domain::Domain,
    error::AnalysisError,
    state::{AState, Pc},
};

/// Program point → joined state, with the needs-work set.
#[derive(Debug)]
pub struct StateSet<D> {
    states: IndexMap<Pc, AState<D>>,
    needs_work: IndexSet<Pc>,
    join_counts: AHashMap<Pc, u32>,
    widen_after: u32,
}

impl<D: Domain> StateSet<D> {
    pub fn new(widen_after: u32) -> Self {
        Self {
            states: IndexMap::new(),
            needs_work: IndexSet::new(),
            join_counts: AHashMap::new(),
            widen_after,
        }
    }

    /// Joins a successor state into the set.
    ///
    /// First visit installs the state and enqueues its point; otherwise the
    /// incoming state joins into a clone of the installed one, and only a
    /// strictly grown result is installed and re-enqueued. Returns whether
    /// the point changed.
    pub fn join(&mut self, state: AState<D>) -> Result<bool, AnalysisError> {
        let pc = state.pc();
        let Some(installed) = self.states.get(&pc) else {
            self.states.insert(pc, state);
            self.needs_work.insert(pc);
            return Ok(true);
        };

        let mut merged = installed.clone();
        merged.join_from(&state)?;

        let visits = self.join_counts.entry(pc).or_insert(0);
        *visits += 1;
        if *visits >= self.widen_after {
            widen_constraints(installed, &mut merged);
        }

        if merged == self.states[&pc] {
            return Ok(false);
        }
        self.states.insert(pc, merged);
        self.needs_work.insert(pc);
        Ok(true)
    }

    /// Pops one pending program point and returns a clone of its state.
    /// The drain order is LIFO; any fair order is correct.
    pub fn pop(&mut self) -> Option<AState<D>> {
        let pc = self.needs_work.pop()?;
        self.states.get(&pc).cloned()
    }

    pub fn pending(&self) -> usize {
        self.needs_work.len()
    }

    /// The joined state currently installed at a program point.
    pub fn state_at(&self, pc: Pc) -> Option<&AState<D>> {
        self.states.get(&pc)
    }

    /// Program points visited so far, in first-visit order.
    pub fn points(&self) -> impl Iterator<Item = Pc> + '_ {
        self.states.keys().copied()
    }
}

/// Replaces every value constraint of `merged` that also exists in `old`
/// with its widened version, cutting infinite ascending chains.
fn widen_constraints<D: Domain>(old: &AState<D>, merged: &mut AState<D>) {
    let widened: Vec<_> = merged
        .constraints()
        .iter()
        .filter_map(|(name, c)| {
            let Constraint::Value(new_v) = c else { return None };
            let Some(Constraint::Value(old_v)) = old.constraints().get(name) else {
                return None;
            };
            let w = old_v.widen(new_v);
            (&w != new_v).then_some((name, w))
        })
        .collect();
    for (name, w) in widened {
        merged.constraints_mut().set(name, Constraint::Value(w));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constraint::{Constraints, ValueName},
        domain::Interval,
        state::Frame,
    };

    fn state_with(pc: Pc, value: Interval) -> AState<Interval> {
        let mut frame = Frame::new(pc);
        let mut constraints = Constraints::new();
        frame.set_local(0, ValueName::Arg(0));
        constraints.set(ValueName::Arg(0), Constraint::Value(value));
        AState::new(frame, constraints)
    }

    #[test]
    fn first_visit_enqueues() {
        let mut set: StateSet<Interval> = StateSet::new(3);
        assert!(set.join(state_with(Pc::new(0), Interval::of(0.0, 0.0))).unwrap());
        assert_eq!(set.pending(), 1);
        assert!(set.pop().is_some());
        assert_eq!(set.pending(), 0);
    }

    #[test]
    fn unchanged_join_does_not_requeue() {
        let mut set: StateSet<Interval> = StateSet::new(3);
        let s = state_with(Pc::new(0), Interval::of(0.0, 5.0));
        set.join(s.clone()).unwrap();
        let _ = set.pop();
        assert!(!set.join(state_with(Pc::new(0), Interval::of(1.0, 2.0))).unwrap());
        assert_eq!(set.pending(), 0);
    }

    #[test]
    fn repeated_growth_triggers_widening() {
        let mut set: StateSet<Interval> = StateSet::new(3);
        set.join(state_with(Pc::new(0), Interval::of(0.0, 0.0))).unwrap();
        for hi in 1..6 {
            set.join(state_with(Pc::new(0), Interval::of(0.0, f64::from(hi)))).unwrap();
        }
        let installed = set.state_at(Pc::new(0)).unwrap();
        let Some(Constraint::Value(v)) = installed.constraints().get(ValueName::Arg(0)) else {
            panic!("expected a value constraint");
        };
        assert_eq!(v.hi(), f64::INFINITY);
        assert_eq!(v.lo(), 0.0);
    }
}
