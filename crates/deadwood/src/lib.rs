#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked at the call sites")]
#![expect(clippy::float_cmp, reason = "interval bounds and sentinels require exact comparison")]
#![expect(clippy::unused_self, reason = "analysis helpers stay methods for uniform call sites")]

mod analysis;
mod bytecode;
mod constraint;
mod domain;
mod error;
mod limits;
mod lines;
mod state;
mod state_set;
mod step;
mod tracer;

pub use crate::{
    analysis::{ClassReport, MethodAnalysis, MethodAnalyzer, MethodOutcome, debloat_class},
    bytecode::{
        Annotated, ArrayKind, ArrayType, BinaryOp, Code, ConstValue, DecompiledClass, FieldRef, InvokeAccess,
        InvokeTarget, JvmType, LineEntry, Method, Opcode, Param, Primitive, ReturnDesc,
    },
    constraint::{Constraint, Constraints, FloatCmpResult, MergeSlot, ValueName},
    domain::{BoolSet, CmpCond, Domain, Interval, RelSet, SignSet},
    error::{AnalysisError, ClassError, StepResult, Terminal},
    limits::{AnalysisLimits, DEFAULT_MAX_ITERATIONS, DEFAULT_WIDEN_AFTER},
    lines::LineTable,
    state::{AState, Frame, Pc},
    state_set::StateSet,
    step::Successor,
    tracer::{AnalysisTracer, NoopTracer, RecordingTracer, StderrTracer, TraceEvent},
};
