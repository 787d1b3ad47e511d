//! Analysis outcomes and error taxonomy.
//!
//! Three layers, kept strictly apart:
//!
//! - [`Terminal`] values are *results* of abstract execution (a method may
//!   provably divide by zero), never errors. They accumulate per method.
//! - [`AnalysisError`] is fatal for one method: either the decoder handed us
//!   something the transfer function does not model (recoverable — the method
//!   is reported as not analysed and left untouched), or an internal invariant
//!   broke (stack underflow, join-height mismatch), which indicates a bug.
//! - [`ClassError`] is an input error and fails the whole class run.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Result type alias for transfer-function and driver steps.
pub type StepResult<T> = Result<T, AnalysisError>;

/// A sink outcome of abstract execution.
///
/// Terminals are values, not control-flow escapes: the transfer function
/// returns them interleaved with successor states, and the driver collects
/// them into a per-method set. The string form matches the result names the
/// surrounding tool prints (`"divide by zero"`, …).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
pub enum Terminal {
    /// The method can run to a normal return.
    #[strum(serialize = "ok")]
    #[serde(rename = "ok")]
    Ok,
    /// A `java/lang/AssertionError` construction is reachable.
    #[strum(serialize = "assertion error")]
    #[serde(rename = "assertion error")]
    AssertionError,
    /// A division or remainder with a possibly-zero divisor is reachable.
    #[strum(serialize = "divide by zero")]
    #[serde(rename = "divide by zero")]
    DivideByZero,
    /// An array allocation with a definitely-negative size is reachable.
    #[strum(serialize = "negative size")]
    #[serde(rename = "negative size")]
    NegativeSize,
    /// An array access with a possibly out-of-bounds index is reachable.
    #[strum(serialize = "array out of bounds")]
    #[serde(rename = "array out of bounds")]
    ArrayOutOfBounds,
    /// Reserved for null-dereference detection; no modelled opcode emits it.
    #[strum(serialize = "null")]
    #[serde(rename = "null")]
    Null,
}

/// Error that aborts the analysis of a single method.
///
/// `UnsupportedOpcode` is recoverable at the class level (the method passes
/// through undebloated); everything else indicates a bug in the transfer
/// function or the decoder and should be surfaced loudly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AnalysisError {
    /// The opcode is not modelled by the transfer function.
    UnsupportedOpcode { offset: u32, opcode: &'static str },
    /// An opcode popped more values than the operand stack holds.
    StackUnderflow { offset: u32 },
    /// A local slot was read before anything was stored in it.
    UnknownLocal { offset: u32, index: u16 },
    /// A frame referenced a name that is not in the constraint store.
    MissingConstraint { offset: u32 },
    /// An opcode met a constraint of the wrong shape (e.g. arithmetic on an
    /// array reference, or a join of arrays at different addresses).
    TypeMismatch { offset: u32 },
    /// Two states met at a program point with different stack heights.
    StackHeightMismatch { offset: u32, left: usize, right: usize },
    /// Two states met at a program point with different frame depths or pcs.
    FrameMismatch { offset: u32 },
    /// Execution ran past the end of the opcode list or to a bad jump target.
    PcOutOfBounds { offset: u32 },
}

impl AnalysisError {
    /// True if the class driver may skip the method and keep going.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::UnsupportedOpcode { .. })
    }
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedOpcode { offset, opcode } => {
                write!(f, "unsupported opcode {opcode:?} at offset {offset}")
            }
            Self::StackUnderflow { offset } => {
                write!(f, "operand stack underflow at offset {offset}")
            }
            Self::UnknownLocal { offset, index } => {
                write!(f, "read of unset local {index} at offset {offset}")
            }
            Self::MissingConstraint { offset } => {
                write!(f, "name without a constraint at offset {offset}")
            }
            Self::TypeMismatch { offset } => {
                write!(f, "constraint shape mismatch at offset {offset}")
            }
            Self::StackHeightMismatch { offset, left, right } => {
                write!(f, "stack height mismatch at join for offset {offset}: {left} != {right}")
            }
            Self::FrameMismatch { offset } => {
                write!(f, "frame mismatch at join for offset {offset}")
            }
            Self::PcOutOfBounds { offset } => {
                write!(f, "program counter out of bounds at offset {offset}")
            }
        }
    }
}

impl std::error::Error for AnalysisError {}

/// Error that aborts a whole class run.
#[derive(Debug)]
pub enum ClassError {
    /// An entry method is not present in the decompiled class.
    MissingMethod(String),
    /// An entry method has no code attribute.
    MissingCode(String),
    /// The decompiled class JSON failed to parse.
    Json(serde_json::Error),
    /// A non-recoverable analysis error surfaced while processing a method.
    Analysis { method: String, error: AnalysisError },
}

impl fmt::Display for ClassError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingMethod(name) => write!(f, "method {name:?} not found in class"),
            Self::MissingCode(name) => write!(f, "method {name:?} has no code attribute"),
            Self::Json(err) => write!(f, "malformed decompiled class: {err}"),
            Self::Analysis { method, error } => write!(f, "analysis of {method:?} failed: {error}"),
        }
    }
}

impl std::error::Error for ClassError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(err) => Some(err),
            Self::Analysis { error, .. } => Some(error),
            Self::MissingMethod(_) | Self::MissingCode(_) => None,
        }
    }
}

impl From<serde_json::Error> for ClassError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}
