//! Analysis resource limits.

use serde::{Deserialize, Serialize};

/// Default cap on worklist iterations per method.
pub const DEFAULT_MAX_ITERATIONS: usize = 1000;

/// Default number of joins at one program point before widening kicks in.
pub const DEFAULT_WIDEN_AFTER: u32 = 3;

/// Per-method resource limits for the fixed-point driver.
///
/// The iteration budget is a backstop against runaway methods: exceeding it
/// is a soft failure (the method is reported as not analysed), never an
/// abort. The widening threshold only matters for domains with infinite
/// ascending chains; the sign domain ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisLimits {
    /// Maximum number of worklist iterations for one method.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Number of joins at the same program point after which the installed
    /// state is widened.
    #[serde(default = "default_widen_after")]
    pub widen_after: u32,
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

fn default_widen_after() -> u32 {
    DEFAULT_WIDEN_AFTER
}

impl Default for AnalysisLimits {
    fn default() -> Self {
        Self { max_iterations: DEFAULT_MAX_ITERATIONS, widen_after: DEFAULT_WIDEN_AFTER }
    }
}
