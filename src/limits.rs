//! Hard resource limits (§5).
//!
//! These are compile-time constants rather than a configurable struct: the
//! limits are part of the emulated platform's contract, not a deployment
//! knob. A real deployment's `Config` (§10.3) controls timeouts and ports,
//! not these.

/// Workflow source text, before parsing (§4.3).
pub const MAX_SOURCE_BYTES: usize = 128 * 1024;

/// An expression's raw source text, including the surrounding `${ }` when
/// present (§4.2).
pub const MAX_EXPR_LEN: usize = 400;

/// `assign` entries in a single step.
pub const MAX_ASSIGNMENTS_PER_STEP: usize = 50;

/// `switch` conditions in a single step.
pub const MAX_SWITCH_CONDITIONS_PER_STEP: usize = 50;

/// Branches in a single `parallel` step.
pub const MAX_PARALLEL_BRANCHES: usize = 10;

/// Nesting depth of `parallel` steps within `parallel` steps.
pub const MAX_PARALLEL_NESTING_DEPTH: usize = 2;

/// Subworkflow call stack depth.
pub const MAX_CALL_STACK_DEPTH: usize = 20;

/// Steps executed (cumulative, across the whole execution including loop
/// iterations and subworkflow calls) before a run is aborted.
pub const MAX_STEPS_PER_EXECUTION: u64 = 100_000;

/// Default bound on `parallel`'s concurrent branch execution when a step
/// does not set `concurrency_limit` (§4.3).
pub const DEFAULT_PARALLEL_CONCURRENCY: usize = 20;

/// HTTP response body size (`stdlib::http`).
pub const MAX_HTTP_RESPONSE_BYTES: usize = 2 * 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_match_the_documented_table() {
        assert_eq!(MAX_SOURCE_BYTES, 131_072);
        assert_eq!(MAX_EXPR_LEN, 400);
        assert_eq!(MAX_ASSIGNMENTS_PER_STEP, 50);
        assert_eq!(MAX_SWITCH_CONDITIONS_PER_STEP, 50);
        assert_eq!(MAX_PARALLEL_BRANCHES, 10);
        assert_eq!(MAX_PARALLEL_NESTING_DEPTH, 2);
        assert_eq!(MAX_CALL_STACK_DEPTH, 20);
        assert_eq!(MAX_STEPS_PER_EXECUTION, 100_000);
        assert_eq!(MAX_HTTP_RESPONSE_BYTES, 2_097_152);
    }
}
