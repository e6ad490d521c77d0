//! Resource limits for shell execution
//!
//! These limits keep a runaway script (unbounded recursion, endless loops,
//! enormous command substitutions) from taking the whole session down.

/// Resource limits for script execution
#[derive(Debug, Clone)]
pub struct ExecutionLimits {
    /// Maximum iterations for a single loop
    /// Default: 1,000,000
    pub max_loop_iterations: usize,

    /// Maximum function call depth (recursion limit)
    /// Default: 100
    pub max_function_depth: usize,

    /// Maximum nesting of `$(...)`, `eval` and `source`
    /// Default: 64
    pub max_substitution_depth: usize,

    /// Maximum bytes captured from a single command's stdout or stderr
    /// Default: 16 MiB
    pub max_output_bytes: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_loop_iterations: 1_000_000,
            max_function_depth: 100,
            max_substitution_depth: 64,
            max_output_bytes: 16 * 1024 * 1024,
        }
    }
}

impl ExecutionLimits {
    /// Create new limits with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum loop iterations
    pub fn max_loop_iterations(mut self, count: usize) -> Self {
        self.max_loop_iterations = count;
        self
    }

    /// Set maximum function depth
    pub fn max_function_depth(mut self, depth: usize) -> Self {
        self.max_function_depth = depth;
        self
    }

    /// Set maximum substitution depth
    pub fn max_substitution_depth(mut self, depth: usize) -> Self {
        self.max_substitution_depth = depth;
        self
    }

    /// Set maximum captured output per stream
    pub fn max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }
}

/// Execution counters for tracking resource usage
#[derive(Debug, Clone, Default)]
pub struct ExecutionCounters {
    /// Current function call depth
    pub function_depth: usize,

    /// Current `$(...)` / `eval` / `source` nesting
    pub substitution_depth: usize,
}

impl ExecutionCounters {
    /// Create new counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a loop iteration count against the limit
    pub fn check_loop(
        &self,
        iterations: usize,
        limits: &ExecutionLimits,
    ) -> Result<(), LimitExceeded> {
        if iterations > limits.max_loop_iterations {
            return Err(LimitExceeded::MaxLoopIterations(limits.max_loop_iterations));
        }
        Ok(())
    }

    /// Push function call, returns error if depth exceeded
    pub fn push_function(&mut self, limits: &ExecutionLimits) -> Result<(), LimitExceeded> {
        // Check before incrementing so we don't leave invalid state on failure
        if self.function_depth >= limits.max_function_depth {
            return Err(LimitExceeded::MaxFunctionDepth(limits.max_function_depth));
        }
        self.function_depth += 1;
        Ok(())
    }

    /// Pop function call
    pub fn pop_function(&mut self) {
        self.function_depth = self.function_depth.saturating_sub(1);
    }

    /// Enter a nested substitution, returns error if depth exceeded
    pub fn push_substitution(&mut self, limits: &ExecutionLimits) -> Result<(), LimitExceeded> {
        if self.substitution_depth >= limits.max_substitution_depth {
            return Err(LimitExceeded::MaxSubstitutionDepth(
                limits.max_substitution_depth,
            ));
        }
        self.substitution_depth += 1;
        Ok(())
    }

    /// Leave a nested substitution
    pub fn pop_substitution(&mut self) {
        self.substitution_depth = self.substitution_depth.saturating_sub(1);
    }
}

/// Error returned when a resource limit is exceeded
#[derive(Debug, Clone, thiserror::Error)]
pub enum LimitExceeded {
    #[error("maximum loop iterations exceeded ({0})")]
    MaxLoopIterations(usize),

    #[error("maximum function depth exceeded ({0})")]
    MaxFunctionDepth(usize),

    #[error("maximum substitution depth exceeded ({0})")]
    MaxSubstitutionDepth(usize),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = ExecutionLimits::default();
        assert_eq!(limits.max_loop_iterations, 1_000_000);
        assert_eq!(limits.max_function_depth, 100);
        assert_eq!(limits.max_substitution_depth, 64);
    }

    #[test]
    fn test_builder_pattern() {
        let limits = ExecutionLimits::new()
            .max_loop_iterations(50)
            .max_function_depth(10)
            .max_substitution_depth(3)
            .max_output_bytes(1024);

        assert_eq!(limits.max_loop_iterations, 50);
        assert_eq!(limits.max_function_depth, 10);
        assert_eq!(limits.max_substitution_depth, 3);
        assert_eq!(limits.max_output_bytes, 1024);
    }

    #[test]
    fn test_loop_check() {
        let limits = ExecutionLimits::new().max_loop_iterations(3);
        let counters = ExecutionCounters::new();

        assert!(counters.check_loop(3, &limits).is_ok());
        assert!(matches!(
            counters.check_loop(4, &limits),
            Err(LimitExceeded::MaxLoopIterations(3))
        ));
    }

    #[test]
    fn test_function_depth() {
        let limits = ExecutionLimits::new().max_function_depth(2);
        let mut counters = ExecutionCounters::new();

        assert!(counters.push_function(&limits).is_ok());
        assert!(counters.push_function(&limits).is_ok());

        // 3rd call should fail
        assert!(matches!(
            counters.push_function(&limits),
            Err(LimitExceeded::MaxFunctionDepth(2))
        ));

        // Pop and try again
        counters.pop_function();
        assert!(counters.push_function(&limits).is_ok());
    }

    #[test]
    fn test_substitution_depth() {
        let limits = ExecutionLimits::new().max_substitution_depth(1);
        let mut counters = ExecutionCounters::new();

        assert!(counters.push_substitution(&limits).is_ok());
        assert!(counters.push_substitution(&limits).is_err());
        counters.pop_substitution();
        counters.pop_substitution();
        assert_eq!(counters.substitution_depth, 0);
    }
}
