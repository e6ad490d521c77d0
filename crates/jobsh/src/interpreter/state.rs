//! Interpreter state types

/// Non-local control flow requested by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlFlow {
    #[default]
    None,
    /// `break N`
    Break(u32),
    /// `continue N`
    Continue(u32),
    /// `return` from a function or sourced file
    Return,
    /// `exit`, or errexit tripping
    Exit,
}

/// Result of executing a command or script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Standard output (when captured)
    pub stdout: String,
    /// Standard error (when captured)
    pub stderr: String,
    /// Exit code
    pub exit_code: i32,
    /// Pending break / continue / return / exit
    pub control: ControlFlow,
}

impl ExecResult {
    /// Create a successful result with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    /// Create a failed result with the given stderr.
    pub fn err(stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code,
            ..Default::default()
        }
    }

    /// A result carrying only an exit code.
    pub fn code(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Default::default()
        }
    }

    /// Attach a control flow request.
    pub fn with_control(mut self, control: ControlFlow) -> Self {
        self.control = control;
        self
    }

    /// Check if the result indicates success.
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Append another result's output and take over its status.
    pub fn absorb(&mut self, other: ExecResult) {
        self.stdout.push_str(&other.stdout);
        self.stderr.push_str(&other.stderr);
        self.exit_code = other.exit_code;
        self.control = other.control;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absorb_concatenates_output() {
        let mut acc = ExecResult::ok("a\n");
        acc.absorb(ExecResult::err("oops\n", 2));
        assert_eq!(acc.stdout, "a\n");
        assert_eq!(acc.stderr, "oops\n");
        assert_eq!(acc.exit_code, 2);
        assert!(!acc.is_success());

        acc.absorb(ExecResult::code(0).with_control(ControlFlow::Break(1)));
        assert_eq!(acc.control, ControlFlow::Break(1));
        assert!(acc.is_success());
    }
}
