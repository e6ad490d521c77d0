//! Log hygiene for job commands and environments
//!
//! The daemon logs every job it adds and starts. Job commands and their
//! environment overrides often carry credentials, so everything that reaches
//! a `tracing` field from user input passes through [`LogConfig`] first.
//!
//! # Log Levels
//!
//! - **ERROR**: daemon failures, corrupt state files
//! - **WARN**: recoverable issues: orphaned executions, retention evictions of
//!   unreadable records, malformed history lines
//! - **INFO**: daemon lifecycle, job added/started/completed/stopped
//! - **DEBUG**: command dispatch, process-group signalling, IPC requests
//! - **TRACE**: scheduler ticks

use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};

/// Redaction and truncation applied before job data is logged.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether to redact sensitive data (default: true)
    pub redact_sensitive: bool,

    /// Environment variable name fragments to redact (case-insensitive)
    pub redact_env_vars: HashSet<String>,

    /// Whether job command text is logged verbatim (default: true)
    pub log_command_content: bool,

    /// Maximum length of logged values before truncation (default: 200)
    pub max_value_length: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        let redact_env_vars = [
            "PASSWORD",
            "PASSWD",
            "SECRET",
            "TOKEN",
            "KEY",
            "CREDENTIAL",
            "AUTH",
            "PRIVATE",
            "BEARER",
            "SESSION",
            "COOKIE",
            "DATABASE_URL",
            "DB_URL",
            "CONNECTION_STRING",
            "AWS_SECRET",
            "AWS_ACCESS",
        ]
        .iter()
        .map(|p| p.to_string())
        .collect();
        Self {
            redact_sensitive: true,
            redact_env_vars,
            log_command_content: true,
            max_value_length: 200,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable redaction. Secrets in job commands will reach the log.
    pub fn unsafe_disable_redaction(mut self) -> Self {
        self.redact_sensitive = false;
        self
    }

    /// Add an environment variable name fragment to redact
    pub fn redact_env(mut self, pattern: &str) -> Self {
        self.redact_env_vars.insert(pattern.to_uppercase());
        self
    }

    /// Log only the size of job commands, never their text
    pub fn hide_commands(mut self) -> Self {
        self.log_command_content = false;
        self
    }

    pub fn max_value_length(mut self, len: usize) -> Self {
        self.max_value_length = len;
        self
    }

    /// Check if an environment variable name should be redacted
    pub fn should_redact_env(&self, name: &str) -> bool {
        if !self.redact_sensitive {
            return false;
        }
        let upper = name.to_uppercase();
        self.redact_env_vars
            .iter()
            .any(|pattern| upper.contains(pattern))
    }

    /// Redact a value if it looks like a credential, else truncate it.
    pub fn redact_value<'a>(&self, value: &'a str) -> Cow<'a, str> {
        if self.redact_sensitive && is_likely_secret(value) {
            return Cow::Borrowed("[REDACTED]");
        }
        self.truncate(value)
    }

    /// Render environment overrides as `NAME=value` pairs with sensitive
    /// values hidden.
    pub fn format_env(&self, env: &BTreeMap<String, String>) -> String {
        env.iter()
            .map(|(name, value)| {
                if self.should_redact_env(name) {
                    format!("{}=[REDACTED]", name)
                } else {
                    format!("{}={}", name, self.redact_value(value))
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Render a job command for a log field.
    ///
    /// Inline assignments (`TOKEN=abc cmd`) and secret-looking words are
    /// redacted; the result is a single line.
    pub fn format_command(&self, command: &str) -> String {
        if !self.log_command_content {
            return format!(
                "[command: {} lines, {} bytes]",
                command.lines().count(),
                command.len()
            );
        }
        let sanitized = sanitize_for_log(command);
        if !self.redact_sensitive {
            return self.truncate(&sanitized).into_owned();
        }
        let words: Vec<String> = sanitized
            .split(' ')
            .map(|word| match word.split_once('=') {
                Some((name, _)) if self.should_redact_env(name) => format!("{}=[REDACTED]", name),
                _ if is_likely_secret(word) => "[REDACTED]".to_string(),
                _ => word.to_string(),
            })
            .collect();
        self.truncate(&words.join(" ")).into_owned()
    }

    /// Cut a value to the configured length on a char boundary.
    pub fn truncate<'a>(&self, value: &'a str) -> Cow<'a, str> {
        if value.len() <= self.max_value_length {
            Cow::Borrowed(value)
        } else {
            let mut end = self.max_value_length;
            while end > 0 && !value.is_char_boundary(end) {
                end -= 1;
            }
            Cow::Owned(format!(
                "{}...[truncated {} bytes]",
                &value[..end],
                value.len() - end
            ))
        }
    }
}

/// Check if a value looks like a secret: a known token prefix, a JWT, or a
/// long high-entropy word.
fn is_likely_secret(value: &str) -> bool {
    let trimmed = value.trim();

    if trimmed.matches('.').count() == 2 {
        let parts: Vec<&str> = trimmed.split('.').collect();
        if parts.iter().all(|p| p.len() > 10 && is_base64_like(p)) {
            return true;
        }
    }

    let prefixes = [
        "sk-", "pk-", "sk_live_", "sk_test_", "ghp_", "gho_", "ghs_", "xoxb-", "xoxp-", "AKIA",
        "eyJ",
    ];
    if prefixes
        .iter()
        .any(|prefix| trimmed.starts_with(prefix) && trimmed.len() > prefix.len() + 10)
    {
        return true;
    }

    trimmed.len() >= 32 && is_high_entropy(trimmed)
}

fn is_base64_like(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=' | '_' | '-'))
}

/// High ratio of unique characters in an identifier-like word.
fn is_high_entropy(s: &str) -> bool {
    if !s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return false;
    }
    let unique: HashSet<char> = s.chars().collect();
    let ratio = unique.len() as f64 / s.len() as f64;
    ratio > 0.5 && unique.len() > 15
}

/// Escape newlines and drop control characters so one value stays one line.
pub fn sanitize_for_log(input: &str) -> String {
    input
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
        .chars()
        .filter(|c| !c.is_control())
        .collect()
}
