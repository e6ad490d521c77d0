//! Command history
//!
//! An append-only log of command lines with `!!`, `!N`, `!-N`, `!prefix`
//! and `^old^new` expansion. Entry numbers are always dense: any removal
//! (duplicate suppression or trimming) renumbers the remaining entries
//! from 1.
//!
//! File format: one `timestamp:command` record per line, most recent last.
//! Backslashes in a command are doubled, and a command spanning several
//! lines is stored with a single trailing `\` on every line but the last.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::Result;

/// One recorded command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// 1-based position in the live window
    pub number: usize,
    /// Trimmed command text
    pub command: String,
    /// Unix timestamp (seconds)
    pub timestamp: i64,
    pub exit_code: Option<i32>,
}

/// What happens when a command is added that is already in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Record every command
    Keep,
    /// Skip a command identical to the previous one
    IgnoreConsecutive,
    /// Remove earlier identical entries, then append
    #[default]
    EraseOlder,
}

/// History configuration.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Maximum number of entries kept
    /// Default: 1000
    pub max_size: usize,
    pub duplicates: DuplicatePolicy,
    /// History file, if persisted
    pub file: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            duplicates: DuplicatePolicy::default(),
            file: None,
        }
    }
}

impl HistoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn duplicates(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicates = policy;
        self
    }

    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }
}

/// The command history of one shell session.
#[derive(Debug, Clone, Default)]
pub struct History {
    config: HistoryConfig,
    entries: Vec<HistoryEntry>,
}

impl History {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry by its 1-based number.
    pub fn get(&self, number: usize) -> Option<&HistoryEntry> {
        number.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    /// Append a command. Returns `false` when nothing was recorded.
    pub fn add(&mut self, command: &str, exit_code: Option<i32>) -> bool {
        self.add_at(command, exit_code, Utc::now().timestamp())
    }

    fn add_at(&mut self, command: &str, exit_code: Option<i32>, timestamp: i64) -> bool {
        let command = command.trim();
        if command.is_empty() {
            return false;
        }

        match self.config.duplicates {
            DuplicatePolicy::Keep => {}
            DuplicatePolicy::IgnoreConsecutive => {
                if self.last().is_some_and(|e| e.command == command) {
                    return false;
                }
            }
            DuplicatePolicy::EraseOlder => {
                self.entries.retain(|e| e.command != command);
            }
        }

        self.entries.push(HistoryEntry {
            number: 0,
            command: command.to_string(),
            timestamp,
            exit_code,
        });
        self.trim();
        self.renumber();
        true
    }

    /// Record the exit status of the most recent command.
    pub fn set_last_exit_code(&mut self, code: i32) {
        if let Some(last) = self.entries.last_mut() {
            last.exit_code = Some(code);
        }
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop the oldest entries beyond the configured maximum.
    fn trim(&mut self) {
        if self.entries.len() > self.config.max_size {
            let excess = self.entries.len() - self.config.max_size;
            self.entries.drain(..excess);
        }
    }

    fn renumber(&mut self) {
        for (i, entry) in self.entries.iter_mut().enumerate() {
            entry.number = i + 1;
        }
    }

    /// Rewrite history references in `line`. References that match nothing
    /// are left as written.
    pub fn expand(&self, line: &str) -> String {
        if let Some(rest) = line.strip_prefix('^') {
            if let Some(expanded) = self.quick_substitution(rest) {
                return expanded;
            }
            return line.to_string();
        }

        let mut out = String::with_capacity(line.len());
        let mut in_single = false;
        let mut chars = line.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            match c {
                '\'' => {
                    in_single = !in_single;
                    out.push(c);
                }
                '\\' => {
                    out.push(c);
                    if let Some((_, next)) = chars.next() {
                        out.push(next);
                    }
                }
                '!' if !in_single => {
                    let rest = &line[i + 1..];
                    match self.reference(rest) {
                        Some((replacement, consumed)) => {
                            out.push_str(&replacement);
                            for _ in 0..rest[..consumed].chars().count() {
                                chars.next();
                            }
                        }
                        None => out.push(c),
                    }
                }
                _ => out.push(c),
            }
        }
        out
    }

    /// Resolve the reference following a `!`. Returns the replacement and the
    /// bytes of `rest` it consumed.
    fn reference(&self, rest: &str) -> Option<(String, usize)> {
        let first = rest.chars().next()?;
        if first == '!' {
            return self.last().map(|e| (e.command.clone(), 1));
        }
        if first.is_ascii_digit() || first == '-' {
            let digits_start = usize::from(first == '-');
            let len = rest[digits_start..]
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(rest.len() - digits_start);
            if len == 0 {
                return None;
            }
            let n: usize = rest[digits_start..digits_start + len].parse().ok()?;
            let entry = if first == '-' {
                self.entries.len().checked_sub(n).and_then(|i| self.entries.get(i))
            } else {
                self.get(n)
            }?;
            return Some((entry.command.clone(), digits_start + len));
        }
        if first.is_whitespace() || matches!(first, '=' | '(' | '"' | '\'' | ';' | '|' | '&') {
            return None;
        }
        let len = rest
            .find(|c: char| c.is_whitespace() || matches!(c, ';' | '|' | '&' | '"' | '\''))
            .unwrap_or(rest.len());
        let prefix = &rest[..len];
        self.entries
            .iter()
            .rev()
            .find(|e| e.command.starts_with(prefix))
            .map(|e| (e.command.clone(), len))
    }

    /// `^old^new[^]`: replace the first `old` in the previous command.
    fn quick_substitution(&self, spec: &str) -> Option<String> {
        let (old, rest) = spec.split_once('^')?;
        let new = rest.strip_suffix('^').unwrap_or(rest);
        if old.is_empty() {
            return None;
        }
        let last = self.last()?;
        if !last.command.contains(old) {
            return None;
        }
        Some(last.command.replacen(old, new, 1))
    }

    /// Load entries from a history file, appending to the current log.
    /// Malformed lines become commands with a synthesized timestamp.
    pub fn load(&mut self, path: &Path) -> Result<usize> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        // Invalid UTF-8 is replaced rather than failing the whole file
        let text = String::from_utf8_lossy(&bytes);

        let now = Utc::now().timestamp();
        let mut loaded = 0;
        let mut pending: Option<String> = None;
        for line in text.lines() {
            let mut record = match pending.take() {
                Some(mut prev) => {
                    prev.push('\n');
                    prev.push_str(line);
                    prev
                }
                None => line.to_string(),
            };
            if continues(&record) {
                record.pop();
                pending = Some(record);
                continue;
            }
            let (timestamp, command) = parse_record(&record, now);
            if self.add_at(&unescape(command), None, timestamp) {
                loaded += 1;
            }
        }
        if let Some(rest) = pending {
            warn!(path = %path.display(), "history file ends with a continuation line");
            let (timestamp, command) = parse_record(&rest, now);
            if self.add_at(&unescape(command), None, timestamp) {
                loaded += 1;
            }
        }
        debug!(path = %path.display(), loaded, "loaded history");
        Ok(loaded)
    }

    /// Write the whole log to a history file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut text = String::new();
        for entry in &self.entries {
            text.push_str(&entry.timestamp.to_string());
            text.push(':');
            text.push_str(&escape(&entry.command));
            text.push('\n');
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load from the configured file, if any.
    pub fn load_configured(&mut self) -> Result<usize> {
        match self.config.file.clone() {
            Some(path) => self.load(&path),
            None => Ok(0),
        }
    }

    /// Save to the configured file, if any.
    pub fn save_configured(&self) -> Result<()> {
        match &self.config.file {
            Some(path) => self.save(path),
            None => Ok(()),
        }
    }
}

fn escape(command: &str) -> String {
    command.replace('\\', "\\\\").replace('\n', "\\\n")
}

/// A line ending in an odd run of backslashes continues on the next one.
fn continues(line: &str) -> bool {
    line.bytes().rev().take_while(|b| *b == b'\\').count() % 2 == 1
}

/// Undo [`escape`]. A lone backslash (hand-edited files) is kept as is.
fn unescape(command: &str) -> String {
    let mut out = String::with_capacity(command.len());
    let mut chars = command.chars().peekable();
    while let Some(c) = chars.next() {
        out.push(c);
        if c == '\\' && chars.peek() == Some(&'\\') {
            chars.next();
        }
    }
    out
}

/// Split `timestamp:command`; anything else is all command.
fn parse_record(line: &str, now: i64) -> (i64, &str) {
    if let Some((ts, command)) = line.split_once(':') {
        if !ts.is_empty() && ts.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(ts) = ts.parse() {
                return (ts, command);
            }
        }
    }
    (now, line)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn history(commands: &[&str]) -> History {
        let mut h = History::new(HistoryConfig::default());
        for c in commands {
            h.add(c, Some(0));
        }
        h
    }

    #[test]
    fn test_add_skips_blank() {
        let mut h = History::default();
        assert!(!h.add("   ", None));
        assert!(!h.add("", None));
        assert!(h.add("  ls -la  ", None));
        assert_eq!(h.last().unwrap().command, "ls -la");
    }

    #[test]
    fn test_duplicate_suppression_erases_older() {
        let mut h = history(&["ls -la", "pwd", "ls -la"]);
        let commands: Vec<_> = h.entries().iter().map(|e| e.command.as_str()).collect();
        assert_eq!(commands, vec!["pwd", "ls -la"]);
        assert_eq!(h.entries()[1].number, 2);
        h.add("ls -la", None);
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn test_ignore_consecutive() {
        let mut h = History::new(HistoryConfig::new().duplicates(DuplicatePolicy::IgnoreConsecutive));
        h.add("a", None);
        h.add("a", None);
        h.add("b", None);
        h.add("a", None);
        assert_eq!(h.len(), 3);
    }

    #[test]
    fn test_trim_renumbers_from_one() {
        let mut h = History::new(HistoryConfig::new().max_size(3));
        for c in ["a", "b", "c", "d", "e"] {
            h.add(c, None);
        }
        let numbered: Vec<_> = h
            .entries()
            .iter()
            .map(|e| (e.number, e.command.as_str()))
            .collect();
        assert_eq!(numbered, vec![(1, "c"), (2, "d"), (3, "e")]);
    }

    #[test]
    fn test_expand_bang_bang() {
        let h = history(&["ls -la"]);
        assert_eq!(h.expand("!!"), "ls -la");
        assert_eq!(h.expand("sudo !!"), "sudo ls -la");
    }

    #[test]
    fn test_expand_number_and_prefix() {
        let h = history(&["echo one", "git status", "echo two"]);
        assert_eq!(h.expand("!1"), "echo one");
        assert_eq!(h.expand("!-1"), "echo two");
        assert_eq!(h.expand("!git"), "git status");
        assert_eq!(h.expand("!ec"), "echo two");
    }

    #[test]
    fn test_unmatched_references_stay_verbatim() {
        let h = history(&["echo one"]);
        assert_eq!(h.expand("!99"), "!99");
        assert_eq!(h.expand("!nomatch"), "!nomatch");
        assert_eq!(h.expand("echo hi!"), "echo hi!");
        assert_eq!(h.expand("echo '!!'"), "echo '!!'");
        assert_eq!(h.expand("echo \\!!"), "echo \\!!");
        assert_eq!(History::default().expand("!!"), "!!");
    }

    #[test]
    fn test_quick_substitution() {
        let h = history(&["cat foo.txt"]);
        assert_eq!(h.expand("^foo^bar"), "cat bar.txt");
        assert_eq!(h.expand("^foo^bar^"), "cat bar.txt");
        assert_eq!(h.expand("^zzz^bar"), "^zzz^bar");
    }

    #[test]
    fn test_file_round_trip_and_tolerant_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history");
        let mut h = History::default();
        h.add_at("echo a", None, 100);
        h.add_at("for i in 1 2\ndo echo $i\ndone", None, 200);
        h.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("100:echo a\n200:for i in 1 2\\\n"));

        std::fs::write(&path, format!("{}not a record: at all\n\n", text)).unwrap();
        let mut loaded = History::default();
        assert_eq!(loaded.load(&path).unwrap(), 3);
        assert_eq!(loaded.get(1).unwrap().timestamp, 100);
        assert_eq!(loaded.get(2).unwrap().command, "for i in 1 2\ndo echo $i\ndone");
        let malformed = loaded.get(3).unwrap();
        assert_eq!(malformed.command, "not a record: at all");
        assert!(malformed.timestamp > 200);
    }

    #[test]
    fn test_trailing_backslash_survives_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history");
        let mut h = History::default();
        h.add_at("echo \\", None, 100);
        h.add_at("ls", None, 110);
        h.add_at("printf '%s\\\\n' a \\\nb", None, 120);
        h.save(&path).unwrap();

        let mut loaded = History::default();
        assert_eq!(loaded.load(&path).unwrap(), 3);
        let commands: Vec<&str> = loaded.entries().iter().map(|e| e.command.as_str()).collect();
        assert_eq!(commands, vec!["echo \\", "ls", "printf '%s\\\\n' a \\\nb"]);
    }

    #[test]
    fn test_invalid_utf8_line_does_not_fail_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history");
        std::fs::write(&path, b"1:ok\n2:bad\xff\n3:fine\n").unwrap();

        let mut h = History::default();
        assert_eq!(h.load(&path).unwrap(), 3);
        assert_eq!(h.get(1).unwrap().command, "ok");
        assert_eq!(h.get(2).unwrap().command, "bad\u{fffd}");
        assert_eq!(h.get(3).unwrap().command, "fine");
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = History::default();
        assert_eq!(h.load(&dir.path().join("nope")).unwrap(), 0);
    }
}
