//! Shell state: variables, scopes, functions, aliases, options.
//!
//! Variables live in a global table plus a stack of frames, one per active
//! function call. A name declared `local` lives in the innermost frame that
//! declared it; writes to any other name go to the global table. Popping a
//! frame discards its bindings.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use crate::expand::{ParamContext, Value};
use crate::history::History;
use crate::parser::FunctionDef;

use super::jobs::JobTable;

/// A shell variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub value: Value,
    pub exported: bool,
    pub readonly: bool,
}

impl Variable {
    pub fn scalar(value: impl Into<String>) -> Self {
        Self {
            value: Value::Scalar(value.into()),
            exported: false,
            readonly: false,
        }
    }
}

/// Options toggled with `set`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShellOptions {
    /// `-e`: exit when a command fails
    pub errexit: bool,
    /// `-u`: unset parameters are an error
    pub nounset: bool,
    /// `-x`: trace commands to stderr
    pub xtrace: bool,
    /// `-f`: disable pathname expansion
    pub noglob: bool,
    /// `-o pipefail`
    pub pipefail: bool,
    /// `-o nullglob`: unmatched patterns expand to nothing
    pub nullglob: bool,
}

impl ShellOptions {
    /// Long option names accepted by `set -o`.
    pub const NAMES: [&'static str; 6] = [
        "errexit", "noglob", "nounset", "nullglob", "pipefail", "xtrace",
    ];

    /// Apply a single-letter flag. Returns false for unknown flags.
    pub fn set_short(&mut self, flag: char, on: bool) -> bool {
        match flag {
            'e' => self.errexit = on,
            'u' => self.nounset = on,
            'x' => self.xtrace = on,
            'f' => self.noglob = on,
            _ => return false,
        }
        true
    }

    /// Apply a `set -o NAME` option. Returns false for unknown names.
    pub fn set_long(&mut self, name: &str, on: bool) -> bool {
        match name {
            "errexit" => self.errexit = on,
            "nounset" => self.nounset = on,
            "xtrace" => self.xtrace = on,
            "noglob" => self.noglob = on,
            "pipefail" => self.pipefail = on,
            "nullglob" => self.nullglob = on,
            _ => return false,
        }
        true
    }

    pub fn get_long(&self, name: &str) -> Option<bool> {
        Some(match name {
            "errexit" => self.errexit,
            "nounset" => self.nounset,
            "xtrace" => self.xtrace,
            "noglob" => self.noglob,
            "pipefail" => self.pipefail,
            "nullglob" => self.nullglob,
            _ => return None,
        })
    }

    /// Value of `$-`.
    pub fn flags(&self) -> String {
        let mut flags = String::new();
        for (on, c) in [
            (self.errexit, 'e'),
            (self.noglob, 'f'),
            (self.nounset, 'u'),
            (self.xtrace, 'x'),
        ] {
            if on {
                flags.push(c);
            }
        }
        flags
    }
}

/// Shell state owned by one session or script.
pub struct ShellContext {
    globals: HashMap<String, Variable>,
    frames: Vec<HashMap<String, Variable>>,
    /// Inherited process environment
    env: HashMap<String, String>,
    pub functions: HashMap<String, Arc<FunctionDef>>,
    pub aliases: BTreeMap<String, String>,
    pub cwd: PathBuf,
    pub positional: Vec<String>,
    /// `$0`
    pub script_name: String,
    pub options: ShellOptions,
    /// Signal or pseudo-signal name -> command text
    pub traps: BTreeMap<String, String>,
    pub last_exit_code: i32,
    pub jobs: JobTable,
    pub history: History,
    pub interactive: bool,
}

impl ShellContext {
    pub fn new(env: HashMap<String, String>, cwd: PathBuf) -> Self {
        Self {
            globals: HashMap::new(),
            frames: Vec::new(),
            env,
            functions: HashMap::new(),
            aliases: BTreeMap::new(),
            cwd,
            positional: Vec::new(),
            script_name: "jobsh".to_string(),
            options: ShellOptions::default(),
            traps: BTreeMap::new(),
            last_exit_code: 0,
            jobs: JobTable::new(),
            history: History::default(),
            interactive: false,
        }
    }

    /// Copy for a subshell. Jobs are not inherited.
    pub fn fork(&self) -> Self {
        Self {
            globals: self.globals.clone(),
            frames: self.frames.clone(),
            env: self.env.clone(),
            functions: self.functions.clone(),
            aliases: self.aliases.clone(),
            cwd: self.cwd.clone(),
            positional: self.positional.clone(),
            script_name: self.script_name.clone(),
            options: self.options,
            traps: self.traps.clone(),
            last_exit_code: self.last_exit_code,
            jobs: JobTable::new(),
            history: self.history.clone(),
            interactive: false,
        }
    }

    /// Look up a shell variable, innermost scope first.
    pub fn var(&self, name: &str) -> Option<&Variable> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name))
            .or_else(|| self.globals.get(name))
    }

    fn var_mut(&mut self, name: &str) -> Option<&mut Variable> {
        if let Some(frame) = self.frames.iter_mut().rev().find(|f| f.contains_key(name)) {
            return frame.get_mut(name);
        }
        self.globals.get_mut(name)
    }

    /// Value of a variable or environment entry as a string.
    pub fn get(&self, name: &str) -> Option<String> {
        match self.var(name) {
            Some(var) => Some(var.value.as_scalar()),
            None => self.env.get(name).cloned(),
        }
    }

    /// Whether the name is bound as a variable or in the environment.
    pub fn is_set(&self, name: &str) -> bool {
        self.var(name).is_some() || self.env.contains_key(name)
    }

    /// Assign a value. Fails with a message for readonly variables.
    pub fn set(&mut self, name: &str, value: Value) -> std::result::Result<(), String> {
        if let Some(var) = self.var_mut(name) {
            if var.readonly {
                return Err(format!("{}: readonly variable", name));
            }
            var.value = value;
            return Ok(());
        }
        // Inherited environment entries become exported shell variables
        let exported = self.env.contains_key(name);
        self.globals.insert(
            name.to_string(),
            Variable {
                value,
                exported,
                readonly: false,
            },
        );
        Ok(())
    }

    pub fn set_scalar(&mut self, name: &str, value: impl Into<String>) -> std::result::Result<(), String> {
        self.set(name, Value::Scalar(value.into()))
    }

    /// Assign one element: `name[index]=value`.
    pub fn set_element(
        &mut self,
        name: &str,
        index: &str,
        value: String,
    ) -> std::result::Result<(), String> {
        let current = self.var(name).map(|v| v.value.clone());
        let updated = match current {
            Some(Value::Assoc(mut map)) => {
                map.insert(index.to_string(), value);
                Value::Assoc(map)
            }
            other => {
                let mut items = match other {
                    Some(Value::Indexed(items)) => items,
                    Some(Value::Scalar(s)) => vec![s],
                    _ => match self.env.get(name) {
                        Some(s) => vec![s.clone()],
                        None => Vec::new(),
                    },
                };
                let idx = index
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| format!("{}: bad array subscript", index))?;
                let idx = if idx < 0 {
                    let from_end = items.len() as i64 + idx;
                    if from_end < 0 {
                        return Err(format!("{}[{}]: bad array subscript", name, index));
                    }
                    from_end as usize
                } else {
                    idx as usize
                };
                if idx >= items.len() {
                    items.resize(idx + 1, String::new());
                }
                items[idx] = value;
                Value::Indexed(items)
            }
        };
        self.set(name, updated)
    }

    /// `name+=value` for scalars, `name+=(a b)` for arrays.
    pub fn append(&mut self, name: &str, value: Value) -> std::result::Result<(), String> {
        let current = self.var(name).map(|v| v.value.clone());
        let combined = match (current, value) {
            (Some(Value::Indexed(mut items)), Value::Indexed(more)) => {
                items.extend(more);
                Value::Indexed(items)
            }
            (Some(Value::Indexed(mut items)), Value::Scalar(s)) => {
                match items.first_mut() {
                    Some(first) => first.push_str(&s),
                    None => items.push(s),
                }
                Value::Indexed(items)
            }
            (Some(Value::Assoc(mut map)), Value::Assoc(more)) => {
                map.extend(more);
                Value::Assoc(map)
            }
            (Some(Value::Scalar(prefix)), Value::Indexed(more)) => {
                let mut items = vec![prefix];
                items.extend(more);
                Value::Indexed(items)
            }
            (None, Value::Indexed(more)) => Value::Indexed(more),
            (_, other) => {
                let prefix = self.get(name).unwrap_or_default();
                Value::Scalar(prefix + &other.as_scalar())
            }
        };
        self.set(name, combined)
    }

    /// Declare a variable in the innermost function frame.
    pub fn declare_local(&mut self, name: &str, value: Option<Value>) -> std::result::Result<(), String> {
        let Some(frame) = self.frames.last_mut() else {
            return Err("local: can only be used in a function".to_string());
        };
        let entry = frame
            .entry(name.to_string())
            .or_insert_with(|| Variable::scalar(""));
        if let Some(value) = value {
            entry.value = value;
        }
        Ok(())
    }

    /// Remove a variable from the innermost scope that binds it.
    pub fn unset(&mut self, name: &str) -> std::result::Result<(), String> {
        if self.var(name).is_some_and(|v| v.readonly) {
            return Err(format!("{}: cannot unset: readonly variable", name));
        }
        if let Some(frame) = self.frames.iter_mut().rev().find(|f| f.contains_key(name)) {
            frame.remove(name);
        } else {
            self.globals.remove(name);
        }
        self.env.remove(name);
        Ok(())
    }

    /// Mark a name exported, creating it empty if unset.
    pub fn export(&mut self, name: &str) {
        if let Some(var) = self.var_mut(name) {
            var.exported = true;
            return;
        }
        let value = self.env.get(name).cloned().unwrap_or_default();
        self.globals.insert(
            name.to_string(),
            Variable {
                value: Value::Scalar(value),
                exported: true,
                readonly: false,
            },
        );
    }

    pub fn unexport(&mut self, name: &str) {
        if let Some(var) = self.var_mut(name) {
            var.exported = false;
        }
        self.env.remove(name);
    }

    pub fn set_readonly(&mut self, name: &str) {
        if self.var(name).is_none() {
            let value = self.env.get(name).cloned().unwrap_or_default();
            self.globals
                .insert(name.to_string(), Variable::scalar(value));
        }
        if let Some(var) = self.var_mut(name) {
            var.readonly = true;
        }
    }

    /// Snapshot of a binding, for temporary `NAME=value cmd` assignments.
    pub fn save_var(&self, name: &str) -> Option<Variable> {
        self.var(name).cloned()
    }

    /// Put back a binding taken with [`save_var`](Self::save_var).
    pub fn restore_var(&mut self, name: &str, saved: Option<Variable>) {
        match saved {
            Some(var) => match self.var_mut(name) {
                Some(slot) => *slot = var,
                None => {
                    self.globals.insert(name.to_string(), var);
                }
            },
            None => {
                if let Some(frame) = self.frames.iter_mut().rev().find(|f| f.contains_key(name)) {
                    frame.remove(name);
                } else {
                    self.globals.remove(name);
                }
            }
        }
    }

    pub fn push_frame(&mut self) {
        self.frames.push(HashMap::new());
    }

    pub fn pop_frame(&mut self) {
        self.frames.pop();
    }

    pub fn in_function(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Environment for child processes: the inherited environment overlaid
    /// with exported variables.
    pub fn child_env(&self) -> HashMap<String, String> {
        let mut env = self.env.clone();
        for name in self.variable_names() {
            if let Some(var) = self.var(&name) {
                if var.exported {
                    env.insert(name, var.value.as_scalar());
                } else {
                    env.remove(&name);
                }
            }
        }
        env
    }

    /// All visible variable names, sorted.
    pub fn variable_names(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = self.globals.keys().cloned().collect();
        for frame in &self.frames {
            names.extend(frame.keys().cloned());
        }
        names.into_iter().collect()
    }

    /// Names and values of exported variables, sorted.
    pub fn exported(&self) -> Vec<(String, String)> {
        let mut out: BTreeMap<String, String> = self.child_env().into_iter().collect();
        out.retain(|k, _| !k.is_empty());
        out.into_iter().collect()
    }

    pub fn home(&self) -> Option<String> {
        self.get("HOME")
    }
}

impl ParamContext for ShellContext {
    fn lookup(&self, name: &str) -> Option<Value> {
        match name {
            "?" => Some(Value::Scalar(self.last_exit_code.to_string())),
            "$" => Some(Value::Scalar(std::process::id().to_string())),
            "!" => self.jobs.last_pid().map(|pid| Value::Scalar(pid.to_string())),
            "#" => Some(Value::Scalar(self.positional.len().to_string())),
            "@" | "*" => Some(Value::Indexed(self.positional.clone())),
            "-" => Some(Value::Scalar(self.options.flags())),
            "0" => Some(Value::Scalar(self.script_name.clone())),
            _ if name.bytes().all(|b| b.is_ascii_digit()) => {
                let n: usize = name.parse().ok()?;
                self.positional.get(n.checked_sub(1)?).cloned().map(Value::Scalar)
            }
            _ => match self.var(name) {
                Some(var) => Some(var.value.clone()),
                None => self.env.get(name).cloned().map(Value::Scalar),
            },
        }
    }

    fn assign(&mut self, name: &str, value: String) {
        if let Err(message) = self.set_scalar(name, value) {
            tracing::debug!(name, "{}", message);
        }
    }

    fn nounset(&self) -> bool {
        self.options.nounset
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ctx() -> ShellContext {
        let env = HashMap::from([("HOME".to_string(), "/home/u".to_string())]);
        ShellContext::new(env, PathBuf::from("/"))
    }

    #[test]
    fn test_env_fallback() {
        let c = ctx();
        assert_eq!(c.get("HOME").as_deref(), Some("/home/u"));
        assert_eq!(c.lookup("HOME"), Some(Value::Scalar("/home/u".into())));
        assert!(c.lookup("NOPE").is_none());
    }

    #[test]
    fn test_locals_do_not_escape() {
        let mut c = ctx();
        c.set_scalar("x", "global").unwrap();
        c.push_frame();
        c.declare_local("x", Some(Value::Scalar("inner".into()))).unwrap();
        c.set_scalar("y", "leaks").unwrap();
        assert_eq!(c.get("x").as_deref(), Some("inner"));
        c.set_scalar("x", "inner2").unwrap();
        c.pop_frame();
        assert_eq!(c.get("x").as_deref(), Some("global"));
        assert_eq!(c.get("y").as_deref(), Some("leaks"));
    }

    #[test]
    fn test_nested_frames_see_outer_locals() {
        let mut c = ctx();
        c.push_frame();
        c.declare_local("v", Some(Value::Scalar("outer".into()))).unwrap();
        c.push_frame();
        assert_eq!(c.get("v").as_deref(), Some("outer"));
        c.set_scalar("v", "changed").unwrap();
        c.pop_frame();
        assert_eq!(c.get("v").as_deref(), Some("changed"));
        c.pop_frame();
        assert_eq!(c.get("v"), None);
    }

    #[test]
    fn test_local_outside_function_fails() {
        let mut c = ctx();
        assert!(c.declare_local("x", None).is_err());
    }

    #[test]
    fn test_readonly() {
        let mut c = ctx();
        c.set_scalar("R", "1").unwrap();
        c.set_readonly("R");
        assert!(c.set_scalar("R", "2").is_err());
        assert!(c.unset("R").is_err());
        assert_eq!(c.get("R").as_deref(), Some("1"));
    }

    #[test]
    fn test_child_env_respects_export() {
        let mut c = ctx();
        c.set_scalar("LOCALONLY", "a").unwrap();
        c.set_scalar("SHARED", "b").unwrap();
        c.export("SHARED");
        c.set_scalar("HOME", "/root").unwrap();
        let env = c.child_env();
        assert_eq!(env.get("SHARED").map(String::as_str), Some("b"));
        assert_eq!(env.get("HOME").map(String::as_str), Some("/root"));
        assert!(!env.contains_key("LOCALONLY"));

        c.unset("HOME").unwrap();
        assert!(!c.child_env().contains_key("HOME"));
    }

    #[test]
    fn test_set_element_grows_array() {
        let mut c = ctx();
        c.set_element("a", "2", "z".into()).unwrap();
        assert_eq!(
            c.lookup("a"),
            Some(Value::Indexed(vec!["".into(), "".into(), "z".into()]))
        );
        c.set_element("a", "-1", "last".into()).unwrap();
        assert_eq!(c.lookup("a").unwrap().elements()[2], "last");
    }

    #[test]
    fn test_append() {
        let mut c = ctx();
        c.set_scalar("s", "ab").unwrap();
        c.append("s", Value::Scalar("cd".into())).unwrap();
        assert_eq!(c.get("s").as_deref(), Some("abcd"));
        c.set("arr", Value::Indexed(vec!["1".into()])).unwrap();
        c.append("arr", Value::Indexed(vec!["2".into(), "3".into()]))
            .unwrap();
        assert_eq!(c.lookup("arr").unwrap().elements(), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_special_parameters() {
        let mut c = ctx();
        c.positional = vec!["a".into(), "b".into()];
        c.last_exit_code = 3;
        c.options.errexit = true;
        c.options.xtrace = true;
        assert_eq!(c.lookup("#"), Some(Value::Scalar("2".into())));
        assert_eq!(c.lookup("2"), Some(Value::Scalar("b".into())));
        assert_eq!(c.lookup("3"), None);
        assert_eq!(c.lookup("?"), Some(Value::Scalar("3".into())));
        assert_eq!(c.lookup("-"), Some(Value::Scalar("ex".into())));
        assert_eq!(c.lookup("!"), None);
    }

    #[test]
    fn test_options_by_name() {
        let mut opts = ShellOptions::default();
        assert!(opts.set_long("pipefail", true));
        assert!(!opts.set_long("bogus", true));
        assert!(opts.set_short('u', true));
        assert_eq!(opts.get_long("pipefail"), Some(true));
        assert!(opts.nounset);
    }
}
