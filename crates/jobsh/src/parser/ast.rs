//! AST types for parsed shell command lines
//!
//! The tree is produced once per parsed line and never mutated by the
//! executor. Words keep their raw source text and span next to the parsed
//! parts so expansion can re-derive quoting boundaries exactly.

use std::fmt;

use super::span::Span;

/// A complete parsed command line or script.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub body: CommandList,
}

/// A sequence of and-or lists separated by `;`, `&` or newlines.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandList {
    pub items: Vec<ListItem>,
}

impl CommandList {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// One entry of a command list.
#[derive(Debug, Clone, PartialEq)]
pub struct ListItem {
    pub list: AndOrList,
    /// Terminated by `&`: run as a background job
    pub background: bool,
}

/// Pipelines joined by `&&` / `||`.
#[derive(Debug, Clone, PartialEq)]
pub struct AndOrList {
    pub first: Pipeline,
    pub rest: Vec<(ListOperator, Pipeline)>,
}

/// Operators joining pipelines in an and-or list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOperator {
    /// && - execute next if previous succeeded
    And,
    /// || - execute next if previous failed
    Or,
}

/// A pipeline of commands.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    /// Whether the pipeline is negated (!)
    pub negated: bool,
    /// Commands in the pipeline
    pub commands: Vec<Command>,
    pub span: Span,
}

/// A single command in a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// A simple command (e.g., `echo hello`)
    Simple(SimpleCommand),

    /// A compound command with redirections applied to the whole body
    Compound(CompoundCommand, Vec<Redirect>),

    /// A function definition
    Function(FunctionDef),
}

/// A simple command with arguments and redirections.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleCommand {
    /// Variable assignments before the command
    pub assignments: Vec<Assignment>,
    /// Command name; `None` for assignment-only or redirect-only commands
    pub name: Option<Word>,
    /// Command arguments
    pub args: Vec<Word>,
    /// Redirections
    pub redirects: Vec<Redirect>,
    pub span: Span,
}

/// Compound commands (control structures).
#[derive(Debug, Clone, PartialEq)]
pub enum CompoundCommand {
    If(IfCommand),
    For(ForCommand),
    /// `while` loop, or `until` when `until` is set
    While(WhileCommand),
    Case(CaseCommand),
    /// `( ... )`
    Subshell(CommandList),
    /// `{ ...; }`
    BraceGroup(CommandList),
}

/// If statement.
#[derive(Debug, Clone, PartialEq)]
pub struct IfCommand {
    pub condition: CommandList,
    pub then_branch: CommandList,
    pub elif_branches: Vec<(CommandList, CommandList)>,
    pub else_branch: Option<CommandList>,
}

/// For loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ForCommand {
    pub variable: String,
    /// `None` iterates over the positional parameters
    pub words: Option<Vec<Word>>,
    pub body: CommandList,
}

/// While / until loop.
#[derive(Debug, Clone, PartialEq)]
pub struct WhileCommand {
    pub condition: CommandList,
    pub body: CommandList,
    pub until: bool,
}

/// Case statement.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseCommand {
    pub word: Word,
    pub cases: Vec<CaseItem>,
}

/// A single case item.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseItem {
    pub patterns: Vec<Word>,
    pub commands: CommandList,
}

/// Function definition.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub body: Box<Command>,
}

/// A word: raw source text plus its parsed expansion markers.
#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    /// Text exactly as written, quotes included
    pub raw: String,
    pub span: Span,
    pub parts: Vec<WordPart>,
}

impl Word {
    /// Create a simple literal word.
    pub fn literal(s: impl Into<String>) -> Self {
        let s = s.into();
        Self {
            raw: s.clone(),
            span: Span::default(),
            parts: vec![WordPart::Literal(s)],
        }
    }

    /// Whether any part of the word was quoted.
    pub fn is_quoted(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, WordPart::Quoted(_) | WordPart::DoubleQuoted(_)))
    }

    /// The word's text if it has no quoting and no expansions.
    pub fn as_plain(&self) -> Option<&str> {
        match self.parts.as_slice() {
            [WordPart::Literal(s)] => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parts of a word.
#[derive(Debug, Clone, PartialEq)]
pub enum WordPart {
    /// Unquoted literal text; glob characters are active
    Literal(String),
    /// Single-quoted or backslash-escaped text; never globbed or split
    Quoted(String),
    /// Contents of a double-quoted string
    DoubleQuoted(Vec<WordPart>),
    /// `$name`, `$1`, `$?` or `${expr}`; holds the text between the braces
    Parameter(String),
    /// `$(...)` or backquotes, parsed at parse time
    CommandSubstitution(Box<Script>),
    /// `$((...))`; holds the expression text
    Arithmetic(String),
    /// Leading `~` or `~user`
    Tilde(String),
}

/// I/O redirection.
#[derive(Debug, Clone, PartialEq)]
pub struct Redirect {
    /// File descriptor (default: 1 for output, 0 for input)
    pub fd: Option<i32>,
    /// Type of redirection
    pub kind: RedirectKind,
    /// Target (file, fd, or here-document body)
    pub target: Word,
}

/// Types of redirections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// > - redirect output
    Output,
    /// >> - append output
    Append,
    /// < - redirect input
    Input,
    /// << / <<- - here document
    HereDoc,
    /// <<< - here string
    HereString,
    /// >& - duplicate output fd
    DupOutput,
    /// <& - duplicate input fd
    DupInput,
    /// &> - redirect both stdout and stderr
    OutputBoth,
}

/// Variable assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub name: String,
    /// Optional array index for indexed assignments like arr[0]=value
    pub index: Option<String>,
    pub value: AssignmentValue,
    /// Whether this is an append assignment (+=)
    pub append: bool,
}

/// Value in an assignment - scalar or array
#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentValue {
    /// Scalar value: VAR=value
    Scalar(Word),
    /// Array value: VAR=(a b c)
    Array(Vec<Word>),
}
