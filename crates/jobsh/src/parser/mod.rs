//! Parser module for Jobsh
//!
//! Implements a recursive descent parser for POSIX shell command lines.
//! Parsing either yields a complete [`Script`] or an error; nothing is
//! executed until the whole input has parsed.

mod ast;
mod lexer;
mod span;
mod tokens;
mod word;

pub use ast::*;
pub use lexer::{Lexer, SpannedToken};
pub use span::{Position, Span};
pub use tokens::Token;
pub(crate) use lexer::construct_len;
pub(crate) use word::parse_heredoc;

use crate::error::{Error, Result};

/// Words that end a command list when they appear in command position.
const RESERVED: &[&str] = &[
    "then", "elif", "else", "fi", "do", "done", "esac", "}", "in",
];

/// Maximum nesting of compound commands.
const MAX_DEPTH: usize = 256;

/// Parse a command line into an AST.
pub fn parse(input: &str) -> Result<Script> {
    Parser::new(input).parse()
}

/// Parser for shell command lines.
pub struct Parser<'a> {
    input: &'a str,
    tokens: Vec<SpannedToken>,
    pos: usize,
    /// Nesting of command substitutions this parser lives in
    substitution_depth: usize,
    /// Current compound command nesting
    depth: usize,
}

impl<'a> Parser<'a> {
    /// Create a new parser for the given input.
    pub fn new(input: &'a str) -> Self {
        Self::nested(input, 0)
    }

    /// Parser for the body of a command substitution.
    pub(crate) fn nested(input: &'a str, substitution_depth: usize) -> Self {
        Self {
            input,
            tokens: Vec::new(),
            pos: 0,
            substitution_depth,
            depth: 0,
        }
    }

    /// Parse the input and return the AST.
    pub fn parse(mut self) -> Result<Script> {
        self.tokens = Lexer::tokenize(self.input)?;
        self.skip_newlines();
        let body = self.parse_command_list(&[])?;
        if let Some(tok) = self.current() {
            return Err(self.unexpected(&tok.token.clone()));
        }
        Ok(Script { body })
    }

    fn current(&self) -> Option<&SpannedToken> {
        self.tokens.get(self.pos)
    }

    fn current_token(&self) -> Option<&Token> {
        self.current().map(|t| &t.token)
    }

    fn peek_token(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|t| &t.token)
    }

    fn current_word(&self) -> Option<&str> {
        match self.current_token() {
            Some(Token::Word(w)) => Some(w.as_str()),
            _ => None,
        }
    }

    fn is_word(&self, expected: &str) -> bool {
        self.current_word() == Some(expected)
    }

    fn advance(&mut self) -> Option<SpannedToken> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn skip_newlines(&mut self) {
        while matches!(self.current_token(), Some(Token::Newline)) {
            self.pos += 1;
        }
    }

    fn end_position(&self) -> Position {
        self.tokens
            .last()
            .map(|t| t.span.end)
            .unwrap_or_else(Position::new)
    }

    fn unexpected(&self, token: &Token) -> Error {
        let pos = self
            .current()
            .map(|t| t.span.start)
            .unwrap_or_else(|| self.end_position());
        Error::parse_at(
            format!("syntax error near unexpected token {}", token.describe()),
            pos.line,
            pos.column,
        )
    }

    fn unexpected_eof(&self, expecting: &str) -> Error {
        let pos = self.end_position();
        Error::parse_at(
            format!("syntax error: unexpected end of input (expecting `{}')", expecting),
            pos.line,
            pos.column,
        )
    }

    fn expect_word(&mut self, expected: &str) -> Result<()> {
        match self.current_token() {
            Some(Token::Word(w)) if w == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(tok) => Err(self.unexpected(&tok.clone())),
            None => Err(self.unexpected_eof(expected)),
        }
    }

    fn expect_token(&mut self, expected: Token, name: &str) -> Result<()> {
        match self.current_token() {
            Some(tok) if *tok == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(tok) => Err(self.unexpected(&tok.clone())),
            None => Err(self.unexpected_eof(name)),
        }
    }

    fn at_list_end(&self, terminators: &[&str]) -> bool {
        match self.current_token() {
            None => true,
            Some(Token::RightParen) | Some(Token::DoubleSemicolon) => true,
            Some(Token::Word(w)) => terminators.contains(&w.as_str()),
            _ => false,
        }
    }

    /// Parse and-or lists separated by `;`, `&` or newlines until one of
    /// `terminators` appears in command position.
    fn parse_command_list(&mut self, terminators: &[&str]) -> Result<CommandList> {
        let mut items = Vec::new();
        loop {
            self.skip_newlines();
            if self.at_list_end(terminators) {
                break;
            }
            let list = self.parse_and_or()?;
            let background = match self.current_token() {
                Some(Token::Background) => {
                    self.pos += 1;
                    true
                }
                Some(Token::Semicolon) | Some(Token::Newline) => {
                    self.pos += 1;
                    false
                }
                _ => {
                    items.push(ListItem {
                        list,
                        background: false,
                    });
                    break;
                }
            };
            items.push(ListItem { list, background });
        }
        Ok(CommandList { items })
    }

    fn parse_and_or(&mut self) -> Result<AndOrList> {
        let first = self.parse_pipeline()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.current_token() {
                Some(Token::And) => ListOperator::And,
                Some(Token::Or) => ListOperator::Or,
                _ => break,
            };
            self.pos += 1;
            self.skip_newlines();
            rest.push((op, self.parse_pipeline()?));
        }
        Ok(AndOrList { first, rest })
    }

    fn parse_pipeline(&mut self) -> Result<Pipeline> {
        let start = self
            .current()
            .map(|t| t.span)
            .unwrap_or_default();
        let mut negated = false;
        while self.is_word("!") {
            negated = !negated;
            self.pos += 1;
        }

        let mut commands = vec![self.parse_command()?];
        while matches!(self.current_token(), Some(Token::Pipe)) {
            self.pos += 1;
            self.skip_newlines();
            commands.push(self.parse_command()?);
        }

        let end = self
            .tokens
            .get(self.pos.saturating_sub(1))
            .map(|t| t.span)
            .unwrap_or(start);
        Ok(Pipeline {
            negated,
            commands,
            span: start.merge(end),
        })
    }

    fn parse_command(&mut self) -> Result<Command> {
        let Some(tok) = self.current_token().cloned() else {
            return Err(self.unexpected_eof("command"));
        };

        match &tok {
            Token::Word(w) => match w.as_str() {
                "if" | "while" | "until" | "for" | "case" | "{" => self.parse_compound(),
                "function" => self.parse_function_keyword(),
                w if RESERVED.contains(&w) => Err(self.unexpected(&tok)),
                w if is_valid_name(w)
                    && self.peek_token(1) == Some(&Token::LeftParen)
                    && self.peek_token(2) == Some(&Token::RightParen) =>
                {
                    self.parse_function_posix()
                }
                _ => self.parse_simple_command(),
            },
            Token::LeftParen => self.parse_compound(),
            t if t.is_redirect() => self.parse_simple_command(),
            _ => Err(self.unexpected(&tok)),
        }
    }

    fn parse_compound(&mut self) -> Result<Command> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(Error::Parse("compound commands nested too deeply".into()));
        }
        let compound = match self.current_token() {
            Some(Token::LeftParen) => {
                self.pos += 1;
                let body = self.parse_command_list(&[])?;
                self.expect_token(Token::RightParen, ")")?;
                CompoundCommand::Subshell(body)
            }
            _ => match self.current_word() {
                Some("if") => self.parse_if()?,
                Some("while") => self.parse_while(false)?,
                Some("until") => self.parse_while(true)?,
                Some("for") => self.parse_for()?,
                Some("case") => self.parse_case()?,
                _ => {
                    self.expect_word("{")?;
                    let body = self.parse_command_list(&["}"])?;
                    self.expect_word("}")?;
                    CompoundCommand::BraceGroup(body)
                }
            },
        };
        self.depth -= 1;
        let redirects = self.parse_trailing_redirects()?;
        Ok(Command::Compound(compound, redirects))
    }

    fn parse_if(&mut self) -> Result<CompoundCommand> {
        self.expect_word("if")?;
        let condition = self.parse_command_list(&["then"])?;
        self.expect_word("then")?;
        let then_branch = self.parse_command_list(&["elif", "else", "fi"])?;

        let mut elif_branches = Vec::new();
        while self.is_word("elif") {
            self.pos += 1;
            let cond = self.parse_command_list(&["then"])?;
            self.expect_word("then")?;
            let body = self.parse_command_list(&["elif", "else", "fi"])?;
            elif_branches.push((cond, body));
        }

        let else_branch = if self.is_word("else") {
            self.pos += 1;
            Some(self.parse_command_list(&["fi"])?)
        } else {
            None
        };
        self.expect_word("fi")?;

        Ok(CompoundCommand::If(IfCommand {
            condition,
            then_branch,
            elif_branches,
            else_branch,
        }))
    }

    fn parse_while(&mut self, until: bool) -> Result<CompoundCommand> {
        self.pos += 1;
        let condition = self.parse_command_list(&["do"])?;
        self.expect_word("do")?;
        let body = self.parse_command_list(&["done"])?;
        self.expect_word("done")?;
        Ok(CompoundCommand::While(WhileCommand {
            condition,
            body,
            until,
        }))
    }

    fn parse_for(&mut self) -> Result<CompoundCommand> {
        self.expect_word("for")?;
        let variable = match self.current_token().cloned() {
            Some(Token::Word(w)) if is_valid_name(&w) => {
                self.pos += 1;
                w
            }
            Some(tok) => return Err(self.unexpected(&tok)),
            None => return Err(self.unexpected_eof("name")),
        };

        self.skip_newlines();
        let words = if self.is_word("in") {
            self.pos += 1;
            let mut words = Vec::new();
            while let Some(tok) = self.current().cloned() {
                match tok.token {
                    Token::Word(raw) => {
                        words.push(word::parse_word(&raw, tok.span, self.substitution_depth)?);
                        self.pos += 1;
                    }
                    _ => break,
                }
            }
            Some(words)
        } else {
            None
        };

        if matches!(
            self.current_token(),
            Some(Token::Semicolon) | Some(Token::Newline)
        ) {
            self.pos += 1;
        }
        self.skip_newlines();
        self.expect_word("do")?;
        let body = self.parse_command_list(&["done"])?;
        self.expect_word("done")?;

        Ok(CompoundCommand::For(ForCommand {
            variable,
            words,
            body,
        }))
    }

    fn parse_case(&mut self) -> Result<CompoundCommand> {
        self.expect_word("case")?;
        let word = match self.current().cloned() {
            Some(SpannedToken {
                token: Token::Word(raw),
                span,
            }) => {
                self.pos += 1;
                word::parse_word(&raw, span, self.substitution_depth)?
            }
            Some(tok) => return Err(self.unexpected(&tok.token)),
            None => return Err(self.unexpected_eof("word")),
        };
        self.skip_newlines();
        self.expect_word("in")?;
        self.skip_newlines();

        let mut cases = Vec::new();
        while !self.is_word("esac") {
            if self.current().is_none() {
                return Err(self.unexpected_eof("esac"));
            }
            if matches!(self.current_token(), Some(Token::LeftParen)) {
                self.pos += 1;
            }
            let mut patterns = Vec::new();
            loop {
                match self.current().cloned() {
                    Some(SpannedToken {
                        token: Token::Word(raw),
                        span,
                    }) => {
                        self.pos += 1;
                        patterns.push(word::parse_word(&raw, span, self.substitution_depth)?);
                    }
                    Some(tok) => return Err(self.unexpected(&tok.token)),
                    None => return Err(self.unexpected_eof(")")),
                }
                if matches!(self.current_token(), Some(Token::Pipe)) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            self.expect_token(Token::RightParen, ")")?;
            let commands = self.parse_command_list(&["esac"])?;
            if matches!(self.current_token(), Some(Token::DoubleSemicolon)) {
                self.pos += 1;
            }
            self.skip_newlines();
            cases.push(CaseItem { patterns, commands });
        }
        self.expect_word("esac")?;

        Ok(CompoundCommand::Case(CaseCommand { word, cases }))
    }

    /// `function name [()] body`
    fn parse_function_keyword(&mut self) -> Result<Command> {
        self.expect_word("function")?;
        let name = match self.current_token().cloned() {
            Some(Token::Word(w)) if is_valid_name(&w) => {
                self.pos += 1;
                w
            }
            Some(tok) => return Err(self.unexpected(&tok)),
            None => return Err(self.unexpected_eof("name")),
        };
        if matches!(self.current_token(), Some(Token::LeftParen)) {
            self.pos += 1;
            self.expect_token(Token::RightParen, ")")?;
        }
        self.parse_function_body(name)
    }

    /// `name() body`
    fn parse_function_posix(&mut self) -> Result<Command> {
        let name = self.current_word().unwrap_or_default().to_string();
        self.pos += 3;
        self.parse_function_body(name)
    }

    fn parse_function_body(&mut self, name: String) -> Result<Command> {
        self.skip_newlines();
        let body = match self.current_token() {
            Some(Token::LeftParen) => self.parse_compound()?,
            Some(Token::Word(w))
                if matches!(w.as_str(), "{" | "if" | "while" | "until" | "for" | "case") =>
            {
                self.parse_compound()?
            }
            Some(tok) => return Err(self.unexpected(&tok.clone())),
            None => return Err(self.unexpected_eof("{")),
        };
        Ok(Command::Function(FunctionDef {
            name,
            body: Box::new(body),
        }))
    }

    fn parse_trailing_redirects(&mut self) -> Result<Vec<Redirect>> {
        let mut redirects = Vec::new();
        while self.current_token().is_some_and(Token::is_redirect) {
            redirects.push(self.parse_redirect()?);
        }
        Ok(redirects)
    }

    fn parse_simple_command(&mut self) -> Result<Command> {
        let start = self.current().map(|t| t.span).unwrap_or_default();
        let mut assignments = Vec::new();
        let mut name: Option<Word> = None;
        let mut args = Vec::new();
        let mut redirects = Vec::new();

        while let Some(tok) = self.current().cloned() {
            match tok.token {
                Token::Word(raw) => {
                    if name.is_none() {
                        if let Some((var, index, append, value)) = split_assignment(&raw) {
                            self.pos += 1;
                            let value = if value.is_empty()
                                && matches!(self.current_token(), Some(Token::LeftParen))
                            {
                                AssignmentValue::Array(self.parse_array_literal()?)
                            } else {
                                AssignmentValue::Scalar(word::parse_word(
                                    value,
                                    tok.span,
                                    self.substitution_depth,
                                )?)
                            };
                            assignments.push(Assignment {
                                name: var.to_string(),
                                index: index.map(str::to_string),
                                value,
                                append,
                            });
                            continue;
                        }
                    }
                    let word = word::parse_word(&raw, tok.span, self.substitution_depth)?;
                    self.pos += 1;
                    if name.is_none() {
                        name = Some(word);
                    } else {
                        args.push(word);
                    }
                }
                ref t if t.is_redirect() => redirects.push(self.parse_redirect()?),
                _ => break,
            }
        }

        if name.is_none() && assignments.is_empty() && redirects.is_empty() {
            return match self.current_token().cloned() {
                Some(tok) => Err(self.unexpected(&tok)),
                None => Err(self.unexpected_eof("command")),
            };
        }

        let end = self
            .tokens
            .get(self.pos.saturating_sub(1))
            .map(|t| t.span)
            .unwrap_or(start);
        Ok(Command::Simple(SimpleCommand {
            assignments,
            name,
            args,
            redirects,
            span: start.merge(end),
        }))
    }

    /// `( word... )` after `name=`
    fn parse_array_literal(&mut self) -> Result<Vec<Word>> {
        self.expect_token(Token::LeftParen, "(")?;
        let mut words = Vec::new();
        loop {
            self.skip_newlines();
            match self.current().cloned() {
                Some(SpannedToken {
                    token: Token::Word(raw),
                    span,
                }) => {
                    self.pos += 1;
                    words.push(word::parse_word(&raw, span, self.substitution_depth)?);
                }
                Some(SpannedToken {
                    token: Token::RightParen,
                    ..
                }) => {
                    self.pos += 1;
                    return Ok(words);
                }
                Some(tok) => return Err(self.unexpected(&tok.token)),
                None => return Err(self.unexpected_eof(")")),
            }
        }
    }

    fn parse_redirect(&mut self) -> Result<Redirect> {
        let mut fd = None;
        if let Some(Token::IoNumber(n)) = self.current_token() {
            fd = Some(*n);
            self.pos += 1;
        }

        let Some(op) = self.advance() else {
            return Err(self.unexpected_eof("redirection"));
        };
        let kind = match op.token {
            Token::RedirectOut => RedirectKind::Output,
            Token::RedirectAppend => RedirectKind::Append,
            Token::RedirectIn => RedirectKind::Input,
            Token::HereDoc | Token::HereDocStrip => RedirectKind::HereDoc,
            Token::HereString => RedirectKind::HereString,
            Token::RedirectBoth => RedirectKind::OutputBoth,
            Token::DupOutput => RedirectKind::DupOutput,
            Token::DupInput => RedirectKind::DupInput,
            other => return Err(self.unexpected(&other)),
        };

        let target = match self.current().cloned() {
            Some(SpannedToken {
                token: Token::HereDocBody { body, quoted },
                span,
            }) if kind == RedirectKind::HereDoc => {
                self.pos += 1;
                let parts = if quoted {
                    vec![WordPart::Quoted(body.clone())]
                } else {
                    word::parse_heredoc(&body, self.substitution_depth)?
                };
                Word {
                    raw: body,
                    span,
                    parts,
                }
            }
            Some(SpannedToken {
                token: Token::Word(raw),
                span,
            }) if kind != RedirectKind::HereDoc => {
                self.pos += 1;
                word::parse_word(&raw, span, self.substitution_depth)?
            }
            Some(tok) => return Err(self.unexpected(&tok.token)),
            None => return Err(self.unexpected_eof("filename")),
        };

        Ok(Redirect { fd, kind, target })
    }
}

/// Whether `name` is a valid variable / function name.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split `NAME=value`, `NAME+=value` or `NAME[idx]=value` into
/// `(name, index, append, value)`.
fn split_assignment(raw: &str) -> Option<(&str, Option<&str>, bool, &str)> {
    let eq = raw.find('=')?;
    let (lhs, value) = (&raw[..eq], &raw[eq + 1..]);
    let (lhs, append) = match lhs.strip_suffix('+') {
        Some(stripped) => (stripped, true),
        None => (lhs, false),
    };
    if let Some(open) = lhs.find('[') {
        let name = &lhs[..open];
        let index = lhs[open + 1..].strip_suffix(']')?;
        if is_valid_name(name) && !index.is_empty() {
            return Some((name, Some(index), append, value));
        }
        return None;
    }
    is_valid_name(lhs).then_some((lhs, None, append, value))
}
