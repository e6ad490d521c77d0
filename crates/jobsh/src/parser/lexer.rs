//! Lexer for shell command lines
//!
//! Tokenizes input into a stream of tokens with source position tracking.
//! Words are kept exactly as written (quotes, escapes and substitutions
//! included) so the word parser can re-derive quoting boundaries later.
//! Here-document bodies are read by the lexer itself and emitted as a
//! [`Token::HereDocBody`] in place of the delimiter word.

use super::span::{Position, Span};
use super::tokens::Token;
use crate::error::{Error, Result};

/// A token with its source location span.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Lexer for shell command lines.
pub struct Lexer<'a> {
    input: &'a str,
    /// Current position in the input
    position: Position,
    /// Set right after `<<` / `<<-`: the next word is a here-document
    /// delimiter (the flag is "strip leading tabs")
    pending_heredoc: Option<bool>,
    /// Byte offset where the next here-document body starts once a body has
    /// already been consumed for the current line
    heredoc_resume: Option<usize>,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given input.
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            position: Position::new(),
            pending_heredoc: None,
            heredoc_resume: None,
        }
    }

    /// Tokenize the whole input.
    pub fn tokenize(input: &'a str) -> Result<Vec<SpannedToken>> {
        let mut lexer = Self::new(input);
        let mut tokens = Vec::new();
        while let Some(token) = lexer.next_spanned_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    /// Get the current position in the input.
    pub fn position(&self) -> Position {
        self.position
    }

    /// Get the next token from the input (without span info).
    pub fn next_token(&mut self) -> Result<Option<Token>> {
        Ok(self.next_spanned_token()?.map(|t| t.token))
    }

    /// Get the next token with its source span.
    pub fn next_spanned_token(&mut self) -> Result<Option<SpannedToken>> {
        self.skip_whitespace();
        let start = self.position;
        let token = match self.next_token_inner()? {
            Some(token) => token,
            None => {
                if self.pending_heredoc.is_some() {
                    return Err(self.error("expected here-document delimiter"));
                }
                return Ok(None);
            }
        };
        let end = self.position;
        Ok(Some(SpannedToken {
            token,
            span: Span::from_positions(start, end),
        }))
    }

    fn rest(&self) -> &'a str {
        &self.input[self.position.offset..]
    }

    fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek_char();
        if let Some(c) = ch {
            self.position.advance(c);
        }
        ch
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::parse_at(message, self.position.line, self.position.column)
    }

    fn next_token_inner(&mut self) -> Result<Option<Token>> {
        let Some(ch) = self.peek_char() else {
            return Ok(None);
        };

        if self.pending_heredoc.is_some() && !matches!(ch, '\n' | ';' | '|' | '&' | '<' | '>') {
            return self.read_heredoc_body().map(Some);
        }

        let token = match ch {
            '\n' => {
                self.advance();
                if let Some(resume) = self.heredoc_resume.take() {
                    while self.position.offset < resume {
                        self.advance();
                    }
                }
                Token::Newline
            }
            ';' => {
                self.advance();
                if self.peek_char() == Some(';') {
                    self.advance();
                    Token::DoubleSemicolon
                } else {
                    Token::Semicolon
                }
            }
            '|' => {
                self.advance();
                if self.peek_char() == Some('|') {
                    self.advance();
                    Token::Or
                } else {
                    Token::Pipe
                }
            }
            '&' => {
                self.advance();
                match self.peek_char() {
                    Some('&') => {
                        self.advance();
                        Token::And
                    }
                    Some('>') => {
                        self.advance();
                        Token::RedirectBoth
                    }
                    _ => Token::Background,
                }
            }
            '>' => {
                self.advance();
                match self.peek_char() {
                    Some('>') => {
                        self.advance();
                        Token::RedirectAppend
                    }
                    Some('&') => {
                        self.advance();
                        Token::DupOutput
                    }
                    Some('|') => {
                        // >| (noclobber override) behaves as > here
                        self.advance();
                        Token::RedirectOut
                    }
                    _ => Token::RedirectOut,
                }
            }
            '<' => {
                self.advance();
                match self.peek_char() {
                    Some('<') => {
                        self.advance();
                        match self.peek_char() {
                            Some('<') => {
                                self.advance();
                                Token::HereString
                            }
                            Some('-') => {
                                self.advance();
                                self.pending_heredoc = Some(true);
                                Token::HereDocStrip
                            }
                            _ => {
                                self.pending_heredoc = Some(false);
                                Token::HereDoc
                            }
                        }
                    }
                    Some('&') => {
                        self.advance();
                        Token::DupInput
                    }
                    _ => Token::RedirectIn,
                }
            }
            '(' => {
                self.advance();
                Token::LeftParen
            }
            ')' => {
                self.advance();
                Token::RightParen
            }
            '#' => {
                self.skip_comment();
                return self.next_token_inner();
            }
            '0'..='9' if self.looks_like_io_number() => self.read_io_number(),
            _ => Token::Word(self.read_word()?),
        };
        Ok(Some(token))
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek_char() {
                Some(' ') | Some('\t') | Some('\r') => {
                    self.advance();
                }
                Some('\\') if self.peek_nth(1) == Some('\n') => {
                    // line continuation between words
                    self.advance();
                    self.advance();
                }
                _ => break,
            }
        }
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    /// Digits immediately followed by `<` or `>` form an IO number (`2>`).
    fn looks_like_io_number(&self) -> bool {
        let digits: usize = self
            .rest()
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .count();
        matches!(self.peek_nth(digits), Some('<') | Some('>'))
    }

    fn read_io_number(&mut self) -> Token {
        let mut digits = String::new();
        while let Some(c) = self.peek_char() {
            if !c.is_ascii_digit() {
                break;
            }
            digits.push(c);
            self.advance();
        }
        Token::IoNumber(digits.parse().unwrap_or(1))
    }

    fn is_word_boundary(ch: char) -> bool {
        matches!(
            ch,
            ' ' | '\t' | '\r' | '\n' | ';' | '|' | '&' | '<' | '>' | '(' | ')'
        )
    }

    /// Read a word exactly as written.
    fn read_word(&mut self) -> Result<String> {
        let mut word = String::new();

        while let Some(ch) = self.peek_char() {
            if Self::is_word_boundary(ch) {
                break;
            }
            match ch {
                '\\' => {
                    self.advance();
                    match self.advance() {
                        // \<newline> is line continuation: discard both
                        Some('\n') => {}
                        Some(next) => {
                            word.push('\\');
                            word.push(next);
                        }
                        None => word.push('\\'),
                    }
                }
                '\'' => self.read_single_quoted_into(&mut word)?,
                '"' => self.read_double_quoted_into(&mut word)?,
                '`' => self.read_backtick_into(&mut word)?,
                '$' => self.read_dollar_into(&mut word)?,
                _ => {
                    word.push(ch);
                    self.advance();
                }
            }
        }

        Ok(word)
    }

    fn read_single_quoted_into(&mut self, word: &mut String) -> Result<()> {
        let start = self.position;
        word.push('\'');
        self.advance();
        loop {
            match self.advance() {
                Some('\'') => {
                    word.push('\'');
                    return Ok(());
                }
                Some(c) => word.push(c),
                None => {
                    return Err(Error::parse_at(
                        "unterminated single quote",
                        start.line,
                        start.column,
                    ));
                }
            }
        }
    }

    fn read_double_quoted_into(&mut self, word: &mut String) -> Result<()> {
        let start = self.position;
        word.push('"');
        self.advance();
        loop {
            match self.peek_char() {
                Some('"') => {
                    self.advance();
                    word.push('"');
                    return Ok(());
                }
                Some('\\') => {
                    self.advance();
                    word.push('\\');
                    if let Some(next) = self.advance() {
                        word.push(next);
                    }
                }
                Some('`') => self.read_backtick_into(word)?,
                Some('$') => self.read_dollar_into(word)?,
                Some(c) => {
                    word.push(c);
                    self.advance();
                }
                None => {
                    return Err(Error::parse_at(
                        "unterminated double quote",
                        start.line,
                        start.column,
                    ));
                }
            }
        }
    }

    fn read_backtick_into(&mut self, word: &mut String) -> Result<()> {
        let start = self.position;
        word.push('`');
        self.advance();
        loop {
            match self.advance() {
                Some('\\') => {
                    word.push('\\');
                    if let Some(next) = self.advance() {
                        word.push(next);
                    }
                }
                Some('`') => {
                    word.push('`');
                    return Ok(());
                }
                Some(c) => word.push(c),
                None => {
                    return Err(Error::parse_at(
                        "unterminated backquote substitution",
                        start.line,
                        start.column,
                    ));
                }
            }
        }
    }

    /// Read `$`, `$name`, `${...}`, `$(...)` or `$((...))`.
    fn read_dollar_into(&mut self, word: &mut String) -> Result<()> {
        let start = self.position;
        word.push('$');
        self.advance();
        match self.peek_char() {
            Some('(') => {
                word.push('(');
                self.advance();
                if self.peek_char() == Some('(') {
                    word.push('(');
                    self.advance();
                    self.read_balanced_into(word, '(', ')', 2, start)
                } else {
                    self.read_balanced_into(word, '(', ')', 1, start)
                }
            }
            Some('{') => {
                word.push('{');
                self.advance();
                self.read_balanced_into(word, '{', '}', 1, start)
            }
            _ => Ok(()),
        }
    }

    /// Read until the matching close delimiter, honoring nested quotes and
    /// substitutions.
    fn read_balanced_into(
        &mut self,
        word: &mut String,
        open: char,
        close: char,
        mut depth: usize,
        start: Position,
    ) -> Result<()> {
        loop {
            let Some(c) = self.peek_char() else {
                let what = if open == '{' {
                    "unterminated parameter expansion"
                } else {
                    "unterminated command substitution"
                };
                return Err(Error::parse_at(what, start.line, start.column));
            };
            match c {
                '\\' => {
                    self.advance();
                    word.push('\\');
                    if let Some(next) = self.advance() {
                        word.push(next);
                    }
                }
                '\'' if open == '(' => self.read_single_quoted_into(word)?,
                '"' => self.read_double_quoted_into(word)?,
                '`' => self.read_backtick_into(word)?,
                '$' => self.read_dollar_into(word)?,
                _ => {
                    self.advance();
                    word.push(c);
                    if c == open {
                        depth += 1;
                    } else if c == close {
                        depth -= 1;
                        if depth == 0 {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Read the delimiter word following `<<` and the body lines that follow
    /// the current line.
    fn read_heredoc_body(&mut self) -> Result<Token> {
        let strip_tabs = self.pending_heredoc.take().unwrap_or(false);
        let start = self.position;
        let raw = self.read_word()?;
        if raw.is_empty() {
            return Err(self.error("expected here-document delimiter"));
        }
        let quoted = raw.contains(['\'', '"', '\\']);
        let delimiter: String = unquote_delimiter(&raw);

        let body_start = match self.heredoc_resume {
            Some(offset) => offset,
            None => match self.rest().find('\n') {
                Some(idx) => self.position.offset + idx + 1,
                None => {
                    return Err(Error::parse_at(
                        format!("unterminated here-document (wanted `{}')", delimiter),
                        start.line,
                        start.column,
                    ));
                }
            },
        };

        let mut body = String::new();
        let mut offset = body_start;
        loop {
            if offset >= self.input.len() {
                return Err(Error::parse_at(
                    format!("unterminated here-document (wanted `{}')", delimiter),
                    start.line,
                    start.column,
                ));
            }
            let remaining = &self.input[offset..];
            let (line, consumed) = match remaining.find('\n') {
                Some(idx) => (&remaining[..idx], idx + 1),
                None => (remaining, remaining.len()),
            };
            offset += consumed;
            let line = if strip_tabs {
                line.trim_start_matches('\t')
            } else {
                line
            };
            if line == delimiter {
                break;
            }
            body.push_str(line);
            body.push('\n');
        }

        self.heredoc_resume = Some(offset);
        Ok(Token::HereDocBody { body, quoted })
    }
}

/// Byte length of the quoted string or substitution starting `text`
/// (`'...'`, `"..."`, `` `...` ``, `$(...)`, `${...}`, `$((...))`, `$name`).
pub(crate) fn construct_len(text: &str) -> Result<usize> {
    let mut lexer = Lexer::new(text);
    let mut scratch = String::new();
    match text.chars().next() {
        Some('\'') => lexer.read_single_quoted_into(&mut scratch)?,
        Some('"') => lexer.read_double_quoted_into(&mut scratch)?,
        Some('`') => lexer.read_backtick_into(&mut scratch)?,
        Some('$') => lexer.read_dollar_into(&mut scratch)?,
        Some(c) => return Ok(c.len_utf8()),
        None => return Ok(0),
    }
    Ok(lexer.position.offset)
}

/// Strip quoting from a here-document delimiter (`'EOF'`, `"EOF"`, `\EOF`).
fn unquote_delimiter(raw: &str) -> String {
    let mut out = String::new();
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {}
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token> {
        Lexer::tokenize(input)
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    fn word(s: &str) -> Token {
        Token::Word(s.to_string())
    }

    #[test]
    fn test_simple_words() {
        assert_eq!(
            tokens("echo hello world"),
            vec![word("echo"), word("hello"), word("world")]
        );
    }

    #[test]
    fn test_quotes_stay_in_raw_word() {
        assert_eq!(
            tokens(r#"echo 'a b' "c $d" e\ f"#),
            vec![word("echo"), word("'a b'"), word("\"c $d\""), word("e\\ f")]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            tokens("a | b && c || d; e &"),
            vec![
                word("a"),
                Token::Pipe,
                word("b"),
                Token::And,
                word("c"),
                Token::Or,
                word("d"),
                Token::Semicolon,
                word("e"),
                Token::Background,
            ]
        );
    }

    #[test]
    fn test_redirects_and_io_numbers() {
        assert_eq!(
            tokens("a > b >> c < d 2> e 2>&1 &> f <<< g"),
            vec![
                word("a"),
                Token::RedirectOut,
                word("b"),
                Token::RedirectAppend,
                word("c"),
                Token::RedirectIn,
                word("d"),
                Token::IoNumber(2),
                Token::RedirectOut,
                word("e"),
                Token::IoNumber(2),
                Token::DupOutput,
                word("1"),
                Token::RedirectBoth,
                word("f"),
                Token::HereString,
                word("g"),
            ]
        );
    }

    #[test]
    fn test_comment() {
        assert_eq!(
            tokens("echo hello # a comment\necho world"),
            vec![
                word("echo"),
                word("hello"),
                Token::Newline,
                word("echo"),
                word("world"),
            ]
        );
    }

    #[test]
    fn test_nested_command_substitution_is_one_word() {
        assert_eq!(
            tokens("echo $(echo $(echo \")\") x)y `date`"),
            vec![
                word("echo"),
                word("$(echo $(echo \")\") x)y"),
                word("`date`"),
            ]
        );
    }

    #[test]
    fn test_parameter_expansion_with_spaces_is_one_word() {
        assert_eq!(
            tokens("echo ${x:-a b}"),
            vec![word("echo"), word("${x:-a b}")]
        );
    }

    #[test]
    fn test_unterminated_quotes_fail() {
        assert!(Lexer::tokenize("echo 'abc").is_err());
        assert!(Lexer::tokenize("echo \"abc").is_err());
        assert!(Lexer::tokenize("echo $(abc").is_err());
        assert!(Lexer::tokenize("echo `abc").is_err());
        assert!(Lexer::tokenize("echo ${abc").is_err());
    }

    #[test]
    fn test_heredoc_body() {
        assert_eq!(
            tokens("cat <<EOF\nhello\nworld\nEOF\necho done"),
            vec![
                word("cat"),
                Token::HereDoc,
                Token::HereDocBody {
                    body: "hello\nworld\n".to_string(),
                    quoted: false
                },
                Token::Newline,
                word("echo"),
                word("done"),
            ]
        );
    }

    #[test]
    fn test_two_heredocs_on_one_line() {
        let toks = tokens("cat <<A <<'B'\none\nA\ntwo\nB\n");
        assert_eq!(
            toks,
            vec![
                word("cat"),
                Token::HereDoc,
                Token::HereDocBody {
                    body: "one\n".to_string(),
                    quoted: false
                },
                Token::HereDoc,
                Token::HereDocBody {
                    body: "two\n".to_string(),
                    quoted: true
                },
                Token::Newline,
            ]
        );
    }

    #[test]
    fn test_heredoc_strip_tabs() {
        let toks = tokens("cat <<-END\n\tindented\n\tEND\n");
        assert_eq!(
            toks[2],
            Token::HereDocBody {
                body: "indented\n".to_string(),
                quoted: false
            }
        );
    }

    #[test]
    fn test_unterminated_heredoc_fails() {
        let err = Lexer::tokenize("cat <<EOF\nhello\n").unwrap_err();
        assert!(err.to_string().contains("unterminated here-document"));
    }

    #[test]
    fn test_array_assignment_tokens() {
        assert_eq!(
            tokens("arr=(a \"b c\")"),
            vec![
                word("arr="),
                Token::LeftParen,
                word("a"),
                word("\"b c\""),
                Token::RightParen,
            ]
        );
    }

    #[test]
    fn test_spans_cover_raw_text() {
        let input = "echo  'a b'";
        let toks = Lexer::tokenize(input).unwrap();
        assert_eq!(toks[1].span.slice(input), "'a b'");
        assert_eq!(toks[1].span.start.column, 7);
    }
}
