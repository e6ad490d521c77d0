//! Token types for the lexer

/// Token types produced by the lexer.
///
/// Reserved words (`if`, `then`, `{`, `!`, ...) are ordinary [`Token::Word`]s;
/// the parser recognizes them by position.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A word exactly as written, quotes and escapes included
    Word(String),

    /// Body of a here document, produced in place of the delimiter word
    HereDocBody {
        /// Body text, delimiter line excluded
        body: String,
        /// Delimiter was quoted: body is not expanded
        quoted: bool,
    },

    /// Newline character
    Newline,

    /// Semicolon (;)
    Semicolon,

    /// Case item terminator (;;)
    DoubleSemicolon,

    /// Pipe (|)
    Pipe,

    /// And (&&)
    And,

    /// Or (||)
    Or,

    /// Background (&)
    Background,

    /// Redirect output (>)
    RedirectOut,

    /// Redirect output append (>>)
    RedirectAppend,

    /// Redirect input (<)
    RedirectIn,

    /// Here document (<<)
    HereDoc,

    /// Here document with tab stripping (<<-)
    HereDocStrip,

    /// Here string (<<<)
    HereString,

    /// Redirect both stdout and stderr (&>)
    RedirectBoth,

    /// Duplicate output file descriptor (>&)
    DupOutput,

    /// Duplicate input file descriptor (<&)
    DupInput,

    /// Explicit file descriptor before a redirection operator (the `2` in `2>`)
    IoNumber(i32),

    /// Left parenthesis (()
    LeftParen,

    /// Right parenthesis ())
    RightParen,
}

impl Token {
    /// Whether this token starts a redirection.
    pub fn is_redirect(&self) -> bool {
        matches!(
            self,
            Token::RedirectOut
                | Token::RedirectAppend
                | Token::RedirectIn
                | Token::HereDoc
                | Token::HereDocStrip
                | Token::HereString
                | Token::RedirectBoth
                | Token::DupOutput
                | Token::DupInput
                | Token::IoNumber(_)
        )
    }

    /// Short human-readable form used in parse errors.
    pub fn describe(&self) -> String {
        match self {
            Token::Word(w) => format!("`{}'", w),
            Token::HereDocBody { .. } => "here-document".to_string(),
            Token::Newline => "newline".to_string(),
            Token::Semicolon => "`;'".to_string(),
            Token::DoubleSemicolon => "`;;'".to_string(),
            Token::Pipe => "`|'".to_string(),
            Token::And => "`&&'".to_string(),
            Token::Or => "`||'".to_string(),
            Token::Background => "`&'".to_string(),
            Token::RedirectOut => "`>'".to_string(),
            Token::RedirectAppend => "`>>'".to_string(),
            Token::RedirectIn => "`<'".to_string(),
            Token::HereDoc => "`<<'".to_string(),
            Token::HereDocStrip => "`<<-'".to_string(),
            Token::HereString => "`<<<'".to_string(),
            Token::RedirectBoth => "`&>'".to_string(),
            Token::DupOutput => "`>&'".to_string(),
            Token::DupInput => "`<&'".to_string(),
            Token::IoNumber(n) => format!("`{}'", n),
            Token::LeftParen => "`('".to_string(),
            Token::RightParen => "`)'".to_string(),
        }
    }
}
