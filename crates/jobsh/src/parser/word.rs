//! Word parsing: splits a raw word into literal, quoted and expansion parts
//!
//! The lexer guarantees quotes and substitutions in a raw word are balanced;
//! this pass only has to classify them.

use super::Parser;
use super::ast::{Word, WordPart};
use super::lexer::construct_len;
use super::span::Span;
use crate::error::{Error, Result};

/// Maximum nesting of `$(...)` inside words before parsing gives up.
const MAX_NESTING: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    Unquoted,
    DoubleQuoted,
    HereDoc,
}

/// Parse a raw word as written on the command line.
pub(crate) fn parse_word(raw: &str, span: Span, depth: usize) -> Result<Word> {
    Ok(Word {
        raw: raw.to_string(),
        span,
        parts: parse_parts(raw, depth, Context::Unquoted)?,
    })
}

/// Parse the body of an unquoted here-document: expansions are active,
/// quotes are ordinary characters.
pub(crate) fn parse_heredoc(body: &str, depth: usize) -> Result<Vec<WordPart>> {
    parse_parts(body, depth, Context::HereDoc)
}

fn parse_parts(text: &str, depth: usize, ctx: Context) -> Result<Vec<WordPart>> {
    let mut parts = Vec::new();
    let mut i = 0;

    if ctx == Context::Unquoted && text.starts_with('~') {
        let end = text.find('/').unwrap_or(text.len());
        let user = &text[1..end];
        if user
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            parts.push(WordPart::Tilde(user.to_string()));
            i = end;
        }
    }

    while i < text.len() {
        let rest = &text[i..];
        let Some(c) = rest.chars().next() else {
            break;
        };
        match c {
            '\\' => {
                let next = rest[1..].chars().next();
                match next {
                    None => {
                        push_text(&mut parts, ctx, "\\");
                        i += 1;
                    }
                    Some(n) if ctx == Context::Unquoted || escapable(n, ctx) => {
                        if n != '\n' {
                            push_quoted(&mut parts, &n.to_string());
                        }
                        i += 1 + n.len_utf8();
                    }
                    Some(_) => {
                        push_text(&mut parts, ctx, "\\");
                        i += 1;
                    }
                }
            }
            '\'' if ctx == Context::Unquoted => {
                let len = construct_len(rest)?;
                let inner = &rest[1..len - 1];
                // '' still marks the word as quoted
                push_quoted_part(&mut parts, inner);
                i += len;
            }
            '"' if ctx == Context::Unquoted => {
                let len = construct_len(rest)?;
                let inner = parse_parts(&rest[1..len - 1], depth, Context::DoubleQuoted)?;
                parts.push(WordPart::DoubleQuoted(inner));
                i += len;
            }
            '`' => {
                let len = construct_len(rest)?;
                let inner = unescape_backquoted(&rest[1..len - 1]);
                let script = parse_nested(&inner, depth)?;
                parts.push(WordPart::CommandSubstitution(Box::new(script)));
                i += len;
            }
            '$' => {
                let (part, len) = parse_dollar(rest, depth)?;
                match part {
                    Some(part) => parts.push(part),
                    None => push_text(&mut parts, ctx, "$"),
                }
                i += len;
            }
            _ => {
                let mut buf = [0u8; 4];
                push_text(&mut parts, ctx, c.encode_utf8(&mut buf));
                i += c.len_utf8();
            }
        }
    }

    Ok(parts)
}

/// Characters a backslash escapes inside double quotes / here-documents.
fn escapable(c: char, ctx: Context) -> bool {
    match ctx {
        Context::DoubleQuoted => matches!(c, '$' | '`' | '"' | '\\' | '\n'),
        Context::HereDoc => matches!(c, '$' | '`' | '\\' | '\n'),
        Context::Unquoted => true,
    }
}

/// Parse a `$` construct at the start of `text`. Returns the part (or `None`
/// for a lone `$`) and the number of bytes consumed.
fn parse_dollar(text: &str, depth: usize) -> Result<(Option<WordPart>, usize)> {
    let after = &text[1..];
    if after.starts_with("((") {
        let len = construct_len(text)?;
        if text[..len].ends_with("))") && len >= 5 {
            return Ok((Some(WordPart::Arithmetic(text[3..len - 2].to_string())), len));
        }
        let script = parse_nested(&text[2..len - 1], depth)?;
        return Ok((Some(WordPart::CommandSubstitution(Box::new(script))), len));
    }
    if after.starts_with('(') {
        let len = construct_len(text)?;
        let script = parse_nested(&text[2..len - 1], depth)?;
        return Ok((Some(WordPart::CommandSubstitution(Box::new(script))), len));
    }
    if after.starts_with('{') {
        let len = construct_len(text)?;
        return Ok((Some(WordPart::Parameter(text[2..len - 1].to_string())), len));
    }

    match after.chars().next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            let name_len = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            Ok((
                Some(WordPart::Parameter(after[..name_len].to_string())),
                1 + name_len,
            ))
        }
        Some(c) if c.is_ascii_digit() || matches!(c, '?' | '$' | '!' | '#' | '@' | '*' | '-') => {
            Ok((Some(WordPart::Parameter(c.to_string())), 2))
        }
        _ => Ok((None, 1)),
    }
}

fn parse_nested(text: &str, depth: usize) -> Result<super::ast::Script> {
    if depth >= MAX_NESTING {
        return Err(Error::Parse("command substitution nested too deeply".into()));
    }
    Parser::nested(text, depth + 1).parse()
}

/// Inside backquotes `\$`, `` \` `` and `\\` lose their backslash.
fn unescape_backquoted(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if matches!(next, '$' | '`' | '\\') {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

fn push_text(parts: &mut Vec<WordPart>, ctx: Context, s: &str) {
    if ctx == Context::Unquoted {
        if let Some(WordPart::Literal(prev)) = parts.last_mut() {
            prev.push_str(s);
            return;
        }
        parts.push(WordPart::Literal(s.to_string()));
    } else {
        push_quoted(parts, s);
    }
}

fn push_quoted(parts: &mut Vec<WordPart>, s: &str) {
    if let Some(WordPart::Quoted(prev)) = parts.last_mut() {
        prev.push_str(s);
        return;
    }
    parts.push(WordPart::Quoted(s.to_string()));
}

fn push_quoted_part(parts: &mut Vec<WordPart>, s: &str) {
    if s.is_empty() {
        parts.push(WordPart::Quoted(String::new()));
    } else {
        push_quoted(parts, s);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parts(raw: &str) -> Vec<WordPart> {
        parse_word(raw, Span::default(), 0).unwrap().parts
    }

    fn lit(s: &str) -> WordPart {
        WordPart::Literal(s.to_string())
    }

    fn quoted(s: &str) -> WordPart {
        WordPart::Quoted(s.to_string())
    }

    fn param(s: &str) -> WordPart {
        WordPart::Parameter(s.to_string())
    }

    #[test]
    fn test_plain_literal() {
        assert_eq!(parts("hello"), vec![lit("hello")]);
    }

    #[test]
    fn test_quoting_boundaries() {
        assert_eq!(
            parts(r#"a'b c'"d $x"\*"#),
            vec![
                lit("a"),
                quoted("b c"),
                WordPart::DoubleQuoted(vec![quoted("d "), param("x")]),
                quoted("*"),
            ]
        );
    }

    #[test]
    fn test_parameters() {
        assert_eq!(parts("$HOME/foo"), vec![param("HOME"), lit("/foo")]);
        assert_eq!(parts("${x:-a b}"), vec![param("x:-a b")]);
        assert_eq!(parts("$?$1"), vec![param("?"), param("1")]);
        assert_eq!(parts("a$"), vec![lit("a$")]);
    }

    #[test]
    fn test_arithmetic_and_substitution() {
        assert_eq!(parts("$((1 + 2))"), vec![WordPart::Arithmetic("1 + 2".into())]);
        match &parts("$(echo hi)")[0] {
            WordPart::CommandSubstitution(script) => assert_eq!(script.body.items.len(), 1),
            other => panic!("unexpected part {:?}", other),
        }
        match &parts("`echo \\$x`")[0] {
            WordPart::CommandSubstitution(script) => {
                assert_eq!(script.body.items.len(), 1)
            }
            other => panic!("unexpected part {:?}", other),
        }
    }

    #[test]
    fn test_tilde_prefix() {
        assert_eq!(
            parts("~/src"),
            vec![WordPart::Tilde(String::new()), lit("/src")]
        );
        assert_eq!(parts("~bob"), vec![WordPart::Tilde("bob".into())]);
        assert_eq!(parts("a~"), vec![lit("a~")]);
    }

    #[test]
    fn test_double_quote_escapes() {
        assert_eq!(
            parts(r#""a\$b\n""#),
            vec![WordPart::DoubleQuoted(vec![quoted("a$b\\n")])]
        );
    }

    #[test]
    fn test_empty_quotes_mark_word_quoted() {
        let word = parse_word("''", Span::default(), 0).unwrap();
        assert!(word.is_quoted());
        assert_eq!(word.parts, vec![quoted("")]);
    }

    #[test]
    fn test_heredoc_keeps_quotes() {
        assert_eq!(
            parse_heredoc("it's $USER\n", 0).unwrap(),
            vec![quoted("it's "), param("USER"), quoted("\n")]
        );
    }
}
