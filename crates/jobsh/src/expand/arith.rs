//! Integer arithmetic for `$((...))`

use super::param::{ParamContext, Value};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(i64),
    Name(String),
    Op(&'static str),
    LParen,
    RParen,
}

const OPERATORS: &[&str] = &[
    "**", "++", "--", "+=", "-=", "*=", "/=", "%=", "<=", ">=", "==", "!=", "&&", "||", "<<",
    ">>", "+", "-", "*", "/", "%", "<", ">", "!", "~", "=", "?", ":", "&", "|", "^",
];

fn tokenize(expr: &str) -> Result<Vec<Tok>> {
    let mut tokens = Vec::new();
    let bytes = expr.as_bytes();
    let mut i = 0;
    'outer: while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && (bytes[i] as char).is_ascii_alphanumeric() {
                i += 1;
            }
            tokens.push(Tok::Num(parse_number(&expr[start..i])?));
            continue;
        }
        if c == '$' || c.is_ascii_alphabetic() || c == '_' {
            if c == '$' {
                i += 1;
                if bytes.get(i) == Some(&b'{') {
                    i += 1;
                    let start = i;
                    while i < bytes.len() && bytes[i] != b'}' {
                        i += 1;
                    }
                    tokens.push(Tok::Name(expr[start..i].to_string()));
                    i += 1;
                    continue;
                }
            }
            let start = i;
            while i < bytes.len() && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
            {
                i += 1;
            }
            if start == i {
                return Err(Error::Expansion(format!("{}: syntax error in expression", expr)));
            }
            tokens.push(Tok::Name(expr[start..i].to_string()));
            continue;
        }
        if c == '(' {
            tokens.push(Tok::LParen);
            i += 1;
            continue;
        }
        if c == ')' {
            tokens.push(Tok::RParen);
            i += 1;
            continue;
        }
        for op in OPERATORS {
            if expr[i..].starts_with(op) {
                tokens.push(Tok::Op(*op));
                i += op.len();
                continue 'outer;
            }
        }
        return Err(Error::Expansion(format!(
            "{}: syntax error: invalid arithmetic operator (error token is \"{}\")",
            expr,
            &expr[i..]
        )));
    }
    Ok(tokens)
}

/// Decimal, `0x` hex and leading-zero octal literals.
fn parse_number(text: &str) -> Result<i64> {
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else if text.len() > 1 && text.starts_with('0') {
        i64::from_str_radix(&text[1..], 8)
    } else {
        text.parse()
    };
    parsed.map_err(|_| Error::Expansion(format!("{}: value too great for base", text)))
}

struct Evaluator<'a> {
    tokens: Vec<Tok>,
    pos: usize,
    ctx: &'a mut dyn ParamContext,
    expr: &'a str,
    /// Short-circuited branches are parsed but have no side effects
    skip: usize,
}

/// Evaluate an arithmetic expression. Variables are read and assigned
/// through `ctx`; unset or non-numeric variables count as 0.
pub fn evaluate(ctx: &mut dyn ParamContext, expr: &str) -> Result<i64> {
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Ok(0);
    }
    let mut eval = Evaluator {
        tokens,
        pos: 0,
        ctx,
        expr,
        skip: 0,
    };
    let value = eval.assignment()?;
    if eval.pos < eval.tokens.len() {
        return Err(eval.syntax_error());
    }
    Ok(value)
}

impl Evaluator<'_> {
    fn syntax_error(&self) -> Error {
        Error::Expansion(format!("{}: syntax error in expression", self.expr))
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn peek_op(&self) -> Option<&'static str> {
        match self.peek() {
            Some(Tok::Op(op)) => Some(*op),
            _ => None,
        }
    }

    fn var(&self, name: &str) -> i64 {
        match self.ctx.lookup(name) {
            Some(Value::Scalar(s)) => s.trim().parse().unwrap_or(0),
            Some(other) => other
                .elements()
                .first()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(0),
            None => 0,
        }
    }

    fn set_var(&mut self, name: &str, value: i64) {
        if self.skip == 0 {
            self.ctx.assign(name, value.to_string());
        }
    }

    fn assignment(&mut self) -> Result<i64> {
        if let (Some(Tok::Name(name)), Some(Tok::Op(op))) =
            (self.tokens.get(self.pos).cloned(), self.tokens.get(self.pos + 1).cloned())
        {
            if matches!(op, "=" | "+=" | "-=" | "*=" | "/=" | "%=") {
                self.pos += 2;
                let rhs = self.assignment()?;
                let current = self.var(&name);
                let value = match op {
                    "=" => rhs,
                    "+=" => current.wrapping_add(rhs),
                    "-=" => current.wrapping_sub(rhs),
                    "*=" => current.wrapping_mul(rhs),
                    "/=" => self.divide(current, rhs)?,
                    _ => self.remainder(current, rhs)?,
                };
                self.set_var(&name, value);
                return Ok(value);
            }
        }
        self.ternary()
    }

    fn ternary(&mut self) -> Result<i64> {
        let cond = self.binary(0)?;
        if self.peek_op() != Some("?") {
            return Ok(cond);
        }
        self.pos += 1;
        if cond == 0 {
            self.skip += 1;
        }
        let then = self.assignment()?;
        if cond == 0 {
            self.skip -= 1;
        }
        if self.peek_op() != Some(":") {
            return Err(self.syntax_error());
        }
        self.pos += 1;
        if cond != 0 {
            self.skip += 1;
        }
        let otherwise = self.assignment()?;
        if cond != 0 {
            self.skip -= 1;
        }
        Ok(if cond != 0 { then } else { otherwise })
    }

    /// Precedence climbing over the binary operators.
    fn binary(&mut self, min_prec: u8) -> Result<i64> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.peek_op() {
            let Some(prec) = precedence(op) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.pos += 1;

            // && and || short-circuit
            if op == "&&" || op == "||" {
                let short = (op == "&&" && lhs == 0) || (op == "||" && lhs != 0);
                if short {
                    self.skip += 1;
                }
                let rhs = self.binary(prec + 1)?;
                if short {
                    self.skip -= 1;
                    lhs = i64::from(op == "||");
                } else {
                    lhs = i64::from(rhs != 0);
                }
                continue;
            }

            // ** is right associative
            let next_min = if op == "**" { prec } else { prec + 1 };
            let rhs = self.binary(next_min)?;
            lhs = self.apply(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn apply(&self, op: &str, l: i64, r: i64) -> Result<i64> {
        Ok(match op {
            "|" => l | r,
            "^" => l ^ r,
            "&" => l & r,
            "==" => i64::from(l == r),
            "!=" => i64::from(l != r),
            "<" => i64::from(l < r),
            "<=" => i64::from(l <= r),
            ">" => i64::from(l > r),
            ">=" => i64::from(l >= r),
            "<<" => l.wrapping_shl(r as u32),
            ">>" => l.wrapping_shr(r as u32),
            "+" => l.wrapping_add(r),
            "-" => l.wrapping_sub(r),
            "*" => l.wrapping_mul(r),
            "/" => self.divide(l, r)?,
            "%" => self.remainder(l, r)?,
            "**" => {
                if r < 0 {
                    return Err(Error::Expansion(format!(
                        "{}: exponent less than 0",
                        self.expr
                    )));
                }
                l.wrapping_pow(r as u32)
            }
            _ => return Err(self.syntax_error()),
        })
    }

    fn divide(&self, l: i64, r: i64) -> Result<i64> {
        if r == 0 {
            if self.skip > 0 {
                return Ok(0);
            }
            return Err(Error::Expansion(format!("{}: division by 0", self.expr)));
        }
        Ok(l.wrapping_div(r))
    }

    fn remainder(&self, l: i64, r: i64) -> Result<i64> {
        if r == 0 {
            if self.skip > 0 {
                return Ok(0);
            }
            return Err(Error::Expansion(format!("{}: division by 0", self.expr)));
        }
        Ok(l.wrapping_rem(r))
    }

    fn unary(&mut self) -> Result<i64> {
        match self.peek_op() {
            Some("-") => {
                self.pos += 1;
                Ok(self.unary()?.wrapping_neg())
            }
            Some("+") => {
                self.pos += 1;
                self.unary()
            }
            Some("!") => {
                self.pos += 1;
                Ok(i64::from(self.unary()? == 0))
            }
            Some("~") => {
                self.pos += 1;
                Ok(!self.unary()?)
            }
            Some(op @ ("++" | "--")) => {
                self.pos += 1;
                let Some(Tok::Name(name)) = self.peek().cloned() else {
                    return Err(self.syntax_error());
                };
                self.pos += 1;
                let delta = if op == "++" { 1 } else { -1 };
                let value = self.var(&name).wrapping_add(delta);
                self.set_var(&name, value);
                Ok(value)
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<i64> {
        match self.peek().cloned() {
            Some(Tok::Num(n)) => {
                self.pos += 1;
                Ok(n)
            }
            Some(Tok::Name(name)) => {
                self.pos += 1;
                let value = self.var(&name);
                match self.peek_op() {
                    Some(op @ ("++" | "--")) => {
                        self.pos += 1;
                        let delta = if op == "++" { 1 } else { -1 };
                        self.set_var(&name, value.wrapping_add(delta));
                        Ok(value)
                    }
                    _ => Ok(value),
                }
            }
            Some(Tok::LParen) => {
                self.pos += 1;
                let value = self.assignment()?;
                if self.peek() != Some(&Tok::RParen) {
                    return Err(self.syntax_error());
                }
                self.pos += 1;
                Ok(value)
            }
            _ => Err(self.syntax_error()),
        }
    }
}

fn precedence(op: &str) -> Option<u8> {
    Some(match op {
        "||" => 1,
        "&&" => 2,
        "|" => 3,
        "^" => 4,
        "&" => 5,
        "==" | "!=" => 6,
        "<" | "<=" | ">" | ">=" => 7,
        "<<" | ">>" => 8,
        "+" | "-" => 9,
        "*" | "/" | "%" => 10,
        "**" => 11,
        _ => return None,
    })
}
