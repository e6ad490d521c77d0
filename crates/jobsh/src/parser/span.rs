//! Source location tracking for parse errors and raw word spans

/// A position in source code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    /// 1-based line number
    pub line: usize,
    /// 1-based column number (character within line)
    pub column: usize,
    /// 0-based byte offset from start of input
    pub offset: usize,
}

impl Position {
    /// Create a new position at line 1, column 1, offset 0.
    pub fn new() -> Self {
        Self {
            line: 1,
            column: 1,
            offset: 0,
        }
    }

    /// Advance position by one character.
    pub fn advance(&mut self, ch: char) {
        self.offset += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A span of source code (start inclusive, end exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    /// Create a span from start to end positions.
    pub fn from_positions(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Merge two spans into one covering both.
    pub fn merge(self, other: Span) -> Self {
        let start = if self.start.offset <= other.start.offset {
            self.start
        } else {
            other.start
        };
        let end = if self.end.offset >= other.end.offset {
            self.end
        } else {
            other.end
        };
        Self { start, end }
    }

    /// Byte length of the span.
    pub fn len(&self) -> usize {
        self.end.offset.saturating_sub(self.start.offset)
    }

    /// Whether the span covers no input.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The exact source text covered by this span.
    pub fn slice<'a>(&self, input: &'a str) -> &'a str {
        input.get(self.start.offset..self.end.offset).unwrap_or("")
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start.line == self.end.line {
            write!(f, "line {}", self.start.line)
        } else {
            write!(f, "lines {}-{}", self.start.line, self.end.line)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(line: usize, column: usize, offset: usize) -> Position {
        Position {
            line,
            column,
            offset,
        }
    }

    #[test]
    fn test_position_advance() {
        let mut p = Position::new();
        p.advance('a');
        assert_eq!(p, pos(1, 2, 1));
        p.advance('\n');
        assert_eq!(p, pos(2, 1, 2));
        p.advance('é');
        assert_eq!(p, pos(2, 2, 4));
    }

    #[test]
    fn test_span_merge_and_slice() {
        let input = "echo hello";
        let a = Span::from_positions(pos(1, 1, 0), pos(1, 5, 4));
        let b = Span::from_positions(pos(1, 6, 5), pos(1, 11, 10));
        assert_eq!(a.slice(input), "echo");
        assert_eq!(b.slice(input), "hello");
        let merged = a.merge(b);
        assert_eq!(merged.slice(input), input);
        assert_eq!(merged.len(), 10);
        assert!(!merged.is_empty());
    }

    #[test]
    fn test_span_display() {
        let single = Span::from_positions(pos(3, 1, 0), pos(3, 10, 9));
        assert_eq!(single.to_string(), "line 3");
        let multi = Span::from_positions(pos(1, 1, 0), pos(5, 1, 50));
        assert_eq!(multi.to_string(), "lines 1-5");
    }
}
