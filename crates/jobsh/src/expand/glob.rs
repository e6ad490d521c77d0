//! Pathname expansion
//!
//! A glob is compiled once into a small AST ([`Pattern`]) and matched by
//! backtracking. The same matcher serves filename generation, `case`
//! patterns and the pattern operators of parameter expansion.

use std::path::{Path, PathBuf};

/// POSIX named character classes (`[:alpha:]` ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedClass {
    Alpha,
    Digit,
    Alnum,
    Upper,
    Lower,
    Space,
    Blank,
    Punct,
    Xdigit,
    Cntrl,
    Print,
    Graph,
    Word,
}

impl NamedClass {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "alpha" => Self::Alpha,
            "digit" => Self::Digit,
            "alnum" => Self::Alnum,
            "upper" => Self::Upper,
            "lower" => Self::Lower,
            "space" => Self::Space,
            "blank" => Self::Blank,
            "punct" => Self::Punct,
            "xdigit" => Self::Xdigit,
            "cntrl" => Self::Cntrl,
            "print" => Self::Print,
            "graph" => Self::Graph,
            "word" => Self::Word,
            _ => return None,
        })
    }

    fn contains(self, c: char) -> bool {
        match self {
            Self::Alpha => c.is_alphabetic(),
            Self::Digit => c.is_ascii_digit(),
            Self::Alnum => c.is_alphanumeric(),
            Self::Upper => c.is_uppercase(),
            Self::Lower => c.is_lowercase(),
            Self::Space => c.is_whitespace(),
            Self::Blank => c == ' ' || c == '\t',
            Self::Punct => c.is_ascii_punctuation(),
            Self::Xdigit => c.is_ascii_hexdigit(),
            Self::Cntrl => c.is_control(),
            Self::Print => !c.is_control(),
            Self::Graph => !c.is_control() && !c.is_whitespace(),
            Self::Word => c.is_alphanumeric() || c == '_',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ClassItem {
    Char(char),
    Range(char, char),
    Named(NamedClass),
}

/// One element of a compiled glob.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Literal(char),
    /// `?`
    AnyChar,
    /// `*`
    AnyRun,
    /// `[...]`
    Class { negated: bool, items: Vec<ClassItem> },
    /// `{a,b,c}`
    Alternation(Vec<Vec<Node>>),
}

/// A compiled glob pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    nodes: Vec<Node>,
}

impl Pattern {
    /// Compile a glob. Malformed brackets and braces are taken literally.
    pub fn new(pattern: &str) -> Self {
        let chars: Vec<char> = pattern.chars().collect();
        Self {
            nodes: compile(&chars),
        }
    }

    /// Whether the pattern contains any unescaped glob metacharacter.
    pub fn has_wildcards(&self) -> bool {
        self.nodes.iter().any(|n| !matches!(n, Node::Literal(_)))
    }

    /// The literal text of a wildcard-free pattern (escapes removed).
    pub fn literal(&self) -> Option<String> {
        self.nodes
            .iter()
            .map(|n| match n {
                Node::Literal(c) => Some(*c),
                _ => None,
            })
            .collect()
    }

    /// Whether the pattern starts with an explicit `.`.
    fn matches_dotfiles(&self) -> bool {
        matches!(self.nodes.first(), Some(Node::Literal('.')))
    }

    /// Match the whole of `text`.
    pub fn matches(&self, text: &str) -> bool {
        let chars: Vec<char> = text.chars().collect();
        match_nodes(&self.nodes, &chars)
    }

    /// Byte length of the shortest (or longest) prefix of `text` matching
    /// the pattern.
    pub fn match_prefix(&self, text: &str, longest: bool) -> Option<usize> {
        let mut bounds: Vec<usize> = char_boundaries(text);
        if longest {
            bounds.reverse();
        }
        bounds.into_iter().find(|&end| self.matches(&text[..end]))
    }

    /// Byte offset where the shortest (or longest) matching suffix of `text`
    /// starts.
    pub fn match_suffix(&self, text: &str, longest: bool) -> Option<usize> {
        let mut bounds: Vec<usize> = char_boundaries(text);
        if !longest {
            bounds.reverse();
        }
        bounds.into_iter().find(|&start| self.matches(&text[start..]))
    }

    /// Replace every non-overlapping longest match with `replacement`,
    /// scanning left to right.
    pub fn replace_all(&self, text: &str, replacement: &str) -> String {
        let bounds = char_boundaries(text);
        let mut out = String::with_capacity(text.len());
        let mut i = 0;
        while i < bounds.len() {
            let start = bounds[i];
            let found = bounds[i + 1..]
                .iter()
                .rev()
                .position(|&end| self.matches(&text[start..end]))
                .map(|pos| bounds.len() - 1 - pos);
            match found {
                Some(j) => {
                    out.push_str(replacement);
                    i = j;
                }
                None => {
                    if let Some(c) = text[start..].chars().next() {
                        out.push(c);
                    }
                    i += 1;
                }
            }
        }
        out
    }
}

fn char_boundaries(text: &str) -> Vec<usize> {
    text.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect()
}

fn compile(chars: &[char]) -> Vec<Node> {
    let mut nodes = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                nodes.push(Node::Literal(chars[i + 1]));
                i += 2;
            }
            '[' => match compile_class(chars, i + 1) {
                Some((node, next)) => {
                    nodes.push(node);
                    i = next;
                }
                None => {
                    nodes.push(Node::Literal('['));
                    i += 1;
                }
            },
            '{' => match compile_braces(chars, i + 1) {
                Some((node, next)) => {
                    nodes.push(node);
                    i = next;
                }
                None => {
                    nodes.push(Node::Literal('{'));
                    i += 1;
                }
            },
            '*' => {
                // collapse runs of stars
                if nodes.last() != Some(&Node::AnyRun) {
                    nodes.push(Node::AnyRun);
                }
                i += 1;
            }
            '?' => {
                nodes.push(Node::AnyChar);
                i += 1;
            }
            c => {
                nodes.push(Node::Literal(c));
                i += 1;
            }
        }
    }
    nodes
}

/// Parse a bracket expression whose body starts at `start`.
fn compile_class(chars: &[char], start: usize) -> Option<(Node, usize)> {
    let mut i = start;
    let negated = matches!(chars.get(i), Some('!') | Some('^'));
    if negated {
        i += 1;
    }

    let mut items = Vec::new();
    let mut first = true;
    loop {
        let c = *chars.get(i)?;
        if c == ']' && !first {
            return Some((Node::Class { negated, items }, i + 1));
        }
        first = false;

        if c == '[' && chars.get(i + 1) == Some(&':') {
            let rest: String = chars[i + 2..].iter().collect();
            if let Some(end) = rest.find(":]") {
                if let Some(class) = NamedClass::from_name(&rest[..end]) {
                    items.push(ClassItem::Named(class));
                    i += 2 + rest[..end].chars().count() + 2;
                    continue;
                }
            }
        }

        let (lo, width) = if c == '\\' {
            (*chars.get(i + 1)?, 2)
        } else {
            (c, 1)
        };
        i += width;

        if chars.get(i) == Some(&'-') && chars.get(i + 1).is_some_and(|&n| n != ']') {
            let (hi, width) = if chars[i + 1] == '\\' {
                (*chars.get(i + 2)?, 3)
            } else {
                (chars[i + 1], 2)
            };
            items.push(ClassItem::Range(lo, hi));
            i += width;
        } else {
            items.push(ClassItem::Char(lo));
        }
    }
}

/// Parse `{a,b}` whose body starts at `start`. Requires a top-level comma.
fn compile_braces(chars: &[char], start: usize) -> Option<(Node, usize)> {
    let mut depth = 0usize;
    let mut alternatives = Vec::new();
    let mut seg_start = start;
    let mut i = start;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            '{' => depth += 1,
            '}' if depth > 0 => depth -= 1,
            '}' => {
                alternatives.push(compile(&chars[seg_start..i]));
                if alternatives.len() < 2 {
                    return None;
                }
                return Some((Node::Alternation(alternatives), i + 1));
            }
            ',' if depth == 0 => {
                alternatives.push(compile(&chars[seg_start..i]));
                seg_start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn class_matches(negated: bool, items: &[ClassItem], c: char) -> bool {
    let hit = items.iter().any(|item| match *item {
        ClassItem::Char(x) => x == c,
        ClassItem::Range(lo, hi) => lo <= c && c <= hi,
        ClassItem::Named(class) => class.contains(c),
    });
    hit != negated
}

fn match_nodes(nodes: &[Node], text: &[char]) -> bool {
    let Some((node, rest)) = nodes.split_first() else {
        return text.is_empty();
    };
    match node {
        Node::Literal(c) => text.first() == Some(c) && match_nodes(rest, &text[1..]),
        Node::AnyChar => !text.is_empty() && match_nodes(rest, &text[1..]),
        Node::Class { negated, items } => {
            text.first()
                .is_some_and(|&c| class_matches(*negated, items, c))
                && match_nodes(rest, &text[1..])
        }
        Node::AnyRun => {
            if rest.is_empty() {
                return true;
            }
            (0..=text.len()).any(|k| match_nodes(rest, &text[k..]))
        }
        Node::Alternation(alternatives) => alternatives.iter().any(|alt| {
            let mut combined = alt.clone();
            combined.extend_from_slice(rest);
            match_nodes(&combined, text)
        }),
    }
}

/// Expand a leading `~` or `~user`. `home` is the value of `$HOME`; when it
/// is unset or empty the password database is consulted.
pub fn expand_tilde(word: &str, home: Option<&str>) -> String {
    let Some(rest) = word.strip_prefix('~') else {
        return word.to_string();
    };
    let (user, tail) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    match home_dir(user, home) {
        Some(dir) => format!("{}{}", dir, tail),
        None => word.to_string(),
    }
}

/// Home directory for `user` (empty = current user).
pub fn home_dir(user: &str, home: Option<&str>) -> Option<String> {
    use nix::unistd::{Uid, User};

    if user.is_empty() {
        if let Some(home) = home.filter(|h| !h.is_empty()) {
            return Some(home.to_string());
        }
        return User::from_uid(Uid::current())
            .ok()
            .flatten()
            .map(|u| u.dir.to_string_lossy().into_owned());
    }
    User::from_name(user)
        .ok()
        .flatten()
        .map(|u| u.dir.to_string_lossy().into_owned())
}

/// Whether a raw pattern contains glob metacharacters.
pub fn has_glob_chars(pattern: &str) -> bool {
    Pattern::new(pattern).has_wildcards()
}

/// Expand `pattern` against the filesystem relative to `cwd`.
///
/// Returns `[pattern]` unchanged when it has no metacharacters, and an empty
/// list when nothing matches. Results are sorted.
pub fn expand(pattern: &str, cwd: &Path) -> Vec<String> {
    let home = std::env::var("HOME").ok();
    let pattern = expand_tilde(pattern, home.as_deref());
    if !has_glob_chars(&pattern) {
        return vec![pattern];
    }
    matching_paths(&pattern, cwd)
}

/// Paths matching an already tilde-expanded pattern, sorted. Empty when
/// nothing matches.
pub fn matching_paths(pattern: &str, cwd: &Path) -> Vec<String> {
    let mut matches = glob_paths(pattern, cwd);
    matches.sort();
    matches
}

/// Walk the filesystem segment by segment, descending only while segments
/// remain.
fn glob_paths(pattern: &str, cwd: &Path) -> Vec<String> {
    let absolute = pattern.starts_with('/');
    let trailing_slash = pattern.ends_with('/') && pattern.len() > 1;
    let segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();

    let root = if absolute {
        (String::from("/"), PathBuf::from("/"))
    } else {
        (String::new(), cwd.to_path_buf())
    };
    let mut current = vec![root];

    for (idx, segment) in segments.iter().enumerate() {
        let last = idx + 1 == segments.len();
        let need_dir = !last || trailing_slash;
        let compiled = Pattern::new(segment);
        let mut next = Vec::new();

        for (display, path) in &current {
            if let Some(literal) = compiled.literal() {
                let candidate = path.join(&literal);
                let keep = if need_dir {
                    candidate.is_dir()
                } else {
                    candidate.symlink_metadata().is_ok()
                };
                if keep {
                    next.push((join_display(display, &literal), candidate));
                }
                continue;
            }

            let Ok(entries) = std::fs::read_dir(path) else {
                continue;
            };
            let mut names: Vec<String> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            for name in names {
                if name.starts_with('.') && !compiled.matches_dotfiles() {
                    continue;
                }
                if !compiled.matches(&name) {
                    continue;
                }
                let candidate = path.join(&name);
                if need_dir && !candidate.is_dir() {
                    continue;
                }
                next.push((join_display(display, &name), candidate));
            }
        }

        current = next;
        if current.is_empty() {
            break;
        }
    }

    current
        .into_iter()
        .map(|(display, _)| {
            if trailing_slash {
                format!("{}/", display)
            } else {
                display
            }
        })
        .collect()
}

fn join_display(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else if prefix.ends_with('/') {
        format!("{}{}", prefix, name)
    } else {
        format!("{}/{}", prefix, name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_star_and_question() {
        let p = Pattern::new("*.txt");
        assert!(p.matches("a.txt"));
        assert!(p.matches(".txt"));
        assert!(!p.matches("a.md"));
        assert!(Pattern::new("a?c").matches("abc"));
        assert!(!Pattern::new("a?c").matches("ac"));
        assert!(Pattern::new("*").matches(""));
    }

    #[test]
    fn test_bracket_classes() {
        assert!(Pattern::new("[abc]").matches("b"));
        assert!(!Pattern::new("[!abc]").matches("b"));
        assert!(Pattern::new("[^abc]").matches("d"));
        assert!(Pattern::new("[a-c]x").matches("bx"));
        assert!(Pattern::new("[[:digit:]][[:alpha:]]").matches("1z"));
        assert!(!Pattern::new("[[:upper:]]").matches("a"));
        assert!(Pattern::new("[]]").matches("]"));
        // unterminated bracket is a literal
        assert!(Pattern::new("[ab").matches("[ab"));
    }

    #[test]
    fn test_escape_takes_precedence() {
        assert!(Pattern::new("\\*").matches("*"));
        assert!(!Pattern::new("\\*").matches("x"));
        assert!(!Pattern::new("\\*").has_wildcards());
        assert!(Pattern::new("[\\]]").matches("]"));
    }

    #[test]
    fn test_brace_alternation() {
        let p = Pattern::new("file.{rs,toml}");
        assert!(p.matches("file.rs"));
        assert!(p.matches("file.toml"));
        assert!(!p.matches("file.md"));
        assert!(Pattern::new("{a,b{c,d}}").matches("bd"));
        // no comma: literal braces
        assert!(Pattern::new("{x}").matches("{x}"));
    }

    #[test]
    fn test_prefix_suffix_and_replace() {
        let p = Pattern::new("*/");
        assert_eq!(p.match_prefix("a/b/c", false), Some(2));
        assert_eq!(p.match_prefix("a/b/c", true), Some(4));
        let s = Pattern::new(".*");
        assert_eq!(s.match_suffix("f.tar.gz", false), Some(5));
        assert_eq!(s.match_suffix("f.tar.gz", true), Some(1));
        assert_eq!(Pattern::new("o").replace_all("foo boo", "0"), "f00 b00");
        assert_eq!(Pattern::new("b*o").replace_all("boo boo", "x"), "x");
    }

    #[test]
    fn test_expand_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.md", "b.txt", "a.txt", ".hidden.txt"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        assert_eq!(expand("*.txt", dir.path()), vec!["a.txt", "b.txt"]);
        assert_eq!(expand(".*.txt", dir.path()), vec![".hidden.txt"]);
        // repeated expansion is stable
        assert_eq!(expand("*.txt", dir.path()), expand("*.txt", dir.path()));
    }

    #[test]
    fn test_expand_descends_only_into_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/bin")).unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("src/lib.rs"), "").unwrap();
        fs::write(dir.path().join("src/bin/main.rs"), "").unwrap();
        fs::write(dir.path().join("notes"), "").unwrap();

        assert_eq!(expand("*/*.rs", dir.path()), vec!["src/lib.rs"]);
        assert_eq!(expand("src/*/*.rs", dir.path()), vec!["src/bin/main.rs"]);
        assert_eq!(expand("*/", dir.path()), vec!["docs/", "src/"]);
    }

    #[test]
    fn test_expand_absolute_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x.log"), "").unwrap();
        let pattern = format!("{}/*.log", dir.path().display());
        assert_eq!(
            expand(&pattern, Path::new("/")),
            vec![format!("{}/x.log", dir.path().display())]
        );
        assert!(expand("nope/*.txt", dir.path()).is_empty());
    }

    #[test]
    fn test_expand_without_metachars_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(expand("plain-name", dir.path()), vec!["plain-name"]);
    }

    #[test]
    fn test_tilde_expansion() {
        assert_eq!(expand_tilde("~/x", Some("/home/u")), "/home/u/x");
        assert_eq!(expand_tilde("~", Some("/home/u")), "/home/u");
        assert_eq!(expand_tilde("a~", Some("/home/u")), "a~");
        // empty HOME falls back to the password database
        assert!(!expand_tilde("~", Some("")).starts_with('~'));
        assert_eq!(
            expand_tilde("~no-such-user-xyz/a", None),
            "~no-such-user-xyz/a"
        );
    }
}
