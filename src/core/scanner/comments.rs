//! Comment stripping for scanned source files.
//!
//! A small lexer that blanks out `//` line comments, `/* */` block comments
//! and, for `.vue` files, `<!-- -->` markup comments. String literals are
//! tracked so comment markers inside them are left alone, and template
//! literal `${...}` interpolations are treated as code. Newlines inside
//! removed comments are kept so line numbers stay stable.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Code,
    LineComment,
    BlockComment,
    MarkupComment,
    Quoted(char),
    Template,
}

/// Comment grammar for a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grammar {
    markup_comments: bool,
}

impl Grammar {
    /// Grammar for an extension without the leading dot.
    pub fn for_extension(ext: &str) -> Self {
        Self {
            markup_comments: ext.eq_ignore_ascii_case("vue"),
        }
    }
}

/// Remove comments from `source`.
pub fn strip_comments(source: &str, grammar: Grammar) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut state = State::Code;
    // Brace depth of each open `${` interpolation, innermost last.
    let mut interpolations: Vec<usize> = Vec::new();
    let mut i = 0;

    let starts = |i: usize, pat: &str| pat.chars().enumerate().all(|(k, c)| chars.get(i + k) == Some(&c));

    while i < chars.len() {
        let c = chars[i];
        match state {
            State::Code => {
                if starts(i, "//") {
                    state = State::LineComment;
                    i += 2;
                    continue;
                }
                if starts(i, "/*") {
                    state = State::BlockComment;
                    i += 2;
                    continue;
                }
                if grammar.markup_comments && starts(i, "<!--") {
                    state = State::MarkupComment;
                    i += 4;
                    continue;
                }
                match c {
                    '"' | '\'' => state = State::Quoted(c),
                    '`' => state = State::Template,
                    '{' => {
                        if let Some(depth) = interpolations.last_mut() {
                            *depth += 1;
                        }
                    }
                    '}' => match interpolations.last_mut() {
                        Some(0) => {
                            interpolations.pop();
                            state = State::Template;
                        }
                        Some(depth) => *depth -= 1,
                        None => {}
                    },
                    _ => {}
                }
                out.push(c);
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Code;
                    out.push(c);
                }
            }
            State::BlockComment => {
                if starts(i, "*/") {
                    state = State::Code;
                    out.push(' ');
                    i += 2;
                    continue;
                }
                if c == '\n' {
                    out.push(c);
                }
            }
            State::MarkupComment => {
                if starts(i, "-->") {
                    state = State::Code;
                    out.push(' ');
                    i += 3;
                    continue;
                }
                if c == '\n' {
                    out.push(c);
                }
            }
            State::Quoted(quote) => {
                out.push(c);
                if c == '\\' {
                    if let Some(&next) = chars.get(i + 1) {
                        out.push(next);
                        i += 2;
                        continue;
                    }
                } else if c == quote || c == '\n' {
                    // An unterminated quote ends at the line break.
                    state = State::Code;
                }
            }
            State::Template => {
                out.push(c);
                if c == '\\' {
                    if let Some(&next) = chars.get(i + 1) {
                        out.push(next);
                        i += 2;
                        continue;
                    }
                } else if c == '`' {
                    state = State::Code;
                } else if starts(i, "${") {
                    out.push('{');
                    interpolations.push(0);
                    state = State::Code;
                    i += 2;
                    continue;
                }
            }
        }
        i += 1;
    }

    out
}
