//! Statement splitting for multi-statement query text.
//!
//! Scans query text left to right with a small state machine so that `;`
//! inside string literals and comments never ends a statement. Offsets are
//! preserved: each statement's text is exactly the input slice between its
//! offsets, so consumers can map statements back onto the original buffer.

/// One executable unit of a query buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// Trimmed statement text, including its terminating `;` when present.
    pub text: String,
    /// Byte offset of the first character of `text` in the original buffer.
    pub start_offset: usize,
    /// Byte offset one past the last character of `text`.
    pub end_offset: usize,
}

impl Statement {
    /// Creates a statement from an input buffer and a trimmed byte range.
    fn from_span(input: &str, start: usize, end: usize) -> Self {
        Self {
            text: input[start..end].to_string(),
            start_offset: start,
            end_offset: end,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    SingleQuote,
    DoubleQuote,
    LineComment,
    BlockComment,
}

/// Splits query text into an ordered sequence of statements.
///
/// A statement boundary is a top-level `;`. Statements are trimmed of
/// surrounding whitespace but internally unmodified. Segments containing
/// only whitespace, comments, and bare `;` produce no statement, so
/// comment-only input yields an empty sequence.
pub fn split_statements(input: &str) -> Vec<Statement> {
    let mut statements = Vec::new();
    let mut state = State::Normal;
    let mut block_depth = 0usize;
    let mut segment_start = 0usize;
    let mut has_content = false;

    let mut chars = input.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match state {
            State::Normal => match c {
                '\'' => {
                    state = State::SingleQuote;
                    has_content = true;
                }
                '"' => {
                    state = State::DoubleQuote;
                    has_content = true;
                }
                '-' if matches!(chars.peek(), Some((_, '-'))) => {
                    chars.next();
                    state = State::LineComment;
                }
                '/' if matches!(chars.peek(), Some((_, '*'))) => {
                    chars.next();
                    state = State::BlockComment;
                    block_depth = 1;
                }
                ';' => {
                    push_segment(input, segment_start, i + 1, has_content, &mut statements);
                    segment_start = i + 1;
                    has_content = false;
                }
                c if c.is_whitespace() => {}
                _ => has_content = true,
            },
            State::SingleQuote => {
                if c == '\'' {
                    // A doubled quote is an escape and stays in the string.
                    if matches!(chars.peek(), Some((_, '\''))) {
                        chars.next();
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::DoubleQuote => {
                if c == '"' {
                    if matches!(chars.peek(), Some((_, '"'))) {
                        chars.next();
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment => {
                if c == '*' && matches!(chars.peek(), Some((_, '/'))) {
                    chars.next();
                    block_depth -= 1;
                    if block_depth == 0 {
                        state = State::Normal;
                    }
                } else if c == '/' && matches!(chars.peek(), Some((_, '*'))) {
                    chars.next();
                    block_depth += 1;
                }
            }
        }
    }

    // A trailing statement with no closing `;` is kept only when it has
    // non-whitespace, non-comment content.
    push_segment(
        input,
        segment_start,
        input.len(),
        has_content,
        &mut statements,
    );

    statements
}

fn push_segment(
    input: &str,
    start: usize,
    end: usize,
    has_content: bool,
    statements: &mut Vec<Statement>,
) {
    if !has_content || start >= end {
        return;
    }

    let segment = &input[start..end];
    let leading = segment.len() - segment.trim_start().len();
    let trailing = segment.len() - segment.trim_end().len();
    let trimmed_start = start + leading;
    let trimmed_end = end - trailing;

    if trimmed_start < trimmed_end {
        statements.push(Statement::from_span(input, trimmed_start, trimmed_end));
    }
}
