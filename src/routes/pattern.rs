//! Domain and path patterns with named captures.
//!
//! A pattern is literal text interleaved with `{name}` captures. A bare
//! capture takes one or more characters up to the next `/`; the
//! constraints `.*` and `.+` let it run to the end of the input (empty
//! allowed for `.*`). Matching is anchored at both ends and greedy, with
//! backtracking so that `{sub}.example.com` splits `a.b.example.com` as
//! `sub = "a.b"`.
//!
//! Patterns are compiled once, when the route record is written, and are
//! immutable afterwards.

use std::collections::{HashMap, HashSet};

use crate::error::PatternError;

pub type Captures = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureKind {
    /// `{name}` or `{name:[^/]+}`
    Segment,
    /// `{name:.*}`
    Rest,
    /// `{name:.+}`
    NonEmptyRest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Capture { name: String, kind: CaptureKind },
}

#[derive(Debug, Clone)]
pub struct Pattern {
    pieces: Vec<Piece>,
    fold_case: bool,
}

impl Pattern {
    /// Compile a pattern matched against request paths (case-sensitive).
    pub fn path(source: &str) -> Result<Self, PatternError> {
        Self::compile(source, false)
    }

    /// Compile a pattern matched against hostnames. Literal text is
    /// case-folded; capture names are kept as written.
    pub fn host(source: &str) -> Result<Self, PatternError> {
        Self::compile(source, true)
    }

    fn compile(source: &str, fold_case: bool) -> Result<Self, PatternError> {
        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut names: Vec<String> = Vec::new();
        let mut chars = source.char_indices();

        while let Some((pos, ch)) = chars.next() {
            match ch {
                '{' => {
                    let body_start = pos + 1;
                    let close = source[body_start..]
                        .find('}')
                        .map(|off| body_start + off)
                        .ok_or(PatternError::Unterminated(pos))?;
                    let body = &source[body_start..close];
                    let (name, constraint) = match body.split_once(':') {
                        Some((name, constraint)) => (name, Some(constraint)),
                        None => (body, None),
                    };
                    if name.is_empty() {
                        return Err(PatternError::EmptyName(pos));
                    }
                    let kind = match constraint {
                        None | Some("[^/]+") => CaptureKind::Segment,
                        Some(".*") => CaptureKind::Rest,
                        Some(".+") => CaptureKind::NonEmptyRest,
                        Some(other) => {
                            return Err(PatternError::UnsupportedConstraint {
                                name: name.to_string(),
                                constraint: other.to_string(),
                            })
                        }
                    };
                    if names.iter().any(|n| n == name) {
                        return Err(PatternError::DuplicateName(name.to_string()));
                    }
                    names.push(name.to_string());

                    if !literal.is_empty() {
                        pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                    }
                    pieces.push(Piece::Capture {
                        name: name.to_string(),
                        kind,
                    });

                    // Skip the capture body.
                    for (next_pos, _) in chars.by_ref() {
                        if next_pos == close {
                            break;
                        }
                    }
                }
                '}' => return Err(PatternError::Unmatched(pos)),
                _ if fold_case => literal.extend(ch.to_lowercase()),
                _ => literal.push(ch),
            }
        }
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }

        Ok(Self {
            pieces,
            fold_case,
        })
    }

    /// Capture names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pieces.iter().filter_map(|p| match p {
            Piece::Capture { name, .. } => Some(name.as_str()),
            Piece::Literal(_) => None,
        })
    }

    /// Match the whole of `input`, returning the captured values.
    #[must_use]
    pub fn captures(&self, input: &str) -> Option<Captures> {
        let folded;
        let input = if self.fold_case {
            folded = input.to_lowercase();
            folded.as_str()
        } else {
            input
        };

        let mut matcher = Matcher {
            pieces: &self.pieces,
            input,
            failed: HashSet::new(),
            found: Vec::with_capacity(self.pieces.len()),
        };
        if !matcher.matches(0, 0) {
            return None;
        }
        Some(
            matcher
                .found
                .into_iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        )
    }
}

/// Backtracking matcher. `(piece, offset)` states that already failed
/// are remembered, so the work is bounded by pieces x input length
/// squared however many wildcards a pattern has.
struct Matcher<'p, 'i> {
    pieces: &'p [Piece],
    input: &'i str,
    failed: HashSet<(usize, usize)>,
    found: Vec<(&'p str, &'i str)>,
}

impl Matcher<'_, '_> {
    fn matches(&mut self, piece: usize, at: usize) -> bool {
        let pieces = self.pieces;
        let input = self.input;
        let Some(current) = pieces.get(piece) else {
            return at == input.len();
        };
        if self.failed.contains(&(piece, at)) {
            return false;
        }

        let tail = &input[at..];
        let matched = match current {
            Piece::Literal(literal) => {
                tail.starts_with(literal.as_str()) && self.matches(piece + 1, at + literal.len())
            }
            Piece::Capture { name, kind } => {
                let limit = match kind {
                    CaptureKind::Segment => tail.find('/').unwrap_or(tail.len()),
                    CaptureKind::Rest | CaptureKind::NonEmptyRest => tail.len(),
                };
                let min = usize::from(*kind != CaptureKind::Rest);

                let mut matched = false;
                for end in (min..=limit).rev() {
                    if !tail.is_char_boundary(end) {
                        continue;
                    }
                    self.found.push((name.as_str(), &tail[..end]));
                    if self.matches(piece + 1, at + end) {
                        matched = true;
                        break;
                    }
                    self.found.pop();
                }
                matched
            }
        };

        if !matched {
            self.failed.insert((piece, at));
        }
        matched
    }
}
