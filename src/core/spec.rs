//! core::spec
//!
//! Branch specifications: the glob patterns that decide which remote refs a
//! project tracks, and which it excludes.
//!
//! # Syntax
//!
//! A specification string is a list of patterns separated by commas and/or
//! whitespace. An empty string yields an empty specification.
//!
//! Each pattern matches the *short* name of a ref:
//!
//! - `*` matches any run of characters except `/`
//! - `**` matches any run of characters, including `/`
//! - `?` matches exactly one character other than `/`
//!
//! A pattern may be qualified to restrict it to one namespace:
//!
//! - `refs/heads/<glob>` matches branches only
//! - `refs/tags/<glob>` matches tags only
//! - `refs/remotes/<remote>/<glob>` and `<remote>/<glob>` match branches only
//!
//! Unqualified patterns match branches and tags alike. Matching is
//! case-sensitive.
//!
//! # Example
//!
//! ```
//! use gitscm::core::spec::BranchSpec;
//! use gitscm::core::types::TrackedRef;
//!
//! let spec = BranchSpec::parse("master, feature/*", "origin").unwrap();
//! assert!(spec.matches(&TrackedRef::branch("feature/login").unwrap()));
//! assert!(!spec.matches(&TrackedRef::branch("feature/a/b").unwrap()));
//! assert!(spec.matches(&TrackedRef::tag("master").unwrap()));
//! ```

use std::fmt;

use thiserror::Error;

use crate::core::types::{validate_ref_name, RefKind, TrackedRef};

/// Errors from parsing a branch specification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("invalid branch pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// One parsed pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefPattern {
    raw: String,
    kind: Option<RefKind>,
    glob: Vec<char>,
}

impl RefPattern {
    fn parse(raw: &str, remote: &str) -> Result<Self, SpecError> {
        let invalid = |reason: &str| SpecError::InvalidPattern {
            pattern: raw.to_string(),
            reason: reason.to_string(),
        };

        let remote_tracking = format!("refs/remotes/{remote}/");
        let remote_short = format!("{remote}/");

        let (kind, glob) = if let Some(rest) = raw.strip_prefix(RefKind::Branch.prefix()) {
            (Some(RefKind::Branch), rest)
        } else if let Some(rest) = raw.strip_prefix(RefKind::Tag.prefix()) {
            (Some(RefKind::Tag), rest)
        } else if let Some(rest) = raw.strip_prefix(remote_tracking.as_str()) {
            (Some(RefKind::Branch), rest)
        } else if let Some(rest) = raw
            .strip_prefix(remote_short.as_str())
            .filter(|_| !remote.is_empty())
        {
            (Some(RefKind::Branch), rest)
        } else {
            (None, raw)
        };

        if glob.is_empty() {
            return Err(invalid("pattern names no ref"));
        }

        // Wildcards are the only characters a pattern may add to a ref name.
        let stand_in: String = glob
            .chars()
            .map(|c| if c == '*' || c == '?' { 'x' } else { c })
            .collect();
        validate_ref_name(&stand_in).map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            raw: raw.to_string(),
            kind,
            glob: glob.chars().collect(),
        })
    }

    /// Check a ref against this pattern.
    pub fn matches(&self, reference: &TrackedRef) -> bool {
        if let Some(kind) = self.kind {
            if kind != reference.kind() {
                return false;
            }
        }
        let name: Vec<char> = reference.name().chars().collect();
        glob_match(&self.glob, &name)
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// A set of ref patterns.
///
/// An empty specification matches nothing; callers decide what "empty"
/// means for them (the selector treats an empty include set as "all refs").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchSpec {
    patterns: Vec<RefPattern>,
}

/// Exclusions share the include syntax.
pub type ExclusionSpec = BranchSpec;

impl BranchSpec {
    /// Parse a comma/whitespace separated specification.
    ///
    /// `remote` is the configured remote name, used to strip `origin/` style
    /// prefixes.
    ///
    /// # Errors
    ///
    /// Returns `SpecError::InvalidPattern` for the first malformed pattern.
    pub fn parse(input: &str, remote: &str) -> Result<Self, SpecError> {
        let patterns = input
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|token| !token.is_empty())
            .map(|token| RefPattern::parse(token, remote))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// The empty specification.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// True if any pattern matches the ref.
    pub fn matches(&self, reference: &TrackedRef) -> bool {
        self.patterns.iter().any(|p| p.matches(reference))
    }

    pub fn patterns(&self) -> &[RefPattern] {
        &self.patterns
    }
}

impl fmt::Display for BranchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw: Vec<&str> = self.patterns.iter().map(|p| p.as_str()).collect();
        write!(f, "{}", raw.join(", "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    /// `**`: any run of characters, `/` included.
    AnyPath,
    /// `*`: any run within one path component.
    AnyComponent,
    /// `?`: one character other than `/`.
    One,
    Literal(char),
}

fn tokenize(pattern: &[char]) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut i = 0;
    while i < pattern.len() {
        let token = match pattern[i] {
            '*' if pattern.get(i + 1) == Some(&'*') => {
                i += 1;
                Token::AnyPath
            }
            '*' => Token::AnyComponent,
            '?' => Token::One,
            c => Token::Literal(c),
        };
        tokens.push(token);
        i += 1;
    }
    tokens
}

/// Glob match in O(pattern * text) time.
///
/// `rest[j]` holds whether the pattern tail after the current token matches
/// `text[j..]`; rows are filled from the end of the pattern backwards.
fn glob_match(pattern: &[char], text: &[char]) -> bool {
    let tokens = tokenize(pattern);
    let n = text.len();

    let mut rest = vec![false; n + 1];
    rest[n] = true;
    let mut row = vec![false; n + 1];

    for token in tokens.iter().rev() {
        for j in (0..=n).rev() {
            let here = text.get(j);
            row[j] = match token {
                Token::AnyPath => rest[j] || (here.is_some() && row[j + 1]),
                Token::AnyComponent => rest[j] || (here.is_some_and(|c| *c != '/') && row[j + 1]),
                Token::One => here.is_some_and(|c| *c != '/') && rest[j + 1],
                Token::Literal(l) => here == Some(l) && rest[j + 1],
            };
        }
        std::mem::swap(&mut rest, &mut row);
    }
    rest[0]
}
