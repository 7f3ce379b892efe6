//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`CommitId`] - Git commit identifier (SHA)
//! - [`RefKind`] - Whether a remote ref is a branch head or a tag
//! - [`TrackedRef`] - A remote ref identified by kind and short name
//! - [`Branch`] - Snapshot of a ref at a revision
//! - [`Identity`] - Author/committer identity for commits made on our behalf
//!
//! # Validation
//!
//! These types enforce validity at construction time. Invalid values
//! cannot be represented.
//!
//! # Examples
//!
//! ```
//! use gitscm::core::types::{CommitId, RefKind, TrackedRef};
//!
//! let id = CommitId::new("abc123def4567890abc123def4567890abc12345").unwrap();
//! let tag = TrackedRef::new(RefKind::Tag, "v1.0").unwrap();
//! assert_eq!(tag.full_name(), "refs/tags/v1.0");
//!
//! assert!(CommitId::new("not-a-sha").is_err());
//! assert!(TrackedRef::new(RefKind::Branch, "bad..name").is_err());
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid commit id: {0}")]
    InvalidCommitId(String),

    #[error("invalid ref name: {0}")]
    InvalidRefName(String),

    #[error("invalid identity: {0}")]
    InvalidIdentity(String),
}

/// A Git commit identifier (SHA-1 or SHA-256).
///
/// Ids are normalized to lowercase. Equality is exact; no ordering is
/// implied between ids, ancestry must be asked of the repository.
///
/// # Example
///
/// ```
/// use gitscm::core::types::CommitId;
///
/// let id = CommitId::new("ABC123DEF4567890ABC123DEF4567890ABC12345").unwrap();
/// assert_eq!(id.as_str(), "abc123def4567890abc123def4567890abc12345");
/// assert_eq!(id.short(7), "abc123d");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommitId(String);

impl CommitId {
    /// Create a new validated commit id.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidCommitId` if the string is not a 40 or 64
    /// character hex id.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into().to_ascii_lowercase();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Get an abbreviated form of the id.
    pub fn short(&self, len: usize) -> &str {
        let end = len.min(self.0.len());
        &self.0[..end]
    }

    fn validate(id: &str) -> Result<(), TypeError> {
        // SHA-1 is 40 hex chars, SHA-256 is 64
        if id.len() != 40 && id.len() != 64 {
            return Err(TypeError::InvalidCommitId(format!(
                "expected 40 or 64 hex characters, got {}",
                id.len()
            )));
        }
        if !id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TypeError::InvalidCommitId(
                "commit id must be hexadecimal".into(),
            ));
        }
        Ok(())
    }

    /// Get the commit id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CommitId {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<CommitId> for String {
    fn from(id: CommitId) -> Self {
        id.0
    }
}

impl AsRef<str> for CommitId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The namespace a remote ref lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    /// A branch head (`refs/heads/*` on the remote).
    Branch,
    /// A tag (`refs/tags/*` on the remote).
    Tag,
}

impl RefKind {
    /// The ref prefix on the remote side.
    pub fn prefix(&self) -> &'static str {
        match self {
            RefKind::Branch => "refs/heads/",
            RefKind::Tag => "refs/tags/",
        }
    }
}

/// A remote ref identified by its namespace and short name.
///
/// The full name (`refs/heads/<name>` or `refs/tags/<name>`) is the key used
/// everywhere state is tracked per ref, so a branch and a tag sharing a short
/// name never collapse into one entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrackedRef {
    kind: RefKind,
    name: String,
}

impl TrackedRef {
    /// Create a tracked ref from a kind and a short name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidRefName` if the name violates Git's refname rules.
    pub fn new(kind: RefKind, name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        validate_ref_name(&name)?;
        Ok(Self { kind, name })
    }

    /// Shorthand for a branch ref.
    pub fn branch(name: impl Into<String>) -> Result<Self, TypeError> {
        Self::new(RefKind::Branch, name)
    }

    /// Shorthand for a tag ref.
    pub fn tag(name: impl Into<String>) -> Result<Self, TypeError> {
        Self::new(RefKind::Tag, name)
    }

    /// Parse a full ref name (`refs/heads/x` or `refs/tags/x`).
    ///
    /// # Example
    ///
    /// ```
    /// use gitscm::core::types::{RefKind, TrackedRef};
    ///
    /// let r = TrackedRef::parse("refs/tags/v2").unwrap();
    /// assert_eq!(r.kind(), RefKind::Tag);
    /// assert_eq!(r.name(), "v2");
    /// assert!(TrackedRef::parse("refs/notes/x").is_err());
    /// ```
    pub fn parse(full: &str) -> Result<Self, TypeError> {
        for kind in [RefKind::Branch, RefKind::Tag] {
            if let Some(name) = full.strip_prefix(kind.prefix()) {
                return Self::new(kind, name);
            }
        }
        Err(TypeError::InvalidRefName(format!(
            "'{full}' is neither a branch nor a tag ref"
        )))
    }

    pub fn kind(&self) -> RefKind {
        self.kind
    }

    /// The short name (without `refs/heads/` or `refs/tags/`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The full ref name on the remote.
    pub fn full_name(&self) -> String {
        format!("{}{}", self.kind.prefix(), self.name)
    }
}

impl TryFrom<String> for TrackedRef {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<TrackedRef> for String {
    fn from(r: TrackedRef) -> Self {
        r.full_name()
    }
}

impl fmt::Display for TrackedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.name)
    }
}

/// A named ref observed at a revision.
///
/// Immutable snapshot; every fetch produces a fresh set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Branch {
    #[serde(rename = "ref")]
    pub reference: TrackedRef,
    pub revision: CommitId,
}

impl Branch {
    pub fn new(reference: TrackedRef, revision: CommitId) -> Self {
        Self {
            reference,
            revision,
        }
    }

    /// Short name of the ref.
    pub fn name(&self) -> &str {
        self.reference.name()
    }
}

/// Author or committer identity attached to commits made by gitscm.
///
/// Never derived from the repository; always supplied by configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Identity {
    /// Create a validated identity.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidIdentity` if either field is empty or
    /// contains angle brackets or newlines (which git cannot represent).
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        let email = email.into();
        for (field, value) in [("name", &name), ("email", &email)] {
            if value.trim().is_empty() {
                return Err(TypeError::InvalidIdentity(format!("{field} cannot be empty")));
            }
            if value.contains(['<', '>', '\n']) {
                return Err(TypeError::InvalidIdentity(format!(
                    "{field} cannot contain '<', '>' or newlines"
                )));
            }
        }
        Ok(Self { name, email })
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// Author and committer used for commits created by gitscm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signatures {
    pub author: Identity,
    pub committer: Identity,
}

impl Signatures {
    /// Use one identity for both author and committer.
    pub fn single(identity: Identity) -> Self {
        Self {
            author: identity.clone(),
            committer: identity,
        }
    }
}

/// Validate a short ref name against Git's refname rules.
pub(crate) fn validate_ref_name(name: &str) -> Result<(), TypeError> {
    if name.is_empty() {
        return Err(TypeError::InvalidRefName("ref name cannot be empty".into()));
    }
    if name == "@" {
        return Err(TypeError::InvalidRefName(
            "ref name cannot be '@' (reserved)".into(),
        ));
    }
    if name.starts_with('/') || name.starts_with('-') {
        return Err(TypeError::InvalidRefName(
            "ref name cannot start with '/' or '-'".into(),
        ));
    }
    if name.ends_with('/') || name.ends_with(".lock") || name.ends_with('.') {
        return Err(TypeError::InvalidRefName(
            "ref name cannot end with '/', '.' or '.lock'".into(),
        ));
    }
    for seq in ["..", "@{", "//"] {
        if name.contains(seq) {
            return Err(TypeError::InvalidRefName(format!(
                "ref name cannot contain '{seq}'"
            )));
        }
    }

    const INVALID_CHARS: [char; 8] = [' ', '~', '^', ':', '\\', '?', '*', '['];
    for c in INVALID_CHARS {
        if name.contains(c) {
            return Err(TypeError::InvalidRefName(format!(
                "ref name cannot contain '{c}'"
            )));
        }
    }
    if name.chars().any(|c| c.is_ascii_control()) {
        return Err(TypeError::InvalidRefName(
            "ref name cannot contain control characters".into(),
        ));
    }

    for component in name.split('/') {
        if component.starts_with('.') {
            return Err(TypeError::InvalidRefName(
                "path component cannot start with '.'".into(),
            ));
        }
        if component.ends_with(".lock") {
            return Err(TypeError::InvalidRefName(
                "path component cannot end with '.lock'".into(),
            ));
        }
    }

    Ok(())
}
