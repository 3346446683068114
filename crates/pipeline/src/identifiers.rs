//! Newtype domain identifiers.
//!
//! Every domain concept that has an identity is represented as a distinct newtype
//! wrapping a primitive. This prevents accidentally interchanging, for example,
//! a [`CandidateId`] with a [`RunId`] even though both are strings under the hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: content-derived
// ---------------------------------------------------------------------------

string_id! {
    /// Identifies a normalized news candidate.
    ///
    /// The value is the lowercase hex SHA-256 digest of the candidate's
    /// normalized `title + body` (see [`crate::candidate::content_id`]), so two
    /// candidates with equal ids are duplicates by definition and the id is
    /// stable across runs.
    CandidateId
}

impl CandidateId {
    /// Wraps a freshly computed hex digest.
    pub(crate) fn from_digest(hex: String) -> Self {
        Self(hex)
    }

    /// Returns the first eight characters, for log lines and reasons.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Identifiers: String-backed (configuration / provenance)
// ---------------------------------------------------------------------------

string_id! {
    /// Identifies an admission gate by its stable name (e.g. `"content_quality"`).
    ///
    /// Gate names are persisted with every verdict and used to aggregate
    /// rejection counts, so they must never change once released.
    GateName
}

impl GateName {
    /// Wraps a built-in gate name literal.
    pub(crate) fn from_static(name: &'static str) -> Self {
        Self(name.to_string())
    }
}

string_id! {
    /// Identifies the outlet an article came from (e.g. `"cnn_colombia"`).
    SourceName
}

impl SourceName {
    /// The name recorded when an article arrives without a source.
    pub fn unknown() -> Self {
        Self("unknown".to_string())
    }
}

// ---------------------------------------------------------------------------
// Run identifier
// ---------------------------------------------------------------------------

/// Identifies one pipeline run.
///
/// Run ids scope partition writes: re-running with the same id against the same
/// date supersedes the earlier output instead of duplicating it. They are
/// embedded in file names, so only ASCII alphanumerics, `-`, `_` and `.` are
/// accepted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    /// Creates a run id, returning `None` if the value is empty, longer than
    /// 128 characters, starts with `.`, or contains characters outside
    /// `[A-Za-z0-9._-]`.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let v = value.into();
        let valid = !v.is_empty()
            && v.len() <= 128
            && !v.starts_with('.')
            && v
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Some(Self(v))
        } else {
            None
        }
    }

    /// Generates a fresh random run id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Returns the run id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
