//! Player identities.
//!
//! An identity names a player in the UI and selects their hand log file, so
//! it must be safe to use as a file name. Sanitization is idempotent: a
//! sanitized identity passes through unchanged.

use std::fmt;

use crate::session::SessionError;

/// Maximum identity length, in characters.
pub const MAX_IDENTITY_LEN: usize = 32;

/// A sanitized player identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(String);

impl PlayerId {
    /// Sanitizes a raw identity.
    ///
    /// Surrounding whitespace is trimmed, interior whitespace becomes `_`,
    /// and anything other than ASCII alphanumerics, `_` and `-` is dropped.
    /// The result is truncated to [`MAX_IDENTITY_LEN`] characters.
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let cleaned: String = raw
            .trim()
            .chars()
            .filter_map(|c| {
                if c.is_whitespace() {
                    Some('_')
                } else if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    Some(c)
                } else {
                    None
                }
            })
            .take(MAX_IDENTITY_LEN)
            .collect();

        if cleaned.is_empty() {
            return Err(SessionError::InvalidIdentity(raw.to_string()));
        }
        Ok(Self(cleaned))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PlayerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
