//! Platform identifier validation.
//!
//! The remote platform keys every record with a 15- or 18-character
//! alphanumeric identifier whose first three characters name the record
//! type. The orchestrator only ever issues network calls keyed on two of
//! them, so those two get newtypes with shape checks up front:
//!
//! | Prefix | Record |
//! |--------|------------------------|
//! | `707`  | Asynchronous run job   |
//! | `709`  | Test queue item        |

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RunError;

/// Key prefix for asynchronous run job identifiers.
pub const RUN_ID_PREFIX: &str = "707";

/// Key prefix for queue item identifiers.
pub const QUEUE_ITEM_PREFIX: &str = "709";

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z0-9]{15}(?:[a-zA-Z0-9]{3})?$").unwrap())
}

/// Returns `true` if `value` has the platform identifier shape: 15 or 18
/// alphanumeric characters starting with the given key prefix.
pub fn has_id_shape(value: &str, prefix: &str) -> bool {
    value.starts_with(prefix) && id_pattern().is_match(value)
}

/// A validated asynchronous run identifier.
///
/// Construction goes through [`RunId::parse`], so holding a `RunId` means
/// the shape check already passed and the value is safe to interpolate into
/// platform queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Validates and wraps a platform-assigned run identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Protocol`] if the value is not a 15/18-character
    /// identifier with the run key prefix. A malformed run id always comes
    /// from a platform response, never from caller input, so it is treated
    /// as a contract break rather than bad input.
    pub fn parse(value: &str) -> Result<Self, RunError> {
        if has_id_shape(value, RUN_ID_PREFIX) {
            Ok(Self(value.to_string()))
        } else {
            Err(RunError::Protocol(format!(
                "'{value}' is not a valid test run identifier"
            )))
        }
    }

    /// The raw identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_15_and_18_char_run_ids() {
        assert!(RunId::parse("707xx0000AGQ3jb").is_ok());
        assert!(RunId::parse("707xx0000AGQ3jbAAI").is_ok());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(RunId::parse("707xx").is_err());
        assert!(RunId::parse("707xx0000AGQ3jbA").is_err());
        assert!(RunId::parse("707xx0000AGQ3jbAAIxx").is_err());
    }

    #[test]
    fn rejects_wrong_prefix() {
        assert!(RunId::parse("709xx0000AGQ3jbAAI").is_err());
        assert!(RunId::parse("001xx0000AGQ3jbAAI").is_err());
    }

    #[test]
    fn rejects_non_alphanumeric() {
        assert!(RunId::parse("707xx0000AGQ3j-").is_err());
    }

    #[test]
    fn queue_item_shape() {
        assert!(has_id_shape("709xx0000000001AAA", QUEUE_ITEM_PREFIX));
        assert!(!has_id_shape("707xx0000AGQ3jbAAI", QUEUE_ITEM_PREFIX));
    }
}
