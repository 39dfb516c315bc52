//! Identifier validation shared by prompts and gates

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use super::DomainError;

/// Maximum length for prompt and gate IDs
pub const MAX_RESOURCE_ID_LENGTH: usize = 64;

/// Alphanumeric start, then alphanumerics, hyphens or underscores
static RESOURCE_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_-]*$").unwrap());

/// Identifier validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum IdValidationError {
    /// ID is empty
    EmptyId,
    /// ID exceeds maximum length
    IdTooLong { length: usize, max: usize },
    /// ID contains invalid characters
    InvalidIdFormat { id: String },
}

impl fmt::Display for IdValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyId => write!(f, "ID cannot be empty"),
            Self::IdTooLong { length, max } => {
                write!(f, "ID too long: {} characters (max {})", length, max)
            }
            Self::InvalidIdFormat { id } => {
                write!(
                    f,
                    "Invalid ID format '{}': must start with a letter or digit and contain only letters, digits, '-' or '_'",
                    id
                )
            }
        }
    }
}

impl std::error::Error for IdValidationError {}

impl From<IdValidationError> for DomainError {
    fn from(err: IdValidationError) -> Self {
        DomainError::invalid_id(err.to_string())
    }
}

/// Validate a prompt or gate ID
pub fn validate_resource_id(id: &str) -> Result<(), IdValidationError> {
    if id.is_empty() {
        return Err(IdValidationError::EmptyId);
    }

    if id.len() > MAX_RESOURCE_ID_LENGTH {
        return Err(IdValidationError::IdTooLong {
            length: id.len(),
            max: MAX_RESOURCE_ID_LENGTH,
        });
    }

    if !RESOURCE_ID_PATTERN.is_match(id) {
        return Err(IdValidationError::InvalidIdFormat { id: id.to_string() });
    }

    Ok(())
}

/// Declares a validated string identifier newtype
macro_rules! resource_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a new ID after validation
            pub fn new(id: impl Into<String>) -> Result<Self, $crate::domain::validation::IdValidationError> {
                let id = id.into();
                $crate::domain::validation::validate_resource_id(&id)?;
                Ok(Self(id))
            }

            /// Get the inner string value
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::domain::validation::IdValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl $crate::domain::storage::StorageKey for $name {
            fn as_str(&self) -> &str {
                &self.0
            }
        }
    };
}

pub(crate) use resource_id;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ids() {
        assert!(validate_resource_id("analyze").is_ok());
        assert!(validate_resource_id("deep_analysis").is_ok());
        assert!(validate_resource_id("code-quality").is_ok());
        assert!(validate_resource_id("a").is_ok());
        assert!(validate_resource_id("step2_v1-final").is_ok());
    }

    #[test]
    fn test_empty_id() {
        assert_eq!(validate_resource_id(""), Err(IdValidationError::EmptyId));
    }

    #[test]
    fn test_id_too_long() {
        let id = "a".repeat(MAX_RESOURCE_ID_LENGTH + 1);
        assert!(matches!(
            validate_resource_id(&id),
            Err(IdValidationError::IdTooLong { length: 65, max: 64 })
        ));
    }

    #[test]
    fn test_invalid_format() {
        assert!(validate_resource_id("-leading").is_err());
        assert!(validate_resource_id("_leading").is_err());
        assert!(validate_resource_id("has space").is_err());
        assert!(validate_resource_id("dot.ted").is_err());
        assert!(validate_resource_id(">>analyze").is_err());
    }

    #[test]
    fn test_into_domain_error() {
        let err: DomainError = IdValidationError::EmptyId.into();
        assert!(matches!(err, DomainError::InvalidId { .. }));
    }
}
