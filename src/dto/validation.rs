//! Validation helpers for DTOs.

use validator::ValidationError;

/// Upper bound on user and match identifiers.
pub const MAX_IDENTIFIER_LEN: usize = 128;
/// Upper bound on a reaction payload, in characters.
pub const MAX_REACTION_LEN: usize = 32;

/// Validates an identifier used as a user id or match id.
///
/// Identifiers end up in document keys, so they must be non-empty, bounded,
/// and free of whitespace and path separators.
///
/// # Examples
///
/// ```ignore
/// validate_identifier("user-42")  // Ok
/// validate_identifier("")         // Err - empty
/// validate_identifier("a/b")      // Err - separator
/// ```
pub fn validate_identifier(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > MAX_IDENTIFIER_LEN {
        let mut err = ValidationError::new("identifier_length");
        err.message = Some(
            format!(
                "Identifier must be between 1 and {MAX_IDENTIFIER_LEN} bytes (got {})",
                id.len()
            )
            .into(),
        );
        return Err(err);
    }

    if id.chars().any(|c| c.is_whitespace() || c == '/' || c == '\\') {
        let mut err = ValidationError::new("identifier_format");
        err.message = Some("Identifier must not contain whitespace or path separators".into());
        return Err(err);
    }

    Ok(())
}

/// Validates a reaction (emoji or short text).
pub fn validate_reaction(value: &str) -> Result<(), ValidationError> {
    let length = value.trim().chars().count();
    if length == 0 || length > MAX_REACTION_LEN {
        let mut err = ValidationError::new("reaction_length");
        err.message = Some(
            format!("Reaction must be between 1 and {MAX_REACTION_LEN} characters (got {length})")
                .into(),
        );
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_valid() {
        assert!(validate_identifier("user-42").is_ok());
        assert!(validate_identifier("c5f0a1b2").is_ok());
    }

    #[test]
    fn test_validate_identifier_invalid() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("a/b").is_err());
        assert!(validate_identifier("two words").is_err());
        assert!(validate_identifier(&"x".repeat(MAX_IDENTIFIER_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_reaction() {
        assert!(validate_reaction("🔥").is_ok());
        assert!(validate_reaction("nice one").is_ok());
        assert!(validate_reaction("   ").is_err());
        assert!(validate_reaction(&"🔥".repeat(33)).is_err());
    }
}
