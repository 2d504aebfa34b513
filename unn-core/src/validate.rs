//! Shared validation rule for usernames and room names (§4.2, §4.6): both
//! are 3-20 characters from `[A-Za-z0-9_-]`.

use crate::error::ValidationError;

/// Validate a `unn_username` or `room_name` against the shared naming rule.
///
/// Both identities and rooms reuse this exact rule (§4.6 point 2: "the
/// same 3-20 alphanumeric rule as usernames"), so it lives once in the
/// shared library rather than being duplicated per registry.
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    let len = name.chars().count();
    if !(3..=20).contains(&len) {
        return Err(ValidationError::BadLength);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ValidationError::BadCharacters);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_names() {
        assert!(validate_name("alice").is_ok());
        assert!(validate_name("a-b_c").is_ok());
        assert!(validate_name("abc").is_ok());
        assert!(validate_name(&"a".repeat(20)).is_ok());
    }

    #[test]
    fn rejects_bad_length() {
        assert_eq!(validate_name("ab"), Err(ValidationError::BadLength));
        assert_eq!(
            validate_name(&"a".repeat(21)),
            Err(ValidationError::BadLength)
        );
    }

    #[test]
    fn rejects_bad_characters() {
        assert_eq!(
            validate_name("alice!"),
            Err(ValidationError::BadCharacters)
        );
        assert_eq!(
            validate_name("al ice"),
            Err(ValidationError::BadCharacters)
        );
        assert_eq!(validate_name("a.b.c"), Err(ValidationError::BadCharacters));
    }
}
