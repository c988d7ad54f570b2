//! Node registration validation.

use crate::error::CoreError;

/// Maximum length of a node display name.
const MAX_NAME_LEN: usize = 128;

/// Maximum length of a node type tag.
const MAX_TYPE_LEN: usize = 64;

/// Validate a node name.
///
/// Rules:
/// - Must not be empty.
/// - Must not exceed `MAX_NAME_LEN` characters.
/// - Must contain only alphanumeric, hyphen, underscore, or dot characters.
pub fn validate_node_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(CoreError::Validation(
            "Node name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "Node name must not exceed {MAX_NAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(CoreError::Validation(
            "Node name may only contain alphanumeric, hyphen, underscore, or dot characters"
                .to_string(),
        ));
    }
    Ok(())
}

/// Validate a node type tag (free-form, e.g. `"git agent"`).
pub fn validate_node_type(node_type: &str) -> Result<(), CoreError> {
    let trimmed = node_type.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation(
            "Node type must not be empty".to_string(),
        ));
    }
    if trimmed.len() > MAX_TYPE_LEN {
        return Err(CoreError::Validation(format!(
            "Node type must not exceed {MAX_TYPE_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_node_name() {
        assert!(validate_node_name("git-agent-01.eu").is_ok());
    }

    #[test]
    fn empty_node_name_rejected() {
        assert!(validate_node_name("").is_err());
    }

    #[test]
    fn node_name_with_spaces_rejected() {
        assert!(validate_node_name("git agent").is_err());
    }

    #[test]
    fn node_name_too_long_rejected() {
        let name = "a".repeat(MAX_NAME_LEN + 1);
        assert!(validate_node_name(&name).is_err());
    }

    #[test]
    fn node_type_allows_spaces() {
        assert!(validate_node_type("git agent").is_ok());
    }

    #[test]
    fn blank_node_type_rejected() {
        assert!(validate_node_type("   ").is_err());
    }
}
