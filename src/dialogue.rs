//! Dialogue keys and free-text input validation for the multi-turn steps.

use serde::{Deserialize, Serialize};

pub const MAX_VIN_LENGTH: usize = 17;
pub const MAX_QUESTION_LENGTH: usize = 1000;

/// The persisted tag identifying which step of a conversation an identity is in
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogueKey {
    #[default]
    Idle,
    CatalogBrowsing,
    VinSearch,
    AwaitingPrice,
    AwaitingRoleTargets,
    ContactName,
    ContactQuestion,
    AwaitingManager,
    /// Manager is on the line and waiting for questions
    ManagerOnline,
    /// User side of an assigned support chat
    ChatWithManager,
    /// Manager side of an assigned support chat
    ChatWithUser,
}

impl DialogueKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialogueKey::Idle => "idle",
            DialogueKey::CatalogBrowsing => "catalog_browsing",
            DialogueKey::VinSearch => "vin_search",
            DialogueKey::AwaitingPrice => "awaiting_price",
            DialogueKey::AwaitingRoleTargets => "awaiting_role_targets",
            DialogueKey::ContactName => "contact_name",
            DialogueKey::ContactQuestion => "contact_question",
            DialogueKey::AwaitingManager => "awaiting_manager",
            DialogueKey::ManagerOnline => "manager_online",
            DialogueKey::ChatWithManager => "chat_with_manager",
            DialogueKey::ChatWithUser => "chat_with_user",
        }
    }

    /// Keys that reference a support chat through the session scratch
    pub fn is_chat_context(&self) -> bool {
        matches!(
            self,
            DialogueKey::AwaitingManager | DialogueKey::ChatWithManager | DialogueKey::ChatWithUser
        )
    }
}

/// Why a free-text answer was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputError {
    Empty,
    TooLong,
    InvalidCharacters,
    NotANumber,
    NotPositive,
}

/// One comma-separated entry of a role change request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleTarget {
    Id(i64),
    Invalid(String),
}

/// Validates a partial or full VIN typed by the user
///
/// Case is preserved: matching is case-sensitive against stored VINs.
pub fn validate_vin_fragment(input: &str) -> Result<String, InputError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(InputError::Empty);
    }

    if trimmed.chars().count() > MAX_VIN_LENGTH {
        return Err(InputError::TooLong);
    }

    if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(InputError::InvalidCharacters);
    }

    Ok(trimmed.to_string())
}

/// Parses a price typed as whole roubles; inner spaces are allowed ("1 250 000")
pub fn parse_price(input: &str) -> Result<i64, InputError> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();

    if compact.is_empty() {
        return Err(InputError::Empty);
    }

    if !compact.chars().all(|c| c.is_ascii_digit()) {
        return Err(InputError::NotANumber);
    }

    let value: i64 = compact.parse().map_err(|_| InputError::TooLong)?;
    if value == 0 {
        return Err(InputError::NotPositive);
    }

    Ok(value)
}

/// Splits a comma-separated id list, keeping malformed entries in place
pub fn parse_role_targets(input: &str) -> Result<Vec<RoleTarget>, InputError> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();

    if compact.is_empty() {
        return Err(InputError::Empty);
    }

    Ok(compact
        .split(',')
        .map(|raw| {
            if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
                match raw.parse::<i64>() {
                    Ok(id) => RoleTarget::Id(id),
                    Err(_) => RoleTarget::Invalid(raw.to_string()),
                }
            } else {
                RoleTarget::Invalid(raw.to_string())
            }
        })
        .collect())
}

/// Validates the question text submitted to managers
pub fn validate_question(input: &str) -> Result<String, InputError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(InputError::Empty);
    }

    if trimmed.chars().count() > MAX_QUESTION_LENGTH {
        return Err(InputError::TooLong);
    }

    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vin_fragment_validation() {
        assert_eq!(validate_vin_fragment("  X9F123 "), Ok("X9F123".to_string()));
        assert_eq!(validate_vin_fragment("x9f"), Ok("x9f".to_string()));
        assert_eq!(validate_vin_fragment("   "), Err(InputError::Empty));
        assert_eq!(validate_vin_fragment("X9F-123"), Err(InputError::InvalidCharacters));
        assert_eq!(validate_vin_fragment(&"A".repeat(18)), Err(InputError::TooLong));
    }

    #[test]
    fn test_price_parsing() {
        assert_eq!(parse_price("1 250 000"), Ok(1_250_000));
        assert_eq!(parse_price("42"), Ok(42));
        assert_eq!(parse_price("12.5"), Err(InputError::NotANumber));
        assert_eq!(parse_price("-5"), Err(InputError::NotANumber));
        assert_eq!(parse_price(""), Err(InputError::Empty));
        assert_eq!(parse_price("0"), Err(InputError::NotPositive));
        assert_eq!(parse_price("99999999999999999999"), Err(InputError::TooLong));
    }

    #[test]
    fn test_role_targets_keep_order_and_bad_entries() {
        let targets = parse_role_targets("42, abc ,7").unwrap();
        assert_eq!(
            targets,
            vec![
                RoleTarget::Id(42),
                RoleTarget::Invalid("abc".to_string()),
                RoleTarget::Id(7),
            ]
        );

        let targets = parse_role_targets("42,,7").unwrap();
        assert_eq!(targets[1], RoleTarget::Invalid(String::new()));

        assert_eq!(parse_role_targets("  "), Err(InputError::Empty));
    }

    #[test]
    fn test_question_validation() {
        assert_eq!(validate_question("  Is it available? "), Ok("Is it available?".to_string()));
        assert_eq!(validate_question(""), Err(InputError::Empty));
        assert_eq!(
            validate_question(&"q".repeat(MAX_QUESTION_LENGTH + 1)),
            Err(InputError::TooLong)
        );
    }

    #[test]
    fn test_default_key_is_idle() {
        assert_eq!(DialogueKey::default(), DialogueKey::Idle);
        assert!(DialogueKey::ChatWithUser.is_chat_context());
        assert!(!DialogueKey::ManagerOnline.is_chat_context());
    }
}
