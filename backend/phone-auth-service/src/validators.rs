use once_cell::sync::Lazy;
use regex::Regex;
use validator::ValidationError;

/// Input validation utilities for the phone auth service

// Compile regex patterns once at startup
static E164_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\+[1-9][0-9]{7,14}$").expect("hardcoded E.164 regex is invalid - fix source code")
});

/// Canonical form of a user-typed phone number
///
/// Drops spaces, dashes, dots and parentheses and rewrites a leading `00`
/// international prefix to `+`. The result is not validated.
pub fn normalize_phone(raw: &str) -> String {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')' | '\u{a0}'))
        .collect();

    match compact.strip_prefix("00") {
        Some(rest) => format!("+{}", rest),
        None => compact,
    }
}

/// `+` followed by 8 to 15 digits, no leading zero in the country code
pub fn is_valid_e164(phone: &str) -> bool {
    E164_REGEX.is_match(phone)
}

/// validator crate compatible custom validator for phone numbers
///
/// Applied to the raw request value, so normalization happens first.
pub fn validate_phone_shape(phone: &str) -> Result<(), ValidationError> {
    if is_valid_e164(&normalize_phone(phone)) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_phone_number")
            .with_message("phone must be in E.164 format, e.g. +989121234567".into()))
    }
}

/// Exactly `width` ASCII digits
pub fn is_code_shape(code: &str, width: usize) -> bool {
    code.len() == width && code.bytes().all(|b| b.is_ascii_digit())
}

/// validator crate compatible check that a code is purely numeric
pub fn validate_code_digits(code: &str) -> Result<(), ValidationError> {
    if !code.is_empty() && code.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_code_format")
            .with_message("code must contain digits only".into()))
    }
}

/// Mask phone number for logging (show only last 4 digits)
pub fn mask_phone(phone: &str) -> String {
    let count = phone.chars().count();
    if count > 4 {
        let tail: String = phone.chars().skip(count - 4).collect();
        format!("****{}", tail)
    } else {
        "****".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone(" +98 (912) 123-4567 "), "+989121234567");
        assert_eq!(normalize_phone("00989121234567"), "+989121234567");
        assert_eq!(normalize_phone("+1.415.555.2671"), "+14155552671");
    }

    #[test]
    fn test_valid_e164() {
        assert!(is_valid_e164("+14155552671"));
        assert!(is_valid_e164("+989121234567"));
        assert!(is_valid_e164("+12345678"));
    }

    #[test]
    fn test_invalid_e164() {
        assert!(!is_valid_e164("14155552671")); // Missing +
        assert!(!is_valid_e164("+1234567")); // Too short
        assert!(!is_valid_e164("+1234567890123456")); // Too long
        assert!(!is_valid_e164("+01234567890")); // Leading zero
        assert!(!is_valid_e164("+1415abc2671"));
    }

    #[test]
    fn test_validate_phone_shape_normalizes_first() {
        assert!(validate_phone_shape("0098 912 123 4567").is_ok());
        assert!(validate_phone_shape("0912 123 4567").is_err());
    }

    #[test]
    fn test_code_shape() {
        assert!(is_code_shape("004211", 6));
        assert!(!is_code_shape("4211", 6));
        assert!(!is_code_shape("00421a", 6));
        assert!(!is_code_shape("۰۰۴۲۱۱", 6)); // Non-ASCII digits
    }

    #[test]
    fn test_mask_phone() {
        assert_eq!(mask_phone("+14155552671"), "****2671");
        assert_eq!(mask_phone("123"), "****");
    }
}
