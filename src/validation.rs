//! Input validation for habitcore.
//!
//! This module provides validation functions for user-supplied inputs.
//! All validators return SyncError::Validation on failure.

use crate::error::{SyncError, SyncResult};

// Limits
pub const MIN_DOC_ID_LENGTH: usize = 6;
pub const MAX_DOC_ID_LENGTH: usize = 64;
pub const MAX_PAYLOAD_BYTES: usize = 1_048_576; // 1 MiB sealed envelope

/// Expected date key format: "YYYY-MM-DD"
/// CRITICAL: Must always use zero-padded format for string comparison to work correctly.
/// "2025-01-01" is correct, "2025-1-1" is WRONG and will break timestamp comparisons.
pub const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

/// Validate a document id.
///
/// Document ids name the remote object (`{doc_id}.json.enc`), so the charset
/// is restricted to what passes through object keys and URLs unescaped.
///
/// Rules:
/// - At least MIN_DOC_ID_LENGTH and at most MAX_DOC_ID_LENGTH characters
/// - Only ASCII alphanumerics, `.`, `_` and `-`
/// - Must end in an alphanumeric (a trailing separator usually means a
///   half-typed id; reject it before it names a stray remote object)
pub fn validate_doc_id(doc_id: &str) -> SyncResult<()> {
    if doc_id.len() < MIN_DOC_ID_LENGTH {
        return Err(SyncError::validation(
            "doc_id",
            format!(
                "must be at least {} characters, got {}",
                MIN_DOC_ID_LENGTH,
                doc_id.len()
            ),
        ));
    }

    if doc_id.len() > MAX_DOC_ID_LENGTH {
        return Err(SyncError::validation(
            "doc_id",
            format!(
                "cannot exceed {} characters (got {})",
                MAX_DOC_ID_LENGTH,
                doc_id.len()
            ),
        ));
    }

    for (pos, c) in doc_id.chars().enumerate() {
        if !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-') {
            return Err(SyncError::validation(
                "doc_id",
                format!("invalid character at position {}", pos),
            ));
        }
    }

    // chars() is non-empty here, length was checked above
    if !doc_id.chars().next_back().is_some_and(|c| c.is_ascii_alphanumeric()) {
        return Err(SyncError::validation(
            "doc_id",
            "must end in a letter or digit",
        ));
    }

    Ok(())
}

/// Validate a remote object key (`{doc_id}.json.enc`).
pub fn validate_object_key(key: &str) -> SyncResult<()> {
    let doc_id = key.strip_suffix(".json.enc").ok_or_else(|| {
        SyncError::validation("object_key", "must end in '.json.enc'")
    })?;
    validate_doc_id(doc_id).map_err(|_| {
        SyncError::validation("object_key", "stem is not a valid document id")
    })
}

/// Validate the size of a sealed envelope before upload.
pub fn validate_payload_size(size: usize) -> SyncResult<()> {
    if size > MAX_PAYLOAD_BYTES {
        return Err(SyncError::validation(
            "payload",
            format!(
                "sealed envelope cannot exceed {} bytes (got {})",
                MAX_PAYLOAD_BYTES, size
            ),
        ));
    }
    Ok(())
}

/// Validate a date key format.
///
/// Date keys must be "YYYY-MM-DD" with zero-padded values. This is critical
/// because day maps are keyed and ordered by these strings, so "2025-1-1"
/// would sort incorrectly compared to "2025-12-31".
///
/// Valid: "2025-01-01", "2025-12-31"
/// Invalid: "2025-1-1", "01-01-2025", "2025-01-01T00:00:00Z"
pub fn validate_date_key(value: &str) -> SyncResult<()> {
    // Exactly 10 chars: YYYY-MM-DD
    if value.len() != 10 {
        return Err(SyncError::validation(
            "date_key",
            format!(
                "date key must be exactly 10 characters in format 'YYYY-MM-DD', got {} characters",
                value.len()
            ),
        ));
    }

    let chars: Vec<char> = value.chars().collect();

    // Digits at: 0,1,2,3 (year), 5,6 (month), 8,9 (day)
    // Dashes at: 4, 7
    let digit_positions = [0, 1, 2, 3, 5, 6, 8, 9];
    for pos in digit_positions {
        if !chars[pos].is_ascii_digit() {
            return Err(SyncError::validation(
                "date_key",
                format!(
                    "date key must be in format 'YYYY-MM-DD', invalid character at position {}",
                    pos
                ),
            ));
        }
    }

    if chars[4] != '-' || chars[7] != '-' {
        return Err(SyncError::validation(
            "date_key",
            "date key must use '-' separators (YYYY-MM-DD)",
        ));
    }

    // Positions verified as ASCII digits above, parse cannot fail
    let year: u32 = value[0..4].parse().unwrap_or(0);
    let month: u32 = value[5..7].parse().unwrap_or(0);
    let day: u32 = value[8..10].parse().unwrap_or(0);

    if !(1970..=9999).contains(&year) {
        return Err(SyncError::validation(
            "date_key",
            format!("year must be between 1970 and 9999, got {}", year),
        ));
    }

    if !(1..=12).contains(&month) {
        return Err(SyncError::validation(
            "date_key",
            format!("month must be between 01 and 12, got {:02}", month),
        ));
    }

    if !(1..=31).contains(&day) {
        return Err(SyncError::validation(
            "date_key",
            format!("day must be between 01 and 31, got {:02}", day),
        ));
    }

    Ok(())
}

/// Extract the month key ("YYYY-MM") from a validated date key.
pub fn month_key_of(date_key: &str) -> &str {
    &date_key[..7]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_doc_id_valid() {
        assert!(validate_doc_id("household-2024").is_ok());
        assert!(validate_doc_id("my.doc_01").is_ok());
        assert!(validate_doc_id("abc123").is_ok());
    }

    #[test]
    fn test_validate_doc_id_too_short() {
        assert!(validate_doc_id("").is_err());
        assert!(validate_doc_id("abc").is_err());
    }

    #[test]
    fn test_validate_doc_id_too_long() {
        let long_id = "a".repeat(MAX_DOC_ID_LENGTH + 1);
        assert!(validate_doc_id(&long_id).is_err());
    }

    #[test]
    fn test_validate_doc_id_bad_charset() {
        assert!(validate_doc_id("my doc 01").is_err());
        assert!(validate_doc_id("doc/../etc").is_err());
        assert!(validate_doc_id("ドキュメント").is_err());
    }

    #[test]
    fn test_validate_doc_id_trailing_separator() {
        assert!(validate_doc_id("household-").is_err());
        assert!(validate_doc_id("household.").is_err());
        assert!(validate_doc_id("household_").is_err());
    }

    #[test]
    fn test_validate_object_key() {
        assert!(validate_object_key("household-2024.json.enc").is_ok());
        assert!(validate_object_key("household-2024").is_err());
        assert!(validate_object_key("ab.json.enc").is_err());
    }

    #[test]
    fn test_validate_payload_size() {
        assert!(validate_payload_size(0).is_ok());
        assert!(validate_payload_size(MAX_PAYLOAD_BYTES).is_ok());
        assert!(validate_payload_size(MAX_PAYLOAD_BYTES + 1).is_err());
    }

    #[test]
    fn test_validate_date_key_valid() {
        assert!(validate_date_key("2025-01-01").is_ok());
        assert!(validate_date_key("2025-12-31").is_ok());
        assert!(validate_date_key("1970-01-01").is_ok());
    }

    #[test]
    fn test_validate_date_key_non_zero_padded() {
        assert!(validate_date_key("2025-1-1").is_err());
        assert!(validate_date_key("2025-1-01").is_err());
        assert!(validate_date_key("2025-01-1").is_err());
    }

    #[test]
    fn test_validate_date_key_wrong_format() {
        assert!(validate_date_key("2025/01/01").is_err());
        assert!(validate_date_key("01-01-2025").is_err());
        assert!(validate_date_key("2025-01-01T00:00:00Z").is_err());
        assert!(validate_date_key("2025-01").is_err());
    }

    #[test]
    fn test_validate_date_key_invalid_ranges() {
        assert!(validate_date_key("1969-01-01").is_err());
        assert!(validate_date_key("2025-00-01").is_err());
        assert!(validate_date_key("2025-13-01").is_err());
        assert!(validate_date_key("2025-01-00").is_err());
        assert!(validate_date_key("2025-01-32").is_err());
    }

    #[test]
    fn test_month_key_of() {
        assert_eq!(month_key_of("2025-01-15"), "2025-01");
    }
}
