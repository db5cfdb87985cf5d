//! Argument validation and small parsing helpers shared across modules.

use crate::error::ExtensionsError;

/// Reject empty or whitespace-only text.
///
/// # Arguments
///
/// * `name` - Argument name reported in the error
/// * `value` - The text to check
pub fn ensure_not_blank(name: &str, value: &str) -> Result<(), ExtensionsError> {
    if value.trim().is_empty() {
        return Err(ExtensionsError::invalid_argument(
            name,
            "Value cannot be empty or whitespace",
        ));
    }

    Ok(())
}

/// Whitespace tolerated around numbers: tab, LF, VT, FF, CR and space.
pub(crate) fn is_number_padding(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\u{0B}' | '\u{0C}' | '\r' | ' ')
}

/// Parse a boolean flag the way environment variables are usually written.
pub(crate) fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
