//! Identifier rules shared by experiment and parameter names.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::SpecError;

/// Longest accepted name, in characters.
pub const MAX_NAME_LEN: usize = 20;

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("name pattern is a valid regex")
});

/// Validate an experiment or parameter name.
pub fn check_name(name: &str) -> Result<&str, SpecError> {
    let len = name.chars().count();
    if len < 1 || len > MAX_NAME_LEN {
        return Err(SpecError::NameLength {
            name: name.to_string(),
        });
    }
    if !NAME_PATTERN.is_match(name) {
        return Err(SpecError::NamePattern {
            name: name.to_string(),
        });
    }
    Ok(name)
}
