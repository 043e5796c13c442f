//! Utility functions for key masking and credential format validation.

use crate::error::{ControllerError, Result};

/// Masks a credential for logs and API responses: first four and last four
/// characters with an ellipsis in between. Short values are fully masked.
pub fn mask_key(value: &str) -> String {
    if !value.is_ascii() || value.len() <= 8 {
        return "****".to_string();
    }
    format!("{}...{}", &value[..4], &value[value.len() - 4..])
}

/// Validates the OpenRouter credential format: `sk-or-` followed by at least
/// 30 characters of `[A-Za-z0-9-]`. Only the shape is checked here; whether
/// the key actually works is the probe's job.
pub fn validate_openrouter_key(value: &str) -> Result<()> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ControllerError::Validation(
            "API key cannot be empty".to_string(),
        ));
    }
    let rest = value.strip_prefix("sk-or-").ok_or_else(|| {
        ControllerError::Validation("invalid OpenRouter API key format".to_string())
    })?;
    if rest.len() < 30 || !rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(ControllerError::Validation(
            "invalid OpenRouter API key format".to_string(),
        ));
    }
    Ok(())
}
