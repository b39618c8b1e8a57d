use anyhow::{Result, anyhow};

pub fn validate_device_token(token: &str) -> Result<()> {
    if token.is_empty() {
        return Err(anyhow!("Device token cannot be empty"));
    }

    if token.len() < 20 {
        return Err(anyhow!("Device token too short (minimum 20 characters)"));
    }

    if token.len() > 4096 {
        return Err(anyhow!("Device token too long (maximum 4096 characters)"));
    }

    let valid_chars = token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.'));

    if !valid_chars {
        return Err(anyhow!("Device token contains invalid characters"));
    }

    Ok(())
}

/// Checks a channel name or channel matcher: dot-delimited, no empty segments.
pub fn validate_channel_matcher(matcher: &str) -> Result<()> {
    if matcher.trim().is_empty() {
        return Err(anyhow!("Channel matcher cannot be empty"));
    }

    if matcher.chars().any(char::is_whitespace) {
        return Err(anyhow!("Channel matcher '{}' contains whitespace", matcher));
    }

    if matcher.split('.').any(str::is_empty) {
        return Err(anyhow!("Channel matcher '{}' has an empty segment", matcher));
    }

    Ok(())
}
