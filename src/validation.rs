//! Input normalization shared by handlers and services.

use crate::{error::AppError, models::bundle::Network};

/// Normalize a Ghanaian mobile number to the local `0XXXXXXXXX` form.
///
/// Accepts `0241234567`, `241234567`, `233241234567` and `+233 24 123 4567`.
pub fn normalize_phone(raw: &str) -> Result<String, AppError> {
    let digits: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    let digits = digits.strip_prefix('+').unwrap_or(&digits);

    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid_phone(raw));
    }

    let local = if let Some(rest) = digits.strip_prefix("233") {
        format!("0{rest}")
    } else if digits.len() == 9 {
        format!("0{digits}")
    } else {
        digits.to_string()
    };

    if local.len() != 10 || !local.starts_with('0') {
        return Err(invalid_phone(raw));
    }

    Ok(local)
}

/// Normalize `raw` and require that it belongs to `network`.
pub fn phone_for_network(raw: &str, network: Network) -> Result<String, AppError> {
    let local = normalize_phone(raw)?;
    match Network::for_number(&local) {
        Some(found) if found == network => Ok(local),
        Some(found) => Err(AppError::InvalidRequest(format!(
            "{local} is a {} number, not {}",
            found.display_name(),
            network.display_name()
        ))),
        None => Err(AppError::InvalidRequest(format!(
            "{local} is not on a supported network"
        ))),
    }
}

fn invalid_phone(raw: &str) -> AppError {
    AppError::InvalidRequest(format!("'{raw}' is not a valid Ghana mobile number"))
}

/// Storefront slugs: 3-40 chars of `a-z`, `0-9` and inner hyphens.
pub fn validate_slug(slug: &str) -> Result<(), AppError> {
    let valid_len = (3..=40).contains(&slug.len());
    let valid_chars = slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid_len || !valid_chars || slug.starts_with('-') || slug.ends_with('-') {
        return Err(AppError::InvalidRequest(
            "Slug must be 3-40 lowercase letters, digits or hyphens".to_string(),
        ));
    }
    Ok(())
}

/// Minimal shape check; Paystack performs the real validation.
pub fn normalize_email(email: &str) -> Result<String, AppError> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    };
    if !valid || email.contains(char::is_whitespace) {
        return Err(AppError::InvalidRequest(format!("'{email}' is not a valid email")));
    }
    Ok(email)
}

pub fn require_text(value: &str, field: &str, max: usize) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidRequest(format!("{field} is required")));
    }
    if trimmed.chars().count() > max {
        return Err(AppError::InvalidRequest(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn international_forms_become_local() {
        assert_eq!(normalize_phone("+233 24 123 4567").unwrap(), "0241234567");
        assert_eq!(normalize_phone("233551234567").unwrap(), "0551234567");
        assert_eq!(normalize_phone("201234567").unwrap(), "0201234567");
        assert_eq!(normalize_phone("024-123-4567").unwrap(), "0241234567");
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        assert!(normalize_phone("02412345").is_err());
        assert!(normalize_phone("02412345678").is_err());
        assert!(normalize_phone("0241abc567").is_err());
        assert!(normalize_phone("").is_err());
    }

    #[test]
    fn network_must_match_prefix() {
        assert_eq!(
            phone_for_network("0541234567", Network::Mtn).unwrap(),
            "0541234567"
        );
        let err = phone_for_network("0201234567", Network::Mtn).unwrap_err();
        match err {
            AppError::InvalidRequest(msg) => assert!(msg.contains("Telecel")),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(phone_for_network("0301234567", Network::Telecel).is_err());
    }

    #[test]
    fn slugs() {
        assert!(validate_slug("kofi-data").is_ok());
        assert!(validate_slug("ab").is_err());
        assert!(validate_slug("Kofi").is_err());
        assert!(validate_slug("-kofi").is_err());
        assert!(validate_slug("kofi_data").is_err());
    }

    #[test]
    fn emails_are_lowercased() {
        assert_eq!(normalize_email(" Ama@Example.com ").unwrap(), "ama@example.com");
        assert!(normalize_email("ama@example").is_err());
        assert!(normalize_email("@example.com").is_err());
    }
}
