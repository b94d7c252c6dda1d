//! Payload validation helpers
//!
//! Email normalization and the disposable-domain blocklist applied at
//! signup. Normalization (trim + lowercase) happens before any lookup so
//! `User@Example.com ` and `user@example.com` resolve to one account.

use crate::error::ApiError;

/// Domains of throwaway-email services rejected at signup.
const DISPOSABLE_DOMAINS: &[&str] = &[
    "10minutemail.com",
    "dispostable.com",
    "fakeinbox.com",
    "getnada.com",
    "guerrillamail.com",
    "guerrillamail.net",
    "mailinator.com",
    "maildrop.cc",
    "mintemail.com",
    "sharklasers.com",
    "temp-mail.org",
    "tempmail.com",
    "throwawaymail.com",
    "trashmail.com",
    "yopmail.com",
];

/// Trim whitespace and lowercase the address.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Structural check: one `@`, non-empty local part, domain with a dot and
/// no whitespace. Deliverability is the mailer's problem, not ours.
pub fn is_valid_email(email: &str) -> bool {
    let mut parts = email.splitn(2, '@');
    let (Some(local), Some(domain)) = (parts.next(), parts.next()) else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.contains(char::is_whitespace)
}

pub fn is_disposable_email(email: &str) -> bool {
    email
        .rsplit_once('@')
        .map(|(_, domain)| DISPOSABLE_DOMAINS.contains(&domain))
        .unwrap_or(false)
}

/// Validate and normalize a signup/login email in one step.
pub fn require_valid_email(raw: &str) -> Result<String, ApiError> {
    let email = normalize_email(raw);
    if !is_valid_email(&email) {
        return Err(ApiError::Validation {
            field: "email",
            message: "a valid email address is required".to_string(),
        });
    }
    Ok(email)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(normalize_email("  User@Example.COM "), "user@example.com");
    }

    #[test]
    fn accepts_ordinary_addresses() {
        assert!(is_valid_email("new@example.com"));
        assert!(is_valid_email("first.last+tag@sub.example.co"));
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("user@"));
        assert!(!is_valid_email("user@nodot"));
        assert!(!is_valid_email("user@.example.com"));
        assert!(!is_valid_email("user name@example.com"));
    }

    #[test]
    fn flags_disposable_domains() {
        assert!(is_disposable_email("x@mailinator.com"));
        assert!(is_disposable_email("x@yopmail.com"));
        assert!(!is_disposable_email("x@example.com"));
    }

    #[test]
    fn require_valid_email_normalizes() {
        let email = require_valid_email(" New@Example.com").unwrap();
        assert_eq!(email, "new@example.com");
        assert!(require_valid_email("nope").is_err());
    }
}
