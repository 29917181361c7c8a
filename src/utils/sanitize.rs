use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());
static STEAM_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{17}$").unwrap());

const MAX_EMAIL_LEN: usize = 254;

/// Trimmed, lowercased and length-capped email, or `None` when it does not look like one.
pub fn sanitize_email(raw: &str) -> Option<String> {
    let email: String = raw.trim().to_lowercase().chars().take(MAX_EMAIL_LEN).collect();
    EMAIL_RE.is_match(&email).then_some(email)
}

/// SteamID64: exactly 17 digits.
pub fn is_valid_steam_id(steam_id: &str) -> bool {
    STEAM_ID_RE.is_match(steam_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_normalised() {
        assert_eq!(sanitize_email("  Buyer@Example.COM "), Some("buyer@example.com".to_string()));
        assert_eq!(sanitize_email("not-an-email"), None);
        assert_eq!(sanitize_email("a b@c.d"), None);
        assert_eq!(sanitize_email(""), None);
    }

    #[test]
    fn steam_ids() {
        assert!(is_valid_steam_id("76561198000000001"));
        assert!(!is_valid_steam_id("7656119800000000"));
        assert!(!is_valid_steam_id("7656119800000000a"));
    }
}
