//! Keep credentials and personal data out of logs.
//!
//! ```rust
//! use homecam_core::redact::{Redacted, scrub_email};
//!
//! let key = Redacted::new("anon-key");
//! assert_eq!(format!("{:?}", key), "[REDACTED]");
//! assert_eq!(scrub_email("sign-in for me@home.net"), "sign-in for [EMAIL]");
//! ```

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Wrapper whose `Debug`/`Display` never show the contents.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Redacted<T>(T);

impl<T> Redacted<T> {
    /// Wrap a secret.
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Access the inner value (use with caution).
    pub fn inner(&self) -> &T {
        &self.0
    }

    /// Consume and return the inner value.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

#[allow(clippy::expect_used)]
fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").expect("valid regex")
    })
}

#[allow(clippy::expect_used)]
fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b[a-zA-Z0-9_-]{32,}\b").expect("valid regex"))
}

/// Replace email addresses with `[EMAIL]`.
pub fn scrub_email(input: &str) -> String {
    email_pattern().replace_all(input, "[EMAIL]").to_string()
}

/// Replace long token-like strings (32+ chars) with `[TOKEN]`.
pub fn scrub_tokens(input: &str) -> String {
    token_pattern().replace_all(input, "[TOKEN]").to_string()
}

/// Apply every scrubber.
pub fn scrub_all(input: &str) -> String {
    scrub_tokens(&scrub_email(input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacted_hides_value() {
        let secret = Redacted::new("password123");
        assert_eq!(format!("{}", secret), "[REDACTED]");
        assert_eq!(format!("{:?}", secret), "[REDACTED]");
        assert_eq!(secret.into_inner(), "password123");
    }

    #[test]
    fn redacted_serializes_transparently() {
        let key: Redacted<String> = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(key.inner(), "abc");
    }

    #[test]
    fn scrubbing() {
        let input = "user admin@test.com token abc123def456ghi789jkl012mno345pqr";
        let out = scrub_all(input);
        assert!(out.contains("[EMAIL]"));
        assert!(out.contains("[TOKEN]"));
        assert!(!out.contains("admin@test.com"));
    }
}
