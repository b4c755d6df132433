//! Input sanitization and validation for user-supplied text.
//!
//! Everything that reaches the persistence gateway from a form passes
//! through here first: emails, passwords, device names and log messages.

use std::sync::OnceLock;

use regex_lite::Regex;

/// Maximum length of an email address.
pub const MAX_EMAIL_LEN: usize = 254;
/// Maximum length of a device name after sanitization.
pub const MAX_DEVICE_NAME_LEN: usize = 50;
/// Maximum length of a log message after sanitization.
pub const MAX_LOG_MESSAGE_LEN: usize = 500;
/// Minimum password length.
pub const MIN_PASSWORD_LEN: usize = 8;

const COMMON_PASSWORDS: &[&str] = &[
    "password",
    "123456",
    "password123",
    "admin",
    "qwerty",
    "letmein",
    "welcome",
    "123456789",
    "password1",
];

const SPECIAL_CHARS: &str = "!@#$%^&*()_+-=[]{};':\"\\|,.<>/?";

struct Patterns {
    script: Regex,
    tag: Regex,
    js_scheme: Regex,
    handler: Regex,
    email: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        script: compile(r"(?is)<script\b.*?</script>"),
        tag: compile(r"<[^>]*>"),
        js_scheme: compile(r"(?i)javascript:"),
        handler: compile(r"(?i)on\w+\s*="),
        email: compile(r"^[^\s@]+@[^\s@]+\.[^\s@]+$"),
    })
}

#[allow(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid regex")
}

/// Strip markup and script vectors, trim, and cap at `max_len` characters.
pub fn sanitize_input(input: &str, max_len: Option<usize>) -> String {
    if input.is_empty() {
        return String::new();
    }
    let p = patterns();
    let stripped = p.script.replace_all(input, "");
    let stripped = p.tag.replace_all(&stripped, "");
    let stripped = p.js_scheme.replace_all(&stripped, "");
    let stripped = p.handler.replace_all(&stripped, "");
    let trimmed = stripped.trim();

    match max_len {
        Some(max) if trimmed.chars().count() > max => trimmed.chars().take(max).collect(),
        _ => trimmed.to_string(),
    }
}

/// `local@domain.tld` shape without whitespace, at most 254 characters.
pub fn validate_email(email: &str) -> bool {
    email.len() <= MAX_EMAIL_LEN && patterns().email.is_match(email)
}

/// Normalize an email the way sign-up and sign-in do before validating it.
pub fn normalize_email(email: &str) -> String {
    sanitize_input(&email.trim().to_lowercase(), Some(MAX_EMAIL_LEN))
}

/// Sanitize and restrict a device name to `[a-zA-Z0-9 _-]`.
pub fn sanitize_device_name(name: &str) -> String {
    sanitize_input(name, Some(MAX_DEVICE_NAME_LEN))
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect()
}

/// Sanitize a free-text log message.
pub fn sanitize_log_message(message: &str) -> String {
    sanitize_input(message, Some(MAX_LOG_MESSAGE_LEN))
}

/// Outcome of checking a password against the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordValidation {
    /// Every rule that failed, in policy order.
    pub errors: Vec<&'static str>,
}

impl PasswordValidation {
    /// True when no rule failed.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Failing rules joined into one sentence list.
    pub fn message(&self) -> String {
        self.errors.join(". ")
    }
}

/// Check a password against the account policy.
pub fn validate_password(password: &str) -> PasswordValidation {
    let mut errors = Vec::new();

    if password.chars().count() < MIN_PASSWORD_LEN {
        errors.push("Password must be at least 8 characters long");
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        errors.push("Password must contain at least one uppercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        errors.push("Password must contain at least one lowercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        errors.push("Password must contain at least one number");
    }
    if !password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
        errors.push("Password must contain at least one special character");
    }
    if COMMON_PASSWORDS.contains(&password.to_lowercase().as_str()) {
        errors.push("Password is too common, please choose a more secure password");
    }

    PasswordValidation { errors }
}

/// Validates that a string is not blank.
///
/// # Returns
///
/// * `Ok(trimmed)` if the value has non-whitespace content.
/// * `Err(&'static str)` otherwise.
pub fn require_non_blank(value: &str) -> Result<&str, &'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err("Value cannot be empty")
    } else {
        Ok(trimmed)
    }
}
