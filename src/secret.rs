use serde::Deserialize;
use zeroize::Zeroize;

/// Community string (or any other credential) that never shows up in logs.
/// - Debug and Display print "[REDACTED]"
/// - The inner value is zeroized on drop
#[derive(Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the secret value. Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Short form safe for log lines: first two characters, rest masked.
    pub fn redacted(&self) -> String {
        redact_community(&self.0)
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Drop for SecretString {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Redact a community string for logging, showing first 2 chars only
fn redact_community(community: &str) -> String {
    match community.chars().count() {
        0 => "[redacted]".to_string(),
        1 | 2 => "**".to_string(),
        _ => {
            let prefix: String = community.chars().take(2).collect();
            format!("{}**", prefix)
        }
    }
}
