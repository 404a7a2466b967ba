//! DTMF identity collection

use call_agent_config::IdentityConfig;
use call_agent_core::{Error, Result};

/// Result of one keypress during identity collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityInput {
    /// Digit buffered; more expected
    Pending { digits: usize },
    /// Reset digit pressed; buffer emptied
    Cleared,
    /// A full identifier was entered
    Complete(String),
    /// Confirmed at the wrong length or overflowed; buffer emptied
    Invalid(String),
    /// Not collecting, or a key with no meaning here
    Ignored,
}

/// Buffers keypad digits into a fixed-length identifier
#[derive(Debug, Clone)]
pub struct IdentityCollector {
    id_length: usize,
    reset_digit: char,
    confirm_digit: char,
    auto_submit: bool,
    buffer: String,
    active: bool,
}

impl IdentityCollector {
    pub fn new(config: &IdentityConfig) -> Self {
        Self {
            id_length: config.id_length,
            reset_digit: config.reset_digit,
            confirm_digit: config.confirm_digit,
            auto_submit: config.auto_submit,
            buffer: String::with_capacity(config.id_length),
            active: false,
        }
    }

    /// Begin collecting with an empty buffer
    pub fn start(&mut self) {
        self.buffer.clear();
        self.active = true;
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    pub fn push_digit(&mut self, digit: char) -> IdentityInput {
        if !self.active {
            return IdentityInput::Ignored;
        }

        if digit == self.reset_digit {
            self.buffer.clear();
            return IdentityInput::Cleared;
        }

        if digit == self.confirm_digit {
            return self.submit();
        }

        if !digit.is_ascii_digit() {
            tracing::debug!(%digit, "Ignoring non-numeric key during identity entry");
            return IdentityInput::Ignored;
        }

        self.buffer.push(digit);
        let len = self.buffer.len();

        if len == self.id_length && self.auto_submit {
            return self.submit();
        }
        if len > self.id_length {
            self.buffer.clear();
            return IdentityInput::Invalid(format!(
                "expected {} digits, got more",
                self.id_length
            ));
        }
        IdentityInput::Pending { digits: len }
    }

    fn submit(&mut self) -> IdentityInput {
        let entered = std::mem::take(&mut self.buffer);
        match validate_identity(&entered, self.id_length) {
            Ok(id) => {
                self.active = false;
                IdentityInput::Complete(id)
            }
            Err(e) => IdentityInput::Invalid(e.to_string()),
        }
    }
}

/// Check that `digits` is exactly `length` ASCII digits
pub fn validate_identity(digits: &str, length: usize) -> Result<String> {
    let trimmed = digits.trim();
    if trimmed.len() != length {
        return Err(Error::Validation(format!(
            "expected {} digits, got {}",
            length,
            trimmed.chars().count()
        )));
    }
    if !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::Validation("identifier must be numeric".to_string()));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector(auto_submit: bool) -> IdentityCollector {
        let mut c = IdentityCollector::new(&IdentityConfig {
            auto_submit,
            ..Default::default()
        });
        c.start();
        c
    }

    fn key_in(c: &mut IdentityCollector, keys: &str) -> IdentityInput {
        let mut last = IdentityInput::Ignored;
        for k in keys.chars() {
            last = c.push_digit(k);
        }
        last
    }

    #[test]
    fn test_auto_submit_at_length() {
        let mut c = collector(true);
        assert_eq!(c.push_digit('9'), IdentityInput::Pending { digits: 1 });
        assert_eq!(
            key_in(&mut c, "876543210"),
            IdentityInput::Complete("9876543210".into())
        );
        assert!(!c.is_active());
        assert_eq!(c.push_digit('1'), IdentityInput::Ignored);
    }

    #[test]
    fn test_reset_clears_partial_input() {
        let mut c = collector(true);
        key_in(&mut c, "12345");
        assert_eq!(c.push_digit('*'), IdentityInput::Cleared);
        assert_eq!(c.buffered(), "");
        assert_eq!(
            key_in(&mut c, "1234567890"),
            IdentityInput::Complete("1234567890".into())
        );
    }

    #[test]
    fn test_confirm_only_at_required_length() {
        let mut c = collector(false);
        key_in(&mut c, "12345");
        assert!(matches!(c.push_digit('#'), IdentityInput::Invalid(_)));
        assert!(c.is_active());
        key_in(&mut c, "1234567890");
        assert_eq!(c.push_digit('#'), IdentityInput::Complete("1234567890".into()));
    }

    #[test]
    fn test_overflow_without_auto_submit() {
        let mut c = collector(false);
        assert!(matches!(key_in(&mut c, "12345678901"), IdentityInput::Invalid(_)));
        assert_eq!(c.buffered(), "");
    }

    #[test]
    fn test_validate_identity() {
        assert_eq!(validate_identity(" 1234567890 ", 10).unwrap(), "1234567890");
        let err = validate_identity("12345abcde", 10).unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(validate_identity("123", 10).is_err());
    }
}
