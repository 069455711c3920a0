//! Default validators: an empty-file rejection, and a fixed-delay no-op
//! used to exercise the heartbeat cadence.

use std::time::Duration;

use async_trait::async_trait;

use super::{ValidationResult, Validator};

/// Rejects zero-byte files.
pub struct EmptyFileValidator;

#[async_trait]
impl Validator for EmptyFileValidator {
    fn title(&self) -> &str {
        "Empty file"
    }

    async fn validate(&self, content: &[u8]) -> anyhow::Result<ValidationResult> {
        if content.is_empty() {
            Ok(ValidationResult::invalid("file is empty"))
        } else {
            Ok(ValidationResult::valid())
        }
    }
}

/// Sleeps for a fixed duration before always reporting success. Exists to
/// exercise the validation stage's heartbeat cadence in tests and demos, not
/// for production wiring.
pub struct DelayValidator {
    pub delay: Duration,
}

impl DelayValidator {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Validator for DelayValidator {
    fn title(&self) -> &str {
        "Delay"
    }

    async fn validate(&self, _content: &[u8]) -> anyhow::Result<ValidationResult> {
        tokio::time::sleep(self.delay).await;
        Ok(ValidationResult::valid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_file_is_rejected() {
        let validator = EmptyFileValidator;
        let result = validator.validate(b"").await.unwrap();
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 1);
    }

    #[tokio::test]
    async fn non_empty_file_is_accepted() {
        let validator = EmptyFileValidator;
        let result = validator.validate(b"content").await.unwrap();
        assert!(result.is_valid);
    }

    #[tokio::test]
    async fn delay_validator_waits_then_succeeds() {
        let validator = DelayValidator::new(Duration::from_millis(10));
        let result = validator.validate(b"anything").await.unwrap();
        assert!(result.is_valid);
    }
}
