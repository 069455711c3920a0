//! Per-file processor contracts: mutators transform a file's bytes in
//! declared order, validators judge the (possibly mutated) result. The
//! orchestrator manages the directory walk centrally, so both contracts are
//! per-file rather than per-walk.

pub mod mutators;
pub mod validators;

use async_trait::async_trait;

use crate::model::Request;

/// Transforms a file's bytes. Empty input must be a no-op success.
#[async_trait]
pub trait Mutator: Send + Sync {
    fn title(&self) -> &str;
    async fn mutate(&self, request: &Request, input: &[u8]) -> anyhow::Result<Vec<u8>>;
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            errors: vec![error.into()],
        }
    }
}

/// Judges a file's (possibly mutated) content.
#[async_trait]
pub trait Validator: Send + Sync {
    fn title(&self) -> &str;
    async fn validate(&self, content: &[u8]) -> anyhow::Result<ValidationResult>;
}
