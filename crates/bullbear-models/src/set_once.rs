use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raised when a single-assignment field is written twice, or when state is
/// mutated after it became terminal. Always a programming error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("state invariant violated on `{field}`: {detail}")]
pub struct StateInvariantViolation {
    pub field: String,
    pub detail: String,
}

impl StateInvariantViolation {
    pub fn new(field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            detail: detail.into(),
        }
    }

    pub fn already_set(field: impl Into<String>) -> Self {
        Self::new(field, "field was already set")
    }
}

/// A field that may be written exactly once.
///
/// Serializes as the inner `Option<T>`, so a transcript consumer sees `null`
/// for fields a run never reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SetOnce<T>(Option<T>);

impl<T> Default for SetOnce<T> {
    fn default() -> Self {
        Self(None)
    }
}

impl<T> SetOnce<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: &str, value: T) -> Result<(), StateInvariantViolation> {
        if self.0.is_some() {
            return Err(StateInvariantViolation::already_set(field));
        }
        self.0 = Some(value);
        Ok(())
    }

    pub fn get(&self) -> Option<&T> {
        self.0.as_ref()
    }

    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    pub fn into_inner(self) -> Option<T> {
        self.0
    }
}
