use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("unknown intent `{name}`")]
    UnknownIntent { name: String },
    #[error("field `{field}` is not part of intent `{intent}`")]
    UnknownField { intent: String, field: String },
    #[error("field `{field}` has an unusable value: {reason}")]
    InvalidFieldValue { field: String, reason: String },
    #[error("required field `{field}` is missing for intent `{intent}`")]
    MissingField { intent: String, field: String },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}
