use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid rule: {0}")]
    InvalidRule(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
