use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("subscription {0} already exists on this topic")]
    Duplicate(String),
    #[error("topic {0} is shut down")]
    Closed(String),
    #[error("broker backend {0} is not implemented")]
    NotImplemented(&'static str),
    #[error("internal broker error: {0}")]
    Internal(String),
}
