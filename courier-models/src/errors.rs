use std::fmt;

pub type SendableError = Box<dyn std::error::Error + Send + Sync>;

/// Coarse classification carried by every [`RuntimeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Unknown,
    InvalidArgument,
    NotFound,
    AlreadyExists,
    Unavailable,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Unknown => "unknown",
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::NotFound => "not_found",
            ErrorCode::AlreadyExists => "already_exists",
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct RuntimeError {
    code: ErrorCode,
    message: String,
    cause: Option<SendableError>,
}

impl RuntimeError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    pub fn with_cause(mut self, cause: impl Into<SendableError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the [`ErrorCode`] of `err` if it is a [`RuntimeError`], or
    /// [`ErrorCode::Unknown`] for any other error type.
    pub fn code_of(err: &(dyn std::error::Error + 'static)) -> ErrorCode {
        err.downcast_ref::<RuntimeError>()
            .map(RuntimeError::code)
            .unwrap_or(ErrorCode::Unknown)
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn displays_code_and_message() {
        let err = RuntimeError::internal("failed to unmarshal message");
        assert_eq!(err.to_string(), "internal: failed to unmarshal message");
    }

    #[test]
    fn exposes_cause_as_source() {
        let err = RuntimeError::internal("outer")
            .with_cause(RuntimeError::new(ErrorCode::NotFound, "inner"));
        let source = err.source().expect("cause should be the source");
        assert_eq!(source.to_string(), "not_found: inner");
    }

    #[test]
    fn code_of_foreign_error_is_unknown() {
        let err: SendableError = "plain".into();
        assert_eq!(RuntimeError::code_of(err.as_ref()), ErrorCode::Unknown);

        let err: SendableError = Box::new(RuntimeError::invalid_argument("bad"));
        assert_eq!(RuntimeError::code_of(err.as_ref()), ErrorCode::InvalidArgument);
    }
}
