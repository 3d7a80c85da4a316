//! Structured errors for the frame-generation engine.
//!
//! Two things go wrong here: the inputs are bad (a malformed shader
//! file, a missing resource id, parameters out of range, no acceptable
//! GPU) or the device misbehaves (any Vulkan call failure). The fence
//! timeout in `schedule_frames` gets its own kind so callers can decide
//! between logging-and-resuming and tearing the context down.

use std::fmt;

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input: shader file, resource ids, parameters, device
    /// selection.
    Config,
    /// A Vulkan call failed.
    Device,
    /// The previous frame batch did not complete within the deadline.
    Timeout,
}

/// Error with a message and an optional inner cause.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    cause: Option<String>,
}

impl Error {
    /// Configuration/format error.
    pub fn config(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Config,
            message: message.into(),
            cause: None,
        }
    }

    /// Device error.
    pub fn device(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Device,
            message: message.into(),
            cause: None,
        }
    }

    /// Deadline expired.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Timeout,
            message: message.into(),
            cause: None,
        }
    }

    /// Attach an inner cause.
    pub fn because(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Wrap this error in an outer message, keeping its kind.
    pub fn context(self, message: impl Into<String>) -> Self {
        Self {
            kind: self.kind,
            message: message.into(),
            cause: Some(self.to_string()),
        }
    }

    /// The error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The outermost message, without the cause chain.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether this is the distinguishable frame-batch timeout.
    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, "\n- {}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    // ============================================================
    // Error kinds
    // ============================================================

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::config("x").kind(), ErrorKind::Config);
        assert_eq!(Error::device("x").kind(), ErrorKind::Device);
        assert_eq!(Error::timeout("x").kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_timeout_is_distinguishable() {
        assert!(Error::timeout("previous frame still in flight").is_timeout());
        assert!(!Error::config("bad flow scale").is_timeout());
        assert!(!Error::device("vkQueueSubmit failed").is_timeout());
    }

    // ============================================================
    // Message chaining
    // ============================================================

    #[test]
    fn test_display_without_cause() {
        let err = Error::config("Unable to parse shader file");
        assert_eq!(err.to_string(), "Unable to parse shader file");
    }

    #[test]
    fn test_display_with_cause() {
        let err = Error::config("Unable to parse shader file")
            .because("dos header magic number is incorrect");
        assert_eq!(
            err.to_string(),
            "Unable to parse shader file\n- dos header magic number is incorrect"
        );
    }

    #[test]
    fn test_message_excludes_cause() {
        let err = Error::device("Unable to schedule frames").because("vkQueueSubmit failed");
        assert_eq!(err.message(), "Unable to schedule frames");
    }

    #[test]
    fn test_context_preserves_kind_and_chains() {
        let err = Error::timeout("timed out waiting for previous frame batch")
            .context("Unable to schedule frames");
        assert!(err.is_timeout());
        assert_eq!(
            err.to_string(),
            "Unable to schedule frames\n- timed out waiting for previous frame batch"
        );
    }

    #[test]
    fn test_context_chains_nested_causes() {
        let err = Error::config("dos header magic number is incorrect")
            .context("Unable to parse shader library");
        let err = err.context("Unable to create instance");
        assert_eq!(
            err.to_string(),
            "Unable to create instance\n- Unable to parse shader library\n- dos header magic number is incorrect"
        );
    }
}
