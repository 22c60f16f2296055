//! Error types for validation, execution, and artifact extraction.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while turning a drawing request into image bytes.
#[derive(Error, Debug)]
pub enum RenderError {
    /// The script contains a token that must never appear, regardless of
    /// position (string literal, comment, identifier).
    #[error("script contains forbidden token `{0}`")]
    ForbiddenToken(String),

    /// The script does not parse. A script that cannot be analyzed must
    /// never execute.
    #[error("script is not valid Python: {0}")]
    SyntaxInvalid(String),

    /// The script imports a module outside the allow-list.
    #[error("script imports unauthorized module `{0}`")]
    UnauthorizedModule(String),

    /// The execution exceeded the configured wall-clock budget.
    #[error("execution timed out after {0:?}")]
    ExecutionTimeout(Duration),

    /// The script raised an exception during execution.
    #[error("script raised {exception_type}: {message}")]
    ExecutionRuntimeError {
        /// The type of exception (e.g., "ValueError", "TypeError").
        exception_type: String,
        /// The exception message.
        message: String,
    },

    /// The script reported success without ever producing an image.
    #[error("script completed without producing an image")]
    ArtifactMissing,

    /// The code generator failed with a retryable condition and retries
    /// were exhausted.
    #[error("code generator unavailable: {0}")]
    UpstreamTransient(String),

    /// The code generator refused the request for quota reasons. Never
    /// retried automatically.
    #[error("code generator quota exhausted")]
    UpstreamQuotaExceeded,

    /// A global binding or sandbox setting could not be resolved. Fatal at
    /// startup, not per-request.
    #[error("configuration error: {0}")]
    Config(String),

    /// The sandbox itself misbehaved (worker panic, interpreter failure
    /// outside script code).
    #[error("sandbox internal failure: {0}")]
    Internal(String),

    /// I/O error while handling the temporary artifact.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RenderError {
    /// Check if this error was produced by static validation.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RenderError::ForbiddenToken(_)
                | RenderError::SyntaxInvalid(_)
                | RenderError::UnauthorizedModule(_)
        )
    }

    /// Check if this error represents a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RenderError::ExecutionTimeout(_))
    }

    /// Check if this error represents a script exception.
    pub fn is_script_fault(&self) -> bool {
        matches!(self, RenderError::ExecutionRuntimeError { .. })
    }

    /// Check if the caller may retry the request upstream. Only transient
    /// generator failures qualify; a rejected or faulting script would fail
    /// identically on the next attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RenderError::UpstreamTransient(_))
    }

    /// A short, non-technical message suitable for end users. Raw exception
    /// text from the script or the generator is logged, never shown.
    pub fn user_message(&self) -> &'static str {
        match self {
            RenderError::ForbiddenToken(_) | RenderError::UnauthorizedModule(_) => {
                "The generated drawing code was blocked for safety reasons."
            }
            RenderError::SyntaxInvalid(_) => "The generated drawing code was malformed.",
            RenderError::ExecutionTimeout(_) => "The drawing took too long and was stopped.",
            RenderError::ExecutionRuntimeError { .. } => "The drawing failed while being created.",
            RenderError::ArtifactMissing => "The drawing finished but no image was produced.",
            RenderError::UpstreamTransient(_) => {
                "The drawing service is busy right now, please try again shortly."
            }
            RenderError::UpstreamQuotaExceeded => {
                "The drawing service has reached its usage limit for now."
            }
            RenderError::Config(_) | RenderError::Internal(_) | RenderError::Io(_) => {
                "Something went wrong on our side while creating the drawing."
            }
        }
    }

    /// Build an [`RenderError::ExecutionRuntimeError`] from interpreter
    /// traceback output, if it contains a recognizable exception line.
    pub fn from_script_traceback(traceback: &str) -> Option<Self> {
        parse_script_exception(traceback)
    }
}

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, RenderError>;

/// Parse an exception from interpreter traceback output.
///
/// Looks for the final "ExceptionType: message" line in the standard
/// traceback format and splits it into type and message.
pub(crate) fn parse_script_exception(traceback: &str) -> Option<RenderError> {
    if traceback.trim().is_empty() {
        return None;
    }

    // The exception line is the last non-indented line that looks like an
    // exception; everything above it is frames.
    let mut exception_line = None;
    for line in traceback.lines() {
        if !line.starts_with(' ') && !line.is_empty() && !line.starts_with("Traceback") {
            if looks_like_exception(line) {
                exception_line = Some(line);
            }
        }
    }

    let exception_str = exception_line?;
    let (exception_type, message) = if let Some(colon_pos) = exception_str.find(':') {
        (
            exception_str[..colon_pos].trim().to_string(),
            exception_str[colon_pos + 1..].trim().to_string(),
        )
    } else {
        (exception_str.trim().to_string(), String::new())
    };

    Some(RenderError::ExecutionRuntimeError {
        exception_type,
        message,
    })
}

/// Check if a line looks like a Python exception.
fn looks_like_exception(line: &str) -> bool {
    let exception_suffixes = ["Error", "Exception", "Warning"];
    let standalone_exceptions = [
        "KeyboardInterrupt",
        "SystemExit",
        "StopIteration",
        "GeneratorExit",
    ];

    let first_char = line.chars().next();
    if !first_char.map(|c| c.is_ascii_uppercase()).unwrap_or(false) {
        return false;
    }

    let followed_ok = |idx: usize| {
        idx >= line.len()
            || line.as_bytes()[idx] == b':'
            || line.as_bytes()[idx] == b' '
            || line.as_bytes()[idx] == b'\n'
    };

    for suffix in exception_suffixes.iter() {
        if let Some(idx) = line.find(suffix) {
            if followed_ok(idx + suffix.len()) {
                return true;
            }
        }
    }

    for exc in standalone_exceptions.iter() {
        if line.starts_with(exc) && followed_ok(exc.len()) {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_exception() {
        let traceback = "ValueError: invalid literal for int() with base 10: 'abc'";
        let result = parse_script_exception(traceback);

        match result {
            Some(RenderError::ExecutionRuntimeError {
                exception_type,
                message,
            }) => {
                assert_eq!(exception_type, "ValueError");
                assert_eq!(message, "invalid literal for int() with base 10: 'abc'");
            }
            other => panic!("Expected ExecutionRuntimeError, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_exception_with_traceback() {
        let traceback = r#"Traceback (most recent call last):
  File "<script>", line 1, in <module>
ZeroDivisionError: division by zero"#;

        match parse_script_exception(traceback) {
            Some(RenderError::ExecutionRuntimeError {
                exception_type,
                message,
            }) => {
                assert_eq!(exception_type, "ZeroDivisionError");
                assert_eq!(message, "division by zero");
            }
            other => panic!("Expected ExecutionRuntimeError, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_exception_no_message() {
        match parse_script_exception("StopIteration") {
            Some(RenderError::ExecutionRuntimeError {
                exception_type,
                message,
            }) => {
                assert_eq!(exception_type, "StopIteration");
                assert!(message.is_empty());
            }
            other => panic!("Expected ExecutionRuntimeError, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_empty_traceback() {
        assert!(parse_script_exception("").is_none());
        assert!(parse_script_exception("   ").is_none());
    }

    #[test]
    fn test_error_helpers() {
        let timeout = RenderError::ExecutionTimeout(Duration::from_secs(5));
        assert!(timeout.is_timeout());
        assert!(!timeout.is_validation());
        assert!(!timeout.is_retryable());

        let token = RenderError::ForbiddenToken("exec".to_string());
        assert!(token.is_validation());
        assert!(!token.is_timeout());

        let transient = RenderError::UpstreamTransient("overloaded".to_string());
        assert!(transient.is_retryable());
        assert!(!RenderError::UpstreamQuotaExceeded.is_retryable());
    }

    #[test]
    fn test_user_messages_are_distinct_per_kind() {
        let messages = [
            RenderError::ForbiddenToken("exec".into()).user_message(),
            RenderError::SyntaxInvalid("bad".into()).user_message(),
            RenderError::ExecutionTimeout(Duration::from_secs(30)).user_message(),
            RenderError::ArtifactMissing.user_message(),
            RenderError::UpstreamTransient("503".into()).user_message(),
            RenderError::UpstreamQuotaExceeded.user_message(),
        ];
        for (i, a) in messages.iter().enumerate() {
            for b in messages.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_user_message_hides_raw_detail() {
        let err = RenderError::ExecutionRuntimeError {
            exception_type: "ValueError".into(),
            message: "secret internal detail".into(),
        };
        assert!(!err.user_message().contains("secret"));
    }
}
