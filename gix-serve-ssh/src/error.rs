//! The failure of a single SSH command.

use std::fmt;

use gix_serve_core::AccessError;

/// A command failed, and `message` should be shown on the error channel before exiting with `exit_code`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    exit_code: i32,
    message: String,
}

impl Failure {
    /// The exit code of failed commands.
    pub const EXIT_FAILURE: i32 = 1;

    /// A failure with exit code 1.
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_code(Self::EXIT_FAILURE, message)
    }

    /// A failure with the given `exit_code`.
    pub fn with_code(exit_code: i32, message: impl Into<String>) -> Self {
        Failure {
            exit_code,
            message: message.into(),
        }
    }

    /// The exit code to report.
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// The message for the client.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Failure {}

/// Help output is a "failure" with exit code 0, usage errors exit with 1.
impl From<clap::Error> for Failure {
    fn from(err: clap::Error) -> Self {
        let exit_code = if err.use_stderr() { Self::EXIT_FAILURE } else { 0 };
        Failure::with_code(exit_code, err.render().to_string())
    }
}

impl From<AccessError> for Failure {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Io(err) => {
                tracing::warn!(%err, "could not open repository");
                Failure::new("internal error while opening the repository")
            }
            err => Failure::new(err.to_string()),
        }
    }
}

impl From<gix_serve_core::Error> for Failure {
    fn from(err: gix_serve_core::Error) -> Self {
        match err {
            gix_serve_core::Error::NotPermitted(message) => Failure::new(message),
            err => Failure::new(err.to_string()),
        }
    }
}

impl From<std::io::Error> for Failure {
    fn from(err: std::io::Error) -> Self {
        Failure::new(format!("io error: {err}"))
    }
}
