//! Errors of the daemon as a whole.
//!
//! Failures of individual connections never surface here, they are logged by the thread serving them.

/// The error type of daemon lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// [`Daemon::start()`](crate::Daemon::start) was called while not stopped.
    #[error("the daemon is already running")]
    AlreadyRunning,
    /// [`Daemon::stop()`](crate::Daemon::stop) was called while not running.
    #[error("the daemon is not running")]
    NotRunning,
    /// The accept loop did not finish in time, so the listening socket may still be open.
    ///
    /// The daemon stays [stopping](crate::State::Stopping) and `stop()` can be called again.
    #[error("the accept loop did not stop within {timeout:?}")]
    StopTimeout {
        /// How long we waited.
        timeout: std::time::Duration,
    },
    /// The listening socket could not be created.
    #[error("could not listen on {address}")]
    Bind {
        /// The address we tried to bind to.
        address: String,
        /// The cause.
        #[source]
        source: std::io::Error,
    },
    /// A setting could not be interpreted.
    #[error("invalid value for '{key}': {message}")]
    Config {
        /// The offending configuration key.
        key: &'static str,
        /// What is wrong with it.
        message: String,
    },
    /// Another I/O error, like failing to spawn the accept thread.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
