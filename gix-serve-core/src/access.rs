//! Turning client supplied repository paths into open repositories.

use std::sync::Arc;

use crate::{
    protocol::{ClientIdentity, Outcome},
    service::RepositoryHandle,
};

/// The ways a [`RepositoryResolver`] may refuse to open a repository.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// There is no repository by that name.
    #[error("repository not found: {0}")]
    NotFound(String),
    /// The caller may not use the repository or the service.
    #[error("{0}")]
    NotEnabled(String),
    /// A refusal carrying a message meant for the client.
    #[error("{0}")]
    Rejected(String),
    /// Opening failed for reasons unrelated to the client.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opens repositories by name on behalf of a client.
///
/// Implementations must not cache handles across calls, as each connection releases the handle it gets.
pub trait RepositoryResolver: Send + Sync {
    /// Open the repository called `name` for `client`. `name` never starts with a slash.
    fn open(&self, client: &ClientIdentity, name: &str) -> Result<RepositoryHandle, ResolveError>;
}

impl<T: RepositoryResolver + ?Sized> RepositoryResolver for Arc<T> {
    fn open(&self, client: &ClientIdentity, name: &str) -> Result<RepositoryHandle, ResolveError> {
        (**self).open(client, name)
    }
}

/// The error returned by [`RepositoryAccess::open()`].
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// The path did not start with a slash.
    #[error("malformed repository path: {0:?}")]
    InvalidPath(String),
    /// There is no repository by that name.
    #[error("repository not found: {0}")]
    NotFound(String),
    /// The caller may not use the repository or the service.
    #[error("{0}")]
    NotPermitted(String),
    /// The resolver refused with a message for the client.
    #[error("{0}")]
    Rejected(String),
    /// Opening failed for reasons unrelated to the client.
    #[error("io error: {0}")]
    Io(#[source] std::io::Error),
}

impl From<ResolveError> for AccessError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound(name) => AccessError::NotFound(name),
            ResolveError::NotEnabled(message) => AccessError::NotPermitted(message),
            ResolveError::Rejected(message) => AccessError::Rejected(message),
            ResolveError::Io(err) => AccessError::Io(err),
        }
    }
}

impl AccessError {
    /// How this error is to be reported by the transports.
    ///
    /// Malformed paths are reported like missing repositories.
    pub fn outcome(&self) -> Outcome {
        match self {
            AccessError::InvalidPath(_) | AccessError::NotFound(_) => Outcome::NotFound,
            AccessError::NotPermitted(_) => Outcome::NotPermitted,
            AccessError::Rejected(message) => Outcome::RejectedWithMessage(message.clone()),
            AccessError::Io(_) => Outcome::IoFailure,
        }
    }
}

/// Normalize a client supplied repository path, or return `None` if it is malformed.
///
/// Backslashes become forward slashes, then exactly one leading slash is required and removed.
pub fn normalize_path(raw: &str) -> Option<String> {
    let path = raw.replace('\\', "/");
    path.strip_prefix('/').map(ToOwned::to_owned)
}

/// The gateway between transports and a [`RepositoryResolver`], shared by all connections.
#[derive(Clone)]
pub struct RepositoryAccess {
    resolver: Arc<dyn RepositoryResolver>,
}

impl std::fmt::Debug for RepositoryAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryAccess").finish_non_exhaustive()
    }
}

impl RepositoryAccess {
    /// Create a gateway delegating to `resolver`.
    pub fn new(resolver: impl RepositoryResolver + 'static) -> Self {
        RepositoryAccess {
            resolver: Arc::new(resolver),
        }
    }

    /// Normalize `raw_path` and open it for `client`.
    ///
    /// Malformed paths are rejected without asking the resolver. The caller owns the returned handle.
    pub fn open(&self, client: &ClientIdentity, raw_path: &str) -> Result<RepositoryHandle, AccessError> {
        let name = normalize_path(raw_path).ok_or_else(|| AccessError::InvalidPath(raw_path.to_owned()))?;
        tracing::debug!(client = client.name(), repository = %name, "opening repository");
        self.resolver.open(client, &name).map_err(Into::into)
    }
}
