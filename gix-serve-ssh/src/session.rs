//! What a command runs with: the session, the collaborators and the channel streams.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};

use gix_serve_core::{
    engine::GarbageCollector, gc::CollectionLocks, ClientIdentity, PackFactories, RepositoryAccess, ServiceRegistry,
};

use crate::keys::{store::KeyStore, SshKey};

/// An authenticated SSH session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshSession {
    /// The authenticated account.
    pub username: String,
    /// Whether the account may run administrative commands.
    pub admin: bool,
    /// The public key the user authenticated with, if any.
    pub key: Option<SshKey>,
}

impl SshSession {
    /// A session of `username` without administrative rights or key.
    pub fn new(username: impl Into<String>) -> Self {
        SshSession {
            username: username.into(),
            admin: false,
            key: None,
        }
    }

    /// Grant or revoke administrative rights.
    pub fn with_admin(mut self, admin: bool) -> Self {
        self.admin = admin;
        self
    }

    /// Record the public key used to authenticate.
    pub fn with_key(mut self, key: SshKey) -> Self {
        self.key = Some(key);
        self
    }

    /// The identity repositories are opened for.
    pub fn identity(&self) -> ClientIdentity {
        ClientIdentity::User {
            username: self.username.clone(),
            admin: self.admin,
        }
    }
}

/// The services commands are executed with, shared by all sessions.
#[derive(Clone)]
pub struct Collaborators {
    /// Decides whether fetch and push may run on a repository.
    pub registry: ServiceRegistry,
    /// Opens repositories.
    pub access: RepositoryAccess,
    /// Creates pack operations.
    pub packs: PackFactories,
    /// Compacts repositories for `gc`.
    pub collector: Arc<dyn GarbageCollector>,
    /// Repositories being compacted, which must be shared with the resolver.
    pub locks: CollectionLocks,
    /// Where users' public keys are kept.
    pub keys: Arc<dyn KeyStore>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("registry", &self.registry)
            .field("access", &self.access)
            .field("packs", &self.packs)
            .finish_non_exhaustive()
    }
}

/// A cloneable handle to the error channel of a command, which is also where failures are reported.
#[derive(Clone)]
pub struct ErrorChannel(Arc<Mutex<Box<dyn Write + Send>>>);

impl ErrorChannel {
    /// Wrap `out`.
    pub fn new(out: impl Write + Send + 'static) -> Self {
        ErrorChannel(Arc::new(Mutex::new(Box::new(out))))
    }
}

impl Write for ErrorChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).flush()
    }
}

/// The three streams of an SSH channel.
pub struct CommandIo {
    /// Data sent by the client.
    pub stdin: Box<dyn Read + Send>,
    /// Data for the client.
    pub stdout: Box<dyn Write + Send>,
    /// Diagnostics for the client.
    pub stderr: ErrorChannel,
}

impl CommandIo {
    /// Bundle the given streams.
    pub fn new(
        stdin: impl Read + Send + 'static,
        stdout: impl Write + Send + 'static,
        stderr: impl Write + Send + 'static,
    ) -> Self {
        CommandIo {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: ErrorChannel::new(stderr),
        }
    }
}
