//! Seams to the pack-protocol engine which computes what is actually transferred.

use std::io::{Read, Write};
use std::sync::Arc;

use crate::{
    protocol::{ClientIdentity, ServiceKind},
    service::{Error, Repository},
};

/// The client streams a service runs against.
pub struct ServiceIo {
    /// Data sent by the client.
    pub input: Box<dyn Read + Send>,
    /// Data for the client.
    pub output: Box<dyn Write + Send>,
    /// A side channel for diagnostics, which only SSH has.
    pub messages: Option<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for ServiceIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceIo")
            .field("messages", &self.messages.is_some())
            .finish_non_exhaustive()
    }
}

/// Progress of a single pack operation, delivered to the observer passed to [`PackService::run()`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// The engine is about to serve `repository`.
    Started {
        /// The service being run.
        service: ServiceKind,
        /// The repository name.
        repository: String,
        /// Who is being served.
        client: String,
    },
    /// The engine finished after sending `bytes_sent` bytes.
    Finished {
        /// The service that ran.
        service: ServiceKind,
        /// The repository name.
        repository: String,
        /// Who was served.
        client: String,
        /// The amount of bytes written to the client.
        bytes_sent: u64,
    },
}

/// One pack operation bound to a repository, ready to run once.
pub trait PackService: Send {
    /// Run the operation on `io` until the client is done, calling `observer` as the transfer progresses.
    fn run(self: Box<Self>, io: ServiceIo, observer: &mut dyn FnMut(&TransferEvent)) -> Result<(), Error>;
}

/// Creates fetch operations.
pub trait UploadPackFactory: Send + Sync {
    /// Create an upload-pack for `client` on `repository`, or fail with [`Error::NotPermitted`].
    fn create(&self, client: &ClientIdentity, repository: &dyn Repository) -> Result<Box<dyn PackService>, Error>;
}

/// Creates push operations.
pub trait ReceivePackFactory: Send + Sync {
    /// Create a receive-pack for `client` on `repository`, or fail with [`Error::NotPermitted`].
    fn create(&self, client: &ClientIdentity, repository: &dyn Repository) -> Result<Box<dyn PackService>, Error>;
}

/// The pair of factories every transport hands its connections to.
#[derive(Clone)]
pub struct PackFactories {
    /// Creates fetch operations.
    pub upload: Arc<dyn UploadPackFactory>,
    /// Creates push operations.
    pub receive: Arc<dyn ReceivePackFactory>,
}

impl std::fmt::Debug for PackFactories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackFactories").finish_non_exhaustive()
    }
}

impl PackFactories {
    /// Use `engine` for both fetching and pushing.
    pub fn from_engine<E>(engine: E) -> Self
    where
        E: UploadPackFactory + ReceivePackFactory + 'static,
    {
        let engine = Arc::new(engine);
        PackFactories {
            upload: engine.clone(),
            receive: engine,
        }
    }

    /// Create the pack operation for `kind`.
    pub fn create(
        &self,
        kind: ServiceKind,
        client: &ClientIdentity,
        repository: &dyn Repository,
    ) -> Result<Box<dyn PackService>, Error> {
        match kind {
            ServiceKind::UploadPack => self.upload.create(client, repository),
            ServiceKind::ReceivePack => self.receive.create(client, repository),
        }
    }
}

/// Object database statistics of one repository.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RepositoryStatistics {
    /// Loose objects.
    pub loose_objects: u64,
    /// Disk usage of loose objects in KiB.
    pub loose_size_kib: u64,
    /// Objects in packs.
    pub packed_objects: u64,
    /// Pack files.
    pub packs: u64,
    /// Disk usage of packs in KiB.
    pub pack_size_kib: u64,
}

impl std::fmt::Display for RepositoryStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} loose objects ({} KiB), {} packed objects in {} packs ({} KiB)",
            self.loose_objects, self.loose_size_kib, self.packed_objects, self.packs, self.pack_size_kib
        )
    }
}

/// Compacts repositories.
pub trait GarbageCollector: Send + Sync {
    /// Gather statistics about `repository`.
    fn statistics(&self, repository: &dyn Repository) -> Result<RepositoryStatistics, Error>;
    /// Collect garbage in `repository`, more thoroughly if `aggressive`.
    fn collect(&self, repository: &dyn Repository, aggressive: bool) -> Result<(), Error>;
}
