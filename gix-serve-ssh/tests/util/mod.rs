#![allow(dead_code)]

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use gix_serve_core::{
    engine::{GarbageCollector, ReceivePackFactory, RepositoryStatistics, UploadPackFactory},
    gc::CollectionLocks,
    service::ConfigError,
    ClientIdentity, Error as ServiceError, PackFactories, PackService, Repository, RepositoryAccess,
    RepositoryHandle, RepositoryResolver, ResolveError, ServiceIo, ServiceKind, ServiceRegistry, TransferEvent,
};
use gix_serve_ssh::{keys::store::KeyStore, keys::store::MemoryKeyStore, Collaborators, CommandIo, Dispatcher, SshSession};

pub const GIT_DIR: &str = "/nonexistent/demo.git";

/// A syntactically valid ed25519 public key, unique per `seed`.
pub fn ed25519(seed: u8, comment: &str) -> String {
    let mut blob = Vec::new();
    blob.extend_from_slice(&11u32.to_be_bytes());
    blob.extend_from_slice(b"ssh-ed25519");
    blob.extend_from_slice(&32u32.to_be_bytes());
    blob.extend_from_slice(&[seed; 32]);
    let encoded = STANDARD.encode(blob);
    if comment.is_empty() {
        format!("ssh-ed25519 {encoded}")
    } else {
        format!("ssh-ed25519 {encoded} {comment}")
    }
}

/// A writer whose output can be inspected while a clone of it is owned by a command.
#[derive(Clone, Default)]
pub struct Buffer(Arc<Mutex<Vec<u8>>>);

impl Buffer {
    pub fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct Resolver {
    pub opened: Mutex<Vec<(String, String)>>,
    pub released: Arc<AtomicUsize>,
    pub reject: Option<String>,
    pub receive_override: Option<bool>,
}

struct MemoryRepository {
    name: String,
    receive_override: Option<bool>,
    released: Arc<AtomicUsize>,
}

impl Repository for MemoryRepository {
    fn name(&self) -> &str {
        &self.name
    }
    fn git_dir(&self) -> &Path {
        Path::new(GIT_DIR)
    }
    fn config_boolean(&self, key: &str) -> Option<Result<bool, ConfigError>> {
        (key == "daemon.receivepack").then_some(self.receive_override?).map(Ok)
    }
}

impl Drop for MemoryRepository {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl RepositoryResolver for Resolver {
    fn open(&self, client: &ClientIdentity, name: &str) -> Result<RepositoryHandle, ResolveError> {
        if let Some(message) = &self.reject {
            return Err(ResolveError::Rejected(message.clone()));
        }
        if name.starts_with("missing") {
            return Err(ResolveError::NotFound(name.into()));
        }
        self.opened
            .lock()
            .unwrap()
            .push((client.name().to_owned(), name.to_owned()));
        Ok(Box::new(MemoryRepository {
            name: name.to_owned(),
            receive_override: self.receive_override,
            released: self.released.clone(),
        }))
    }
}

impl Resolver {
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().iter().map(|(_, name)| name.clone()).collect()
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

/// Greets with service and repository name, reports on the message channel, then echoes the input.
pub struct Engine;

struct Echo {
    kind: ServiceKind,
    repository: String,
    client: String,
}

impl PackService for Echo {
    fn run(self: Box<Self>, mut io: ServiceIo, observer: &mut dyn FnMut(&TransferEvent)) -> Result<(), ServiceError> {
        observer(&TransferEvent::Started {
            service: self.kind,
            repository: self.repository.clone(),
            client: self.client.clone(),
        });
        writeln!(io.output, "{} {}", self.kind.name(), self.repository)?;
        if let Some(messages) = io.messages.as_mut() {
            writeln!(messages, "remote: serving {}", self.client)?;
        }
        let bytes_sent = std::io::copy(&mut io.input, &mut io.output)?;
        observer(&TransferEvent::Finished {
            service: self.kind,
            repository: self.repository,
            client: self.client,
            bytes_sent,
        });
        Ok(())
    }
}

fn echo(kind: ServiceKind, client: &ClientIdentity, repository: &dyn Repository) -> Box<dyn PackService> {
    Box::new(Echo {
        kind,
        repository: repository.name().to_owned(),
        client: client.name().to_owned(),
    })
}

impl UploadPackFactory for Engine {
    fn create(&self, client: &ClientIdentity, repository: &dyn Repository) -> Result<Box<dyn PackService>, ServiceError> {
        Ok(echo(ServiceKind::UploadPack, client, repository))
    }
}

impl ReceivePackFactory for Engine {
    fn create(&self, client: &ClientIdentity, repository: &dyn Repository) -> Result<Box<dyn PackService>, ServiceError> {
        Ok(echo(ServiceKind::ReceivePack, client, repository))
    }
}

/// Pretends that collecting garbage packs all loose objects.
#[derive(Default)]
pub struct Collector {
    pub runs: Mutex<Vec<(String, bool)>>,
}

impl GarbageCollector for Collector {
    fn statistics(&self, _repository: &dyn Repository) -> Result<RepositoryStatistics, ServiceError> {
        let collected = !self.runs.lock().unwrap().is_empty();
        Ok(if collected {
            RepositoryStatistics {
                packed_objects: 12,
                packs: 1,
                pack_size_kib: 4,
                ..Default::default()
            }
        } else {
            RepositoryStatistics {
                loose_objects: 12,
                loose_size_kib: 48,
                ..Default::default()
            }
        })
    }

    fn collect(&self, repository: &dyn Repository, aggressive: bool) -> Result<(), ServiceError> {
        self.runs.lock().unwrap().push((repository.name().to_owned(), aggressive));
        Ok(())
    }
}

pub struct Fixture {
    pub resolver: Arc<Resolver>,
    pub collector: Arc<Collector>,
    pub collaborators: Collaborators,
}

impl Fixture {
    pub fn new(resolver: Resolver) -> Self {
        Self::with(resolver, ServiceRegistry::default(), Arc::new(MemoryKeyStore::default()))
    }

    pub fn with(resolver: Resolver, registry: ServiceRegistry, keys: Arc<dyn KeyStore>) -> Self {
        let resolver = Arc::new(resolver);
        let collector = Arc::new(Collector::default());
        let collaborators = Collaborators {
            registry,
            access: RepositoryAccess::new(resolver.clone()),
            packs: PackFactories::from_engine(Engine),
            collector: collector.clone(),
            locks: CollectionLocks::default(),
            keys,
        };
        Fixture {
            resolver,
            collector,
            collaborators,
        }
    }

    pub fn dispatcher(&self, session: SshSession) -> Dispatcher {
        Dispatcher::new(session, self.collaborators.clone())
    }
}

/// The result of running one command line.
pub struct Run {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

pub fn run(dispatcher: &Dispatcher, line: &str, stdin: &str) -> Run {
    let (stdout, stderr) = (Buffer::default(), Buffer::default());
    let io = CommandIo::new(
        std::io::Cursor::new(stdin.as_bytes().to_vec()),
        stdout.clone(),
        stderr.clone(),
    );
    let code = dispatcher.run(line, io);
    Run {
        code,
        stdout: stdout.text(),
        stderr: stderr.text(),
    }
}
