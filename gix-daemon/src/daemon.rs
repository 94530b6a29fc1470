use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use gix_serve_core::{PackFactories, RepositoryAccess, ServiceRegistry};

use crate::{client, config::DEFAULT_PORT, DaemonOptions, Error, Result};

/// The lifecycle of a [`Daemon`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Not listening.
    Stopped,
    /// Binding the listening socket.
    Starting,
    /// Accepting connections.
    Running,
    /// Waiting for the accept loop to finish.
    Stopping,
}

/// Everything a connection needs, shared by all of them.
pub(crate) struct Shared {
    pub registry: ServiceRegistry,
    pub access: RepositoryAccess,
    pub packs: PackFactories,
    pub timeout: Option<Duration>,
}

struct Acceptor {
    thread: JoinHandle<()>,
    finished: mpsc::Receiver<()>,
}

struct Inner {
    state: State,
    running: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
    acceptor: Option<Acceptor>,
}

/// An anonymous git daemon, serving each connection on its own thread.
pub struct Daemon {
    options: DaemonOptions,
    shared: Arc<Shared>,
    active: Arc<AtomicUsize>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("options", &self.options)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Daemon {
    /// Create a stopped daemon that will route connections with `registry`, `access` and `packs`.
    pub fn new(
        options: DaemonOptions,
        registry: ServiceRegistry,
        access: RepositoryAccess,
        packs: PackFactories,
    ) -> Self {
        Daemon {
            shared: Arc::new(Shared {
                registry,
                access,
                packs,
                timeout: options.timeout,
            }),
            options,
            active: Arc::default(),
            inner: Mutex::new(Inner {
                state: State::Stopped,
                running: Arc::default(),
                local_addr: None,
                acceptor: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind the listening socket and start accepting connections, returning the bound address.
    ///
    /// Fails if the daemon is not [stopped](State::Stopped), which includes a stop that timed out,
    /// or if the socket cannot be bound.
    pub fn start(&self) -> Result<SocketAddr> {
        let mut inner = self.lock();
        if inner.state != State::Stopped {
            return Err(Error::AlreadyRunning);
        }
        inner.state = State::Starting;
        match self.spawn_acceptor() {
            Ok((local_addr, running, acceptor)) => {
                inner.state = State::Running;
                inner.running = running;
                inner.local_addr = Some(local_addr);
                inner.acceptor = Some(acceptor);
                tracing::info!(%local_addr, "git daemon listening");
                Ok(local_addr)
            }
            Err(err) => {
                inner.state = State::Stopped;
                Err(err)
            }
        }
    }

    fn spawn_acceptor(&self) -> Result<(SocketAddr, Arc<AtomicBool>, Acceptor)> {
        let host = self.options.host();
        let listener = TcpListener::bind((host, self.options.port)).map_err(|source| Error::Bind {
            address: format!("{host}:{}", self.options.port),
            source,
        })?;
        let local_addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let running = Arc::new(AtomicBool::new(true));
        let (finished_tx, finished) = mpsc::channel();
        let thread = thread::Builder::new().name(format!("git-daemon {local_addr}")).spawn({
            let running = Arc::clone(&running);
            let shared = Arc::clone(&self.shared);
            let active = Arc::clone(&self.active);
            let max_connections = self.options.max_connections;
            let poll = self.options.accept_poll_interval;
            move || {
                accept_loop(&listener, &shared, &active, max_connections, &running, poll);
                drop(listener);
                finished_tx.send(()).ok();
            }
        })?;
        Ok((local_addr, running, Acceptor { thread, finished }))
    }

    /// Stop accepting connections and close the listening socket.
    ///
    /// Connections being served are not interrupted. Waits at most for the configured stop timeout
    /// for the accept loop to finish. If it does not, the daemon remains [stopping](State::Stopping)
    /// with its socket possibly still bound, and `stop()` may be called again to keep waiting.
    pub fn stop(&self) -> Result<()> {
        let mut inner = self.lock();
        if !matches!(inner.state, State::Running | State::Stopping) {
            return Err(Error::NotRunning);
        }
        inner.state = State::Stopping;
        inner.running.store(false, Ordering::SeqCst);
        if let Some(acceptor) = inner.acceptor.take() {
            match acceptor.finished.recv_timeout(self.options.stop_timeout) {
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                    if acceptor.thread.join().is_err() {
                        tracing::error!("the accept loop panicked");
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    tracing::warn!(timeout = ?self.options.stop_timeout, "the accept loop did not stop in time");
                    inner.acceptor = Some(acceptor);
                    return Err(Error::StopTimeout {
                        timeout: self.options.stop_timeout,
                    });
                }
            }
        }
        inner.state = State::Stopped;
        inner.local_addr = None;
        tracing::info!("git daemon stopped");
        Ok(())
    }

    /// The current lifecycle state.
    pub fn state(&self) -> State {
        self.lock().state
    }

    /// Return `true` if connections are being accepted.
    pub fn is_running(&self) -> bool {
        self.state() == State::Running
    }

    /// The address we listen on, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().local_addr
    }

    /// The port we listen on while running, or the configured one otherwise.
    pub fn port(&self) -> u16 {
        self.local_addr().map_or(self.options.port, |addr| addr.port())
    }

    /// The amount of connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// The URL clients use to reach `repository` on `host`.
    pub fn format_url(&self, host: &str, repository: &str) -> String {
        format_url(host, self.port(), repository)
    }
}

/// Format `git://host[:port]/repository`, leaving out the port if it is the default one.
pub fn format_url(host: &str, port: u16, repository: &str) -> String {
    let repository = repository.trim_start_matches('/');
    if port == DEFAULT_PORT {
        format!("git://{host}/{repository}")
    } else {
        format!("git://{host}:{port}/{repository}")
    }
}

fn accept_loop(
    listener: &TcpListener,
    shared: &Arc<Shared>,
    active: &Arc<AtomicUsize>,
    max_connections: Option<usize>,
    running: &AtomicBool,
    poll: Duration,
) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if max_connections.is_some_and(|max| active.load(Ordering::SeqCst) >= max) {
                    tracing::warn!(%peer, "connection limit reached, dropping connection");
                    continue;
                }
                spawn_client(shared, active, stream, peer);
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => thread::sleep(poll),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                if running.load(Ordering::SeqCst) {
                    tracing::error!(%err, "could not accept connection");
                }
                thread::sleep(poll);
            }
        }
    }
}

/// Counts a connection as active for as long as it lives.
struct Slot(Arc<AtomicUsize>);

impl Slot {
    fn new(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Slot(Arc::clone(active))
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn spawn_client(shared: &Arc<Shared>, active: &Arc<AtomicUsize>, stream: TcpStream, peer: SocketAddr) {
    if let Err(err) = stream.set_nonblocking(false) {
        tracing::warn!(%peer, %err, "could not configure connection");
        return;
    }
    let slot = Slot::new(active);
    let shared = Arc::clone(shared);
    let spawned = thread::Builder::new()
        .name(format!("git-daemon-client {peer}"))
        .spawn(move || {
            let _slot = slot;
            let outcome = client::serve(&shared, stream, peer);
            tracing::debug!(%peer, ?outcome, "connection closed");
        });
    if let Err(err) = spawned {
        tracing::error!(%peer, %err, "could not spawn connection thread");
    }
}
