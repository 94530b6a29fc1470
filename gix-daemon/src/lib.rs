//! An anonymous `git://` daemon.
//!
//! Each accepted connection is served on its own thread: one pkt-line command is read, matched
//! against a [`ServiceRegistry`](gix_serve_core::ServiceRegistry), the repository is opened through
//! [`RepositoryAccess`](gix_serve_core::RepositoryAccess) and the service runs on the connection.
//! Clients learn nothing about failures except when the resolver rejects them with a message, which
//! is sent as a single `ERR` line.
//!
//! ```no_run
//! use gix_daemon::{Daemon, DaemonOptions};
//! use gix_serve_core::{fs::FileRepositoryResolver, git::GitProcess, PackFactories, RepositoryAccess, ServiceRegistry};
//!
//! let daemon = Daemon::new(
//!     DaemonOptions::default().with_port(0),
//!     ServiceRegistry::default(),
//!     RepositoryAccess::new(FileRepositoryResolver::new("/srv/git")),
//!     PackFactories::from_engine(GitProcess::new()),
//! );
//! let addr = daemon.start()?;
//! println!("{}", daemon.format_url("localhost", "demo.git"));
//! daemon.stop()?;
//! # Ok::<_, gix_daemon::Error>(())
//! ```
#![deny(missing_docs, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod client;
pub mod config;
mod daemon;
pub mod error;

pub use config::{DaemonOptions, DEFAULT_PORT};
pub use daemon::{format_url, Daemon, State};
pub use error::{Error, Result};
