//! gix-serve-core: the transport-independent half of a git server front end.
//!
//! Both the anonymous `git://` daemon (`gix-daemon`) and the SSH command dispatcher
//! (`gix-serve-ssh`) decide *whether* and *to what* a connection is routed with the
//! building blocks of this crate:
//!
//! * [`service::ServiceRegistry`] matches a command line to the fetch or push service and
//!   applies the global-default plus per-repository-override enablement policy.
//! * [`access::RepositoryAccess`] normalizes client supplied paths and asks a
//!   [`RepositoryResolver`](access::RepositoryResolver) to open them.
//! * [`engine`] holds the seams to the pack-protocol engine, with [`git`] providing one
//!   backed by `git` child processes.
//! * [`pktline`] reads the single framed command line of the daemon protocol and writes `ERR` lines.
//!
//! ## Feature Flags
#![cfg_attr(
    all(doc, feature = "document-features"),
    doc = ::document_features::document_features!()
)]
#![cfg_attr(all(doc, feature = "document-features"), feature(doc_cfg, doc_auto_cfg))]
#![deny(missing_docs, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod access;
pub mod engine;
pub mod fs;
pub mod git;
pub mod gc;
pub mod permission;
pub mod pktline;
pub mod protocol;
pub mod service;

pub use access::{AccessError, RepositoryAccess, RepositoryResolver, ResolveError};
pub use engine::{PackFactories, PackService, ServiceIo, TransferEvent};
pub use permission::AccessPermission;
pub use protocol::{ClientIdentity, Outcome, ServiceKind};
pub use service::{Error, Repository, RepositoryHandle, Service, ServiceRegistry};
