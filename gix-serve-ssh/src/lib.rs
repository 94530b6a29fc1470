//! Command dispatch for git servers reached over SSH.
//!
//! The SSH transport authenticates the user and possibly the public key they used, and hands each
//! `exec` request to a [`Dispatcher`] built for that session. The dispatcher only knows the commands
//! the session may run: administrators see `gc`, and the `keys` subcommands depend on what the
//! configured [`KeyStore`](keys::store::KeyStore) supports. Every invocation runs on its own thread and ends with
//! an exit code, with failures described on the error channel.
#![deny(missing_docs, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod command;
pub mod dispatch;
pub mod error;
mod gc;
mod git;
pub mod keys;
pub mod session;

pub use command::{Command, CommandKind, CommandTable};
pub use dispatch::{CommandTask, Dispatcher};
pub use error::Failure;
pub use keys::{KeyError, SshKey};
pub use session::{Collaborators, CommandIo, ErrorChannel, SshSession};

/// The name the command table introduces itself with.
pub const PRODUCT_NAME: &str = "gix-serve";
