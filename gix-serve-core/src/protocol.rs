//! Server-side protocol types shared by both transports.

use std::net::SocketAddr;

/// The kind of server-side service to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ServiceKind {
    /// Upload-pack: fetch/clone.
    UploadPack,
    /// Receive-pack: push.
    ReceivePack,
}

impl ServiceKind {
    /// The prefix every service command is canonicalized with.
    pub const COMMAND_PREFIX: &'static str = "git-";

    /// The name as used in configuration sections, like `upload-pack`.
    pub fn name(self) -> &'static str {
        match self {
            ServiceKind::UploadPack => "upload-pack",
            ServiceKind::ReceivePack => "receive-pack",
        }
    }

    /// The canonical command token clients send, like `git-upload-pack`.
    pub fn command(self) -> &'static str {
        match self {
            ServiceKind::UploadPack => "git-upload-pack",
            ServiceKind::ReceivePack => "git-receive-pack",
        }
    }

    /// The repository configuration key that may override the enablement of this service.
    pub fn override_key(self) -> &'static str {
        match self {
            ServiceKind::UploadPack => "daemon.uploadpack",
            ServiceKind::ReceivePack => "daemon.receivepack",
        }
    }
}

/// Who is asking for a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientIdentity {
    /// A client of the anonymous daemon, known only by its address.
    Anonymous {
        /// The remote address, if known.
        peer: Option<SocketAddr>,
    },
    /// An authenticated user, as established by the SSH transport.
    User {
        /// The account name.
        username: String,
        /// Whether the account may run administrative commands.
        admin: bool,
    },
}

impl ClientIdentity {
    /// Return `true` for clients without an account.
    pub fn is_anonymous(&self) -> bool {
        matches!(self, ClientIdentity::Anonymous { .. })
    }

    /// The account name, or `anonymous`.
    pub fn name(&self) -> &str {
        match self {
            ClientIdentity::Anonymous { .. } => "anonymous",
            ClientIdentity::User { username, .. } => username,
        }
    }
}

/// The result of routing one connection or command, which each transport reports in its own way.
///
/// The anonymous daemon stays silent for everything but [`RejectedWithMessage`](Outcome::RejectedWithMessage),
/// whereas SSH turns every failure into an exit code and a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A service ran against an open repository.
    Dispatched,
    /// No service matched the command.
    NotMatched,
    /// The repository does not exist.
    NotFound,
    /// The service is disabled or the caller lacks permission.
    NotPermitted,
    /// The resolver refused with a message for the client.
    RejectedWithMessage(String),
    /// Reading from or writing to the client failed.
    IoFailure,
}
