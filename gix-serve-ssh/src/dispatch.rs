//! Running command lines of one SSH session.

use std::io::{self, Write};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::{
    command::{split, Command, CommandKind, CommandTable},
    gc, git, keys, CommandIo, Collaborators, Failure, SshSession, PRODUCT_NAME,
};

/// What executors run with.
#[derive(Debug)]
pub(crate) struct Context {
    pub(crate) session: SshSession,
    pub(crate) collaborators: Collaborators,
}

type Executor = fn(&Context, &Command, CommandIo) -> Result<(), Failure>;

fn executor(kind: CommandKind) -> Executor {
    match kind {
        CommandKind::UploadPack => git::upload_pack,
        CommandKind::ReceivePack => git::receive_pack,
        CommandKind::Gc => gc::gc,
        CommandKind::KeysAdd => keys::commands::add,
        CommandKind::KeysRemove => keys::commands::remove,
        CommandKind::KeysList => keys::commands::list,
        CommandKind::KeysWhich => keys::commands::which,
        CommandKind::KeysComment => keys::commands::comment,
        CommandKind::KeysPermission => keys::commands::permission,
    }
}

/// The table of commands `session` may run, given what the key store supports for it.
fn command_table(session: &SshSession, collaborators: &Collaborators) -> CommandTable {
    let admin = session.admin;
    let user = session.username.as_str();
    let store = &collaborators.keys;

    let mut keys = CommandTable::new("keys", admin);
    if store.supports_writing_keys(user) {
        keys = keys
            .command("add", CommandKind::KeysAdd, "Add an SSH public key to your account")
            .command("remove", CommandKind::KeysRemove, "Remove an SSH public key from your account")
            .alias("rm", "remove");
    }
    keys = keys
        .command("list", CommandKind::KeysList, "List your registered SSH public keys")
        .alias("ls", "list")
        .command("which", CommandKind::KeysWhich, "Display the SSH public key used for this session");
    if store.supports_comment_changes(user) {
        keys = keys.command("comment", CommandKind::KeysComment, "Set the comment for an SSH public key");
    }
    if store.supports_permission_changes(user) {
        keys = keys.command(
            "permission",
            CommandKind::KeysPermission,
            "Set the permission of an SSH public key",
        );
    }

    CommandTable::new(PRODUCT_NAME, admin)
        .command("git-upload-pack", CommandKind::UploadPack, "Fetch from a repository")
        .command("git-receive-pack", CommandKind::ReceivePack, "Push to a repository")
        .admin_command("gc", CommandKind::Gc, "Collect garbage in a repository")
        .table(keys, "SSH public key management commands")
}

/// Runs the commands of one authenticated session.
///
/// It's cheap to clone, and each invocation may run on its own thread via [`Dispatcher::start()`].
#[derive(Debug, Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    context: Context,
    table: CommandTable,
}

impl Dispatcher {
    /// Create a dispatcher for `session`, knowing only the commands it may run.
    pub fn new(session: SshSession, collaborators: Collaborators) -> Self {
        let table = command_table(&session, &collaborators);
        Dispatcher {
            inner: Arc::new(Inner {
                context: Context { session, collaborators },
                table,
            }),
        }
    }

    /// The session commands run for.
    pub fn session(&self) -> &SshSession {
        &self.inner.context.session
    }

    /// The commands available to the session.
    pub fn commands(&self) -> &CommandTable {
        &self.inner.table
    }

    /// Split `line` and resolve it to a command.
    pub fn parse(&self, line: &str) -> Result<Command, Failure> {
        self.inner.table.resolve(split(line)?)
    }

    /// Run `line` on the current thread and return its exit code.
    ///
    /// Failures are written to the error channel of `io`.
    pub fn run(&self, line: &str, io: CommandIo) -> i32 {
        let mut stderr = io.stderr.clone();
        let session = &self.inner.context.session;
        let result = self.parse(line).and_then(|command| {
            tracing::debug!(user = %session.username, command = %command.name, "running command");
            executor(command.kind)(&self.inner.context, &command, io)
        });
        match result {
            Ok(()) => 0,
            Err(failure) => {
                tracing::debug!(user = %session.username, %line, exit_code = failure.exit_code(), message = failure.message(), "command failed");
                if let Err(err) = report(&mut stderr, failure.message()) {
                    tracing::debug!(%err, "could not report failure to the client");
                }
                failure.exit_code()
            }
        }
    }

    /// Run `line` on a new thread, which is not reused for other invocations.
    pub fn start(&self, line: &str, io: CommandIo) -> io::Result<CommandTask> {
        let dispatcher = self.clone();
        let line = line.to_owned();
        let handle = std::thread::Builder::new()
            .name(format!("ssh-command {}", self.inner.context.session.username))
            .spawn(move || dispatcher.run(&line, io))?;
        Ok(CommandTask { handle })
    }
}

fn report(out: &mut dyn Write, message: &str) -> io::Result<()> {
    out.write_all(message.as_bytes())?;
    if !message.ends_with('\n') {
        out.write_all(b"\n")?;
    }
    out.flush()
}

/// A command running on its own thread.
#[derive(Debug)]
pub struct CommandTask {
    handle: JoinHandle<i32>,
}

impl CommandTask {
    /// Wait for the command to finish and return its exit code, which is 1 if it panicked.
    pub fn wait(self) -> i32 {
        self.handle.join().unwrap_or_else(|_| {
            tracing::error!("command thread panicked");
            Failure::EXIT_FAILURE
        })
    }
}
