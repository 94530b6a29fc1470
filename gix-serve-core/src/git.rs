//! A pack engine delegating to `git upload-pack` and `git receive-pack` child processes.

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Stdio};

use crate::{
    engine::{
        GarbageCollector, PackService, ReceivePackFactory, RepositoryStatistics, ServiceIo, TransferEvent,
        UploadPackFactory,
    },
    protocol::{ClientIdentity, ServiceKind},
    service::{Error, Repository},
};

/// Runs pack operations and garbage collection with the `git` program.
#[derive(Debug, Clone)]
pub struct GitProcess {
    program: OsString,
    anonymous_push: bool,
}

impl Default for GitProcess {
    fn default() -> Self {
        GitProcess {
            program: "git".into(),
            anonymous_push: false,
        }
    }
}

impl GitProcess {
    /// Use `git` from `PATH`, and refuse anonymous pushes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `program` instead of `git`.
    pub fn with_program(mut self, program: impl Into<OsString>) -> Self {
        self.program = program.into();
        self
    }

    /// Allow clients without an account to push.
    pub fn with_anonymous_push(mut self, allow: bool) -> Self {
        self.anonymous_push = allow;
        self
    }

    fn service(&self, kind: ServiceKind, client: &ClientIdentity, repository: &dyn Repository) -> GitService {
        GitService {
            program: self.program.clone(),
            kind,
            git_dir: repository.git_dir().to_owned(),
            repository: repository.name().to_owned(),
            client: client.name().to_owned(),
        }
    }

    fn git(&self, repository: &dyn Repository) -> gix_command::Prepare {
        gix_command::prepare(self.program.clone())
            .arg("-C")
            .arg(repository.git_dir())
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
    }
}

impl UploadPackFactory for GitProcess {
    fn create(&self, client: &ClientIdentity, repository: &dyn Repository) -> Result<Box<dyn PackService>, Error> {
        Ok(Box::new(self.service(ServiceKind::UploadPack, client, repository)))
    }
}

impl ReceivePackFactory for GitProcess {
    fn create(&self, client: &ClientIdentity, repository: &dyn Repository) -> Result<Box<dyn PackService>, Error> {
        if client.is_anonymous() && !self.anonymous_push {
            return Err(Error::NotPermitted(format!(
                "anonymous push to {} is not allowed",
                repository.name()
            )));
        }
        Ok(Box::new(self.service(ServiceKind::ReceivePack, client, repository)))
    }
}

impl GarbageCollector for GitProcess {
    fn statistics(&self, repository: &dyn Repository) -> Result<RepositoryStatistics, Error> {
        let output = self
            .git(repository)
            .args(["count-objects", "-v"])
            .stdout(Stdio::piped())
            .spawn()?
            .wait_with_output()?;
        if !output.status.success() {
            return Err(Error::Engine(format!(
                "git count-objects failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(parse_count_objects(&String::from_utf8_lossy(&output.stdout)))
    }

    fn collect(&self, repository: &dyn Repository, aggressive: bool) -> Result<(), Error> {
        let mut cmd = self.git(repository).args(["gc", "--quiet"]).stdout(Stdio::null());
        if aggressive {
            cmd = cmd.arg("--aggressive");
        }
        let output = cmd.spawn()?.wait_with_output()?;
        if !output.status.success() {
            return Err(Error::Engine(format!(
                "git gc failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// Parse the output of `git count-objects -v`, ignoring unknown lines.
pub fn parse_count_objects(text: &str) -> RepositoryStatistics {
    let mut stats = RepositoryStatistics::default();
    for (key, value) in text.lines().filter_map(|line| line.split_once(':')) {
        let Ok(value) = value.trim().parse::<u64>() else {
            continue;
        };
        match key.trim() {
            "count" => stats.loose_objects = value,
            "size" => stats.loose_size_kib = value,
            "in-pack" => stats.packed_objects = value,
            "packs" => stats.packs = value,
            "size-pack" => stats.pack_size_kib = value,
            _ => {}
        }
    }
    stats
}

struct GitService {
    program: OsString,
    kind: ServiceKind,
    git_dir: PathBuf,
    repository: String,
    client: String,
}

impl GitService {
    fn spawn(&self, messages: bool) -> io::Result<Child> {
        let subcommand = match self.kind {
            ServiceKind::UploadPack => "upload-pack",
            ServiceKind::ReceivePack => "receive-pack",
        };
        let mut cmd = gix_command::prepare(self.program.clone()).arg(subcommand);
        if self.kind == ServiceKind::UploadPack {
            cmd = cmd.arg("--strict");
        }
        cmd.arg(&self.git_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if messages { Stdio::piped() } else { Stdio::null() })
            .spawn()
    }
}

fn missing_pipe(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, format!("child process has no {name}"))
}

impl PackService for GitService {
    fn run(self: Box<Self>, streams: ServiceIo, observer: &mut dyn FnMut(&TransferEvent)) -> Result<(), Error> {
        let ServiceIo {
            mut input,
            mut output,
            messages,
        } = streams;
        observer(&TransferEvent::Started {
            service: self.kind,
            repository: self.repository.clone(),
            client: self.client.clone(),
        });
        let mut child = self.spawn(messages.is_some())?;
        let mut stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let mut stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;

        // The client may keep its side open after the child is done, so this thread is never joined.
        std::thread::Builder::new()
            .name("git-pack-input".into())
            .spawn(move || {
                if let Err(err) = io::copy(&mut input, &mut stdin) {
                    tracing::debug!(%err, "stopped forwarding client input");
                }
            })?;
        let stderr = match (messages, child.stderr.take()) {
            (Some(mut messages), Some(mut stderr)) => Some(
                std::thread::Builder::new()
                    .name("git-pack-messages".into())
                    .spawn(move || -> io::Result<()> {
                        io::copy(&mut stderr, &mut messages)?;
                        messages.flush()
                    })?,
            ),
            _ => None,
        };

        let copied = copy_and_flush(&mut stdout, &mut output);
        drop(stdout);
        let status = child.wait()?;
        if let Some(Ok(Err(err))) = stderr.map(std::thread::JoinHandle::join) {
            tracing::debug!(%err, "could not forward messages");
        }
        let bytes_sent = copied?;
        observer(&TransferEvent::Finished {
            service: self.kind,
            repository: self.repository.clone(),
            client: self.client.clone(),
            bytes_sent,
        });
        if status.success() {
            Ok(())
        } else {
            Err(Error::Engine(format!(
                "git {} exited with {status}",
                self.kind.name()
            )))
        }
    }
}

fn copy_and_flush(from: &mut impl Read, to: &mut impl Write) -> io::Result<u64> {
    let copied = io::copy(from, to)?;
    to.flush()?;
    Ok(copied)
}
