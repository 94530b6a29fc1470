//! `git-upload-pack` and `git-receive-pack` over SSH.

use clap::Parser;
use gix_serve_core::{ServiceIo, ServiceKind, TransferEvent};

use crate::{dispatch::Context, Command, CommandIo, Failure};

#[derive(Debug, Parser)]
struct RepositoryArgs {
    /// The repository to serve.
    repository: String,
}

/// Git clients may send paths without a leading slash, which the gateway requires.
pub(crate) fn rooted(path: &str) -> String {
    if path.starts_with(['/', '\\']) {
        path.to_owned()
    } else {
        format!("/{path}")
    }
}

pub(crate) fn upload_pack(ctx: &Context, command: &Command, io: CommandIo) -> Result<(), Failure> {
    serve(ctx, command, io, ServiceKind::UploadPack)
}

pub(crate) fn receive_pack(ctx: &Context, command: &Command, io: CommandIo) -> Result<(), Failure> {
    serve(ctx, command, io, ServiceKind::ReceivePack)
}

fn serve(ctx: &Context, command: &Command, io: CommandIo, kind: ServiceKind) -> Result<(), Failure> {
    let args = RepositoryArgs::try_parse_from(command.argv())?;
    let session = &ctx.session;
    if let Some(key) = &session.key {
        let (permitted, action) = match kind {
            ServiceKind::UploadPack => (key.can_clone(), "clone"),
            ServiceKind::ReceivePack => (key.can_push(), "push"),
        };
        if !permitted {
            tracing::warn!(
                user = %session.username,
                fingerprint = key.fingerprint(),
                permission = %key.permission(),
                service = kind.name(),
                "key permission too low"
            );
            return Err(Failure::new(format!(
                "{} does not have {action} permission with key {}",
                session.username,
                key.fingerprint()
            )));
        }
    }

    let client = session.identity();
    let collaborators = &ctx.collaborators;
    let repository = collaborators.access.open(&client, &rooted(&args.repository))?;
    let enabled = collaborators
        .registry
        .service(kind)
        .is_some_and(|service| service.is_enabled_for(repository.as_ref()));
    if !enabled {
        tracing::info!(user = %session.username, repository = repository.name(), service = kind.name(), "service disabled");
        return Err(Failure::new(format!(
            "{} is not enabled for {}",
            kind.command(),
            repository.name()
        )));
    }

    let pack = collaborators.packs.create(kind, &client, repository.as_ref())?;
    let streams = ServiceIo {
        input: io.stdin,
        output: io.stdout,
        messages: Some(Box::new(io.stderr)),
    };
    let result = pack.run(streams, &mut |event| match event {
        TransferEvent::Started { service, repository, client } => {
            tracing::info!(service = service.name(), %repository, %client, transport = "ssh", "transfer started");
        }
        TransferEvent::Finished {
            service,
            repository,
            client,
            bytes_sent,
        } => {
            tracing::info!(service = service.name(), %repository, %client, bytes_sent, transport = "ssh", "transfer finished");
        }
    });
    drop(repository);
    result.map_err(Into::into)
}
