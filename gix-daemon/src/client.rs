use std::net::{Shutdown, SocketAddr, TcpStream};

use gix_serve_core::{
    pktline::{read_command_line, write_error_line},
    ClientIdentity, Error as ServiceError, Outcome, Repository, Service, ServiceIo, TransferEvent,
};

use crate::daemon::Shared;

/// Serve a single connection to completion, closing both directions of `socket` on every path.
pub(crate) fn serve(shared: &Shared, socket: TcpStream, peer: SocketAddr) -> Outcome {
    let outcome = handle(shared, &socket, peer);
    if let Err(err) = socket.shutdown(Shutdown::Write) {
        tracing::trace!(%peer, %err, "could not close output");
    }
    if let Err(err) = socket.shutdown(Shutdown::Read) {
        tracing::trace!(%peer, %err, "could not close input");
    }
    outcome
}

fn handle(shared: &Shared, socket: &TcpStream, peer: SocketAddr) -> Outcome {
    if let Err(err) = socket.set_read_timeout(shared.timeout) {
        tracing::warn!(%peer, %err, "could not set timeout");
        return Outcome::IoFailure;
    }
    let line = match read_command_line(socket) {
        Ok(Some(line)) => line,
        Ok(None) => return Outcome::NotMatched,
        Err(err) => {
            tracing::debug!(%peer, %err, "could not read command");
            return Outcome::IoFailure;
        }
    };
    let Some((service, path)) = shared
        .registry
        .match_command(&line)
        .and_then(|service| Some((service, service.argument(&line)?)))
    else {
        tracing::debug!(%peer, command = %line, "no service matches");
        return Outcome::NotMatched;
    };

    let client = ClientIdentity::Anonymous { peer: Some(peer) };
    let repository = match shared.access.open(&client, path) {
        Ok(repository) => repository,
        Err(err) => {
            let outcome = err.outcome();
            match &outcome {
                Outcome::RejectedWithMessage(message) => {
                    tracing::info!(%peer, path, %message, "rejected");
                    if let Err(err) = write_error_line(socket, message) {
                        tracing::debug!(%peer, %err, "could not send rejection");
                        return Outcome::IoFailure;
                    }
                }
                Outcome::IoFailure => tracing::warn!(%peer, path, %err, "could not open repository"),
                _ => tracing::debug!(%peer, path, %err, "refusing repository"),
            }
            return outcome;
        }
    };
    let outcome = execute(shared, service, &client, repository.as_ref(), socket, peer);
    drop(repository);
    outcome
}

fn execute(
    shared: &Shared,
    service: &Service,
    client: &ClientIdentity,
    repository: &dyn Repository,
    socket: &TcpStream,
    peer: SocketAddr,
) -> Outcome {
    if !service.is_enabled_for(repository) {
        tracing::debug!(%peer, repository = repository.name(), service = service.command(), "service disabled");
        return Outcome::NotPermitted;
    }
    let pack = match shared.packs.create(service.kind(), client, repository) {
        Ok(pack) => pack,
        Err(ServiceError::NotPermitted(message)) => {
            tracing::debug!(%peer, %message, "not permitted");
            return Outcome::NotPermitted;
        }
        Err(err) => {
            tracing::warn!(%peer, %err, "could not prepare service");
            return Outcome::IoFailure;
        }
    };
    let streams = socket.set_read_timeout(None).and_then(|()| {
        Ok(ServiceIo {
            input: Box::new(socket.try_clone()?),
            output: Box::new(socket.try_clone()?),
            messages: None,
        })
    });
    let streams = match streams {
        Ok(streams) => streams,
        Err(err) => {
            tracing::warn!(%peer, %err, "could not prepare streams");
            return Outcome::IoFailure;
        }
    };

    tracing::info!(%peer, repository = repository.name(), service = service.command(), "serving");
    let mut observer = |event: &TransferEvent| tracing::debug!(%peer, ?event, "transfer");
    match pack.run(streams, &mut observer) {
        Ok(()) => Outcome::Dispatched,
        Err(err) => {
            tracing::warn!(%peer, repository = repository.name(), %err, "service failed");
            Outcome::IoFailure
        }
    }
}
