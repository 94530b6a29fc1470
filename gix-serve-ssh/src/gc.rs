//! `gc`, compacting a repository on behalf of an administrator.

use std::io::Write;

use clap::Parser;

use crate::{dispatch::Context, git::rooted, Command, CommandIo, Failure};

/// Collect garbage in a repository.
#[derive(Debug, Parser)]
struct GcArgs {
    /// The repository to compact.
    repository: String,
    /// Optimize the repository more thoroughly, at the expense of time.
    #[arg(long)]
    aggressive: bool,
}

pub(crate) fn gc(ctx: &Context, command: &Command, mut io: CommandIo) -> Result<(), Failure> {
    if !ctx.session.admin {
        return Err(Failure::new("gc: administrators only"));
    }
    let args = GcArgs::try_parse_from(command.argv())?;
    let collaborators = &ctx.collaborators;
    let repository = collaborators
        .access
        .open(&ctx.session.identity(), &rooted(&args.repository))?;
    let Some(_lock) = collaborators.locks.try_lock(repository.git_dir()) else {
        return Err(Failure::new(format!(
            "{} is already being collected",
            repository.name()
        )));
    };

    let collector = &collaborators.collector;
    let before = collector.statistics(repository.as_ref())?;
    writeln!(io.stdout, "before: {before}")?;
    io.stdout.flush()?;

    tracing::info!(user = %ctx.session.username, repository = repository.name(), aggressive = args.aggressive, "collecting garbage");
    collector.collect(repository.as_ref(), args.aggressive)?;

    let after = collector.statistics(repository.as_ref())?;
    writeln!(io.stdout, "after:  {after}")?;
    io.stdout.flush()?;
    Ok(())
}
