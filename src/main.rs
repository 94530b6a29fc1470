#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use gix_daemon::Daemon;
use gix_serve_core::{gc::CollectionLocks, PackFactories, RepositoryAccess};
use gix_serve_ssh::{Collaborators, CommandIo, Dispatcher, SshSession, PRODUCT_NAME};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod settings;

use settings::Settings;

/// Serve git repositories over the git protocol and SSH.
#[derive(Debug, Parser)]
#[command(name = "gix-serve", version, about)]
struct Args {
    /// The settings file, in git-config format.
    #[arg(long, short = 'c', global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log more, repeat for even more.
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Subcommands,
}

#[derive(Debug, Subcommand)]
enum Subcommands {
    /// Run the anonymous git:// daemon until interrupted.
    Daemon {
        /// Listen on this port instead of the configured one, 0 picks any free port.
        #[arg(long, short = 'p')]
        port: Option<u16>,
        /// Listen on this interface instead of the configured one.
        #[arg(long)]
        bind: Option<String>,
        /// Serve repositories from this directory instead of the configured one.
        #[arg(long)]
        repositories: Option<PathBuf>,
    },
    /// Run the command in SSH_ORIGINAL_COMMAND for an authenticated user.
    ///
    /// Meant to be the forced command of `authorized_keys` entries.
    Shell {
        /// The authenticated user.
        #[arg(long, short = 'u')]
        user: String,
        /// The fingerprint of the key the user authenticated with.
        #[arg(long, short = 'k', value_name = "FINGERPRINT")]
        key: Option<String>,
    },
    /// Print `authorized_keys` lines forcing `shell` for every key of a user.
    AuthorizedKeys {
        /// The user whose keys to print.
        user: String,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args);
    let settings = Settings::load(args.config.as_deref())?;

    match args.cmd {
        Subcommands::Daemon {
            port,
            bind,
            repositories,
        } => {
            let mut settings = settings;
            if let Some(port) = port {
                settings.daemon.port = port;
            }
            if let Some(bind) = bind {
                settings.daemon.bind_interface = (!bind.is_empty()).then_some(bind);
            }
            if let Some(repositories) = repositories {
                settings.repositories = repositories;
            }
            daemon(settings)
        }
        Subcommands::Shell { user, key } => {
            let code = shell(&settings, user, key)?;
            std::process::exit(code)
        }
        Subcommands::AuthorizedKeys { user } => authorized_keys(&settings, args.config, &user),
    }
}

fn init_tracing(args: &Args) {
    // The shell shares stderr with the SSH client, so it stays quiet unless asked.
    let base = match args.cmd {
        Subcommands::Daemon { .. } => 1,
        Subcommands::Shell { .. } | Subcommands::AuthorizedKeys { .. } => 0,
    };
    let level = match args.verbose.saturating_add(base) {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn daemon(settings: Settings) -> anyhow::Result<()> {
    let locks = CollectionLocks::default();
    let daemon = Daemon::new(
        settings.daemon.clone(),
        settings.registry.clone(),
        RepositoryAccess::new(settings.resolver(locks)),
        PackFactories::from_engine(settings.engine()),
    );
    let addr = daemon.start().context("could not start the daemon")?;
    let host = settings.daemon.bind_interface.as_deref().unwrap_or("localhost");
    tracing::info!(
        %addr,
        repositories = %settings.repositories.display(),
        example = %daemon.format_url(host, "<repository>"),
        "serving"
    );
    loop {
        std::thread::park();
    }
}

fn shell(settings: &Settings, user: String, key: Option<String>) -> anyhow::Result<i32> {
    let keys = settings.key_store.open(&settings.keys_directory);
    let admin = settings.is_admin(&user);
    let mut session = SshSession::new(user).with_admin(admin);
    if let Some(fingerprint) = key {
        let key = keys
            .keys(&session.username)?
            .into_iter()
            .find(|key| key.fingerprint() == fingerprint)
            .with_context(|| format!("{} has no key with fingerprint {fingerprint}", session.username))?;
        session = session.with_key(key);
    }

    let Ok(line) = std::env::var("SSH_ORIGINAL_COMMAND") else {
        eprintln!(
            "Hi {}! You've successfully authenticated, but {PRODUCT_NAME} does not provide shell access.",
            session.username
        );
        return Ok(1);
    };

    let locks = CollectionLocks::default();
    let engine = settings.engine();
    let collaborators = Collaborators {
        registry: settings.registry.clone(),
        access: RepositoryAccess::new(settings.resolver(locks.clone())),
        packs: PackFactories::from_engine(engine.clone()),
        collector: Arc::new(engine),
        locks,
        keys,
    };
    let io = CommandIo::new(std::io::stdin(), std::io::stdout(), std::io::stderr());
    Ok(Dispatcher::new(session, collaborators).start(&line, io)?.wait())
}

fn authorized_keys(settings: &Settings, config: Option<PathBuf>, user: &str) -> anyhow::Result<()> {
    let program = std::env::current_exe().context("could not locate the gix-serve executable")?;
    let mut prefix = vec![program.display().to_string()];
    if let Some(config) = config {
        let config = std::fs::canonicalize(&config)
            .with_context(|| format!("could not locate settings file '{}'", config.display()))?;
        prefix.extend(["--config".to_owned(), config.display().to_string()]);
    }

    let keys = settings.key_store.open(&settings.keys_directory).keys(user)?;
    let mut out = std::io::stdout().lock();
    for key in keys {
        let command = shell_words::join(
            prefix
                .iter()
                .map(String::as_str)
                .chain(["shell", "--user", user, "--key", key.fingerprint()]),
        );
        writeln!(
            out,
            "command=\"{}\",restrict {}",
            command.replace('"', "\\\""),
            key.raw_data()
        )?;
    }
    Ok(())
}
