//! Server settings, read from a git-config formatted file.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _};
use gix_daemon::DaemonOptions;
use gix_serve_core::{fs::FileRepositoryResolver, gc::CollectionLocks, git::GitProcess, ServiceRegistry};
use gix_serve_ssh::keys::store::KeyStoreKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// The directory holding all repositories.
    pub repositories: PathBuf,
    pub daemon: DaemonOptions,
    pub registry: ServiceRegistry,
    /// If `false`, anonymous clients need a `git-daemon-export-ok` file in the repository.
    pub export_all: bool,
    pub anonymous_push: bool,
    pub key_store: KeyStoreKind,
    pub keys_directory: PathBuf,
    /// Users who may run administrative SSH commands.
    pub admins: Vec<String>,
}

impl Settings {
    /// Read the settings at `path`, or use the defaults if there is none.
    ///
    /// Relative paths in the file are relative to the directory containing it.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Self::from_config(&gix_config::File::try_from("")?, Path::new("."));
        };
        let config = gix_config::File::from_path_no_includes(path.to_owned(), gix_config::Source::Local)
            .with_context(|| format!("could not read settings from '{}'", path.display()))?;
        let base = path.parent().unwrap_or(Path::new("."));
        Self::from_config(&config, base).with_context(|| format!("invalid settings in '{}'", path.display()))
    }

    pub fn from_config(config: &gix_config::File<'_>, base: &Path) -> anyhow::Result<Self> {
        let path = |key: &str| config.string(key).map(|value| base.join(value.to_string()));
        let repositories = path("server.repositories").unwrap_or_else(|| base.to_owned());
        let keys_directory = path("ssh.keysDirectory").unwrap_or_else(|| repositories.join(".ssh"));
        let key_store = match config.string("ssh.keyManager") {
            Some(name) => name.to_string().parse::<KeyStoreKind>()?,
            None => KeyStoreKind::File,
        };
        let admins = config
            .strings("ssh.admin")
            .unwrap_or_default()
            .into_iter()
            .map(|name| name.to_string())
            .filter(|name| !name.trim().is_empty())
            .collect();

        Ok(Settings {
            daemon: DaemonOptions::from_config(config)?,
            registry: ServiceRegistry::from_config(config)?,
            export_all: boolean(config, "daemon.exportAll", true)?,
            anonymous_push: boolean(config, "receive.anonymousPush", false)?,
            repositories,
            key_store,
            keys_directory,
            admins,
        })
    }

    pub fn is_admin(&self, username: &str) -> bool {
        self.admins.iter().any(|admin| admin == username)
    }

    /// The resolver for repositories below [`repositories`](Self::repositories), honouring `locks`.
    pub fn resolver(&self, locks: CollectionLocks) -> FileRepositoryResolver {
        FileRepositoryResolver::new(&self.repositories)
            .with_export_all(self.export_all)
            .with_collection_locks(locks)
    }

    pub fn engine(&self) -> GitProcess {
        GitProcess::new().with_anonymous_push(self.anonymous_push)
    }
}

fn boolean(config: &gix_config::File<'_>, key: &str, default: bool) -> anyhow::Result<bool> {
    match config.boolean(key) {
        Some(Ok(value)) => Ok(value),
        Some(Err(err)) => bail!("invalid boolean value for '{key}': {err}"),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use gix_serve_core::{Service, ServiceKind};
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse(text: &str) -> anyhow::Result<Settings> {
        let config = gix_config::File::try_from(text)?;
        Settings::from_config(&config, Path::new("/srv/git"))
    }

    #[test]
    fn defaults() -> anyhow::Result<()> {
        let settings = parse("")?;
        assert_eq!(settings.repositories, Path::new("/srv/git"));
        assert_eq!(settings.keys_directory, Path::new("/srv/git/.ssh"));
        assert_eq!(settings.daemon, DaemonOptions::default());
        assert_eq!(settings.registry, ServiceRegistry::default());
        assert_eq!(settings.key_store, KeyStoreKind::File);
        assert!(settings.export_all);
        assert!(!settings.anonymous_push);
        assert!(settings.admins.is_empty());
        Ok(())
    }

    #[test]
    fn everything_configured() -> anyhow::Result<()> {
        let settings = parse(
            "[server]\n\trepositories = repos\n\
             [daemon]\n\tport = 0\n\tbindInterface = 127.0.0.1\n\ttimeout = 5\n\tmaxConnections = 8\n\texportAll = false\n\
             [service \"receive-pack\"]\n\tenabled = true\n\toverridable = false\n\
             [receive]\n\tanonymousPush = true\n\
             [ssh]\n\tkeyManager = memory\n\tkeysDirectory = /etc/gix-serve/keys\n\tadmin = alice\n\tadmin = bob\n",
        )?;
        assert_eq!(settings.repositories, Path::new("/srv/git/repos"));
        assert_eq!(settings.keys_directory, Path::new("/etc/gix-serve/keys"));
        assert_eq!(
            settings.daemon,
            DaemonOptions::default()
                .with_port(0)
                .with_bind_interface(Some("127.0.0.1".into()))
                .with_timeout(Some(Duration::from_secs(5)))
                .with_max_connections(Some(8))
        );
        assert_eq!(
            settings.registry.service(ServiceKind::ReceivePack),
            Some(&Service::new(ServiceKind::ReceivePack, true, false))
        );
        assert!(!settings.export_all);
        assert!(settings.anonymous_push);
        assert_eq!(settings.key_store, KeyStoreKind::Memory);
        assert!(settings.is_admin("bob"));
        assert!(!settings.is_admin("carol"));
        Ok(())
    }

    #[test]
    fn relative_paths_are_relative_to_the_settings_file() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("gix-serve.config");
        std::fs::write(&path, "[server]\n\trepositories = repos\n[ssh]\n\tkeysDirectory = ../keys\n")?;
        let settings = Settings::load(Some(&path))?;
        assert_eq!(settings.repositories, tmp.path().join("repos"));
        assert_eq!(settings.keys_directory, tmp.path().join("../keys"));

        let err = Settings::load(Some(&tmp.path().join("missing.config"))).unwrap_err();
        assert!(err.to_string().contains("could not read settings"), "{err}");
        Ok(())
    }

    #[test]
    fn unknown_key_manager_is_an_error() {
        let err = parse("[ssh]\n\tkeyManager = com.example.ssh.LdapKeyManager\n").unwrap_err();
        assert!(err.to_string().contains("unknown key manager"), "{err}");
    }

    #[test]
    fn malformed_values_are_errors() {
        assert!(parse("[daemon]\n\texportAll = maybe\n").is_err());
        assert!(parse("[daemon]\n\tport = 70000\n").is_err());
    }
}
