//! The registry of services and the policy deciding whether they may run for a repository.

use std::path::Path;

use crate::protocol::ServiceKind;

/// The error type used by services in this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A generic I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The pack engine failed.
    #[error("engine error: {0}")]
    Engine(String),
    /// The service may not run for this client or repository.
    #[error("{0}")]
    NotPermitted(String),
    /// Configuration could not be interpreted.
    #[error("configuration error: {0}")]
    Config(String),
}

/// A configuration value in a repository could not be interpreted.
#[derive(Debug, thiserror::Error)]
#[error("invalid value for '{key}' in {location}: {message}")]
pub struct ConfigError {
    /// The offending key.
    pub key: String,
    /// Where the key was read from.
    pub location: String,
    /// What went wrong.
    pub message: String,
}

/// An open repository, released when dropped.
pub trait Repository: Send {
    /// The name the repository was opened by, relative to the served base.
    fn name(&self) -> &str;
    /// The location of the repository on disk.
    fn git_dir(&self) -> &Path;
    /// Read a boolean from the repository's own configuration, freshly on every call.
    ///
    /// Returns `None` if the key is absent.
    fn config_boolean(&self, key: &str) -> Option<Result<bool, ConfigError>>;
}

/// An open repository owned by the connection that opened it.
pub type RepositoryHandle = Box<dyn Repository>;

/// A service clients can request, with its global enablement policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    kind: ServiceKind,
    enabled: bool,
    overridable: bool,
}

impl Service {
    /// Create a service of `kind` that is globally `enabled`, and whose enablement repositories may
    /// change if `overridable`.
    pub fn new(kind: ServiceKind, enabled: bool, overridable: bool) -> Self {
        Service {
            kind,
            enabled,
            overridable,
        }
    }

    /// The kind of service.
    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    /// The canonical command name, like `git-upload-pack`.
    pub fn command(&self) -> &'static str {
        self.kind.command()
    }

    /// The global enablement.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether repositories may override the global enablement.
    pub fn is_overridable(&self) -> bool {
        self.overridable
    }

    /// Return `true` if `line` starts with our command name followed by a space and at least one more byte.
    pub fn handles(&self, line: &str) -> bool {
        let command = self.command();
        command.len() + 1 < line.len() && line.as_bytes()[command.len()] == b' ' && line.starts_with(command)
    }

    /// The argument following the command name in `line`, if [`handles()`](Self::handles) is `true`.
    pub fn argument<'a>(&self, line: &'a str) -> Option<&'a str> {
        self.handles(line).then(|| &line[self.command().len() + 1..])
    }

    /// Decide if this service may run for `repository`.
    ///
    /// Only overridable services consult the repository configuration, and a malformed override falls
    /// back to the global value.
    pub fn is_enabled_for(&self, repository: &dyn Repository) -> bool {
        if !self.overridable {
            return self.enabled;
        }
        match repository.config_boolean(self.kind.override_key()) {
            Some(Ok(enabled)) => enabled,
            Some(Err(err)) => {
                tracing::warn!(repository = repository.name(), %err, "ignoring invalid service override");
                self.enabled
            }
            None => self.enabled,
        }
    }
}

/// The table of services, matched in registration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRegistry {
    services: Vec<Service>,
}

impl Default for ServiceRegistry {
    /// Fetching is enabled and locked, pushing is disabled but may be enabled per repository.
    fn default() -> Self {
        ServiceRegistry {
            services: vec![
                Service::new(ServiceKind::UploadPack, true, false),
                Service::new(ServiceKind::ReceivePack, false, true),
            ],
        }
    }
}

impl ServiceRegistry {
    /// Create a registry from `services`, where a service replaces an earlier one of the same kind.
    pub fn new(services: impl IntoIterator<Item = Service>) -> Self {
        let mut out = Vec::<Service>::new();
        for service in services {
            if let Some(existing) = out.iter_mut().find(|s| s.kind == service.kind) {
                *existing = service;
            } else {
                out.push(service);
            }
        }
        ServiceRegistry { services: out }
    }

    /// Read `service.<name>.enabled` and `service.<name>.overridable` from `config`, using our defaults
    /// for absent keys.
    pub fn from_config(config: &gix_config::File<'_>) -> Result<Self, Error> {
        let services = ServiceRegistry::default()
            .services
            .into_iter()
            .map(|default| {
                let name = default.kind.name();
                let read = |field: &str, fallback: bool| -> Result<bool, Error> {
                    let key = format!("service.{name}.{field}");
                    match config.boolean(key.as_str()) {
                        Some(Ok(value)) => Ok(value),
                        Some(Err(err)) => Err(Error::Config(format!("invalid boolean value for '{key}': {err}"))),
                        None => Ok(fallback),
                    }
                };
                Ok(Service::new(
                    default.kind,
                    read("enabled", default.enabled)?,
                    read("overridable", default.overridable)?,
                ))
            })
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(ServiceRegistry { services })
    }

    /// Find the first service handling `line`.
    pub fn match_command(&self, line: &str) -> Option<&Service> {
        self.services.iter().find(|service| service.handles(line))
    }

    /// Find the service of `kind`.
    pub fn service(&self, kind: ServiceKind) -> Option<&Service> {
        self.services.iter().find(|service| service.kind == kind)
    }

    /// All registered services.
    pub fn services(&self) -> &[Service] {
        &self.services
    }
}
