//! Configuration of the daemon

use std::time::Duration;

use crate::{Error, Result};

/// The port assigned to the git protocol.
pub const DEFAULT_PORT: u16 = 9418;

/// Configuration options for the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonOptions {
    /// The interface to listen on, or all interfaces if `None`.
    pub bind_interface: Option<String>,

    /// The port to listen on, with 0 picking any free port.
    pub port: u16,

    /// How long a client may stay silent before sending its command.
    ///
    /// It does not apply once a service is running.
    pub timeout: Option<Duration>,

    /// The maximum amount of connections served at once. Connections beyond it are closed right away.
    pub max_connections: Option<usize>,

    /// How often the accept loop checks whether it should stop.
    pub accept_poll_interval: Duration,

    /// How long [`Daemon::stop()`](crate::Daemon::stop) waits for the accept loop to finish.
    pub stop_timeout: Duration,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            bind_interface: Some("localhost".into()),
            port: DEFAULT_PORT,
            timeout: Some(Duration::from_secs(30)),
            max_connections: None,
            accept_poll_interval: Duration::from_millis(50),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

impl DaemonOptions {
    /// Read `daemon.port`, `daemon.bindInterface`, `daemon.timeout` (seconds) and `daemon.maxConnections`
    /// from `config`, keeping our defaults for absent keys.
    ///
    /// An empty `bindInterface` means all interfaces, and a timeout or connection limit of 0 means none.
    pub fn from_config(config: &gix_config::File<'_>) -> Result<Self> {
        let mut options = Self::default();
        if let Some(port) = integer(config, "daemon.port")? {
            options.port = u16::try_from(port).map_err(|_| Error::Config {
                key: "daemon.port",
                message: format!("{port} is not a valid port"),
            })?;
        }
        if let Some(interface) = config.string("daemon.bindInterface") {
            let interface = interface.to_string();
            let interface = interface.trim();
            options.bind_interface = (!interface.is_empty()).then(|| interface.to_owned());
        }
        if let Some(seconds) = unsigned(config, "daemon.timeout")? {
            options.timeout = (seconds > 0).then(|| Duration::from_secs(seconds));
        }
        if let Some(max) = unsigned(config, "daemon.maxConnections")? {
            options.max_connections = (max > 0).then_some(max as usize);
        }
        Ok(options)
    }

    /// Listen on `interface`, or on all interfaces if `None`.
    pub fn with_bind_interface(mut self, interface: Option<String>) -> Self {
        self.bind_interface = interface;
        self
    }

    /// Set the port to listen on
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the handshake timeout
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Limit the amount of connections served at once
    pub fn with_max_connections(mut self, max: Option<usize>) -> Self {
        self.max_connections = max;
        self
    }

    /// Set how often the accept loop checks whether it should stop
    pub fn with_accept_poll_interval(mut self, interval: Duration) -> Self {
        self.accept_poll_interval = interval;
        self
    }

    /// Set how long stopping waits for the accept loop
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// The host part of the address to bind to.
    pub(crate) fn host(&self) -> &str {
        self.bind_interface.as_deref().unwrap_or("0.0.0.0")
    }
}

fn integer(config: &gix_config::File<'_>, key: &'static str) -> Result<Option<i64>> {
    config
        .integer(key)
        .transpose()
        .map_err(|err| Error::Config {
            key,
            message: err.to_string(),
        })
}

fn unsigned(config: &gix_config::File<'_>, key: &'static str) -> Result<Option<u64>> {
    integer(config, key)?
        .map(|value| {
            u64::try_from(value).map_err(|_| Error::Config {
                key,
                message: format!("{value} must not be negative"),
            })
        })
        .transpose()
}
