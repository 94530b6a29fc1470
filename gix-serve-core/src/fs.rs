//! Resolving repositories below a base directory on disk.

use std::path::{Component, Path, PathBuf};

use crate::{
    access::{RepositoryResolver, ResolveError},
    gc::CollectionLocks,
    protocol::ClientIdentity,
    service::{ConfigError, Repository, RepositoryHandle},
};

/// The file whose presence allows anonymous clients to access a repository unless everything is exported.
pub const EXPORT_OK_FILE: &str = "git-daemon-export-ok";

/// Opens repositories below a base directory, by their name or their name with `.git` appended.
#[derive(Debug, Clone)]
pub struct FileRepositoryResolver {
    base: PathBuf,
    export_all: bool,
    locks: CollectionLocks,
}

impl FileRepositoryResolver {
    /// Serve all repositories below `base`.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        FileRepositoryResolver {
            base: base.into(),
            export_all: true,
            locks: CollectionLocks::default(),
        }
    }

    /// If `false`, anonymous clients may only open repositories containing [`EXPORT_OK_FILE`].
    pub fn with_export_all(mut self, export_all: bool) -> Self {
        self.export_all = export_all;
        self
    }

    /// Refuse access to repositories locked in `locks`.
    pub fn with_collection_locks(mut self, locks: CollectionLocks) -> Self {
        self.locks = locks;
        self
    }

    /// The directory repositories are looked up in.
    pub fn base(&self) -> &Path {
        &self.base
    }

    fn locate(&self, name: &str) -> Option<PathBuf> {
        let candidate = self.base.join(name);
        if candidate.is_dir() {
            return Some(candidate);
        }
        if name.ends_with(".git") {
            return None;
        }
        let candidate = self.base.join(format!("{name}.git"));
        candidate.is_dir().then_some(candidate)
    }
}

/// Return `true` if `name` only consists of plain path components.
fn is_plain_relative(name: &str) -> bool {
    !name.is_empty() && Path::new(name).components().all(|c| matches!(c, Component::Normal(_)))
}

impl RepositoryResolver for FileRepositoryResolver {
    fn open(&self, client: &ClientIdentity, name: &str) -> Result<RepositoryHandle, ResolveError> {
        if !is_plain_relative(name) {
            tracing::debug!(repository = name, "refusing path outside of the base directory");
            return Err(ResolveError::NotFound(name.to_owned()));
        }
        let name = name.trim_end_matches('/');
        let path = self.locate(name).ok_or_else(|| ResolveError::NotFound(name.to_owned()))?;
        let repo = gix::open_opts(&path, gix::open::Options::isolated()).map_err(|err| {
            tracing::debug!(repository = name, %err, "not a repository");
            ResolveError::NotFound(name.to_owned())
        })?;
        let git_dir = repo.git_dir().to_owned();
        if self.locks.is_collecting(&git_dir) {
            return Err(ResolveError::Rejected(format!(
                "{name} is busy, garbage collection in progress"
            )));
        }
        if client.is_anonymous() && !self.export_all && !git_dir.join(EXPORT_OK_FILE).is_file() {
            return Err(ResolveError::NotEnabled(format!("{name} is not exported")));
        }
        Ok(Box::new(FileRepository {
            name: name.to_owned(),
            git_dir,
        }))
    }
}

/// A repository on disk, read fresh whenever its configuration is queried.
#[derive(Debug, Clone)]
pub struct FileRepository {
    name: String,
    git_dir: PathBuf,
}

impl FileRepository {
    /// Refer to the repository at `git_dir` as `name`, without validating it.
    pub fn new(name: impl Into<String>, git_dir: impl Into<PathBuf>) -> Self {
        FileRepository {
            name: name.into(),
            git_dir: git_dir.into(),
        }
    }
}

impl Repository for FileRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    fn config_boolean(&self, key: &str) -> Option<Result<bool, ConfigError>> {
        let path = self.git_dir.join("config");
        if !path.is_file() {
            return None;
        }
        let invalid = |message: String| ConfigError {
            key: key.to_owned(),
            location: path.display().to_string(),
            message,
        };
        let config = match gix_config::File::from_path_no_includes(path.clone(), gix_config::Source::Local) {
            Ok(config) => config,
            Err(err) => return Some(Err(invalid(err.to_string()))),
        };
        config
            .boolean(key)
            .map(|value| value.map_err(|err| invalid(err.to_string())))
    }
}
