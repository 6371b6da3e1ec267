//! Repository configuration
//!
//! Maps repository names to connection URIs. The mapping always contains a
//! `default` entry and is overlaid, by name, with the entries of a flat TOML
//! file:
//!
//! ```toml
//! default = "sqlite3:///home/user/.local/share/reconbase/database.sqlite3"
//! work = "sqlite3:///srv/recon/work.sqlite3"
//! ```

use crate::logging::LogOptions;
use crate::{Error, Result};
use directories::ProjectDirs;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::RwLock;
use url::Url;

/// Environment variable overriding both the config and data directories
pub const HOME_ENV: &str = "RECONBASE_HOME";

/// Name of the repository that always exists
pub const DEFAULT_REPOSITORY: &str = "default";

const CONFIG_FILE: &str = "repositories.toml";
const DATABASE_FILE: &str = "database.sqlite3";
const LOG_FILE: &str = "database.log";

/// Well-known directories used by Reconbase
#[derive(Debug, Clone)]
pub struct Paths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl Paths {
    /// Resolve directories from `RECONBASE_HOME` or the platform conventions
    pub fn from_env() -> Self {
        if let Some(home) = std::env::var_os(HOME_ENV) {
            return Self::in_dir(home);
        }

        match ProjectDirs::from("org", "reconbase", env!("CARGO_PKG_NAME")) {
            Some(dirs) => Self {
                config_dir: dirs.config_dir().to_path_buf(),
                data_dir: dirs.data_local_dir().to_path_buf(),
            },
            None => Self::in_dir(PathBuf::from(".").join(".reconbase")),
        }
    }

    /// Keep config and data side by side in one directory
    pub fn in_dir(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self {
            config_dir: base.clone(),
            data_dir: base,
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join(LOG_FILE)
    }

    pub fn default_repository(&self) -> Result<RepositoryUri> {
        RepositoryUri::sqlite_file(&self.data_dir.join(DATABASE_FILE))
    }
}

/// Everything the `Database` coordinator needs to start
#[derive(Debug, Clone)]
pub struct Settings {
    pub config_path: PathBuf,
    pub default_repository: RepositoryUri,
    pub log: LogOptions,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_paths(&Paths::from_env())
    }

    pub fn in_dir(base: impl Into<PathBuf>) -> Result<Self> {
        Self::from_paths(&Paths::in_dir(base))
    }

    pub fn from_paths(paths: &Paths) -> Result<Self> {
        Ok(Self {
            config_path: paths.config_file(),
            default_repository: paths.default_repository()?,
            log: LogOptions::from_env(paths.log_file()),
        })
    }

    /// Use a different URI for the `default` repository
    pub fn with_default_repository(mut self, uri: RepositoryUri) -> Self {
        self.default_repository = uri;
        self
    }
}

/// Where a repository's data lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageTarget {
    Memory,
    File(PathBuf),
}

/// Connection URI of a repository.
///
/// Accepted forms:
/// - `sqlite3:///absolute/path.sqlite3`
/// - `sqlite3:relative/path.sqlite3`
/// - `sqlite3::memory:`
///
/// `sqlite` is accepted as an alias of `sqlite3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryUri(Url);

impl RepositoryUri {
    pub fn parse(uri: &str) -> Result<Self> {
        Url::parse(uri)
            .map(Self)
            .map_err(|e| Error::InvalidUri(format!("{uri}: {e}")))
    }

    /// URI of an SQLite file. Each path segment is percent-encoded so
    /// [`target`](Self::target) yields the same path back.
    pub fn sqlite_file(path: &Path) -> Result<Self> {
        let path = path.to_string_lossy().replace('\\', "/");
        let encoded = path
            .split('/')
            .enumerate()
            .map(|(i, segment)| match segment.as_bytes() {
                // Keep a Windows drive letter readable
                [_, b':'] if i == 0 => segment.into(),
                _ => urlencoding::encode(segment),
            })
            .collect::<Vec<_>>()
            .join("/");

        let uri = if encoded.starts_with('/') {
            format!("sqlite3://{encoded}")
        } else if encoded.as_bytes().get(1) == Some(&b':') {
            format!("sqlite3:///{encoded}")
        } else {
            format!("sqlite3:{encoded}")
        };

        Self::parse(&uri)
    }

    /// URI of a private in-memory SQLite database
    pub fn memory() -> Self {
        Self(Url::parse("sqlite3::memory:").expect("static URI is valid"))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn scheme(&self) -> &str {
        self.0.scheme()
    }

    /// Resolve the storage target this URI points at
    pub fn target(&self) -> Result<StorageTarget> {
        if !matches!(self.scheme(), "sqlite3" | "sqlite") {
            return Err(Error::UnsupportedScheme(self.to_string()));
        }

        let raw = self.0.path();
        if raw == ":memory:" {
            return Ok(StorageTarget::Memory);
        }
        if raw.is_empty() {
            return Err(Error::InvalidUri(format!("{self}: missing database path")));
        }

        let decoded = urlencoding::decode(raw)
            .map_err(|e| Error::InvalidUri(format!("{self}: {e}")))?;

        // `sqlite3:///C:/data.db` carries a leading slash before the drive letter
        let path = match decoded.as_bytes() {
            [b'/', _, b':', ..] => &decoded[1..],
            _ => &decoded[..],
        };

        Ok(StorageTarget::File(PathBuf::from(path)))
    }
}

impl fmt::Display for RepositoryUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl FromStr for RepositoryUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Ordered name → URI mapping. `default` is always present and first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repositories {
    entries: Vec<(String, RepositoryUri)>,
}

impl Repositories {
    pub fn new(default: RepositoryUri) -> Self {
        Self {
            entries: vec![(DEFAULT_REPOSITORY.to_string(), default)],
        }
    }

    /// Insert or overwrite a repository. Overwritten names keep their position.
    pub fn insert(&mut self, name: impl Into<String>, uri: RepositoryUri) {
        let name = name.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = uri,
            None => self.entries.push((name, uri)),
        }
    }

    /// Remove a repository. The `default` repository cannot be removed.
    pub fn remove(&mut self, name: &str) -> Result<Option<RepositoryUri>> {
        if name == DEFAULT_REPOSITORY {
            return Err(Error::ProtectedRepository(name.to_string()));
        }
        let position = self.entries.iter().position(|(existing, _)| existing == name);
        Ok(position.map(|index| self.entries.remove(index).1))
    }

    pub fn get(&self, name: &str) -> Option<&RepositoryUri> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, uri)| uri)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RepositoryUri)> {
        self.entries.iter().map(|(name, uri)| (name.as_str(), uri))
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lazily loaded, cached repository configuration backed by a TOML file
#[derive(Debug)]
pub struct RepositoryConfig {
    path: PathBuf,
    default: RepositoryUri,
    cache: RwLock<Option<Repositories>>,
}

impl RepositoryConfig {
    pub fn new(path: impl Into<PathBuf>, default: RepositoryUri) -> Self {
        Self {
            path: path.into(),
            default,
            cache: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The configured repositories, loading the config file on first use
    pub fn list(&self) -> Result<Repositories> {
        {
            let cache = self.cache.read().map_err(|_| poisoned())?;
            if let Some(repositories) = cache.as_ref() {
                return Ok(repositories.clone());
            }
        }

        let mut cache = self.cache.write().map_err(|_| poisoned())?;
        if let Some(repositories) = cache.as_ref() {
            return Ok(repositories.clone());
        }

        let repositories = self.load()?;
        *cache = Some(repositories.clone());
        Ok(repositories)
    }

    pub fn has(&self, name: &str) -> Result<bool> {
        Ok(self.list()?.contains(name))
    }

    pub fn get(&self, name: &str) -> Result<RepositoryUri> {
        self.list()?
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownRepository(name.to_string()))
    }

    /// Write the current mapping to the config file
    pub fn save(&self) -> Result<()> {
        self.save_with(|_| Ok(()))
    }

    /// Apply `mutate` to the mapping, then write the whole mapping to the
    /// config file. The cached mapping only changes if both steps succeed.
    pub fn save_with<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Repositories) -> Result<()>,
    {
        let mut repositories = self.list()?;
        mutate(&mut repositories)?;
        self.write(&repositories)?;

        let mut cache = self.cache.write().map_err(|_| poisoned())?;
        *cache = Some(repositories);
        Ok(())
    }

    /// Remove `name` and save. An unknown name leaves the file untouched and
    /// returns `None`; `default` is refused.
    pub fn remove(&self, name: &str) -> Result<Option<RepositoryUri>> {
        if name != DEFAULT_REPOSITORY && !self.has(name)? {
            return Ok(None);
        }

        let mut removed = None;
        self.save_with(|repositories| {
            removed = repositories.remove(name)?;
            Ok(())
        })?;
        Ok(removed)
    }

    /// Forget the cached mapping; the next access re-reads the file
    pub fn reload(&self) -> Result<()> {
        let mut cache = self.cache.write().map_err(|_| poisoned())?;
        *cache = None;
        Ok(())
    }

    fn load(&self) -> Result<Repositories> {
        let mut repositories = Repositories::new(self.default.clone());
        if !self.path.is_file() {
            tracing::debug!("No repository config at {}, using defaults", self.path.display());
            return Ok(repositories);
        }

        let contents = std::fs::read_to_string(&self.path)?;
        let table: toml::Table = toml::from_str(&contents).map_err(|e| self.format_error(e))?;

        for (name, value) in table {
            let uri = value.as_str().ok_or_else(|| {
                self.format_error(format!("repository {name} must map to a URI string"))
            })?;
            let uri = RepositoryUri::parse(uri).map_err(|e| self.format_error(e))?;
            repositories.insert(name, uri);
        }

        tracing::debug!(
            "Loaded {} repositories from {}",
            repositories.len(),
            self.path.display()
        );
        Ok(repositories)
    }

    fn write(&self, repositories: &Repositories) -> Result<()> {
        let mut table = toml::Table::new();
        for (name, uri) in repositories.iter() {
            table.insert(name.to_string(), toml::Value::String(uri.to_string()));
        }
        let contents = toml::to_string_pretty(&table).map_err(|e| self.format_error(e))?;

        let write_error = |source| Error::ConfigWrite {
            path: self.path.display().to_string(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(write_error)?;
            }
        }
        std::fs::write(&self.path, contents).map_err(write_error)?;

        tracing::info!("Saved {} repositories to {}", repositories.len(), self.path.display());
        Ok(())
    }

    fn format_error(&self, reason: impl fmt::Display) -> Error {
        Error::ConfigFormat {
            path: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

fn poisoned() -> Error {
    Error::LockPoisoned("config".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &Path) -> RepositoryConfig {
        RepositoryConfig::new(dir.join(CONFIG_FILE), RepositoryUri::memory())
    }

    #[test]
    fn test_default_without_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let repositories = config.list().unwrap();
        assert_eq!(repositories.names(), vec!["default"]);
        assert!(config.has("default").unwrap());
        assert!(!config.has("work").unwrap());
    }

    #[test]
    fn test_file_entries_overlay_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "work = \"sqlite3:///srv/work.sqlite3\"\ndefault = \"sqlite3:///srv/main.sqlite3\"\n",
        )
        .unwrap();

        let repositories = config_in(dir.path()).list().unwrap();
        assert_eq!(repositories.names(), vec!["default", "work"]);
        assert_eq!(
            repositories.get("default").unwrap().as_str(),
            "sqlite3:///srv/main.sqlite3"
        );
    }

    #[test]
    fn test_nested_table_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[work]\nuri = \"sqlite3:///srv/work.sqlite3\"\n",
        )
        .unwrap();

        let err = config_in(dir.path()).list().unwrap_err();
        assert!(matches!(err, Error::ConfigFormat { .. }));
    }

    #[test]
    fn test_invalid_toml_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "- just\n- a list\n").unwrap();

        let err = config_in(dir.path()).list().unwrap_err();
        assert!(matches!(err, Error::ConfigFormat { .. }));
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        config
            .save_with(|repos| {
                repos.insert("work", RepositoryUri::parse("sqlite3:///srv/work db.sqlite3")?);
                Ok(())
            })
            .unwrap();
        let before = config.list().unwrap();

        let restarted = config_in(dir.path());
        assert_eq!(restarted.list().unwrap(), before);
    }

    #[test]
    fn test_failed_mutation_keeps_cache() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let err = config.save_with(|repos| repos.remove("default").map(|_| ())).unwrap_err();
        assert!(matches!(err, Error::ProtectedRepository(_)));
        assert!(config.has("default").unwrap());
        assert!(!dir.path().join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_remove_unknown_leaves_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        assert_eq!(config.remove("work").unwrap(), None);
        assert!(!dir.path().join(CONFIG_FILE).exists());

        config
            .save_with(|repos| {
                repos.insert("work", RepositoryUri::memory());
                Ok(())
            })
            .unwrap();
        assert_eq!(config.remove("work").unwrap(), Some(RepositoryUri::memory()));
        assert!(!config_in(dir.path()).has("work").unwrap());
        assert!(matches!(config.remove("default"), Err(Error::ProtectedRepository(_))));
    }

    #[test]
    fn test_uri_targets() {
        assert_eq!(
            RepositoryUri::parse("sqlite3::memory:").unwrap().target().unwrap(),
            StorageTarget::Memory
        );
        assert_eq!(
            RepositoryUri::parse("sqlite3:///tmp/a%20b.db").unwrap().target().unwrap(),
            StorageTarget::File(PathBuf::from("/tmp/a b.db"))
        );
        assert_eq!(
            RepositoryUri::parse("sqlite:local.db").unwrap().target().unwrap(),
            StorageTarget::File(PathBuf::from("local.db"))
        );
        assert!(matches!(
            RepositoryUri::parse("postgres://db/recon").unwrap().target(),
            Err(Error::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_sqlite_file_keeps_reserved_characters() {
        for path in [
            "/tmp/recon#1/database.sqlite3",
            "/tmp/a%20b/database.sqlite3",
            "/tmp/what?/50%/data base.sqlite3",
            "relative/dir#2/db.sqlite3",
        ] {
            let uri = RepositoryUri::sqlite_file(Path::new(path)).unwrap();
            assert_eq!(uri.target().unwrap(), StorageTarget::File(PathBuf::from(path)));

            let reparsed = RepositoryUri::parse(uri.as_str()).unwrap();
            assert_eq!(reparsed.target().unwrap(), StorageTarget::File(PathBuf::from(path)));
        }
    }

    #[test]
    fn test_sqlite_file_uri() {
        let uri =
            RepositoryUri::sqlite_file(Path::new("/var/lib/recon data/database.sqlite3")).unwrap();
        assert_eq!(uri.scheme(), "sqlite3");
        assert_eq!(
            uri.target().unwrap(),
            StorageTarget::File(PathBuf::from("/var/lib/recon data/database.sqlite3"))
        );
    }
}
