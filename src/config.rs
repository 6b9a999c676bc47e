use rusqlite::OpenFlags;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use crate::error::ConnectorError;

/// Database file used when no other target is configured.
pub const DEFAULT_DATABASE: &str = "test.sqlite";

pub const DEFAULT_PROTOCOL: &str = "rusqlite";

/// The only driver segment a [`ConnectionUrl`] accepts.
pub const SQLITE_DRIVER: &str = "sqlite";

pub const DEFAULT_BUSY_TIMEOUT_MS: u32 = 5000;

/// A `<protocol>:<driver>:<filename>` address, e.g. `jdbc:sqlite:test.sqlite`.
///
/// Everything after the second colon is the filename, so `rusqlite:sqlite::memory:`
/// names an in-memory database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConnectionUrl {
    protocol: String,
    filename: String,
}

impl ConnectionUrl {
    pub fn for_path(path: impl AsRef<Path>) -> Self {
        Self {
            protocol: DEFAULT_PROTOCOL.to_string(),
            filename: path.as_ref().to_string_lossy().into_owned(),
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn path(&self) -> &Path {
        Path::new(&self.filename)
    }
}

impl Default for ConnectionUrl {
    fn default() -> Self {
        Self::for_path(DEFAULT_DATABASE)
    }
}

impl FromStr for ConnectionUrl {
    type Err = ConnectorError;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| ConnectorError::InvalidUrl {
            url: url.to_string(),
            reason,
        };

        let mut parts = url.splitn(3, ':');
        let protocol = parts.next().unwrap_or_default();
        let driver = parts.next().ok_or_else(|| invalid("missing driver"))?;
        let filename = parts.next().ok_or_else(|| invalid("missing filename"))?;

        if protocol.is_empty() {
            return Err(invalid("empty protocol"));
        }
        if driver != SQLITE_DRIVER {
            return Err(invalid("driver must be 'sqlite'"));
        }
        if filename.is_empty() {
            return Err(invalid("empty filename"));
        }

        Ok(Self {
            protocol: protocol.to_string(),
            filename: filename.to_string(),
        })
    }
}

impl TryFrom<String> for ConnectionUrl {
    type Error = ConnectorError;

    fn try_from(url: String) -> Result<Self, Self::Error> {
        url.parse()
    }
}

impl From<ConnectionUrl> for String {
    fn from(url: ConnectionUrl) -> Self {
        url.to_string()
    }
}

impl fmt::Display for ConnectionUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.protocol, SQLITE_DRIVER, self.filename)
    }
}

/// Connector configuration. Immutable once handed to a connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Where the database lives
    pub url: ConnectionUrl,
    /// Open connections read-only
    pub read_only: bool,
    /// Create the database file when it does not exist (ignored when read-only)
    pub create_if_missing: bool,
    /// How long a call waits on a locked database before failing
    pub busy_timeout_ms: u32,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            url: ConnectionUrl::default(),
            read_only: false,
            create_if_missing: true,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl ConnectorConfig {
    /// Create a config targeting the database file at `db_path`
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            url: ConnectionUrl::for_path(db_path),
            ..Self::default()
        }
    }

    pub fn in_memory() -> Self {
        Self::new(":memory:")
    }

    /// Create a config from a `<protocol>:sqlite:<filename>` connection url
    pub fn from_url(url: &str) -> Result<Self, ConnectorError> {
        Ok(Self {
            url: url.parse()?,
            ..Self::default()
        })
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        self
    }

    pub fn db_path(&self) -> PathBuf {
        self.url.path().to_path_buf()
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.busy_timeout_ms))
    }

    pub(crate) fn open_flags(&self) -> OpenFlags {
        let mut flags = OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if self.read_only {
            flags |= OpenFlags::SQLITE_OPEN_READ_ONLY;
        } else {
            flags |= OpenFlags::SQLITE_OPEN_READ_WRITE;
            if self.create_if_missing {
                flags |= OpenFlags::SQLITE_OPEN_CREATE;
            }
        }
        flags
    }
}
