use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file '{}' not found", .0.display())]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("section [options] is missing from {}", .0.display())]
    MissingOptions(PathBuf),

    #[error("invalid db_port value '{0}'")]
    InvalidPort(String),

    #[error("No such container: {0}")]
    NoSuchContainer(String),

    #[error("Container inspection failed: {0}")]
    Inspect(String),

    #[error("Failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("database name is not set")]
    DatabaseNotSet,
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to walk extracted archive: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Unknown file format '{}'", .0.display())]
    UnknownFormat(PathBuf),

    #[error("Archive for extraction is not a file: {}", .0.display())]
    NotAFile(PathBuf),

    #[error("Entry to archive does not exist: {}", .0.display())]
    MissingEntry(PathBuf),

    #[error("archive {} contains neither database_dump.sql nor database_dump.b64", .0.display())]
    MissingDumpMarker(PathBuf),

    #[error("extraction target already exists: {}", .0.display())]
    DestinationExists(PathBuf),
}

/// How an external PostgreSQL client tool reported its failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolFailure {
    #[error("does not exist: {0}")]
    DoesNotExist(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("{0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("{0} executable not found in PATH. Please ensure PostgreSQL client tools are installed and in your PATH.")]
    ToolNotFound(&'static str),

    #[error("Failed to execute {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} failed, {failure}")]
    Tool {
        tool: &'static str,
        failure: ToolFailure,
    },

    #[error("Database '{0}' does not exist, check name and try again")]
    DatabaseMissing(String),

    #[error("SQL dump file not found: {}", .0.display())]
    DumpNotFound(PathBuf),

    #[error("Could not restore database '{database}' (partial database dropped: {dropped}): {reason}")]
    RestoreFailed {
        database: String,
        reason: String,
        dropped: bool,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl DriverError {
    /// The tool-level failure, when the error came from a finished child process.
    pub fn tool_failure(&self) -> Option<&ToolFailure> {
        match self {
            Self::Tool { failure, .. } => Some(failure),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("RPC fault {code}: {message}")]
    Fault { code: i64, message: String },

    #[error("Malformed XML-RPC response: {0}")]
    Malformed(String),

    #[error("Login refused for user '{0}'")]
    LoginRefused(String),
}

impl RpcError {
    /// Faults the application server is known to raise intermittently when
    /// several workers touch the same rows.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Fault { code, message } => {
                *code == 1 || message.contains("could not serialize access")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_known_faults_are_transient() {
        let code_one = RpcError::Fault { code: 1, message: "boom".into() };
        let serialization = RpcError::Fault {
            code: 0,
            message: "could not serialize access due to concurrent update".into(),
        };
        let other = RpcError::Fault { code: 2, message: "AccessDenied".into() };

        assert!(code_one.is_transient());
        assert!(serialization.is_transient());
        assert!(!other.is_transient());
        assert!(!RpcError::Malformed("x".into()).is_transient());
    }

    #[test]
    fn tool_failure_is_exposed() {
        let err = DriverError::Tool {
            tool: "dropdb",
            failure: ToolFailure::DoesNotExist("database \"x\" does not exist".into()),
        };
        assert!(matches!(err.tool_failure(), Some(ToolFailure::DoesNotExist(_))));
        assert!(DriverError::DatabaseMissing("x".into()).tool_failure().is_none());
    }
}
