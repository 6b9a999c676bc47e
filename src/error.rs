use thiserror::Error;

/// Coarse classification of a [`ConnectorError`], for callers that only
/// need to branch on the cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidUrl,
    Open,
    Execute,
    Close,
}

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("invalid connection url '{url}': {reason}")]
    InvalidUrl { url: String, reason: &'static str },

    #[error("failed to open database '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("statement rejected: {source}")]
    Execute {
        sql: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("statement does not return rows: {sql}")]
    NotAQuery { sql: String },

    #[error("statement returns rows, use a query instead: {sql}")]
    ReturnsRows { sql: String },

    #[error("no statement to execute")]
    EmptyStatement,

    #[error("expected a single statement: {sql}")]
    MultipleStatements { sql: String },

    #[error("failed to close database '{path}': {source}")]
    Close {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
}

impl ConnectorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectorError::InvalidUrl { .. } => ErrorKind::InvalidUrl,
            ConnectorError::Open { .. } => ErrorKind::Open,
            ConnectorError::Execute { .. }
            | ConnectorError::NotAQuery { .. }
            | ConnectorError::ReturnsRows { .. }
            | ConnectorError::EmptyStatement
            | ConnectorError::MultipleStatements { .. } => ErrorKind::Execute,
            ConnectorError::Close { .. } => ErrorKind::Close,
        }
    }

    /// The statement text this error is about, if any.
    pub fn sql(&self) -> Option<&str> {
        match self {
            ConnectorError::Execute { sql, .. }
            | ConnectorError::NotAQuery { sql }
            | ConnectorError::ReturnsRows { sql }
            | ConnectorError::MultipleStatements { sql } => Some(sql),
            _ => None,
        }
    }
}

pub type Result<T, E = ConnectorError> = std::result::Result<T, E>;
