use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while configuring or running a generator.
///
/// Row-level parse failures in trace and plan files never show up here; the
/// loaders skip those rows.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("no valid rows in trace {}", .path.display())]
    EmptyTrace { path: PathBuf },
    #[error("failed to bind {addr}: {source}")]
    SocketBind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("send failed: {0}")]
    Send(#[source] io::Error),
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Configuration(msg.into())
    }

    /// True for problems with input files or settings, which are all raised
    /// before any flow starts.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_) | Error::Io { .. } | Error::Csv(_) | Error::Json(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
