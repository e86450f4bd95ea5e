use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to resolve required path: {0}")]
    Path(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Config(String),
    #[error("{what} lists have different lengths ({left} vs {right})")]
    LengthMismatch {
        what: &'static str,
        left: usize,
        right: usize,
    },
}

/// Failure of a single request to the mapping API.
///
/// These never abort a run; the executor turns them into [`ItemFailure`]s.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("request failed: {0}")]
    Transport(reqwest::Error),
    #[error("maps API returned status {0}")]
    Status(u16),
    #[error("response was not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("response missing {0}")]
    MissingField(&'static str),
    #[error("response missing resourceSets[0].resources[0].routeLegs[{0}]")]
    MissingLeg(usize),
}

/// Request URLs carry the API key, so it is stripped before the error is kept.
impl From<reqwest::Error> for LookupError {
    fn from(err: reqwest::Error) -> Self {
        LookupError::Transport(err.without_url())
    }
}

impl LookupError {
    pub fn kind(&self) -> FailureKind {
        match self {
            LookupError::MissingField(_) | LookupError::MissingLeg(_) => {
                FailureKind::MissingField
            }
            _ => FailureKind::Request,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transport, status or decode failure.
    Request,
    /// The request succeeded but the expected JSON path was absent.
    MissingField,
}

/// A lookup failure pinned to the position of the item in the pending set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub index: usize,
    pub kind: FailureKind,
    pub detail: String,
}

impl ItemFailure {
    pub fn new(index: usize, err: &LookupError) -> Self {
        Self {
            index,
            kind: err.kind(),
            detail: err.to_string(),
        }
    }
}
