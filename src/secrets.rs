use std::fs;
use std::io;
use std::path::Path;

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};

/// API key for the mapping service, read once per run from a local file.
#[derive(Clone)]
pub struct ApiKey {
    secret: SecretString,
}

impl ApiKey {
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(AppError::Config("maps API key is empty".into()));
        }
        Ok(Self {
            secret: SecretString::from(trimmed.to_string()),
        })
    }

    pub fn from_file(path: &Path) -> AppResult<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(
                    target: "secret_file",
                    path = %path.display(),
                    "maps API key file not found"
                );
                return Err(AppError::Path(format!(
                    "maps API key file {} does not exist",
                    path.display()
                )));
            }
            Err(err) => return Err(AppError::Io(err)),
        };
        debug!(
            target: "secret_file",
            path = %path.display(),
            "loaded maps API key"
        );
        Self::new(contents)
    }

    pub fn expose(&self) -> &str {
        self.secret.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}
