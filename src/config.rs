use std::path::PathBuf;
use std::{env, io};

use serde::Serialize;
use tracing::debug;

pub const DEFAULT_API_BASE_URL: &str = "http://dev.virtualearth.net/REST/v1";
/// One route request carries at most 25 waypoints, so 12 source/destination pairs.
pub const MAX_ROUTE_BATCH_SIZE: usize = 12;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub api_base_url: String,
    pub api_key_file: PathBuf,
    pub route_batch_size: usize,
    pub http_timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub database_path: String,
    pub api_base_url: String,
    pub api_key_file: String,
    pub route_batch_size: usize,
    pub http_timeout_secs: Option<u64>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            database_path: env::var("DATABASE_PATH")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("distance-extract.db")),
            api_base_url: env::var("MAPS_API_BASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            api_key_file: env::var("MAPS_API_KEY_FILE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("BingMapsKey.txt")),
            route_batch_size: clamp_batch_size(parse_usize(
                "ROUTE_BATCH_SIZE",
                MAX_ROUTE_BATCH_SIZE,
            )),
            http_timeout_secs: parse_optional_u64("HTTP_TIMEOUT_SECS"),
        }
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.route_batch_size = clamp_batch_size(size);
        self
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            database_path: self.database_path.display().to_string(),
            api_base_url: self.api_base_url.clone(),
            api_key_file: self.api_key_file.display().to_string(),
            route_batch_size: self.route_batch_size,
            http_timeout_secs: self.http_timeout_secs,
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn clamp_batch_size(value: usize) -> usize {
    value.clamp(1, MAX_ROUTE_BATCH_SIZE)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_optional_u64(key: &str) -> Option<u64> {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_overrides_and_clamps_batch_size() {
        env::set_var("DATABASE_PATH", "custom.db");
        env::set_var("MAPS_API_BASE_URL", "http://localhost:9000/REST/v1");
        env::set_var("ROUTE_BATCH_SIZE", "40");
        env::set_var("HTTP_TIMEOUT_SECS", "15");

        let config = AppConfig::from_env();
        let public = config.public_profile();

        assert_eq!(public.database_path, "custom.db");
        assert_eq!(public.api_base_url, "http://localhost:9000/REST/v1");
        assert_eq!(public.route_batch_size, MAX_ROUTE_BATCH_SIZE);
        assert_eq!(public.http_timeout_secs, Some(15));

        env::remove_var("DATABASE_PATH");
        env::remove_var("MAPS_API_BASE_URL");
        env::remove_var("ROUTE_BATCH_SIZE");
        env::remove_var("HTTP_TIMEOUT_SECS");
    }

    #[test]
    fn batch_size_never_drops_to_zero() {
        let config = AppConfig {
            database_path: PathBuf::from("test.db"),
            api_base_url: DEFAULT_API_BASE_URL.into(),
            api_key_file: PathBuf::from("key.txt"),
            route_batch_size: 12,
            http_timeout_secs: None,
        }
        .with_batch_size(0);
        assert_eq!(config.route_batch_size, 1);
    }
}
