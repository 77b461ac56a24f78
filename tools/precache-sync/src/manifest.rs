//! Manifest files and command output.

use std::path::Path;

use rustkit_sw::{CleanupResult, InstallResult, ManifestEntry, ServiceWorkerConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the CLI.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid manifest {path}: {source}")]
    Manifest {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    ServiceWorker(#[from] rustkit_sw::ServiceWorkerError),

    #[error(transparent)]
    Net(#[from] rustkit_net::NetError),

    #[error(transparent)]
    Logging(#[from] rustkit_common::LoggingError),

    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),
}

/// A manifest file: either a bare entry list or an object with `entries`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ManifestFile {
    List(Vec<ManifestEntry>),
    Wrapped { entries: Vec<ManifestEntry> },
}

/// Load manifest entries from a JSON file.
pub fn load_manifest(path: &Path) -> Result<Vec<ManifestEntry>, SyncError> {
    let json = std::fs::read_to_string(path).map_err(|source| SyncError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_manifest(&json).map_err(|source| SyncError::Manifest {
        path: path.display().to_string(),
        source,
    })
}

fn parse_manifest(json: &str) -> Result<Vec<ManifestEntry>, serde_json::Error> {
    Ok(match serde_json::from_str(json)? {
        ManifestFile::List(entries) | ManifestFile::Wrapped { entries } => entries,
    })
}

const DEFAULT_LOCATION: &str = "http://localhost/sw.js";

/// Worker config from `--config`; `--location` overrides the script URL.
pub fn load_config(
    config: Option<&Path>,
    location: Option<&str>,
) -> Result<ServiceWorkerConfig, SyncError> {
    let mut config = match config {
        Some(path) => ServiceWorkerConfig::from_file(path)?,
        None => ServiceWorkerConfig::new(DEFAULT_LOCATION),
    };
    if let Some(location) = location {
        config.location = location.to_string();
    }
    Ok(config)
}

/// Machine-readable summary of a command.
#[derive(Debug, Default, Serialize)]
pub struct SyncReport {
    pub cache_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_urls: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_updated_urls: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_urls: Option<Vec<String>>,
}

impl SyncReport {
    pub fn new(cache_name: impl Into<String>) -> Self {
        Self {
            cache_name: cache_name.into(),
            ..Default::default()
        }
    }

    pub fn with_install(mut self, result: InstallResult) -> Self {
        self.updated_urls = Some(result.updated_urls);
        self.not_updated_urls = Some(result.not_updated_urls);
        self
    }

    pub fn with_cleanup(mut self, result: CleanupResult) -> Self {
        self.deleted_urls = Some(result.deleted_urls);
        self
    }

    /// Print as JSON, or as a short human summary.
    pub fn print(&self, json: bool) -> Result<(), SyncError> {
        if json {
            println!("{}", serde_json::to_string_pretty(self)?);
            return Ok(());
        }

        println!("Cache: {}", self.cache_name);
        let sections = [
            ("Updated", &self.updated_urls),
            ("Up to date", &self.not_updated_urls),
            ("Deleted", &self.deleted_urls),
        ];
        for (label, urls) in sections {
            if let Some(urls) = urls {
                println!("  {label}: {}", urls.len());
                for url in urls {
                    println!("    {url}");
                }
            }
        }
        Ok(())
    }
}
