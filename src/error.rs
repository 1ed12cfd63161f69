//! Crate-wide error taxonomy (§7). Probe/parse failures are *data* (see
//! [`crate::types::Outcome`]) — these errors are for boundary operations that
//! genuinely fail: malformed manifests, registry misuse, persistence faults.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("manifest does not start with #EXTM3U")]
    NotHls,
    #[error("manifest is malformed: {0}")]
    Malformed(String),
    #[error("base URL is invalid: {0}")]
    BadBaseUrl(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown stream {0}")]
    UnknownStream(crate::types::StreamId),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("manifest_url is required")]
    MissingManifestUrl,
    #[error("manifest_url is not a valid absolute URL: {0}")]
    InvalidManifestUrl(#[from] url::ParseError),
    #[error("a stream with manifest_url {0:?} already exists")]
    DuplicateStream(String),
    #[error("unknown stream {0}")]
    UnknownStream(crate::types::StreamId),
    #[error("unknown incident {0:?}")]
    UnknownIncident(crate::types::IncidentId),
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to read config file: {0}")]
    Read(String),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to write config file: {0}")]
    Write(String),
}
