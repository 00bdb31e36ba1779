// src/transport.rs

//! Download transport collaborator boundary
//!
//! The core never talks to the network directly; it hands archive and
//! index locations to a [`Transport`] and receives bytes. Retry policy
//! belongs to the transport, not to the callers.

use crate::error::{Error, Result};
use reqwest::blocking::Client;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum retry attempts for failed downloads
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

/// External download collaborator: fetch `location` into `sink`
///
/// Implementations must either write the complete payload and return its
/// length, or return an error having written a prefix the caller will
/// discard. They are expected to be callable from multiple threads.
pub trait Transport: Sync {
    fn download(&self, location: &str, sink: &mut dyn Write) -> Result<u64>;
}

/// HTTP(S) transport with bounded retries
pub struct HttpTransport {
    client: Client,
    max_retries: u32,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::Download(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_retries: MAX_RETRIES,
        })
    }
}

impl Transport for HttpTransport {
    fn download(&self, location: &str, sink: &mut dyn Write) -> Result<u64> {
        debug!("Downloading {}", location);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(location).send() {
                Ok(mut response) => {
                    if !response.status().is_success() {
                        return Err(Error::Download(format!(
                            "HTTP {} from {}",
                            response.status(),
                            location
                        )));
                    }

                    let written = io::copy(&mut response, sink)?;
                    debug!("Downloaded {} bytes from {}", written, location);
                    return Ok(written);
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::Download(format!(
                            "Failed to download {} after {} attempts: {}",
                            location, attempt, e
                        )));
                    }
                    warn!("Download attempt {} failed: {}, retrying...", attempt, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }
}

/// Transport serving archives from a local directory (file-based
/// repositories and tests). Locations are resolved relative to the base
/// directory unless absolute.
pub struct FileTransport {
    base: PathBuf,
}

impl FileTransport {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl Transport for FileTransport {
    fn download(&self, location: &str, sink: &mut dyn Write) -> Result<u64> {
        let path = if std::path::Path::new(location).is_absolute() {
            PathBuf::from(location)
        } else {
            self.base.join(location)
        };

        debug!("Copying {} from local repository", path.display());
        let mut file = File::open(&path)
            .map_err(|e| Error::Download(format!("Failed to open {}: {}", path.display(), e)))?;
        Ok(io::copy(&mut file, sink)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_transport_relative_location() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pkg.tar.gz"), b"payload").unwrap();

        let transport = FileTransport::new(dir.path());
        let mut sink = Vec::new();
        let written = transport.download("pkg.tar.gz", &mut sink).unwrap();

        assert_eq!(written, 7);
        assert_eq!(sink, b"payload");
    }

    #[test]
    fn test_file_transport_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FileTransport::new(dir.path());
        let mut sink = Vec::new();

        let result = transport.download("absent.tar.gz", &mut sink);
        assert!(matches!(result, Err(crate::Error::Download(_))));
    }

    #[test]
    fn test_file_transport_absolute_location() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abs.tar.gz");
        std::fs::write(&path, b"abs").unwrap();

        // Base pointing elsewhere must not matter for absolute paths
        let transport = FileTransport::new("/nonexistent-base");
        let mut sink = Vec::new();
        transport.download(path.to_str().unwrap(), &mut sink).unwrap();
        assert_eq!(sink, b"abs");
    }
}
