//! Tails material download and staging
//!
//! Tails material moves through three stages:
//!
//! 1. **Fetched**: raw bytes from a [`TailsSource`]
//! 2. **Staged**: written to a scoped temporary file ([`StagedTails`]) and
//!    hashed on the way in
//! 3. **Verified**: digest matched the registry definition ([`VerifiedTails`])
//!
//! Only [`StagedTails::verify`] produces a [`VerifiedTails`], and the update
//! applicator accepts nothing else. The temporary file is deleted when the
//! owning value drops, whichever stage the run ends in.

use crate::{config::TailsConfig, Error, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use registry_core::{check_digest, IntegrityError, TailsHash, TailsHasher};
use reqwest::Client;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Source of tails content
#[async_trait]
pub trait TailsSource: Send + Sync {
    /// Download the content at `location`
    async fn fetch(&self, location: &str) -> Result<Bytes>;
}

/// Tails source backed by plain HTTP(S) downloads
#[derive(Debug)]
pub struct HttpTailsSource {
    client: Client,
    max_size_bytes: u64,
}

impl HttpTailsSource {
    /// Create new source
    pub fn new(config: &TailsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(Self {
            client,
            max_size_bytes: config.max_size_bytes,
        })
    }

    fn too_large(&self, location: &str, size: u64) -> Error {
        Error::fetch(
            location,
            format!("tails file is {} bytes, limit is {}", size, self.max_size_bytes),
        )
    }
}

#[async_trait]
impl TailsSource for HttpTailsSource {
    async fn fetch(&self, location: &str) -> Result<Bytes> {
        debug!("Downloading tails from {}", location);

        let mut response = self
            .client
            .get(location)
            .send()
            .await
            .map_err(|e| Error::fetch(location, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch(location, format!("HTTP {}", status)));
        }

        if let Some(length) = response.content_length() {
            if length > self.max_size_bytes {
                return Err(self.too_large(location, length));
            }
        }

        let mut content = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::fetch(location, e))?
        {
            let size = (content.len() + chunk.len()) as u64;
            if size > self.max_size_bytes {
                return Err(self.too_large(location, size));
            }
            content.extend_from_slice(&chunk);
        }

        debug!("Downloaded {} tails bytes from {}", content.len(), location);
        Ok(content.freeze())
    }
}

/// Tails content written to a scoped temporary file, not yet verified
#[derive(Debug)]
pub struct StagedTails {
    file: NamedTempFile,
    digest: TailsHash,
    len: u64,
}

impl StagedTails {
    /// Write content to a temporary file, hashing it on the way
    pub fn stage(content: &[u8], dir: Option<&Path>) -> std::io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("tails-");
        let mut file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        let mut hasher = TailsHasher::new();
        for chunk in content.chunks(64 * 1024) {
            file.write_all(chunk)?;
            hasher.update(chunk);
        }
        file.flush()?;

        let len = hasher.len();
        debug!("Staged {} tails bytes at {}", len, file.path().display());

        Ok(Self {
            file,
            digest: hasher.finalize(),
            len,
        })
    }

    /// Path of the staged file
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Check the digest; the file is removed if it does not match
    pub fn verify(self, expected: &TailsHash) -> std::result::Result<VerifiedTails, IntegrityError> {
        check_digest(&self.digest, expected)?;
        info!("Checked tails hash: {}", self.digest);

        Ok(VerifiedTails {
            file: self.file,
            hash: self.digest,
            len: self.len,
        })
    }
}

/// Tails material whose digest matched the registry definition
#[derive(Debug)]
pub struct VerifiedTails {
    file: NamedTempFile,
    hash: TailsHash,
    len: u64,
}

impl VerifiedTails {
    /// Path of the verified file
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Verified digest
    pub fn hash(&self) -> &TailsHash {
        &self.hash
    }

    /// Size in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Check if the material is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read the verified content back
    pub fn read(&self) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.file.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use registry_core::tails_digest;

    #[test]
    fn test_stage_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let content = b"tails file contents".to_vec();

        let staged = StagedTails::stage(&content, Some(dir.path())).unwrap();
        assert!(staged.path().starts_with(dir.path()));

        let verified = staged.verify(&tails_digest(&content)).unwrap();
        assert_eq!(verified.len(), content.len() as u64);
        assert_eq!(verified.read().unwrap(), content);

        let path = verified.path().to_path_buf();
        assert!(path.exists());
        drop(verified);
        assert!(!path.exists());
    }

    #[test]
    fn test_mismatch_releases_file() {
        let dir = tempfile::tempdir().unwrap();
        let staged = StagedTails::stage(b"tampered", Some(dir.path())).unwrap();
        let path = staged.path().to_path_buf();
        assert!(path.exists());

        let err = staged.verify(&tails_digest(b"tails")).unwrap_err();
        assert!(matches!(err, IntegrityError::HashMismatch { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_stage_empty_content() {
        let staged = StagedTails::stage(b"", None).unwrap();
        let verified = staged.verify(&tails_digest(b"")).unwrap();
        assert!(verified.is_empty());
    }
}
