use crate::types::{CanopyError, CanopyResult};
use std::path::Path;

/// Retrieval of a remote asset into a local file
pub trait RemoteFetcher: Send + Sync {
    fn fetch_to(&self, uri: &str, destination: &Path) -> CanopyResult<()>;
}

/// Join a base URI and a file name the way the archives expect
pub fn asset_uri(base_uri: &str, file_name: &str) -> String {
    format!("{}{}", base_uri, file_name)
}

/// Blocking HTTP fetcher. Failures are reported as
/// [`CanopyError::ResourceUnavailable`] and never retried.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(timeout_secs: u64) -> CanopyResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent(concat!("canopy/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CanopyError::Processing(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl RemoteFetcher for HttpFetcher {
    fn fetch_to(&self, uri: &str, destination: &Path) -> CanopyResult<()> {
        log::info!("Downloading {} to {}", uri, destination.display());

        let unavailable = |reason: String| CanopyError::ResourceUnavailable {
            uri: uri.to_string(),
            reason,
        };

        let mut response = self
            .client
            .get(uri)
            .send()
            .map_err(|e| unavailable(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(unavailable(format!(
                "HTTP {} {}",
                response.status().as_u16(),
                response.status().canonical_reason().unwrap_or("")
            )));
        }

        let mut file = std::fs::File::create(destination)?;
        let bytes = response
            .copy_to(&mut file)
            .map_err(|e| unavailable(format!("Failed to read response body: {}", e)))?;

        if bytes == 0 {
            return Err(unavailable("Empty response body".to_string()));
        }

        log::debug!("Downloaded {} bytes", bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_uri_appends_file_name() {
        assert_eq!(
            asset_uri("https://maps.zh.ch/download/hoehen/2014/lidar/", "26830_12470.las"),
            "https://maps.zh.ch/download/hoehen/2014/lidar/26830_12470.las"
        );
    }
}
