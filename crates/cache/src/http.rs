//! The remote tier: an HTTP client speaking the artifacts protocol.
//!
//! `GET /v8/artifacts/{hash}` downloads, `PUT` uploads, `HEAD` probes.
//! Every request carries a bearer token; signed mode adds `x-artifact-tag`.
//! Network and auth failures surface as `Network` errors so the facade can
//! degrade to local-only.

use std::fs;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use tracing::{debug, warn};

use turbine_core::{AbsoluteSystemPathBuf, AnchoredSystemPathBuf, Error, Result};

use crate::analytics::{AnalyticsClient, CacheEventStatus};
use crate::item::{CacheReader, CacheWriter};
use crate::signature::ArtifactSignature;
use crate::{Cache, CacheSource, FetchedArtifact, ItemStatus, DEFAULT_REMOTE_TIMEOUT};

const DURATION_HEADER: &str = "x-artifact-duration";
const TAG_HEADER: &str = "x-artifact-tag";
const TEAM_HEADER: &str = "x-team";

/// Connection settings for the remote tier.
#[derive(Debug, Clone)]
pub struct RemoteCacheConfig {
    /// Base URL, e.g. `https://vercel.com/api`.
    pub base_url: String,
    pub token: String,
    pub team: Option<String>,
    pub timeout: Option<Duration>,
    /// Shared secret enabling signed artifacts.
    pub signature_key: Option<String>,
}

pub struct HttpCache {
    client: Client,
    config: RemoteCacheConfig,
    signer: Option<ArtifactSignature>,
    analytics: Option<Arc<AnalyticsClient>>,
}

impl HttpCache {
    pub fn new(
        config: RemoteCacheConfig,
        analytics: Option<Arc<AnalyticsClient>>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout.unwrap_or(DEFAULT_REMOTE_TIMEOUT))
            .build()
            .map_err(|e| Error::network(&config.base_url, e.to_string()))?;
        let signer = config
            .signature_key
            .as_ref()
            .map(|key| ArtifactSignature::new(key.as_bytes().to_vec()));
        Ok(Self {
            client,
            config,
            signer,
            analytics,
        })
    }

    fn artifact_url(&self, hash: &str) -> String {
        let mut url = format!("{}/v8/artifacts/{hash}", self.config.base_url);
        if let Some(team) = &self.config.team {
            url.push_str(&format!("?teamId={team}"));
        }
        url
    }

    fn record(&self, event: CacheEventStatus, hash: &str, duration: u64) {
        if let Some(analytics) = &self.analytics {
            analytics.log_event(CacheSource::Remote, event, hash, duration);
        }
    }

    fn authorize(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        let mut request = request.bearer_auth(&self.config.token);
        if let Some(team) = &self.config.team {
            request = request.header(TEAM_HEADER, team);
        }
        request
    }
}

impl Cache for HttpCache {
    fn exists(&self, hash: &str) -> Result<ItemStatus> {
        let url = self.artifact_url(hash);
        let response = self
            .authorize(self.client.head(&url))
            .send()
            .map_err(|e| Error::network(&url, e.to_string()))?;
        Ok(ItemStatus {
            local: false,
            remote: response.status().is_success(),
        })
    }

    fn fetch(
        &self,
        anchor: &AbsoluteSystemPathBuf,
        hash: &str,
        _globs: &[String],
    ) -> Result<Option<FetchedArtifact>> {
        let url = self.artifact_url(hash);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .map_err(|e| Error::network(&url, e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                self.record(CacheEventStatus::Miss, hash, 0);
                return Ok(None);
            }
            status if !status.is_success() => {
                return Err(Error::network(
                    &url,
                    format!("artifact download failed with status {status}"),
                ));
            }
            _ => {}
        }

        let duration_ms = response
            .headers()
            .get(DURATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let tag = response
            .headers()
            .get(TAG_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .bytes()
            .map_err(|e| Error::network(&url, e.to_string()))?;

        if let Some(signer) = &self.signer {
            let valid = match &tag {
                Some(tag) => signer.validate(&body, tag)?,
                None => false,
            };
            if !valid {
                return Err(Error::cache_corrupt(
                    std::path::PathBuf::from(&url),
                    "artifact signature verification failed",
                ));
            }
        }

        // Stage the download so the shared restore path can stream it back
        // out of gzip + tar.
        let mut staged = tempfile::NamedTempFile::new()
            .map_err(|e| Error::file_system("<staging>", "create staging file", e))?;
        staged
            .write_all(&body)
            .map_err(|e| Error::file_system(staged.path(), "stage downloaded artifact", e))?;
        let staged_path = AbsoluteSystemPathBuf::new(staged.path())?;
        let files = CacheReader::open(&staged_path)?.restore(anchor)?;

        debug!(%hash, files = files.len(), "restored artifact from remote cache");
        self.record(CacheEventStatus::Hit, hash, duration_ms);
        Ok(Some(FetchedArtifact {
            source: CacheSource::Remote,
            files,
            duration_ms,
        }))
    }

    fn put(
        &self,
        anchor: &AbsoluteSystemPathBuf,
        hash: &str,
        duration_ms: u64,
        files: &[AnchoredSystemPathBuf],
    ) -> Result<()> {
        let staged = tempfile::NamedTempFile::new()
            .map_err(|e| Error::file_system("<staging>", "create staging file", e))?;
        let staged_path = AbsoluteSystemPathBuf::new(staged.path())?;

        let mut writer = CacheWriter::create(&staged_path)?;
        for file in files {
            writer.add_file(anchor, file)?;
        }
        writer.finish()?;

        let body = fs::read(staged.path())
            .map_err(|e| Error::file_system(staged.path(), "read staged artifact", e))?;

        let url = self.artifact_url(hash);
        let mut request = self
            .authorize(self.client.put(&url))
            .header("Content-Type", "application/octet-stream")
            .header(DURATION_HEADER, duration_ms.to_string());
        if let Some(signer) = &self.signer {
            request = request.header(TAG_HEADER, signer.generate(&body)?);
        }

        let response = request
            .body(body)
            .send()
            .map_err(|e| Error::network(&url, e.to_string()))?;
        if !response.status().is_success() {
            warn!(%hash, status = %response.status(), "artifact upload rejected");
            return Err(Error::network(
                &url,
                format!("artifact upload failed with status {}", response.status()),
            ));
        }
        Ok(())
    }
}
