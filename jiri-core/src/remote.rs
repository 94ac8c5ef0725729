//! Remote service contracts: batched repo-status queries and HTTP fetches.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::CoreError;

/// Branch-tip revisions for a single remote repository.
#[derive(Debug, Clone, Default)]
pub struct RepoStatus {
    /// Branch name to tip revision.
    pub branches: HashMap<String, String>,
}

/// A service that can answer batched remote-HEAD queries for all
/// repositories on a host.
pub trait RemoteIndex: Send + Sync {
    /// The batch-query host for `remote`, or `None` when the host does not
    /// support a batched status API.
    fn batch_host(&self, remote: &str) -> Option<String>;

    /// Repo statuses for every repository on `host`, restricted to the given
    /// branches. Keys are repository names.
    fn repo_statuses(
        &self,
        host: &str,
        branches: &[String],
    ) -> Result<HashMap<String, RepoStatus>, CoreError>;
}

/// A [`RemoteIndex`] for remotes without any batched status API; every
/// project falls back to per-project classification.
#[derive(Debug, Default, Clone)]
pub struct NoRemoteIndex;

impl RemoteIndex for NoRemoteIndex {
    fn batch_host(&self, _remote: &str) -> Option<String> {
        None
    }

    fn repo_statuses(
        &self,
        _host: &str,
        _branches: &[String],
    ) -> Result<HashMap<String, RepoStatus>, CoreError> {
        Ok(HashMap::new())
    }
}

/// Plain HTTP GET, used to download Gerrit commit-msg hooks.
pub trait HttpFetch: Send + Sync {
    fn get(&self, url: &str) -> Result<Vec<u8>, CoreError>;
}

/// [`HttpFetch`] implementation backed by a blocking reqwest client.
#[derive(Debug)]
pub struct HttpClient {
    client: reqwest::blocking::Client,
}

impl HttpClient {
    pub fn new() -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        HttpClient { client }
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetch for HttpClient {
    fn get(&self, url: &str) -> Result<Vec<u8>, CoreError> {
        let http_err = |message: String| CoreError::Http {
            url: url.to_owned(),
            message,
        };
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| http_err(e.to_string()))?;
        if !response.status().is_success() {
            return Err(http_err(format!("status {}", response.status())));
        }
        let body = response.bytes().map_err(|e| http_err(e.to_string()))?;
        Ok(body.to_vec())
    }
}
