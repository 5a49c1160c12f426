//! Remote file source (GitHub)
//!
//! Single files come from the unauthenticated raw-content host. Whole
//! repository archives need a caller-supplied token; the archive endpoint
//! answers with a redirect to a different host, which this client refuses to
//! follow so the token never leaves the API host. That case is reported as
//! [`RemoteError::ArchiveRedirectBlocked`] with an actionable message.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::{redirect, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const RAW_BASE_URL: &str = "https://raw.githubusercontent.com";
const API_BASE_URL: &str = "https://api.github.com";

/// Path segment escaping; `/` separates segments and is kept
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("Remote file not found: {0}")]
    NotFound(String),
    #[error("Access denied by the remote source (HTTP {0}); check the access token")]
    Auth(u16),
    #[error("A repository access token is required to download an archive")]
    MissingToken,
    #[error(
        "Archive download was redirected to {location:?}, which cannot be followed with the token attached. \
         Download the archive manually or attach individual files instead."
    )]
    ArchiveRedirectBlocked { location: Option<String> },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Remote source returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
}

/// owner/repository/branch/path of one remote file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRef {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    #[serde(default)]
    pub path: String,
}

impl RemoteRef {
    pub fn file_name(&self) -> &str {
        self.path
            .rsplit('/')
            .find(|s| !s.is_empty())
            .unwrap_or(self.repo.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
    pub url: String,
}

#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Raw bytes of one file, no credentials
    async fn fetch_file(&self, reference: &RemoteRef) -> Result<RemoteFile, RemoteError>;

    /// Zip archive of a whole branch, authenticated with `token`
    async fn fetch_archive(
        &self,
        reference: &RemoteRef,
        token: Option<&str>,
    ) -> Result<RemoteFile, RemoteError>;
}

pub struct GitHubSource {
    client: Client,
    raw_base: String,
    api_base: String,
}

impl GitHubSource {
    pub fn new() -> Result<Self, RemoteError> {
        Self::with_base_urls(RAW_BASE_URL, API_BASE_URL)
    }

    pub fn with_base_urls(
        raw_base: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .redirect(redirect::Policy::none())
            .user_agent(concat!("promptcraft/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            raw_base: raw_base.into(),
            api_base: api_base.into(),
        })
    }

    pub fn raw_url(&self, reference: &RemoteRef) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.raw_base,
            encode(&reference.owner),
            encode(&reference.repo),
            encode(&reference.branch),
            encode(reference.path.trim_start_matches('/'))
        )
    }

    pub fn archive_url(&self, reference: &RemoteRef) -> String {
        format!(
            "{}/repos/{}/{}/zipball/{}",
            self.api_base,
            encode(&reference.owner),
            encode(&reference.repo),
            encode(&reference.branch)
        )
    }
}

fn encode(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

fn network_error(e: &reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Network(format!("Request timeout: {e}"))
    } else {
        RemoteError::Network(e.to_string())
    }
}

async fn read_body(
    response: reqwest::Response,
    url: String,
    name: String,
) -> Result<RemoteFile, RemoteError> {
    let mime_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
    let bytes = response.bytes().await.map_err(|e| network_error(&e))?;
    Ok(RemoteFile {
        name,
        mime_type,
        bytes: bytes.to_vec(),
        url,
    })
}

/// Map a non-success status to the error taxonomy
pub fn status_error(status: StatusCode, location: Option<String>, url: &str, body: &str) -> RemoteError {
    match status.as_u16() {
        300..=399 => RemoteError::ArchiveRedirectBlocked { location },
        401 | 403 => RemoteError::Auth(status.as_u16()),
        404 => RemoteError::NotFound(url.to_string()),
        code => RemoteError::Http {
            status: code,
            message: body.chars().take(200).collect(),
        },
    }
}

#[async_trait]
impl RemoteSource for GitHubSource {
    async fn fetch_file(&self, reference: &RemoteRef) -> Result<RemoteFile, RemoteError> {
        let url = self.raw_url(reference);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| network_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Raw content never redirects legitimately; treat it as missing
            return Err(match status_error(status, None, &url, &body) {
                RemoteError::ArchiveRedirectBlocked { .. } => RemoteError::NotFound(url),
                other => other,
            });
        }

        tracing::debug!(url = %url, "Fetched remote file");
        let name = reference.file_name().to_string();
        read_body(response, url, name).await
    }

    async fn fetch_archive(
        &self,
        reference: &RemoteRef,
        token: Option<&str>,
    ) -> Result<RemoteFile, RemoteError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(RemoteError::MissingToken)?;
        let url = self.archive_url(reference);

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| network_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response.text().await.unwrap_or_default();
            let error = status_error(status, location, &url, &body);
            tracing::warn!(url = %url, status = status.as_u16(), error = %error, "Archive download failed");
            return Err(error);
        }

        let name = format!("{}-{}.zip", reference.repo, reference.branch);
        read_body(response, url, name).await
    }
}
