//! Channel platform client
//!
//! The scraper only talks to [`ChannelClient`]. The production implementation
//! goes through an HTTP/JSON gateway in front of the messaging platform's user
//! API, pacing every request through a token bucket.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter as GovRateLimiter};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::config::PlatformConfig;
use crate::error::ChannelError;

// Used when flood control does not say how long to wait
const DEFAULT_FLOOD_WAIT_SECS: u64 = 30;

/// Resolved channel handle
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelHandle {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
}

impl ChannelHandle {
    /// Name used when reporting errors about this channel.
    pub fn label(&self) -> String {
        self.title.clone().unwrap_or_else(|| self.id.to_string())
    }
}

/// A message as returned by one history page
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChannelMessage {
    pub id: i64,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub text: Option<String>,
    /// Any attachment at all
    #[serde(default)]
    pub has_media: bool,
    /// Attachment is a photo that can be downloaded
    #[serde(default)]
    pub has_photo: bool,
    #[serde(default)]
    pub views: Option<i32>,
    #[serde(default)]
    pub forwards: Option<i32>,
}

#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// Resolve a public channel name to a handle.
    async fn resolve(&self, channel: &str) -> Result<ChannelHandle, ChannelError>;

    /// Fetch up to `limit` messages strictly older than `offset_id`, newest first.
    /// An `offset_id` of 0 starts from the most recent message.
    async fn history(
        &self,
        handle: &ChannelHandle,
        offset_id: i64,
        limit: usize,
    ) -> Result<Vec<ChannelMessage>, ChannelError>;

    /// Download the photo attached to a message into `dest`.
    async fn download_photo(
        &self,
        handle: &ChannelHandle,
        message: &ChannelMessage,
        dest: &Path,
    ) -> Result<(), ChannelError>;
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    messages: Vec<ChannelMessage>,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    authorized: bool,
}

#[derive(Debug, Deserialize)]
struct FloodBody {
    retry_after: Option<u64>,
}

/// Gateway-backed client
pub struct HttpChannelClient {
    client: Client,
    rate_limiter: GovRateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
    api_base: String,
    api_id: String,
    api_hash: String,
    phone_number: String,
    session_name: String,
}

impl HttpChannelClient {
    pub fn new(config: &PlatformConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .gzip(true)
            .user_agent("channel-ingest/0.1")
            .build()?;

        let per_second = NonZeroU32::new(config.requests_per_second)
            .ok_or_else(|| anyhow::anyhow!("platform.requests_per_second must be positive"))?;
        let rate_limiter = GovRateLimiter::direct(Quota::per_second(per_second));

        Ok(Self {
            client,
            rate_limiter,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_id: config.api_id.clone(),
            api_hash: config.api_hash.clone(),
            phone_number: config.phone_number.clone(),
            session_name: config.session_name.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_base, path))
            .header("X-Api-Id", &self.api_id)
            .header("X-Api-Hash", &self.api_hash)
            .header("X-Session", &self.session_name)
    }

    /// Send a paced request. `channel` names the target in `Inaccessible` errors.
    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        channel: &str,
    ) -> Result<Response, ChannelError> {
        self.rate_limiter.until_ready().await;
        let response = builder.send().await?;
        check_status(response, channel).await
    }

    /// Whether the stored session is already signed in.
    pub async fn is_authorized(&self) -> Result<bool, ChannelError> {
        let response = self
            .send(self.request(reqwest::Method::GET, "/session"), &self.session_name)
            .await?;
        let body: SessionResponse = response.json().await?;
        Ok(body.authorized)
    }

    /// Ask the platform to send a login code to the configured phone number.
    pub async fn send_code_request(&self) -> Result<(), ChannelError> {
        let body = serde_json::json!({ "phone_number": self.phone_number });
        let builder = self.request(reqwest::Method::POST, "/session/code").json(&body);
        self.send(builder, &self.session_name).await?;
        Ok(())
    }

    pub async fn sign_in(&self, code: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({ "phone_number": self.phone_number, "code": code });
        let builder = self.request(reqwest::Method::POST, "/session/sign-in").json(&body);
        self.send(builder, &self.session_name).await?;
        Ok(())
    }
}

#[async_trait]
impl ChannelClient for HttpChannelClient {
    async fn resolve(&self, channel: &str) -> Result<ChannelHandle, ChannelError> {
        let path = format!("/channels/{}", urlencoding::encode(channel));
        debug!("Resolving channel {}", channel);

        let response = self
            .send(self.request(reqwest::Method::GET, &path), channel)
            .await?;
        Ok(response.json().await?)
    }

    async fn history(
        &self,
        handle: &ChannelHandle,
        offset_id: i64,
        limit: usize,
    ) -> Result<Vec<ChannelMessage>, ChannelError> {
        let path = format!(
            "/channels/{}/history?offset_id={}&limit={}",
            handle.id, offset_id, limit
        );
        debug!("Fetching history page: {}", path);

        let response = self
            .send(self.request(reqwest::Method::GET, &path), &handle.label())
            .await?;
        let page: HistoryResponse = response.json().await?;
        Ok(page.messages)
    }

    async fn download_photo(
        &self,
        handle: &ChannelHandle,
        message: &ChannelMessage,
        dest: &Path,
    ) -> Result<(), ChannelError> {
        let path = format!("/channels/{}/messages/{}/photo", handle.id, message.id);
        let response = self
            .send(self.request(reqwest::Method::GET, &path), &handle.label())
            .await?;
        let bytes = response.bytes().await?;

        let io_err =
            |e: std::io::Error| ChannelError::Transient(format!("{}: {}", dest.display(), e));
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let mut file = fs::File::create(dest).await.map_err(io_err)?;
        file.write_all(&bytes).await.map_err(io_err)?;

        Ok(())
    }
}

/// Map a gateway response status onto the error taxonomy.
async fn check_status(response: Response, channel: &str) -> Result<Response, ChannelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Err(ChannelError::Inaccessible {
            channel: channel.to_string(),
            reason: status.to_string(),
        }),
        StatusCode::TOO_MANY_REQUESTS => Err(ChannelError::FloodWait(flood_wait(response).await)),
        s if s.as_u16() == 420 => Err(ChannelError::FloodWait(flood_wait(response).await)),
        s => Err(ChannelError::Transient(format!("gateway returned {}", s))),
    }
}

async fn flood_wait(response: Response) -> Duration {
    let header = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let secs = match header {
        Some(secs) => secs,
        None => response
            .json::<FloodBody>()
            .await
            .ok()
            .and_then(|b| b.retry_after)
            .unwrap_or(DEFAULT_FLOOD_WAIT_SECS),
    };

    Duration::from_secs(secs)
}
