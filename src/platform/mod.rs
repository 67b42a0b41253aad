//! Chat-platform REST client.
//!
//! The scanner consumes the platform through the [`PlatformService`] trait so
//! tests can substitute a recording fake; [`RestClient`] is the production
//! implementation. A missing resource surfaces as [`PlatformError::NotFound`],
//! which callers treat differently from transient failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use std::fmt;
use thiserror::Error;
use tracing::warn;

use crate::platform::model::{ChannelInfo, Message, ThreadListing, UserRef};

pub mod model;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("not found")]
    NotFound,
    #[error("platform API error {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("platform transport error: {0}")]
    Http(#[from] reqwest::Error),
}

impl PlatformError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound)
    }
}

pub type PlatformResult<T> = Result<T, PlatformError>;

/// The five platform operations the crawler depends on.
#[async_trait]
pub trait PlatformService: Send + Sync {
    /// All channels of a guild.
    async fn guild_channels(&self, guild_id: &str) -> PlatformResult<Vec<ChannelInfo>>;

    /// Threads the platform currently lists as live for a channel.
    async fn list_active_threads(&self, channel_id: &str) -> PlatformResult<ThreadListing>;

    /// One page of archived threads, newest first, strictly before `before`.
    async fn list_archived_threads(
        &self,
        channel_id: &str,
        before: Option<DateTime<Utc>>,
        limit: u8,
    ) -> PlatformResult<ThreadListing>;

    /// A single message of a channel (threads: first message id == thread id).
    async fn fetch_message(&self, channel_id: &str, message_id: &str) -> PlatformResult<Message>;

    /// Users who reacted with one emoji to a message.
    async fn fetch_reaction_users(
        &self,
        channel_id: &str,
        message_id: &str,
        emoji: &str,
        limit: u8,
    ) -> PlatformResult<Vec<UserRef>>;
}

#[derive(Clone)]
pub struct RestClient {
    http: Client,
    base_url: String,
    token: String,
}

impl fmt::Debug for RestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RestClient {
    pub fn new(token: String, api_base: String) -> Self {
        let http = Client::builder()
            .user_agent("forum-indexer/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: api_base.trim_end_matches('/').to_string(),
            token,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> PlatformResult<T> {
        let url = format!("{}/{}", self.base_url, path);
        let res = self
            .http
            .get(&url)
            .header("Authorization", format!("Bot {}", self.token))
            .query(query)
            .send()
            .await?;

        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Err(PlatformError::NotFound);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!(%url, "rate limited by platform: {}", body);
            return Err(PlatformError::Api { status, body });
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%url, %status, "platform API error: {}", body);
            return Err(PlatformError::Api { status, body });
        }

        Ok(res.json::<T>().await?)
    }
}

#[async_trait]
impl PlatformService for RestClient {
    async fn guild_channels(&self, guild_id: &str) -> PlatformResult<Vec<ChannelInfo>> {
        self.get_json(&format!("guilds/{guild_id}/channels"), &[]).await
    }

    async fn list_active_threads(&self, channel_id: &str) -> PlatformResult<ThreadListing> {
        self.get_json(&format!("channels/{channel_id}/threads/active"), &[])
            .await
    }

    async fn list_archived_threads(
        &self,
        channel_id: &str,
        before: Option<DateTime<Utc>>,
        limit: u8,
    ) -> PlatformResult<ThreadListing> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(before) = before {
            query.push(("before", before.to_rfc3339()));
        }
        self.get_json(
            &format!("channels/{channel_id}/threads/archived/public"),
            &query,
        )
        .await
    }

    async fn fetch_message(&self, channel_id: &str, message_id: &str) -> PlatformResult<Message> {
        self.get_json(&format!("channels/{channel_id}/messages/{message_id}"), &[])
            .await
    }

    async fn fetch_reaction_users(
        &self,
        channel_id: &str,
        message_id: &str,
        emoji: &str,
        limit: u8,
    ) -> PlatformResult<Vec<UserRef>> {
        self.get_json(
            &format!("channels/{channel_id}/messages/{message_id}/reactions/{emoji}"),
            &[("limit", limit.to_string())],
        )
        .await
    }
}
