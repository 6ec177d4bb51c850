// Discord REST client — bot-authenticated calls against API v10.
//
// A thin reqwest wrapper with one generic request helper. Every request
// carries the configured timeout. No retries: rate limits and failures
// surface as errors.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::models::{Channel, Embed, Guild, Message, User};
use super::traits::MessageApi;

/// Default REST endpoint.
pub const DEFAULT_API_URL: &str = "https://discord.com/api/v10";

pub struct DiscordClient {
    client: reqwest::Client,
    base_url: Url,
}

impl DiscordClient {
    /// Create a client authenticated with a bot token.
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let mut auth = HeaderValue::from_str(&format!("Bot {token}"))
            .context("DISCORD_TOKEN contains characters not allowed in a header")?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .user_agent(concat!("DiscordBot (dogear, ", env!("CARGO_PKG_VERSION"), ")"))
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .with_context(|| format!("Invalid Discord API URL: {base_url}"))?;

        Ok(Self { client, base_url })
    }

    /// Build an endpoint URL from raw path segments. Segments are
    /// percent-encoded, which is what reaction emoji in paths need.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Discord API URL cannot be a base: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let url = self.endpoint(segments)?;
        let route = segments.first().copied().unwrap_or_default();
        debug!(method = %method, path = url.path(), "Discord API request");

        let mut request = self.client.request(method.clone(), url).query(query);
        if let Some(body) = body {
            request = request.json(&body);
        } else if method == Method::PUT {
            // Discord wants an explicit zero length on empty PUTs
            request = request.header(reqwest::header::CONTENT_LENGTH, 0);
        }

        request
            .send()
            .await
            .with_context(|| format!("Discord {method} /{route} request failed"))
    }

    /// Make a request and deserialize the JSON response.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let response = self.send(method.clone(), segments, query, body).await?;
        decode(&method, segments, response).await
    }

    /// Like `request`, but a 404 is `None` rather than an error.
    async fn request_optional<T: DeserializeOwned>(&self, method: Method, segments: &[&str]) -> Result<Option<T>> {
        let response = self.send(method.clone(), segments, &[], None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode(&method, segments, response).await.map(Some)
    }

    /// Make a request whose response body is irrelevant. 404 counts as
    /// success: the thing being deleted is already gone.
    async fn request_idempotent(&self, method: Method, segments: &[&str]) -> Result<()> {
        let response = self.send(method.clone(), segments, &[], None).await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Discord {method} {} returned {status}: {body}", segments.join("/"))
    }
}

async fn decode<T: DeserializeOwned>(method: &Method, segments: &[&str], response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Discord {method} {} returned {status}: {body}", segments.join("/"));
    }
    response
        .json::<T>()
        .await
        .with_context(|| format!("Failed to deserialize Discord {}", segments.join("/")))
}

#[derive(Serialize)]
struct CreateDm<'a> {
    recipient_id: &'a str,
}

#[derive(Serialize)]
struct CreateMessage<'a> {
    embeds: [&'a Embed; 1],
}

#[derive(Deserialize)]
struct DmChannel {
    id: String,
}

#[async_trait]
impl MessageApi for DiscordClient {
    async fn current_user(&self) -> Result<User> {
        self.request(Method::GET, &["users", "@me"], &[], None).await
    }

    async fn fetch_message(&self, channel_id: &str, message_id: &str) -> Result<Option<Message>> {
        self.request_optional(Method::GET, &["channels", channel_id, "messages", message_id])
            .await
    }

    async fn fetch_channel(&self, channel_id: &str) -> Result<Channel> {
        self.request(Method::GET, &["channels", channel_id], &[], None)
            .await
    }

    async fn fetch_guild_name(&self, guild_id: &str) -> Result<String> {
        let guild: Guild = self
            .request(Method::GET, &["guilds", guild_id], &[], None)
            .await?;
        Ok(guild.name)
    }

    async fn open_private_channel(&self, user_id: &str) -> Result<String> {
        let body = serde_json::to_value(CreateDm {
            recipient_id: user_id,
        })?;
        let channel: DmChannel = self
            .request(Method::POST, &["users", "@me", "channels"], &[], Some(body))
            .await?;
        Ok(channel.id)
    }

    async fn send_embed(&self, channel_id: &str, embed: &Embed) -> Result<Message> {
        let body = serde_json::to_value(CreateMessage { embeds: [embed] })?;
        self.request(
            Method::POST,
            &["channels", channel_id, "messages"],
            &[],
            Some(body),
        )
        .await
    }

    async fn fetch_recent_messages(&self, channel_id: &str, limit: u8) -> Result<Vec<Message>> {
        let limit = limit.clamp(1, 100).to_string();
        self.request(
            Method::GET,
            &["channels", channel_id, "messages"],
            &[("limit", limit.as_str())],
            None,
        )
        .await
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<()> {
        self.request_idempotent(
            Method::DELETE,
            &["channels", channel_id, "messages", message_id],
        )
        .await
    }

    async fn add_reaction(&self, channel_id: &str, message_id: &str, emoji: &str) -> Result<()> {
        let response = self
            .send(
                Method::PUT,
                &["channels", channel_id, "messages", message_id, "reactions", emoji, "@me"],
                &[],
                None,
            )
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Discord add reaction returned {status}: {body}");
        }
        Ok(())
    }

    async fn remove_reaction(
        &self,
        channel_id: &str,
        message_id: &str,
        emoji: &str,
        user_id: &str,
    ) -> Result<()> {
        self.request_idempotent(
            Method::DELETE,
            &["channels", channel_id, "messages", message_id, "reactions", emoji, user_id],
        )
        .await
    }
}
