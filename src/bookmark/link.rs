// Message link codec — `https://discord.com/channels/{guild}/{channel}/{message}`.
//
// The link is the human-facing jump link on every copy and, for
// self-describing copies, the only record of which message a copy came from.
// Decoding is strict: anything but exactly three snowflake path segments
// under /channels on a Discord host is rejected.

use std::fmt;
use std::str::FromStr;

use reqwest::Url;
use thiserror::Error;

/// Base of every encoded link.
pub const LINK_BASE: &str = "https://discord.com/channels";

const ACCEPTED_HOSTS: &[&str] = &[
    "discord.com",
    "www.discord.com",
    "ptb.discord.com",
    "canary.discord.com",
    "discordapp.com",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("not a URL: {0}")]
    InvalidUrl(String),
    #[error("unexpected host in message link: {0}")]
    UnexpectedHost(String),
    #[error("expected /channels/<guild>/<channel>/<message>, got {0}")]
    UnexpectedPath(String),
    #[error("{field} is not a snowflake: {value:?}")]
    InvalidSnowflake { field: &'static str, value: String },
    #[error("no message link found")]
    Missing,
}

/// Location of one guild message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageLink {
    pub guild_id: String,
    pub channel_id: String,
    pub message_id: String,
}

impl MessageLink {
    pub fn new(
        guild_id: impl Into<String>,
        channel_id: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Self {
        Self {
            guild_id: guild_id.into(),
            channel_id: channel_id.into(),
            message_id: message_id.into(),
        }
    }

    pub fn url(&self) -> String {
        format!(
            "{LINK_BASE}/{}/{}/{}",
            self.guild_id, self.channel_id, self.message_id
        )
    }

    /// Markdown form used in the copy's Source field.
    pub fn markdown(&self, label: &str) -> String {
        format!("[{label}]({})", self.url())
    }

    /// Decode a bare link.
    pub fn parse(input: &str) -> Result<Self, LinkError> {
        let url = Url::parse(input.trim()).map_err(|_| LinkError::InvalidUrl(input.to_string()))?;

        if url.scheme() != "https" {
            return Err(LinkError::InvalidUrl(input.to_string()));
        }
        let host = url.host_str().unwrap_or_default();
        if !ACCEPTED_HOSTS.contains(&host) {
            return Err(LinkError::UnexpectedHost(host.to_string()));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(LinkError::UnexpectedPath(input.to_string()));
        }

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.collect())
            .unwrap_or_default();
        let ["channels", guild, channel, message] = segments.as_slice() else {
            return Err(LinkError::UnexpectedPath(url.path().to_string()));
        };

        Ok(Self {
            guild_id: snowflake("guild id", guild)?,
            channel_id: snowflake("channel id", channel)?,
            message_id: snowflake("message id", message)?,
        })
    }

    /// Decode the link out of a markdown `[label](url)` value.
    pub fn from_markdown(text: &str) -> Result<Self, LinkError> {
        let start = text.find("](").ok_or(LinkError::Missing)?;
        let rest = &text[start + 2..];
        let end = rest.find(')').ok_or(LinkError::Missing)?;
        Self::parse(&rest[..end])
    }
}

impl fmt::Display for MessageLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

impl FromStr for MessageLink {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn snowflake(field: &'static str, value: &str) -> Result<String, LinkError> {
    // Snowflakes are u64; leading zeros never occur in real ids
    let valid = !value.is_empty()
        && value.bytes().all(|b| b.is_ascii_digit())
        && !value.starts_with('0')
        && value.parse::<u64>().is_ok();
    if valid {
        Ok(value.to_string())
    } else {
        Err(LinkError::InvalidSnowflake {
            field,
            value: value.to_string(),
        })
    }
}
