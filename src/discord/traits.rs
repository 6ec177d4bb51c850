// Message store API — what the bookmark engine needs from Discord.
//
// DiscordClient implements it over REST; InMemoryDiscord implements it for
// tests. Deleting an already-deleted message and removing an absent reaction
// both succeed; fetching one yields `None`.

use anyhow::Result;
use async_trait::async_trait;

use super::models::{Channel, Embed, Message, User};

#[async_trait]
pub trait MessageApi: Send + Sync {
    /// The bot's own account.
    async fn current_user(&self) -> Result<User>;

    /// `None` when the message does not exist (or no longer does).
    async fn fetch_message(&self, channel_id: &str, message_id: &str) -> Result<Option<Message>>;

    /// Channel kind and owning guild.
    async fn fetch_channel(&self, channel_id: &str) -> Result<Channel>;

    async fn fetch_guild_name(&self, guild_id: &str) -> Result<String>;

    /// Open (or reuse) the DM channel with a user and return its id.
    async fn open_private_channel(&self, user_id: &str) -> Result<String>;

    /// Post an embed-only message and return it.
    async fn send_embed(&self, channel_id: &str, embed: &Embed) -> Result<Message>;

    /// Most recent messages of a channel, newest first.
    async fn fetch_recent_messages(&self, channel_id: &str, limit: u8) -> Result<Vec<Message>>;

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<()>;

    /// React as the bot.
    async fn add_reaction(&self, channel_id: &str, message_id: &str, emoji: &str) -> Result<()>;

    /// Remove another user's reaction.
    async fn remove_reaction(
        &self,
        channel_id: &str,
        message_id: &str,
        emoji: &str,
        user_id: &str,
    ) -> Result<()>;
}
