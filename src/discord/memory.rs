// In-memory message store — a MessageApi backed by process memory.
//
// Used by the orchestrator tests and the integration scenarios. Individual
// operations can be made to fail or to stall, and every call is recorded.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::models::{Attachment, Channel, Embed, Message, User, CHANNEL_TYPE_DM};
use super::traits::MessageApi;

const GUILD_TEXT: u8 = 0;

/// Build a plain (non-bot) user.
pub fn user(id: &str, name: &str) -> User {
    User {
        id: id.to_string(),
        username: name.to_string(),
        global_name: None,
        avatar: None,
        bot: false,
    }
}

#[derive(Default)]
struct State {
    messages: HashMap<(String, String), Message>,
    channels: HashMap<String, Channel>,
    guilds: HashMap<String, String>,
    dm_channels: HashMap<String, String>,
    // (channel, message, emoji, user)
    reactions: HashSet<(String, String, String, String)>,
    failing: HashSet<&'static str>,
    delays: HashMap<&'static str, Duration>,
    calls: Vec<String>,
    next_id: u64,
}

impl State {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }
}

pub struct InMemoryDiscord {
    bot: User,
    state: Mutex<State>,
}

impl InMemoryDiscord {
    pub fn new(bot_id: &str) -> Self {
        let mut bot = user(bot_id, "dogear");
        bot.bot = true;
        Self {
            bot,
            state: Mutex::new(State {
                next_id: 900_000,
                ..Default::default()
            }),
        }
    }

    pub fn bot(&self) -> &User {
        &self.bot
    }

    pub fn add_guild(&self, guild_id: &str, name: &str) {
        self.state
            .lock()
            .guilds
            .insert(guild_id.to_string(), name.to_string());
    }

    pub fn add_guild_channel(&self, guild_id: &str, channel_id: &str) {
        self.state.lock().channels.insert(
            channel_id.to_string(),
            Channel {
                id: channel_id.to_string(),
                kind: GUILD_TEXT,
                guild_id: Some(guild_id.to_string()),
            },
        );
    }

    /// Store a message authored by `author` with a fixed id.
    pub fn post(
        &self,
        channel_id: &str,
        message_id: &str,
        author: User,
        content: &str,
        attachments: Vec<Attachment>,
    ) -> Message {
        let message = Message {
            id: message_id.to_string(),
            channel_id: channel_id.to_string(),
            content: content.to_string(),
            author,
            attachments,
            embeds: Vec::new(),
            timestamp: Utc::now(),
        };
        self.state.lock().messages.insert(
            (channel_id.to_string(), message_id.to_string()),
            message.clone(),
        );
        message
    }

    pub fn message(&self, channel_id: &str, message_id: &str) -> Option<Message> {
        self.state
            .lock()
            .messages
            .get(&(channel_id.to_string(), message_id.to_string()))
            .cloned()
    }

    /// Messages of a channel, oldest first.
    pub fn messages_in(&self, channel_id: &str) -> Vec<Message> {
        let state = self.state.lock();
        let mut messages: Vec<Message> = state
            .messages
            .values()
            .filter(|m| m.channel_id == channel_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.id.parse::<u64>().unwrap_or(0));
        messages
    }

    pub fn dm_channel_of(&self, user_id: &str) -> Option<String> {
        self.state.lock().dm_channels.get(user_id).cloned()
    }

    /// Record a reaction made by `user_id` (the feed side of a reaction).
    pub fn react(&self, channel_id: &str, message_id: &str, emoji: &str, user_id: &str) {
        self.state.lock().reactions.insert((
            channel_id.to_string(),
            message_id.to_string(),
            emoji.to_string(),
            user_id.to_string(),
        ));
    }

    pub fn has_reaction(&self, channel_id: &str, message_id: &str, emoji: &str, user_id: &str) -> bool {
        self.state.lock().reactions.contains(&(
            channel_id.to_string(),
            message_id.to_string(),
            emoji.to_string(),
            user_id.to_string(),
        ))
    }

    /// Make every later call of `operation` fail until `recover`.
    pub fn fail(&self, operation: &'static str) {
        self.state.lock().failing.insert(operation);
    }

    pub fn recover(&self, operation: &'static str) {
        self.state.lock().failing.remove(operation);
    }

    /// Stall every later call of `operation` for `delay`.
    pub fn delay(&self, operation: &'static str, delay: Duration) {
        self.state.lock().delays.insert(operation, delay);
    }

    /// Operation names in call order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.as_str() == operation)
            .count()
    }

    /// Record the call, apply any configured stall, then check for a forced
    /// failure. The lock is released before sleeping.
    async fn enter(&self, operation: &'static str) -> Result<()> {
        let delay = {
            let mut state = self.state.lock();
            state.calls.push(operation.to_string());
            state.delays.get(operation).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.state.lock().failing.contains(operation) {
            bail!("{operation}: simulated failure");
        }
        Ok(())
    }
}

#[async_trait]
impl MessageApi for InMemoryDiscord {
    async fn current_user(&self) -> Result<User> {
        self.enter("current_user").await?;
        Ok(self.bot.clone())
    }

    async fn fetch_message(&self, channel_id: &str, message_id: &str) -> Result<Option<Message>> {
        self.enter("fetch_message").await?;
        Ok(self.message(channel_id, message_id))
    }

    async fn fetch_channel(&self, channel_id: &str) -> Result<Channel> {
        self.enter("fetch_channel").await?;
        match self.state.lock().channels.get(channel_id) {
            Some(channel) => Ok(channel.clone()),
            None => bail!("channel {channel_id} not found"),
        }
    }

    async fn fetch_guild_name(&self, guild_id: &str) -> Result<String> {
        self.enter("fetch_guild_name").await?;
        match self.state.lock().guilds.get(guild_id) {
            Some(name) => Ok(name.clone()),
            None => bail!("guild {guild_id} not found"),
        }
    }

    async fn open_private_channel(&self, user_id: &str) -> Result<String> {
        self.enter("open_private_channel").await?;
        let mut state = self.state.lock();
        if let Some(id) = state.dm_channels.get(user_id) {
            return Ok(id.clone());
        }
        let id = state.allocate_id();
        state.channels.insert(
            id.clone(),
            Channel {
                id: id.clone(),
                kind: CHANNEL_TYPE_DM,
                guild_id: None,
            },
        );
        state.dm_channels.insert(user_id.to_string(), id.clone());
        Ok(id)
    }

    async fn send_embed(&self, channel_id: &str, embed: &Embed) -> Result<Message> {
        self.enter("send_embed").await?;
        let mut state = self.state.lock();
        if !state.channels.contains_key(channel_id) {
            bail!("channel {channel_id} not found");
        }
        let message = Message {
            id: state.allocate_id(),
            channel_id: channel_id.to_string(),
            content: String::new(),
            author: self.bot.clone(),
            attachments: Vec::new(),
            embeds: vec![embed.clone()],
            timestamp: Utc::now(),
        };
        state.messages.insert(
            (channel_id.to_string(), message.id.clone()),
            message.clone(),
        );
        Ok(message)
    }

    async fn fetch_recent_messages(&self, channel_id: &str, limit: u8) -> Result<Vec<Message>> {
        self.enter("fetch_recent_messages").await?;
        let mut messages = self.messages_in(channel_id);
        messages.reverse();
        messages.truncate(usize::from(limit));
        Ok(messages)
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<()> {
        self.enter("delete_message").await?;
        let mut state = self.state.lock();
        state
            .messages
            .remove(&(channel_id.to_string(), message_id.to_string()));
        state
            .reactions
            .retain(|(c, m, _, _)| !(c == channel_id && m == message_id));
        Ok(())
    }

    async fn add_reaction(&self, channel_id: &str, message_id: &str, emoji: &str) -> Result<()> {
        self.enter("add_reaction").await?;
        let bot_id = self.bot.id.clone();
        let mut state = self.state.lock();
        if !state
            .messages
            .contains_key(&(channel_id.to_string(), message_id.to_string()))
        {
            bail!("message {channel_id}/{message_id} not found");
        }
        state.reactions.insert((
            channel_id.to_string(),
            message_id.to_string(),
            emoji.to_string(),
            bot_id,
        ));
        Ok(())
    }

    async fn remove_reaction(
        &self,
        channel_id: &str,
        message_id: &str,
        emoji: &str,
        user_id: &str,
    ) -> Result<()> {
        self.enter("remove_reaction").await?;
        self.state.lock().reactions.remove(&(
            channel_id.to_string(),
            message_id.to_string(),
            emoji.to_string(),
            user_id.to_string(),
        ));
        Ok(())
    }
}
