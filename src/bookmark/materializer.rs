// Copy Materializer — creates and destroys private copies through the
// message store. It never decides whether a copy should exist; the
// orchestrator does that from the ledger.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::discord::models::{Embed, Message};
use crate::discord::MessageApi;

use super::error::{with_timeout, BookmarkError};
use super::event::Glyphs;
use super::link::MessageLink;
use super::render::{self, AttachmentNumbering, RenderOptions};

/// How far back the DM channel is scanned for self-describing copies.
const DM_SCAN_LIMIT: u8 = 100;

/// A delivered copy in a user's DM channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateCopy {
    pub copy_channel_id: String,
    pub copy_message_id: String,
    /// The embed as posted
    pub rendered: Embed,
    /// Preview image first, then listed attachments
    pub attachment_refs: Vec<String>,
    pub source_link: MessageLink,
}

impl PrivateCopy {
    fn new(copy_channel_id: String, copy_message_id: String, rendered: Embed, source_link: MessageLink) -> Self {
        let attachment_refs = render::attachment_urls(&rendered);
        Self {
            copy_channel_id,
            copy_message_id,
            rendered,
            attachment_refs,
            source_link,
        }
    }
}

pub struct CopyMaterializer {
    api: Arc<dyn MessageApi>,
    bot_user_id: String,
    glyphs: Glyphs,
    options: RenderOptions,
    timeout: Duration,
}

impl CopyMaterializer {
    pub fn new(
        api: Arc<dyn MessageApi>,
        bot_user_id: impl Into<String>,
        glyphs: Glyphs,
        numbering: AttachmentNumbering,
        timeout: Duration,
    ) -> Self {
        let options = RenderOptions {
            delete_glyph: glyphs.delete.clone(),
            numbering,
        };
        Self {
            api,
            bot_user_id: bot_user_id.into(),
            glyphs,
            options,
            timeout,
        }
    }

    pub fn render(&self, message: &Message, guild_name: &str, link: &MessageLink) -> Embed {
        render::render(message, guild_name, link, &self.options)
    }

    /// Post the rendered copy to the user's DMs. The copy carries no delete
    /// glyph yet: callers record it first, then `mark_removable` it, so a
    /// delete reaction can never reach a copy the ledger does not know.
    pub async fn deliver(
        &self,
        user_id: &str,
        embed: &Embed,
        source_link: &MessageLink,
    ) -> Result<PrivateCopy, BookmarkError> {
        let channel_id = with_timeout(
            self.timeout,
            "open_private_channel",
            self.api.open_private_channel(user_id),
        )
        .await?;
        let sent = with_timeout(
            self.timeout,
            "send_embed",
            self.api.send_embed(&channel_id, embed),
        )
        .await?;

        debug!(user_id, copy_message_id = %sent.id, "Delivered private copy");
        Ok(PrivateCopy::new(channel_id, sent.id, embed.clone(), source_link.clone()))
    }

    /// Add the delete glyph to a delivered copy. A failed reaction leaves the
    /// copy in place.
    pub async fn mark_removable(&self, user_id: &str, copy: &PrivateCopy) {
        if let Err(e) = with_timeout(
            self.timeout,
            "add_reaction",
            self.api
                .add_reaction(&copy.copy_channel_id, &copy.copy_message_id, &self.glyphs.delete),
        )
        .await
        {
            warn!(user_id, copy_message_id = %copy.copy_message_id, error = %e, "Failed to add delete glyph to copy");
        }
    }

    /// Delete a private copy. An already-deleted copy counts as success.
    pub async fn retract(&self, copy_channel_id: &str, copy_message_id: &str) -> Result<(), BookmarkError> {
        with_timeout(
            self.timeout,
            "delete_message",
            self.api.delete_message(copy_channel_id, copy_message_id),
        )
        .await
    }

    /// Take the user's bookmark glyph off the origin message.
    pub async fn unmark_origin(
        &self,
        origin_channel_id: &str,
        origin_message_id: &str,
        user_id: &str,
    ) -> Result<(), BookmarkError> {
        with_timeout(
            self.timeout,
            "remove_reaction",
            self.api.remove_reaction(
                origin_channel_id,
                origin_message_id,
                &self.glyphs.bookmark,
                user_id,
            ),
        )
        .await
    }

    /// Read the origin link out of a delivered copy. `None` once the copy is
    /// gone. Messages the bot did not author are not copies.
    pub async fn source_of_copy(
        &self,
        copy_channel_id: &str,
        copy_message_id: &str,
    ) -> Result<Option<MessageLink>, BookmarkError> {
        let copy = with_timeout(
            self.timeout,
            "fetch_message",
            self.api.fetch_message(copy_channel_id, copy_message_id),
        )
        .await?;
        let Some(copy) = copy else {
            return Ok(None);
        };
        if copy.author.id != self.bot_user_id {
            return Err(BookmarkError::MalformedInput(format!(
                "message {copy_message_id} was not sent by the bot"
            )));
        }
        Ok(Some(render::source_link_of(&copy)?))
    }

    /// Find the self-describing copies of `source` among the user's recent
    /// DMs.
    pub async fn find_copies(&self, user_id: &str, source: &MessageLink) -> Result<Vec<PrivateCopy>, BookmarkError> {
        let channel_id = with_timeout(
            self.timeout,
            "open_private_channel",
            self.api.open_private_channel(user_id),
        )
        .await?;
        let recent = with_timeout(
            self.timeout,
            "fetch_recent_messages",
            self.api.fetch_recent_messages(&channel_id, DM_SCAN_LIMIT),
        )
        .await?;

        Ok(recent
            .into_iter()
            .filter(|m| m.author.id == self.bot_user_id)
            .filter_map(|m| {
                let embed = m
                    .embeds
                    .into_iter()
                    .find(|e| render::source_link(e).is_ok_and(|link| &link == source))?;
                Some(PrivateCopy::new(channel_id.clone(), m.id, embed, source.clone()))
            })
            .collect())
    }
}
