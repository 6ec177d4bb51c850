// Reconciliation Orchestrator — drives one reaction event through the
// normalizer, the ledger and the materializer.
//
// The ledger is the source of truth. Ledger mutations commit before any
// side effect that depends on them; side effects after a committed mutation
// are best-effort and never undo it. The one exception is a failed delivery
// right after a reservation, which is rolled back so re-reacting retries.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashSet;
use tracing::{debug, info, warn};

use crate::db::models::{AddOutcome, BookmarkRecord, NewBookmark, RemoveOutcome};
use crate::db::Ledger;
use crate::discord::MessageApi;

use super::error::{with_timeout, BookmarkError};
use super::event::{normalize, Glyphs, Intent, ReactionEvent, Surface};
use super::link::MessageLink;
use super::materializer::CopyMaterializer;
use super::render::AttachmentNumbering;

/// How the copy → origin relationship is persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Strategy {
    /// The ledger stores each copy's id (two-phase add).
    #[default]
    Linked,
    /// The copy embeds its Source link; the ledger stores no copy id.
    SelfDescribing,
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linked" | "stateful" => Ok(Self::Linked),
            "self-describing" | "self_describing" | "stateless" => Ok(Self::SelfDescribing),
            other => Err(format!(
                "unknown strategy '{other}' (expected linked or self-describing)"
            )),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Linked => f.write_str("linked"),
            Strategy::SelfDescribing => f.write_str("self-describing"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub strategy: Strategy,
    pub glyphs: Glyphs,
    pub numbering: AttachmentNumbering,
    /// Bound on every message-store call
    pub api_timeout: Duration,
    /// Age after which an unfinalized reservation is considered abandoned
    pub reservation_ttl: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            glyphs: Glyphs::default(),
            numbering: AttachmentNumbering::default(),
            api_timeout: Duration::from_secs(10),
            reservation_ttl: Duration::from_secs(120),
        }
    }
}

/// How an event ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Not a bookmark event, or the origin message is gone
    Ignored,
    /// The same (user, message, intent) was already being processed
    Duplicate,
    Bookmarked,
    AlreadyBookmarked,
    Removed,
    /// Remove for a bookmark that does not exist
    NotBookmarked,
    /// The bookmark was removed while its copy was being delivered; the
    /// fresh copy was withdrawn
    Superseded,
}

type InFlightKey = (String, String, Intent);

/// Marks a (user, message, intent) as in progress until dropped.
struct InFlight<'a> {
    set: &'a DashSet<InFlightKey>,
    key: InFlightKey,
}

impl<'a> InFlight<'a> {
    fn acquire(set: &'a DashSet<InFlightKey>, key: InFlightKey) -> Option<Self> {
        set.insert(key.clone()).then(|| Self { set, key })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.key);
    }
}

pub struct Orchestrator {
    ledger: Arc<dyn Ledger>,
    api: Arc<dyn MessageApi>,
    materializer: CopyMaterializer,
    bot_user_id: String,
    settings: Settings,
    in_flight: DashSet<InFlightKey>,
}

impl Orchestrator {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        api: Arc<dyn MessageApi>,
        bot_user_id: impl Into<String>,
        settings: Settings,
    ) -> Self {
        let bot_user_id = bot_user_id.into();
        let materializer = CopyMaterializer::new(
            api.clone(),
            bot_user_id.clone(),
            settings.glyphs.clone(),
            settings.numbering,
            settings.api_timeout,
        );
        Self {
            ledger,
            api,
            materializer,
            bot_user_id,
            settings,
            in_flight: DashSet::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Process one reaction event to completion.
    pub async fn handle(&self, event: &ReactionEvent) -> Result<Outcome, BookmarkError> {
        let glyphs = &self.settings.glyphs;
        // Cheap rejection before any channel lookup
        if event.actor_id == self.bot_user_id
            || (event.emoji != glyphs.bookmark && event.emoji != glyphs.delete)
        {
            return Ok(Outcome::Ignored);
        }

        let (surface, guild_id) = match event.known_surface() {
            Some(surface) => (surface, event.guild_id.clone()),
            None => self.classify(&event.channel_id).await?,
        };

        let intent = normalize(event, surface, glyphs, &self.bot_user_id);
        if intent == Intent::Ignore {
            return Ok(Outcome::Ignored);
        }

        let key = (event.actor_id.clone(), event.message_id.clone(), intent);
        let Some(_guard) = InFlight::acquire(&self.in_flight, key) else {
            debug!(user_id = %event.actor_id, message_id = %event.message_id, %intent, "Duplicate event in flight");
            return Ok(Outcome::Duplicate);
        };

        match intent {
            Intent::AddInOrigin => {
                let Some(guild_id) = guild_id else {
                    return Err(BookmarkError::MalformedInput(format!(
                        "channel {} has no guild",
                        event.channel_id
                    )));
                };
                self.add_in_origin(event, &guild_id).await
            }
            Intent::RemoveViaCopy => self.remove_via_copy(event).await,
            Intent::RemoveInOrigin => self.remove_in_origin(event).await,
            Intent::Ignore => Ok(Outcome::Ignored),
        }
    }

    async fn classify(&self, channel_id: &str) -> Result<(Surface, Option<String>), BookmarkError> {
        let channel = with_timeout(
            self.settings.api_timeout,
            "fetch_channel",
            self.api.fetch_channel(channel_id),
        )
        .await?;
        if channel.is_private() {
            Ok((Surface::Private, None))
        } else {
            Ok((Surface::Origin, channel.guild_id))
        }
    }

    async fn add_in_origin(&self, event: &ReactionEvent, guild_id: &str) -> Result<Outcome, BookmarkError> {
        let timeout = self.settings.api_timeout;
        let user_id = event.actor_id.as_str();

        let message = with_timeout(
            timeout,
            "fetch_message",
            self.api.fetch_message(&event.channel_id, &event.message_id),
        )
        .await?;
        let Some(message) = message else {
            debug!(user_id, message_id = %event.message_id, "Origin message no longer exists");
            return Ok(Outcome::Ignored);
        };
        let guild_name = with_timeout(timeout, "fetch_guild_name", self.api.fetch_guild_name(guild_id)).await?;

        let link = MessageLink::new(guild_id, &event.channel_id, &event.message_id);
        let bookmark = NewBookmark {
            guild_id: guild_id.to_string(),
            channel_id: event.channel_id.clone(),
            user_id: user_id.to_string(),
            message_id: event.message_id.clone(),
            message_author_id: message.author.id.clone(),
            message_link: link.url(),
        };

        if self.reserve(&bookmark).await? == AddOutcome::AlreadyExists {
            debug!(user_id, message_id = %event.message_id, "Already bookmarked");
            return Ok(Outcome::AlreadyBookmarked);
        }

        let embed = self.materializer.render(&message, &guild_name, &link);
        let copy = match self.materializer.deliver(user_id, &embed, &link).await {
            Ok(copy) => copy,
            Err(e) => {
                // Roll back so the user can retry by reacting again
                self.ledger
                    .remove_by_user_and_message(user_id, &event.message_id)
                    .await
                    .map_err(|e| BookmarkError::ledger("rollback", e))?;
                return Err(e);
            }
        };

        let still_live = match self.settings.strategy {
            Strategy::Linked => self
                .ledger
                .attach_copy(user_id, &event.message_id, &copy.copy_channel_id, &copy.copy_message_id)
                .await
                .map_err(|e| BookmarkError::ledger("attach_copy", e))?,
            Strategy::SelfDescribing => self
                .ledger
                .get_bookmark(user_id, &event.message_id)
                .await
                .map_err(|e| BookmarkError::ledger("get_bookmark", e))?
                .is_some(),
        };

        if !still_live {
            info!(user_id, message_id = %event.message_id, "Bookmark removed during delivery, withdrawing copy");
            if let Err(e) = self.materializer.retract(&copy.copy_channel_id, &copy.copy_message_id).await {
                warn!(user_id, copy_message_id = %copy.copy_message_id, error = %e, "Failed to withdraw copy");
            }
            return Ok(Outcome::Superseded);
        }

        // Only now does a delete reaction on the copy resolve through the ledger
        self.materializer.mark_removable(user_id, &copy).await;

        info!(
            user_id,
            guild_id,
            message_id = %event.message_id,
            copy_message_id = %copy.copy_message_id,
            "Bookmarked"
        );
        Ok(Outcome::Bookmarked)
    }

    /// `try_add`, healing a linked reservation whose delivery was abandoned
    /// (e.g. the process died between reserve and finalize).
    async fn reserve(&self, bookmark: &NewBookmark) -> Result<AddOutcome, BookmarkError> {
        let outcome = self
            .ledger
            .try_add(bookmark)
            .await
            .map_err(|e| BookmarkError::ledger("try_add", e))?;
        if outcome == AddOutcome::Created || self.settings.strategy != Strategy::Linked {
            return Ok(outcome);
        }

        let ttl = chrono::Duration::from_std(self.settings.reservation_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(120));
        let cutoff = Utc::now() - ttl;
        let healed = self
            .ledger
            .remove_stale_reservation(&bookmark.user_id, &bookmark.message_id, cutoff)
            .await
            .map_err(|e| BookmarkError::ledger("remove_stale_reservation", e))?;
        if !healed.is_removed() {
            return Ok(AddOutcome::AlreadyExists);
        }

        info!(
            user_id = %bookmark.user_id,
            message_id = %bookmark.message_id,
            "Discarded stale reservation, retrying"
        );
        self.ledger
            .try_add(bookmark)
            .await
            .map_err(|e| BookmarkError::ledger("try_add", e))
    }

    async fn remove_via_copy(&self, event: &ReactionEvent) -> Result<Outcome, BookmarkError> {
        let user_id = event.actor_id.as_str();
        let copy_channel_id = event.channel_id.as_str();
        let copy_message_id = event.message_id.as_str();

        let linked = match self.settings.strategy {
            Strategy::Linked => self
                .ledger
                .remove_by_user_and_copy(user_id, copy_message_id)
                .await
                .map_err(|e| BookmarkError::ledger("remove_by_user_and_copy", e))?,
            Strategy::SelfDescribing => RemoveOutcome::NotFound,
        };
        let record = match linked {
            RemoveOutcome::Removed(record) => Some(record),
            RemoveOutcome::NotFound => self.remove_by_source(user_id, copy_channel_id, copy_message_id).await?,
        };

        let Some(record) = record else {
            debug!(user_id, copy_message_id, "No bookmark for copy");
            return Ok(Outcome::NotBookmarked);
        };

        // Unmark first: the copy is the user's only pointer to the origin
        if let Err(e) = self
            .materializer
            .unmark_origin(&record.channel_id, &record.message_id, user_id)
            .await
        {
            warn!(user_id, message_id = %record.message_id, error = %e, "Failed to remove bookmark glyph from origin");
        }
        if let Err(e) = self.materializer.retract(copy_channel_id, copy_message_id).await {
            warn!(user_id, copy_message_id, error = %e, "Failed to delete copy");
        }

        info!(user_id, message_id = %record.message_id, "Bookmark removed via copy");
        Ok(Outcome::Removed)
    }

    /// Resolve a copy through its Source link and remove the bookmark it
    /// names. Under `Linked` this only happens for a copy the ledger has not
    /// recorded yet, so only a reservation still waiting for its copy (or one
    /// already finalized with this copy) is removed. A copy that resolves to
    /// no such bookmark is a leftover and is deleted.
    async fn remove_by_source(
        &self,
        user_id: &str,
        copy_channel_id: &str,
        copy_message_id: &str,
    ) -> Result<Option<BookmarkRecord>, BookmarkError> {
        let Some(source) = self
            .materializer
            .source_of_copy(copy_channel_id, copy_message_id)
            .await?
        else {
            return Ok(None);
        };

        let owned = match self.settings.strategy {
            Strategy::SelfDescribing => true,
            Strategy::Linked => self
                .ledger
                .get_bookmark(user_id, &source.message_id)
                .await
                .map_err(|e| BookmarkError::ledger("get_bookmark", e))?
                .is_some_and(|r| r.is_pending() || r.copy_message_id.as_deref() == Some(copy_message_id)),
        };
        if owned {
            let outcome = self
                .ledger
                .remove_by_user_and_message(user_id, &source.message_id)
                .await
                .map_err(|e| BookmarkError::ledger("remove_by_user_and_message", e))?;
            if let RemoveOutcome::Removed(record) = outcome {
                return Ok(Some(record));
            }
        }

        debug!(user_id, copy_message_id, message_id = %source.message_id, "Deleting leftover copy");
        if let Err(e) = self.materializer.retract(copy_channel_id, copy_message_id).await {
            warn!(user_id, copy_message_id, error = %e, "Failed to delete leftover copy");
        }
        Ok(None)
    }

    async fn remove_in_origin(&self, event: &ReactionEvent) -> Result<Outcome, BookmarkError> {
        let user_id = event.actor_id.as_str();
        let outcome = self
            .ledger
            .remove_by_user_and_message(user_id, &event.message_id)
            .await
            .map_err(|e| BookmarkError::ledger("remove_by_user_and_message", e))?;

        let RemoveOutcome::Removed(record) = outcome else {
            debug!(user_id, message_id = %event.message_id, "No bookmark to remove");
            return Ok(Outcome::NotBookmarked);
        };

        self.retract_copies_of(&record).await;

        info!(user_id, message_id = %record.message_id, "Bookmark removed in origin");
        Ok(Outcome::Removed)
    }

    /// Delete whatever private copy belongs to a removed record. Failures are
    /// logged only.
    async fn retract_copies_of(&self, record: &BookmarkRecord) {
        let user_id = record.user_id.as_str();
        match self.settings.strategy {
            Strategy::Linked => {
                // A pending reservation has no copy yet; the add in flight
                // withdraws it when finalizing fails
                let (Some(channel_id), Some(message_id)) =
                    (&record.copy_channel_id, &record.copy_message_id)
                else {
                    return;
                };
                if let Err(e) = self.materializer.retract(channel_id, message_id).await {
                    warn!(user_id, copy_message_id = %message_id, error = %e, "Failed to delete copy");
                }
            }
            Strategy::SelfDescribing => {
                let source = MessageLink::new(&record.guild_id, &record.channel_id, &record.message_id);
                let copies = match self.materializer.find_copies(user_id, &source).await {
                    Ok(copies) => copies,
                    Err(e) => {
                        warn!(user_id, message_id = %record.message_id, error = %e, "Failed to look up copies");
                        return;
                    }
                };
                for copy in copies {
                    if let Err(e) = self
                        .materializer
                        .retract(&copy.copy_channel_id, &copy.copy_message_id)
                        .await
                    {
                        warn!(user_id, copy_message_id = %copy.copy_message_id, error = %e, "Failed to delete copy");
                    }
                }
            }
        }
    }
}
