// Event normalization — map a raw reaction notification onto the intent the
// orchestrator acts on.
//
// Pure and side-effect free: the channel surface is resolved by the caller
// before `normalize` runs.

use std::fmt;

/// Whether the reaction was added or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReactionAction {
    Add,
    Remove,
}

/// Where a reaction happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Surface {
    /// A guild channel holding the original message
    Origin,
    /// The user's DM channel holding private copies
    Private,
}

/// A reaction notification as delivered by the event feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionEvent {
    pub action: ReactionAction,
    pub actor_id: String,
    /// Unicode emoji, or the custom emoji's name
    pub emoji: String,
    pub channel_id: String,
    pub message_id: String,
    /// Present for guild channels
    pub guild_id: Option<String>,
}

impl ReactionEvent {
    /// Surface known from the payload alone. `None` means the channel has to
    /// be looked up.
    pub fn known_surface(&self) -> Option<Surface> {
        self.guild_id.as_ref().map(|_| Surface::Origin)
    }
}

/// The two reaction emoji the bot reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glyphs {
    pub bookmark: String,
    pub delete: String,
}

impl Default for Glyphs {
    fn default() -> Self {
        Self {
            bookmark: "🔖".to_string(),
            delete: "❌".to_string(),
        }
    }
}

/// Canonical intent of a reaction event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    AddInOrigin,
    RemoveViaCopy,
    RemoveInOrigin,
    Ignore,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::AddInOrigin => "add_in_origin",
            Intent::RemoveViaCopy => "remove_via_copy",
            Intent::RemoveInOrigin => "remove_in_origin",
            Intent::Ignore => "ignore",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a reaction event.
pub fn normalize(event: &ReactionEvent, surface: Surface, glyphs: &Glyphs, bot_user_id: &str) -> Intent {
    // The bot's own reactions (the ❌ it puts on every copy) must not loop back
    if event.actor_id == bot_user_id {
        return Intent::Ignore;
    }

    let is_bookmark = event.emoji == glyphs.bookmark;
    let is_delete = event.emoji == glyphs.delete;

    match (surface, event.action) {
        (Surface::Origin, ReactionAction::Add) if is_bookmark => Intent::AddInOrigin,
        (Surface::Origin, ReactionAction::Remove) if is_bookmark => Intent::RemoveInOrigin,
        (Surface::Private, ReactionAction::Add) if is_delete => Intent::RemoveViaCopy,
        _ => Intent::Ignore,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT: &str = "42";

    fn event(action: ReactionAction, actor: &str, emoji: &str) -> ReactionEvent {
        ReactionEvent {
            action,
            actor_id: actor.to_string(),
            emoji: emoji.to_string(),
            channel_id: "200".to_string(),
            message_id: "300".to_string(),
            guild_id: Some("100".to_string()),
        }
    }

    #[test]
    fn bookmark_added_in_origin() {
        let glyphs = Glyphs::default();
        let e = event(ReactionAction::Add, "7", "🔖");
        assert_eq!(normalize(&e, Surface::Origin, &glyphs, BOT), Intent::AddInOrigin);
    }

    #[test]
    fn bookmark_removed_in_origin() {
        let glyphs = Glyphs::default();
        let e = event(ReactionAction::Remove, "7", "🔖");
        assert_eq!(normalize(&e, Surface::Origin, &glyphs, BOT), Intent::RemoveInOrigin);
    }

    #[test]
    fn delete_added_on_copy() {
        let glyphs = Glyphs::default();
        let e = event(ReactionAction::Add, "7", "❌");
        assert_eq!(normalize(&e, Surface::Private, &glyphs, BOT), Intent::RemoveViaCopy);
    }

    #[test]
    fn bot_reactions_are_ignored() {
        let glyphs = Glyphs::default();
        let e = event(ReactionAction::Add, BOT, "❌");
        assert_eq!(normalize(&e, Surface::Private, &glyphs, BOT), Intent::Ignore);
        let e = event(ReactionAction::Add, BOT, "🔖");
        assert_eq!(normalize(&e, Surface::Origin, &glyphs, BOT), Intent::Ignore);
    }

    #[test]
    fn foreign_emoji_is_ignored() {
        let glyphs = Glyphs::default();
        let e = event(ReactionAction::Add, "7", "👍");
        assert_eq!(normalize(&e, Surface::Origin, &glyphs, BOT), Intent::Ignore);
        assert_eq!(normalize(&e, Surface::Private, &glyphs, BOT), Intent::Ignore);
    }

    #[test]
    fn wrong_surface_combinations_are_ignored() {
        let glyphs = Glyphs::default();
        // Delete glyph in a guild channel
        let e = event(ReactionAction::Add, "7", "❌");
        assert_eq!(normalize(&e, Surface::Origin, &glyphs, BOT), Intent::Ignore);
        // Bookmark glyph on a private copy
        let e = event(ReactionAction::Add, "7", "🔖");
        assert_eq!(normalize(&e, Surface::Private, &glyphs, BOT), Intent::Ignore);
        // Taking the delete glyph back off a copy
        let e = event(ReactionAction::Remove, "7", "❌");
        assert_eq!(normalize(&e, Surface::Private, &glyphs, BOT), Intent::Ignore);
    }

    #[test]
    fn custom_glyphs_are_honored() {
        let glyphs = Glyphs {
            bookmark: "⭐".to_string(),
            delete: "🗑️".to_string(),
        };
        let e = event(ReactionAction::Add, "7", "⭐");
        assert_eq!(normalize(&e, Surface::Origin, &glyphs, BOT), Intent::AddInOrigin);
        let e = event(ReactionAction::Add, "7", "🔖");
        assert_eq!(normalize(&e, Surface::Origin, &glyphs, BOT), Intent::Ignore);
    }

    #[test]
    fn surface_known_only_with_guild_id() {
        let mut e = event(ReactionAction::Add, "7", "🔖");
        assert_eq!(e.known_surface(), Some(Surface::Origin));
        e.guild_id = None;
        assert_eq!(e.known_surface(), None);
    }
}
