// Bookmark engine: event normalization, the copy materializer and the
// orchestrator that keeps ledger, copies and origin reactions consistent.

pub mod dispatcher;
pub mod error;
pub mod event;
pub mod link;
pub mod materializer;
pub mod orchestrator;
pub mod render;

pub use error::BookmarkError;
pub use event::{Glyphs, Intent, ReactionAction, ReactionEvent, Surface};
pub use link::MessageLink;
pub use orchestrator::{Orchestrator, Outcome, Settings, Strategy};
