// Dogear: reaction-driven message bookmarks for Discord
//
// This is the library root. The binary in main.rs wires these modules
// together; the integration tests drive them directly.

pub mod bookmark;
pub mod config;
pub mod db;
pub mod discord;
pub mod status;
