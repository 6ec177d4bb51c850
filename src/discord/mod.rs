// Discord surface: REST message store, gateway event feed, and an in-memory
// stand-in for tests.

pub mod client;
pub mod gateway;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod models;
pub mod traits;

pub use client::DiscordClient;
pub use traits::MessageApi;
