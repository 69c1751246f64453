//! File-backed stores for servers and the player watchlist.

mod json_file;
pub mod notifying;
pub mod servers;
pub mod watchlist;

pub use notifying::NotifyingStore;
pub use servers::JsonServerStore;
pub use watchlist::JsonWatchlist;
