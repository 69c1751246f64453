pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod query;
pub mod store;

// Re-export commonly used types
pub use config::{Config, NotificationConfig, ObserverConfig, SharedConfig};
pub use error::{DomainError, InfraError, OverseerError, Result};
pub use events::{
    Event, EventBus, EventHandler, PresenceNotice, SubscriberId, Subscription, Topic,
};
pub use model::{Player, PlayersInfo, Server, ServerInfo, WatchlistEntry};
pub use query::{Endpoint, QueryClient};
pub use store::{ServerStore, Watchlist};
