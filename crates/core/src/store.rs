//! Storage seams consumed by the observer.

use crate::error::Result;
use crate::model::{Server, WatchlistEntry};
use async_trait::async_trait;
use uuid::Uuid;

/// Durable key/value store of target records
#[async_trait]
pub trait ServerStore: Send + Sync {
    /// Persist a new record, assigning an id when it has none
    async fn create(&self, server: Server) -> Result<Server>;

    /// All records, sorted by name
    async fn list(&self) -> Result<Vec<Server>>;

    async fn get_by_id(&self, id: Uuid) -> Result<Server>;

    async fn get_by_name(&self, name: &str) -> Result<Server>;

    /// Replace an existing record
    async fn update(&self, server: Server) -> Result<()>;

    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Flush to durable storage
    async fn save(&self) -> Result<()>;
}

/// Player names of interest
#[async_trait]
pub trait Watchlist: Send + Sync {
    async fn list(&self) -> Vec<WatchlistEntry>;

    async fn create(&self, name: &str) -> Result<WatchlistEntry>;

    async fn delete(&self, id: Uuid) -> Result<()>;
}
