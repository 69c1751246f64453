use crate::json_file::JsonTable;
use async_trait::async_trait;
use overseer_core::{OverseerError, Result, Watchlist, WatchlistEntry};
use std::path::Path;
use uuid::Uuid;

/// JSON-file backed watchlist. Edits made by another process win.
pub struct JsonWatchlist {
    table: JsonTable<WatchlistEntry>,
}

impl JsonWatchlist {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            table: JsonTable::open(path, |disk, _| disk)?,
        })
    }
}

#[async_trait]
impl Watchlist for JsonWatchlist {
    async fn list(&self) -> Vec<WatchlistEntry> {
        let snapshot = self.table.lock().await;
        let mut list: Vec<WatchlistEntry> = snapshot.records.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    async fn create(&self, name: &str) -> Result<WatchlistEntry> {
        let name = name.trim();
        if name.is_empty() {
            return Err(OverseerError::watchlist_invalid("player name cannot be empty"));
        }

        let mut snapshot = self.table.lock().await;
        if snapshot.records.values().any(|e| e.name == name) {
            return Err(OverseerError::watchlist_invalid(format!(
                "{} is already on the watchlist",
                name
            )));
        }
        let entry = WatchlistEntry::new(name);
        let mut next = snapshot.records.clone();
        next.insert(entry.id, entry.clone());
        self.table.commit(&mut snapshot, next).await?;
        Ok(entry)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut snapshot = self.table.lock().await;
        if !snapshot.records.contains_key(&id) {
            return Ok(());
        }
        let mut next = snapshot.records.clone();
        next.remove(&id);
        self.table.commit(&mut snapshot, next).await
    }
}
