// JSON-file server store
//
// Records are written back as a pretty JSON object keyed by id. Create and
// delete persist immediately; updates from the poll pipeline are only flushed
// by `save` / the autosave task. Servers another process added or removed
// show up on the next access, while this process keeps its own poll state
// for records both sides know.

use crate::json_file::JsonTable;
use async_trait::async_trait;
use overseer_core::{OverseerError, Result, Server, ServerStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct JsonServerStore {
    table: JsonTable<Server>,
}

/// Name and address come from the file; status and players from this process.
fn merge_server(disk: Server, memory: Option<Server>) -> Server {
    match memory {
        Some(mut kept) => {
            kept.name = disk.name;
            kept.addr = disk.addr;
            kept
        }
        None => disk,
    }
}

impl JsonServerStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let table = JsonTable::open(path, merge_server)?;
        tracing::info!("Opened server store {:?}", table.path());
        Ok(Self { table })
    }

    pub fn path(&self) -> &Path {
        self.table.path()
    }

    /// Periodically flush in-memory updates until `token` is cancelled
    pub fn spawn_autosave(
        self: &Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = store.save().await {
                            tracing::warn!("Autosave to {:?} failed: {}", store.path(), e);
                        }
                    }
                }
            }
            tracing::debug!("Autosave task for {:?} stopped", store.path());
        })
    }

    fn validate(server: &Server) -> Result<()> {
        if server.name.trim().is_empty() || server.addr.trim().is_empty() {
            return Err(OverseerError::server_invalid(
                "empty values are not allowed",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ServerStore for JsonServerStore {
    async fn create(&self, mut server: Server) -> Result<Server> {
        Self::validate(&server)?;
        if server.id.is_nil() {
            server.id = Uuid::new_v4();
        }

        let mut snapshot = self.table.lock().await;
        if snapshot.records.contains_key(&server.id) {
            return Err(OverseerError::server_exists(server.id));
        }
        let mut next = snapshot.records.clone();
        next.insert(server.id, server.clone());
        self.table.commit(&mut snapshot, next).await?;
        Ok(server)
    }

    async fn list(&self) -> Result<Vec<Server>> {
        let snapshot = self.table.lock().await;
        let mut list: Vec<Server> = snapshot.records.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(list)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Server> {
        self.table
            .lock()
            .await
            .records
            .get(&id)
            .cloned()
            .ok_or_else(|| OverseerError::server_not_found(id))
    }

    async fn get_by_name(&self, name: &str) -> Result<Server> {
        self.table
            .lock()
            .await
            .records
            .values()
            .find(|s| s.name == name)
            .cloned()
            .ok_or_else(|| OverseerError::server_name_not_found(name))
    }

    async fn update(&self, server: Server) -> Result<()> {
        let mut snapshot = self.table.lock().await;
        match snapshot.records.get_mut(&server.id) {
            Some(slot) => {
                *slot = server;
                Ok(())
            }
            None => Err(OverseerError::server_not_found(server.id)),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut snapshot = self.table.lock().await;
        if !snapshot.records.contains_key(&id) {
            return Err(OverseerError::server_not_found(id));
        }
        let mut next = snapshot.records.clone();
        next.remove(&id);
        self.table.commit(&mut snapshot, next).await
    }

    async fn save(&self) -> Result<()> {
        let mut snapshot = self.table.lock().await;
        let current = snapshot.records.clone();
        self.table.commit(&mut snapshot, current).await
    }
}
