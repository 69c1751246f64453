// Storage-change notifier
//
// Wraps any ServerStore and publishes `ServerAdded` / `ServerDeleted` on the
// bus after the inner operation succeeds. Everything else passes through.

use async_trait::async_trait;
use overseer_core::{Event, EventBus, Result, Server, ServerStore};
use std::sync::Arc;
use uuid::Uuid;

pub struct NotifyingStore {
    inner: Arc<dyn ServerStore>,
    bus: EventBus,
}

impl NotifyingStore {
    pub fn new(inner: Arc<dyn ServerStore>, bus: EventBus) -> Self {
        Self { inner, bus }
    }

    pub fn inner(&self) -> &Arc<dyn ServerStore> {
        &self.inner
    }
}

#[async_trait]
impl ServerStore for NotifyingStore {
    async fn create(&self, server: Server) -> Result<Server> {
        let created = self.inner.create(server).await?;
        tracing::info!(server = %created, "server added");
        self.bus.publish(Event::ServerAdded(created.clone())).await;
        Ok(created)
    }

    async fn list(&self) -> Result<Vec<Server>> {
        self.inner.list().await
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Server> {
        self.inner.get_by_id(id).await
    }

    async fn get_by_name(&self, name: &str) -> Result<Server> {
        self.inner.get_by_name(name).await
    }

    async fn update(&self, server: Server) -> Result<()> {
        self.inner.update(server).await
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.inner.delete(id).await?;
        tracing::info!(server = %id, "server deleted");
        self.bus.publish(Event::ServerDeleted(id)).await;
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        self.inner.save().await
    }
}
