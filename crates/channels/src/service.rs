// Notification Service Interface
//
// A notification service delivers presence messages to one external platform.
// Services are shared between the manager and their bus listener, so every
// method takes `&self`.

use async_trait::async_trait;
use overseer_core::{Event, EventHandler, Topic};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Connection failed to {platform}: {reason}")]
    ConnectionFailed { platform: String, reason: String },

    #[error("Authentication failed for {platform}: {reason}")]
    AuthenticationFailed { platform: String, reason: String },

    #[error("Send failed on {platform}: {reason}")]
    SendFailed { platform: String, reason: String },

    #[error("Resolve failed for {identifier}: {reason}")]
    ResolveFailed { identifier: String, reason: String },

    #[error("{platform} is not connected")]
    NotConnected { platform: String },
}

/// Outbound notification platform
#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Platform name (e.g., "discord")
    fn platform_name(&self) -> &str;

    /// Open the session / verify credentials
    async fn connect(&self) -> Result<(), ChannelError>;

    async fn send(&self, text: &str) -> Result<(), ChannelError>;

    async fn disconnect(&self) -> Result<(), ChannelError>;
}

/// Bus adapter: forwards join/leave messages to a service
pub struct ServiceListener {
    service: Arc<dyn NotificationService>,
}

impl ServiceListener {
    pub fn new(service: Arc<dyn NotificationService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl EventHandler for ServiceListener {
    fn topics(&self) -> &'static [Topic] {
        &[Topic::Presence]
    }

    async fn handle_event(&self, event: Event) {
        let Some(text) = event.message() else {
            return;
        };
        if let Err(e) = self.service.send(&text).await {
            tracing::error!(
                platform = self.service.platform_name(),
                kind = event.kind(),
                "failed to send notification: {}",
                e
            );
        }
    }
}
