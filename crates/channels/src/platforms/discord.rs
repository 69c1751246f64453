// Discord Notification Service
//
// Posts presence messages to one Discord channel using twilight-http.

use crate::service::{ChannelError, NotificationService};
use async_trait::async_trait;
use overseer_core::config::DiscordSettings;
use std::sync::Arc;
use tokio::sync::RwLock;
use twilight_http::Client as HttpClient;
use twilight_model::id::{marker::ChannelMarker, Id};

const PLATFORM: &str = "discord";

/// Discord message character limit
pub const MESSAGE_LIMIT: usize = 2000;

pub struct DiscordNotifier {
    token: String,
    channel_id: Id<ChannelMarker>,
    /// Present while connected
    http: RwLock<Option<Arc<HttpClient>>>,
}

impl DiscordNotifier {
    pub fn new(settings: &DiscordSettings) -> Result<Self, ChannelError> {
        if settings.token.trim().is_empty() {
            return Err(ChannelError::AuthenticationFailed {
                platform: PLATFORM.to_string(),
                reason: "bot token is empty".to_string(),
            });
        }
        let raw = Self::parse_channel_id(&settings.channel_id)?;
        let channel_id = Id::new_checked(raw).ok_or_else(|| ChannelError::ResolveFailed {
            identifier: settings.channel_id.clone(),
            reason: "Snowflake ID cannot be zero".to_string(),
        })?;

        Ok(Self {
            token: settings.token.clone(),
            channel_id,
            http: RwLock::new(None),
        })
    }

    pub fn channel_id(&self) -> u64 {
        self.channel_id.get()
    }

    /// Split message into chunks of at most `limit` characters, preferring
    /// line boundaries.
    pub fn chunk_message(message: &str, limit: usize) -> Vec<String> {
        let limit = limit.max(1);
        if message.chars().count() <= limit {
            return vec![message.to_string()];
        }

        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_len = 0;

        for line in message.lines() {
            let line_len = line.chars().count();
            let needed = if current.is_empty() { line_len } else { current_len + 1 + line_len };
            if needed <= limit {
                if !current.is_empty() {
                    current.push('\n');
                }
                current.push_str(line);
                current_len = needed;
                continue;
            }

            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            // hard-split lines that alone exceed the limit
            let chars: Vec<char> = line.chars().collect();
            let mut pieces = chars.chunks(limit).map(|c| c.iter().collect::<String>());
            let mut last = pieces.next().unwrap_or_default();
            for piece in pieces {
                chunks.push(std::mem::replace(&mut last, piece));
            }
            current_len = last.chars().count();
            current = last;
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
    }

    /// Parse channel ID from a raw snowflake or a `<#id>` mention
    pub fn parse_channel_id(identifier: &str) -> Result<u64, ChannelError> {
        let trimmed = identifier.trim();
        let id_str = if trimmed.starts_with("<#") && trimmed.ends_with('>') {
            trimmed.trim_start_matches("<#").trim_end_matches('>')
        } else {
            trimmed
        };

        if id_str.is_empty() || id_str.len() > 20 || !id_str.chars().all(|c| c.is_ascii_digit()) {
            return Err(ChannelError::ResolveFailed {
                identifier: identifier.to_string(),
                reason: "Invalid snowflake ID".to_string(),
            });
        }
        id_str.parse::<u64>().map_err(|_| ChannelError::ResolveFailed {
            identifier: identifier.to_string(),
            reason: "Invalid snowflake ID".to_string(),
        })
    }
}

#[async_trait]
impl NotificationService for DiscordNotifier {
    fn platform_name(&self) -> &str {
        PLATFORM
    }

    async fn connect(&self) -> Result<(), ChannelError> {
        let http = Arc::new(HttpClient::new(self.token.clone()));
        let user = http
            .current_user()
            .await
            .map_err(|e| ChannelError::AuthenticationFailed {
                platform: PLATFORM.to_string(),
                reason: e.to_string(),
            })?
            .model()
            .await
            .map_err(|e| ChannelError::ConnectionFailed {
                platform: PLATFORM.to_string(),
                reason: e.to_string(),
            })?;

        *self.http.write().await = Some(http);
        tracing::info!(
            "Discord notifier connected as {} (channel {})",
            user.name,
            self.channel_id
        );
        Ok(())
    }

    async fn send(&self, text: &str) -> Result<(), ChannelError> {
        let http = self
            .http
            .read()
            .await
            .clone()
            .ok_or_else(|| ChannelError::NotConnected {
                platform: PLATFORM.to_string(),
            })?;

        let chunks = Self::chunk_message(text, MESSAGE_LIMIT);
        for chunk in &chunks {
            http.create_message(self.channel_id)
                .content(chunk)
                .await
                .map_err(|e| ChannelError::SendFailed {
                    platform: PLATFORM.to_string(),
                    reason: format!("HTTP error: {}", e),
                })?;
        }

        tracing::debug!(
            "Sent {} chunk(s) to Discord channel {}",
            chunks.len(),
            self.channel_id
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ChannelError> {
        if self.http.write().await.take().is_some() {
            tracing::info!("Discord notifier disconnected");
        }
        Ok(())
    }
}
