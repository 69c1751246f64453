// Notification Service Manager
//
// Owns the running notification services. Each service gets its own bus
// listener; a `ConfigChanged` event tears every service down and rebuilds
// the set from the new `notification-service` section.

use crate::platforms::discord::DiscordNotifier;
use crate::service::{ChannelError, NotificationService, ServiceListener};
use async_trait::async_trait;
use overseer_core::{Event, EventBus, EventHandler, NotificationConfig, Topic};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Builds services from a notification config section
pub trait ServiceBuilder: Send + Sync {
    fn build(&self, config: &NotificationConfig)
        -> Vec<Result<Arc<dyn NotificationService>, ChannelError>>;
}

/// Builds the platforms this crate ships with
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformBuilder;

impl ServiceBuilder for PlatformBuilder {
    fn build(
        &self,
        config: &NotificationConfig,
    ) -> Vec<Result<Arc<dyn NotificationService>, ChannelError>> {
        let mut services = Vec::new();
        if let Some(discord) = &config.discord {
            services.push(
                DiscordNotifier::new(discord)
                    .map(|n| Arc::new(n) as Arc<dyn NotificationService>),
            );
        }
        services
    }
}

struct RunningService {
    service: Arc<dyn NotificationService>,
    token: CancellationToken,
    listener: JoinHandle<()>,
}

pub struct ServiceManager {
    bus: EventBus,
    builder: Arc<dyn ServiceBuilder>,
    services: Mutex<BTreeMap<String, RunningService>>,
}

impl ServiceManager {
    pub fn new(bus: EventBus) -> Self {
        Self::with_builder(bus, Arc::new(PlatformBuilder))
    }

    pub fn with_builder(bus: EventBus, builder: Arc<dyn ServiceBuilder>) -> Self {
        Self {
            bus,
            builder,
            services: Mutex::new(BTreeMap::new()),
        }
    }

    /// Start services for `config`. Returns how many are running.
    pub async fn init(&self, config: &NotificationConfig) -> usize {
        let mut services = self.services.lock().await;
        self.start_all(&mut services, config).await;
        services.len()
    }

    /// Replace every running service with the ones described by `config`.
    pub async fn reconfigure(&self, config: &NotificationConfig) -> usize {
        let mut services = self.services.lock().await;
        Self::stop_all(&mut services).await;
        self.start_all(&mut services, config).await;
        tracing::info!(services = services.len(), "notification services reconfigured");
        services.len()
    }

    /// Names of running platforms
    pub async fn platforms(&self) -> Vec<String> {
        self.services.lock().await.keys().cloned().collect()
    }

    pub async fn shutdown(&self) {
        let mut services = self.services.lock().await;
        Self::stop_all(&mut services).await;
    }

    async fn start_all(
        &self,
        services: &mut BTreeMap<String, RunningService>,
        config: &NotificationConfig,
    ) {
        for built in self.builder.build(config) {
            let service = match built {
                Ok(service) => service,
                Err(e) => {
                    tracing::error!("failed to create notification service: {}", e);
                    continue;
                }
            };
            let name = service.platform_name().to_string();
            if let Err(e) = service.connect().await {
                tracing::error!(platform = %name, "failed to connect notification service: {}", e);
                continue;
            }

            let token = CancellationToken::new();
            let listener = self
                .bus
                .spawn_listener(
                    Arc::new(ServiceListener::new(service.clone())),
                    &name,
                    token.clone(),
                )
                .await;
            tracing::info!(platform = %name, "notification service started");
            if let Some(previous) = services.insert(
                name,
                RunningService {
                    service,
                    token,
                    listener,
                },
            ) {
                Self::stop(previous).await;
            }
        }
    }

    async fn stop_all(services: &mut BTreeMap<String, RunningService>) {
        for (_, running) in std::mem::take(services) {
            Self::stop(running).await;
        }
    }

    async fn stop(running: RunningService) {
        let name = running.service.platform_name().to_string();
        if let Err(e) = running.service.disconnect().await {
            tracing::error!(platform = %name, "failed to disconnect notification service: {}", e);
        }
        running.token.cancel();
        if let Err(e) = running.listener.await {
            tracing::error!(platform = %name, "notification listener failed: {}", e);
        }
    }
}

#[async_trait]
impl EventHandler for ServiceManager {
    fn topics(&self) -> &'static [Topic] {
        &[Topic::Config]
    }

    async fn handle_event(&self, event: Event) {
        if let Event::ConfigChanged(config) = event {
            self.reconfigure(&config).await;
        }
    }
}
