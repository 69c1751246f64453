// Process Wiring
//
// Builds the running system from a config: event bus, stores, observer and
// notification services, with every long-lived task tied to one root
// cancellation token.

use anyhow::{Context, Result};
use overseer_channels::{PlatformBuilder, ServiceBuilder, ServiceManager};
use overseer_core::{Config, Event, EventBus, QueryClient, ServerStore, SharedConfig};
use overseer_observer::Observer;
use overseer_query::A2sClient;
use overseer_storage::{JsonServerStore, JsonWatchlist, NotifyingStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Collaborators that differ between production and tests
pub struct Backends {
    pub query: Arc<dyn QueryClient>,
    pub services: Arc<dyn ServiceBuilder>,
}

impl Backends {
    pub fn from_config(config: &Config) -> Self {
        Self {
            query: Arc::new(A2sClient::new(config.observer.query_timeout())),
            services: Arc::new(PlatformBuilder),
        }
    }
}

pub struct App {
    pub bus: EventBus,
    /// Store that announces creates and deletes on the bus
    pub store: Arc<NotifyingStore>,
    pub watchlist: Arc<JsonWatchlist>,
    pub observer: Arc<Observer>,
    pub services: Arc<ServiceManager>,
    pub config: Arc<SharedConfig>,
    servers: Arc<JsonServerStore>,
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl App {
    /// Open the stores, start every listener and announce `Init`.
    pub async fn start(config: Config, config_path: PathBuf, backends: Backends) -> Result<Self> {
        let bus = EventBus::new(config.bus.subscriber_capacity);
        let token = CancellationToken::new();

        let servers_path = config.storage.servers_path();
        let servers = Arc::new(
            JsonServerStore::open(&servers_path)
                .with_context(|| format!("failed to open server store {:?}", servers_path))?,
        );
        let watchlist_path = config.storage.watchlist_path();
        let watchlist = Arc::new(
            JsonWatchlist::open(&watchlist_path)
                .with_context(|| format!("failed to open watchlist {:?}", watchlist_path))?,
        );
        let store = Arc::new(NotifyingStore::new(servers.clone(), bus.clone()));

        let observer = Arc::new(
            Observer::new(
                servers.clone(),
                backends.query,
                watchlist.clone(),
                bus.clone(),
                &config.observer,
            )
            .context("failed to start observer")?,
        );
        let services = Arc::new(ServiceManager::with_builder(bus.clone(), backends.services));

        let mut tasks = Vec::new();
        tasks.push(
            bus.spawn_listener(observer.clone(), "observer", token.child_token())
                .await,
        );
        let started = services.init(&config.notification).await;
        info!("{} notification service(s) running", started);
        tasks.push(
            bus.spawn_listener(services.clone(), "service-manager", token.child_token())
                .await,
        );
        tasks.push(servers.spawn_autosave(config.storage.autosave_interval(), token.child_token()));
        if let Some(interval) = config.observer.reconcile_interval() {
            tasks.push(observer.spawn_periodic_reconcile(interval));
        }

        let shared = Arc::new(SharedConfig::new(config_path, config, bus.clone()));
        bus.publish(Event::Init).await;

        Ok(Self {
            bus,
            store,
            watchlist,
            observer,
            services,
            config: shared,
            servers,
            token,
            tasks,
        })
    }

    /// Handle of the store as the trait object other code consumes
    pub fn server_store(&self) -> Arc<dyn ServerStore> {
        self.store.clone()
    }

    /// Stop every task, then flush the server store.
    pub async fn shutdown(self) -> Result<()> {
        info!("shutting down");
        self.token.cancel();
        self.observer.shutdown().await;
        self.services.shutdown().await;
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!("background task failed: {}", e);
            }
        }
        self.servers
            .save()
            .await
            .context("failed to save server store")?;
        info!("shutdown complete");
        Ok(())
    }
}
