// Worker-Set Reconciler
//
// Keeps exactly one poll worker and one scanner per watched server. The
// registry maps a server id to its running worker; the mutex around it is
// held only while the map changes, never across a task join or store call.
// All scanners forward into a shared result sink that writes records back
// to the store while their server is still watched.

use crate::metrics::ObserverMetrics;
use crate::poller::{spawn_poller, PollSettings};
use crate::scanner::run_scanner;
use async_trait::async_trait;
use overseer_core::config::ObserverConfig;
use overseer_core::{
    Event, EventBus, EventHandler, OverseerError, QueryClient, Server, ServerStore, Topic,
    Watchlist,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("server {0} is already watched")]
    AlreadyWatched(Uuid),

    #[error("server {0} is not watched")]
    NotWatched(Uuid),

    #[error(transparent)]
    Store(#[from] OverseerError),

    #[error("metrics setup failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Running worker for one server
struct WorkerHandle {
    target: Server,
    token: CancellationToken,
    poller: JoinHandle<()>,
    scanner: JoinHandle<()>,
}

impl WorkerHandle {
    /// Cancel and wait for both tasks. The poller's channel is closed once
    /// this returns.
    async fn stop(self) -> Server {
        self.token.cancel();
        for (task, handle) in [("poller", self.poller), ("scanner", self.scanner)] {
            if let Err(e) = handle.await {
                tracing::error!(server = %self.target.id, "{} task failed: {}", task, e);
            }
        }
        self.target
    }
}

type Registry = Arc<Mutex<HashMap<Uuid, WorkerHandle>>>;

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<Uuid>,
    pub removed: Vec<Uuid>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub struct Observer {
    workers: Registry,
    store: Arc<dyn ServerStore>,
    query: Arc<dyn QueryClient>,
    watchlist: Arc<dyn Watchlist>,
    bus: EventBus,
    settings: PollSettings,
    metrics: Arc<ObserverMetrics>,
    token: CancellationToken,
    sink_tx: mpsc::Sender<Server>,
    sink_task: Mutex<Option<JoinHandle<()>>>,
    /// Serialises whole reconciliation passes
    reconciling: Mutex<()>,
}

impl Observer {
    /// Create an observer and start its result sink. Must be called inside
    /// a tokio runtime.
    pub fn new(
        store: Arc<dyn ServerStore>,
        query: Arc<dyn QueryClient>,
        watchlist: Arc<dyn Watchlist>,
        bus: EventBus,
        config: &ObserverConfig,
    ) -> Result<Self, ObserverError> {
        let metrics = Arc::new(ObserverMetrics::new()?);
        let workers: Registry = Arc::new(Mutex::new(HashMap::new()));
        let token = CancellationToken::new();
        let (sink_tx, sink_rx) = mpsc::channel(config.result_buffer.max(1));
        let sink_task = tokio::spawn(run_result_sink(
            sink_rx,
            workers.clone(),
            store.clone(),
            metrics.clone(),
            token.clone(),
        ));

        Ok(Self {
            workers,
            store,
            query,
            watchlist,
            bus,
            settings: PollSettings::from(config),
            metrics,
            token,
            sink_tx,
            sink_task: Mutex::new(Some(sink_task)),
            reconciling: Mutex::new(()),
        })
    }

    pub fn metrics(&self) -> &ObserverMetrics {
        &self.metrics
    }

    /// Start watching `target`.
    pub async fn add_worker(&self, target: Server) -> Result<(), ObserverError> {
        let mut workers = self.workers.lock().await;
        if workers.contains_key(&target.id) {
            return Err(ObserverError::AlreadyWatched(target.id));
        }

        let token = self.token.child_token();
        let (results, poller) = spawn_poller(
            target.clone(),
            self.query.clone(),
            self.settings.clone(),
            self.metrics.clone(),
            token.clone(),
        );
        let scanner = tokio::spawn(run_scanner(
            results,
            self.watchlist.clone(),
            self.bus.clone(),
            self.sink_tx.clone(),
            self.metrics.clone(),
            token.clone(),
        ));

        tracing::info!(server = %target, "worker started");
        workers.insert(
            target.id,
            WorkerHandle {
                target,
                token,
                poller,
                scanner,
            },
        );
        self.metrics.set_watched(workers.len());
        Ok(())
    }

    /// Stop watching `id` and wait for its tasks to finish.
    pub async fn remove_worker(&self, id: Uuid) -> Result<Server, ObserverError> {
        let handle = {
            let mut workers = self.workers.lock().await;
            let handle = workers.remove(&id).ok_or(ObserverError::NotWatched(id))?;
            self.metrics.set_watched(workers.len());
            handle
        };

        let target = handle.stop().await;
        self.metrics.forget(id);
        tracing::info!(server = %target, "worker stopped");
        Ok(target)
    }

    /// Make the watched set equal to the ids in `targets`.
    pub async fn reconcile_all(&self, targets: &[Server]) -> ReconcileReport {
        let _pass = self.reconciling.lock().await;
        let wanted: HashSet<Uuid> = targets.iter().map(|t| t.id).collect();
        let mut report = ReconcileReport::default();

        let stale: Vec<Uuid> = self
            .watched_ids()
            .await
            .into_iter()
            .filter(|id| !wanted.contains(id))
            .collect();
        for id in stale {
            match self.remove_worker(id).await {
                Ok(_) => report.removed.push(id),
                // removed concurrently by a delete event
                Err(ObserverError::NotWatched(_)) => {}
                Err(e) => tracing::error!(server = %id, "failed to remove worker: {}", e),
            }
        }

        for target in targets {
            match self.add_worker(target.clone()).await {
                Ok(()) => report.added.push(target.id),
                Err(ObserverError::AlreadyWatched(_)) => {}
                Err(e) => tracing::error!(server = %target.id, "failed to add worker: {}", e),
            }
        }

        if !report.is_noop() {
            tracing::info!(
                added = report.added.len(),
                removed = report.removed.len(),
                "worker set reconciled"
            );
        }
        report
    }

    pub async fn reconcile_from_store(&self) -> Result<ReconcileReport, ObserverError> {
        let targets = self.store.list().await?;
        Ok(self.reconcile_all(&targets).await)
    }

    /// Watched ids, sorted
    pub async fn watched_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.workers.lock().await.keys().copied().collect();
        ids.sort();
        ids
    }

    pub async fn is_watched(&self, id: Uuid) -> bool {
        self.workers.lock().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.workers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Run `reconcile_from_store` every `interval` until shutdown.
    pub fn spawn_periodic_reconcile(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let observer = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = observer.token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = observer.reconcile_from_store().await {
                            tracing::error!("periodic reconcile failed: {}", e);
                        }
                        tracing::debug!(metrics = ?observer.metrics.snapshot(), "observer metrics");
                    }
                }
            }
        })
    }

    /// Stop every worker and the result sink.
    pub async fn shutdown(&self) {
        self.token.cancel();

        let handles: Vec<WorkerHandle> = self
            .workers
            .lock()
            .await
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        let count = handles.len();
        for handle in handles {
            handle.stop().await;
        }
        self.metrics.set_watched(0);

        if let Some(sink) = self.sink_task.lock().await.take() {
            if let Err(e) = sink.await {
                tracing::error!("result sink failed: {}", e);
            }
        }
        let metrics = self.metrics.snapshot();
        tracing::info!(
            workers = count,
            scrapes = metrics.scrapes,
            failed_scrapes = metrics.failed_scrapes,
            scans = metrics.scans,
            processed = metrics.processed,
            "observer shut down"
        );
    }
}

#[async_trait]
impl EventHandler for Observer {
    async fn handle_event(&self, event: Event) {
        let result = match event {
            Event::Init => self.reconcile_from_store().await.map(|_| ()),
            Event::ServerAdded(server) => self.add_worker(server).await,
            Event::ServerDeleted(id) => self.remove_worker(id).await.map(|_| ()),
            _ => Ok(()),
        };
        if let Err(e) = result {
            tracing::error!("observer failed to handle event: {}", e);
        }
    }

    fn topics(&self) -> &'static [Topic] {
        &[Topic::Lifecycle]
    }

    /// Lost add/delete events leave the worker set stale; rebuild it from the store.
    async fn handle_lagged(&self, missed: u64) {
        tracing::warn!(missed, "observer missed lifecycle events, reconciling from store");
        if let Err(e) = self.reconcile_from_store().await {
            tracing::error!("reconcile after lost events failed: {}", e);
        }
    }
}

async fn run_result_sink(
    mut results: mpsc::Receiver<Server>,
    workers: Registry,
    store: Arc<dyn ServerStore>,
    metrics: Arc<ObserverMetrics>,
    token: CancellationToken,
) {
    loop {
        let server = tokio::select! {
            _ = token.cancelled() => break,
            next = results.recv() => match next {
                Some(server) => server,
                None => break,
            },
        };

        if !workers.lock().await.contains_key(&server.id) {
            tracing::debug!(server = %server.id, "dropping result for unwatched server");
            continue;
        }
        match store.update(server).await {
            Ok(()) => metrics.record_processed(),
            Err(e) => tracing::warn!("failed to store poll result: {}", e),
        }
    }
}
