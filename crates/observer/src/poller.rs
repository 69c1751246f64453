// Poll Worker
//
// One task per watched server. Each round connects to the query endpoint,
// fetches info, players and latency, normalises the result and offers it to
// the scanner through a single-slot channel. The task owns the only sender,
// so the channel closes exactly once, when the task exits.

use crate::backoff::Backoff;
use crate::metrics::ObserverMetrics;
use crate::sanitize::{correct_player_count, Sanitize};
use chrono::Utc;
use overseer_core::config::{BackoffConfig, ObserverConfig};
use overseer_core::{OverseerError, QueryClient, Result, Server};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Timing knobs for one poll worker
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub poll_interval: Duration,
    pub query_timeout: Duration,
    /// Latency strictly below this counts as online
    pub online_threshold: Duration,
    pub backoff: BackoffConfig,
}

impl From<&ObserverConfig> for PollSettings {
    fn from(config: &ObserverConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            query_timeout: config.query_timeout(),
            online_threshold: config.online_threshold(),
            backoff: config.retry_backoff.clone(),
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from(&ObserverConfig::default())
    }
}

/// Start polling `target` until `token` is cancelled.
pub fn spawn_poller(
    target: Server,
    query: Arc<dyn QueryClient>,
    settings: PollSettings,
    metrics: Arc<ObserverMetrics>,
    token: CancellationToken,
) -> (mpsc::Receiver<Server>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(1);
    let handle = tokio::spawn(run_poller(target, query, settings, metrics, tx, token));
    (rx, handle)
}

async fn run_poller(
    target: Server,
    query: Arc<dyn QueryClient>,
    settings: PollSettings,
    metrics: Arc<ObserverMetrics>,
    tx: mpsc::Sender<Server>,
    token: CancellationToken,
) {
    let mut backoff = Backoff::from(&settings.backoff);
    tracing::debug!(server = %target.id, addr = %target.addr, "poller started");

    loop {
        let outcome = tokio::select! {
            _ = token.cancelled() => break,
            outcome = poll_once(&target, query.as_ref(), &settings) => outcome,
        };

        let delay = match outcome {
            Ok(server) => {
                metrics.record_scrape(target.id);
                backoff.reset();
                match tx.try_send(server) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!(server = %target.id, "scanner busy, poll result superseded");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
                settings.poll_interval
            }
            Err(e) => {
                metrics.record_failed_scrape(target.id);
                let delay = backoff.next_delay();
                tracing::warn!(
                    server = %target.id,
                    addr = %target.addr,
                    retry_in = ?delay,
                    "poll failed: {}",
                    e
                );
                delay
            }
        };

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    tracing::debug!(server = %target.id, "poller stopped");
}

async fn bounded<T>(
    addr: &str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| OverseerError::timeout(addr))?
}

/// One full query round against `target`, normalised.
pub async fn poll_once(
    target: &Server,
    query: &dyn QueryClient,
    settings: &PollSettings,
) -> Result<Server> {
    let addr = target.addr.as_str();
    let limit = settings.query_timeout;

    let mut endpoint = bounded(addr, limit, query.connect(addr)).await?;
    let info = bounded(addr, limit, endpoint.info()).await?;
    let players = bounded(addr, limit, endpoint.players()).await?;
    // a ping still unanswered at the threshold is an offline verdict, not a failure
    let online = match tokio::time::timeout(settings.online_threshold, endpoint.ping()).await {
        Ok(latency) => latency? < settings.online_threshold,
        Err(_) => false,
    };

    let mut server = Server {
        id: target.id,
        name: target.name.clone(),
        addr: target.addr.clone(),
        status: online,
        server_info: Some(info.into()),
        players_info: Some(players.into()),
        last_seen: Some(Utc::now()),
    };
    server.sanitize();
    correct_player_count(&mut server);
    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use overseer_core::model::{InfoResponse, PlayerResponse};
    use overseer_core::Endpoint;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Default)]
    struct ScriptedQuery {
        fail: bool,
        latency: Duration,
        /// Make `ping` take `latency` of (virtual) time instead of reporting it
        slow_ping: bool,
        attempts: Mutex<Vec<Instant>>,
    }

    struct ScriptedEndpoint {
        latency: Duration,
        slow_ping: bool,
    }

    #[async_trait]
    impl QueryClient for ScriptedQuery {
        async fn connect(&self, addr: &str) -> Result<Box<dyn Endpoint>> {
            self.attempts.lock().unwrap().push(Instant::now());
            if self.fail {
                return Err(OverseerError::network(addr, "connection refused"));
            }
            Ok(Box::new(ScriptedEndpoint {
                latency: self.latency,
                slow_ping: self.slow_ping,
            }))
        }
    }

    #[async_trait]
    impl Endpoint for ScriptedEndpoint {
        async fn info(&mut self) -> Result<InfoResponse> {
            Ok(InfoResponse {
                name: "Island\0\0".into(),
                players: 3,
                ..Default::default()
            })
        }

        async fn players(&mut self) -> Result<Vec<PlayerResponse>> {
            Ok(vec![
                PlayerResponse {
                    name: "Alice\0".into(),
                    duration: 12.6,
                    ..Default::default()
                },
                PlayerResponse::default(),
            ])
        }

        async fn ping(&mut self) -> Result<Duration> {
            if self.slow_ping {
                let start = Instant::now();
                tokio::time::sleep(self.latency).await;
                return Ok(start.elapsed());
            }
            Ok(self.latency)
        }
    }

    fn settings() -> PollSettings {
        PollSettings {
            poll_interval: Duration::from_millis(50),
            query_timeout: Duration::from_millis(20),
            online_threshold: Duration::from_secs(5),
            backoff: BackoffConfig {
                initial_ms: 100,
                max_ms: 400,
            },
        }
    }

    fn target() -> Server {
        Server::new("Island", "10.0.0.1:27015").with_id(uuid::Uuid::new_v4())
    }

    fn metrics() -> Arc<ObserverMetrics> {
        Arc::new(ObserverMetrics::new().unwrap())
    }

    #[tokio::test]
    async fn test_poll_once_normalises_record() {
        let query = ScriptedQuery {
            latency: Duration::from_millis(40),
            ..Default::default()
        };
        let target = target();
        let server = poll_once(&target, &query, &settings()).await.unwrap();

        assert_eq!(server.id, target.id);
        assert_eq!(server.name, "Island");
        assert!(server.status);
        let info = server.server_info.as_ref().unwrap();
        assert_eq!(info.name, "Island");
        assert_eq!(info.players, 1);
        assert_eq!(server.player_names(), vec!["Alice"]);
        let alice = &server.players_info.as_ref().unwrap().players[0];
        assert_eq!(alice.duration, Duration::from_secs(13));
        assert!(server.last_seen.is_some());
    }

    #[tokio::test]
    async fn test_online_threshold_is_strict() {
        let query = ScriptedQuery {
            latency: Duration::from_secs(5),
            ..Default::default()
        };
        let server = poll_once(&target(), &query, &settings()).await.unwrap();
        assert!(!server.status);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_but_answering_server_is_online_with_defaults() {
        let query = ScriptedQuery {
            latency: Duration::from_secs(4),
            slow_ping: true,
            ..Default::default()
        };
        let server = poll_once(&target(), &query, &PollSettings::default())
            .await
            .unwrap();
        assert!(server.status);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_past_threshold_yields_offline_record() {
        let query = ScriptedQuery {
            latency: Duration::from_secs(6),
            slow_ping: true,
            ..Default::default()
        };
        let start = Instant::now();
        let server = poll_once(&target(), &query, &PollSettings::default())
            .await
            .unwrap();

        assert!(!server.status);
        assert_eq!(server.player_names(), vec!["Alice"]);
        // gave up at the threshold instead of waiting for the reply
        assert!(start.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_retry_with_backoff() {
        let query = Arc::new(ScriptedQuery {
            fail: true,
            ..Default::default()
        });
        let token = CancellationToken::new();
        let start = Instant::now();
        let metrics = metrics();
        let target = target();
        let (_rx, handle) = spawn_poller(
            target.clone(),
            query.clone(),
            settings(),
            metrics.clone(),
            token.clone(),
        );

        tokio::time::sleep(Duration::from_millis(1550)).await;
        token.cancel();
        handle.await.unwrap();

        let attempts = query.attempts.lock().unwrap().clone();
        assert_eq!(attempts.len(), 6);
        assert_eq!(metrics.failed_scrapes(target.id), 6);
        assert_eq!(metrics.scrapes(target.id), 0);
        assert!(attempts[0] - start < Duration::from_millis(5));

        let expected = [100, 200, 400, 400, 400];
        for (pair, want) in attempts.windows(2).zip(expected) {
            let gap = (pair[1] - pair[0]).as_millis();
            assert!(
                (want..want + 5).contains(&gap),
                "gap {}ms, expected about {}ms",
                gap,
                want
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_closes_channel() {
        let query = Arc::new(ScriptedQuery::default());
        let token = CancellationToken::new();
        let (mut rx, handle) = spawn_poller(target(), query, settings(), metrics(), token.clone());

        assert!(rx.recv().await.is_some());
        token.cancel();
        handle.await.unwrap();

        // at most the one buffered record, then closed for good
        while rx.recv().await.is_some() {}
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unread_results_are_superseded() {
        let query = Arc::new(ScriptedQuery::default());
        let token = CancellationToken::new();
        let (mut rx, handle) =
            spawn_poller(target(), query.clone(), settings(), metrics(), token.clone());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(query.attempts.lock().unwrap().len() > 2);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());

        token.cancel();
        handle.await.unwrap();
    }
}
