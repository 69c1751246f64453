// Presence Scanner
//
// Turns consecutive player snapshots of one server into join/leave
// notifications for watchlisted names. State is keyed by display name only,
// so two accounts sharing a name are treated as one player.

use crate::metrics::ObserverMetrics;
use overseer_core::{Event, EventBus, PresenceNotice, Server, Watchlist, WatchlistEntry};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Per-name notification state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotificationStatus {
    /// Seen in the latest snapshot
    pub is_active: bool,
    pub joined_notified: bool,
    pub left_notified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceChange {
    Joined(String),
    Left(String),
}

impl PresenceChange {
    pub fn player(&self) -> &str {
        match self {
            PresenceChange::Joined(name) | PresenceChange::Left(name) => name,
        }
    }

    pub fn into_event(self, server: &Server) -> Event {
        match self {
            PresenceChange::Joined(name) => Event::PlayerJoined(PresenceNotice::new(server, name)),
            PresenceChange::Left(name) => Event::PlayerLeft(PresenceNotice::new(server, name)),
        }
    }
}

/// Scanner state for a single server
#[derive(Debug, Default)]
pub struct PresenceScanner {
    statuses: BTreeMap<String, NotificationStatus>,
}

impl PresenceScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, name: &str) -> Option<NotificationStatus> {
        self.statuses.get(name).copied()
    }

    /// Advance the state machine by one snapshot.
    pub fn scan(&mut self, watchlist: &[WatchlistEntry], server: &Server) -> Vec<PresenceChange> {
        let Some(players) = server.players_info.as_ref() else {
            return Vec::new();
        };
        let watched: HashSet<&str> = watchlist.iter().map(|e| e.name.as_str()).collect();
        let mut changes = Vec::new();

        for status in self.statuses.values_mut() {
            status.is_active = false;
        }

        for player in &players.players {
            let status = self.statuses.entry(player.name.clone()).or_default();
            status.is_active = true;
            if watched.contains(player.name.as_str()) && !status.joined_notified {
                status.joined_notified = true;
                status.left_notified = false;
                changes.push(PresenceChange::Joined(player.name.clone()));
            }
        }

        for (name, status) in self.statuses.iter_mut() {
            if !status.is_active && !status.left_notified && watched.contains(name.as_str()) {
                status.left_notified = true;
                status.joined_notified = false;
                changes.push(PresenceChange::Left(name.clone()));
            }
        }

        changes
    }

    /// Scan, then publish each change on `bus`.
    pub async fn scan_and_publish(
        &mut self,
        watchlist: &[WatchlistEntry],
        server: &Server,
        bus: &EventBus,
    ) -> Vec<PresenceChange> {
        let changes = self.scan(watchlist, server);
        for change in &changes {
            tracing::info!(server = %server.id, player = change.player(), "{:?}", change);
            bus.publish(change.clone().into_event(server)).await;
        }
        changes
    }
}

/// Scanner task: consume poll results in order, publish presence changes,
/// forward each record to the result sink. Ends on cancellation or when the
/// poller's channel closes.
pub async fn run_scanner(
    mut results: mpsc::Receiver<Server>,
    watchlist: Arc<dyn Watchlist>,
    bus: EventBus,
    sink: mpsc::Sender<Server>,
    metrics: Arc<ObserverMetrics>,
    token: CancellationToken,
) {
    let mut scanner = PresenceScanner::new();
    loop {
        let server = tokio::select! {
            _ = token.cancelled() => break,
            next = results.recv() => match next {
                Some(server) => server,
                None => break,
            },
        };

        let entries = watchlist.list().await;
        scanner.scan_and_publish(&entries, &server, &bus).await;
        metrics.record_scan(server.id);

        if let Err(mpsc::error::TrySendError::Full(server)) = sink.try_send(server) {
            tracing::debug!(server = %server.id, "result sink full, record dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overseer_core::{Player, PlayersInfo};

    fn snapshot(names: &[&str]) -> Server {
        let mut server = Server::new("Island", "10.0.0.1:27015").with_id(uuid::Uuid::new_v4());
        server.players_info = Some(PlayersInfo {
            players: names.iter().map(|n| Player::new(*n)).collect(),
        });
        server
    }

    fn watchlist(names: &[&str]) -> Vec<WatchlistEntry> {
        names.iter().map(|n| WatchlistEntry::new(*n)).collect()
    }

    fn joined(name: &str) -> PresenceChange {
        PresenceChange::Joined(name.to_string())
    }

    fn left(name: &str) -> PresenceChange {
        PresenceChange::Left(name.to_string())
    }

    #[test]
    fn test_join_leave_rejoin_sequence() {
        let wl = watchlist(&["Alice"]);
        let mut scanner = PresenceScanner::new();

        assert_eq!(scanner.scan(&wl, &snapshot(&["Alice", "Bob"])), vec![joined("Alice")]);
        assert!(scanner.scan(&wl, &snapshot(&["Alice", "Bob"])).is_empty());
        assert_eq!(scanner.scan(&wl, &snapshot(&["Bob"])), vec![left("Alice")]);
        assert!(scanner.scan(&wl, &snapshot(&["Bob"])).is_empty());
        assert_eq!(scanner.scan(&wl, &snapshot(&["Alice"])), vec![joined("Alice")]);
    }

    #[test]
    fn test_unwatched_players_never_notify() {
        let wl = watchlist(&["Alice"]);
        let mut scanner = PresenceScanner::new();

        assert!(scanner.scan(&wl, &snapshot(&["Bob"])).is_empty());
        assert!(scanner.scan(&wl, &snapshot(&[])).is_empty());
        assert_eq!(
            scanner.status("Bob"),
            Some(NotificationStatus::default())
        );
    }

    #[test]
    fn test_unseen_name_never_leaves() {
        let wl = watchlist(&["Alice"]);
        let mut scanner = PresenceScanner::new();
        assert!(scanner.scan(&wl, &snapshot(&[])).is_empty());
        assert!(scanner.status("Alice").is_none());
    }

    #[test]
    fn test_watchlisted_while_online_is_announced() {
        let mut scanner = PresenceScanner::new();
        assert!(scanner.scan(&[], &snapshot(&["Alice"])).is_empty());
        assert_eq!(
            scanner.scan(&watchlist(&["Alice"]), &snapshot(&["Alice"])),
            vec![joined("Alice")]
        );
    }

    #[test]
    fn test_missing_player_list_is_skipped() {
        let wl = watchlist(&["Alice"]);
        let mut scanner = PresenceScanner::new();
        scanner.scan(&wl, &snapshot(&["Alice"]));

        let mut blank = snapshot(&[]);
        blank.players_info = None;
        assert!(scanner.scan(&wl, &blank).is_empty());
        assert!(scanner.status("Alice").unwrap().is_active);
    }

    #[test]
    fn test_notified_flags_never_both_set() {
        let wl = watchlist(&["Alice", "Bob"]);
        let mut scanner = PresenceScanner::new();
        let rounds: [&[&str]; 6] = [
            &["Alice"],
            &["Bob"],
            &["Alice", "Bob"],
            &[],
            &["Bob"],
            &["Alice"],
        ];
        for names in rounds {
            scanner.scan(&wl, &snapshot(names));
            for name in ["Alice", "Bob"] {
                if let Some(status) = scanner.status(name) {
                    assert!(!(status.joined_notified && status.left_notified));
                }
            }
        }
    }

    #[tokio::test]
    async fn test_scan_and_publish_emits_events() {
        let bus = EventBus::new(8);
        let (_, mut rx) = bus.subscribe("test").await;
        let server = snapshot(&["Alice"]);
        let mut scanner = PresenceScanner::new();

        scanner
            .scan_and_publish(&watchlist(&["Alice"]), &server, &bus)
            .await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.message().as_deref(), Some("Alice joined the server Island"));
        assert_eq!(
            event,
            Event::PlayerJoined(PresenceNotice::new(&server, "Alice"))
        );
    }
}
