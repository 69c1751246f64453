// Overseer Observer
//
// Poll workers, presence scanning and the reconciler that keeps one worker
// per stored server.

pub mod backoff;
pub mod metrics;
pub mod observer;
pub mod poller;
pub mod sanitize;
pub mod scanner;

pub use backoff::Backoff;
pub use metrics::{MetricsSnapshot, ObserverMetrics};
pub use observer::{Observer, ObserverError, ReconcileReport};
pub use poller::{poll_once, spawn_poller, PollSettings};
pub use sanitize::{correct_player_count, strip_padding, Sanitize};
pub use scanner::{run_scanner, NotificationStatus, PresenceChange, PresenceScanner};
