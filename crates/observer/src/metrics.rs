// Observer Metrics
//
// Prometheus counters for the poll pipeline, kept in a registry owned by one
// observer so that several observers (and tests) never share series.
//
// - `overseer_scrapes_total{server}`        successful poll rounds
// - `overseer_failed_scrapes_total{server}` failed poll rounds
// - `overseer_scans_total{server}`          presence scans
// - `overseer_processed_results_total`      records written back to the store
// - `overseer_watched_servers`              current worker count

use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use uuid::Uuid;

pub struct ObserverMetrics {
    registry: Registry,
    scrapes: IntCounterVec,
    failed_scrapes: IntCounterVec,
    scans: IntCounterVec,
    processed: IntCounter,
    watched: IntGauge,
}

/// Point-in-time totals, summed over servers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub scrapes: u64,
    pub failed_scrapes: u64,
    pub scans: u64,
    pub processed: u64,
    pub watched: i64,
}

impl ObserverMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let scrapes = IntCounterVec::new(
            Opts::new("overseer_scrapes_total", "Successful query rounds"),
            &["server"],
        )?;
        let failed_scrapes = IntCounterVec::new(
            Opts::new("overseer_failed_scrapes_total", "Failed query rounds"),
            &["server"],
        )?;
        let scans = IntCounterVec::new(
            Opts::new("overseer_scans_total", "Presence scans of a poll result"),
            &["server"],
        )?;
        let processed = IntCounter::new(
            "overseer_processed_results_total",
            "Poll results written back to the store",
        )?;
        let watched = IntGauge::new("overseer_watched_servers", "Servers with a running worker")?;

        registry.register(Box::new(scrapes.clone()))?;
        registry.register(Box::new(failed_scrapes.clone()))?;
        registry.register(Box::new(scans.clone()))?;
        registry.register(Box::new(processed.clone()))?;
        registry.register(Box::new(watched.clone()))?;

        Ok(Self {
            registry,
            scrapes,
            failed_scrapes,
            scans,
            processed,
            watched,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_scrape(&self, server: Uuid) {
        self.scrapes.with_label_values(&[&server.to_string()]).inc();
    }

    pub fn record_failed_scrape(&self, server: Uuid) {
        self.failed_scrapes
            .with_label_values(&[&server.to_string()])
            .inc();
    }

    pub fn record_scan(&self, server: Uuid) {
        self.scans.with_label_values(&[&server.to_string()]).inc();
    }

    pub fn record_processed(&self) {
        self.processed.inc();
    }

    pub fn set_watched(&self, count: usize) {
        self.watched.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Drop the per-server series of a server that is no longer watched
    pub fn forget(&self, server: Uuid) {
        let label = server.to_string();
        for vec in [&self.scrapes, &self.failed_scrapes, &self.scans] {
            // absent when the worker never got that far
            let _ = vec.remove_label_values(&[&label]);
        }
    }

    pub fn scrapes(&self, server: Uuid) -> u64 {
        self.scrapes.with_label_values(&[&server.to_string()]).get()
    }

    pub fn failed_scrapes(&self, server: Uuid) -> u64 {
        self.failed_scrapes
            .with_label_values(&[&server.to_string()])
            .get()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            scrapes: total(&self.scrapes),
            failed_scrapes: total(&self.failed_scrapes),
            scans: total(&self.scans),
            processed: self.processed.get(),
            watched: self.watched.get(),
        }
    }

    /// Prometheus text exposition of every series
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn total(vec: &IntCounterVec) -> u64 {
    vec.collect()
        .iter()
        .flat_map(|family| family.get_metric())
        .map(|metric| metric.get_counter().get_value() as u64)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_sum_across_servers() {
        let metrics = ObserverMetrics::new().unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        metrics.record_scrape(a);
        metrics.record_scrape(a);
        metrics.record_scrape(b);
        metrics.record_failed_scrape(b);
        metrics.record_scan(a);
        metrics.record_processed();
        metrics.set_watched(2);

        assert_eq!(metrics.scrapes(a), 2);
        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                scrapes: 3,
                failed_scrapes: 1,
                scans: 1,
                processed: 1,
                watched: 2,
            }
        );
    }

    #[test]
    fn test_forget_drops_server_series() {
        let metrics = ObserverMetrics::new().unwrap();
        let gone = Uuid::new_v4();
        metrics.record_scrape(gone);
        metrics.forget(gone);
        metrics.forget(gone);

        assert_eq!(metrics.snapshot().scrapes, 0);
        assert!(!metrics.render().unwrap().contains(&gone.to_string()));
    }

    #[test]
    fn test_render_exposes_registered_families() {
        let metrics = ObserverMetrics::new().unwrap();
        metrics.record_processed();
        let text = metrics.render().unwrap();
        assert!(text.contains("overseer_processed_results_total 1"));
        assert!(text.contains("overseer_watched_servers 0"));
    }
}
