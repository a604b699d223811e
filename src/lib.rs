//! netvigil: traffic anomaly detection and honeypot liveness monitoring
//!
//! The core is three pieces: a fixed-window traffic counter
//! ([`stats::WindowedCounter`]), a rule engine classifying request
//! events into detections ([`detector::RuleEngine`]), and a bounded
//! prober checking that honeypot ports still accept connections
//! ([`honeypot::LivenessProber`]). Persistence and event fan-out sit
//! behind [`storage::Store`] and [`publish::Publisher`].

pub mod config;
pub mod detector;
pub mod honeypot;
pub mod models;
pub mod publish;
pub mod stats;
pub mod storage;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use config::Config;
use detector::RuleEngine;
use honeypot::LivenessProber;
use models::{Detection, NewRule, Rule, Snapshot, TrafficEvent};
use publish::Publisher;
use stats::WindowedCounter;
use storage::{JsonStore, Store};

/// Core netvigil instance
///
/// Owns the traffic counter and rule engine and drives them from a
/// single caller per event; wrap it in your own synchronization if you
/// ingest from more than one task.
pub struct Netvigil {
    config: Config,
    store: Arc<dyn Store>,
    publisher: Publisher,
    counter: WindowedCounter,
    engine: RuleEngine,
}

impl Netvigil {
    /// Create an instance backed by JSON files in the configured data
    /// directory.
    pub fn new(config: Config) -> Self {
        let store: Arc<dyn Store> = Arc::new(JsonStore::new(config.data_dir()));
        Self::with_store(config, store)
    }

    /// Create an instance with a custom store (used by tests and
    /// embedders).
    pub fn with_store(config: Config, store: Arc<dyn Store>) -> Self {
        let publisher = Publisher::new(config.detector.channel_capacity);
        let counter = WindowedCounter::new(config.detector.window_secs);
        let engine = RuleEngine::new(
            config.detector.window_secs,
            store.clone(),
            publisher.clone(),
        );

        Self {
            config,
            store,
            publisher,
            counter,
            engine,
        }
    }

    /// Record one inbound request: stats first, then rule evaluation.
    pub fn record_request(&mut self, event: TrafficEvent) {
        self.counter.record_at(&event.source, event.ts.timestamp());
        self.engine.record_event(event);
    }

    /// Current traffic window statistics.
    pub fn snapshot(&mut self) -> Snapshot {
        self.counter.snapshot()
    }

    pub fn add_rule(&mut self, spec: NewRule) -> Result<Rule> {
        self.engine.add_rule(spec)
    }

    pub fn remove_rule(&mut self, id: &str) -> Result<bool> {
        self.engine.remove_rule(id)
    }

    pub fn list_rules(&self) -> Vec<Rule> {
        self.engine.list_rules()
    }

    pub fn list_detections(&self, limit: usize) -> Vec<Detection> {
        self.engine.list_detections(limit)
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Daemon runner: ingestion channel, periodic snapshot publication, and
/// the honeypot prober task.
pub struct Daemon {
    core: Netvigil,
    ingest_tx: mpsc::Sender<TrafficEvent>,
    ingest_rx: mpsc::Receiver<TrafficEvent>,
}

impl Daemon {
    pub fn new(core: Netvigil) -> Self {
        let (ingest_tx, ingest_rx) = mpsc::channel(1024);
        Self {
            core,
            ingest_tx,
            ingest_rx,
        }
    }

    /// Handle the ingestion side uses to push request events through.
    pub fn ingest_handle(&self) -> mpsc::Sender<TrafficEvent> {
        self.ingest_tx.clone()
    }

    /// Run until interrupted.
    pub async fn run(self) -> Result<()> {
        let Self {
            mut core,
            ingest_tx,
            mut ingest_rx,
        } = self;
        // Keep our own sender alive so the channel never closes while
        // external producers come and go
        let _ingest_tx = ingest_tx;

        let prober = LivenessProber::new(
            core.config.honeypot.clone(),
            core.store(),
            core.publisher.clone(),
        );
        let prober_handle = tokio::spawn(prober.run());

        let mut stats_interval = tokio::time::interval(std::time::Duration::from_secs(
            core.config.detector.stats_interval_secs.max(1),
        ));
        let mut shutdown = Box::pin(tokio::signal::ctrl_c());

        info!("Daemon started, waiting for traffic events");

        loop {
            tokio::select! {
                Some(event) = ingest_rx.recv() => {
                    core.record_request(event);
                }

                _ = stats_interval.tick() => {
                    let snapshot = core.snapshot();
                    core.publisher.publish_snapshot(snapshot);
                }

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        prober_handle.abort();
        info!("Daemon stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MatchSpec;
    use crate::storage::MemoryStore;

    fn test_core() -> Netvigil {
        Netvigil::with_store(Config::default(), Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_record_request_feeds_stats_and_rules() {
        let mut core = test_core();
        core.add_rule(NewRule::new(MatchSpec::PortOnly {
            port: Some(22),
            ports: vec![],
        }))
        .unwrap();

        core.record_request(TrafficEvent::new("10.9.0.1").with_port(22));
        core.record_request(TrafficEvent::new("10.9.0.2").with_port(80));

        let snap = core.snapshot();
        assert_eq!(snap.total_in_window, 2);
        assert_eq!(snap.unique_sources, 2);

        let detections = core.list_detections(10);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].source, "10.9.0.1");
    }

    #[tokio::test]
    async fn test_daemon_exposes_ingest_handle() {
        let daemon = Daemon::new(test_core());
        let handle = daemon.ingest_handle();
        assert!(handle.try_send(TrafficEvent::new("10.9.0.3")).is_ok());
    }
}
