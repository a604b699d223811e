//! Honeypot liveness monitoring
//!
//! On a fixed interval, expands the configured target list into one
//! probe per (domain, port) pair and checks whether each port still
//! accepts TCP connections. Probes run through a semaphore-gated pool so
//! a large target list never opens an unbounded number of sockets; each
//! probe races its connect against a timeout and releases the socket on
//! every path. Ticks are independent: the target list is re-read each
//! time and nothing else is carried over.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::HoneypotConfig;
use crate::models::{PortStatus, Target};
use crate::publish::Publisher;
use crate::storage::Store;

/// One (domain, port) pair to probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTask {
    pub domain: String,
    pub port: u16,
}

/// Flatten targets into individual probe tasks.
pub fn expand_targets(targets: &[Target]) -> Vec<ProbeTask> {
    targets
        .iter()
        .flat_map(|t| {
            t.ports.iter().map(|&port| ProbeTask {
                domain: t.domain.clone(),
                port,
            })
        })
        .collect()
}

/// Attempt a TCP connect with a deadline. Connect errors and timeouts
/// both mean "not alive"; the socket is closed on every outcome.
pub async fn probe_port(domain: &str, port: u16, timeout: Duration) -> bool {
    let addr = format!("{domain}:{port}");
    match tokio::time::timeout(timeout, TcpStream::connect(addr.as_str())).await {
        Ok(Ok(stream)) => {
            drop(stream);
            true
        }
        Ok(Err(_)) | Err(_) => false,
    }
}

/// Run every item through `f` with at most `limit` invocations in flight.
/// Each item is processed exactly once; completion order is unspecified.
/// A panicking task is logged and does not disturb the others.
pub async fn run_with_limit<T, F, Fut>(items: Vec<T>, limit: usize, f: F)
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let f = Arc::new(f);
    let mut handles = Vec::with_capacity(items.len());

    for item in items {
        // The semaphore is never closed, so acquisition only waits
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let f = Arc::clone(&f);
        handles.push(tokio::spawn(async move {
            f(item).await;
            drop(permit);
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            warn!("probe task failed: {e}");
        }
    }
}

/// Periodic prober over the stored target list.
pub struct LivenessProber {
    config: HoneypotConfig,
    store: Arc<dyn Store>,
    publisher: Publisher,
}

impl LivenessProber {
    pub fn new(config: HoneypotConfig, store: Arc<dyn Store>, publisher: Publisher) -> Self {
        Self {
            config,
            store,
            publisher,
        }
    }

    /// Run scan ticks forever. Intended to be spawned as its own task.
    pub async fn run(self) {
        if !self.config.enabled {
            info!("Honeypot monitoring is disabled");
            return;
        }

        info!(
            "Honeypot monitor started (interval: {}s, concurrency: {})",
            self.config.interval_secs, self.config.concurrency
        );

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        loop {
            interval.tick().await;
            self.scan_once().await;
        }
    }

    /// One full tick: re-read targets, probe every (domain, port) pair,
    /// publish one status per probe.
    pub async fn scan_once(&self) {
        let targets = self.store.load_targets().unwrap_or_else(|e| {
            warn!("failed to read honeypot targets: {e:#}");
            Vec::new()
        });

        let tasks = expand_targets(&targets);
        if tasks.is_empty() {
            debug!("no honeypot targets configured");
            return;
        }

        debug!("probing {} target ports", tasks.len());

        let publisher = self.publisher.clone();
        let timeout = Duration::from_millis(self.config.timeout_ms);

        run_with_limit(tasks, self.config.concurrency, move |task: ProbeTask| {
            let publisher = publisher.clone();
            async move {
                let alive = probe_port(&task.domain, task.port, timeout).await;
                publisher.publish_port_status(PortStatus {
                    domain: task.domain,
                    port: task.port,
                    alive,
                    ts: Utc::now(),
                });
            }
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;
    use tokio::net::TcpListener;

    #[test]
    fn test_expand_targets() {
        let targets = vec![
            Target {
                domain: "pot-a.example.org".to_string(),
                ports: vec![22, 80],
            },
            Target {
                domain: "pot-b.example.org".to_string(),
                ports: vec![443],
            },
            Target {
                domain: "portless.example.org".to_string(),
                ports: vec![],
            },
        ];

        let tasks = expand_targets(&targets);
        assert_eq!(tasks.len(), 3);
        assert_eq!(
            tasks[0],
            ProbeTask {
                domain: "pot-a.example.org".to_string(),
                port: 22
            }
        );
        assert_eq!(tasks[2].port, 443);
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<u32> = (0..200).collect();
        let (active_c, peak_c, completed_c) =
            (active.clone(), peak.clone(), completed.clone());

        run_with_limit(tasks, 50, move |_| {
            let active = active_c.clone();
            let peak = peak_c.clone();
            let completed = completed_c.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                completed.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 50);
        assert_eq!(completed.load(Ordering::SeqCst), 200);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_abort_others() {
        let completed = Arc::new(AtomicUsize::new(0));
        let completed_c = completed.clone();

        run_with_limit(vec![0u32, 1, 2, 3], 2, move |i| {
            let completed = completed_c.clone();
            async move {
                if i == 1 {
                    panic!("boom");
                }
                completed.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

        assert_eq!(completed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_probe_open_port_is_alive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(probe_port("127.0.0.1", port, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_probe_closed_port_is_dead() {
        // Bind then drop to find a port that is very likely closed
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(!probe_port("127.0.0.1", port, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_probe_resolves_within_timeout() {
        // Non-routable address: either refused fast or dropped until the
        // deadline. Both must resolve as not alive, without hanging.
        let start = Instant::now();
        let alive = probe_port("10.255.255.1", 81, Duration::from_millis(200)).await;

        assert!(!alive);
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_scan_publishes_one_status_per_task() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed_port = closed.local_addr().unwrap().port();
        drop(closed);

        let store = Arc::new(MemoryStore::with_targets(vec![Target {
            domain: "127.0.0.1".to_string(),
            ports: vec![open_port, closed_port],
        }]));

        let publisher = Publisher::new(64);
        let mut rx = publisher.subscribe_port_status();

        let prober = LivenessProber::new(HoneypotConfig::default(), store, publisher);
        prober.scan_once().await;

        let mut statuses = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        statuses.sort_by_key(|s| s.port != open_port);

        assert!(statuses[0].alive);
        assert_eq!(statuses[0].port, open_port);
        assert!(!statuses[1].alive);
        assert_eq!(statuses[1].port, closed_port);
        assert!(rx.try_recv().is_err());
    }
}
