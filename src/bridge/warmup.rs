//! Bridge cache warmup.

use std::sync::Arc;
use std::time::Duration;

use crate::bridge::LegacyBridge;
use crate::lifecycle::ShutdownSignal;

/// How a warmup run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmupOutcome {
    /// A probe succeeded after `attempts` calls.
    Warmed { attempts: u32 },
    /// The signal fired first.
    Cancelled { attempts: u32 },
}

/// Probe `bridge` until one listing succeeds.
///
/// The first probe runs immediately, later ones `interval` apart. A probe in
/// flight when `signal` fires is abandoned. Failures are only logged at
/// debug level.
pub async fn warm_up(
    bridge: Arc<dyn LegacyBridge>,
    interval: Duration,
    mut signal: ShutdownSignal,
) -> WarmupOutcome {
    let mut attempts = 0u32;

    loop {
        if signal.is_triggered() {
            return WarmupOutcome::Cancelled { attempts };
        }

        attempts += 1;
        let probe = tokio::select! {
            biased;
            _ = signal.recv() => return WarmupOutcome::Cancelled { attempts },
            res = bridge.list() => res,
        };

        match probe {
            Ok(volumes) => {
                tracing::info!(attempts, volumes = volumes.len(), "Bridge warmed up");
                return WarmupOutcome::Warmed { attempts };
            }
            Err(e) => tracing::debug!(attempts, error = %e, "Bridge warmup probe failed"),
        }

        tokio::select! {
            biased;
            _ = signal.recv() => return WarmupOutcome::Cancelled { attempts },
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeError, VolumeRecord};
    use crate::lifecycle::Shutdown;
    use async_trait::async_trait;
    use axum::Router;
    use std::sync::Mutex;
    use tokio::time::Instant;

    struct Flaky {
        failures: u32,
        calls: Mutex<Vec<Instant>>,
    }

    impl Flaky {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LegacyBridge for Flaky {
        async fn list(&self) -> Result<Vec<VolumeRecord>, BridgeError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Instant::now());
            if calls.len() as u32 <= self.failures {
                Err(BridgeError::NotReady("cache empty".into()))
            } else {
                Ok(Vec::new())
            }
        }

        fn router(&self) -> Router {
            Router::new()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_first_success_then_stops() {
        let bridge = Flaky::new(2);
        let shutdown = Shutdown::new();
        let start = Instant::now();

        let outcome = warm_up(bridge.clone(), Duration::from_secs(1), shutdown.subscribe()).await;
        assert_eq!(outcome, WarmupOutcome::Warmed { attempts: 3 });

        let calls = bridge.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0] - start, Duration::ZERO);
        assert_eq!(calls[1] - calls[0], Duration::from_secs(1));
        assert_eq!(calls[2] - calls[1], Duration::from_secs(1));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(bridge.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_within_one_interval() {
        let bridge = Flaky::new(u32::MAX);
        let shutdown = Shutdown::new();
        let task = tokio::spawn(warm_up(bridge.clone(), Duration::from_secs(1), shutdown.subscribe()));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let cancelled_at = Instant::now();
        shutdown.trigger();

        let outcome = task.await.unwrap();
        assert!(matches!(outcome, WarmupOutcome::Cancelled { attempts: 3 }));
        assert!(Instant::now() - cancelled_at < Duration::from_secs(1));
        assert_eq!(bridge.calls().len(), 3);
    }

    #[tokio::test]
    async fn already_cancelled_never_probes() {
        let bridge = Flaky::new(0);
        let shutdown = Shutdown::new();
        shutdown.trigger();

        let outcome = warm_up(bridge.clone(), Duration::from_secs(1), shutdown.subscribe()).await;
        assert_eq!(outcome, WarmupOutcome::Cancelled { attempts: 0 });
        assert!(bridge.calls().is_empty());
    }
}
