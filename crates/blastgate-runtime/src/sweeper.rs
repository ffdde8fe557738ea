//! Liveness sweeper: periodically marks silent devices dead.

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::registry::RegistryHandle;

/// Run one sweep at the current time. Returns the ids newly marked dead.
pub async fn sweep_once(registry: &RegistryHandle, keepalive: TimeDelta) -> Vec<String> {
    let newly_dead = registry.sweep(Utc::now(), keepalive).await;
    for id in &newly_dead {
        info!(device = %id, "no message within keepalive window; marking dead");
    }
    newly_dead
}

/// Sweep every `period` until `cancel` fires.
pub async fn run_sweeper(
    registry: RegistryHandle,
    keepalive: TimeDelta,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!(?period, keepalive_secs = keepalive.num_seconds(), "liveness sweeper started");

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("liveness sweeper stopped");
                break;
            }
            _ = ticker.tick() => {
                sweep_once(&registry, keepalive).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blastgate_core::registry::{DeviceClassifier, DeviceRegistry};

    /// Registry where each `(id, secs_ago)` gate last acked `secs_ago` seconds back.
    fn handle_with(gates: &[(&str, i64)]) -> RegistryHandle {
        let mut reg = DeviceRegistry::new(DeviceClassifier::new("0", ["tablesaw"]));
        for (id, secs_ago) in gates {
            reg.upsert_ack(id, "open", Utc::now() - TimeDelta::seconds(*secs_ago));
        }
        RegistryHandle::new(reg)
    }

    #[tokio::test]
    async fn sweeper_marks_silent_devices_and_stops_on_cancel() {
        let registry = handle_with(&[("5", 120), ("6", 0)]);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_sweeper(
            registry.clone(),
            TimeDelta::seconds(60),
            Duration::from_millis(10),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!registry.get("5").await.expect("exists").alive);
        assert!(registry.get("6").await.expect("exists").alive);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("sweeper exits after cancel")
            .expect("sweeper does not panic");
    }

    #[tokio::test]
    async fn revived_device_stays_alive_until_silent_again() {
        let registry = handle_with(&[("5", 120)]);
        assert_eq!(sweep_once(&registry, TimeDelta::seconds(60)).await, vec!["5"]);

        registry.heartbeat("5", r#"{"gatePos":"open"}"#).await;
        assert!(sweep_once(&registry, TimeDelta::seconds(60)).await.is_empty());
        assert!(registry.get("5").await.expect("exists").alive);
    }
}
