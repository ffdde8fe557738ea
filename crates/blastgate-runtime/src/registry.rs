//! Shared handle around the core [`DeviceRegistry`].
//!
//! All access goes through one async mutex; every mutation bumps a `watch`
//! revision so tool-switch runs wake as soon as a gate reports instead of
//! sleeping out their poll interval.

use std::sync::Arc;

use blastgate_core::registry::{DeviceRegistry, HeartbeatOutcome};
use blastgate_core::types::{DeviceKind, DeviceRecord};
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{Mutex, watch};

#[derive(Clone)]
pub struct RegistryHandle {
    inner: Arc<Mutex<DeviceRegistry>>,
    revision: Arc<watch::Sender<u64>>,
}

impl RegistryHandle {
    pub fn new(registry: DeviceRegistry) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(registry)),
            revision: Arc::new(revision),
        }
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }

    /// Receiver notified after every registry change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub async fn heartbeat(&self, id: &str, payload: &str) -> HeartbeatOutcome {
        let outcome = self
            .inner
            .lock()
            .await
            .upsert_heartbeat(id, payload, Utc::now());
        self.bump();
        outcome
    }

    pub async fn ack(&self, id: &str, payload: &str) -> DeviceKind {
        let kind = self.inner.lock().await.upsert_ack(id, payload, Utc::now());
        self.bump();
        kind
    }

    pub async fn tool_sensor(&self, id: &str, payload: &str) -> DeviceKind {
        let kind = self
            .inner
            .lock()
            .await
            .upsert_tool_sensor(id, payload, Utc::now());
        self.bump();
        kind
    }

    /// Sweep stale devices. Waiters are only woken if something died.
    pub async fn sweep(&self, now: DateTime<Utc>, keepalive: TimeDelta) -> Vec<String> {
        let newly_dead = self.inner.lock().await.sweep_stale(now, keepalive);
        if !newly_dead.is_empty() {
            self.bump();
        }
        newly_dead
    }

    pub async fn snapshot(&self) -> Vec<DeviceRecord> {
        self.inner.lock().await.snapshot()
    }

    pub async fn get(&self, id: &str) -> Option<DeviceRecord> {
        self.inner.lock().await.get(id).cloned()
    }
}
