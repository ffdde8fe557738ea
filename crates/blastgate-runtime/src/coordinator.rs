//! Tool-switch coordinator.
//!
//! ```text
//! Idle ─tool on─▶ Publishing ─▶ Polling ─┬─▶ Settling ─▶ Converged (collector on)
//!                                        ├─▶ TimedOut   (collector stays off)
//!                                        └─▶ Cancelled  (superseded, tool off, shutdown)
//! ```
//!
//! Runs are single-flight: a new activation cancels the outstanding run
//! before publishing its own configuration. Each run waits on registry
//! change notifications, re-checks every poll interval, and gives up at a
//! hard deadline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use blastgate_core::config::TimingConfig;
use blastgate_core::plan::{ConvergenceCheck, GateCommandPlan, ToolGateMap, check_convergence};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{Actuator, GateCommander};
use crate::registry::RegistryHandle;

// ─── Timing ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchTiming {
    pub poll_interval: Duration,
    pub deadline: Duration,
    pub settle_delay: Duration,
}

impl From<&TimingConfig> for SwitchTiming {
    fn from(timing: &TimingConfig) -> Self {
        Self {
            poll_interval: timing.poll_interval(),
            deadline: timing.switch_deadline(),
            settle_delay: timing.settle_delay(),
        }
    }
}

// ─── Phase / outcome ─────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchPhase {
    #[default]
    Idle,
    Publishing,
    Polling,
    /// Gates match; waiting out the settle delay before the collector starts.
    Settling,
    Converged,
    TimedOut,
    Cancelled,
}

impl SwitchPhase {
    /// Terminal phases accept a new activation just like `Idle`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Idle | Self::Converged | Self::TimedOut | Self::Cancelled
        )
    }
}

/// How a single run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchOutcome {
    Converged { attempts: u32 },
    TimedOut { attempts: u32, pending: ConvergenceCheck },
    Cancelled,
}

/// Latest run, as shown by the status server.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SwitchReport {
    pub run_id: u64,
    pub tool: Option<String>,
    pub phase: SwitchPhase,
    pub commands_sent: usize,
    pub attempts: u32,
    pub pending_gate: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

struct InFlight {
    run_id: u64,
    tool: String,
    cancel: CancellationToken,
}

// ─── Coordinator ─────────────────────────────────────────────────────

pub struct ToolSwitchCoordinator {
    map: ToolGateMap,
    registry: RegistryHandle,
    commander: GateCommander,
    actuator: Arc<dyn Actuator>,
    timing: SwitchTiming,
    /// Parent of every run token; cancelled on daemon shutdown.
    shutdown: CancellationToken,
    in_flight: Mutex<Option<InFlight>>,
    next_run: AtomicU64,
    report: watch::Sender<SwitchReport>,
}

impl ToolSwitchCoordinator {
    pub fn new(
        map: ToolGateMap,
        registry: RegistryHandle,
        commander: GateCommander,
        actuator: Arc<dyn Actuator>,
        timing: SwitchTiming,
        shutdown: CancellationToken,
    ) -> Self {
        let (report, _) = watch::channel(SwitchReport::default());
        Self {
            map,
            registry,
            commander,
            actuator,
            timing,
            shutdown,
            in_flight: Mutex::new(None),
            next_run: AtomicU64::new(0),
            report,
        }
    }

    pub fn report(&self) -> SwitchReport {
        self.report.borrow().clone()
    }

    /// Watch the run report (phase changes of the latest run).
    pub fn subscribe(&self) -> watch::Receiver<SwitchReport> {
        self.report.subscribe()
    }

    /// Tool reported `"on"`: cancel any outstanding run and start a new one.
    ///
    /// Returns `None` for a tool without a gate mapping. The returned handle
    /// may be dropped; the run keeps going.
    pub fn activate(self: &Arc<Self>, tool_id: &str) -> Option<JoinHandle<SwitchOutcome>> {
        let Some(gates) = self.map.gates_for(tool_id) else {
            warn!(tool = %tool_id, "tool has no gate mapping; ignoring activation");
            return None;
        };
        let open_gates = gates.to_vec();

        let run_id = self.next_run.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = self.shutdown.child_token();

        {
            let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(previous) = slot.take() {
                info!(
                    superseded = %previous.tool,
                    by = %tool_id,
                    "cancelling unfinished tool switch"
                );
                previous.cancel.cancel();
            }
            *slot = Some(InFlight {
                run_id,
                tool: tool_id.to_owned(),
                cancel: cancel.clone(),
            });
        }

        self.report.send_replace(SwitchReport {
            run_id,
            tool: Some(tool_id.to_owned()),
            phase: SwitchPhase::Publishing,
            updated_at: Some(Utc::now()),
            ..SwitchReport::default()
        });

        let this = Arc::clone(self);
        let tool = tool_id.to_owned();
        Some(tokio::spawn(async move {
            let outcome = this.run_switch(run_id, &tool, &open_gates, &cancel).await;
            this.finish(run_id, &tool, &outcome);
            outcome
        }))
    }

    /// Tool reported `"off"`: switch the collector off right away. A run for
    /// the same tool still in flight is cancelled so it cannot arm the
    /// collector afterwards. Gates are left where they are.
    pub fn deactivate(&self, tool_id: &str) {
        let stale_run = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take_if(|f| f.tool == tool_id);
        if let Some(run) = stale_run {
            info!(tool = %tool_id, "tool stopped before its gates settled");
            run.cancel.cancel();
        }
        info!(tool = %tool_id, "tool off; switching collector off");
        self.actuator.turn_off();
    }

    /// Cancel whatever run is in flight. Returns `true` if one was cancelled.
    pub fn cancel_in_flight(&self) -> bool {
        let run = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match run {
            Some(run) => {
                debug!(tool = %run.tool, run_id = run.run_id, "tool switch cancelled");
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn set_report(&self, run_id: u64, f: impl FnOnce(&mut SwitchReport)) {
        self.report.send_if_modified(|report| {
            // A superseded run must not overwrite its successor's report.
            if report.run_id != run_id {
                return false;
            }
            f(report);
            report.updated_at = Some(Utc::now());
            true
        });
    }

    async fn run_switch(
        &self,
        run_id: u64,
        tool: &str,
        open_gates: &[String],
        cancel: &CancellationToken,
    ) -> SwitchOutcome {
        if cancel.is_cancelled() {
            return SwitchOutcome::Cancelled;
        }
        // Subscribe before publishing so no acknowledgement is missed.
        let mut changes = self.registry.subscribe();

        let snapshot = self.registry.snapshot().await;
        let plan = GateCommandPlan::for_open_set(&snapshot, open_gates);
        let sent = self.commander.publish_plan(&plan);
        info!(
            tool,
            open = ?plan.opened().collect::<Vec<_>>(),
            commands = sent,
            "published gate configuration"
        );
        self.set_report(run_id, |r| {
            r.phase = SwitchPhase::Polling;
            r.commands_sent = sent;
        });

        let deadline = Instant::now() + self.timing.deadline;
        let mut ticker = interval_at(
            Instant::now() + self.timing.poll_interval,
            self.timing.poll_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let snapshot = self.registry.snapshot().await;
            let check = check_convergence(&snapshot, open_gates);

            let ConvergenceCheck::Pending {
                gate_id,
                expected,
                actual,
            } = &check
            else {
                break;
            };
            debug!(
                tool,
                gate = %gate_id,
                %expected,
                actual = %actual,
                attempts,
                "gates not settled yet"
            );
            self.set_report(run_id, |r| {
                r.attempts = attempts;
                r.pending_gate = Some(gate_id.clone());
            });

            if Instant::now() >= deadline {
                warn!(
                    tool,
                    gate = %gate_id,
                    %expected,
                    actual = %actual,
                    attempts,
                    "gates did not converge before the deadline; collector left off"
                );
                return SwitchOutcome::TimedOut {
                    attempts,
                    pending: check,
                };
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return SwitchOutcome::Cancelled,
                () = sleep_until(deadline) => {}
                changed = changes.changed() => {
                    if changed.is_err() {
                        ticker.tick().await;
                    }
                }
                _ = ticker.tick() => {}
            }
        }

        info!(tool, attempts, "gates converged; waiting for them to settle");
        self.set_report(run_id, |r| {
            r.phase = SwitchPhase::Settling;
            r.attempts = attempts;
            r.pending_gate = None;
        });

        tokio::select! {
            biased;
            () = cancel.cancelled() => return SwitchOutcome::Cancelled,
            () = sleep(self.timing.settle_delay) => {}
        }

        if !self.arm_if_current(run_id, cancel) {
            return SwitchOutcome::Cancelled;
        }
        info!(tool, "collector switched on");
        SwitchOutcome::Converged { attempts }
    }

    /// Turn the collector on if `run_id` still owns the in-flight slot.
    ///
    /// `deactivate`, `activate` and `cancel_in_flight` all clear the slot
    /// under the same lock before cancelling, so holding it across
    /// `turn_on` orders the arm strictly before or after any of them.
    fn arm_if_current(&self, run_id: u64, cancel: &CancellationToken) -> bool {
        let slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let current = slot.as_ref().is_some_and(|f| f.run_id == run_id);
        if !current || cancel.is_cancelled() {
            return false;
        }
        self.actuator.turn_on();
        true
    }

    fn finish(&self, run_id: u64, tool: &str, outcome: &SwitchOutcome) {
        {
            let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.as_ref().is_some_and(|f| f.run_id == run_id) {
                *slot = None;
            }
        }

        let phase = match outcome {
            SwitchOutcome::Converged { .. } => SwitchPhase::Converged,
            SwitchOutcome::TimedOut { .. } => SwitchPhase::TimedOut,
            SwitchOutcome::Cancelled => {
                info!(tool, run_id, "tool switch cancelled");
                SwitchPhase::Cancelled
            }
        };
        self.set_report(run_id, |r| r.phase = phase);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
