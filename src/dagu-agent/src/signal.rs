//! Signal Controller : propagates OS signals to every currently
//! running node process, escalating to SIGKILL once `MaxCleanUpTime`
//! elapses. Grounded on `cortex-engine::terminal::process`'s
//! `libc::kill`-based `send_signal`/`kill` pair (graceful signal first, hard
//! kill after a grace window) — this crate uses the safer `nix` wrapper over
//! the same `kill(2)` syscall, keyed off the run's `PidRegistry` rather than
//! a single terminal's child handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{info, warn};

use crate::contracts::PidRegistry;
use crate::node::Node;
use crate::plan::Plan;

const RESEND_INTERVAL: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Raises the shared abort flag. Used by the `POST /stop` handler and the
/// Cancel Watcher; the Agent's watcher task observes the flip and drives
/// the actual `SignalController` ladder.
pub fn request_abort(abort: &AtomicBool) {
    abort.store(true, Ordering::SeqCst);
}

pub fn is_abort_requested(abort: &AtomicBool) -> bool {
    abort.load(Ordering::Relaxed)
}

/// Whether `sig` belongs to the termination set (§4.3): these open a timed
/// escalation window instead of being forwarded once.
pub fn is_termination_signal(sig: Signal) -> bool {
    matches!(
        sig,
        Signal::SIGINT | Signal::SIGTERM | Signal::SIGHUP | Signal::SIGQUIT
    )
}

/// Parses a step's `SignalOnStop` override (e.g. `"SIGUSR1"` or `"USR1"`)
/// into a `nix` `Signal`.
pub fn parse_signal_name(name: &str) -> Option<Signal> {
    let normalized = name.strip_prefix("SIG").unwrap_or(name).to_uppercase();
    match normalized.as_str() {
        "TERM" => Some(Signal::SIGTERM),
        "KILL" => Some(Signal::SIGKILL),
        "INT" => Some(Signal::SIGINT),
        "HUP" => Some(Signal::SIGHUP),
        "QUIT" => Some(Signal::SIGQUIT),
        "USR1" => Some(Signal::SIGUSR1),
        "USR2" => Some(Signal::SIGUSR2),
        _ => None,
    }
}

/// Drives signal propagation for one run: forwards a signal to every
/// running node's OS process via its registered pid, escalating
/// termination signals on a timed ladder.
pub struct SignalController {
    plan: Arc<Plan>,
    pid_registry: Arc<PidRegistry>,
    max_cleanup_time: Duration,
}

impl SignalController {
    pub fn new(plan: Arc<Plan>, pid_registry: Arc<PidRegistry>, max_cleanup_time: Duration) -> Self {
        Self {
            plan,
            pid_registry,
            max_cleanup_time,
        }
    }

    /// Entry point mirroring §4.3's `signal(ctx, sig, allowOverride)`.
    /// Non-termination signals are forwarded once; termination signals
    /// drive the escalation ladder until every running process exits or
    /// `max_cleanup_time` elapses.
    pub async fn signal(&self, sig: Signal, allow_override: bool) {
        if is_termination_signal(sig) {
            self.run_ladder(sig, allow_override).await;
        } else {
            self.send_to_running(sig, allow_override).await;
        }
    }

    async fn run_ladder(&self, sig: Signal, allow_override: bool) {
        info!(signal = %sig, "starting termination ladder");
        self.send_to_running(sig, allow_override).await;

        let deadline = Instant::now() + self.max_cleanup_time;
        let mut last_resend = Instant::now();

        loop {
            if !self.plan.is_running().await {
                info!("all node processes stopped, termination ladder finished");
                return;
            }

            if Instant::now() >= deadline {
                warn!("max cleanup time elapsed, force-killing remaining processes");
                self.send_to_running(Signal::SIGKILL, false).await;
                return;
            }

            if last_resend.elapsed() >= RESEND_INTERVAL {
                self.send_to_running(sig, allow_override).await;
                last_resend = Instant::now();
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn send_to_running(&self, sig: Signal, allow_override: bool) {
        for node in self.plan.nodes() {
            if node.status().await != dagu_types::NodeStatus::Running {
                continue;
            }
            let Some(pid) = self.pid_registry.get(&node.step.name).map(|e| *e.value()) else {
                continue;
            };
            let effective = effective_signal(node, sig, allow_override);
            if let Err(e) = signal::kill(Pid::from_raw(pid as i32), effective) {
                warn!(step = %node.step.name, pid, signal = %effective, error = %e, "failed to signal process");
            }
        }
    }
}

fn effective_signal(node: &Arc<Node>, default_sig: Signal, allow_override: bool) -> Signal {
    if !allow_override {
        return default_sig;
    }
    node.step
        .signal_on_stop
        .as_deref()
        .and_then(parse_signal_name)
        .unwrap_or(default_sig)
}
