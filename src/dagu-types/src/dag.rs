//! The DAG and Step definitions that a Plan is built from.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A single precondition gate evaluated before a step (or the whole DAG) runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precondition {
    /// Shell condition to evaluate.
    pub condition: String,
    /// Expected stdout (trimmed) for the condition to be considered satisfied.
    pub expected: String,
}

/// Exit-code / outcome classes that a downstream step may accept from a
/// predecessor it depends on, instead of requiring plain success.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContinueOn {
    /// Continue if the predecessor failed.
    #[serde(default)]
    pub failure: bool,
    /// Continue if the predecessor was skipped (precondition not met).
    #[serde(default)]
    pub skipped: bool,
    /// Continue if the predecessor exited with one of these codes.
    #[serde(default)]
    pub exit_codes: Vec<i32>,
}

impl ContinueOn {
    /// Whether `status` (one of Failed/Skipped/Aborted) is acceptable to a
    /// dependent under this policy, given the exit code that produced it.
    pub fn accepts(&self, status: crate::node::NodeStatus, exit_code: Option<i32>) -> bool {
        use crate::node::NodeStatus::*;
        match status {
            Succeeded | PartiallySucceeded => true,
            Failed | Aborted => {
                self.failure || exit_code.is_some_and(|c| self.exit_codes.contains(&c))
            }
            Skipped => self.skipped,
            NotStarted | Running => false,
        }
    }
}

/// Retry policy for a failed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub limit: u32,
    /// Base interval between retries.
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    /// Multiply `interval` by this factor after every retry (1.0 = fixed).
    #[serde(default = "RetryPolicy::default_backoff")]
    pub backoff_factor: f64,
}

impl RetryPolicy {
    fn default_backoff() -> f64 {
        1.0
    }

    /// Interval to sleep before the `attempt`-th retry (1-indexed).
    pub fn interval_for(&self, attempt: u32) -> Duration {
        if self.backoff_factor <= 1.0 {
            return self.interval;
        }
        let multiplier = self.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(self.interval.as_secs_f64() * multiplier)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 0,
            interval: Duration::from_secs(0),
            backoff_factor: 1.0,
        }
    }
}

/// Repeat policy: re-run a step after it terminates, while a condition holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatPolicy {
    /// Re-run while this condition's command exits 0.
    pub condition: Option<String>,
    /// Interval between repeats.
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    /// Stop repeating after this many runs (0 = unlimited).
    #[serde(default)]
    pub limit: u32,
}

/// A named reference to a secret, resolved at Agent init.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    /// Name the resolved value is exposed under (`NAME=value`).
    pub name: String,
    /// Provider key, e.g. `"env"` or `"file"`.
    pub provider: String,
    /// Provider-specific lookup key (env var name, file path, ...).
    pub key: String,
}

/// On which run outcomes mail notification is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MailOn {
    #[serde(default)]
    pub failure: bool,
    #[serde(default)]
    pub success: bool,
}

/// One step of a DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Unique name within the DAG.
    pub name: String,
    /// Command to execute (argv[0]).
    pub command: String,
    /// Arguments to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Names of steps this step depends on.
    #[serde(default)]
    pub depends: Vec<String>,
    /// Variable name this step's output is captured into (`KEY=value`).
    /// Uppercase by convention.
    #[serde(default)]
    pub output: Option<String>,
    /// Explicit outputs-artifact key; defaults to camelCase(`output`).
    #[serde(default)]
    pub output_key: Option<String>,
    /// If true, this step's output is never collected.
    #[serde(default)]
    pub output_omit: bool,
    /// Send mail if this step ultimately fails.
    #[serde(default)]
    pub mail_on_error: bool,
    /// Outcomes from predecessors this step accepts instead of plain success.
    #[serde(default)]
    pub continue_on: ContinueOn,
    /// Retry policy on failure.
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    /// Repeat policy on terminal.
    #[serde(default)]
    pub repeat_policy: Option<RepeatPolicy>,
    /// Preconditions gating execution of this step.
    #[serde(default)]
    pub preconditions: Vec<Precondition>,
    /// Step-local environment overrides.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory override.
    #[serde(default)]
    pub dir: Option<String>,
    /// Signal to send instead of SIGTERM when `allowOverride` is set.
    #[serde(default)]
    pub signal_on_stop: Option<String>,
}

impl Step {
    /// Full argv, command followed by args.
    pub fn argv(&self) -> Vec<String> {
        let mut v = Vec::with_capacity(1 + self.args.len());
        v.push(self.command.clone());
        v.extend(self.args.iter().cloned());
        v
    }
}

/// A parsed DAG: an ordered sequence of steps plus lifecycle handlers and
/// run-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dag {
    pub name: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub on_init: Option<Step>,
    #[serde(default)]
    pub on_exit: Option<Step>,
    #[serde(default)]
    pub on_success: Option<Step>,
    #[serde(default)]
    pub on_failure: Option<Step>,
    #[serde(default)]
    pub on_cancel: Option<Step>,
    #[serde(default)]
    pub on_wait: Option<Step>,
    #[serde(default)]
    pub secrets: Vec<SecretRef>,
    #[serde(default)]
    pub preconditions: Vec<Precondition>,
    /// Ordered `KEY=value` params, preserved in source order.
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub hist_retention_days: Option<u32>,
    /// 0 = unlimited concurrent steps.
    #[serde(default)]
    pub max_active_steps: usize,
    #[serde(default, with = "duration_secs_opt")]
    pub timeout: Option<Duration>,
    #[serde(default, with = "duration_secs")]
    pub delay: Duration,
    #[serde(default = "Dag::default_max_cleanup", with = "duration_secs")]
    pub max_cleanup_time: Duration,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub mail_on: MailOn,
}

impl Dag {
    fn default_max_cleanup() -> Duration {
        Duration::from_secs(60)
    }

    /// Find a step by name.
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Dag.params joined as `KEY=value KEY=value ...` (for display).
    pub fn params_joined(&self) -> String {
        self.params.join(" ")
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

mod duration_secs_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs: Option<f64> = Option::deserialize(d)?;
        Ok(secs.map(|s| Duration::from_secs_f64(s.max(0.0))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continue_on_accepts_failure_only_when_declared() {
        let c = ContinueOn {
            failure: true,
            ..Default::default()
        };
        assert!(c.accepts(crate::node::NodeStatus::Failed, None));
        assert!(!ContinueOn::default().accepts(crate::node::NodeStatus::Failed, None));
    }

    #[test]
    fn continue_on_accepts_declared_exit_codes() {
        let c = ContinueOn {
            exit_codes: vec![2, 3],
            ..Default::default()
        };
        assert!(c.accepts(crate::node::NodeStatus::Failed, Some(2)));
        assert!(!c.accepts(crate::node::NodeStatus::Failed, Some(1)));
    }

    #[test]
    fn retry_backoff_scales_interval() {
        let rp = RetryPolicy {
            limit: 3,
            interval: Duration::from_secs(1),
            backoff_factor: 2.0,
        };
        assert_eq!(rp.interval_for(1), Duration::from_secs(1));
        assert_eq!(rp.interval_for(2), Duration::from_secs(2));
        assert_eq!(rp.interval_for(3), Duration::from_secs(4));
    }
}
