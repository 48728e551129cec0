//! Outputs Collector: gathers every node's captured output variable in
//! plan order, converts keys to camelCase, applies last-write-wins, flags
//! oversized artifacts, and masks secret values before they're persisted.
//! Grounded on this workspace's preference for plain `String`/`Vec<u8>`
//! manipulation over a dedicated text-processing crate — this is exactly
//! that kind of small, self-contained transform.

use std::collections::BTreeMap;

use dagu_types::{Dag, DagRunOutputs, OutputsMetadata, RunStatus};

use crate::plan::Plan;

/// Artifacts above this size only get a `tracing::warn!`, never an error —
/// oversized outputs are a warning, not a failure.
const SIZE_WARNING_BYTES: usize = 1024 * 1024;

/// Secrets shorter than this are never masked — matching too eagerly on a
/// short value would corrupt unrelated output.
const MIN_MASKABLE_SECRET_LEN: usize = 3;

/// The sentinel substituted for every masked secret value.
const MASK_SENTINEL: &str = "*******";

pub struct OutputsCollector<'a> {
    dag: &'a Dag,
    plan: &'a Plan,
}

impl<'a> OutputsCollector<'a> {
    pub fn new(dag: &'a Dag, plan: &'a Plan) -> Self {
        Self { dag, plan }
    }

    /// Collect every node's declared output variable in plan (step
    /// declaration) order, last-write-wins on key collision, then mask
    /// `secrets` values. Steps with no `Output` or with `OutputOmit` set are
    /// skipped, matching §4.5 steps 1-4.
    pub async fn collect(&self, secrets: &[String]) -> BTreeMap<String, String> {
        let mut merged: BTreeMap<String, String> = BTreeMap::new();

        for node in self.plan.nodes() {
            if node.step.output_omit {
                continue;
            }
            let Some(output_name) = &node.step.output else {
                continue;
            };
            let snapshot = node.snapshot().await;
            if snapshot.output_variables.is_empty() {
                continue;
            }
            let Some(kv) = snapshot.output_variables.get(output_name) else {
                continue;
            };
            let Some((_, value)) = kv.split_once('=') else {
                tracing::warn!(step = %node.step.name, "output variable entry is not in KEY=value form");
                continue;
            };

            let key = match &node.step.output_key {
                Some(explicit) if !explicit.is_empty() => explicit.clone(),
                _ => to_camel_case(output_name),
            };
            merged.insert(key, value.to_string());
        }

        let total_bytes: usize = merged.values().map(|v| v.len()).sum();
        if total_bytes > SIZE_WARNING_BYTES {
            tracing::warn!(
                dag = %self.dag.name,
                bytes = total_bytes,
                "collected outputs exceed 1MiB, consider trimming captured output"
            );
        }

        mask_secrets(&mut merged, secrets);
        merged
    }

    pub async fn build_artifact(
        &self,
        dag_run_id: &str,
        attempt_id: &str,
        status: RunStatus,
        secrets: &[String],
    ) -> DagRunOutputs {
        let outputs = self.collect(secrets).await;
        let metadata = OutputsMetadata {
            dag_name: self.dag.name.clone(),
            dag_run_id: dag_run_id.to_string(),
            attempt_id: attempt_id.to_string(),
            status: status.to_string(),
            completed_at: dagu_types::time::to_rfc3339(Some(chrono::Utc::now())),
            params: serde_json::to_string(&self.dag.params).unwrap_or_else(|_| "[]".to_string()),
        };
        DagRunOutputs::new(metadata, outputs)
    }
}

/// Mask every occurrence of `secrets` values inside `merged`'s values, longest
/// first so a longer secret isn't left partially exposed by an earlier,
/// shorter substring match.
fn mask_secrets(merged: &mut BTreeMap<String, String>, secrets: &[String]) {
    let mut sorted: Vec<&String> = secrets
        .iter()
        .filter(|s| s.len() >= MIN_MASKABLE_SECRET_LEN)
        .collect();
    sorted.sort_by(|a, b| b.len().cmp(&a.len()));

    if sorted.is_empty() {
        return;
    }

    for value in merged.values_mut() {
        for secret in &sorted {
            if value.contains(secret.as_str()) {
                *value = value.replace(secret.as_str(), MASK_SENTINEL);
            }
        }
    }
}

/// `my_var` / `my-var` -> `myVar`. Already-camelCase keys pass through.
fn to_camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut uppercase_next = false;
    for ch in key.chars() {
        if ch == '_' || ch == '-' {
            uppercase_next = true;
            continue;
        }
        if uppercase_next {
            out.extend(ch.to_uppercase());
            uppercase_next = false;
        } else {
            out.extend(ch.to_lowercase());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_case_keys_become_camel_case() {
        assert_eq!(to_camel_case("dag_name"), "dagName");
        assert_eq!(to_camel_case("my-var"), "myVar");
        assert_eq!(to_camel_case("already"), "already");
    }

    #[test]
    fn screaming_snake_case_output_names_become_camel_case() {
        assert_eq!(to_camel_case("MY_OUTPUT_VAR"), "myOutputVar");
        assert_eq!(to_camel_case("RESPONSE"), "response");
    }

    #[test]
    fn masking_prefers_longer_secrets_first() {
        let mut merged = BTreeMap::new();
        merged.insert("token".to_string(), "sk-abcdef-suffix".to_string());
        let secrets = vec!["sk-abcdef".to_string(), "abc".to_string()];
        mask_secrets(&mut merged, &secrets);
        assert_eq!(merged["token"], "*******-suffix");
    }

    #[test]
    fn short_secrets_are_never_masked() {
        let mut merged = BTreeMap::new();
        merged.insert("x".to_string(), "ab".to_string());
        let secrets = vec!["ab".to_string()];
        mask_secrets(&mut merged, &secrets);
        assert_eq!(merged["x"], "ab");
    }
}
