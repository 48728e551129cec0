//! `DagRunOutputs` (v2): the persisted outputs artifact.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The outputs artifact's version. Bump only on a breaking format change.
pub const OUTPUTS_VERSION: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputsMetadata {
    pub dag_name: String,
    pub dag_run_id: String,
    pub attempt_id: String,
    /// The final run status's `Display` string (e.g. `"succeeded"`).
    pub status: String,
    /// RFC3339 UTC completion time.
    pub completed_at: String,
    /// JSON-array-encoded `Dag.params`, preserved in source order.
    pub params: String,
}

/// The outputs artifact persisted via the attempt after a run completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagRunOutputs {
    pub version: u32,
    pub metadata: OutputsMetadata,
    /// `camelCaseKey -> masked value`. Absent (not written) when empty —
    /// enforced by the caller, not by this type.
    pub outputs: BTreeMap<String, String>,
}

impl DagRunOutputs {
    pub fn new(metadata: OutputsMetadata, outputs: BTreeMap<String, String>) -> Self {
        Self {
            version: OUTPUTS_VERSION,
            metadata,
            outputs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_expected_field_names() {
        let meta = OutputsMetadata {
            dag_name: "etl".into(),
            dag_run_id: "r1".into(),
            attempt_id: "a1".into(),
            status: "succeeded".into(),
            completed_at: "2026-07-28T00:00:00Z".into(),
            params: "[]".into(),
        };
        let artifact = DagRunOutputs::new(meta, BTreeMap::from([("myVar".into(), "1".into())]));
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["version"], 2);
        assert_eq!(json["metadata"]["dagName"], "etl");
        assert_eq!(json["outputs"]["myVar"], "1");
    }
}
