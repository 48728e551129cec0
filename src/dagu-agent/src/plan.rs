//! Plan Builder: turns a `Dag` (or a retry target) into the execution
//! graph the Runner drives.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dagu_types::{Dag, DagRunStatus, NodeState, NodeStatus, Step};
use tokio::sync::RwLock;

use crate::error::{AgentError, Result};
use crate::node::Node;

/// The execution graph over Nodes. Handler nodes (on_init etc.) are NOT
/// part of the Plan — the Runner owns those separately, since they run
/// outside the main dependency graph.
pub struct Plan {
    nodes: Vec<Arc<Node>>,
    by_name: HashMap<String, usize>,
    /// name -> names of steps that depend on it.
    dependents: HashMap<String, Vec<String>>,
    start_at: RwLock<Option<DateTime<Utc>>>,
    finish_at: RwLock<Option<DateTime<Utc>>>,
}

impl Plan {
    /// Fresh plan: one Node per Step, state NotStarted.
    pub fn from_dag(dag: &Dag) -> Result<Self> {
        validate_acyclic(dag)?;
        let nodes: Vec<Arc<Node>> = dag.steps.iter().cloned().map(Node::fresh).collect();
        Self::assemble(dag, nodes)
    }

    /// Retry plan (default): keep nodes from `target` verbatim except
    /// R = {failed|aborted} union their transitive successors, which are
    /// reset to NotStarted.
    pub fn from_retry_target(dag: &Dag, target: &DagRunStatus) -> Result<Self> {
        validate_acyclic(dag)?;
        let saved_by_name: HashMap<&str, &NodeState> = target
            .nodes
            .iter()
            .map(|n| (n.step_name.as_str(), n))
            .collect();

        let reset_set = transitive_reset_set(
            dag,
            target
                .nodes
                .iter()
                .filter(|n| matches!(n.status, NodeStatus::Failed | NodeStatus::Aborted))
                .map(|n| n.step_name.as_str())
                .collect(),
        );

        Self::build_from_saved(dag, &saved_by_name, &reset_set)
    }

    /// Retry plan (step): reset only the named step, leave its successors
    /// untouched.
    pub fn from_retry_step(dag: &Dag, target: &DagRunStatus, step_name: &str) -> Result<Self> {
        if dag.step(step_name).is_none() {
            return Err(AgentError::UnknownRetryStep(step_name.to_string()));
        }
        validate_acyclic(dag)?;
        let saved_by_name: HashMap<&str, &NodeState> = target
            .nodes
            .iter()
            .map(|n| (n.step_name.as_str(), n))
            .collect();

        let mut reset_set = HashSet::new();
        reset_set.insert(step_name.to_string());
        Self::build_from_saved(dag, &saved_by_name, &reset_set)
    }

    fn build_from_saved(
        dag: &Dag,
        saved_by_name: &HashMap<&str, &NodeState>,
        reset_set: &HashSet<String>,
    ) -> Result<Self> {
        let nodes: Vec<Arc<Node>> = dag
            .steps
            .iter()
            .map(|step| {
                if reset_set.contains(&step.name) {
                    Node::fresh(step.clone())
                } else if let Some(saved) = saved_by_name.get(step.name.as_str()) {
                    Node::from_saved(step.clone(), (*saved).clone())
                } else {
                    Node::fresh(step.clone())
                }
            })
            .collect();
        Self::assemble(dag, nodes)
    }

    fn assemble(dag: &Dag, nodes: Vec<Arc<Node>>) -> Result<Self> {
        let by_name: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.step.name.clone(), i))
            .collect();

        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for step in &dag.steps {
            dependents.entry(step.name.clone()).or_default();
        }
        for step in &dag.steps {
            for dep in &step.depends {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(step.name.clone());
            }
        }

        Ok(Self {
            nodes,
            by_name,
            dependents,
            start_at: RwLock::new(None),
            finish_at: RwLock::new(None),
        })
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn node(&self, name: &str) -> Option<&Arc<Node>> {
        self.by_name.get(name).map(|&i| &self.nodes[i])
    }

    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.dependents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub async fn node_data(&self) -> Vec<NodeState> {
        let mut out = Vec::with_capacity(self.nodes.len());
        for n in &self.nodes {
            out.push(n.snapshot().await);
        }
        out
    }

    pub async fn start_at(&self) -> Option<DateTime<Utc>> {
        *self.start_at.read().await
    }

    pub async fn finish_at(&self) -> Option<DateTime<Utc>> {
        *self.finish_at.read().await
    }

    pub async fn mark_started(&self) {
        let mut guard = self.start_at.write().await;
        if guard.is_none() {
            *guard = Some(Utc::now());
        }
    }

    pub async fn mark_finished(&self) {
        let mut guard = self.finish_at.write().await;
        *guard = Some(Utc::now());
    }

    pub async fn is_started(&self) -> bool {
        self.start_at.read().await.is_some()
    }

    pub async fn is_running(&self) -> bool {
        for n in &self.nodes {
            if n.status().await == NodeStatus::Running {
                return true;
            }
        }
        false
    }
}

/// Kahn's-algorithm acyclicity + unknown-dependency check.
fn validate_acyclic(dag: &Dag) -> Result<()> {
    let names: HashSet<&str> = dag.steps.iter().map(|s| s.name.as_str()).collect();
    for step in &dag.steps {
        for dep in &step.depends {
            if !names.contains(dep.as_str()) {
                return Err(AgentError::UnknownDependency {
                    step: step.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    let mut in_degree: HashMap<&str, usize> =
        dag.steps.iter().map(|s| (s.name.as_str(), s.depends.len())).collect();
    // successors: dep -> steps that depend on it
    let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
    for step in &dag.steps {
        for dep in &step.depends {
            successors.entry(dep.as_str()).or_default().push(step.name.as_str());
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|&(_, &deg)| deg == 0)
        .map(|(&name, _)| name)
        .collect();
    let mut visited = 0usize;

    while let Some(name) = queue.pop_front() {
        visited += 1;
        if let Some(succs) = successors.get(name) {
            for &succ in succs {
                let deg = in_degree.get_mut(succ).expect("successor exists in in_degree map");
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(succ);
                }
            }
        }
    }

    if visited != dag.steps.len() {
        let stuck = in_degree
            .iter()
            .find(|&(_, &deg)| deg > 0)
            .map(|(&name, _)| name.to_string())
            .unwrap_or_default();
        return Err(AgentError::Cycle(stuck));
    }

    Ok(())
}

/// R = `failed_or_aborted` union their transitive successors.
fn transitive_reset_set(dag: &Dag, failed_or_aborted: HashSet<&str>) -> HashSet<String> {
    let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
    for step in &dag.steps {
        for dep in &step.depends {
            successors.entry(dep.as_str()).or_default().push(step.name.as_str());
        }
    }

    let mut reset: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<&str> = failed_or_aborted.into_iter().collect();
    while let Some(name) = queue.pop_front() {
        if !reset.insert(name.to_string()) {
            continue;
        }
        if let Some(succs) = successors.get(name) {
            for &succ in succs {
                queue.push_back(succ);
            }
        }
    }
    reset
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagu_types::Step;

    fn step(name: &str, depends: &[&str]) -> Step {
        Step {
            name: name.to_string(),
            command: "true".to_string(),
            args: vec![],
            depends: depends.iter().map(|s| s.to_string()).collect(),
            output: None,
            output_key: None,
            output_omit: false,
            mail_on_error: false,
            continue_on: Default::default(),
            retry_policy: None,
            repeat_policy: None,
            preconditions: vec![],
            env: Default::default(),
            dir: None,
            signal_on_stop: None,
        }
    }

    fn dag(steps: Vec<Step>) -> Dag {
        Dag {
            name: "test".into(),
            steps,
            on_init: None,
            on_exit: None,
            on_success: None,
            on_failure: None,
            on_cancel: None,
            on_wait: None,
            secrets: vec![],
            preconditions: vec![],
            params: vec![],
            hist_retention_days: None,
            max_active_steps: 0,
            timeout: None,
            delay: std::time::Duration::ZERO,
            max_cleanup_time: std::time::Duration::from_secs(60),
            working_dir: None,
            mail_on: Default::default(),
        }
    }

    #[tokio::test]
    async fn fresh_plan_has_all_nodes_not_started() {
        let d = dag(vec![step("a", &[]), step("b", &["a"])]);
        let plan = Plan::from_dag(&d).unwrap();
        assert_eq!(plan.nodes().len(), 2);
        for n in plan.nodes() {
            assert_eq!(n.status().await, NodeStatus::NotStarted);
        }
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let d = dag(vec![step("a", &["ghost"])]);
        let err = Plan::from_dag(&d).unwrap_err();
        assert!(matches!(err, AgentError::UnknownDependency { .. }));
    }

    #[test]
    fn cycle_is_rejected() {
        let d = dag(vec![step("a", &["b"]), step("b", &["a"])]);
        let err = Plan::from_dag(&d).unwrap_err();
        assert!(matches!(err, AgentError::Cycle(_)));
    }

    #[tokio::test]
    async fn default_retry_resets_failed_node_and_its_successors_only() {
        let d = dag(vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["b"]),
            step("d", &[]),
        ]);

        let mut a = NodeState::fresh("a");
        a.status = NodeStatus::Succeeded;
        let mut b = NodeState::fresh("b");
        b.status = NodeStatus::Failed;
        let mut c = NodeState::fresh("c");
        c.status = NodeStatus::NotStarted;
        let mut dd = NodeState::fresh("d");
        dd.status = NodeStatus::Succeeded;

        let target = DagRunStatus {
            root: dagu_types::DagRunRef::none(),
            parent: dagu_types::DagRunRef::none(),
            name: "test".into(),
            dag_run_id: "r1".into(),
            attempt_id: "a1".into(),
            status: dagu_types::RunStatus::Failed,
            pid: None,
            nodes: vec![a, b, c, dd],
            handler_nodes: Default::default(),
            created_at: None,
            queued_at: None,
            started_at: None,
            finished_at: None,
            log: None,
            params: String::new(),
            params_list: vec![],
            preconditions: vec![],
        };

        let plan = Plan::from_retry_target(&d, &target).unwrap();
        assert_eq!(plan.node("a").unwrap().status().await, NodeStatus::Succeeded);
        assert_eq!(plan.node("b").unwrap().status().await, NodeStatus::NotStarted);
        assert_eq!(plan.node("c").unwrap().status().await, NodeStatus::NotStarted);
        assert_eq!(plan.node("d").unwrap().status().await, NodeStatus::Succeeded);
    }

    #[tokio::test]
    async fn step_retry_does_not_touch_successors() {
        let d = dag(vec![step("a", &[]), step("b", &["a"]), step("c", &["b"])]);
        let mut a = NodeState::fresh("a");
        a.status = NodeStatus::Succeeded;
        let mut b = NodeState::fresh("b");
        b.status = NodeStatus::Failed;
        let mut c = NodeState::fresh("c");
        c.status = NodeStatus::NotStarted;

        let target = DagRunStatus {
            root: dagu_types::DagRunRef::none(),
            parent: dagu_types::DagRunRef::none(),
            name: "test".into(),
            dag_run_id: "r1".into(),
            attempt_id: "a1".into(),
            status: dagu_types::RunStatus::Failed,
            pid: None,
            nodes: vec![a, b, c],
            handler_nodes: Default::default(),
            created_at: None,
            queued_at: None,
            started_at: None,
            finished_at: None,
            log: None,
            params: String::new(),
            params_list: vec![],
            preconditions: vec![],
        };

        let plan = Plan::from_retry_step(&d, &target, "b").unwrap();
        assert_eq!(plan.node("a").unwrap().status().await, NodeStatus::Succeeded);
        assert_eq!(plan.node("b").unwrap().status().await, NodeStatus::NotStarted);
    }

    #[test]
    fn unknown_retry_step_is_rejected() {
        let d = dag(vec![step("a", &[])]);
        let target = DagRunStatus {
            root: dagu_types::DagRunRef::none(),
            parent: dagu_types::DagRunRef::none(),
            name: "test".into(),
            dag_run_id: "r1".into(),
            attempt_id: "a1".into(),
            status: dagu_types::RunStatus::Failed,
            pid: None,
            nodes: vec![],
            handler_nodes: Default::default(),
            created_at: None,
            queued_at: None,
            started_at: None,
            finished_at: None,
            log: None,
            params: String::new(),
            params_list: vec![],
            preconditions: vec![],
        };
        let err = Plan::from_retry_step(&d, &target, "ghost").unwrap_err();
        assert!(matches!(err, AgentError::UnknownRetryStep(_)));
    }
}
