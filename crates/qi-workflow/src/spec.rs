// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The closed set of node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Stages the normalized input into state.  Exactly one per spec.
    Input,
    /// Pure transform over state; no I/O.
    Processing,
    /// Invokes the tool provider; results append to the tool-result list.
    Tool,
    /// Invokes the prompt handler with an assembled context.
    Reasoning,
    /// Finalizes the workflow output; at least one must be reachable.
    Output,
    /// Routes execution by evaluating a condition over state.
    Decision,
    /// Asserts predicates over state; failure aborts the workflow.
    Validation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    pub kind: NodeKind,
    /// Keyed parameters; string values may reference state (`$input`,
    /// `$derived`, `$last_result`, `$reasoning`).
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub required_tools: Vec<String>,
    /// Dependencies in addition to the edge set; treated as unconditioned
    /// edges.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Retry count on failure (tool nodes mostly).  Default 0.
    #[serde(default)]
    pub retries: u32,
    /// A best-effort node records its failure as an error result and lets
    /// execution proceed.
    #[serde(default)]
    pub best_effort: bool,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            params: BTreeMap::new(),
            required_tools: Vec::new(),
            depends_on: Vec::new(),
            retries: 0,
            best_effort: false,
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub from: String,
    pub to: String,
    /// For edges out of decision nodes: "true" / "false" branch labels.
    #[serde(default)]
    pub condition: Option<String>,
}

/// A directed acyclic task graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    #[serde(default)]
    pub name: String,
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("workflow spec has no nodes")]
    Empty,
    #[error("duplicate node id '{0}'")]
    DuplicateNodeId(String),
    #[error("edge references missing node: {from} -> {to}")]
    DanglingEdge { from: String, to: String },
    #[error("workflow graph contains a cycle")]
    Cycle,
    #[error("workflow spec must have exactly one input node, found {0}")]
    InputCount(usize),
    #[error("workflow spec has no output node")]
    NoOutput,
    #[error("node '{0}' is not reachable from the input node")]
    Unreachable(String),
    #[error("node '{0}' reaches no output node")]
    NoPathToOutput(String),
}

impl SpecError {
    pub fn code(&self) -> &'static str {
        "INVALID_WORKFLOW_SPEC"
    }
}

impl WorkflowSpec {
    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// All edges, with `depends_on` entries materialized as unconditioned
    /// edges and duplicates removed.
    pub fn effective_edges(&self) -> Vec<WorkflowEdge> {
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut edges = Vec::new();
        for e in &self.edges {
            if seen.insert((e.from.clone(), e.to.clone())) {
                edges.push(e.clone());
            }
        }
        for n in &self.nodes {
            for dep in &n.depends_on {
                if seen.insert((dep.clone(), n.id.clone())) {
                    edges.push(WorkflowEdge {
                        from: dep.clone(),
                        to: n.id.clone(),
                        condition: None,
                    });
                }
            }
        }
        edges
    }

    /// Structural validation: unique ids, no dangling edges, exactly one
    /// input, at least one output, acyclic, every non-input node reachable
    /// from the input, every non-output node on a path to an output.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.nodes.is_empty() {
            return Err(SpecError::Empty);
        }
        let mut ids = HashSet::new();
        for n in &self.nodes {
            if !ids.insert(n.id.as_str()) {
                return Err(SpecError::DuplicateNodeId(n.id.clone()));
            }
        }

        let edges = self.effective_edges();
        for e in &edges {
            if !ids.contains(e.from.as_str()) || !ids.contains(e.to.as_str()) {
                return Err(SpecError::DanglingEdge {
                    from: e.from.clone(),
                    to: e.to.clone(),
                });
            }
        }

        let inputs: Vec<&WorkflowNode> = self
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Input)
            .collect();
        if inputs.len() != 1 {
            return Err(SpecError::InputCount(inputs.len()));
        }
        if !self.nodes.iter().any(|n| n.kind == NodeKind::Output) {
            return Err(SpecError::NoOutput);
        }

        self.topo_order()?;

        // Forward reachability from the input node.
        let forward: HashMap<&str, Vec<&str>> = adjacency(&edges, |e| (&e.from, &e.to));
        let reached = flood(inputs[0].id.as_str(), &forward);
        for n in &self.nodes {
            if n.kind != NodeKind::Input && !reached.contains(n.id.as_str()) {
                return Err(SpecError::Unreachable(n.id.clone()));
            }
        }

        // Backward reachability from the output nodes.
        let backward: HashMap<&str, Vec<&str>> = adjacency(&edges, |e| (&e.to, &e.from));
        let mut reaches_output: HashSet<&str> = HashSet::new();
        for n in self.nodes.iter().filter(|n| n.kind == NodeKind::Output) {
            reaches_output.extend(flood(n.id.as_str(), &backward));
        }
        for n in &self.nodes {
            if n.kind != NodeKind::Output && !reaches_output.contains(n.id.as_str()) {
                return Err(SpecError::NoPathToOutput(n.id.clone()));
            }
        }
        Ok(())
    }

    /// Kahn topological ordering; `Err(Cycle)` when one exists.
    pub fn topo_order(&self) -> Result<Vec<String>, SpecError> {
        let edges = self.effective_edges();
        let mut indegree: HashMap<&str, usize> =
            self.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
        let mut out: HashMap<&str, Vec<&str>> = HashMap::new();
        for e in &edges {
            *indegree.entry(e.to.as_str()).or_default() += 1;
            out.entry(e.from.as_str()).or_default().push(e.to.as_str());
        }
        // Deterministic order: seed queue in node-declaration order.
        let mut queue: VecDeque<&str> = self
            .nodes
            .iter()
            .filter(|n| indegree[n.id.as_str()] == 0)
            .map(|n| n.id.as_str())
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = queue.pop_front() {
            order.push(id.to_string());
            if let Some(nexts) = out.get(id) {
                for next in nexts {
                    let d = indegree.get_mut(next).expect("edge endpoints validated");
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(next);
                    }
                }
            }
        }
        if order.len() != self.nodes.len() {
            return Err(SpecError::Cycle);
        }
        Ok(order)
    }

    /// Topological levels: nodes in one level have no edges between them, so
    /// tool/processing siblings within a level may run concurrently.
    pub fn topo_levels(&self) -> Result<Vec<Vec<String>>, SpecError> {
        let order = self.topo_order()?;
        let edges = self.effective_edges();
        let mut level: HashMap<&str, usize> = HashMap::new();
        let incoming: HashMap<&str, Vec<&str>> = adjacency(&edges, |e| (&e.to, &e.from));
        for id in &order {
            let l = incoming
                .get(id.as_str())
                .map(|parents| {
                    parents
                        .iter()
                        .map(|p| level.get(p).copied().unwrap_or(0) + 1)
                        .max()
                        .unwrap_or(0)
                })
                .unwrap_or(0);
            level.insert(id.as_str(), l);
        }
        let max_level = level.values().copied().max().unwrap_or(0);
        let mut levels = vec![Vec::new(); max_level + 1];
        for id in &order {
            levels[level[id.as_str()]].push(id.clone());
        }
        Ok(levels)
    }

    /// Content-addressed hash of the graph structure.  Node and edge order
    /// do not matter; parameter values do.
    pub fn structural_hash(&self) -> String {
        let mut nodes: Vec<String> = self
            .nodes
            .iter()
            .map(|n| {
                let params = serde_json::to_string(&n.params).unwrap_or_default();
                let mut deps = n.depends_on.clone();
                deps.sort();
                format!(
                    "{}|{:?}|{}|{}|{}|{}",
                    n.id,
                    n.kind,
                    params,
                    deps.join(","),
                    n.retries,
                    n.best_effort
                )
            })
            .collect();
        nodes.sort();
        let mut edges: Vec<String> = self
            .effective_edges()
            .iter()
            .map(|e| {
                format!(
                    "{}->{}[{}]",
                    e.from,
                    e.to,
                    e.condition.as_deref().unwrap_or("")
                )
            })
            .collect();
        edges.sort();

        let mut hasher = Sha256::new();
        for n in nodes {
            hasher.update(n.as_bytes());
            hasher.update(b"\n");
        }
        hasher.update(b"--\n");
        for e in edges {
            hasher.update(e.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}

fn adjacency<'a>(
    edges: &'a [WorkflowEdge],
    pick: impl Fn(&'a WorkflowEdge) -> (&'a String, &'a String),
) -> HashMap<&'a str, Vec<&'a str>> {
    let mut map: HashMap<&str, Vec<&str>> = HashMap::new();
    for e in edges {
        let (k, v) = pick(e);
        map.entry(k.as_str()).or_default().push(v.as_str());
    }
    map
}

fn flood<'a>(start: &'a str, adj: &HashMap<&'a str, Vec<&'a str>>) -> HashSet<&'a str> {
    let mut seen = HashSet::new();
    let mut stack = vec![start];
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        if let Some(nexts) = adj.get(id) {
            stack.extend(nexts.iter().copied());
        }
    }
    seen
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn linear() -> WorkflowSpec {
        WorkflowSpec {
            name: "linear".into(),
            nodes: vec![
                WorkflowNode::new("in", NodeKind::Input),
                WorkflowNode::new("work", NodeKind::Processing),
                WorkflowNode::new("out", NodeKind::Output),
            ],
            edges: vec![
                WorkflowEdge { from: "in".into(), to: "work".into(), condition: None },
                WorkflowEdge { from: "work".into(), to: "out".into(), condition: None },
            ],
        }
    }

    #[test]
    fn linear_spec_is_valid() {
        assert!(linear().validate().is_ok());
    }

    #[test]
    fn empty_spec_is_rejected() {
        let spec = WorkflowSpec { name: String::new(), nodes: vec![], edges: vec![] };
        assert_eq!(spec.validate(), Err(SpecError::Empty));
    }

    #[test]
    fn duplicate_node_ids_are_rejected() {
        let mut spec = linear();
        spec.nodes.push(WorkflowNode::new("work", NodeKind::Processing));
        assert!(matches!(spec.validate(), Err(SpecError::DuplicateNodeId(_))));
    }

    #[test]
    fn dangling_edge_is_rejected() {
        let mut spec = linear();
        spec.edges.push(WorkflowEdge {
            from: "work".into(),
            to: "ghost".into(),
            condition: None,
        });
        assert!(matches!(spec.validate(), Err(SpecError::DanglingEdge { .. })));
    }

    #[test]
    fn cycle_is_rejected() {
        let mut spec = linear();
        spec.edges.push(WorkflowEdge {
            from: "out".into(),
            to: "in".into(),
            condition: None,
        });
        assert_eq!(spec.validate(), Err(SpecError::Cycle));
    }

    #[test]
    fn two_input_nodes_are_rejected() {
        let mut spec = linear();
        spec.nodes.push(WorkflowNode::new("in2", NodeKind::Input));
        spec.edges.push(WorkflowEdge { from: "in2".into(), to: "work".into(), condition: None });
        assert_eq!(spec.validate(), Err(SpecError::InputCount(2)));
    }

    #[test]
    fn missing_output_is_rejected() {
        let spec = WorkflowSpec {
            name: String::new(),
            nodes: vec![
                WorkflowNode::new("in", NodeKind::Input),
                WorkflowNode::new("work", NodeKind::Processing),
            ],
            edges: vec![WorkflowEdge { from: "in".into(), to: "work".into(), condition: None }],
        };
        assert_eq!(spec.validate(), Err(SpecError::NoOutput));
    }

    #[test]
    fn unreachable_node_is_rejected() {
        let mut spec = linear();
        spec.nodes.push(WorkflowNode::new("island", NodeKind::Processing));
        spec.edges.push(WorkflowEdge {
            from: "island".into(),
            to: "out".into(),
            condition: None,
        });
        assert_eq!(spec.validate(), Err(SpecError::Unreachable("island".into())));
    }

    #[test]
    fn dead_end_node_is_rejected() {
        let mut spec = linear();
        spec.nodes.push(WorkflowNode::new("sink", NodeKind::Processing));
        spec.edges.push(WorkflowEdge { from: "in".into(), to: "sink".into(), condition: None });
        assert_eq!(spec.validate(), Err(SpecError::NoPathToOutput("sink".into())));
    }

    #[test]
    fn depends_on_acts_as_an_edge() {
        let mut spec = linear();
        // Add a tool node with a dependency expressed via depends_on only.
        let mut tool = WorkflowNode::new("t", NodeKind::Tool);
        tool.depends_on = vec!["in".into()];
        spec.nodes.push(tool);
        spec.edges.push(WorkflowEdge { from: "t".into(), to: "out".into(), condition: None });
        assert!(spec.validate().is_ok());
        let order = spec.topo_order().unwrap();
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("in") < pos("t"));
        assert!(pos("t") < pos("out"));
    }

    #[test]
    fn topo_order_respects_edges() {
        let order = linear().topo_order().unwrap();
        assert_eq!(order, vec!["in", "work", "out"]);
    }

    #[test]
    fn topo_levels_group_independent_siblings() {
        let spec = WorkflowSpec {
            name: "diamond".into(),
            nodes: vec![
                WorkflowNode::new("in", NodeKind::Input),
                WorkflowNode::new("a", NodeKind::Tool),
                WorkflowNode::new("b", NodeKind::Tool),
                WorkflowNode::new("out", NodeKind::Output),
            ],
            edges: vec![
                WorkflowEdge { from: "in".into(), to: "a".into(), condition: None },
                WorkflowEdge { from: "in".into(), to: "b".into(), condition: None },
                WorkflowEdge { from: "a".into(), to: "out".into(), condition: None },
                WorkflowEdge { from: "b".into(), to: "out".into(), condition: None },
            ],
        };
        let levels = spec.topo_levels().unwrap();
        assert_eq!(levels[0], vec!["in"]);
        assert_eq!(levels[1], vec!["a", "b"]);
        assert_eq!(levels[2], vec!["out"]);
    }

    #[test]
    fn structural_hash_ignores_declaration_order() {
        let a = linear();
        let mut b = linear();
        b.nodes.reverse();
        b.edges.reverse();
        assert_eq!(a.structural_hash(), b.structural_hash());
    }

    #[test]
    fn structural_hash_changes_with_params() {
        let a = linear();
        let mut b = linear();
        b.nodes[1] = WorkflowNode::new("work", NodeKind::Processing)
            .with_param("operation", "reverse");
        assert_ne!(a.structural_hash(), b.structural_hash());
    }

    #[test]
    fn spec_round_trips_through_json() {
        let spec = linear();
        let json = serde_json::to_string(&spec).unwrap();
        let back: WorkflowSpec = serde_json::from_str(&json).unwrap();
        assert!(back.validate().is_ok());
        assert_eq!(back.structural_hash(), spec.structural_hash());
    }
}
