//! Dependency graph with an extended status lifecycle and cascade rules.
//!
//! The whole graph — node map, edges, and per-node status — lives behind a
//! single `tokio::sync::Mutex`. Structural edits never add edges, so the
//! graph is acyclic by construction once it passes validation; no runtime
//! recheck is needed after `Dag::build`.

use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;
use tokio::sync::Mutex;

/// One input record for [`Dag::build`].
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub id: String,
    pub task: String,
    pub depends: Vec<String>,
}

/// Extended node status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Pending,
    Running,
    Completed,
    Failed,
    Blocked,
    Suspended,
    Cancelled,
    Skipped,
    Ready,
    Retrying,
    Resuming,
    Replanning,
    Invalidated,
    Escalated,
    NeedsHuman,
}

#[derive(Debug, Clone)]
struct Node {
    task: String,
    depends: Vec<String>,
    status: Status,
    result: Option<String>,
    error: Option<String>,
}

/// Errors raised building or editing a [`Dag`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DagError {
    #[error("dag must contain at least one node")]
    Empty,
    #[error("node {node:?} depends on unknown node {dependency:?}")]
    UnknownDependency { node: String, dependency: String },
    #[error("dependency cycle detected involving node {0:?}")]
    CycleDetected(String),
    #[error("duplicate node id {0:?}")]
    DuplicateId(String),
    #[error("no such node {0:?}")]
    NoSuchNode(String),
    #[error("invalid transition for node {id:?}: cannot go from {from:?} via {op}")]
    InvalidTransition {
        id: String,
        from: Status,
        op: &'static str,
    },
}

/// A deterministic topological snapshot of a node: the caller-visible view
/// returned by [`Dag::node_slice`].
#[derive(Debug, Clone)]
pub struct NodeView {
    pub id: String,
    pub task: String,
    pub depends: Vec<String>,
    pub status: Status,
    pub result: Option<String>,
    pub error: Option<String>,
}

struct Inner {
    order: Vec<String>,
    nodes: HashMap<String, Node>,
}

/// A directed-acyclic task graph guarded by a single mutex.
pub struct Dag {
    inner: Mutex<Inner>,
}

impl Dag {
    /// Build a new [`Dag`], validating non-emptiness, dependency existence,
    /// and acyclicity via tri-color DFS. Rejects with no partial graph on
    /// any failure.
    pub fn build(specs: Vec<NodeSpec>) -> Result<Self, DagError> {
        if specs.is_empty() {
            return Err(DagError::Empty);
        }

        let mut order = Vec::with_capacity(specs.len());
        let mut nodes = HashMap::with_capacity(specs.len());
        for spec in &specs {
            if nodes.contains_key(&spec.id) {
                return Err(DagError::DuplicateId(spec.id.clone()));
            }
            order.push(spec.id.clone());
            nodes.insert(
                spec.id.clone(),
                Node {
                    task: spec.task.clone(),
                    depends: spec.depends.clone(),
                    status: Status::Pending,
                    result: None,
                    error: None,
                },
            );
        }

        for spec in &specs {
            for dep in &spec.depends {
                if !nodes.contains_key(dep) {
                    return Err(DagError::UnknownDependency {
                        node: spec.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        detect_cycle(&nodes)?;

        Ok(Self {
            inner: Mutex::new(Inner { order, nodes }),
        })
    }

    /// Nodes that are `Pending` with every dependency `Completed`.
    pub async fn ready_nodes(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner
            .order
            .iter()
            .filter(|id| {
                let node = &inner.nodes[*id];
                node.status == Status::Pending
                    && node
                        .depends
                        .iter()
                        .all(|dep| inner.nodes[dep].status == Status::Completed)
            })
            .cloned()
            .collect()
    }

    pub async fn status_of(&self, id: &str) -> Result<Status, DagError> {
        let inner = self.inner.lock().await;
        inner
            .nodes
            .get(id)
            .map(|n| n.status)
            .ok_or_else(|| DagError::NoSuchNode(id.to_string()))
    }

    pub async fn mark_running(&self, id: &str) -> Result<(), DagError> {
        let mut inner = self.inner.lock().await;
        let node = get_mut(&mut inner.nodes, id)?;
        node.status = Status::Running;
        Ok(())
    }

    pub async fn mark_ready(&self, id: &str) -> Result<(), DagError> {
        let mut inner = self.inner.lock().await;
        let node = get_mut(&mut inner.nodes, id)?;
        require(id, node.status, &[Status::Pending, Status::Blocked], "MarkReady")?;
        node.status = Status::Ready;
        Ok(())
    }

    pub async fn mark_blocked(&self, id: &str) -> Result<(), DagError> {
        let mut inner = self.inner.lock().await;
        let node = get_mut(&mut inner.nodes, id)?;
        require(id, node.status, &[Status::Pending], "MarkBlocked")?;
        node.status = Status::Blocked;
        Ok(())
    }

    pub async fn unblock(&self, id: &str) -> Result<(), DagError> {
        let mut inner = self.inner.lock().await;
        let node = get_mut(&mut inner.nodes, id)?;
        require(id, node.status, &[Status::Blocked], "Unblock")?;
        node.status = Status::Pending;
        Ok(())
    }

    pub async fn suspend(&self, id: &str) -> Result<(), DagError> {
        let mut inner = self.inner.lock().await;
        let node = get_mut(&mut inner.nodes, id)?;
        require(
            id,
            node.status,
            &[Status::Pending, Status::Blocked, Status::Running],
            "Suspend",
        )?;
        node.status = Status::Suspended;
        Ok(())
    }

    pub async fn resume(&self, id: &str) -> Result<(), DagError> {
        let mut inner = self.inner.lock().await;
        let node = get_mut(&mut inner.nodes, id)?;
        require(id, node.status, &[Status::Suspended], "Resume")?;
        node.status = Status::Pending;
        Ok(())
    }

    pub async fn mark_resuming(&self, id: &str) -> Result<(), DagError> {
        let mut inner = self.inner.lock().await;
        let node = get_mut(&mut inner.nodes, id)?;
        require(id, node.status, &[Status::Suspended], "MarkResuming")?;
        node.status = Status::Resuming;
        Ok(())
    }

    pub async fn mark_replanning(&self, id: &str) -> Result<(), DagError> {
        let mut inner = self.inner.lock().await;
        let node = get_mut(&mut inner.nodes, id)?;
        require(id, node.status, &[Status::Suspended], "MarkReplanning")?;
        node.status = Status::Replanning;
        Ok(())
    }

    pub async fn mark_retrying(&self, id: &str) -> Result<(), DagError> {
        let mut inner = self.inner.lock().await;
        let node = get_mut(&mut inner.nodes, id)?;
        require(id, node.status, &[Status::Failed], "MarkRetrying")?;
        node.status = Status::Retrying;
        Ok(())
    }

    pub async fn mark_needs_human(&self, id: &str) -> Result<(), DagError> {
        let mut inner = self.inner.lock().await;
        let node = get_mut(&mut inner.nodes, id)?;
        require(id, node.status, &[Status::Failed], "MarkNeedsHuman")?;
        node.status = Status::NeedsHuman;
        Ok(())
    }

    pub async fn invalidate(&self, id: &str) -> Result<(), DagError> {
        let mut inner = self.inner.lock().await;
        let node = get_mut(&mut inner.nodes, id)?;
        require(id, node.status, &[Status::Completed], "Invalidate")?;
        node.status = Status::Invalidated;
        Ok(())
    }

    pub async fn requeue(&self, id: &str) -> Result<(), DagError> {
        let mut inner = self.inner.lock().await;
        let node = get_mut(&mut inner.nodes, id)?;
        require(id, node.status, &[Status::Invalidated], "Requeue")?;
        node.status = Status::Pending;
        Ok(())
    }

    pub async fn escalate(&self, id: &str) -> Result<(), DagError> {
        let mut inner = self.inner.lock().await;
        let node = get_mut(&mut inner.nodes, id)?;
        require(
            id,
            node.status,
            &[Status::Retrying, Status::Resuming, Status::Replanning],
            "Escalate",
        )?;
        node.status = Status::Escalated;
        Ok(())
    }

    /// `Running -> Completed`, storing `result`.
    pub async fn mark_completed(&self, id: &str, result: impl Into<String>) -> Result<(), DagError> {
        let mut inner = self.inner.lock().await;
        let node = get_mut(&mut inner.nodes, id)?;
        require(id, node.status, &[Status::Running], "MarkCompleted")?;
        node.status = Status::Completed;
        node.result = Some(result.into());
        Ok(())
    }

    /// `Running -> Failed`, storing `msg`, then cascading `Failed` into every
    /// `Pending` node transitively depending on `id`.
    pub async fn mark_failed(&self, id: &str, msg: impl Into<String>) -> Result<(), DagError> {
        let mut inner = self.inner.lock().await;
        {
            let node = get_mut(&mut inner.nodes, id)?;
            require(id, node.status, &[Status::Running], "MarkFailed")?;
            node.status = Status::Failed;
            node.error = Some(msg.into());
        }
        cascade(&mut inner.nodes, id, Status::Failed, |upstream| {
            format!("dependency {upstream:?} failed")
        });
        Ok(())
    }

    /// Any non-terminal node `-> Cancelled`, then cascading `Skipped` into
    /// every `Pending`/`Blocked` node transitively depending on `id`.
    pub async fn cancel(&self, id: &str) -> Result<(), DagError> {
        let mut inner = self.inner.lock().await;
        {
            let node = get_mut(&mut inner.nodes, id)?;
            if is_terminal(node.status) {
                return Err(DagError::InvalidTransition {
                    id: id.to_string(),
                    from: node.status,
                    op: "Cancel",
                });
            }
            node.status = Status::Cancelled;
        }
        cascade_skip(&mut inner.nodes, id);
        Ok(())
    }

    /// Every node is in a terminal state.
    pub async fn is_complete(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.nodes.values().all(|n| is_terminal(n.status))
    }

    /// Any node is `Failed`.
    pub async fn has_failure(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.nodes.values().any(|n| n.status == Status::Failed)
    }

    /// Deterministic topological order: DFS visiting dependency-free roots
    /// in sorted-id order, breaking ties in child iteration the same way.
    pub async fn node_slice(&self) -> Vec<NodeView> {
        let inner = self.inner.lock().await;
        let order = topological_order(&inner.nodes);
        order
            .into_iter()
            .map(|id| {
                let node = &inner.nodes[&id];
                NodeView {
                    id,
                    task: node.task.clone(),
                    depends: node.depends.clone(),
                    status: node.status,
                    result: node.result.clone(),
                    error: node.error.clone(),
                }
            })
            .collect()
    }

    /// Delete `id` and strip it from every other node's dependency list.
    /// No-op if `id` is unknown.
    pub async fn remove_node(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        if inner.nodes.remove(id).is_none() {
            return;
        }
        inner.order.retain(|existing| existing != id);
        for node in inner.nodes.values_mut() {
            node.depends.retain(|dep| dep != id);
        }
    }
}

fn get_mut<'a>(nodes: &'a mut HashMap<String, Node>, id: &str) -> Result<&'a mut Node, DagError> {
    nodes
        .get_mut(id)
        .ok_or_else(|| DagError::NoSuchNode(id.to_string()))
}

fn require(id: &str, current: Status, allowed: &[Status], op: &'static str) -> Result<(), DagError> {
    if allowed.contains(&current) {
        Ok(())
    } else {
        Err(DagError::InvalidTransition {
            id: id.to_string(),
            from: current,
            op,
        })
    }
}

fn is_terminal(status: Status) -> bool {
    matches!(
        status,
        Status::Completed
            | Status::Failed
            | Status::Cancelled
            | Status::Skipped
            | Status::NeedsHuman
            | Status::Escalated
    )
}

/// Iterative worklist cascade: mark every `Pending` node transitively
/// depending on `root` as `new_status`, with an error message built from
/// whichever upstream node caused that particular node to fail.
fn cascade(
    nodes: &mut HashMap<String, Node>,
    root: &str,
    new_status: Status,
    message_for: impl Fn(&str) -> String,
) {
    let mut dependents: HashMap<&str, Vec<String>> = HashMap::new();
    for (id, node) in nodes.iter() {
        for dep in &node.depends {
            dependents.entry(dep.as_str()).or_default().push(id.clone());
        }
    }

    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<(String, String)> = VecDeque::new();
    queue.push_back((root.to_string(), root.to_string()));

    while let Some((upstream, current)) = queue.pop_front() {
        let Some(children) = dependents.get(current.as_str()) else {
            continue;
        };
        for child in children {
            if visited.contains(child) {
                continue;
            }
            let child_status = nodes[child].status;
            if child_status != Status::Pending {
                continue;
            }
            visited.insert(child.clone());
            if let Some(node) = nodes.get_mut(child) {
                node.status = new_status;
                node.error = Some(message_for(&upstream));
            }
            queue.push_back((upstream.clone(), child.clone()));
        }
    }
}

fn cascade_skip(nodes: &mut HashMap<String, Node>, root: &str) {
    let mut dependents: HashMap<&str, Vec<String>> = HashMap::new();
    for (id, node) in nodes.iter() {
        for dep in &node.depends {
            dependents.entry(dep.as_str()).or_default().push(id.clone());
        }
    }

    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back(root.to_string());

    while let Some(current) = queue.pop_front() {
        let Some(children) = dependents.get(current.as_str()) else {
            continue;
        };
        for child in children {
            if visited.contains(child) {
                continue;
            }
            let child_status = nodes[child].status;
            if !matches!(child_status, Status::Pending | Status::Blocked) {
                continue;
            }
            visited.insert(child.clone());
            if let Some(node) = nodes.get_mut(child) {
                node.status = Status::Skipped;
            }
            queue.push_back(child.clone());
        }
    }
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum Color {
    White,
    Gray,
    Black,
}

fn detect_cycle(nodes: &HashMap<String, Node>) -> Result<(), DagError> {
    let mut colors: HashMap<&str, Color> = nodes.keys().map(|id| (id.as_str(), Color::White)).collect();
    let mut sorted_ids: Vec<&str> = nodes.keys().map(|s| s.as_str()).collect();
    sorted_ids.sort_unstable();

    for start in &sorted_ids {
        if colors[start] == Color::White {
            visit(start, nodes, &mut colors)?;
        }
    }
    Ok(())
}

fn visit<'a>(
    id: &'a str,
    nodes: &'a HashMap<String, Node>,
    colors: &mut HashMap<&'a str, Color>,
) -> Result<(), DagError> {
    colors.insert(id, Color::Gray);
    let mut deps: Vec<&str> = nodes[id].depends.iter().map(|s| s.as_str()).collect();
    deps.sort_unstable();
    for dep in deps {
        match colors[dep] {
            Color::Gray => return Err(DagError::CycleDetected(dep.to_string())),
            Color::White => visit(dep, nodes, colors)?,
            Color::Black => {}
        }
    }
    colors.insert(id, Color::Black);
    Ok(())
}

fn topological_order(nodes: &HashMap<String, Node>) -> Vec<String> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut out: Vec<String> = Vec::with_capacity(nodes.len());
    let mut sorted_ids: Vec<&String> = nodes.keys().collect();
    sorted_ids.sort();

    fn visit_node(
        id: &str,
        nodes: &HashMap<String, Node>,
        visited: &mut HashSet<String>,
        out: &mut Vec<String>,
    ) {
        if visited.contains(id) {
            return;
        }
        visited.insert(id.to_string());
        let mut deps: Vec<&String> = nodes[id].depends.iter().collect();
        deps.sort();
        for dep in deps {
            visit_node(dep, nodes, visited, out);
        }
        out.push(id.to_string());
    }

    for id in sorted_ids {
        visit_node(id, nodes, &mut visited, &mut out);
    }
    out
}
