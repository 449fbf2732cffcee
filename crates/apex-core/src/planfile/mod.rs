//! TOML format and parser for DAG input files.
//!
//! A plan file is a flat list of `[[nodes]]` records — `{id, task,
//! depends}` — matching the DAG input schema of §6. Parsing here produces
//! [`NodeSpec`]s ready for [`crate::dag::Dag::build`]; acyclicity and
//! dependency-reference checks are left to `Dag::build` itself so there is
//! exactly one place that owns that validation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dag::{Dag, DagError, NodeSpec};

/// Top-level structure of a plan TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanToml {
    #[serde(default)]
    pub nodes: Vec<NodeToml>,
}

/// A single `[[nodes]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeToml {
    /// Unique, non-empty identifier, used as both the DAG node id and as
    /// the `depends` reference target.
    pub id: String,
    /// Opaque task string passed to the `Runner` verbatim.
    pub task: String,
    #[serde(default)]
    pub depends: Vec<String>,
}

/// Errors from parsing a plan file, before DAG construction is attempted.
#[derive(Debug, Error)]
pub enum PlanFileError {
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("node id must be non-empty")]
    EmptyId,
    #[error(transparent)]
    Dag(#[from] DagError),
}

/// Parse `content` and build a [`Dag`] from it in one step.
pub fn load_dag(content: &str) -> Result<Dag, PlanFileError> {
    let plan: PlanToml = toml::from_str(content)?;
    let mut specs = Vec::with_capacity(plan.nodes.len());
    for node in plan.nodes {
        if node.id.trim().is_empty() {
            return Err(PlanFileError::EmptyId);
        }
        specs.push(NodeSpec {
            id: node.id,
            task: node.task,
            depends: node.depends,
        });
    }
    Ok(Dag::build(specs)?)
}

/// Serialize a flat list of `(id, task, depends)` tuples back to TOML, for
/// round-tripping and for writing example plan files.
pub fn to_toml(nodes: &[(String, String, Vec<String>)]) -> Result<String, toml::ser::Error> {
    let plan = PlanToml {
        nodes: nodes
            .iter()
            .map(|(id, task, depends)| NodeToml {
                id: id.clone(),
                task: task.clone(),
                depends: depends.clone(),
            })
            .collect(),
    };
    toml::to_string_pretty(&plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_diamond_plan() {
        let toml_str = r#"
[[nodes]]
id = "a"
task = "echo a"

[[nodes]]
id = "b"
task = "echo b"
depends = ["a"]

[[nodes]]
id = "c"
task = "echo c"
depends = ["a"]

[[nodes]]
id = "d"
task = "echo d"
depends = ["b", "c"]
"#;
        let dag = load_dag(toml_str).expect("should parse and build");
        assert_eq!(dag.node_slice().await.len(), 4);
    }

    #[test]
    fn rejects_empty_id() {
        let toml_str = r#"
[[nodes]]
id = ""
task = "echo a"
"#;
        let err = load_dag(toml_str).unwrap_err();
        assert!(matches!(err, PlanFileError::EmptyId));
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = load_dag("not valid toml {{{").unwrap_err();
        assert!(matches!(err, PlanFileError::Toml(_)));
    }

    #[test]
    fn rejects_unknown_dependency_via_dag_build() {
        let toml_str = r#"
[[nodes]]
id = "a"
task = "echo a"
depends = ["missing"]
"#;
        let err = load_dag(toml_str).unwrap_err();
        assert!(matches!(err, PlanFileError::Dag(DagError::UnknownDependency { .. })));
    }

    #[tokio::test]
    async fn roundtrip_serialize_parse() {
        let nodes = vec![
            ("a".to_string(), "echo a".to_string(), vec![]),
            ("b".to_string(), "echo b".to_string(), vec!["a".to_string()]),
        ];
        let serialized = to_toml(&nodes).unwrap();
        let dag = load_dag(&serialized).unwrap();
        assert_eq!(dag.node_slice().await.len(), 2);
    }
}
