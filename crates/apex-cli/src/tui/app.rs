//! TUI application state and data model.

use std::sync::Arc;
use std::time::Duration;

use apex_core::dag::{Dag, NodeView};

/// Which pane the dashboard is currently showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Nodes,
    Help,
}

/// Application state for the dashboard. Polls `dag` on every tick rather
/// than owning any mutable run state of its own.
pub struct App {
    dag: Arc<Dag>,
    pub current_view: View,
    pub nodes: Vec<NodeView>,
    pub selected: usize,
    pub tick_rate: Duration,
    pub should_quit: bool,
    pub status_message: Option<String>,
}

impl App {
    pub fn new(dag: Arc<Dag>) -> Self {
        Self {
            dag,
            current_view: View::Nodes,
            nodes: Vec::new(),
            selected: 0,
            tick_rate: Duration::from_millis(250),
            should_quit: false,
            status_message: None,
        }
    }

    /// Re-read the dag's nodes in topological order.
    pub async fn refresh(&mut self) {
        self.nodes = self.dag.node_slice().await;
        if self.selected >= self.nodes.len() && !self.nodes.is_empty() {
            self.selected = self.nodes.len() - 1;
        }
    }

    pub fn move_up(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
        }
    }

    pub fn move_down(&mut self) {
        if !self.nodes.is_empty() && self.selected < self.nodes.len() - 1 {
            self.selected += 1;
        }
    }

    pub fn toggle_help(&mut self) {
        self.current_view = match self.current_view {
            View::Nodes => View::Help,
            View::Help => View::Nodes,
        };
    }

    pub fn selected_node(&self) -> Option<&NodeView> {
        self.nodes.get(self.selected)
    }

    pub fn completed_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n.status, apex_core::dag::Status::Completed))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apex_core::dag::NodeSpec;

    fn sample_dag() -> Arc<Dag> {
        Arc::new(
            Dag::build(vec![
                NodeSpec {
                    id: "a".to_string(),
                    task: "echo a".to_string(),
                    depends: vec![],
                },
                NodeSpec {
                    id: "b".to_string(),
                    task: "echo b".to_string(),
                    depends: vec!["a".to_string()],
                },
            ])
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn refresh_loads_nodes_in_topological_order() {
        let mut app = App::new(sample_dag());
        app.refresh().await;
        assert_eq!(app.nodes.len(), 2);
        assert_eq!(app.nodes[0].id, "a");
        assert_eq!(app.nodes[1].id, "b");
    }

    #[tokio::test]
    async fn selection_clamps_when_nodes_shrink() {
        let mut app = App::new(sample_dag());
        app.refresh().await;
        app.selected = 1;
        app.move_down();
        assert_eq!(app.selected, 1, "already at last index, should not overflow");
    }

    #[test]
    fn help_toggles_both_ways() {
        let mut app = App::new(Arc::new(Dag::build(vec![apex_core::dag::NodeSpec {
            id: "a".to_string(),
            task: "noop".to_string(),
            depends: vec![],
        }]).unwrap()));
        assert_eq!(app.current_view, View::Nodes);
        app.toggle_help();
        assert_eq!(app.current_view, View::Help);
        app.toggle_help();
        assert_eq!(app.current_view, View::Nodes);
    }
}
