//! Dashboard rendering using ratatui.

use apex_core::dag::Status;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table};
use ratatui::Frame;

use super::app::{App, View};

/// Render the current view.
pub fn render(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(3),    // node table
            Constraint::Length(3), // detail panel
            Constraint::Length(1), // status bar
        ])
        .split(f.area());

    match app.current_view {
        View::Nodes => {
            render_node_table(f, app, chunks[0]);
            render_detail(f, app, chunks[1]);
        }
        View::Help => render_help(f, chunks[0]),
    }

    render_status_bar(f, app, chunks[2]);
}

fn render_node_table(f: &mut Frame, app: &App, area: Rect) {
    let header_cells = ["Node", "Status", "Depends"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow)));
    let header = Row::new(header_cells).height(1);

    let rows = app.nodes.iter().enumerate().map(|(i, node)| {
        let style = if i == app.selected {
            Style::default()
                .bg(Color::DarkGray)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };

        Row::new(vec![
            Cell::from(node.id.clone()),
            Cell::from(status_colored(node.status)),
            Cell::from(node.depends.join(", ")),
        ])
        .style(style)
    });

    let title = format!(
        " Nodes ({}/{} completed) ",
        app.completed_count(),
        app.nodes.len()
    );

    let table = Table::new(
        rows,
        [
            Constraint::Percentage(30),
            Constraint::Length(14),
            Constraint::Percentage(50),
        ],
    )
    .header(header)
    .block(Block::default().borders(Borders::ALL).title(title));

    f.render_widget(table, area);
}

fn render_detail(f: &mut Frame, app: &App, area: Rect) {
    let text = match app.selected_node() {
        Some(node) => {
            if let Some(err) = &node.error {
                format!("{}: {}", node.task, err)
            } else if let Some(result) = &node.result {
                format!("{}: {}", node.task, result)
            } else {
                node.task.clone()
            }
        }
        None => "no nodes".to_string(),
    };

    let block = Block::default().borders(Borders::ALL).title(" Detail ");
    f.render_widget(Paragraph::new(text).block(block), area);
}

fn render_help(f: &mut Frame, area: Rect) {
    let lines = vec![
        Line::from("j/k, arrows   move selection"),
        Line::from("?             toggle this help"),
        Line::from("q, Esc        quit"),
    ];
    let block = Block::default().borders(Borders::ALL).title(" Help ");
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_status_bar(f: &mut Frame, app: &App, area: Rect) {
    let text = app
        .status_message
        .clone()
        .unwrap_or_else(|| "j/k: move  ?: help  q: quit".to_string());
    f.render_widget(Paragraph::new(Span::raw(text)), area);
}

fn status_colored(status: Status) -> Span<'static> {
    let (label, color) = match status {
        Status::Pending => ("pending", Color::Gray),
        Status::Ready => ("ready", Color::Cyan),
        Status::Running => ("running", Color::Blue),
        Status::Completed => ("completed", Color::Green),
        Status::Failed => ("failed", Color::Red),
        Status::Blocked => ("blocked", Color::Magenta),
        Status::Suspended => ("suspended", Color::Yellow),
        Status::Cancelled => ("cancelled", Color::DarkGray),
        Status::Skipped => ("skipped", Color::DarkGray),
        Status::Retrying => ("retrying", Color::Yellow),
        Status::Resuming => ("resuming", Color::Cyan),
        Status::Replanning => ("replanning", Color::Cyan),
        Status::Invalidated => ("invalidated", Color::Magenta),
        Status::Escalated => ("escalated", Color::Red),
        Status::NeedsHuman => ("needs_human", Color::Red),
    };
    Span::styled(label, Style::default().fg(color))
}
