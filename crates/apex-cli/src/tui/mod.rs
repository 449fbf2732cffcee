//! Interactive TUI dashboard for watching a plan run to completion.

pub mod app;
mod ui;

use std::io;
use std::sync::Arc;

use anyhow::Result;
use apex_core::dag::Dag;
use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tokio_util::sync::CancellationToken;

use app::App;

/// Launch the interactive TUI dashboard against a running [`Dag`].
///
/// Returns once the user quits or the dag reaches completion. `cancel` is
/// observed but never triggered here — the caller decides whether quitting
/// the dashboard should also cancel the underlying run.
pub async fn run_dashboard(dag: Arc<Dag>, cancel: CancellationToken) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(dag);
    app.refresh().await;

    let result = run_event_loop(&mut terminal, &mut app, &cancel).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn run_event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    cancel: &CancellationToken,
) -> Result<()> {
    let tick_rate = app.tick_rate;

    loop {
        terminal.draw(|f| ui::render(f, app))?;

        if event::poll(tick_rate)? {
            if let Event::Key(key) = event::read()? {
                app.status_message = None;

                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => {
                        app.should_quit = true;
                    }
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        app.should_quit = true;
                    }
                    KeyCode::Char('j') | KeyCode::Down => app.move_down(),
                    KeyCode::Char('k') | KeyCode::Up => app.move_up(),
                    KeyCode::Char('?') => app.toggle_help(),
                    _ => {}
                }
            }
        } else {
            app.refresh().await;
        }

        if app.should_quit || cancel.is_cancelled() {
            return Ok(());
        }
    }
}
