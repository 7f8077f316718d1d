pub(super) mod render;
mod session;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::widgets::TableState;
use tokio::runtime::Runtime;

use crate::db::{Database, StoredCollection};
use crate::engine::ids::CollectionId;
use crate::engine::notify::Notifier;
use crate::engine::store::ProgressStore;

use super::display::request_reset;

use self::render::draw_tui;
use self::session::TuiSession;

#[derive(Debug, Clone)]
pub(super) struct PendingReset {
    pub(super) collection_id: String,
    pub(super) completed: usize,
}

pub(crate) fn run_tui(db: &Database, runtime: &Runtime) -> Result<()> {
    let mut session = TuiSession::enter()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))
        .context("failed to initialize terminal backend")?;
    terminal.clear()?;

    let store = ProgressStore::new(Arc::new(db.clone()), Notifier::new());
    let mut entries = db.list_entries()?;
    let mut table_state = TableState::default();
    table_state.select((!entries.is_empty()).then_some(0));
    let mut pending_reset = None::<PendingReset>;
    let mut status = if entries.is_empty() {
        status_info("No playlist progress stored yet. Run `plprog session` on a page first.")
    } else {
        status_info("Ready.")
    };

    loop {
        terminal.draw(|frame| {
            draw_tui(
                frame,
                &entries,
                &mut table_state,
                &status,
                pending_reset.as_ref(),
                Local::now(),
            )
        })?;

        if !event::poll(Duration::from_millis(200))? {
            continue;
        }

        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        if let Some(dialog) = pending_reset.as_ref() {
            match key.code {
                KeyCode::Char('y') | KeyCode::Enter => {
                    let resetting = dialog.collection_id.clone();
                    pending_reset = None;
                    status = match CollectionId::new(&resetting) {
                        Some(collection) if runtime.block_on(request_reset(&store, &collection)) => {
                            status_info(&format!("Progress reset for {resetting}."))
                        }
                        Some(_) => status_error("Reset failed; run with --verbose for details."),
                        None => status_error("Reset failed: invalid playlist id."),
                    };
                    refresh_entries(db, &mut entries, &mut table_state, None)?;
                }
                KeyCode::Esc | KeyCode::Char('n') => {
                    pending_reset = None;
                    status = status_info("Reset canceled.");
                }
                _ => {}
            }
            continue;
        }

        match key.code {
            KeyCode::Char('q') => break,
            KeyCode::Up => {
                if let Some(selected) = table_state.selected() {
                    table_state.select(Some(selected.saturating_sub(1)));
                }
            }
            KeyCode::Down => {
                if let Some(selected) = table_state.selected()
                    && !entries.is_empty()
                {
                    let next = (selected + 1).min(entries.len().saturating_sub(1));
                    table_state.select(Some(next));
                }
            }
            KeyCode::Char('g') => {
                let keep = table_state
                    .selected()
                    .and_then(|idx| entries.get(idx))
                    .map(|entry| entry.collection_id.clone());
                refresh_entries(db, &mut entries, &mut table_state, keep.as_deref())?;
                status = status_info("Refreshed.");
            }
            KeyCode::Char('r') => {
                let Some(entry) = table_state.selected().and_then(|idx| entries.get(idx)) else {
                    status = status_error("Reset failed: no playlist selected.");
                    continue;
                };
                pending_reset = Some(PendingReset {
                    collection_id: entry.collection_id.clone(),
                    completed: entry.completed,
                });
                status = status_info("Confirm reset: y/Enter to reset, n/Esc to cancel.");
            }
            _ => {}
        }
    }

    terminal.show_cursor()?;
    session.leave()?;
    Ok(())
}

pub(super) fn refresh_entries(
    db: &Database,
    entries: &mut Vec<StoredCollection>,
    table_state: &mut TableState,
    preferred_id: Option<&str>,
) -> Result<()> {
    *entries = db.list_entries()?;
    if entries.is_empty() {
        table_state.select(None);
        return Ok(());
    }

    if let Some(id) = preferred_id
        && let Some(idx) = entries.iter().position(|entry| entry.collection_id == id)
    {
        table_state.select(Some(idx));
        return Ok(());
    }

    match table_state.selected() {
        Some(selected) => table_state.select(Some(selected.min(entries.len() - 1))),
        None => table_state.select(Some(0)),
    }
    Ok(())
}

pub(super) fn status_info(msg: &str) -> String {
    format!("INFO: {msg}")
}

pub(super) fn status_error(msg: &str) -> String {
    format!("ERROR: {msg}")
}
