use chrono::{DateTime, Local};
use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Block, BorderType, Borders, Cell, Clear, Padding, Paragraph, Row, Table, TableState, Wrap,
};

use crate::db::StoredCollection;

use super::super::format::{format_updated_ago, format_updated_at, truncate};
use super::PendingReset;

pub(super) fn draw_tui(
    frame: &mut Frame,
    entries: &[StoredCollection],
    table_state: &mut TableState,
    status: &str,
    pending_reset: Option<&PendingReset>,
    now: DateTime<Local>,
) {
    let bg = Block::default().style(Style::default().bg(Color::Black));
    frame.render_widget(bg, frame.area());

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(3),
            Constraint::Length(3),
        ])
        .split(frame.area());

    let total_completed: usize = entries.iter().map(|entry| entry.completed).sum();
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            "PLAYLIST PROGRESS",
            Style::default()
                .fg(Color::Rgb(110, 200, 140))
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled("   ", Style::default()),
        Span::styled(
            format!("{} playlists", entries.len()),
            Style::default().fg(Color::Rgb(185, 195, 210)),
        ),
        Span::styled("   ", Style::default()),
        Span::styled(
            format!("{total_completed} videos completed"),
            Style::default().fg(Color::Rgb(185, 195, 210)),
        ),
    ]))
    .alignment(Alignment::Center)
    .block(panel_block("Dashboard"));
    frame.render_widget(header, chunks[0]);

    let body_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(64), Constraint::Percentage(36)])
        .split(chunks[1]);

    let rows: Vec<Row> = entries
        .iter()
        .map(|entry| {
            Row::new(vec![
                Cell::from(entry.collection_id.clone()),
                Cell::from(entry.completed.to_string()),
                Cell::from(format_updated_ago(&entry.updated_at, now)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Percentage(55),
            Constraint::Length(11),
            Constraint::Length(14),
        ],
    )
    .header(
        Row::new(vec!["Playlist", "Completed", "Updated"]).style(
            Style::default()
                .fg(Color::Rgb(110, 200, 140))
                .add_modifier(Modifier::BOLD),
        ),
    )
    .block(panel_block("Playlists"))
    .row_highlight_style(
        Style::default()
            .bg(Color::Rgb(110, 200, 140))
            .fg(Color::Black)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("▸ ");
    frame.render_stateful_widget(table, body_chunks[0], table_state);

    let selection_text = match table_state.selected().and_then(|idx| entries.get(idx)) {
        Some(entry) => format!(
            "Playlist\n{}\n\nCompleted\n{} videos\n\nUpdated\n{}",
            truncate(&entry.collection_id, 34),
            entry.completed,
            format_updated_at(&entry.updated_at),
        ),
        None => "No playlist progress stored yet.\n\nRun `plprog session <page.json>` to track a playlist."
            .to_string(),
    };
    let selection = Paragraph::new(selection_text)
        .style(Style::default().fg(Color::Rgb(230, 230, 230)))
        .block(panel_block("Selected"))
        .wrap(Wrap { trim: true })
        .alignment(Alignment::Left);
    frame.render_widget(selection, body_chunks[1]);

    let controls = Paragraph::new(Line::from(Span::styled(
        "↑/↓ move  r reset  g refresh  q quit",
        Style::default().fg(Color::Rgb(185, 195, 210)),
    )))
    .alignment(Alignment::Center)
    .block(panel_block("Controls"));
    frame.render_widget(controls, chunks[2]);

    let status_widget = Paragraph::new(status.to_string())
        .style(status_style(status))
        .block(panel_block("Status"));
    frame.render_widget(status_widget, chunks[3]);

    if let Some(confirm) = pending_reset {
        let popup_text = reset_prompt(confirm);
        let popup_area = popup_rect_for_text(frame.area(), &popup_text);
        render_popup_shadow(frame, popup_area);
        frame.render_widget(Clear, popup_area);
        let popup = Paragraph::new(popup_text)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .block(modal_block("Confirm Reset"));
        frame.render_widget(popup, popup_area);
    }
}

pub(in crate::app) fn reset_prompt(confirm: &PendingReset) -> String {
    format!(
        "Reset progress for this playlist?\n\n{}\n\n{} completed videos will be forgotten.\n\n[y / Enter] Reset   [n / Esc] Cancel",
        truncate(&confirm.collection_id, 56),
        confirm.completed
    )
}

fn panel_block(title: &'static str) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(Color::Rgb(125, 135, 150)))
        .title(title)
}

fn modal_block(title: &'static str) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(
            Style::default()
                .fg(Color::Rgb(160, 220, 180))
                .add_modifier(Modifier::BOLD),
        )
        .title(title)
        .padding(Padding::new(2, 2, 1, 1))
}

fn status_style(status: &str) -> Style {
    if status.starts_with("ERROR:") {
        Style::default()
            .fg(Color::Rgb(255, 145, 120))
            .add_modifier(Modifier::BOLD)
    } else if status.starts_with("INFO:") {
        Style::default().fg(Color::Rgb(205, 165, 255))
    } else {
        Style::default().fg(Color::Rgb(230, 235, 242))
    }
}

fn centered_fixed_rect(width: u16, height: u16, area: Rect) -> Rect {
    let clamped_width = width.min(area.width.max(1));
    let clamped_height = height.min(area.height.max(1));
    let x = area.x + area.width.saturating_sub(clamped_width) / 2;
    let y = area.y + area.height.saturating_sub(clamped_height) / 2;
    Rect::new(x, y, clamped_width, clamped_height)
}

fn render_popup_shadow(frame: &mut Frame, popup_area: Rect) {
    let area = frame.area();
    let shadow = Rect::new(
        (popup_area.x + 1).min(area.x + area.width.saturating_sub(1)),
        (popup_area.y + 1).min(area.y + area.height.saturating_sub(1)),
        popup_area.width.saturating_sub(1),
        popup_area.height.saturating_sub(1),
    );
    if shadow.width == 0 || shadow.height == 0 {
        return;
    }
    let shadow_block = Block::default().style(Style::default().bg(Color::Rgb(14, 16, 24)));
    frame.render_widget(shadow_block, shadow);
}

pub(in crate::app) fn popup_rect_for_text(area: Rect, text: &str) -> Rect {
    let max_line_width = text
        .lines()
        .map(|line| line.chars().count() as u16)
        .max()
        .unwrap_or(0);
    let line_count = text.lines().count() as u16;

    let available_width = area.width.saturating_sub(2).max(1);
    let width = max_line_width
        .saturating_add(12)
        .clamp(48.min(available_width), 72.min(available_width));

    let available_height = area.height.saturating_sub(2).max(1);
    let height = line_count
        .saturating_add(6)
        .clamp(10.min(available_height), 18.min(available_height));

    centered_fixed_rect(width, height, area)
}
