mod display;
mod format;
mod page;
mod tui;


use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::runtime::Runtime;

use crate::cli::{Cli, Command};
use crate::config::{EngineConfig, OverlayStyle};
use crate::db::Database;
use crate::engine::ids::{collection_from_user_input, resolve_collection_id};
use crate::engine::notify::Notifier;
use crate::engine::store::{KeyValueBackend, MemoryBackend, ProgressStore};
use crate::paths::database_file_path;

use self::display::{count_items, request_reset, snapshot};
use self::format::{format_updated_at, truncate};
use self::page::{PageFixture, run_session};

pub fn run(cli: Cli) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("failed to start async runtime")?;

    match cli.command {
        Some(Command::Session {
            page,
            style,
            html,
            memory,
        }) => run_session_command(&runtime, &page, style, html, memory)?,
        Some(Command::Status { url, page }) => run_status(&runtime, &url, page.as_deref())?,
        Some(Command::Reset { target }) => run_reset(&runtime, &target)?,
        Some(Command::List) => run_list(&open_db()?)?,
        Some(Command::Tui) | None => tui::run_tui(&open_db()?, &runtime)?,
    }

    Ok(())
}

fn run_session_command(
    runtime: &Runtime,
    page: &Path,
    style: Option<OverlayStyle>,
    html: bool,
    memory: bool,
) -> Result<()> {
    let fixture = PageFixture::load(page)?;
    let mut config = EngineConfig::from_env();
    if let Some(style) = style.or(fixture.style) {
        config.style = style;
    }
    let backend: Arc<dyn KeyValueBackend> = if memory {
        Arc::new(MemoryBackend::new())
    } else {
        Arc::new(open_db()?)
    };
    let store = Arc::new(ProgressStore::new(backend, Notifier::new()));

    let outcome = runtime.block_on(run_session(&fixture, config, store))?;
    if let Some(collection) = &outcome.snapshot.collection {
        println!("Playlist: {collection}");
    }
    println!("{}", outcome.snapshot.describe());
    match &outcome.panel {
        Some((label, width)) => println!("Page panel: {label} [bar {width}]"),
        None => println!("Page panel: not shown on this layout"),
    }
    println!("Reconciliation passes: {}", outcome.passes);
    if html {
        println!("\n{}", outcome.html);
    }
    Ok(())
}

fn run_status(runtime: &Runtime, url: &str, page: Option<&Path>) -> Result<()> {
    let total = match page {
        Some(path) => {
            let fixture = PageFixture::load(path)?;
            let (doc, _) = fixture.render();
            Some(count_items(&doc, &EngineConfig::default()))
        }
        None => None,
    };
    if resolve_collection_id(url).is_none() {
        println!("Open a playlist page to see progress.");
        return Ok(());
    }
    let store = ProgressStore::new(Arc::new(open_db()?), Notifier::new());
    let snapshot = runtime.block_on(snapshot(&store, url, total));
    if let Some(collection) = &snapshot.collection {
        println!("Playlist: {collection}");
    }
    println!("{}", snapshot.describe());
    Ok(())
}

fn run_reset(runtime: &Runtime, target: &str) -> Result<()> {
    let Some(collection) = collection_from_user_input(target) else {
        bail!("no playlist id in `{target}`");
    };
    let store = ProgressStore::new(Arc::new(open_db()?), Notifier::new());
    if runtime.block_on(request_reset(&store, &collection)) {
        println!("Progress reset for {collection}.");
    } else {
        println!("Reset failed for {collection}; see log output.");
    }
    Ok(())
}

fn run_list(db: &Database) -> Result<()> {
    let entries = db.list_entries()?;
    if entries.is_empty() {
        println!("No playlist progress stored yet. Watch a playlist with `plprog session` first.");
        return Ok(());
    }

    println!("{:<40} {:<10} {:<28}", "PLAYLIST", "COMPLETED", "UPDATED");
    for entry in entries {
        println!(
            "{:<40} {:<10} {:<28}",
            truncate(&entry.collection_id, 40),
            entry.completed,
            format_updated_at(&entry.updated_at)
        );
    }
    Ok(())
}

fn open_db() -> Result<Database> {
    let db_path = database_file_path()?;
    let db = Database::open(&db_path)?;
    db.migrate()?;
    Ok(db)
}
