//! diary CLI - Log voiding events from the terminal
//!
//! Every command works against the local store first; uploads happen
//! opportunistically and `diary sync` pushes whatever is still pending.

mod cli;
mod error;
mod session;

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use clap::Parser;
use diary_core::db::Database;
use diary_core::remote::SupabaseSyncApi;
use diary_core::sync::{NoopScheduler, SyncCoordinator};
use diary_core::{DiaryService, EventId, VoidingEvent};
use serde::Serialize;

use crate::cli::{Cli, Commands};
use crate::error::CliError;
use crate::session::FileSessionProvider;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("diary=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let app = App::open(cli.db_path)?;

    match cli.command {
        Commands::Add { at, date, memo } => app.add(at.as_deref(), date, memo).await?,
        Commands::Delete { id } => app.delete(&id).await?,
        Commands::Memo { id, text } => app.memo(&id, &text).await?,
        Commands::List { date, json } => app.list(date, json).await?,
        Commands::Month { month, json } => app.month(&month, json).await?,
        Commands::Status => app.status().await?,
        Commands::Sync => app.sync().await?,
        Commands::Pull => app.pull().await?,
        Commands::Login { refresh_token } => app.login(&refresh_token).await?,
        Commands::Logout => app.logout()?,
    }

    Ok(())
}

struct App {
    service: DiaryService<SupabaseSyncApi, FileSessionProvider>,
    sessions: Arc<FileSessionProvider>,
}

impl App {
    fn open(db_path: Option<PathBuf>) -> Result<Self, CliError> {
        let db_path = resolve_db_path(db_path)?;
        tracing::debug!("Using database at {}", db_path.display());
        let data_dir = db_path.parent().map(Path::to_path_buf).unwrap_or_default();
        std::fs::create_dir_all(&data_dir)?;

        let api = Arc::new(SupabaseSyncApi::new(
            require_env("SUPABASE_URL")?,
            require_env("SUPABASE_ANON_KEY")?,
        )?);
        let sessions = Arc::new(FileSessionProvider::load(
            session::default_session_path(&data_dir),
            (*api).clone(),
        )?);

        let db = Database::open(&db_path)?;
        let coordinator = SyncCoordinator::new(db.clone(), api, Arc::clone(&sessions));
        let service = DiaryService::new(db, coordinator, Arc::new(NoopScheduler));

        Ok(Self { service, sessions })
    }

    async fn add(
        &self,
        at: Option<&str>,
        date: Option<NaiveDate>,
        memo: Option<String>,
    ) -> Result<(), CliError> {
        let event = match at {
            Some(time) => {
                let (hour, minute) = parse_time(time)?;
                let date = date.unwrap_or_else(|| Local::now().date_naive());
                self.service.add_at(date, hour, minute, memo).await?
            }
            None => self.service.add_now(memo).await?,
        };
        println!("{}", event.id);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), CliError> {
        let id = parse_event_id(id)?;
        self.service.delete(&id).await?;
        println!("{id}");
        Ok(())
    }

    async fn memo(&self, id: &str, text: &[String]) -> Result<(), CliError> {
        let id = parse_event_id(id)?;
        let joined = text.join(" ");
        let memo = if joined.trim().is_empty() {
            None
        } else {
            Some(joined)
        };
        let updated = self.service.update_memo(&id, memo).await?;
        println!("{}", updated.id);
        Ok(())
    }

    async fn list(&self, date: Option<NaiveDate>, as_json: bool) -> Result<(), CliError> {
        let date = date.unwrap_or_else(|| Local::now().date_naive());
        let events = self.service.events_for_date(date).await?;

        if as_json {
            let items = events.iter().map(EventListItem::from).collect::<Vec<_>>();
            println!("{}", serde_json::to_string_pretty(&items)?);
        } else if events.is_empty() {
            println!("No events on {date}");
        } else {
            for event in &events {
                println!("{}", format_event_line(event));
            }
            println!("{} event(s)", events.len());
        }
        Ok(())
    }

    async fn month(&self, month: &str, as_json: bool) -> Result<(), CliError> {
        let counts = self.service.monthly_counts(month).await?;

        if as_json {
            let items: Vec<_> = counts
                .iter()
                .map(|(date, count)| serde_json::json!({ "date": date, "count": count }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&items)?);
        } else if counts.is_empty() {
            println!("No events in {month}");
        } else {
            for (date, count) in &counts {
                println!("{date}  {count}");
            }
        }
        Ok(())
    }

    async fn status(&self) -> Result<(), CliError> {
        use diary_core::auth::SessionProvider;

        match self.sessions.get_session().await {
            Some(session) => println!("Signed in as {}", session.user_id),
            None => {
                println!("Signed out");
                return Ok(());
            }
        }

        let pending = self.service.pending_count().await?;
        println!("Pending sync: {pending}");
        if let Some(error) = self.service.last_pending_error().await? {
            println!("Last sync error: {error}");
        }
        Ok(())
    }

    async fn sync(&self) -> Result<(), CliError> {
        let report = self.service.sync_pending().await?;
        println!(
            "Synced {} item(s), {} failed",
            report.success_count, report.fail_count
        );
        Ok(())
    }

    async fn pull(&self) -> Result<(), CliError> {
        let merged = self.service.fetch_and_sync_all().await?;
        println!("Merged {merged} remote event(s)");
        Ok(())
    }

    async fn login(&self, refresh_token: &str) -> Result<(), CliError> {
        let session = self.sessions.login(refresh_token).await?;
        tracing::info!("Session stored for {}", session.user_id);
        println!("Signed in as {}", session.user_id);
        Ok(())
    }

    fn logout(&self) -> Result<(), CliError> {
        self.sessions.logout()?;
        println!("Signed out");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct EventListItem {
    id: String,
    time: String,
    date: String,
    memo: Option<String>,
    sync_state: String,
}

impl From<&VoidingEvent> for EventListItem {
    fn from(event: &VoidingEvent) -> Self {
        Self {
            id: event.id.as_str(),
            time: format_local_time(event.occurred_at),
            date: event.local_date.to_string(),
            memo: event.memo.clone(),
            sync_state: event.sync_state.to_string(),
        }
    }
}

fn format_event_line(event: &VoidingEvent) -> String {
    let mut line = format!("{}  {}", format_local_time(event.occurred_at), event.id);
    if event.sync_state.is_pending() {
        line.push_str("  [pending]");
    } else if event.sync_state == diary_core::SyncState::Failed {
        line.push_str("  [sync failed]");
    }
    if let Some(memo) = &event.memo {
        line.push_str("  ");
        line.push_str(memo);
    }
    line
}

fn format_local_time(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|instant| instant.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_else(|| "??:??".to_string())
}

fn parse_event_id(raw: &str) -> Result<EventId, CliError> {
    EventId::from_str(raw.trim()).map_err(|_| CliError::InvalidEventId(raw.to_string()))
}

fn parse_time(raw: &str) -> Result<(u32, u32), CliError> {
    let invalid = || CliError::InvalidTime(raw.to_string());
    let (hour, minute) = raw.split_once(':').ok_or_else(invalid)?;
    let hour: u32 = hour.trim().parse().map_err(|_| invalid())?;
    let minute: u32 = minute.trim().parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok((hour, minute))
}

fn resolve_db_path(explicit: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    if let Ok(path) = env::var("DIARY_DB_PATH") {
        return Ok(PathBuf::from(path));
    }
    dirs::data_dir()
        .map(|dir| dir.join("diary").join("diary.db"))
        .ok_or(CliError::NoDataDir)
}

fn require_env(name: &str) -> Result<String, CliError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(CliError::NotConfigured),
    }
}
