pub mod db;
pub mod notify;
pub mod settings;
pub mod sink;
pub mod tracker;
mod utils;

use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{info, warn};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};

use db::Database;
use notify::{ChannelNotifier, Notification, NotificationLevel};
use settings::SettingsStore;
use tracker::{
    commands::{dispatch, CommandReply, TrackerCommand, HELP},
    TrackerController, TrackerOptions,
};

pub use notify::Notifier;
pub use settings::TrackerSettings;
pub use sink::{save_fn, TimeSink};

#[derive(Debug, Parser)]
#[command(name = "taskclock", version, about = "Track time spent on a task")]
struct Cli {
    /// Task identifier recorded with every saved entry
    #[arg(long)]
    task: String,

    /// Directory holding the time-entry database and settings
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Settings file (defaults to <data-dir>/settings.json)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn debug_enabled() -> bool {
    std::env::var("TASKCLOCK_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn resolve_data_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }
    if let Some(dir) = std::env::var_os("TASKCLOCK_DATA_DIR") {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_dir()
        .map(|dir| dir.join("taskclock"))
        .ok_or_else(|| anyhow!("no data directory available; pass --data-dir"))
}

pub fn run() -> Result<()> {
    // RUST_LOG wins over the default level.
    let default_level = if debug_enabled() {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let task_id = cli.task;
    info!("taskclock starting for task {task_id}");

    let data_dir = resolve_data_dir(cli.data_dir)?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;

    let database = Database::new(data_dir.join("taskclock.sqlite3"))?;
    let settings_path = cli.config.unwrap_or_else(|| data_dir.join("settings.json"));
    let settings = SettingsStore::new(settings_path)?.tracker();

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    runtime.block_on(async move {
        let (notifier, notifications) = ChannelNotifier::new();
        let controller = TrackerController::new(
            TrackerOptions::new(task_id)
                .with_sink(Arc::new(database.clone()))
                .with_notifier(Arc::new(notifier))
                .with_settings(settings),
        );

        let result = console_loop(&controller, &database, notifications).await;
        controller.shutdown().await;
        result
    })
}

async fn console_loop(
    controller: &TrackerController,
    db: &Database,
    mut notifications: mpsc::UnboundedReceiver<Notification>,
) -> Result<()> {
    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            Some(notification) = notifications.recv() => print_notification(&notification),
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };

                let reply = match TrackerCommand::parse(&line) {
                    Ok(command) => dispatch(controller, db, command).await,
                    Err(err) => Err(err),
                };

                match reply {
                    Ok(CommandReply::Output(text)) => println!("{text}"),
                    Ok(CommandReply::Quit) => break,
                    Err(err) => {
                        warn!("command `{}` rejected: {err}", line.trim());
                        println!("error: {err}");
                    }
                }
            }
        }
    }

    while let Ok(notification) = notifications.try_recv() {
        print_notification(&notification);
    }
    Ok(())
}

fn print_notification(notification: &Notification) {
    let tag = match notification.level {
        NotificationLevel::Success => "ok",
        NotificationLevel::Error => "error",
    };
    println!("[{tag}] {}", notification.message);
}
