use std::fmt::Write as _;

use anyhow::{bail, Result};

use crate::db::Database;

use super::{format_hms, SaveOutcome, TrackerController, TrackerSnapshot};

pub const HELP: &str = "\
commands:
  start            start or resume tracking
  pause            pause tracking
  stop             stop and open the save form
  cancel           close the save form and keep the elapsed time
  note <text>      set the notes saved with this session
  save             save the stopped session
  status           show the current state
  entries          list saved time for this task
  loading on|off   disable or enable the controls
  help             show this message
  quit             exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerCommand {
    Start,
    Pause,
    Stop,
    Cancel,
    Note(String),
    Save,
    Status,
    Entries,
    Loading(bool),
    Help,
    Quit,
}

impl TrackerCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "start" | "resume" => Self::Start,
            "pause" => Self::Pause,
            "stop" => Self::Stop,
            "cancel" => Self::Cancel,
            "note" | "notes" => Self::Note(rest.to_string()),
            "save" => Self::Save,
            "status" | "" => Self::Status,
            "entries" | "log" => Self::Entries,
            "loading" => match rest {
                "on" | "true" | "1" => Self::Loading(true),
                "off" | "false" | "0" => Self::Loading(false),
                other => bail!("expected `loading on` or `loading off`, got `{other}`"),
            },
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            other => bail!("unknown command `{other}`; type `help`"),
        };

        Ok(command)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    Output(String),
    Quit,
}

pub async fn dispatch(
    controller: &TrackerController,
    db: &Database,
    command: TrackerCommand,
) -> Result<CommandReply> {
    let output = match command {
        TrackerCommand::Start => describe(&controller.start().await?),
        TrackerCommand::Pause => describe(&controller.pause().await?),
        TrackerCommand::Stop => {
            let snapshot = controller.stop().await?;
            format!(
                "{}\nadd notes with `note <text>`, then `save` or `cancel`",
                describe(&snapshot)
            )
        }
        TrackerCommand::Cancel => describe(&controller.cancel().await?),
        TrackerCommand::Note(text) => describe(&controller.set_notes(text).await?),
        TrackerCommand::Save => match controller.save().await? {
            SaveOutcome::Saved { elapsed_secs } => format!("saved {}", format_hms(elapsed_secs)),
            SaveOutcome::Failed { reason } => {
                format!("save failed: {reason}\nretry with `save` or discard with `cancel`")
            }
            SaveOutcome::Skipped => "no save operation configured".to_string(),
        },
        TrackerCommand::Status => describe(&controller.snapshot().await),
        TrackerCommand::Entries => list_entries(db, controller.task_id()).await?,
        TrackerCommand::Loading(loading) => {
            controller.set_loading(loading).await;
            describe(&controller.snapshot().await)
        }
        TrackerCommand::Help => HELP.to_string(),
        TrackerCommand::Quit => return Ok(CommandReply::Quit),
    };

    Ok(CommandReply::Output(output))
}

pub fn describe(snapshot: &TrackerSnapshot) -> String {
    let mut line = format!(
        "[{}] {} {}",
        snapshot.task_id,
        snapshot.status.as_str(),
        snapshot.formatted
    );
    if !snapshot.notes.is_empty() {
        let _ = write!(line, " notes: {:?}", snapshot.notes);
    }
    if snapshot.loading {
        line.push_str(" (loading)");
    }
    line
}

async fn list_entries(db: &Database, task_id: &str) -> Result<String> {
    let entries = db.list_time_entries(task_id).await?;
    if entries.is_empty() {
        return Ok(format!("no time recorded for {task_id}"));
    }

    let total = db.task_total(task_id).await?;
    let mut out = String::new();
    for entry in &entries {
        let _ = writeln!(
            out,
            "{}  {}  {}",
            entry.recorded_at.format("%Y-%m-%d %H:%M"),
            format_hms(entry.elapsed_secs),
            entry.notes
        );
    }
    let _ = write!(
        out,
        "total {} across {} entries",
        format_hms(total.total_secs),
        total.entry_count
    );
    Ok(out)
}
