use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TrackerStatus {
    #[default]
    Idle,
    Running,
    Paused,
    /// Stopped with the save form visible.
    AwaitingSave,
}

impl TrackerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerStatus::Idle => "Idle",
            TrackerStatus::Running => "Running",
            TrackerStatus::Paused => "Paused",
            TrackerStatus::AwaitingSave => "AwaitingSave",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSession {
    pub status: TrackerStatus,
    pub elapsed_secs: u64,
    pub notes: String,
    pub started_at: Option<DateTime<Utc>>,
    /// Instant at which the accumulated time was zero for the current run.
    /// Only set while running; recomputed on every resume.
    #[serde(skip)]
    pub start_epoch: Option<Instant>,
    /// Running time at full precision; `elapsed_secs` is its whole-second floor.
    #[serde(skip)]
    accumulated: Duration,
    /// Bumped on every user transition.
    #[serde(skip)]
    revision: u64,
}

impl Default for TrackingSession {
    fn default() -> Self {
        Self {
            status: TrackerStatus::Idle,
            elapsed_secs: 0,
            notes: String::new(),
            started_at: None,
            start_epoch: None,
            accumulated: Duration::ZERO,
            revision: 0,
        }
    }
}

impl TrackingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Running time as of `now`, derived from the start epoch while running.
    pub fn running_time_at(&self, now: Instant) -> Duration {
        match (self.status, self.start_epoch) {
            (TrackerStatus::Running, Some(epoch)) => {
                now.saturating_duration_since(epoch).max(self.accumulated)
            }
            _ => self.accumulated,
        }
    }

    pub fn elapsed_at(&self, now: Instant) -> u64 {
        self.running_time_at(now).as_secs()
    }

    pub fn sync_elapsed(&mut self, now: Instant) {
        self.accumulated = self.running_time_at(now);
        self.elapsed_secs = self.accumulated.as_secs();
    }

    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    /// Returns `false` when already running; the epoch is left untouched.
    pub fn start(&mut self, now: Instant, wall_clock: DateTime<Utc>) -> Result<bool> {
        match self.status {
            TrackerStatus::Running => Ok(false),
            TrackerStatus::AwaitingSave => {
                bail!("save pending; cancel the save before resuming")
            }
            TrackerStatus::Idle | TrackerStatus::Paused => {
                self.start_epoch = Some(now.checked_sub(self.accumulated).unwrap_or(now));
                self.started_at.get_or_insert(wall_clock);
                self.status = TrackerStatus::Running;
                self.touch();
                Ok(true)
            }
        }
    }

    pub fn pause(&mut self, now: Instant) -> Result<()> {
        if self.status != TrackerStatus::Running {
            bail!("tracker is not running");
        }
        self.sync_elapsed(now);
        self.status = TrackerStatus::Paused;
        self.start_epoch = None;
        self.touch();
        Ok(())
    }

    pub fn stop(&mut self, now: Instant) -> Result<()> {
        match self.status {
            TrackerStatus::Running | TrackerStatus::Paused => {
                self.sync_elapsed(now);
                self.status = TrackerStatus::AwaitingSave;
                self.start_epoch = None;
                self.touch();
                Ok(())
            }
            TrackerStatus::Idle => bail!("nothing to stop; tracker has not been started"),
            TrackerStatus::AwaitingSave => bail!("tracker is already stopped"),
        }
    }

    /// Discards the save intent. A session stopped before its first second
    /// goes back to idle rather than to a zero-length pause; its sub-second
    /// running time is kept for the next start.
    pub fn cancel_save(&mut self) -> Result<()> {
        self.ensure_awaiting_save()?;
        self.status = if self.elapsed_secs == 0 {
            TrackerStatus::Idle
        } else {
            TrackerStatus::Paused
        };
        self.touch();
        Ok(())
    }

    pub fn set_notes(&mut self, notes: String) -> Result<()> {
        self.ensure_awaiting_save()?;
        self.notes = notes;
        self.touch();
        Ok(())
    }

    pub fn ensure_awaiting_save(&self) -> Result<()> {
        if self.status != TrackerStatus::AwaitingSave {
            bail!("no stopped session awaiting save");
        }
        Ok(())
    }

    /// Back to idle. The revision keeps counting so a stale save can tell.
    pub fn reset(&mut self) {
        let revision = self.revision;
        *self = Self::default();
        self.revision = revision.wrapping_add(1);
    }
}

/// Zero-padded `HH:MM:SS`; hours are not capped.
pub fn format_hms(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}
