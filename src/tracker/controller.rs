use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{
    sync::{watch, Mutex},
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    notify::{LogNotifier, Notification, Notifier},
    settings::TrackerSettings,
    sink::TimeSink,
};

use super::{format_hms, ticker::Ticker, TrackerStatus, TrackingSession};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSnapshot {
    pub task_id: String,
    pub status: TrackerStatus,
    pub elapsed_secs: u64,
    pub formatted: String,
    pub notes: String,
    pub loading: bool,
    pub started_at: Option<DateTime<Utc>>,
}

impl TrackerSnapshot {
    fn capture(task_id: &str, session: &TrackingSession, loading: bool) -> Self {
        Self {
            task_id: task_id.to_string(),
            status: session.status,
            elapsed_secs: session.elapsed_secs,
            formatted: format_hms(session.elapsed_secs),
            notes: session.notes.clone(),
            loading,
            started_at: session.started_at,
        }
    }

    pub fn save_form_visible(&self) -> bool {
        self.status == TrackerStatus::AwaitingSave
    }
}

/// Result of a save attempt. Failures are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved { elapsed_secs: u64 },
    Failed { reason: String },
    /// No save operation was configured.
    Skipped,
}

pub struct TrackerOptions {
    pub task_id: String,
    pub sink: Option<Arc<dyn TimeSink>>,
    pub notifier: Arc<dyn Notifier>,
    pub settings: TrackerSettings,
}

impl TrackerOptions {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            sink: None,
            notifier: Arc::new(LogNotifier),
            settings: TrackerSettings::default(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn TimeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_settings(mut self, settings: TrackerSettings) -> Self {
        self.settings = settings;
        self
    }
}

#[derive(Clone)]
pub struct TrackerController {
    task_id: Arc<str>,
    state: Arc<Mutex<TrackingSession>>,
    loading: Arc<AtomicBool>,
    sink: Option<Arc<dyn TimeSink>>,
    notifier: Arc<dyn Notifier>,
    ticker: Arc<Mutex<Option<Ticker>>>,
    updates: Arc<watch::Sender<TrackerSnapshot>>,
    tick_interval: Duration,
    save_timeout: Option<Duration>,
}

impl TrackerController {
    pub fn new(options: TrackerOptions) -> Self {
        let session = TrackingSession::new();
        let initial = TrackerSnapshot::capture(&options.task_id, &session, false);
        let (updates, _) = watch::channel(initial);

        Self {
            task_id: Arc::from(options.task_id),
            state: Arc::new(Mutex::new(session)),
            loading: Arc::new(AtomicBool::new(false)),
            sink: options.sink,
            notifier: options.notifier,
            ticker: Arc::new(Mutex::new(None)),
            updates: Arc::new(updates),
            tick_interval: options.settings.tick_interval(),
            save_timeout: options.settings.save_timeout(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Receives a snapshot on every transition and on every tick.
    pub fn subscribe(&self) -> watch::Receiver<TrackerSnapshot> {
        self.updates.subscribe()
    }

    pub async fn snapshot(&self) -> TrackerSnapshot {
        let guard = self.state.lock().await;
        TrackerSnapshot::capture(&self.task_id, &guard, self.is_loading())
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// While loading, every interactive operation is rejected.
    pub async fn set_loading(&self, loading: bool) {
        self.loading.store(loading, Ordering::SeqCst);
        self.publish().await;
    }

    pub async fn is_ticking(&self) -> bool {
        self.ticker
            .lock()
            .await
            .as_ref()
            .map_or(false, Ticker::is_active)
    }

    pub async fn start(&self) -> Result<TrackerSnapshot> {
        self.ensure_interactive()?;

        let started = {
            let mut state = self.state.lock().await;
            state.start(Instant::now(), Utc::now())?
        };

        if started {
            self.spawn_ticker().await;
            log_info!("tracking started for task {}", self.task_id);
            self.publish().await;
        } else {
            log_debug!("start ignored; task {} already running", self.task_id);
        }

        Ok(self.snapshot().await)
    }

    pub async fn pause(&self) -> Result<TrackerSnapshot> {
        self.ensure_interactive()?;

        {
            let mut state = self.state.lock().await;
            state.pause(Instant::now())?;
            log_info!(
                "tracking paused for task {} at {}",
                self.task_id,
                format_hms(state.elapsed_secs)
            );
        }

        self.cancel_ticker().await;
        self.publish().await;
        Ok(self.snapshot().await)
    }

    /// Stops from running or paused and reveals the save form.
    pub async fn stop(&self) -> Result<TrackerSnapshot> {
        self.ensure_interactive()?;

        {
            let mut state = self.state.lock().await;
            state.stop(Instant::now())?;
            log_info!(
                "tracking stopped for task {} at {}",
                self.task_id,
                format_hms(state.elapsed_secs)
            );
        }

        self.cancel_ticker().await;
        self.publish().await;
        Ok(self.snapshot().await)
    }

    /// Hides the save form and keeps the elapsed time so tracking can resume.
    pub async fn cancel(&self) -> Result<TrackerSnapshot> {
        self.ensure_interactive()?;
        self.state.lock().await.cancel_save()?;
        self.publish().await;
        Ok(self.snapshot().await)
    }

    pub async fn set_notes(&self, notes: impl Into<String>) -> Result<TrackerSnapshot> {
        self.ensure_interactive()?;
        self.state.lock().await.set_notes(notes.into())?;
        self.publish().await;
        Ok(self.snapshot().await)
    }

    /// Hands the stopped session to the save operation.
    ///
    /// Success resets the tracker to idle. Failure or timeout leaves elapsed
    /// time and notes untouched so the user can retry. Either way exactly one
    /// notification is emitted. `Err` means the tracker was not in a state
    /// where saving is possible.
    pub async fn save(&self) -> Result<SaveOutcome> {
        self.ensure_interactive()?;

        let (elapsed_secs, notes, revision) = {
            let state = self.state.lock().await;
            state.ensure_awaiting_save()?;
            (state.elapsed_secs, state.notes.clone(), state.revision())
        };

        let Some(sink) = self.sink.clone() else {
            log_warn!("no save operation configured for task {}", self.task_id);
            return Ok(SaveOutcome::Skipped);
        };

        let attempt = sink.save_time(&self.task_id, elapsed_secs, &notes);
        let result = match self.save_timeout {
            Some(limit) => match time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => Err(anyhow!("save timed out after {}s", limit.as_secs())),
            },
            None => attempt.await,
        };

        match result {
            Ok(()) => {
                {
                    let mut state = self.state.lock().await;
                    // Only the session that was handed to the sink may be cleared.
                    if state.revision() == revision {
                        state.reset();
                    } else {
                        log_warn!(
                            "task {} changed while saving; keeping current session",
                            self.task_id
                        );
                    }
                }
                log_info!(
                    "saved {} for task {}",
                    format_hms(elapsed_secs),
                    self.task_id
                );
                self.publish().await;
                self.notifier.notify(Notification::success(format!(
                    "Time saved: {}",
                    format_hms(elapsed_secs)
                )));
                Ok(SaveOutcome::Saved { elapsed_secs })
            }
            Err(err) => {
                let reason = format!("{err:#}");
                log_error!("failed to save time for task {}: {}", self.task_id, reason);
                self.notifier
                    .notify(Notification::error(format!("Failed to save time: {reason}")));
                Ok(SaveOutcome::Failed { reason })
            }
        }
    }

    /// Tears the tracker down. The tick is cancelled and awaited; the session
    /// itself is discarded with the last clone of the controller.
    pub async fn shutdown(&self) {
        self.cancel_ticker().await;
        log_debug!("tracker for task {} shut down", self.task_id);
    }

    fn ensure_interactive(&self) -> Result<()> {
        if self.is_loading() {
            bail!("tracker controls are disabled while loading");
        }
        Ok(())
    }

    async fn spawn_ticker(&self) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(previous) = ticker_guard.take() {
            previous.stop().await;
        }

        let state = self.state.clone();
        let updates = self.updates.clone();
        let loading = self.loading.clone();
        let task_id = self.task_id.clone();
        let tick_interval = self.tick_interval;
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();

        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + tick_interval, tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let snapshot = {
                            let mut guard = state.lock().await;
                            if guard.status != TrackerStatus::Running {
                                break;
                            }
                            guard.sync_elapsed(Instant::now());
                            TrackerSnapshot::capture(
                                &task_id,
                                &guard,
                                loading.load(Ordering::SeqCst),
                            )
                        };
                        updates.send_replace(snapshot);
                    }
                }
            }
        });

        *ticker_guard = Some(Ticker::new(handle, cancel_token));
    }

    async fn cancel_ticker(&self) {
        let ticker = self.ticker.lock().await.take();
        if let Some(ticker) = ticker {
            ticker.stop().await;
        }
    }

    async fn publish(&self) {
        let snapshot = self.snapshot().await;
        self.updates.send_replace(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        notify::{ChannelNotifier, NotificationLevel},
        sink::save_fn,
    };
    use std::sync::Mutex as StdMutex;
    use tokio::sync::{mpsc, Notify};

    type Calls = Arc<StdMutex<Vec<(String, u64, String)>>>;

    fn recording_sink(fail: bool) -> (Arc<dyn TimeSink>, Calls) {
        let calls: Calls = Arc::default();
        let recorded = calls.clone();
        let sink = save_fn(move |task_id, elapsed_secs, notes| {
            recorded
                .lock()
                .unwrap()
                .push((task_id, elapsed_secs, notes));
            async move {
                if fail {
                    Err(anyhow!("network unreachable"))
                } else {
                    Ok(())
                }
            }
        });
        (sink, calls)
    }

    fn tracker_with(
        sink: Option<Arc<dyn TimeSink>>,
    ) -> (TrackerController, mpsc::UnboundedReceiver<Notification>) {
        let (notifier, rx) = ChannelNotifier::new();
        let mut options = TrackerOptions::new("task-42").with_notifier(Arc::new(notifier));
        options.sink = sink;
        (TrackerController::new(options), rx)
    }

    async fn wait_for_elapsed(rx: &mut watch::Receiver<TrackerSnapshot>, secs: u64) -> u64 {
        loop {
            let elapsed = rx.borrow_and_update().elapsed_secs;
            if elapsed >= secs {
                return elapsed;
            }
            rx.changed().await.unwrap();
        }
    }

    async fn run_then_stop(tracker: &TrackerController, notes: &str) {
        tracker.start().await.unwrap();
        time::sleep(Duration::from_secs(5)).await;
        tracker.pause().await.unwrap();
        time::sleep(Duration::from_secs(30)).await;
        tracker.start().await.unwrap();
        time::sleep(Duration::from_secs(3)).await;
        tracker.stop().await.unwrap();
        tracker.set_notes(notes).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn tick_advances_and_pause_freezes() {
        let (tracker, _notes) = tracker_with(None);
        let mut rx = tracker.subscribe();

        tracker.start().await.unwrap();
        assert_eq!(wait_for_elapsed(&mut rx, 1).await, 1);

        let paused = tracker.pause().await.unwrap();
        assert_eq!(paused.elapsed_secs, 1);
        assert_eq!(paused.status, TrackerStatus::Paused);

        time::sleep(Duration::from_secs(3_600)).await;
        assert_eq!(tracker.snapshot().await.elapsed_secs, 1);
        assert!(!tracker.is_ticking().await);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_resume_cycles_sum_running_time() {
        let (tracker, _notes) = tracker_with(None);
        let runs = [2_u64, 5, 1, 7, 3];

        for run in runs {
            tracker.start().await.unwrap();
            time::sleep(Duration::from_secs(run)).await;
            tracker.pause().await.unwrap();
            time::sleep(Duration::from_secs(11)).await;
        }

        let total: u64 = runs.iter().sum();
        let elapsed = tracker.snapshot().await.elapsed_secs;
        assert!(elapsed.abs_diff(total) <= 1, "elapsed {elapsed} vs {total}");
    }

    #[tokio::test(start_paused = true)]
    async fn sub_second_runs_add_up_across_pauses() {
        let (tracker, _notes) = tracker_with(None);

        for _ in 0..10 {
            tracker.start().await.unwrap();
            time::sleep(Duration::from_millis(1_500)).await;
            tracker.pause().await.unwrap();
            time::sleep(Duration::from_millis(700)).await;
        }

        assert_eq!(tracker.snapshot().await.elapsed_secs, 15);
    }

    #[tokio::test(start_paused = true)]
    async fn start_while_running_is_a_no_op() {
        let (tracker, _notes) = tracker_with(None);

        tracker.start().await.unwrap();
        time::sleep(Duration::from_secs(4)).await;
        let again = tracker.start().await.unwrap();
        assert_eq!(again.status, TrackerStatus::Running);

        time::sleep(Duration::from_secs(2)).await;
        let stopped = tracker.stop().await.unwrap();
        assert_eq!(stopped.elapsed_secs, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_reveals_save_form_and_cancels_tick() {
        let (tracker, _notes) = tracker_with(None);
        let mut rx = tracker.subscribe();

        run_then_stop(&tracker, "").await;

        let snapshot = tracker.snapshot().await;
        assert_eq!(snapshot.elapsed_secs, 8);
        assert!(snapshot.save_form_visible());
        assert!(!tracker.is_ticking().await);

        let _ = rx.borrow_and_update();
        time::sleep(Duration::from_secs(10)).await;
        assert!(!rx.has_changed().unwrap());
        assert_eq!(tracker.snapshot().await.elapsed_secs, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_from_paused_reaches_save_form() {
        let (tracker, _notes) = tracker_with(None);

        tracker.start().await.unwrap();
        time::sleep(Duration::from_secs(2)).await;
        tracker.pause().await.unwrap();

        let stopped = tracker.stop().await.unwrap();
        assert!(stopped.save_form_visible());
        assert_eq!(stopped.elapsed_secs, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_save_resets_to_idle() {
        let (sink, calls) = recording_sink(false);
        let (tracker, mut notes) = tracker_with(Some(sink));

        run_then_stop(&tracker, "done").await;
        let outcome = tracker.save().await.unwrap();

        assert_eq!(outcome, SaveOutcome::Saved { elapsed_secs: 8 });
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            &[("task-42".to_string(), 8, "done".to_string())]
        );

        let snapshot = tracker.snapshot().await;
        assert_eq!(snapshot.status, TrackerStatus::Idle);
        assert_eq!(snapshot.elapsed_secs, 0);
        assert_eq!(snapshot.notes, "");
        assert!(!snapshot.save_form_visible());

        let notification = notes.try_recv().unwrap();
        assert_eq!(notification.level, NotificationLevel::Success);
        assert!(notes.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_save_preserves_session() {
        let (sink, calls) = recording_sink(true);
        let (tracker, mut notes) = tracker_with(Some(sink));

        run_then_stop(&tracker, "done").await;
        let outcome = tracker.save().await.unwrap();

        assert!(matches!(outcome, SaveOutcome::Failed { ref reason } if reason.contains("network")));
        assert_eq!(calls.lock().unwrap().len(), 1);

        let snapshot = tracker.snapshot().await;
        assert_eq!(snapshot.status, TrackerStatus::AwaitingSave);
        assert_eq!(snapshot.elapsed_secs, 8);
        assert_eq!(snapshot.notes, "done");

        let notification = notes.try_recv().unwrap();
        assert_eq!(notification.level, NotificationLevel::Error);
        assert!(notes.try_recv().is_err());

        // Retrying is allowed and hits the sink again.
        tracker.save().await.unwrap();
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn session_changed_during_save_is_kept() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let sink = {
            let entered = entered.clone();
            let release = release.clone();
            save_fn(move |_, _, _| {
                let entered = entered.clone();
                let release = release.clone();
                async move {
                    entered.notify_one();
                    release.notified().await;
                    Ok(())
                }
            })
        };
        let (tracker, mut notes) = tracker_with(Some(sink));

        run_then_stop(&tracker, "first run").await;
        let pending = tokio::spawn({
            let tracker = tracker.clone();
            async move { tracker.save().await }
        });
        entered.notified().await;

        tracker.cancel().await.unwrap();
        tracker.start().await.unwrap();
        time::sleep(Duration::from_secs(4)).await;
        tracker.stop().await.unwrap();
        tracker.set_notes("second run").await.unwrap();

        release.notify_one();
        let outcome = pending.await.unwrap().unwrap();
        assert_eq!(outcome, SaveOutcome::Saved { elapsed_secs: 8 });

        let snapshot = tracker.snapshot().await;
        assert_eq!(snapshot.status, TrackerStatus::AwaitingSave);
        assert_eq!(snapshot.elapsed_secs, 12);
        assert_eq!(snapshot.notes, "second run");
        assert_eq!(notes.try_recv().unwrap().level, NotificationLevel::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_save_times_out_as_failure() {
        let sink = save_fn(|_, _, _| std::future::pending::<Result<()>>());
        let (notifier, mut notes) = ChannelNotifier::new();
        let tracker = TrackerController::new(
            TrackerOptions::new("task-7")
                .with_sink(sink)
                .with_notifier(Arc::new(notifier))
                .with_settings(TrackerSettings {
                    save_timeout_secs: Some(5),
                    ..TrackerSettings::default()
                }),
        );

        run_then_stop(&tracker, "slow").await;
        let outcome = tracker.save().await.unwrap();

        assert!(matches!(outcome, SaveOutcome::Failed { ref reason } if reason.contains("timed out")));
        assert_eq!(tracker.snapshot().await.status, TrackerStatus::AwaitingSave);
        assert_eq!(notes.try_recv().unwrap().level, NotificationLevel::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn save_without_sink_is_skipped() {
        let (tracker, mut notes) = tracker_with(None);

        run_then_stop(&tracker, "").await;
        assert_eq!(tracker.save().await.unwrap(), SaveOutcome::Skipped);
        assert_eq!(tracker.snapshot().await.status, TrackerStatus::AwaitingSave);
        assert!(notes.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_returns_to_paused_and_allows_resume() {
        let (tracker, _notes) = tracker_with(None);

        run_then_stop(&tracker, "draft").await;
        let cancelled = tracker.cancel().await.unwrap();
        assert_eq!(cancelled.status, TrackerStatus::Paused);
        assert_eq!(cancelled.elapsed_secs, 8);

        tracker.start().await.unwrap();
        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(tracker.stop().await.unwrap().elapsed_secs, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn save_is_rejected_outside_the_save_form() {
        let (sink, calls) = recording_sink(false);
        let (tracker, _notes) = tracker_with(Some(sink));

        assert!(tracker.save().await.is_err());
        tracker.start().await.unwrap();
        assert!(tracker.save().await.is_err());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn loading_disables_controls() {
        let (tracker, _notes) = tracker_with(None);

        tracker.set_loading(true).await;
        assert!(tracker.start().await.is_err());
        assert_eq!(tracker.snapshot().await.status, TrackerStatus::Idle);
        assert!(tracker.snapshot().await.loading);

        tracker.set_loading(false).await;
        assert!(tracker.start().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_running_tick() {
        let (tracker, _notes) = tracker_with(None);
        let mut rx = tracker.subscribe();

        tracker.start().await.unwrap();
        tracker.shutdown().await;
        assert!(!tracker.is_ticking().await);

        let _ = rx.borrow_and_update();
        time::sleep(Duration::from_secs(5)).await;
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_tracker_stops_the_tick() {
        let (tracker, _notes) = tracker_with(None);
        let mut rx = tracker.subscribe();

        tracker.start().await.unwrap();
        let _ = rx.borrow_and_update();
        drop(tracker);

        // The tick task held the last sender; once it is gone the channel closes
        // instead of delivering another tick.
        assert!(rx.changed().await.is_err());
    }
}
