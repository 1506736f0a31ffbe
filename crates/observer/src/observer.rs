//! Push/poll reconciliation for one watched job.
//!
//! The observer task owns all derived state. Commands repoint it at a
//! different job (or none), the bus subscription feeds it events, and
//! polls run as spawned fetches tagged with an epoch so responses that
//! outlive a job switch are discarded instead of applied.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use leanloom_core::channels::job_channel;
use leanloom_core::job::{is_timed_out, JobStatus};
use leanloom_core::{DbId, JobRecord, Timestamp};
use leanloom_events::client::{ChannelSubscription, EventSubscriber};
use leanloom_events::wire::{EventKind, NotificationEvent};

use crate::source::{FetchError, JobStatusSource};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_TIMEOUT_AFTER: Duration = Duration::from_secs(120);

/// Observer timings.
///
/// Environment variables read by [`ObserverConfig::from_env`]:
///
/// | Variable                | Default |
/// |-------------------------|---------|
/// | `OBSERVER_POLL_SECS`    | `5`     |
/// | `OBSERVER_TIMEOUT_SECS` | `120`   |
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    pub poll_interval: Duration,
    pub timeout_after: Duration,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout_after: DEFAULT_TIMEOUT_AFTER,
        }
    }
}

impl ObserverConfig {
    pub fn from_env() -> Self {
        let poll_secs: u64 = std::env::var("OBSERVER_POLL_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .expect("OBSERVER_POLL_SECS must be an integer");
        let timeout_secs: u64 = std::env::var("OBSERVER_TIMEOUT_SECS")
            .unwrap_or_else(|_| "120".to_string())
            .parse()
            .expect("OBSERVER_TIMEOUT_SECS must be an integer");

        Self {
            poll_interval: Duration::from_secs(poll_secs),
            timeout_after: Duration::from_secs(timeout_secs),
        }
    }
}

/// Latest reconciled view of the watched job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub job_id: DbId,
    pub status: JobStatus,
    pub description: Option<String>,
    pub progress: Option<i16>,
    /// Soft signal: still non-terminal past the threshold. The job row is
    /// untouched and a late completion still applies.
    pub timed_out: bool,
    /// The server does not know this job id (fetch returned 404).
    pub missing: bool,
    /// Last poll failure, cleared by the next successful poll. Push updates
    /// keep flowing while this is set.
    pub fetch_error: Option<String>,
}

/// One-shot completion report, sent exactly once per watched job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job_id: DbId,
    pub status: JobStatus,
    pub description: Option<String>,
}

enum Command {
    SetJob(Option<DbId>),
}

/// Handle to the observer task.
pub struct JobObserver {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<Option<JobSnapshot>>,
    cancel: CancellationToken,
}

impl JobObserver {
    /// Spawn the observer task. Returns the handle and the outcome channel.
    pub fn start(
        source: Arc<dyn JobStatusSource>,
        bus: Arc<dyn EventSubscriber>,
        config: ObserverConfig,
    ) -> (Self, mpsc::UnboundedReceiver<JobOutcome>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(run_observer(
            source,
            bus,
            config,
            commands_rx,
            snapshot_tx,
            outcomes_tx,
            cancel.clone(),
        ));

        (
            Self {
                commands: commands_tx,
                snapshot: snapshot_rx,
                cancel,
            },
            outcomes_rx,
        )
    }

    /// Point the observer at a job, or at nothing.
    ///
    /// Switching resets all derived state (timeout display, completion
    /// latch, fetch errors), unsubscribes the previous channel and starts
    /// with an immediate fetch of the new job.
    pub fn set_job(&self, job_id: Option<DbId>) {
        let _ = self.commands.send(Command::SetJob(job_id));
    }

    /// Watch-channel view of the current snapshot; `None` while idle.
    pub fn snapshot(&self) -> watch::Receiver<Option<JobSnapshot>> {
        self.snapshot.clone()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for JobObserver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Observer task
// ---------------------------------------------------------------------------

struct PollResult {
    epoch: u64,
    job_id: DbId,
    result: Result<Option<JobRecord>, FetchError>,
}

struct WatchState {
    epoch: u64,
    job_id: DbId,
    status: JobStatus,
    description: Option<String>,
    progress: Option<i16>,
    /// From the first successful fetch; until then the watch start stands
    /// in as the timeout anchor.
    created_at: Option<Timestamp>,
    watch_started: Timestamp,
    timed_out: bool,
    missing: bool,
    fetch_error: Option<String>,
    outcome_sent: bool,
}

impl WatchState {
    fn new(epoch: u64, job_id: DbId) -> Self {
        Self {
            epoch,
            job_id,
            status: JobStatus::Pending,
            description: None,
            progress: None,
            created_at: None,
            watch_started: chrono::Utc::now(),
            timed_out: false,
            missing: false,
            fetch_error: None,
            outcome_sent: false,
        }
    }

    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.job_id,
            status: self.status,
            description: self.description.clone(),
            progress: self.progress,
            timed_out: self.timed_out,
            missing: self.missing,
            fetch_error: self.fetch_error.clone(),
        }
    }

    /// Polling stops once the job is settled; push events still apply.
    fn settled(&self) -> bool {
        self.status.is_terminal() || self.missing
    }
}

async fn run_observer(
    source: Arc<dyn JobStatusSource>,
    bus: Arc<dyn EventSubscriber>,
    config: ObserverConfig,
    mut commands: mpsc::UnboundedReceiver<Command>,
    snapshot_tx: watch::Sender<Option<JobSnapshot>>,
    outcomes: mpsc::UnboundedSender<JobOutcome>,
    cancel: CancellationToken,
) {
    let threshold = chrono::Duration::milliseconds(config.timeout_after.as_millis() as i64);
    let (results_tx, mut results) = mpsc::unbounded_channel::<PollResult>();

    let mut state: Option<WatchState> = None;
    let mut subscription: Option<ChannelSubscription> = None;
    let mut ticker = tokio::time::interval(config.poll_interval);
    let mut epoch: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,

            command = commands.recv() => {
                let Some(Command::SetJob(target)) = command else { return };
                epoch += 1;
                // Drop the old subscription before opening the new one so
                // the unsubscribe is issued first.
                subscription = None;
                state = target.map(|job_id| WatchState::new(epoch, job_id));
                if let Some(job_id) = target {
                    subscription = Some(bus.subscribe_channel(&job_channel(job_id)));
                    tracing::debug!(job_id, "Observing job");
                }
                // A fresh interval ticks immediately, which is the
                // activation fetch.
                ticker = tokio::time::interval(config.poll_interval);
                let _ = snapshot_tx.send(state.as_ref().map(WatchState::snapshot));
            }

            _ = ticker.tick() => {
                let Some(state) = state.as_mut() else { continue };
                if state.settled() {
                    continue;
                }
                if check_timeout(state, threshold) {
                    let _ = snapshot_tx.send(Some(state.snapshot()));
                }
                spawn_fetch(&source, state, &results_tx);
            }

            event = next_event(&mut subscription) => {
                match event {
                    Some(event) => {
                        let Some(state) = state.as_mut() else { continue };
                        if apply_event(state, &event) {
                            send_outcome_once(state, &outcomes);
                            let _ = snapshot_tx.send(Some(state.snapshot()));
                        }
                    }
                    None => subscription = None,
                }
            }

            poll = results.recv() => {
                // results_tx lives in this scope, so recv cannot end.
                let Some(poll) = poll else { return };
                let Some(state) = state.as_mut() else { continue };
                if poll.epoch != state.epoch || poll.job_id != state.job_id {
                    tracing::debug!(job_id = poll.job_id, "Discarding stale poll response");
                    continue;
                }
                if apply_poll(state, poll.result) {
                    send_outcome_once(state, &outcomes);
                    let _ = snapshot_tx.send(Some(state.snapshot()));
                }
            }
        }
    }
}

/// Await the next event, or park forever while unsubscribed.
async fn next_event(subscription: &mut Option<ChannelSubscription>) -> Option<NotificationEvent> {
    match subscription.as_mut() {
        Some(active) => active.recv().await,
        None => std::future::pending().await,
    }
}

fn spawn_fetch(
    source: &Arc<dyn JobStatusSource>,
    state: &WatchState,
    results: &mpsc::UnboundedSender<PollResult>,
) {
    let source = Arc::clone(source);
    let results = results.clone();
    let epoch = state.epoch;
    let job_id = state.job_id;
    tokio::spawn(async move {
        let result = source.fetch_job(job_id).await;
        let _ = results.send(PollResult {
            epoch,
            job_id,
            result,
        });
    });
}

fn check_timeout(state: &mut WatchState, threshold: chrono::Duration) -> bool {
    if state.timed_out {
        return false;
    }
    let anchor = state.created_at.unwrap_or(state.watch_started);
    if is_timed_out(state.status, anchor, chrono::Utc::now(), threshold) {
        state.timed_out = true;
        tracing::warn!(job_id = state.job_id, "Job exceeded the soft timeout threshold");
        return true;
    }
    false
}

/// Apply one push event. Returns whether the view changed.
fn apply_event(state: &mut WatchState, event: &NotificationEvent) -> bool {
    match event.kind {
        EventKind::Status => {
            if state.status.is_terminal() {
                return false;
            }
            if event.data.message.is_some() {
                state.description = event.data.message.clone();
            }
            true
        }
        EventKind::Progress => {
            if state.status.is_terminal() {
                return false;
            }
            if let Some(percent) = event.data.progress {
                state.progress = Some(percent);
            }
            if event.data.message.is_some() {
                state.description = event.data.message.clone();
            }
            true
        }
        EventKind::Log => {
            tracing::debug!(
                job_id = state.job_id,
                message = ?event.data.message,
                "Job log event",
            );
            false
        }
        EventKind::Done => apply_terminal(state, JobStatus::Completed, event.data.message.clone()),
        EventKind::Error => apply_terminal(state, JobStatus::Failed, event.data.message.clone()),
    }
}

fn apply_terminal(state: &mut WatchState, status: JobStatus, message: Option<String>) -> bool {
    if state.status.is_terminal() {
        if state.status != status {
            tracing::warn!(
                job_id = state.job_id,
                held = %state.status,
                pushed = %status,
                "Conflicting terminal signals, keeping the first",
            );
        }
        return false;
    }
    state.status = status;
    if message.is_some() {
        state.description = message;
    }
    if status == JobStatus::Completed {
        state.progress = Some(100);
    }
    // A completion supersedes the soft timeout display.
    state.timed_out = false;
    true
}

/// Apply one poll response. Returns whether the view changed.
fn apply_poll(state: &mut WatchState, result: Result<Option<JobRecord>, FetchError>) -> bool {
    match result {
        Ok(Some(record)) => {
            state.created_at = Some(record.created_at);
            state.fetch_error = None;
            if record.status.rank() < state.status.rank() {
                // A read ordered behind a push we already applied; keep the
                // more advanced status (terminal beats non-terminal).
                return true;
            }
            state.status = record.status;
            if record.description.is_some() {
                // A pushed message not yet persisted would otherwise be
                // erased by the poll.
                state.description = record.description;
            }
            state.progress = Some(record.progress);
            if record.status.is_terminal() {
                state.timed_out = false;
            }
            true
        }
        Ok(None) => {
            if state.status.is_terminal() {
                return false;
            }
            state.missing = true;
            state.fetch_error = None;
            tracing::warn!(job_id = state.job_id, "Watched job does not exist");
            true
        }
        Err(error) => {
            tracing::warn!(job_id = state.job_id, %error, "Job status poll failed");
            state.fetch_error = Some(error.to_string());
            true
        }
    }
}

fn send_outcome_once(state: &mut WatchState, outcomes: &mpsc::UnboundedSender<JobOutcome>) {
    if state.outcome_sent || !state.status.is_terminal() {
        return;
    }
    state.outcome_sent = true;
    tracing::info!(
        job_id = state.job_id,
        status = %state.status,
        "Watched job reached a terminal status",
    );
    let _ = outcomes.send(JobOutcome {
        job_id: state.job_id,
        status: state.status,
        description: state.description.clone(),
    });
}
