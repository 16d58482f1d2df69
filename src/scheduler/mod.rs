pub mod store;

pub use store::{ScheduleError, ScheduleStore, ScheduleTime};

use crate::runner::{Launcher, Trigger};
use crate::workflow::LogSink;
use chrono::{Duration as ChronoDuration, NaiveDateTime};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const POLL_PERIOD: Duration = Duration::from_secs(1);

/// First instant after `now` at which `time` occurs.
fn next_occurrence(time: ScheduleTime, now: NaiveDateTime) -> NaiveDateTime {
    let today = now.date().and_time(time.time());
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

/// Next due instant for every scheduled time.
#[derive(Debug, Clone, Default)]
pub struct TriggerBook {
    entries: Vec<(ScheduleTime, NaiveDateTime)>,
}

impl TriggerBook {
    pub fn new(times: &[ScheduleTime], now: NaiveDateTime) -> Self {
        Self {
            entries: times.iter().map(|t| (*t, next_occurrence(*t, now))).collect(),
        }
    }

    pub fn times(&self) -> Vec<ScheduleTime> {
        self.entries.iter().map(|(t, _)| *t).collect()
    }

    /// Times whose occurrence has come, each re-armed for its next day.
    pub fn take_due(&mut self, now: NaiveDateTime) -> Vec<ScheduleTime> {
        let mut due = Vec::new();
        for (time, next) in &mut self.entries {
            if now >= *next {
                due.push(*time);
                *next = next_occurrence(*time, now);
            }
        }
        due
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Idle,
    Launched(ScheduleTime),
    /// Due while another run was active; dropped, not queued.
    Suppressed(ScheduleTime),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State shared between the scheduler handle and its poll task.
#[derive(Clone)]
struct PollState {
    book: Arc<Mutex<TriggerBook>>,
    launcher: Arc<Launcher>,
    sink: Arc<dyn LogSink>,
}

impl PollState {
    fn tick(&self, now: NaiveDateTime) -> Tick {
        let due = lock(&self.book).take_due(now);
        let Some(time) = due.first().copied() else {
            return Tick::Idle;
        };

        if self.launcher.is_running() {
            self.sink.warn(format!("Scheduled run at {} skipped: a run is already active", time));
            return Tick::Suppressed(time);
        }

        match self.launcher.try_start(Trigger::Scheduled(time)) {
            Ok(_) => Tick::Launched(time),
            Err(e) => {
                self.sink.warn(format!("Scheduled run at {} skipped: {}", time, e));
                Tick::Suppressed(time)
            }
        }
    }
}

fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

async fn poll_loop<C>(state: PollState, token: CancellationToken, clock: C)
where
    C: Fn() -> NaiveDateTime + Send + 'static,
{
    let mut ticker = tokio::time::interval(POLL_PERIOD);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        state.tick(clock());
    }
    state.sink.debug("Scheduler poll loop finished".to_string());
}

/// Daily triggers polled once per second.
pub struct Scheduler {
    store: ScheduleStore,
    state: PollState,
    poll: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    runtime: Handle,
}

impl Scheduler {
    /// Must be called from within a Tokio runtime; the poll loop is spawned on it.
    pub fn new(store: ScheduleStore, launcher: Arc<Launcher>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            store,
            state: PollState {
                book: Arc::new(Mutex::new(TriggerBook::default())),
                launcher,
                sink,
            },
            poll: Mutex::new(None),
            runtime: Handle::current(),
        }
    }

    pub fn store(&self) -> &ScheduleStore {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        lock(&self.poll)
            .as_ref()
            .map_or(false, |(_, handle)| !handle.is_finished())
    }

    /// Times the poll loop is currently armed with.
    pub fn armed_times(&self) -> Vec<ScheduleTime> {
        lock(&self.state.book).times()
    }

    fn rebuild(&self, times: &[ScheduleTime]) {
        *lock(&self.state.book) = TriggerBook::new(times, local_now());
    }

    /// Arm the schedule from disk and start polling.
    ///
    /// Returns `false` without starting when no time is configured.
    pub fn start(&self) -> Result<bool, ScheduleError> {
        let times = self.store.load()?;
        if times.is_empty() {
            self.state
                .sink
                .warn("No schedule configured. Add at least one time first.".to_string());
            return Ok(false);
        }

        self.rebuild(&times);

        let mut poll = lock(&self.poll);
        let already_polling = poll.as_ref().map_or(false, |(_, handle)| !handle.is_finished());
        if !already_polling {
            let token = CancellationToken::new();
            let handle = self.runtime.spawn(poll_loop(self.state.clone(), token.clone(), local_now));
            *poll = Some((token, handle));
            drop(poll);
            self.state
                .sink
                .info(format!("⏰ Scheduler started with {} time(s)", times.len()));
        }
        Ok(true)
    }

    /// Stop polling and forget every armed trigger.
    pub fn stop(&self) {
        let previous = lock(&self.poll).take();
        *lock(&self.state.book) = TriggerBook::default();
        if let Some((token, _handle)) = previous {
            token.cancel();
            self.state.sink.info("Scheduler stopped and triggers cleared.".to_string());
        }
    }

    /// Returns whether the scheduler is running afterwards.
    pub fn toggle(&self) -> Result<bool, ScheduleError> {
        if self.is_running() {
            self.stop();
            Ok(false)
        } else {
            self.start()
        }
    }

    /// Re-read the schedule after an edit.
    ///
    /// An empty schedule stops the scheduler; a non-empty one (re)arms it and
    /// starts polling if it was not already.
    pub fn reload(&self) -> Result<Vec<ScheduleTime>, ScheduleError> {
        let times = self.store.load()?;
        if times.is_empty() {
            self.stop();
        } else if self.is_running() {
            self.rebuild(&times);
        } else {
            self.start()?;
        }
        Ok(times)
    }

    #[cfg(test)]
    fn tick(&self, now: NaiveDateTime) -> Tick {
        self.state.tick(now)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some((token, _)) = lock(&self.poll).take() {
            token.cancel();
        }
    }
}
