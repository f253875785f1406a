use chrono::offset::LocalResult;
use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::database::Store;
use crate::error::AppError;
use crate::models::{ActivityCategory, TimeWindow};
use crate::prefs::PreferenceStore;
use crate::sensor::{SensorGuard, SensorSource};

/// Goal substituted when a user has never configured one.
pub const DEFAULT_STEP_GOAL: u32 = 2500;

/// Calorie estimate per step.
pub const CALORIES_PER_STEP: f64 = 0.04;

/// The observable per-user summary. Each emission fully replaces the
/// previous one.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActivitySummary {
    pub steps: i64,
    pub step_goal: u32,
    pub calories_burned: f64,
    pub food_calories: f64,
    pub cardio_minutes: f64,
    pub strength_sets: i64,
}

/// Merges the authenticated user, the selected time window, the user's
/// goal, persisted history, and live sensor deltas into one observable
/// summary, and persists sensor-derived step deltas back into the store.
#[derive(Clone)]
pub struct StatsPipeline {
    store: Store,
    prefs: PreferenceStore,
    sensor: SensorSource,
}

impl StatsPipeline {
    pub fn new(store: Store, prefs: PreferenceStore, sensor: SensorSource) -> Self {
        Self {
            store,
            prefs,
            sensor,
        }
    }

    pub fn subscribe(&self) -> SummarySubscription {
        let (sensor_guard, sensor_rx) = self.sensor.subscribe().into_parts();
        let (window_tx, window_rx) = watch::channel(TimeWindow::default());
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let driver = tokio::spawn(drive(
            self.store.clone(),
            self.prefs.clone(),
            sensor_rx,
            window_rx,
            out_tx,
        ));

        SummarySubscription {
            summaries: out_rx,
            window_tx,
            driver,
            _sensor: sensor_guard,
        }
    }
}

/// One consumer's view of the summary stream. Dropping it aborts the
/// driver task and releases every upstream subscription it created,
/// including the sensor listener.
pub struct SummarySubscription {
    summaries: mpsc::UnboundedReceiver<ActivitySummary>,
    window_tx: watch::Sender<TimeWindow>,
    driver: JoinHandle<()>,
    _sensor: SensorGuard,
}

impl SummarySubscription {
    /// Next summary emission. Emissions are totally ordered; a summary is
    /// never older than one already delivered.
    pub async fn next(&mut self) -> Option<ActivitySummary> {
        self.summaries.recv().await
    }

    pub fn set_window(&self, window: TimeWindow) {
        let _ = self.window_tx.send(window);
    }
}

impl Drop for SummarySubscription {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

struct Driver {
    store: Store,
    prefs: PreferenceStore,
    out: mpsc::UnboundedSender<ActivitySummary>,
    done_tx: mpsc::UnboundedSender<(u64, ActivitySummary)>,
    generation: u64,
    compute: Option<JoinHandle<()>>,
    baseline: Option<u64>,
}

async fn drive(
    store: Store,
    prefs: PreferenceStore,
    mut sensor_rx: broadcast::Receiver<u64>,
    mut window_rx: watch::Receiver<TimeWindow>,
    out: mpsc::UnboundedSender<ActivitySummary>,
) {
    let mut session_rx = prefs.watch_session();
    let mut goals_rx = prefs.watch_goals();
    let mut store_rx = store.watch_changes();

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();

    let mut driver = Driver {
        store,
        prefs,
        out,
        done_tx,
        generation: 0,
        compute: None,
        baseline: None,
    };

    driver.restart_composition(*session_rx.borrow(), *window_rx.borrow());

    let mut sensor_open = true;

    loop {
        tokio::select! {
            changed = session_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                // A session change starts a fresh baseline-awaiting phase.
                driver.baseline = None;
                let user = *session_rx.borrow_and_update();
                driver.restart_composition(user, *window_rx.borrow());
            }
            changed = window_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let window = *window_rx.borrow_and_update();
                driver.restart_composition(*session_rx.borrow(), window);
            }
            changed = goals_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                goals_rx.borrow_and_update();
                driver.restart_composition(*session_rx.borrow(), *window_rx.borrow());
            }
            changed = store_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                store_rx.borrow_and_update();
                driver.restart_composition(*session_rx.borrow(), *window_rx.borrow());
            }
            reading = sensor_rx.recv(), if sensor_open => {
                match reading {
                    Ok(count) => {
                        let user = *session_rx.borrow();
                        driver.record_reading(user, count).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Sensor observations lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => sensor_open = false,
                }
            }
            completed = done_rx.recv() => {
                if let Some((generation, summary)) = completed {
                    // Stale generations were superseded mid-flight.
                    if generation == driver.generation && driver.out.send(summary).is_err() {
                        break;
                    }
                }
            }
        }
    }

    if let Some(task) = driver.compute.take() {
        task.abort();
    }
}

impl Driver {
    /// Sensor observation state machine: first observation per session is
    /// the baseline, strictly increasing observations persist their
    /// positive delta, anything else is a discontinuity.
    async fn record_reading(&mut self, user: Option<i64>, count: u64) {
        let Some(user_id) = user else {
            return;
        };

        match self.baseline {
            None => {
                debug!(count, "Establishing step baseline");
                self.baseline = Some(count);
            }
            Some(previous) if count > previous => {
                let delta = (count - previous) as i64;
                let today = Local::now().date_naive();
                match self.store.increment_daily_steps(user_id, today, delta).await {
                    Ok(()) => self.baseline = Some(count),
                    Err(e) => {
                        // Baseline stays put; the delta is recomputed from
                        // the next observation.
                        e.log_and_record("persisting step delta");
                    }
                }
            }
            Some(previous) => {
                if count < previous {
                    debug!(previous, count, "Sensor discontinuity, resetting baseline");
                }
                self.baseline = Some(count);
            }
        }
    }

    /// Cancel-and-restart: every upstream change supersedes the in-flight
    /// composition, and only the newest generation may deliver.
    fn restart_composition(&mut self, user: Option<i64>, window: TimeWindow) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(task) = self.compute.take() {
            task.abort();
        }

        let store = self.store.clone();
        let prefs = self.prefs.clone();
        let done = self.done_tx.clone();
        let generation = self.generation;

        self.compute = Some(tokio::spawn(async move {
            let summary = match user {
                None => ActivitySummary::default(),
                Some(user_id) => {
                    match compose_summary(&store, &prefs, user_id, window).await {
                        Ok(summary) => summary,
                        Err(e) => {
                            // Retried at the next upstream emission.
                            e.log_and_record("composing activity summary");
                            return;
                        }
                    }
                }
            };
            let _ = done.send((generation, summary));
        }));
    }
}

async fn compose_summary(
    store: &Store,
    prefs: &PreferenceStore,
    user_id: i64,
    window: TimeWindow,
) -> Result<ActivitySummary, AppError> {
    let now = Local::now();
    let start = window_start(window, now);
    let start_day = window_start_day(window, now.date_naive());

    let (goal, activities, steps) = tokio::join!(
        resolve_step_goal(store, prefs, user_id),
        store.activities_since(user_id, start.naive_utc()),
        store.steps_since(user_id, start_day),
    );
    let step_goal = goal?;
    let activities = activities?;
    let steps = steps?;

    let mut food_calories = 0.0;
    let mut cardio_minutes = 0.0;
    let mut strength_sets: i64 = 0;
    for entry in &activities {
        match entry.category {
            ActivityCategory::FoodDrinks => food_calories += entry.value,
            ActivityCategory::Cardio => cardio_minutes += entry.value,
            ActivityCategory::Strength => strength_sets += entry.sets.unwrap_or_default(),
        }
    }

    Ok(ActivitySummary {
        steps,
        step_goal,
        calories_burned: steps as f64 * CALORIES_PER_STEP,
        food_calories,
        cardio_minutes,
        strength_sets,
    })
}

/// Preference override first (goal edits are observable there), then the
/// user row; zero or absent means unset.
async fn resolve_step_goal(
    store: &Store,
    prefs: &PreferenceStore,
    user_id: i64,
) -> Result<u32, AppError> {
    if let Some(goal) = prefs.step_goal(user_id) {
        if goal > 0 {
            return Ok(goal);
        }
    }

    let user = store.get_user(user_id).await?;
    if user.step_goal > 0 {
        Ok(user.step_goal)
    } else {
        Ok(DEFAULT_STEP_GOAL)
    }
}

/// First calendar day included in the window.
pub fn window_start_day(window: TimeWindow, today: NaiveDate) -> NaiveDate {
    match window {
        TimeWindow::Daily => today,
        TimeWindow::Monthly => {
            NaiveDate::from_ymd_opt(today.year(), today.month(), 1).unwrap_or(today)
        }
    }
}

/// Window start instant: local midnight of the window's first day.
pub fn window_start(window: TimeWindow, now: DateTime<Local>) -> DateTime<Utc> {
    let first_day = window_start_day(window, now.date_naive());
    let midnight = first_day.and_time(NaiveTime::MIN);
    match midnight.and_local_timezone(Local) {
        LocalResult::Single(start) => start.with_timezone(&Utc),
        // Midnight can be doubled or skipped across a DST change.
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => Utc.from_utc_datetime(&midnight),
    }
}
