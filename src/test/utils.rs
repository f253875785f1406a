pub mod test_db {
    use std::collections::HashMap;
    use std::sync::Once;

    use chrono::{Duration, Local, NaiveDateTime, Utc};
    use sqlx::sqlite::SqlitePoolOptions;

    use crate::database::{Store, apply_schema};
    use crate::error::AppError;
    use crate::models::{ActivityCategory, NewActivityEntry};

    static INIT: Once = Once::new();
    static STANDARD_PASSWORD: &str = "password123";

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        activities: Vec<TestActivity>,
        steps: Vec<TestSteps>,
    }

    struct TestUser {
        username: String,
        password: String,
        step_goal: u32,
    }

    struct TestActivity {
        username: String,
        category: ActivityCategory,
        name: String,
        value: f64,
        unit: String,
        sets: Option<i64>,
        reps: Option<i64>,
        timestamp: NaiveDateTime,
    }

    struct TestSteps {
        username: String,
        days_ago: i64,
        count: i64,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn user(self, username: &str) -> Self {
            self.user_with_goal(username, 0)
        }

        pub fn user_with_goal(mut self, username: &str, step_goal: u32) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                password: STANDARD_PASSWORD.to_string(),
                step_goal,
            });
            self
        }

        pub fn user_with_password(mut self, username: &str, password: &str) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                password: password.to_string(),
                step_goal: 0,
            });
            self
        }

        pub fn cardio(self, username: &str, name: &str, minutes: f64, days_ago: i64) -> Self {
            self.activity(
                username,
                ActivityCategory::Cardio,
                name,
                minutes,
                "min",
                None,
                None,
                days_ago,
            )
        }

        pub fn food(self, username: &str, name: &str, calories: f64, days_ago: i64) -> Self {
            self.activity(
                username,
                ActivityCategory::FoodDrinks,
                name,
                calories,
                "kcal",
                None,
                None,
                days_ago,
            )
        }

        pub fn strength(
            self,
            username: &str,
            name: &str,
            weight: f64,
            sets: i64,
            reps: i64,
            days_ago: i64,
        ) -> Self {
            self.activity(
                username,
                ActivityCategory::Strength,
                name,
                weight,
                "kg",
                Some(sets),
                Some(reps),
                days_ago,
            )
        }

        #[allow(clippy::too_many_arguments)]
        pub fn activity(
            self,
            username: &str,
            category: ActivityCategory,
            name: &str,
            value: f64,
            unit: &str,
            sets: Option<i64>,
            reps: Option<i64>,
            days_ago: i64,
        ) -> Self {
            let timestamp = (Utc::now() - Duration::days(days_ago)).naive_utc();
            self.activity_at(username, category, name, value, unit, sets, reps, timestamp)
        }

        #[allow(clippy::too_many_arguments)]
        pub fn activity_at(
            mut self,
            username: &str,
            category: ActivityCategory,
            name: &str,
            value: f64,
            unit: &str,
            sets: Option<i64>,
            reps: Option<i64>,
            timestamp: NaiveDateTime,
        ) -> Self {
            self.activities.push(TestActivity {
                username: username.to_string(),
                category,
                name: name.to_string(),
                value,
                unit: unit.to_string(),
                sets,
                reps,
                timestamp,
            });
            self
        }

        pub fn steps(mut self, username: &str, days_ago: i64, count: i64) -> Self {
            self.steps.push(TestSteps {
                username: username.to_string(),
                days_ago,
                count,
            });
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = env_logger::builder().is_test(true).try_init();
            });

            // One connection only: every connection to sqlite::memory: is
            // its own empty database.
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await?;

            apply_schema(&pool).await?;
            let store = Store::new(pool);

            let mut user_id_map: HashMap<String, i64> = HashMap::new();

            for user in &self.users {
                let user_id = store
                    .create_user(&user.username, &user.password, user.step_goal)
                    .await?;
                user_id_map.insert(user.username.clone(), user_id);
            }

            for activity in &self.activities {
                let user_id = *user_id_map.get(&activity.username).ok_or_else(|| {
                    AppError::NotFound(format!("Unknown test user {}", activity.username))
                })?;

                let entry = NewActivityEntry {
                    category: activity.category,
                    name: activity.name.clone(),
                    value: activity.value,
                    unit: activity.unit.clone(),
                    sets: activity.sets,
                    reps: activity.reps,
                };
                store
                    .insert_activity(user_id, activity.timestamp, &entry)
                    .await?;
            }

            for steps in &self.steps {
                let user_id = *user_id_map.get(&steps.username).ok_or_else(|| {
                    AppError::NotFound(format!("Unknown test user {}", steps.username))
                })?;

                let day = (Local::now() - Duration::days(steps.days_ago)).date_naive();
                store.increment_daily_steps(user_id, day, steps.count).await?;
            }

            Ok(TestDb { store, user_id_map })
        }
    }

    pub struct TestDb {
        pub store: Store,
        user_id_map: HashMap<String, i64>,
    }

    impl TestDb {
        pub fn user_id(&self, username: &str) -> Option<i64> {
            self.user_id_map.get(username).copied()
        }
    }
}

pub mod fakes {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use crate::chat::{ChatBackend, PromptMessage};
    use crate::email::CodeSender;
    use crate::error::AppError;
    use crate::sensor::{ListenerGuard, MotionHardware, RawReading, SensorKind};

    /// Scriptable motion hardware with registration accounting.
    #[derive(Clone, Default)]
    pub struct FakeHardware {
        inner: Arc<FakeInner>,
    }

    #[derive(Default)]
    struct FakeInner {
        step_counter: bool,
        accelerometer: bool,
        sink: Mutex<Option<mpsc::UnboundedSender<RawReading>>>,
        listened: Mutex<Option<SensorKind>>,
        registrations: AtomicUsize,
        deregistrations: AtomicUsize,
    }

    impl FakeHardware {
        pub fn step_counter() -> Self {
            Self::with_capabilities(true, false)
        }

        pub fn accelerometer() -> Self {
            Self::with_capabilities(false, true)
        }

        pub fn both() -> Self {
            Self::with_capabilities(true, true)
        }

        pub fn none() -> Self {
            Self::with_capabilities(false, false)
        }

        fn with_capabilities(step_counter: bool, accelerometer: bool) -> Self {
            Self {
                inner: Arc::new(FakeInner {
                    step_counter,
                    accelerometer,
                    ..FakeInner::default()
                }),
            }
        }

        /// Deliver a reading to the registered listener; false when no
        /// listener is registered.
        pub fn push(&self, reading: RawReading) -> bool {
            match self.inner.sink.lock().unwrap().as_ref() {
                Some(tx) => tx.send(reading).is_ok(),
                None => false,
            }
        }

        pub fn registrations(&self) -> usize {
            self.inner.registrations.load(Ordering::SeqCst)
        }

        pub fn deregistrations(&self) -> usize {
            self.inner.deregistrations.load(Ordering::SeqCst)
        }

        pub fn listened_kind(&self) -> Option<SensorKind> {
            *self.inner.listened.lock().unwrap()
        }
    }

    impl MotionHardware for FakeHardware {
        fn available(&self, kind: SensorKind) -> bool {
            match kind {
                SensorKind::StepCounter => self.inner.step_counter,
                SensorKind::Accelerometer => self.inner.accelerometer,
            }
        }

        fn listen(
            &self,
            kind: SensorKind,
            tx: mpsc::UnboundedSender<RawReading>,
        ) -> Result<ListenerGuard, AppError> {
            *self.inner.sink.lock().unwrap() = Some(tx);
            *self.inner.listened.lock().unwrap() = Some(kind);
            self.inner.registrations.fetch_add(1, Ordering::SeqCst);
            Ok(ListenerGuard::new(Deregister {
                inner: Arc::clone(&self.inner),
            }))
        }
    }

    struct Deregister {
        inner: Arc<FakeInner>,
    }

    impl Drop for Deregister {
        fn drop(&mut self) {
            self.inner.deregistrations.fetch_add(1, Ordering::SeqCst);
            *self.inner.sink.lock().unwrap() = None;
        }
    }

    /// Chat backend that always answers with the same reply.
    pub struct CannedBackend {
        pub reply: String,
    }

    impl CannedBackend {
        pub fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
            }
        }
    }

    #[async_trait]
    impl ChatBackend for CannedBackend {
        async fn complete(&self, _messages: &[PromptMessage]) -> Result<String, AppError> {
            Ok(self.reply.clone())
        }
    }

    /// Chat backend that fails every completion.
    pub struct FailingBackend;

    #[async_trait]
    impl ChatBackend for FailingBackend {
        async fn complete(&self, _messages: &[PromptMessage]) -> Result<String, AppError> {
            Err(AppError::ExternalService(
                "chat backend unavailable".to_string(),
            ))
        }
    }

    /// Records every one-time code instead of mailing it.
    #[derive(Default)]
    pub struct RecordingCodeSender {
        sent: Mutex<Vec<(String, String)>>,
        fail: AtomicBool,
    }

    impl RecordingCodeSender {
        pub fn set_fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        pub fn last_code(&self) -> Option<String> {
            self.sent
                .lock()
                .unwrap()
                .last()
                .map(|(_, code)| code.clone())
        }
    }

    #[async_trait]
    impl CodeSender for RecordingCodeSender {
        async fn send_code(&self, to: &str, code: &str) -> bool {
            if self.fail.load(Ordering::SeqCst) {
                return false;
            }
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), code.to_string()));
            true
        }
    }
}

pub mod support {
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::prefs::PreferenceStore;
    use crate::stats::{ActivitySummary, SummarySubscription};

    /// Preference store backed by a throwaway directory; keep the
    /// `TempDir` alive for as long as the store is used.
    pub async fn test_prefs() -> (TempDir, PreferenceStore) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let prefs = PreferenceStore::load(dir.path().join("prefs.json"))
            .await
            .expect("failed to load preferences");
        (dir, prefs)
    }

    /// Drain summaries until one matches, failing the test after 5s.
    pub async fn wait_for_summary<F>(
        subscription: &mut SummarySubscription,
        mut predicate: F,
    ) -> ActivitySummary
    where
        F: FnMut(&ActivitySummary) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let summary = subscription
                    .next()
                    .await
                    .expect("summary stream ended unexpectedly");
                if predicate(&summary) {
                    return summary;
                }
            }
        })
        .await
        .expect("timed out waiting for a matching summary")
    }
}
