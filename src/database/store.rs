use chrono::{NaiveDate, NaiveDateTime, Utc};
use sqlx::sqlite::SqlitePool;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::error::AppError;
use crate::models::{
    ActivityEntry, ChatMessage, DailyStepRecord, DailyTotal, DbActivityEntry, DbChatMessage,
    DbDailyStepRecord, DbDailyTotal, DbUser, NewActivityEntry, User,
};
use crate::stats::CALORIES_PER_STEP;

/// Handle over the embedded relational store. Constructed once at startup
/// and injected into every consumer; mutations bump a generation counter
/// so read-side compositions can observe changes.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    changes: watch::Sender<u64>,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        let (changes, _) = watch::channel(0);
        Self { pool, changes }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Observable generation counter, bumped after every committed
    /// mutation. Subscribers re-read whatever they care about.
    pub fn watch_changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn notify_changed(&self) {
        self.changes.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    #[instrument(skip_all, fields(username))]
    pub async fn create_user(
        &self,
        username: &str,
        password: &str,
        step_goal: u32,
    ) -> Result<i64, AppError> {
        info!("Creating new user");

        let existing = sqlx::query_as::<_, (i64,)>("SELECT id FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        if existing.is_some() {
            return Err(AppError::Validation(format!(
                "Username '{}' already exists",
                username
            )));
        }

        let hashed_password = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;

        let res = sqlx::query("INSERT INTO users (username, password, step_goal) VALUES (?, ?, ?)")
            .bind(username)
            .bind(hashed_password)
            .bind(i64::from(step_goal))
            .execute(&self.pool)
            .await?;

        self.notify_changed();
        Ok(res.last_insert_rowid())
    }

    #[instrument(skip_all, fields(username))]
    pub async fn authenticate_user(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<User>, AppError> {
        info!("Authenticating user");

        #[derive(sqlx::FromRow)]
        struct AuthRow {
            id: i64,
            username: String,
            password: String,
            step_goal: i64,
        }

        let row = sqlx::query_as::<_, AuthRow>(
            "SELECT id, username, password, step_goal FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let valid = bcrypt::verify(password, &row.password).unwrap_or(false);
                if valid {
                    Ok(Some(User {
                        id: row.id,
                        username: row.username,
                        step_goal: u32::try_from(row.step_goal).unwrap_or_default(),
                    }))
                } else {
                    Ok(None)
                }
            }
            _ => Ok(None),
        }
    }

    #[instrument(skip(self))]
    pub async fn get_user(&self, id: i64) -> Result<User, AppError> {
        info!("Fetching user by ID");
        let row =
            sqlx::query_as::<_, DbUser>("SELECT id, username, step_goal FROM users WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(user) => Ok(User::from(user)),
            _ => Err(AppError::NotFound(format!(
                "User with id {} not found in database",
                id
            ))),
        }
    }

    #[instrument(skip(self))]
    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        info!("Getting user by username");
        let row = sqlx::query_as::<_, DbUser>(
            "SELECT id, username, step_goal FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }

    #[instrument(skip_all, fields(user_id))]
    pub async fn update_password(&self, user_id: i64, new_password: &str) -> Result<(), AppError> {
        info!("Updating user password");
        let hashed_password = bcrypt::hash(new_password, bcrypt::DEFAULT_COST)?;

        let res = sqlx::query("UPDATE users SET password = ? WHERE id = ?")
            .bind(hashed_password)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if res.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "User with id {} not found in database",
                user_id
            )));
        }

        self.notify_changed();
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn update_step_goal(&self, user_id: i64, step_goal: u32) -> Result<(), AppError> {
        info!("Updating user step goal");
        let res = sqlx::query("UPDATE users SET step_goal = ? WHERE id = ?")
            .bind(i64::from(step_goal))
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if res.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "User with id {} not found in database",
                user_id
            )));
        }

        self.notify_changed();
        Ok(())
    }

    /// Removing a user cascades to their activity, step, and chat rows.
    #[instrument(skip(self))]
    pub async fn delete_user(&self, user_id: i64) -> Result<(), AppError> {
        info!("Deleting user");
        let res = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if res.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "User with id {} not found in database",
                user_id
            )));
        }

        self.notify_changed();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Activity log
    // ------------------------------------------------------------------

    #[instrument(skip(self, entry))]
    pub async fn insert_activity(
        &self,
        user_id: i64,
        timestamp: NaiveDateTime,
        entry: &NewActivityEntry,
    ) -> Result<ActivityEntry, AppError> {
        info!("Inserting activity entry");
        let res = sqlx::query(
            "INSERT INTO activity_logs (user_id, date, type, name, value, unit, sets, reps)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(timestamp)
        .bind(entry.category.as_str())
        .bind(&entry.name)
        .bind(entry.value)
        .bind(&entry.unit)
        .bind(entry.sets)
        .bind(entry.reps)
        .execute(&self.pool)
        .await?;

        self.notify_changed();

        Ok(ActivityEntry {
            id: res.last_insert_rowid(),
            user_id,
            timestamp: chrono::DateTime::from_naive_utc_and_offset(timestamp, Utc),
            category: entry.category,
            name: entry.name.clone(),
            value: entry.value,
            unit: entry.unit.clone(),
            sets: entry.sets,
            reps: entry.reps,
        })
    }

    #[instrument(skip(self, entry))]
    pub async fn update_activity(
        &self,
        id: i64,
        user_id: i64,
        entry: &NewActivityEntry,
    ) -> Result<(), AppError> {
        info!("Updating activity entry");
        let res = sqlx::query(
            "UPDATE activity_logs
             SET type = ?, name = ?, value = ?, unit = ?, sets = ?, reps = ?
             WHERE id = ? AND user_id = ?",
        )
        .bind(entry.category.as_str())
        .bind(&entry.name)
        .bind(entry.value)
        .bind(&entry.unit)
        .bind(entry.sets)
        .bind(entry.reps)
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Activity entry {} not found for user {}",
                id, user_id
            )));
        }

        self.notify_changed();
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_activity(&self, id: i64, user_id: i64) -> Result<(), AppError> {
        info!("Deleting activity entry");
        let res = sqlx::query("DELETE FROM activity_logs WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if res.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Activity entry {} not found for user {}",
                id, user_id
            )));
        }

        self.notify_changed();
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn activities_for_user(&self, user_id: i64) -> Result<Vec<ActivityEntry>, AppError> {
        info!("Getting activity entries");
        let rows = sqlx::query_as::<_, DbActivityEntry>(
            "SELECT id, user_id, date, type, name, value, unit, sets, reps
             FROM activity_logs
             WHERE user_id = ?
             ORDER BY date DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Self::map_entries(rows))
    }

    #[instrument(skip(self))]
    pub async fn activities_since(
        &self,
        user_id: i64,
        since: NaiveDateTime,
    ) -> Result<Vec<ActivityEntry>, AppError> {
        info!("Getting activity entries in window");
        let rows = sqlx::query_as::<_, DbActivityEntry>(
            "SELECT id, user_id, date, type, name, value, unit, sets, reps
             FROM activity_logs
             WHERE user_id = ? AND date >= ?
             ORDER BY date DESC",
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(Self::map_entries(rows))
    }

    /// Rows carrying an unrecognised category are skipped, not surfaced
    /// as errors.
    fn map_entries(rows: Vec<DbActivityEntry>) -> Vec<ActivityEntry> {
        rows.into_iter()
            .filter_map(|row| match ActivityEntry::try_from(row) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping activity row with unknown category");
                    None
                }
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Daily steps
    // ------------------------------------------------------------------

    /// Accumulate a positive step delta into the user's single bucket for
    /// `day`, keeping the derived calorie estimate in sync.
    #[instrument(skip(self))]
    pub async fn increment_daily_steps(
        &self,
        user_id: i64,
        day: NaiveDate,
        delta: i64,
    ) -> Result<(), AppError> {
        if delta <= 0 {
            return Err(AppError::Validation(
                "Step delta must be positive".to_string(),
            ));
        }

        info!("Incrementing daily steps");
        let delta_calories = delta as f64 * CALORIES_PER_STEP;

        sqlx::query(
            "INSERT INTO daily_steps (user_id, date, step_count, calories_burned)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (user_id, date) DO UPDATE SET
                 step_count = step_count + excluded.step_count,
                 calories_burned = (step_count + excluded.step_count) * ?",
        )
        .bind(user_id)
        .bind(day)
        .bind(delta)
        .bind(delta_calories)
        .bind(CALORIES_PER_STEP)
        .execute(&self.pool)
        .await?;

        self.notify_changed();
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn steps_since(&self, user_id: i64, since: NaiveDate) -> Result<i64, AppError> {
        info!("Summing steps in window");
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(step_count), 0) FROM daily_steps
             WHERE user_id = ? AND date >= ?",
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    #[instrument(skip(self))]
    pub async fn daily_step_records(
        &self,
        user_id: i64,
    ) -> Result<Vec<DailyStepRecord>, AppError> {
        info!("Getting daily step records");
        let rows = sqlx::query_as::<_, DbDailyStepRecord>(
            "SELECT id, user_id, date, step_count, calories_burned
             FROM daily_steps
             WHERE user_id = ?
             ORDER BY date DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DailyStepRecord::from).collect())
    }

    // ------------------------------------------------------------------
    // Grouped daily summary
    // ------------------------------------------------------------------

    /// One row per distinct day with at least one matching entry, most
    /// recent day first. Days with no matching entries are absent, never
    /// zero.
    #[instrument(skip(self))]
    pub async fn daily_totals_by_unit(
        &self,
        user_id: i64,
        unit: &str,
    ) -> Result<Vec<DailyTotal>, AppError> {
        info!("Getting grouped daily totals");
        let rows = sqlx::query_as::<_, DbDailyTotal>(
            "SELECT date(date) AS day, SUM(value) AS total
             FROM activity_logs
             WHERE user_id = ? AND unit = ?
             GROUP BY date(date)
             ORDER BY day DESC",
        )
        .bind(user_id)
        .bind(unit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DailyTotal::from).collect())
    }

    // ------------------------------------------------------------------
    // Chat history
    // ------------------------------------------------------------------

    #[instrument(skip(self, text))]
    pub async fn insert_chat_message(
        &self,
        user_id: i64,
        text: &str,
        is_from_user: bool,
        image_url: Option<&str>,
    ) -> Result<ChatMessage, AppError> {
        info!("Inserting chat message");
        let timestamp = Utc::now().naive_utc();

        let res = sqlx::query(
            "INSERT INTO chat_messages (user_id, text, is_from_user, image_url, timestamp)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(text)
        .bind(is_from_user)
        .bind(image_url)
        .bind(timestamp)
        .execute(&self.pool)
        .await?;

        self.notify_changed();

        Ok(ChatMessage {
            id: res.last_insert_rowid(),
            user_id,
            text: text.to_string(),
            is_from_user,
            image_url: image_url.map(String::from),
            timestamp: chrono::DateTime::from_naive_utc_and_offset(timestamp, Utc),
        })
    }

    #[instrument(skip(self))]
    pub async fn chat_history(&self, user_id: i64) -> Result<Vec<ChatMessage>, AppError> {
        info!("Getting chat history");
        let rows = sqlx::query_as::<_, DbChatMessage>(
            "SELECT id, user_id, text, is_from_user, image_url, timestamp
             FROM chat_messages
             WHERE user_id = ?
             ORDER BY timestamp ASC, id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ChatMessage::from).collect())
    }
}
