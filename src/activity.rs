use chrono::Utc;
use tracing::instrument;

use crate::database::Store;
use crate::error::AppError;
use crate::models::{ActivityCategory, ActivityEntry, DailyTotal, NewActivityEntry};
use crate::validation::validate_request;

/// Manual logging of workouts and food entries. Every write is validated
/// before it can touch storage.
#[derive(Clone)]
pub struct ActivityLog {
    store: Store,
}

impl ActivityLog {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    #[instrument(skip(self, entry))]
    pub async fn add_entry(
        &self,
        user_id: i64,
        entry: NewActivityEntry,
    ) -> Result<ActivityEntry, AppError> {
        Self::validate_entry(&entry)?;
        self.store
            .insert_activity(user_id, Utc::now().naive_utc(), &entry)
            .await
    }

    #[instrument(skip(self, entry))]
    pub async fn edit_entry(
        &self,
        id: i64,
        user_id: i64,
        entry: NewActivityEntry,
    ) -> Result<(), AppError> {
        Self::validate_entry(&entry)?;
        self.store.update_activity(id, user_id, &entry).await
    }

    #[instrument(skip(self))]
    pub async fn delete_entry(&self, id: i64, user_id: i64) -> Result<(), AppError> {
        self.store.delete_activity(id, user_id).await
    }

    pub async fn entries(&self, user_id: i64) -> Result<Vec<ActivityEntry>, AppError> {
        self.store.activities_for_user(user_id).await
    }

    /// Grouped per-day sums for one unit, most recent day first; days
    /// without matching entries are absent.
    pub async fn daily_totals(
        &self,
        user_id: i64,
        unit: &str,
    ) -> Result<Vec<DailyTotal>, AppError> {
        self.store.daily_totals_by_unit(user_id, unit).await
    }

    fn validate_entry(entry: &NewActivityEntry) -> Result<(), AppError> {
        validate_request(entry)?;

        if !entry.value.is_finite() || entry.value < 0.0 {
            return Err(AppError::Validation(
                "Value must be a non-negative number".to_string(),
            ));
        }

        match entry.category {
            ActivityCategory::Strength => {
                let sets = entry.sets.ok_or_else(|| {
                    AppError::Validation("Strength entries need a set count".to_string())
                })?;
                let reps = entry.reps.ok_or_else(|| {
                    AppError::Validation("Strength entries need a rep count".to_string())
                })?;
                if sets < 0 || reps < 0 {
                    return Err(AppError::Validation(
                        "Sets and reps must be non-negative".to_string(),
                    ));
                }
            }
            _ => {
                if entry.sets.is_some() || entry.reps.is_some() {
                    return Err(AppError::Validation(
                        "Only strength entries carry sets and reps".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }
}
