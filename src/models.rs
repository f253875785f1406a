use anyhow::Error;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use std::fmt;
use validator::Validate;

use crate::error::AppError;

/// Entry categories recognised by the statistics pipeline. Rows carrying
/// any other label are skipped during aggregation, not rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActivityCategory {
    Cardio,
    Strength,
    FoodDrinks,
}

impl ActivityCategory {
    pub fn as_str(&self) -> &str {
        match self {
            ActivityCategory::Cardio => "Cardio",
            ActivityCategory::Strength => "Strength",
            ActivityCategory::FoodDrinks => "Food & Drinks",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "Cardio" => Ok(ActivityCategory::Cardio),
            "Strength" => Ok(ActivityCategory::Strength),
            "Food & Drinks" => Ok(ActivityCategory::FoodDrinks),
            _ => Err(Error::msg(format!("Unknown activity category: {}", s))),
        }
    }
}

impl fmt::Display for ActivityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Aggregation window for the statistics pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TimeWindow {
    #[default]
    Daily,
    Monthly,
}

impl TimeWindow {
    pub fn as_str(&self) -> &str {
        match self {
            TimeWindow::Daily => "daily",
            TimeWindow::Monthly => "monthly",
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub step_goal: u32,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbUser {
    pub id: Option<i64>,
    pub username: Option<String>,
    pub step_goal: Option<i64>,
}

impl From<DbUser> for User {
    fn from(user: DbUser) -> Self {
        Self {
            id: user.id.unwrap_or_default(),
            username: user.username.unwrap_or_default(),
            step_goal: u32::try_from(user.step_goal.unwrap_or_default()).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct ActivityEntry {
    pub id: i64,
    pub user_id: i64,
    pub timestamp: DateTime<Utc>,
    pub category: ActivityCategory,
    pub name: String,
    pub value: f64,
    pub unit: String,
    pub sets: Option<i64>,
    pub reps: Option<i64>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbActivityEntry {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub date: Option<NaiveDateTime>,
    #[sqlx(rename = "type")]
    pub entry_type: Option<String>,
    pub name: Option<String>,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub sets: Option<i64>,
    pub reps: Option<i64>,
}

impl TryFrom<DbActivityEntry> for ActivityEntry {
    type Error = AppError;

    fn try_from(db: DbActivityEntry) -> Result<Self, Self::Error> {
        let category = ActivityCategory::from_str(&db.entry_type.unwrap_or_default())
            .map_err(|e| AppError::Internal(e.to_string()))?;
        Ok(Self {
            id: db.id.unwrap_or_default(),
            user_id: db.user_id.unwrap_or_default(),
            timestamp: db
                .date
                .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
                .unwrap_or_else(Utc::now),
            category,
            name: db.name.unwrap_or_default(),
            value: db.value.unwrap_or_default(),
            unit: db.unit.unwrap_or_default(),
            sets: db.sets,
            reps: db.reps,
        })
    }
}

/// Input for creating or editing an activity log entry. Length rules are
/// declared here; the numeric and cross-field rules live in
/// `ActivityLog::validate_entry` where they can produce one message per
/// failure.
#[derive(Debug, Clone, Validate)]
pub struct NewActivityEntry {
    pub category: ActivityCategory,
    #[validate(length(min = 1, max = 100, message = "Name must not be blank"))]
    pub name: String,
    pub value: f64,
    #[validate(length(min = 1, max = 20, message = "Unit must not be blank"))]
    pub unit: String,
    pub sets: Option<i64>,
    pub reps: Option<i64>,
}

#[derive(Debug, Serialize, Clone)]
pub struct DailyStepRecord {
    pub id: i64,
    pub user_id: i64,
    pub date: NaiveDate,
    pub step_count: i64,
    pub calories_burned: f64,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbDailyStepRecord {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub date: Option<NaiveDate>,
    pub step_count: Option<i64>,
    pub calories_burned: Option<f64>,
}

impl From<DbDailyStepRecord> for DailyStepRecord {
    fn from(db: DbDailyStepRecord) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            user_id: db.user_id.unwrap_or_default(),
            date: db.date.unwrap_or_default(),
            step_count: db.step_count.unwrap_or_default(),
            calories_burned: db.calories_burned.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct ChatMessage {
    pub id: i64,
    pub user_id: i64,
    pub text: String,
    pub is_from_user: bool,
    pub image_url: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbChatMessage {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub text: Option<String>,
    pub is_from_user: Option<bool>,
    pub image_url: Option<String>,
    pub timestamp: Option<NaiveDateTime>,
}

impl From<DbChatMessage> for ChatMessage {
    fn from(db: DbChatMessage) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            user_id: db.user_id.unwrap_or_default(),
            text: db.text.unwrap_or_default(),
            is_from_user: db.is_from_user.unwrap_or_default(),
            image_url: db.image_url,
            timestamp: db
                .timestamp
                .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
                .unwrap_or_else(Utc::now),
        }
    }
}

/// One row of the grouped daily summary: the calendar day and the summed
/// value of all matching entries logged that day.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct DailyTotal {
    pub day: NaiveDate,
    pub total: f64,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbDailyTotal {
    pub day: Option<NaiveDate>,
    pub total: Option<f64>,
}

impl From<DbDailyTotal> for DailyTotal {
    fn from(db: DbDailyTotal) -> Self {
        Self {
            day: db.day.unwrap_or_default(),
            total: db.total.unwrap_or_default(),
        }
    }
}
