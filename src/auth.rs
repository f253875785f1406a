use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use tracing::{info, instrument};
use validator::Validate;

use crate::database::Store;
use crate::email::CodeSender;
use crate::error::AppError;
use crate::models::User;
use crate::prefs::PreferenceStore;
use crate::validation::validate_request;

pub const RESET_CODE_TTL_MINUTES: i64 = 15;

const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Debug, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 32, message = "Username must be 3-32 characters"))]
    pub username: String,
    // bcrypt ignores everything past 72 bytes
    #[validate(length(min = 8, max = 72, message = "Password must be 8-72 characters"))]
    pub password: String,
}

struct PendingReset {
    code: String,
    expires_at: DateTime<Utc>,
}

/// Registration, login/logout, and credential management. The session is
/// the current-user preference: at most one authenticated user, cleared
/// on logout. Failures are values; no partial session is ever created.
#[derive(Clone)]
pub struct AuthService {
    store: Store,
    prefs: PreferenceStore,
    mailer: Arc<dyn CodeSender>,
    pending_resets: Arc<Mutex<HashMap<String, PendingReset>>>,
}

impl AuthService {
    pub fn new(store: Store, prefs: PreferenceStore, mailer: Arc<dyn CodeSender>) -> Self {
        Self {
            store,
            prefs,
            mailer,
            pending_resets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[instrument(skip_all, fields(username = %request.username))]
    pub async fn register(&self, request: RegisterRequest) -> Result<User, AppError> {
        validate_request(&request)?;
        let id = self
            .store
            .create_user(&request.username, &request.password, 0)
            .await?;
        self.store.get_user(id).await
    }

    #[instrument(skip_all, fields(username))]
    pub async fn login(&self, username: &str, password: &str) -> Result<User, AppError> {
        match self.store.authenticate_user(username, password).await? {
            Some(user) => {
                info!(user_id = user.id, "Login successful");
                self.prefs.set_current_user(user.id).await?;
                Ok(user)
            }
            None => Err(AppError::Authentication(
                "Invalid username or password".to_string(),
            )),
        }
    }

    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<(), AppError> {
        self.prefs.clear_current_user().await
    }

    #[instrument(skip_all, fields(username))]
    pub async fn change_password(
        &self,
        username: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AppError> {
        Self::check_password_rules(new_password)?;

        let user = self
            .store
            .authenticate_user(username, current_password)
            .await?
            .ok_or_else(|| AppError::Authentication("Current password is incorrect".to_string()))?;

        self.store.update_password(user.id, new_password).await
    }

    /// Goal edits land in both stores: the user row is the durable record
    /// and the preference is the observable override the pipeline reads.
    #[instrument(skip(self))]
    pub async fn update_step_goal(&self, user_id: i64, goal: u32) -> Result<(), AppError> {
        self.store.update_step_goal(user_id, goal).await?;
        self.prefs.set_step_goal(user_id, goal).await
    }

    /// Issue a one-time reset code and mail it to `email`. Returns only
    /// success/failure; a failed send leaves no pending state behind.
    #[instrument(skip_all, fields(username))]
    pub async fn begin_password_reset(&self, username: &str, email: &str) -> bool {
        let known_user = matches!(
            self.store.find_user_by_username(username).await,
            Ok(Some(_))
        );
        if !known_user || email.trim().is_empty() {
            return false;
        }

        let code = format!("{:06}", rand::rng().random_range(0..1_000_000));
        let sent = self.mailer.send_code(email, &code).await;
        if sent {
            self.pending_resets.lock().unwrap().insert(
                username.to_string(),
                PendingReset {
                    code,
                    expires_at: Utc::now() + Duration::minutes(RESET_CODE_TTL_MINUTES),
                },
            );
        }
        sent
    }

    /// Codes are single-use: right or wrong, one attempt consumes it.
    #[instrument(skip_all, fields(username))]
    pub async fn complete_password_reset(
        &self,
        username: &str,
        code: &str,
        new_password: &str,
    ) -> Result<(), AppError> {
        Self::check_password_rules(new_password)?;

        let pending = self.pending_resets.lock().unwrap().remove(username);
        let Some(pending) = pending else {
            return Err(AppError::Authentication(
                "No password reset in progress".to_string(),
            ));
        };

        if pending.expires_at < Utc::now() {
            return Err(AppError::Authentication("Reset code expired".to_string()));
        }
        if pending.code != code {
            return Err(AppError::Authentication("Incorrect reset code".to_string()));
        }

        let user = self
            .store
            .find_user_by_username(username)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", username)))?;

        self.store.update_password(user.id, new_password).await
    }

    fn check_password_rules(password: &str) -> Result<(), AppError> {
        if password.len() < MIN_PASSWORD_LENGTH {
            return Err(AppError::Validation(
                "Password must be 8-72 characters".to_string(),
            ));
        }
        Ok(())
    }
}
