use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::error::AppError;

/// Durable scalar settings: theme flag, the currently authenticated user,
/// and per-user step-goal overrides. Values live in a small JSON file and
/// every key is observable through a watch channel.
#[derive(Clone)]
pub struct PreferenceStore {
    inner: Arc<PrefsInner>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PrefValues {
    #[serde(default)]
    dark_mode: bool,
    #[serde(default)]
    current_user: Option<i64>,
    #[serde(default)]
    step_goals: HashMap<i64, u32>,
}

struct PrefsInner {
    path: PathBuf,
    values: Mutex<PrefValues>,
    dark_mode_tx: watch::Sender<bool>,
    session_tx: watch::Sender<Option<i64>>,
    goals_tx: watch::Sender<HashMap<i64, u32>>,
    // Retained so each channel always has a live receiver: `watch::Sender::send`
    // is a no-op when the receiver count is zero, which would otherwise drop
    // values set before any external subscriber exists.
    _dark_mode_rx: watch::Receiver<bool>,
    _session_rx: watch::Receiver<Option<i64>>,
    _goals_rx: watch::Receiver<HashMap<i64, u32>>,
}

impl PreferenceStore {
    /// Load preferences from `path`, starting from defaults when the file
    /// does not exist yet. A corrupt file is replaced rather than fatal.
    #[instrument]
    pub async fn load(path: PathBuf) -> Result<Self, AppError> {
        let values = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<PrefValues>(&bytes) {
                Ok(values) => values,
                Err(e) => {
                    warn!(error = %e, "Preference file is corrupt, starting from defaults");
                    PrefValues::default()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => PrefValues::default(),
            Err(e) => return Err(e.into()),
        };

        info!(current_user = ?values.current_user, "Loaded preferences");

        let (dark_mode_tx, dark_mode_rx) = watch::channel(values.dark_mode);
        let (session_tx, session_rx) = watch::channel(values.current_user);
        let (goals_tx, goals_rx) = watch::channel(values.step_goals.clone());

        Ok(Self {
            inner: Arc::new(PrefsInner {
                path,
                values: Mutex::new(values),
                dark_mode_tx,
                session_tx,
                goals_tx,
                _dark_mode_rx: dark_mode_rx,
                _session_rx: session_rx,
                _goals_rx: goals_rx,
            }),
        })
    }

    pub fn dark_mode(&self) -> bool {
        self.inner.values.lock().unwrap().dark_mode
    }

    pub fn current_user(&self) -> Option<i64> {
        self.inner.values.lock().unwrap().current_user
    }

    pub fn step_goal(&self, user_id: i64) -> Option<u32> {
        self.inner.values.lock().unwrap().step_goals.get(&user_id).copied()
    }

    pub fn watch_dark_mode(&self) -> watch::Receiver<bool> {
        self.inner.dark_mode_tx.subscribe()
    }

    /// Observable authenticated-user identifier; `None` means logged out.
    pub fn watch_session(&self) -> watch::Receiver<Option<i64>> {
        self.inner.session_tx.subscribe()
    }

    pub fn watch_goals(&self) -> watch::Receiver<HashMap<i64, u32>> {
        self.inner.goals_tx.subscribe()
    }

    #[instrument(skip(self))]
    pub async fn set_dark_mode(&self, dark_mode: bool) -> Result<(), AppError> {
        self.inner.values.lock().unwrap().dark_mode = dark_mode;
        self.persist().await?;
        let _ = self.inner.dark_mode_tx.send(dark_mode);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn set_current_user(&self, user_id: i64) -> Result<(), AppError> {
        info!("Storing authenticated user");
        self.inner.values.lock().unwrap().current_user = Some(user_id);
        self.persist().await?;
        let _ = self.inner.session_tx.send(Some(user_id));
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn clear_current_user(&self) -> Result<(), AppError> {
        info!("Clearing authenticated user");
        self.inner.values.lock().unwrap().current_user = None;
        self.persist().await?;
        let _ = self.inner.session_tx.send(None);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn set_step_goal(&self, user_id: i64, goal: u32) -> Result<(), AppError> {
        info!("Storing step goal");
        let goals = {
            let mut values = self.inner.values.lock().unwrap();
            values.step_goals.insert(user_id, goal);
            values.step_goals.clone()
        };
        self.persist().await?;
        let _ = self.inner.goals_tx.send(goals);
        Ok(())
    }

    /// Write-then-rename so a crash mid-write never clobbers the file.
    async fn persist(&self) -> Result<(), AppError> {
        let bytes = {
            let values = self.inner.values.lock().unwrap();
            serde_json::to_vec_pretty(&*values)?
        };

        let mut tmp = self.inner.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.inner.path).await?;
        Ok(())
    }
}
